//! End-to-end sweep tests against an in-memory platform
//!
//! These exercise the whole per-project pipeline:
//! - view fetch and join
//! - recency filtering
//! - classification and deduplicated deletes
//! - per-project failure isolation

use std::collections::HashMap;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use fw_sweep::jobs::{ProjectStatus, SweepOptions, run_sweep, sweep_project};
use fw_sweep::services::{ContainerKind, Platform, Project};
use fw_sweep::views::{
    ACQUISITION_ID, ACQUISITION_LABEL, FILE_CREATED, FILE_ID, FILE_NAME, FILE_TYPE, PROJECT_ID,
    PROJECT_LABEL, SESSION_CREATED, SESSION_ID, SESSION_LABEL, SUBJECT_CREATED, SUBJECT_ID,
    SUBJECT_LABEL, ViewLevel, ViewRow, ViewTable,
};

// ============================================================================
// Fake platform
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    FetchView(ViewLevel, String),
    Delete(ContainerKind, String),
}

#[derive(Default)]
struct FakePlatform {
    projects: Vec<Project>,
    views: HashMap<(String, ViewLevel), ViewTable>,
    broken_projects: Vec<String>,
    undeletable: Vec<String>,
    calls: Mutex<Vec<Call>>,
}

impl FakePlatform {
    fn with_project(mut self, project: Project, views: [Vec<ViewRow>; 3]) -> Self {
        for (level, rows) in ViewLevel::ALL.into_iter().zip(views) {
            self.views.insert((project.id.clone(), level), ViewTable::new(rows));
        }
        self.projects.push(project);
        self
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    fn deletes(&self) -> Vec<(ContainerKind, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Delete(kind, id) => Some((kind, id)),
                Call::FetchView(..) => None,
            })
            .collect()
    }

    fn record_delete(&self, kind: ContainerKind, id: &str) -> Result<()> {
        self.calls.lock().push(Call::Delete(kind, id.to_string()));
        if self.undeletable.iter().any(|u| u == id) {
            return Err(anyhow!("409 Conflict: container {} is not empty", id));
        }
        Ok(())
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn list_projects(&self) -> Result<Vec<Project>> {
        Ok(self.projects.clone())
    }

    async fn fetch_view(&self, level: ViewLevel, project_id: &str) -> Result<ViewTable> {
        self.calls
            .lock()
            .push(Call::FetchView(level, project_id.to_string()));
        if self.broken_projects.iter().any(|p| p == project_id) {
            return Err(anyhow!("502 Bad Gateway"));
        }
        Ok(self
            .views
            .get(&(project_id.to_string(), level))
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_subject(&self, id: &str) -> Result<()> {
        self.record_delete(ContainerKind::Subject, id)
    }

    async fn delete_session(&self, id: &str) -> Result<()> {
        self.record_delete(ContainerKind::Session, id)
    }

    async fn delete_acquisition(&self, id: &str) -> Result<()> {
        self.record_delete(ContainerKind::Acquisition, id)
    }
}

// ============================================================================
// Row builders
// ============================================================================

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
}

fn ago(hours: i64) -> String {
    (now() - Duration::hours(hours)).to_rfc3339()
}

fn options() -> SweepOptions {
    SweepOptions::new(now(), 24).unwrap()
}

fn base(project: &str, subject: &str) -> ViewRow {
    ViewRow::new()
        .with(PROJECT_ID, project)
        .with(PROJECT_LABEL, project.to_uppercase())
        .with(SUBJECT_ID, subject)
        .with(SUBJECT_LABEL, format!("sub-{}", subject))
}

fn subject(project: &str, id: &str, created_hours_ago: i64) -> ViewRow {
    base(project, id).with(SUBJECT_CREATED, ago(created_hours_ago))
}

fn session_keys(project: &str, subject: &str, id: &str) -> ViewRow {
    base(project, subject)
        .with(SESSION_ID, id)
        .with(SESSION_LABEL, format!("ses-{}", id))
}

fn session(project: &str, subject: &str, id: &str, created_hours_ago: i64) -> ViewRow {
    session_keys(project, subject, id).with(SESSION_CREATED, ago(created_hours_ago))
}

fn acquisition(project: &str, subject: &str, session: &str, id: &str) -> ViewRow {
    session_keys(project, subject, session)
        .with(ACQUISITION_ID, id)
        .with(ACQUISITION_LABEL, format!("acq-{}", id))
}

fn file(project: &str, subject: &str, session: &str, acq: &str, name: &str, hours_ago: i64) -> ViewRow {
    acquisition(project, subject, session, acq)
        .with(FILE_NAME, name)
        .with(FILE_ID, format!("f-{}", name))
        .with(FILE_CREATED, ago(hours_ago))
        .with(FILE_TYPE, "nifti")
}

fn project(id: &str) -> Project {
    Project::new(id, id.to_uppercase())
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_old_session_without_acquisitions_is_deleted() {
    let fake = FakePlatform::default().with_project(
        project("p1"),
        [
            vec![subject("p1", "s1", 72)],
            vec![session("p1", "s1", "ses1", 48)],
            vec![],
        ],
    );

    let report = sweep_project(&fake, &project("p1"), &options()).await.unwrap();

    assert_eq!(report.status, ProjectStatus::Swept);
    assert_eq!(fake.deletes(), vec![(ContainerKind::Session, "ses1".to_string())]);
}

#[tokio::test]
async fn test_recent_session_is_left_alone() {
    let fake = FakePlatform::default().with_project(
        project("p1"),
        [
            vec![subject("p1", "s1", 72)],
            vec![session("p1", "s1", "ses1", 1)],
            vec![],
        ],
    );

    let report = sweep_project(&fake, &project("p1"), &options()).await.unwrap();

    assert_eq!(report.status, ProjectStatus::NoEmptyContainers);
    assert!(fake.deletes().is_empty());
}

#[tokio::test]
async fn test_project_without_data_is_skipped() {
    let fake = FakePlatform::default().with_project(project("p1"), [vec![], vec![], vec![]]);

    let report = sweep_project(&fake, &project("p1"), &options()).await.unwrap();

    assert_eq!(report.status, ProjectStatus::NoData);
    assert!(report.targets.is_empty());
    assert!(fake.deletes().is_empty());
    assert_eq!(
        fake.calls(),
        ViewLevel::ALL
            .into_iter()
            .map(|level| Call::FetchView(level, "p1".to_string()))
            .collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_files_protect_their_whole_path() {
    let fake = FakePlatform::default().with_project(
        project("p1"),
        [
            vec![subject("p1", "s1", 200)],
            vec![session("p1", "s1", "ses1", 200)],
            vec![
                file("p1", "s1", "ses1", "a1", "t1.nii.gz", 200),
                file("p1", "s1", "ses1", "a1", "t2.nii.gz", 200),
            ],
        ],
    );

    let report = sweep_project(&fake, &project("p1"), &options()).await.unwrap();

    assert_eq!(report.status, ProjectStatus::NoEmptyContainers);
    assert!(fake.deletes().is_empty());
}

#[tokio::test]
async fn test_empty_subject_deletes_only_the_subject() {
    let fake = FakePlatform::default().with_project(
        project("p1"),
        [
            vec![subject("p1", "s1", 100), subject("p1", "s2", 100)],
            vec![session("p1", "s2", "ses2", 100)],
            vec![file("p1", "s2", "ses2", "a2", "dwi.nii", 100)],
        ],
    );

    sweep_project(&fake, &project("p1"), &options()).await.unwrap();

    assert_eq!(fake.deletes(), vec![(ContainerKind::Subject, "s1".to_string())]);
}

#[tokio::test]
async fn test_each_container_deleted_once() {
    // the acquisition view repeats the empty acquisition, the subject view
    // repeats subjects once per subject-level file
    let fake = FakePlatform::default().with_project(
        project("p1"),
        [
            vec![subject("p1", "s1", 100), subject("p1", "s1", 100)],
            vec![session("p1", "s1", "ses1", 100), session("p1", "s1", "ses2", 100)],
            vec![
                acquisition("p1", "s1", "ses1", "a1"),
                acquisition("p1", "s1", "ses1", "a1"),
                file("p1", "s1", "ses1", "a2", "x.dcm", 100),
            ],
        ],
    );

    sweep_project(&fake, &project("p1"), &options()).await.unwrap();

    assert_eq!(
        fake.deletes(),
        vec![
            (ContainerKind::Acquisition, "a1".to_string()),
            (ContainerKind::Session, "ses2".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_session_on_distinct_rows_deleted_once() {
    // rows differ in file.type, so row-level dedup keeps both
    let fake = FakePlatform::default().with_project(
        project("p1"),
        [
            vec![subject("p1", "s1", 100)],
            vec![
                session("p1", "s1", "ses1", 100).with(FILE_TYPE, "dicom"),
                session("p1", "s1", "ses1", 100).with(FILE_TYPE, "nifti"),
            ],
            vec![],
        ],
    );

    let report = sweep_project(&fake, &project("p1"), &options()).await.unwrap();

    assert_eq!(report.targets.len(), 1);
    assert_eq!(fake.deletes(), vec![(ContainerKind::Session, "ses1".to_string())]);
}

#[tokio::test]
async fn test_recent_file_blocks_nothing_else() {
    let fake = FakePlatform::default().with_project(
        project("p1"),
        [
            vec![subject("p1", "s1", 100)],
            vec![session("p1", "s1", "ses1", 100)],
            vec![
                acquisition("p1", "s1", "ses1", "empty"),
                file("p1", "s1", "ses1", "busy", "upload.zip", 2),
            ],
        ],
    );

    sweep_project(&fake, &project("p1"), &options()).await.unwrap();

    assert_eq!(fake.deletes(), vec![(ContainerKind::Acquisition, "empty".to_string())]);
}

#[tokio::test]
async fn test_dry_run_issues_no_deletes() {
    let fake = FakePlatform::default().with_project(
        project("p1"),
        [vec![subject("p1", "s1", 100)], vec![], vec![]],
    );
    let mut options = options();
    options.dry_run = true;

    let summary = run_sweep(&fake, &options).await.unwrap();

    assert!(fake.deletes().is_empty());
    assert_eq!(summary.deletions, 1);
    assert!(summary.is_clean());
}

#[tokio::test]
async fn test_failing_project_does_not_stop_the_run() {
    let mut fake = FakePlatform::default()
        .with_project(project("p1"), [vec![subject("p1", "s1", 100)], vec![], vec![]])
        .with_project(project("p2"), [vec![subject("p2", "s2", 100)], vec![], vec![]]);
    fake.broken_projects.push("p1".to_string());

    let summary = run_sweep(&fake, &options()).await.unwrap();

    assert_eq!(summary.projects_processed, 1);
    assert_eq!(summary.project_failures.len(), 1);
    assert_eq!(summary.project_failures[0].label, "P1");
    assert!(summary.project_failures[0].error.contains("502 Bad Gateway"));
    assert_eq!(fake.deletes(), vec![(ContainerKind::Subject, "s2".to_string())]);
    assert!(!summary.is_clean());
}

#[tokio::test]
async fn test_failed_delete_is_recorded_and_sweep_continues() {
    let mut fake = FakePlatform::default().with_project(
        project("p1"),
        [
            vec![subject("p1", "s1", 100), subject("p1", "s2", 100)],
            vec![],
            vec![],
        ],
    );
    fake.undeletable.push("s1".to_string());

    let summary = run_sweep(&fake, &options()).await.unwrap();

    assert_eq!(
        fake.deletes(),
        vec![
            (ContainerKind::Subject, "s1".to_string()),
            (ContainerKind::Subject, "s2".to_string()),
        ]
    );
    assert_eq!(summary.deletions, 1);
    assert_eq!(summary.delete_failures.len(), 1);
    assert_eq!(summary.delete_failures[0].target.id, "s1");
}

#[tokio::test]
async fn test_project_selection_limits_the_run() {
    let fake = FakePlatform::default()
        .with_project(project("p1"), [vec![subject("p1", "s1", 100)], vec![], vec![]])
        .with_project(project("p2"), [vec![subject("p2", "s2", 100)], vec![], vec![]]);
    let mut options = options();
    options.projects = vec!["P2".to_string()];

    let summary = run_sweep(&fake, &options).await.unwrap();

    assert_eq!(summary.projects_processed, 1);
    assert_eq!(fake.deletes(), vec![(ContainerKind::Subject, "s2".to_string())]);
}

#[tokio::test]
async fn test_malformed_timestamp_fails_only_that_project() {
    let fake = FakePlatform::default()
        .with_project(
            project("p1"),
            [vec![base("p1", "s1").with(SUBJECT_CREATED, "yesterday-ish")], vec![], vec![]],
        )
        .with_project(project("p2"), [vec![subject("p2", "s2", 100)], vec![], vec![]]);

    let summary = run_sweep(&fake, &options()).await.unwrap();

    assert_eq!(summary.project_failures.len(), 1);
    assert!(summary.project_failures[0].error.contains("unparseable timestamp"));
    assert_eq!(fake.deletes(), vec![(ContainerKind::Subject, "s2".to_string())]);
}
