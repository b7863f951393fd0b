//! Empty container detection and deletion for a single project.
//!
//! The joined view has one row per leaf. Which trailing columns are null
//! tells us the deepest level that exists on that path:
//!
//! | session.label | acquisition.label | file.name | meaning           |
//! |---------------|-------------------|-----------|-------------------|
//! | null          | null              | null      | empty subject     |
//! | set           | null              | null      | empty session     |
//! | set           | set               | null      | empty acquisition |
//! | any           | any               | set       | not empty         |
//!
//! Rows touched in the recency window are dropped before classification.

use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{debug, error, info};

use crate::services::{ContainerKind, Platform, Project};
use crate::views::{
    ACQUISITION_ID, ACQUISITION_LABEL, FILE_CREATED, FILE_NAME, ProjectViews, SESSION_CREATED,
    SESSION_ID, SESSION_LABEL, SUBJECT_CREATED, SUBJECT_ID, ViewError, ViewLevel, ViewRow,
    join_project_views,
};

use super::SweepOptions;

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// The columns of a joined row the sweep cares about
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinedRow {
    pub subject_id: Option<String>,
    pub subject_created: Option<DateTime<Utc>>,
    pub session_id: Option<String>,
    pub session_label: Option<String>,
    pub session_created: Option<DateTime<Utc>>,
    pub acquisition_id: Option<String>,
    pub acquisition_label: Option<String>,
    pub file_name: Option<String>,
    pub file_created: Option<DateTime<Utc>>,
}

impl JoinedRow {
    pub fn from_view_row(row: &ViewRow) -> Result<Self, ViewError> {
        let text = |column: &str| row.get(column).map(str::to_owned);
        Ok(Self {
            subject_id: text(SUBJECT_ID),
            subject_created: timestamp(row, SUBJECT_CREATED)?,
            session_id: text(SESSION_ID),
            session_label: text(SESSION_LABEL),
            session_created: timestamp(row, SESSION_CREATED)?,
            acquisition_id: text(ACQUISITION_ID),
            acquisition_label: text(ACQUISITION_LABEL),
            file_name: text(FILE_NAME),
            file_created: timestamp(row, FILE_CREATED)?,
        })
    }

    /// True when none of the row's timestamps fall inside the recency window
    pub fn is_settled(&self, cutoff: DateTime<Utc>) -> bool {
        [self.subject_created, self.session_created, self.file_created]
            .into_iter()
            .all(|created| is_settled(created, cutoff))
    }
}

/// A null timestamp never counts as recent
pub fn is_settled(created: Option<DateTime<Utc>>, cutoff: DateTime<Utc>) -> bool {
    created.is_none_or(|created| created < cutoff)
}

/// Parse a view timestamp. Values without an offset are taken as UTC.
pub fn parse_timestamp(column: &'static str, value: &str) -> Result<DateTime<Utc>, ViewError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Ok(ts.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(ts.and_utc());
        }
    }
    Err(ViewError::BadTimestamp {
        column,
        value: value.to_string(),
    })
}

fn timestamp(row: &ViewRow, column: &'static str) -> Result<Option<DateTime<Utc>>, ViewError> {
    row.get(column)
        .map(|value| parse_timestamp(column, value))
        .transpose()
}

/// What a single joined row says about its path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    EmptySubject(String),
    EmptySession(String),
    EmptyAcquisition(String),
    NonEmpty,
}

impl Classification {
    pub fn target(self) -> Option<DeleteTarget> {
        match self {
            Classification::EmptySubject(id) => Some(DeleteTarget::new(ContainerKind::Subject, id)),
            Classification::EmptySession(id) => Some(DeleteTarget::new(ContainerKind::Session, id)),
            Classification::EmptyAcquisition(id) => {
                Some(DeleteTarget::new(ContainerKind::Acquisition, id))
            }
            Classification::NonEmpty => None,
        }
    }
}

/// Classify a row by its null pattern.
///
/// Fails only when the row points at an empty container but lacks that
/// container's id.
pub fn classify(row: &JoinedRow) -> Result<Classification, ViewError> {
    if row.file_name.is_some() {
        return Ok(Classification::NonEmpty);
    }

    let class = match (row.session_label.is_some(), row.acquisition_label.is_some()) {
        (false, false) => Classification::EmptySubject(required(&row.subject_id, SUBJECT_ID)?),
        (true, false) => Classification::EmptySession(required(&row.session_id, SESSION_ID)?),
        (true, true) => {
            Classification::EmptyAcquisition(required(&row.acquisition_id, ACQUISITION_ID)?)
        }
        // acquisition without a session label; nothing to say about it
        (false, true) => Classification::NonEmpty,
    };
    Ok(class)
}

fn required(value: &Option<String>, column: &'static str) -> Result<String, ViewError> {
    value.clone().ok_or(ViewError::MissingColumn { column })
}

/// A container scheduled for deletion
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeleteTarget {
    pub kind: ContainerKind,
    pub id: String,
}

impl DeleteTarget {
    pub fn new(kind: ContainerKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

struct Candidate {
    target: DeleteTarget,
    subject_id: Option<String>,
    session_id: Option<String>,
}

/// Work out which containers of a project to delete.
///
/// Returns `None` when the project has no view data at all. Each container
/// appears at most once, in the order its row was first seen, and nothing
/// below a subject or session that is itself being deleted is listed.
pub fn plan_deletions(
    views: &ProjectViews,
    cutoff: DateTime<Utc>,
) -> Result<Option<Vec<DeleteTarget>>, ViewError> {
    let Some(joined) = join_project_views(views) else {
        return Ok(None);
    };

    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    for view_row in &joined.rows {
        let row = JoinedRow::from_view_row(view_row)?;
        if row.file_name.is_some() || !row.is_settled(cutoff) {
            continue;
        }
        let Some(target) = classify(&row)?.target() else {
            continue;
        };
        if seen.insert(target.clone()) {
            candidates.push(Candidate {
                target,
                subject_id: row.subject_id,
                session_id: row.session_id,
            });
        }
    }

    let doomed = |kind: ContainerKind| -> HashSet<String> {
        candidates
            .iter()
            .filter(|c| c.target.kind == kind)
            .map(|c| c.target.id.clone())
            .collect()
    };
    let subjects = doomed(ContainerKind::Subject);
    let sessions = doomed(ContainerKind::Session);
    let under = |set: &HashSet<String>, id: &Option<String>| {
        id.as_ref().is_some_and(|id| set.contains(id))
    };

    let targets = candidates
        .iter()
        .filter(|c| match c.target.kind {
            ContainerKind::Subject => true,
            ContainerKind::Session => !under(&subjects, &c.subject_id),
            ContainerKind::Acquisition => {
                !under(&subjects, &c.subject_id) && !under(&sessions, &c.session_id)
            }
        })
        .map(|c| c.target.clone())
        .collect();
    Ok(Some(targets))
}

/// How a project's sweep ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectStatus {
    /// All three views came back empty
    NoData,
    NoEmptyContainers,
    Swept,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDelete {
    pub target: DeleteTarget,
    pub error: String,
}

/// Result of sweeping one project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectReport {
    pub label: String,
    pub status: ProjectStatus,
    /// Everything the sweep decided to delete
    pub targets: Vec<DeleteTarget>,
    pub deleted: Vec<DeleteTarget>,
    pub failed: Vec<FailedDelete>,
}

impl ProjectReport {
    fn new(project: &Project, status: ProjectStatus) -> Self {
        Self {
            label: project.label.clone(),
            status,
            targets: Vec::new(),
            deleted: Vec::new(),
            failed: Vec::new(),
        }
    }
}

/// Fetch the three views of a project
pub async fn fetch_project_views(platform: &dyn Platform, project: &Project) -> Result<ProjectViews> {
    let mut views = ProjectViews::default();
    for level in ViewLevel::ALL {
        let table = platform
            .fetch_view(level, &project.id)
            .await
            .with_context(|| format!("Failed to fetch {} view for project {}", level, project.label))?;
        match level {
            ViewLevel::Subject => views.subjects = table,
            ViewLevel::Session => views.sessions = table,
            ViewLevel::Acquisition => views.acquisitions = table,
        }
    }
    Ok(views)
}

/// Sweep one project: fetch, join, filter, classify, delete.
///
/// Fetch and parse failures abort the project. Failed deletes are recorded
/// and the remaining deletes still run.
pub async fn sweep_project(
    platform: &dyn Platform,
    project: &Project,
    options: &SweepOptions,
) -> Result<ProjectReport> {
    println!("PROCESSING: {}", project.label);
    info!(project = %project.label, project_id = %project.id, "Processing project");

    let views = fetch_project_views(platform, project).await?;
    debug!(
        project = %project.label,
        subjects = views.subjects.len(),
        sessions = views.sessions.len(),
        acquisitions = views.acquisitions.len(),
        "Fetched views"
    );

    let plan = plan_deletions(&views, options.cutoff)
        .with_context(|| format!("Malformed view data for project {}", project.label))?;

    let Some(targets) = plan else {
        println!("    NO CONTAINERS FOUND, SKIPPING");
        return Ok(ProjectReport::new(project, ProjectStatus::NoData));
    };

    if targets.is_empty() {
        println!("    NO EMPTY CONTAINERS FOUND");
        return Ok(ProjectReport::new(project, ProjectStatus::NoEmptyContainers));
    }

    let mut report = ProjectReport::new(project, ProjectStatus::Swept);
    if options.dry_run {
        println!("    EMPTY CONTAINERS FOUND (DRY RUN)");
        for target in &targets {
            println!("      would delete {} {}", target.kind, target.id);
            info!(project = %project.label, kind = %target.kind, id = %target.id, "Dry run, not deleting");
        }
        report.targets = targets;
        return Ok(report);
    }

    println!("    DELETING EMPTY CONTAINERS");
    for target in &targets {
        match platform.delete_container(target.kind, &target.id).await {
            Ok(()) => report.deleted.push(target.clone()),
            Err(e) => {
                error!(
                    project = %project.label,
                    kind = %target.kind,
                    id = %target.id,
                    error = %format!("{:#}", e),
                    "Failed to delete container"
                );
                report.failed.push(FailedDelete {
                    target: target.clone(),
                    error: format!("{:#}", e),
                });
            }
        }
    }
    report.targets = targets;
    Ok(report)
}
