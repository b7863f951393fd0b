//! Maintenance jobs run against the platform

pub mod empty_containers;

use std::fmt;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{error, info, warn};

use crate::services::Platform;

pub use empty_containers::{
    Classification, DeleteTarget, FailedDelete, ProjectReport, ProjectStatus, classify,
    plan_deletions, sweep_project,
};

/// Parameters shared by every project in one run
#[derive(Debug, Clone)]
pub struct SweepOptions {
    /// Anything created at or after this instant is left alone
    pub cutoff: DateTime<Utc>,
    pub dry_run: bool,
    /// Only sweep projects with these labels (all when empty)
    pub projects: Vec<String>,
}

impl SweepOptions {
    /// Options with a cutoff `min_age_hours` before `now`
    pub fn new(now: DateTime<Utc>, min_age_hours: i64) -> Result<Self> {
        let window = TimeDelta::try_hours(min_age_hours).context("Recency window is too large")?;
        let cutoff = now
            .checked_sub_signed(window)
            .context("Recency window reaches before the earliest representable time")?;
        Ok(Self {
            cutoff,
            dry_run: false,
            projects: Vec::new(),
        })
    }

    fn wants(&self, label: &str) -> bool {
        self.projects.is_empty() || self.projects.iter().any(|p| p == label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectFailure {
    pub label: String,
    pub error: String,
}

/// Totals for a whole run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub dry_run: bool,
    pub projects_processed: usize,
    pub projects_skipped: usize,
    /// Containers deleted, or that would have been in a dry run
    pub deletions: usize,
    pub delete_failures: Vec<FailedDelete>,
    pub project_failures: Vec<ProjectFailure>,
}

impl SweepSummary {
    pub fn record(&mut self, report: ProjectReport) {
        self.projects_processed += 1;
        if report.status == ProjectStatus::NoData {
            self.projects_skipped += 1;
        }
        self.deletions += if self.dry_run {
            report.targets.len()
        } else {
            report.deleted.len()
        };
        self.delete_failures.extend(report.failed);
    }

    /// No project aborted and every delete went through
    pub fn is_clean(&self) -> bool {
        self.delete_failures.is_empty() && self.project_failures.is_empty()
    }
}

impl fmt::Display for SweepSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = if self.dry_run { "would delete" } else { "deleted" };
        writeln!(
            f,
            "SUMMARY: {} projects processed ({} without data), {} containers {}",
            self.projects_processed, self.projects_skipped, self.deletions, verb
        )?;
        for failure in &self.delete_failures {
            writeln!(
                f,
                "    FAILED TO DELETE {} {}: {}",
                failure.target.kind, failure.target.id, failure.error
            )?;
        }
        for failure in &self.project_failures {
            writeln!(f, "    FAILED PROJECT {}: {}", failure.label, failure.error)?;
        }
        Ok(())
    }
}

/// Sweep every selected project in turn.
///
/// Only a failure to list projects is fatal; a project that fails is logged,
/// recorded in the summary, and the run moves on.
pub async fn run_sweep(platform: &dyn Platform, options: &SweepOptions) -> Result<SweepSummary> {
    let projects = platform
        .list_projects()
        .await
        .context("Failed to list projects")?;

    for wanted in &options.projects {
        if !projects.iter().any(|p| &p.label == wanted) {
            warn!(project = %wanted, "Requested project not found");
        }
    }

    let mut summary = SweepSummary {
        dry_run: options.dry_run,
        ..Default::default()
    };

    for project in projects.iter().filter(|p| options.wants(&p.label)) {
        match sweep_project(platform, project, options).await {
            Ok(report) => summary.record(report),
            Err(e) => {
                let message = format!("{:#}", e);
                error!(project = %project.label, error = %message, "Project sweep failed");
                println!("    FAILED: {}", message);
                summary.project_failures.push(ProjectFailure {
                    label: project.label.clone(),
                    error: message,
                });
            }
        }
    }

    info!(
        processed = summary.projects_processed,
        skipped = summary.projects_skipped,
        deletions = summary.deletions,
        delete_failures = summary.delete_failures.len(),
        project_failures = summary.project_failures.len(),
        dry_run = summary.dry_run,
        "Empty container sweep finished"
    );
    Ok(summary)
}
