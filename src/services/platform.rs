//! Capability interface over the data platform.
//!
//! The sweep only needs to list projects, read views and delete containers.
//! [FlywheelClient](super::flywheel::FlywheelClient) implements this against
//! the REST API; tests substitute an in-memory fake.

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use crate::views::{ViewLevel, ViewTable};

/// A project as returned by the project listing
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Project {
    #[serde(rename = "_id")]
    pub id: String,
    pub label: String,
}

impl Project {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

/// Container levels that can be deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    Subject,
    Session,
    Acquisition,
}

impl ContainerKind {
    /// Collection name in the REST API
    pub fn collection(&self) -> &'static str {
        match self {
            ContainerKind::Subject => "subjects",
            ContainerKind::Session => "sessions",
            ContainerKind::Acquisition => "acquisitions",
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContainerKind::Subject => "subject",
            ContainerKind::Session => "session",
            ContainerKind::Acquisition => "acquisition",
        };
        f.write_str(name)
    }
}

#[async_trait]
pub trait Platform: Send + Sync {
    /// Every project visible to the credential
    async fn list_projects(&self) -> Result<Vec<Project>>;

    /// Read one level's view scoped to a project
    async fn fetch_view(&self, level: ViewLevel, project_id: &str) -> Result<ViewTable>;

    async fn delete_subject(&self, id: &str) -> Result<()>;

    async fn delete_session(&self, id: &str) -> Result<()>;

    async fn delete_acquisition(&self, id: &str) -> Result<()>;

    /// Dispatch to the delete call matching `kind`
    async fn delete_container(&self, kind: ContainerKind, id: &str) -> Result<()> {
        match kind {
            ContainerKind::Subject => self.delete_subject(id).await,
            ContainerKind::Session => self.delete_session(id).await,
            ContainerKind::Acquisition => self.delete_acquisition(id).await,
        }
    }
}
