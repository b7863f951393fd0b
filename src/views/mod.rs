//! Data view definitions and the flat tables they return.
//!
//! A data view is a server-side projection of hierarchy metadata. The sweep
//! asks for three of them per project (one per container level) and works on
//! the rows as loosely-typed column maps until they are joined.

pub mod join;

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use join::{join_project_views, outer_join};

pub const PROJECT_ID: &str = "project.id";
pub const PROJECT_LABEL: &str = "project.label";
pub const SUBJECT_ID: &str = "subject.id";
pub const SUBJECT_LABEL: &str = "subject.label";
pub const SUBJECT_CREATED: &str = "subject.created";
pub const SESSION_ID: &str = "session.id";
pub const SESSION_LABEL: &str = "session.label";
pub const SESSION_CREATED: &str = "session.created";
pub const ACQUISITION_ID: &str = "acquisition.id";
pub const ACQUISITION_LABEL: &str = "acquisition.label";
pub const FILE_NAME: &str = "file.name";
pub const FILE_ID: &str = "file.id";
pub const FILE_CREATED: &str = "file.created";
pub const FILE_TYPE: &str = "file.type";

/// Errors raised while reading a data view response
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ViewError {
    #[error("view row {index} is not a JSON object")]
    RowNotObject { index: usize },

    #[error("view row {index} has a nested value in column {column}")]
    UnexpectedValue { index: usize, column: String },

    #[error("column {column} is required but missing")]
    MissingColumn { column: &'static str },

    #[error("column {column} holds an unparseable timestamp: {value}")]
    BadTimestamp { column: &'static str, value: String },
}

/// Container level a view is anchored on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewLevel {
    Subject,
    Session,
    Acquisition,
}

impl ViewLevel {
    pub const ALL: [ViewLevel; 3] = [ViewLevel::Subject, ViewLevel::Session, ViewLevel::Acquisition];

    pub fn container(&self) -> &'static str {
        match self {
            ViewLevel::Subject => "subject",
            ViewLevel::Session => "session",
            ViewLevel::Acquisition => "acquisition",
        }
    }

    /// Columns requested on top of the ids and labels the platform adds
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            ViewLevel::Subject => &[SUBJECT_CREATED],
            ViewLevel::Session => &[SESSION_CREATED],
            ViewLevel::Acquisition => &[FILE_NAME, FILE_ID, FILE_CREATED, FILE_TYPE],
        }
    }
}

impl fmt::Display for ViewLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.container())
    }
}

/// Request body for the data view endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewSpec {
    pub columns: Vec<ColumnSpec>,
    pub file_spec: FileSpec,
    pub include_ids: bool,
    pub include_labels: bool,
    pub sort: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSpec {
    pub src: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSpec {
    pub container: String,
    pub filter: NameFilter,
    #[serde(rename = "match")]
    pub match_mode: String,
    pub process_files: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NameFilter {
    pub value: String,
}

impl ViewSpec {
    /// View for one level: every file, ids and labels included, unsorted
    pub fn for_level(level: ViewLevel) -> Self {
        Self {
            columns: level
                .columns()
                .iter()
                .map(|src| ColumnSpec { src: src.to_string() })
                .collect(),
            file_spec: FileSpec {
                container: level.container().to_string(),
                filter: NameFilter {
                    value: "*".to_string(),
                },
                match_mode: "all".to_string(),
                process_files: false,
            },
            include_ids: true,
            include_labels: true,
            sort: false,
        }
    }
}

/// Raw data view payload as returned with `format=json`
#[derive(Debug, Deserialize)]
pub struct ViewResponse {
    #[serde(default)]
    pub data: Vec<Value>,
}

/// One row of a view. Absent columns are null.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ViewRow(BTreeMap<String, String>);

impl ViewRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.0.get(column).map(String::as_str)
    }

    pub fn is_null(&self, column: &str) -> bool {
        !self.0.contains_key(column)
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.0.insert(column.into(), value.into());
    }

    /// Builder form of [ViewRow::set]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(column, value);
        self
    }

    /// Fill the columns this row lacks from `other`
    pub fn merged(&self, other: &ViewRow) -> ViewRow {
        let mut row = self.clone();
        for (column, value) in &other.0 {
            row.0.entry(column.clone()).or_insert_with(|| value.clone());
        }
        row
    }

    fn from_json(index: usize, value: Value) -> Result<Self, ViewError> {
        let Value::Object(map) = value else {
            return Err(ViewError::RowNotObject { index });
        };

        let mut row = ViewRow::new();
        for (column, value) in map {
            let value = match value {
                Value::Null => continue,
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Array(_) | Value::Object(_) => {
                    return Err(ViewError::UnexpectedValue { index, column });
                }
            };
            row.0.insert(column, value);
        }
        Ok(row)
    }
}

/// A flat view result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewTable {
    pub rows: Vec<ViewRow>,
}

impl ViewTable {
    pub fn new(rows: Vec<ViewRow>) -> Self {
        Self { rows }
    }

    pub fn from_response(response: ViewResponse) -> Result<Self, ViewError> {
        let rows = response
            .data
            .into_iter()
            .enumerate()
            .map(|(index, value)| ViewRow::from_json(index, value))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rows })
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Drop exact duplicate rows, keeping first occurrences in order
    pub fn deduplicated(self) -> Self {
        let mut seen = HashSet::new();
        let rows = self
            .rows
            .into_iter()
            .filter(|row| seen.insert(row.clone()))
            .collect();
        Self { rows }
    }
}

/// The three views fetched for one project
#[derive(Debug, Clone, Default)]
pub struct ProjectViews {
    pub subjects: ViewTable,
    pub sessions: ViewTable,
    pub acquisitions: ViewTable,
}

impl ProjectViews {
    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty() && self.sessions.is_empty() && self.acquisitions.is_empty()
    }
}
