//! Outer joins across the per-level views.

use std::collections::HashMap;

use super::{
    PROJECT_ID, PROJECT_LABEL, ProjectViews, SESSION_ID, SESSION_LABEL, SUBJECT_ID,
    SUBJECT_LABEL, ViewRow, ViewTable,
};

/// Identity columns shared by the session and acquisition views
pub const SESSION_KEYS: &[&str] = &[
    PROJECT_ID,
    PROJECT_LABEL,
    SUBJECT_ID,
    SUBJECT_LABEL,
    SESSION_ID,
    SESSION_LABEL,
];

/// Identity columns shared by the session and subject views
pub const SUBJECT_KEYS: &[&str] = &[PROJECT_ID, PROJECT_LABEL, SUBJECT_ID, SUBJECT_LABEL];

/// Full outer join on `keys`. Null keys compare equal to each other.
///
/// Left rows come first in their original order, each followed by its
/// matches; right rows without a partner are appended at the end with the
/// left-only columns null. Exact duplicates are collapsed.
pub fn outer_join(left: &ViewTable, right: &ViewTable, keys: &[&str]) -> ViewTable {
    let key_of = |row: &ViewRow| -> Vec<Option<String>> {
        keys.iter().map(|k| row.get(k).map(str::to_owned)).collect()
    };

    let mut index: HashMap<Vec<Option<String>>, Vec<usize>> = HashMap::new();
    for (i, row) in right.rows.iter().enumerate() {
        index.entry(key_of(row)).or_default().push(i);
    }

    let mut matched = vec![false; right.rows.len()];
    let mut rows = Vec::with_capacity(left.rows.len().max(right.rows.len()));
    for row in &left.rows {
        match index.get(&key_of(row)) {
            Some(partners) => {
                for &i in partners {
                    matched[i] = true;
                    rows.push(row.merged(&right.rows[i]));
                }
            }
            None => rows.push(row.clone()),
        }
    }
    rows.extend(
        right
            .rows
            .iter()
            .zip(&matched)
            .filter(|(_, seen)| !**seen)
            .map(|(row, _)| row.clone()),
    );

    ViewTable::new(rows).deduplicated()
}

/// Combine a project's three views into one row per leaf.
///
/// Returns `None` when every view is empty, in which case there is nothing
/// to join and the project is skipped.
pub fn join_project_views(views: &ProjectViews) -> Option<ViewTable> {
    if views.is_empty() {
        return None;
    }
    let sessions = outer_join(&views.sessions, &views.acquisitions, SESSION_KEYS);
    Some(outer_join(&sessions, &views.subjects, SUBJECT_KEYS))
}
