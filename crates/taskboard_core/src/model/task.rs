//! Task record and its partial-update shape.
//!
//! # Invariants
//! - `pending_reason` is `Some` only while `status == TaskStatus::Pending`.
//! - `deleted_at` is `Some` iff `deleted` is true.
//! - Tags are trimmed, lowercased, single-spaced and unique.

use crate::model::entity::{impl_sync_entity, EntityId, EntityKind};
use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Kanban column of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    /// Blocked on something external; carries a `pending_reason`.
    Pending,
    Done,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    /// Sort rank, most urgent first.
    pub fn rank(self) -> u8 {
        match self {
            Self::Urgent => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: EntityId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    /// Absent only on records written by very old clients.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl_sync_entity!(Task, EntityKind::Task);

impl Task {
    /// Applies a partial update and stamps `updated_at`.
    ///
    /// Leaving `Pending` clears `pending_reason`; a reason supplied while the
    /// task is not pending is ignored.
    pub fn apply(&mut self, patch: TaskPatch, now: DateTime<Utc>) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(tags) = patch.tags {
            self.tags = normalize_tags(tags);
        }
        if let Some(due_date) = patch.due_date {
            self.due_date = due_date;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if self.status == TaskStatus::Pending {
            if let Some(reason) = patch.pending_reason {
                self.pending_reason = Some(reason);
            }
        } else {
            self.pending_reason = None;
        }
        self.updated_at = Some(now);
    }

    /// Case-insensitive substring match on title or description.
    pub fn matches_search(&self, needle_lowercase: &str) -> bool {
        self.title.to_lowercase().contains(needle_lowercase)
            || self.description.to_lowercase().contains(needle_lowercase)
    }
}

/// Caller-supplied fields for a new task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: Priority,
    pub tags: Vec<String>,
    pub pending_reason: Option<String>,
    pub due_date: Option<NaiveDate>,
}

impl NewTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub(crate) fn into_task(self, id: EntityId, now: DateTime<Utc>) -> Task {
        let pending_reason = if self.status == TaskStatus::Pending {
            self.pending_reason
        } else {
            None
        };
        Task {
            id,
            title: self.title,
            description: self.description,
            status: self.status,
            priority: self.priority,
            tags: normalize_tags(self.tags),
            pending_reason,
            due_date: self.due_date,
            created_at: now,
            updated_at: Some(now),
            deleted: false,
            deleted_at: None,
        }
    }
}

/// Partial task update. `None` leaves a field untouched.
///
/// `due_date: Some(None)` clears the due date.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub tags: Option<Vec<String>>,
    pub pending_reason: Option<String>,
    pub due_date: Option<Option<NaiveDate>>,
}

static TAG_SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid tag regex"));

/// Trims, lowercases and de-duplicates tags, dropping blanks.
///
/// Inner whitespace runs collapse to one space, so `"Deep  work"` and
/// `"deep work"` name the same tag.
pub fn normalize_tags<I, S>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .filter_map(|tag| {
            let trimmed = tag.as_ref().trim();
            (!trimmed.is_empty())
                .then(|| TAG_SPACE_RE.replace_all(trimmed, " ").to_lowercase())
        })
        .collect()
}
