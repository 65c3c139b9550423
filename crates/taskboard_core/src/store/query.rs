//! Task list filtering and ordering.
//!
//! # Invariants
//! - Tombstoned tasks never appear in query results.
//! - Sorting is stable; equal keys keep collection order.

use crate::model::{normalize_tags, Priority, Task, TaskStatus};
use chrono::{DateTime, NaiveTime, Utc};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Ordering applied to `get_tasks` results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TaskSort {
    /// Newest first.
    #[default]
    CreatedDesc,
    /// Urgent first; ties by due date (or creation date) ascending.
    Priority,
    /// Dated tasks first by due date ascending, then undated newest first.
    DueDate,
    Title,
}

/// Filters for `get_tasks`. Empty/`None` fields do not filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskQuery {
    pub priority: Option<Priority>,
    pub status: Option<TaskStatus>,
    /// Case-insensitive substring over title and description.
    pub search: Option<String>,
    /// Task must carry every one of these tags. Normalised like stored
    /// tags before matching.
    pub include_tags: BTreeSet<String>,
    /// Task must carry none of these tags.
    pub exclude_tags: BTreeSet<String>,
    pub sort: TaskSort,
}

/// Query inputs in the same normal form as stored task fields.
struct Criteria {
    needle: Option<String>,
    include_tags: BTreeSet<String>,
    exclude_tags: BTreeSet<String>,
}

impl TaskQuery {
    fn criteria(&self) -> Criteria {
        Criteria {
            needle: self
                .search
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_lowercase),
            include_tags: normalize_tags(&self.include_tags),
            exclude_tags: normalize_tags(&self.exclude_tags),
        }
    }

    fn matches(&self, task: &Task, criteria: &Criteria) -> bool {
        if task.deleted {
            return false;
        }
        if self.priority.is_some_and(|priority| task.priority != priority) {
            return false;
        }
        if self.status.is_some_and(|status| task.status != status) {
            return false;
        }
        if let Some(needle) = criteria.needle.as_deref() {
            if !task.matches_search(needle) {
                return false;
            }
        }
        criteria.include_tags.is_subset(&task.tags)
            && criteria.exclude_tags.is_disjoint(&task.tags)
    }
}

pub(crate) fn run_query<'a>(tasks: &'a [Task], query: &TaskQuery) -> Vec<&'a Task> {
    let criteria = query.criteria();

    let mut matched: Vec<&Task> = tasks
        .iter()
        .filter(|task| query.matches(task, &criteria))
        .collect();

    match query.sort {
        TaskSort::CreatedDesc => matched.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        TaskSort::Priority => matched.sort_by(|a, b| {
            a.priority
                .rank()
                .cmp(&b.priority.rank())
                .then_with(|| due_or_created(a).cmp(&due_or_created(b)))
        }),
        TaskSort::DueDate => matched.sort_by(compare_due_date),
        TaskSort::Title => matched.sort_by(|a, b| a.title.cmp(&b.title)),
    }

    matched
}

fn due_or_created(task: &Task) -> DateTime<Utc> {
    task.due_date
        .map(|date| date.and_time(NaiveTime::MIN).and_utc())
        .unwrap_or(task.created_at)
}

fn compare_due_date(a: &&Task, b: &&Task) -> Ordering {
    match (a.due_date, b.due_date) {
        (Some(left), Some(right)) => left.cmp(&right),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => b.created_at.cmp(&a.created_at),
    }
}
