use serde::{Deserialize, Serialize};

use crate::config::PaginationConfig;
use crate::state_machine::ActionJobState;

/// Keyset pagination parameters for list operations.
///
/// The cursor is the id of the last row of the previous page; callers treat
/// it as opaque and hand back whatever `Page::next_cursor` returned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOpts {
    pub limit: Option<u32>,
    pub cursor: Option<i64>,
}

impl ListOpts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create pagination with only limit
    pub fn limit_only(limit: u32) -> Self {
        Self {
            limit: Some(limit),
            cursor: None,
        }
    }

    pub fn after(mut self, cursor: Option<i64>) -> Self {
        self.cursor = cursor;
        self
    }

    /// Apply the configured default and cap to the requested limit
    pub fn resolve(&self, pagination: &PaginationConfig) -> Self {
        Self {
            limit: Some(pagination.clamp(self.limit)),
            cursor: self.cursor,
        }
    }

    /// Effective page size; stores receive resolved options
    pub fn effective_limit(&self) -> usize {
        self.limit
            .map(|limit| limit.max(1))
            .unwrap_or(crate::constants::system::DEFAULT_LIST_LIMIT) as usize
    }
}

/// One page of results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub nodes: Vec<T>,
    /// Rows matching the filter across all pages
    pub total_count: i64,
    /// Pass back as `ListOpts::cursor` to fetch the next page
    pub next_cursor: Option<i64>,
}

impl<T> Page<T> {
    /// Build a page from rows fetched with one extra row past the limit
    pub fn from_overfetch(
        mut rows: Vec<T>,
        limit: usize,
        total_count: i64,
        id_of: impl Fn(&T) -> i64,
    ) -> Self {
        let next_cursor = if rows.len() > limit {
            rows.truncate(limit);
            rows.last().map(&id_of)
        } else {
            None
        };

        Self {
            nodes: rows,
            total_count,
            next_cursor,
        }
    }

    pub fn has_next_page(&self) -> bool {
        self.next_cursor.is_some()
    }
}

/// Filter for listing executions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionFilter {
    pub action_id: Option<i64>,
}

impl ExecutionFilter {
    pub fn for_action(action_id: i64) -> Self {
        Self {
            action_id: Some(action_id),
        }
    }
}

/// Filter for listing jobs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub execution_id: Option<i64>,
    pub state: Option<ActionJobState>,
}

impl JobFilter {
    pub fn for_execution(execution_id: i64) -> Self {
        Self {
            execution_id: Some(execution_id),
            state: None,
        }
    }

    pub fn with_state(mut self, state: ActionJobState) -> Self {
        self.state = Some(state);
        self
    }
}
