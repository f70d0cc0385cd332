use std::collections::VecDeque;

use crate::driver::{QueryResult, Row};

// -----------------------------------------------------------------------------
// ----- CursorHandle ----------------------------------------------------------

/// Client-side cursor: the buffered result of the last statement executed on
/// its connection. Exists only while open; owned by exactly one handle.
#[derive(Debug, Default)]
pub struct CursorHandle {
    columns: Vec<String>,
    rows: VecDeque<Row>,
    command_tag: Option<String>,
}

impl CursorHandle {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Replaces whatever the previous statement left unread.
    pub(crate) fn load(&mut self, result: QueryResult) {
        self.columns = result.columns;
        self.rows = result.rows.into();
        self.command_tag = Some(result.command_tag);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn command_tag(&self) -> Option<&str> {
        self.command_tag.as_deref()
    }

    pub fn fetch_one(&mut self) -> Option<Row> {
        self.rows.pop_front()
    }

    /// At most `n` rows; fewer near the end, none once exhausted.
    pub fn fetch_many(&mut self, n: usize) -> Vec<Row> {
        let take = n.min(self.rows.len());
        self.rows.drain(..take).collect()
    }

    pub fn fetch_all(&mut self) -> Vec<Row> {
        self.rows.drain(..).collect()
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
