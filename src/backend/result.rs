use serde::Serialize;

use crate::protocol::{Field, Value};

/// Outcome of a statement executed on a backend connection
///
/// Statements that do not produce a result set leave `fields` and `rows`
/// empty and report `affected_rows` / `last_insert_id` instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: u16,
    pub fields: Vec<Field>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn from_ok(affected_rows: u64, last_insert_id: u64, status_flags: u16) -> Self {
        Self {
            affected_rows,
            last_insert_id,
            status_flags,
            ..Default::default()
        }
    }

    /// Whether the statement produced a result set
    pub fn has_result_set(&self) -> bool {
        !self.fields.is_empty() || !self.rows.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Whether the backend reports an open transaction on this session
    pub fn in_transaction(&self) -> bool {
        self.status_flags & crate::protocol::status::SERVER_STATUS_IN_TRANS != 0
    }
}
