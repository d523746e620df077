//! Change events delivered by a table's change feed

use serde::{Deserialize, Serialize};

use super::row::{Row, RowId};

/// What happened to a row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum Change {
    /// A row was inserted
    Insert {
        /// The new row
        new: Row,
    },

    /// A row was updated
    Update {
        /// Snapshot before the write
        old: Row,
        /// Snapshot after the write
        new: Row,
    },

    /// A row was deleted
    Delete {
        /// Snapshot before the delete
        old: Row,
    },
}

/// A change to one row of one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Originating table
    pub table: String,

    /// The change itself
    #[serde(flatten)]
    pub change: Change,
}

impl ChangeEvent {
    /// Insert event
    pub fn inserted(table: impl Into<String>, new: Row) -> Self {
        ChangeEvent {
            table: table.into(),
            change: Change::Insert { new },
        }
    }

    /// Update event
    pub fn updated(table: impl Into<String>, old: Row, new: Row) -> Self {
        ChangeEvent {
            table: table.into(),
            change: Change::Update { old, new },
        }
    }

    /// Delete event
    pub fn deleted(table: impl Into<String>, old: Row) -> Self {
        ChangeEvent {
            table: table.into(),
            change: Change::Delete { old },
        }
    }

    /// Identifier of the affected row
    pub fn row_id(&self) -> &RowId {
        match &self.change {
            Change::Insert { new } => &new.id,
            Change::Update { new, .. } => &new.id,
            Change::Delete { old } => &old.id,
        }
    }

    /// Short label for logs
    pub fn kind(&self) -> &'static str {
        match self.change {
            Change::Insert { .. } => "insert",
            Change::Update { .. } => "update",
            Change::Delete { .. } => "delete",
        }
    }
}
