//! Realtime change notifications from the backend.

use serde::{Deserialize, Serialize};

use crate::owner::OwnerId;
use crate::store::Table;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A row of `table` owned by `owner` changed somewhere else.
///
/// Notifications are hints: they may arrive late, twice, or for changes this
/// client made itself. Consumers only invalidate on them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushNotification {
    pub owner: OwnerId,
    pub table: Table,
    pub change: ChangeKind,
    pub row_id: Option<String>,
}

impl PushNotification {
    pub fn new(owner: OwnerId, table: Table, change: ChangeKind) -> Self {
        PushNotification {
            owner,
            table,
            change,
            row_id: None,
        }
    }

    pub fn with_row(mut self, row_id: impl Into<String>) -> Self {
        self.row_id = Some(row_id.into());
        self
    }
}
