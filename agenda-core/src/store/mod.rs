//! Record-query interface to the persistent store.
//!
//! The agenda core only ever talks to the backend through [`RecordStore`]:
//! rows in, rows out, partitioned by owner. [`memory::MemoryStore`] is an
//! in-process implementation used by tests and offline setups.

pub mod filter;
pub mod memory;

use std::fmt;
use std::future::Future;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::owner::OwnerId;

pub use filter::{OrderBy, RecordFilter};
pub use memory::{MemoryStore, StoreOp};

/// One row, as a JSON object keyed by column name.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Column holding the owner of every row.
pub const OWNER_COLUMN: &str = "owner";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    Calendars,
    Events,
    Resources,
    EventParticipants,
    EventReminders,
    EventResources,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Calendars => "calendars",
            Table::Events => "events",
            Table::Resources => "resources",
            Table::EventParticipants => "event_participants",
            Table::EventReminders => "event_reminders",
            Table::EventResources => "event_resources",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Transient(String),

    #[error("Store rejected the change: {0}")]
    Conflict(String),

    #[error("Store session expired")]
    AuthExpired,

    #[error("No row with id {0}")]
    NotFound(String),

    #[error("Could not decode row: {0}")]
    Decode(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// The backend as the agenda core sees it.
///
/// Every call is scoped to one owner; implementations must never return or
/// touch rows of another owner.
pub trait RecordStore: Send + Sync + 'static {
    fn query_records(
        &self,
        table: Table,
        owner: &OwnerId,
        filter: &RecordFilter,
    ) -> impl Future<Output = StoreResult<Vec<Row>>> + Send;

    /// Insert a row and return it as stored, including generated columns.
    fn insert_record(
        &self,
        table: Table,
        owner: &OwnerId,
        row: Row,
    ) -> impl Future<Output = StoreResult<Row>> + Send;

    /// Merge `changes` into the row with `id` and return the updated row.
    fn update_record(
        &self,
        table: Table,
        owner: &OwnerId,
        id: &str,
        changes: Row,
    ) -> impl Future<Output = StoreResult<Row>> + Send;

    fn delete_record(
        &self,
        table: Table,
        owner: &OwnerId,
        id: &str,
    ) -> impl Future<Output = StoreResult<()>> + Send;
}

pub fn to_row<T: Serialize>(value: &T) -> StoreResult<Row> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::Object(row)) => Ok(row),
        Ok(other) => Err(StoreError::Decode(format!(
            "expected an object, got {other}"
        ))),
        Err(e) => Err(StoreError::Decode(e.to_string())),
    }
}

pub fn from_row<T: DeserializeOwned>(row: Row) -> StoreResult<T> {
    serde_json::from_value(serde_json::Value::Object(row))
        .map_err(|e| StoreError::Decode(e.to_string()))
}

/// Decode a batch of rows, skipping (and logging) rows that do not decode.
pub fn decode_rows<T: DeserializeOwned>(table: Table, rows: Vec<Row>) -> Vec<T> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            match from_row(row) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(table = %table, id = %id, error = %e, "Skipping undecodable row");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventDefinition;
    use crate::event::tests::make_test_event;

    #[test]
    fn event_row_uses_store_column_names() {
        let row = to_row(&make_test_event()).unwrap();
        assert!(row.contains_key("start_ts"));
        assert!(row.contains_key("end_ts"));
        assert_eq!(row["owner"], "5511999990000");
        assert_eq!(row["priority"], "medium");
    }

    #[test]
    fn row_decodes_back_into_definition() {
        let event = make_test_event();
        let decoded: EventDefinition = from_row(to_row(&event).unwrap()).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn bad_rows_are_skipped() {
        let good = to_row(&make_test_event()).unwrap();
        let mut bad = good.clone();
        bad.remove("start_ts");
        let decoded: Vec<EventDefinition> = decode_rows(Table::Events, vec![bad, good]);
        assert_eq!(decoded.len(), 1);
    }
}
