//! In-process `RecordStore`.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::constants::CHANNEL_CAPACITY;
use crate::owner::OwnerId;
use crate::push::{ChangeKind, PushNotification};
use crate::store::{OWNER_COLUMN, RecordFilter, RecordStore, Row, StoreError, StoreResult, Table};
use crate::utils::lock_recover;

/// Store operations, for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Query,
    Insert,
    Update,
    Delete,
}

/// Tables held in memory, keyed by row id.
///
/// Every mutation is announced on a broadcast channel, the way a realtime
/// backend would push it. Failures and latency can be injected.
pub struct MemoryStore {
    tables: Mutex<HashMap<Table, HashMap<String, Row>>>,
    push: broadcast::Sender<PushNotification>,
    failures: Mutex<VecDeque<(StoreOp, StoreError)>>,
    latency: Mutex<Option<Duration>>,
    queries: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        let (push, _) = broadcast::channel(CHANNEL_CAPACITY);
        MemoryStore {
            tables: Mutex::new(HashMap::new()),
            push,
            failures: Mutex::new(VecDeque::new()),
            latency: Mutex::new(None),
            queries: AtomicUsize::new(0),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PushNotification> {
        self.push.subscribe()
    }

    /// Make the next `op` fail with `error`. Queued failures are consumed in order.
    pub fn fail_next(&self, op: StoreOp, error: StoreError) {
        lock_recover(&self.failures).push_back((op, error));
    }

    /// Delay every operation by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *lock_recover(&self.latency) = latency;
    }

    /// Number of queries served so far, failed ones included.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Put a row in place without announcing it.
    pub fn seed(&self, table: Table, row: Row) {
        let Some(id) = row.get("id").and_then(Value::as_str).map(str::to_string) else {
            return;
        };
        lock_recover(&self.tables)
            .entry(table)
            .or_default()
            .insert(id, row);
    }

    /// Rows of `table` owned by `owner`, in no particular order.
    pub fn rows(&self, table: Table, owner: &OwnerId) -> Vec<Row> {
        lock_recover(&self.tables)
            .get(&table)
            .map(|rows| {
                rows.values()
                    .filter(|row| owned_by(row, owner))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn enter(&self, op: StoreOp) -> StoreResult<()> {
        let latency = *lock_recover(&self.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut failures = lock_recover(&self.failures);
        if let Some(pos) = failures.iter().position(|(o, _)| *o == op)
            && let Some((_, error)) = failures.remove(pos)
        {
            debug!(?op, error = %error, "Injected store failure");
            return Err(error);
        }
        Ok(())
    }

    fn announce(&self, owner: &OwnerId, table: Table, change: ChangeKind, id: &str) {
        // No receivers is fine
        let _ = self
            .push
            .send(PushNotification::new(owner.clone(), table, change).with_row(id));
    }
}

fn owned_by(row: &Row, owner: &OwnerId) -> bool {
    row.get(OWNER_COLUMN).and_then(Value::as_str) == Some(owner.as_str())
}

fn now_column() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
}

impl RecordStore for MemoryStore {
    async fn query_records(
        &self,
        table: Table,
        owner: &OwnerId,
        filter: &RecordFilter,
    ) -> StoreResult<Vec<Row>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.enter(StoreOp::Query).await?;

        let mut rows: Vec<Row> = self
            .rows(table, owner)
            .into_iter()
            .filter(|row| filter.matches(row))
            .collect();
        filter.sort(&mut rows);
        trace!(table = %table, owner = %owner, count = rows.len(), "Queried rows");
        Ok(rows)
    }

    async fn insert_record(&self, table: Table, owner: &OwnerId, mut row: Row) -> StoreResult<Row> {
        self.enter(StoreOp::Insert).await?;

        let id = match row.get("id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => uuid::Uuid::new_v4().to_string(),
        };
        row.insert("id".to_string(), Value::String(id.clone()));
        row.insert(OWNER_COLUMN.to_string(), Value::String(owner.to_string()));
        row.insert("created_at".to_string(), now_column());
        row.insert("updated_at".to_string(), now_column());

        {
            let mut tables = lock_recover(&self.tables);
            let rows = tables.entry(table).or_default();
            if rows.contains_key(&id) {
                return Err(StoreError::Conflict(format!("duplicate id {id}")));
            }
            rows.insert(id.clone(), row.clone());
        }

        self.announce(owner, table, ChangeKind::Insert, &id);
        Ok(row)
    }

    async fn update_record(
        &self,
        table: Table,
        owner: &OwnerId,
        id: &str,
        changes: Row,
    ) -> StoreResult<Row> {
        self.enter(StoreOp::Update).await?;

        let updated = {
            let mut tables = lock_recover(&self.tables);
            let row = tables
                .get_mut(&table)
                .and_then(|rows| rows.get_mut(id))
                .filter(|row| owned_by(row, owner))
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            for (column, value) in changes {
                if column == "id" || column == OWNER_COLUMN {
                    continue;
                }
                row.insert(column, value);
            }
            row.insert("updated_at".to_string(), now_column());
            row.clone()
        };

        self.announce(owner, table, ChangeKind::Update, id);
        Ok(updated)
    }

    async fn delete_record(&self, table: Table, owner: &OwnerId, id: &str) -> StoreResult<()> {
        self.enter(StoreOp::Delete).await?;

        {
            let mut tables = lock_recover(&self.tables);
            let rows = tables
                .get_mut(&table)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            if !rows.get(id).is_some_and(|row| owned_by(row, owner)) {
                return Err(StoreError::NotFound(id.to_string()));
            }
            rows.remove(id);
        }

        self.announce(owner, table, ChangeKind::Delete, id);
        Ok(())
    }
}
