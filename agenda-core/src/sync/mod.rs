//! Sync coordinator.
//!
//! Sits between readers and the record store. Per cache key the state moves
//! Empty → Fetching → Populated → Stale → Fetching, with the governor able to
//! hold a key in a blocked state where only cached data is served.
//!
//! - Reads return fresh cache entries directly. Anything else goes through a
//!   single in-flight fetch per key.
//! - Writes patch cached results optimistically and are resolved with
//!   [`SyncCoordinator::on_remote_result`], which keeps or rolls back the patch.
//! - Push notifications only invalidate; the next read refetches.

pub mod inflight;
pub mod optimistic;
pub mod query;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{
    CacheKey, CacheStore, CachedRows, EntityKind, KeyPrefix, OccurrenceSet, PatchRecord,
    RestoreOutcome,
};
use crate::calendar::Calendar;
use crate::config::AgendaConfig;
use crate::error::{AgendaError, AgendaResult};
use crate::event::EventDefinition;
use crate::governor::{Admission, RequestGovernor};
use crate::materialize::ExpansionDiagnostic;
use crate::occurrence::Occurrence;
use crate::owner::OwnerId;
use crate::push::PushNotification;
use crate::resource::Resource;
use crate::store::{RecordFilter, RecordStore, Row, Table, decode_rows};
use crate::utils::lock_recover;

use inflight::InFlight;
pub use optimistic::{Committed, Mutation, OptimisticPatch};
pub use query::{EventFilters, EventQuery};

/// How current a query result is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Cached within its freshness window, or just fetched
    Fresh,
    /// Fetched, but superseded by a change while the fetch was running
    Stale,
    /// The governor refused the fetch; cached data (or nothing) is served
    Blocked,
    /// The fetch failed; the last cached data is served
    Degraded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult<T> {
    pub data: T,
    pub freshness: Freshness,
    /// Definitions whose recurrence could not be expanded
    pub diagnostics: Vec<ExpansionDiagnostic>,
}

impl<T> QueryResult<T> {
    fn new(data: T, freshness: Freshness) -> Self {
        QueryResult {
            data,
            freshness,
            diagnostics: Vec::new(),
        }
    }
}

/// Exclusive access to one entity until the mutation holding it resolves.
pub type EntityGuard = tokio::sync::OwnedMutexGuard<()>;

#[derive(Debug, Clone)]
struct Fetched {
    rows: Arc<CachedRows>,
    cached: bool,
}

pub struct SyncCoordinator<S: RecordStore> {
    store: Arc<S>,
    cache: Arc<CacheStore<CachedRows>>,
    governor: RequestGovernor,
    inflight: InFlight<Fetched>,
    config: AgendaConfig,
    entity_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<S: RecordStore> SyncCoordinator<S> {
    pub fn new(store: Arc<S>, config: AgendaConfig) -> Self {
        SyncCoordinator {
            store,
            cache: Arc::new(CacheStore::new()),
            governor: RequestGovernor::new(config.governor.clone()),
            inflight: InFlight::new(),
            config,
            entity_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn cache(&self) -> &CacheStore<CachedRows> {
        &self.cache
    }

    pub fn governor(&self) -> &RequestGovernor {
        &self.governor
    }

    pub fn config(&self) -> &AgendaConfig {
        &self.config
    }

    // ---- Reads ----

    /// Materialized occurrences for `query`.
    pub async fn query_occurrences(
        &self,
        owner: &OwnerId,
        query: &EventQuery,
    ) -> AgendaResult<QueryResult<Vec<Occurrence>>> {
        let key = CacheKey::new(owner.clone(), EntityKind::Events, query.descriptor());
        let filter = query.record_filter();
        let build_query = query.clone();

        let result = self
            .read(&key, Table::Events, filter, move |rows| {
                let definitions = decode_rows::<EventDefinition>(Table::Events, rows)
                    .into_iter()
                    .map(Arc::new)
                    .collect();
                let set = OccurrenceSet::build(build_query, definitions);
                if !set.diagnostics.is_empty() {
                    warn!(
                        count = set.diagnostics.len(),
                        "Some recurring events could not be expanded"
                    );
                }
                CachedRows::Occurrences(set)
            })
            .await?;

        Ok(match result {
            Some((rows, freshness)) => match rows.as_ref() {
                CachedRows::Occurrences(set) => QueryResult {
                    data: set.occurrences.clone(),
                    freshness,
                    diagnostics: set.diagnostics.clone(),
                },
                _ => QueryResult::new(Vec::new(), freshness),
            },
            None => QueryResult::new(Vec::new(), Freshness::Blocked),
        })
    }

    /// The owner's calendars, primary first.
    pub async fn query_calendars(&self, owner: &OwnerId) -> AgendaResult<QueryResult<Vec<Calendar>>> {
        let key = CacheKey::new(owner.clone(), EntityKind::Calendars, "");
        let filter = RecordFilter::new()
            .order_by_desc("is_primary")
            .order_by("name");

        let result = self
            .read(&key, Table::Calendars, filter, |rows| {
                let mut calendars: Vec<Calendar> = decode_rows(Table::Calendars, rows);
                calendars.sort_by(Calendar::listing_order);
                CachedRows::Calendars(calendars)
            })
            .await?;

        Ok(match result {
            Some((rows, freshness)) => match rows.as_ref() {
                CachedRows::Calendars(calendars) => QueryResult::new(calendars.clone(), freshness),
                _ => QueryResult::new(Vec::new(), freshness),
            },
            None => QueryResult::new(Vec::new(), Freshness::Blocked),
        })
    }

    /// The owner's resources, by type then name.
    pub async fn query_resources(&self, owner: &OwnerId) -> AgendaResult<QueryResult<Vec<Resource>>> {
        let key = CacheKey::new(owner.clone(), EntityKind::Resources, "");
        let filter = RecordFilter::new().order_by("type").order_by("name");

        let result = self
            .read(&key, Table::Resources, filter, |rows| {
                let mut resources: Vec<Resource> = decode_rows(Table::Resources, rows);
                resources.sort_by(Resource::listing_order);
                CachedRows::Resources(resources)
            })
            .await?;

        Ok(match result {
            Some((rows, freshness)) => match rows.as_ref() {
                CachedRows::Resources(resources) => QueryResult::new(resources.clone(), freshness),
                _ => QueryResult::new(Vec::new(), freshness),
            },
            None => QueryResult::new(Vec::new(), Freshness::Blocked),
        })
    }

    /// Serve `key` from cache, or fetch it through the single-flight table.
    ///
    /// `None` means the governor refused the fetch and nothing was cached.
    async fn read<B>(
        &self,
        key: &CacheKey,
        table: Table,
        filter: RecordFilter,
        build: B,
    ) -> AgendaResult<Option<(Arc<CachedRows>, Freshness)>>
    where
        B: FnOnce(Vec<Row>) -> CachedRows + Send + 'static,
    {
        let policy = self.config.cache.policy(key.kind);
        let cached = self.cache.get(key);

        if let Some(entry) = &cached
            && !CacheStore::is_stale(entry, policy.stale_after)
        {
            return Ok(Some((entry.value.clone(), Freshness::Fresh)));
        }

        // Attaching to a running fetch issues no request, so the governor
        // only sees callers that would start one
        let handle = match self.inflight.join(key) {
            Some(handle) => handle,
            None => {
                if let Admission::Blocked { .. } = self.governor.admit(key) {
                    debug!(key = %key, "Fetch blocked, serving cached data");
                    return Ok(cached.map(|entry| (entry.value, Freshness::Blocked)));
                }
                self.inflight
                    .join_or_start(key, || self.fetch(key.clone(), table, filter, build))
            }
        };

        match handle.outcome().await {
            Ok(fetched) => {
                let freshness = if fetched.cached {
                    Freshness::Fresh
                } else {
                    Freshness::Stale
                };
                Ok(Some((fetched.rows, freshness)))
            }
            Err(AgendaError::TransientFetch(reason)) => match cached {
                Some(entry) => {
                    warn!(key = %key, reason = %reason, "Fetch failed, serving cached data");
                    Ok(Some((entry.value, Freshness::Degraded)))
                }
                None => Err(AgendaError::TransientFetch(reason)),
            },
            Err(e) => Err(e),
        }
    }

    fn fetch<B>(
        &self,
        key: CacheKey,
        table: Table,
        filter: RecordFilter,
        build: B,
    ) -> impl Future<Output = AgendaResult<Fetched>> + Send + use<S, B>
    where
        B: FnOnce(Vec<Row>) -> CachedRows + Send + 'static,
    {
        let version = self.cache.reserve(&key);
        let store = self.store.clone();
        let cache = self.cache.clone();
        let timeout = self.config.sync.fetch_timeout;

        async move {
            let rows = match tokio::time::timeout(
                timeout,
                store.query_records(table, &key.owner, &filter),
            )
            .await
            {
                Ok(rows) => rows?,
                Err(_) => {
                    return Err(AgendaError::TransientFetch(format!(
                        "{table} query timed out after {}",
                        humantime::format_duration(timeout)
                    )));
                }
            };

            let count = rows.len();
            let rows = Arc::new(build(rows));
            let cached = cache.put_shared(&key, rows.clone(), version);
            debug!(key = %key, count, version, cached, "Fetched rows");
            Ok(Fetched { rows, cached })
        }
    }

    // ---- Writes ----

    /// Wait for exclusive access to `entity_id`. The guard is handed to
    /// [`SyncCoordinator::apply_locked`] when the caller must read the entity
    /// before building its mutation.
    pub async fn lock_entity(&self, entity_id: &str) -> EntityGuard {
        let lock = {
            let mut locks = lock_recover(&self.entity_locks);
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(entity_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Patch every affected cached result with `mutation` and keep what is
    /// needed to undo it. Waits for any unresolved mutation of the same entity.
    pub async fn apply_optimistic(&self, owner: &OwnerId, mutation: Mutation) -> OptimisticPatch {
        let guard = self.lock_entity(mutation.entity_id()).await;
        self.apply_locked(owner, mutation, guard)
    }

    /// [`SyncCoordinator::apply_optimistic`] under a guard already taken with
    /// [`SyncCoordinator::lock_entity`] for the mutated entity.
    pub fn apply_locked(
        &self,
        owner: &OwnerId,
        mutation: Mutation,
        guard: EntityGuard,
    ) -> OptimisticPatch {
        let records = self.patch_entries(owner, &mutation);
        debug!(
            owner = %owner,
            entity = mutation.entity_id(),
            patched = records.len(),
            "Applied optimistic patch"
        );
        OptimisticPatch {
            owner: owner.clone(),
            mutation,
            records,
            _guard: guard,
        }
    }

    fn patch_entries(
        &self,
        owner: &OwnerId,
        mutation: &Mutation,
    ) -> Vec<PatchRecord<CachedRows>> {
        let prefix = KeyPrefix::kind(owner.clone(), mutation.patched_kind());
        self.cache
            .keys_with_prefix(&prefix)
            .iter()
            .filter_map(|key| self.cache.patch(key, |rows| mutation.apply(rows)))
            .collect()
    }

    /// Resolve an optimistic patch with the store's answer.
    ///
    /// On success the authoritative row replaces the optimistic one and the
    /// related kinds are invalidated. On failure the patch is rolled back and
    /// the error is returned.
    pub fn on_remote_result(
        &self,
        patch: OptimisticPatch,
        outcome: AgendaResult<Committed>,
    ) -> AgendaResult<()> {
        let OptimisticPatch {
            owner,
            mutation,
            records,
            _guard,
        } = patch;

        match outcome {
            Ok(committed) => {
                if let Some(authoritative) = committed.as_mutation(&mutation) {
                    self.patch_entries(&owner, &authoritative);
                }
                for kind in mutation.invalidated_kinds() {
                    self.cache.invalidate(&KeyPrefix::kind(owner.clone(), *kind));
                }
                debug!(owner = %owner, entity = mutation.entity_id(), "Mutation committed");
                Ok(())
            }
            Err(e) => {
                for record in records.into_iter().rev() {
                    let key = record.key.clone();
                    match self.cache.restore(record) {
                        RestoreOutcome::Restored => {
                            debug!(key = %key, "Rolled back optimistic patch")
                        }
                        RestoreOutcome::Superseded => {
                            debug!(key = %key, "Entry changed since the patch, invalidated")
                        }
                        RestoreOutcome::Gone => {}
                    }
                }
                warn!(
                    owner = %owner,
                    entity = mutation.entity_id(),
                    error = %e,
                    "Mutation failed, rolled back"
                );
                Err(e)
            }
        }
    }

    // ---- Invalidation ----

    /// Invalidate what a backend change can affect. Nothing is refetched here.
    pub fn on_push_notification(&self, notification: &PushNotification) -> usize {
        let kinds: &[EntityKind] = match notification.table {
            Table::Calendars => &[EntityKind::Calendars, EntityKind::Events],
            Table::Events
            | Table::EventParticipants
            | Table::EventReminders
            | Table::EventResources => &[EntityKind::Events],
            Table::Resources => &[EntityKind::Resources],
        };

        let count = kinds
            .iter()
            .map(|kind| {
                self.cache
                    .invalidate(&KeyPrefix::kind(notification.owner.clone(), *kind))
            })
            .sum();
        debug!(
            owner = %notification.owner,
            table = %notification.table,
            change = ?notification.change,
            invalidated = count,
            "Push notification"
        );
        count
    }

    /// Mark everything cached for `owner` stale.
    pub fn refetch(&self, owner: &OwnerId) -> usize {
        self.cache.invalidate(&KeyPrefix::owner(owner.clone()))
    }

    /// Drop entries unused for longer than their kind's retention, along with
    /// idle governor state. Returns the number of cache entries dropped.
    pub fn evict_idle(&self) -> usize {
        let cache = &self.config.cache;
        let evicted = self.cache.evict_idle(|key| cache.policy(key.kind).retention);
        let forgotten = self.governor.evict_idle();
        debug!(evicted, forgotten, "Evicted idle state");
        evicted
    }

    /// Feed push notifications from `rx` into the cache until the channel closes.
    pub fn spawn_push_listener(
        self: &Arc<Self>,
        mut rx: broadcast::Receiver<PushNotification>,
    ) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(notification) => {
                        coordinator.on_push_notification(&notification);
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Missed push notifications, invalidating everything");
                        coordinator.cache.invalidate_all();
                    }
                    Err(RecvError::Closed) => {
                        info!("Push channel closed");
                        break;
                    }
                }
            }
        })
    }
}
