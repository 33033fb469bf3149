//! The agenda: reads and mutations for one owner.
//!
//! Every mutation is validated before any I/O, patched into the cache
//! optimistically, written to the store, and then either committed or rolled
//! back. Outcomes are published as [`Notice`]s.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};
use uuid::Uuid;

use crate::calendar::{Calendar, CalendarDraft};
use crate::config::AgendaConfig;
use crate::constants::DUPLICATE_TITLE_SUFFIX;
use crate::error::{AgendaError, AgendaResult, ValidationError};
use crate::event::{EventDefinition, EventDraft, EventPatch, ParticipantDraft, ReminderDraft};
use crate::notice::{MutationState, Notice, Notifier, Operation};
use crate::occurrence::Occurrence;
use crate::owner::OwnerId;
use crate::resource::Resource;
use crate::store::{RecordFilter, RecordStore, Row, Table, from_row, to_row};
use crate::sync::{Committed, EventQuery, Mutation, QueryResult, SyncCoordinator};
use crate::validate::{validate_calendar, validate_event};

pub struct Agenda<S: RecordStore> {
    owner: OwnerId,
    sync: Arc<SyncCoordinator<S>>,
    notifier: Notifier,
}

impl<S: RecordStore> Agenda<S> {
    pub fn new(store: Arc<S>, owner: OwnerId, config: AgendaConfig) -> Self {
        Self::with_coordinator(Arc::new(SyncCoordinator::new(store, config)), owner)
    }

    /// Share a coordinator (and its cache) between several agendas.
    pub fn with_coordinator(sync: Arc<SyncCoordinator<S>>, owner: OwnerId) -> Self {
        Agenda {
            owner,
            sync,
            notifier: Notifier::new(),
        }
    }

    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator<S>> {
        &self.sync
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notifier.subscribe()
    }

    pub fn mutation_state(&self) -> watch::Receiver<MutationState> {
        self.notifier.watch_state()
    }

    fn config(&self) -> &AgendaConfig {
        self.sync.config()
    }

    // ---- Reads ----

    pub async fn occurrences(&self, query: &EventQuery) -> AgendaResult<QueryResult<Vec<Occurrence>>> {
        self.sync.query_occurrences(&self.owner, query).await
    }

    pub async fn calendars(&self) -> AgendaResult<QueryResult<Vec<Calendar>>> {
        self.sync.query_calendars(&self.owner).await
    }

    pub async fn resources(&self) -> AgendaResult<QueryResult<Vec<Resource>>> {
        self.sync.query_resources(&self.owner).await
    }

    /// Drop freshness of everything cached for this owner.
    pub fn refetch(&self) {
        let count = self.sync.refetch(&self.owner);
        debug!(owner = %self.owner, count, "Refetch requested");
    }

    // ---- Mutations ----

    pub async fn create_event(&self, mut draft: EventDraft) -> AgendaResult<EventDefinition> {
        let participants = std::mem::take(&mut draft.participants);
        let reminders = std::mem::take(&mut draft.reminders);
        let resource_ids = std::mem::take(&mut draft.resource_ids);
        let calendar_id = draft.calendar_id.clone();
        let id = Uuid::new_v4().to_string();

        // Calendar is resolved after the checks so bad input never costs a round trip
        let mut event = draft.into_definition(
            id,
            self.owner.clone(),
            calendar_id.clone().unwrap_or_default(),
            &self.config().default_timezone,
        );

        let result: AgendaResult<_> = async {
            self.check_event(&event)?;
            if calendar_id.is_none() {
                event.calendar_id = self.primary_calendar_id().await?;
            }
            let created = self.insert_event(event).await?;
            self.attach(&created.id, &participants, &reminders, &resource_ids)
                .await?;
            Ok(created)
        }
        .await;

        self.settle(Operation::CreateEvent, result, |e| e.id.clone())
    }

    pub async fn update_event(&self, id: &str, patch: EventPatch) -> AgendaResult<EventDefinition> {
        let result: AgendaResult<_> = async {
            // The patch is only valid against the row it was merged with, so
            // the read happens under the entity lock
            let guard = self.sync.lock_entity(id).await;
            let current = self.load_event(id).await?;
            if patch.is_empty() {
                return Ok(current);
            }
            let next = patch.apply_to(&current);
            self.check_event(&next)?;

            let _pending = self.notifier.begin();
            let optimistic = self
                .sync
                .apply_locked(&self.owner, Mutation::UpsertEvent(next), guard);
            let outcome = self.write_update(id, &patch).await;
            let committed = outcome.clone().map(Committed::Event);
            self.sync.on_remote_result(optimistic, committed)?;
            outcome
        }
        .await;

        self.settle(Operation::UpdateEvent, result, |e| e.id.clone())
    }

    pub async fn delete_event(&self, id: &str) -> AgendaResult<()> {
        let result: AgendaResult<_> = async {
            let _pending = self.notifier.begin();
            let optimistic = self
                .sync
                .apply_optimistic(
                    &self.owner,
                    Mutation::DeleteEvent { id: id.to_string() },
                )
                .await;
            let outcome = self
                .sync
                .store()
                .delete_record(Table::Events, &self.owner, id)
                .await
                .map_err(AgendaError::from);
            self.sync
                .on_remote_result(optimistic, outcome.map(|_| Committed::Deleted))
        }
        .await;

        self.settle(Operation::DeleteEvent, result.map(|_| id.to_string()), Clone::clone)
            .map(|_| ())
    }

    /// Copy an event under a new id. The copy is a single event: recurrence,
    /// added and excluded dates are not carried over.
    pub async fn duplicate_event(&self, id: &str) -> AgendaResult<EventDefinition> {
        let result: AgendaResult<_> = async {
            let source = self.load_event(id).await?;
            let copy = EventDefinition {
                id: Uuid::new_v4().to_string(),
                title: format!("{}{DUPLICATE_TITLE_SUFFIX}", source.title),
                rrule: None,
                rdates: None,
                exdates: None,
                created_at: None,
                updated_at: None,
                ..source
            };
            self.check_event(&copy)?;
            self.insert_event(copy).await
        }
        .await;

        self.settle(Operation::DuplicateEvent, result, |e| e.id.clone())
    }

    pub async fn create_calendar(&self, draft: CalendarDraft) -> AgendaResult<Calendar> {
        let result: AgendaResult<_> = async {
            validate_calendar(&draft)?;
            let calendar = draft.into_calendar(
                Uuid::new_v4().to_string(),
                self.owner.clone(),
                &self.config().default_timezone,
            );

            let _pending = self.notifier.begin();
            let optimistic = self
                .sync
                .apply_optimistic(&self.owner, Mutation::UpsertCalendar(calendar.clone()))
                .await;
            let outcome = self.write_insert::<Calendar>(Table::Calendars, &calendar).await;
            let committed = outcome.clone().map(Committed::Calendar);
            self.sync.on_remote_result(optimistic, committed)?;
            outcome
        }
        .await;

        self.settle(Operation::CreateCalendar, result, |c| c.id.clone())
    }

    // ---- Helpers ----

    fn check_event(&self, event: &EventDefinition) -> Result<(), ValidationError> {
        validate_event(event, Utc::now(), self.config().validation.max_past)
    }

    async fn primary_calendar_id(&self) -> AgendaResult<String> {
        let calendars = self.sync.query_calendars(&self.owner).await?.data;
        Calendar::primary(&calendars)
            .map(|c| c.id.clone())
            .ok_or(AgendaError::Validation(ValidationError::NoCalendar))
    }

    async fn load_event(&self, id: &str) -> AgendaResult<EventDefinition> {
        let filter = RecordFilter::new().eq("id", id);
        let rows = self
            .sync
            .store()
            .query_records(Table::Events, &self.owner, &filter)
            .await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| AgendaError::NotFound(id.to_string()))?;
        Ok(from_row(row)?)
    }

    async fn insert_event(&self, event: EventDefinition) -> AgendaResult<EventDefinition> {
        let _pending = self.notifier.begin();
        let optimistic = self
            .sync
            .apply_optimistic(&self.owner, Mutation::UpsertEvent(event.clone()))
            .await;
        let outcome = self.write_insert::<EventDefinition>(Table::Events, &event).await;
        let committed = outcome.clone().map(Committed::Event);
        self.sync.on_remote_result(optimistic, committed)?;
        outcome
    }

    async fn write_insert<T>(&self, table: Table, value: &T) -> AgendaResult<T>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        let row = to_row(value)?;
        let stored = self
            .sync
            .store()
            .insert_record(table, &self.owner, row)
            .await?;
        Ok(from_row(stored)?)
    }

    async fn write_update(&self, id: &str, patch: &EventPatch) -> AgendaResult<EventDefinition> {
        let changes = to_row(patch)?;
        let stored = self
            .sync
            .store()
            .update_record(Table::Events, &self.owner, id, changes)
            .await?;
        Ok(from_row(stored)?)
    }

    /// Write participants, reminders and resource links of a new event.
    async fn attach(
        &self,
        event_id: &str,
        participants: &[ParticipantDraft],
        reminders: &[ReminderDraft],
        resource_ids: &[String],
    ) -> AgendaResult<()> {
        let store = self.sync.store();
        let link = |mut row: Row| {
            row.insert("event_id".to_string(), Value::String(event_id.to_string()));
            row
        };

        for participant in participants {
            let row = link(to_row(participant)?);
            store
                .insert_record(Table::EventParticipants, &self.owner, row)
                .await?;
        }
        for reminder in reminders {
            let row = link(to_row(reminder)?);
            store
                .insert_record(Table::EventReminders, &self.owner, row)
                .await?;
        }
        for resource_id in resource_ids {
            let mut row = link(Row::new());
            row.insert("resource_id".to_string(), Value::String(resource_id.clone()));
            store
                .insert_record(Table::EventResources, &self.owner, row)
                .await?;
        }
        Ok(())
    }

    /// Publish the outcome of an operation and pass it through.
    fn settle<T>(
        &self,
        operation: Operation,
        result: AgendaResult<T>,
        entity_id: impl FnOnce(&T) -> String,
    ) -> AgendaResult<T> {
        let notice = match &result {
            Ok(value) => {
                let entity_id = entity_id(value);
                info!(
                    owner = %self.owner,
                    operation = operation.as_str(),
                    entity_id = %entity_id,
                    "Mutation succeeded"
                );
                Notice::Succeeded {
                    operation,
                    entity_id,
                }
            }
            Err(error) => {
                debug!(
                    owner = %self.owner,
                    operation = operation.as_str(),
                    error = %error,
                    "Mutation failed"
                );
                Notice::Failed {
                    operation,
                    error: error.clone(),
                }
            }
        };
        self.notifier.publish(notice);
        result
    }
}
