//! Scheduling core of the agenda.
//!
//! - `recurrence` and `materialize` turn stored event definitions into the
//!   occurrences visible in a time window.
//! - `cache`, `governor` and `sync` keep a client-side cache of calendars,
//!   events and resources consistent under concurrent reads, optimistic
//!   writes and push notifications, and cut off request loops.
//! - `agenda` is the entry point for one owner: reads plus validated
//!   mutations with rollback.
//!
//! The backend is reached only through the [`store::RecordStore`] trait.

pub mod agenda;
pub mod cache;
pub mod calendar;
pub mod config;
pub mod constants;
pub mod date_range;
pub mod error;
pub mod event;
pub mod governor;
pub mod materialize;
pub mod notice;
pub mod occurrence;
pub mod owner;
pub mod push;
pub mod recurrence;
pub mod resource;
pub mod store;
pub mod sync;
pub mod validate;

mod utils;

pub use agenda::Agenda;
pub use calendar::{Calendar, CalendarDraft};
pub use config::AgendaConfig;
pub use date_range::TimeWindow;
pub use error::{AgendaError, AgendaResult, MalformedRuleError, ValidationError};
pub use event::{
    EventDefinition, EventDraft, EventPatch, EventStatus, ParticipantDraft, Priority, Privacy,
    ReminderDraft,
};
pub use materialize::{ExpansionDiagnostic, Materialized, materialize, materialize_all};
pub use notice::{MutationState, Notice, Operation};
pub use occurrence::{Occurrence, OccurrenceSource};
pub use owner::OwnerId;
pub use push::{ChangeKind, PushNotification};
pub use resource::Resource;
pub use store::{MemoryStore, RecordStore, StoreError};
pub use sync::{EventFilters, EventQuery, Freshness, QueryResult, SyncCoordinator};
