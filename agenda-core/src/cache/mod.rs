//! Client-side cache of calendars, materialized occurrences and resources.

pub mod key;
pub mod store;

use std::sync::Arc;

pub use key::{CacheKey, EntityKind, KeyPrefix};
pub use store::{CacheEntry, CacheStore, PatchRecord, RestoreOutcome};

use crate::calendar::Calendar;
use crate::event::EventDefinition;
use crate::materialize::{self, ExpansionDiagnostic};
use crate::occurrence::Occurrence;
use crate::resource::Resource;
use crate::sync::query::EventQuery;

/// Occurrences of one event query, kept with the definitions they came from
/// so optimistic edits can re-materialize without a round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct OccurrenceSet {
    pub query: EventQuery,
    pub definitions: Vec<Arc<EventDefinition>>,
    pub occurrences: Vec<Occurrence>,
    pub diagnostics: Vec<ExpansionDiagnostic>,
}

impl OccurrenceSet {
    pub fn build(query: EventQuery, definitions: Vec<Arc<EventDefinition>>) -> Self {
        let mut occurrences = Vec::new();
        let mut diagnostics = Vec::new();
        for definition in &definitions {
            let one = materialize::materialize_shared(definition.clone(), &query.window);
            occurrences.extend(one.occurrences);
            diagnostics.extend(one.diagnostics);
        }
        materialize::sort_occurrences(&mut occurrences);
        OccurrenceSet {
            query,
            definitions,
            occurrences,
            diagnostics,
        }
    }

    /// Rebuild with `definition` inserted or replaced. Definitions the query
    /// would not return are dropped instead.
    pub fn upsert(&self, definition: &EventDefinition) -> Self {
        let mut definitions: Vec<Arc<EventDefinition>> = self
            .definitions
            .iter()
            .filter(|d| d.id != definition.id)
            .cloned()
            .collect();
        if self.query.matches(definition) {
            definitions.push(Arc::new(definition.clone()));
        }
        Self::build(self.query.clone(), definitions)
    }

    pub fn remove(&self, definition_id: &str) -> Self {
        let definitions = self
            .definitions
            .iter()
            .filter(|d| d.id != definition_id)
            .cloned()
            .collect();
        Self::build(self.query.clone(), definitions)
    }

    pub fn contains_definition(&self, definition_id: &str) -> bool {
        self.definitions.iter().any(|d| d.id == definition_id)
    }
}

/// A cached result set of any entity kind.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedRows {
    Calendars(Vec<Calendar>),
    Occurrences(OccurrenceSet),
    Resources(Vec<Resource>),
}
