//! Optimistic cache patches and their rollback.

use tokio::sync::OwnedMutexGuard;

use crate::cache::{CachedRows, EntityKind, PatchRecord};
use crate::calendar::Calendar;
use crate::event::EventDefinition;
use crate::owner::OwnerId;

/// A local change applied to cached results before the store confirms it.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Create or replace an event definition
    UpsertEvent(EventDefinition),
    DeleteEvent { id: String },
    /// Create or replace a calendar
    UpsertCalendar(Calendar),
}

impl Mutation {
    pub fn entity_id(&self) -> &str {
        match self {
            Mutation::UpsertEvent(event) => &event.id,
            Mutation::DeleteEvent { id } => id,
            Mutation::UpsertCalendar(calendar) => &calendar.id,
        }
    }

    /// Cache kinds whose entries the mutation can change.
    pub fn patched_kind(&self) -> EntityKind {
        match self {
            Mutation::UpsertEvent(_) | Mutation::DeleteEvent { .. } => EntityKind::Events,
            Mutation::UpsertCalendar(_) => EntityKind::Calendars,
        }
    }

    /// Kinds to invalidate once the store has answered. Calendar changes
    /// ripple into the events shown for them.
    pub fn invalidated_kinds(&self) -> &'static [EntityKind] {
        match self {
            Mutation::UpsertEvent(_) | Mutation::DeleteEvent { .. } => &[EntityKind::Events],
            Mutation::UpsertCalendar(_) => &[EntityKind::Calendars, EntityKind::Events],
        }
    }

    /// The patched form of one cached result set, or `None` if it is unaffected.
    pub(crate) fn apply(&self, rows: &CachedRows) -> Option<CachedRows> {
        match (self, rows) {
            (Mutation::UpsertEvent(event), CachedRows::Occurrences(set)) => {
                (set.query.matches(event) || set.contains_definition(&event.id))
                    .then(|| CachedRows::Occurrences(set.upsert(event)))
            }
            (Mutation::DeleteEvent { id }, CachedRows::Occurrences(set)) => set
                .contains_definition(id)
                .then(|| CachedRows::Occurrences(set.remove(id))),
            (Mutation::UpsertCalendar(calendar), CachedRows::Calendars(calendars)) => {
                let mut calendars: Vec<Calendar> = calendars
                    .iter()
                    .filter(|c| c.id != calendar.id)
                    .cloned()
                    .collect();
                calendars.push(calendar.clone());
                calendars.sort_by(Calendar::listing_order);
                Some(CachedRows::Calendars(calendars))
            }
            _ => None,
        }
    }
}

/// The authoritative result of a confirmed mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Committed {
    Event(EventDefinition),
    Calendar(Calendar),
    Deleted,
}

impl Committed {
    pub(crate) fn as_mutation(&self, original: &Mutation) -> Option<Mutation> {
        match self {
            Committed::Event(event) => Some(Mutation::UpsertEvent(event.clone())),
            Committed::Calendar(calendar) => Some(Mutation::UpsertCalendar(calendar.clone())),
            Committed::Deleted => match original {
                Mutation::DeleteEvent { id } => Some(Mutation::DeleteEvent { id: id.clone() }),
                _ => None,
            },
        }
    }
}

/// An applied optimistic change, waiting for the store's answer.
///
/// Holds the entity's mutation lock: a second mutation of the same entity
/// waits until this one is resolved through
/// [`SyncCoordinator::on_remote_result`](crate::sync::SyncCoordinator::on_remote_result).
pub struct OptimisticPatch {
    pub owner: OwnerId,
    pub mutation: Mutation,
    pub(crate) records: Vec<PatchRecord<CachedRows>>,
    pub(crate) _guard: OwnedMutexGuard<()>,
}

impl OptimisticPatch {
    /// Number of cached result sets changed by the patch.
    pub fn patched_entries(&self) -> usize {
        self.records.len()
    }
}

impl std::fmt::Debug for OptimisticPatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimisticPatch")
            .field("owner", &self.owner)
            .field("mutation", &self.mutation)
            .field("patched_entries", &self.records.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::OccurrenceSet;
    use crate::date_range::TimeWindow;
    use crate::event::tests::make_test_event;
    use crate::sync::query::EventQuery;
    use std::sync::Arc;

    fn january_set(definitions: Vec<EventDefinition>) -> CachedRows {
        let query = EventQuery::new(TimeWindow::from_dates("2025-01-01", "2025-02-01").unwrap());
        CachedRows::Occurrences(OccurrenceSet::build(
            query,
            definitions.into_iter().map(Arc::new).collect(),
        ))
    }

    fn occurrences(rows: &CachedRows) -> usize {
        match rows {
            CachedRows::Occurrences(set) => set.occurrences.len(),
            _ => 0,
        }
    }

    #[test]
    fn upsert_adds_matching_event() {
        let rows = january_set(vec![]);
        let patched = Mutation::UpsertEvent(make_test_event()).apply(&rows).unwrap();
        assert_eq!(occurrences(&patched), 1);
    }

    #[test]
    fn upsert_outside_window_leaves_set_alone() {
        let rows = january_set(vec![]);
        let mut event = make_test_event();
        event.start = event.start + chrono::Duration::days(90);
        event.end = event.end + chrono::Duration::days(90);
        assert!(Mutation::UpsertEvent(event).apply(&rows).is_none());
    }

    #[test]
    fn moving_an_event_out_of_the_window_removes_it() {
        let event = make_test_event();
        let rows = january_set(vec![event.clone()]);
        let mut moved = event;
        moved.start = moved.start + chrono::Duration::days(90);
        moved.end = moved.end + chrono::Duration::days(90);
        let patched = Mutation::UpsertEvent(moved).apply(&rows).unwrap();
        assert_eq!(occurrences(&patched), 0);
    }

    #[test]
    fn delete_removes_every_occurrence_of_a_series() {
        let mut event = make_test_event();
        event.rrule = Some("FREQ=WEEKLY;COUNT=3".into());
        let rows = january_set(vec![event.clone()]);
        assert_eq!(occurrences(&rows), 3);
        let patched = Mutation::DeleteEvent { id: event.id }.apply(&rows).unwrap();
        assert_eq!(occurrences(&patched), 0);
    }

    #[test]
    fn event_mutations_ignore_calendar_lists() {
        let rows = CachedRows::Calendars(vec![]);
        assert!(Mutation::UpsertEvent(make_test_event()).apply(&rows).is_none());
    }
}
