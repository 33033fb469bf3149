//! Materialized event instances.
//!
//! Occurrences exist only in query results and cache entries. They are never
//! written back to the record store.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::event::EventDefinition;

/// Where an occurrence came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OccurrenceSource {
    /// A non-recurring definition shown as-is
    Single,
    /// An instant produced by the recurrence rule
    Rule,
    /// An explicit added date (RDATE)
    AddedDate,
    /// A recurring master whose rule could not be expanded
    Unexpanded,
}

/// One concrete instance of an event definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Occurrence {
    pub id: String,
    /// Identifier of the definition this instance was produced from
    pub master_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub source: OccurrenceSource,
    /// The master's fields (title, calendar, colors, ...)
    pub definition: Arc<EventDefinition>,
}

impl Occurrence {
    /// The definition shown as a single occurrence with its own bounds.
    pub fn whole(definition: Arc<EventDefinition>, source: OccurrenceSource) -> Self {
        Occurrence {
            id: definition.id.clone(),
            master_id: definition.id.clone(),
            start: definition.start,
            end: definition.end,
            source,
            definition,
        }
    }

    /// An instance of a series starting at `start`, keeping the master's duration.
    pub fn instance(
        definition: Arc<EventDefinition>,
        start: DateTime<Utc>,
        source: OccurrenceSource,
    ) -> Self {
        Occurrence {
            id: occurrence_id(&definition.id, start),
            master_id: definition.id.clone(),
            start,
            end: start + definition.duration(),
            source,
            definition,
        }
    }

    pub fn title(&self) -> &str {
        &self.definition.title
    }

    pub fn calendar_id(&self) -> &str {
        &self.definition.calendar_id
    }
}

/// Synthetic identifier of a series instance: `{master_id}_{instant}`.
pub fn occurrence_id(master_id: &str, instant: DateTime<Utc>) -> String {
    format!(
        "{}_{}",
        master_id,
        instant.to_rfc3339_opts(SecondsFormat::Millis, true)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::tests::make_test_event;
    use chrono::{Duration, TimeZone};

    #[test]
    fn instance_keeps_master_duration_and_reference() {
        let master = Arc::new(make_test_event());
        let start = Utc.with_ymd_and_hms(2025, 1, 13, 9, 0, 0).unwrap();
        let occ = Occurrence::instance(master.clone(), start, OccurrenceSource::Rule);
        assert_eq!(occ.master_id, "evt-1");
        assert_eq!(occ.end - occ.start, Duration::hours(1));
        assert_eq!(occ.id, "evt-1_2025-01-13T09:00:00.000Z");
        assert_eq!(occ.title(), "Standup");
    }

    #[test]
    fn whole_occurrence_reuses_definition_id() {
        let master = Arc::new(make_test_event());
        let occ = Occurrence::whole(master, OccurrenceSource::Single);
        assert_eq!(occ.id, occ.master_id);
    }
}
