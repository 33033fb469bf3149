//! Occurrence materialization.
//!
//! Combines rule output with added and excluded dates and the master's
//! duration. Never fails: a definition whose rule cannot be expanded is
//! returned unexpanded, together with a diagnostic for the caller.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::error;

use crate::date_range::TimeWindow;
use crate::error::MalformedRuleError;
use crate::event::EventDefinition;
use crate::occurrence::{Occurrence, OccurrenceSource};
use crate::recurrence;

/// A non-fatal problem found while expanding a definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpansionDiagnostic {
    pub definition_id: String,
    pub error: MalformedRuleError,
}

/// Result of materializing one or more definitions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Materialized {
    pub occurrences: Vec<Occurrence>,
    pub diagnostics: Vec<ExpansionDiagnostic>,
}

/// Expand one definition into the occurrences visible in `window`.
pub fn materialize(definition: &EventDefinition, window: &TimeWindow) -> Materialized {
    materialize_shared(Arc::new(definition.clone()), window)
}

/// Expand a batch of definitions. One malformed definition never prevents
/// the others from expanding.
pub fn materialize_all<'a>(
    definitions: impl IntoIterator<Item = &'a EventDefinition>,
    window: &TimeWindow,
) -> Materialized {
    let mut out = Materialized::default();
    for definition in definitions {
        let one = materialize_shared(Arc::new(definition.clone()), window);
        out.occurrences.extend(one.occurrences);
        out.diagnostics.extend(one.diagnostics);
    }
    sort_occurrences(&mut out.occurrences);
    out
}

pub(crate) fn materialize_shared(
    definition: Arc<EventDefinition>,
    window: &TimeWindow,
) -> Materialized {
    let Some(rule) = definition.rrule.as_deref().filter(|_| definition.is_recurring()) else {
        let occurrences = if window.intersects(definition.start, definition.end) {
            vec![Occurrence::whole(definition, OccurrenceSource::Single)]
        } else {
            Vec::new()
        };
        return Materialized {
            occurrences,
            diagnostics: Vec::new(),
        };
    };

    let instants = match recurrence::expand(definition.start, rule, &definition.timezone, window)
    {
        Ok(instants) => instants,
        Err(err) => {
            error!(
                event_id = %definition.id,
                error = %err,
                "Error expanding recurring event, showing master unexpanded"
            );
            let diagnostic = ExpansionDiagnostic {
                definition_id: definition.id.clone(),
                error: err,
            };
            return Materialized {
                occurrences: vec![Occurrence::whole(definition, OccurrenceSource::Unexpanded)],
                diagnostics: vec![diagnostic],
            };
        }
    };

    let excluded: HashSet<DateTime<Utc>> = definition.excluded_dates().iter().copied().collect();
    let mut seen: HashSet<DateTime<Utc>> = HashSet::new();
    let mut occurrences = Vec::new();

    for instant in instants {
        if excluded.contains(&instant) || !seen.insert(instant) {
            continue;
        }
        occurrences.push(Occurrence::instance(
            definition.clone(),
            instant,
            OccurrenceSource::Rule,
        ));
    }

    for &added in definition.added_dates() {
        if !window.contains(added) || excluded.contains(&added) || !seen.insert(added) {
            continue;
        }
        occurrences.push(Occurrence::instance(
            definition.clone(),
            added,
            OccurrenceSource::AddedDate,
        ));
    }

    sort_occurrences(&mut occurrences);
    Materialized {
        occurrences,
        diagnostics: Vec::new(),
    }
}

pub(crate) fn sort_occurrences(occurrences: &mut [Occurrence]) {
    occurrences.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::tests::make_test_event;
    use chrono::{Duration, TimeZone};

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn january() -> TimeWindow {
        TimeWindow::from_dates("2025-01-01", "2025-02-01").unwrap()
    }

    fn weekly_three() -> EventDefinition {
        let mut event = make_test_event();
        event.rrule = Some("FREQ=WEEKLY;INTERVAL=1;COUNT=3".to_string());
        event
    }

    fn starts(m: &Materialized) -> Vec<DateTime<Utc>> {
        m.occurrences.iter().map(|o| o.start).collect()
    }

    #[test]
    fn single_event_inside_window() {
        let event = make_test_event();
        let out = materialize(&event, &january());
        assert_eq!(out.occurrences.len(), 1);
        assert_eq!(out.occurrences[0].source, OccurrenceSource::Single);
        assert_eq!(out.occurrences[0].id, event.id);
    }

    #[test]
    fn single_event_outside_window() {
        let event = make_test_event();
        let window = TimeWindow::from_dates("2025-02-01", "2025-03-01").unwrap();
        assert!(materialize(&event, &window).occurrences.is_empty());
    }

    #[test]
    fn single_event_spanning_window_start() {
        let mut event = make_test_event();
        event.start = at(2024, 12, 31, 22);
        event.end = at(2025, 1, 1, 2);
        assert_eq!(materialize(&event, &january()).occurrences.len(), 1);
    }

    #[test]
    fn weekly_series_scenario() {
        let out = materialize(&weekly_three(), &january());
        assert_eq!(
            starts(&out),
            vec![at(2025, 1, 6, 9), at(2025, 1, 13, 9), at(2025, 1, 20, 9)]
        );
        for occ in &out.occurrences {
            assert_eq!(occ.end - occ.start, Duration::hours(1));
            assert_eq!(occ.master_id, "evt-1");
            assert_eq!(occ.source, OccurrenceSource::Rule);
        }
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn excluded_date_removes_exactly_one() {
        let mut event = weekly_three();
        event.exdates = Some(vec![at(2025, 1, 13, 9)]);
        let out = materialize(&event, &january());
        assert_eq!(starts(&out), vec![at(2025, 1, 6, 9), at(2025, 1, 20, 9)]);
    }

    #[test]
    fn excluded_date_off_cadence_removes_nothing() {
        let mut event = weekly_three();
        event.exdates = Some(vec![at(2025, 1, 14, 9)]);
        assert_eq!(materialize(&event, &january()).occurrences.len(), 3);
    }

    #[test]
    fn added_date_adds_an_occurrence() {
        let mut event = weekly_three();
        event.rdates = Some(vec![at(2025, 1, 15, 14)]);
        event.exdates = Some(vec![at(2025, 1, 28, 9)]);
        let out = materialize(&event, &january());
        assert_eq!(out.occurrences.len(), 4);
        let added = out
            .occurrences
            .iter()
            .find(|o| o.source == OccurrenceSource::AddedDate)
            .unwrap();
        assert_eq!(added.start, at(2025, 1, 15, 14));
        assert_eq!(added.end, at(2025, 1, 15, 15));
        // Sorted by start
        assert_eq!(out.occurrences[2].start, at(2025, 1, 15, 14));
    }

    #[test]
    fn added_date_outside_window_is_ignored() {
        let mut event = weekly_three();
        event.rdates = Some(vec![at(2025, 3, 1, 9)]);
        assert_eq!(materialize(&event, &january()).occurrences.len(), 3);
    }

    #[test]
    fn added_date_also_excluded_is_dropped() {
        let mut event = weekly_three();
        event.rdates = Some(vec![at(2025, 1, 15, 14)]);
        event.exdates = Some(vec![at(2025, 1, 15, 14)]);
        assert_eq!(materialize(&event, &january()).occurrences.len(), 3);
    }

    #[test]
    fn added_date_matching_rule_instant_is_not_duplicated() {
        let mut event = weekly_three();
        event.rdates = Some(vec![at(2025, 1, 13, 9)]);
        assert_eq!(materialize(&event, &january()).occurrences.len(), 3);
    }

    #[test]
    fn malformed_rule_falls_back_to_master() {
        let mut event = make_test_event();
        event.rrule = Some("FREQ=BOGUS".to_string());
        let out = materialize(&event, &january());
        assert_eq!(out.occurrences.len(), 1);
        assert_eq!(out.occurrences[0].source, OccurrenceSource::Unexpanded);
        assert_eq!(out.occurrences[0].id, event.id);
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].definition_id, event.id);
    }

    #[test]
    fn malformed_definition_does_not_block_others() {
        let mut broken = make_test_event();
        broken.id = "broken".to_string();
        broken.rrule = Some("FREQ=BOGUS".to_string());
        let good = weekly_three();
        let out = materialize_all([&broken, &good], &january());
        assert_eq!(out.occurrences.len(), 4);
        assert_eq!(out.diagnostics.len(), 1);
    }

    #[test]
    fn materializing_twice_is_identical() {
        let mut event = weekly_three();
        event.rdates = Some(vec![at(2025, 1, 15, 14)]);
        let first = materialize(&event, &january());
        let second = materialize(&event, &january());
        assert_eq!(first, second);
    }

    #[test]
    fn daily_rule_counts_calendar_days() {
        let mut event = make_test_event();
        event.start = at(2024, 11, 20, 7);
        event.end = at(2024, 11, 20, 8);
        event.rrule = Some("FREQ=DAILY;INTERVAL=1".to_string());
        let window = TimeWindow::new(at(2025, 1, 1, 0), at(2025, 1, 10, 23)).unwrap();
        assert_eq!(materialize(&event, &window).occurrences.len(), 10);
    }
}
