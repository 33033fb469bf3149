//! Occurrence queries and their cache descriptors.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::date_range::TimeWindow;
use crate::event::{EventDefinition, EventStatus, Priority};
use crate::store::RecordFilter;
use crate::store::filter::START_COLUMN;

/// Optional narrowing of an occurrence query. Empty lists mean "all".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilters {
    #[serde(default)]
    pub calendar_ids: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub priorities: Vec<Priority>,
    #[serde(default)]
    pub statuses: Vec<EventStatus>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventQuery {
    pub window: TimeWindow,
    #[serde(default)]
    pub filters: EventFilters,
}

/// Sorted, deduplicated values as a JSON array, or `None` when empty.
/// JSON quoting keeps values containing separators apart.
fn encode_values<'a>(values: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let mut values: Vec<&str> = values.into_iter().collect();
    if values.is_empty() {
        return None;
    }
    values.sort_unstable();
    values.dedup();
    Some(Value::from(values).to_string())
}

impl EventQuery {
    pub fn new(window: TimeWindow) -> Self {
        EventQuery {
            window,
            filters: EventFilters::default(),
        }
    }

    pub fn with_filters(mut self, filters: EventFilters) -> Self {
        self.filters = filters;
        self
    }

    fn search(&self) -> Option<&str> {
        self.filters
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Cache descriptor. Filter lists are sorted so that the same filters in a
    /// different order share one cache entry.
    pub fn descriptor(&self) -> String {
        let f = &self.filters;
        let mut descriptor = self.window.descriptor();
        let parts = [
            ("cal", encode_values(f.calendar_ids.iter().map(String::as_str))),
            ("cat", encode_values(f.categories.iter().map(String::as_str))),
            ("prio", encode_values(f.priorities.iter().map(Priority::as_str))),
            ("status", encode_values(f.statuses.iter().map(EventStatus::as_str))),
        ];
        for (name, value) in parts {
            if let Some(value) = value {
                descriptor.push_str(&format!("|{name}={value}"));
            }
        }
        if let Some(search) = self.search() {
            descriptor.push_str(&format!("|q={}", Value::from(search.to_lowercase())));
        }
        descriptor
    }

    /// The store-side filter selecting candidate definitions.
    pub fn record_filter(&self) -> RecordFilter {
        let f = &self.filters;
        let mut filter = RecordFilter::new()
            .range(self.window)
            .any_of("calendar_id", f.calendar_ids.iter().cloned())
            .any_of("category", f.categories.iter().cloned())
            .any_of("priority", f.priorities.iter().map(Priority::as_str))
            .any_of("status", f.statuses.iter().map(EventStatus::as_str))
            .order_by(START_COLUMN);
        if let Some(search) = self.search() {
            filter = filter.search(search);
        }
        filter
    }

    /// Whether the store would return `definition` for this query.
    pub fn matches(&self, definition: &EventDefinition) -> bool {
        let f = &self.filters;
        (definition.is_recurring() || self.window.intersects(definition.start, definition.end))
            && (f.calendar_ids.is_empty() || f.calendar_ids.contains(&definition.calendar_id))
            && (f.categories.is_empty()
                || definition
                    .category
                    .as_ref()
                    .is_some_and(|c| f.categories.contains(c)))
            && (f.priorities.is_empty() || f.priorities.contains(&definition.priority))
            && (f.statuses.is_empty() || f.statuses.contains(&definition.status))
            && self.search().is_none_or(|s| definition.matches_search(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::tests::make_test_event;
    use crate::store::to_row;

    fn january() -> TimeWindow {
        TimeWindow::from_dates("2025-01-01", "2025-02-01").unwrap()
    }

    #[test]
    fn descriptor_ignores_filter_order() {
        let a = EventQuery::new(january()).with_filters(EventFilters {
            calendar_ids: vec!["b".into(), "a".into()],
            priorities: vec![Priority::High, Priority::Low],
            ..EventFilters::default()
        });
        let b = EventQuery::new(january()).with_filters(EventFilters {
            calendar_ids: vec!["a".into(), "b".into()],
            priorities: vec![Priority::Low, Priority::High],
            ..EventFilters::default()
        });
        assert_eq!(a.descriptor(), b.descriptor());
        assert!(a.descriptor().ends_with(r#"|cal=["a","b"]|prio=["high","low"]"#));
    }

    #[test]
    fn separators_inside_values_do_not_collide() {
        let joined = EventQuery::new(january()).with_filters(EventFilters {
            calendar_ids: vec!["a,b".into()],
            ..EventFilters::default()
        });
        let split = EventQuery::new(january()).with_filters(EventFilters {
            calendar_ids: vec!["a".into(), "b".into()],
            ..EventFilters::default()
        });
        assert_ne!(joined.descriptor(), split.descriptor());

        let piped = EventQuery::new(january()).with_filters(EventFilters {
            search: Some("x|cal=a".into()),
            ..EventFilters::default()
        });
        let filtered = EventQuery::new(january()).with_filters(EventFilters {
            calendar_ids: vec!["a".into()],
            search: Some("x".into()),
            ..EventFilters::default()
        });
        assert_ne!(piped.descriptor(), filtered.descriptor());
    }

    #[test]
    fn blank_search_is_no_search() {
        let plain = EventQuery::new(january());
        let blank = EventQuery::new(january()).with_filters(EventFilters {
            search: Some("   ".into()),
            ..EventFilters::default()
        });
        assert_eq!(plain.descriptor(), blank.descriptor());
        assert_eq!(blank.record_filter().search, None);
    }

    #[test]
    fn client_match_agrees_with_store_filter() {
        let event = make_test_event();
        let row = to_row(&event).unwrap();
        let queries = [
            EventQuery::new(january()),
            EventQuery::new(TimeWindow::from_dates("2025-03-01", "2025-04-01").unwrap()),
            EventQuery::new(january()).with_filters(EventFilters {
                calendar_ids: vec!["other".into()],
                ..EventFilters::default()
            }),
            EventQuery::new(january()).with_filters(EventFilters {
                statuses: vec![EventStatus::Confirmed],
                search: Some("stand".into()),
                ..EventFilters::default()
            }),
        ];
        for query in queries {
            assert_eq!(
                query.matches(&event),
                query.record_filter().matches(&row),
                "{}",
                query.descriptor()
            );
        }
    }
}
