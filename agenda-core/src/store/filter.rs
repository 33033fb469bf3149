//! Row filters understood by every `RecordStore`.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::date_range::TimeWindow;
use crate::store::Row;

pub const START_COLUMN: &str = "start_ts";
pub const END_COLUMN: &str = "end_ts";
pub const RULE_COLUMN: &str = "rrule";

/// Columns searched by [`RecordFilter::search`].
pub const SEARCH_COLUMNS: [&str; 3] = ["title", "description", "location"];

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

/// Conjunction of row predicates plus an ordering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    /// Rows whose `[start_ts, end_ts]` intersects the window. Rows with a
    /// recurrence rule always pass: their instants are only known after
    /// expansion.
    pub range: Option<TimeWindow>,
    pub equals: Vec<(String, Value)>,
    pub any_of: Vec<(String, Vec<Value>)>,
    /// Case-insensitive substring over [`SEARCH_COLUMNS`].
    pub search: Option<String>,
    pub order: Vec<OrderBy>,
}

impl RecordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn range(mut self, window: TimeWindow) -> Self {
        self.range = Some(window);
        self
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.equals.push((column.to_string(), value.into()));
        self
    }

    /// Empty `values` means no constraint.
    pub fn any_of<V: Into<Value>>(mut self, column: &str, values: impl IntoIterator<Item = V>) -> Self {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        if !values.is_empty() {
            self.any_of.push((column.to_string(), values));
        }
        self
    }

    pub fn search(mut self, needle: &str) -> Self {
        let needle = needle.trim();
        if !needle.is_empty() {
            self.search = Some(needle.to_string());
        }
        self
    }

    pub fn order_by(mut self, column: &str) -> Self {
        self.order.push(OrderBy {
            column: column.to_string(),
            descending: false,
        });
        self
    }

    pub fn order_by_desc(mut self, column: &str) -> Self {
        self.order.push(OrderBy {
            column: column.to_string(),
            descending: true,
        });
        self
    }

    pub fn matches(&self, row: &Row) -> bool {
        if let Some(window) = &self.range
            && !row_in_range(row, window)
        {
            return false;
        }

        let equals = self
            .equals
            .iter()
            .all(|(column, value)| row.get(column) == Some(value));
        let any_of = self
            .any_of
            .iter()
            .all(|(column, values)| row.get(column).is_some_and(|v| values.contains(v)));

        equals && any_of && self.search.as_deref().is_none_or(|n| row_matches_search(row, n))
    }

    /// Sort rows by the filter's ordering columns. Missing values sort first.
    pub fn sort(&self, rows: &mut [Row]) {
        rows.sort_by(|a, b| {
            self.order
                .iter()
                .map(|order| {
                    let ord = compare_values(a.get(&order.column), b.get(&order.column));
                    if order.descending { ord.reverse() } else { ord }
                })
                .find(|ord| ord.is_ne())
                .unwrap_or(Ordering::Equal)
        });
    }
}

fn row_timestamp(row: &Row, column: &str) -> Option<DateTime<Utc>> {
    row.get(column)?
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn row_in_range(row: &Row, window: &TimeWindow) -> bool {
    let recurring = row
        .get(RULE_COLUMN)
        .and_then(Value::as_str)
        .is_some_and(|r| !r.trim().is_empty());
    if recurring {
        return true;
    }

    match (row_timestamp(row, START_COLUMN), row_timestamp(row, END_COLUMN)) {
        (Some(start), Some(end)) => window.intersects(start, end),
        (Some(start), None) => window.contains(start),
        _ => false,
    }
}

fn row_matches_search(row: &Row, needle: &str) -> bool {
    let needle = needle.to_lowercase();
    SEARCH_COLUMNS.iter().any(|column| {
        row.get(*column)
            .and_then(Value::as_str)
            .is_some_and(|text| text.to_lowercase().contains(&needle))
    })
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(a), Some(b)) => a.to_string().cmp(&b.to_string()),
    }
}
