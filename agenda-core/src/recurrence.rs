//! RRULE evaluation.
//!
//! Produces the start instants of a rule that fall inside a window. Knows
//! nothing about excluded or added dates; composing those is the
//! materializer's job.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use rrule::RRuleSet;
use tracing::{trace, warn};

use crate::constants::MAX_OCCURRENCES_PER_WINDOW;
use crate::date_range::TimeWindow;
use crate::error::MalformedRuleError;

/// Resolve an IANA timezone name. Unknown names expand in UTC.
pub fn resolve_timezone(name: &str) -> Option<Tz> {
    if name.eq_ignore_ascii_case("utc") || name.eq_ignore_ascii_case("z") {
        return None;
    }
    match name.parse::<Tz>() {
        Ok(tz) => Some(tz),
        Err(_) => {
            warn!(timezone = %name, "Unknown timezone, expanding in UTC");
            None
        }
    }
}

/// Strip an optional `RRULE:` prefix and reject anything that is not a single rule line.
fn rule_body(rule: &str) -> Result<&str, MalformedRuleError> {
    let trimmed = rule.trim();
    let body = trimmed
        .strip_prefix("RRULE:")
        .or_else(|| trimmed.strip_prefix("rrule:"))
        .unwrap_or(trimmed)
        .trim();

    if body.is_empty() {
        return Err(malformed(rule, "empty rule"));
    }
    if body.contains(['\n', '\r']) {
        return Err(malformed(rule, "expected a single RRULE line"));
    }
    Ok(body)
}

/// Build an iCalendar-format block for the rrule crate parser.
///
/// DTSTART carries the master's wall-clock time in its own timezone, so the
/// rule steps through civil time and DST shifts keep the time of day.
fn build_rrule_string(master_start: DateTime<Utc>, body: &str, tz: Option<Tz>) -> String {
    let dtstart = match tz {
        Some(tz) => format!(
            "DTSTART;TZID={}:{}",
            tz.name(),
            master_start
                .with_timezone(&tz)
                .naive_local()
                .format("%Y%m%dT%H%M%S")
        ),
        None => format!("DTSTART:{}", master_start.format("%Y%m%dT%H%M%SZ")),
    };

    format!("{dtstart}\nRRULE:{body}")
}

/// Expand `rule` anchored at `master_start` into the instants inside `window`.
///
/// Output is ascending and deduplicated; both window bounds are inclusive.
pub fn expand(
    master_start: DateTime<Utc>,
    rule: &str,
    timezone: &str,
    window: &TimeWindow,
) -> Result<Vec<DateTime<Utc>>, MalformedRuleError> {
    let body = rule_body(rule)?;
    let rrule_str = build_rrule_string(master_start, body, resolve_timezone(timezone));

    let rrule_set: RRuleSet = rrule_str
        .parse()
        .map_err(|e: rrule::RRuleError| malformed(rule, e))?;

    // Widen by a second on each side; the explicit filter below restores the
    // inclusive bounds whatever the crate's edge semantics are.
    let utc: rrule::Tz = Utc.into();
    let after = (window.start() - Duration::seconds(1)).with_timezone(&utc);
    let before = (window.end() + Duration::seconds(1)).with_timezone(&utc);

    let result = rrule_set
        .after(after)
        .before(before)
        .all(MAX_OCCURRENCES_PER_WINDOW);

    if result.limited {
        warn!(
            rule = %rule,
            limit = MAX_OCCURRENCES_PER_WINDOW,
            "Recurrence expansion hit the per-window limit"
        );
    }

    let mut instants: Vec<DateTime<Utc>> = result
        .dates
        .iter()
        .map(|dt| dt.with_timezone(&Utc))
        .filter(|dt| window.contains(*dt))
        .collect();
    instants.sort();
    instants.dedup();

    trace!(rule = %rule, count = instants.len(), "Expanded rule");
    Ok(instants)
}

fn malformed(rule: &str, reason: impl ToString) -> MalformedRuleError {
    MalformedRuleError {
        rule: rule.to_string(),
        reason: reason.to_string(),
    }
}
