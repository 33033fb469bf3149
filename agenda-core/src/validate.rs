//! Domain checks run before any mutation reaches the store.

use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::calendar::CalendarDraft;
use crate::error::ValidationError;
use crate::event::EventDefinition;

fn check_timezone(name: &str) -> Result<(), ValidationError> {
    if name.eq_ignore_ascii_case("utc") || name.parse::<Tz>().is_ok() {
        Ok(())
    } else {
        Err(ValidationError::UnknownTimezone(name.to_string()))
    }
}

/// Check an event as it will be stored.
///
/// All-day events skip the time checks: their bounds are dates, and a
/// single-day event may start and end on the same instant.
pub fn validate_event(
    event: &EventDefinition,
    now: DateTime<Utc>,
    max_past: Duration,
) -> Result<(), ValidationError> {
    if event.title.trim().is_empty() {
        return Err(ValidationError::EmptyTitle);
    }
    check_timezone(&event.timezone)?;

    if event.all_day {
        return Ok(());
    }
    if event.start >= event.end {
        return Err(ValidationError::StartNotBeforeEnd);
    }

    let max_past = chrono::Duration::from_std(max_past).unwrap_or(chrono::Duration::MAX);
    if now.checked_sub_signed(max_past).is_some_and(|limit| event.start < limit) {
        return Err(ValidationError::TooFarInPast {
            max_past_days: max_past.num_days(),
        });
    }
    Ok(())
}

pub fn validate_calendar(draft: &CalendarDraft) -> Result<(), ValidationError> {
    if draft.name.trim().is_empty() {
        return Err(ValidationError::EmptyCalendarName);
    }
    if let Some(timezone) = &draft.timezone {
        check_timezone(timezone)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MAX_PAST;
    use crate::event::tests::make_test_event;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn accepts_a_plain_event() {
        assert_eq!(validate_event(&make_test_event(), now(), MAX_PAST), Ok(()));
    }

    #[test]
    fn rejects_end_before_start() {
        let mut event = make_test_event();
        event.end = event.start;
        assert_eq!(
            validate_event(&event, now(), MAX_PAST),
            Err(ValidationError::StartNotBeforeEnd)
        );
    }

    #[test]
    fn all_day_skips_time_checks() {
        let mut event = make_test_event();
        event.all_day = true;
        event.start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        event.end = event.start;
        assert_eq!(validate_event(&event, now(), MAX_PAST), Ok(()));
    }

    #[test]
    fn rejects_events_more_than_a_year_back() {
        let mut event = make_test_event();
        event.start = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        event.end = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        assert_eq!(
            validate_event(&event, now(), MAX_PAST),
            Err(ValidationError::TooFarInPast { max_past_days: 365 })
        );
    }

    #[test]
    fn unknown_timezone_and_blank_title() {
        let mut event = make_test_event();
        event.timezone = "Mars/Olympus".to_string();
        assert_eq!(
            validate_event(&event, now(), MAX_PAST),
            Err(ValidationError::UnknownTimezone("Mars/Olympus".to_string()))
        );

        let mut event = make_test_event();
        event.title = "  ".to_string();
        assert_eq!(
            validate_event(&event, now(), MAX_PAST),
            Err(ValidationError::EmptyTitle)
        );
    }

    #[test]
    fn calendar_needs_a_name() {
        let draft = CalendarDraft {
            name: String::new(),
            color: "#fff".to_string(),
            timezone: None,
            is_primary: false,
        };
        assert_eq!(
            validate_calendar(&draft),
            Err(ValidationError::EmptyCalendarName)
        );
    }
}
