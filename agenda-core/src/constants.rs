use std::time::Duration;

/// Timezone applied to events and calendars created without one.
pub const DEFAULT_TIMEZONE: &str = "America/Sao_Paulo";

/// Upper bound on rule instants produced for a single window.
pub const MAX_OCCURRENCES_PER_WINDOW: u16 = 2000;

/// Suffix appended to the title of a duplicated event.
pub const DUPLICATE_TITLE_SUFFIX: &str = " (copy)";

pub const CALENDARS_STALE_AFTER: Duration = Duration::from_secs(10 * 60);
pub const CALENDARS_RETENTION: Duration = Duration::from_secs(30 * 60);

pub const EVENTS_STALE_AFTER: Duration = Duration::from_secs(2 * 60);
pub const EVENTS_RETENTION: Duration = Duration::from_secs(10 * 60);

pub const RESOURCES_STALE_AFTER: Duration = Duration::from_secs(15 * 60);
pub const RESOURCES_RETENTION: Duration = Duration::from_secs(30 * 60);

/// Requests closer together than this count towards a rapid burst.
pub const GOVERNOR_RAPID_THRESHOLD: Duration = Duration::from_millis(100);
/// A burst longer than this trips the governor.
pub const GOVERNOR_RAPID_LIMIT: u32 = 10;
pub const GOVERNOR_COOLDOWN: Duration = Duration::from_secs(5);

pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// How far in the past a timed event may start.
pub const MAX_PAST: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Capacity of the notice and push broadcast channels.
pub const CHANNEL_CAPACITY: usize = 256;
