//! Agenda configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::cache::EntityKind;
use crate::constants::{
    CALENDARS_RETENTION, CALENDARS_STALE_AFTER, DEFAULT_TIMEZONE, EVENTS_RETENTION,
    EVENTS_STALE_AFTER, FETCH_TIMEOUT, GOVERNOR_COOLDOWN, GOVERNOR_RAPID_LIMIT,
    GOVERNOR_RAPID_THRESHOLD, MAX_PAST, RESOURCES_RETENTION, RESOURCES_STALE_AFTER,
};
use crate::error::{AgendaError, AgendaResult};

/// Durations are written as humantime strings ("2m", "100ms").
mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

/// How long one kind of result set stays fresh, and how long it is kept
/// around unused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    #[serde(with = "duration_str")]
    pub stale_after: Duration,
    #[serde(with = "duration_str")]
    pub retention: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub calendars: CachePolicy,
    pub events: CachePolicy,
    pub resources: CachePolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            calendars: CachePolicy {
                stale_after: CALENDARS_STALE_AFTER,
                retention: CALENDARS_RETENTION,
            },
            events: CachePolicy {
                stale_after: EVENTS_STALE_AFTER,
                retention: EVENTS_RETENTION,
            },
            resources: CachePolicy {
                stale_after: RESOURCES_STALE_AFTER,
                retention: RESOURCES_RETENTION,
            },
        }
    }
}

impl CacheConfig {
    pub fn policy(&self, kind: EntityKind) -> CachePolicy {
        match kind {
            EntityKind::Calendars => self.calendars,
            EntityKind::Events => self.events,
            EntityKind::Resources => self.resources,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Requests closer together than this extend a burst
    #[serde(with = "duration_str")]
    pub rapid_threshold: Duration,
    /// Longest burst allowed through
    pub rapid_limit: u32,
    #[serde(with = "duration_str")]
    pub cooldown: Duration,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        GovernorConfig {
            rapid_threshold: GOVERNOR_RAPID_THRESHOLD,
            rapid_limit: GOVERNOR_RAPID_LIMIT,
            cooldown: GOVERNOR_COOLDOWN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    #[serde(with = "duration_str")]
    pub fetch_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            fetch_timeout: FETCH_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// How far before now a timed event may start
    #[serde(with = "duration_str")]
    pub max_past: Duration,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        ValidationConfig { max_past: MAX_PAST }
    }
}

/// Configuration at ~/.config/agenda/config.toml, overridable with
/// `AGENDA_*` environment variables (`AGENDA_SYNC__FETCH_TIMEOUT=30s`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgendaConfig {
    pub default_timezone: String,
    pub cache: CacheConfig,
    pub governor: GovernorConfig,
    pub sync: SyncConfig,
    pub validation: ValidationConfig,
}

impl Default for AgendaConfig {
    fn default() -> Self {
        AgendaConfig {
            default_timezone: DEFAULT_TIMEZONE.to_string(),
            cache: CacheConfig::default(),
            governor: GovernorConfig::default(),
            sync: SyncConfig::default(),
            validation: ValidationConfig::default(),
        }
    }
}

impl AgendaConfig {
    pub fn config_path() -> AgendaResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| AgendaError::Config("Could not determine config directory".into()))?
            .join("agenda");

        Ok(config_dir.join("config.toml"))
    }

    /// Load from the default location, writing a commented template first
    /// if there is no config file yet.
    pub fn load() -> AgendaResult<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            Self::create_default_config(&config_path)?;
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> AgendaResult<Self> {
        Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix("AGENDA")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AgendaError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| AgendaError::Config(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> AgendaResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| AgendaError::Config(e.to_string()))?;

        std::fs::write(path, content)
            .map_err(|e| AgendaError::Config(format!("Could not write config file: {e}")))?;

        Ok(())
    }

    /// Create a default config file with all options commented out.
    pub fn create_default_config(path: &Path) -> AgendaResult<()> {
        let contents = format!(
            "\
# agenda configuration

# Timezone for new events and calendars that do not name one:
# default_timezone = \"{DEFAULT_TIMEZONE}\"

# How long results stay fresh, and how long unused results are kept:
# [cache.calendars]
# stale_after = \"10m\"
# retention = \"30m\"
# [cache.events]
# stale_after = \"2m\"
# retention = \"10m\"
# [cache.resources]
# stale_after = \"15m\"
# retention = \"30m\"

# Request loop protection:
# [governor]
# rapid_threshold = \"100ms\"
# rapid_limit = 10
# cooldown = \"5s\"

# [sync]
# fetch_timeout = \"10s\"

# [validation]
# max_past = \"365days\"
"
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AgendaError::Config(format!("Could not create config directory: {e}"))
            })?;
        }

        std::fs::write(path, contents)
            .map_err(|e| AgendaError::Config(format!("Could not write config file: {e}")))?;

        Ok(())
    }
}
