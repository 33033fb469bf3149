//! Calendars: named, colored containers that events belong to.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::owner::OwnerId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calendar {
    pub id: String,
    pub owner: OwnerId,
    pub name: String,
    pub color: String,
    pub timezone: String,
    /// One calendar per owner is primary by convention; new events land there
    /// when no calendar is given.
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Calendar {
    /// Listing order: primary calendars first, then by name.
    pub fn listing_order(a: &Calendar, b: &Calendar) -> Ordering {
        b.is_primary
            .cmp(&a.is_primary)
            .then_with(|| a.name.cmp(&b.name))
    }

    pub fn primary(calendars: &[Calendar]) -> Option<&Calendar> {
        calendars.iter().find(|c| c.is_primary)
    }
}

/// Input of `create_calendar`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarDraft {
    pub name: String,
    pub color: String,
    pub timezone: Option<String>,
    #[serde(default)]
    pub is_primary: bool,
}

impl CalendarDraft {
    pub fn into_calendar(self, id: String, owner: OwnerId, default_timezone: &str) -> Calendar {
        Calendar {
            id,
            owner,
            name: self.name,
            color: self.color,
            timezone: self
                .timezone
                .unwrap_or_else(|| default_timezone.to_string()),
            is_primary: self.is_primary,
            created_at: None,
            updated_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calendar(name: &str, is_primary: bool) -> Calendar {
        Calendar {
            id: name.to_lowercase(),
            owner: OwnerId::new("owner").unwrap(),
            name: name.to_string(),
            color: "#3b82f6".to_string(),
            timezone: "UTC".to_string(),
            is_primary,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn primary_sorts_first_then_name() {
        let mut calendars = vec![
            calendar("Work", false),
            calendar("Personal", true),
            calendar("Family", false),
        ];
        calendars.sort_by(Calendar::listing_order);
        let names: Vec<_> = calendars.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Personal", "Family", "Work"]);
        assert_eq!(Calendar::primary(&calendars).unwrap().name, "Personal");
    }
}
