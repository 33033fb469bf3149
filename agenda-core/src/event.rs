//! Stored event definitions and the inputs used to create or edit them.
//!
//! An `EventDefinition` is the row kept by the record store. When it carries a
//! recurrence rule it is a series master and is only ever shown through its
//! materialized occurrences (see `crate::occurrence`).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::owner::OwnerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privacy {
    #[default]
    Default,
    Public,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    #[default]
    Confirmed,
    Tentative,
    Cancelled,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Confirmed => "confirmed",
            EventStatus::Tentative => "tentative",
            EventStatus::Cancelled => "cancelled",
        }
    }
}

/// A stored, possibly recurring, event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDefinition {
    pub id: String,
    pub calendar_id: String,
    pub owner: OwnerId,
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "start_ts")]
    pub start: DateTime<Utc>,
    #[serde(rename = "end_ts")]
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub all_day: bool,
    pub timezone: String,
    pub location: Option<String>,
    pub conference_url: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub privacy: Privacy,
    #[serde(default)]
    pub status: EventStatus,
    pub color: Option<String>,

    // Recurrence
    /// RRULE expression, stored verbatim
    pub rrule: Option<String>,
    /// Added dates (RDATE): always produce an occurrence unless also excluded
    pub rdates: Option<Vec<DateTime<Utc>>>,
    /// Excluded dates (EXDATE): exact-instant matches are dropped
    pub exdates: Option<Vec<DateTime<Utc>>>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl EventDefinition {
    /// A definition with a rule is a series master.
    pub fn is_recurring(&self) -> bool {
        self.rrule.as_deref().is_some_and(|r| !r.trim().is_empty())
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn added_dates(&self) -> &[DateTime<Utc>] {
        self.rdates.as_deref().unwrap_or_default()
    }

    pub fn excluded_dates(&self) -> &[DateTime<Utc>] {
        self.exdates.as_deref().unwrap_or_default()
    }

    /// Case-insensitive match against title, description and location.
    pub fn matches_search(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        [
            Some(self.title.as_str()),
            self.description.as_deref(),
            self.location.as_deref(),
        ]
        .into_iter()
        .flatten()
        .any(|field| field.to_lowercase().contains(&needle))
    }
}

/// A participant attached when creating an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantDraft {
    pub name: String,
    pub email: String,
    pub role: String,
    /// "accepted", "declined", "tentative", "needs_action"
    pub response: String,
    pub comment: Option<String>,
}

/// A reminder attached when creating an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderDraft {
    /// "push", "email", "whatsapp", ...
    pub method: String,
    pub offset_minutes: i64,
    #[serde(default)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

/// Input of `create_event`.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub title: String,
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub all_day: bool,
    pub timezone: Option<String>,
    pub location: Option<String>,
    pub conference_url: Option<String>,
    pub category: Option<String>,
    pub priority: Option<Priority>,
    pub privacy: Option<Privacy>,
    pub status: Option<EventStatus>,
    pub color: Option<String>,
    /// Falls back to the owner's primary calendar
    pub calendar_id: Option<String>,
    pub rrule: Option<String>,
    pub rdates: Vec<DateTime<Utc>>,
    pub exdates: Vec<DateTime<Utc>>,
    pub participants: Vec<ParticipantDraft>,
    pub reminders: Vec<ReminderDraft>,
    pub resource_ids: Vec<String>,
}

impl EventDraft {
    pub fn new(title: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        EventDraft {
            title: title.into(),
            description: None,
            start,
            end,
            all_day: false,
            timezone: None,
            location: None,
            conference_url: None,
            category: None,
            priority: None,
            privacy: None,
            status: None,
            color: None,
            calendar_id: None,
            rrule: None,
            rdates: Vec::new(),
            exdates: Vec::new(),
            participants: Vec::new(),
            reminders: Vec::new(),
            resource_ids: Vec::new(),
        }
    }

    /// Resolve defaults and produce the row to insert.
    pub fn into_definition(
        self,
        id: String,
        owner: OwnerId,
        calendar_id: String,
        default_timezone: &str,
    ) -> EventDefinition {
        EventDefinition {
            id,
            calendar_id,
            owner,
            title: self.title,
            description: self.description,
            start: self.start,
            end: self.end,
            all_day: self.all_day,
            timezone: self
                .timezone
                .unwrap_or_else(|| default_timezone.to_string()),
            location: self.location,
            conference_url: self.conference_url,
            category: self.category,
            priority: self.priority.unwrap_or_default(),
            privacy: self.privacy.unwrap_or_default(),
            status: self.status.unwrap_or_default(),
            color: self.color,
            rrule: self.rrule,
            rdates: (!self.rdates.is_empty()).then_some(self.rdates),
            exdates: (!self.exdates.is_empty()).then_some(self.exdates),
            created_at: None,
            updated_at: None,
        }
    }
}

/// Partial update of an event. `None` leaves a field untouched; for nullable
/// columns `Some(None)` clears the value.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EventPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(rename = "start_ts", skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(rename = "end_ts", skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_day: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conference_url: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub privacy: Option<Privacy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<EventStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calendar_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rrule: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rdates: Option<Option<Vec<DateTime<Utc>>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exdates: Option<Option<Vec<DateTime<Utc>>>>,
}

impl EventPatch {
    /// The definition as it will look once the patch is applied.
    pub fn apply_to(&self, current: &EventDefinition) -> EventDefinition {
        let mut next = current.clone();
        if let Some(title) = &self.title {
            next.title = title.clone();
        }
        if let Some(description) = &self.description {
            next.description = description.clone();
        }
        if let Some(start) = self.start {
            next.start = start;
        }
        if let Some(end) = self.end {
            next.end = end;
        }
        if let Some(all_day) = self.all_day {
            next.all_day = all_day;
        }
        if let Some(timezone) = &self.timezone {
            next.timezone = timezone.clone();
        }
        if let Some(location) = &self.location {
            next.location = location.clone();
        }
        if let Some(conference_url) = &self.conference_url {
            next.conference_url = conference_url.clone();
        }
        if let Some(category) = &self.category {
            next.category = category.clone();
        }
        if let Some(priority) = self.priority {
            next.priority = priority;
        }
        if let Some(privacy) = self.privacy {
            next.privacy = privacy;
        }
        if let Some(status) = self.status {
            next.status = status;
        }
        if let Some(color) = &self.color {
            next.color = color.clone();
        }
        if let Some(calendar_id) = &self.calendar_id {
            next.calendar_id = calendar_id.clone();
        }
        if let Some(rrule) = &self.rrule {
            next.rrule = rrule.clone();
        }
        if let Some(rdates) = &self.rdates {
            next.rdates = rdates.clone();
        }
        if let Some(exdates) = &self.exdates {
            next.exdates = exdates.clone();
        }
        next
    }

    pub fn is_empty(&self) -> bool {
        *self == EventPatch::default()
    }
}
