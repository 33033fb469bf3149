use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::owner::OwnerId;

/// A schedulable asset (room, equipment), linked to events through `event_resources`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub owner: OwnerId,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub capacity: Option<u32>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Resource {
    /// Listing order: by type, then by name.
    pub fn listing_order(a: &Resource, b: &Resource) -> Ordering {
        a.kind.cmp(&b.kind).then_with(|| a.name.cmp(&b.name))
    }
}
