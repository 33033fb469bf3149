use std::fmt;

use serde::{Deserialize, Serialize};

use crate::owner::OwnerId;

/// The entity kinds held in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Calendars,
    Events,
    Resources,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Calendars => "calendars",
            EntityKind::Events => "events",
            EntityKind::Resources => "resources",
        }
    }
}

/// Identifies one cacheable result set: owner, entity kind and the query
/// parameters (window, filters) flattened into a stable descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub owner: OwnerId,
    pub kind: EntityKind,
    pub descriptor: String,
}

impl CacheKey {
    pub fn new(owner: OwnerId, kind: EntityKind, descriptor: impl Into<String>) -> Self {
        CacheKey {
            owner,
            kind,
            descriptor: descriptor.into(),
        }
    }

    pub fn has_prefix(&self, prefix: &KeyPrefix) -> bool {
        self.owner == prefix.owner && prefix.kind.is_none_or(|kind| kind == self.kind)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.descriptor.is_empty() {
            write!(f, "{}/{}", self.owner, self.kind.as_str())
        } else {
            write!(f, "{}/{}/{}", self.owner, self.kind.as_str(), self.descriptor)
        }
    }
}

/// Leading part of a cache key. `kind: None` covers every kind of the owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPrefix {
    pub owner: OwnerId,
    pub kind: Option<EntityKind>,
}

impl KeyPrefix {
    pub fn kind(owner: OwnerId, kind: EntityKind) -> Self {
        KeyPrefix {
            owner,
            kind: Some(kind),
        }
    }

    pub fn owner(owner: OwnerId) -> Self {
        KeyPrefix { owner, kind: None }
    }
}

impl fmt::Display for KeyPrefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            Some(kind) => write!(f, "{}/{}/*", self.owner, kind.as_str()),
            None => write!(f, "{}/*", self.owner),
        }
    }
}
