use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AgendaError, AgendaResult};

/// Identifier of the user that owns calendars, events and resources.
/// Every query and cache key is partitioned by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    /// An empty identifier means there is no authenticated session.
    pub fn new(id: impl Into<String>) -> AgendaResult<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(AgendaError::AuthExpired);
        }
        Ok(OwnerId(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
