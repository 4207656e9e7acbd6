//! Run tags identifying one top-level invocation.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifies the invocation a value belongs to as it travels through a pipeline.
///
/// Every value carries the tag of the `run` that produced it. Values that leave
/// the main path (forks, splits, interceptors, failure handlers) are marked
/// detached: they keep the run id for correlation but can no longer settle the
/// caller's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunTag {
    id: Uuid,
    detached: bool,
}

impl RunTag {
    /// Creates a main-path tag for a fresh invocation.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            detached: false,
        }
    }

    /// Returns the invocation id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns true if the value has left the main path.
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.detached
    }

    /// Returns the same tag marked as detached.
    #[must_use]
    pub fn detach(self) -> Self {
        Self {
            id: self.id,
            detached: true,
        }
    }
}

impl Default for RunTag {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.detached {
            write!(f, "{}~", self.id)
        } else {
            write!(f, "{}", self.id)
        }
    }
}
