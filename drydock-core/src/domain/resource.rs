//! Resource identity
//!
//! A resource is the unit of scheduling: every resource owns exactly one
//! worker and one pending-run slot.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a schedulable resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKey {
    /// A source repository, keyed by its URL
    Build(String),
    /// A mirrored image, keyed by its reference
    Mirror(String),
}

impl ResourceKey {
    /// The URL or image reference behind this key
    pub fn id(&self) -> &str {
        match self {
            ResourceKey::Build(id) | ResourceKey::Mirror(id) => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ResourceKey::Build(_) => "build",
            ResourceKey::Mirror(_) => "mirror",
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}
