//! Capacity limits of the in-memory registries

use serde::{Deserialize, Serialize};

/// Bounds of the game registry and the pending report table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Open listings kept before the oldest is evicted
    pub max_listings: usize,
    /// Unfinished matches kept before the oldest is evicted
    pub max_pending_matches: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_listings: 128,
            max_pending_matches: 4096,
        }
    }
}
