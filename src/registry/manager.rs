//! Game registry holding one listing per hosting client
//!
//! Listings live in a [`BoundedStore`], so registering beyond capacity
//! silently drops the oldest listing. Malformed payloads are rejected with
//! an error and a log entry; they never mutate the registry.

use crate::bounded_store::BoundedStore;
use crate::error::{LobbyError, Result};
use crate::registry::listing::{Listing, ListingPayload, ListingState};
use crate::types::{ClientId, Fields};
use tracing::{debug, info, warn};

/// Statistics about registry operations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Listings successfully registered (including replacements)
    pub registered: u64,
    /// Listings removed through unregister
    pub unregistered: u64,
    /// Listings dropped to make room for newer ones
    pub evicted: u64,
    /// Accepted state change reports
    pub state_changes: u64,
    /// Rejected register / changestate payloads
    pub rejected: u64,
}

/// In-memory registry of open game listings
#[derive(Debug)]
pub struct GameRegistry {
    listings: BoundedStore<ClientId, Listing>,
    stats: RegistryStats,
}

impl GameRegistry {
    /// Create a registry holding at most `max_listings` listings
    pub fn new(max_listings: usize) -> Self {
        Self {
            listings: BoundedStore::new(max_listings),
            stats: RegistryStats::default(),
        }
    }

    /// Add or replace the listing hosted by `host`
    pub fn register(&mut self, host: &str, fields: &Fields) -> Result<()> {
        let payload = match ListingPayload::from_fields("register", fields) {
            Ok(payload) => payload,
            Err(e) => {
                self.stats.rejected += 1;
                warn!("Rejected listing registration from '{}': {}", host, e);
                return Err(e);
            }
        };

        info!(
            "Registering listing - host: '{}', players: {:?}, nbp: {}",
            host, payload.players, payload.nbp
        );

        let listing = Listing::new(host.to_string(), payload);
        if let Some((evicted_host, _)) = self.listings.insert(host.to_string(), listing) {
            self.stats.evicted += 1;
            warn!(
                "Registry at capacity ({}), evicted oldest listing hosted by '{}'",
                self.listings.capacity(),
                evicted_host
            );
        }

        self.stats.registered += 1;
        Ok(())
    }

    /// Remove the listing hosted by `host`; returns whether one existed
    pub fn unregister(&mut self, host: &str) -> bool {
        let removed = self.listings.remove(&host.to_string()).is_some();
        if removed {
            self.stats.unregistered += 1;
            info!("Unregistered listing hosted by '{}'", host);
        } else {
            debug!("Unregister for '{}' ignored - no listing", host);
        }
        removed
    }

    /// Update the state of the listing hosted by `host`
    pub fn change_state(&mut self, host: &str, fields: &Fields) -> Result<ListingState> {
        let Some(listing) = self.listings.get_mut(&host.to_string()) else {
            self.stats.rejected += 1;
            debug!("State change from '{}' ignored - no listing", host);
            return Err(LobbyError::ListingNotFound {
                host: host.to_string(),
            }
            .into());
        };

        let payload = match ListingPayload::from_fields("changestate", fields) {
            Ok(payload) => payload,
            Err(e) => {
                self.stats.rejected += 1;
                warn!("Rejected state change from '{}': {}", host, e);
                return Err(e);
            }
        };

        let previous = listing.state;
        let state = listing.apply_state_change(payload);
        self.stats.state_changes += 1;

        info!(
            "Listing state change - host: '{}', {} -> {}, nbp: {}/{}",
            host, previous, state, listing.nbp, listing.nbp_init
        );

        Ok(state)
    }

    /// Read-only snapshot of all listings, oldest first
    pub fn list_all(&self) -> Vec<Listing> {
        self.listings.snapshot()
    }

    pub fn get(&self, host: &str) -> Option<&Listing> {
        self.listings.get(&host.to_string())
    }

    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }

    pub fn stats(&self) -> &RegistryStats {
        &self.stats
    }
}
