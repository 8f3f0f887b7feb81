//! Game registry for hosted lobby games
//!
//! This module tracks one listing per hosting client and owns the
//! init -> waiting/running listing state machine.

pub mod listing;
pub mod manager;

// Re-export commonly used types
pub use listing::{Listing, ListingPayload, ListingState};
pub use manager::{GameRegistry, RegistryStats};
