//! Lobby coordination
//!
//! The coordinator is the single owner of the registry, reconciler, rating
//! engine and presence roster, and turns inbound events into outbound ones.

pub mod actor;
pub mod commands;
pub mod roster;

pub use actor::{Coordinator, CoordinatorHandle, CoordinatorStats, PROFILE_PLAYER_FIELD};
pub use commands::CommandKind;
pub use roster::PresenceRoster;
