//! Lobby Ledger - coordination service for a multiplayer game lobby
//!
//! This crate keeps the list of hosted games, reconciles the end-of-match
//! reports sent by every participant into one authoritative record, and
//! maintains ELO-style ratings, all driven by AMQP messages.

pub mod amqp;
pub mod bounded_store;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod rating;
pub mod registry;
pub mod report;
pub mod service;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{LobbyError, Result};
pub use types::*;

// Re-export key components
pub use amqp::publisher::EventPublisher;
pub use bounded_store::BoundedStore;
pub use coordinator::{Coordinator, CoordinatorHandle};
pub use rating::RatingEngine;
pub use registry::GameRegistry;
pub use report::ReportReconciler;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
