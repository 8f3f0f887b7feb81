//! Match persistence and ELO-style rating
//!
//! This module provides the rating formula, the match/player storage
//! interface with in-memory and SQLite implementations, and the engine
//! that records finalized matches and rates 1v1 games.

pub mod calculator;
pub mod engine;
pub mod sqlite;
pub mod storage;

// Re-export commonly used types
pub use calculator::{EloCalculator, MatchResult};
pub use engine::{GameOutcome, RatedGame, RatingEngine, UnratedReason};
pub use sqlite::SqliteMatchStore;
pub use storage::{InMemoryMatchStore, MatchRecord, MatchStore, ParticipantRecord, PlayerRecord};
