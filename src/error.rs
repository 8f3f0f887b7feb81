//! Error types for the lobby coordination service
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the application. Domain failures are raised as [`LobbyError`] so
//! callers can downcast and branch on the specific case.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific lobby scenarios
#[derive(Debug, thiserror::Error)]
pub enum LobbyError {
    #[error("Malformed command '{command}': {reason}")]
    MalformedCommand { command: String, reason: String },

    #[error("Malformed report for match {match_id}: {reason}")]
    MalformedReport { match_id: String, reason: String },

    #[error("Listing not found for host: {host}")]
    ListingNotFound { host: String },

    #[error("Report for match {match_id} conflicts with the stored report: {diff}")]
    ConflictingReport { match_id: String, diff: String },

    #[error("Slot {slot} of match {match_id} was already reported")]
    DuplicateSlot { match_id: String, slot: u32 },

    #[error("Rating out of supported range: rating {rating}, opponent rating {opponent_rating}")]
    RatingOutOfRange { rating: i32, opponent_rating: i32 },

    #[error("Match {match_id} was already recorded")]
    DuplicateMatch { match_id: String },

    #[error("Player not found: {player_id}")]
    PlayerNotFound { player_id: String },

    #[error("Storage error: {message}")]
    StorageError { message: String },

    #[error("Failed to publish {event}: {message}")]
    PublishFailed { event: String, message: String },

    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl From<rusqlite::Error> for LobbyError {
    fn from(e: rusqlite::Error) -> Self {
        LobbyError::StorageError {
            message: e.to_string(),
        }
    }
}
