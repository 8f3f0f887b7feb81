//! Utility functions for the lobby coordination service

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Separator between per-slot values of a multi-value report field
pub const MULTI_VALUE_SEPARATOR: char = ',';

/// Generate a new unique correlation ID for outbound messages
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Whether a wire value carries one value per slot
pub fn is_multi_value(value: &str) -> bool {
    value.contains(MULTI_VALUE_SEPARATOR)
}

/// Split a multi-value field into its per-slot values.
///
/// The wire format terminates every value with a separator, so the empty
/// element after the final separator is dropped: `"a,b,"` yields `["a", "b"]`.
pub fn split_multi_value(value: &str) -> Vec<&str> {
    let mut parts: Vec<&str> = value.split(MULTI_VALUE_SEPARATOR).collect();
    if parts.last().is_some_and(|last| last.is_empty()) {
        parts.pop();
    }
    parts
}
