//! End-of-match report handling
//!
//! Parsing of the `report` wire payload and the reconciliation of the
//! per-participant copies into a single finalized report.

pub mod parsing;
pub mod reconciler;

pub use parsing::{ExpandedReport, FieldDiff, PlayerReport, RawReport, ReportSubmission};
pub use reconciler::{PendingMatch, ReconcileOutcome, ReconcilerStats, ReportReconciler};

use crate::error::LobbyError;

/// Metrics label for a rejected report
pub fn rejection_reason(error: &anyhow::Error) -> &'static str {
    match error.downcast_ref::<LobbyError>() {
        Some(LobbyError::ConflictingReport { .. }) => "conflict",
        Some(LobbyError::DuplicateSlot { .. }) => "duplicate_slot",
        Some(LobbyError::MalformedReport { .. }) | Some(LobbyError::MalformedCommand { .. }) => {
            "malformed"
        }
        _ => "internal",
    }
}
