//! Multi-client report reconciliation
//!
//! Every participant of a match submits its own copy of the end-of-game
//! report. The first copy seen for a match id becomes the baseline; later
//! copies must match it field for field (apart from the stripped slot
//! index) and fill a free slot. Once every slot is filled the report is
//! expanded and handed out exactly once.

use crate::bounded_store::BoundedStore;
use crate::error::{LobbyError, Result};
use crate::report::parsing::{format_diff, ExpandedReport, RawReport, ReportSubmission};
use crate::types::{ClientId, MatchId};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

/// Reports collected so far for one match
#[derive(Debug, Clone)]
pub struct PendingMatch {
    pub baseline: RawReport,
    pub slots: BTreeMap<u32, ClientId>,
    pub expected_players: usize,
    pub first_seen: DateTime<Utc>,
}

impl PendingMatch {
    pub fn filled_slots(&self) -> usize {
        self.slots.len()
    }
}

/// Result of an accepted submission
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// Waiting for more participants
    Pending { filled: usize, expected: usize },
    /// Every slot filled; the match left the pending table
    Finalized(ExpandedReport),
}

/// Counters kept by the reconciler
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilerStats {
    pub accepted: u64,
    pub finalized: u64,
    pub conflicts: u64,
    pub duplicates: u64,
    pub malformed: u64,
    /// Pending matches dropped to make room for newer ones
    pub evicted: u64,
}

/// Assembles per-player reports into one authoritative report per match
#[derive(Debug)]
pub struct ReportReconciler {
    pending: BoundedStore<MatchId, PendingMatch>,
    stats: ReconcilerStats,
}

impl ReportReconciler {
    /// Create a reconciler tracking at most `max_pending` unfinished matches
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: BoundedStore::new(max_pending),
            stats: ReconcilerStats::default(),
        }
    }

    /// Record one submission.
    ///
    /// Conflicting reports, already-filled slots and malformed payloads are
    /// returned as errors and leave the pending match untouched.
    pub fn submit(&mut self, submission: ReportSubmission) -> Result<ReconcileOutcome> {
        let ReportSubmission {
            submitter,
            match_id,
            slot,
            report,
        } = submission;

        if !self.pending.contains_key(&match_id) {
            return self.open_match(submitter, match_id, slot, report);
        }

        let Some(pending) = self.pending.get_mut(&match_id) else {
            return Err(LobbyError::InternalError {
                message: format!("pending match '{}' vanished", match_id),
            }
            .into());
        };

        let diff = pending.baseline.diff(&report);
        if !diff.is_empty() {
            self.stats.conflicts += 1;
            let diff = format_diff(&diff);
            warn!(
                "Conflicting report for match '{}' from '{}' (slot {}), discarded: {}",
                match_id, submitter, slot, diff
            );
            return Err(LobbyError::ConflictingReport { match_id, diff }.into());
        }

        if slot as usize > pending.expected_players {
            self.stats.malformed += 1;
            warn!(
                "Report for match '{}' from '{}' names slot {} of {}",
                match_id, submitter, slot, pending.expected_players
            );
            return Err(LobbyError::MalformedReport {
                match_id,
                reason: format!("slot {} outside 1..={}", slot, pending.expected_players),
            }
            .into());
        }

        if let Some(owner) = pending.slots.get(&slot) {
            self.stats.duplicates += 1;
            warn!(
                "Duplicate report for match '{}' slot {} from '{}' (slot held by '{}'), discarded",
                match_id, slot, submitter, owner
            );
            return Err(LobbyError::DuplicateSlot { match_id, slot }.into());
        }

        if let Some((held, _)) = pending.slots.iter().find(|(_, owner)| **owner == submitter) {
            let held = *held;
            self.stats.duplicates += 1;
            warn!(
                "'{}' already reported match '{}' as slot {}, slot {} discarded",
                submitter, match_id, held, slot
            );
            return Err(LobbyError::DuplicateSlot { match_id, slot }.into());
        }

        pending.slots.insert(slot, submitter);
        self.stats.accepted += 1;

        let filled = pending.filled_slots();
        let expected = pending.expected_players;

        if filled > expected {
            error!(
                "Match '{}' has {} filled slots but only {} players, left pending",
                match_id, filled, expected
            );
            return Ok(ReconcileOutcome::Pending { filled, expected });
        }

        if filled < expected {
            debug!(
                "Match '{}' pending - {}/{} reports",
                match_id, filled, expected
            );
            return Ok(ReconcileOutcome::Pending { filled, expected });
        }

        self.finalize(&match_id)
    }

    fn open_match(
        &mut self,
        submitter: ClientId,
        match_id: MatchId,
        slot: u32,
        report: RawReport,
    ) -> Result<ReconcileOutcome> {
        let expected = match report.expected_players(&match_id) {
            Ok(expected) => expected,
            Err(e) => {
                self.stats.malformed += 1;
                warn!("Report for match '{}' from '{}' rejected: {}", match_id, submitter, e);
                return Err(e);
            }
        };

        if slot as usize > expected {
            self.stats.malformed += 1;
            warn!(
                "Report for match '{}' from '{}' names slot {} of {}",
                match_id, submitter, slot, expected
            );
            return Err(LobbyError::MalformedReport {
                match_id,
                reason: format!("slot {} outside 1..={}", slot, expected),
            }
            .into());
        }

        debug!(
            "Opening pending match '{}' - slot {} from '{}', {} players expected",
            match_id, slot, submitter, expected
        );

        let pending = PendingMatch {
            baseline: report,
            slots: BTreeMap::from([(slot, submitter)]),
            expected_players: expected,
            first_seen: Utc::now(),
        };

        if let Some((evicted_id, evicted)) = self.pending.insert(match_id.clone(), pending) {
            self.stats.evicted += 1;
            warn!(
                "Pending match table full ({}), dropped match '{}' with {}/{} reports",
                self.pending.capacity(),
                evicted_id,
                evicted.filled_slots(),
                evicted.expected_players
            );
        }
        self.stats.accepted += 1;

        if expected == 1 {
            return self.finalize(&match_id);
        }

        Ok(ReconcileOutcome::Pending {
            filled: 1,
            expected,
        })
    }

    fn finalize(&mut self, match_id: &MatchId) -> Result<ReconcileOutcome> {
        let Some(pending) = self.pending.remove(match_id) else {
            return Err(LobbyError::InternalError {
                message: format!("pending match '{}' vanished before finalize", match_id),
            }
            .into());
        };

        match ExpandedReport::expand(match_id, &pending.baseline, &pending.slots) {
            Ok(expanded) => {
                self.stats.finalized += 1;
                info!(
                    "Match '{}' finalized with {} reports",
                    match_id,
                    expanded.players.len()
                );
                Ok(ReconcileOutcome::Finalized(expanded))
            }
            Err(e) => {
                self.stats.malformed += 1;
                error!("Match '{}' could not be finalized and was dropped: {}", match_id, e);
                Err(e)
            }
        }
    }

    /// Filled slot count of a pending match
    pub fn filled_slots(&self, match_id: &str) -> Option<usize> {
        self.pending
            .get(&match_id.to_string())
            .map(PendingMatch::filled_slots)
    }

    pub fn is_pending(&self, match_id: &str) -> bool {
        self.pending.contains_key(&match_id.to_string())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> &ReconcilerStats {
        &self.stats
    }
}
