//! Typed view of `report` command payloads
//!
//! Reports arrive as flat string maps. Per-player fields carry one
//! comma-terminated value per slot (`"won,defeated,"`). The payload is
//! parsed once here into a [`ReportSubmission`], and a completed match is
//! expanded into a player-keyed [`ExpandedReport`].

use crate::error::{LobbyError, Result};
use crate::types::{ClientId, Fields, MatchId, PlayerId, PlayerState};
use crate::utils::{is_multi_value, split_multi_value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Slot index of the submitting client (1-based); stripped before storage
pub const PLAYER_ID_FIELD: &str = "playerID";
pub const MATCH_ID_FIELD: &str = "matchID";
/// Per-player end state; always multi-valued, defines the expected slot count
pub const PLAYER_STATES_FIELD: &str = "playerStates";
pub const MAP_NAME_FIELD: &str = "mapName";
pub const DURATION_FIELD: &str = "duration";
pub const TEAMS_LOCKED_FIELD: &str = "teamsLocked";

/// One client's view of a finished match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSubmission {
    pub submitter: ClientId,
    pub match_id: MatchId,
    pub slot: u32,
    pub report: RawReport,
}

impl ReportSubmission {
    /// Parse a `report` command sent by `submitter`
    pub fn from_fields(submitter: &str, fields: &Fields) -> Result<Self> {
        let match_id = fields
            .get(MATCH_ID_FIELD)
            .map(|id| id.trim())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| LobbyError::MalformedCommand {
                command: "report".to_string(),
                reason: format!("missing '{}' field", MATCH_ID_FIELD),
            })?
            .to_string();

        let raw_slot = fields
            .get(PLAYER_ID_FIELD)
            .ok_or_else(|| LobbyError::MalformedReport {
                match_id: match_id.clone(),
                reason: format!("missing '{}' field", PLAYER_ID_FIELD),
            })?;

        let slot = raw_slot
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|slot| *slot >= 1)
            .ok_or_else(|| LobbyError::MalformedReport {
                match_id: match_id.clone(),
                reason: format!("'{}' is not a slot index: {:?}", PLAYER_ID_FIELD, raw_slot),
            })?;

        let mut report_fields = fields.clone();
        report_fields.remove(PLAYER_ID_FIELD);
        let report = RawReport::new(report_fields);

        // Validates the slot-count carrying field up front
        report.expected_players(&match_id)?;

        Ok(Self {
            submitter: submitter.to_string(),
            match_id,
            slot,
            report,
        })
    }
}

/// Report payload with the submitter-identifying field removed
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawReport {
    fields: Fields,
}

impl RawReport {
    pub fn new(fields: Fields) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Number of participants, taken from the `playerStates` value count
    pub fn expected_players(&self, match_id: &str) -> Result<usize> {
        let states = self
            .get(PLAYER_STATES_FIELD)
            .ok_or_else(|| LobbyError::MalformedReport {
                match_id: match_id.to_string(),
                reason: format!("missing '{}' field", PLAYER_STATES_FIELD),
            })?;

        let count = split_multi_value(states).len();
        if count == 0 {
            return Err(LobbyError::MalformedReport {
                match_id: match_id.to_string(),
                reason: format!("'{}' lists no players", PLAYER_STATES_FIELD),
            }
            .into());
        }

        Ok(count)
    }

    /// Field-level differences between `self` (the baseline) and `other`
    pub fn diff(&self, other: &RawReport) -> Vec<FieldDiff> {
        let keys: BTreeSet<&String> = self.fields.keys().chain(other.fields.keys()).collect();

        keys.into_iter()
            .filter_map(|key| {
                let baseline = self.fields.get(key);
                let submitted = other.fields.get(key);
                (baseline != submitted).then(|| FieldDiff {
                    field: key.clone(),
                    baseline: baseline.cloned(),
                    submitted: submitted.cloned(),
                })
            })
            .collect()
    }
}

/// One differing field between two reports of the same match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDiff {
    pub field: String,
    pub baseline: Option<String>,
    pub submitted: Option<String>,
}

impl fmt::Display for FieldDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |value: &Option<String>| match value {
            Some(value) => format!("{:?}", value),
            None => "<absent>".to_string(),
        };
        write!(
            f,
            "{}: {} -> {}",
            self.field,
            show(&self.baseline),
            show(&self.submitted)
        )
    }
}

/// Render a diff list on one line for logs and errors
pub fn format_diff(diff: &[FieldDiff]) -> String {
    diff.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Per-participant slice of a finalized report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerReport {
    pub slot: u32,
    pub state: PlayerState,
    /// Every other per-player field, carried opaquely
    pub stats: Fields,
}

/// Finalized, player-keyed report of one match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpandedReport {
    pub match_id: MatchId,
    /// Single-valued fields shared by every participant
    pub scalars: Fields,
    pub players: BTreeMap<PlayerId, PlayerReport>,
}

impl ExpandedReport {
    /// Split every multi-value field of `report` and pair the values with
    /// the submitters occupying each slot
    pub fn expand(
        match_id: &str,
        report: &RawReport,
        slots: &BTreeMap<u32, ClientId>,
    ) -> Result<Self> {
        let expected = report.expected_players(match_id)?;
        if slots.len() != expected {
            return Err(LobbyError::MalformedReport {
                match_id: match_id.to_string(),
                reason: format!("{} of {} slots filled", slots.len(), expected),
            }
            .into());
        }

        let mut scalars = Fields::new();
        let mut per_player: BTreeMap<u32, PlayerReport> = slots
            .keys()
            .map(|slot| {
                (
                    *slot,
                    PlayerReport {
                        slot: *slot,
                        state: PlayerState::Unknown(String::new()),
                        stats: Fields::new(),
                    },
                )
            })
            .collect();

        for (key, value) in report.fields() {
            if key == PLAYER_STATES_FIELD || is_multi_value(value) {
                let values = split_multi_value(value);
                if values.len() != expected {
                    return Err(LobbyError::MalformedReport {
                        match_id: match_id.to_string(),
                        reason: format!(
                            "field '{}' has {} values for {} players",
                            key,
                            values.len(),
                            expected
                        ),
                    }
                    .into());
                }

                for (index, value) in values.into_iter().enumerate() {
                    let slot = index as u32 + 1;
                    let Some(player) = per_player.get_mut(&slot) else {
                        return Err(LobbyError::MalformedReport {
                            match_id: match_id.to_string(),
                            reason: format!("slot {} has no submitter", slot),
                        }
                        .into());
                    };
                    if key == PLAYER_STATES_FIELD {
                        player.state = PlayerState::parse(value);
                    } else {
                        player.stats.insert(key.clone(), value.to_string());
                    }
                }
            } else {
                scalars.insert(key.clone(), value.clone());
            }
        }

        let players = slots
            .iter()
            .filter_map(|(slot, submitter)| {
                per_player
                    .remove(slot)
                    .map(|player| (submitter.clone(), player))
            })
            .collect();

        Ok(Self {
            match_id: match_id.to_string(),
            scalars,
            players,
        })
    }

    pub fn map_name(&self) -> &str {
        self.scalars
            .get(MAP_NAME_FIELD)
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Match duration in seconds; absent or unparsable values count as zero
    pub fn duration_secs(&self) -> u64 {
        self.scalars
            .get(DURATION_FIELD)
            .and_then(|d| d.trim().parse().ok())
            .unwrap_or(0)
    }

    pub fn teams_locked(&self) -> bool {
        self.scalars
            .get(TEAMS_LOCKED_FIELD)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    /// Participants ordered by slot
    pub fn participants(&self) -> Vec<PlayerId> {
        let mut by_slot: Vec<(&u32, &PlayerId)> = self
            .players
            .iter()
            .map(|(id, report)| (&report.slot, id))
            .collect();
        by_slot.sort();
        by_slot.into_iter().map(|(_, id)| id.clone()).collect()
    }

    /// Participants flagged as winners
    pub fn winners(&self) -> Vec<PlayerId> {
        self.participants()
            .into_iter()
            .filter(|id| {
                self.players
                    .get(id)
                    .is_some_and(|report| report.state == PlayerState::Won)
            })
            .collect()
    }

    /// Whether any participant is still playing
    pub fn has_active_player(&self) -> bool {
        self.players
            .values()
            .any(|report| report.state == PlayerState::Active)
    }
}
