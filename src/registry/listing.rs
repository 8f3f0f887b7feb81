//! Listing record and its lifecycle state machine
//!
//! A listing starts in [`ListingState::Init`] when registered. Every
//! subsequent state change compares the player count reported at
//! registration against the current count: a drop means players left a
//! game that has not launched yet (`Waiting`), anything else means the
//! game is underway (`Running`).

use crate::error::{LobbyError, Result};
use crate::types::{ClientId, Fields};
use crate::utils::current_timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Field names owned by the listing itself; never copied into attributes
const RESERVED_FIELDS: &[&str] = &[
    "host",
    "players",
    "nbp",
    "players-init",
    "nbp-init",
    "state",
    "startTime",
];

/// Possible states of a listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingState {
    /// Registered, no state change reported yet
    Init,
    /// Fewer players than at registration
    Waiting,
    /// Game in progress
    Running,
}

impl std::fmt::Display for ListingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListingState::Init => write!(f, "init"),
            ListingState::Waiting => write!(f, "waiting"),
            ListingState::Running => write!(f, "running"),
        }
    }
}

/// Typed view of a `register` / `changestate` payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingPayload {
    /// Roster as sent by the host (separator-terminated names)
    pub players: String,
    /// Reported player count
    pub nbp: u32,
    /// Every other attribute of the payload, carried opaquely
    pub attributes: Fields,
}

impl ListingPayload {
    /// Parse the raw command fields; `players` and a numeric `nbp` are required
    pub fn from_fields(command: &str, fields: &Fields) -> Result<Self> {
        let players = fields
            .get("players")
            .ok_or_else(|| LobbyError::MalformedCommand {
                command: command.to_string(),
                reason: "missing 'players' field".to_string(),
            })?
            .clone();

        let nbp_raw = fields.get("nbp").ok_or_else(|| LobbyError::MalformedCommand {
            command: command.to_string(),
            reason: "missing 'nbp' field".to_string(),
        })?;

        let nbp = nbp_raw
            .trim()
            .parse::<u32>()
            .map_err(|_| LobbyError::MalformedCommand {
                command: command.to_string(),
                reason: format!("'nbp' is not a player count: {:?}", nbp_raw),
            })?;

        let attributes = fields
            .iter()
            .filter(|(key, _)| !RESERVED_FIELDS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Ok(Self {
            players,
            nbp,
            attributes,
        })
    }
}

/// Live record of one hosted game session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub host: ClientId,
    pub players: String,
    pub nbp: u32,
    #[serde(rename = "players-init")]
    pub players_init: String,
    #[serde(rename = "nbp-init")]
    pub nbp_init: u32,
    pub state: ListingState,
    #[serde(rename = "startTime", skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub attributes: Fields,
}

impl Listing {
    /// Create a freshly registered listing; the payload becomes the baseline
    pub fn new(host: ClientId, payload: ListingPayload) -> Self {
        Self {
            host,
            players_init: payload.players.clone(),
            nbp_init: payload.nbp,
            players: payload.players,
            nbp: payload.nbp,
            state: ListingState::Init,
            start_time: None,
            attributes: payload.attributes,
        }
    }

    /// Apply a state change report and return the resulting state.
    ///
    /// The start time is stamped on the first change only.
    pub fn apply_state_change(&mut self, payload: ListingPayload) -> ListingState {
        self.state = if self.nbp_init > payload.nbp {
            ListingState::Waiting
        } else {
            ListingState::Running
        };
        self.nbp = payload.nbp;
        self.players = payload.players;

        if self.start_time.is_none() {
            self.start_time = Some(current_timestamp());
        }

        self.state
    }
}
