//! Match and player storage interface and in-memory implementation
//!
//! Players are created on first contact and never deleted. Matches are
//! written once and never modified. Game and win counts are derived from
//! the match history rather than stored on the player.

use crate::error::{LobbyError, Result};
use crate::report::ExpandedReport;
use crate::types::{Fields, MatchId, PlayerId, PlayerState, UNRATED};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Durable player row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub id: PlayerId,
    /// Current rating, [`UNRATED`] until the first rated outcome
    pub rating: i32,
    pub highest_rating: Option<i32>,
}

impl PlayerRecord {
    /// Create a player that has never played a rated match
    pub fn new(id: PlayerId) -> Self {
        Self {
            id,
            rating: UNRATED,
            highest_rating: None,
        }
    }

    pub fn is_rated(&self) -> bool {
        self.rating != UNRATED
    }

    /// Rating as seen by clients
    pub fn visible_rating(&self) -> Option<i32> {
        self.is_rated().then_some(self.rating)
    }
}

/// One participant's row of a recorded match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub player_id: PlayerId,
    pub slot: u32,
    pub state: PlayerState,
    /// Opaque per-player statistics
    pub stats: Fields,
}

/// Immutable record of a played match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub match_id: MatchId,
    pub map_name: String,
    pub duration_secs: u64,
    pub teams_locked: bool,
    /// Participants ordered by slot
    pub participants: Vec<ParticipantRecord>,
    pub winner: Option<PlayerId>,
    pub recorded_at: DateTime<Utc>,
}

impl MatchRecord {
    /// Build the record of a finalized report.
    ///
    /// The winner is set only when exactly one participant is flagged as won.
    pub fn from_report(report: &ExpandedReport) -> Self {
        let participants = report
            .participants()
            .into_iter()
            .filter_map(|player_id| {
                report.players.get(&player_id).map(|player| ParticipantRecord {
                    player_id: player_id.clone(),
                    slot: player.slot,
                    state: player.state.clone(),
                    stats: player.stats.clone(),
                })
            })
            .collect();

        let winners = report.winners();
        let winner = match winners.as_slice() {
            [single] => Some(single.clone()),
            _ => None,
        };

        Self {
            match_id: report.match_id.clone(),
            map_name: report.map_name().to_string(),
            duration_secs: report.duration_secs(),
            teams_locked: report.teams_locked(),
            participants,
            winner,
            recorded_at: Utc::now(),
        }
    }

    pub fn has_participant(&self, player_id: &str) -> bool {
        self.participants.iter().any(|p| p.player_id == player_id)
    }
}

/// Trait for player and match persistence
#[cfg_attr(test, mockall::automock)]
pub trait MatchStore: Send + Sync {
    /// Fetch a player, creating an unrated row on first contact
    fn get_or_create_player(&self, player_id: &str) -> Result<PlayerRecord>;

    /// Fetch a player without creating it
    fn get_player(&self, player_id: &str) -> Result<Option<PlayerRecord>>;

    /// Persist a match; fails with `DuplicateMatch` for a known match id
    fn insert_match(&self, record: &MatchRecord) -> Result<()>;

    /// Fetch a recorded match
    fn get_match(&self, match_id: &str) -> Result<Option<MatchRecord>>;

    /// Store rating changes of several players at once
    fn update_players(&self, players: &[PlayerRecord]) -> Result<()>;

    /// Matches the player took part in
    fn games_played(&self, player_id: &str) -> Result<u64>;

    /// Matches the player won
    fn wins(&self, player_id: &str) -> Result<u64>;

    /// Rated players, rating descending, ties by identity
    fn top_rated(&self, limit: usize) -> Result<Vec<PlayerRecord>>;

    /// Number of rated players rated at least `rating`
    fn rank_of(&self, rating: i32) -> Result<u64>;

    /// Total recorded matches
    fn match_count(&self) -> Result<u64>;
}

#[derive(Debug, Default)]
struct InMemoryState {
    players: HashMap<PlayerId, PlayerRecord>,
    matches: Vec<MatchRecord>,
    match_index: HashMap<MatchId, usize>,
}

/// In-memory store for tests and deployments without a database
#[derive(Debug, Default)]
pub struct InMemoryMatchStore {
    state: RwLock<InMemoryState>,
}

impl InMemoryMatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, InMemoryState>> {
        self.state.read().map_err(|_| {
            LobbyError::InternalError {
                message: "Failed to acquire match store read lock".to_string(),
            }
            .into()
        })
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, InMemoryState>> {
        self.state.write().map_err(|_| {
            LobbyError::InternalError {
                message: "Failed to acquire match store write lock".to_string(),
            }
            .into()
        })
    }
}

impl MatchStore for InMemoryMatchStore {
    fn get_or_create_player(&self, player_id: &str) -> Result<PlayerRecord> {
        let mut state = self.write()?;
        Ok(state
            .players
            .entry(player_id.to_string())
            .or_insert_with(|| PlayerRecord::new(player_id.to_string()))
            .clone())
    }

    fn get_player(&self, player_id: &str) -> Result<Option<PlayerRecord>> {
        Ok(self.read()?.players.get(player_id).cloned())
    }

    fn insert_match(&self, record: &MatchRecord) -> Result<()> {
        let mut state = self.write()?;

        if state.match_index.contains_key(&record.match_id) {
            return Err(LobbyError::DuplicateMatch {
                match_id: record.match_id.clone(),
            }
            .into());
        }

        for participant in &record.participants {
            state
                .players
                .entry(participant.player_id.clone())
                .or_insert_with(|| PlayerRecord::new(participant.player_id.clone()));
        }

        let index = state.matches.len();
        state.matches.push(record.clone());
        state.match_index.insert(record.match_id.clone(), index);
        Ok(())
    }

    fn get_match(&self, match_id: &str) -> Result<Option<MatchRecord>> {
        let state = self.read()?;
        Ok(state
            .match_index
            .get(match_id)
            .and_then(|index| state.matches.get(*index))
            .cloned())
    }

    fn update_players(&self, players: &[PlayerRecord]) -> Result<()> {
        let mut state = self.write()?;

        if let Some(missing) = players.iter().find(|p| !state.players.contains_key(&p.id)) {
            return Err(LobbyError::PlayerNotFound {
                player_id: missing.id.clone(),
            }
            .into());
        }

        for player in players {
            state.players.insert(player.id.clone(), player.clone());
        }
        Ok(())
    }

    fn games_played(&self, player_id: &str) -> Result<u64> {
        let state = self.read()?;
        Ok(state
            .matches
            .iter()
            .filter(|m| m.has_participant(player_id))
            .count() as u64)
    }

    fn wins(&self, player_id: &str) -> Result<u64> {
        let state = self.read()?;
        Ok(state
            .matches
            .iter()
            .filter(|m| m.winner.as_deref() == Some(player_id))
            .count() as u64)
    }

    fn top_rated(&self, limit: usize) -> Result<Vec<PlayerRecord>> {
        let state = self.read()?;
        let mut rated: Vec<PlayerRecord> = state
            .players
            .values()
            .filter(|p| p.is_rated())
            .cloned()
            .collect();

        rated.sort_by(|a, b| b.rating.cmp(&a.rating).then_with(|| a.id.cmp(&b.id)));
        rated.truncate(limit);
        Ok(rated)
    }

    fn rank_of(&self, rating: i32) -> Result<u64> {
        let state = self.read()?;
        Ok(state
            .players
            .values()
            .filter(|p| p.is_rated() && p.rating >= rating)
            .count() as u64)
    }

    fn match_count(&self) -> Result<u64> {
        Ok(self.read()?.matches.len() as u64)
    }
}
