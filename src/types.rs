//! Common types used throughout the lobby coordination service

use crate::registry::Listing;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Transport identity of a connected client
pub type ClientId = String;

/// Durable identity of a player (same namespace as [`ClientId`])
pub type PlayerId = String;

/// Identifier shared by every report of one played game session
pub type MatchId = String;

/// Raw attribute map carried by a command, exactly as it arrived on the wire
pub type Fields = BTreeMap<String, String>;

/// Rating value stored for players who never finished a rated match
pub const UNRATED: i32 = -1;

/// Availability of a client in the lobby room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// Per-player state at the end of a match, as reported by the game
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
    Active,
    Won,
    Defeated,
    Unknown(String),
}

impl PlayerState {
    pub fn parse(value: &str) -> Self {
        match value {
            "active" => PlayerState::Active,
            "won" => PlayerState::Won,
            "defeated" => PlayerState::Defeated,
            other => PlayerState::Unknown(other.to_string()),
        }
    }
}

impl std::fmt::Display for PlayerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayerState::Active => write!(f, "active"),
            PlayerState::Won => write!(f, "won"),
            PlayerState::Defeated => write!(f, "defeated"),
            PlayerState::Unknown(other) => write!(f, "{}", other),
        }
    }
}

/// Inbound message envelope as delivered by the transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEnvelope {
    /// Identity of the client that sent the message
    pub sender: ClientId,
    #[serde(flatten)]
    pub message: InboundMessage,
}

/// Inbound message body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundMessage {
    /// A client joined or left the lobby room
    Presence { nick: String, status: PresenceStatus },
    /// A command addressed to the coordinator
    Command {
        command: String,
        #[serde(default)]
        fields: Fields,
    },
}

/// Snapshot of every open listing, broadcast after registry changes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameListSnapshot {
    pub games: Vec<Listing>,
    pub timestamp: DateTime<Utc>,
}

/// One row of the leaderboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub name: PlayerId,
    pub rating: i32,
}

/// Top rated players
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Leaderboard {
    /// Requesting client, or `None` for a broadcast
    pub recipient: Option<ClientId>,
    pub entries: Vec<LeaderboardEntry>,
    pub timestamp: DateTime<Utc>,
}

/// Rating of one present player keyed by visible name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingListEntry {
    pub nick: String,
    /// `None` for players without a rated match
    pub rating: Option<i32>,
}

/// Ratings of the players currently in the room
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingList {
    pub recipient: Option<ClientId>,
    pub entries: Vec<RatingListEntry>,
    pub timestamp: DateTime<Utc>,
}

/// Statistics of a single player
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerProfile {
    pub player: PlayerId,
    pub rating: Option<i32>,
    pub highest_rating: Option<i32>,
    pub rank: Option<u64>,
    pub total_games_played: u64,
    pub wins: u64,
    pub losses: u64,
}

/// Answer to a `profile` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum ProfileResponse {
    Found(PlayerProfile),
    NotFound { player: String },
}

/// Profile answer addressed to the requesting client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileReply {
    pub recipient: ClientId,
    pub response: ProfileResponse,
    pub timestamp: DateTime<Utc>,
}

/// Rating change of one participant of a rated match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingChange {
    pub player_id: PlayerId,
    pub old_rating: i32,
    pub new_rating: i32,
}

impl RatingChange {
    pub fn delta(&self) -> i32 {
        self.new_rating - self.old_rating
    }
}

/// Human readable broadcast sent after every rated match
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingAnnouncement {
    pub match_id: MatchId,
    pub message: String,
    pub changes: Vec<RatingChange>,
    pub timestamp: DateTime<Utc>,
}

/// Union type for all outbound messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundEvent {
    GameList(GameListSnapshot),
    Leaderboard(Leaderboard),
    RatingList(RatingList),
    Profile(ProfileReply),
    RatingAnnouncement(RatingAnnouncement),
}

impl OutboundEvent {
    /// Short name used in logs and metrics labels
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundEvent::GameList(_) => "game_list",
            OutboundEvent::Leaderboard(_) => "leaderboard",
            OutboundEvent::RatingList(_) => "rating_list",
            OutboundEvent::Profile(_) => "profile",
            OutboundEvent::RatingAnnouncement(_) => "rating_announcement",
        }
    }
}
