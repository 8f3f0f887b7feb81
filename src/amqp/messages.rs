//! AMQP message definitions and serialization

use crate::error::{LobbyError, Result};
use crate::types::*;
use crate::utils::{current_timestamp, generate_correlation_id};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Queue carrying presence events and client commands
pub const COMMAND_QUEUE: &str = "lobby.commands";
/// Exchange receiving every outbound event
pub const EVENTS_EXCHANGE: &str = "lobby.events";

/// Routing keys for events
pub const GAME_LIST_ROUTING_KEY: &str = "games.list";
pub const LEADERBOARD_ROUTING_KEY: &str = "ratings.leaderboard";
pub const RATING_LIST_ROUTING_KEY: &str = "ratings.list";
pub const PROFILE_ROUTING_KEY: &str = "ratings.profile";
pub const ANNOUNCEMENT_ROUTING_KEY: &str = "ratings.announcement";

/// Message envelope with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    pub correlation_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub routing_key: String,
    /// Addressed client for replies, `None` for broadcasts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<ClientId>,
}

impl<T> MessageEnvelope<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Create a new broadcast envelope
    pub fn new(payload: T, routing_key: String) -> Self {
        Self {
            payload,
            correlation_id: generate_correlation_id(),
            timestamp: current_timestamp(),
            routing_key,
            recipient: None,
        }
    }

    /// Address the envelope to a single client
    pub fn with_recipient(mut self, recipient: Option<ClientId>) -> Self {
        self.recipient = recipient;
        self
    }

    /// Serialize the envelope to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            LobbyError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    /// Deserialize envelope from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            LobbyError::MalformedCommand {
                command: "envelope".to_string(),
                reason: format!("Failed to deserialize message: {}", e),
            }
            .into()
        })
    }
}

/// Message serialization and validation utilities
pub struct MessageUtils;

impl MessageUtils {
    /// Serialize an inbound envelope to bytes
    pub fn serialize_inbound(envelope: &InboundEnvelope) -> Result<Vec<u8>> {
        Self::validate_inbound(envelope)?;
        serde_json::to_vec(envelope).map_err(|e| {
            LobbyError::InternalError {
                message: format!("Failed to serialize inbound message: {}", e),
            }
            .into()
        })
    }

    /// Deserialize an inbound envelope from bytes
    pub fn deserialize_inbound(bytes: &[u8]) -> Result<InboundEnvelope> {
        let envelope: InboundEnvelope =
            serde_json::from_slice(bytes).map_err(|e| LobbyError::MalformedCommand {
                command: "envelope".to_string(),
                reason: format!("Failed to deserialize inbound message: {}", e),
            })?;

        Self::validate_inbound(&envelope)?;
        Ok(envelope)
    }

    /// Validate an inbound envelope
    pub fn validate_inbound(envelope: &InboundEnvelope) -> Result<()> {
        if envelope.sender.trim().is_empty() {
            return Err(LobbyError::MalformedCommand {
                command: "envelope".to_string(),
                reason: "Sender cannot be empty".to_string(),
            }
            .into());
        }

        match &envelope.message {
            InboundMessage::Presence { nick, .. } if nick.trim().is_empty() => {
                Err(LobbyError::MalformedCommand {
                    command: "presence".to_string(),
                    reason: "Nick cannot be empty".to_string(),
                }
                .into())
            }
            InboundMessage::Command { command, .. } if command.trim().is_empty() => {
                Err(LobbyError::MalformedCommand {
                    command: String::new(),
                    reason: "Command name cannot be empty".to_string(),
                }
                .into())
            }
            _ => Ok(()),
        }
    }

    /// Serialize any AMQP message to bytes
    pub fn serialize_message<T: Serialize>(message: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(message).map_err(|e| {
            LobbyError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    /// Get routing key for an outbound event
    pub fn get_routing_key(event: &OutboundEvent) -> &'static str {
        match event {
            OutboundEvent::GameList(_) => GAME_LIST_ROUTING_KEY,
            OutboundEvent::Leaderboard(_) => LEADERBOARD_ROUTING_KEY,
            OutboundEvent::RatingList(_) => RATING_LIST_ROUTING_KEY,
            OutboundEvent::Profile(_) => PROFILE_ROUTING_KEY,
            OutboundEvent::RatingAnnouncement(_) => ANNOUNCEMENT_ROUTING_KEY,
        }
    }

    /// Client an outbound event is addressed to, if any
    pub fn get_recipient(event: &OutboundEvent) -> Option<ClientId> {
        match event {
            OutboundEvent::Leaderboard(board) => board.recipient.clone(),
            OutboundEvent::RatingList(list) => list.recipient.clone(),
            OutboundEvent::Profile(reply) => Some(reply.recipient.clone()),
            OutboundEvent::GameList(_) | OutboundEvent::RatingAnnouncement(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(sender: &str, name: &str) -> InboundEnvelope {
        InboundEnvelope {
            sender: sender.to_string(),
            message: InboundMessage::Command {
                command: name.to_string(),
                fields: Fields::new(),
            },
        }
    }

    #[test]
    fn test_message_envelope_creation() {
        let board = Leaderboard {
            recipient: Some("alice".to_string()),
            entries: vec![],
            timestamp: current_timestamp(),
        };
        let envelope = MessageEnvelope::new(board, LEADERBOARD_ROUTING_KEY.to_string())
            .with_recipient(Some("alice".to_string()));

        assert_eq!(envelope.routing_key, LEADERBOARD_ROUTING_KEY);
        assert_eq!(envelope.recipient.as_deref(), Some("alice"));
        assert!(!envelope.correlation_id.is_empty());

        let bytes = envelope.to_bytes().unwrap();
        let decoded: MessageEnvelope<Leaderboard> = MessageEnvelope::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.correlation_id, envelope.correlation_id);
    }

    #[test]
    fn test_inbound_validation() {
        assert!(MessageUtils::validate_inbound(&command("alice", "register")).is_ok());
        assert!(MessageUtils::validate_inbound(&command("", "register")).is_err());
        assert!(MessageUtils::validate_inbound(&command("alice", " ")).is_err());

        let presence = InboundEnvelope {
            sender: "alice".to_string(),
            message: InboundMessage::Presence {
                nick: String::new(),
                status: PresenceStatus::Online,
            },
        };
        assert!(MessageUtils::validate_inbound(&presence).is_err());
    }

    #[test]
    fn test_deserialize_inbound_rejects_garbage() {
        assert!(MessageUtils::deserialize_inbound(b"not json").is_err());
        assert!(MessageUtils::deserialize_inbound(br#"{"sender":"a","type":"dance"}"#).is_err());

        let bytes = MessageUtils::serialize_inbound(&command("alice", "getleaderboard")).unwrap();
        let envelope = MessageUtils::deserialize_inbound(&bytes).unwrap();
        assert_eq!(envelope.sender, "alice");
    }

    #[test]
    fn test_routing_keys_and_recipients() {
        let reply = OutboundEvent::Profile(ProfileReply {
            recipient: "bob".to_string(),
            response: ProfileResponse::NotFound {
                player: "zed".to_string(),
            },
            timestamp: current_timestamp(),
        });
        assert_eq!(MessageUtils::get_routing_key(&reply), PROFILE_ROUTING_KEY);
        assert_eq!(MessageUtils::get_recipient(&reply).as_deref(), Some("bob"));

        let games = OutboundEvent::GameList(GameListSnapshot {
            games: vec![],
            timestamp: current_timestamp(),
        });
        assert_eq!(MessageUtils::get_routing_key(&games), GAME_LIST_ROUTING_KEY);
        assert!(MessageUtils::get_recipient(&games).is_none());
    }
}
