//! AMQP event publisher for outbound events
//!
//! Publishing is a single attempt bounded by a timeout. Failures come back
//! as errors for the caller to log; nothing is retried here.

use crate::amqp::messages::{
    MessageEnvelope, ANNOUNCEMENT_ROUTING_KEY, GAME_LIST_ROUTING_KEY, LEADERBOARD_ROUTING_KEY,
    PROFILE_ROUTING_KEY, RATING_LIST_ROUTING_KEY,
};
use crate::error::{LobbyError, Result};
use crate::types::*;
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

/// Trait for publishing lobby events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish the list of open games
    async fn publish_game_list(&self, snapshot: GameListSnapshot) -> Result<()>;

    /// Publish the leaderboard, broadcast or to one client
    async fn publish_leaderboard(&self, leaderboard: Leaderboard) -> Result<()>;

    /// Publish ratings of the players in the room
    async fn publish_rating_list(&self, list: RatingList) -> Result<()>;

    /// Publish a profile answer
    async fn publish_profile(&self, reply: ProfileReply) -> Result<()>;

    /// Publish the announcement of a rated match
    async fn publish_announcement(&self, announcement: RatingAnnouncement) -> Result<()>;

    /// Publish any outbound event through the matching method
    async fn publish_event(&self, event: OutboundEvent) -> Result<()> {
        match event {
            OutboundEvent::GameList(snapshot) => self.publish_game_list(snapshot).await,
            OutboundEvent::Leaderboard(board) => self.publish_leaderboard(board).await,
            OutboundEvent::RatingList(list) => self.publish_rating_list(list).await,
            OutboundEvent::Profile(reply) => self.publish_profile(reply).await,
            OutboundEvent::RatingAnnouncement(announcement) => {
                self.publish_announcement(announcement).await
            }
        }
    }
}

/// Configuration for event publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub exchange_name: String,
    pub publish_timeout_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            exchange_name: crate::amqp::messages::EVENTS_EXCHANGE.to_string(),
            publish_timeout_ms: 2000,
        }
    }
}

/// AMQP-based event publisher implementation
pub struct AmqpEventPublisher {
    channel: Channel,
    config: PublisherConfig,
}

impl AmqpEventPublisher {
    /// Create a new event publisher and declare its exchange
    pub async fn new(channel: Channel, config: PublisherConfig) -> Result<Self> {
        let publisher = Self { channel, config };
        publisher.setup_exchange().await?;
        Ok(publisher)
    }

    async fn setup_exchange(&self) -> Result<()> {
        let args = ExchangeDeclareArguments::new(&self.config.exchange_name, "topic");
        self.channel.exchange_declare(args).await.map_err(|e| {
            LobbyError::AmqpConnectionFailed {
                message: format!(
                    "Failed to declare events exchange '{}': {}",
                    self.config.exchange_name, e
                ),
            }
        })?;

        info!(
            "Declared events exchange '{}'",
            self.config.exchange_name
        );
        Ok(())
    }

    /// Single publish attempt bounded by the configured timeout
    async fn publish<T>(&self, event: &'static str, envelope: MessageEnvelope<T>) -> Result<()>
    where
        T: Serialize + DeserializeOwned,
    {
        let payload = envelope.to_bytes()?;

        let args = BasicPublishArguments::new(&self.config.exchange_name, &envelope.routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&envelope.correlation_id)
            .with_timestamp(envelope.timestamp.timestamp() as u64)
            .with_content_type("application/json");
        if let Some(recipient) = &envelope.recipient {
            properties.with_reply_to(recipient);
        }

        let limit = Duration::from_millis(self.config.publish_timeout_ms);
        match timeout(limit, self.channel.basic_publish(properties, payload, args)).await {
            Ok(Ok(())) => {
                debug!(
                    "Published {} message {} with routing key '{}'",
                    event, envelope.correlation_id, envelope.routing_key
                );
                Ok(())
            }
            Ok(Err(e)) => Err(LobbyError::PublishFailed {
                event: event.to_string(),
                message: e.to_string(),
            }
            .into()),
            Err(_) => Err(LobbyError::PublishFailed {
                event: event.to_string(),
                message: format!("timed out after {:?}", limit),
            }
            .into()),
        }
    }
}

#[async_trait]
impl EventPublisher for AmqpEventPublisher {
    async fn publish_game_list(&self, snapshot: GameListSnapshot) -> Result<()> {
        let envelope = MessageEnvelope::new(snapshot, GAME_LIST_ROUTING_KEY.to_string());
        self.publish("game_list", envelope).await
    }

    async fn publish_leaderboard(&self, leaderboard: Leaderboard) -> Result<()> {
        let recipient = leaderboard.recipient.clone();
        let envelope = MessageEnvelope::new(leaderboard, LEADERBOARD_ROUTING_KEY.to_string())
            .with_recipient(recipient);
        self.publish("leaderboard", envelope).await
    }

    async fn publish_rating_list(&self, list: RatingList) -> Result<()> {
        let recipient = list.recipient.clone();
        let envelope = MessageEnvelope::new(list, RATING_LIST_ROUTING_KEY.to_string())
            .with_recipient(recipient);
        self.publish("rating_list", envelope).await
    }

    async fn publish_profile(&self, reply: ProfileReply) -> Result<()> {
        let recipient = Some(reply.recipient.clone());
        let envelope = MessageEnvelope::new(reply, PROFILE_ROUTING_KEY.to_string())
            .with_recipient(recipient);
        self.publish("profile", envelope).await
    }

    async fn publish_announcement(&self, announcement: RatingAnnouncement) -> Result<()> {
        let envelope = MessageEnvelope::new(announcement, ANNOUNCEMENT_ROUTING_KEY.to_string());
        self.publish("rating_announcement", envelope).await
    }
}

/// Mock event publisher for testing
#[derive(Debug, Default)]
pub struct MockEventPublisher {
    published_events: std::sync::Mutex<Vec<OutboundEvent>>,
    fail: AtomicBool,
}

impl MockEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent publish fail
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Get all published events (for testing)
    pub fn get_published_events(&self) -> Vec<OutboundEvent> {
        self.published_events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Kinds of the published events in order
    pub fn get_published_kinds(&self) -> Vec<&'static str> {
        self.get_published_events()
            .iter()
            .map(OutboundEvent::kind)
            .collect()
    }

    /// Clear published events (for testing)
    pub fn clear_events(&self) {
        if let Ok(mut events) = self.published_events.lock() {
            events.clear();
        }
    }

    fn record(&self, event: OutboundEvent) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(LobbyError::PublishFailed {
                event: event.kind().to_string(),
                message: "mock publisher set to fail".to_string(),
            }
            .into());
        }
        if let Ok(mut events) = self.published_events.lock() {
            events.push(event);
        }
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for MockEventPublisher {
    async fn publish_game_list(&self, snapshot: GameListSnapshot) -> Result<()> {
        self.record(OutboundEvent::GameList(snapshot))
    }

    async fn publish_leaderboard(&self, leaderboard: Leaderboard) -> Result<()> {
        self.record(OutboundEvent::Leaderboard(leaderboard))
    }

    async fn publish_rating_list(&self, list: RatingList) -> Result<()> {
        self.record(OutboundEvent::RatingList(list))
    }

    async fn publish_profile(&self, reply: ProfileReply) -> Result<()> {
        self.record(OutboundEvent::Profile(reply))
    }

    async fn publish_announcement(&self, announcement: RatingAnnouncement) -> Result<()> {
        self.record(OutboundEvent::RatingAnnouncement(announcement))
    }
}
