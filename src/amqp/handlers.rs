//! AMQP message handlers for presence events and client commands
//!
//! The consumer only decodes and validates deliveries; everything else is
//! delegated to a [`MessageHandler`]. Undecodable deliveries are logged and
//! dropped.

use crate::amqp::messages::MessageUtils;
use crate::error::{LobbyError, Result};
use crate::types::InboundEnvelope;
use amqprs::{
    channel::{BasicCancelArguments, BasicConsumeArguments, Channel},
    consumer::AsyncConsumer,
    BasicProperties, Deliver,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Trait defining the interface for handling inbound messages
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle a decoded presence event or command
    async fn handle_inbound(&self, envelope: InboundEnvelope) -> Result<()>;

    /// Handle a delivery that could not be processed
    async fn handle_error(&self, error: LobbyError, message_data: &[u8]);
}

/// Consumer for the command queue
pub struct CommandConsumer {
    handler: Arc<dyn MessageHandler>,
    channel: Channel,
    consumer_tag: String,
}

impl CommandConsumer {
    /// Create a new command consumer
    pub fn new(handler: Arc<dyn MessageHandler>, channel: Channel) -> Self {
        let consumer_tag = format!("lobby-consumer-{}", uuid::Uuid::new_v4());

        Self {
            handler,
            channel,
            consumer_tag,
        }
    }

    /// Start consuming messages from the queue
    pub async fn start_consuming(&self, queue_name: &str) -> Result<()> {
        let mut args = BasicConsumeArguments::new(queue_name, &self.consumer_tag);
        args.no_ack = true;

        self.channel
            .basic_consume(InboundConsumer::new(self.handler.clone()), args)
            .await
            .map_err(|e| LobbyError::AmqpConnectionFailed {
                message: format!("Failed to start consuming: {}", e),
            })?;

        info!("Started consuming messages from queue: {}", queue_name);
        Ok(())
    }

    /// Stop consuming messages
    pub async fn stop_consuming(&self) -> Result<()> {
        let args = BasicCancelArguments::new(&self.consumer_tag);

        self.channel.basic_cancel(args).await.map_err(|e| {
            LobbyError::AmqpConnectionFailed {
                message: format!("Failed to stop consuming: {}", e),
            }
        })?;

        info!("Stopped consuming messages");
        Ok(())
    }
}

/// Internal consumer implementation
struct InboundConsumer {
    handler: Arc<dyn MessageHandler>,
}

impl InboundConsumer {
    fn new(handler: Arc<dyn MessageHandler>) -> Self {
        Self { handler }
    }

    async fn process_message(&self, content: &[u8]) -> Result<()> {
        let envelope = MessageUtils::deserialize_inbound(content)?;
        debug!("Inbound message from '{}': {:?}", envelope.sender, envelope.message);
        self.handler.handle_inbound(envelope).await
    }
}

#[async_trait]
impl AsyncConsumer for InboundConsumer {
    async fn consume(
        &mut self,
        _channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        let delivery_tag = deliver.delivery_tag();
        debug!(
            "AMQP message received - delivery_tag: {}, routing_key: '{}', size: {} bytes",
            delivery_tag,
            deliver.routing_key(),
            content.len()
        );

        if let Err(e) = self.process_message(&content).await {
            let error = match e.downcast::<LobbyError>() {
                Ok(lobby_error) => lobby_error,
                Err(other) => LobbyError::InternalError {
                    message: other.to_string(),
                },
            };
            warn!(
                "Dropping message - delivery_tag: {}, error: {}",
                delivery_tag, error
            );
            self.handler.handle_error(error, &content).await;
        }
    }
}

/// Mock message handler for testing
pub struct MockMessageHandler {
    pub received: Arc<tokio::sync::Mutex<Vec<InboundEnvelope>>>,
    pub errors: Arc<tokio::sync::Mutex<Vec<String>>>,
}

impl Default for MockMessageHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMessageHandler {
    pub fn new() -> Self {
        Self {
            received: Arc::new(tokio::sync::Mutex::new(Vec::new())),
            errors: Arc::new(tokio::sync::Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl MessageHandler for MockMessageHandler {
    async fn handle_inbound(&self, envelope: InboundEnvelope) -> Result<()> {
        self.received.lock().await.push(envelope);
        Ok(())
    }

    async fn handle_error(&self, error: LobbyError, _message_data: &[u8]) {
        error!("Mock handler received error: {}", error);
        self.errors.lock().await.push(error.to_string());
    }
}
