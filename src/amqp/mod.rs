//! AMQP integration for the lobby coordinator
//!
//! This module handles the broker connection, consumption of presence
//! events and client commands, and publishing of outbound events.

pub mod connection;
pub mod handlers;
pub mod messages;
pub mod publisher;

// Re-export commonly used types
pub use connection::{AmqpConfig, AmqpConnection};
pub use handlers::{CommandConsumer, MessageHandler};
pub use messages::*;
pub use publisher::{AmqpEventPublisher, EventPublisher, PublisherConfig};
