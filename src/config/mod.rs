//! Configuration management for the lobby coordinator
//!
//! This module handles configuration loading from environment variables
//! and TOML files, validation, and default values.

pub mod app;
pub mod rating;
pub mod registry;

// Re-export commonly used types
pub use app::{validate_config, AmqpSettings, AppConfig, ServiceSettings, StorageSettings};
pub use rating::RatingConfig;
pub use registry::RegistryConfig;
