//! Main application state and service coordination
//!
//! This module contains the production AppState that wires the coordinator,
//! the match store, the AMQP connection and the background tasks together.

use crate::amqp::connection::{AmqpConfig, AmqpConnection};
use crate::amqp::handlers::{CommandConsumer, MessageHandler};
use crate::amqp::publisher::{AmqpEventPublisher, EventPublisher, PublisherConfig};
use crate::config::{AppConfig, StorageSettings};
use crate::coordinator::{Coordinator, CoordinatorHandle, CoordinatorStats};
use crate::error::{LobbyError, Result as LobbyResult};
use crate::metrics::health::HealthServerConfig;
use crate::metrics::{HealthServer, MetricsCollector, MetricsService};
use crate::rating::{InMemoryMatchStore, MatchStore, RatingEngine, SqliteMatchStore};
use crate::types::InboundEnvelope;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },
}

/// Production message handler feeding the coordinator
struct ProductionMessageHandler {
    coordinator: CoordinatorHandle,
    metrics: Arc<MetricsCollector>,
}

impl ProductionMessageHandler {
    fn new(coordinator: CoordinatorHandle, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            coordinator,
            metrics,
        }
    }
}

#[async_trait]
impl MessageHandler for ProductionMessageHandler {
    async fn handle_inbound(&self, envelope: InboundEnvelope) -> LobbyResult<()> {
        debug!("Forwarding message from '{}' to coordinator", envelope.sender);
        self.coordinator.submit(envelope).await
    }

    async fn handle_error(&self, error: LobbyError, message_data: &[u8]) {
        error!(
            "Dropped inbound message - error: '{}', message_size: {} bytes",
            error,
            message_data.len()
        );

        if !message_data.is_empty() {
            let preview_len = std::cmp::min(100, message_data.len());
            let preview = String::from_utf8_lossy(&message_data[..preview_len]);
            debug!("Message preview: {:?}", preview);
        }

        self.metrics
            .record_message("undecodable", false, Duration::ZERO);
    }
}

/// Main application state containing all service components
pub struct AppState {
    /// Application configuration
    config: AppConfig,

    /// Handle to the coordinator task
    coordinator: CoordinatorHandle,
    coordinator_task: Mutex<Option<JoinHandle<()>>>,

    /// AMQP connection; absent when running without a broker
    amqp_connection: Option<Arc<AmqpConnection>>,

    metrics_collector: Arc<MetricsCollector>,
    metrics_service: Mutex<Option<MetricsService>>,

    /// Background task handles
    background_tasks: Mutex<Vec<JoinHandle<()>>>,

    /// AMQP consumer for the command queue
    command_consumer: Mutex<Option<CommandConsumer>>,

    /// Service status
    is_running: Arc<RwLock<bool>>,

    started_at: Instant,
}

impl AppState {
    /// Initialize the application with a broker connection
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing lobby-ledger service");
        info!(
            "Configuration: service={}, amqp_url={}",
            config.service.name, config.amqp.url
        );

        let metrics_collector = Self::initialize_metrics()?;
        let amqp_connection = Self::initialize_amqp(&config).await?;
        let publisher = Self::initialize_publisher(&config, &amqp_connection).await?;

        Self::assemble(config, publisher, Some(amqp_connection), metrics_collector)
    }

    /// Initialize the application around an existing publisher, without a
    /// broker connection
    pub fn with_publisher(
        config: AppConfig,
        publisher: Arc<dyn EventPublisher>,
    ) -> Result<Self, ServiceError> {
        let metrics_collector = Self::initialize_metrics()?;
        Self::assemble(config, publisher, None, metrics_collector)
    }

    fn assemble(
        config: AppConfig,
        publisher: Arc<dyn EventPublisher>,
        amqp_connection: Option<Arc<AmqpConnection>>,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Result<Self, ServiceError> {
        let store = Self::open_store(&config.storage)?;
        let engine = RatingEngine::new(store, config.rating.clone()).map_err(|e| {
            ServiceError::Initialization {
                message: format!("Failed to initialize rating engine: {}", e),
            }
        })?;

        let coordinator = Coordinator::new(
            &config.registry,
            engine,
            publisher,
            metrics_collector.clone(),
        );
        let (coordinator, coordinator_task) =
            coordinator.spawn(config.service.event_buffer_size);

        Ok(Self {
            config,
            coordinator,
            coordinator_task: Mutex::new(Some(coordinator_task)),
            amqp_connection,
            metrics_collector,
            metrics_service: Mutex::new(None),
            background_tasks: Mutex::new(Vec::new()),
            command_consumer: Mutex::new(None),
            is_running: Arc::new(RwLock::new(false)),
            started_at: Instant::now(),
        })
    }

    /// Start the health server, message consumption and background tasks
    pub async fn start(self: &Arc<Self>) -> Result<(), ServiceError> {
        info!("Starting lobby-ledger service");

        *self.is_running.write().await = true;

        self.start_metrics_service().await;
        self.start_amqp_consumption().await?;
        self.start_background_tasks().await;

        info!("Lobby-ledger service started");
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of lobby-ledger service");

        *self.is_running.write().await = false;

        if let Some(consumer) = self.command_consumer.lock().await.take() {
            if let Err(e) = consumer.stop_consuming().await {
                warn!("Failed to stop AMQP consumer: {}", e);
            } else {
                info!("AMQP message consumption stopped");
            }
        }

        if let Some(metrics_service) = self.metrics_service.lock().await.take() {
            if let Err(e) = metrics_service.stop().await {
                warn!("Failed to stop metrics service: {}", e);
            }
        }

        self.stop_background_tasks().await;

        // Events already queued are still processed before the task exits
        if let Err(e) = self.coordinator.shutdown().await {
            debug!("Coordinator already stopped: {}", e);
        }
        if let Some(task) = self.coordinator_task.lock().await.take() {
            match tokio::time::timeout(self.config.shutdown_timeout(), task).await {
                Ok(Ok(())) => info!("Coordinator drained"),
                Ok(Err(e)) => error!("Coordinator task failed: {}", e),
                Err(_) => warn!("Coordinator did not drain within the shutdown timeout"),
            }
        }

        if let Some(connection) = &self.amqp_connection {
            if let Err(e) = connection.close().await {
                warn!("Failed to close AMQP connection: {}", e);
            }
        }

        info!("Final service statistics: {:?}", self.coordinator.stats().await);
        info!("Lobby-ledger service shutdown completed");
        Ok(())
    }

    /// Get service configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Check if service is running
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn coordinator(&self) -> &CoordinatorHandle {
        &self.coordinator
    }

    pub async fn coordinator_stats(&self) -> CoordinatorStats {
        self.coordinator.stats().await
    }

    pub fn metrics_collector(&self) -> Arc<MetricsCollector> {
        self.metrics_collector.clone()
    }

    /// Get AMQP connection for health checks
    pub fn amqp_connection(&self) -> Option<Arc<AmqpConnection>> {
        self.amqp_connection.clone()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn initialize_metrics() -> Result<Arc<MetricsCollector>, ServiceError> {
        let collector = MetricsCollector::new().map_err(|e| ServiceError::Initialization {
            message: format!("Failed to create metrics collector: {}", e),
        })?;
        Ok(Arc::new(collector))
    }

    /// Pick the match store: SQLite when a database path is configured
    fn open_store(settings: &StorageSettings) -> Result<Arc<dyn MatchStore>, ServiceError> {
        match &settings.database_path {
            Some(path) => {
                info!("Opening SQLite match store at {}", path.display());
                let store =
                    SqliteMatchStore::open(path).map_err(|e| ServiceError::Storage {
                        message: format!("Failed to open {}: {}", path.display(), e),
                    })?;
                Ok(Arc::new(store))
            }
            None => {
                warn!("No database path configured, match history is kept in memory only");
                Ok(Arc::new(InMemoryMatchStore::new()))
            }
        }
    }

    /// Initialize AMQP connection with retry logic
    async fn initialize_amqp(config: &AppConfig) -> Result<Arc<AmqpConnection>, ServiceError> {
        info!("Connecting to AMQP broker: {}", config.amqp.url);

        let amqp_config =
            AmqpConfig::from_settings(&config.amqp).map_err(|e| ServiceError::Configuration {
                message: format!("Failed to parse AMQP URL: {}", e),
            })?;

        let connection =
            AmqpConnection::new(amqp_config)
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to connect to AMQP: {}", e),
                })?;

        Ok(Arc::new(connection))
    }

    async fn initialize_publisher(
        config: &AppConfig,
        connection: &AmqpConnection,
    ) -> Result<Arc<dyn EventPublisher>, ServiceError> {
        let channel = connection
            .open_channel()
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to open publisher channel: {}", e),
            })?;

        let publisher_config = PublisherConfig {
            exchange_name: config.amqp.exchange_name.clone(),
            publish_timeout_ms: config.amqp.publish_timeout_ms,
        };
        let publisher = AmqpEventPublisher::new(channel, publisher_config)
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to initialize event publisher: {}", e),
            })?;

        Ok(Arc::new(publisher))
    }

    /// Spawn the health and metrics HTTP server
    async fn start_metrics_service(self: &Arc<Self>) {
        let port = self.config.service.metrics_port;
        info!("Starting metrics and health endpoints on port {}", port);

        let health_config = HealthServerConfig {
            port,
            host: "0.0.0.0".to_string(),
        };
        let health_server = Arc::new(
            HealthServer::new(health_config, self.metrics_collector.clone())
                .with_app_state(self.clone()),
        );
        let metrics_service = MetricsService::new(self.metrics_collector.clone(), health_server);

        let server = metrics_service.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = server.start().await {
                error!("Metrics service failed: {}", e);
            }
        });

        *self.metrics_service.lock().await = Some(metrics_service);
        self.background_tasks.lock().await.push(handle);
    }

    /// Start consuming the command queue
    async fn start_amqp_consumption(&self) -> Result<(), ServiceError> {
        let Some(connection) = &self.amqp_connection else {
            info!("No broker connection, skipping message consumption");
            return Ok(());
        };
        let queue = &self.config.amqp.command_queue;

        let channel = connection
            .open_channel()
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to open consumer channel: {}", e),
            })?;

        let queue_declare_args = amqprs::channel::QueueDeclareArguments::new(queue)
            .durable(true)
            .auto_delete(false)
            .finish();

        channel
            .queue_declare(queue_declare_args)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to declare queue {}: {}", queue, e),
            })?;

        let handler = Arc::new(ProductionMessageHandler::new(
            self.coordinator.clone(),
            self.metrics_collector.clone(),
        ));
        let consumer = CommandConsumer::new(handler, channel);

        consumer
            .start_consuming(queue)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to start consuming messages: {}", e),
            })?;

        *self.command_consumer.lock().await = Some(consumer);

        info!("Listening for presence events and commands on '{}'", queue);
        Ok(())
    }

    /// Start background maintenance tasks
    async fn start_background_tasks(&self) {
        let stats_task = {
            let coordinator = self.coordinator.clone();
            let metrics_collector = self.metrics_collector.clone();
            let is_running = self.is_running.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(30));

                loop {
                    interval.tick().await;
                    if !*is_running.read().await {
                        break;
                    }

                    let stats = coordinator.stats().await;
                    debug!(
                        "Coordinator stats - listings: {}, pending matches: {}, present: {}, events: {}",
                        stats.listings, stats.pending_matches, stats.players_present, stats.events_processed
                    );
                    metrics_collector.update_gauges(
                        stats.listings,
                        stats.pending_matches,
                        stats.players_present,
                    );
                }

                debug!("Stats refresh task stopped");
            })
        };

        let health_metrics_task = {
            let coordinator = self.coordinator.clone();
            let amqp_connection = self.amqp_connection.clone();
            let metrics_collector = self.metrics_collector.clone();
            let is_running = self.is_running.clone();
            let started_at = self.started_at;

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(60));

                loop {
                    interval.tick().await;
                    if !*is_running.read().await {
                        break;
                    }

                    metrics_collector
                        .service()
                        .uptime_seconds
                        .set(started_at.elapsed().as_secs() as i64);

                    let coordinator_healthy = !coordinator.is_closed();
                    let amqp_healthy = amqp_connection
                        .as_ref()
                        .map_or(true, |connection| connection.is_alive());

                    let status = match (coordinator_healthy, amqp_healthy) {
                        (true, true) => 2,
                        (true, false) => 1,
                        _ => 0,
                    };
                    metrics_collector.update_health_status(status);
                    metrics_collector.update_component_health("coordinator", coordinator_healthy);
                    metrics_collector.update_component_health("amqp", amqp_healthy);
                }

                debug!("Health metrics task stopped");
            })
        };

        let mut tasks = self.background_tasks.lock().await;
        tasks.push(stats_task);
        tasks.push(health_metrics_task);
        info!("{} background tasks running", tasks.len());
    }

    /// Stop all background tasks
    async fn stop_background_tasks(&self) {
        let mut tasks = self.background_tasks.lock().await;
        if tasks.is_empty() {
            return;
        }

        info!("Stopping {} background tasks...", tasks.len());
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::publisher::MockEventPublisher;
    use crate::types::{Fields, InboundMessage};

    fn envelope(sender: &str, command: &str, fields: &[(&str, &str)]) -> InboundEnvelope {
        InboundEnvelope {
            sender: sender.to_string(),
            message: InboundMessage::Command {
                command: command.to_string(),
                fields: fields
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<Fields>(),
            },
        }
    }

    #[tokio::test]
    async fn test_offline_app_state_processes_commands() {
        let publisher = Arc::new(MockEventPublisher::new());
        let app_state = AppState::with_publisher(AppConfig::default(), publisher.clone()).unwrap();

        app_state
            .coordinator()
            .process(envelope("hostA", "register", &[("players", "a,"), ("nbp", "1")]))
            .await
            .unwrap();

        assert_eq!(app_state.coordinator_stats().await.listings, 1);
        assert_eq!(publisher.get_published_kinds(), vec!["game_list"]);
        assert!(app_state.amqp_connection().is_none());
        assert!(!app_state.is_running().await);
    }

    #[tokio::test]
    async fn test_production_handler_forwards_to_coordinator() {
        let publisher = Arc::new(MockEventPublisher::new());
        let app_state = AppState::with_publisher(AppConfig::default(), publisher.clone()).unwrap();
        let handler =
            ProductionMessageHandler::new(app_state.coordinator().clone(), app_state.metrics_collector());

        handler
            .handle_inbound(envelope("hostA", "register", &[("players", "a,"), ("nbp", "1")]))
            .await
            .unwrap();
        // Barrier: processed after the forwarded event
        app_state
            .coordinator()
            .process(envelope("hostA", "unregister", &[]))
            .await
            .unwrap();

        assert_eq!(app_state.coordinator_stats().await.events_processed, 2);
        assert_eq!(
            publisher.get_published_kinds(),
            vec!["game_list", "game_list"]
        );
    }

    #[tokio::test]
    async fn test_sqlite_store_selected_when_path_configured() {
        let dir = std::env::temp_dir().join(format!("lobby-ledger-app-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();

        let mut config = AppConfig::default();
        config.storage.database_path = Some(dir.join("ledger.db"));

        let app_state =
            AppState::with_publisher(config, Arc::new(MockEventPublisher::new())).unwrap();
        assert!(dir.join("ledger.db").exists());

        app_state.shutdown().await.unwrap();
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_shutdown_drains_coordinator() {
        let app_state =
            AppState::with_publisher(AppConfig::default(), Arc::new(MockEventPublisher::new()))
                .unwrap();

        app_state
            .coordinator()
            .submit(envelope("hostA", "register", &[("players", "a,"), ("nbp", "1")]))
            .await
            .unwrap();
        app_state.shutdown().await.unwrap();

        assert_eq!(app_state.coordinator_stats().await.events_processed, 1);
        assert!(app_state.coordinator().is_closed());
    }
}
