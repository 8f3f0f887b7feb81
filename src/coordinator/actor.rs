//! Single-writer coordinator owning all lobby state
//!
//! The [`Coordinator`] owns the game registry, the report reconciler, the
//! rating engine and the presence roster. Once spawned it runs in its own
//! task and processes inbound events strictly one at a time, so none of
//! that state needs a lock. Other tasks talk to it through a
//! [`CoordinatorHandle`] and read statistics from a snapshot refreshed
//! after every event.

use crate::amqp::publisher::EventPublisher;
use crate::config::RegistryConfig;
use crate::coordinator::commands::CommandKind;
use crate::coordinator::roster::PresenceRoster;
use crate::error::{LobbyError, Result};
use crate::metrics::MetricsCollector;
use crate::rating::{GameOutcome, RatingEngine};
use crate::registry::GameRegistry;
use crate::report::{
    rejection_reason, ExpandedReport, ReconcileOutcome, ReportReconciler, ReportSubmission,
};
use crate::types::*;
use crate::utils::current_timestamp;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Field of a `profile` command naming the requested player
pub const PROFILE_PLAYER_FIELD: &str = "player";

/// Snapshot of coordinator activity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorStats {
    pub events_processed: u64,
    pub events_failed: u64,
    pub listings: usize,
    pub pending_matches: usize,
    pub players_present: usize,
    pub reports_accepted: u64,
    pub reports_rejected: u64,
    pub matches_rated: u64,
    pub matches_unrated: u64,
    pub publish_failures: u64,
}

enum Mailbox {
    Event {
        envelope: InboundEnvelope,
        reply: Option<oneshot::Sender<Result<()>>>,
    },
    Shutdown,
}

/// Context object tying the lobby components together
pub struct Coordinator {
    registry: GameRegistry,
    reconciler: ReportReconciler,
    engine: RatingEngine,
    roster: PresenceRoster,
    publisher: Arc<dyn EventPublisher>,
    metrics: Arc<MetricsCollector>,
    stats: CoordinatorStats,
}

impl Coordinator {
    pub fn new(
        config: &RegistryConfig,
        engine: RatingEngine,
        publisher: Arc<dyn EventPublisher>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            registry: GameRegistry::new(config.max_listings),
            reconciler: ReportReconciler::new(config.max_pending_matches),
            engine,
            roster: PresenceRoster::new(),
            publisher,
            metrics,
            stats: CoordinatorStats::default(),
        }
    }

    pub fn registry(&self) -> &GameRegistry {
        &self.registry
    }

    pub fn reconciler(&self) -> &ReportReconciler {
        &self.reconciler
    }

    pub fn engine(&self) -> &RatingEngine {
        &self.engine
    }

    pub fn roster(&self) -> &PresenceRoster {
        &self.roster
    }

    /// Current statistics including the live gauges
    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            listings: self.registry.len(),
            pending_matches: self.reconciler.pending_count(),
            players_present: self.roster.len(),
            ..self.stats.clone()
        }
    }

    /// Move the coordinator into its own task.
    ///
    /// The task ends when [`CoordinatorHandle::shutdown`] is called or every
    /// handle has been dropped.
    pub fn spawn(self, buffer: usize) -> (CoordinatorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let stats = Arc::new(RwLock::new(self.stats()));
        let handle = CoordinatorHandle {
            sender,
            stats: stats.clone(),
        };
        let task = tokio::spawn(self.run(receiver, stats));
        (handle, task)
    }

    async fn run(mut self, mut receiver: mpsc::Receiver<Mailbox>, shared: Arc<RwLock<CoordinatorStats>>) {
        info!("Coordinator started");

        while let Some(mail) = receiver.recv().await {
            match mail {
                Mailbox::Event { envelope, reply } => {
                    let result = self.handle(envelope).await;
                    *shared.write().await = self.stats();

                    match reply {
                        Some(reply) => {
                            let _ = reply.send(result);
                        }
                        None => {
                            if let Err(e) = result {
                                debug!("Event rejected: {}", e);
                            }
                        }
                    }
                }
                Mailbox::Shutdown => {
                    info!("Coordinator shutdown requested");
                    break;
                }
            }
        }

        info!(
            "Coordinator stopped after {} events",
            self.stats.events_processed
        );
    }

    /// Process one inbound event to completion.
    ///
    /// Rejected input comes back as an error after it has been logged and
    /// counted. Publish failures never surface here.
    pub async fn handle(&mut self, envelope: InboundEnvelope) -> Result<()> {
        let timer = self.metrics.start_timer();
        let label = Self::label(&envelope.message);

        let result = match envelope.message {
            InboundMessage::Presence { nick, status } => {
                self.handle_presence(&envelope.sender, &nick, status).await;
                Ok(())
            }
            InboundMessage::Command { command, fields } => {
                self.handle_command(&envelope.sender, &command, &fields)
                    .await
            }
        };

        self.stats.events_processed += 1;
        if result.is_err() {
            self.stats.events_failed += 1;
        }

        self.metrics.record_message(label, result.is_ok(), timer.stop());
        self.metrics.update_gauges(
            self.registry.len(),
            self.reconciler.pending_count(),
            self.roster.len(),
        );

        result
    }

    fn label(message: &InboundMessage) -> &'static str {
        match message {
            InboundMessage::Presence { .. } => "presence",
            InboundMessage::Command { command, .. } => command
                .parse::<CommandKind>()
                .map(CommandKind::as_str)
                .unwrap_or("unknown"),
        }
    }

    async fn handle_presence(&mut self, sender: &str, nick: &str, status: PresenceStatus) {
        match status {
            PresenceStatus::Online => {
                debug!("'{}' joined as '{}'", sender, nick);
                self.roster.join(sender, nick);
            }
            PresenceStatus::Offline => {
                if self.roster.leave(sender).is_none() {
                    debug!("Offline presence for unknown client '{}'", sender);
                }
                if self.registry.unregister(sender) {
                    info!("Host '{}' left, its listing was removed", sender);
                    self.metrics.record_listing_change("unregister");
                    self.publish_game_list().await;
                }
            }
        }

        self.publish_rating_list(None).await;
    }

    async fn handle_command(&mut self, sender: &str, command: &str, fields: &Fields) -> Result<()> {
        let kind = match command.parse::<CommandKind>() {
            Ok(kind) => kind,
            Err(e) => {
                warn!("Ignoring command from '{}': {}", sender, e);
                return Err(e);
            }
        };

        match kind {
            CommandKind::Register => {
                let evicted_before = self.registry.stats().evicted;
                self.registry.register(sender, fields)?;
                self.metrics.record_listing_change("register");
                if self.registry.stats().evicted > evicted_before {
                    self.metrics.record_listing_change("evicted");
                }
                self.publish_game_list().await;
            }
            CommandKind::Unregister => {
                if self.registry.unregister(sender) {
                    self.metrics.record_listing_change("unregister");
                    self.publish_game_list().await;
                }
            }
            CommandKind::ChangeState => {
                self.registry.change_state(sender, fields)?;
                self.metrics.record_listing_change("changestate");
                self.publish_game_list().await;
            }
            CommandKind::Report => self.handle_report(sender, fields).await?,
            CommandKind::GetLeaderboard => {
                let board = self.leaderboard(Some(sender.to_string()))?;
                self.publish(OutboundEvent::Leaderboard(board)).await;
            }
            CommandKind::GetRatingList => {
                let list = self.rating_list(Some(sender.to_string()))?;
                self.publish(OutboundEvent::RatingList(list)).await;
            }
            CommandKind::Profile => self.handle_profile(sender, fields).await?,
        }

        Ok(())
    }

    async fn handle_report(&mut self, sender: &str, fields: &Fields) -> Result<()> {
        let submission = match ReportSubmission::from_fields(sender, fields) {
            Ok(submission) => submission,
            Err(e) => {
                warn!("Rejected report from '{}': {}", sender, e);
                self.reject_report(&e);
                return Err(e);
            }
        };

        match self.reconciler.submit(submission) {
            Ok(ReconcileOutcome::Pending { filled, expected }) => {
                self.accept_report();
                debug!("Report from '{}' accepted ({}/{})", sender, filled, expected);
                Ok(())
            }
            Ok(ReconcileOutcome::Finalized(report)) => {
                self.accept_report();
                self.metrics.record_match_finalized();
                self.record_match(report).await
            }
            Err(e) => {
                self.reject_report(&e);
                Err(e)
            }
        }
    }

    fn accept_report(&mut self) {
        self.stats.reports_accepted += 1;
        self.metrics.record_report_accepted();
    }

    fn reject_report(&mut self, error: &anyhow::Error) {
        self.stats.reports_rejected += 1;
        self.metrics.record_report_rejected(rejection_reason(error));
    }

    async fn record_match(&mut self, report: ExpandedReport) -> Result<()> {
        let timer = self.metrics.start_timer();
        let outcome = self.engine.add_and_rate_game(&report);
        self.metrics.record_rating_calculation(timer.stop());

        match outcome {
            Ok(GameOutcome::Rated(game)) => {
                self.stats.matches_rated += 1;
                self.metrics.record_rated_match(&game.changes);

                let announcement = RatingAnnouncement {
                    match_id: game.record.match_id,
                    message: game.announcement,
                    changes: game.changes,
                    timestamp: current_timestamp(),
                };
                self.publish(OutboundEvent::RatingAnnouncement(announcement))
                    .await;
                self.publish_rating_list(None).await;
                self.publish_leaderboard(None).await;
                Ok(())
            }
            Ok(GameOutcome::Unrated { record, reason }) => {
                self.stats.matches_unrated += 1;
                self.metrics.record_unrated_match(reason.label());
                debug!("No broadcast for unrated match '{}'", record.match_id);
                Ok(())
            }
            Err(e) => {
                error!("Failed to record match '{}': {}", report.match_id, e);
                self.reject_report(&e);
                Err(e)
            }
        }
    }

    async fn handle_profile(&mut self, sender: &str, fields: &Fields) -> Result<()> {
        let name = fields
            .get(PROFILE_PLAYER_FIELD)
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| LobbyError::MalformedCommand {
                command: CommandKind::Profile.to_string(),
                reason: format!("missing '{}' field", PROFILE_PLAYER_FIELD),
            })?;

        let player_id = self.roster.resolve(name);
        let response = match self.engine.profile(&player_id)? {
            ProfileResponse::NotFound { .. } => ProfileResponse::NotFound {
                player: name.to_string(),
            },
            found => found,
        };

        let reply = ProfileReply {
            recipient: sender.to_string(),
            response,
            timestamp: current_timestamp(),
        };
        self.publish(OutboundEvent::Profile(reply)).await;
        Ok(())
    }

    fn leaderboard(&self, recipient: Option<ClientId>) -> Result<Leaderboard> {
        Ok(Leaderboard {
            recipient,
            entries: self.engine.leaderboard()?,
            timestamp: current_timestamp(),
        })
    }

    fn rating_list(&self, recipient: Option<ClientId>) -> Result<RatingList> {
        let (nicks, ids): (Vec<String>, Vec<PlayerId>) = self
            .roster
            .entries()
            .map(|(nick, id)| (nick.clone(), id.clone()))
            .unzip();
        let ratings = self.engine.ratings_for(&ids)?;

        let entries = nicks
            .into_iter()
            .zip(ids)
            .map(|(nick, id)| RatingListEntry {
                nick,
                rating: ratings.get(&id).copied().flatten(),
            })
            .collect();

        Ok(RatingList {
            recipient,
            entries,
            timestamp: current_timestamp(),
        })
    }

    async fn publish_game_list(&mut self) {
        let snapshot = GameListSnapshot {
            games: self.registry.list_all(),
            timestamp: current_timestamp(),
        };
        self.publish(OutboundEvent::GameList(snapshot)).await;
    }

    async fn publish_rating_list(&mut self, recipient: Option<ClientId>) {
        match self.rating_list(recipient) {
            Ok(list) => self.publish(OutboundEvent::RatingList(list)).await,
            Err(e) => error!("Failed to build rating list: {}", e),
        }
    }

    async fn publish_leaderboard(&mut self, recipient: Option<ClientId>) {
        match self.leaderboard(recipient) {
            Ok(board) => self.publish(OutboundEvent::Leaderboard(board)).await,
            Err(e) => error!("Failed to build leaderboard: {}", e),
        }
    }

    /// Fire-and-forget publish; failures are logged and counted only
    async fn publish(&mut self, event: OutboundEvent) {
        let kind = event.kind();
        let timer = self.metrics.start_timer();
        let result = self.publisher.publish_event(event).await;
        self.metrics.record_publish(kind, result.is_ok(), timer.stop());

        if let Err(e) = result {
            self.stats.publish_failures += 1;
            warn!("Failed to publish {}: {}", kind, e);
        }
    }
}

/// Cloneable handle to a spawned [`Coordinator`]
#[derive(Clone)]
pub struct CoordinatorHandle {
    sender: mpsc::Sender<Mailbox>,
    stats: Arc<RwLock<CoordinatorStats>>,
}

impl CoordinatorHandle {
    /// Enqueue an event without waiting for it to be processed
    pub async fn submit(&self, envelope: InboundEnvelope) -> Result<()> {
        self.send(Mailbox::Event {
            envelope,
            reply: None,
        })
        .await
    }

    /// Enqueue an event and wait for its result
    pub async fn process(&self, envelope: InboundEnvelope) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(Mailbox::Event {
            envelope,
            reply: Some(reply),
        })
        .await?;

        response.await.map_err(|_| stopped())?
    }

    /// Latest statistics snapshot
    pub async fn stats(&self) -> CoordinatorStats {
        self.stats.read().await.clone()
    }

    /// Ask the coordinator to stop once earlier events are processed
    pub async fn shutdown(&self) -> Result<()> {
        self.send(Mailbox::Shutdown).await
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    async fn send(&self, mail: Mailbox) -> Result<()> {
        self.sender.send(mail).await.map_err(|_| stopped())
    }
}

fn stopped() -> anyhow::Error {
    LobbyError::InternalError {
        message: "coordinator is not running".to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::publisher::MockEventPublisher;
    use crate::config::RatingConfig;
    use crate::rating::InMemoryMatchStore;

    fn coordinator() -> (Coordinator, Arc<MockEventPublisher>) {
        let publisher = Arc::new(MockEventPublisher::new());
        let engine = RatingEngine::new(
            Arc::new(InMemoryMatchStore::new()),
            RatingConfig::default(),
        )
        .unwrap();
        let coordinator = Coordinator::new(
            &RegistryConfig::default(),
            engine,
            publisher.clone(),
            Arc::new(MetricsCollector::new().unwrap()),
        );
        (coordinator, publisher)
    }

    fn command(sender: &str, name: &str, fields: &[(&str, &str)]) -> InboundEnvelope {
        InboundEnvelope {
            sender: sender.to_string(),
            message: InboundMessage::Command {
                command: name.to_string(),
                fields: fields
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            },
        }
    }

    fn presence(sender: &str, nick: &str, status: PresenceStatus) -> InboundEnvelope {
        InboundEnvelope {
            sender: sender.to_string(),
            message: InboundMessage::Presence {
                nick: nick.to_string(),
                status,
            },
        }
    }

    #[tokio::test]
    async fn test_register_publishes_game_list() {
        let (mut coordinator, publisher) = coordinator();

        coordinator
            .handle(command("hostA", "register", &[("players", "a,b,"), ("nbp", "2")]))
            .await
            .unwrap();

        assert_eq!(publisher.get_published_kinds(), vec!["game_list"]);
        assert_eq!(coordinator.stats().listings, 1);
    }

    #[tokio::test]
    async fn test_malformed_register_publishes_nothing() {
        let (mut coordinator, publisher) = coordinator();

        let result = coordinator
            .handle(command("hostA", "register", &[("players", "a,b,")]))
            .await;

        assert!(result.is_err());
        assert!(publisher.get_published_events().is_empty());
        assert_eq!(coordinator.stats().events_failed, 1);
        assert!(coordinator.registry().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_command_rejected() {
        let (mut coordinator, publisher) = coordinator();

        assert!(coordinator.handle(command("alice", "dance", &[])).await.is_err());
        assert!(publisher.get_published_events().is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_fail_event() {
        let (mut coordinator, publisher) = coordinator();
        publisher.set_failing(true);

        coordinator
            .handle(command("hostA", "register", &[("players", "a,"), ("nbp", "1")]))
            .await
            .unwrap();

        let stats = coordinator.stats();
        assert_eq!(stats.publish_failures, 1);
        assert_eq!(stats.events_failed, 0);
        assert_eq!(stats.listings, 1);
    }

    #[tokio::test]
    async fn test_unregister_without_listing_is_silent() {
        let (mut coordinator, publisher) = coordinator();

        coordinator.handle(command("hostA", "unregister", &[])).await.unwrap();
        assert!(publisher.get_published_events().is_empty());
    }

    #[tokio::test]
    async fn test_departing_host_loses_listing() {
        let (mut coordinator, publisher) = coordinator();

        coordinator
            .handle(presence("hostA", "Host", PresenceStatus::Online))
            .await
            .unwrap();
        coordinator
            .handle(command("hostA", "register", &[("players", "a,"), ("nbp", "1")]))
            .await
            .unwrap();
        publisher.clear_events();

        coordinator
            .handle(presence("hostA", "Host", PresenceStatus::Offline))
            .await
            .unwrap();

        assert!(coordinator.registry().is_empty());
        assert!(coordinator.roster().is_empty());
        assert_eq!(
            publisher.get_published_kinds(),
            vec!["game_list", "rating_list"]
        );
    }

    #[tokio::test]
    async fn test_profile_requires_player_field() {
        let (mut coordinator, publisher) = coordinator();

        assert!(coordinator.handle(command("alice", "profile", &[])).await.is_err());

        coordinator
            .handle(command("alice", "profile", &[("player", "nobody")]))
            .await
            .unwrap();

        match publisher.get_published_events().as_slice() {
            [OutboundEvent::Profile(reply)] => {
                assert_eq!(reply.recipient, "alice");
                assert_eq!(
                    reply.response,
                    ProfileResponse::NotFound {
                        player: "nobody".to_string()
                    }
                );
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_spawned_coordinator_processes_in_order() {
        let (coordinator, publisher) = coordinator();
        let (handle, task) = coordinator.spawn(8);

        handle
            .submit(command("hostA", "register", &[("players", "a,b,"), ("nbp", "2")]))
            .await
            .unwrap();
        handle
            .process(command("hostA", "changestate", &[("players", "a,"), ("nbp", "1")]))
            .await
            .unwrap();

        let stats = handle.stats().await;
        assert_eq!(stats.events_processed, 2);
        assert_eq!(stats.listings, 1);
        assert_eq!(
            publisher.get_published_kinds(),
            vec!["game_list", "game_list"]
        );

        handle.shutdown().await.unwrap();
        task.await.unwrap();
        assert!(handle.process(command("hostA", "unregister", &[])).await.is_err());
    }
}
