//! Test fixtures shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use lobby_ledger::amqp::publisher::EventPublisher;
use lobby_ledger::config::RegistryConfig;
use lobby_ledger::error::Result;
use lobby_ledger::metrics::MetricsCollector;
use lobby_ledger::rating::{InMemoryMatchStore, MatchStore, RatingEngine};
use lobby_ledger::types::*;
use lobby_ledger::Coordinator;
use std::sync::{Arc, Mutex};

/// Publisher that records every outbound event in order
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<OutboundEvent>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: OutboundEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    pub fn events(&self) -> Vec<OutboundEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(OutboundEvent::kind).collect()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }

    /// Most recent game list snapshot
    pub fn last_game_list(&self) -> Option<GameListSnapshot> {
        self.events().into_iter().rev().find_map(|event| match event {
            OutboundEvent::GameList(snapshot) => Some(snapshot),
            _ => None,
        })
    }

    pub fn announcements(&self) -> Vec<RatingAnnouncement> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                OutboundEvent::RatingAnnouncement(announcement) => Some(announcement),
                _ => None,
            })
            .collect()
    }

    pub fn last_leaderboard(&self) -> Option<Leaderboard> {
        self.events().into_iter().rev().find_map(|event| match event {
            OutboundEvent::Leaderboard(board) => Some(board),
            _ => None,
        })
    }

    pub fn last_rating_list(&self) -> Option<RatingList> {
        self.events().into_iter().rev().find_map(|event| match event {
            OutboundEvent::RatingList(list) => Some(list),
            _ => None,
        })
    }

    pub fn last_profile(&self) -> Option<ProfileReply> {
        self.events().into_iter().rev().find_map(|event| match event {
            OutboundEvent::Profile(reply) => Some(reply),
            _ => None,
        })
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish_game_list(&self, snapshot: GameListSnapshot) -> Result<()> {
        self.push(OutboundEvent::GameList(snapshot));
        Ok(())
    }

    async fn publish_leaderboard(&self, leaderboard: Leaderboard) -> Result<()> {
        self.push(OutboundEvent::Leaderboard(leaderboard));
        Ok(())
    }

    async fn publish_rating_list(&self, list: RatingList) -> Result<()> {
        self.push(OutboundEvent::RatingList(list));
        Ok(())
    }

    async fn publish_profile(&self, reply: ProfileReply) -> Result<()> {
        self.push(OutboundEvent::Profile(reply));
        Ok(())
    }

    async fn publish_announcement(&self, announcement: RatingAnnouncement) -> Result<()> {
        self.push(OutboundEvent::RatingAnnouncement(announcement));
        Ok(())
    }
}

/// Coordinator over an in-memory store with default limits
pub fn create_test_coordinator() -> (Coordinator, Arc<RecordingPublisher>) {
    create_test_coordinator_with_store(Arc::new(InMemoryMatchStore::new()))
}

pub fn create_test_coordinator_with_store(
    store: Arc<dyn MatchStore>,
) -> (Coordinator, Arc<RecordingPublisher>) {
    let publisher = Arc::new(RecordingPublisher::new());
    let engine = RatingEngine::new(store, Default::default()).expect("default rating config");
    let metrics = Arc::new(MetricsCollector::new().expect("metrics registry"));
    let coordinator = Coordinator::new(
        &RegistryConfig::default(),
        engine,
        publisher.clone(),
        metrics,
    );
    (coordinator, publisher)
}

fn to_fields(pairs: &[(&str, &str)]) -> Fields {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn online(sender: &str, nick: &str) -> InboundEnvelope {
    InboundEnvelope {
        sender: sender.to_string(),
        message: InboundMessage::Presence {
            nick: nick.to_string(),
            status: PresenceStatus::Online,
        },
    }
}

pub fn offline(sender: &str, nick: &str) -> InboundEnvelope {
    InboundEnvelope {
        sender: sender.to_string(),
        message: InboundMessage::Presence {
            nick: nick.to_string(),
            status: PresenceStatus::Offline,
        },
    }
}

pub fn command(sender: &str, name: &str, pairs: &[(&str, &str)]) -> InboundEnvelope {
    InboundEnvelope {
        sender: sender.to_string(),
        message: InboundMessage::Command {
            command: name.to_string(),
            fields: to_fields(pairs),
        },
    }
}

pub fn register(host: &str, players: &str, nbp: &str) -> InboundEnvelope {
    command(
        host,
        "register",
        &[
            ("name", "Skirmish"),
            ("mapName", "Arcadia"),
            ("players", players),
            ("nbp", nbp),
            ("maxnbp", "4"),
        ],
    )
}

pub fn changestate(host: &str, players: &str, nbp: &str) -> InboundEnvelope {
    command(host, "changestate", &[("players", players), ("nbp", nbp)])
}

/// One participant's copy of the end-of-match report
pub fn report(sender: &str, match_id: &str, slot: &str, states: &str) -> InboundEnvelope {
    command(
        sender,
        "report",
        &[
            ("playerID", slot),
            ("matchID", match_id),
            ("mapName", "Arcadia"),
            ("duration", "1800"),
            ("playerStates", states),
            ("civs", "athen,spart,"),
            ("enemyUnitsKilled", "42,17,"),
        ],
    )
}

/// Report for a match with three participants
pub fn report_three(sender: &str, match_id: &str, slot: &str) -> InboundEnvelope {
    command(
        sender,
        "report",
        &[
            ("playerID", slot),
            ("matchID", match_id),
            ("mapName", "Oasis"),
            ("playerStates", "won,defeated,defeated,"),
        ],
    )
}
