//! Integration tests for the lobby-ledger service
//!
//! These tests drive the coordinator the way the AMQP consumer does and
//! check what ends up on the outbound side:
//! - Listing lifecycle and game list broadcasts
//! - Report reconciliation and rating of finished matches
//! - Presence tracking, profiles and leaderboards
//! - Concurrent submission through the coordinator handle
//! - Persistence across restarts with SQLite

mod fixtures;

use fixtures::*;
use futures::future::join_all;
use lobby_ledger::error::LobbyError;
use lobby_ledger::rating::{MatchStore, SqliteMatchStore};
use lobby_ledger::registry::ListingState;
use lobby_ledger::types::{OutboundEvent, PlayerProfile, ProfileResponse};
use std::sync::Arc;

fn lobby_error(result: anyhow::Result<()>) -> LobbyError {
    match result {
        Ok(()) => panic!("expected the event to be rejected"),
        Err(e) => match e.downcast::<LobbyError>() {
            Ok(err) => err,
            Err(other) => panic!("unexpected error type: {}", other),
        },
    }
}

#[tokio::test]
async fn test_rated_1v1_match_end_to_end() {
    let (mut coordinator, publisher) = create_test_coordinator();

    coordinator.handle(online("alice@lobby", "alice")).await.unwrap();
    coordinator.handle(online("bob@lobby", "bob")).await.unwrap();
    publisher.clear();

    coordinator
        .handle(report("alice@lobby", "M7", "1", "won,defeated,"))
        .await
        .unwrap();
    assert!(publisher.events().is_empty(), "pending report must stay silent");
    assert!(coordinator.reconciler().is_pending("M7"));

    coordinator
        .handle(report("bob@lobby", "M7", "2", "won,defeated,"))
        .await
        .unwrap();

    assert_eq!(
        publisher.kinds(),
        vec!["rating_announcement", "rating_list", "leaderboard"]
    );

    let announcements = publisher.announcements();
    assert_eq!(announcements.len(), 1);
    assert_eq!(announcements[0].match_id, "M7");
    assert_eq!(
        announcements[0].message,
        "A rated game has ended. alice@lobby won against bob@lobby. \
         Rating Adjustment: alice@lobby (1200 -> 1265) and bob@lobby (1200 -> 1135)."
    );
    assert_eq!(announcements[0].changes[0].delta(), 65);
    assert_eq!(announcements[0].changes[1].delta(), -65);

    let list = publisher.last_rating_list().unwrap();
    assert!(list.recipient.is_none());
    let ratings: Vec<_> = list
        .entries
        .iter()
        .map(|entry| (entry.nick.as_str(), entry.rating))
        .collect();
    assert_eq!(ratings, vec![("alice", Some(1265)), ("bob", Some(1135))]);

    let board = publisher.last_leaderboard().unwrap();
    assert!(board.recipient.is_none());
    assert_eq!(board.entries[0].name, "alice@lobby");
    assert_eq!(board.entries[0].rating, 1265);
    assert_eq!(board.entries[1].rating, 1135);

    assert!(!coordinator.reconciler().is_pending("M7"));
    let stats = coordinator.stats();
    assert_eq!(stats.matches_rated, 1);
    assert_eq!(stats.reports_accepted, 2);
}

#[tokio::test]
async fn test_three_player_match_recorded_unrated() {
    let (mut coordinator, publisher) = create_test_coordinator();

    for (sender, slot) in [("alice", "1"), ("bob", "2"), ("carol", "3")] {
        coordinator
            .handle(report_three(sender, "M9", slot))
            .await
            .unwrap();
    }

    assert!(publisher.announcements().is_empty());
    assert!(publisher.events().is_empty(), "unrated matches are not broadcast");

    let stats = coordinator.stats();
    assert_eq!(stats.matches_unrated, 1);
    assert_eq!(stats.matches_rated, 0);
    assert_eq!(coordinator.engine().store().match_count().unwrap(), 1);
}

#[tokio::test]
async fn test_conflicting_report_is_discarded() {
    let (mut coordinator, publisher) = create_test_coordinator();

    coordinator
        .handle(report("alice", "M3", "1", "won,defeated,"))
        .await
        .unwrap();

    let err = lobby_error(
        coordinator
            .handle(report("bob", "M3", "2", "defeated,won,"))
            .await,
    );
    assert!(matches!(err, LobbyError::ConflictingReport { .. }));
    assert_eq!(coordinator.reconciler().filled_slots("M3"), Some(1));

    // An agreeing copy still completes the match
    coordinator
        .handle(report("bob", "M3", "2", "won,defeated,"))
        .await
        .unwrap();
    assert_eq!(publisher.announcements().len(), 1);

    let stats = coordinator.stats();
    assert_eq!(stats.reports_rejected, 1);
    assert_eq!(stats.matches_rated, 1);
}

#[tokio::test]
async fn test_duplicate_slot_is_rejected() {
    let (mut coordinator, publisher) = create_test_coordinator();

    coordinator
        .handle(report("alice", "M4", "1", "won,defeated,"))
        .await
        .unwrap();

    let err = lobby_error(
        coordinator
            .handle(report("mallory", "M4", "1", "won,defeated,"))
            .await,
    );
    assert!(matches!(err, LobbyError::DuplicateSlot { slot: 1, .. }));

    let err = lobby_error(
        coordinator
            .handle(report("alice", "M4", "2", "won,defeated,"))
            .await,
    );
    assert!(matches!(err, LobbyError::DuplicateSlot { slot: 2, .. }));

    assert!(coordinator.reconciler().is_pending("M4"));
    assert!(publisher.events().is_empty());
}

#[tokio::test]
async fn test_report_with_active_player_is_refused() {
    let (mut coordinator, publisher) = create_test_coordinator();

    coordinator
        .handle(report("alice", "M5", "1", "active,defeated,"))
        .await
        .unwrap();
    let err = lobby_error(
        coordinator
            .handle(report("bob", "M5", "2", "active,defeated,"))
            .await,
    );

    assert!(matches!(err, LobbyError::MalformedReport { .. }));
    assert_eq!(coordinator.engine().store().match_count().unwrap(), 0);
    assert!(publisher.events().is_empty());
}

#[tokio::test]
async fn test_register_publishes_full_listing() {
    let (mut coordinator, publisher) = create_test_coordinator();

    coordinator
        .handle(register("alice@lobby", "alice,bob,", "2"))
        .await
        .unwrap();

    let snapshot = publisher.last_game_list().unwrap();
    assert_eq!(snapshot.games.len(), 1);

    let listing = &snapshot.games[0];
    assert_eq!(listing.host, "alice@lobby");
    assert_eq!(listing.state, ListingState::Init);
    assert_eq!(listing.players_init, "alice,bob,");
    assert_eq!(listing.nbp_init, 2);
    assert_eq!(
        listing.attributes.get("mapName").map(String::as_str),
        Some("Arcadia")
    );

    let json = serde_json::to_value(listing).unwrap();
    assert_eq!(json["state"], "init");
    assert_eq!(json["players-init"], "alice,bob,");
    assert_eq!(json["nbp-init"], 2);
    assert_eq!(json["name"], "Skirmish");
}

#[tokio::test]
async fn test_changestate_waiting_then_running() {
    let (mut coordinator, publisher) = create_test_coordinator();

    coordinator
        .handle(register("alice", "alice,bob,", "2"))
        .await
        .unwrap();

    coordinator
        .handle(changestate("alice", "alice,", "1"))
        .await
        .unwrap();
    let snapshot = publisher.last_game_list().unwrap();
    let listing = &snapshot.games[0];
    assert_eq!(listing.state, ListingState::Waiting);
    assert_eq!(listing.nbp, 1);
    assert_eq!(listing.nbp_init, 2);
    assert!(listing.start_time.is_some());

    coordinator
        .handle(changestate("alice", "alice,bob,", "2"))
        .await
        .unwrap();
    let snapshot = publisher.last_game_list().unwrap();
    let listing = &snapshot.games[0];
    assert_eq!(listing.state, ListingState::Running);
    assert_eq!(listing.players_init, "alice,bob,");
}

#[tokio::test]
async fn test_changestate_without_listing_is_rejected() {
    let (mut coordinator, publisher) = create_test_coordinator();

    let err = lobby_error(coordinator.handle(changestate("alice", "alice,", "1")).await);
    assert!(matches!(err, LobbyError::ListingNotFound { .. }));
    assert!(publisher.events().is_empty());
}

#[tokio::test]
async fn test_departing_host_removes_listing() {
    let (mut coordinator, publisher) = create_test_coordinator();

    coordinator.handle(online("alice@lobby", "alice")).await.unwrap();
    coordinator
        .handle(register("alice@lobby", "alice,", "1"))
        .await
        .unwrap();
    coordinator
        .handle(register("bob@lobby", "bob,", "1"))
        .await
        .unwrap();
    publisher.clear();

    coordinator
        .handle(offline("alice@lobby", "alice"))
        .await
        .unwrap();

    assert_eq!(publisher.kinds(), vec!["game_list", "rating_list"]);
    let snapshot = publisher.last_game_list().unwrap();
    assert_eq!(snapshot.games.len(), 1);
    assert_eq!(snapshot.games[0].host, "bob@lobby");
    assert!(!coordinator.roster().contains("alice@lobby"));
}

#[tokio::test]
async fn test_profile_resolves_nick() {
    let (mut coordinator, publisher) = create_test_coordinator();

    coordinator.handle(online("alice@lobby", "alice")).await.unwrap();
    coordinator
        .handle(report("alice@lobby", "M7", "1", "won,defeated,"))
        .await
        .unwrap();
    coordinator
        .handle(report("bob@lobby", "M7", "2", "won,defeated,"))
        .await
        .unwrap();

    coordinator
        .handle(command("carol@lobby", "profile", &[("player", "alice")]))
        .await
        .unwrap();

    let reply = publisher.last_profile().unwrap();
    assert_eq!(reply.recipient, "carol@lobby");
    assert_eq!(
        reply.response,
        ProfileResponse::Found(PlayerProfile {
            player: "alice@lobby".to_string(),
            rating: Some(1265),
            highest_rating: Some(1265),
            rank: Some(1),
            total_games_played: 1,
            wins: 1,
            losses: 0,
        })
    );

    coordinator
        .handle(command("carol@lobby", "profile", &[("player", "nobody")]))
        .await
        .unwrap();
    assert_eq!(
        publisher.last_profile().unwrap().response,
        ProfileResponse::NotFound {
            player: "nobody".to_string()
        }
    );
}

#[tokio::test]
async fn test_leaderboard_and_rating_list_requests_are_addressed() {
    let (mut coordinator, publisher) = create_test_coordinator();

    coordinator.handle(online("dave@lobby", "dave")).await.unwrap();
    publisher.clear();

    coordinator
        .handle(command("dave@lobby", "getleaderboard", &[]))
        .await
        .unwrap();
    coordinator
        .handle(command("dave@lobby", "getratinglist", &[]))
        .await
        .unwrap();

    let events = publisher.events();
    assert_eq!(events.len(), 2);
    match &events[0] {
        OutboundEvent::Leaderboard(board) => {
            assert_eq!(board.recipient.as_deref(), Some("dave@lobby"));
            assert!(board.entries.is_empty());
        }
        other => panic!("unexpected event: {:?}", other),
    }
    match &events[1] {
        OutboundEvent::RatingList(list) => {
            assert_eq!(list.recipient.as_deref(), Some("dave@lobby"));
            assert_eq!(list.entries.len(), 1);
            assert_eq!(list.entries[0].nick, "dave");
            assert_eq!(list.entries[0].rating, None);
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_command_is_rejected() {
    let (mut coordinator, publisher) = create_test_coordinator();

    let err = lobby_error(coordinator.handle(command("alice", "selfdestruct", &[])).await);
    assert!(matches!(err, LobbyError::MalformedCommand { .. }));
    assert!(publisher.events().is_empty());
    assert_eq!(coordinator.stats().events_failed, 1);
}

#[tokio::test]
async fn test_concurrent_submissions_through_handle() {
    let (coordinator, publisher) = create_test_coordinator();
    let (handle, task) = coordinator.spawn(16);

    let registrations = (0..20).map(|i| {
        let handle = handle.clone();
        async move {
            handle
                .process(register(&format!("host{}", i), "a,b,", "2"))
                .await
        }
    });
    for result in join_all(registrations).await {
        result.unwrap();
    }

    let reports = (0..10).flat_map(|i| {
        let match_id = format!("C{}", i);
        [
            report(&format!("winner{}", i), &match_id, "1", "won,defeated,"),
            report(&format!("loser{}", i), &match_id, "2", "won,defeated,"),
        ]
    });
    let submissions = reports.map(|envelope| {
        let handle = handle.clone();
        async move { handle.process(envelope).await }
    });
    for result in join_all(submissions).await {
        result.unwrap();
    }

    let stats = handle.stats().await;
    assert_eq!(stats.listings, 20);
    assert_eq!(stats.matches_rated, 10);
    assert_eq!(stats.pending_matches, 0);
    assert_eq!(stats.events_processed, 40);
    assert_eq!(publisher.announcements().len(), 10);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
    assert!(handle.process(online("late", "late")).await.is_err());
}

#[tokio::test]
async fn test_ratings_survive_restart_with_sqlite() {
    let path = std::env::temp_dir().join(format!("lobby-ledger-{}.db", uuid::Uuid::new_v4()));

    {
        let store = Arc::new(SqliteMatchStore::open(&path).unwrap());
        let (mut coordinator, _publisher) = create_test_coordinator_with_store(store);
        coordinator
            .handle(report("alice", "M7", "1", "won,defeated,"))
            .await
            .unwrap();
        coordinator
            .handle(report("bob", "M7", "2", "won,defeated,"))
            .await
            .unwrap();
    }

    let store = Arc::new(SqliteMatchStore::open(&path).unwrap());
    let (mut coordinator, publisher) = create_test_coordinator_with_store(store);

    coordinator
        .handle(command("carol", "getleaderboard", &[]))
        .await
        .unwrap();
    let board = publisher.last_leaderboard().unwrap();
    let entries: Vec<_> = board
        .entries
        .iter()
        .map(|entry| (entry.name.as_str(), entry.rating))
        .collect();
    assert_eq!(entries, vec![("alice", 1265), ("bob", 1135)]);

    // Replaying a recorded match id must not rate it twice
    coordinator
        .handle(report("alice", "M7", "1", "won,defeated,"))
        .await
        .unwrap();
    let err = lobby_error(
        coordinator
            .handle(report("bob", "M7", "2", "won,defeated,"))
            .await,
    );
    assert!(matches!(err, LobbyError::DuplicateMatch { .. }));
    assert_eq!(coordinator.engine().store().match_count().unwrap(), 1);

    drop(coordinator);
    let _ = std::fs::remove_file(&path);
}
