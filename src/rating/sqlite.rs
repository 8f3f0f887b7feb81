//! SQLite-backed match store (rusqlite)
//!
//! Schema:
//! - `players`: one row per identity with the current and highest rating
//! - `matches`: one row per recorded match, `match_id` unique
//! - `player_match_stats`: one row per participant; the per-player
//!   statistics are kept as a single JSON object

use crate::error::{LobbyError, Result};
use crate::rating::storage::{MatchRecord, MatchStore, ParticipantRecord, PlayerRecord};
use crate::types::{Fields, PlayerState, UNRATED};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS players (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        identity TEXT NOT NULL UNIQUE,
        rating INTEGER NOT NULL DEFAULT -1,
        highest_rating INTEGER
    );

    CREATE TABLE IF NOT EXISTS matches (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        match_id TEXT NOT NULL UNIQUE,
        map_name TEXT NOT NULL,
        duration INTEGER NOT NULL,
        teams_locked INTEGER NOT NULL,
        winner_id INTEGER REFERENCES players(id),
        recorded_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS player_match_stats (
        match_id INTEGER NOT NULL REFERENCES matches(id),
        player_id INTEGER NOT NULL REFERENCES players(id),
        slot INTEGER NOT NULL,
        state TEXT NOT NULL,
        stats TEXT NOT NULL,
        PRIMARY KEY (match_id, player_id)
    );

    CREATE INDEX IF NOT EXISTS idx_players_rating ON players(rating);
    CREATE INDEX IF NOT EXISTS idx_stats_player ON player_match_stats(player_id);
";

/// Match store persisted in a SQLite database
#[derive(Debug)]
pub struct SqliteMatchStore {
    conn: Mutex<Connection>,
}

impl SqliteMatchStore {
    /// Open (or create) the database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(LobbyError::from)?;
        info!("Opened match database at {}", path.display());
        Self::with_connection(conn)
    }

    /// Database living only as long as the store
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(LobbyError::from)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(LobbyError::from)?;
        conn.execute_batch(SCHEMA).map_err(LobbyError::from)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| {
            LobbyError::InternalError {
                message: "Failed to acquire database lock".to_string(),
            }
            .into()
        })
    }
}

fn ensure_player(conn: &Connection, identity: &str) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT OR IGNORE INTO players (identity, rating) VALUES (?1, ?2)",
        params![identity, UNRATED],
    )?;
    conn.query_row(
        "SELECT id FROM players WHERE identity = ?1",
        params![identity],
        |row| row.get(0),
    )
}

fn player_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PlayerRecord> {
    Ok(PlayerRecord {
        id: row.get(0)?,
        rating: row.get(1)?,
        highest_rating: row.get(2)?,
    })
}

fn storage_error(message: impl Into<String>) -> anyhow::Error {
    LobbyError::StorageError {
        message: message.into(),
    }
    .into()
}

impl MatchStore for SqliteMatchStore {
    fn get_or_create_player(&self, player_id: &str) -> Result<PlayerRecord> {
        let conn = self.conn()?;
        ensure_player(&conn, player_id).map_err(LobbyError::from)?;
        let player = conn
            .query_row(
                "SELECT identity, rating, highest_rating FROM players WHERE identity = ?1",
                params![player_id],
                player_from_row,
            )
            .map_err(LobbyError::from)?;
        Ok(player)
    }

    fn get_player(&self, player_id: &str) -> Result<Option<PlayerRecord>> {
        let conn = self.conn()?;
        let player = conn
            .query_row(
                "SELECT identity, rating, highest_rating FROM players WHERE identity = ?1",
                params![player_id],
                player_from_row,
            )
            .optional()
            .map_err(LobbyError::from)?;
        Ok(player)
    }

    fn insert_match(&self, record: &MatchRecord) -> Result<()> {
        let mut conn = self.conn()?;

        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM matches WHERE match_id = ?1)",
                params![record.match_id],
                |row| row.get(0),
            )
            .map_err(LobbyError::from)?;
        if exists {
            return Err(LobbyError::DuplicateMatch {
                match_id: record.match_id.clone(),
            }
            .into());
        }

        let tx = conn.transaction().map_err(LobbyError::from)?;

        let mut player_rows = Vec::with_capacity(record.participants.len());
        for participant in &record.participants {
            let row_id = ensure_player(&tx, &participant.player_id).map_err(LobbyError::from)?;
            player_rows.push(row_id);
        }

        let winner_row = match &record.winner {
            Some(winner) => Some(ensure_player(&tx, winner).map_err(LobbyError::from)?),
            None => None,
        };

        tx.execute(
            "INSERT INTO matches (match_id, map_name, duration, teams_locked, winner_id, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.match_id,
                record.map_name,
                record.duration_secs as i64,
                record.teams_locked,
                winner_row,
                record.recorded_at.to_rfc3339(),
            ],
        )
        .map_err(LobbyError::from)?;
        let match_row = tx.last_insert_rowid();

        for (participant, player_row) in record.participants.iter().zip(player_rows) {
            let stats = serde_json::to_string(&participant.stats)?;
            tx.execute(
                "INSERT INTO player_match_stats (match_id, player_id, slot, state, stats)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    match_row,
                    player_row,
                    participant.slot,
                    participant.state.to_string(),
                    stats,
                ],
            )
            .map_err(LobbyError::from)?;
        }

        tx.commit().map_err(LobbyError::from)?;
        Ok(())
    }

    fn get_match(&self, match_id: &str) -> Result<Option<MatchRecord>> {
        let conn = self.conn()?;

        let header = conn
            .query_row(
                "SELECT m.id, m.map_name, m.duration, m.teams_locked, w.identity, m.recorded_at
                 FROM matches m LEFT JOIN players w ON w.id = m.winner_id
                 WHERE m.match_id = ?1",
                params![match_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, bool>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()
            .map_err(LobbyError::from)?;

        let Some((row_id, map_name, duration, teams_locked, winner, recorded_at)) = header else {
            return Ok(None);
        };

        let mut stmt = conn
            .prepare(
                "SELECT p.identity, s.slot, s.state, s.stats
                 FROM player_match_stats s JOIN players p ON p.id = s.player_id
                 WHERE s.match_id = ?1 ORDER BY s.slot",
            )
            .map_err(LobbyError::from)?;
        let rows = stmt
            .query_map(params![row_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(LobbyError::from)?;

        let mut participants = Vec::new();
        for row in rows {
            let (player_id, slot, state, stats) = row.map_err(LobbyError::from)?;
            let stats: Fields = serde_json::from_str(&stats)?;
            participants.push(ParticipantRecord {
                player_id,
                slot,
                state: PlayerState::parse(&state),
                stats,
            });
        }

        let recorded_at = DateTime::parse_from_rfc3339(&recorded_at)
            .map_err(|e| storage_error(format!("bad timestamp for match '{}': {}", match_id, e)))?
            .with_timezone(&Utc);

        Ok(Some(MatchRecord {
            match_id: match_id.to_string(),
            map_name,
            duration_secs: duration.max(0) as u64,
            teams_locked,
            participants,
            winner,
            recorded_at,
        }))
    }

    fn update_players(&self, players: &[PlayerRecord]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(LobbyError::from)?;

        for player in players {
            let changed = tx
                .execute(
                    "UPDATE players SET rating = ?1, highest_rating = ?2 WHERE identity = ?3",
                    params![player.rating, player.highest_rating, player.id],
                )
                .map_err(LobbyError::from)?;
            if changed == 0 {
                return Err(LobbyError::PlayerNotFound {
                    player_id: player.id.clone(),
                }
                .into());
            }
        }

        tx.commit().map_err(LobbyError::from)?;
        Ok(())
    }

    fn games_played(&self, player_id: &str) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM player_match_stats s JOIN players p ON p.id = s.player_id
                 WHERE p.identity = ?1",
                params![player_id],
                |row| row.get(0),
            )
            .map_err(LobbyError::from)?;
        Ok(count.max(0) as u64)
    }

    fn wins(&self, player_id: &str) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM matches m JOIN players p ON p.id = m.winner_id
                 WHERE p.identity = ?1",
                params![player_id],
                |row| row.get(0),
            )
            .map_err(LobbyError::from)?;
        Ok(count.max(0) as u64)
    }

    fn top_rated(&self, limit: usize) -> Result<Vec<PlayerRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT identity, rating, highest_rating FROM players
                 WHERE rating != ?1 ORDER BY rating DESC, identity ASC LIMIT ?2",
            )
            .map_err(LobbyError::from)?;
        let rows = stmt
            .query_map(
                params![UNRATED, i64::try_from(limit).unwrap_or(i64::MAX)],
                player_from_row,
            )
            .map_err(LobbyError::from)?;

        let mut players = Vec::new();
        for row in rows {
            players.push(row.map_err(LobbyError::from)?);
        }
        Ok(players)
    }

    fn rank_of(&self, rating: i32) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM players WHERE rating != ?1 AND rating >= ?2",
                params![UNRATED, rating],
                |row| row.get(0),
            )
            .map_err(LobbyError::from)?;
        Ok(count.max(0) as u64)
    }

    fn match_count(&self) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM matches", [], |row| row.get(0))
            .map_err(LobbyError::from)?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(match_id: &str, winner: Option<&str>) -> MatchRecord {
        let participants = ["alice", "bob"]
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let state = if Some(*id) == winner {
                    PlayerState::Won
                } else {
                    PlayerState::Defeated
                };
                let mut stats = Fields::new();
                stats.insert("unitsKilled".to_string(), (i * 10).to_string());
                ParticipantRecord {
                    player_id: id.to_string(),
                    slot: i as u32 + 1,
                    state,
                    stats,
                }
            })
            .collect();

        MatchRecord {
            match_id: match_id.to_string(),
            map_name: "Oasis".to_string(),
            duration_secs: 1234,
            teams_locked: true,
            participants,
            winner: winner.map(str::to_string),
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_match_round_trip() {
        let store = SqliteMatchStore::open_in_memory().unwrap();
        let original = record("M1", Some("alice"));
        store.insert_match(&original).unwrap();

        let loaded = store.get_match("M1").unwrap().unwrap();
        assert_eq!(loaded.map_name, "Oasis");
        assert_eq!(loaded.duration_secs, 1234);
        assert!(loaded.teams_locked);
        assert_eq!(loaded.winner.as_deref(), Some("alice"));
        assert_eq!(loaded.participants, original.participants);
        assert_eq!(
            loaded.recorded_at.timestamp(),
            original.recorded_at.timestamp()
        );

        assert!(store.get_match("missing").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_match_rejected() {
        let store = SqliteMatchStore::open_in_memory().unwrap();
        store.insert_match(&record("M1", Some("alice"))).unwrap();

        let err = store.insert_match(&record("M1", None)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LobbyError>(),
            Some(LobbyError::DuplicateMatch { .. })
        ));
        assert_eq!(store.match_count().unwrap(), 1);
    }

    #[test]
    fn test_counts_and_ratings() {
        let store = SqliteMatchStore::open_in_memory().unwrap();
        store.insert_match(&record("M1", Some("alice"))).unwrap();
        store.insert_match(&record("M2", Some("bob"))).unwrap();
        store.insert_match(&record("M3", None)).unwrap();

        assert_eq!(store.games_played("alice").unwrap(), 3);
        assert_eq!(store.wins("alice").unwrap(), 1);
        assert_eq!(store.games_played("nobody").unwrap(), 0);

        let alice = store.get_or_create_player("alice").unwrap();
        assert_eq!(alice.rating, UNRATED);
        assert!(store.top_rated(10).unwrap().is_empty());

        store
            .update_players(&[
                PlayerRecord {
                    id: "alice".to_string(),
                    rating: 1265,
                    highest_rating: Some(1265),
                },
                PlayerRecord {
                    id: "bob".to_string(),
                    rating: 1135,
                    highest_rating: Some(1200),
                },
            ])
            .unwrap();

        let top = store.top_rated(10).unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].id, "alice");
        assert_eq!(top[1].highest_rating, Some(1200));
        assert_eq!(store.rank_of(1135).unwrap(), 2);
    }

    #[test]
    fn test_update_unknown_player_rolls_back() {
        let store = SqliteMatchStore::open_in_memory().unwrap();
        store.get_or_create_player("alice").unwrap();

        let result = store.update_players(&[
            PlayerRecord {
                id: "alice".to_string(),
                rating: 1300,
                highest_rating: Some(1300),
            },
            PlayerRecord {
                id: "ghost".to_string(),
                rating: 1300,
                highest_rating: Some(1300),
            },
        ]);
        assert!(result.is_err());
        assert_eq!(store.get_player("alice").unwrap().unwrap().rating, UNRATED);
    }

    #[test]
    fn test_file_backed_store_persists() {
        let path = std::env::temp_dir().join(format!(
            "lobby-ledger-test-{}.db",
            crate::utils::generate_correlation_id()
        ));

        {
            let store = SqliteMatchStore::open(&path).unwrap();
            store.insert_match(&record("M1", Some("bob"))).unwrap();
        }

        let reopened = SqliteMatchStore::open(&path).unwrap();
        assert_eq!(reopened.wins("bob").unwrap(), 1);

        let _ = std::fs::remove_file(&path);
    }
}
