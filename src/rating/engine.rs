//! Rating engine
//!
//! Persists finalized matches and rates the clean 1v1 ones. Matches with
//! any other shape are still recorded, just left unrated.

use crate::config::RatingConfig;
use crate::error::{LobbyError, Result};
use crate::rating::calculator::{EloCalculator, MatchResult};
use crate::rating::storage::{MatchRecord, MatchStore, PlayerRecord};
use crate::report::ExpandedReport;
use crate::types::{LeaderboardEntry, PlayerId, PlayerProfile, ProfileResponse, RatingChange};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Why a recorded match did not change any rating
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnratedReason {
    /// Only 1v1 matches are rated
    ParticipantCount(usize),
    /// Exactly one participant must be flagged as the winner
    WinnerCount(usize),
    /// A rating fell outside the range the formula supports
    RatingOutOfRange { rating: i32, opponent_rating: i32 },
}

impl UnratedReason {
    /// Metrics label
    pub fn label(&self) -> &'static str {
        match self {
            UnratedReason::ParticipantCount(_) => "participant_count",
            UnratedReason::WinnerCount(_) => "winner_count",
            UnratedReason::RatingOutOfRange { .. } => "rating_out_of_range",
        }
    }
}

impl fmt::Display for UnratedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnratedReason::ParticipantCount(count) => write!(f, "{} participants", count),
            UnratedReason::WinnerCount(count) => write!(f, "{} winners", count),
            UnratedReason::RatingOutOfRange {
                rating,
                opponent_rating,
            } => write!(
                f,
                "ratings {} / {} outside supported range",
                rating, opponent_rating
            ),
        }
    }
}

/// Result of a rated match
#[derive(Debug, Clone)]
pub struct RatedGame {
    pub record: MatchRecord,
    /// Both participants in slot order
    pub changes: Vec<RatingChange>,
    /// Broadcast text describing the rating changes
    pub announcement: String,
}

/// What happened to a finalized report
#[derive(Debug, Clone)]
pub enum GameOutcome {
    Rated(RatedGame),
    Unrated {
        record: MatchRecord,
        reason: UnratedReason,
    },
}

impl GameOutcome {
    pub fn record(&self) -> &MatchRecord {
        match self {
            GameOutcome::Rated(rated) => &rated.record,
            GameOutcome::Unrated { record, .. } => record,
        }
    }

    pub fn is_rated(&self) -> bool {
        matches!(self, GameOutcome::Rated(_))
    }
}

/// Persists matches and maintains player ratings
pub struct RatingEngine {
    store: Arc<dyn MatchStore>,
    calculator: EloCalculator,
    leaderboard_size: usize,
}

impl RatingEngine {
    pub fn new(store: Arc<dyn MatchStore>, config: RatingConfig) -> Result<Self> {
        let leaderboard_size = config.leaderboard_size;
        let calculator = EloCalculator::new(config)?;
        Ok(Self {
            store,
            calculator,
            leaderboard_size,
        })
    }

    pub fn calculator(&self) -> &EloCalculator {
        &self.calculator
    }

    pub fn store(&self) -> &Arc<dyn MatchStore> {
        &self.store
    }

    /// Persist a finalized match and rate it when it is a clean 1v1.
    ///
    /// Reports with a participant still marked active are refused without
    /// touching storage.
    pub fn add_and_rate_game(&self, report: &ExpandedReport) -> Result<GameOutcome> {
        if report.has_active_player() {
            warn!(
                "Match '{}' reported while a player is still active, ignored",
                report.match_id
            );
            return Err(LobbyError::MalformedReport {
                match_id: report.match_id.clone(),
                reason: "a participant is still active".to_string(),
            }
            .into());
        }

        let record = MatchRecord::from_report(report);
        self.store.insert_match(&record)?;
        info!(
            "Recorded match '{}' on '{}' - {} participants, winner: {:?}",
            record.match_id,
            record.map_name,
            record.participants.len(),
            record.winner
        );

        if let Err(reason) = Self::verify_rateable(report) {
            info!("Match '{}' left unrated: {}", record.match_id, reason);
            return Ok(GameOutcome::Unrated { record, reason });
        }

        self.rate(record, report)
    }

    fn verify_rateable(report: &ExpandedReport) -> std::result::Result<(), UnratedReason> {
        let participants = report.players.len();
        if participants != 2 {
            return Err(UnratedReason::ParticipantCount(participants));
        }
        let winners = report.winners().len();
        if winners != 1 {
            return Err(UnratedReason::WinnerCount(winners));
        }
        Ok(())
    }

    fn rate(&self, record: MatchRecord, report: &ExpandedReport) -> Result<GameOutcome> {
        let participants = report.participants();
        let [first_id, second_id] = participants.as_slice() else {
            return Ok(GameOutcome::Unrated {
                reason: UnratedReason::ParticipantCount(participants.len()),
                record,
            });
        };

        let first_result = if record.winner.as_deref() == Some(first_id.as_str()) {
            MatchResult::Win
        } else {
            MatchResult::Loss
        };

        let first = self.store.get_or_create_player(first_id)?;
        let second = self.store.get_or_create_player(second_id)?;

        let first_old = self.effective_rating(&first);
        let second_old = self.effective_rating(&second);
        let first_games = self.store.games_played(first_id)? as i64;
        let second_games = self.store.games_played(second_id)? as i64;

        let deltas = self
            .calculator
            .adjust(first_old, second_old, first_games, second_games, first_result)
            .and_then(|first_delta| {
                self.calculator
                    .adjust(
                        second_old,
                        first_old,
                        second_games,
                        first_games,
                        first_result.opposite(),
                    )
                    .map(|second_delta| (first_delta, second_delta))
            });

        let (first_delta, second_delta) = match deltas {
            Ok(deltas) => deltas,
            Err(e) => match e.downcast_ref::<LobbyError>() {
                Some(LobbyError::RatingOutOfRange {
                    rating,
                    opponent_rating,
                }) => {
                    warn!("Match '{}' left unrated: {}", record.match_id, e);
                    return Ok(GameOutcome::Unrated {
                        reason: UnratedReason::RatingOutOfRange {
                            rating: *rating,
                            opponent_rating: *opponent_rating,
                        },
                        record,
                    });
                }
                _ => return Err(e),
            },
        };

        let first_updated = Self::apply(first, first_old + first_delta);
        let second_updated = Self::apply(second, second_old + second_delta);
        self.store
            .update_players(&[first_updated.clone(), second_updated.clone()])?;

        let changes = vec![
            RatingChange {
                player_id: first_id.clone(),
                old_rating: first_old,
                new_rating: first_updated.rating,
            },
            RatingChange {
                player_id: second_id.clone(),
                old_rating: second_old,
                new_rating: second_updated.rating,
            },
        ];

        let announcement = format!(
            "A rated game has ended. {} {} against {}. Rating Adjustment: {} ({} -> {}) and {} ({} -> {}).",
            first_id,
            if first_result == MatchResult::Win { "won" } else { "lost" },
            second_id,
            first_id,
            first_old,
            first_updated.rating,
            second_id,
            second_old,
            second_updated.rating
        );

        info!(
            "Rated match '{}': {} {:+}, {} {:+}",
            record.match_id, first_id, first_delta, second_id, second_delta
        );

        Ok(GameOutcome::Rated(RatedGame {
            record,
            changes,
            announcement,
        }))
    }

    fn effective_rating(&self, player: &PlayerRecord) -> i32 {
        if player.is_rated() {
            player.rating
        } else {
            debug!(
                "Assigning default rating {} to '{}'",
                self.calculator.default_rating(),
                player.id
            );
            self.calculator.default_rating()
        }
    }

    fn apply(mut player: PlayerRecord, new_rating: i32) -> PlayerRecord {
        player.rating = new_rating;
        player.highest_rating = Some(
            player
                .highest_rating
                .map_or(new_rating, |highest| highest.max(new_rating)),
        );
        player
    }

    /// Top rated players
    pub fn leaderboard(&self) -> Result<Vec<LeaderboardEntry>> {
        Ok(self
            .store
            .top_rated(self.leaderboard_size)?
            .into_iter()
            .map(|player| LeaderboardEntry {
                name: player.id,
                rating: player.rating,
            })
            .collect())
    }

    /// Visible ratings of the given players; unknown or unrated map to `None`
    pub fn ratings_for(&self, player_ids: &[PlayerId]) -> Result<BTreeMap<PlayerId, Option<i32>>> {
        let mut ratings = BTreeMap::new();
        for player_id in player_ids {
            let rating = self
                .store
                .get_player(player_id)?
                .and_then(|player| player.visible_rating());
            ratings.insert(player_id.clone(), rating);
        }
        Ok(ratings)
    }

    /// Statistics of one player
    pub fn profile(&self, player_id: &str) -> Result<ProfileResponse> {
        let Some(player) = self.store.get_player(player_id)? else {
            return Ok(ProfileResponse::NotFound {
                player: player_id.to_string(),
            });
        };

        let total_games_played = self.store.games_played(player_id)?;
        let wins = self.store.wins(player_id)?;
        let rank = match player.visible_rating() {
            Some(rating) => Some(self.store.rank_of(rating)?),
            None => None,
        };

        Ok(ProfileResponse::Found(PlayerProfile {
            player: player.id.clone(),
            rating: player.visible_rating(),
            highest_rating: player.highest_rating,
            rank,
            total_games_played,
            wins,
            losses: total_games_played.saturating_sub(wins),
        }))
    }
}

impl fmt::Debug for RatingEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RatingEngine")
            .field("calculator", &self.calculator)
            .field("leaderboard_size", &self.leaderboard_size)
            .finish()
    }
}
