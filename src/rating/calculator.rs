//! ELO-style rating adjustment
//!
//! The adjustment grows with the rating gap, shrinks with a per-player
//! volatility factor and is clamped to zero in the direction that would
//! punish a winner or reward a loser. Volatility starts low for newcomers
//! and saturates after a fixed number of games; the k-factor saturates at a
//! fixed rating.

use crate::config::RatingConfig;
use crate::error::{LobbyError, Result};
use serde::{Deserialize, Serialize};

/// Outcome of a match from one participant's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchResult {
    Win,
    Draw,
    Loss,
}

impl MatchResult {
    /// Numeric form used by the formula (1, 0, -1)
    pub fn as_factor(self) -> i32 {
        match self {
            MatchResult::Win => 1,
            MatchResult::Draw => 0,
            MatchResult::Loss => -1,
        }
    }

    /// The same match seen from the opponent's side
    pub fn opposite(self) -> Self {
        match self {
            MatchResult::Win => MatchResult::Loss,
            MatchResult::Draw => MatchResult::Draw,
            MatchResult::Loss => MatchResult::Win,
        }
    }
}

/// Rating adjustment calculator
#[derive(Debug, Clone)]
pub struct EloCalculator {
    config: RatingConfig,
}

impl EloCalculator {
    /// Create a calculator; the constants are validated up front
    pub fn new(config: RatingConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| LobbyError::ConfigurationError {
                message: e.to_string(),
            })?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RatingConfig {
        &self.config
    }

    /// Rating given to a player on their first rated outcome
    pub fn default_rating(&self) -> i32 {
        self.config.default_rating
    }

    /// Adjustment speed; grows linearly with rating up to the saturation point
    pub fn k_factor(&self, rating: i32) -> f64 {
        let k_const = f64::from(self.config.k_factor_constant_rating);
        let capped = f64::from(rating.min(self.config.k_factor_constant_rating));
        50.0 * (capped / k_const + 1.0) / 2.0
    }

    /// Per-player divisor; low for newcomers, saturates after enough games
    pub fn volatility(&self, rating: i32, games_played: i64) -> f64 {
        let vol_const = i64::from(self.config.volatility_constant);
        let games = games_played.clamp(0, vol_const) as f64;
        self.k_factor(rating) * ((games / vol_const as f64 + 0.25) / 1.25)
    }

    /// Rating delta for a player rated `rating` after a match against
    /// `opponent_rating`.
    ///
    /// Fails with [`LobbyError::RatingOutOfRange`] when either rating is
    /// below the supported floor. The opponent's game count is accepted for
    /// symmetry of the call site but does not influence the result.
    pub fn adjust(
        &self,
        rating: i32,
        opponent_rating: i32,
        games_played: i64,
        _opponent_games_played: i64,
        result: MatchResult,
    ) -> Result<i32> {
        let floor = self.config.minimum_supported_rating;
        if rating < floor || opponent_rating < floor {
            return Err(LobbyError::RatingOutOfRange {
                rating,
                opponent_rating,
            }
            .into());
        }

        let gap = f64::from(opponent_rating) - f64::from(rating);
        let swing = f64::from(result.as_factor() * self.config.sure_win_difference);
        let raw = (gap + swing) / self.volatility(rating, games_played) - self.config.anti_inflation;

        let clamped = match result {
            MatchResult::Win => raw.max(0.0),
            MatchResult::Loss => raw.min(0.0),
            MatchResult::Draw => raw,
        };

        Ok(clamped.round_ties_even() as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn calculator() -> EloCalculator {
        EloCalculator::new(RatingConfig::default()).unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = RatingConfig {
            volatility_constant: 0,
            ..Default::default()
        };
        assert!(EloCalculator::new(config).is_err());
    }

    #[test]
    fn test_equal_newcomers() {
        let calc = calculator();
        assert_eq!(calc.adjust(1200, 1200, 1, 1, MatchResult::Win).unwrap(), 65);
        assert_eq!(calc.adjust(1200, 1200, 1, 1, MatchResult::Loss).unwrap(), -65);
    }

    #[test]
    fn test_veterans_move_less() {
        let calc = calculator();
        let newcomer = calc.adjust(1500, 1500, 1, 40, MatchResult::Win).unwrap();
        let veteran = calc.adjust(1500, 1500, 40, 1, MatchResult::Win).unwrap();
        assert!(veteran < newcomer);
        assert!(veteran > 0);
    }

    #[test]
    fn test_draw_between_equals_only_pays_inflation_tax() {
        let calc = calculator();
        assert_eq!(calc.adjust(1500, 1500, 20, 20, MatchResult::Draw).unwrap(), 0);
    }

    #[test]
    fn test_draw_moves_towards_opponent() {
        let calc = calculator();
        assert!(calc.adjust(1200, 1400, 20, 20, MatchResult::Draw).unwrap() > 0);
        assert!(calc.adjust(1400, 1200, 20, 20, MatchResult::Draw).unwrap() < 0);
    }

    #[test]
    fn test_sure_win_pays_nothing() {
        let calc = calculator();
        assert_eq!(calc.adjust(2000, 1400, 10, 10, MatchResult::Win).unwrap(), 0);
        assert_eq!(calc.adjust(1400, 2000, 10, 10, MatchResult::Loss).unwrap(), 0);
    }

    #[test]
    fn test_rating_floor() {
        let calc = calculator();
        assert!(calc.adjust(-2199, 1200, 1, 1, MatchResult::Win).is_ok());

        let err = calc
            .adjust(-2200, 1200, 1, 1, MatchResult::Win)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LobbyError>(),
            Some(LobbyError::RatingOutOfRange { rating: -2200, .. })
        ));

        assert!(calc.adjust(1200, -2200, 1, 1, MatchResult::Loss).is_err());
    }

    #[test]
    fn test_games_played_is_clamped() {
        let calc = calculator();
        assert_eq!(calc.volatility(1200, -5), calc.volatility(1200, 0));
        assert_eq!(calc.volatility(1200, 500), calc.volatility(1200, 20));
    }

    #[test]
    fn test_match_result_opposite() {
        assert_eq!(MatchResult::Win.opposite(), MatchResult::Loss);
        assert_eq!(MatchResult::Draw.opposite(), MatchResult::Draw);
        assert_eq!(MatchResult::Loss.as_factor(), -1);
    }

    fn any_result() -> impl Strategy<Value = MatchResult> {
        prop_oneof![
            Just(MatchResult::Win),
            Just(MatchResult::Draw),
            Just(MatchResult::Loss)
        ]
    }

    proptest! {
        #[test]
        fn prop_k_factor_saturates(rating in 2200i32..100_000) {
            let calc = calculator();
            prop_assert_eq!(calc.k_factor(rating), calc.k_factor(2200));
        }

        #[test]
        fn prop_adjust_saturates_for_fixed_gap(
            rating in 2200i32..50_000,
            gap in -1000i32..1000,
            games in 0i64..100,
            result in any_result(),
        ) {
            let calc = calculator();
            let base = calc.adjust(2200, 2200 + gap, games, games, result).unwrap();
            prop_assert_eq!(calc.adjust(rating, rating + gap, games, games, result).unwrap(), base);
        }

        #[test]
        fn prop_sure_win_is_zero_for_both_sides(
            low in -2199i32..3000,
            extra in 0i32..2000,
            games in 0i64..60,
            opponent_games in 0i64..60,
        ) {
            let calc = calculator();
            let high = low + 600 + extra;
            prop_assert_eq!(calc.adjust(high, low, games, opponent_games, MatchResult::Win).unwrap(), 0);
            prop_assert_eq!(calc.adjust(low, high, opponent_games, games, MatchResult::Loss).unwrap(), 0);
        }

        #[test]
        fn prop_below_floor_always_fails(
            rating in -1_000_000i32..-2199,
            other in -1_000_000i32..1_000_000,
            games in -10i64..100,
            result in any_result(),
        ) {
            let calc = calculator();
            prop_assert!(calc.adjust(rating, other, games, games, result).is_err());
            prop_assert!(calc.adjust(other, rating, games, games, result).is_err());
        }

        #[test]
        fn prop_winner_never_loses_points(
            rating in -2199i32..4000,
            opponent in -2199i32..4000,
            games in 0i64..60,
        ) {
            let calc = calculator();
            prop_assert!(calc.adjust(rating, opponent, games, games, MatchResult::Win).unwrap() >= 0);
            prop_assert!(calc.adjust(rating, opponent, games, games, MatchResult::Loss).unwrap() <= 0);
        }
    }
}
