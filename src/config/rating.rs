//! Rating formula configuration

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Constants of the rating adjustment formula
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingConfig {
    /// Rating above which adjustments stop getting faster
    pub k_factor_constant_rating: i32,
    /// Games after which a player's volatility stabilises
    pub volatility_constant: i32,
    /// Rating gap beyond which the outcome counts as certain
    pub sure_win_difference: i32,
    /// Subtracted from every adjustment to counter inflation
    pub anti_inflation: f64,
    /// Rating assigned on a player's first rated outcome
    pub default_rating: i32,
    /// Lowest rating the formula accepts
    pub minimum_supported_rating: i32,
    /// Entries in the leaderboard
    pub leaderboard_size: usize,
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            k_factor_constant_rating: 2200,
            volatility_constant: 20,
            sure_win_difference: 600,
            anti_inflation: 0.015,
            default_rating: 1200,
            minimum_supported_rating: -2199,
            leaderboard_size: 100,
        }
    }
}

impl RatingConfig {
    /// Validate formula constants
    pub fn validate(&self) -> Result<()> {
        if self.k_factor_constant_rating <= 0 {
            return Err(anyhow!("K-factor constant rating must be positive"));
        }
        if self.volatility_constant <= 0 {
            return Err(anyhow!("Volatility constant must be positive"));
        }
        if self.sure_win_difference <= 0 {
            return Err(anyhow!("Sure win difference must be positive"));
        }
        if !self.anti_inflation.is_finite() || self.anti_inflation < 0.0 {
            return Err(anyhow!("Anti-inflation term must be a non-negative number"));
        }
        // The k-factor reaches zero at -K; anything at or below it divides by zero
        if self.minimum_supported_rating <= -self.k_factor_constant_rating {
            return Err(anyhow!(
                "Minimum supported rating must be above -{}",
                self.k_factor_constant_rating
            ));
        }
        if self.default_rating < self.minimum_supported_rating {
            return Err(anyhow!("Default rating is below the minimum supported rating"));
        }
        if self.leaderboard_size == 0 {
            return Err(anyhow!("Leaderboard size must be greater than 0"));
        }
        Ok(())
    }
}
