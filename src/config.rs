//! Application configuration (§6).
//!
//! Loaded from the environment with the same `.env` + `unwrap_or_else`
//! fallback idiom the teacher uses for its own `Config::from_env`.

use crate::models::EfficiencyTieBreak;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowClosure {
    MatchStart,
    MinutesBeforeStart(i64),
}

#[derive(Debug, Clone)]
pub struct ScoringConfig {
    pub exact_points: i32,
    pub winner_points: i32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            exact_points: 3,
            winner_points: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    /// Total wall-clock budget per event before it is dead-lettered.
    pub budget_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: 1,
            max_delay_secs: 300,
            budget_secs: 24 * 3600,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub port: u16,
    pub jwt_secret: String,
    pub scoring: ScoringConfig,
    pub window_closure: WindowClosure,
    pub tie_break: EfficiencyTieBreak,
    pub retry: RetryConfig,
    pub leaderboard_staleness_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./contest.db".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let jwt_secret = std::env::var("JWT_SECRET")
            .unwrap_or_else(|_| "dev-secret-change-me".to_string());

        let exact_points = std::env::var("SCORING_EXACT_POINTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3);

        let winner_points = std::env::var("SCORING_WINNER_POINTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);

        let window_closure = match std::env::var("WINDOW_DEFAULT_CLOSURE") {
            Ok(v) if v.starts_with("minutes_before_start:") => {
                let n = v
                    .rsplit(':')
                    .next()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0);
                WindowClosure::MinutesBeforeStart(n)
            }
            _ => WindowClosure::MatchStart,
        };

        let tie_break = match std::env::var("TIE_BREAK_EFFICIENCY").as_deref() {
            Ok("more_predictions_higher") => EfficiencyTieBreak::MorePredictionsHigher,
            _ => EfficiencyTieBreak::FewerPredictionsHigher,
        };

        let retry = RetryConfig {
            base_delay_secs: std::env::var("RETRY_BASE_DELAY_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
            max_delay_secs: std::env::var("RETRY_MAX_DELAY_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
            budget_secs: std::env::var("RETRY_BUDGET_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(24 * 3600),
        };

        let leaderboard_staleness_secs = std::env::var("LEADERBOARD_STALENESS_MAX_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        Ok(Self {
            database_path,
            port,
            jwt_secret,
            scoring: ScoringConfig {
                exact_points,
                winner_points,
            },
            window_closure,
            tie_break,
            retry,
            leaderboard_staleness_secs,
        })
    }
}
