use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;

pub const DEFAULT_SEASON: &str = "2023-24";
pub const DEFAULT_BASE_URL: &str = "https://stats.nba.com/stats";
pub const COMBINED_DATA_FILE: &str = "combined_data.csv";

/// Everything a run needs, resolved once and passed down explicitly.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Season whose games are collected for training.
    pub season: String,
    /// Season whose aggregates describe teams at prediction time.
    pub stats_season: String,
    pub base_url: String,
    pub cache_dir: PathBuf,
    pub cache_ttl: Duration,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
    pub test_fraction: f64,
    pub split_seed: u64,
    pub normalize_stats: bool,
    pub output_dir: PathBuf,
    pub model_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay slept after the given failed attempt (1-based). Grows linearly.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt.max(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl PipelineConfig {
    /// Reads `.env.local` / `.env` if present, then the process environment.
    pub fn from_env() -> Self {
        let _ = dotenvy::from_filename(".env.local");
        let _ = dotenvy::from_filename(".env");
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let text = |key: &str, default: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let number = |key: &str, default: u64| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };

        let season = text("NBA_SEASON", DEFAULT_SEASON);
        let stats_season = text("NBA_STATS_SEASON", &season);
        let test_fraction = lookup("NBA_TEST_FRACTION")
            .and_then(|v| v.trim().parse::<f64>().ok())
            .unwrap_or(0.2);
        let normalize_stats = lookup("NBA_NORMALIZE_STATS")
            .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no"))
            .unwrap_or(true);

        Self {
            stats_season,
            season,
            base_url: text("NBA_STATS_BASE_URL", DEFAULT_BASE_URL),
            cache_dir: PathBuf::from(text("NBA_CACHE_DIR", "cache")),
            cache_ttl: Duration::from_secs(number("NBA_CACHE_TTL_HOURS", 24).saturating_mul(3600)),
            retry: RetryPolicy {
                max_attempts: number("NBA_MAX_RETRIES", 5).clamp(1, 20) as u32,
                base_delay: Duration::from_millis(number("NBA_RETRY_BASE_MS", 1000)),
            },
            request_timeout: Duration::from_secs(number("NBA_TIMEOUT_SECS", 30).max(1)),
            test_fraction,
            split_seed: number("NBA_SPLIT_SEED", 42),
            normalize_stats,
            output_dir: PathBuf::from(text("NBA_OUTPUT_DIR", ".")),
            model_path: PathBuf::from(text("NBA_MODEL_PATH", "nba_game_predictor.json")),
        }
    }

    pub fn combined_data_path(&self) -> PathBuf {
        self.output_dir.join(COMBINED_DATA_FILE)
    }

    /// Checkpoint of the table scored for one game date.
    pub fn prediction_data_path(&self, date: NaiveDate) -> PathBuf {
        self.output_dir
            .join(format!("prediction_data_{}.csv", date.format("%Y-%m-%d")))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_without_environment() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.season, "2023-24");
        assert_eq!(cfg.stats_season, "2023-24");
        assert_eq!(cfg.cache_ttl, Duration::from_secs(24 * 3600));
        assert_eq!(cfg.retry.max_attempts, 5);
        assert!((cfg.test_fraction - 0.2).abs() < 1e-12);
        assert!(cfg.normalize_stats);
        assert_eq!(cfg.combined_data_path(), PathBuf::from("./combined_data.csv"));
    }

    #[test]
    fn overrides_and_bad_values() {
        let vars = HashMap::from([
            ("NBA_SEASON", "2022-23"),
            ("NBA_CACHE_TTL_HOURS", "2"),
            ("NBA_MAX_RETRIES", "not-a-number"),
            ("NBA_NORMALIZE_STATS", "false"),
            ("NBA_SPLIT_SEED", "7"),
        ]);
        let cfg = PipelineConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.season, "2022-23");
        assert_eq!(cfg.stats_season, "2022-23");
        assert_eq!(cfg.cache_ttl, Duration::from_secs(7200));
        assert_eq!(cfg.retry.max_attempts, 5);
        assert!(!cfg.normalize_stats);
        assert_eq!(cfg.split_seed, 7);
    }

    #[test]
    fn huge_ttl_saturates() {
        let cfg = PipelineConfig::from_lookup(|k| {
            (k == "NBA_CACHE_TTL_HOURS").then(|| u64::MAX.to_string())
        });
        assert_eq!(cfg.cache_ttl, Duration::from_secs(u64::MAX));
    }

    #[test]
    fn retry_delay_grows() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for(3), Duration::from_millis(30));
    }
}
