// Runtime configuration, loaded once at startup

use std::str::FromStr;
use std::time::Duration;

/// Parse an env var, falling back to the default when unset or malformed.
fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// Webhook URL for admin notifications; alerts are log-only when unset.
    pub alert_webhook_url: Option<String>,
    /// Active staff accounts for alert fan-out, comma-separated in env.
    pub admin_ids: Vec<String>,
    /// Starting GC balance granted to a wallet on first touch.
    pub signup_bonus_gc: i64,
    pub flush_interval: Duration,
    /// Queue length that triggers an early flush.
    pub batch_size: usize,
    /// Soft cap on queued ledger entries; crossing it is logged, never dropped.
    pub queue_capacity: usize,
    /// Bound on waiting for a wallet's exclusive section.
    pub lock_timeout: Duration,
    /// Number of recent settlements retained for idempotent replay.
    pub replay_window: usize,
    pub fraud: FraudConfig,
}

/// Suspicious-activity thresholds. Operators tune these through the
/// environment; rule code never embeds the literals.
#[derive(Debug, Clone)]
pub struct FraudConfig {
    /// Spins of history retained per user.
    pub history_window: usize,
    /// win/bet ratio above which a spin is flagged high severity.
    pub high_multiplier: f64,
    /// win > bet * extreme_ratio is flagged critical.
    pub extreme_ratio: i64,
    pub rapid_fire_count: usize,
    pub rapid_fire_window_secs: i64,
    /// Fraction of net-positive spins in the window that arms the rule.
    pub win_rate_threshold: f64,
    /// Minimum spins observed before the win-rate rule applies.
    pub win_rate_min_sample: usize,
    /// Allowed deviation factor of a stake from the rolling average.
    pub erratic_stake_factor: f64,
    /// Per (user, rule) dedup window between findings.
    pub cooldown_secs: i64,
}

impl Default for FraudConfig {
    fn default() -> Self {
        Self {
            history_window: 50,
            high_multiplier: 100.0,
            extreme_ratio: 1000,
            rapid_fire_count: 10,
            rapid_fire_window_secs: 60,
            win_rate_threshold: 0.70,
            win_rate_min_sample: 20,
            erratic_stake_factor: 10.0,
            cooldown_secs: 300,
        }
    }
}

impl FraudConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            history_window: env_parse("FRAUD_HISTORY_WINDOW", default.history_window),
            high_multiplier: env_parse("FRAUD_HIGH_MULTIPLIER", default.high_multiplier),
            extreme_ratio: env_parse("FRAUD_EXTREME_RATIO", default.extreme_ratio),
            rapid_fire_count: env_parse("FRAUD_RAPID_FIRE_COUNT", default.rapid_fire_count),
            rapid_fire_window_secs: env_parse(
                "FRAUD_RAPID_FIRE_WINDOW_SECS",
                default.rapid_fire_window_secs,
            ),
            win_rate_threshold: env_parse("FRAUD_WIN_RATE_THRESHOLD", default.win_rate_threshold),
            win_rate_min_sample: env_parse(
                "FRAUD_WIN_RATE_MIN_SAMPLE",
                default.win_rate_min_sample,
            ),
            erratic_stake_factor: env_parse(
                "FRAUD_ERRATIC_STAKE_FACTOR",
                default.erratic_stake_factor,
            ),
            cooldown_secs: env_parse("FRAUD_ALERT_COOLDOWN_SECS", default.cooldown_secs),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4000,
            database_url: "postgres://localhost/reelhouse".to_string(),
            alert_webhook_url: None,
            admin_ids: Vec::new(),
            signup_bonus_gc: 0,
            flush_interval: Duration::from_secs(1),
            batch_size: 100,
            queue_capacity: 10_000,
            lock_timeout: Duration::from_millis(500),
            replay_window: 4096,
            fraud: FraudConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            port: env_parse("PORT", default.port),
            database_url: std::env::var("DATABASE_URL").unwrap_or(default.database_url),
            alert_webhook_url: std::env::var("ALERT_WEBHOOK_URL").ok(),
            admin_ids: std::env::var("ADMIN_USER_IDS")
                .map(|s| {
                    s.split(',')
                        .map(|id| id.trim().to_string())
                        .filter(|id| !id.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            signup_bonus_gc: env_parse("SIGNUP_BONUS_GC", default.signup_bonus_gc),
            flush_interval: Duration::from_millis(env_parse("LEDGER_FLUSH_INTERVAL_MS", 1000)),
            batch_size: env_parse("LEDGER_BATCH_SIZE", default.batch_size),
            queue_capacity: env_parse("LEDGER_QUEUE_CAPACITY", default.queue_capacity),
            lock_timeout: Duration::from_millis(env_parse("WALLET_LOCK_TIMEOUT_MS", 500)),
            replay_window: env_parse("SETTLE_REPLAY_WINDOW", default.replay_window),
            fraud: FraudConfig::from_env(),
        }
    }
}
