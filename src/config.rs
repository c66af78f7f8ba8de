use chrono::Duration;

/// Deployment-level settings, read from the environment by the binary.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub log_level: String,
    pub core: CoreConfig,
}

impl Config {
    pub fn from_env() -> Self {
        let database_url = std::env::var("MENTOR_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:mentor-core.db?mode=rwc".to_string());
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Self {
            database_url,
            log_level,
            core: CoreConfig::from_env(),
        }
    }
}

/// Weights for the candidate scoring formula
/// `w1·weakness + w2·novelty + w3·pacing + w4·recency`.
#[derive(Debug, Clone, Copy)]
pub struct SelectionWeights {
    pub weakness: f64,
    pub novelty: f64,
    pub pacing: f64,
    pub recency: f64,
}

impl Default for SelectionWeights {
    fn default() -> Self {
        Self {
            weakness: 0.4,
            novelty: 0.2,
            pacing: 0.25,
            recency: 0.15,
        }
    }
}

/// Decision knobs injected into the core. Defaults carry the deployment
/// values; the surrounding platform may override any of them.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// EMA smoothing factor for mastery updates.
    pub ema_alpha: f64,
    /// Spaced-repetition interval table, days per bucket.
    pub review_intervals_days: [i64; 8],
    /// Terminal bucket index.
    pub graduation_bucket: i64,
    /// Graduated items older than this are eligible for pruning.
    pub graduated_retention: Duration,
    /// Review items placed ahead of scored candidates per selection.
    pub max_review_items: usize,
    /// Total items returned by one selection round.
    pub selection_size: usize,
    /// Consecutive failures on a (topic, difficulty) that trigger exclusion.
    pub max_consecutive_failures: usize,
    /// Hard cap on difficulty above the per-topic baseline.
    pub max_difficulty_jump: i64,
    /// Mastery score assumed for topics with no record yet.
    pub unknown_mastery_neutral: f64,
    /// Completed tasks considered "recent" for diversification and streaks.
    pub recent_history_limit: usize,
    /// Scheduled tasks older than scheduled_at + grace expire.
    pub expiry_grace: Duration,
    pub weights: SelectionWeights,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            ema_alpha: 0.3,
            review_intervals_days: [0, 1, 2, 3, 5, 8, 13, 21],
            graduation_bucket: 7,
            graduated_retention: Duration::days(30),
            max_review_items: 2,
            selection_size: 5,
            max_consecutive_failures: 2,
            max_difficulty_jump: 1,
            unknown_mastery_neutral: 50.0,
            recent_history_limit: 30,
            expiry_grace: Duration::hours(48),
            weights: SelectionWeights::default(),
        }
    }
}

impl CoreConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(alpha) = env_f64("MENTOR_EMA_ALPHA") {
            if (0.0..=1.0).contains(&alpha) {
                config.ema_alpha = alpha;
            }
        }
        if let Some(days) = env_i64("MENTOR_RETENTION_DAYS") {
            config.graduated_retention = Duration::days(days.max(1));
        }
        if let Some(hours) = env_i64("MENTOR_EXPIRY_GRACE_HOURS") {
            config.expiry_grace = Duration::hours(hours.max(1));
        }
        if let Some(count) = env_i64("MENTOR_MAX_REVIEW_ITEMS") {
            config.max_review_items = count.clamp(0, 10) as usize;
        }
        if let Some(count) = env_i64("MENTOR_SELECTION_SIZE") {
            config.selection_size = count.clamp(1, 20) as usize;
        }
        if let Some(neutral) = env_f64("MENTOR_UNKNOWN_MASTERY") {
            config.unknown_mastery_neutral = neutral.clamp(0.0, 100.0);
        }

        config
    }

    pub fn interval_days(&self, bucket: i64) -> i64 {
        let idx = bucket.clamp(0, self.graduation_bucket) as usize;
        self.review_intervals_days[idx.min(self.review_intervals_days.len() - 1)]
    }
}

fn env_f64(key: &str) -> Option<f64> {
    std::env::var(key).ok().and_then(|v| v.parse::<f64>().ok())
}

fn env_i64(key: &str) -> Option<i64> {
    std::env::var(key).ok().and_then(|v| v.parse::<i64>().ok())
}
