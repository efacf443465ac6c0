use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::store::sqlite::default_db_path;

#[derive(Debug, Clone, PartialEq)]
pub struct DecayConfig {
    pub min_gap_days: i64,
    pub box_decay_interval_days: i64,
    pub forgetting_half_life_days: f64,
    pub recalibration_threshold_days: i64,
    pub batch_size: usize,
    pub check_interval_hours: i64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            min_gap_days: 30,
            box_decay_interval_days: 60,
            forgetting_half_life_days: 90.0,
            recalibration_threshold_days: 90,
            batch_size: 100,
            check_interval_hours: 24,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub default_session_length: u32,
    pub default_new_problems: u32,
    pub onboarding_max_session_length: u32,
    pub onboarding_max_new_problems: u32,
    pub gap_days_threshold: i64,
    pub gap_session_cap: u32,
    pub low_accuracy_threshold: f64,
    pub low_accuracy_session_cap: u32,
    pub recent_sessions_window: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_session_length: 4,
            default_new_problems: 2,
            onboarding_max_session_length: 4,
            onboarding_max_new_problems: 4,
            gap_days_threshold: 4,
            gap_session_cap: 5,
            low_accuracy_threshold: 0.5,
            low_accuracy_session_cap: 5,
            recent_sessions_window: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    pub max_failures: u32,
    pub recovery_timeout: Duration,
    pub call_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 3,
            recovery_timeout: Duration::from_secs(5 * 60),
            call_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    pub database_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { database_path: default_db_path() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    /// `EnvFilter` directives; the engine's storage driver is held at `warn` unless named.
    pub level: String,
    /// Daily-rolling log files are written here when set.
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub logging: LoggingConfig,
    pub use_time_limits: bool,
    pub decay: DecayConfig,
    pub session: SessionConfig,
    pub breaker: CircuitBreakerConfig,
    pub store: StoreConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            use_time_limits: false,
            decay: DecayConfig::default(),
            session: SessionConfig::default(),
            breaker: CircuitBreakerConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Loads `.env` when present, then reads the environment.
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_env()
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unset or unparsable values keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parse = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(level) = parse("RUST_LOG") {
            config.logging.level = level;
        }
        config.logging.log_dir = parse("PRACTICE_LOG_DIR").map(PathBuf::from);
        if let Some(flag) = parse("PRACTICE_USE_TIME_LIMITS") {
            config.use_time_limits = flag == "true" || flag == "1";
        }

        set_parsed(&mut config.decay.min_gap_days, parse("PRACTICE_DECAY_MIN_GAP_DAYS"));
        set_parsed(&mut config.decay.batch_size, parse("PRACTICE_DECAY_BATCH_SIZE"));
        set_parsed(&mut config.decay.check_interval_hours, parse("PRACTICE_DECAY_CHECK_INTERVAL_HOURS"));
        config.decay.batch_size = config.decay.batch_size.max(1);

        set_parsed(&mut config.session.default_session_length, parse("PRACTICE_DEFAULT_SESSION_LENGTH"));
        set_parsed(&mut config.session.default_new_problems, parse("PRACTICE_DEFAULT_NEW_PROBLEMS"));

        set_parsed(&mut config.breaker.max_failures, parse("PRACTICE_BREAKER_MAX_FAILURES"));
        if let Some(secs) = parse("PRACTICE_BREAKER_RECOVERY_SECS").and_then(|v| v.parse::<u64>().ok()) {
            config.breaker.recovery_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = parse("PRACTICE_BREAKER_CALL_TIMEOUT_MS").and_then(|v| v.parse::<u64>().ok()) {
            config.breaker.call_timeout = Duration::from_millis(ms);
        }

        if let Some(path) = parse("PRACTICE_DB_PATH") {
            config.store.database_path = PathBuf::from(path);
        }

        config
    }
}

fn set_parsed<T: FromStr>(target: &mut T, raw: Option<String>) {
    if let Some(value) = raw.and_then(|v| v.parse::<T>().ok()) {
        *target = value;
    }
}
