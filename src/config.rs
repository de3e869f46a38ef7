//! Environment-variable configuration for each stage. No config files, no
//! CLI flags for the operational knobs — matches every upstream service's
//! `build_dsn()` / module-level constant pattern.

use std::env;
use std::time::Duration;

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
}

impl DbConfig {
    pub fn from_env() -> Self {
        Self {
            host: env_or("DB_HOST", "localhost"),
            port: env_parse("DB_PORT", 5432),
            name: env_or("DB_NAME", "bgp_ensemble_db"),
            user: env_or("DB_USER", "postgres"),
            password: env_or("DB_PASSWORD", "your_password_here"),
        }
    }

    pub fn to_dsn(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.name
        )
    }
}

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub ris_live_url: String,
    pub reconnect_delay: Duration,
}

impl CollectorConfig {
    pub fn from_env() -> Self {
        Self {
            ris_live_url: env_or(
                "RIS_LIVE_URL",
                "wss://ris-live.ripe.net/v1/ws/?client=bgp-anomaly-rs",
            ),
            reconnect_delay: Duration::from_secs(env_parse("RECONNECT_DELAY_SECS", 5)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub poll_interval: Duration,
    pub initial_lookback: chrono::Duration,
}

impl AggregatorConfig {
    pub fn from_env() -> Self {
        Self {
            poll_interval: Duration::from_secs(env_parse("POLL_INTERVAL", 20)),
            initial_lookback: chrono::Duration::minutes(env_parse("INITIAL_LOOKBACK_MINUTES", 10)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HeuristicConfig {
    pub poll_interval: Duration,
}

impl HeuristicConfig {
    pub fn from_env() -> Self {
        Self {
            poll_interval: Duration::from_secs(env_parse("POLL_INTERVAL", 20)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsembleMethod {
    Avg,
    Max,
}

impl std::str::FromStr for EnsembleMethod {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s.to_ascii_lowercase().as_str() {
            "max" => Ok(EnsembleMethod::Max),
            _ => Ok(EnsembleMethod::Avg),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub poll_interval: Duration,
    pub anomaly_threshold: f64,
    pub ensemble_method: EnsembleMethod,
    pub lstm_sequence_length: usize,
    pub sample_above: usize,
    pub sample_seed: u64,
}

impl DetectorConfig {
    pub fn from_env() -> Self {
        Self {
            poll_interval: Duration::from_secs(env_parse("POLL_INTERVAL", 15)),
            anomaly_threshold: env_parse("ANOMALY_THRESHOLD", 3.0),
            ensemble_method: env_parse("ENSEMBLE_METHOD", "avg".to_string())
                .parse()
                .unwrap_or(EnsembleMethod::Avg),
            lstm_sequence_length: env_parse("LSTM_SEQUENCE_LENGTH", 10),
            sample_above: env_parse("SAMPLE_ABOVE_GROUPS", 5000),
            sample_seed: env_parse("SAMPLE_SEED", 42),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub model_dir: Option<String>,
}

impl ModelConfig {
    pub fn from_env() -> Self {
        Self {
            model_dir: env::var("MODEL_DIR").ok(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RpkiConfig {
    pub validator_base_url: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub poll_interval: Duration,
}

impl RpkiConfig {
    pub fn from_env() -> Self {
        Self {
            validator_base_url: env_or("RPKI_VALIDATOR_URL", "http://localhost:8323"),
            timeout: Duration::from_secs(env_parse("RPKI_TIMEOUT_SECS", 5)),
            max_retries: env_parse("RPKI_MAX_RETRIES", 3),
            poll_interval: Duration::from_secs(env_parse("POLL_INTERVAL", 20)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CorrelatorConfig {
    pub poll_interval: Duration,
}

impl CorrelatorConfig {
    pub fn from_env() -> Self {
        Self {
            poll_interval: Duration::from_secs(env_parse("POLL_INTERVAL", 20)),
        }
    }
}
