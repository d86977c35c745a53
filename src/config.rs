use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

const DRIFT_TOLERANCE_ENV: &str = "COWATCH_DRIFT_TOLERANCE_SECS";
const CHECKPOINT_INTERVAL_ENV: &str = "COWATCH_CHECKPOINT_INTERVAL_MS";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid drift tolerance: {0}")]
    DriftTolerance(f64),
}

/// Synchronization tunables
#[derive(Clone, Debug, PartialEq)]
pub struct SyncConfig {
    /// Seconds of drift tolerated before a checkpoint forces a seek (default: 1.5)
    pub drift_tolerance: f64,
    /// Minimum time between checkpoint writes while playing (default: 5s)
    pub checkpoint_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            drift_tolerance: 1.5,
            checkpoint_interval: Duration::from_secs(5),
        }
    }
}

impl SyncConfig {
    /// Load tunables from the environment, reading a `.env` file if present
    pub fn load() -> Self {
        if dotenvy::dotenv().is_ok() {
            info!("Config: loaded .env file");
        }

        Self::from_env()
    }

    /// Load tunables from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = SyncConfig::default();

        let drift_tolerance = match std::env::var(DRIFT_TOLERANCE_ENV) {
            Ok(raw) => match raw.trim().parse::<f64>() {
                Ok(value) if value.is_finite() && value > 0.0 => value,
                _ => {
                    warn!(
                        "Config: ignoring invalid {}={:?}, using {}",
                        DRIFT_TOLERANCE_ENV, raw, defaults.drift_tolerance
                    );
                    defaults.drift_tolerance
                }
            },
            Err(_) => defaults.drift_tolerance,
        };

        let checkpoint_interval = match std::env::var(CHECKPOINT_INTERVAL_ENV) {
            Ok(raw) => match raw.trim().parse::<u64>() {
                Ok(millis) => Duration::from_millis(millis),
                Err(_) => {
                    warn!(
                        "Config: ignoring invalid {}={:?}, using {:?}",
                        CHECKPOINT_INTERVAL_ENV, raw, defaults.checkpoint_interval
                    );
                    defaults.checkpoint_interval
                }
            },
            Err(_) => defaults.checkpoint_interval,
        };

        SyncConfig {
            drift_tolerance,
            checkpoint_interval,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.drift_tolerance.is_finite() || self.drift_tolerance <= 0.0 {
            return Err(ConfigError::DriftTolerance(self.drift_tolerance));
        }
        Ok(())
    }
}
