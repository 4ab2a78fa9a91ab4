use std::time::Duration;

use config::{ConfigError, Environment};
use serde::Deserialize;

use crate::accrual::ReconcileConfig;

/// Process configuration, read from the environment (and `.env`).
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub run_address: String,
    pub database_uri: String,
    pub database_max_connections: u32,
    pub accrual_system_address: String,
    pub accrual_timeout_secs: u64,
    pub reconcile_poll_interval_ms: u64,
    pub reconcile_base_delay_ms: u64,
    pub reconcile_max_delay_ms: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Environment::default())
    }

    fn load(environment: Environment) -> Result<Self, ConfigError> {
        let config: Self = config::Config::builder()
            .set_default("run_address", "0.0.0.0:8080")?
            .set_default("database_uri", "postgres://postgres@localhost:5432/loyalty")?
            .set_default("database_max_connections", 20)?
            .set_default("accrual_system_address", "http://localhost:8081")?
            .set_default("accrual_timeout_secs", 30)?
            .set_default("reconcile_poll_interval_ms", 1000)?
            .set_default("reconcile_base_delay_ms", 500)?
            .set_default("reconcile_max_delay_ms", 60_000)?
            .add_source(environment.try_parsing(true))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.run_address.trim().is_empty() {
            return Err(ConfigError::Message("RUN_ADDRESS must not be empty".into()));
        }
        if self.accrual_system_address.trim().is_empty() {
            return Err(ConfigError::Message("ACCRUAL_SYSTEM_ADDRESS must not be empty".into()));
        }
        if self.database_max_connections == 0 {
            return Err(ConfigError::Message("DATABASE_MAX_CONNECTIONS must be positive".into()));
        }
        if self.accrual_timeout_secs == 0 {
            return Err(ConfigError::Message("ACCRUAL_TIMEOUT_SECS must be positive".into()));
        }
        if self.reconcile_base_delay_ms > self.reconcile_max_delay_ms {
            return Err(ConfigError::Message(format!(
                "RECONCILE_BASE_DELAY_MS ({}) exceeds RECONCILE_MAX_DELAY_MS ({})",
                self.reconcile_base_delay_ms, self.reconcile_max_delay_ms
            )));
        }
        Ok(())
    }

    pub fn accrual_timeout(&self) -> Duration {
        Duration::from_secs(self.accrual_timeout_secs)
    }

    pub fn reconcile(&self) -> ReconcileConfig {
        ReconcileConfig {
            poll_interval: Duration::from_millis(self.reconcile_poll_interval_ms),
            base_delay: Duration::from_millis(self.reconcile_base_delay_ms),
            max_delay: Duration::from_millis(self.reconcile_max_delay_ms),
        }
    }
}
