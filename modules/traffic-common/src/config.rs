use std::env;
use std::str::FromStr;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    // Database
    pub database_url: String,
    pub db_max_connections: u32,

    // Web server
    pub web_host: String,
    pub web_port: u16,

    pub engine: EngineConfig,
}

/// Tunables for the preemption and incident engines.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub emergency_radius_km: f64,
    pub emergency_affect_count: usize,
    pub emergency_hold_seconds: i64,
    pub accident_reopen_seconds: u64,
    /// Added to each neighbouring road's congestion when a road closes.
    pub congestion_bump: u8,
    /// Assumed congestion for roads that have never been measured.
    pub congestion_baseline: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            emergency_radius_km: 2.5,
            emergency_affect_count: 3,
            emergency_hold_seconds: 20,
            accident_reopen_seconds: 120,
            congestion_bump: 30,
            congestion_baseline: 20,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            emergency_radius_km: env_or("EMERGENCY_RADIUS_KM", defaults.emergency_radius_km)?,
            emergency_affect_count: env_or(
                "EMERGENCY_AFFECT_COUNT",
                defaults.emergency_affect_count,
            )?,
            emergency_hold_seconds: env_or(
                "EMERGENCY_HOLD_SECONDS",
                defaults.emergency_hold_seconds,
            )?,
            accident_reopen_seconds: env_or(
                "ACCIDENT_REOPEN_SECONDS",
                defaults.accident_reopen_seconds,
            )?,
            congestion_bump: env_or("CONGESTION_BUMP", defaults.congestion_bump)?,
            congestion_baseline: env_or("CONGESTION_BASELINE", defaults.congestion_baseline)?,
        })
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL is required")?,
            db_max_connections: env_or("DB_MAX_CONNECTIONS", 10)?,
            web_host: env::var("WEB_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            web_port: env_or("WEB_PORT", 5000)?,
            engine: EngineConfig::from_env()?,
        };

        config.log_summary();
        Ok(config)
    }

    fn log_summary(&self) {
        let db_host = self
            .database_url
            .rsplit('@')
            .next()
            .unwrap_or("<unset>");

        tracing::info!("Config loaded:");
        tracing::info!("  DATABASE_URL: ...@{}", db_host);
        tracing::info!("  WEB: {}:{}", self.web_host, self.web_port);
        tracing::info!(
            radius_km = self.engine.emergency_radius_km,
            affect_count = self.engine.emergency_affect_count,
            hold_seconds = self.engine.emergency_hold_seconds,
            reopen_seconds = self.engine.accident_reopen_seconds,
            "  engine defaults"
        );
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_operator_expectations() {
        let config = EngineConfig::default();
        assert_eq!(config.emergency_radius_km, 2.5);
        assert_eq!(config.emergency_affect_count, 3);
        assert_eq!(config.emergency_hold_seconds, 20);
        assert_eq!(config.accident_reopen_seconds, 120);
    }

    #[test]
    fn env_or_parses_and_rejects() {
        std::env::set_var("TRAFFIC_TEST_ENV_OR_OK", " 7 ");
        std::env::set_var("TRAFFIC_TEST_ENV_OR_BAD", "seven");
        assert_eq!(env_or::<u32>("TRAFFIC_TEST_ENV_OR_OK", 1).unwrap(), 7);
        assert!(env_or::<u32>("TRAFFIC_TEST_ENV_OR_BAD", 1).is_err());
        assert_eq!(env_or::<u32>("TRAFFIC_TEST_ENV_OR_MISSING", 3).unwrap(), 3);
    }
}
