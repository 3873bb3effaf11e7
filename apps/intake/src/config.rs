use std::str::FromStr;

use anyhow::{bail, Context, Result};

use crate::summarize::DEFAULT_DEADLINE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => bail!("STORE_BACKEND must be 'postgres' or 'memory', got '{other}'"),
        }
    }
}

/// Application configuration loaded from environment variables.
/// Startup fails if a required variable is missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub store_backend: StoreBackend,
    /// Required when `store_backend` is Postgres.
    pub database_url: Option<String>,
    /// Outbox relay target; the relay does not run without it.
    pub redis_url: Option<String>,
    pub anthropic_api_key: String,
    pub port: u16,
    pub rust_log: String,
    pub llm_timeout_secs: u64,
    pub simhash_max_distance: u32,
    pub trgm_threshold: f64,
    pub min_core_text_chars: usize,
    pub worker_concurrency: usize,
    pub outbox_poll_ms: u64,
    pub outbox_batch_size: usize,
    /// Non-terminal ledgers older than this are failed at startup.
    pub recovery_stale_secs: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let store_backend: StoreBackend = env_or("STORE_BACKEND", "postgres")?;
        let database_url = std::env::var("DATABASE_URL").ok();
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            bail!("Required environment variable 'DATABASE_URL' is not set");
        }

        let trgm_threshold: f64 = env_or("TRGM_THRESHOLD", "0.75")?;
        if !(0.0..=1.0).contains(&trgm_threshold) {
            bail!("TRGM_THRESHOLD must be between 0 and 1, got {trgm_threshold}");
        }

        Ok(Config {
            store_backend,
            database_url,
            redis_url: std::env::var("REDIS_URL").ok().filter(|u| !u.is_empty()),
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            port: env_or("PORT", "8080")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            llm_timeout_secs: env_or("LLM_TIMEOUT_SECS", &DEFAULT_DEADLINE.as_secs().to_string())?,
            simhash_max_distance: env_or("SIMHASH_MAX_DISTANCE", "3")?,
            trgm_threshold,
            min_core_text_chars: env_or("MIN_CORE_TEXT_CHARS", "10")?,
            worker_concurrency: env_or("WORKER_CONCURRENCY", "8")?,
            outbox_poll_ms: env_or("OUTBOX_POLL_MS", "1000")?,
            outbox_batch_size: env_or("OUTBOX_BATCH_SIZE", "100")?,
            recovery_stale_secs: env_or("RECOVERY_STALE_SECS", "600")?,
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn env_or<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse::<T>()
        .map_err(|e| anyhow::anyhow!("{key} has an invalid value '{raw}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_backend_parse() {
        assert_eq!("memory".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert_eq!("Postgres".parse::<StoreBackend>().unwrap(), StoreBackend::Postgres);
        assert!("sqlite".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn test_env_or_falls_back_and_reports_bad_values() {
        let port: u16 = env_or("JD_INTAKE_TEST_UNSET_PORT", "8080").unwrap();
        assert_eq!(port, 8080);
        let err = env_or::<u16>("JD_INTAKE_TEST_UNSET_PORT", "eighty").unwrap_err();
        assert!(err.to_string().contains("JD_INTAKE_TEST_UNSET_PORT"));
    }
}
