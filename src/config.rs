use anyhow::{anyhow, Context};
use std::env;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::time::Duration;

/// One year.
pub const MAX_TOKEN_TTL_MINUTES: u64 = 365 * 24 * 60;

/// Runtime settings read from the environment (after `.env` is loaded).
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub secret_key: String,
    pub bind_addr: SocketAddr,
    pub token_ttl_minutes: u64,
    /// `None` disables the periodic overdue sweep.
    pub overdue_sweep_interval: Option<Duration>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let secret_key = env::var("SECRET_KEY").context("SECRET_KEY must be set")?;
        if secret_key.is_empty() {
            return Err(anyhow!("SECRET_KEY must not be empty"));
        }

        let bind_addr = env::var("BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8000".into())
            .parse::<SocketAddr>()
            .context("BIND_ADDR must be a socket address such as 0.0.0.0:8000")?;

        let token_ttl_minutes = within(
            "TOKEN_TTL_MINUTES",
            parse_or("TOKEN_TTL_MINUTES", 30)?,
            1..=MAX_TOKEN_TTL_MINUTES,
        )?;
        let sweep_secs = parse_or("OVERDUE_SWEEP_SECS", 0)?;

        Ok(Self {
            database_url,
            secret_key,
            bind_addr,
            token_ttl_minutes,
            overdue_sweep_interval: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
        })
    }
}

fn parse_or(key: &str, default: u64) -> anyhow::Result<u64> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a non-negative integer, got {raw:?}")),
        Err(_) => Ok(default),
    }
}

fn within(key: &str, value: u64, range: RangeInclusive<u64>) -> anyhow::Result<u64> {
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(anyhow!(
            "{key} must be between {} and {}, got {value}",
            range.start(),
            range.end()
        ))
    }
}
