//! Configuration (SPEC_FULL.md, Ambient stack): environment-driven
//! transport/addressing settings only. Algorithmic tuning constants
//! (`tracker::MAX_DISTANCE_PER_HOUR_KM` and friends) stay as Rust `const`s —
//! they describe the domain, not the deployment, and are not meant to be
//! twiddled per environment. Grounded on `sat_api::main`'s `dotenv` +
//! `std::env::var` loading style.

use std::env;

use anyhow::{Context, Result};

const DEFAULT_BIND_HOST: &str = "0.0.0.0";
const DEFAULT_BIND_PORT: u16 = 8080;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_host: String,
    pub bind_port: u16,
    pub balloon_feed_base_url: String,
    pub wind_provider_base_url: String,
}

impl Config {
    /// Loads from the process environment (after `dotenv` has populated it,
    /// if a `.env` file is present). Only `BALLOON_FEED_BASE_URL` is
    /// required; everything else has a sane default.
    pub fn from_env() -> Result<Self> {
        let bind_host = env::var("BIND_HOST").unwrap_or_else(|_| DEFAULT_BIND_HOST.to_string());
        let bind_port = match env::var("BIND_PORT") {
            Ok(v) => v.parse().context("BIND_PORT must be a valid port number")?,
            Err(_) => DEFAULT_BIND_PORT,
        };
        let balloon_feed_base_url = env::var("BALLOON_FEED_BASE_URL")
            .context("BALLOON_FEED_BASE_URL must be set (e.g. https://a.windbornesystems.com/treasure)")?;
        let wind_provider_base_url = env::var("WIND_PROVIDER_BASE_URL")
            .unwrap_or_else(|_| "https://api.open-meteo.com/v1/forecast".to_string());

        Ok(Self {
            bind_host,
            bind_port,
            balloon_feed_base_url,
            wind_provider_base_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Guards env-var mutation: tests run in parallel threads within one
    // process and `std::env` is process-global.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn from_env_requires_feed_url() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::remove_var("BALLOON_FEED_BASE_URL");
        assert!(Config::from_env().is_err());
    }

    #[test]
    fn from_env_applies_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("BALLOON_FEED_BASE_URL", "https://example.test/feed");
        env::remove_var("BIND_HOST");
        env::remove_var("BIND_PORT");
        let config = Config::from_env().unwrap();
        assert_eq!(config.bind_host, DEFAULT_BIND_HOST);
        assert_eq!(config.bind_port, DEFAULT_BIND_PORT);
        env::remove_var("BALLOON_FEED_BASE_URL");
    }
}
