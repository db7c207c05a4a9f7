use std::env;
use std::error::Error as StdError;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use rolloff_core::{PriceBounds, ProviderSettings};

/// Server configuration loaded from `ROLLOFF_*` environment variables.
#[derive(Debug, Clone)]
pub(crate) struct Config {
    pub(crate) bind: SocketAddr,
    pub(crate) data_dir: PathBuf,
    pub(crate) concurrency: usize,
    pub(crate) retry_attempts: usize,
    pub(crate) backoff_unit: Duration,
    pub(crate) schedule_period: Duration,
    pub(crate) http_timeout: Duration,
    pub(crate) price_bounds: PriceBounds,
    pub(crate) vendor_defaults_dir: Option<PathBuf>,
    pub(crate) cors_origins: Vec<String>,
}

impl Config {
    /// Load configuration, reading a `.env` file first if one is present.
    pub(crate) fn from_env() -> Result<Self> {
        // a missing .env is normal outside development
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let price_min: f64 = parse_or(&lookup, "ROLLOFF_PRICE_MIN", 50.0)?;
        let price_max: f64 = parse_or(&lookup, "ROLLOFF_PRICE_MAX", 1000.0)?;

        Ok(Self {
            bind: parse_or(&lookup, "ROLLOFF_BIND", SocketAddr::from(([0, 0, 0, 0], 8000)))?,
            data_dir: lookup("ROLLOFF_DATA_DIR").map_or_else(|| PathBuf::from("data"), PathBuf::from),
            concurrency: parse_or(&lookup, "ROLLOFF_CONCURRENCY", 3)?,
            retry_attempts: parse_or(&lookup, "ROLLOFF_RETRY_ATTEMPTS", 3)?,
            backoff_unit: Duration::from_millis(parse_or(&lookup, "ROLLOFF_BACKOFF_UNIT_MS", 1000)?),
            schedule_period: Duration::from_secs(parse_or(
                &lookup,
                "ROLLOFF_SCHEDULE_PERIOD_SECS",
                7 * 24 * 60 * 60,
            )?),
            http_timeout: Duration::from_secs(parse_or(&lookup, "ROLLOFF_HTTP_TIMEOUT_SECS", 30)?),
            price_bounds: PriceBounds::new(price_min, price_max),
            vendor_defaults_dir: lookup("ROLLOFF_VENDOR_DEFAULTS_DIR")
                .filter(|dir| !dir.trim().is_empty())
                .map(PathBuf::from),
            cors_origins: lookup("ROLLOFF_CORS_ORIGINS")
                .unwrap_or_else(|| String::from("http://localhost:5173"))
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_owned)
                .collect(),
        })
    }

    /// Settings handed to every provider crate.
    ///
    /// Vendor table overrides are looked up in `<data_dir>/vendors` unless a
    /// directory is configured explicitly.
    pub(crate) fn provider_settings(&self) -> ProviderSettings {
        let defaults_dir = self
            .vendor_defaults_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("vendors"));
        ProviderSettings {
            request_timeout: self.http_timeout,
            defaults_dir: Some(defaults_dir),
            ..ProviderSettings::default()
        }
    }
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: StdError + Send + Sync + 'static,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{name} has an invalid value: {raw}")),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(name, value)| ((*name).to_owned(), (*value).to_owned()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = load(&[]).expect("defaults");
        assert_eq!(config.bind.port(), 8000);
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.backoff_unit, Duration::from_secs(1));
        assert_eq!(config.schedule_period, Duration::from_secs(604_800));
        assert_eq!(config.price_bounds, PriceBounds::new(50.0, 1000.0));
        assert_eq!(config.vendor_defaults_dir, None);
        assert_eq!(config.cors_origins, vec!["http://localhost:5173".to_owned()]);
        assert_eq!(
            config.provider_settings().defaults_dir,
            Some(PathBuf::from("data").join("vendors"))
        );
    }

    #[test]
    fn variables_override_defaults() {
        let config = load(&[
            ("ROLLOFF_BIND", "127.0.0.1:9100"),
            ("ROLLOFF_CONCURRENCY", "0"),
            ("ROLLOFF_HTTP_TIMEOUT_SECS", "5"),
            ("ROLLOFF_VENDOR_DEFAULTS_DIR", "/etc/rolloff/vendors"),
            ("ROLLOFF_CORS_ORIGINS", "https://a.test, https://b.test,"),
        ])
        .expect("overrides");

        assert_eq!(config.bind, SocketAddr::from(([127, 0, 0, 1], 9100)));
        assert_eq!(config.concurrency, 0);
        assert_eq!(config.cors_origins.len(), 2);

        let settings = config.provider_settings();
        assert_eq!(settings.request_timeout, Duration::from_secs(5));
        assert_eq!(settings.defaults_dir, Some(PathBuf::from("/etc/rolloff/vendors")));
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let error = load(&[("ROLLOFF_RETRY_ATTEMPTS", "three")]).expect_err("invalid");
        assert!(error.to_string().contains("ROLLOFF_RETRY_ATTEMPTS"));
    }
}
