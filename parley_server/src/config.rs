//! Server configuration loaded from environment variables

use crate::abuse::captcha::TURNSTILE_VERIFY_URL;
use parley_common::constants;
use std::env;
use std::time::Duration;

/// `DATABASE_URL` prefix selecting the in-memory store
pub const MEMORY_STORE_URL: &str = "memory://";

#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind to
    pub host: String,

    /// Port for HTTP traffic
    pub port: u16,

    /// PostgreSQL connection string, or `memory://` for the in-memory store
    pub database_url: String,

    /// Accounts created at startup when running on the in-memory store
    pub seed_accounts: Vec<String>,

    /// Turnstile secret; CAPTCHA checks fail while it is unset
    pub captcha_secret: Option<String>,

    /// Turnstile siteverify endpoint
    pub captcha_verify_url: String,

    /// Upper bound on a CAPTCHA verification round trip
    pub captcha_timeout: Duration,

    /// Upper bound on any single store operation
    pub store_timeout: Duration,

    /// Days after which a quota ledger starts over
    pub quota_reset_days: i64,

    /// Clear ban/suspend flags when a key is bound
    pub activation_clears_moderation: bool,

    /// Require a CAPTCHA token on activation
    pub require_captcha_for_activation: bool,

    /// Activation attempts allowed per device per hour
    pub activation_rate_limit: u32,

    /// Bearer token for the admin routes; admin routes are disabled when unset
    pub admin_token: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        Ok(Self {
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: var("PORT")
                .unwrap_or_else(|| "8080".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidPort)?,
            database_url: var("DATABASE_URL").ok_or(ConfigError::MissingEnv("DATABASE_URL"))?,
            seed_accounts: var("SEED_ACCOUNTS")
                .map(|list| {
                    list.split(',')
                        .map(|email| email.trim().to_string())
                        .filter(|email| !email.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            captcha_secret: var("TURNSTILE_SECRET_KEY")
                .or_else(|| var("CLOUDFLARE_TURNSTILE_SECRET_KEY")),
            captcha_verify_url: var("CAPTCHA_VERIFY_URL")
                .unwrap_or_else(|| TURNSTILE_VERIFY_URL.to_string()),
            captcha_timeout: Duration::from_millis(parse_number(
                "CAPTCHA_TIMEOUT_MS",
                var("CAPTCHA_TIMEOUT_MS"),
                5000,
            )?),
            store_timeout: Duration::from_millis(parse_number(
                "STORE_TIMEOUT_MS",
                var("STORE_TIMEOUT_MS"),
                5000,
            )?),
            quota_reset_days: parse_number(
                "QUOTA_RESET_DAYS",
                var("QUOTA_RESET_DAYS"),
                constants::QUOTA_RESET_DAYS,
            )?,
            activation_clears_moderation: parse_flag(
                "ACTIVATION_CLEARS_MODERATION",
                var("ACTIVATION_CLEARS_MODERATION"),
            )?,
            require_captcha_for_activation: parse_flag(
                "REQUIRE_CAPTCHA_FOR_ACTIVATION",
                var("REQUIRE_CAPTCHA_FOR_ACTIVATION"),
            )?,
            activation_rate_limit: parse_number(
                "ACTIVATION_RATE_LIMIT",
                var("ACTIVATION_RATE_LIMIT"),
                10,
            )?,
            admin_token: var("ADMIN_TOKEN"),
        })
    }

    /// Whether the in-memory store was selected
    pub fn uses_memory_store(&self) -> bool {
        self.database_url.starts_with(MEMORY_STORE_URL)
    }
}

fn parse_number<T>(name: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    match value {
        None => Ok(default),
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(n) if n > T::default() => Ok(n),
            _ => Err(ConfigError::InvalidNumber(name)),
        },
    }
}

fn parse_flag(name: &'static str, value: Option<String>) -> Result<bool, ConfigError> {
    match value.as_deref().map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidFlag(name)),
        },
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid port number")]
    InvalidPort,

    #[error("{0} must be a positive number")]
    InvalidNumber(&'static str),

    #[error("{0} must be true or false")]
    InvalidFlag(&'static str),
}
