//! Application configuration loaded from environment variables.

use chrono::FixedOffset;

use crate::errors::{AppError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file
    pub database_url: String,
    /// Port for the HTTP server
    pub api_port: u16,
    /// Externally visible base URL (used to build public image URLs)
    pub public_base_url: String,
    /// Endpoint of the payment-link creation function
    pub payment_function_url: String,
    /// Bearer key sent to the payment function
    pub payment_api_key: Option<String>,
    /// Shared secret expected on payment-status callbacks
    pub webhook_token: Option<String>,
    /// Attempts made against the payment function before giving up
    pub payment_max_attempts: u32,
    /// Timeout applied to every outbound request
    pub request_timeout_secs: u64,
    /// Directory holding the object-storage buckets
    pub storage_dir: String,
    /// Offset used to show and edit event times
    pub display_offset: FixedOffset,
    /// Quiet period before the registrant feed re-fetches after a change
    pub refresh_debounce_ms: u64,
    /// Admin session lifetime
    pub session_ttl_secs: i64,
    /// Idle lifetime of a public registration form session
    pub form_session_ttl_secs: i64,
    /// Admin account ensured at start-up
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let api_port: u16 = parse_or("API_PORT", "3001")?;
        let payment_max_attempts: u32 = parse_or("PAYMENT_MAX_ATTEMPTS", "3")?;
        if payment_max_attempts == 0 {
            return Err(AppError::Config(
                "PAYMENT_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        let offset_minutes: i32 = parse_or("DISPLAY_UTC_OFFSET_MINUTES", "420")?;
        let display_offset = offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                AppError::Config("DISPLAY_UTC_OFFSET_MINUTES must be within one day".to_string())
            })?;

        Ok(Config {
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./registrar.db".to_string()),
            api_port,
            public_base_url: env_var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| format!("http://localhost:{api_port}"))
                .trim_end_matches('/')
                .to_string(),
            payment_function_url: env_var("PAYMENT_FUNCTION_URL").map_err(|_| {
                AppError::Config("PAYMENT_FUNCTION_URL environment variable is required".to_string())
            })?,
            payment_api_key: env_var("PAYMENT_API_KEY").ok(),
            webhook_token: env_var("PAYMENT_WEBHOOK_TOKEN").ok(),
            payment_max_attempts,
            request_timeout_secs: parse_or("REQUEST_TIMEOUT_SECS", "30")?,
            storage_dir: env_var("STORAGE_DIR").unwrap_or_else(|_| "./storage".to_string()),
            display_offset,
            refresh_debounce_ms: parse_or("REFRESH_DEBOUNCE_MS", "250")?,
            session_ttl_secs: parse_or("SESSION_TTL_SECS", "86400")?,
            form_session_ttl_secs: parse_or("FORM_SESSION_TTL_SECS", "3600")?,
            admin_email: env_var("ADMIN_EMAIL").ok(),
            admin_password: env_var("ADMIN_PASSWORD").ok(),
        })
    }

    /// Settings used by unit tests: in-memory friendly, UTC+7 display offset.
    #[cfg(test)]
    pub fn for_tests(storage_dir: &str) -> Self {
        Config {
            database_url: "sqlite::memory:".to_string(),
            api_port: 0,
            public_base_url: "http://localhost:3001".to_string(),
            payment_function_url: "http://127.0.0.1:9/create-payment".to_string(),
            payment_api_key: None,
            webhook_token: Some("hook-secret".to_string()),
            payment_max_attempts: 1,
            request_timeout_secs: 1,
            storage_dir: storage_dir.to_string(),
            display_offset: FixedOffset::east_opt(7 * 3600).unwrap(),
            refresh_debounce_ms: 20,
            session_ttl_secs: 3600,
            form_session_ttl_secs: 3600,
            admin_email: Some("admin@example.com".to_string()),
            admin_password: Some("correct horse".to_string()),
        }
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: &str) -> Result<T> {
    env_var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| AppError::Config(format!("Invalid {key}")))
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| AppError::Config(format!("Missing env var: {key}")))
}
