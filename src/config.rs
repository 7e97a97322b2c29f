//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;

use crate::gateway::PaymobConfig;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    /// ISO currency for wallets and invoices
    pub currency: String,

    /// Allowed CORS origins; empty means permissive outside production
    pub cors_allowed_origins: Vec<String>,

    /// Paymob credentials; `None` disables online payments
    pub paymob: Option<PaymobConfig>,

    /// Hours before an unpaid card payment is cancelled
    pub payment_expiry_hours: i64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        let database_max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("DATABASE_MAX_CONNECTIONS"))?;

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("PORT"))?;

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let currency = env::var("CURRENCY").unwrap_or_else(|_| "EGP".to_string());
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(ConfigError::InvalidValue("CURRENCY"));
        }

        let cors_allowed_origins = env::var("CORS_ALLOWED_ORIGINS")
            .map(|v| parse_list(&v))
            .unwrap_or_default();

        let payment_expiry_hours = env::var("PAYMENT_EXPIRY_HOURS")
            .unwrap_or_else(|_| "24".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("PAYMENT_EXPIRY_HOURS"))?;

        Ok(Self {
            database_url,
            database_max_connections,
            host,
            port,
            environment,
            currency,
            cors_allowed_origins,
            paymob: paymob_from_env()?,
            payment_expiry_hours,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// The gateway is enabled only when all four credentials are present.
fn paymob_from_env() -> Result<Option<PaymobConfig>, ConfigError> {
    let api_key = env::var("PAYMOB_API_KEY").ok().filter(|v| !v.is_empty());
    let integration_id = env::var("PAYMOB_INTEGRATION_ID").ok().filter(|v| !v.is_empty());
    let iframe_id = env::var("PAYMOB_IFRAME_ID").ok().filter(|v| !v.is_empty());
    let hmac_secret = env::var("PAYMOB_HMAC_SECRET").ok().filter(|v| !v.is_empty());

    let (Some(api_key), Some(integration_id), Some(iframe_id), Some(hmac_secret)) =
        (api_key, integration_id, iframe_id, hmac_secret)
    else {
        return Ok(None);
    };

    let integration_id = integration_id
        .parse()
        .map_err(|_| ConfigError::InvalidValue("PAYMOB_INTEGRATION_ID"))?;

    let base_url =
        env::var("PAYMOB_BASE_URL").unwrap_or_else(|_| "https://accept.paymob.com".to_string());

    Ok(Some(PaymobConfig {
        base_url: base_url.trim_end_matches('/').to_string(),
        api_key,
        integration_id,
        iframe_id,
        hmac_secret,
    }))
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list() {
        assert_eq!(
            parse_list("https://a.example, https://b.example,,"),
            vec!["https://a.example", "https://b.example"]
        );
        assert!(parse_list("").is_empty());
    }
}
