//! Server configuration loaded from environment variables.

use std::{fmt::Display, str::FromStr, time::Duration};

use secrecy::SecretString;
use thiserror::Error;
use tracing::info;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),
    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Connection settings for the ERP the catalog is reconciled against
#[derive(Debug)]
pub struct ErpConfig {
    pub base_url: Url,
    pub api_key: Option<SecretString>,
    pub page_size: u32,
}

/// Optional admin account created at startup when absent
#[derive(Debug)]
pub struct AdminBootstrap {
    pub email: String,
    pub password: SecretString,
}

#[derive(Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub jwt_secret: SecretString,
    pub token_ttl_hours: i64,
    pub erp: ErpConfig,
    pub exchange_rate_url: Url,
    pub catalog_currency: String,
    pub rate_cache_ttl: Duration,
    pub admin: Option<AdminBootstrap>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let admin = match (lookup("ADMIN_EMAIL"), lookup("ADMIN_PASSWORD")) {
            (Some(email), Some(password)) if !email.is_empty() && !password.is_empty() => {
                Some(AdminBootstrap {
                    email,
                    password: SecretString::from(password),
                })
            }
            _ => None,
        };

        let page_size: u32 = try_load(&lookup, "ERP_PAGE_SIZE", "100")?;
        if page_size == 0 {
            return Err(ConfigError::Invalid {
                key: "ERP_PAGE_SIZE",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            host: try_load(&lookup, "HOST", "127.0.0.1")?,
            port: try_load(&lookup, "PORT", "8080")?,
            database_url: try_load(&lookup, "DATABASE_URL", "sqlite://catalog.db")?,
            jwt_secret: SecretString::from(require(&lookup, "JWT_SECRET")?),
            token_ttl_hours: try_load(&lookup, "TOKEN_TTL_HOURS", "12")?,
            erp: ErpConfig {
                base_url: parse_url("ERP_BASE_URL", &require(&lookup, "ERP_BASE_URL")?)?,
                api_key: lookup("ERP_API_KEY")
                    .filter(|key| !key.is_empty())
                    .map(SecretString::from),
                page_size,
            },
            exchange_rate_url: parse_url(
                "EXCHANGE_RATE_URL",
                &try_load::<String>(&lookup, "EXCHANGE_RATE_URL", "https://open.er-api.com/v6")?,
            )?,
            catalog_currency: try_load::<String>(&lookup, "CATALOG_CURRENCY", "ARS")?
                .to_uppercase(),
            rate_cache_ttl: Duration::from_secs(try_load(&lookup, "RATE_CACHE_TTL_SECS", "3600")?),
            admin,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn require(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<String, ConfigError> {
    lookup(key)
        .filter(|value| !value.is_empty())
        .ok_or(ConfigError::Missing(key))
}

fn try_load<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: &str,
) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    let raw = lookup(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        reason: e.to_string(),
    })
}

fn parse_url(key: &'static str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::Invalid {
        key,
        reason: e.to_string(),
    })
}
