//! Configuration management for Identity Service
//!
//! Loads settings from:
//! 1. Environment variables
//! 2. .env file (local development)
//!
//! # Example
//!
//! ```no_run
//! use identity_service::config::Settings;
//!
//! fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     println!("JWT issuer: {}", settings.jwt.issuer);
//!     Ok(())
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use tracing::info;

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub jwt: JwtSettings,
    pub refresh_token: RefreshTokenSettings,
    pub lockout: LockoutSettings,
    pub account: AccountSettings,
    pub server: ServerSettings,
    pub email: EmailSettings,
    pub oauth: OAuthSettings,
}

impl Settings {
    /// Load settings from environment variables (and `.env` in debug builds)
    pub fn load() -> Result<Self> {
        if cfg!(debug_assertions) {
            dotenvy::dotenv().ok();
            info!("Loaded .env file for development");
        }

        Ok(Settings {
            database: DatabaseSettings::from_env()?,
            jwt: JwtSettings::from_env()?,
            refresh_token: RefreshTokenSettings::from_env()?,
            lockout: LockoutSettings::from_env()?,
            account: AccountSettings::from_env()?,
            server: ServerSettings::from_env()?,
            email: EmailSettings::from_env()?,
            oauth: OAuthSettings::from_env()?,
        })
    }
}

fn parse_var<T>(name: &str, default: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .with_context(|| format!("Invalid {}", name))
}

/// Database connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: u64,
}

impl DatabaseSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            max_connections: parse_var("DATABASE_MAX_CONNECTIONS", "20")?,
            min_connections: parse_var("DATABASE_MIN_CONNECTIONS", "2")?,
            acquire_timeout: parse_var("DATABASE_ACQUIRE_TIMEOUT", "5")?,
        })
    }
}

/// JWT signing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtSettings {
    pub issuer: String,
    pub access_token_ttl_secs: i64,
    /// Lifetime of signed `token_type=refresh` JWTs
    pub refresh_claim_ttl_secs: i64,
    /// PEM file holding the signing key; unset means a fresh key per process
    pub private_key_path: Option<String>,
    /// Overrides the thumbprint-derived key id
    pub key_id: Option<String>,
    pub key_bits: usize,
}

impl JwtSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| "idp-service".to_string()),
            access_token_ttl_secs: parse_var("JWT_ACCESS_TOKEN_TTL_SECS", "900")?,
            refresh_claim_ttl_secs: parse_var("JWT_REFRESH_TOKEN_TTL_SECS", "604800")?,
            private_key_path: env::var("JWT_PRIVATE_KEY_PATH").ok(),
            key_id: env::var("JWT_KEY_ID").ok(),
            key_bits: parse_var("JWT_KEY_BITS", "2048")?,
        })
    }
}

/// Opaque refresh token settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenSettings {
    pub ttl_secs: i64,
    /// HMAC key for token fingerprints; random per process when unset
    #[serde(skip_serializing)]
    pub fingerprint_key: Option<String>,
    pub purge_interval_secs: u64,
}

impl RefreshTokenSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            ttl_secs: parse_var("REFRESH_TOKEN_TTL_SECS", "604800")?,
            fingerprint_key: env::var("REFRESH_TOKEN_FINGERPRINT_KEY").ok(),
            purge_interval_secs: parse_var("REFRESH_TOKEN_PURGE_INTERVAL_SECS", "3600")?,
        })
    }
}

/// Failed-login lockout settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockoutSettings {
    pub max_attempts: u32,
    pub window_minutes: i64,
}

impl Default for LockoutSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window_minutes: 15,
        }
    }
}

impl LockoutSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            max_attempts: parse_var("LOCKOUT_MAX_ATTEMPTS", "5")?,
            window_minutes: parse_var("LOCKOUT_WINDOW_MINUTES", "15")?,
        })
    }
}

/// Email verification and password reset token lifetimes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSettings {
    pub verification_token_ttl_hours: i64,
    pub password_reset_token_ttl_minutes: i64,
}

impl Default for AccountSettings {
    fn default() -> Self {
        Self {
            verification_token_ttl_hours: 24,
            password_reset_token_ttl_minutes: 60,
        }
    }
}

impl AccountSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            verification_token_ttl_hours: parse_var("EMAIL_VERIFICATION_TTL_HOURS", "24")?,
            password_reset_token_ttl_minutes: parse_var("PASSWORD_RESET_TTL_MINUTES", "60")?,
        })
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl ServerSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_var("SERVER_PORT", "8080")?,
        })
    }
}

/// Email service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailSettings {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    #[serde(skip_serializing)]
    pub smtp_password: Option<String>,
    pub smtp_from: String,
    pub use_starttls: bool,
    pub verification_base_url: Option<String>,
    pub password_reset_base_url: Option<String>,
}

impl EmailSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            smtp_host: env::var("SMTP_HOST").unwrap_or_default(),
            smtp_port: parse_var("SMTP_PORT", "1025")?,
            smtp_username: env::var("SMTP_USERNAME").ok(),
            smtp_password: env::var("SMTP_PASSWORD").ok(),
            smtp_from: env::var("SMTP_FROM").unwrap_or_else(|_| "noreply@idp.local".to_string()),
            use_starttls: env::var("SMTP_USE_STARTTLS")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            verification_base_url: env::var("EMAIL_VERIFICATION_BASE_URL").ok(),
            password_reset_base_url: env::var("EMAIL_PASSWORD_RESET_BASE_URL").ok(),
        })
    }
}

/// OAuth provider configuration (Google and LinkedIn)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuthSettings {
    // Google OAuth 2.0
    pub google_client_id: Option<String>,
    #[serde(skip_serializing)]
    pub google_client_secret: Option<String>,
    // LinkedIn (OpenID Connect)
    pub linkedin_client_id: Option<String>,
    #[serde(skip_serializing)]
    pub linkedin_client_secret: Option<String>,
    /// Per-request timeout for provider token exchange and profile fetch
    pub http_timeout_secs: u64,
}

impl OAuthSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            google_client_id: env::var("OAUTH_GOOGLE_CLIENT_ID").ok(),
            google_client_secret: env::var("OAUTH_GOOGLE_CLIENT_SECRET").ok(),
            linkedin_client_id: env::var("OAUTH_LINKEDIN_CLIENT_ID").ok(),
            linkedin_client_secret: env::var("OAUTH_LINKEDIN_CLIENT_SECRET").ok(),
            http_timeout_secs: parse_var("OAUTH_HTTP_TIMEOUT_SECS", "10")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "DATABASE_URL",
        "JWT_ISSUER",
        "JWT_ACCESS_TOKEN_TTL_SECS",
        "LOCKOUT_MAX_ATTEMPTS",
        "LOCKOUT_WINDOW_MINUTES",
        "REFRESH_TOKEN_TTL_SECS",
        "SERVER_PORT",
    ];

    fn clear() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear();
        env::set_var("DATABASE_URL", "postgres://localhost/idp");

        let jwt = JwtSettings::from_env().unwrap();
        assert_eq!(jwt.issuer, "idp-service");
        assert_eq!(jwt.access_token_ttl_secs, 900);
        assert_eq!(jwt.refresh_claim_ttl_secs, 604_800);

        let lockout = LockoutSettings::from_env().unwrap();
        assert_eq!(lockout.max_attempts, 5);
        assert_eq!(lockout.window_minutes, 15);

        let refresh = RefreshTokenSettings::from_env().unwrap();
        assert_eq!(refresh.ttl_secs, 604_800);

        let database = DatabaseSettings::from_env().unwrap();
        assert_eq!(database.url, "postgres://localhost/idp");
        clear();
    }

    #[test]
    #[serial]
    fn test_overrides() {
        clear();
        env::set_var("JWT_ISSUER", "https://id.example.com");
        env::set_var("LOCKOUT_MAX_ATTEMPTS", "3");

        assert_eq!(
            JwtSettings::from_env().unwrap().issuer,
            "https://id.example.com"
        );
        assert_eq!(LockoutSettings::from_env().unwrap().max_attempts, 3);
        clear();
    }

    #[test]
    #[serial]
    fn test_invalid_number_reports_variable() {
        clear();
        env::set_var("SERVER_PORT", "eighty");

        let err = ServerSettings::from_env().unwrap_err();
        assert!(err.to_string().contains("SERVER_PORT"));
        clear();
    }

    #[test]
    #[serial]
    fn test_missing_database_url() {
        clear();
        assert!(DatabaseSettings::from_env().is_err());
    }
}
