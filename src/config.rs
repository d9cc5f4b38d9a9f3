use std::env;
use std::fmt::Display;
use std::str::FromStr;
use thiserror::Error;

const DEFAULT_JWT_SECRET: &str = "default_jwt_secret_change_me";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Credentials that always log in (and are provisioned on first use).
/// Only active when both TEST_USER_EMAIL and TEST_USER_PASSWORD are set.
#[derive(Debug, Clone)]
pub struct TestUser {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct AiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub jwt_secret: String,
    pub access_token_ttl: i64,
    pub refresh_token_ttl: i64,
    pub upload_dir: String,
    pub max_upload_bytes: usize,
    pub cors_origin: Option<String>,
    pub google_client_id: Option<String>,
    pub ai: Option<AiConfig>,
    pub test_user: Option<TestUser>,
}

impl Config {
    /// Load configuration from the environment (after `.env`, if present)
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let jwt_secret = optional("JWT_SECRET").unwrap_or_else(|| {
            log::warn!("JWT_SECRET not set, using default (not secure for production!)");
            DEFAULT_JWT_SECRET.to_string()
        });

        let ai = optional("AI_API_KEY").map(|api_key| AiConfig {
            api_key,
            base_url: optional("AI_BASE_URL").unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: optional("AI_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
        });
        if ai.is_none() {
            log::info!("AI_API_KEY not set, AI endpoints will answer 503");
        }

        let test_user = match (optional("TEST_USER_EMAIL"), optional("TEST_USER_PASSWORD")) {
            (Some(email), Some(password)) => {
                log::warn!("Test-user login enabled for {}", email);
                Some(TestUser { email, password })
            }
            _ => None,
        };

        Ok(Self {
            host: optional("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or("PORT", 5000)?,
            database_path: optional("DATABASE_PATH").unwrap_or_else(|| "fitsocial.db".to_string()),
            jwt_secret,
            access_token_ttl: parse_or("ACCESS_TOKEN_TTL", 15 * 60)?,
            refresh_token_ttl: parse_or("REFRESH_TOKEN_TTL", 7 * 24 * 60 * 60)?,
            upload_dir: optional("UPLOAD_DIR").unwrap_or_else(|| "uploads".to_string()),
            max_upload_bytes: parse_or("MAX_UPLOAD_BYTES", 5 * 1024 * 1024)?,
            cors_origin: optional("CORS_ORIGIN"),
            google_client_id: optional("GOOGLE_CLIENT_ID"),
            ai,
            test_user,
        })
    }

    /// Defaults suitable for tests: in-memory database, no external services
    pub fn for_tests(upload_dir: impl Into<String>) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            database_path: ":memory:".to_string(),
            jwt_secret: "test_secret".to_string(),
            access_token_ttl: 15 * 60,
            refresh_token_ttl: 7 * 24 * 60 * 60,
            upload_dir: upload_dir.into(),
            max_upload_bytes: 5 * 1024 * 1024,
            cors_origin: None,
            google_client_id: None,
            ai: None,
            test_user: None,
        }
    }
}

/// Unset and blank variables are both treated as absent
fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + Display,
    T::Err: Display,
{
    match optional(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }),
        None => {
            log::debug!("{} not set, using default: {}", key, default);
            Ok(default)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_or_reports_bad_values() {
        env::set_var("FITSOCIAL_TEST_PORT_BAD", "eighty");
        let err = parse_or::<u16>("FITSOCIAL_TEST_PORT_BAD", 80).unwrap_err();
        assert!(err.to_string().contains("FITSOCIAL_TEST_PORT_BAD"));

        env::set_var("FITSOCIAL_TEST_PORT_OK", " 8080 ");
        assert_eq!(parse_or::<u16>("FITSOCIAL_TEST_PORT_OK", 80).unwrap(), 8080);
        assert_eq!(parse_or::<u16>("FITSOCIAL_TEST_PORT_UNSET", 80).unwrap(), 80);
    }

    #[test]
    fn test_blank_is_absent() {
        env::set_var("FITSOCIAL_TEST_BLANK", "  ");
        assert!(optional("FITSOCIAL_TEST_BLANK").is_none());
    }
}
