use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::AuthError;

const TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";

/// Identity asserted by a verified Google ID token
#[derive(Debug, Clone)]
pub struct GoogleProfile {
    pub sub: String,
    pub email: String,
    pub name: Option<String>,
    pub picture: Option<String>,
}

/// Verifies the ID token the client got from Google Identity Services
#[async_trait]
pub trait GoogleVerifier: Send + Sync {
    async fn verify(&self, id_token: &str) -> Result<GoogleProfile, AuthError>;
}

/// Verifier backed by Google's tokeninfo endpoint
pub struct GoogleTokenInfo {
    http_client: Client,
    client_id: Option<String>,
    endpoint: String,
}

/// tokeninfo encodes most values as strings, including booleans
#[derive(Debug, Deserialize)]
struct TokenInfo {
    sub: String,
    #[serde(default)]
    aud: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    email_verified: serde_json::Value,
    name: Option<String>,
    picture: Option<String>,
}

impl GoogleTokenInfo {
    pub fn new(client_id: Option<String>) -> Self {
        Self {
            http_client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
            client_id,
            endpoint: TOKENINFO_URL.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl GoogleVerifier for GoogleTokenInfo {
    async fn verify(&self, id_token: &str) -> Result<GoogleProfile, AuthError> {
        if id_token.trim().is_empty() {
            return Err(AuthError::Google("missing credential".to_string()));
        }

        let response = self
            .http_client
            .get(&self.endpoint)
            .query(&[("id_token", id_token)])
            .send()
            .await
            .map_err(|e| {
                log::error!("Google tokeninfo request failed: {}", e);
                AuthError::GoogleUnavailable(e.to_string())
            })?;

        let status = response.status();
        if status.is_server_error() {
            log::error!("Google tokeninfo returned {}", status);
            return Err(AuthError::GoogleUnavailable(format!("tokeninfo returned {}", status)));
        }
        if !status.is_success() {
            log::warn!("Google rejected ID token with status {}", status);
            return Err(AuthError::Google("token rejected".to_string()));
        }

        let info: TokenInfo = response
            .json()
            .await
            .map_err(|e| AuthError::GoogleUnavailable(format!("unreadable tokeninfo response: {}", e)))?;

        profile_from_token_info(info, self.client_id.as_deref())
    }
}

fn profile_from_token_info(info: TokenInfo, client_id: Option<&str>) -> Result<GoogleProfile, AuthError> {
    if let Some(expected) = client_id {
        if info.aud != expected {
            return Err(AuthError::Google("token issued for another client".to_string()));
        }
    }

    let verified = match &info.email_verified {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::String(s) => s == "true",
        _ => false,
    };
    if info.email.is_empty() || !verified {
        return Err(AuthError::Google("email not verified".to_string()));
    }

    Ok(GoogleProfile {
        sub: info.sub,
        email: info.email,
        name: info.name,
        picture: info.picture,
    })
}
