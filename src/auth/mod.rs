use actix_web::dev::Payload;
use actix_web::http::header::AUTHORIZATION;
use actix_web::{web, FromRequest, HttpRequest};
use chrono::{Duration, Utc};
use futures_util::future::{ready, Ready};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::api::AppState;
use crate::config::{Config, TestUser};
use crate::error::ApiError;
use crate::models::*;
use crate::store::{Store, StoreError, StoreResult};

pub mod google;

pub use google::{GoogleProfile, GoogleTokenInfo, GoogleVerifier};

const BCRYPT_COST: u32 = 10;
const USERNAME_MIN: usize = 3;
const USERNAME_MAX: usize = 30;
const PASSWORD_MIN: usize = 6;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Session expired or revoked")]
    SessionRevoked,
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Google sign-in failed: {0}")]
    Google(String),
    #[error("Google sign-in is unavailable: {0}")]
    GoogleUnavailable(String),
    #[error("Password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
    #[error("Token encoding failed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user_id
    pub exp: i64,
    pub iat: i64,
    pub typ: TokenType,
    /// Session id, only on refresh tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
}

pub struct AuthService {
    jwt_secret: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    test_user: Option<TestUser>,
    google: Arc<dyn GoogleVerifier>,
    store: Arc<Store>,
}

impl AuthService {
    /// Service with default token lifetimes (15 minutes / 7 days) and Google's tokeninfo verifier
    pub fn new(jwt_secret: String, store: Arc<Store>) -> Self {
        Self {
            jwt_secret,
            access_ttl: Duration::minutes(15),
            refresh_ttl: Duration::days(7),
            test_user: None,
            google: Arc::new(GoogleTokenInfo::new(None)),
            store,
        }
    }

    pub fn from_config(config: &Config, store: Arc<Store>) -> Self {
        Self::new(config.jwt_secret.clone(), store)
            .with_token_ttl(config.access_token_ttl, config.refresh_token_ttl)
            .with_test_user(config.test_user.clone())
            .with_google_verifier(Arc::new(GoogleTokenInfo::new(config.google_client_id.clone())))
    }

    pub fn with_token_ttl(mut self, access_secs: i64, refresh_secs: i64) -> Self {
        self.access_ttl = Duration::seconds(access_secs);
        self.refresh_ttl = Duration::seconds(refresh_secs);
        self
    }

    pub fn with_test_user(mut self, test_user: Option<TestUser>) -> Self {
        self.test_user = test_user;
        self
    }

    pub fn with_google_verifier(mut self, google: Arc<dyn GoogleVerifier>) -> Self {
        self.google = google;
        self
    }

    /// Hash a password using bcrypt
    pub fn hash_password(&self, password: &str) -> Result<String, bcrypt::BcryptError> {
        bcrypt::hash(password, BCRYPT_COST)
    }

    /// Verify a password against a bcrypt hash
    pub fn verify_password(&self, password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
        bcrypt::verify(password, hash)
    }

    // ==================== Tokens ====================

    fn sign(&self, claims: &Claims) -> Result<String, jsonwebtoken::errors::Error> {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
    }

    fn decode(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .map_err(|_| AuthError::InvalidToken)
    }

    /// Issue an access/refresh pair. The refresh token is backed by a new session row.
    pub fn issue_tokens(&self, user_id: &str) -> Result<TokenPair, AuthError> {
        let now = Utc::now();

        let mut session = Session {
            id: String::new(),
            user_id: user_id.to_string(),
            expires_at: now + self.refresh_ttl,
            created_at: now,
        };
        self.store.create_session(&mut session)?;

        if let Err(e) = self.store.delete_expired_sessions() {
            log::warn!("Failed to purge expired sessions: {}", e);
        }

        let access_token = self.sign(&Claims {
            sub: user_id.to_string(),
            exp: (now + self.access_ttl).timestamp(),
            iat: now.timestamp(),
            typ: TokenType::Access,
            sid: None,
        })?;

        let refresh_token = self.sign(&Claims {
            sub: user_id.to_string(),
            exp: session.expires_at.timestamp(),
            iat: now.timestamp(),
            typ: TokenType::Refresh,
            sid: Some(session.id),
        })?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_ttl.num_seconds(),
        })
    }

    /// Validate an access token. Refresh tokens are rejected here.
    pub fn validate_access_token(&self, token: &str) -> Result<Claims, AuthError> {
        let claims = self.decode(token)?;
        if claims.typ != TokenType::Access {
            return Err(AuthError::InvalidToken);
        }
        Ok(claims)
    }

    /// Rotate a refresh token: its session is consumed and a new pair is issued
    pub fn refresh(&self, refresh_token: &str) -> Result<AuthResponse, AuthError> {
        let claims = self.decode(refresh_token)?;
        let sid = match (claims.typ, claims.sid) {
            (TokenType::Refresh, Some(sid)) => sid,
            _ => return Err(AuthError::InvalidToken),
        };

        let session = match self.store.get_session(&sid) {
            Ok(s) => s,
            Err(StoreError::NotFound(_)) => return Err(AuthError::SessionRevoked),
            Err(e) => return Err(e.into()),
        };
        if session.user_id != claims.sub || session.expires_at < Utc::now() {
            return Err(AuthError::SessionRevoked);
        }

        // Another request may have rotated the same token first
        if !self.store.delete_session(&sid)? {
            return Err(AuthError::SessionRevoked);
        }

        let user = match self.store.get_user(&claims.sub) {
            Ok(u) => u,
            Err(StoreError::NotFound(_)) => return Err(AuthError::InvalidToken),
            Err(e) => return Err(e.into()),
        };

        self.issue_auth(user)
    }

    /// Revoke the session behind a refresh token. Revoking twice is not an error.
    pub fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        let claims = self.decode(refresh_token)?;
        match (claims.typ, claims.sid) {
            (TokenType::Refresh, Some(sid)) => {
                if self.store.delete_session(&sid)? {
                    log::info!("Session {} revoked for user {}", sid, claims.sub);
                }
                Ok(())
            }
            _ => Err(AuthError::InvalidToken),
        }
    }

    fn issue_auth(&self, user: User) -> Result<AuthResponse, AuthError> {
        let tokens = self.issue_tokens(&user.id)?;
        Ok(AuthResponse { tokens, user })
    }

    // ==================== Flows ====================

    pub fn register(&self, req: &RegisterRequest) -> Result<AuthResponse, AuthError> {
        let username = req.username.trim();
        let email = req.email.trim().to_lowercase();

        validate_username(username).map_err(AuthError::Validation)?;
        validate_email(&email).map_err(AuthError::Validation)?;
        validate_password(&req.password).map_err(AuthError::Validation)?;

        if taken(self.store.get_user_by_username(username))? {
            return Err(AuthError::Conflict("Username already taken".to_string()));
        }
        if taken(self.store.get_user_by_email(&email))? {
            return Err(AuthError::Conflict("Email already registered".to_string()));
        }

        let password_hash = self.hash_password(&req.password)?;
        let mut user = User::new(username, email, password_hash);
        self.store.create_user(&mut user).map_err(|e| match e {
            StoreError::Conflict(_) => AuthError::Conflict("User already exists".to_string()),
            other => other.into(),
        })?;

        log::info!("Registered user {} ({})", user.username, user.id);
        self.issue_auth(user)
    }

    /// Login by email (identifier contains '@') or username
    pub fn login(&self, identifier: &str, password: &str) -> Result<AuthResponse, AuthError> {
        let identifier = identifier.trim();

        if let Some(test_user) = &self.test_user {
            if identifier.eq_ignore_ascii_case(&test_user.email) && password == test_user.password {
                let user = self.ensure_test_user(test_user)?;
                log::warn!("Test-user login for {}", user.username);
                return self.issue_auth(user);
            }
        }

        let lookup = if identifier.contains('@') {
            self.store.get_user_by_email(identifier)
        } else {
            self.store.get_user_by_username(identifier)
        };
        let user = match lookup {
            Ok(u) => u,
            Err(StoreError::NotFound(_)) => return Err(AuthError::InvalidCredentials),
            Err(e) => return Err(e.into()),
        };

        // Google-only accounts have no password to check against
        if user.password_hash.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }

        let valid = self
            .verify_password(password, &user.password_hash)
            .unwrap_or(false);
        if !valid {
            return Err(AuthError::InvalidCredentials);
        }

        self.issue_auth(user)
    }

    pub async fn login_with_google(&self, credential: &str) -> Result<AuthResponse, AuthError> {
        let profile = self.google.verify(credential).await?;
        let user = self.find_or_create_google_user(&profile)?;
        self.issue_auth(user)
    }

    fn find_or_create_google_user(&self, profile: &GoogleProfile) -> Result<User, AuthError> {
        match self.store.get_user_by_google_id(&profile.sub) {
            Ok(user) => return Ok(user),
            Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let email = profile.email.trim().to_lowercase();
        match self.store.get_user_by_email(&email) {
            Ok(mut user) => {
                user.google_id = Some(profile.sub.clone());
                if user.profile_picture.is_empty() {
                    user.profile_picture = profile.picture.clone().unwrap_or_default();
                }
                self.store.update_user(&mut user)?;
                log::info!("Linked Google account to user {}", user.id);
                Ok(user)
            }
            Err(StoreError::NotFound(_)) => {
                let local_part = email.split('@').next().unwrap_or_default();
                let username = self.unique_username(local_part)?;

                let mut user = User::new(username, email, String::new());
                user.google_id = Some(profile.sub.clone());
                user.profile_picture = profile.picture.clone().unwrap_or_default();
                self.store.create_user(&mut user)?;
                log::info!("Created user {} from Google sign-in", user.username);
                Ok(user)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn ensure_test_user(&self, test_user: &TestUser) -> Result<User, AuthError> {
        match self.store.get_user_by_email(&test_user.email) {
            Ok(user) => Ok(user),
            Err(StoreError::NotFound(_)) => {
                let username = self.unique_username("testuser")?;
                let password_hash = self.hash_password(&test_user.password)?;
                let mut user = User::new(username, test_user.email.to_lowercase(), password_hash);
                self.store.create_user(&mut user)?;
                Ok(user)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Derive a valid, unused username from `base`, appending a counter on collision
    pub fn unique_username(&self, base: &str) -> Result<String, AuthError> {
        let mut stem: String = base
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '.')
            .take(USERNAME_MAX - 6)
            .collect();
        if stem.len() < USERNAME_MIN {
            stem = format!("{}user", stem);
        }

        for n in 0..10_000u32 {
            let candidate = if n == 0 { stem.clone() } else { format!("{}{}", stem, n) };
            if !taken(self.store.get_user_by_username(&candidate))? {
                return Ok(candidate);
            }
        }
        Err(AuthError::Conflict("Could not allocate a username".to_string()))
    }
}

fn taken(lookup: StoreResult<User>) -> Result<bool, AuthError> {
    match lookup {
        Ok(_) => Ok(true),
        Err(StoreError::NotFound(_)) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

pub fn validate_username(username: &str) -> Result<(), String> {
    let len = username.chars().count();
    if !(USERNAME_MIN..=USERNAME_MAX).contains(&len) {
        return Err(format!(
            "Username must be between {} and {} characters",
            USERNAME_MIN, USERNAME_MAX
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
    {
        return Err("Username may only contain letters, digits, '_' and '.'".to_string());
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), String> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => Ok(()),
        _ => Err("Invalid email address".to_string()),
    }
}

pub fn validate_password(password: &str) -> Result<(), String> {
    if password.chars().count() < PASSWORD_MIN {
        return Err(format!("Password must be at least {} characters", PASSWORD_MIN));
    }
    Ok(())
}

/// Authenticated user, extracted from `Authorization: Bearer <access token>`
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

impl FromRequest for AuthUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(extract_auth(req))
    }
}

fn extract_auth(req: &HttpRequest) -> Result<AuthUser, ApiError> {
    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or_else(|| ApiError::Internal("application state not registered".to_string()))?;

    let auth_header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("Missing Authorization header".to_string()))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::Unauthorized("Invalid Authorization header format".to_string()))?;

    let claims = state
        .auth_service
        .validate_access_token(token.trim())
        .map_err(|_| ApiError::Unauthorized("Invalid or expired token".to_string()))?;

    Ok(AuthUser { user_id: claims.sub })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedGoogle(GoogleProfile);

    #[async_trait]
    impl GoogleVerifier for FixedGoogle {
        async fn verify(&self, _id_token: &str) -> Result<GoogleProfile, AuthError> {
            Ok(self.0.clone())
        }
    }

    fn create_test_auth_service() -> AuthService {
        let store = Store::in_memory().unwrap();
        AuthService::new("test_secret".to_string(), Arc::new(store))
    }

    fn register(auth: &AuthService, username: &str) -> AuthResponse {
        auth.register(&RegisterRequest {
            username: username.to_string(),
            email: format!("{}@example.com", username),
            password: "password123".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_password_hashing() {
        let auth = create_test_auth_service();
        let password = "my_secure_password";

        let hash = auth.hash_password(password).unwrap();
        assert!(auth.verify_password(password, &hash).unwrap());
        assert!(!auth.verify_password("wrong_password", &hash).unwrap());
    }

    #[test]
    fn test_access_and_refresh_are_not_interchangeable() {
        let auth = create_test_auth_service();
        let resp = register(&auth, "lifter");

        let claims = auth.validate_access_token(&resp.tokens.access_token).unwrap();
        assert_eq!(claims.sub, resp.user.id);
        assert!(claims.exp > Utc::now().timestamp());

        assert!(matches!(
            auth.validate_access_token(&resp.tokens.refresh_token),
            Err(AuthError::InvalidToken)
        ));
        assert!(matches!(
            auth.refresh(&resp.tokens.access_token),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn test_refresh_rotates_session() {
        let auth = create_test_auth_service();
        let resp = register(&auth, "runner");

        let rotated = auth.refresh(&resp.tokens.refresh_token).unwrap();
        assert_eq!(rotated.user.id, resp.user.id);
        assert_ne!(rotated.tokens.refresh_token, resp.tokens.refresh_token);

        assert!(matches!(
            auth.refresh(&resp.tokens.refresh_token),
            Err(AuthError::SessionRevoked)
        ));

        auth.logout(&rotated.tokens.refresh_token).unwrap();
        auth.logout(&rotated.tokens.refresh_token).unwrap();
        assert!(matches!(
            auth.refresh(&rotated.tokens.refresh_token),
            Err(AuthError::SessionRevoked)
        ));
    }

    #[test]
    fn test_token_from_other_secret_is_rejected() {
        let auth = create_test_auth_service();
        let resp = register(&auth, "swimmer");

        let other = AuthService::new("other_secret".to_string(), Arc::new(Store::in_memory().unwrap()));
        assert!(other.validate_access_token(&resp.tokens.access_token).is_err());
    }

    #[test]
    fn test_register_validation_and_conflicts() {
        let auth = create_test_auth_service();
        register(&auth, "lifter");

        let err = auth
            .register(&RegisterRequest {
                username: "ab".to_string(),
                email: "ab@example.com".to_string(),
                password: "password123".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));

        let err = auth
            .register(&RegisterRequest {
                username: "LIFTER".to_string(),
                email: "new@example.com".to_string(),
                password: "password123".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, AuthError::Conflict(_)));

        let err = auth
            .register(&RegisterRequest {
                username: "newname".to_string(),
                email: "Lifter@Example.com".to_string(),
                password: "password123".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, AuthError::Conflict(_)));
    }

    #[test]
    fn test_login_by_username_or_email() {
        let auth = create_test_auth_service();
        register(&auth, "climber");

        assert!(auth.login("climber", "password123").is_ok());
        assert!(auth.login("climber@example.com", "password123").is_ok());
        assert!(matches!(
            auth.login("climber", "nope"),
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            auth.login("ghost", "password123"),
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[test]
    fn test_test_user_bypass_is_opt_in() {
        let auth = create_test_auth_service();
        assert!(auth.login("demo@example.com", "demo-pass").is_err());

        let auth = create_test_auth_service().with_test_user(Some(TestUser {
            email: "demo@example.com".to_string(),
            password: "demo-pass".to_string(),
        }));
        let first = auth.login("demo@example.com", "demo-pass").unwrap();
        let second = auth.login("DEMO@example.com", "demo-pass").unwrap();
        assert_eq!(first.user.id, second.user.id);
        assert_eq!(first.user.username, "testuser");
        assert!(auth.login("demo@example.com", "wrong").is_err());
    }

    #[actix_web::test]
    async fn test_google_login_creates_then_reuses_user() {
        let store = Arc::new(Store::in_memory().unwrap());
        let profile = GoogleProfile {
            sub: "google-42".to_string(),
            email: "Trail.Runner@gmail.com".to_string(),
            name: Some("Trail Runner".to_string()),
            picture: Some("https://example.com/me.png".to_string()),
        };
        let auth = AuthService::new("test_secret".to_string(), store.clone())
            .with_google_verifier(Arc::new(FixedGoogle(profile)));

        let first = auth.login_with_google("token").await.unwrap();
        assert_eq!(first.user.username, "trail.runner");
        assert_eq!(first.user.email, "trail.runner@gmail.com");
        assert_eq!(first.user.profile_picture, "https://example.com/me.png");

        let second = auth.login_with_google("token").await.unwrap();
        assert_eq!(second.user.id, first.user.id);
        assert_eq!(store.count_users().unwrap(), 1);

        // Google-only accounts cannot use password login
        assert!(matches!(
            auth.login("trail.runner@gmail.com", ""),
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[actix_web::test]
    async fn test_google_login_links_existing_email() {
        let store = Arc::new(Store::in_memory().unwrap());
        let auth = AuthService::new("test_secret".to_string(), store.clone());
        let existing = register(&auth, "coach");

        let auth = auth.with_google_verifier(Arc::new(FixedGoogle(GoogleProfile {
            sub: "google-7".to_string(),
            email: "coach@example.com".to_string(),
            name: None,
            picture: None,
        })));

        let resp = auth.login_with_google("token").await.unwrap();
        assert_eq!(resp.user.id, existing.user.id);
        assert_eq!(
            store.get_user(&existing.user.id).unwrap().google_id.as_deref(),
            Some("google-7")
        );
    }

    #[test]
    fn test_unique_username() {
        let auth = create_test_auth_service();
        register(&auth, "sam");

        assert_eq!(auth.unique_username("sam").unwrap(), "sam1");
        assert_eq!(auth.unique_username("jo").unwrap(), "jouser");
        assert_eq!(auth.unique_username("a+b!c").unwrap(), "abc");
    }

    #[test]
    fn test_field_validators() {
        assert!(validate_username("gym_rat.99").is_ok());
        assert!(validate_username("no spaces").is_err());
        assert!(validate_email("a@b").is_ok());
        assert!(validate_email("@b").is_err());
        assert!(validate_email("a@b@c").is_err());
        assert!(validate_password("12345").is_err());
        assert!(validate_password("123456").is_ok());
    }
}
