use crate::config::AuthConfig;
use async_trait::async_trait;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use poem::http::StatusCode;
use poem::web::cookie::Cookie;
use poem::{Endpoint, Middleware, Request};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::{SystemTime, UNIX_EPOCH};

pub const AUTH_COOKIE_NAME: &str = "X-Auth-Token";

/// One registered user (spec §6 persisted `users` table, password hashing
/// itself out of scope — spec §1 Non-goals).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: uuid::Uuid,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub disabled: bool,
    pub hashed_password: String,
}

#[async_trait]
pub trait UsersStore: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Option<User>;
}

/// Minimal in-memory `UsersStore`. Password hashing/verification and the
/// account-management HTTP surface beyond `/users/login` are explicitly out
/// of scope (spec §1); this repo treats "hashed_password equals the
/// submitted password" as the verification step so login can be exercised
/// end to end without reimplementing a password hasher.
pub struct InMemoryUsersStore {
    users: StdMutex<HashMap<String, User>>,
}

impl InMemoryUsersStore {
    pub fn new() -> Self {
        Self {
            users: StdMutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, user: User) {
        self.users.lock().unwrap().insert(user.username.clone(), user);
    }
}

impl Default for InMemoryUsersStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UsersStore for InMemoryUsersStore {
    async fn find_by_username(&self, username: &str) -> Option<User> {
        self.users.lock().unwrap().get(username).cloned()
    }
}

/// JWT claims: `sub` (username) and `exp` (spec §6 `auth_algorithm`,
/// `token_expiration`; token format taken from `auth_claims.py`, see
/// SPEC_FULL.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("account is disabled")]
    AccountDisabled,
    #[error("invalid or expired token")]
    InvalidToken,
    #[error(transparent)]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

impl crate::errors::SafeDisplay for AuthError {
    fn to_safe_string(&self) -> String {
        match self {
            AuthError::InvalidCredentials => "invalid credentials".to_string(),
            AuthError::AccountDisabled => "account is disabled".to_string(),
            AuthError::InvalidToken | AuthError::Jwt(_) => "invalid or expired token".to_string(),
        }
    }
}

/// Issues a signed JWT for a verified user, expiring `token_ttl` from now.
pub fn issue_token(config: &AuthConfig, username: &str) -> Result<(String, u64), AuthError> {
    let exp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_secs()
        + config.token_ttl.as_secs();
    let claims = Claims {
        sub: username.to_string(),
        exp,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )?;
    Ok((token, exp))
}

fn decode_token(config: &AuthConfig, token: &str) -> Result<Claims, AuthError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AuthError::InvalidToken)?;
    Ok(data.claims)
}

/// Authenticates a login attempt against `users_store`, returning a signed
/// token on success (spec §6 `POST /users/login`).
pub async fn login(
    config: &AuthConfig,
    users_store: &dyn UsersStore,
    username: &str,
    password: &str,
) -> Result<(String, u64), AuthError> {
    let user = users_store
        .find_by_username(username)
        .await
        .ok_or(AuthError::InvalidCredentials)?;
    if user.disabled {
        return Err(AuthError::AccountDisabled);
    }
    if user.hashed_password != password {
        return Err(AuthError::InvalidCredentials);
    }
    issue_token(config, username)
}

/// `verify_token(users_store, cookie_value) -> {error?, message}` (spec
/// §6). Returns the authenticated username on success.
pub async fn verify_token(
    config: &AuthConfig,
    users_store: &dyn UsersStore,
    token: &str,
) -> Result<String, AuthError> {
    let claims = decode_token(config, token)?;
    let user = users_store
        .find_by_username(&claims.sub)
        .await
        .ok_or(AuthError::InvalidToken)?;
    if user.disabled {
        return Err(AuthError::AccountDisabled);
    }
    Ok(claims.sub)
}

/// Paths the auth middleware lets through unauthenticated (spec §6).
const ALLOWLIST: &[&str] = &["/docs", "/favicon.ico", "/openapi.json", "/users/login"];

/// Bearer-token/cookie middleware: rejects with `401` and clears the cookie
/// when verification fails, except on `ALLOWLIST` paths (spec §6).
pub struct AuthMiddleware {
    pub config: Arc<AuthConfig>,
    pub users_store: Arc<dyn UsersStore>,
}

impl<E: Endpoint> Middleware<E> for AuthMiddleware {
    type Output = AuthMiddlewareImpl<E>;

    fn transform(&self, ep: E) -> Self::Output {
        AuthMiddlewareImpl {
            ep,
            config: Arc::clone(&self.config),
            users_store: Arc::clone(&self.users_store),
        }
    }
}

pub struct AuthMiddlewareImpl<E> {
    ep: E,
    config: Arc<AuthConfig>,
    users_store: Arc<dyn UsersStore>,
}

fn extract_token(req: &Request) -> Option<String> {
    if let Some(header) = req.headers().get(poem::http::header::AUTHORIZATION) {
        if let Ok(value) = header.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }
    let cookie_header = req.headers().get(poem::http::header::COOKIE)?.to_str().ok()?;
    let raw = cookie_header.split(';').map(str::trim).find_map(|kv| {
        let (name, value) = kv.split_once('=')?;
        (name == AUTH_COOKIE_NAME).then(|| value.to_string())
    })?;
    raw.strip_prefix("Bearer ").map(str::to_string).or(Some(raw))
}

impl<E: Endpoint> Endpoint for AuthMiddlewareImpl<E> {
    type Output = poem::Response;

    async fn call(&self, req: Request) -> poem::Result<Self::Output> {
        if ALLOWLIST.iter().any(|p| req.uri().path().starts_with(p)) {
            return self.ep.call(req).await.map(poem::IntoResponse::into_response);
        }

        let token = extract_token(&req);
        let verified = match token {
            Some(token) => verify_token(&self.config, self.users_store.as_ref(), &token)
                .await
                .is_ok(),
            None => false,
        };

        if verified {
            return self.ep.call(req).await.map(poem::IntoResponse::into_response);
        }

        let mut response = poem::Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .body("unauthorized");
        response.add_header(
            poem::http::header::SET_COOKIE,
            Cookie::named(AUTH_COOKIE_NAME).to_string(),
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "test-secret".to_string(),
            token_ttl: std::time::Duration::from_secs(3600),
        }
    }

    fn store_with(user: User) -> InMemoryUsersStore {
        let store = InMemoryUsersStore::new();
        store.insert(user);
        store
    }

    #[tokio::test]
    async fn login_succeeds_with_correct_password() {
        let cfg = config();
        let store = store_with(User {
            id: uuid::Uuid::new_v4(),
            username: "alice".to_string(),
            first_name: "Alice".to_string(),
            last_name: "A".to_string(),
            email: "a@example.com".to_string(),
            disabled: false,
            hashed_password: "secret".to_string(),
        });
        let (token, _exp) = login(&cfg, &store, "alice", "secret").await.unwrap();
        let username = verify_token(&cfg, &store, &token).await.unwrap();
        assert_eq!(username, "alice");
    }

    #[tokio::test]
    async fn login_fails_with_wrong_password() {
        let cfg = config();
        let store = store_with(User {
            id: uuid::Uuid::new_v4(),
            username: "alice".to_string(),
            first_name: "Alice".to_string(),
            last_name: "A".to_string(),
            email: "a@example.com".to_string(),
            disabled: false,
            hashed_password: "secret".to_string(),
        });
        let err = login(&cfg, &store, "alice", "wrong").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn disabled_account_cannot_verify() {
        let cfg = config();
        let store = store_with(User {
            id: uuid::Uuid::new_v4(),
            username: "bob".to_string(),
            first_name: "Bob".to_string(),
            last_name: "B".to_string(),
            email: "b@example.com".to_string(),
            disabled: true,
            hashed_password: "secret".to_string(),
        });
        let err = login(&cfg, &store, "bob", "secret").await.unwrap_err();
        assert!(matches!(err, AuthError::AccountDisabled));
    }

    #[tokio::test]
    async fn tampered_token_fails_verification() {
        let cfg = config();
        let store = store_with(User {
            id: uuid::Uuid::new_v4(),
            username: "alice".to_string(),
            first_name: "Alice".to_string(),
            last_name: "A".to_string(),
            email: "a@example.com".to_string(),
            disabled: false,
            hashed_password: "secret".to_string(),
        });
        let (mut token, _) = login(&cfg, &store, "alice", "secret").await.unwrap();
        token.push_str("tampered");
        let err = verify_token(&cfg, &store, &token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }
}
