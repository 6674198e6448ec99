use crate::api::ApiTags;
use crate::auth::{login, AuthError, UsersStore, AUTH_COOKIE_NAME};
use crate::config::AuthConfig;
use crate::errors::{ErrorBody, SafeDisplay};
use poem_openapi::payload::Json;
use poem_openapi::{ApiResponse, Object, OpenApi};
use std::sync::Arc;

#[derive(Debug, Clone, Object)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Object)]
pub struct LoginResponse {
    pub token: String,
    pub expires: u64,
}

#[derive(Debug, ApiResponse)]
pub enum LoginApiResponse {
    #[oai(status = 200)]
    Success(
        Json<LoginResponse>,
        #[oai(header = "Set-Cookie")] String,
    ),
    #[oai(status = 401)]
    Unauthorized(Json<ErrorBody>),
}

impl From<AuthError> for LoginApiResponse {
    fn from(err: AuthError) -> Self {
        LoginApiResponse::Unauthorized(Json(ErrorBody::new(err.to_safe_string())))
    }
}

type Result<T> = std::result::Result<T, LoginApiResponse>;

pub struct LoginApi {
    pub auth_config: Arc<AuthConfig>,
    pub users_store: Arc<dyn UsersStore>,
}

#[OpenApi(prefix_path = "/", tag = ApiTags::Login)]
impl LoginApi {
    /// Authenticates a username/password pair and issues a signed JWT,
    /// mirroring both the `Authorization: Bearer` header and an
    /// `X-Auth-Token` cookie (spec §6 `POST /users/login`).
    #[oai(path = "/users/login", method = "post", operation_id = "login")]
    async fn login(&self, body: Json<LoginRequest>) -> Result<LoginApiResponse> {
        let (token, expires) = login(
            &self.auth_config,
            self.users_store.as_ref(),
            &body.username,
            &body.password,
        )
        .await?;

        let cookie = format!(
            "{AUTH_COOKIE_NAME}=Bearer {token}; Path=/; Max-Age={}; HttpOnly",
            self.auth_config.token_ttl.as_secs()
        );
        Ok(LoginApiResponse::Success(
            Json(LoginResponse { token, expires }),
            cookie,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{InMemoryUsersStore, User};
    use poem::http::StatusCode;
    use poem::test::TestClient;
    use poem_openapi::OpenApiService;
    use std::time::Duration;

    fn test_client() -> TestClient<poem::Route> {
        let users_store = InMemoryUsersStore::new();
        users_store.insert(User {
            id: uuid::Uuid::new_v4(),
            username: "alice".to_string(),
            first_name: "Alice".to_string(),
            last_name: "A".to_string(),
            email: "alice@example.com".to_string(),
            disabled: false,
            hashed_password: "secret".to_string(),
        });
        let api = LoginApi {
            auth_config: Arc::new(AuthConfig {
                jwt_secret: "test-secret".to_string(),
                token_ttl: Duration::from_secs(3600),
            }),
            users_store: Arc::new(users_store),
        };
        let api_service = OpenApiService::new(api, "blob service API", "test");
        TestClient::new(poem::Route::new().nest("/", api_service))
    }

    #[tokio::test]
    async fn login_with_correct_password_sets_cookie() {
        let client = test_client();
        let resp = client
            .post("/users/login")
            .header("Content-Type", "application/json")
            .body(r#"{"username":"alice","password":"secret"}"#)
            .send()
            .await;
        assert_eq!(resp.0.status().as_u16(), StatusCode::OK.as_u16());
        let cookie = resp
            .0
            .headers()
            .get("set-cookie")
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .to_string();
        assert!(cookie.starts_with(&format!("{AUTH_COOKIE_NAME}=Bearer ")));
    }

    #[tokio::test]
    async fn login_with_wrong_password_is_unauthorized() {
        let client = test_client();
        let resp = client
            .post("/users/login")
            .header("Content-Type", "application/json")
            .body(r#"{"username":"alice","password":"wrong"}"#)
            .send()
            .await;
        assert_eq!(resp.0.status().as_u16(), StatusCode::UNAUTHORIZED.as_u16());
    }
}
