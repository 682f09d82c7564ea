use civica_store::{BackendClient, StoreError};
use http::HeaderMap;
use http::header;
use reqwest::{Method, Response};
use serde::{Deserialize, Serialize};

/// Session provider the backend reports for guest sign-ins.
pub const ANONYMOUS_PROVIDER: &str = "anonymous";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Guest,
    Member,
}

impl Role {
    pub fn from_provider(provider: &str) -> Self {
        if provider.eq_ignore_ascii_case(ANONYMOUS_PROVIDER) {
            Role::Guest
        } else {
            Role::Member
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Guest => "guest",
            Role::Member => "member",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Session {
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub expire: Option<String>,
}

impl Session {
    pub fn role(&self) -> Role {
        Role::from_provider(&self.provider)
    }
}

/// The acting user of one request, resolved from its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user: User,
    pub role: Role,
    pub session_secret: String,
}

impl Principal {
    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    pub fn is_guest(&self) -> bool {
        self.role == Role::Guest
    }
}

/// Result of a sign-in: the user plus the secret to send back as a bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionGrant {
    pub session_secret: String,
    pub user: User,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expire: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AuthError {
    pub code: &'static str,
    pub message: String,
}

impl AuthError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Backend messages pass through verbatim; transport failures get `fallback`.
    fn from_store(err: StoreError, fallback: &str) -> Self {
        match err {
            StoreError::Timeout => AuthError::new("ERR_SOURCE_TIMEOUT", fallback),
            StoreError::Backend {
                status, message, ..
            } if status == reqwest::StatusCode::UNAUTHORIZED => {
                AuthError::new("ERR_AUTH_INVALID", message)
            }
            StoreError::Backend { message, .. } => AuthError::new("ERR_BACKEND", message),
            StoreError::Unauthorized => AuthError::new("ERR_UNAUTHORIZED", "Unauthorized"),
            StoreError::Http(_) | StoreError::InvalidResponse(_) | StoreError::InvalidRequest(_) => {
                AuthError::new("ERR_BACKEND", fallback)
            }
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AuthError {}

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct NewAccount<'a> {
    #[serde(rename = "userId")]
    user_id: &'a str,
    email: &'a str,
    password: &'a str,
    name: &'a str,
}

/// Client of the backend's session-based account service.
#[derive(Clone)]
pub struct AccountClient {
    client: BackendClient,
}

impl AccountClient {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<SessionGrant, AuthError> {
        let builder = self
            .client
            .request(Method::POST, "account/sessions/email")
            .json(&Credentials { email, password });
        self.open_session(builder, "Login failed").await
    }

    /// Creates the account, then signs in with the same credentials.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<SessionGrant, AuthError> {
        let builder = self.client.request(Method::POST, "account").json(&NewAccount {
            user_id: "unique()",
            email,
            password,
            name,
        });
        self.client
            .send(builder)
            .await
            .map_err(|err| AuthError::from_store(err, "Registration failed"))?;

        self.sign_in(email, password).await
    }

    pub async fn sign_in_as_guest(&self) -> Result<SessionGrant, AuthError> {
        let builder = self
            .client
            .request(Method::POST, "account/sessions/anonymous");
        self.open_session(builder, "Guest login failed").await
    }

    pub async fn sign_out(&self, session_secret: &str) -> Result<(), AuthError> {
        let builder = self
            .client
            .with_session(session_secret)
            .request(Method::DELETE, "account/sessions/current");
        self.client
            .send(builder)
            .await
            .map_err(|err| AuthError::from_store(err, "Logout failed"))?;
        Ok(())
    }

    pub async fn current_user(&self, session_secret: &str) -> Result<User, AuthError> {
        let user_client = self.client.with_session(session_secret);
        user_client
            .send_json::<User>(user_client.request(Method::GET, "account"))
            .await
            .map_err(|err| AuthError::from_store(err, "failed to load account"))
    }

    pub async fn current_session(&self, session_secret: &str) -> Result<Session, AuthError> {
        let user_client = self.client.with_session(session_secret);
        user_client
            .send_json::<Session>(user_client.request(Method::GET, "account/sessions/current"))
            .await
            .map_err(|err| AuthError::from_store(err, "failed to load session"))
    }

    /// Resolves the caller of a request from its `Authorization: Bearer` header.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Principal, AuthError> {
        let secret = bearer_token(headers)?;
        self.resolve(&secret).await
    }

    pub async fn resolve(&self, session_secret: &str) -> Result<Principal, AuthError> {
        let (user, session) = tokio::join!(
            self.current_user(session_secret),
            self.current_session(session_secret)
        );
        let user = user?;
        let session = session?;

        if session.user_id != user.id {
            return Err(AuthError::new(
                "ERR_AUTH_INVALID",
                "session does not belong to the current account",
            ));
        }

        Ok(Principal {
            role: session.role(),
            user,
            session_secret: session_secret.to_string(),
        })
    }

    /// Gives a guest account an email, password and name. The session stays
    /// valid; its provider still reads as anonymous until the next sign-in.
    pub async fn convert_guest(
        &self,
        principal: &Principal,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<User, AuthError> {
        if !principal.is_guest() {
            return Err(AuthError::new(
                "ERR_ALREADY_MEMBER",
                "account is already registered",
            ));
        }

        let user_client = self.client.with_session(&principal.session_secret);
        user_client
            .send(
                user_client
                    .request(Method::PATCH, "account/email")
                    .json(&Credentials { email, password }),
            )
            .await
            .map_err(|err| AuthError::from_store(err, "Conversion failed"))?;

        user_client
            .send_json::<User>(
                user_client
                    .request(Method::PATCH, "account/name")
                    .json(&serde_json::json!({ "name": name })),
            )
            .await
            .map_err(|err| AuthError::from_store(err, "Conversion failed"))
    }

    async fn open_session(
        &self,
        builder: reqwest::RequestBuilder,
        fallback: &str,
    ) -> Result<SessionGrant, AuthError> {
        let resp = self
            .client
            .send(builder)
            .await
            .map_err(|err| AuthError::from_store(err, fallback))?;

        let cookie_secret = session_cookie(&resp, &self.client.config().project_id);
        let session = resp
            .json::<Session>()
            .await
            .map_err(|_| AuthError::new("ERR_BACKEND", fallback))?;

        let session_secret = Some(session.secret.clone())
            .filter(|s| !s.is_empty())
            .or(cookie_secret)
            .ok_or_else(|| AuthError::new("ERR_BACKEND", "backend did not return a session secret"))?;

        let user = self.current_user(&session_secret).await?;
        tracing::info!(user_id = %user.id, role = session.role().as_str(), "session opened");

        Ok(SessionGrant {
            role: session.role(),
            expire: session.expire,
            session_secret,
            user,
        })
    }
}

/// Session secret from `a_session_<project>` in Set-Cookie, or from the
/// `x-fallback-cookies` JSON header browsers without third-party cookies get.
fn session_cookie(resp: &Response, project_id: &str) -> Option<String> {
    let name = format!("a_session_{}", project_id);

    for value in resp.headers().get_all(header::SET_COOKIE) {
        let Ok(raw) = value.to_str() else {
            continue;
        };
        let pair = raw.split(';').next().unwrap_or_default();
        if let Some((key, secret)) = pair.split_once('=')
            && key.trim() == name
            && !secret.trim().is_empty()
        {
            return Some(secret.trim().to_string());
        }
    }

    resp.headers()
        .get("x-fallback-cookies")
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| serde_json::from_str::<serde_json::Value>(raw).ok())
        .and_then(|cookies| cookies.get(&name)?.as_str().map(str::to_string))
        .filter(|s| !s.is_empty())
}

pub fn bearer_token(headers: &HeaderMap) -> Result<String, AuthError> {
    let authz = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthError::new("ERR_AUTH_REQUIRED", "missing Authorization header"))?;

    let token = authz
        .strip_prefix("Bearer ")
        .or_else(|| authz.strip_prefix("bearer "))
        .ok_or_else(|| {
            AuthError::new("ERR_AUTH_INVALID", "Authorization must be a Bearer token")
        })?;

    if token.trim().is_empty() {
        return Err(AuthError::new("ERR_AUTH_INVALID", "Bearer token is empty"));
    }

    Ok(token.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_rejects_missing_header() {
        let headers = HeaderMap::new();
        let err = bearer_token(&headers).unwrap_err();
        assert_eq!(err.code, "ERR_AUTH_REQUIRED");
    }

    #[test]
    fn bearer_token_rejects_other_schemes_and_blank_tokens() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(&headers).unwrap_err().code, "ERR_AUTH_INVALID");

        headers.insert(header::AUTHORIZATION, "Bearer   ".parse().unwrap());
        assert_eq!(bearer_token(&headers).unwrap_err().code, "ERR_AUTH_INVALID");

        headers.insert(header::AUTHORIZATION, "bearer s3cret".parse().unwrap());
        assert_eq!(bearer_token(&headers).unwrap(), "s3cret");
    }

    #[test]
    fn role_comes_from_provider_not_user_id() {
        assert_eq!(Role::from_provider("anonymous"), Role::Guest);
        assert_eq!(Role::from_provider("email"), Role::Member);

        let session = Session {
            id: "s1".to_string(),
            user_id: "anonymous_looking_id".to_string(),
            provider: "email".to_string(),
            secret: String::new(),
            expire: None,
        };
        assert_eq!(session.role(), Role::Member);
    }

    #[test]
    fn store_errors_keep_backend_message() {
        let err = AuthError::from_store(
            StoreError::Backend {
                status: reqwest::StatusCode::UNAUTHORIZED,
                message: "Invalid credentials. Please check the email and password.".to_string(),
                kind: Some("user_invalid_credentials".to_string()),
            },
            "Login failed",
        );
        assert_eq!(err.code, "ERR_AUTH_INVALID");
        assert_eq!(
            err.message,
            "Invalid credentials. Please check the email and password."
        );

        let err = AuthError::from_store(StoreError::Timeout, "Login failed");
        assert_eq!(err.code, "ERR_SOURCE_TIMEOUT");
        assert_eq!(err.message, "Login failed");
    }
}
