use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;

pub mod documents;
pub mod storage;

pub use documents::{
    DocumentList, DocumentStore, PermissionOptions, Query, document_permissions,
};
pub use storage::{ObjectStorage, Upload, UploadedFile};

pub const PROJECT_HEADER: &str = "x-appwrite-project";
pub const SESSION_HEADER: &str = "x-appwrite-session";

/// Coordinates of the hosted backend shared by every client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub endpoint: String,
    pub project_id: String,
    pub database_id: String,
    pub bucket_id: String,
    pub timeout: Duration,
}

#[derive(Debug)]
pub enum StoreError {
    Timeout,
    Http(reqwest::Error),
    /// Non-success status with the backend's own message.
    Backend {
        status: StatusCode,
        message: String,
        kind: Option<String>,
    },
    InvalidResponse(String),
    InvalidRequest(String),
    /// The acting user does not own the document.
    Unauthorized,
}

impl StoreError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            StoreError::Backend { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Timeout => write!(f, "backend request timed out"),
            StoreError::Http(err) => write!(f, "backend HTTP error: {}", err),
            StoreError::Backend { message, .. } => write!(f, "{}", message),
            StoreError::InvalidResponse(detail) => {
                write!(f, "backend returned invalid response: {}", detail)
            }
            StoreError::InvalidRequest(detail) => write!(f, "invalid request: {}", detail),
            StoreError::Unauthorized => write!(f, "Unauthorized"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<reqwest::Error> for StoreError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            StoreError::Timeout
        } else {
            StoreError::Http(value)
        }
    }
}

#[derive(Deserialize)]
struct BackendErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

/// HTTP plumbing for the backend REST API.
///
/// Cloning is cheap. A client bound to a session sends it on every request.
#[derive(Clone)]
pub struct BackendClient {
    config: Arc<BackendConfig>,
    http: reqwest::Client,
    session: Option<String>,
}

impl BackendClient {
    pub fn new(config: BackendConfig) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(StoreError::Http)?;

        Ok(Self {
            config: Arc::new(config),
            http,
            session: None,
        })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn with_session(&self, session: impl Into<String>) -> Self {
        Self {
            config: self.config.clone(),
            http: self.http.clone(),
            session: Some(session.into()),
        }
    }

    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.endpoint.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .http
            .request(method, self.url(path))
            .header(PROJECT_HEADER, &self.config.project_id);
        match self.session.as_deref() {
            Some(session) => builder.header(SESSION_HEADER, session),
            None => builder,
        }
    }

    pub async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response, StoreError> {
        let resp = builder.send().await?;
        let status = resp.status();
        tracing::debug!(status = status.as_u16(), url = %resp.url().path(), "backend response");

        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.bytes().await.unwrap_or_default();
        let decoded = serde_json::from_slice::<BackendErrorBody>(&body).ok();
        let (message, kind) = match decoded {
            Some(BackendErrorBody { message, kind }) => (message, kind),
            None => (None, None),
        };

        Err(StoreError::Backend {
            status,
            message: message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| format!("backend returned status {}", status)),
            kind,
        })
    }

    pub async fn send_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> Result<T, StoreError> {
        let resp = self.send(builder).await?;
        resp.json::<T>()
            .await
            .map_err(|err| StoreError::InvalidResponse(err.to_string()))
    }

    /// Public liveness check of the backend.
    pub async fn ping(&self) -> Result<(), StoreError> {
        self.send(self.request(Method::GET, "health/version")).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(endpoint: &str) -> BackendConfig {
        BackendConfig {
            endpoint: endpoint.to_string(),
            project_id: "proj".to_string(),
            database_id: "db".to_string(),
            bucket_id: "bucket".to_string(),
            timeout: Duration::from_millis(500),
        }
    }

    #[test]
    fn url_joins_without_double_slashes() {
        let client = BackendClient::new(config("https://backend.example/v1/")).unwrap();
        assert_eq!(
            client.url("/databases/db/collections"),
            "https://backend.example/v1/databases/db/collections"
        );
    }

    #[test]
    fn with_session_keeps_config_and_adds_session() {
        let client = BackendClient::new(config("https://backend.example/v1")).unwrap();
        assert!(client.session().is_none());
        let user = client.with_session("secret");
        assert_eq!(user.session(), Some("secret"));
        assert_eq!(user.config().project_id, "proj");
    }

    #[test]
    fn backend_error_displays_message_verbatim() {
        let err = StoreError::Backend {
            status: StatusCode::NOT_FOUND,
            message: "Document with the requested ID could not be found.".to_string(),
            kind: Some("document_not_found".to_string()),
        };
        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "Document with the requested ID could not be found."
        );
        assert_eq!(StoreError::Unauthorized.to_string(), "Unauthorized");
    }
}
