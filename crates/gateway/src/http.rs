use std::collections::BTreeMap;
use std::time::Instant;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use civica_auth::{AccountClient, AuthError, Principal};
use civica_store::{BackendClient, DocumentStore, ObjectStorage, StoreError};
use serde::Serialize;
use tracing::Instrument;
use ulid::Ulid;

use crate::config::{GatewayConfig, StartupError};
use crate::submission_guard::SubmissionGuard;

mod account;
mod contribute;
mod explore;
mod map;
mod pages;

pub use self::pages::page_path;

/// Multipart framing allowance on top of the raw upload limit.
const UPLOAD_ENVELOPE_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    store: DocumentStore,
    storage: ObjectStorage,
    accounts: AccountClient,
    submissions: SubmissionGuard,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

pub async fn router(config: GatewayConfig) -> Result<Router, StartupError> {
    let client = BackendClient::new(config.backend()).map_err(|err| StartupError {
        code: "ERR_BACKEND_CLIENT",
        message: format!("failed to initialize backend client: {}", err),
    })?;

    let state = AppState {
        store: DocumentStore::from_client(client.clone()),
        storage: ObjectStorage::from_client(client.clone()),
        accounts: AccountClient::new(client),
        submissions: SubmissionGuard::new(),
        config: config.clone(),
    };

    let upload_limit = config
        .upload_max_bytes
        .saturating_add(UPLOAD_ENVELOPE_BYTES);

    let api = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/v1/explorer", get(explore::snapshot))
        .route("/v1/explorer/candidates", get(explore::list_candidates))
        .route(
            "/v1/explorer/candidates/query",
            post(explore::query_candidates),
        )
        .route("/v1/map/features", get(map::features))
        .route("/v1/map/lookup", get(map::lookup))
        .route("/v1/map/locate", post(map::locate))
        .route("/v1/forms", get(contribute::list_forms))
        .route("/v1/forms/{form_id}", get(contribute::get_form))
        .route(
            "/v1/forms/{form_id}/fields/{field}/options",
            get(contribute::relation_options),
        )
        .route("/v1/forms/{form_id}/submissions", post(contribute::submit))
        .route(
            "/v1/uploads",
            post(contribute::upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/v1/documents/{collection}/{document_id}",
            patch(contribute::update_document).delete(contribute::delete_document),
        )
        .route("/v1/auth/sessions", post(account::sign_in))
        .route("/v1/auth/sessions/current", delete(account::sign_out))
        .route("/v1/auth/accounts", post(account::register))
        .route("/v1/auth/guest", post(account::guest))
        .route("/v1/auth/me", get(account::me))
        .route("/v1/auth/convert", post(account::convert));

    Ok(pages::mount(api, &config.base_path).with_state(state))
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

#[derive(Debug, Serialize)]
struct ReadyzResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, bool>,
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let backend_ok = match state.store.client().ping().await {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(error = %err, "backend readiness check failed");
            false
        }
    };

    let mut checks = BTreeMap::new();
    checks.insert("backend", backend_ok);

    let (status_code, status) = if backend_ok {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not_ready")
    };

    (status_code, Json(ReadyzResponse { status, checks }))
}

async fn metrics(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    if state.config.metrics_require_auth {
        extract_principal(&state, &headers).await?;
    }

    let (body, content_type) = crate::metrics::render().map_err(|_| {
        json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "ERR_INTERNAL",
            "failed to render metrics".to_string(),
            false,
        )
    })?;

    let content_type = HeaderValue::from_str(&content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("text/plain; version=0.0.4"));

    Ok(([(header::CONTENT_TYPE, content_type)], body))
}

async fn extract_principal(state: &AppState, headers: &HeaderMap) -> Result<Principal, ApiError> {
    state
        .accounts
        .authenticate(headers)
        .await
        .map_err(|err| auth_error_response(&err))
}

/// Signed-in non-guest caller; guests may browse but not contribute.
async fn extract_member(state: &AppState, headers: &HeaderMap) -> Result<Principal, ApiError> {
    let principal = extract_principal(state, headers).await?;
    if principal.is_guest() {
        return Err(json_error(
            StatusCode::FORBIDDEN,
            "ERR_UNAUTHORIZED",
            "guest accounts cannot contribute".to_string(),
            false,
        ));
    }
    Ok(principal)
}

fn extract_request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-civica-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .and_then(sanitize_request_id)
        .unwrap_or_else(|| Ulid::new().to_string())
}

fn sanitize_request_id(raw: &str) -> Option<String> {
    const MAX_LEN: usize = 64;
    let mut out = String::with_capacity(raw.len().min(MAX_LEN));

    for ch in raw.chars() {
        if out.len() >= MAX_LEN {
            break;
        }
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
            out.push(ch);
        }
    }

    (!out.is_empty()).then_some(out)
}

/// Records latency and outcome on the current handler span.
fn record_outcome(started: Instant, outcome: &str) {
    let latency_ms = started.elapsed().as_millis() as u64;
    tracing::Span::current().record("latency_ms", latency_ms);
    tracing::Span::current().record("outcome", outcome);
}

/// Runs `handler` inside `span`, then records the HTTP metrics for `route`.
async fn instrumented<T, F>(
    route: &'static str,
    method: &'static str,
    span: tracing::Span,
    handler: F,
) -> Response
where
    T: IntoResponse,
    F: std::future::Future<Output = Result<T, ApiError>>,
{
    let started = Instant::now();
    let response = async {
        match handler.await {
            Ok(ok) => {
                record_outcome(started, "ok");
                ok.into_response()
            }
            Err((status, body)) => {
                record_outcome(started, &body.0.code);
                (status, body).into_response()
            }
        }
    }
    .instrument(span)
    .await;

    crate::metrics::observe_http_request(
        route,
        method,
        response.status().as_u16(),
        started.elapsed(),
    );
    response
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: String,
    message: String,
    retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
}

fn json_error(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
    retryable: bool,
) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            code: code.into(),
            message: message.into(),
            retryable,
            detail: None,
        }),
    )
}

fn json_error_with_detail(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
    detail: serde_json::Value,
) -> ApiError {
    let (status, Json(mut body)) = json_error(status, code, message, false);
    body.detail = Some(detail);
    (status, Json(body))
}

fn invalid_params(message: impl Into<String>) -> ApiError {
    json_error(StatusCode::BAD_REQUEST, "ERR_INVALID_PARAMS", message, false)
}

/// Backend messages are passed through verbatim.
fn store_error_response(err: &StoreError) -> ApiError {
    match err {
        StoreError::Timeout => json_error(
            StatusCode::GATEWAY_TIMEOUT,
            "ERR_SOURCE_TIMEOUT",
            err.to_string(),
            true,
        ),
        StoreError::Unauthorized => json_error(
            StatusCode::FORBIDDEN,
            "ERR_UNAUTHORIZED",
            err.to_string(),
            false,
        ),
        StoreError::InvalidRequest(detail) => invalid_params(detail.clone()),
        StoreError::Backend {
            status, message, ..
        } => match *status {
            StatusCode::NOT_FOUND => {
                json_error(StatusCode::NOT_FOUND, "ERR_NOT_FOUND", message.clone(), false)
            }
            StatusCode::UNAUTHORIZED => json_error(
                StatusCode::UNAUTHORIZED,
                "ERR_AUTH_INVALID",
                message.clone(),
                false,
            ),
            status => json_error(
                StatusCode::BAD_GATEWAY,
                "ERR_BACKEND",
                message.clone(),
                status.is_server_error(),
            ),
        },
        StoreError::Http(_) | StoreError::InvalidResponse(_) => json_error(
            StatusCode::BAD_GATEWAY,
            "ERR_BACKEND",
            err.to_string(),
            true,
        ),
    }
}

fn auth_error_response(err: &AuthError) -> ApiError {
    let (status, retryable) = match err.code {
        "ERR_AUTH_REQUIRED" | "ERR_AUTH_INVALID" => (StatusCode::UNAUTHORIZED, false),
        "ERR_SOURCE_TIMEOUT" => (StatusCode::GATEWAY_TIMEOUT, true),
        "ERR_BACKEND" => (StatusCode::BAD_GATEWAY, false),
        "ERR_ALREADY_MEMBER" => (StatusCode::CONFLICT, false),
        "ERR_UNAUTHORIZED" => (StatusCode::FORBIDDEN, false),
        _ => (StatusCode::UNAUTHORIZED, false),
    };
    json_error(status, err.code, err.message.clone(), retryable)
}
