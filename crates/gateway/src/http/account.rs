use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use civica_auth::{Role, User, bearer_token};
use serde::{Deserialize, Serialize};

use super::{
    AppState, auth_error_response, extract_principal, extract_request_id, instrumented,
    invalid_params,
};

#[derive(Debug, Deserialize)]
pub(super) struct SignInRequest {
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct RegisterRequest {
    email: String,
    password: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Serialize)]
struct MeResponse {
    user: User,
    role: Role,
}

pub(super) async fn sign_in(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<SignInRequest>, JsonRejection>,
) -> Response {
    let request_id = extract_request_id(&headers);
    let span = tracing::info_span!(
        "auth.sign_in",
        request_id = %request_id,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    instrumented("/v1/auth/sessions", "POST", span, async move {
        let Json(req) = body.map_err(|err| invalid_params(err.body_text()))?;
        require_credentials(&req.email, &req.password)?;

        let grant = state
            .accounts
            .sign_in(req.email.trim(), &req.password)
            .await
            .map_err(|err| auth_error_response(&err))?;
        Ok(Json(grant))
    })
    .await
}

pub(super) async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Response {
    let request_id = extract_request_id(&headers);
    let span = tracing::info_span!(
        "auth.register",
        request_id = %request_id,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    instrumented("/v1/auth/accounts", "POST", span, async move {
        let Json(req) = body.map_err(|err| invalid_params(err.body_text()))?;
        require_credentials(&req.email, &req.password)?;

        let grant = state
            .accounts
            .register(req.email.trim(), &req.password, req.name.trim())
            .await
            .map_err(|err| auth_error_response(&err))?;
        Ok((StatusCode::CREATED, Json(grant)))
    })
    .await
}

pub(super) async fn guest(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let request_id = extract_request_id(&headers);
    let span = tracing::info_span!(
        "auth.guest",
        request_id = %request_id,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    instrumented("/v1/auth/guest", "POST", span, async move {
        let grant = state
            .accounts
            .sign_in_as_guest()
            .await
            .map_err(|err| auth_error_response(&err))?;
        Ok((StatusCode::CREATED, Json(grant)))
    })
    .await
}

pub(super) async fn sign_out(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let request_id = extract_request_id(&headers);
    let span = tracing::info_span!(
        "auth.sign_out",
        request_id = %request_id,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    instrumented("/v1/auth/sessions/current", "DELETE", span, async move {
        let secret = bearer_token(&headers).map_err(|err| auth_error_response(&err))?;
        state
            .accounts
            .sign_out(&secret)
            .await
            .map_err(|err| auth_error_response(&err))?;
        Ok(StatusCode::NO_CONTENT)
    })
    .await
}

pub(super) async fn me(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let request_id = extract_request_id(&headers);
    let span = tracing::info_span!(
        "auth.me",
        request_id = %request_id,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    instrumented("/v1/auth/me", "GET", span, async move {
        let principal = extract_principal(&state, &headers).await?;
        Ok(Json(MeResponse {
            role: principal.role,
            user: principal.user,
        }))
    })
    .await
}

/// Gives the caller's guest account credentials. The current session keeps
/// its guest role; signing in again yields a member session.
pub(super) async fn convert(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Response {
    let request_id = extract_request_id(&headers);
    let span = tracing::info_span!(
        "auth.convert",
        request_id = %request_id,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    instrumented("/v1/auth/convert", "POST", span, async move {
        let principal = extract_principal(&state, &headers).await?;
        let Json(req) = body.map_err(|err| invalid_params(err.body_text()))?;
        require_credentials(&req.email, &req.password)?;

        let user = state
            .accounts
            .convert_guest(&principal, req.email.trim(), &req.password, req.name.trim())
            .await
            .map_err(|err| auth_error_response(&err))?;
        Ok(Json(user))
    })
    .await
}

fn require_credentials(email: &str, password: &str) -> Result<(), super::ApiError> {
    if email.trim().is_empty() || !email.contains('@') {
        return Err(invalid_params("email is required"));
    }
    if password.is_empty() {
        return Err(invalid_params("password is required"));
    }
    Ok(())
}
