use std::time::Instant;

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use civica_contracts::{CANDIDATES, LOCATIONS, POLITICAL_PARTIES, POLLSTERS, SURVEYS};
use civica_explorer::{CandidateView, CollectionLoad, ElectionSnapshot, FilterState};
use civica_store::Query as StoreQuery;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::{AppState, extract_request_id, instrumented, invalid_params};

/// Fields matched by the free-text search on the candidate list.
pub(super) const CANDIDATE_SEARCH_FIELDS: [&str; 5] = [
    "name",
    "target_position",
    "political_party.name",
    "political_party.initials",
    "location.name",
];

#[derive(Debug, Serialize)]
pub(super) struct CandidateListResponse<'a> {
    total: usize,
    candidates: Vec<&'a CandidateView>,
    loading: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub(super) async fn snapshot(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let request_id = extract_request_id(&headers);
    let span = tracing::info_span!(
        "explorer.load",
        request_id = %request_id,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    instrumented("/v1/explorer", "GET", span, async move {
        let cancel = CancellationToken::new();
        let _cancel_on_drop = cancel.clone().drop_guard();

        let snapshot = load_snapshot(&state, &cancel).await;
        if let Some(error) = snapshot.error.as_deref() {
            tracing::warn!(error, "explorer snapshot is partial");
        }
        Ok(Json(snapshot))
    })
    .await
}

pub(super) async fn list_candidates(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> Response {
    let request_id = extract_request_id(&headers);
    let span = tracing::info_span!(
        "explorer.candidates",
        request_id = %request_id,
        filters = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    instrumented("/v1/explorer/candidates", "GET", span, async move {
        let Query(pairs) = query.map_err(|err| invalid_params(err.body_text()))?;
        let filters = FilterState::from_query_pairs(pairs);
        respond_with_candidates(&state, &filters).await
    })
    .await
}

pub(super) async fn query_candidates(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<FilterState>, JsonRejection>,
) -> Response {
    let request_id = extract_request_id(&headers);
    let span = tracing::info_span!(
        "explorer.candidates",
        request_id = %request_id,
        filters = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    instrumented("/v1/explorer/candidates/query", "POST", span, async move {
        let Json(filters) = body.map_err(|err| invalid_params(err.body_text()))?;
        respond_with_candidates(&state, &filters).await
    })
    .await
}

async fn respond_with_candidates(
    state: &AppState,
    filters: &FilterState,
) -> Result<Json<serde_json::Value>, super::ApiError> {
    tracing::Span::current().record("filters", filters.filters.len() as u64);

    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let candidates = spawn_fetch(state, CANDIDATES, &cancel);
    let parties = spawn_fetch(state, POLITICAL_PARTIES, &cancel);
    let locations = spawn_fetch(state, LOCATIONS, &cancel);
    let (candidates, parties, locations) = tokio::join!(
        settle(candidates),
        settle(parties),
        settle(locations)
    );

    let snapshot = ElectionSnapshot::assemble(
        candidates,
        parties,
        locations,
        CollectionLoad::loaded(Vec::new()),
        CollectionLoad::loaded(Vec::new()),
    );
    let matched = filters.apply(&snapshot.candidates, &CANDIDATE_SEARCH_FIELDS);

    let response = CandidateListResponse {
        total: matched.len(),
        candidates: matched,
        loading: snapshot.loading,
        error: snapshot.error.clone(),
    };
    serde_json::to_value(&response).map(Json).map_err(|_| {
        super::json_error(
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            "ERR_INTERNAL",
            "failed to encode candidates".to_string(),
            false,
        )
    })
}

/// Fetches the five collections concurrently and joins them.
///
/// A failed collection contributes no records; the rest still load.
pub(super) async fn load_snapshot(state: &AppState, cancel: &CancellationToken) -> ElectionSnapshot {
    let candidates = spawn_fetch(state, CANDIDATES, cancel);
    let parties = spawn_fetch(state, POLITICAL_PARTIES, cancel);
    let locations = spawn_fetch(state, LOCATIONS, cancel);
    let surveys = spawn_fetch(state, SURVEYS, cancel);
    let pollsters = spawn_fetch(state, POLLSTERS, cancel);

    let (candidates, parties, locations, surveys, pollsters) = tokio::join!(
        settle(candidates),
        settle(parties),
        settle(locations),
        settle(surveys),
        settle(pollsters)
    );

    ElectionSnapshot::assemble(candidates, parties, locations, surveys, pollsters)
}

/// Lists one collection on its own task. The task stops early once `cancel`
/// fires, which happens when the owning request is dropped.
pub(super) fn spawn_fetch<T>(
    state: &AppState,
    collection: &'static str,
    cancel: &CancellationToken,
) -> JoinHandle<CollectionLoad<T>>
where
    T: DeserializeOwned + Send + 'static,
{
    let store = state.store.clone();
    let limit = state.config.list_limit;
    let cancel = cancel.clone();
    let span = tracing::info_span!(
        "store.list",
        collection,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    tokio::spawn(
        async move {
            let started = Instant::now();
            let queries = [StoreQuery::limit(limit)];

            let load = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    super::record_outcome(started, "cancelled");
                    crate::metrics::observe_backend_fetch(collection, "cancelled");
                    return CollectionLoad::default();
                }
                result = store.list::<T>(collection, &queries) => {
                    CollectionLoad::from_result(result.map(|list| list.documents))
                }
            };

            let outcome = if load.error.is_some() { "error" } else { "ok" };
            super::record_outcome(started, outcome);
            crate::metrics::observe_backend_fetch(collection, outcome);
            if let Some(error) = load.error.as_deref() {
                tracing::warn!(collection, error, "collection fetch failed");
            }
            load
        }
        .instrument(span),
    )
}

/// A panicked fetch task reads as a failed collection.
pub(super) async fn settle<T>(handle: JoinHandle<CollectionLoad<T>>) -> CollectionLoad<T> {
    match handle.await {
        Ok(load) => load,
        Err(err) => CollectionLoad::failed(format!("fetch task failed: {}", err)),
    }
}
