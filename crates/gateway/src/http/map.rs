use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use civica_contracts::{LOCATIONS, Location};
use civica_explorer::geo::{MapSelection, code_labels, select_at};
use civica_explorer::{FeatureCollection, GeolocationError};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::explore::{settle, spawn_fetch};
use super::{ApiError, AppState, extract_request_id, instrumented, invalid_params, json_error};

#[derive(Debug, Serialize)]
struct FeatureSummary {
    code: String,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
}

#[derive(Debug, Serialize)]
struct FeaturesResponse {
    features: Vec<FeatureSummary>,
    /// Location codes whose geometry could not be parsed.
    rejected: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct LookupParams {
    lng: Option<String>,
    lat: Option<String>,
}

/// What a device reported: a position, a numeric error code, or no support.
#[derive(Debug, Default, Deserialize)]
pub(super) struct LocateRequest {
    #[serde(default)]
    longitude: Option<f64>,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    error_code: Option<u16>,
    #[serde(default)]
    unsupported: bool,
}

pub(super) async fn features(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let request_id = extract_request_id(&headers);
    let span = tracing::info_span!(
        "map.features",
        request_id = %request_id,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    instrumented("/v1/map/features", "GET", span, async move {
        let (collection, _) = load_features(&state).await?;
        Ok(Json(FeaturesResponse {
            features: collection
                .features()
                .iter()
                .map(|feature| FeatureSummary {
                    code: feature.code.clone(),
                    name: feature.name.clone(),
                    kind: feature.kind.clone(),
                })
                .collect(),
            rejected: collection
                .rejected()
                .iter()
                .map(|(code, _)| code.clone())
                .collect(),
        }))
    })
    .await
}

pub(super) async fn lookup(
    State(state): State<AppState>,
    headers: HeaderMap,
    params: Result<Query<LookupParams>, QueryRejection>,
) -> Response {
    let request_id = extract_request_id(&headers);
    let span = tracing::info_span!(
        "map.lookup",
        request_id = %request_id,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    instrumented("/v1/map/lookup", "GET", span, async move {
        let Query(params) = params.map_err(|err| invalid_params(err.body_text()))?;
        let longitude = parse_coordinate(params.lng.as_deref(), "lng", 180.0)?;
        let latitude = parse_coordinate(params.lat.as_deref(), "lat", 90.0)?;
        locate_point(&state, longitude, latitude).await.map(Json)
    })
    .await
}

pub(super) async fn locate(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<LocateRequest>, JsonRejection>,
) -> Response {
    let request_id = extract_request_id(&headers);
    let span = tracing::info_span!(
        "map.locate",
        request_id = %request_id,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    instrumented("/v1/map/locate", "POST", span, async move {
        let Json(report) = body.map_err(|err| invalid_params(err.body_text()))?;

        let device_error = if report.unsupported {
            Some(GeolocationError::Unsupported)
        } else {
            report.error_code.map(GeolocationError::from_code)
        };
        if let Some(err) = device_error {
            crate::metrics::observe_map_lookup("device_error");
            return Err(geolocation_error_response(err));
        }

        match (report.longitude, report.latitude) {
            (Some(longitude), Some(latitude))
                if longitude.is_finite() && latitude.is_finite() =>
            {
                locate_point(&state, longitude, latitude).await.map(Json)
            }
            _ => Err(invalid_params(
                "report must carry longitude and latitude, error_code, or unsupported",
            )),
        }
    })
    .await
}

async fn locate_point(
    state: &AppState,
    longitude: f64,
    latitude: f64,
) -> Result<MapSelection, ApiError> {
    let (collection, locations) = load_features(state).await?;
    let labels = code_labels(&locations);
    let selection = select_at(&collection, &labels, longitude, latitude);

    let outcome = if selection.code.is_some() { "hit" } else { "miss" };
    crate::metrics::observe_map_lookup(outcome);
    tracing::debug!(
        longitude,
        latitude,
        code = selection.code.as_deref().unwrap_or(""),
        "map lookup"
    );

    Ok(selection)
}

/// Builds the feature set from the locations collection. A failed fetch is
/// an error here; a lookup without boundaries cannot answer anything.
async fn load_features(state: &AppState) -> Result<(FeatureCollection, Vec<Location>), ApiError> {
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let load = settle(spawn_fetch::<Location>(state, LOCATIONS, &cancel)).await;
    if let Some(message) = load.error {
        return Err(json_error(StatusCode::BAD_GATEWAY, "ERR_BACKEND", message, true));
    }

    let collection = FeatureCollection::from_locations(&load.records);
    for (code, err) in collection.rejected() {
        tracing::debug!(code = code.as_str(), error = %err, "skipping unparsable geometry");
    }
    Ok((collection, load.records))
}

fn parse_coordinate(raw: Option<&str>, name: &str, bound: f64) -> Result<f64, ApiError> {
    let raw = raw
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| invalid_params(format!("missing {}", name)))?;
    let value = raw
        .parse::<f64>()
        .map_err(|_| invalid_params(format!("{} must be a number", name)))?;
    if !value.is_finite() || value.abs() > bound {
        return Err(invalid_params(format!(
            "{} must be between -{} and {}",
            name, bound, bound
        )));
    }
    Ok(value)
}

fn geolocation_error_response(err: GeolocationError) -> ApiError {
    let retryable = matches!(
        err,
        GeolocationError::PositionUnavailable | GeolocationError::Timeout
    );
    json_error(
        StatusCode::UNPROCESSABLE_ENTITY,
        err.code(),
        err.message(),
        retryable,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_are_bounded() {
        assert_eq!(parse_coordinate(Some(" -66.15 "), "lng", 180.0).unwrap(), -66.15);
        assert!(parse_coordinate(None, "lng", 180.0).is_err());
        assert!(parse_coordinate(Some("abc"), "lat", 90.0).is_err());
        assert!(parse_coordinate(Some("91"), "lat", 90.0).is_err());
        assert!(parse_coordinate(Some("NaN"), "lat", 90.0).is_err());
    }

    #[test]
    fn device_errors_map_to_localized_messages() {
        let (status, Json(body)) = geolocation_error_response(GeolocationError::from_code(1));
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body.code, "ERR_GEOLOCATION_DENIED");
        assert_eq!(body.message, "Permiso de ubicación denegado");
        assert!(!body.retryable);

        let (_, Json(body)) = geolocation_error_response(GeolocationError::from_code(3));
        assert_eq!(body.message, "Tiempo de espera agotado");
        assert!(body.retryable);

        let (_, Json(body)) = geolocation_error_response(GeolocationError::Unsupported);
        assert_eq!(body.message, "Tu navegador no soporta geolocalización");
    }
}
