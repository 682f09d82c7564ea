use std::collections::BTreeMap;

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use civica_contracts::forms::{FieldType, FormConfig, FormField, FormSubmission, all_forms, form_by_id};
use civica_contracts::{LOCATIONS, is_known_collection};
use civica_explorer::filter::coerce_text;
use civica_store::documents::OWNER_FIELD;
use civica_store::{PermissionOptions, Query as StoreQuery, Upload, UploadedFile};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{
    ApiError, AppState, extract_member, extract_request_id, instrumented, invalid_params,
    json_error, json_error_with_detail, store_error_response,
};

const CREATED_AT_FIELD: &str = "created_at";

#[derive(Debug, Serialize)]
struct SubmissionResponse {
    document: Value,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    subforms: BTreeMap<String, Vec<Value>>,
}

#[derive(Debug, Serialize)]
struct RelationOption {
    value: String,
    label: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct OptionsParams {
    #[serde(default)]
    q: Option<String>,
}

pub(super) async fn list_forms() -> Json<&'static [FormConfig]> {
    Json(all_forms())
}

pub(super) async fn get_form(
    headers: HeaderMap,
    form_id: Result<Path<String>, PathRejection>,
) -> Response {
    let request_id = extract_request_id(&headers);
    let span = tracing::info_span!(
        "form.get",
        request_id = %request_id,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    instrumented("/v1/forms/{form_id}", "GET", span, async move {
        let Path(form_id) = form_id.map_err(|err| invalid_params(err.body_text()))?;
        find_form(&form_id).map(Json)
    })
    .await
}

/// Candidate values for a relation field, optionally narrowed by `q`.
pub(super) async fn relation_options(
    State(state): State<AppState>,
    headers: HeaderMap,
    path: Result<Path<(String, String)>, PathRejection>,
    params: Result<Query<OptionsParams>, QueryRejection>,
) -> Response {
    let request_id = extract_request_id(&headers);
    let span = tracing::info_span!(
        "form.relation_options",
        request_id = %request_id,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    instrumented(
        "/v1/forms/{form_id}/fields/{field}/options",
        "GET",
        span,
        async move {
            let Path((form_id, field_name)) = path.map_err(|err| invalid_params(err.body_text()))?;
            let Query(params) = params.map_err(|err| invalid_params(err.body_text()))?;

            let form = find_form(&form_id)?;
            let field = find_field(form, &field_name).ok_or_else(|| {
                json_error(
                    StatusCode::NOT_FOUND,
                    "ERR_NOT_FOUND",
                    format!("form {} has no field {}", form.id, field_name),
                    false,
                )
            })?;
            let collection = match (field.field_type, field.relation_collection) {
                (FieldType::Relation, Some(collection)) => collection,
                _ => {
                    return Err(invalid_params(format!(
                        "field {} is not a relation",
                        field.name
                    )));
                }
            };

            let list = state
                .store
                .list::<Map<String, Value>>(collection, &[StoreQuery::limit(state.config.list_limit)])
                .await
                .map_err(|err| store_error_response(&err))?;

            let needle = params
                .q
                .as_deref()
                .map(str::trim)
                .filter(|q| !q.is_empty())
                .map(str::to_lowercase);
            let options = list
                .documents
                .iter()
                .filter_map(|doc| relation_option(collection, doc))
                .filter(|option| {
                    needle
                        .as_deref()
                        .is_none_or(|needle| option.label.to_lowercase().contains(needle))
                })
                .collect::<Vec<_>>();

            Ok(Json(options))
        },
    )
    .await
}

pub(super) async fn submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    form_id: Result<Path<String>, PathRejection>,
    body: Result<Json<FormSubmission>, JsonRejection>,
) -> Response {
    let request_id = extract_request_id(&headers);
    let span = tracing::info_span!(
        "form.submit",
        request_id = %request_id,
        form_id = tracing::field::Empty,
        user_id = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    instrumented("/v1/forms/{form_id}/submissions", "POST", span, async move {
        let Path(form_id) = form_id.map_err(|err| invalid_params(err.body_text()))?;
        let form = find_form(&form_id)?;
        tracing::Span::current().record("form_id", form.id);

        let principal = extract_member(&state, &headers).await?;
        tracing::Span::current().record("user_id", principal.user_id());

        let Json(submission) = body.map_err(|err| invalid_params(err.body_text()))?;

        let Some(_permit) = state.submissions.try_acquire(principal.user_id()) else {
            crate::metrics::observe_submission(form.id, "in_progress");
            return Err(json_error(
                StatusCode::CONFLICT,
                "ERR_SUBMISSION_IN_PROGRESS",
                "a submission from this account is already in progress".to_string(),
                true,
            ));
        };

        if let Err(errors) = form.validate(&submission) {
            crate::metrics::observe_submission(form.id, "validation_failed");
            tracing::info!(errors = errors.len(), "submission rejected by validation");
            let detail = serde_json::to_value(&errors).unwrap_or(Value::Null);
            return Err(json_error_with_detail(
                StatusCode::UNPROCESSABLE_ENTITY,
                "ERR_VALIDATION",
                format!("{} field(s) failed validation", errors.len()),
                detail,
            ));
        }

        let store = state.store.as_user(&principal.session_secret);
        let created_at = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);

        let data = stamp(form.retain_declared(&submission.data), principal.user_id(), &created_at);
        let document = store
            .create_document_with_permissions(
                form.collection_id,
                &data,
                principal.user_id(),
                PermissionOptions::default(),
            )
            .await
            .map_err(|err| {
                crate::metrics::observe_submission(form.id, "backend_error");
                store_error_response(&err)
            })?;

        let document_id = document
            .get("$id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut created_rows = BTreeMap::new();
        for subform in form.subforms {
            let Some(rows) = submission.subforms.get(subform.collection_id) else {
                continue;
            };
            let mut created = Vec::with_capacity(rows.len());
            for row in rows {
                let mut row = stamp(subform.retain_declared(row), principal.user_id(), &created_at);
                row.insert(
                    subform.parent_field.to_string(),
                    Value::String(document_id.clone()),
                );
                let doc = store
                    .create_document_with_permissions(
                        subform.collection_id,
                        &row,
                        principal.user_id(),
                        PermissionOptions::default(),
                    )
                    .await
                    .map_err(|err| {
                        crate::metrics::observe_submission(form.id, "backend_error");
                        tracing::warn!(
                            parent_id = document_id.as_str(),
                            collection = subform.collection_id,
                            error = %err,
                            "sub-form row failed after parent was created"
                        );
                        store_error_response(&err)
                    })?;
                created.push(doc);
            }
            created_rows.insert(subform.collection_id.to_string(), created);
        }

        crate::metrics::observe_submission(form.id, "created");
        tracing::info!(document_id = document_id.as_str(), "contribution created");

        Ok((
            StatusCode::CREATED,
            Json(SubmissionResponse {
                document,
                subforms: created_rows,
            }),
        ))
    })
    .await
}

/// Accepts a single `file` part holding an image.
pub(super) async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, axum::extract::multipart::MultipartRejection>,
) -> Response {
    let request_id = extract_request_id(&headers);
    let span = tracing::info_span!(
        "storage.upload",
        request_id = %request_id,
        bytes = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    instrumented("/v1/uploads", "POST", span, async move {
        let principal = extract_member(&state, &headers).await?;
        let mut multipart = multipart.map_err(|err| invalid_params(err.body_text()))?;

        let mut upload = None;
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|err| upload_error(err.status(), err.body_text()))?
        {
            if field.name() != Some("file") {
                continue;
            }
            let file_name = field.file_name().unwrap_or("upload").to_string();
            let content_type = field.content_type().map(str::to_string);
            let bytes = field
                .bytes()
                .await
                .map_err(|err| upload_error(err.status(), err.body_text()))?;
            upload = Some(Upload {
                file_name,
                content_type,
                bytes: bytes.to_vec(),
            });
            break;
        }

        let upload = upload.ok_or_else(|| invalid_params("missing file part"))?;
        check_upload(&upload, state.config.upload_max_bytes)?;
        tracing::Span::current().record("bytes", upload.bytes.len() as u64);

        let stored: UploadedFile = state
            .storage
            .as_user(&principal.session_secret)
            .upload(upload, principal.user_id())
            .await
            .map_err(|err| store_error_response(&err))?;

        Ok((StatusCode::CREATED, Json(stored)))
    })
    .await
}

pub(super) async fn update_document(
    State(state): State<AppState>,
    headers: HeaderMap,
    path: Result<Path<(String, String)>, PathRejection>,
    body: Result<Json<Map<String, Value>>, JsonRejection>,
) -> Response {
    let request_id = extract_request_id(&headers);
    let span = tracing::info_span!(
        "document.update",
        request_id = %request_id,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    instrumented("/v1/documents/{collection}/{document_id}", "PATCH", span, async move {
        let Path((collection, document_id)) = path.map_err(|err| invalid_params(err.body_text()))?;
        ensure_known_collection(&collection)?;
        let principal = extract_member(&state, &headers).await?;
        let Json(mut data) = body.map_err(|err| invalid_params(err.body_text()))?;
        data.remove(CREATED_AT_FIELD);

        let updated = state
            .store
            .as_user(&principal.session_secret)
            .update_document_owned(&collection, &document_id, &data, principal.user_id())
            .await
            .map_err(|err| store_error_response(&err))?;
        Ok(Json(updated))
    })
    .await
}

pub(super) async fn delete_document(
    State(state): State<AppState>,
    headers: HeaderMap,
    path: Result<Path<(String, String)>, PathRejection>,
) -> Response {
    let request_id = extract_request_id(&headers);
    let span = tracing::info_span!(
        "document.delete",
        request_id = %request_id,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    instrumented("/v1/documents/{collection}/{document_id}", "DELETE", span, async move {
        let Path((collection, document_id)) = path.map_err(|err| invalid_params(err.body_text()))?;
        ensure_known_collection(&collection)?;
        let principal = extract_member(&state, &headers).await?;

        state
            .store
            .as_user(&principal.session_secret)
            .delete_document_owned(&collection, &document_id, principal.user_id())
            .await
            .map_err(|err| store_error_response(&err))?;
        Ok(StatusCode::NO_CONTENT)
    })
    .await
}

fn find_form(form_id: &str) -> Result<&'static FormConfig, ApiError> {
    form_by_id(form_id).ok_or_else(|| {
        json_error(
            StatusCode::NOT_FOUND,
            "ERR_NOT_FOUND",
            format!("unknown form {}", form_id),
            false,
        )
    })
}

fn find_field(form: &'static FormConfig, name: &str) -> Option<&'static FormField> {
    form.fields
        .iter()
        .chain(form.subforms.iter().flat_map(|subform| subform.fields.iter()))
        .find(|field| field.name == name)
}

fn ensure_known_collection(collection: &str) -> Result<(), ApiError> {
    if is_known_collection(collection) {
        return Ok(());
    }
    Err(json_error(
        StatusCode::NOT_FOUND,
        "ERR_NOT_FOUND",
        format!("unknown collection {}", collection),
        false,
    ))
}

/// Adds the owner and creation time every contributed document carries.
fn stamp(mut data: Map<String, Value>, user_id: &str, created_at: &str) -> Map<String, Value> {
    data.insert(OWNER_FIELD.to_string(), Value::String(user_id.to_string()));
    data.insert(
        CREATED_AT_FIELD.to_string(),
        Value::String(created_at.to_string()),
    );
    data
}

/// Locations are referenced by INE code, everything else by `$id`.
fn relation_option(collection: &str, doc: &Map<String, Value>) -> Option<RelationOption> {
    let key = if collection == LOCATIONS { "INE_code" } else { "$id" };
    let value = doc.get(key).and_then(coerce_text)?;
    let label = doc
        .get("name")
        .and_then(coerce_text)
        .unwrap_or_else(|| value.clone());
    Some(RelationOption { value, label })
}

fn check_upload(upload: &Upload, max_bytes: usize) -> Result<(), ApiError> {
    if upload.bytes.is_empty() {
        return Err(invalid_params("file is empty"));
    }
    if upload.bytes.len() > max_bytes {
        return Err(json_error(
            StatusCode::PAYLOAD_TOO_LARGE,
            "ERR_INVALID_PARAMS",
            format!("file exceeds {} bytes", max_bytes),
            false,
        ));
    }
    let is_image = upload
        .content_type
        .as_deref()
        .is_some_and(|ct| ct.starts_with("image/"));
    if !is_image {
        return Err(invalid_params("only image uploads are accepted"));
    }
    Ok(())
}

fn upload_error(status: StatusCode, message: String) -> ApiError {
    let status = if status == StatusCode::PAYLOAD_TOO_LARGE {
        status
    } else {
        StatusCode::BAD_REQUEST
    };
    json_error(status, "ERR_INVALID_PARAMS", message, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use civica_contracts::CANDIDATES;
    use serde_json::json;

    #[test]
    fn stamp_sets_owner_and_creation_time() {
        let data = json!({"name": "Ana", "created_by": "someone-else"});
        let stamped = stamp(
            data.as_object().cloned().unwrap(),
            "user_1",
            "2026-03-01T10:00:00.000Z",
        );
        assert_eq!(stamped.get("created_by"), Some(&json!("user_1")));
        assert_eq!(stamped.get("created_at"), Some(&json!("2026-03-01T10:00:00.000Z")));
        assert_eq!(stamped.get("name"), Some(&json!("Ana")));
    }

    #[test]
    fn location_options_use_ine_code() {
        let doc = json!({"$id": "loc_1", "name": "Cercado", "INE_code": "0401"});
        let option = relation_option(LOCATIONS, doc.as_object().unwrap()).unwrap();
        assert_eq!(option.value, "0401");
        assert_eq!(option.label, "Cercado");

        let doc = json!({"$id": "cand_9"});
        let option = relation_option(CANDIDATES, doc.as_object().unwrap()).unwrap();
        assert_eq!(option.value, "cand_9");
        assert_eq!(option.label, "cand_9");
    }

    #[test]
    fn find_field_searches_subforms() {
        let surveys = form_by_id("surveys").unwrap();
        assert_eq!(
            find_field(surveys, "candidate").and_then(|f| f.relation_collection),
            Some(CANDIDATES)
        );
        assert!(find_field(surveys, "nope").is_none());
    }

    #[test]
    fn uploads_must_be_non_empty_images_within_limit() {
        let image = Upload {
            file_name: "logo.png".to_string(),
            content_type: Some("image/png".to_string()),
            bytes: vec![1, 2, 3],
        };
        assert!(check_upload(&image, 10).is_ok());
        assert_eq!(
            check_upload(&image, 2).unwrap_err().0,
            StatusCode::PAYLOAD_TOO_LARGE
        );

        let text = Upload {
            content_type: Some("text/plain".to_string()),
            ..image.clone()
        };
        assert_eq!(check_upload(&text, 10).unwrap_err().0, StatusCode::BAD_REQUEST);

        let empty = Upload {
            bytes: Vec::new(),
            ..image
        };
        assert!(check_upload(&empty, 10).is_err());
    }
}
