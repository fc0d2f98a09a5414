use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use super::domain::{
    ActivityDetail, AdvisoryId, AmendmentId, AmendmentRequest, ConditionId, LicenceId,
    NewAmendment, NewReturn, ReturnId, ReturnRequest,
};
use super::repository::{LicenceStore, RepositoryError};
use super::service::{LicensingService, WorkflowError};
use super::species::Species;
use crate::notifications::NotificationDispatcher;

/// Router builder exposing amendment, return and catalogue endpoints.
pub fn licensing_router<S, D>(service: Arc<LicensingService<S, D>>) -> Router
where
    S: LicenceStore + 'static,
    D: NotificationDispatcher + 'static,
{
    Router::new()
        .route(
            "/api/v1/licences/:licence_id/amendments",
            post(create_amendment_handler::<S, D>).get(list_amendments_handler::<S, D>),
        )
        .route(
            "/api/v1/amendments/:amendment_id",
            get(amendment_handler::<S, D>).delete(delete_amendment_handler::<S, D>),
        )
        .route(
            "/api/v1/licences/:licence_id/returns",
            post(create_return_handler::<S, D>).get(list_returns_handler::<S, D>),
        )
        .route("/api/v1/returns/:return_id", get(return_handler::<S, D>))
        .route(
            "/api/v1/licences/:licence_id/notes",
            get(notes_handler::<S, D>),
        )
        .route("/api/v1/conditions", get(conditions_handler::<S, D>))
        .route("/api/v1/advisories", get(advisories_handler::<S, D>))
        .with_state(service)
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ReadOptions {
    #[serde(default)]
    include_deleted: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AmendmentFields {
    amend_reason: String,
    amended_by: String,
    #[serde(default)]
    assessment: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AmendmentPayload {
    amendment: AmendmentFields,
    #[serde(default)]
    activities: BTreeMap<Species, ActivityDetail>,
    #[serde(default)]
    optional_conditions: Vec<ConditionId>,
    #[serde(default)]
    optional_advisories: Vec<AdvisoryId>,
}

impl AmendmentPayload {
    fn into_request(self, licence_id: LicenceId) -> AmendmentRequest {
        AmendmentRequest {
            amendment: NewAmendment {
                licence_id,
                amend_reason: self.amendment.amend_reason,
                amended_by: self.amendment.amended_by,
                assessment: self.amendment.assessment,
            },
            activities: self.activities,
            optional_conditions: self.optional_conditions,
            optional_advisories: self.optional_advisories,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReturnFields {
    #[serde(default)]
    confirm_declaration: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReturnPayload {
    #[serde(rename = "return")]
    return_fields: ReturnFields,
    #[serde(default)]
    activities: BTreeMap<Species, ActivityDetail>,
}

impl ReturnPayload {
    fn into_request(self, licence_id: LicenceId) -> ReturnRequest {
        ReturnRequest {
            return_record: NewReturn {
                licence_id,
                confirm_declaration: self.return_fields.confirm_declaration,
            },
            activities: self.activities,
        }
    }
}

fn error_response(error: WorkflowError) -> Response {
    let status = match &error {
        WorkflowError::AmendmentNotFound { .. } | WorkflowError::ReturnNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        WorkflowError::Repository(RepositoryError::MissingReference { .. }) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        WorkflowError::Repository(RepositoryError::Conflict) => StatusCode::CONFLICT,
        WorkflowError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let payload = json!({
        "error": error.to_string(),
    });
    (status, Json(payload)).into_response()
}

pub(crate) async fn create_amendment_handler<S, D>(
    State(service): State<Arc<LicensingService<S, D>>>,
    Path(licence_id): Path<i64>,
    Json(payload): Json<AmendmentPayload>,
) -> Response
where
    S: LicenceStore + 'static,
    D: NotificationDispatcher + 'static,
{
    let request = payload.into_request(LicenceId(licence_id));
    match service.create_amendment(request).await {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn list_amendments_handler<S, D>(
    State(service): State<Arc<LicensingService<S, D>>>,
    Path(licence_id): Path<i64>,
    Query(options): Query<ReadOptions>,
) -> Response
where
    S: LicenceStore + 'static,
    D: NotificationDispatcher + 'static,
{
    match service
        .licence_amendments(LicenceId(licence_id), options.include_deleted)
        .await
    {
        Ok(records) => (StatusCode::OK, Json(records)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn amendment_handler<S, D>(
    State(service): State<Arc<LicensingService<S, D>>>,
    Path(amendment_id): Path<i64>,
    Query(options): Query<ReadOptions>,
) -> Response
where
    S: LicenceStore + 'static,
    D: NotificationDispatcher + 'static,
{
    match service
        .amendment(AmendmentId(amendment_id), options.include_deleted)
        .await
    {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn delete_amendment_handler<S, D>(
    State(service): State<Arc<LicensingService<S, D>>>,
    Path(amendment_id): Path<i64>,
) -> Response
where
    S: LicenceStore + 'static,
    D: NotificationDispatcher + 'static,
{
    match service.delete_amendment(AmendmentId(amendment_id)).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn create_return_handler<S, D>(
    State(service): State<Arc<LicensingService<S, D>>>,
    Path(licence_id): Path<i64>,
    Json(payload): Json<ReturnPayload>,
) -> Response
where
    S: LicenceStore + 'static,
    D: NotificationDispatcher + 'static,
{
    let request = payload.into_request(LicenceId(licence_id));
    match service.create_return(request).await {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn list_returns_handler<S, D>(
    State(service): State<Arc<LicensingService<S, D>>>,
    Path(licence_id): Path<i64>,
) -> Response
where
    S: LicenceStore + 'static,
    D: NotificationDispatcher + 'static,
{
    match service.licence_returns(LicenceId(licence_id)).await {
        Ok(records) => (StatusCode::OK, Json(records)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn return_handler<S, D>(
    State(service): State<Arc<LicensingService<S, D>>>,
    Path(return_id): Path<i64>,
) -> Response
where
    S: LicenceStore + 'static,
    D: NotificationDispatcher + 'static,
{
    match service.return_record(ReturnId(return_id)).await {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn notes_handler<S, D>(
    State(service): State<Arc<LicensingService<S, D>>>,
    Path(licence_id): Path<i64>,
) -> Response
where
    S: LicenceStore + 'static,
    D: NotificationDispatcher + 'static,
{
    match service.notes(LicenceId(licence_id)).await {
        Ok(notes) => (StatusCode::OK, Json(notes)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn conditions_handler<S, D>(
    State(service): State<Arc<LicensingService<S, D>>>,
) -> Response
where
    S: LicenceStore + 'static,
    D: NotificationDispatcher + 'static,
{
    match service.conditions().await {
        Ok(conditions) => (StatusCode::OK, Json(conditions)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn advisories_handler<S, D>(
    State(service): State<Arc<LicensingService<S, D>>>,
) -> Response
where
    S: LicenceStore + 'static,
    D: NotificationDispatcher + 'static,
{
    match service.advisories().await {
        Ok(advisories) => (StatusCode::OK, Json(advisories)).into_response(),
        Err(error) => error_response(error),
    }
}
