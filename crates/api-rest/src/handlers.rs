//! Route handlers.
//!
//! Stateless routes (`/health`, `/datasets`, `/search`) go straight to the [`MergeService`].
//! Everything under `/merge/sessions` works on one [`MergeSession`] held in the registry.
//!
//! [`MergeService`]: dinkes_core::MergeService
//! [`MergeSession`]: dinkes_core::MergeSession

use crate::error::ApiError;
use crate::AppState;
use api_shared::{
    search_hits, CreateSessionRes, DatasetRes, ErrorRes, HealthRes, HealthService, ListDatasetsRes,
    SearchHitDto, SearchReq, SessionRes,
};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use dinkes_core::ShardableUuid;

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn health(State(_state): State<AppState>) -> Json<HealthRes> {
    Json(HealthService::check_health())
}

#[utoipa::path(
    get,
    path = "/datasets",
    responses(
        (status = 200, description = "Configured section datasets", body = ListDatasetsRes),
        (status = 401, description = "Missing or invalid API key", body = ErrorRes)
    )
)]
/// Lists every configured dataset, in catalogue order.
#[axum::debug_handler]
pub(crate) async fn list_datasets(State(state): State<AppState>) -> Json<ListDatasetsRes> {
    let datasets = state
        .service
        .datasets()
        .into_iter()
        .map(DatasetRes::from)
        .collect();
    Json(ListDatasetsRes { datasets })
}

#[utoipa::path(
    post,
    path = "/search",
    request_body = SearchReq,
    responses(
        (status = 200, description = "One entry per dataset that holds the NIK", body = [SearchHitDto]),
        (status = 400, description = "Blank NIK, no datasets, or unknown dataset", body = ErrorRes),
        (status = 503, description = "No selected dataset could be read", body = ErrorRes)
    )
)]
/// Stateless search across the selected datasets, without merging.
///
/// Datasets that fail are logged and left out as long as at least one lookup succeeds.
#[axum::debug_handler]
pub(crate) async fn search(
    State(state): State<AppState>,
    Json(req): Json<SearchReq>,
) -> Result<Json<Vec<SearchHitDto>>, ApiError> {
    let query = req.to_query()?;
    let collection = state.service.search(&query).await?;
    for failure in &collection.failures {
        tracing::warn!(
            "dataset {} skipped during search: {}",
            failure.dataset_id,
            failure.reason
        );
    }
    Ok(Json(search_hits(&collection)))
}

#[utoipa::path(
    post,
    path = "/merge/sessions",
    responses(
        (status = 201, description = "Session created", body = CreateSessionRes),
        (status = 500, description = "Internal server error", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn create_session(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<CreateSessionRes>), ApiError> {
    let (id, phase) = state.sessions.create(&state.service)?;
    tracing::info!("created merge session {}", id);
    Ok((
        StatusCode::CREATED,
        Json(CreateSessionRes {
            session_id: id.to_string(),
            phase: phase.as_str().to_string(),
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/merge/sessions/{id}",
    params(("id" = String, Path, description = "Session id (32 lowercase hex characters)")),
    responses(
        (status = 200, description = "Current session state", body = SessionRes),
        (status = 400, description = "Malformed session id", body = ErrorRes),
        (status = 404, description = "Unknown session", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionRes>, ApiError> {
    let id = parse_session_id(&id)?;
    let session = state.sessions.get(&id)?;
    let session = session.lock().await;
    Ok(Json(SessionRes::from_session(&id, &session)))
}

#[utoipa::path(
    post,
    path = "/merge/sessions/{id}/search",
    request_body = SearchReq,
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "State after the search (notFound, proposed, or failed)", body = SessionRes),
        (status = 400, description = "Invalid query or unknown dataset", body = ErrorRes),
        (status = 404, description = "Unknown session", body = ErrorRes),
        (status = 409, description = "Session is failed and must be retried first", body = ErrorRes)
    )
)]
/// Runs a search in the session and reconciles any matches into a proposal.
///
/// Searches that fail after starting are reported through the returned state (`failed` with
/// an `error`), not through an error status.
#[axum::debug_handler]
pub(crate) async fn session_search(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SearchReq>,
) -> Result<Json<SessionRes>, ApiError> {
    let id = parse_session_id(&id)?;
    let query = req.to_query()?;
    let session = state.sessions.get(&id)?;
    let mut session = session.lock().await;
    session.search(query).await?;
    Ok(Json(SessionRes::from_session(&id, &session)))
}

#[utoipa::path(
    post,
    path = "/merge/sessions/{id}/confirm",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "Merged record stored", body = SessionRes),
        (status = 404, description = "Unknown session", body = ErrorRes),
        (status = 409, description = "No proposal to confirm", body = ErrorRes),
        (status = 500, description = "Merged record could not be stored; proposal kept", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn session_confirm(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionRes>, ApiError> {
    let id = parse_session_id(&id)?;
    let session = state.sessions.get(&id)?;
    let mut session = session.lock().await;
    session.confirm().await?;
    Ok(Json(SessionRes::from_session(&id, &session)))
}

#[utoipa::path(
    post,
    path = "/merge/sessions/{id}/retry",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session back to idle", body = SessionRes),
        (status = 404, description = "Unknown session", body = ErrorRes),
        (status = 409, description = "Session is not failed", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn session_retry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionRes>, ApiError> {
    let id = parse_session_id(&id)?;
    let session = state.sessions.get(&id)?;
    let mut session = session.lock().await;
    session.retry()?;
    Ok(Json(SessionRes::from_session(&id, &session)))
}

#[utoipa::path(
    delete,
    path = "/merge/sessions/{id}",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 204, description = "Session discarded"),
        (status = 404, description = "Unknown session", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_session_id(&id)?;
    state.sessions.remove(&id)?;
    tracing::info!("discarded merge session {}", id);
    Ok(StatusCode::NO_CONTENT)
}

fn parse_session_id(raw: &str) -> Result<ShardableUuid, ApiError> {
    ShardableUuid::parse(raw).map_err(|e| ApiError::BadRequest(e.to_string()))
}

