//! Status check and consult request endpoints. Plain create/list over the
//! SQLite record store.

use crate::{
    errors::AppError,
    models::{
        consult::{ConsultRequest, NewConsultRequest},
        status::{NewStatusCheck, StatusCheck},
    },
    state::AppState,
};
use axum::{Json, extract::State};

/// `POST /api/status`
pub async fn create_status_check(
    State(state): State<AppState>,
    Json(req): Json<NewStatusCheck>,
) -> Result<Json<StatusCheck>, AppError> {
    let check = state.records.create_status_check(req.client_name).await?;
    Ok(Json(check))
}

/// `GET /api/status`
pub async fn list_status_checks(
    State(state): State<AppState>,
) -> Result<Json<Vec<StatusCheck>>, AppError> {
    Ok(Json(state.records.list_status_checks().await?))
}

/// `POST /api/consult-requests`
pub async fn create_consult_request(
    State(state): State<AppState>,
    Json(req): Json<NewConsultRequest>,
) -> Result<Json<ConsultRequest>, AppError> {
    let record = state.records.create_consult_request(req).await?;
    Ok(Json(record))
}

/// `GET /api/consult-requests` — newest first.
pub async fn list_consult_requests(
    State(state): State<AppState>,
) -> Result<Json<Vec<ConsultRequest>>, AppError> {
    Ok(Json(state.records.list_consult_requests().await?))
}
