use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    api::state::AppState,
    domain::{JoinWaitlistRequest, PublicWaitlistRequest, WaitlistEntry},
    error::Result,
};

#[derive(Debug, Deserialize)]
pub struct PriorityRequest {
    priority: i64,
}

pub async fn join(
    State(state): State<AppState>,
    Json(request): Json<JoinWaitlistRequest>,
) -> Result<(StatusCode, Json<WaitlistEntry>)> {
    let entry = state.service_context.waitlist_service.join(request).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// Self-service signup, always at the default priority.
pub async fn join_public(
    State(state): State<AppState>,
    Json(request): Json<PublicWaitlistRequest>,
) -> Result<(StatusCode, Json<WaitlistEntry>)> {
    let entry = state.service_context.waitlist_service.join(request.into()).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<WaitlistEntry>>> {
    let entries = state.service_context.waitlist_service.list().await?;
    Ok(Json(entries))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<WaitlistEntry>> {
    let entry = state.service_context.waitlist_service.get(id).await?;
    Ok(Json(entry))
}

pub async fn set_priority(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<PriorityRequest>,
) -> Result<Json<WaitlistEntry>> {
    let entry = state.service_context.waitlist_service
        .set_priority(id, request.priority)
        .await?;
    Ok(Json(entry))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    state.service_context.waitlist_service.remove(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
