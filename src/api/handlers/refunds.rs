use axum::{
    extract::{Path, Query, State, Extension},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    api::state::AppState,
    auth::Actor,
    domain::{Refund, RefundRequest, RefundStatus},
    error::{AppError, Result},
};

#[derive(Debug, Deserialize)]
pub struct ListParams {
    status: Option<String>,
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Serialize)]
pub struct EligibilityResponse {
    eligible: bool,
    reason: Option<String>,
}

pub async fn request(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(registration_id): Path<Uuid>,
    Json(request): Json<RefundRequest>,
) -> Result<Json<Refund>> {
    let refund = state.service_context.refund_service
        .request_refund(registration_id, request, actor.id)
        .await?;
    Ok(Json(refund))
}

pub async fn eligibility(
    State(state): State<AppState>,
    Path(registration_id): Path<Uuid>,
) -> Result<Json<EligibilityResponse>> {
    let response = match state.service_context.refund_service.check_eligibility(registration_id).await {
        Ok(()) => EligibilityResponse { eligible: true, reason: None },
        Err(e @ (AppError::NotEligible(_) | AppError::Conflict(_))) => EligibilityResponse {
            eligible: false,
            reason: Some(e.to_string()),
        },
        Err(e) => return Err(e),
    };
    Ok(Json(response))
}

pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Refund>>> {
    let service = &state.service_context.refund_service;
    let refunds = match params.status.as_deref() {
        Some(raw) => {
            let status = RefundStatus::from_str(raw)
                .ok_or_else(|| AppError::BadRequest(format!("Unknown refund status: {}", raw)))?;
            service.list_by_status(status).await?
        }
        None => service.list(params.limit, params.offset).await?,
    };
    Ok(Json(refunds))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Refund>> {
    let refund = state.service_context.refund_service.get(id).await?;
    Ok(Json(refund))
}

pub async fn retry(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<Json<Refund>> {
    let refund = state.service_context.refund_service.retry(id, actor.id).await?;
    Ok(Json(refund))
}

pub async fn cancel(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<Json<Refund>> {
    let refund = state.service_context.refund_service.cancel(id, actor.id).await?;
    Ok(Json(refund))
}
