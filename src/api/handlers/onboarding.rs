use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    api::state::AppState,
    domain::{OnboardingSubmission, Registration},
    error::Result,
    service::onboarding_service::RosterEntry,
};

#[derive(Debug, Deserialize)]
pub struct CheckInRequest {
    registration_id: Uuid,
    /// Filled in at the door when the attendee skipped the onboarding link
    onboarding: Option<OnboardingSubmission>,
}

pub async fn submit(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(submission): Json<OnboardingSubmission>,
) -> Result<Json<Registration>> {
    let registration = state.service_context.onboarding_service
        .submit(&token, submission)
        .await?;
    Ok(Json(registration))
}

pub async fn roster(
    State(state): State<AppState>,
    Path(workshop_id): Path<Uuid>,
) -> Result<Json<Vec<RosterEntry>>> {
    let roster = state.service_context.onboarding_service.roster(workshop_id).await?;
    Ok(Json(roster))
}

pub async fn check_in(
    State(state): State<AppState>,
    Path(workshop_id): Path<Uuid>,
    Json(request): Json<CheckInRequest>,
) -> Result<Json<Registration>> {
    let registration = state.service_context.onboarding_service
        .check_in(workshop_id, request.registration_id, request.onboarding)
        .await?;
    Ok(Json(registration))
}
