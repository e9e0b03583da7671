use axum::{
    extract::{Path, State, Extension},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    api::state::AppState,
    auth::Actor,
    domain::{DirectRegistrationRequest, Registration},
    error::Result,
    service::registration_service::PaymentCheckout,
};

#[derive(Debug, Serialize)]
pub struct DirectRegistrationResponse {
    registration: Registration,
    /// Also sent to the attendee; returned so the coordinator can pass it on
    payment_link: String,
}

pub async fn begin_payment(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<PaymentCheckout>> {
    let checkout = state.service_context.registration_service
        .begin_payment(&token)
        .await?;
    Ok(Json(checkout))
}

pub async fn decline(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<Registration>> {
    let registration = state.service_context.registration_service
        .decline(&token)
        .await?;
    Ok(Json(registration))
}

pub async fn list_for_workshop(
    State(state): State<AppState>,
    Path(workshop_id): Path<Uuid>,
) -> Result<Json<Vec<Registration>>> {
    let registrations = state.service_context.registration_service
        .list_for_workshop(workshop_id)
        .await?;
    Ok(Json(registrations))
}

pub async fn register_direct(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(workshop_id): Path<Uuid>,
    Json(request): Json<DirectRegistrationRequest>,
) -> Result<(StatusCode, Json<DirectRegistrationResponse>)> {
    let ctx = &state.service_context;
    let invitation = ctx.registration_service
        .register_direct(workshop_id, request, actor.id)
        .await?;

    let payment_link = ctx.invitation_service.payment_link(&invitation.payment_token);
    Ok((
        StatusCode::CREATED,
        Json(DirectRegistrationResponse {
            registration: invitation.registration,
            payment_link,
        }),
    ))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Registration>> {
    let registration = state.service_context.registration_service.get(id).await?;
    Ok(Json(registration))
}

pub async fn cancel(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<Json<Registration>> {
    let registration = state.service_context.registration_service
        .cancel_registration(id, actor.id)
        .await?;
    Ok(Json(registration))
}
