use axum::{
    extract::{Path, Query, State, Extension},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    api::state::AppState,
    auth::Actor,
    domain::{CreateWorkshopRequest, UpdateWorkshopRequest, Workshop, WorkshopStatus},
    error::{AppError, Result},
    service::{
        invitation_service::Invitation,
        workshop_service::{CancelOutcome, FinishOutcome, PublishOutcome},
    },
};

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    workshops: Vec<Workshop>,
    total: usize,
}

/// What anyone may see about a published workshop.
#[derive(Debug, Serialize)]
pub struct PublicWorkshop {
    id: Uuid,
    title: String,
    description: String,
    location: Option<String>,
    starts_at: String,
    ends_at: String,
    capacity: i64,
    seats_left: i64,
    price_cents: i64,
    currency: String,
}

impl PublicWorkshop {
    fn new(workshop: Workshop, seats_left: i64) -> Self {
        Self {
            id: workshop.id,
            title: workshop.title,
            description: workshop.description,
            location: workshop.location,
            starts_at: workshop.starts_at.to_rfc3339(),
            ends_at: workshop.ends_at.to_rfc3339(),
            capacity: workshop.capacity,
            seats_left,
            price_cents: workshop.price_cents,
            currency: workshop.currency,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct FinishParams {
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Deserialize)]
pub struct RaiseCapacityRequest {
    capacity: i64,
    batch_size: Option<i64>,
}

pub async fn list_public(State(state): State<AppState>) -> Result<Json<Vec<PublicWorkshop>>> {
    let service = &state.service_context.workshop_service;
    let workshops = service.list_by_status(WorkshopStatus::Published).await?;

    let mut public = Vec::with_capacity(workshops.len());
    for workshop in workshops {
        let (_, seats_left) = service.occupancy(workshop.id).await?;
        public.push(PublicWorkshop::new(workshop, seats_left));
    }

    Ok(Json(public))
}

pub async fn get_public(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PublicWorkshop>> {
    let service = &state.service_context.workshop_service;
    let workshop = service.get(id).await?;
    if workshop.status != WorkshopStatus::Published {
        return Err(AppError::NotFound("Workshop not found".to_string()));
    }

    let (_, seats_left) = service.occupancy(id).await?;
    Ok(Json(PublicWorkshop::new(workshop, seats_left)))
}

pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListResponse>> {
    let workshops = state.service_context.workshop_service
        .list(params.limit, params.offset)
        .await?;

    let total = workshops.len();
    Ok(Json(ListResponse { workshops, total }))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Workshop>> {
    let workshop = state.service_context.workshop_service.get(id).await?;
    Ok(Json(workshop))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<CreateWorkshopRequest>,
) -> Result<(StatusCode, Json<Workshop>)> {
    let workshop = state.service_context.workshop_service
        .create(request, actor.id)
        .await?;

    Ok((StatusCode::CREATED, Json(workshop)))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateWorkshopRequest>,
) -> Result<Json<Workshop>> {
    let workshop = state.service_context.workshop_service.update(id, request).await?;
    Ok(Json(workshop))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    state.service_context.workshop_service.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn publish(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PublishOutcome>> {
    let outcome = state.service_context.workshop_service.publish(id).await?;
    Ok(Json(outcome))
}

pub async fn cancel(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<Json<CancelOutcome>> {
    let outcome = state.service_context.workshop_service.cancel(id, actor.id).await?;
    Ok(Json(outcome))
}

pub async fn finish(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<FinishParams>,
) -> Result<Json<FinishOutcome>> {
    let outcome = state.service_context.workshop_service.finish(id, params.force).await?;
    Ok(Json(outcome))
}

pub async fn raise_capacity(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<RaiseCapacityRequest>,
) -> Result<Json<Workshop>> {
    let workshop = state.service_context.workshop_service
        .raise_capacity(id, request.capacity, request.batch_size)
        .await?;
    Ok(Json(workshop))
}

pub async fn top_up(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Invitation>>> {
    let invitations = state.service_context.invitation_service.top_up(id).await?;
    Ok(Json(invitations))
}
