use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::{
    api::state::AppState,
    auth::Actor,
    error::{AppError, Result},
};

/// Header carrying the coordinator's own id, recorded on refunds and logs.
pub const ACTOR_HEADER: &str = "x-actor-id";

/// Guards admin routes with the coordinator bearer token.
///
/// On success an `Actor` is added to the request extensions. A malformed
/// `X-Actor-Id` is rejected rather than silently dropped.
pub async fn require_coordinator(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)?;

    if !state.coordinator_auth.verify(token.trim()) {
        tracing::warn!("Rejected admin request to {} with a bad token", request.uri().path());
        return Err(AppError::Unauthorized);
    }

    let actor_id = match request.headers().get(ACTOR_HEADER) {
        Some(value) => {
            let raw = value
                .to_str()
                .map_err(|_| AppError::BadRequest("Invalid X-Actor-Id header".to_string()))?;
            Some(
                Uuid::parse_str(raw.trim())
                    .map_err(|_| AppError::BadRequest("X-Actor-Id must be a UUID".to_string()))?,
            )
        }
        None => None,
    };

    request.extensions_mut().insert(Actor { id: actor_id });
    Ok(next.run(request).await)
}
