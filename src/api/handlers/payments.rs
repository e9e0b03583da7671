use axum::{
    extract::State,
    http::HeaderMap,
    Json,
};
use serde_json::{json, Value};

use crate::{
    api::state::AppState,
    error::{AppError, Result},
    service::payment_callbacks::CallbackDisposition,
};

const SIGNATURE_HEADER: &str = "stripe-signature";

/// Processor webhook. Duplicates and unrelated event types still get a 200
/// so the processor stops redelivering them.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::BadRequest("Missing webhook signature".to_string()))?;

    let disposition = state.service_context.payment_callbacks
        .handle_webhook(&body, signature)
        .await?;

    let label = match disposition {
        CallbackDisposition::Applied => "applied",
        CallbackDisposition::Duplicate => "duplicate",
        CallbackDisposition::Ignored => "ignored",
    };
    Ok(Json(json!({ "received": true, "disposition": label })))
}
