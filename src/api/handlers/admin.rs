use axum::{
    extract::{Path, State},
    Json,
};

use crate::{
    api::state::AppState,
    error::{AppError, Result},
    jobs::{self, JobName, JobRun},
};

pub async fn list_jobs() -> Json<Vec<&'static str>> {
    Json(JobName::ALL.iter().map(|job| job.as_str()).collect())
}

/// Runs a periodic job immediately, outside its schedule.
pub async fn run_job(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<JobRun>> {
    let job = JobName::from_str(&name)
        .ok_or_else(|| AppError::NotFound(format!("Unknown job: {}", name)))?;

    tracing::info!("Running job {} on demand", job);
    let run = jobs::run_job(&state.service_context, job).await?;
    Ok(Json(run))
}
