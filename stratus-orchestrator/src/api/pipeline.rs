//! Pipeline API Handlers

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use stratus_core::domain::deploy::{DeployInput, DeployStatus};
use stratus_core::domain::saga::SagaInstance;
use stratus_core::dto::pipeline::{DeployDetails, StartPipeline};
use stratus_core::dto::saga::{Accepted, StatusReport};

use crate::api::error::ApiResult;
use crate::runtime::Runtime;

/// POST /api/pipelines
/// Start a pipeline saga
pub async fn start_pipeline(
    State(runtime): State<Runtime>,
    Json(req): Json<StartPipeline>,
) -> ApiResult<(StatusCode, Json<SagaInstance>)> {
    tracing::info!(
        "Starting pipeline for {} ({})",
        req.input.repo_url,
        req.input.branch
    );

    let instance = runtime.start_pipeline(req.id, req.input).await?;
    Ok((StatusCode::CREATED, Json(instance)))
}

/// GET /api/pipelines/{id}/status
pub async fn pipeline_status(
    State(runtime): State<Runtime>,
    Path(id): Path<String>,
) -> ApiResult<Json<StatusReport<DeployStatus>>> {
    let details = runtime.pipeline_details(&id).await?;
    Ok(Json(StatusReport {
        id,
        status: details.status,
    }))
}

/// GET /api/pipelines/{id}/details
pub async fn pipeline_details(
    State(runtime): State<Runtime>,
    Path(id): Path<String>,
) -> ApiResult<Json<DeployDetails>> {
    tracing::debug!("Getting pipeline details: {}", id);
    Ok(Json(runtime.pipeline_details(&id).await?))
}

/// POST /api/pipelines/{id}/redeploy
/// Deliver a redeploy request; only delivery is acknowledged
pub async fn request_redeploy(
    State(runtime): State<Runtime>,
    Path(id): Path<String>,
    Json(input): Json<DeployInput>,
) -> ApiResult<(StatusCode, Json<Accepted>)> {
    tracing::info!("Redeploy requested for {} ({})", id, input.branch);

    let accepted = runtime.request_redeploy(&id, input).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}
