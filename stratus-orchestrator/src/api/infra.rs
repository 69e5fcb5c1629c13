//! Provisioning API Handlers

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use stratus_core::domain::infra::InfraStatus;
use stratus_core::domain::saga::SagaInstance;
use stratus_core::dto::infra::{InfraDetails, StartInfra};
use stratus_core::dto::saga::StatusReport;

use crate::api::error::ApiResult;
use crate::runtime::Runtime;

/// POST /api/infra
/// Start a provisioning saga
pub async fn start_infra(
    State(runtime): State<Runtime>,
    Json(req): Json<StartInfra>,
) -> ApiResult<(StatusCode, Json<SagaInstance>)> {
    tracing::info!(
        "Starting provisioning for {} ({})",
        req.input.project_name,
        req.input.environment
    );

    let instance = runtime.start_infra(req.id, req.input).await?;
    Ok((StatusCode::CREATED, Json(instance)))
}

/// GET /api/infra/{id}/status
pub async fn infra_status(
    State(runtime): State<Runtime>,
    Path(id): Path<String>,
) -> ApiResult<Json<StatusReport<InfraStatus>>> {
    let details = runtime.infra_details(&id).await?;
    Ok(Json(StatusReport {
        id,
        status: details.status,
    }))
}

/// GET /api/infra/{id}/output
/// The provisioning deliverable; VM fields only once READY
pub async fn infra_output(
    State(runtime): State<Runtime>,
    Path(id): Path<String>,
) -> ApiResult<Json<InfraDetails>> {
    tracing::debug!("Getting infra output: {}", id);
    Ok(Json(runtime.infra_details(&id).await?))
}
