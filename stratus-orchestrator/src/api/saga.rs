//! Saga instance API Handlers
//!
//! Kind-agnostic endpoints: listing, snapshots, results and cancellation.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use stratus_core::domain::saga::SagaInstance;
use stratus_core::dto::saga::{Accepted, SagaOutcome};

use crate::api::error::ApiResult;
use crate::runtime::Runtime;

/// GET /api/sagas
pub async fn list_sagas(State(runtime): State<Runtime>) -> ApiResult<Json<Vec<SagaInstance>>> {
    tracing::debug!("Listing saga instances");
    Ok(Json(runtime.list().await?))
}

/// GET /api/sagas/{id}
pub async fn get_saga(
    State(runtime): State<Runtime>,
    Path(id): Path<String>,
) -> ApiResult<Json<SagaInstance>> {
    Ok(Json(runtime.instance(&id).await?))
}

#[derive(Debug, Deserialize)]
pub struct ResultQuery {
    /// Block until the instance finishes
    #[serde(default)]
    pub wait: bool,
}

/// GET /api/sagas/{id}/result
///
/// Query parameters:
/// - `wait` (optional): hold the request until the instance finishes
pub async fn get_result(
    State(runtime): State<Runtime>,
    Path(id): Path<String>,
    Query(params): Query<ResultQuery>,
) -> ApiResult<Json<SagaOutcome>> {
    let outcome = if params.wait {
        runtime.wait_outcome(&id).await?
    } else {
        runtime.outcome(&id).await?
    };

    Ok(Json(outcome))
}

/// POST /api/sagas/{id}/cancel
pub async fn cancel_saga(
    State(runtime): State<Runtime>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<Accepted>)> {
    tracing::info!("Cancelling saga {}", id);

    let accepted = runtime.cancel(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}
