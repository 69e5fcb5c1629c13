//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod infra;
pub mod pipeline;
pub mod saga;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::runtime::Runtime;

/// Create the main API router with all endpoints
pub fn create_router(runtime: Runtime) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Provisioning endpoints
        .route("/api/infra", post(infra::start_infra))
        .route("/api/infra/{id}/status", get(infra::infra_status))
        .route("/api/infra/{id}/output", get(infra::infra_output))
        // Pipeline endpoints
        .route("/api/pipelines", post(pipeline::start_pipeline))
        .route("/api/pipelines/{id}/status", get(pipeline::pipeline_status))
        .route("/api/pipelines/{id}/details", get(pipeline::pipeline_details))
        .route(
            "/api/pipelines/{id}/redeploy",
            post(pipeline::request_redeploy),
        )
        // Instance endpoints
        .route("/api/sagas", get(saga::list_sagas))
        .route("/api/sagas/{id}", get(saga::get_saga))
        .route("/api/sagas/{id}/result", get(saga::get_result))
        .route("/api/sagas/{id}/cancel", post(saga::cancel_saga))
        // Add state and middleware
        .with_state(runtime)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use stratus_actions::simulated::{SimulatedDeploy, SimulatedInfra};
    use stratus_core::domain::saga::SagaLifecycle;
    use tower::ServiceExt;

    use crate::runtime::RedeployPolicy;
    use crate::saga::test_support::{harness, harness_with_policy};

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(json) => Body::from(json.to_string()),
                None => Body::empty(),
            })
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness(SimulatedInfra::new(), SimulatedDeploy::default());
        let app = create_router(h.runtime);

        let (status, _) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_provision_then_read_output() {
        let h = harness(SimulatedInfra::new(), SimulatedDeploy::default());
        let app = create_router(h.runtime);

        let (status, body) = send(
            &app,
            "POST",
            "/api/infra",
            Some(json!({"input": {"project_name": "test", "environment": "test"}})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["id"], "infra-test-test");
        assert_eq!(body["kind"], "infra");

        let (status, outcome) =
            send(&app, "GET", "/api/sagas/infra-test-test/result?wait=true", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["state"], "completed");

        let (_, output) = send(&app, "GET", "/api/infra/infra-test-test/output", None).await;
        assert_eq!(output["status"], "READY");
        assert_eq!(output["ready"], true);
        assert_eq!(output["vm_name"], "vm-test-test");
        assert_eq!(output["resource_group"], "rg-test-test");

        let (_, report) = send(&app, "GET", "/api/infra/infra-test-test/status", None).await;
        assert_eq!(report, json!({"id": "infra-test-test", "status": "READY"}));
    }

    #[tokio::test]
    async fn test_unknown_instance_is_404() {
        let h = harness(SimulatedInfra::new(), SimulatedDeploy::default());
        let app = create_router(h.runtime);

        let (status, body) = send(&app, "GET", "/api/pipelines/nope/details", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("nope"));

        let (status, _) = send(&app, "POST", "/api/sagas/nope/cancel", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_redeploy_is_accepted() {
        let h = harness(SimulatedInfra::new(), SimulatedDeploy::default());
        let app = create_router(h.runtime.clone());

        let (status, body) = send(
            &app,
            "POST",
            "/api/pipelines",
            Some(json!({
                "input": {
                    "repo_url": "https://github.com/example/myapp.git",
                    "target_host": "1.2.3.4"
                }
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["id"], "cicd-myapp");

        let handle = h.runtime.pipeline("cicd-myapp").await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while handle.lifecycle() != SagaLifecycle::AwaitingSignal {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let (_, details) = send(&app, "GET", "/api/pipelines/cicd-myapp/details", None).await;
        assert_eq!(details["status"], "COMPLETED");
        assert_eq!(details["application_url"], "http://1.2.3.4:8080");
        assert_eq!(details["healthy"], true);

        let (status, accepted) = send(
            &app,
            "POST",
            "/api/pipelines/cicd-myapp/redeploy",
            Some(json!({"repo_url": "https://github.com/example/myapp.git"})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(accepted["id"], "cicd-myapp");
    }

    #[tokio::test]
    async fn test_redeploy_to_infra_instance_is_404() {
        let h = harness(SimulatedInfra::new(), SimulatedDeploy::default());
        let app = create_router(h.runtime.clone());

        send(
            &app,
            "POST",
            "/api/infra",
            Some(json!({"input": {"project_name": "myapp"}})),
        )
        .await;

        let (status, _) = send(
            &app,
            "POST",
            "/api/pipelines/infra-myapp-dev/redeploy",
            Some(json!({"repo_url": "https://github.com/example/myapp.git"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_duplicate_start_and_finished_cancel_conflict() {
        let h = harness(
            SimulatedInfra::new().with_delay(Duration::from_millis(20)),
            SimulatedDeploy::default(),
        );
        let app = create_router(h.runtime.clone());
        let start = json!({"id": "infra-a", "input": {"project_name": "a"}});

        let (status, _) = send(&app, "POST", "/api/infra", Some(start.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _) = send(&app, "POST", "/api/infra", Some(start)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        send(&app, "GET", "/api/sagas/infra-a/result?wait=true", None).await;
        let (status, _) = send(&app, "POST", "/api/sagas/infra-a/cancel", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_full_queue_is_429() {
        let h = harness_with_policy(
            SimulatedInfra::new(),
            SimulatedDeploy::default().with_delay(Duration::from_millis(100)),
            RedeployPolicy::Queue { capacity: 1 },
        );
        let app = create_router(h.runtime.clone());

        send(
            &app,
            "POST",
            "/api/pipelines",
            Some(json!({
                "id": "cicd-q",
                "input": {"repo_url": "https://github.com/example/q.git", "target_host": "1.2.3.4"}
            })),
        )
        .await;

        let redeploy = json!({"repo_url": "https://github.com/example/q.git"});
        let (first, _) = send(&app, "POST", "/api/pipelines/cicd-q/redeploy", Some(redeploy.clone())).await;
        let (second, _) = send(&app, "POST", "/api/pipelines/cicd-q/redeploy", Some(redeploy)).await;

        assert_eq!(first, StatusCode::ACCEPTED);
        assert_eq!(second, StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_list_includes_started_instances() {
        let h = harness(SimulatedInfra::new(), SimulatedDeploy::default());
        let app = create_router(h.runtime.clone());

        send(&app, "POST", "/api/infra", Some(json!({"input": {"project_name": "one"}}))).await;
        send(&app, "POST", "/api/infra", Some(json!({"input": {"project_name": "two"}}))).await;

        let (status, list) = send(&app, "GET", "/api/sagas", None).await;
        assert_eq!(status, StatusCode::OK);

        let mut ids: Vec<&str> = list
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["id"].as_str().unwrap())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["infra-one-dev", "infra-two-dev"]);
    }
}
