//! Pipeline saga endpoints

use stratus_core::domain::deploy::{DeployInput, DeployStatus};
use stratus_core::domain::saga::SagaInstance;
use stratus_core::dto::pipeline::{DeployDetails, StartPipeline};
use stratus_core::dto::saga::{Accepted, StatusReport};

use crate::OrchestratorClient;
use crate::error::Result;

impl OrchestratorClient {
    /// Start a pipeline saga
    ///
    /// `id` defaults to `cicd-{repository name}` on the server.
    pub async fn start_pipeline(
        &self,
        id: Option<String>,
        input: DeployInput,
    ) -> Result<SagaInstance> {
        let url = format!("{}/api/pipelines", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&StartPipeline { id, input })
            .send()
            .await?;

        self.handle_response(response).await
    }

    pub async fn pipeline_status(&self, id: &str) -> Result<DeployStatus> {
        let url = format!("{}/api/pipelines/{}/status", self.base_url, id);
        let response = self.client.get(&url).send().await?;

        let report: StatusReport<DeployStatus> = self.handle_response(response).await?;
        Ok(report.status)
    }

    /// Status plus the most recent successful deploy, if any
    pub async fn pipeline_details(&self, id: &str) -> Result<DeployDetails> {
        let url = format!("{}/api/pipelines/{}/details", self.base_url, id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Send a redeploy request to a parked or running pipeline
    ///
    /// Only delivery is acknowledged; the cycle's result shows up in
    /// [`pipeline_details`](Self::pipeline_details).
    pub async fn request_redeploy(&self, id: &str, input: DeployInput) -> Result<Accepted> {
        let url = format!("{}/api/pipelines/{}/redeploy", self.base_url, id);
        let response = self.client.post(&url).json(&input).send().await?;

        self.handle_response(response).await
    }
}
