//! Provisioning saga endpoints

use stratus_core::domain::infra::{InfraInput, InfraStatus};
use stratus_core::domain::saga::SagaInstance;
use stratus_core::dto::infra::{InfraDetails, StartInfra};
use stratus_core::dto::saga::StatusReport;

use crate::OrchestratorClient;
use crate::error::Result;

impl OrchestratorClient {
    /// Start a provisioning saga
    ///
    /// `id` defaults to `infra-{project}-{environment}` on the server.
    pub async fn start_infra(&self, id: Option<String>, input: InfraInput) -> Result<SagaInstance> {
        let url = format!("{}/api/infra", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&StartInfra { id, input })
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Current provisioning status
    pub async fn infra_status(&self, id: &str) -> Result<InfraStatus> {
        let url = format!("{}/api/infra/{}/status", self.base_url, id);
        let response = self.client.get(&url).send().await?;

        let report: StatusReport<InfraStatus> = self.handle_response(response).await?;
        Ok(report.status)
    }

    /// Provisioning deliverable; VM fields are only set once the saga is READY
    pub async fn infra_output(&self, id: &str) -> Result<InfraDetails> {
        let url = format!("{}/api/infra/{}/output", self.base_url, id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }
}
