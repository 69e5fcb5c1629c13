//! Kind-agnostic instance endpoints

use stratus_core::domain::saga::SagaInstance;
use stratus_core::dto::saga::{Accepted, SagaOutcome};

use crate::OrchestratorClient;
use crate::error::Result;

impl OrchestratorClient {
    /// List every known instance, most recently started first
    pub async fn list_sagas(&self) -> Result<Vec<SagaInstance>> {
        let url = format!("{}/api/sagas", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    pub async fn get_saga(&self, id: &str) -> Result<SagaInstance> {
        let url = format!("{}/api/sagas/{}", self.base_url, id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Final result of an instance
    ///
    /// With `wait` the request is held until the instance finishes; otherwise
    /// an active instance answers [`SagaOutcome::Pending`].
    pub async fn saga_result(&self, id: &str, wait: bool) -> Result<SagaOutcome> {
        let url = format!("{}/api/sagas/{}/result", self.base_url, id);
        let response = self
            .client
            .get(&url)
            .query(&[("wait", wait)])
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Ask an active instance to stop; compensation still runs
    pub async fn cancel_saga(&self, id: &str) -> Result<Accepted> {
        let url = format!("{}/api/sagas/{}/cancel", self.base_url, id);
        let response = self.client.post(&url).send().await?;

        self.handle_response(response).await
    }
}
