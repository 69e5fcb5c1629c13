//! Pipeline saga DTOs

use serde::{Deserialize, Serialize};

use crate::domain::deploy::{DeployInput, DeployResult, DeployStatus};

/// Request to start a pipeline saga
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartPipeline {
    /// Instance id; defaults to `cicd-{repository name}`
    #[serde(default)]
    pub id: Option<String>,
    pub input: DeployInput,
}

/// The pipeline saga's deliverable
///
/// Deliverable fields stay absent until the first cycle succeeds and then
/// always describe the most recent successful deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployDetails {
    pub status: DeployStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthy: Option<bool>,
}

impl DeployDetails {
    pub fn new(status: DeployStatus, result: Option<&DeployResult>) -> Self {
        Self {
            status,
            application_url: result.map(|r| r.application_url.clone()),
            artifact: result.map(|r| r.artifact.clone()),
            healthy: result.map(|r| r.healthy),
        }
    }
}
