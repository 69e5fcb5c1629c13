//! Provisioning saga DTOs

use serde::{Deserialize, Serialize};

use crate::domain::infra::{InfraInput, InfraOutput, InfraStatus};

/// Request to start a provisioning saga
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartInfra {
    /// Instance id; defaults to `infra-{project}-{environment}`
    #[serde(default)]
    pub id: Option<String>,
    pub input: InfraInput,
}

/// The provisioning saga's deliverable as seen by other teams
///
/// Only `status` and `ready` are present until the saga reaches `READY`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfraDetails {
    pub status: InfraStatus,
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_public_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_group: Option<String>,
}

impl InfraDetails {
    pub fn new(status: InfraStatus, output: Option<&InfraOutput>) -> Self {
        Self {
            status,
            ready: status == InfraStatus::Ready,
            vm_public_ip: output.map(|o| o.vm_public_ip.clone()),
            vm_name: output.map(|o| o.vm_name.clone()),
            admin_username: output.map(|o| o.admin_username.clone()),
            resource_group: output.map(|o| o.resource_group_name.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_ready_shape_has_no_vm_fields() {
        let details = InfraDetails::new(InfraStatus::Planning, None);
        let json = serde_json::to_value(&details).unwrap();

        assert_eq!(json, serde_json::json!({"status": "PLANNING", "ready": false}));
    }

    #[test]
    fn test_ready_only_when_status_ready() {
        let output = InfraOutput {
            resource_group_name: "rg-a-dev".to_string(),
            vnet_name: "vnet-a-dev".to_string(),
            nsg_name: "nsg-a-dev".to_string(),
            vm_name: "vm-a-dev".to_string(),
            vm_public_ip: "20.0.0.1".to_string(),
            vm_private_ip: "10.0.1.4".to_string(),
            admin_username: "azureadmin".to_string(),
        };

        let ready = InfraDetails::new(InfraStatus::Ready, Some(&output));
        assert!(ready.ready);
        assert_eq!(ready.resource_group.as_deref(), Some("rg-a-dev"));

        let failed = InfraDetails::new(InfraStatus::Failed, Some(&output));
        assert!(!failed.ready);
    }
}
