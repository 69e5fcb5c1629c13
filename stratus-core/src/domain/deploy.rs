//! Build, test and deploy pipeline domain types

use serde::{Deserialize, Serialize};

use crate::domain::infra::default_admin_username;
use crate::error::IllegalTransition;

/// Parameters of one pipeline cycle
///
/// `target_host` and `admin_username` either come straight from the caller or
/// are copied from the provisioning saga's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployInput {
    pub repo_url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub commit_sha: Option<String>,
    #[serde(default = "default_build_command")]
    pub build_command: String,
    #[serde(default = "default_test_command")]
    pub test_command: String,
    #[serde(default)]
    pub target_host: Option<String>,
    #[serde(default = "default_admin_username")]
    pub admin_username: String,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_build_command() -> String {
    "make build".to_string()
}

fn default_test_command() -> String {
    "make test".to_string()
}

impl DeployInput {
    pub fn new(repo_url: impl Into<String>) -> Self {
        Self {
            repo_url: repo_url.into(),
            branch: default_branch(),
            commit_sha: None,
            build_command: default_build_command(),
            test_command: default_test_command(),
            target_host: None,
            admin_username: default_admin_username(),
        }
    }

    pub fn with_target_host(mut self, host: impl Into<String>) -> Self {
        self.target_host = Some(host.into());
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    pub fn with_commit(mut self, sha: impl Into<String>) -> Self {
        self.commit_sha = Some(sha.into());
        self
    }

    /// The deploy target, ignoring blank values
    pub fn target(&self) -> Option<&str> {
        self.target_host
            .as_deref()
            .map(str::trim)
            .filter(|host| !host.is_empty())
    }

    /// Copies host and admin account from `original` when this request names no host
    pub fn inherit_target(mut self, original: &DeployInput) -> Self {
        if self.target().is_none() {
            self.target_host = original.target_host.clone();
            self.admin_username = original.admin_username.clone();
        }
        self
    }

    /// Instance id used when the caller does not pick one, e.g. `cicd-myapp`
    pub fn default_instance_id(&self) -> String {
        let name = self
            .repo_url
            .trim_end_matches('/')
            .rsplit(['/', ':'])
            .next()
            .unwrap_or_default()
            .trim_end_matches(".git");

        if name.is_empty() {
            "cicd-app".to_string()
        } else {
            format!("cicd-{}", name)
        }
    }
}

/// Source revision a build runs against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "sha", rename_all = "snake_case")]
pub enum CommitRef {
    /// Commit requested by the caller; executors check it out
    Pinned(String),

    /// Stand-in generated by the saga when no commit was requested;
    /// executors build the branch head
    Synthetic(String),
}

impl CommitRef {
    pub fn sha(&self) -> &str {
        match self {
            CommitRef::Pinned(sha) | CommitRef::Synthetic(sha) => sha,
        }
    }
}

/// Input of the build and test actions
///
/// `instance_id` scopes the working tree and artifacts to one pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {
    pub instance_id: String,
    pub input: DeployInput,
    pub commit: CommitRef,
}

/// Artifact produced by the build step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    pub artifact_name: String,
    /// Where the executor left the packaged artifact, if it is a local file
    #[serde(default)]
    pub artifact_path: String,
    pub commit_sha: String,
    pub tests_passed: u32,
    pub tests_total: u32,
}

impl BuildResult {
    /// Artifact file name for a commit
    pub fn artifact_name_for(sha: &str) -> String {
        format!("app-{}.tar.gz", sha)
    }
}

/// Deliverable of one pipeline cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployResult {
    pub target_host: String,
    pub artifact: String,
    pub application_url: String,
    pub healthy: bool,
}

/// Pipeline saga status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeployStatus {
    Pending,
    /// Reserved for executors that report checkout separately; the current
    /// pipeline checks out inside the build action.
    CheckingOut,
    Building,
    Testing,
    Deploying,
    Completed,
    Failed,
    RolledBack,
}

impl DeployStatus {
    /// States in which a cycle has finished and a redeploy may start
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            DeployStatus::Completed | DeployStatus::Failed | DeployStatus::RolledBack
        )
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: DeployStatus) -> bool {
        use DeployStatus::*;

        match (self, next) {
            (Pending, CheckingOut) | (Pending, Building) | (CheckingOut, Building) => true,
            (Building, Testing) | (Testing, Deploying) | (Deploying, Completed) => true,
            // Completed -> Failed happens when the success notification fails
            (Pending | CheckingOut | Building | Testing | Deploying | Completed, Failed) => true,
            (Failed, RolledBack) => true,
            (from, Building) => from.is_settled(),
            _ => false,
        }
    }

    /// Checked transition
    pub fn transition_to(self, next: DeployStatus) -> Result<DeployStatus, IllegalTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(IllegalTransition {
                machine: "pipeline",
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeployStatus::Pending => "PENDING",
            DeployStatus::CheckingOut => "CHECKING_OUT",
            DeployStatus::Building => "BUILDING",
            DeployStatus::Testing => "TESTING",
            DeployStatus::Deploying => "DEPLOYING",
            DeployStatus::Completed => "COMPLETED",
            DeployStatus::Failed => "FAILED",
            DeployStatus::RolledBack => "ROLLED_BACK",
        }
    }
}

impl std::fmt::Display for DeployStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeployStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(DeployStatus::Pending),
            "CHECKING_OUT" => Ok(DeployStatus::CheckingOut),
            "BUILDING" => Ok(DeployStatus::Building),
            "TESTING" => Ok(DeployStatus::Testing),
            "DEPLOYING" => Ok(DeployStatus::Deploying),
            "COMPLETED" => Ok(DeployStatus::Completed),
            "FAILED" => Ok(DeployStatus::Failed),
            "ROLLED_BACK" => Ok(DeployStatus::RolledBack),
            other => Err(format!("unknown deploy status '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_defaults_from_json() {
        let input: DeployInput = serde_json::from_str(
            r#"{"repo_url": "https://github.com/x/y.git", "target_host": "1.2.3.4"}"#,
        )
        .unwrap();

        assert_eq!(input.branch, "main");
        assert_eq!(input.build_command, "make build");
        assert_eq!(input.test_command, "make test");
        assert_eq!(input.admin_username, "azureadmin");
        assert_eq!(input.target(), Some("1.2.3.4"));
        assert_eq!(input.commit_sha, None);
    }

    #[test]
    fn test_blank_target_is_absent() {
        let input = DeployInput::new("https://github.com/x/y.git").with_target_host("   ");
        assert_eq!(input.target(), None);
    }

    #[test]
    fn test_inherit_target_only_when_missing() {
        let mut original = DeployInput::new("repo").with_target_host("10.0.0.1");
        original.admin_username = "ops".to_string();

        let inherited = DeployInput::new("repo").inherit_target(&original);
        assert_eq!(inherited.target(), Some("10.0.0.1"));
        assert_eq!(inherited.admin_username, "ops");

        let explicit = DeployInput::new("repo")
            .with_target_host("10.0.0.2")
            .inherit_target(&original);
        assert_eq!(explicit.target(), Some("10.0.0.2"));
        assert_eq!(explicit.admin_username, "azureadmin");
    }

    #[test]
    fn test_default_instance_id() {
        let https = DeployInput::new("https://github.com/example/myapp.git");
        assert_eq!(https.default_instance_id(), "cicd-myapp");

        let ssh = DeployInput::new("git@github.com:example/tool");
        assert_eq!(ssh.default_instance_id(), "cicd-tool");

        let empty = DeployInput::new("");
        assert_eq!(empty.default_instance_id(), "cicd-app");
    }

    #[test]
    fn test_redeploy_reenters_building() {
        assert!(DeployStatus::Completed.can_transition_to(DeployStatus::Building));
        assert!(DeployStatus::Failed.can_transition_to(DeployStatus::Building));
        assert!(DeployStatus::RolledBack.can_transition_to(DeployStatus::Building));
        assert!(!DeployStatus::Testing.can_transition_to(DeployStatus::Building));
    }

    #[test]
    fn test_rollback_only_from_failed() {
        assert!(DeployStatus::Failed.transition_to(DeployStatus::RolledBack).is_ok());
        assert!(DeployStatus::Deploying.transition_to(DeployStatus::RolledBack).is_err());
        assert!(DeployStatus::RolledBack.transition_to(DeployStatus::Failed).is_err());
    }

    #[test]
    fn test_commit_ref_wire_format() {
        let json = serde_json::to_value(CommitRef::Synthetic("ab12cd34".to_string())).unwrap();
        assert_eq!(json["kind"], "synthetic");
        assert_eq!(json["sha"], "ab12cd34");
    }
}
