//! Action configuration
//!
//! Where the executors find terraform, where they check out code, and how
//! they reach the deploy target.

use std::path::PathBuf;
use std::time::Duration;

/// Settings shared by the production action implementations
#[derive(Debug, Clone)]
pub struct ActionConfig {
    /// Terraform executable
    pub terraform_bin: String,

    /// Directory holding the Terraform configuration
    pub terraform_dir: PathBuf,

    /// Root for checkouts and packaged artifacts
    pub workspace_base: PathBuf,

    /// Port the deployed application listens on
    pub app_port: u16,

    /// SSH port of the deploy target
    pub ssh_port: u16,

    /// Directory on the deploy target that receives artifacts
    pub remote_app_dir: String,

    /// systemd unit restarted after every deploy and rollback
    pub service_name: String,

    /// Receives pipeline notifications as `{"text": ...}` when set
    pub notify_webhook_url: Option<String>,

    /// Bound on a single health probe (TCP connect or HTTP request)
    pub health_check_timeout: Duration,

    /// Probes before a target is declared unhealthy
    pub health_check_attempts: u32,

    /// Pause between probes
    pub health_check_interval: Duration,
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            terraform_bin: "terraform".to_string(),
            terraform_dir: PathBuf::from("./terraform"),
            workspace_base: PathBuf::from("/tmp/stratus"),
            app_port: 8080,
            ssh_port: 22,
            remote_app_dir: "/opt/app".to_string(),
            service_name: "myapp".to_string(),
            notify_webhook_url: None,
            health_check_timeout: Duration::from_secs(10),
            health_check_attempts: 3,
            health_check_interval: Duration::from_secs(5),
        }
    }
}

impl ActionConfig {
    /// Creates configuration from environment variables
    ///
    /// Every variable is optional:
    /// - TERRAFORM_BIN (default: terraform)
    /// - TERRAFORM_DIR (default: ./terraform)
    /// - WORKSPACE_BASE (default: /tmp/stratus)
    /// - APP_PORT (default: 8080)
    /// - SSH_PORT (default: 22)
    /// - REMOTE_APP_DIR (default: /opt/app)
    /// - APP_SERVICE (default: myapp)
    /// - NOTIFY_WEBHOOK_URL (default: unset, notifications are only logged)
    /// - HEALTH_CHECK_TIMEOUT (seconds, default: 10)
    /// - HEALTH_CHECK_ATTEMPTS (default: 3)
    /// - HEALTH_CHECK_INTERVAL (seconds, default: 5)
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            terraform_bin: env_or("TERRAFORM_BIN", defaults.terraform_bin),
            terraform_dir: std::env::var("TERRAFORM_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.terraform_dir),
            workspace_base: std::env::var("WORKSPACE_BASE")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_base),
            app_port: parse_env("APP_PORT")?.unwrap_or(defaults.app_port),
            ssh_port: parse_env("SSH_PORT")?.unwrap_or(defaults.ssh_port),
            remote_app_dir: env_or("REMOTE_APP_DIR", defaults.remote_app_dir),
            service_name: env_or("APP_SERVICE", defaults.service_name),
            notify_webhook_url: std::env::var("NOTIFY_WEBHOOK_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            health_check_timeout: parse_env("HEALTH_CHECK_TIMEOUT")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.health_check_timeout),
            health_check_attempts: parse_env("HEALTH_CHECK_ATTEMPTS")?
                .unwrap_or(defaults.health_check_attempts),
            health_check_interval: parse_env("HEALTH_CHECK_INTERVAL")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.health_check_interval),
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.terraform_bin.trim().is_empty() {
            anyhow::bail!("terraform_bin cannot be empty");
        }

        if self.remote_app_dir.trim().is_empty() || !self.remote_app_dir.starts_with('/') {
            anyhow::bail!("remote_app_dir must be an absolute path");
        }

        if self.service_name.trim().is_empty() {
            anyhow::bail!("service_name cannot be empty");
        }

        if let Some(url) = &self.notify_webhook_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("notify_webhook_url must start with http:// or https://");
            }
        }

        if self.health_check_timeout.is_zero() {
            anyhow::bail!("health_check_timeout must be greater than 0");
        }

        if self.health_check_attempts == 0 {
            anyhow::bail!("health_check_attempts must be greater than 0");
        }

        Ok(())
    }

    /// Working tree of one saga instance
    ///
    /// Each instance owns `WORKSPACE_BASE/instances/{id}`, so two pipelines
    /// building the same repository never touch each other's files.
    pub fn instance_dir(&self, instance_id: &str) -> PathBuf {
        let slug: String = instance_id
            .bytes()
            .map(|b| {
                if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
                    (b as char).to_string()
                } else {
                    format!("%{:02x}", b)
                }
            })
            .collect();

        self.workspace_base.join("instances").join(slug)
    }

    pub fn checkout_dir(&self, instance_id: &str) -> PathBuf {
        self.instance_dir(instance_id).join("checkout")
    }

    /// Local path of an artifact packaged by `instance_id`
    pub fn artifact_path(&self, instance_id: &str, artifact_name: &str) -> PathBuf {
        self.instance_dir(instance_id)
            .join("artifacts")
            .join(artifact_name)
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn parse_env<T: std::str::FromStr>(key: &str) -> anyhow::Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: '{}'", key, raw)),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ActionConfig::default();
        assert_eq!(config.app_port, 8080);
        assert_eq!(config.terraform_dir, PathBuf::from("./terraform"));
        assert!(config.notify_webhook_url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = ActionConfig::default();

        config.remote_app_dir = "relative/dir".to_string();
        assert!(config.validate().is_err());
        config.remote_app_dir = "/opt/app".to_string();

        config.notify_webhook_url = Some("hooks.example.com".to_string());
        assert!(config.validate().is_err());
        config.notify_webhook_url = Some("https://hooks.example.com/x".to_string());
        assert!(config.validate().is_ok());

        config.health_check_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_working_dirs_are_per_instance() {
        let config = ActionConfig::default();

        assert_eq!(
            config.checkout_dir("cicd-myapp"),
            PathBuf::from("/tmp/stratus/instances/cicd-myapp/checkout")
        );
        assert_eq!(
            config.artifact_path("cicd-myapp", "app-ab12cd34.tar.gz"),
            PathBuf::from("/tmp/stratus/instances/cicd-myapp/artifacts/app-ab12cd34.tar.gz")
        );
        assert_ne!(
            config.checkout_dir("cicd-myapp"),
            config.checkout_dir("cicd-myapp-staging")
        );
        assert_ne!(
            config.artifact_path("cicd-myapp", "app-ab12cd34.tar.gz"),
            config.artifact_path("cicd-myapp-staging", "app-ab12cd34.tar.gz")
        );
        assert_eq!(
            config.instance_dir(".."),
            PathBuf::from("/tmp/stratus/instances/%2e%2e")
        );
        assert_ne!(config.instance_dir("a.b"), config.instance_dir("a_b"));
    }
}
