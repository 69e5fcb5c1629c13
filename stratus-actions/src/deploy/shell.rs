//! git, shell, scp and ssh backed pipeline actions

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use stratus_core::domain::deploy::{BuildRequest, BuildResult, CommitRef, DeployResult};
use stratus_core::error::ActionError;
use tracing::{debug, info, warn};

use super::DeployActions;
use crate::command;
use crate::config::ActionConfig;

const CURRENT_ARTIFACT: &str = "current.tar.gz";
const PREVIOUS_ARTIFACT: &str = "previous.tar.gz";
const CURRENT_MARKER: &str = "current.release";
const PREVIOUS_MARKER: &str = "previous.release";

/// Builds locally and ships artifacts to the target over ssh
///
/// Each instance checks out into `WORKSPACE_BASE/instances/{id}/checkout`,
/// recreated by every build so a re-executed build starts from a clean tree.
/// The target keeps the name of the live artifact in `current.release`.
pub struct ShellDeployActions {
    config: ActionConfig,
    http: reqwest::Client,
}

impl ShellDeployActions {
    pub fn new(config: ActionConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    fn ssh_options(&self) -> Vec<String> {
        vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
        ]
    }

    async fn ssh(&self, admin_username: &str, host: &str, script: &str) -> Result<(), ActionError> {
        let mut args = self.ssh_options();
        args.push("-p".to_string());
        args.push(self.config.ssh_port.to_string());
        args.push(format!("{}@{}", admin_username, host));
        args.push(script.to_string());

        command::run_checked("ssh", &args, None).await?;
        Ok(())
    }

    async fn scp(
        &self,
        local: &Path,
        admin_username: &str,
        host: &str,
        remote: &str,
    ) -> Result<(), ActionError> {
        let mut args = self.ssh_options();
        args.push("-P".to_string());
        args.push(self.config.ssh_port.to_string());
        args.push(local.display().to_string());
        args.push(format!("{}@{}:{}", admin_username, host, remote));

        command::run_checked("scp", &args, None).await?;
        Ok(())
    }

    /// Polls the application root until it answers with a success status
    async fn probe(&self, url: &str) -> bool {
        for attempt in 1..=self.config.health_check_attempts {
            let response = self
                .http
                .get(url)
                .timeout(self.config.health_check_timeout)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => return true,
                Ok(resp) => debug!("{} answered {} (attempt {})", url, resp.status(), attempt),
                Err(e) => debug!("{} unreachable (attempt {}): {}", url, attempt, e),
            }

            if attempt < self.config.health_check_attempts {
                tokio::time::sleep(self.config.health_check_interval).await;
            }
        }

        false
    }
}

#[async_trait]
impl DeployActions for ShellDeployActions {
    async fn checkout_and_build(
        &self,
        request: &BuildRequest,
    ) -> Result<BuildResult, ActionError> {
        let input = &request.input;
        let dir = self.config.checkout_dir(&request.instance_id);

        if tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&dir).await.map_err(|e| {
                ActionError::transient(format!("cannot clear {}: {}", dir.display(), e))
            })?;
        }
        if let Some(parent) = dir.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ActionError::transient(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        info!("Cloning {} ({}) into {}", input.repo_url, input.branch, dir.display());
        let dir_arg = dir.display().to_string();
        let mut clone_args = vec!["clone", "--branch", input.branch.as_str()];
        if matches!(request.commit, CommitRef::Synthetic(_)) {
            clone_args.push("--single-branch");
        }
        clone_args.push(input.repo_url.as_str());
        clone_args.push(dir_arg.as_str());
        command::run_checked("git", &clone_args, None).await?;

        if let CommitRef::Pinned(sha) = &request.commit {
            command::run_checked("git", &["checkout", "--detach", sha.as_str()], Some(&dir))
                .await?;
        }

        let head = command::run_checked("git", &["rev-parse", "--short=8", "HEAD"], Some(&dir))
            .await?;
        let resolved_sha = head.stdout.trim().to_string();

        info!("Building {} at {}", input.repo_url, resolved_sha);
        let build = command::run_shell(&input.build_command, Some(&dir)).await?;
        if !build.success() {
            return Err(ActionError::business(format!(
                "build command '{}' exited with code {}: {}",
                input.build_command,
                build.exit_code,
                build.summary()
            )));
        }

        let artifact_name = BuildResult::artifact_name_for(request.commit.sha());
        let artifact_path = self
            .config
            .artifact_path(&request.instance_id, &artifact_name);
        if let Some(parent) = artifact_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ActionError::transient(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        let artifact_arg = artifact_path.display().to_string();
        command::run_checked(
            "tar",
            &["czf", artifact_arg.as_str(), "--exclude=.git", "-C", dir_arg.as_str(), "."],
            None,
        )
        .await?;

        info!("Packaged {}", artifact_name);

        Ok(BuildResult {
            artifact_name,
            artifact_path: artifact_arg,
            commit_sha: resolved_sha,
            tests_passed: 0,
            tests_total: 0,
        })
    }

    async fn run_tests(&self, request: &BuildRequest) -> Result<bool, ActionError> {
        let input = &request.input;
        let dir = self.config.checkout_dir(&request.instance_id);
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            return Err(ActionError::precondition(format!(
                "no checkout at {}; build has not run",
                dir.display()
            )));
        }

        info!("Running '{}' in {}", input.test_command, dir.display());
        let output = command::run_shell(&input.test_command, Some(&dir)).await?;

        if output.success() {
            Ok(true)
        } else {
            warn!(
                "Tests exited with code {}: {}",
                output.exit_code,
                output.summary()
            );
            Ok(false)
        }
    }

    async fn deploy_artifact(
        &self,
        build: &BuildResult,
        target_host: &str,
        admin_username: &str,
    ) -> Result<DeployResult, ActionError> {
        if build.artifact_path.is_empty() {
            return Err(ActionError::precondition(format!(
                "artifact {} has no local path",
                build.artifact_name
            )));
        }
        let local = PathBuf::from(&build.artifact_path);
        if !tokio::fs::try_exists(&local).await.unwrap_or(false) {
            return Err(ActionError::business(format!(
                "artifact {} not found",
                local.display()
            )));
        }

        let remote_dir = &self.config.remote_app_dir;
        info!("Deploying {} to {}:{}", build.artifact_name, target_host, remote_dir);

        self.ssh(
            admin_username,
            target_host,
            &format!("mkdir -p {}", quote(remote_dir)),
        )
        .await?;
        self.scp(&local, admin_username, target_host, remote_dir)
            .await?;
        self.ssh(
            admin_username,
            target_host,
            &activate_script(remote_dir, &build.artifact_name, &self.config.service_name),
        )
        .await?;

        let application_url = format!("http://{}:{}", target_host, self.config.app_port);
        let healthy = self.probe(&application_url).await;
        if !healthy {
            warn!("{} did not pass its health check", application_url);
        }

        Ok(DeployResult {
            target_host: target_host.to_string(),
            artifact: build.artifact_name.clone(),
            application_url,
            healthy,
        })
    }

    async fn rollback(
        &self,
        target_host: &str,
        admin_username: &str,
        attempted: Option<&str>,
    ) -> Result<(), ActionError> {
        let Some(artifact) = attempted else {
            info!("Nothing was deployed to {}; leaving it as is", target_host);
            return Ok(());
        };

        info!("Rolling back {} on {}", artifact, target_host);
        self.ssh(
            admin_username,
            target_host,
            &rollback_script(
                &self.config.remote_app_dir,
                artifact,
                &self.config.service_name,
            ),
        )
        .await
    }

    async fn notify(&self, message: &str) -> Result<(), ActionError> {
        let Some(url) = &self.config.notify_webhook_url else {
            info!("Pipeline notification: {}", message);
            return Ok(());
        };

        let response = self
            .http
            .post(url)
            .json(&serde_json::json!({ "text": message }))
            .timeout(self.config.health_check_timeout)
            .send()
            .await
            .map_err(|e| ActionError::transient(format!("notification failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ActionError::transient(format!(
                "notification webhook answered {}",
                response.status()
            )));
        }

        debug!("Notification delivered: {}", message);
        Ok(())
    }
}

/// Single-quotes a value for a POSIX shell
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Makes `artifact` the current release, keeping the one it replaces
///
/// Re-running with the same artifact leaves the backup untouched.
fn activate_script(remote_dir: &str, artifact: &str, service: &str) -> String {
    let artifact = quote(artifact);
    format!(
        "set -e; cd {dir}; \
         if [ -f {current} ] && ! cmp -s {current} {artifact}; then \
         cp {current} {previous}; \
         if [ -f {current_marker} ]; then cp {current_marker} {previous_marker}; \
         else rm -f {previous_marker}; fi; fi; \
         cp {artifact} {current}; echo {artifact} > {current_marker}; \
         rm -rf current && mkdir current && tar xzf {current} -C current; \
         sudo systemctl restart {service}",
        dir = quote(remote_dir),
        current = CURRENT_ARTIFACT,
        previous = PREVIOUS_ARTIFACT,
        current_marker = CURRENT_MARKER,
        previous_marker = PREVIOUS_MARKER,
        artifact = artifact,
        service = quote(service),
    )
}

/// Restores the previous release, but only while `artifact` is the live one
fn rollback_script(remote_dir: &str, artifact: &str, service: &str) -> String {
    format!(
        "set -e; [ -d {dir} ] || exit 0; cd {dir}; \
         if [ -f {previous} ] && [ \"$(cat {current_marker} 2>/dev/null)\" = {artifact} ]; then \
         cp {previous} {current}; \
         if [ -f {previous_marker} ]; then cp {previous_marker} {current_marker}; \
         else rm -f {current_marker}; fi; \
         rm -rf current && mkdir current && tar xzf {current} -C current; \
         sudo systemctl restart {service}; \
         else echo 'nothing to roll back'; fi",
        dir = quote(remote_dir),
        current = CURRENT_ARTIFACT,
        previous = PREVIOUS_ARTIFACT,
        current_marker = CURRENT_MARKER,
        previous_marker = PREVIOUS_MARKER,
        artifact = quote(artifact),
        service = quote(service),
    )
}
