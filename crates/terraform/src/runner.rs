//! Runs `terraform` against a generated file set.
//!
//! Every run gets its own scratch directory: the files are written, `init`
//! runs, then the requested operation. A failed `init` short-circuits the run
//! and its stderr is returned verbatim. Only the five operations in
//! [`Operation::ALL`] can be invoked.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use infrachat_core::config::{AzureConfig, TerraformConfig};
use infrachat_core::domain::file_set::FileSet;
use infrachat_core::domain::operation::{Operation, RunResult};
use infrachat_core::errors::DomainError;
use secrecy::{ExposeSecret, SecretString};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("terraform binary `{binary}` was not found: {source}")]
    BinaryNotFound { binary: String, source: which::Error },
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("no terraform files to run")]
    NoFiles,
    #[error("could not prepare working directory: {0}")]
    Workspace(#[source] std::io::Error),
    #[error("could not start terraform {step}: {source}")]
    Spawn { step: Operation, source: std::io::Error },
}

/// One fully described process invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub env: Vec<(String, String)>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, command: &CommandSpec) -> std::io::Result<CommandOutput>;
}

/// Spawns real processes with `tokio::process`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessExecutor;

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn execute(&self, command: &CommandSpec) -> std::io::Result<CommandOutput> {
        let output = tokio::process::Command::new(&command.program)
            .args(&command.args)
            .current_dir(&command.working_dir)
            .envs(command.env.iter().map(|(key, value)| (key.as_str(), value.as_str())))
            // The server runs operations on detached tasks, so this only
            // fires when the process itself shuts down.
            .kill_on_drop(true)
            .output()
            .await?;

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Service-principal credentials exported as `ARM_*` variables.
#[derive(Clone, Debug, Default)]
pub struct ArmCredentials {
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
    pub subscription_id: Option<String>,
    pub tenant_id: Option<String>,
}

impl From<&AzureConfig> for ArmCredentials {
    fn from(azure: &AzureConfig) -> Self {
        Self {
            client_id: azure.client_id.clone(),
            client_secret: azure.client_secret.clone(),
            subscription_id: azure.subscription_id.clone(),
            tenant_id: azure.tenant_id.clone(),
        }
    }
}

impl ArmCredentials {
    // Unset values are exported as empty strings.
    fn env_pairs(&self) -> Vec<(String, String)> {
        let plain = |value: &Option<String>| value.clone().unwrap_or_default();
        vec![
            ("ARM_CLIENT_ID".to_string(), plain(&self.client_id)),
            (
                "ARM_CLIENT_SECRET".to_string(),
                self.client_secret
                    .as_ref()
                    .map(|secret| secret.expose_secret().to_string())
                    .unwrap_or_default(),
            ),
            ("ARM_SUBSCRIPTION_ID".to_string(), plain(&self.subscription_id)),
            ("ARM_TENANT_ID".to_string(), plain(&self.tenant_id)),
        ]
    }
}

pub struct TerraformRunner {
    binary: PathBuf,
    executor: Arc<dyn CommandExecutor>,
    credentials: ArmCredentials,
    log_level: String,
    work_root: Option<PathBuf>,
}

impl TerraformRunner {
    pub fn new(binary: impl Into<PathBuf>, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            binary: binary.into(),
            executor,
            credentials: ArmCredentials::default(),
            log_level: "INFO".to_string(),
            work_root: None,
        }
    }

    /// Resolves the configured binary on `PATH` and spawns real processes.
    pub fn from_config(terraform: &TerraformConfig, azure: &AzureConfig) -> Result<Self, RunnerError> {
        let binary = resolve_binary(&terraform.binary)?;
        let mut runner = Self::new(binary, Arc::new(ProcessExecutor))
            .with_credentials(ArmCredentials::from(azure))
            .with_log_level(terraform.log_level.clone());
        if let Some(root) = &terraform.work_root {
            runner = runner.with_work_root(root.clone());
        }
        Ok(runner)
    }

    pub fn with_credentials(mut self, credentials: ArmCredentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_log_level(mut self, log_level: impl Into<String>) -> Self {
        self.log_level = log_level.into();
        self
    }

    pub fn with_work_root(mut self, work_root: impl Into<PathBuf>) -> Self {
        self.work_root = Some(work_root.into());
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Parses `operation` against the allow-list before doing any work.
    pub async fn run_named(
        &self,
        files: &FileSet,
        operation: &str,
        auto_approve: bool,
    ) -> Result<RunResult, RunnerError> {
        let operation = operation.parse::<Operation>()?;
        self.run(files, operation, auto_approve).await
    }

    pub async fn run(
        &self,
        files: &FileSet,
        operation: Operation,
        auto_approve: bool,
    ) -> Result<RunResult, RunnerError> {
        if files.is_empty() {
            return Err(RunnerError::NoFiles);
        }
        files.validate_names()?;

        let workspace = self.prepare_workspace(files).await?;
        info!(
            event_name = "terraform.run.start",
            operation = %operation,
            file_count = files.len(),
            "running terraform"
        );

        let init = self.execute(workspace.path(), Operation::Init, false).await?;
        if !init.success() {
            warn!(
                event_name = "terraform.run.failed",
                operation = %operation,
                failed_step = %Operation::Init,
                exit_code = ?init.exit_code,
                "terraform init failed"
            );
            return Ok(RunResult::failed(operation, Operation::Init, init.stderr));
        }
        if operation == Operation::Init {
            return Ok(RunResult::succeeded(operation, init.stdout));
        }

        let output = self.execute(workspace.path(), operation, auto_approve).await?;
        if output.success() {
            info!(event_name = "terraform.run.succeeded", operation = %operation, "terraform run succeeded");
            Ok(RunResult::succeeded(operation, output.stdout))
        } else {
            warn!(
                event_name = "terraform.run.failed",
                operation = %operation,
                failed_step = %operation,
                exit_code = ?output.exit_code,
                "terraform operation failed"
            );
            Ok(RunResult::failed(operation, operation, output.stderr))
        }
    }

    async fn prepare_workspace(&self, files: &FileSet) -> Result<TempDir, RunnerError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("infrachat-");
        let workspace = match &self.work_root {
            Some(root) => {
                tokio::fs::create_dir_all(root).await.map_err(RunnerError::Workspace)?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
        .map_err(RunnerError::Workspace)?;

        for (name, content) in files.iter() {
            tokio::fs::write(workspace.path().join(name), content)
                .await
                .map_err(RunnerError::Workspace)?;
        }

        Ok(workspace)
    }

    async fn execute(
        &self,
        working_dir: &Path,
        step: Operation,
        auto_approve: bool,
    ) -> Result<CommandOutput, RunnerError> {
        let mut args = vec![step.to_string()];
        if auto_approve && step.accepts_auto_approve() {
            args.push("-auto-approve".to_string());
        }

        let mut env = self.credentials.env_pairs();
        env.push(("TF_LOG".to_string(), self.log_level.clone()));

        let command = CommandSpec {
            program: self.binary.clone(),
            args,
            working_dir: working_dir.to_path_buf(),
            env,
        };

        self.executor
            .execute(&command)
            .await
            .map_err(|source| RunnerError::Spawn { step, source })
    }
}

pub fn resolve_binary(binary: &str) -> Result<PathBuf, RunnerError> {
    which::which(binary)
        .map_err(|source| RunnerError::BinaryNotFound { binary: binary.to_string(), source })
}
