use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// Provisioning CLI subcommands the runner is allowed to invoke.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Init,
    Validate,
    Plan,
    Apply,
    Destroy,
}

impl Operation {
    pub const ALL: [Operation; 5] =
        [Self::Init, Self::Validate, Self::Plan, Self::Apply, Self::Destroy];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Validate => "validate",
            Self::Plan => "plan",
            Self::Apply => "apply",
            Self::Destroy => "destroy",
        }
    }

    /// Whether the subcommand mutates remote state and honours `-auto-approve`.
    pub fn accepts_auto_approve(&self) -> bool {
        matches!(self, Self::Apply | Self::Destroy)
    }

    pub fn allowed_names() -> String {
        Self::ALL.iter().map(Operation::as_str).collect::<Vec<_>>().join(", ")
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|operation| operation.as_str() == value)
            .ok_or_else(|| DomainError::UnknownOperation { name: value.to_string() })
    }
}

/// Outcome of one runner invocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RunResult {
    pub operation: Operation,
    pub success: bool,
    /// Step that exited non-zero; `None` on success.
    pub failed_step: Option<Operation>,
    /// Stdout on success, stderr of the failing step otherwise.
    pub output: String,
}

impl RunResult {
    pub fn succeeded(operation: Operation, output: impl Into<String>) -> Self {
        Self { operation, success: true, failed_step: None, output: output.into() }
    }

    pub fn failed(operation: Operation, step: Operation, output: impl Into<String>) -> Self {
        Self { operation, success: false, failed_step: Some(step), output: output.into() }
    }

    pub fn message(&self) -> String {
        match self.failed_step {
            Some(step) => format!("Terraform {step} failed: {}", self.output),
            None => self.output.clone(),
        }
    }
}
