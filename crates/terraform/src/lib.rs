//! Provisioning plumbing: the `terraform` command runner and the Azure
//! Resource Manager handle.

pub mod cloud;
pub mod runner;

pub use cloud::{CloudError, ResourceManagementClient, Subscription};
pub use runner::{
    ArmCredentials, CommandExecutor, CommandOutput, CommandSpec, ProcessExecutor, RunnerError,
    TerraformRunner,
};
