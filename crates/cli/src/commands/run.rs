use std::fs;
use std::path::Path;

use anyhow::Context;
use infrachat_core::config::{AppConfig, LoadOptions};
use infrachat_core::domain::file_set::{FileSet, TERRAFORM_EXTENSION};
use infrachat_core::domain::operation::Operation;
use infrachat_terraform::runner::{RunnerError, TerraformRunner};

use crate::commands::{CommandResult, EXIT_CONFIG, EXIT_INPUT, EXIT_RUNTIME};

pub fn run(dir: &Path, operation: &str, auto_approve: bool) -> CommandResult {
    let operation = match operation.parse::<Operation>() {
        Ok(operation) => operation,
        Err(error) => {
            return CommandResult::failure("run", "input", error.to_string(), EXIT_INPUT);
        }
    };

    let files = match load_files(dir) {
        Ok(files) if files.is_empty() => {
            return CommandResult::failure(
                "run",
                "input",
                format!("no *{TERRAFORM_EXTENSION} files in `{}`", dir.display()),
                EXIT_INPUT,
            );
        }
        Ok(files) => files,
        Err(error) => {
            return CommandResult::failure("run", "input", format!("{error:#}"), EXIT_INPUT);
        }
    };

    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "run",
                "config_validation",
                format!("configuration issue: {error}"),
                EXIT_CONFIG,
            );
        }
    };

    let runner = match TerraformRunner::from_config(&config.terraform, &config.azure) {
        Ok(runner) => runner,
        Err(error) => {
            return CommandResult::failure("run", "config_validation", error.to_string(), EXIT_CONFIG);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "run",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                EXIT_RUNTIME,
            );
        }
    };

    match runtime.block_on(runner.run(&files, operation, auto_approve)) {
        Ok(result) if result.success => CommandResult::success("run", result.message()),
        Ok(result) => CommandResult::failure("run", "provisioning", result.message(), EXIT_RUNTIME),
        Err(error @ RunnerError::Domain(_)) => {
            CommandResult::failure("run", "input", error.to_string(), EXIT_INPUT)
        }
        Err(error) => CommandResult::failure("run", "provisioning", error.to_string(), EXIT_RUNTIME),
    }
}

/// Reads every `*.tf` file directly inside `dir`; subdirectories are ignored.
pub fn load_files(dir: &Path) -> anyhow::Result<FileSet> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("could not read `{}`", dir.display()))?;

    let mut files = FileSet::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("could not list `{}`", dir.display()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if !name.ends_with(TERRAFORM_EXTENSION) {
            continue;
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("could not read `{}`", path.display()))?;
        files.insert(name, content);
    }

    Ok(files)
}
