use infrachat_core::config::{AppConfig, LoadOptions};
use infrachat_terraform::cloud::{CloudError, ResourceManagementClient};
use infrachat_terraform::runner::resolve_binary;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Skipped, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass(
                "config_validation",
                "configuration loaded and validated",
            ));
            checks.push(check_llm_credentials(&config));
            checks.push(check_terraform_binary(&config));
            checks.push(check_azure_subscription(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            for name in ["llm_credentials", "terraform_binary", "azure_subscription"] {
                checks.push(DoctorCheck::skipped(
                    name,
                    "skipped because configuration did not load",
                ));
            }
        }
    }

    // Skipped checks do not fail the report on their own.
    let all_pass = checks.iter().all(|check| check.status != CheckStatus::Fail);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_llm_credentials(config: &AppConfig) -> DoctorCheck {
    if config.llm.has_api_key() {
        DoctorCheck::pass(
            "llm_credentials",
            format!("api key present; dialogue model `{}`", config.llm.model),
        )
    } else {
        DoctorCheck::fail("llm_credentials", "ANTHROPIC_API_KEY is not set")
    }
}

fn check_terraform_binary(config: &AppConfig) -> DoctorCheck {
    match resolve_binary(&config.terraform.binary) {
        Ok(path) => DoctorCheck::pass("terraform_binary", format!("found at {}", path.display())),
        Err(error) => DoctorCheck::fail("terraform_binary", error.to_string()),
    }
}

fn check_azure_subscription(config: &AppConfig) -> DoctorCheck {
    let client = match ResourceManagementClient::from_config(&config.azure) {
        Ok(client) => client,
        Err(CloudError::MissingCredential("AZURE_SUBSCRIPTION_ID")) => {
            return DoctorCheck::fail("azure_subscription", "AZURE_SUBSCRIPTION_ID is not set");
        }
        Err(CloudError::MissingCredential(name)) => {
            return DoctorCheck::skipped(
                "azure_subscription",
                format!("service principal incomplete ({name} is not set); probe skipped"),
            );
        }
        Err(error) => return DoctorCheck::fail("azure_subscription", error.to_string()),
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck::fail(
                "azure_subscription",
                format!("failed to initialize async runtime: {error}"),
            );
        }
    };

    match runtime.block_on(client.get_subscription()) {
        Ok(subscription) => DoctorCheck::pass(
            "azure_subscription",
            format!(
                "subscription `{}` ({}) is {}",
                subscription.display_name, subscription.subscription_id, subscription.state
            ),
        ),
        Err(error) => DoctorCheck::fail(
            "azure_subscription",
            format!("could not read subscription `{}`: {error}", client.subscription_id()),
        ),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
