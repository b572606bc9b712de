use std::env;
use std::fs;
use std::sync::{Mutex, OnceLock};

use infrachat_cli::commands::{config, doctor, run, split};
use serde_json::Value;
use tempfile::TempDir;

const MISSING_BINARY: &str = "infrachat-test-no-such-terraform";

#[test]
fn run_rejects_unknown_operation_before_touching_files() {
    with_env(&[], || {
        let result = run::run(std::path::Path::new("/does/not/exist"), "import", false);
        assert_eq!(result.exit_code, 4, "expected input failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "run");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "input");
        let message = payload["message"].as_str().unwrap_or_default();
        assert!(message.contains("Invalid operation: import"));
        assert!(message.contains("init, validate, plan, apply, destroy"));
    });
}

#[test]
fn run_reports_directory_without_terraform_files() {
    with_env(&[], || {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("README.md"), "# notes").expect("write readme");

        let result = run::run(dir.path(), "plan", false);
        assert_eq!(result.exit_code, 4);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "input");
        assert!(payload["message"].as_str().unwrap_or_default().contains("no *.tf files"));
    });
}

#[test]
fn run_reports_missing_terraform_binary_as_config_failure() {
    with_env(&[("INFRACHAT_TERRAFORM_BINARY", MISSING_BINARY)], || {
        let dir = terraform_dir();

        let result = run::run(dir.path(), "validate", false);
        assert_eq!(result.exit_code, 2, "expected config failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "config_validation");
        assert!(payload["message"].as_str().unwrap_or_default().contains(MISSING_BINARY));
    });
}

#[test]
fn run_reports_invalid_env_override_as_config_failure() {
    with_env(&[("INFRACHAT_SERVER_PORT", "not-a-port")], || {
        let dir = terraform_dir();

        let result = run::run(dir.path(), "plan", false);
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "config_validation");
        assert!(payload["message"].as_str().unwrap_or_default().contains("INFRACHAT_SERVER_PORT"));
    });
}

#[test]
fn load_files_only_picks_top_level_terraform_files() {
    let dir = terraform_dir();
    fs::write(dir.path().join("terraform.tfstate"), "{}").expect("write state");
    fs::create_dir(dir.path().join("modules.tf")).expect("create dir");

    let files = run::load_files(dir.path()).expect("files");

    assert_eq!(files.names().collect::<Vec<_>>(), vec!["main.tf", "variables.tf"]);
    assert_eq!(files.get("variables.tf"), Some("variable \"location\" {}"));
}

#[test]
fn split_prints_named_files() {
    with_env(&[], || {
        let dir = TempDir::new().expect("tempdir");
        let document = dir.path().join("reply.md");
        fs::write(
            &document,
            "Here you go.\n\n# main.tf\n```hcl\nresource \"x\" \"y\" {}\n```\n\n# outputs.tf\n```hcl\noutput \"id\" {}\n```\n",
        )
        .expect("write document");

        let result = split::run(&document, None);
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "split");
        assert_eq!(payload["status"], "ok");
        assert_eq!(
            payload["message"],
            "# main.tf\nresource \"x\" \"y\" {}\n\n# outputs.tf\noutput \"id\" {}"
        );
    });
}

#[test]
fn split_writes_files_into_out_dir() {
    with_env(&[], || {
        let dir = TempDir::new().expect("tempdir");
        let document = dir.path().join("reply.md");
        fs::write(&document, "```hcl\nresource \"x\" \"y\" {}\n```").expect("write document");
        let out = dir.path().join("generated");

        let result = split::run(&document, Some(&out));
        assert_eq!(result.exit_code, 0);

        let written = fs::read_to_string(out.join("main.tf")).expect("main.tf written");
        assert_eq!(written, "resource \"x\" \"y\" {}");
        let payload = parse_payload(&result.output);
        assert!(payload["message"].as_str().unwrap_or_default().contains("wrote 1 file(s)"));
    });
}

#[test]
fn split_rejects_missing_or_empty_document() {
    with_env(&[], || {
        let dir = TempDir::new().expect("tempdir");

        let missing = split::run(&dir.path().join("absent.md"), None);
        assert_eq!(missing.exit_code, 4);
        assert_eq!(parse_payload(&missing.output)["error_class"], "input");

        let empty = dir.path().join("empty.md");
        fs::write(&empty, "  \n").expect("write empty");
        let result = split::run(&empty, None);
        assert_eq!(result.exit_code, 4);
        assert!(parse_payload(&result.output)["message"]
            .as_str()
            .unwrap_or_default()
            .ends_with("is empty"));
    });
}

#[test]
fn doctor_fails_without_credentials() {
    with_env(&[("INFRACHAT_TERRAFORM_BINARY", MISSING_BINARY)], || {
        let report: Value = serde_json::from_str(&doctor::run(true)).expect("doctor json");

        assert_eq!(report["overall_status"], "fail");
        let checks = report["checks"].as_array().expect("checks");
        let status_of = |name: &str| {
            checks
                .iter()
                .find(|check| check["name"] == name)
                .map(|check| check["status"].clone())
                .unwrap_or(Value::Null)
        };
        assert_eq!(status_of("config_validation"), "pass");
        assert_eq!(status_of("llm_credentials"), "fail");
        assert_eq!(status_of("terraform_binary"), "fail");
        assert_eq!(status_of("azure_subscription"), "fail");
    });
}

#[test]
fn doctor_skips_azure_probe_when_service_principal_is_incomplete() {
    with_env(
        &[
            ("ANTHROPIC_API_KEY", "sk-ant-test"),
            ("AZURE_SUBSCRIPTION_ID", "00000000-0000-0000-0000-000000000001"),
            ("INFRACHAT_TERRAFORM_BINARY", MISSING_BINARY),
        ],
        || {
            let output = doctor::run(false);

            assert!(output.starts_with("doctor: one or more readiness checks failed"));
            assert!(output.contains("- [ok] llm_credentials"));
            assert!(output.contains("- [skip] azure_subscription"));
            assert!(output.contains("AZURE_TENANT_ID is not set"));
            assert!(output.contains("- [fail] terraform_binary"));
        },
    );
}

#[test]
fn doctor_skips_dependent_checks_when_config_is_invalid() {
    with_env(&[("INFRACHAT_LLM_TIMEOUT_SECS", "0")], || {
        let report: Value = serde_json::from_str(&doctor::run(true)).expect("doctor json");

        assert_eq!(report["overall_status"], "fail");
        let checks = report["checks"].as_array().expect("checks");
        assert_eq!(checks[0]["status"], "fail");
        assert!(checks[1..].iter().all(|check| check["status"] == "skipped"));
    });
}

#[test]
fn config_attributes_sources_and_redacts_secrets() {
    with_env(
        &[
            ("ANTHROPIC_API_KEY", "sk-ant-api03-super-secret"),
            ("AZURE_CLIENT_SECRET", "azure-super-secret"),
            ("PORT", "8088"),
        ],
        || {
            let output = config::run();

            assert!(!output.contains("super-secret"), "secrets must be redacted: {output}");
            assert!(output.contains("- llm.api_key = sk-ant-*** (source: env (ANTHROPIC_API_KEY))"));
            assert!(output
                .contains("- azure.client_secret = <redacted> (source: env (AZURE_CLIENT_SECRET))"));
            assert!(output.contains("- server.port = 8088 (source: env (PORT))"));
            assert!(output.contains("- terraform.binary = terraform (source: default)"));
            assert!(output.contains("missing credentials: AZURE_SUBSCRIPTION_ID"));
        },
    );
}

fn terraform_dir() -> TempDir {
    let dir = TempDir::new().expect("tempdir");
    fs::write(dir.path().join("main.tf"), "resource \"x\" \"y\" {}").expect("write main.tf");
    fs::write(dir.path().join("variables.tf"), "variable \"location\" {}")
        .expect("write variables.tf");
    dir
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "ANTHROPIC_API_KEY",
        "ANTHROPIC_MODEL",
        "AZURE_SUBSCRIPTION_ID",
        "AZURE_TENANT_ID",
        "AZURE_CLIENT_ID",
        "AZURE_CLIENT_SECRET",
        "PORT",
        "INFRACHAT_LLM_API_KEY",
        "INFRACHAT_LLM_BASE_URL",
        "INFRACHAT_LLM_MODEL",
        "INFRACHAT_LLM_GENERATION_MODEL",
        "INFRACHAT_LLM_TIMEOUT_SECS",
        "INFRACHAT_AZURE_SUBSCRIPTION_ID",
        "INFRACHAT_AZURE_TENANT_ID",
        "INFRACHAT_AZURE_CLIENT_ID",
        "INFRACHAT_AZURE_CLIENT_SECRET",
        "INFRACHAT_TERRAFORM_BINARY",
        "INFRACHAT_TERRAFORM_LOG_LEVEL",
        "INFRACHAT_TERRAFORM_WORK_ROOT",
        "INFRACHAT_SERVER_BIND_ADDRESS",
        "INFRACHAT_SERVER_PORT",
        "INFRACHAT_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "INFRACHAT_SERVER_SESSION_IDLE_SECS",
        "INFRACHAT_SERVER_MAX_SESSIONS",
        "INFRACHAT_LOGGING_LEVEL",
        "INFRACHAT_LOGGING_FORMAT",
        "INFRACHAT_LOG_LEVEL",
        "INFRACHAT_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
