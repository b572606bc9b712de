use std::env;
use std::fs;
use std::path::Path;

use infrachat_core::config::{detect_config_path, AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

struct Field {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    let missing = config.missing_credentials();
    if !missing.is_empty() {
        lines.push(format!("missing credentials: {}", missing.join(", ")));
    }

    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let plain = |value: &Option<String>| value.clone().unwrap_or_else(|| "<unset>".to_string());

    vec![
        Field {
            key: "llm.api_key",
            value: redact_secret(config.llm.api_key.as_ref()),
            env_keys: &["INFRACHAT_LLM_API_KEY", "ANTHROPIC_API_KEY"],
        },
        Field {
            key: "llm.base_url",
            value: config.llm.base_url.clone(),
            env_keys: &["INFRACHAT_LLM_BASE_URL"],
        },
        Field {
            key: "llm.model",
            value: config.llm.model.clone(),
            env_keys: &["INFRACHAT_LLM_MODEL", "ANTHROPIC_MODEL"],
        },
        Field {
            key: "llm.generation_model",
            value: config.llm.generation_model().to_string(),
            env_keys: &["INFRACHAT_LLM_GENERATION_MODEL"],
        },
        Field {
            key: "llm.timeout_secs",
            value: config.llm.timeout_secs.to_string(),
            env_keys: &["INFRACHAT_LLM_TIMEOUT_SECS"],
        },
        Field {
            key: "azure.subscription_id",
            value: plain(&config.azure.subscription_id),
            env_keys: &["INFRACHAT_AZURE_SUBSCRIPTION_ID", "AZURE_SUBSCRIPTION_ID"],
        },
        Field {
            key: "azure.tenant_id",
            value: plain(&config.azure.tenant_id),
            env_keys: &["INFRACHAT_AZURE_TENANT_ID", "AZURE_TENANT_ID"],
        },
        Field {
            key: "azure.client_id",
            value: plain(&config.azure.client_id),
            env_keys: &["INFRACHAT_AZURE_CLIENT_ID", "AZURE_CLIENT_ID"],
        },
        Field {
            key: "azure.client_secret",
            value: redact_secret(config.azure.client_secret.as_ref()),
            env_keys: &["INFRACHAT_AZURE_CLIENT_SECRET", "AZURE_CLIENT_SECRET"],
        },
        Field {
            key: "terraform.binary",
            value: config.terraform.binary.clone(),
            env_keys: &["INFRACHAT_TERRAFORM_BINARY"],
        },
        Field {
            key: "terraform.log_level",
            value: config.terraform.log_level.clone(),
            env_keys: &["INFRACHAT_TERRAFORM_LOG_LEVEL"],
        },
        Field {
            key: "terraform.work_root",
            value: config
                .terraform
                .work_root
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "<system temp>".to_string()),
            env_keys: &["INFRACHAT_TERRAFORM_WORK_ROOT"],
        },
        Field {
            key: "server.bind_address",
            value: config.server.bind_address.clone(),
            env_keys: &["INFRACHAT_SERVER_BIND_ADDRESS"],
        },
        Field {
            key: "server.port",
            value: config.server.port.to_string(),
            env_keys: &["INFRACHAT_SERVER_PORT", "PORT"],
        },
        Field {
            key: "server.graceful_shutdown_secs",
            value: config.server.graceful_shutdown_secs.to_string(),
            env_keys: &["INFRACHAT_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        },
        Field {
            key: "server.session_idle_secs",
            value: config.server.session_idle_secs.to_string(),
            env_keys: &["INFRACHAT_SERVER_SESSION_IDLE_SECS"],
        },
        Field {
            key: "server.max_sessions",
            value: config.server.max_sessions.to_string(),
            env_keys: &["INFRACHAT_SERVER_MAX_SESSIONS"],
        },
        Field {
            key: "logging.level",
            value: config.logging.level.clone(),
            env_keys: &["INFRACHAT_LOGGING_LEVEL", "INFRACHAT_LOG_LEVEL"],
        },
        Field {
            key: "logging.format",
            value: format!("{:?}", config.logging.format),
            env_keys: &["INFRACHAT_LOGGING_FORMAT", "INFRACHAT_LOG_FORMAT"],
        },
    ]
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: Option<&SecretString>) -> String {
    let Some(secret) = secret else {
        return "<unset>".to_string();
    };
    let trimmed = secret.expose_secret().trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    // Anthropic keys look like `sk-ant-...`; keep only the vendor prefix.
    match trimmed.strip_prefix("sk-ant-") {
        Some(_) => "sk-ant-***".to_string(),
        None => "<redacted>".to_string(),
    }
}
