use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_MODEL: &str = "claude-3-sonnet-20240229";
pub const DEFAULT_LLM_BASE_URL: &str = "https://api.anthropic.com";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub azure: AzureConfig,
    pub terraform: TerraformConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub model: String,
    pub generation_model: Option<String>,
    pub timeout_secs: u64,
}

impl LlmConfig {
    /// Model used for code generation; falls back to the dialogue model.
    pub fn generation_model(&self) -> &str {
        self.generation_model.as_deref().unwrap_or(&self.model)
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.as_ref().map(|key| !key.expose_secret().trim().is_empty()).unwrap_or(false)
    }
}

/// Service-principal credentials forwarded to the provisioning tool.
#[derive(Clone, Debug, Default)]
pub struct AzureConfig {
    pub subscription_id: Option<String>,
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct TerraformConfig {
    pub binary: String,
    pub log_level: String,
    pub work_root: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
    /// Sessions untouched for this long are dropped.
    pub session_idle_secs: u64,
    /// Upper bound on live sessions; the least recently used one makes room.
    pub max_sessions: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_base_url: Option<String>,
    pub llm_model: Option<String>,
    pub azure_subscription_id: Option<String>,
    pub terraform_binary: Option<String>,
    pub terraform_work_root: Option<PathBuf>,
    pub server_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                api_key: None,
                base_url: DEFAULT_LLM_BASE_URL.to_string(),
                model: DEFAULT_MODEL.to_string(),
                generation_model: None,
                timeout_secs: 120,
            },
            azure: AzureConfig::default(),
            terraform: TerraformConfig {
                binary: "terraform".to_string(),
                log_level: "INFO".to_string(),
                work_root: None,
            },
            server: ServerConfig {
                bind_address: "0.0.0.0".to_string(),
                port: 5000,
                graceful_shutdown_secs: 15,
                session_idle_secs: 3600,
                max_sessions: 1024,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("infrachat.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Environment variable names for credentials the agent cannot start
    /// without. Checked lazily so the server can boot and report them.
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        let has_subscription = self
            .azure
            .subscription_id
            .as_ref()
            .map(|value| !value.trim().is_empty())
            .unwrap_or(false);
        if !has_subscription {
            missing.push("AZURE_SUBSCRIPTION_ID");
        }
        if !self.llm.has_api_key() {
            missing.push("ANTHROPIC_API_KEY");
        }
        missing
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(llm) = patch.llm {
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = base_url;
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(generation_model) = llm.generation_model {
                self.llm.generation_model = Some(generation_model);
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(azure) = patch.azure {
            if let Some(subscription_id) = azure.subscription_id {
                self.azure.subscription_id = Some(subscription_id);
            }
            if let Some(tenant_id) = azure.tenant_id {
                self.azure.tenant_id = Some(tenant_id);
            }
            if let Some(client_id) = azure.client_id {
                self.azure.client_id = Some(client_id);
            }
            if let Some(client_secret_value) = azure.client_secret {
                self.azure.client_secret = Some(secret_value(client_secret_value));
            }
        }

        if let Some(terraform) = patch.terraform {
            if let Some(binary) = terraform.binary {
                self.terraform.binary = binary;
            }
            if let Some(log_level) = terraform.log_level {
                self.terraform.log_level = log_level;
            }
            if let Some(work_root) = terraform.work_root {
                self.terraform.work_root = Some(work_root);
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
            if let Some(session_idle_secs) = server.session_idle_secs {
                self.server.session_idle_secs = session_idle_secs;
            }
            if let Some(max_sessions) = server.max_sessions {
                self.server.max_sessions = max_sessions;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        let api_key = read_env("INFRACHAT_LLM_API_KEY").or_else(|| read_env("ANTHROPIC_API_KEY"));
        if let Some(value) = api_key {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("INFRACHAT_LLM_BASE_URL") {
            self.llm.base_url = value;
        }
        let model = read_env("INFRACHAT_LLM_MODEL").or_else(|| read_env("ANTHROPIC_MODEL"));
        if let Some(value) = model {
            self.llm.model = value;
        }
        if let Some(value) = read_env("INFRACHAT_LLM_GENERATION_MODEL") {
            self.llm.generation_model = Some(value);
        }
        if let Some(value) = read_env("INFRACHAT_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("INFRACHAT_LLM_TIMEOUT_SECS", &value)?;
        }

        let subscription_id = read_env("INFRACHAT_AZURE_SUBSCRIPTION_ID")
            .or_else(|| read_env("AZURE_SUBSCRIPTION_ID"));
        if let Some(value) = subscription_id {
            self.azure.subscription_id = Some(value);
        }
        let tenant_id =
            read_env("INFRACHAT_AZURE_TENANT_ID").or_else(|| read_env("AZURE_TENANT_ID"));
        if let Some(value) = tenant_id {
            self.azure.tenant_id = Some(value);
        }
        let client_id =
            read_env("INFRACHAT_AZURE_CLIENT_ID").or_else(|| read_env("AZURE_CLIENT_ID"));
        if let Some(value) = client_id {
            self.azure.client_id = Some(value);
        }
        let client_secret =
            read_env("INFRACHAT_AZURE_CLIENT_SECRET").or_else(|| read_env("AZURE_CLIENT_SECRET"));
        if let Some(value) = client_secret {
            self.azure.client_secret = Some(secret_value(value));
        }

        if let Some(value) = read_env("INFRACHAT_TERRAFORM_BINARY") {
            self.terraform.binary = value;
        }
        if let Some(value) = read_env("INFRACHAT_TERRAFORM_LOG_LEVEL") {
            self.terraform.log_level = value;
        }
        if let Some(value) = read_env("INFRACHAT_TERRAFORM_WORK_ROOT") {
            self.terraform.work_root = Some(PathBuf::from(value));
        }

        if let Some(value) = read_env("INFRACHAT_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        let port = read_env("INFRACHAT_SERVER_PORT")
            .map(|value| ("INFRACHAT_SERVER_PORT", value))
            .or_else(|| read_env("PORT").map(|value| ("PORT", value)));
        if let Some((key, value)) = port {
            self.server.port = parse_u16(key, &value)?;
        }
        if let Some(value) = read_env("INFRACHAT_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("INFRACHAT_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }
        if let Some(value) = read_env("INFRACHAT_SERVER_SESSION_IDLE_SECS") {
            self.server.session_idle_secs = parse_u64("INFRACHAT_SERVER_SESSION_IDLE_SECS", &value)?;
        }
        if let Some(value) = read_env("INFRACHAT_SERVER_MAX_SESSIONS") {
            self.server.max_sessions = parse_u64("INFRACHAT_SERVER_MAX_SESSIONS", &value)?;
        }

        let log_level =
            read_env("INFRACHAT_LOGGING_LEVEL").or_else(|| read_env("INFRACHAT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("INFRACHAT_LOGGING_FORMAT").or_else(|| read_env("INFRACHAT_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(llm_base_url) = overrides.llm_base_url {
            self.llm.base_url = llm_base_url;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(subscription_id) = overrides.azure_subscription_id {
            self.azure.subscription_id = Some(subscription_id);
        }
        if let Some(binary) = overrides.terraform_binary {
            self.terraform.binary = binary;
        }
        if let Some(work_root) = overrides.terraform_work_root {
            self.terraform.work_root = Some(work_root);
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_llm(&self.llm)?;
        validate_terraform(&self.terraform)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("infrachat.toml"), PathBuf::from("config/infrachat.toml")]
        .into_iter()
        .find(|path| path.exists())
}

/// First config file that `load` would read, if any.
pub fn detect_config_path() -> Option<PathBuf> {
    resolve_config_path(None)
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    let base_url = llm.base_url.trim();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "llm.base_url must start with http:// or https://".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    Ok(())
}

fn validate_terraform(terraform: &TerraformConfig) -> Result<(), ConfigError> {
    if terraform.binary.trim().is_empty() {
        return Err(ConfigError::Validation("terraform.binary must not be empty".to_string()));
    }

    match terraform.log_level.trim().to_ascii_uppercase().as_str() {
        "TRACE" | "DEBUG" | "INFO" | "WARN" | "ERROR" | "OFF" => Ok(()),
        _ => Err(ConfigError::Validation(
            "terraform.log_level must be one of TRACE|DEBUG|INFO|WARN|ERROR|OFF".to_string(),
        )),
    }
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    if server.session_idle_secs == 0 {
        return Err(ConfigError::Validation(
            "server.session_idle_secs must be greater than zero".to_string(),
        ));
    }

    if server.max_sessions == 0 {
        return Err(ConfigError::Validation("server.max_sessions must be greater than zero".to_string()));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    llm: Option<LlmPatch>,
    azure: Option<AzurePatch>,
    terraform: Option<TerraformPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    generation_model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AzurePatch {
    subscription_id: Option<String>,
    tenant_id: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TerraformPatch {
    binary: Option<String>,
    log_level: Option<String>,
    work_root: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
    session_idle_secs: Option<u64>,
    max_sessions: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    const MANAGED_VARS: [&str; 14] = [
        "ANTHROPIC_API_KEY",
        "ANTHROPIC_MODEL",
        "AZURE_SUBSCRIPTION_ID",
        "AZURE_CLIENT_SECRET",
        "INFRACHAT_LLM_API_KEY",
        "INFRACHAT_LLM_MODEL",
        "INFRACHAT_LLM_TIMEOUT_SECS",
        "INFRACHAT_SERVER_PORT",
        "INFRACHAT_SERVER_SESSION_IDLE_SECS",
        "INFRACHAT_SERVER_MAX_SESSIONS",
        "INFRACHAT_LOG_LEVEL",
        "INFRACHAT_LOG_FORMAT",
        "INFRACHAT_TERRAFORM_BINARY",
        "PORT",
    ];

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_load_without_credentials() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&MANAGED_VARS);

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.server.port == 5000, "default port should be 5000")?;
        ensure(config.terraform.binary == "terraform", "default binary should be terraform")?;
        ensure(
            config.missing_credentials() == vec!["AZURE_SUBSCRIPTION_ID", "ANTHROPIC_API_KEY"],
            "both credentials should be reported missing",
        )?;
        ensure(
            config.llm.generation_model() == config.llm.model,
            "generation model should fall back to dialogue model",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&MANAGED_VARS);

        env::set_var("TEST_INFRACHAT_API_KEY", "sk-ant-from-env");
        env::set_var("TEST_INFRACHAT_SUBSCRIPTION", "00000000-0000-0000-0000-000000000001");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("infrachat.toml");
            fs::write(
                &path,
                r#"
[llm]
api_key = "${TEST_INFRACHAT_API_KEY}"
generation_model = "claude-3-opus-20240229"

[azure]
subscription_id = "${TEST_INFRACHAT_SUBSCRIPTION}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret() == "sk-ant-from-env")
                    == Some(true),
                "api key should be loaded from environment",
            )?;
            ensure(
                config.llm.generation_model() == "claude-3-opus-20240229",
                "generation model should come from file",
            )?;
            ensure(config.missing_credentials().is_empty(), "no credentials should be missing")
        })();

        clear_vars(&["TEST_INFRACHAT_API_KEY", "TEST_INFRACHAT_SUBSCRIPTION"]);
        result
    }

    #[test]
    fn unterminated_interpolation_is_reported() -> Result<(), String> {
        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("infrachat.toml");
        fs::write(&path, "[llm]\napi_key = \"${NEVER_CLOSED\"\n").map_err(|err| err.to_string())?;

        match AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() }) {
            Err(ConfigError::UnterminatedInterpolation) => Ok(()),
            other => Err(format!("expected unterminated interpolation, got {other:?}")),
        }
    }

    #[test]
    fn conventional_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&MANAGED_VARS);

        env::set_var("ANTHROPIC_API_KEY", "sk-ant-alias");
        env::set_var("ANTHROPIC_MODEL", "claude-3-haiku-20240307");
        env::set_var("AZURE_SUBSCRIPTION_ID", "sub-from-alias");
        env::set_var("PORT", "8088");
        env::set_var("INFRACHAT_LOG_LEVEL", "warn");
        env::set_var("INFRACHAT_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.llm.model == "claude-3-haiku-20240307", "model alias should apply")?;
            ensure(
                config.azure.subscription_id.as_deref() == Some("sub-from-alias"),
                "subscription alias should apply",
            )?;
            ensure(config.server.port == 8088, "PORT alias should apply")?;
            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )
        })();

        clear_vars(&MANAGED_VARS);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&MANAGED_VARS);

        env::set_var("INFRACHAT_LLM_MODEL", "model-from-env");
        env::set_var("INFRACHAT_TERRAFORM_BINARY", "/opt/env/terraform");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("infrachat.toml");
            fs::write(
                &path,
                r#"
[llm]
model = "model-from-file"

[terraform]
binary = "/opt/file/terraform"
log_level = "DEBUG"

[server]
port = 7000

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    terraform_binary: Some("/opt/override/terraform".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.terraform.binary == "/opt/override/terraform",
                "override binary should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.llm.model == "model-from-env", "env model should win over file")?;
            ensure(config.server.port == 7000, "file port should win over default")?;
            ensure(config.terraform.log_level == "DEBUG", "file terraform log level should apply")
        })();

        clear_vars(&MANAGED_VARS);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&MANAGED_VARS);

        env::set_var("INFRACHAT_LLM_TIMEOUT_SECS", "0");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("llm.timeout_secs")
            );
            ensure(has_message, "validation failure should mention llm.timeout_secs")
        })();

        clear_vars(&MANAGED_VARS);
        result
    }

    #[test]
    fn invalid_port_override_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&MANAGED_VARS);

        env::set_var("INFRACHAT_SERVER_PORT", "not-a-port");
        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::InvalidEnvOverride { ref key, .. }) if key == "INFRACHAT_SERVER_PORT" => {
                Ok(())
            }
            other => Err(format!("expected invalid override, got {other:?}")),
        };

        clear_vars(&MANAGED_VARS);
        result
    }

    #[test]
    fn session_limits_come_from_env_and_reject_zero() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&MANAGED_VARS);

        env::set_var("INFRACHAT_SERVER_SESSION_IDLE_SECS", "120");
        env::set_var("INFRACHAT_SERVER_MAX_SESSIONS", "8");
        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            ensure(config.server.session_idle_secs == 120, "idle timeout should come from env")?;
            ensure(config.server.max_sessions == 8, "session cap should come from env")?;

            env::set_var("INFRACHAT_SERVER_MAX_SESSIONS", "0");
            let rejected = matches!(
                AppConfig::load(LoadOptions::default()),
                Err(ConfigError::Validation(ref message)) if message.contains("server.max_sessions")
            );
            ensure(rejected, "a zero session cap should be rejected")
        })();

        clear_vars(&MANAGED_VARS);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&MANAGED_VARS);

        env::set_var("ANTHROPIC_API_KEY", "sk-ant-secret-value");
        env::set_var("AZURE_CLIENT_SECRET", "azure-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-ant-secret-value"), "debug output should not contain api key")?;
            ensure(
                !debug.contains("azure-secret-value"),
                "debug output should not contain client secret",
            )?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )
        })();

        clear_vars(&MANAGED_VARS);
        result
    }
}
