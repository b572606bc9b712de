use std::sync::Arc;

use infrachat_core::config::{AppConfig, ConfigError, LoadOptions};
use infrachat_terraform::cloud::ResourceManagementClient;
use thiserror::Error;
use tracing::{info, warn};

use crate::api::ApiState;

pub struct Application {
    pub config: Arc<AppConfig>,
    pub api_state: ApiState,
    /// Built eagerly from the Azure credentials; the chat flow provisions
    /// through `terraform` and does not call it.
    pub resource_manager: Option<ResourceManagementClient>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let missing = config.missing_credentials();
    if !missing.is_empty() {
        warn!(
            event_name = "system.bootstrap.credentials_missing",
            correlation_id = "bootstrap",
            missing = %missing.join(","),
            "required credentials are missing; initialize will fail until they are set"
        );
    }

    let resource_manager = match ResourceManagementClient::from_config(&config.azure) {
        Ok(client) => Some(client),
        Err(error) => {
            info!(
                event_name = "system.bootstrap.resource_manager_skipped",
                correlation_id = "bootstrap",
                reason = %error,
                "azure resource manager handle not created"
            );
            None
        }
    };

    let config = Arc::new(config);
    let api_state = ApiState::new(config.clone());

    Ok(Application { config, api_state, resource_manager })
}
