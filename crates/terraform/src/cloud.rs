//! Azure Resource Manager handle built from service-principal credentials.
//!
//! The handle is created at startup but only the `doctor` command probes it;
//! provisioning itself goes through `terraform` with `ARM_*` variables.

use std::time::Duration;

use infrachat_core::config::AzureConfig;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_AUTHORITY_URL: &str = "https://login.microsoftonline.com";
pub const DEFAULT_MANAGEMENT_URL: &str = "https://management.azure.com";
const SUBSCRIPTIONS_API_VERSION: &str = "2022-12-01";

#[derive(Debug, Error)]
pub enum CloudError {
    #[error("missing Azure credential: {0}")]
    MissingCredential(&'static str),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("token request failed (status {status}): {message}")]
    Authentication { status: u16, message: String },
    #[error("resource manager request failed (status {status}): {message}")]
    Api { status: u16, message: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub subscription_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub state: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug)]
pub struct ResourceManagementClient {
    http: Client,
    authority_url: String,
    management_url: String,
    subscription_id: String,
    tenant_id: String,
    client_id: String,
    client_secret: SecretString,
}

impl ResourceManagementClient {
    pub fn from_config(azure: &AzureConfig) -> Result<Self, CloudError> {
        let required = |value: &Option<String>, name: &'static str| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
                .ok_or(CloudError::MissingCredential(name))
        };

        let subscription_id = required(&azure.subscription_id, "AZURE_SUBSCRIPTION_ID")?;
        let tenant_id = required(&azure.tenant_id, "AZURE_TENANT_ID")?;
        let client_id = required(&azure.client_id, "AZURE_CLIENT_ID")?;
        let client_secret = azure
            .client_secret
            .clone()
            .filter(|secret| !secret.expose_secret().trim().is_empty())
            .ok_or(CloudError::MissingCredential("AZURE_CLIENT_SECRET"))?;

        Ok(Self {
            http: Client::builder().timeout(Duration::from_secs(30)).build()?,
            authority_url: DEFAULT_AUTHORITY_URL.to_string(),
            management_url: DEFAULT_MANAGEMENT_URL.to_string(),
            subscription_id,
            tenant_id,
            client_id,
            client_secret,
        })
    }

    pub fn with_endpoints(
        mut self,
        authority_url: impl Into<String>,
        management_url: impl Into<String>,
    ) -> Self {
        self.authority_url = authority_url.into().trim_end_matches('/').to_string();
        self.management_url = management_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    async fn access_token(&self) -> Result<String, CloudError> {
        let url = format!("{}/{}/oauth2/v2.0/token", self.authority_url, self.tenant_id);
        let scope = format!("{}/.default", self.management_url);
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
            ("scope", scope.as_str()),
        ];

        let response = self.http.post(&url).form(&form).send().await?;
        let status = response.status().as_u16();
        if status >= 400 {
            let message = response.text().await.unwrap_or_else(|_| "(no body)".to_string());
            return Err(CloudError::Authentication { status, message });
        }

        let token: TokenResponse = response.json().await?;
        Ok(token.access_token)
    }

    /// Reads the configured subscription; proves the credentials work.
    pub async fn get_subscription(&self) -> Result<Subscription, CloudError> {
        let token = self.access_token().await?;
        let url = format!(
            "{}/subscriptions/{}?api-version={SUBSCRIPTIONS_API_VERSION}",
            self.management_url, self.subscription_id
        );

        let response = self.http.get(&url).bearer_auth(token).send().await?;
        let status = response.status().as_u16();
        if status >= 400 {
            let message = response.text().await.unwrap_or_else(|_| "(no body)".to_string());
            return Err(CloudError::Api { status, message });
        }

        Ok(response.json().await?)
    }
}
