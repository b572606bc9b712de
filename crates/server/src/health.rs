use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use infrachat_core::config::AppConfig;
use infrachat_terraform::runner::resolve_binary;
use serde::Serialize;

use crate::api::ApiState;

#[derive(Clone)]
pub struct HealthState {
    config: Arc<AppConfig>,
    api: ApiState,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub credentials: HealthCheck,
    pub terraform: HealthCheck,
    pub checked_at: String,
}

pub fn router(config: Arc<AppConfig>, api: ApiState) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { config, api })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let credentials = credentials_check(&state.config);
    let terraform = terraform_check(&state.config);
    let ready = credentials.status == "ready" && terraform.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: format!("infrachat-server running with {} session(s)", state.api.session_count()),
        },
        credentials,
        terraform,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

fn credentials_check(config: &AppConfig) -> HealthCheck {
    let missing = config.missing_credentials();
    if missing.is_empty() {
        HealthCheck { status: "ready", detail: "required credentials are configured".to_string() }
    } else {
        HealthCheck {
            status: "degraded",
            detail: format!("missing environment variables: {}", missing.join(", ")),
        }
    }
}

fn terraform_check(config: &AppConfig) -> HealthCheck {
    match resolve_binary(&config.terraform.binary) {
        Ok(path) => HealthCheck { status: "ready", detail: format!("terraform found at {}", path.display()) },
        Err(error) => HealthCheck { status: "degraded", detail: error.to_string() },
    }
}
