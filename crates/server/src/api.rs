//! JSON API for the chat front-end.
//!
//! - `POST /api/initialize`            - check credentials and probe the model
//! - `POST /api/process`               - one chat turn (`{"message": "..."}`)
//! - `GET  /api/terraform/code`        - generated files of the session
//! - `GET  /api/infrastructure/spec`   - completed specification of the session
//! - `POST /api/terraform/validate`    - run `terraform validate`
//! - `POST /api/terraform/plan`        - run `terraform plan`
//! - `POST /api/terraform/apply`       - run `terraform apply` (`{"auto_approve": bool}`)
//! - `POST /api/terraform/destroy`     - run `terraform destroy` (`{"auto_approve": bool}`)
//! - `POST /api/clear`                 - reset the conversation
//!
//! Every response is an [`ApiEnvelope`] and carries the session id both in the
//! body and in the `x-infrachat-session` header. Sessions are created by
//! `initialize` and `process`; `process` also initializes a new session on
//! demand. Every other route answers an unknown session as uninitialized.

use std::future::Future;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use infrachat_agent::runtime::{AgentResponse, AgentRuntime, Session};
use infrachat_core::config::AppConfig;
use infrachat_core::errors::{ApplicationError, InterfaceError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::{OnceCell, OwnedMutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

use crate::session::{normalize_session_id, SessionHandle, SessionStore};

pub const SESSION_HEADER: &str = "x-infrachat-session";

#[derive(Clone)]
pub struct ApiState {
    config: Arc<AppConfig>,
    sessions: Arc<SessionStore>,
    runtime: Arc<OnceCell<Arc<AgentRuntime>>>,
}

impl ApiState {
    /// The runtime is built on the first `initialize` call.
    pub fn new(config: Arc<AppConfig>) -> Self {
        let sessions = Arc::new(SessionStore::from_config(&config.server));
        Self { config, sessions, runtime: Arc::new(OnceCell::new()) }
    }

    pub fn with_runtime(config: Arc<AppConfig>, runtime: AgentRuntime) -> Self {
        let sessions = Arc::new(SessionStore::from_config(&config.server));
        Self { config, sessions, runtime: Arc::new(OnceCell::from(Arc::new(runtime))) }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.count()
    }

    async fn runtime_or_init(&self) -> Result<Arc<AgentRuntime>, ApplicationError> {
        let config = self.config.clone();
        self.runtime
            .get_or_try_init(|| async move { AgentRuntime::from_config(&config).map(Arc::new) })
            .await
            .cloned()
    }

    fn runtime(&self) -> Result<Arc<AgentRuntime>, ApplicationError> {
        self.runtime.get().cloned().ok_or(ApplicationError::NotInitialized)
    }
}

#[derive(Debug, Serialize)]
pub struct ApiEnvelope {
    pub session_id: String,
    #[serde(flatten)]
    pub response: AgentResponse,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProcessRequest {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApprovalRequest {
    #[serde(default)]
    pub auto_approve: bool,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/initialize", post(initialize))
        .route("/api/process", post(process))
        .route("/api/terraform/code", get(terraform_code))
        .route("/api/infrastructure/spec", get(infrastructure_spec))
        .route("/api/terraform/validate", post(validate))
        .route("/api/terraform/plan", post(plan))
        .route("/api/terraform/apply", post(apply))
        .route("/api/terraform/destroy", post(destroy))
        .route("/api/clear", post(clear))
        .with_state(state)
}

struct RequestContext {
    correlation_id: String,
    session_id: String,
    session: Option<SessionHandle>,
}

impl RequestContext {
    /// Attaches to the requested session, creating it when unknown.
    fn open(state: &ApiState, headers: &HeaderMap) -> Self {
        let (session_id, session) = state.sessions.open(requested_session(headers));
        Self { correlation_id: Uuid::new_v4().to_string(), session_id, session: Some(session) }
    }

    /// Attaches to an existing session. Unknown ids are echoed back but
    /// never stored.
    fn existing(state: &ApiState, headers: &HeaderMap) -> Self {
        let requested = requested_session(headers);
        let session = state.sessions.find(requested);
        let session_id =
            normalize_session_id(requested).unwrap_or_else(|| Uuid::new_v4().to_string());
        Self { correlation_id: Uuid::new_v4().to_string(), session_id, session }
    }

    fn session(&self) -> Result<SessionHandle, ApplicationError> {
        self.session.clone().ok_or(ApplicationError::NotInitialized)
    }

    fn respond(self, operation: &'static str, result: Result<AgentResponse, ApplicationError>) -> Response {
        let (status, response) = match result {
            Ok(response) => {
                info!(
                    event_name = "api.request.completed",
                    correlation_id = %self.correlation_id,
                    session_id = %self.session_id,
                    operation,
                    success = response.success,
                    "api request completed"
                );
                (StatusCode::OK, response)
            }
            Err(error) => {
                let interface = error.into_interface(self.correlation_id.clone());
                warn!(
                    event_name = "api.request.failed",
                    correlation_id = %self.correlation_id,
                    session_id = %self.session_id,
                    operation,
                    error = %interface,
                    "api request failed"
                );
                (status_for(&interface), AgentResponse::failure(interface.message()))
            }
        };

        let mut reply =
            (status, Json(ApiEnvelope { session_id: self.session_id.clone(), response }))
                .into_response();
        if let Ok(value) = HeaderValue::from_str(&self.session_id) {
            reply.headers_mut().insert(SESSION_HEADER, value);
        }
        reply
    }
}

fn requested_session(headers: &HeaderMap) -> Option<&str> {
    headers.get(SESSION_HEADER).and_then(|value| value.to_str().ok())
}

fn status_for(error: &InterfaceError) -> StatusCode {
    match error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// An empty body means "all defaults".
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApplicationError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|error| ApplicationError::InvalidInput(format!("Invalid JSON body: {error}")))
}

/// Locks the session for a terraform run. The guard is owned so the run can
/// move onto its own task.
async fn provisioning_target(
    state: &ApiState,
    context: &RequestContext,
) -> Result<(Arc<AgentRuntime>, OwnedMutexGuard<Session>), ApplicationError> {
    let runtime = state.runtime()?;
    let session = context.session()?.lock_owned().await;
    Ok((runtime, session))
}

/// Runs a terraform operation on a spawned task. A client that disconnects
/// stops waiting for the result but does not cancel the run.
async fn detached<F>(operation: &'static str, run: F) -> Result<AgentResponse, ApplicationError>
where
    F: Future<Output = Result<AgentResponse, ApplicationError>> + Send + 'static,
{
    tokio::spawn(run).await.map_err(|error| {
        ApplicationError::Provisioning(format!("terraform {operation} task failed: {error}"))
    })?
}

pub async fn initialize(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    let context = RequestContext::open(&state, &headers);
    let result = async {
        let runtime = state.runtime_or_init().await?;
        let session = context.session()?;
        let mut session = session.lock().await;
        runtime.initialize(&mut session).await
    }
    .await;
    context.respond("initialize", result)
}

pub async fn process(State(state): State<ApiState>, headers: HeaderMap, body: Bytes) -> Response {
    let context = RequestContext::open(&state, &headers);
    let result = async {
        let request: ProcessRequest = parse_body(&body)?;
        let session = context.session()?;
        let mut session = session.lock().await;
        let runtime = if session.is_initialized() {
            state.runtime()?
        } else {
            let runtime = state.runtime_or_init().await?;
            runtime.initialize(&mut session).await?;
            info!(
                event_name = "api.session.initialized_on_demand",
                correlation_id = %context.correlation_id,
                session_id = %context.session_id,
                "session initialized by first chat message"
            );
            runtime
        };
        runtime.process_user_request(&mut session, &request.message).await
    }
    .await;
    context.respond("process", result)
}

pub async fn terraform_code(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    let context = RequestContext::existing(&state, &headers);
    let result = async {
        let runtime = state.runtime()?;
        let session = context.session()?;
        let session = session.lock().await;
        runtime.terraform_code(&session)
    }
    .await;
    context.respond("terraform_code", result)
}

pub async fn infrastructure_spec(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    let context = RequestContext::existing(&state, &headers);
    let result = async {
        let runtime = state.runtime()?;
        let session = context.session()?;
        let session = session.lock().await;
        runtime.infrastructure_spec(&session)
    }
    .await;
    context.respond("infrastructure_spec", result)
}

pub async fn validate(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    let context = RequestContext::existing(&state, &headers);
    let result = async {
        let (runtime, session) = provisioning_target(&state, &context).await?;
        detached("validate", async move { runtime.validate(&session).await }).await
    }
    .await;
    context.respond("validate", result)
}

pub async fn plan(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    let context = RequestContext::existing(&state, &headers);
    let result = async {
        let (runtime, session) = provisioning_target(&state, &context).await?;
        detached("plan", async move { runtime.plan(&session).await }).await
    }
    .await;
    context.respond("plan", result)
}

pub async fn apply(State(state): State<ApiState>, headers: HeaderMap, body: Bytes) -> Response {
    let context = RequestContext::existing(&state, &headers);
    let result = async {
        let request: ApprovalRequest = parse_body(&body)?;
        let (runtime, session) = provisioning_target(&state, &context).await?;
        detached("apply", async move { runtime.apply(&session, request.auto_approve).await }).await
    }
    .await;
    context.respond("apply", result)
}

pub async fn destroy(State(state): State<ApiState>, headers: HeaderMap, body: Bytes) -> Response {
    let context = RequestContext::existing(&state, &headers);
    let result = async {
        let request: ApprovalRequest = parse_body(&body)?;
        let (runtime, session) = provisioning_target(&state, &context).await?;
        detached("destroy", async move { runtime.destroy(&session, request.auto_approve).await })
            .await
    }
    .await;
    context.respond("destroy", result)
}

pub async fn clear(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    let context = RequestContext::existing(&state, &headers);
    let result = async {
        let runtime = state.runtime()?;
        let session = context.session()?;
        let mut session = session.lock().await;
        runtime.clear_conversation(&mut session)
    }
    .await;
    context.respond("clear", result)
}
