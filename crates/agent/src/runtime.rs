use std::sync::Arc;

use infrachat_core::config::AppConfig;
use infrachat_core::domain::file_set::FileSet;
use infrachat_core::domain::operation::Operation;
use infrachat_core::domain::specification::{InfrastructureSpec, RequiredField};
use infrachat_core::errors::{ApplicationError, DomainError};
use infrachat_core::flows::{SessionEvent, SessionFlow, SessionPhase};
use infrachat_terraform::runner::{RunnerError, TerraformRunner};
use serde::Serialize;
use tracing::{info, warn};

use crate::conversation::{Conversation, DialogueExtractor, ExtractionOutcome};
use crate::generator::TerraformGenerator;
use crate::llm::{AnthropicClient, ChatMessage, CompletionRequest, LlmClient};

pub const PROBE_SYSTEM_PROMPT: &str = "You are a helpful assistant.";
pub const PROBE_MAX_TOKENS: u32 = 10;

/// Uniform reply for every session operation.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AgentResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub needs_more_info: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_fields: Option<Vec<RequiredField>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub infrastructure_spec: Option<InfrastructureSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terraform_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terraform_files: Option<FileSet>,
}

impl AgentResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into(), ..Self::default() }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into(), ..Self::default() }
    }

    fn with_files(mut self, files: &FileSet) -> Self {
        self.terraform_code = Some(files.render());
        self.terraform_files = Some(files.clone());
        self
    }
}

/// Conversational state owned by one client. The runtime never keeps any of
/// this itself, so independent sessions cannot see each other's code.
#[derive(Clone, Debug, Default)]
pub struct Session {
    initialized: bool,
    phase: SessionPhase,
    conversation: Conversation,
    specification: Option<InfrastructureSpec>,
    files: Option<FileSet>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn specification(&self) -> Option<&InfrastructureSpec> {
        self.specification.as_ref()
    }

    pub fn files(&self) -> Option<&FileSet> {
        self.files.as_ref()
    }

    fn advance(&mut self, flow: &SessionFlow, event: SessionEvent) -> Result<(), ApplicationError> {
        let outcome = flow.apply(self.phase, event).map_err(DomainError::from)?;
        self.phase = outcome.to;
        Ok(())
    }

    fn require_initialized(&self) -> Result<(), ApplicationError> {
        if self.initialized {
            Ok(())
        } else {
            Err(ApplicationError::NotInitialized)
        }
    }

    fn require_files(&self) -> Result<&FileSet, ApplicationError> {
        self.require_initialized()?;
        self.files.as_ref().filter(|files| !files.is_empty()).ok_or(ApplicationError::NoGeneratedCode)
    }
}

pub struct AgentRuntime {
    client: Arc<dyn LlmClient>,
    extractor: DialogueExtractor,
    generator: TerraformGenerator,
    runner: TerraformRunner,
    flow: SessionFlow,
}

impl AgentRuntime {
    pub fn new(
        client: Arc<dyn LlmClient>,
        runner: TerraformRunner,
        dialogue_model: impl Into<String>,
        generation_model: impl Into<String>,
    ) -> Result<Self, ApplicationError> {
        let extractor = DialogueExtractor::new(client.clone(), dialogue_model);
        let generator = TerraformGenerator::new(client.clone(), generation_model)
            .map_err(|error| ApplicationError::Configuration(error.to_string()))?;

        Ok(Self { client, extractor, generator, runner, flow: SessionFlow })
    }

    /// Builds the production runtime. Fails when required credentials are
    /// absent or the `terraform` binary cannot be resolved.
    pub fn from_config(config: &AppConfig) -> Result<Self, ApplicationError> {
        let missing = config.missing_credentials();
        if !missing.is_empty() {
            return Err(ApplicationError::Configuration(format!(
                "Missing required environment variables: {}",
                missing.join(", ")
            )));
        }

        let client = AnthropicClient::from_config(&config.llm)
            .map_err(|error| ApplicationError::Configuration(format!("Failed to initialize agent: {error}")))?;
        let runner = TerraformRunner::from_config(&config.terraform, &config.azure)
            .map_err(|error| ApplicationError::Configuration(format!("Failed to initialize agent: {error}")))?;

        Self::new(Arc::new(client), runner, config.llm.model.clone(), config.llm.generation_model())
    }

    pub fn dialogue_model(&self) -> &str {
        self.extractor.model()
    }

    /// Sends a tiny request to prove the key and model work, then marks the
    /// session ready.
    pub async fn initialize(&self, session: &mut Session) -> Result<AgentResponse, ApplicationError> {
        let model = self.dialogue_model().to_string();
        let probe = CompletionRequest {
            model: model.clone(),
            max_tokens: PROBE_MAX_TOKENS,
            messages: vec![ChatMessage::user("Hello")],
            system: Some(PROBE_SYSTEM_PROMPT.to_string()),
            temperature: None,
        };

        if let Err(error) = self.client.complete(probe).await {
            warn!(event_name = "agent.initialize.probe_failed", error = %error, "model probe failed");
            return Err(ApplicationError::Upstream(format!("Failed to connect to Claude API: {error}")));
        }

        session.initialized = true;
        info!(event_name = "agent.initialize.completed", model = %model, "agent initialized");
        Ok(AgentResponse::ok(format!("Agent initialized successfully with Claude model: {model}")))
    }

    pub async fn process_user_request(
        &self,
        session: &mut Session,
        message: &str,
    ) -> Result<AgentResponse, ApplicationError> {
        session.require_initialized()?;
        if message.trim().is_empty() {
            return Err(ApplicationError::InvalidInput("No message provided".to_string()));
        }

        // The session is only written after the last await, so a request
        // dropped mid-call leaves its phase and history as they were.
        let mut conversation = session.conversation.clone();
        match self.extractor.process_message(&mut conversation, message).await {
            ExtractionOutcome::Failed(reason) => Err(ApplicationError::Upstream(format!(
                "Failed to interpret infrastructure requirements: {reason}"
            ))),
            ExtractionOutcome::NeedsMoreInfo { missing_fields, message } => {
                session.advance(&self.flow, SessionEvent::DetailsRequested)?;
                session.conversation = conversation;
                Ok(AgentResponse {
                    success: false,
                    message,
                    needs_more_info: Some(true),
                    missing_fields: Some(missing_fields),
                    ..AgentResponse::default()
                })
            }
            ExtractionOutcome::Complete(spec) => {
                let generated = self.generator.generate(&spec).await;

                session.advance(&self.flow, SessionEvent::SpecificationCompleted)?;
                session.conversation = conversation;
                session.specification = Some(spec.clone());

                let generated = match generated {
                    Ok(generated) => generated,
                    Err(error) => {
                        session.advance(&self.flow, SessionEvent::GenerationFailed)?;
                        warn!(
                            event_name = "agent.generation.failed",
                            error = %error,
                            "terraform generation failed"
                        );
                        return Err(ApplicationError::Upstream(format!(
                            "Failed to generate Terraform code: {error}"
                        )));
                    }
                };

                session.advance(&self.flow, SessionEvent::CodeGenerated)?;
                let response = AgentResponse {
                    infrastructure_spec: Some(spec),
                    ..AgentResponse::ok("Successfully generated Terraform code")
                }
                .with_files(&generated.files);
                session.files = Some(generated.files);
                Ok(response)
            }
        }
    }

    pub fn terraform_code(&self, session: &Session) -> Result<AgentResponse, ApplicationError> {
        let files = session.require_files()?;
        Ok(AgentResponse::ok("Terraform code retrieved").with_files(files))
    }

    pub fn infrastructure_spec(&self, session: &Session) -> Result<AgentResponse, ApplicationError> {
        session.require_initialized()?;
        let spec = session.specification.clone().ok_or(ApplicationError::NoSpecification)?;
        Ok(AgentResponse {
            infrastructure_spec: Some(spec),
            ..AgentResponse::ok("Infrastructure specification retrieved")
        })
    }

    pub async fn validate(&self, session: &Session) -> Result<AgentResponse, ApplicationError> {
        self.run_operation(session, Operation::Validate, false).await
    }

    pub async fn plan(&self, session: &Session) -> Result<AgentResponse, ApplicationError> {
        self.run_operation(session, Operation::Plan, false).await
    }

    pub async fn apply(
        &self,
        session: &Session,
        auto_approve: bool,
    ) -> Result<AgentResponse, ApplicationError> {
        self.run_operation(session, Operation::Apply, auto_approve).await
    }

    pub async fn destroy(
        &self,
        session: &Session,
        auto_approve: bool,
    ) -> Result<AgentResponse, ApplicationError> {
        self.run_operation(session, Operation::Destroy, auto_approve).await
    }

    async fn run_operation(
        &self,
        session: &Session,
        operation: Operation,
        auto_approve: bool,
    ) -> Result<AgentResponse, ApplicationError> {
        let files = session.require_files()?;
        let result = self.runner.run(files, operation, auto_approve).await.map_err(runner_error)?;

        Ok(AgentResponse { success: result.success, message: result.message(), ..AgentResponse::default() })
    }

    pub fn clear_conversation(&self, session: &mut Session) -> Result<AgentResponse, ApplicationError> {
        session.require_initialized()?;
        session.conversation.clear();
        session.advance(&self.flow, SessionEvent::ConversationCleared)?;
        Ok(AgentResponse::ok("Conversation history cleared"))
    }
}

fn runner_error(error: RunnerError) -> ApplicationError {
    match error {
        RunnerError::Domain(error) => ApplicationError::Domain(error),
        RunnerError::NoFiles => ApplicationError::NoGeneratedCode,
        error @ RunnerError::BinaryNotFound { .. } => ApplicationError::Configuration(error.to_string()),
        error @ (RunnerError::Workspace(_) | RunnerError::Spawn { .. }) => {
            ApplicationError::Provisioning(error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use infrachat_core::domain::specification::RequiredField;
    use infrachat_core::errors::ApplicationError;
    use infrachat_core::flows::SessionPhase;
    use infrachat_terraform::runner::{CommandExecutor, CommandOutput, CommandSpec, TerraformRunner};

    use super::{AgentRuntime, Session};
    use crate::llm::{CompletionRequest, LlmClient, LlmError};

    struct ScriptedClient {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        async fn complete(&self, _request: CompletionRequest) -> Result<String, LlmError> {
            self.replies
                .lock()
                .expect("replies lock")
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::InvalidResponse("script exhausted".to_string())))
        }
    }

    /// Replies in order; a `None` entry never resolves.
    struct StallingClient {
        replies: Mutex<VecDeque<Option<String>>>,
    }

    #[async_trait]
    impl LlmClient for StallingClient {
        async fn complete(&self, _request: CompletionRequest) -> Result<String, LlmError> {
            let next = self.replies.lock().expect("replies lock").pop_front();
            match next {
                Some(Some(reply)) => Ok(reply),
                Some(None) => std::future::pending().await,
                None => Err(LlmError::InvalidResponse("script exhausted".to_string())),
            }
        }
    }

    struct ScriptedExecutor {
        outputs: Mutex<VecDeque<CommandOutput>>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl CommandExecutor for ScriptedExecutor {
        async fn execute(&self, command: &CommandSpec) -> std::io::Result<CommandOutput> {
            self.calls.lock().expect("calls lock").push(command.args.clone());
            Ok(self.outputs.lock().expect("outputs lock").pop_front().unwrap_or(CommandOutput {
                exit_code: Some(0),
                stdout: String::new(),
                stderr: String::new(),
            }))
        }
    }

    const SPEC_REPLY: &str = "```json\n{\"subscription_name\": \"platform-prod\", \"resource_group\": \"rg-web\", \"resource_name\": \"webstore01\", \"resource_type\": \"storage_account\", \"location\": \"westeurope\"}\n```";
    const CODE_REPLY: &str = "# provider.tf\n```hcl\nprovider \"azurerm\" {\n  features {}\n}\n```\n# main.tf\n```hcl\nresource \"azurerm_storage_account\" \"sa\" {}\n```";

    fn runtime(
        replies: Vec<Result<String, LlmError>>,
        outputs: Vec<CommandOutput>,
    ) -> (AgentRuntime, Arc<ScriptedExecutor>) {
        let client = Arc::new(ScriptedClient { replies: Mutex::new(replies.into()) });
        let executor = Arc::new(ScriptedExecutor {
            outputs: Mutex::new(outputs.into()),
            calls: Mutex::new(Vec::new()),
        });
        let runner = TerraformRunner::new("/usr/bin/terraform", executor.clone());
        let runtime = AgentRuntime::new(client, runner, "claude-3-sonnet-20240229", "claude-3-opus-20240229")
            .expect("runtime");
        (runtime, executor)
    }

    fn ok(text: &str) -> Result<String, LlmError> {
        Ok(text.to_string())
    }

    #[tokio::test]
    async fn operations_require_initialization() {
        let (runtime, _) = runtime(vec![], vec![]);
        let mut session = Session::new();

        assert_eq!(
            runtime.process_user_request(&mut session, "a storage account").await,
            Err(ApplicationError::NotInitialized)
        );
        assert_eq!(runtime.terraform_code(&session), Err(ApplicationError::NotInitialized));
        assert_eq!(runtime.validate(&session).await, Err(ApplicationError::NotInitialized));
        assert_eq!(runtime.clear_conversation(&mut session), Err(ApplicationError::NotInitialized));
    }

    #[tokio::test]
    async fn initialize_reports_model_and_probe_failures() {
        let (runtime, _) = runtime(vec![ok("Hi"), Err(LlmError::ApiError { status: 401, message: "bad key".to_string() })], vec![]);

        let mut session = Session::new();
        let response = runtime.initialize(&mut session).await.expect("initialized");
        assert!(response.success);
        assert_eq!(
            response.message,
            "Agent initialized successfully with Claude model: claude-3-sonnet-20240229"
        );
        assert!(session.is_initialized());

        let mut other = Session::new();
        match runtime.initialize(&mut other).await {
            Err(ApplicationError::Upstream(message)) => {
                assert!(message.starts_with("Failed to connect to Claude API:"))
            }
            result => panic!("expected upstream failure, got {result:?}"),
        }
        assert!(!other.is_initialized());
    }

    #[tokio::test]
    async fn full_flow_from_question_to_validated_code() {
        let (runtime, executor) = runtime(
            vec![ok("Hi"), ok("I need more details: which location?"), ok(SPEC_REPLY), ok(CODE_REPLY)],
            vec![],
        );
        let mut session = Session::new();
        runtime.initialize(&mut session).await.expect("initialized");

        let blank = runtime.process_user_request(&mut session, "   ").await;
        assert_eq!(blank, Err(ApplicationError::InvalidInput("No message provided".to_string())));

        let question = runtime.process_user_request(&mut session, "storage account").await.expect("reply");
        assert!(!question.success);
        assert_eq!(question.needs_more_info, Some(true));
        assert_eq!(question.missing_fields, Some(vec![RequiredField::Location]));
        assert_eq!(session.phase(), SessionPhase::GatheringDetails);

        let generated = runtime.process_user_request(&mut session, "westeurope").await.expect("code");
        assert!(generated.success);
        assert_eq!(generated.message, "Successfully generated Terraform code");
        assert_eq!(generated.terraform_files.as_ref().map(|files| files.len()), Some(2));
        assert!(generated
            .terraform_code
            .as_deref()
            .is_some_and(|code| code.starts_with("# main.tf\nresource")));
        assert_eq!(session.phase(), SessionPhase::CodeGenerated);

        let spec = runtime.infrastructure_spec(&session).expect("spec");
        assert_eq!(spec.infrastructure_spec.map(|spec| spec.location), Some("westeurope".to_string()));

        let validated = runtime.validate(&session).await.expect("validated");
        assert!(validated.success);
        let calls = executor.calls.lock().expect("calls lock").clone();
        assert_eq!(calls, vec![vec!["init".to_string()], vec!["validate".to_string()]]);
    }

    #[tokio::test]
    async fn generation_failure_is_an_error_and_leaves_no_files() {
        let (runtime, _) = runtime(
            vec![ok("Hi"), ok(SPEC_REPLY), Err(LlmError::ApiError { status: 529, message: "overloaded".to_string() })],
            vec![],
        );
        let mut session = Session::new();
        runtime.initialize(&mut session).await.expect("initialized");

        let result = runtime.process_user_request(&mut session, "everything at once").await;
        assert!(matches!(result, Err(ApplicationError::Upstream(ref message)) if message.starts_with("Failed to generate Terraform code")));
        assert!(session.files().is_none());
        assert!(session.specification().is_some());
        assert_eq!(session.phase(), SessionPhase::AwaitingRequest);
        assert_eq!(runtime.terraform_code(&session), Err(ApplicationError::NoGeneratedCode));
    }

    #[tokio::test]
    async fn abandoned_generation_leaves_session_untouched() {
        let replies = [
            Some("Hi"),
            Some("I need more details: which location?"),
            Some(SPEC_REPLY),
            None,
            Some(SPEC_REPLY),
            Some(CODE_REPLY),
        ];
        let client = Arc::new(StallingClient {
            replies: Mutex::new(replies.iter().map(|reply| reply.map(str::to_string)).collect()),
        });
        let runner = TerraformRunner::new("/usr/bin/terraform", Arc::new(ScriptedExecutor {
            outputs: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }));
        let runtime = AgentRuntime::new(client, runner, "claude-3-sonnet-20240229", "claude-3-opus-20240229")
            .expect("runtime");
        let mut session = Session::new();
        runtime.initialize(&mut session).await.expect("initialized");
        runtime.process_user_request(&mut session, "storage account").await.expect("question");
        assert_eq!(session.conversation().len(), 2);

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            runtime.process_user_request(&mut session, "westeurope"),
        )
        .await;
        assert!(abandoned.is_err(), "generation should still be pending");
        assert_eq!(session.phase(), SessionPhase::GatheringDetails);
        assert_eq!(session.conversation().len(), 2);
        assert!(session.specification().is_none());

        let generated = runtime.process_user_request(&mut session, "westeurope").await.expect("code");
        assert!(generated.success);
        assert_eq!(session.phase(), SessionPhase::CodeGenerated);
        assert_eq!(session.conversation().len(), 4);
    }

    #[tokio::test]
    async fn failed_model_call_is_reported_and_history_kept_clean() {
        let (runtime, _) = runtime(vec![ok("Hi")], vec![]);
        let mut session = Session::new();
        runtime.initialize(&mut session).await.expect("initialized");

        match runtime.process_user_request(&mut session, "vm please").await {
            Err(ApplicationError::Upstream(message)) => {
                assert!(message.starts_with("Failed to interpret infrastructure requirements:"))
            }
            result => panic!("expected upstream failure, got {result:?}"),
        }
        assert!(session.conversation().is_empty());
    }

    #[tokio::test]
    async fn provisioning_failure_is_a_failed_envelope() {
        let (runtime, _) = runtime(
            vec![ok("Hi"), ok(SPEC_REPLY), ok(CODE_REPLY)],
            vec![CommandOutput { exit_code: Some(1), stdout: String::new(), stderr: "no credentials".to_string() }],
        );
        let mut session = Session::new();
        runtime.initialize(&mut session).await.expect("initialized");
        runtime.process_user_request(&mut session, "everything").await.expect("code");

        let response = runtime.apply(&session, true).await.expect("envelope");
        assert!(!response.success);
        assert_eq!(response.message, "Terraform init failed: no credentials");
    }

    #[tokio::test]
    async fn clearing_keeps_generated_code() {
        let (runtime, _) = runtime(vec![ok("Hi"), ok(SPEC_REPLY), ok(CODE_REPLY)], vec![]);
        let mut session = Session::new();
        runtime.initialize(&mut session).await.expect("initialized");
        runtime.process_user_request(&mut session, "everything").await.expect("code");

        let cleared = runtime.clear_conversation(&mut session).expect("cleared");
        assert_eq!(cleared.message, "Conversation history cleared");
        assert!(session.conversation().is_empty());
        assert_eq!(session.phase(), SessionPhase::AwaitingRequest);
        assert!(runtime.terraform_code(&session).is_ok());
    }

    #[test]
    fn infrastructure_spec_requires_a_completed_dialogue() {
        let (runtime, _) = runtime(vec![], vec![]);
        let mut session = Session::new();
        session.initialized = true;
        assert_eq!(runtime.infrastructure_spec(&session), Err(ApplicationError::NoSpecification));
    }
}
