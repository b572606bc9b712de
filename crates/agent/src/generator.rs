use std::sync::Arc;

use infrachat_core::domain::file_set::FileSet;
use infrachat_core::domain::specification::InfrastructureSpec;
use infrachat_core::splitter::split_document;
use tera::{Context, Tera};
use tracing::info;

use crate::llm::{ChatMessage, CompletionRequest, LlmClient, LlmError};

pub const GENERATION_SYSTEM_PROMPT: &str =
    "You are an expert Terraform developer specializing in Azure infrastructure.";
pub const GENERATION_TEMPERATURE: f32 = 0.2;
pub const GENERATION_MAX_TOKENS: u32 = 4000;
pub const FILE_LAYOUT: [&str; 4] = ["provider.tf", "variables.tf", "main.tf", "outputs.tf"];

const PROMPT_TEMPLATE: &str = "generate_terraform.tera";

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("template error: {0}")]
    Template(String),
    #[error(transparent)]
    Model(#[from] LlmError),
    #[error("model returned an empty reply")]
    EmptyReply,
}

/// Model reply and the files recovered from it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedCode {
    pub document: String,
    pub files: FileSet,
}

pub struct TerraformGenerator {
    client: Arc<dyn LlmClient>,
    model: String,
    templates: Tera,
}

impl TerraformGenerator {
    pub fn new(client: Arc<dyn LlmClient>, model: impl Into<String>) -> Result<Self, GenerationError> {
        let mut templates = Tera::default();
        templates
            .add_raw_template(PROMPT_TEMPLATE, include_str!("../templates/generate_terraform.tera"))
            .map_err(|error| GenerationError::Template(error.to_string()))?;

        Ok(Self { client, model: model.into(), templates })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn render_prompt(&self, spec: &InfrastructureSpec) -> Result<String, GenerationError> {
        let mut context = Context::new();
        context.insert("specification", &spec.to_pretty_json());
        context.insert("file_layout", &FILE_LAYOUT);

        self.templates
            .render(PROMPT_TEMPLATE, &context)
            .map_err(|error| GenerationError::Template(error.to_string()))
    }

    pub async fn generate(&self, spec: &InfrastructureSpec) -> Result<GeneratedCode, GenerationError> {
        let prompt = self.render_prompt(spec)?;
        let request = CompletionRequest {
            model: self.model.clone(),
            max_tokens: GENERATION_MAX_TOKENS,
            messages: vec![ChatMessage::user(prompt)],
            system: Some(GENERATION_SYSTEM_PROMPT.to_string()),
            temperature: Some(GENERATION_TEMPERATURE),
        };

        let document = self.client.complete(request).await?;
        if document.trim().is_empty() {
            return Err(GenerationError::EmptyReply);
        }

        let files = split_document(&document);
        info!(
            event_name = "agent.generation.completed",
            resource_type = %spec.resource_type,
            file_count = files.len(),
            "terraform code generated"
        );

        Ok(GeneratedCode { document, files })
    }
}
