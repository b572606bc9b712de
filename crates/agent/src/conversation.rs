//! Slot-filling dialogue: keeps the chat history for one session and turns
//! each model reply into either a complete [`InfrastructureSpec`] or a request
//! for more details.

use std::sync::{Arc, OnceLock};

use infrachat_core::domain::specification::{InfrastructureSpec, RequiredField};
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::llm::{ChatMessage, CompletionRequest, LlmClient};

pub const DIALOGUE_TEMPERATURE: f32 = 0.2;
pub const DIALOGUE_MAX_TOKENS: u32 = 1024;

pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"You are an AI assistant that helps users create and manage cloud infrastructure on Azure using Terraform.
Your task is to interpret user requests for cloud infrastructure and translate them into detailed specifications.

Required details for any infrastructure request:
- Subscription Name
- Resource Group Name
- Resource Name
- Resource Type
- Location

When a user requests infrastructure, extract the following information:
1. Resource types (e.g., VMs, storage, network components)
2. Resource specifications (e.g., VM sizes, storage capacities)
3. Relationships between resources
4. Resource Group Name and Location
5. Subscription name

If ANY details are missing, you need to ask the user for these specific details before continuing.

When you have all required information, respond with a valid JSON object containing the infrastructure specifications.
Format your JSON like this:
```json
{
  "subscription_name": "...",
  "resource_group": "...",
  "resource_name": "...",
  "resource_type": "...",
  "location": "...",
  "additional_properties": { ... }
}
```"#;

pub const NO_DETAILS_MESSAGE: &str = "To generate the Terraform code, I need the following details:\n\n- Subscription Name\n- Resource Group Name\n- Resource Name\n- Resource Type\n- Location (Azure region)";

pub const MALFORMED_REPLY_MESSAGE: &str = "I need more information to generate the Terraform code. Please provide all of these details:\n\n- Subscription Name\n- Resource Group Name\n- Resource Name\n- Resource Type\n- Location (Azure region)";

fn asking_for_info_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)need.+?(?:information|details)|missing.+?(?:information|details)|provide.+?(?:information|details)",
        )
        .expect("asking-for-info pattern is valid")
    })
}

fn fenced_json_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)```json\s*(.*?)\s*```").expect("fenced json pattern is valid")
    })
}

/// Chat history of one session. Turns are committed in user/assistant pairs
/// so the history never ends on an unanswered user message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Conversation {
    system_prompt: String,
    turns: Vec<ChatMessage>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    pub fn new() -> Self {
        Self::with_system_prompt(EXTRACTION_SYSTEM_PROMPT)
    }

    pub fn with_system_prompt(system_prompt: impl Into<String>) -> Self {
        Self { system_prompt: system_prompt.into(), turns: Vec::new() }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn turns(&self) -> &[ChatMessage] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Drops every turn; the system prompt is kept.
    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// History plus a pending user message, as sent to the model.
    pub fn messages_with(&self, user_text: &str) -> Vec<ChatMessage> {
        let mut messages = self.turns.clone();
        messages.push(ChatMessage::user(user_text));
        messages
    }

    pub fn commit(&mut self, user_text: impl Into<String>, reply: impl Into<String>) {
        self.turns.push(ChatMessage::user(user_text));
        self.turns.push(ChatMessage::assistant(reply));
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExtractionOutcome {
    NeedsMoreInfo { missing_fields: Vec<RequiredField>, message: String },
    Complete(InfrastructureSpec),
    /// The model could not be reached; the history is unchanged.
    Failed(String),
}

impl ExtractionOutcome {
    pub fn needs_more_info(missing_fields: Vec<RequiredField>, message: impl Into<String>) -> Self {
        Self::NeedsMoreInfo { missing_fields, message: message.into() }
    }
}

pub struct DialogueExtractor {
    client: Arc<dyn LlmClient>,
    model: String,
}

impl DialogueExtractor {
    pub fn new(client: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self { client, model: model.into() }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn process_message(
        &self,
        conversation: &mut Conversation,
        user_text: &str,
    ) -> ExtractionOutcome {
        let request = CompletionRequest {
            model: self.model.clone(),
            max_tokens: DIALOGUE_MAX_TOKENS,
            messages: conversation.messages_with(user_text),
            system: Some(conversation.system_prompt().to_string()),
            temperature: Some(DIALOGUE_TEMPERATURE),
        };

        let reply = match self.client.complete(request).await {
            Ok(reply) => reply,
            Err(error) => {
                warn!(
                    event_name = "agent.dialogue.model_call_failed",
                    error = %error,
                    "dialogue model call failed"
                );
                return ExtractionOutcome::Failed(format!("Failed to call Claude API: {error}"));
            }
        };

        conversation.commit(user_text, reply.as_str());
        let outcome = interpret_reply(&reply);

        if let ExtractionOutcome::NeedsMoreInfo { missing_fields, .. } = &outcome {
            info!(
                event_name = "agent.dialogue.details_requested",
                missing_fields = %join_keys(missing_fields),
                turns = conversation.len(),
                "model asked for more details"
            );
        }

        outcome
    }
}

/// Classifies one model reply. Pure; the same text always yields the same
/// outcome.
pub fn interpret_reply(reply: &str) -> ExtractionOutcome {
    match extract_object(reply) {
        JsonCandidate::Object(map) => interpret_object(map),
        _ if asking_for_info_pattern().is_match(reply) => {
            let lowered = reply.to_lowercase();
            let mut missing: Vec<RequiredField> = RequiredField::ALL
                .into_iter()
                .filter(|field| lowered.contains(field.keyword()))
                .collect();
            if missing.is_empty() {
                missing = RequiredField::ALL.to_vec();
            }
            ExtractionOutcome::needs_more_info(missing, reply)
        }
        JsonCandidate::Absent => {
            let lowered = reply.to_lowercase();
            let mentioned: Vec<RequiredField> = RequiredField::ALL
                .into_iter()
                .filter(|field| lowered.contains(field.spoken_name()))
                .collect();
            if mentioned.is_empty() {
                ExtractionOutcome::needs_more_info(RequiredField::ALL.to_vec(), NO_DETAILS_MESSAGE)
            } else {
                ExtractionOutcome::needs_more_info(mentioned, reply)
            }
        }
        JsonCandidate::Malformed => {
            warn!(
                event_name = "agent.dialogue.malformed_json",
                "failed to parse JSON from model reply"
            );
            ExtractionOutcome::needs_more_info(RequiredField::ALL.to_vec(), MALFORMED_REPLY_MESSAGE)
        }
    }
}

// A parsed object decides missingness on its own; wording in the reply is ignored.
fn interpret_object(map: Map<String, Value>) -> ExtractionOutcome {
    let missing = RequiredField::missing_from(&map);
    if !missing.is_empty() {
        let labels = missing.iter().map(RequiredField::label).collect::<Vec<_>>().join(", ");
        return ExtractionOutcome::needs_more_info(
            missing,
            format!("I still need the following information: {labels}"),
        );
    }
    match InfrastructureSpec::from_map(map) {
        Ok(spec) => ExtractionOutcome::Complete(spec),
        Err(error) => ExtractionOutcome::needs_more_info(
            RequiredField::ALL.to_vec(),
            format!("I still need the following information: {error}"),
        ),
    }
}

enum JsonCandidate {
    Absent,
    Malformed,
    Object(Map<String, Value>),
}

fn extract_object(reply: &str) -> JsonCandidate {
    let fenced = fenced_json_pattern()
        .captures(reply)
        .and_then(|captures| captures.get(1))
        .map(|body| body.as_str());
    let braced = match (reply.find('{'), reply.rfind('}')) {
        (Some(start), Some(end)) if end > start => Some(&reply[start..=end]),
        _ => None,
    };

    if fenced.is_none() && braced.is_none() {
        return JsonCandidate::Absent;
    }

    fenced
        .into_iter()
        .chain(braced)
        .find_map(|candidate| match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        })
        .map_or(JsonCandidate::Malformed, JsonCandidate::Object)
}

fn join_keys(fields: &[RequiredField]) -> String {
    fields.iter().map(RequiredField::key).collect::<Vec<_>>().join(",")
}
