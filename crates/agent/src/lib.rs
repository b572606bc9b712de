//! Agent runtime: turns a conversation into an infrastructure specification,
//! generates Terraform for it, and drives the provisioning runner.
//!
//! # Architecture
//!
//! 1. **Dialogue** (`conversation`) - slot-filling chat until the model
//!    returns all five required fields as JSON
//! 2. **Generation** (`generator`) - prompt the model for Terraform and split
//!    the reply into files
//! 3. **Provisioning** (`runtime`) - run `terraform` against the stored files
//!
//! The model only translates. Completeness of a specification and the set of
//! operations that may run are decided here, not by the model.

pub mod conversation;
pub mod generator;
pub mod llm;
pub mod runtime;

pub use conversation::{interpret_reply, Conversation, DialogueExtractor, ExtractionOutcome};
pub use generator::{GeneratedCode, GenerationError, TerraformGenerator};
pub use llm::{AnthropicClient, LlmClient, LlmError};
pub use runtime::{AgentResponse, AgentRuntime, Session};
