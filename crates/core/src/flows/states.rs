use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    AwaitingRequest,
    GatheringDetails,
    SpecificationReady,
    CodeGenerated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEvent {
    DetailsRequested,
    SpecificationCompleted,
    CodeGenerated,
    GenerationFailed,
    ConversationCleared,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: SessionPhase,
    pub to: SessionPhase,
    pub event: SessionEvent,
}
