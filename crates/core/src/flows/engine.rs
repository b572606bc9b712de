use thiserror::Error;

use crate::flows::states::{SessionEvent, SessionPhase, TransitionOutcome};

/// Dialogue phases of one session: a request is refined until the model
/// returns a complete specification, which is then turned into code.
#[derive(Clone, Copy, Debug, Default)]
pub struct SessionFlow;

impl SessionFlow {
    pub fn initial_phase(&self) -> SessionPhase {
        SessionPhase::AwaitingRequest
    }

    pub fn apply(
        &self,
        current: SessionPhase,
        event: SessionEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        use SessionEvent::{
            CodeGenerated, ConversationCleared, DetailsRequested, GenerationFailed,
            SpecificationCompleted,
        };
        use SessionPhase::{AwaitingRequest, GatheringDetails, SpecificationReady};

        let to = match (current, event) {
            (_, ConversationCleared) => AwaitingRequest,
            (SpecificationReady, CodeGenerated) => SessionPhase::CodeGenerated,
            (SpecificationReady, GenerationFailed) => AwaitingRequest,
            (SpecificationReady, _) => {
                return Err(FlowTransitionError::InvalidTransition { state: current, event });
            }
            (_, DetailsRequested) => GatheringDetails,
            (_, SpecificationCompleted) => SpecificationReady,
            _ => return Err(FlowTransitionError::InvalidTransition { state: current, event }),
        };

        Ok(TransitionOutcome { from: current, to, event })
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: SessionPhase, event: SessionEvent },
}
