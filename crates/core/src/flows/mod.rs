pub mod engine;
pub mod states;

pub use engine::{FlowTransitionError, SessionFlow};
pub use states::{SessionEvent, SessionPhase, TransitionOutcome};
