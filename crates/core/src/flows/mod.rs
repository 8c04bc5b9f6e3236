pub mod engine;
pub mod states;

pub use engine::{StandardTicketFlow, TicketFlowDefinition, TicketStateMachine, TicketTransitionError};
pub use states::{TicketAction, TicketEvent, TransitionContext, TransitionOutcome};
