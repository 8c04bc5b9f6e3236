use serde::{Deserialize, Serialize};

use crate::domain::ticket::{TicketCategory, TicketStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketEvent {
    Submit,
    Confirm,
    Approve,
    Cancel,
    /// Status derived from an external approval callback.
    Sync(TicketStatus),
}

impl TicketEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Confirm => "confirm",
            Self::Approve => "approve",
            Self::Cancel => "cancel",
            Self::Sync(_) => "sync",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionContext {
    pub category: TicketCategory,
    /// Internal transfer whose source and destination units match.
    pub same_unit: bool,
}

impl TransitionContext {
    pub fn new(category: TicketCategory, same_unit: bool) -> Self {
        Self { category, same_unit }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketAction {
    DispatchApproval,
    ApplyMachineEffects,
    ReconcileInventory,
}

impl TicketAction {
    pub fn mutates_machines(&self) -> bool {
        matches!(self, Self::ApplyMachineEffects | Self::ReconcileInventory)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: TicketStatus,
    pub to: TicketStatus,
    pub event: TicketEvent,
    pub actions: Vec<TicketAction>,
}

impl TransitionOutcome {
    pub fn is_noop(&self) -> bool {
        self.from == self.to && self.actions.is_empty()
    }

    pub fn completes(&self) -> bool {
        self.from != TicketStatus::Completed && self.to == TicketStatus::Completed
    }
}
