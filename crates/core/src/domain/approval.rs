use serde::{Deserialize, Serialize};

use crate::domain::identity::UserId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepDecision {
    Pending,
    Approved,
    Rejected,
}

impl StepDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub approver: UserId,
    pub display_name: String,
    /// Tier index; lower tiers approve first and peers share a tier.
    pub step_flow: u32,
    pub position: u32,
    pub is_final: bool,
    /// Binding step kept in the local flow. Acknowledgement-only steps are
    /// dispatched but never stored.
    pub is_flow: bool,
    /// Set for approvers that joined after the flow was first computed.
    pub is_forward: bool,
    pub decision: StepDecision,
    pub status_text: Option<String>,
}

impl ApprovalStep {
    pub fn pending(
        approver: UserId,
        display_name: impl Into<String>,
        step_flow: u32,
        is_final: bool,
        is_flow: bool,
    ) -> Self {
        Self {
            approver,
            display_name: display_name.into(),
            step_flow,
            position: 0,
            is_final,
            is_flow,
            is_forward: false,
            decision: StepDecision::Pending,
            status_text: None,
        }
    }
}

/// Ordered approval steps attached to a ticket.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApprovalFlow(pub Vec<ApprovalStep>);

impl ApprovalFlow {
    /// Builds a flow in precedence order (tier, then ordinal) and renumbers
    /// positions so they are dense and stable.
    pub fn from_steps(mut steps: Vec<ApprovalStep>) -> Self {
        steps.sort_by(|left, right| {
            left.step_flow.cmp(&right.step_flow).then_with(|| left.position.cmp(&right.position))
        });
        for (index, step) in steps.iter_mut().enumerate() {
            step.position = index as u32;
        }
        Self(steps)
    }

    pub fn steps(&self) -> &[ApprovalStep] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn find(&self, approver: &UserId) -> Option<&ApprovalStep> {
        self.0.iter().find(|step| &step.approver == approver)
    }

    pub fn has_confirmation_tier(&self) -> bool {
        self.0.iter().any(|step| !step.is_final)
    }

    /// Projection persisted as the ticket's own flow.
    pub fn binding(&self) -> Self {
        Self::from_steps(self.0.iter().filter(|step| step.is_flow).cloned().collect())
    }
}
