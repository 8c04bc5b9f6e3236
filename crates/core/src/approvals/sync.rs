//! Merging approval-flow updates pushed by the external approval service.
//!
//! The external service owns the decisions; the local flow owns per-approver
//! metadata (`is_forward`, display names). A merge combines the two and derives
//! the local ticket status from the external status vocabulary.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::approvals::normalize_key;
use crate::domain::approval::{ApprovalFlow, ApprovalStep, StepDecision};
use crate::domain::identity::UserId;
use crate::domain::ticket::{TicketCategory, TicketId, TicketStatus};

/// Status text put on pending steps whose tier a peer has already satisfied.
pub const PEER_APPROVED_MARKER: &str = "approved by peer";

const REJECTION_KEYWORDS: &[&str] =
    &["rejected", "reject", "cancelled", "canceled", "cancel", "denied", "refused"];
const COMPLETION_KEYWORDS: &[&str] =
    &["approved", "approve", "completed", "complete", "done", "finished", "agree"];

fn default_true() -> bool {
    true
}

/// One approver entry as reported by the external service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalStep {
    pub approver: UserId,
    #[serde(default)]
    pub display_name: Option<String>,
    pub step_flow: u32,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default = "default_true")]
    pub is_flow: bool,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalCallback {
    pub ticket_id: TicketId,
    pub status_text: String,
    #[serde(default)]
    pub approval_flow: Vec<ExternalStep>,
}

impl ApprovalCallback {
    /// Stable digest of the payload, recorded on audit events so re-deliveries
    /// can be matched up.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.ticket_id.0.as_bytes());
        hasher.update([0]);
        hasher.update(normalize_key(&self.status_text).as_bytes());
        for step in &self.approval_flow {
            hasher.update([0]);
            hasher.update(step.approver.0.as_bytes());
            hasher.update(step.step_flow.to_be_bytes());
            hasher.update([u8::from(step.is_final), u8::from(step.is_flow)]);
            hasher.update(normalize_key(step.status.as_deref().unwrap_or_default()).as_bytes());
        }
        hasher.finalize().iter().map(|byte| format!("{byte:02x}")).collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeOutcome {
    pub flow: ApprovalFlow,
    pub status: TicketStatus,
    pub changed: bool,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ApprovalFlowSynchronizer;

impl ApprovalFlowSynchronizer {
    pub fn merge(
        &self,
        stored: &ApprovalFlow,
        incoming: &[ExternalStep],
        category: TicketCategory,
        status_text: &str,
    ) -> MergeOutcome {
        let flow = merge_flow(stored, incoming);
        let status = map_external_status(status_text, category, &flow);
        let changed = &flow != stored;
        MergeOutcome { flow, status, changed }
    }
}

fn merge_flow(stored: &ApprovalFlow, incoming: &[ExternalStep]) -> ApprovalFlow {
    let binding: Vec<&ExternalStep> = incoming.iter().filter(|step| step.is_flow).collect();
    if binding.is_empty() {
        return stored.clone();
    }

    // Later duplicates win; the first occurrence keeps its ordinal.
    let mut slots: Vec<(UserId, u32)> = Vec::new();
    let mut latest: HashMap<(UserId, u32), &ExternalStep> = HashMap::new();
    for step in binding {
        let key = (step.approver.clone(), step.step_flow);
        if !latest.contains_key(&key) {
            slots.push(key.clone());
        }
        latest.insert(key, step);
    }

    let mut steps: Vec<ApprovalStep> = slots
        .iter()
        .enumerate()
        .filter_map(|(index, key)| latest.get(key).map(|step| (index, *step)))
        .map(|(index, external)| {
            let previous = stored.find(&external.approver);
            let display_name = external
                .display_name
                .clone()
                .filter(|name| !name.trim().is_empty())
                .or_else(|| previous.map(|step| step.display_name.clone()))
                .unwrap_or_else(|| external.approver.0.clone());
            let status_text = external
                .status
                .as_deref()
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .map(str::to_owned);

            ApprovalStep {
                approver: external.approver.clone(),
                display_name,
                step_flow: external.step_flow,
                position: index as u32,
                is_final: external.is_final,
                is_flow: true,
                is_forward: previous.map(|step| step.is_forward).unwrap_or(true),
                decision: step_decision(status_text.as_deref()),
                status_text,
            }
        })
        .collect();

    let satisfied: BTreeSet<u32> = steps
        .iter()
        .filter(|step| step.decision == StepDecision::Approved)
        .map(|step| step.step_flow)
        .collect();
    for step in &mut steps {
        if step.decision == StepDecision::Pending && satisfied.contains(&step.step_flow) {
            step.status_text = Some(PEER_APPROVED_MARKER.to_owned());
        }
    }

    ApprovalFlow::from_steps(steps)
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

fn contains_keyword(text: &str, keywords: &[&str]) -> bool {
    tokens(text).any(|token| keywords.contains(&token.as_str()))
}

fn step_decision(status_text: Option<&str>) -> StepDecision {
    match status_text {
        Some(text) if text == PEER_APPROVED_MARKER => StepDecision::Pending,
        Some(text) if contains_keyword(text, REJECTION_KEYWORDS) => StepDecision::Rejected,
        Some(text) if contains_keyword(text, COMPLETION_KEYWORDS) => StepDecision::Approved,
        _ => StepDecision::Pending,
    }
}

/// Maps the external service's free-text status onto the local vocabulary.
/// Rejection wins over completion when both appear.
pub fn map_external_status(
    status_text: &str,
    category: TicketCategory,
    flow: &ApprovalFlow,
) -> TicketStatus {
    if contains_keyword(status_text, REJECTION_KEYWORDS) {
        return TicketStatus::Cancelled;
    }
    if contains_keyword(status_text, COMPLETION_KEYWORDS) {
        return TicketStatus::Completed;
    }

    match category {
        TicketCategory::InternalTransfer => {
            let confirmation_open = flow.has_confirmation_tier()
                && !flow
                    .steps()
                    .iter()
                    .any(|step| !step.is_final && step.decision == StepDecision::Approved);
            if confirmation_open {
                TicketStatus::PendingConfirmation
            } else {
                TicketStatus::PendingApproval
            }
        }
        _ => TicketStatus::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::{
        map_external_status, ApprovalCallback, ApprovalFlowSynchronizer, ExternalStep,
        PEER_APPROVED_MARKER,
    };
    use crate::domain::approval::{ApprovalFlow, ApprovalStep, StepDecision};
    use crate::domain::identity::UserId;
    use crate::domain::ticket::{TicketCategory, TicketId, TicketStatus};

    fn stored_transfer_flow() -> ApprovalFlow {
        let mut confirmer =
            ApprovalStep::pending(UserId("u-7".to_owned()), "Bao", 0, false, true);
        confirmer.is_forward = false;
        let mut peer = ApprovalStep::pending(UserId("u-8".to_owned()), "Chi", 0, false, true);
        peer.position = 1;
        let mut head =
            ApprovalStep::pending(UserId("dept-head".to_owned()), "Department Head", 1, true, true);
        head.position = 2;
        ApprovalFlow::from_steps(vec![confirmer, peer, head])
    }

    fn external(approver: &str, tier: u32, is_final: bool, status: Option<&str>) -> ExternalStep {
        ExternalStep {
            approver: UserId(approver.to_owned()),
            display_name: None,
            step_flow: tier,
            is_final,
            is_flow: true,
            status: status.map(str::to_owned),
        }
    }

    #[test]
    fn peer_approval_marks_remaining_tier_members() {
        let incoming = vec![
            external("u-7", 0, false, Some("Approved")),
            external("u-8", 0, false, None),
            external("dept-head", 1, true, None),
        ];

        let outcome = ApprovalFlowSynchronizer.merge(
            &stored_transfer_flow(),
            &incoming,
            TicketCategory::InternalTransfer,
            "In progress",
        );

        let peer = outcome.flow.find(&UserId("u-8".to_owned())).expect("peer step");
        assert_eq!(peer.decision, StepDecision::Pending);
        assert_eq!(peer.status_text.as_deref(), Some(PEER_APPROVED_MARKER));
        let head = outcome.flow.find(&UserId("dept-head".to_owned())).expect("head step");
        assert_eq!(head.status_text, None);
        assert_eq!(outcome.status, TicketStatus::PendingApproval);
        assert!(outcome.changed);
    }

    #[test]
    fn known_approvers_keep_forward_flag_and_newcomers_are_forwarded() {
        let incoming = vec![
            external("u-7", 0, false, None),
            external("u-99", 0, false, None),
            external("dept-head", 1, true, None),
        ];

        let outcome = ApprovalFlowSynchronizer.merge(
            &stored_transfer_flow(),
            &incoming,
            TicketCategory::InternalTransfer,
            "waiting",
        );

        assert!(!outcome.flow.find(&UserId("u-7".to_owned())).expect("u-7").is_forward);
        let newcomer = outcome.flow.find(&UserId("u-99".to_owned())).expect("u-99");
        assert!(newcomer.is_forward);
        assert_eq!(newcomer.display_name, "u-99");
        assert_eq!(
            outcome.flow.find(&UserId("u-7".to_owned())).expect("u-7").display_name,
            "Bao"
        );
        assert_eq!(outcome.status, TicketStatus::PendingConfirmation);
    }

    #[test]
    fn merge_is_idempotent_and_collapses_duplicates() {
        let incoming = vec![
            external("u-7", 0, false, None),
            external("u-7", 0, false, Some("approved")),
            external("dept-head", 1, true, Some("approved")),
            ExternalStep { is_flow: false, ..external("receiver", 0, false, None) },
        ];
        let synchronizer = ApprovalFlowSynchronizer;

        let first = synchronizer.merge(
            &stored_transfer_flow(),
            &incoming,
            TicketCategory::InternalTransfer,
            "Completed",
        );
        let second =
            synchronizer.merge(&first.flow, &incoming, TicketCategory::InternalTransfer, "Completed");

        assert_eq!(first.flow.len(), 2);
        assert!(first.flow.find(&UserId("receiver".to_owned())).is_none());
        assert_eq!(first.status, TicketStatus::Completed);
        assert_eq!(second.flow, first.flow);
        assert_eq!(second.status, first.status);
        assert!(!second.changed);
    }

    #[test]
    fn empty_incoming_flow_keeps_stored_steps() {
        let stored = stored_transfer_flow();
        let outcome =
            ApprovalFlowSynchronizer.merge(&stored, &[], TicketCategory::InternalTransfer, "");

        assert_eq!(outcome.flow, stored);
        assert!(!outcome.changed);
    }

    #[test]
    fn rejection_keywords_take_precedence() {
        let flow = ApprovalFlow::default();
        assert_eq!(
            map_external_status("Approved, then Rejected", TicketCategory::Import, &flow),
            TicketStatus::Cancelled
        );
        assert_eq!(
            map_external_status("request canceled by owner", TicketCategory::Export, &flow),
            TicketStatus::Cancelled
        );
        assert_eq!(
            map_external_status("DONE", TicketCategory::Export, &flow),
            TicketStatus::Completed
        );
    }

    #[test]
    fn non_transfer_pending_text_maps_to_pending() {
        assert_eq!(
            map_external_status("awaiting signature", TicketCategory::Import, &ApprovalFlow::default()),
            TicketStatus::Pending
        );
        assert_eq!(
            map_external_status("unapproved", TicketCategory::Import, &ApprovalFlow::default()),
            TicketStatus::Pending
        );
    }

    #[test]
    fn fingerprint_ignores_case_of_status_text() {
        let callback = ApprovalCallback {
            ticket_id: TicketId("T-1".to_owned()),
            status_text: "Approved".to_owned(),
            approval_flow: vec![external("dept-head", 0, true, Some("Approved"))],
        };
        let mut shouted = callback.clone();
        shouted.status_text = "APPROVED".to_owned();
        let mut other = callback.clone();
        other.ticket_id = TicketId("T-2".to_owned());

        assert_eq!(callback.fingerprint(), shouted.fingerprint());
        assert_ne!(callback.fingerprint(), other.fingerprint());
        assert_eq!(callback.fingerprint().len(), 64);
    }
}
