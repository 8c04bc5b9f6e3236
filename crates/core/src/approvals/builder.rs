use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::approvals::normalize_key;
use crate::domain::approval::{ApprovalFlow, ApprovalStep};
use crate::domain::identity::{Approver, UnitId, UserId};
use crate::domain::ticket::{OperationType, TicketCategory};

/// Who approves what. Loaded from configuration so that the unit map can be
/// changed without a release.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalPolicy {
    pub department_head: Approver,
    pub financial_controller: Approver,
    /// Receiving party on export tickets; acknowledges but does not bind.
    pub export_acknowledger: Approver,
    pub export_sender: Approver,
    pub default_supervisor: Approver,
    #[serde(default)]
    pub unit_supervisors: BTreeMap<String, Approver>,
}

impl ApprovalPolicy {
    pub fn supervisor_for(&self, unit: &UnitId) -> &Approver {
        let key = normalize_key(&unit.0);
        self.unit_supervisors
            .iter()
            .find(|(candidate, _)| normalize_key(candidate) == key)
            .map(|(_, approver)| approver)
            .unwrap_or(&self.default_supervisor)
    }
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            department_head: Approver::new("dept-head", "Department Head"),
            financial_controller: Approver::new("finance-controller", "Financial Controller"),
            export_acknowledger: Approver::new("warehouse-keeper", "Warehouse Keeper"),
            export_sender: Approver::new("equipment-manager", "Equipment Manager"),
            default_supervisor: Approver::new("floor-supervisor", "Floor Supervisor"),
            unit_supervisors: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowRequest<'a> {
    pub category: TicketCategory,
    pub operation: OperationType,
    pub source_unit: Option<&'a UnitId>,
    pub destination_unit: Option<&'a UnitId>,
    pub creator: &'a UserId,
    /// Members of the destination unit holding the edit capability.
    pub confirmers: &'a [Approver],
}

impl FlowRequest<'_> {
    pub fn is_same_unit(&self) -> bool {
        match (self.source_unit, self.destination_unit) {
            (Some(source), Some(destination)) => source.same_unit(destination),
            _ => false,
        }
    }
}

/// Computed approval steps in both projections.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApprovalPlan {
    /// Everything the external approval service needs to ask, including
    /// acknowledgement-only steps.
    pub dispatch: ApprovalFlow,
    /// Binding steps stored on the ticket.
    pub stored: ApprovalFlow,
}

#[derive(Clone, Debug, Default)]
pub struct ApprovalFlowBuilder {
    policy: ApprovalPolicy,
}

impl ApprovalFlowBuilder {
    pub fn new(policy: ApprovalPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ApprovalPolicy {
        &self.policy
    }

    pub fn build(&self, request: &FlowRequest<'_>) -> ApprovalPlan {
        let steps = match request.category {
            TicketCategory::Import | TicketCategory::InventoryCheck => {
                vec![step(&self.policy.department_head, 0, true, true)]
            }
            TicketCategory::Export => vec![
                step(&self.policy.export_acknowledger, 0, false, false),
                step(&self.policy.export_sender, 0, false, true),
                step(&self.policy.financial_controller, 1, true, true),
            ],
            TicketCategory::InternalTransfer => self.transfer_steps(request),
        };

        let dispatch = ApprovalFlow::from_steps(numbered(steps));
        let stored = dispatch.binding();
        ApprovalPlan { dispatch, stored }
    }

    fn transfer_steps(&self, request: &FlowRequest<'_>) -> Vec<ApprovalStep> {
        if request.is_same_unit() {
            let supervisor = request
                .destination_unit
                .map(|unit| self.policy.supervisor_for(unit))
                .unwrap_or(&self.policy.default_supervisor);
            return vec![step(supervisor, 0, true, true)];
        }

        let mut seen = HashSet::new();
        let confirmers: Vec<ApprovalStep> = request
            .confirmers
            .iter()
            .filter(|approver| &approver.user_id != request.creator)
            .filter(|approver| seen.insert(approver.user_id.clone()))
            .map(|approver| step(approver, 0, false, true))
            .collect();

        if confirmers.is_empty() {
            return vec![step(&self.policy.department_head, 0, true, true)];
        }

        let mut steps = confirmers;
        steps.push(step(&self.policy.department_head, 1, true, true));
        steps
    }
}

fn step(approver: &Approver, step_flow: u32, is_final: bool, is_flow: bool) -> ApprovalStep {
    ApprovalStep::pending(
        approver.user_id.clone(),
        approver.display_name.clone(),
        step_flow,
        is_final,
        is_flow,
    )
}

fn numbered(mut steps: Vec<ApprovalStep>) -> Vec<ApprovalStep> {
    for (index, step) in steps.iter_mut().enumerate() {
        step.position = index as u32;
    }
    steps
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{ApprovalFlowBuilder, ApprovalPolicy, FlowRequest};
    use crate::domain::identity::{Approver, UnitId, UserId};
    use crate::domain::ticket::{OperationType, TicketCategory};

    fn policy() -> ApprovalPolicy {
        let mut unit_supervisors = BTreeMap::new();
        unit_supervisors.insert("assembly".to_string(), Approver::new("sup-assembly", "Ana"));
        ApprovalPolicy { unit_supervisors, ..ApprovalPolicy::default() }
    }

    fn request<'a>(
        category: TicketCategory,
        operation: OperationType,
        source: Option<&'a UnitId>,
        destination: Option<&'a UnitId>,
        creator: &'a UserId,
        confirmers: &'a [Approver],
    ) -> FlowRequest<'a> {
        FlowRequest {
            category,
            operation,
            source_unit: source,
            destination_unit: destination,
            creator,
            confirmers,
        }
    }

    #[test]
    fn import_has_single_final_department_head_step() {
        let creator = UserId("u-1".to_string());
        let plan = ApprovalFlowBuilder::new(policy()).build(&request(
            TicketCategory::Import,
            OperationType::Purchased,
            None,
            None,
            &creator,
            &[],
        ));

        assert_eq!(plan.stored, plan.dispatch);
        assert_eq!(plan.stored.len(), 1);
        let head = &plan.stored.steps()[0];
        assert_eq!(head.approver.0, "dept-head");
        assert!(head.is_final);
        assert_eq!(head.step_flow, 0);
    }

    #[test]
    fn export_dispatches_acknowledgement_but_stores_binding_steps() {
        let creator = UserId("u-1".to_string());
        let plan = ApprovalFlowBuilder::new(policy()).build(&request(
            TicketCategory::Export,
            OperationType::Liquidation,
            None,
            None,
            &creator,
            &[],
        ));

        let dispatched: Vec<(&str, u32, bool, bool)> = plan
            .dispatch
            .steps()
            .iter()
            .map(|step| (step.approver.0.as_str(), step.step_flow, step.is_final, step.is_flow))
            .collect();
        assert_eq!(
            dispatched,
            vec![
                ("warehouse-keeper", 0, false, false),
                ("equipment-manager", 0, false, true),
                ("finance-controller", 1, true, true),
            ]
        );

        let stored: Vec<&str> =
            plan.stored.steps().iter().map(|step| step.approver.0.as_str()).collect();
        assert_eq!(stored, vec!["equipment-manager", "finance-controller"]);
    }

    #[test]
    fn same_unit_transfer_uses_mapped_supervisor() {
        let creator = UserId("u-1".to_string());
        let assembly = UnitId("Assembly".to_string());
        let plan = ApprovalFlowBuilder::new(policy()).build(&request(
            TicketCategory::InternalTransfer,
            OperationType::InternalTransfer,
            Some(&assembly),
            Some(&assembly),
            &creator,
            &[],
        ));

        assert_eq!(plan.stored.len(), 1);
        assert_eq!(plan.stored.steps()[0].approver.0, "sup-assembly");
        assert!(plan.stored.steps()[0].is_final);
    }

    #[test]
    fn same_unit_transfer_falls_back_to_default_supervisor() {
        let creator = UserId("u-1".to_string());
        let painting = UnitId("painting".to_string());
        let plan = ApprovalFlowBuilder::new(policy()).build(&request(
            TicketCategory::InternalTransfer,
            OperationType::InternalTransfer,
            Some(&painting),
            Some(&painting),
            &creator,
            &[],
        ));

        assert_eq!(plan.stored.steps()[0].approver.0, "floor-supervisor");
    }

    #[test]
    fn cross_unit_transfer_puts_confirmers_before_department_head() {
        let creator = UserId("u-1".to_string());
        let source = UnitId("assembly".to_string());
        let destination = UnitId("painting".to_string());
        let confirmers = vec![
            Approver::new("u-7", "Bao"),
            Approver::new("u-1", "Creator Themselves"),
            Approver::new("u-8", "Chi"),
            Approver::new("u-7", "Bao"),
        ];
        let plan = ApprovalFlowBuilder::new(policy()).build(&request(
            TicketCategory::InternalTransfer,
            OperationType::InternalTransfer,
            Some(&source),
            Some(&destination),
            &creator,
            &confirmers,
        ));

        let steps: Vec<(&str, u32, bool)> = plan
            .stored
            .steps()
            .iter()
            .map(|step| (step.approver.0.as_str(), step.step_flow, step.is_final))
            .collect();
        assert_eq!(steps, vec![("u-7", 0, false), ("u-8", 0, false), ("dept-head", 1, true)]);
    }

    #[test]
    fn cross_unit_transfer_without_confirmers_collapses_to_department_head() {
        let creator = UserId("u-1".to_string());
        let source = UnitId("assembly".to_string());
        let destination = UnitId("painting".to_string());
        let plan = ApprovalFlowBuilder::new(policy()).build(&request(
            TicketCategory::InternalTransfer,
            OperationType::InternalTransfer,
            Some(&source),
            Some(&destination),
            &creator,
            &[],
        ));

        assert_eq!(plan.stored.len(), 1);
        assert_eq!(plan.stored.steps()[0].approver.0, "dept-head");
        assert_eq!(plan.stored.steps()[0].step_flow, 0);
        assert!(!plan.stored.has_confirmation_tier());
    }
}
