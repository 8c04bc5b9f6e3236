use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::domain::ticket::{TicketCategory, TicketStatus};
use crate::flows::states::{TicketAction, TicketEvent, TransitionContext, TransitionOutcome};

pub trait TicketFlowDefinition {
    fn initial_status(&self, context: &TransitionContext) -> TicketStatus;
    fn transition(
        &self,
        current: TicketStatus,
        event: TicketEvent,
        context: &TransitionContext,
    ) -> Result<TransitionOutcome, TicketTransitionError>;
}

/// Lifecycle shared by every ticket category:
/// `draft -> pending variant -> completed | cancelled`.
#[derive(Clone, Debug, Default)]
pub struct StandardTicketFlow;

impl TicketFlowDefinition for StandardTicketFlow {
    fn initial_status(&self, context: &TransitionContext) -> TicketStatus {
        match context.category {
            TicketCategory::InternalTransfer if context.same_unit => TicketStatus::PendingApproval,
            TicketCategory::InternalTransfer => TicketStatus::PendingConfirmation,
            TicketCategory::Import | TicketCategory::Export | TicketCategory::InventoryCheck => {
                TicketStatus::Pending
            }
        }
    }

    fn transition(
        &self,
        current: TicketStatus,
        event: TicketEvent,
        context: &TransitionContext,
    ) -> Result<TransitionOutcome, TicketTransitionError> {
        transition_ticket(self.initial_status(context), current, event, context)
    }
}

pub struct TicketStateMachine<F = StandardTicketFlow> {
    flow: F,
}

impl<F> TicketStateMachine<F>
where
    F: TicketFlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_status(&self, context: &TransitionContext) -> TicketStatus {
        self.flow.initial_status(context)
    }

    pub fn apply(
        &self,
        current: TicketStatus,
        event: TicketEvent,
        context: &TransitionContext,
    ) -> Result<TransitionOutcome, TicketTransitionError> {
        self.flow.transition(current, event, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: TicketStatus,
        event: TicketEvent,
        context: &TransitionContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, TicketTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) if outcome.is_noop() => {}
            Ok(outcome) => {
                sink.emit(
                    audit
                        .event("ticket.transition_applied", AuditCategory::Flow, AuditOutcome::Success)
                        .with_metadata("from", outcome.from.as_str())
                        .with_metadata("to", outcome.to.as_str())
                        .with_metadata("event", outcome.event.as_str()),
                );
            }
            Err(error) => {
                sink.emit(
                    audit
                        .event("ticket.transition_rejected", AuditCategory::Flow, AuditOutcome::Rejected)
                        .with_metadata("from", current.as_str())
                        .with_metadata("event", event.as_str())
                        .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for TicketStateMachine<StandardTicketFlow> {
    fn default() -> Self {
        Self::new(StandardTicketFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TicketTransitionError {
    #[error("ticket is already {status} and cannot change")]
    AlreadyTerminal { status: TicketStatus },
    #[error("cannot {} a ticket in status {status}", .event.as_str())]
    InvalidTransition { status: TicketStatus, event: TicketEvent },
}

fn completion_actions(category: TicketCategory) -> Vec<TicketAction> {
    match category {
        TicketCategory::InventoryCheck => vec![TicketAction::ReconcileInventory],
        _ => vec![TicketAction::ApplyMachineEffects],
    }
}

fn transition_ticket(
    initial: TicketStatus,
    current: TicketStatus,
    event: TicketEvent,
    context: &TransitionContext,
) -> Result<TransitionOutcome, TicketTransitionError> {
    use TicketStatus::{Cancelled, Completed, Draft, PendingApproval, PendingConfirmation};

    if current.is_terminal() {
        return Err(TicketTransitionError::AlreadyTerminal { status: current });
    }
    let invalid = || TicketTransitionError::InvalidTransition { status: current, event };

    let (to, actions) = match event {
        TicketEvent::Submit if current == Draft => (initial, vec![TicketAction::DispatchApproval]),
        TicketEvent::Confirm
            if current == PendingConfirmation
                && context.category == TicketCategory::InternalTransfer =>
        {
            (PendingApproval, Vec::new())
        }
        TicketEvent::Approve if current.is_pending() => {
            (Completed, completion_actions(context.category))
        }
        TicketEvent::Cancel => (Cancelled, Vec::new()),
        TicketEvent::Sync(_) if current == Draft => return Err(invalid()),
        TicketEvent::Sync(target) if target.rank() > current.rank() => {
            let actions =
                if target == Completed { completion_actions(context.category) } else { Vec::new() };
            (target, actions)
        }
        // Stale or repeated status from the approval service; status never regresses.
        TicketEvent::Sync(_) => (current, Vec::new()),
        _ => return Err(invalid()),
    };

    Ok(TransitionOutcome { from: current, to, event, actions })
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::domain::ticket::{TicketCategory, TicketId, TicketStatus};
    use crate::flows::engine::{TicketStateMachine, TicketTransitionError};
    use crate::flows::states::{TicketAction, TicketEvent, TransitionContext};

    fn transfer(same_unit: bool) -> TransitionContext {
        TransitionContext::new(TicketCategory::InternalTransfer, same_unit)
    }

    #[test]
    fn initial_status_depends_on_category_and_units() {
        let machine = TicketStateMachine::default();

        assert_eq!(machine.initial_status(&transfer(true)), TicketStatus::PendingApproval);
        assert_eq!(machine.initial_status(&transfer(false)), TicketStatus::PendingConfirmation);
        for category in
            [TicketCategory::Import, TicketCategory::Export, TicketCategory::InventoryCheck]
        {
            assert_eq!(
                machine.initial_status(&TransitionContext::new(category, false)),
                TicketStatus::Pending
            );
        }
    }

    #[test]
    fn draft_submission_dispatches_and_enters_initial_status() {
        let outcome = TicketStateMachine::default()
            .apply(TicketStatus::Draft, TicketEvent::Submit, &transfer(false))
            .expect("draft can be submitted");

        assert_eq!(outcome.to, TicketStatus::PendingConfirmation);
        assert_eq!(outcome.actions, vec![TicketAction::DispatchApproval]);
    }

    #[test]
    fn cross_unit_transfer_confirm_then_approve() {
        let machine = TicketStateMachine::default();
        let context = transfer(false);

        let confirmed = machine
            .apply(TicketStatus::PendingConfirmation, TicketEvent::Confirm, &context)
            .expect("confirm");
        assert_eq!(confirmed.to, TicketStatus::PendingApproval);

        let approved =
            machine.apply(confirmed.to, TicketEvent::Approve, &context).expect("approve");
        assert_eq!(approved.to, TicketStatus::Completed);
        assert_eq!(approved.actions, vec![TicketAction::ApplyMachineEffects]);
        assert!(approved.completes());
    }

    #[test]
    fn inventory_completion_reconciles_instead_of_mutating() {
        let outcome = TicketStateMachine::default()
            .apply(
                TicketStatus::Pending,
                TicketEvent::Approve,
                &TransitionContext::new(TicketCategory::InventoryCheck, false),
            )
            .expect("approve inventory check");

        assert_eq!(outcome.actions, vec![TicketAction::ReconcileInventory]);
    }

    #[test]
    fn confirm_is_only_valid_for_pending_confirmation_transfers() {
        let machine = TicketStateMachine::default();

        let error = machine
            .apply(TicketStatus::PendingApproval, TicketEvent::Confirm, &transfer(false))
            .expect_err("already confirmed");
        assert!(matches!(error, TicketTransitionError::InvalidTransition { .. }));

        let error = machine
            .apply(
                TicketStatus::Pending,
                TicketEvent::Confirm,
                &TransitionContext::new(TicketCategory::Import, false),
            )
            .expect_err("imports have no confirmation step");
        assert!(matches!(error, TicketTransitionError::InvalidTransition { .. }));
    }

    #[test]
    fn approve_from_draft_is_rejected() {
        let error = TicketStateMachine::default()
            .apply(
                TicketStatus::Draft,
                TicketEvent::Approve,
                &TransitionContext::new(TicketCategory::Import, false),
            )
            .expect_err("drafts must be submitted first");

        assert_eq!(
            error,
            TicketTransitionError::InvalidTransition {
                status: TicketStatus::Draft,
                event: TicketEvent::Approve
            }
        );
    }

    #[test]
    fn terminal_states_accept_no_event() {
        let machine = TicketStateMachine::default();
        let context = TransitionContext::new(TicketCategory::Export, false);

        for status in [TicketStatus::Completed, TicketStatus::Cancelled] {
            for event in [
                TicketEvent::Cancel,
                TicketEvent::Approve,
                TicketEvent::Sync(TicketStatus::Completed),
            ] {
                assert_eq!(
                    machine.apply(status, event, &context),
                    Err(TicketTransitionError::AlreadyTerminal { status })
                );
            }
        }
    }

    #[test]
    fn sync_never_regresses_status() {
        let machine = TicketStateMachine::default();
        let context = transfer(false);

        let stale = machine
            .apply(
                TicketStatus::PendingApproval,
                TicketEvent::Sync(TicketStatus::PendingConfirmation),
                &context,
            )
            .expect("stale sync is tolerated");
        assert_eq!(stale.to, TicketStatus::PendingApproval);
        assert!(stale.is_noop());

        let completed = machine
            .apply(
                TicketStatus::PendingConfirmation,
                TicketEvent::Sync(TicketStatus::Completed),
                &context,
            )
            .expect("sync to completed");
        assert_eq!(completed.actions, vec![TicketAction::ApplyMachineEffects]);

        let cancelled = machine
            .apply(TicketStatus::Pending, TicketEvent::Sync(TicketStatus::Cancelled), &context)
            .expect("sync to cancelled");
        assert!(cancelled.actions.is_empty());
    }

    #[test]
    fn transition_emits_audit_event() {
        let sink = InMemoryAuditSink::default();
        let audit = AuditContext::new(Some(TicketId("T-9".to_owned())), "req-42", "u-1");

        TicketStateMachine::default()
            .apply_with_audit(
                TicketStatus::Pending,
                TicketEvent::Cancel,
                &TransitionContext::new(TicketCategory::Import, false),
                &sink,
                &audit,
            )
            .expect("cancel pending ticket");
        let _ = TicketStateMachine::default().apply_with_audit(
            TicketStatus::Cancelled,
            TicketEvent::Cancel,
            &TransitionContext::new(TicketCategory::Import, false),
            &sink,
            &audit,
        );

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "ticket.transition_applied");
        assert_eq!(events[0].metadata.get("to").map(String::as_str), Some("cancelled"));
        assert_eq!(events[1].event_type, "ticket.transition_rejected");
    }
}
