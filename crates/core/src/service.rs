//! Ticket commands: create, submit, confirm, approve, cancel and the approval
//! callback. Each command validates against a committed snapshot first, then
//! re-reads and writes inside a single unit of work.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::approvals::{
    ApprovalCallback, ApprovalFlowBuilder, ApprovalFlowSynchronizer, ApprovalPlan, ApprovalPolicy,
    FlowRequest,
};
use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::config::PermissionsConfig;
use crate::domain::approval::{ApprovalFlow, StepDecision};
use crate::domain::identity::{Approver, UnitId, UserId};
use crate::domain::location::{Location, LocationId};
use crate::domain::machine::{BorrowTerms, Machine, MachineStatus};
use crate::domain::ticket::{
    InventoryCount, OperationType, Ticket, TicketCategory, TicketDetail, TicketId, TicketStatus,
};
use crate::eligibility::EligibilityRules;
use crate::errors::{ApplicationError, DomainError};
use crate::flows::{TicketAction, TicketEvent, TicketStateMachine, TransitionContext};
use crate::mutation::{
    InventoryReconciler, MachineStateMutator, MutationReport, MutationRequest,
};
use crate::ports::{ApprovalDispatch, DispatchLine, DispatchRequest, IdentityDirectory};
use crate::store::{TicketStore, UnitOfWork};

/// Who is calling and under which correlation id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestContext {
    pub actor: UserId,
    pub correlation_id: String,
}

impl RequestContext {
    pub fn new(actor: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self { actor: UserId(actor.into()), correlation_id: correlation_id.into() }
    }

    fn audit(&self, ticket_id: &TicketId) -> AuditContext {
        AuditContext::new(Some(ticket_id.clone()), self.correlation_id.clone(), self.actor.0.clone())
    }
}

/// Ticket creation input. Category and operation arrive as text and are
/// parsed here so unknown values are rejected with a domain error.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTicket {
    pub category: String,
    pub operation: String,
    #[serde(default)]
    pub details: Vec<TicketDetail>,
    #[serde(default)]
    pub target_location: Option<LocationId>,
    #[serde(default)]
    pub target_status: Option<MachineStatus>,
    #[serde(default)]
    pub borrow_terms: Option<BorrowTerms>,
    #[serde(default)]
    pub inventory: Option<InventoryCount>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub as_draft: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackDisposition {
    Applied,
    Unchanged,
    IgnoredTerminal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackOutcome {
    pub ticket_id: TicketId,
    pub disposition: CallbackDisposition,
    pub status: TicketStatus,
}

/// Flow inputs resolved from the directory before a unit of work opens.
struct FlowInputs {
    target: Option<Location>,
    same_unit: bool,
    plan: ApprovalPlan,
}

pub struct TicketService {
    store: Arc<dyn TicketStore>,
    directory: Arc<dyn IdentityDirectory>,
    dispatch: Arc<dyn ApprovalDispatch>,
    audit: Arc<dyn AuditSink>,
    permissions: PermissionsConfig,
    builder: ApprovalFlowBuilder,
    eligibility: EligibilityRules,
    synchronizer: ApprovalFlowSynchronizer,
    lifecycle: TicketStateMachine,
    mutator: MachineStateMutator,
    reconciler: InventoryReconciler,
}

impl TicketService {
    pub fn new(
        store: Arc<dyn TicketStore>,
        directory: Arc<dyn IdentityDirectory>,
        dispatch: Arc<dyn ApprovalDispatch>,
        audit: Arc<dyn AuditSink>,
        policy: ApprovalPolicy,
        permissions: PermissionsConfig,
    ) -> Self {
        Self {
            store,
            directory,
            dispatch,
            audit,
            permissions,
            builder: ApprovalFlowBuilder::new(policy),
            eligibility: EligibilityRules,
            synchronizer: ApprovalFlowSynchronizer,
            lifecycle: TicketStateMachine::default(),
            mutator: MachineStateMutator,
            reconciler: InventoryReconciler,
        }
    }

    pub async fn ticket(&self, id: &TicketId) -> Result<Ticket, ApplicationError> {
        self.store.ticket(id).await?.ok_or_else(|| ApplicationError::TicketNotFound(id.clone()))
    }

    pub async fn create(
        &self,
        ctx: &RequestContext,
        input: NewTicket,
    ) -> Result<Ticket, ApplicationError> {
        let operation = OperationType::parse(&input.operation)
            .ok_or_else(|| DomainError::UnknownOperation(input.operation.clone()))?;
        let category = TicketCategory::parse(&input.category)
            .ok_or_else(|| DomainError::UnknownCategory(input.category.clone()))?;
        if operation.category() != category {
            return Err(DomainError::OperationCategoryMismatch { category, operation }.into());
        }

        let details = ticket_details(category, &input)?;
        validate_shape(operation, &input)?;
        self.require_capability(ctx, &self.permissions.edit_capability, "create ticket").await?;

        let source_unit = self.directory.unit_of(&ctx.actor).await?;
        let now = Utc::now();
        let mut ticket = Ticket {
            id: TicketId(format!("TKT-{}", Uuid::new_v4().simple())),
            category,
            operation,
            status: TicketStatus::Draft,
            source_unit,
            target_location: input.target_location,
            target_status: input.target_status,
            borrow_terms: input.borrow_terms,
            creator: ctx.actor.clone(),
            approval_flow: ApprovalFlow::default(),
            details,
            inventory: input.inventory,
            note: input.note,
            version: 1,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        let inputs = self.flow_inputs(&ticket).await?;

        let mut uow = self.store.begin().await?;
        let machines = self.load_eligible(uow.as_mut(), &ticket).await?;
        let dispatch_plan = if input.as_draft {
            None
        } else {
            ticket.status = self.lifecycle.initial_status(&TransitionContext::new(
                category,
                inputs.same_unit,
            ));
            ticket.approval_flow = inputs.plan.stored.clone();
            Some(inputs.plan.dispatch.clone())
        };
        uow.insert_ticket(&ticket).await?;
        if let Some(flow) = dispatch_plan {
            self.send_for_approval(ctx, uow.as_mut(), &ticket, &machines, inputs.target.as_ref(), flow)
                .await?;
        }
        uow.commit().await?;

        info!(
            event_name = "ticket.created",
            correlation_id = %ctx.correlation_id,
            ticket_id = %ticket.id,
            category = ticket.category.as_str(),
            operation = ticket.operation.as_str(),
            status = ticket.status.as_str(),
            machines = ticket.details.len(),
            "ticket created"
        );
        self.audit.emit(
            ctx.audit(&ticket.id)
                .event("ticket.created", AuditCategory::Flow, AuditOutcome::Success)
                .with_metadata("status", ticket.status.as_str())
                .with_metadata("operation", ticket.operation.as_str()),
        );
        Ok(ticket)
    }

    /// Sends a draft for approval: eligibility is re-checked against current
    /// machine state and the flow is built from current directory data.
    pub async fn submit(
        &self,
        ctx: &RequestContext,
        id: &TicketId,
    ) -> Result<Ticket, ApplicationError> {
        let snapshot = self.ticket(id).await?;
        if snapshot.creator != ctx.actor {
            return Err(ApplicationError::PermissionDenied {
                actor: ctx.actor.clone(),
                action: "submit ticket",
                reason: "only the creator may submit a draft".to_owned(),
            });
        }
        let inputs = self.flow_inputs(&snapshot).await?;

        let mut uow = self.store.begin().await?;
        let mut ticket = reload(uow.as_mut(), &snapshot).await?;
        let outcome = self.lifecycle.apply_with_audit(
            ticket.status,
            TicketEvent::Submit,
            &TransitionContext::new(ticket.category, inputs.same_unit),
            self.audit.as_ref(),
            &ctx.audit(id),
        )?;
        let machines = self.load_eligible(uow.as_mut(), &ticket).await?;

        ticket.status = outcome.to;
        ticket.approval_flow = inputs.plan.stored.clone();
        ticket.updated_at = Utc::now();
        ticket.version = uow.update_ticket(&ticket).await?;
        if outcome.actions.contains(&TicketAction::DispatchApproval) {
            self.send_for_approval(
                ctx,
                uow.as_mut(),
                &ticket,
                &machines,
                inputs.target.as_ref(),
                inputs.plan.dispatch.clone(),
            )
            .await?;
        }
        uow.commit().await?;

        info!(
            event_name = "ticket.submitted",
            correlation_id = %ctx.correlation_id,
            ticket_id = %ticket.id,
            status = ticket.status.as_str(),
            "draft submitted"
        );
        Ok(ticket)
    }

    pub async fn confirm(
        &self,
        ctx: &RequestContext,
        id: &TicketId,
    ) -> Result<Ticket, ApplicationError> {
        let snapshot = self.ticket(id).await?;
        if snapshot.creator == ctx.actor {
            return Err(ApplicationError::PermissionDenied {
                actor: ctx.actor.clone(),
                action: "confirm ticket",
                reason: "the creator cannot confirm their own transfer".to_owned(),
            });
        }
        let destination = self.destination_unit(&snapshot).await?;
        let caller_unit = self.directory.unit_of(&ctx.actor).await?;
        let in_destination = match (&destination, &caller_unit) {
            (Some(destination), Some(caller_unit)) => destination.same_unit(caller_unit),
            _ => false,
        };
        if !in_destination {
            return Err(ApplicationError::PermissionDenied {
                actor: ctx.actor.clone(),
                action: "confirm ticket",
                reason: "caller is not a member of the destination unit".to_owned(),
            });
        }

        let mut uow = self.store.begin().await?;
        let mut ticket = reload(uow.as_mut(), &snapshot).await?;
        let outcome = self.lifecycle.apply_with_audit(
            ticket.status,
            TicketEvent::Confirm,
            &TransitionContext::new(ticket.category, false),
            self.audit.as_ref(),
            &ctx.audit(id),
        )?;

        ticket.status = outcome.to;
        record_decision(&mut ticket.approval_flow, &ctx.actor, "confirmed");
        ticket.updated_at = Utc::now();
        ticket.version = uow.update_ticket(&ticket).await?;
        uow.commit().await?;

        info!(
            event_name = "ticket.confirmed",
            correlation_id = %ctx.correlation_id,
            ticket_id = %ticket.id,
            "transfer confirmed by destination unit"
        );
        Ok(ticket)
    }

    pub async fn approve(
        &self,
        ctx: &RequestContext,
        id: &TicketId,
    ) -> Result<Ticket, ApplicationError> {
        let snapshot = self.ticket(id).await?;
        self.require_capability(ctx, &self.permissions.admin_capability, "approve ticket").await?;

        let mut uow = self.store.begin().await?;
        let mut ticket = reload(uow.as_mut(), &snapshot).await?;
        let outcome = self.lifecycle.apply_with_audit(
            ticket.status,
            TicketEvent::Approve,
            &TransitionContext::new(ticket.category, false),
            self.audit.as_ref(),
            &ctx.audit(id),
        )?;

        let now = Utc::now();
        let report =
            self.run_completion(uow.as_mut(), &ticket, &outcome.actions, &ctx.actor, now).await?;
        ticket.status = outcome.to;
        record_decision(&mut ticket.approval_flow, &ctx.actor, "approved");
        ticket.completed_at = Some(now);
        ticket.updated_at = now;
        ticket.version = uow.update_ticket(&ticket).await?;
        uow.commit().await?;

        self.log_completion(ctx, &ticket, &report);
        Ok(ticket)
    }

    pub async fn cancel(
        &self,
        ctx: &RequestContext,
        id: &TicketId,
    ) -> Result<Ticket, ApplicationError> {
        let snapshot = self.ticket(id).await?;
        if snapshot.creator != ctx.actor {
            self.require_capability(ctx, &self.permissions.admin_capability, "cancel ticket")
                .await?;
        }

        let mut uow = self.store.begin().await?;
        let mut ticket = reload(uow.as_mut(), &snapshot).await?;
        let outcome = self.lifecycle.apply_with_audit(
            ticket.status,
            TicketEvent::Cancel,
            &TransitionContext::new(ticket.category, false),
            self.audit.as_ref(),
            &ctx.audit(id),
        )?;

        ticket.status = outcome.to;
        ticket.updated_at = Utc::now();
        ticket.version = uow.update_ticket(&ticket).await?;
        uow.commit().await?;

        info!(
            event_name = "ticket.cancelled",
            correlation_id = %ctx.correlation_id,
            ticket_id = %ticket.id,
            "ticket cancelled"
        );
        Ok(ticket)
    }

    /// Applies a decision pushed by the approval service. Tickets that are
    /// already completed or cancelled are left alone.
    pub async fn handle_callback(
        &self,
        ctx: &RequestContext,
        callback: &ApprovalCallback,
    ) -> Result<CallbackOutcome, ApplicationError> {
        let fingerprint = callback.fingerprint();
        let snapshot = self.ticket(&callback.ticket_id).await?;
        if snapshot.status.is_terminal() {
            return Ok(self.ignore_callback(ctx, &snapshot, &fingerprint));
        }

        let mut uow = self.store.begin().await?;
        let mut ticket = reload_any(uow.as_mut(), &snapshot.id).await?;
        if ticket.status.is_terminal() {
            return Ok(self.ignore_callback(ctx, &ticket, &fingerprint));
        }

        let merged = self.synchronizer.merge(
            &ticket.approval_flow,
            &callback.approval_flow,
            ticket.category,
            &callback.status_text,
        );
        let outcome = self.lifecycle.apply_with_audit(
            ticket.status,
            TicketEvent::Sync(merged.status),
            &TransitionContext::new(ticket.category, false),
            self.audit.as_ref(),
            &ctx.audit(&ticket.id),
        )?;

        if !merged.changed && outcome.is_noop() {
            return Ok(CallbackOutcome {
                ticket_id: ticket.id,
                disposition: CallbackDisposition::Unchanged,
                status: outcome.to,
            });
        }

        let now = Utc::now();
        let mut report = None;
        if outcome.completes() {
            let actor = final_approver(&merged.flow).unwrap_or_else(|| ctx.actor.clone());
            report =
                Some(self.run_completion(uow.as_mut(), &ticket, &outcome.actions, &actor, now).await?);
            ticket.completed_at = Some(now);
        }
        ticket.approval_flow = merged.flow;
        ticket.status = outcome.to;
        ticket.updated_at = now;
        ticket.version = uow.update_ticket(&ticket).await?;
        uow.commit().await?;

        self.audit.emit(
            ctx.audit(&ticket.id)
                .event("approval.callback_applied", AuditCategory::Approval, AuditOutcome::Success)
                .with_metadata("fingerprint", fingerprint)
                .with_metadata("status", ticket.status.as_str()),
        );
        if let Some(report) = report {
            self.log_completion(ctx, &ticket, &report);
        }
        Ok(CallbackOutcome {
            ticket_id: ticket.id,
            disposition: CallbackDisposition::Applied,
            status: ticket.status,
        })
    }

    fn ignore_callback(
        &self,
        ctx: &RequestContext,
        ticket: &Ticket,
        fingerprint: &str,
    ) -> CallbackOutcome {
        info!(
            event_name = "approval.callback_ignored",
            correlation_id = %ctx.correlation_id,
            ticket_id = %ticket.id,
            status = ticket.status.as_str(),
            "callback for finished ticket ignored"
        );
        self.audit.emit(
            ctx.audit(&ticket.id)
                .event("approval.callback_ignored", AuditCategory::Approval, AuditOutcome::Ignored)
                .with_metadata("fingerprint", fingerprint)
                .with_metadata("status", ticket.status.as_str()),
        );
        CallbackOutcome {
            ticket_id: ticket.id.clone(),
            disposition: CallbackDisposition::IgnoredTerminal,
            status: ticket.status,
        }
    }

    async fn require_capability(
        &self,
        ctx: &RequestContext,
        capability: &str,
        action: &'static str,
    ) -> Result<(), ApplicationError> {
        if self.directory.has_capability(&ctx.actor, capability).await? {
            return Ok(());
        }
        warn!(
            event_name = "ticket.permission_denied",
            correlation_id = %ctx.correlation_id,
            actor = %ctx.actor,
            capability,
            action,
            "permission denied"
        );
        Err(ApplicationError::PermissionDenied {
            actor: ctx.actor.clone(),
            action,
            reason: format!("missing capability `{capability}`"),
        })
    }

    async fn target_location(&self, ticket: &Ticket) -> Result<Option<Location>, ApplicationError> {
        match &ticket.target_location {
            Some(id) => self
                .store
                .location(id)
                .await?
                .map(Some)
                .ok_or_else(|| DomainError::LocationNotFound(id.0.clone()).into()),
            None => Ok(None),
        }
    }

    async fn destination_unit(&self, ticket: &Ticket) -> Result<Option<UnitId>, ApplicationError> {
        Ok(self.target_location(ticket).await?.map(|location| location.unit_id))
    }

    async fn flow_inputs(&self, ticket: &Ticket) -> Result<FlowInputs, ApplicationError> {
        let target = self.target_location(ticket).await?;
        let destination = target.as_ref().map(|location| location.unit_id.clone());

        let mut request = FlowRequest {
            category: ticket.category,
            operation: ticket.operation,
            source_unit: ticket.source_unit.as_ref(),
            destination_unit: destination.as_ref(),
            creator: &ticket.creator,
            confirmers: &[],
        };
        let same_unit = request.is_same_unit();

        let confirmers = match (&destination, ticket.category) {
            (Some(unit), TicketCategory::InternalTransfer) if !same_unit => {
                self.confirmers_for(unit, &ticket.creator).await?
            }
            _ => Vec::new(),
        };
        request.confirmers = &confirmers;
        let plan = self.builder.build(&request);

        Ok(FlowInputs { target, same_unit, plan })
    }

    async fn confirmers_for(
        &self,
        unit: &UnitId,
        creator: &UserId,
    ) -> Result<Vec<Approver>, ApplicationError> {
        let mut confirmers = Vec::new();
        for member in self.directory.members_of(unit).await? {
            if &member == creator
                || !self.directory.has_capability(&member, &self.permissions.edit_capability).await?
            {
                continue;
            }
            let display_name =
                self.directory.display_name(&member).await?.unwrap_or_else(|| member.0.clone());
            confirmers.push(Approver { user_id: member, display_name });
        }
        Ok(confirmers)
    }

    async fn load_eligible(
        &self,
        uow: &mut dyn UnitOfWork,
        ticket: &Ticket,
    ) -> Result<Vec<Machine>, ApplicationError> {
        let mut machines = Vec::with_capacity(ticket.details.len());
        for detail in &ticket.details {
            let machine = uow
                .find_machine(&detail.machine_id)
                .await?
                .ok_or_else(|| DomainError::MachineNotFound(detail.machine_id.clone()))?;
            machines.push(machine);
        }
        self.eligibility.check_all(ticket.operation, &machines)?;
        Ok(machines)
    }

    /// Eligibility was checked against the machines as they were when the
    /// ticket was raised. Another ticket may have completed on the same
    /// machine since; its state wins and this completion is refused.
    async fn recheck_eligibility(
        &self,
        uow: &mut dyn UnitOfWork,
        ticket: &Ticket,
    ) -> Result<(), ApplicationError> {
        for detail in &ticket.details {
            let machine = uow
                .find_machine(&detail.machine_id)
                .await?
                .ok_or_else(|| DomainError::MachineNotFound(detail.machine_id.clone()))?;
            if let Err(error) = self.eligibility.check_machine(ticket.operation, &machine) {
                warn!(
                    event_name = "ticket.completion_conflict",
                    ticket_id = %ticket.id,
                    machine_id = %machine.id,
                    status = machine.current_status.as_str(),
                    "machine changed since the ticket was raised"
                );
                return Err(ApplicationError::Conflict(format!(
                    "ticket `{}` can no longer complete: {error}",
                    ticket.id
                )));
            }
        }
        Ok(())
    }

    async fn send_for_approval(
        &self,
        ctx: &RequestContext,
        uow: &mut dyn UnitOfWork,
        ticket: &Ticket,
        machines: &[Machine],
        target: Option<&Location>,
        flow: ApprovalFlow,
    ) -> Result<(), ApplicationError> {
        let mut lines = Vec::with_capacity(machines.len());
        for (machine, detail) in machines.iter().zip(&ticket.details) {
            let from_location = match &machine.location_id {
                Some(id) => Some(
                    uow.find_location(id)
                        .await?
                        .map(|location| location.code)
                        .unwrap_or_else(|| id.0.clone()),
                ),
                None => None,
            };
            lines.push(DispatchLine {
                machine_id: machine.id.clone(),
                machine_name: machine.name.clone(),
                current_status: machine.current_status.as_str().to_owned(),
                from_location,
                to_location: target.map(|location| location.code.clone()),
                note: detail.note.clone(),
            });
        }

        let request = DispatchRequest {
            ticket_id: ticket.id.clone(),
            category: ticket.category,
            operation: ticket.operation,
            creator: ticket.creator.clone(),
            approval_flow: flow,
            lines,
            correlation_id: ctx.correlation_id.clone(),
        };
        match self.dispatch.dispatch(&request).await {
            Ok(receipt) => {
                self.audit.emit(
                    ctx.audit(&ticket.id)
                        .event("approval.dispatched", AuditCategory::Approval, AuditOutcome::Success)
                        .with_metadata("steps", request.approval_flow.len().to_string())
                        .with_metadata(
                            "external_reference",
                            receipt.external_reference.unwrap_or_default(),
                        ),
                );
                Ok(())
            }
            Err(error) => {
                warn!(
                    event_name = "approval.dispatch_failed",
                    correlation_id = %ctx.correlation_id,
                    ticket_id = %ticket.id,
                    error = %error,
                    "approval dispatch failed; ticket write rolled back"
                );
                self.audit.emit(
                    ctx.audit(&ticket.id)
                        .event("approval.dispatched", AuditCategory::Approval, AuditOutcome::Failed)
                        .with_metadata("error", error.to_string()),
                );
                Err(error.into())
            }
        }
    }

    async fn run_completion(
        &self,
        uow: &mut dyn UnitOfWork,
        ticket: &Ticket,
        actions: &[TicketAction],
        actor: &UserId,
        occurred_at: DateTime<Utc>,
    ) -> Result<MutationReport, ApplicationError> {
        let mut report = MutationReport::default();
        if actions.iter().any(|action| action.mutates_machines()) {
            self.recheck_eligibility(uow, ticket).await?;
        }
        for action in actions {
            let step = match action {
                TicketAction::ApplyMachineEffects => {
                    let target = match &ticket.target_location {
                        Some(id) => Some(
                            uow.find_location(id)
                                .await?
                                .ok_or_else(|| DomainError::LocationNotFound(id.0.clone()))?,
                        ),
                        None => None,
                    };
                    let machine_ids = ticket.machine_ids();
                    self.mutator
                        .apply(
                            uow,
                            &MutationRequest {
                                ticket_id: &ticket.id,
                                operation: ticket.operation,
                                machine_ids: &machine_ids,
                                target_location: target.as_ref(),
                                target_status: ticket.target_status,
                                borrow_terms: ticket.borrow_terms.as_ref(),
                                actor,
                                occurred_at,
                            },
                        )
                        .await?
                }
                TicketAction::ReconcileInventory => {
                    let count = ticket.inventory.as_ref().ok_or_else(|| {
                        DomainError::InvariantViolation(format!(
                            "inventory ticket `{}` has no count attached",
                            ticket.id
                        ))
                    })?;
                    let machine_ids = ticket.machine_ids();
                    self.reconciler
                        .reconcile(uow, &ticket.id, count, &machine_ids, actor, occurred_at)
                        .await?
                }
                TicketAction::DispatchApproval => continue,
            };
            report.machines_updated += step.machines_updated;
            report.machines_moved += step.machines_moved;
        }
        Ok(report)
    }

    fn log_completion(&self, ctx: &RequestContext, ticket: &Ticket, report: &MutationReport) {
        info!(
            event_name = "ticket.completed",
            correlation_id = %ctx.correlation_id,
            ticket_id = %ticket.id,
            operation = ticket.operation.as_str(),
            machines_updated = report.machines_updated,
            machines_moved = report.machines_moved,
            "ticket completed and machine state applied"
        );
        self.audit.emit(
            ctx.audit(&ticket.id)
                .event("mutation.applied", AuditCategory::Mutation, AuditOutcome::Success)
                .with_metadata("machines_updated", report.machines_updated.to_string())
                .with_metadata("machines_moved", report.machines_moved.to_string()),
        );
    }
}

fn ticket_details(
    category: TicketCategory,
    input: &NewTicket,
) -> Result<Vec<TicketDetail>, DomainError> {
    let details = match (&input.inventory, category) {
        // The count decides which machines the ticket covers; listed details
        // only contribute notes and may not name machines outside the count.
        (Some(count), TicketCategory::InventoryCheck) => {
            let counted = count.scanned_machine_ids();
            if let Some(extra) =
                input.details.iter().find(|detail| !counted.contains(&detail.machine_id))
            {
                return Err(DomainError::InvariantViolation(format!(
                    "machine `{}` is listed on the inventory check but was not counted",
                    extra.machine_id
                )));
            }
            counted
                .into_iter()
                .map(|machine_id| {
                    let note = input
                        .details
                        .iter()
                        .find(|detail| detail.machine_id == machine_id)
                        .and_then(|detail| detail.note.clone());
                    TicketDetail { machine_id, note }
                })
                .collect()
        }
        _ => input.details.clone(),
    };

    if details.is_empty() {
        return Err(DomainError::InvariantViolation(
            "a ticket must reference at least one machine".to_owned(),
        ));
    }
    let mut seen = HashSet::new();
    if let Some(duplicate) = details.iter().find(|detail| !seen.insert(&detail.machine_id)) {
        return Err(DomainError::DuplicateMachine(duplicate.machine_id.clone()));
    }
    Ok(details)
}

fn validate_shape(operation: OperationType, input: &NewTicket) -> Result<(), DomainError> {
    let category = operation.category();
    if input.target_location.is_none()
        && matches!(category, TicketCategory::Import | TicketCategory::InternalTransfer)
    {
        return Err(DomainError::InvariantViolation(format!(
            "`{category}` tickets need a target location"
        )));
    }
    if operation.requires_borrow_terms()
        && !input.borrow_terms.as_ref().is_some_and(BorrowTerms::has_counterparty)
    {
        return Err(DomainError::InvariantViolation(format!(
            "`{operation}` tickets need borrow terms with a counterparty"
        )));
    }
    if input.target_status.is_some() && category != TicketCategory::InternalTransfer {
        return Err(DomainError::InvariantViolation(
            "a target status override is only allowed on internal transfers".to_owned(),
        ));
    }
    if category == TicketCategory::InventoryCheck && input.inventory.is_none() {
        return Err(DomainError::InvariantViolation(
            "inventory check tickets need a count".to_owned(),
        ));
    }
    Ok(())
}

/// Reads the ticket inside the unit of work and checks nobody changed it
/// since the snapshot used for permission checks.
async fn reload(uow: &mut dyn UnitOfWork, snapshot: &Ticket) -> Result<Ticket, ApplicationError> {
    let ticket = reload_any(uow, &snapshot.id).await?;
    if ticket.version != snapshot.version {
        return Err(ApplicationError::Conflict(format!(
            "ticket `{}` changed while the request was being processed",
            ticket.id
        )));
    }
    Ok(ticket)
}

async fn reload_any(uow: &mut dyn UnitOfWork, id: &TicketId) -> Result<Ticket, ApplicationError> {
    uow.find_ticket(id).await?.ok_or_else(|| ApplicationError::TicketNotFound(id.clone()))
}

fn record_decision(flow: &mut ApprovalFlow, actor: &UserId, text: &str) {
    for step in flow.0.iter_mut().filter(|step| &step.approver == actor) {
        step.decision = StepDecision::Approved;
        step.status_text = Some(text.to_owned());
    }
}

fn final_approver(flow: &ApprovalFlow) -> Option<UserId> {
    flow.steps()
        .iter()
        .rev()
        .find(|step| step.is_final && step.decision == StepDecision::Approved)
        .map(|step| step.approver.clone())
}
