use chrono::{DateTime, Utc};
use tracing::debug;

use crate::domain::identity::UserId;
use crate::domain::location::{Location, LocationKind};
use crate::domain::machine::{BorrowStatus, BorrowTerms, Machine, MachineId, MachineStatus};
use crate::domain::ticket::{OperationType, TicketCategory, TicketId};
use crate::errors::DomainError;
use crate::mutation::{relocate, MutationError, MutationReport};
use crate::store::UnitOfWork;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BorrowChange {
    Unchanged,
    Cleared,
    /// Sets the borrow status and records the ticket's counterparty terms.
    Lent(BorrowStatus),
    /// Sets a `*_return` borrow status and drops the RFID tag.
    Returned(BorrowStatus),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MachineEffect {
    pub status: MachineStatus,
    pub borrow: BorrowChange,
}

impl MachineEffect {
    /// Effect of completing `operation`. Internal transfers take the explicit
    /// override when given, otherwise the status implied by the destination.
    pub fn for_operation(
        operation: OperationType,
        destination: Option<LocationKind>,
        status_override: Option<MachineStatus>,
    ) -> Self {
        use BorrowChange::{Cleared, Lent, Returned, Unchanged};
        use MachineStatus::{Available, Disabled, InUse, Liquidation, Maintenance};

        let (status, borrow) = match operation {
            OperationType::Purchased | OperationType::BorrowedOutReturn => (Available, Cleared),
            OperationType::MaintenanceReturn => (Available, Unchanged),
            OperationType::Borrowed => (Available, Lent(BorrowStatus::Borrowed)),
            OperationType::Rented => (Available, Lent(BorrowStatus::Rented)),
            OperationType::Maintenance => (Maintenance, Unchanged),
            OperationType::Liquidation => (Liquidation, Cleared),
            OperationType::BorrowedOut => (Disabled, Lent(BorrowStatus::BorrowedOut)),
            OperationType::BorrowedReturn => (Disabled, Returned(BorrowStatus::BorrowedReturn)),
            OperationType::RentedReturn => (Disabled, Returned(BorrowStatus::RentedReturn)),
            OperationType::InternalTransfer | OperationType::InventoryCheck => {
                let implied = match destination {
                    Some(LocationKind::ShopFloor) => InUse,
                    Some(LocationKind::Warehouse) | None => Available,
                };
                (status_override.unwrap_or(implied), Unchanged)
            }
        };

        Self { status, borrow }
    }

    pub fn apply_to(&self, machine: &mut Machine, terms: Option<&BorrowTerms>) {
        machine.current_status = self.status;
        match self.borrow {
            BorrowChange::Unchanged => {}
            BorrowChange::Cleared => {
                machine.borrow_status = None;
                machine.borrow = BorrowTerms::default();
            }
            BorrowChange::Lent(status) => {
                machine.borrow_status = Some(status);
                machine.borrow = terms.cloned().unwrap_or_default();
            }
            BorrowChange::Returned(status) => {
                machine.borrow_status = Some(status);
                machine.rfid_tag = None;
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct MutationRequest<'a> {
    pub ticket_id: &'a TicketId,
    pub operation: OperationType,
    pub machine_ids: &'a [MachineId],
    pub target_location: Option<&'a Location>,
    pub target_status: Option<MachineStatus>,
    pub borrow_terms: Option<&'a BorrowTerms>,
    pub actor: &'a UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MachineStateMutator;

impl MachineStateMutator {
    /// Applies the completion effect to every machine on the ticket. Any
    /// failure leaves the unit of work unusable for commit by the caller.
    pub async fn apply(
        &self,
        uow: &mut dyn UnitOfWork,
        request: &MutationRequest<'_>,
    ) -> Result<MutationReport, MutationError> {
        let category = request.operation.category();
        if request.target_location.is_none()
            && matches!(category, TicketCategory::Import | TicketCategory::InternalTransfer)
        {
            return Err(DomainError::InvariantViolation(format!(
                "`{}` tickets need a target location",
                category
            ))
            .into());
        }

        let effect = MachineEffect::for_operation(
            request.operation,
            request.target_location.map(|location| location.kind),
            request.target_status,
        );
        let mut report = MutationReport::default();

        for machine_id in request.machine_ids {
            let mut machine = uow
                .find_machine(machine_id)
                .await?
                .ok_or_else(|| DomainError::MachineNotFound(machine_id.clone()))?;

            if let Some(target) = request.target_location {
                let moved = relocate(
                    uow,
                    machine_id,
                    &target.id,
                    request.actor,
                    request.ticket_id,
                    request.occurred_at,
                )
                .await?;
                if moved {
                    report.machines_moved += 1;
                }
            }

            effect.apply_to(&mut machine, request.borrow_terms);
            machine.updated_at = request.occurred_at;
            uow.save_machine(&machine).await?;
            report.machines_updated += 1;

            debug!(
                event_name = "mutation.machine_updated",
                ticket_id = %request.ticket_id,
                machine_id = %machine_id,
                status = machine.current_status.as_str(),
                borrow_status = BorrowStatus::label(machine.borrow_status),
                "machine state updated"
            );
        }

        Ok(report)
    }
}
