//! Which machines may take part in which ticket operation.
//!
//! One row per operation, each row a predicate over the machine's
//! `(status, borrow_status)` pair. Anything not covered is rejected.

use serde::{Deserialize, Serialize};

use crate::domain::machine::{BorrowStatus, Machine, MachineStatus};
use crate::domain::ticket::OperationType;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityDecision {
    pub eligible: bool,
    pub reason: Option<String>,
}

impl EligibilityDecision {
    fn allow() -> Self {
        Self { eligible: true, reason: None }
    }

    fn deny(reason: String) -> Self {
        Self { eligible: false, reason: Some(reason) }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct EligibilityRules;

impl EligibilityRules {
    pub fn is_eligible(
        &self,
        operation: OperationType,
        status: MachineStatus,
        borrow_status: Option<BorrowStatus>,
    ) -> EligibilityDecision {
        if row_allows(operation, status, borrow_status) {
            return EligibilityDecision::allow();
        }

        EligibilityDecision::deny(format!(
            "status `{status}` with borrow status `{}` is not eligible for `{operation}`",
            BorrowStatus::label(borrow_status)
        ))
    }

    /// Checks a concrete machine and reports the offending machine on failure.
    pub fn check_machine(
        &self,
        operation: OperationType,
        machine: &Machine,
    ) -> Result<(), DomainError> {
        if row_allows(operation, machine.current_status, machine.borrow_status) {
            return Ok(());
        }

        Err(DomainError::IneligibleMachine {
            machine_id: machine.id.clone(),
            operation,
            status: machine.current_status,
            borrow_status: machine.borrow_status,
        })
    }

    /// Stops at the first ineligible machine; a ticket is accepted whole or
    /// not at all.
    pub fn check_all<'a>(
        &self,
        operation: OperationType,
        machines: impl IntoIterator<Item = &'a Machine>,
    ) -> Result<(), DomainError> {
        machines.into_iter().try_for_each(|machine| self.check_machine(operation, machine))
    }
}

fn row_allows(
    operation: OperationType,
    status: MachineStatus,
    borrow_status: Option<BorrowStatus>,
) -> bool {
    use BorrowStatus as B;
    use MachineStatus::{Available, Broken, Disabled, InUse, Maintenance, PendingLiquidation};

    match operation {
        OperationType::Purchased => status == Available && borrow_status.is_none(),
        OperationType::MaintenanceReturn => status == Maintenance && borrow_status.is_none(),
        OperationType::Rented | OperationType::Borrowed => {
            (status == Available && borrow_status.is_none())
                || (status == Disabled
                    && matches!(borrow_status, Some(B::BorrowedReturn | B::RentedReturn)))
        }
        OperationType::BorrowedOutReturn => {
            status == Disabled && borrow_status == Some(B::BorrowedOut)
        }
        OperationType::Liquidation => {
            matches!(status, Available | InUse | Broken | PendingLiquidation)
                && borrow_status.is_none()
        }
        OperationType::Maintenance => {
            matches!(status, Available | InUse | Broken) && borrow_status.is_none()
        }
        OperationType::BorrowedOut => {
            matches!(status, Available | InUse) && borrow_status.is_none()
        }
        OperationType::RentedReturn => {
            matches!(status, Available | InUse | Broken) && borrow_status == Some(B::Rented)
        }
        OperationType::BorrowedReturn => {
            matches!(status, Available | InUse | Broken) && borrow_status == Some(B::Borrowed)
        }
        OperationType::InternalTransfer => {
            matches!(status, Available | InUse | Broken)
                && matches!(borrow_status, None | Some(B::Borrowed) | Some(B::Rented))
        }
        OperationType::InventoryCheck => {
            matches!(status, Available | InUse | Broken | PendingLiquidation)
        }
    }
}
