//! Machine-state effects applied when a ticket completes.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::identity::UserId;
use crate::domain::location::{LocationAssignment, LocationHistoryEntry, LocationId};
use crate::domain::machine::MachineId;
use crate::domain::ticket::TicketId;
use crate::errors::{ApplicationError, DomainError};
use crate::store::{StoreError, UnitOfWork};

pub mod inventory;
pub mod mutator;

pub use inventory::InventoryReconciler;
pub use mutator::{BorrowChange, MachineEffect, MachineStateMutator, MutationRequest};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MutationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<MutationError> for ApplicationError {
    fn from(value: MutationError) -> Self {
        match value {
            MutationError::Domain(error) => Self::Domain(error),
            MutationError::Store(error) => Self::from(error),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MutationReport {
    pub machines_updated: usize,
    pub machines_moved: usize,
}

/// Moves a machine to `target`, writing one history row when the location
/// actually changes. Returns whether it moved.
pub(crate) async fn relocate(
    uow: &mut dyn UnitOfWork,
    machine_id: &MachineId,
    target: &LocationId,
    actor: &UserId,
    ticket_id: &TicketId,
    occurred_at: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let current = uow.current_location(machine_id).await?;
    if current.as_ref().is_some_and(|assignment| &assignment.location_id == target) {
        uow.touch_location(machine_id, occurred_at).await?;
        return Ok(false);
    }

    uow.append_history(&LocationHistoryEntry {
        id: Uuid::new_v4().to_string(),
        machine_id: machine_id.clone(),
        from_location: current.as_ref().map(|assignment| assignment.location_id.clone()),
        to_location: target.clone(),
        moved_at: occurred_at,
        actor: actor.clone(),
        ticket_id: Some(ticket_id.clone()),
    })
    .await?;
    uow.upsert_location(&LocationAssignment {
        machine_id: machine_id.clone(),
        location_id: target.clone(),
        assigned_at: occurred_at,
        updated_at: occurred_at,
    })
    .await?;
    Ok(true)
}
