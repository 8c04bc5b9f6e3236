//! Persistence ports used by the ticket engine.
//!
//! Every mutating operation runs inside one [`UnitOfWork`]. Dropping a unit
//! of work without calling [`UnitOfWork::commit`] discards its writes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::location::{Location, LocationAssignment, LocationHistoryEntry, LocationId};
use crate::domain::machine::{Machine, MachineId};
use crate::domain::ticket::{Ticket, TicketId};

pub mod memory;

pub use memory::InMemoryStore;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("stored record could not be decoded: {0}")]
    Decode(String),
    #[error("{entity} `{id}` was modified concurrently")]
    Conflict { entity: &'static str, id: String },
    #[error("unit of work is already closed")]
    Closed,
}

#[async_trait]
pub trait TicketStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError>;

    /// Committed snapshot of a ticket, read outside any unit of work.
    async fn ticket(&self, id: &TicketId) -> Result<Option<Ticket>, StoreError>;

    async fn location(&self, id: &LocationId) -> Result<Option<Location>, StoreError>;
}

#[async_trait]
pub trait UnitOfWork: Send {
    async fn find_machine(&mut self, id: &MachineId) -> Result<Option<Machine>, StoreError>;

    /// Writes status, borrow and RFID fields. `machine.version` must be the
    /// version that was read; the stored version is bumped and returned.
    async fn save_machine(&mut self, machine: &Machine) -> Result<u32, StoreError>;

    async fn current_location(
        &mut self,
        machine_id: &MachineId,
    ) -> Result<Option<LocationAssignment>, StoreError>;

    async fn upsert_location(&mut self, assignment: &LocationAssignment) -> Result<(), StoreError>;

    async fn touch_location(
        &mut self,
        machine_id: &MachineId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn append_history(&mut self, entry: &LocationHistoryEntry) -> Result<(), StoreError>;

    async fn find_location(&mut self, id: &LocationId) -> Result<Option<Location>, StoreError>;

    async fn find_location_by_code(&mut self, code: &str) -> Result<Option<Location>, StoreError>;

    async fn find_ticket(&mut self, id: &TicketId) -> Result<Option<Ticket>, StoreError>;

    async fn insert_ticket(&mut self, ticket: &Ticket) -> Result<(), StoreError>;

    /// Same version contract as [`UnitOfWork::save_machine`].
    async fn update_ticket(&mut self, ticket: &Ticket) -> Result<u32, StoreError>;

    async fn commit(&mut self) -> Result<(), StoreError>;
}
