use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::location::{Location, LocationAssignment, LocationHistoryEntry, LocationId};
use crate::domain::machine::{Machine, MachineId};
use crate::domain::ticket::{Ticket, TicketId};
use crate::store::{StoreError, TicketStore, UnitOfWork};

#[derive(Clone, Debug, Default)]
struct MemoryState {
    machines: BTreeMap<MachineId, Machine>,
    locations: BTreeMap<LocationId, Location>,
    assignments: BTreeMap<MachineId, LocationAssignment>,
    history: Vec<LocationHistoryEntry>,
    tickets: BTreeMap<TicketId, Ticket>,
}

/// Store backed by process memory. A unit of work holds the store lock for
/// its whole lifetime and edits a private copy that replaces the shared state
/// on commit, so units of work are serialized and all-or-nothing.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryStore {
    pub async fn insert_machine(&self, machine: Machine) {
        self.state.lock().await.machines.insert(machine.id.clone(), machine);
    }

    pub async fn remove_machine(&self, id: &MachineId) {
        let mut state = self.state.lock().await;
        state.machines.remove(id);
        state.assignments.remove(id);
    }

    pub async fn insert_location(&self, location: Location) {
        self.state.lock().await.locations.insert(location.id.clone(), location);
    }

    pub async fn assign(&self, machine_id: &MachineId, location_id: &LocationId) {
        let now = Utc::now();
        self.state.lock().await.assignments.insert(
            machine_id.clone(),
            LocationAssignment {
                machine_id: machine_id.clone(),
                location_id: location_id.clone(),
                assigned_at: now,
                updated_at: now,
            },
        );
    }

    pub async fn machine(&self, id: &MachineId) -> Option<Machine> {
        let state = self.state.lock().await;
        machine_with_location(&state, id)
    }

    pub async fn assignment(&self, machine_id: &MachineId) -> Option<LocationAssignment> {
        self.state.lock().await.assignments.get(machine_id).cloned()
    }

    pub async fn history(&self) -> Vec<LocationHistoryEntry> {
        self.state.lock().await.history.clone()
    }

    pub async fn ticket_count(&self) -> usize {
        self.state.lock().await.tickets.len()
    }
}

fn machine_with_location(state: &MemoryState, id: &MachineId) -> Option<Machine> {
    state.machines.get(id).cloned().map(|mut machine| {
        machine.location_id =
            state.assignments.get(id).map(|assignment| assignment.location_id.clone());
        machine
    })
}

#[async_trait]
impl TicketStore for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryUnitOfWork { guard: Some(guard), working }))
    }

    async fn ticket(&self, id: &TicketId) -> Result<Option<Ticket>, StoreError> {
        Ok(self.state.lock().await.tickets.get(id).cloned())
    }

    async fn location(&self, id: &LocationId) -> Result<Option<Location>, StoreError> {
        Ok(self.state.lock().await.locations.get(id).cloned())
    }
}

struct InMemoryUnitOfWork {
    guard: Option<OwnedMutexGuard<MemoryState>>,
    working: MemoryState,
}

impl InMemoryUnitOfWork {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.guard.is_some() {
            Ok(())
        } else {
            Err(StoreError::Closed)
        }
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn find_machine(&mut self, id: &MachineId) -> Result<Option<Machine>, StoreError> {
        self.ensure_open()?;
        Ok(machine_with_location(&self.working, id))
    }

    async fn save_machine(&mut self, machine: &Machine) -> Result<u32, StoreError> {
        self.ensure_open()?;
        let stored = self
            .working
            .machines
            .get_mut(&machine.id)
            .filter(|stored| stored.version == machine.version)
            .ok_or_else(|| StoreError::Conflict { entity: "machine", id: machine.id.0.clone() })?;

        let next_version = machine.version + 1;
        *stored = Machine { version: next_version, location_id: None, ..machine.clone() };
        Ok(next_version)
    }

    async fn current_location(
        &mut self,
        machine_id: &MachineId,
    ) -> Result<Option<LocationAssignment>, StoreError> {
        self.ensure_open()?;
        Ok(self.working.assignments.get(machine_id).cloned())
    }

    async fn upsert_location(&mut self, assignment: &LocationAssignment) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.working.assignments.insert(assignment.machine_id.clone(), assignment.clone());
        Ok(())
    }

    async fn touch_location(
        &mut self,
        machine_id: &MachineId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.ensure_open()?;
        if let Some(assignment) = self.working.assignments.get_mut(machine_id) {
            assignment.updated_at = at;
        }
        Ok(())
    }

    async fn append_history(&mut self, entry: &LocationHistoryEntry) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.working.history.push(entry.clone());
        Ok(())
    }

    async fn find_location(&mut self, id: &LocationId) -> Result<Option<Location>, StoreError> {
        self.ensure_open()?;
        Ok(self.working.locations.get(id).cloned())
    }

    async fn find_location_by_code(&mut self, code: &str) -> Result<Option<Location>, StoreError> {
        self.ensure_open()?;
        let code = code.trim();
        Ok(self
            .working
            .locations
            .values()
            .find(|location| location.code.eq_ignore_ascii_case(code))
            .cloned())
    }

    async fn find_ticket(&mut self, id: &TicketId) -> Result<Option<Ticket>, StoreError> {
        self.ensure_open()?;
        Ok(self.working.tickets.get(id).cloned())
    }

    async fn insert_ticket(&mut self, ticket: &Ticket) -> Result<(), StoreError> {
        self.ensure_open()?;
        if self.working.tickets.contains_key(&ticket.id) {
            return Err(StoreError::Conflict { entity: "ticket", id: ticket.id.0.clone() });
        }
        self.working.tickets.insert(ticket.id.clone(), ticket.clone());
        Ok(())
    }

    async fn update_ticket(&mut self, ticket: &Ticket) -> Result<u32, StoreError> {
        self.ensure_open()?;
        let stored = self
            .working
            .tickets
            .get_mut(&ticket.id)
            .filter(|stored| stored.version == ticket.version)
            .ok_or_else(|| StoreError::Conflict { entity: "ticket", id: ticket.id.0.clone() })?;

        let next_version = ticket.version + 1;
        *stored = Ticket { version: next_version, ..ticket.clone() };
        Ok(next_version)
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let mut guard = self.guard.take().ok_or(StoreError::Closed)?;
        *guard = std::mem::take(&mut self.working);
        Ok(())
    }
}
