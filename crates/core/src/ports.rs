//! Outbound collaborators of the ticket engine: the identity directory and
//! the external approval service.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::approval::ApprovalFlow;
use crate::domain::identity::{UnitId, UserId};
use crate::domain::machine::MachineId;
use crate::domain::ticket::{OperationType, TicketCategory, TicketId};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("identity directory unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn has_capability(&self, user: &UserId, capability: &str)
        -> Result<bool, DirectoryError>;
    async fn unit_of(&self, user: &UserId) -> Result<Option<UnitId>, DirectoryError>;
    async fn members_of(&self, unit: &UnitId) -> Result<Vec<UserId>, DirectoryError>;
    async fn display_name(&self, user: &UserId) -> Result<Option<String>, DirectoryError>;
}

#[derive(Clone, Debug, Default)]
struct DirectoryUser {
    unit: Option<UnitId>,
    display_name: Option<String>,
    capabilities: BTreeSet<String>,
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryIdentityDirectory {
    users: BTreeMap<UserId, DirectoryUser>,
}

impl InMemoryIdentityDirectory {
    pub fn with_user(
        mut self,
        user: &str,
        unit: &str,
        display_name: &str,
        capabilities: &[&str],
    ) -> Self {
        self.users.insert(
            UserId(user.to_owned()),
            DirectoryUser {
                unit: Some(UnitId(unit.to_owned())),
                display_name: Some(display_name.to_owned()),
                capabilities: capabilities.iter().map(|cap| (*cap).to_owned()).collect(),
            },
        );
        self
    }
}

#[async_trait]
impl IdentityDirectory for InMemoryIdentityDirectory {
    async fn has_capability(
        &self,
        user: &UserId,
        capability: &str,
    ) -> Result<bool, DirectoryError> {
        Ok(self.users.get(user).is_some_and(|entry| entry.capabilities.contains(capability)))
    }

    async fn unit_of(&self, user: &UserId) -> Result<Option<UnitId>, DirectoryError> {
        Ok(self.users.get(user).and_then(|entry| entry.unit.clone()))
    }

    async fn members_of(&self, unit: &UnitId) -> Result<Vec<UserId>, DirectoryError> {
        Ok(self
            .users
            .iter()
            .filter(|(_, entry)| {
                entry.unit.as_ref().is_some_and(|member| member.same_unit(unit))
            })
            .map(|(user, _)| user.clone())
            .collect())
    }

    async fn display_name(&self, user: &UserId) -> Result<Option<String>, DirectoryError> {
        Ok(self.users.get(user).and_then(|entry| entry.display_name.clone()))
    }
}

/// One row of the tabular summary shown to approvers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchLine {
    pub machine_id: MachineId,
    pub machine_name: String,
    pub current_status: String,
    pub from_location: Option<String>,
    pub to_location: Option<String>,
    pub note: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub ticket_id: TicketId,
    pub category: TicketCategory,
    pub operation: OperationType,
    pub creator: UserId,
    pub approval_flow: ApprovalFlow,
    pub lines: Vec<DispatchLine>,
    pub correlation_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReceipt {
    pub external_reference: Option<String>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("approval service rejected the request: {0}")]
    Rejected(String),
    #[error("approval service unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ApprovalDispatch: Send + Sync {
    async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchReceipt, DispatchError>;
}

/// Records every request; optionally rejects them all.
#[derive(Clone, Default)]
pub struct RecordingApprovalDispatch {
    requests: Arc<Mutex<Vec<DispatchRequest>>>,
    rejection: Option<String>,
}

impl RecordingApprovalDispatch {
    pub fn rejecting(reason: impl Into<String>) -> Self {
        Self { requests: Arc::default(), rejection: Some(reason.into()) }
    }

    pub fn requests(&self) -> Vec<DispatchRequest> {
        match self.requests.lock() {
            Ok(requests) => requests.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl ApprovalDispatch for RecordingApprovalDispatch {
    async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchReceipt, DispatchError> {
        match self.requests.lock() {
            Ok(mut requests) => requests.push(request.clone()),
            Err(poisoned) => poisoned.into_inner().push(request.clone()),
        }
        match &self.rejection {
            Some(reason) => Err(DispatchError::Rejected(reason.clone())),
            None => Ok(DispatchReceipt {
                external_reference: Some(format!("ext-{}", request.ticket_id)),
            }),
        }
    }
}
