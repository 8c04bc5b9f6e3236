use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::approval::ApprovalFlow;
use crate::domain::identity::{UnitId, UserId};
use crate::domain::location::LocationId;
use crate::domain::machine::{BorrowTerms, MachineId, MachineStatus};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TicketId(pub String);

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketCategory {
    Import,
    Export,
    InternalTransfer,
    InventoryCheck,
}

impl TicketCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Import => "import",
            Self::Export => "export",
            Self::InternalTransfer => "internal_transfer",
            Self::InventoryCheck => "inventory_check",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "import" => Some(Self::Import),
            "export" => Some(Self::Export),
            "internal_transfer" => Some(Self::InternalTransfer),
            "inventory_check" => Some(Self::InventoryCheck),
            _ => None,
        }
    }
}

impl fmt::Display for TicketCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The operation subtype of a ticket (`type_detail`). Parsing is the only way
/// to obtain one from outside input, so unknown operations never get past the
/// boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Purchased,
    MaintenanceReturn,
    Rented,
    Borrowed,
    BorrowedOutReturn,
    Liquidation,
    Maintenance,
    BorrowedOut,
    RentedReturn,
    BorrowedReturn,
    InternalTransfer,
    InventoryCheck,
}

impl OperationType {
    pub const ALL: [OperationType; 12] = [
        Self::Purchased,
        Self::MaintenanceReturn,
        Self::Rented,
        Self::Borrowed,
        Self::BorrowedOutReturn,
        Self::Liquidation,
        Self::Maintenance,
        Self::BorrowedOut,
        Self::RentedReturn,
        Self::BorrowedReturn,
        Self::InternalTransfer,
        Self::InventoryCheck,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purchased => "purchased",
            Self::MaintenanceReturn => "maintenance_return",
            Self::Rented => "rented",
            Self::Borrowed => "borrowed",
            Self::BorrowedOutReturn => "borrowed_out_return",
            Self::Liquidation => "liquidation",
            Self::Maintenance => "maintenance",
            Self::BorrowedOut => "borrowed_out",
            Self::RentedReturn => "rented_return",
            Self::BorrowedReturn => "borrowed_return",
            Self::InternalTransfer => "internal_transfer",
            Self::InventoryCheck => "inventory_check",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "purchased" => Some(Self::Purchased),
            "maintenance_return" => Some(Self::MaintenanceReturn),
            "rented" => Some(Self::Rented),
            "borrowed" => Some(Self::Borrowed),
            "borrowed_out_return" => Some(Self::BorrowedOutReturn),
            "liquidation" => Some(Self::Liquidation),
            "maintenance" => Some(Self::Maintenance),
            "borrowed_out" => Some(Self::BorrowedOut),
            "rented_return" => Some(Self::RentedReturn),
            "borrowed_return" => Some(Self::BorrowedReturn),
            "internal_transfer" => Some(Self::InternalTransfer),
            "inventory_check" => Some(Self::InventoryCheck),
            _ => None,
        }
    }

    pub fn category(&self) -> TicketCategory {
        match self {
            Self::Purchased
            | Self::MaintenanceReturn
            | Self::Rented
            | Self::Borrowed
            | Self::BorrowedOutReturn => TicketCategory::Import,
            Self::Liquidation
            | Self::Maintenance
            | Self::BorrowedOut
            | Self::RentedReturn
            | Self::BorrowedReturn => TicketCategory::Export,
            Self::InternalTransfer => TicketCategory::InternalTransfer,
            Self::InventoryCheck => TicketCategory::InventoryCheck,
        }
    }

    /// Operations that record a counterparty on the machine when completed.
    pub fn requires_borrow_terms(&self) -> bool {
        matches!(self, Self::Rented | Self::Borrowed | Self::BorrowedOut)
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Draft,
    Pending,
    PendingConfirmation,
    PendingApproval,
    Completed,
    Cancelled,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::PendingConfirmation => "pending_confirmation",
            Self::PendingApproval => "pending_approval",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "pending" => Some(Self::Pending),
            "pending_confirmation" => Some(Self::PendingConfirmation),
            "pending_approval" => Some(Self::PendingApproval),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending | Self::PendingConfirmation | Self::PendingApproval)
    }

    /// Position along the forward-only lifecycle. A status may only be
    /// replaced by one with a strictly higher rank.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Draft => 0,
            Self::Pending | Self::PendingConfirmation => 1,
            Self::PendingApproval => 2,
            Self::Completed | Self::Cancelled => 3,
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketDetail {
    pub machine_id: MachineId,
    pub note: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannedMachine {
    pub machine_id: MachineId,
    pub mislocated: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannedLocation {
    /// External location code read by the scanner.
    pub location_code: String,
    pub machines: Vec<ScannedMachine>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepartmentCount {
    pub unit_id: UnitId,
    pub locations: Vec<ScannedLocation>,
}

/// Result of a physical count attached to an inventory-check ticket.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryCount {
    pub departments: Vec<DepartmentCount>,
}

impl InventoryCount {
    pub fn scanned_machine_ids(&self) -> Vec<MachineId> {
        self.departments
            .iter()
            .flat_map(|department| department.locations.iter())
            .flat_map(|location| location.machines.iter())
            .map(|machine| machine.machine_id.clone())
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub category: TicketCategory,
    pub operation: OperationType,
    pub status: TicketStatus,
    pub source_unit: Option<UnitId>,
    pub target_location: Option<LocationId>,
    pub target_status: Option<MachineStatus>,
    pub borrow_terms: Option<BorrowTerms>,
    pub creator: UserId,
    pub approval_flow: ApprovalFlow,
    pub details: Vec<TicketDetail>,
    pub inventory: Option<InventoryCount>,
    pub note: Option<String>,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Ticket {
    pub fn machine_ids(&self) -> Vec<MachineId> {
        self.details.iter().map(|detail| detail.machine_id.clone()).collect()
    }
}
