use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::location::LocationId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MachineId(pub String);

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineStatus {
    Available,
    InUse,
    Maintenance,
    Broken,
    Disabled,
    Liquidation,
    PendingLiquidation,
}

impl MachineStatus {
    pub const ALL: [MachineStatus; 7] = [
        Self::Available,
        Self::InUse,
        Self::Maintenance,
        Self::Broken,
        Self::Disabled,
        Self::Liquidation,
        Self::PendingLiquidation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::InUse => "in_use",
            Self::Maintenance => "maintenance",
            Self::Broken => "broken",
            Self::Disabled => "disabled",
            Self::Liquidation => "liquidation",
            Self::PendingLiquidation => "pending_liquidation",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "available" => Some(Self::Available),
            "in_use" => Some(Self::InUse),
            "maintenance" => Some(Self::Maintenance),
            "broken" => Some(Self::Broken),
            "disabled" => Some(Self::Disabled),
            "liquidation" => Some(Self::Liquidation),
            "pending_liquidation" => Some(Self::PendingLiquidation),
            _ => None,
        }
    }
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BorrowStatus {
    Borrowed,
    Rented,
    BorrowedOut,
    BorrowedReturn,
    RentedReturn,
}

impl BorrowStatus {
    pub const ALL: [BorrowStatus; 5] = [
        Self::Borrowed,
        Self::Rented,
        Self::BorrowedOut,
        Self::BorrowedReturn,
        Self::RentedReturn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Borrowed => "borrowed",
            Self::Rented => "rented",
            Self::BorrowedOut => "borrowed_out",
            Self::BorrowedReturn => "borrowed_return",
            Self::RentedReturn => "rented_return",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "borrowed" => Some(Self::Borrowed),
            "rented" => Some(Self::Rented),
            "borrowed_out" => Some(Self::BorrowedOut),
            "borrowed_return" => Some(Self::BorrowedReturn),
            "rented_return" => Some(Self::RentedReturn),
            _ => None,
        }
    }

    /// Renders an optional borrow status the way rejection messages and
    /// storage expect it (`none` when unset).
    pub fn label(value: Option<BorrowStatus>) -> &'static str {
        value.map(|status| status.as_str()).unwrap_or("none")
    }
}

/// Counterparty and dates recorded when a machine is lent, borrowed or rented.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowTerms {
    pub counterparty: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
}

impl BorrowTerms {
    pub fn has_counterparty(&self) -> bool {
        self.counterparty.as_deref().map(|name| !name.trim().is_empty()).unwrap_or(false)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    pub id: MachineId,
    pub name: String,
    pub current_status: MachineStatus,
    pub borrow_status: Option<BorrowStatus>,
    pub borrow: BorrowTerms,
    pub rfid_tag: Option<String>,
    /// Mirrors the current location assignment; the assignment table is
    /// authoritative.
    pub location_id: Option<LocationId>,
    pub version: u32,
    pub updated_at: DateTime<Utc>,
}
