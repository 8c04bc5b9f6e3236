use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::identity::{UnitId, UserId};
use crate::domain::machine::MachineId;
use crate::domain::ticket::TicketId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocationId(pub String);

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a location is used for. Drives the status a machine takes when it
/// lands there.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationKind {
    Warehouse,
    ShopFloor,
}

impl LocationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warehouse => "warehouse",
            Self::ShopFloor => "shop_floor",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "warehouse" => Some(Self::Warehouse),
            "shop_floor" => Some(Self::ShopFloor),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    /// External code printed on the location label and used by scanners.
    pub code: String,
    pub name: String,
    pub unit_id: UnitId,
    pub kind: LocationKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationAssignment {
    pub machine_id: MachineId,
    pub location_id: LocationId,
    pub assigned_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationHistoryEntry {
    pub id: String,
    pub machine_id: MachineId,
    pub from_location: Option<LocationId>,
    pub to_location: LocationId,
    pub moved_at: DateTime<Utc>,
    pub actor: UserId,
    pub ticket_id: Option<TicketId>,
}

#[cfg(test)]
mod tests {
    use super::LocationKind;

    #[test]
    fn location_kind_round_trips_from_storage_encoding() {
        for kind in [LocationKind::Warehouse, LocationKind::ShopFloor] {
            assert_eq!(LocationKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(LocationKind::parse("office"), None);
    }
}
