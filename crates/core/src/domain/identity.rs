use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId(pub String);

impl UnitId {
    /// Unit ids coming from the directory and from configuration differ in
    /// case and padding.
    pub fn same_unit(&self, other: &UnitId) -> bool {
        crate::approvals::normalize_key(&self.0) == crate::approvals::normalize_key(&other.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A resolved approver: identity plus the name shown in the approval UI.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approver {
    pub user_id: UserId,
    pub display_name: String,
}

impl Approver {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self { user_id: UserId(user_id.into()), display_name: display_name.into() }
    }
}
