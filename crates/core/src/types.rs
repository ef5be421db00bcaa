//! Core types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a player nation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NationId(pub u64);

impl fmt::Display for NationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "nation-{}", self.0)
    }
}

/// Identifier of a stake record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StakeId(pub u64);

impl fmt::Display for StakeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stake-{}", self.0)
    }
}

/// Identifier of a contest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContestId(pub u64);

impl fmt::Display for ContestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "contest-{}", self.0)
    }
}

/// Territory control status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerritoryStatus {
    /// Nobody controls the territory
    Unclaimed,
    /// Controlled by a nation
    Claimed,
    /// A pending contest references the territory
    Contested,
    /// Controlled and defense level at or above the fortify threshold
    Fortified,
}

impl TerritoryStatus {
    /// Check if the territory has a controller
    pub fn is_controlled(&self) -> bool {
        !matches!(self, TerritoryStatus::Unclaimed)
    }

    /// Check if the territory may be attacked
    pub fn is_attackable(&self) -> bool {
        matches!(self, TerritoryStatus::Claimed | TerritoryStatus::Fortified)
    }

    /// Wire name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            TerritoryStatus::Unclaimed => "unclaimed",
            TerritoryStatus::Claimed => "claimed",
            TerritoryStatus::Contested => "contested",
            TerritoryStatus::Fortified => "fortified",
        }
    }
}

impl fmt::Display for TerritoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
