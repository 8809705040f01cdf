// File: giftbot-common/src/models/priority.rs

use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Dispatch-order tier for an alliance. Affects ordering only, never
/// eligibility.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord, sqlx::Type)]
#[sqlx(type_name = "TEXT")]
#[sqlx(rename_all = "lowercase")]
pub enum PriorityLevel {
    // Ord derives smallest-first, so Critical must come first here:
    // sorting candidates by tier then yields Critical -> High -> Normal.
    Critical,
    High,
    Normal,
}

impl Default for PriorityLevel {
    fn default() -> Self {
        PriorityLevel::Normal
    }
}

impl fmt::Display for PriorityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriorityLevel::Critical => write!(f, "critical"),
            PriorityLevel::High => write!(f, "high"),
            PriorityLevel::Normal => write!(f, "normal"),
        }
    }
}

impl FromStr for PriorityLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "critical" => Ok(PriorityLevel::Critical),
            "high" => Ok(PriorityLevel::High),
            "normal" => Ok(PriorityLevel::Normal),
            _ => Err(format!("Unknown priority level: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AlliancePriority {
    pub community_id: Uuid,
    pub alliance_id: Uuid,
    pub level: PriorityLevel,
}
