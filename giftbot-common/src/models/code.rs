// File: giftbot-common/src/models/code.rs

use std::fmt;
use std::str::FromStr;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Validation state of a gift code as last observed by discovery or the
/// redemption API itself.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Eq, PartialEq, Hash, sqlx::Type)]
#[sqlx(type_name = "TEXT")]
#[sqlx(rename_all = "lowercase")]
pub enum CodeValidity {
    Unknown,
    Valid,
    Invalid,
    Expired,
}

impl fmt::Display for CodeValidity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodeValidity::Unknown => write!(f, "unknown"),
            CodeValidity::Valid => write!(f, "valid"),
            CodeValidity::Invalid => write!(f, "invalid"),
            CodeValidity::Expired => write!(f, "expired"),
        }
    }
}

impl FromStr for CodeValidity {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unknown" => Ok(CodeValidity::Unknown),
            "valid" => Ok(CodeValidity::Valid),
            "invalid" => Ok(CodeValidity::Invalid),
            "expired" => Ok(CodeValidity::Expired),
            _ => Err(format!("Unknown code validity: {}", s)),
        }
    }
}

impl CodeValidity {
    /// A code in one of these states has stopped working; a later flip back
    /// to `Valid` is a reactivation.
    pub fn is_closed(&self) -> bool {
        matches!(self, CodeValidity::Invalid | CodeValidity::Expired)
    }
}

/// One promotional gift code, keyed by its normalized (uppercase) string.
/// Whether the code has been fully processed lives in [`CodeProgress`], not
/// here, so there is exactly one answer to that question.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GiftCode {
    pub code: String,
    pub discovered_at: DateTime<Utc>,
    pub validity: CodeValidity,
}

impl GiftCode {
    /// Codes arrive from scraping in mixed case; they are compared and
    /// persisted uppercase everywhere.
    pub fn new(raw: &str, discovered_at: DateTime<Utc>) -> Self {
        Self {
            code: normalize_code(raw),
            discovered_at,
            validity: CodeValidity::Unknown,
        }
    }
}

pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Row of the `code_progress` table: has every dispatched community finished
/// this code?
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CodeProgress {
    pub code: String,
    pub globally_processed: bool,
    pub updated_at: DateTime<Utc>,
}

/// Append-only audit row written whenever a closed code comes back to life.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReactivationEvent {
    pub code: String,
    pub previous_status: CodeValidity,
    pub reactivated_at: DateTime<Utc>,
}
