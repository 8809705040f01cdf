// File: giftbot-common/src/models/redemption.rs

use std::fmt;
use std::str::FromStr;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Final status of one `(community, code, account)` redemption.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Eq, PartialEq, Hash, sqlx::Type)]
#[sqlx(type_name = "TEXT")]
#[sqlx(rename_all = "snake_case")]
pub enum RedemptionStatus {
    Success,
    AlreadyRedeemed,
    Skipped,
    Failed,
}

impl RedemptionStatus {
    /// Terminal statuses are never attempted again; this is the idempotency
    /// guarantee of the whole engine.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RedemptionStatus::Success | RedemptionStatus::AlreadyRedeemed)
    }
}

impl fmt::Display for RedemptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RedemptionStatus::Success => write!(f, "success"),
            RedemptionStatus::AlreadyRedeemed => write!(f, "already_redeemed"),
            RedemptionStatus::Skipped => write!(f, "skipped"),
            RedemptionStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for RedemptionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "success" => Ok(RedemptionStatus::Success),
            "already_redeemed" => Ok(RedemptionStatus::AlreadyRedeemed),
            "skipped" => Ok(RedemptionStatus::Skipped),
            "failed" => Ok(RedemptionStatus::Failed),
            _ => Err(format!("Unknown redemption status: {}", s)),
        }
    }
}

/// Durable record of one redemption outcome, unique per
/// `(community_id, code, account_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RedemptionRecord {
    pub community_id: Uuid,
    pub code: String,
    pub account_id: String,
    pub status: RedemptionStatus,
    pub attempts: i32,
    pub last_attempt_at: DateTime<Utc>,
}

impl RedemptionRecord {
    pub fn new(
        community_id: Uuid,
        code: &str,
        account_id: &str,
        status: RedemptionStatus,
        attempts: i32,
    ) -> Self {
        Self {
            community_id,
            code: code.to_string(),
            account_id: account_id.to_string(),
            status,
            attempts,
            last_attempt_at: Utc::now(),
        }
    }
}
