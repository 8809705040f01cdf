// File: giftbot-common/src/models/job.rs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::code::normalize_code;

/// Identity of one coordinator run: one community working one code.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub struct JobKey {
    pub community_id: Uuid,
    pub code: String,
}

impl JobKey {
    pub fn new(community_id: Uuid, code: &str) -> Self {
        Self {
            community_id,
            code: normalize_code(code),
        }
    }
}

/// Aggregate result of a completed job, handed to the notification layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobSummary {
    pub succeeded: u32,
    pub already_redeemed: u32,
    pub skipped: u32,
    pub failed: u32,
    pub total_roster: u32,
    /// `(account_id, reason)` pairs for everything that was skipped, e.g.
    /// ("12345", "vip_required").
    pub skipped_reasons: Vec<(String, String)>,
}

impl JobSummary {
    pub fn record_skip(&mut self, account_id: &str, reason: &str) {
        self.skipped += 1;
        self.skipped_reasons
            .push((account_id.to_string(), reason.to_string()));
    }
}
