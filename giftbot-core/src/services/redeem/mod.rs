// File: src/services/redeem/mod.rs
//
// The auto-redemption engine proper: eligibility filtering, the retry state
// machine, job locks, the per-job coordinator, the trigger surface, and the
// reactivation detector.

use async_trait::async_trait;
use uuid::Uuid;

use giftbot_common::models::Account;
use crate::Error;

pub mod coordinator;
pub mod eligibility;
pub mod job_locks;
pub mod reactivation;
pub mod retry;
pub mod triggers;

pub use coordinator::{CompletionTracker, RedemptionCoordinator};
pub use eligibility::{EligibilityFilter, EligibilityOutcome};
pub use job_locks::{JobLockGuard, JobLockService};
pub use reactivation::ReactivationDetector;
pub use retry::{AttemptCounters, FinalOutcome, LearnedRequirement, NextAction, RetryPolicy};
pub use triggers::RedeemTriggerService;

/// Roster management collaborator: supplies the accounts a community wants
/// redeemed. Called once per job during filtering.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RosterProvider: Send + Sync {
    async fn get_roster(&self, community_id: Uuid) -> Result<Vec<Account>, Error>;
}
