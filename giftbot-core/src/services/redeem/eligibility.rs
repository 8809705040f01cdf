// File: src/services/redeem/eligibility.rs

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use giftbot_common::models::{Account, CodeRequirement, RedemptionRecord};
use giftbot_common::traits::repository_traits::{ProgressStore, RequirementRepository};

/// Roster split produced by one filtering pass.
#[derive(Debug, Default)]
pub struct EligibilityOutcome {
    /// Accounts that still need an attempt, roster order preserved.
    pub candidates: Vec<Account>,
    /// Accounts pre-skipped by code requirements: `(account_id, reason)`.
    pub skipped: Vec<(String, String)>,
    /// Accounts with a terminal record already on file.
    pub already_done: Vec<String>,
    /// Requirement in force when the split was made.
    pub requirement: CodeRequirement,
}

/// Decides which roster accounts still need a redemption attempt.
///
/// The whole roster is resolved with a single batched store lookup;
/// sequential per-account queries on the shared main loop once stalled the
/// host process for minutes and must never come back.
pub struct EligibilityFilter {
    store: Arc<dyn ProgressStore>,
    requirements: Arc<dyn RequirementRepository>,
}

impl EligibilityFilter {
    pub fn new(store: Arc<dyn ProgressStore>, requirements: Arc<dyn RequirementRepository>) -> Self {
        Self { store, requirements }
    }

    pub async fn filter(
        &self,
        community_id: Uuid,
        code: &str,
        roster: &[Account],
    ) -> EligibilityOutcome {
        let requirement = match self.requirements.get_requirement(code).await {
            Ok(Some(req)) => req,
            Ok(None) => CodeRequirement::none(code),
            Err(e) => {
                warn!("Requirement lookup failed for {}: {:?}; assuming none", code, e);
                CodeRequirement::none(code)
            }
        };

        let account_ids: Vec<String> = roster.iter().map(|a| a.account_id.clone()).collect();
        let records: Vec<RedemptionRecord> = match self
            .store
            .get_records_for_accounts(community_id, code, &account_ids)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                // Fail open: attempting accounts that may already be done is
                // recoverable (the API answers ALREADY_RECEIVED); silently
                // skipping a whole roster is not.
                warn!(
                    "Batch record lookup failed for {} / community {}: {:?}; proceeding with full roster",
                    code, community_id, e
                );
                Vec::new()
            }
        };

        let mut outcome = EligibilityOutcome {
            requirement: requirement.clone(),
            ..Default::default()
        };

        for account in roster {
            let terminal = records
                .iter()
                .find(|r| r.account_id == account.account_id)
                .map(|r| r.status.is_terminal())
                .unwrap_or(false);

            if terminal {
                outcome.already_done.push(account.account_id.clone());
                continue;
            }

            if let Some(reason) = requirement.skip_reason(account) {
                outcome
                    .skipped
                    .push((account.account_id.clone(), reason.to_string()));
                continue;
            }

            outcome.candidates.push(account.clone());
        }

        debug!(
            "Eligibility for {} / community {}: {} candidates, {} skipped, {} already done",
            code,
            community_id,
            outcome.candidates.len(),
            outcome.skipped.len(),
            outcome.already_done.len()
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FailingProgressStore, MemoryProgressStore, MemoryRequirementRepository};
    use giftbot_common::models::{RedemptionStatus, RedemptionRecord};
    use giftbot_common::traits::repository_traits::ProgressStore as _;

    fn account(id: &str, level: i32, vip: Option<bool>) -> Account {
        Account {
            account_id: id.to_string(),
            display_name: format!("player-{}", id),
            level,
            alliance_id: None,
            is_vip: vip,
        }
    }

    #[tokio::test]
    async fn terminal_records_reduce_candidates_with_one_lookup() {
        let store = Arc::new(MemoryProgressStore::default());
        let community = Uuid::new_v4();

        // 2 of 5 already have terminal records.
        for id in ["1", "2"] {
            store
                .upsert_record(&RedemptionRecord::new(
                    community, "CODE", id, RedemptionStatus::Success, 1,
                ))
                .await
                .unwrap();
        }

        let roster: Vec<Account> = (1..=5).map(|i| account(&i.to_string(), 30, None)).collect();
        let filter = EligibilityFilter::new(store.clone(), Arc::new(MemoryRequirementRepository::default()));
        let outcome = filter.filter(community, "CODE", &roster).await;

        assert_eq!(outcome.candidates.len(), 3);
        assert_eq!(outcome.already_done.len(), 2);
        assert_eq!(store.batch_lookup_count(), 1);
    }

    #[tokio::test]
    async fn requirement_skips_carry_reasons() {
        let mut req = CodeRequirement::none("VIPONLY");
        req.vip_required = true;
        req.min_level = 20;

        let filter = EligibilityFilter::new(
            Arc::new(MemoryProgressStore::default()),
            Arc::new(MemoryRequirementRepository::with(req)),
        );
        let roster = vec![
            account("vip", 30, Some(true)),
            account("not_vip", 30, Some(false)),
            account("low", 10, Some(true)),
        ];
        let outcome = filter.filter(Uuid::new_v4(), "VIPONLY", &roster).await;

        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].account_id, "vip");
        assert!(outcome
            .skipped
            .contains(&("not_vip".to_string(), "vip_required".to_string())));
        assert!(outcome
            .skipped
            .contains(&("low".to_string(), "level_too_low".to_string())));
    }

    #[tokio::test]
    async fn store_failure_fails_open_to_full_roster() {
        let filter = EligibilityFilter::new(
            Arc::new(FailingProgressStore::default()),
            Arc::new(MemoryRequirementRepository::default()),
        );
        let roster: Vec<Account> = (1..=4).map(|i| account(&i.to_string(), 30, None)).collect();
        let outcome = filter.filter(Uuid::new_v4(), "CODE", &roster).await;

        assert_eq!(outcome.candidates.len(), 4);
        assert!(outcome.already_done.is_empty());
    }
}
