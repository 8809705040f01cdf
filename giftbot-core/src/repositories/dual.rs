// File: src/repositories/dual.rs

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;
use uuid::Uuid;

use giftbot_common::models::{CodeProgress, RedemptionRecord};
use giftbot_common::traits::repository_traits::ProgressStore;
use crate::Error;

/// Composite progress store over a primary durable backend and a secondary
/// local one.
///
/// Writes go to both; the write succeeds if at least one backend accepts it,
/// and a partial failure is logged, never surfaced to the job. Reads prefer
/// the primary and fall back to the secondary only when the primary errors —
/// a primary that answers "no rows" is trusted, so an unreachable store is
/// never conflated with "nothing redeemed".
pub struct DualProgressStore {
    primary: Arc<dyn ProgressStore>,
    secondary: Arc<dyn ProgressStore>,
}

impl DualProgressStore {
    pub fn new(primary: Arc<dyn ProgressStore>, secondary: Arc<dyn ProgressStore>) -> Self {
        Self { primary, secondary }
    }

    fn combine_writes(
        op: &str,
        primary: Result<(), Error>,
        secondary: Result<(), Error>,
    ) -> Result<(), Error> {
        match (primary, secondary) {
            (Ok(()), Ok(())) => Ok(()),
            (Ok(()), Err(e)) => {
                warn!("Secondary store degraded during {}: {:?}", op, e);
                Ok(())
            }
            (Err(e), Ok(())) => {
                warn!("Primary store degraded during {}: {:?}", op, e);
                Ok(())
            }
            (Err(p), Err(s)) => {
                warn!("Both stores rejected {}: primary {:?}, secondary {:?}", op, p, s);
                Err(p)
            }
        }
    }
}

#[async_trait]
impl ProgressStore for DualProgressStore {
    async fn get_code_progress(&self, code: &str) -> Result<Option<CodeProgress>, Error> {
        match self.primary.get_code_progress(code).await {
            Ok(progress) => Ok(progress),
            Err(e) => {
                warn!("Primary store unreachable reading code progress: {:?}", e);
                self.secondary.get_code_progress(code).await
            }
        }
    }

    async fn set_globally_processed(&self, code: &str, processed: bool) -> Result<(), Error> {
        let p = self.primary.set_globally_processed(code, processed).await;
        let s = self.secondary.set_globally_processed(code, processed).await;
        Self::combine_writes("set_globally_processed", p, s)
    }

    async fn list_unprocessed_codes(&self) -> Result<Vec<String>, Error> {
        match self.primary.list_unprocessed_codes().await {
            Ok(codes) => Ok(codes),
            Err(e) => {
                warn!("Primary store unreachable listing unprocessed codes: {:?}", e);
                self.secondary.list_unprocessed_codes().await
            }
        }
    }

    async fn upsert_record(&self, record: &RedemptionRecord) -> Result<(), Error> {
        let p = self.primary.upsert_record(record).await;
        let s = self.secondary.upsert_record(record).await;
        Self::combine_writes("upsert_record", p, s)
    }

    async fn get_record(
        &self,
        community_id: Uuid,
        code: &str,
        account_id: &str,
    ) -> Result<Option<RedemptionRecord>, Error> {
        match self.primary.get_record(community_id, code, account_id).await {
            Ok(record) => Ok(record),
            Err(e) => {
                warn!("Primary store unreachable reading record: {:?}", e);
                self.secondary.get_record(community_id, code, account_id).await
            }
        }
    }

    async fn get_records_for_accounts(
        &self,
        community_id: Uuid,
        code: &str,
        account_ids: &[String],
    ) -> Result<Vec<RedemptionRecord>, Error> {
        match self
            .primary
            .get_records_for_accounts(community_id, code, account_ids)
            .await
        {
            Ok(records) => Ok(records),
            Err(e) => {
                warn!("Primary store unreachable on batch lookup: {:?}", e);
                self.secondary
                    .get_records_for_accounts(community_id, code, account_ids)
                    .await
            }
        }
    }

    async fn delete_records_for_code(&self, code: &str) -> Result<u64, Error> {
        let p = self.primary.delete_records_for_code(code).await;
        let s = self.secondary.delete_records_for_code(code).await;
        match (p, s) {
            (Ok(n), Ok(_)) => Ok(n),
            (Ok(n), Err(e)) => {
                warn!("Secondary store degraded during delete: {:?}", e);
                Ok(n)
            }
            (Err(e), Ok(n)) => {
                warn!("Primary store degraded during delete: {:?}", e);
                Ok(n)
            }
            (Err(p), Err(s)) => {
                warn!("Both stores rejected delete: primary {:?}, secondary {:?}", p, s);
                Err(p)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FailingProgressStore, MemoryProgressStore};
    use giftbot_common::models::RedemptionStatus;

    #[tokio::test]
    async fn write_succeeds_when_one_backend_accepts() {
        let primary = Arc::new(FailingProgressStore::default());
        let secondary = Arc::new(MemoryProgressStore::default());
        let dual = DualProgressStore::new(primary, secondary.clone());

        let rec = RedemptionRecord::new(Uuid::new_v4(), "X", "1", RedemptionStatus::Success, 1);
        dual.upsert_record(&rec).await.expect("one acceptance is enough");

        let got = secondary
            .get_record(rec.community_id, "X", "1")
            .await
            .unwrap();
        assert!(got.is_some());
    }

    #[tokio::test]
    async fn read_falls_back_only_on_primary_error() {
        let community = Uuid::new_v4();
        let secondary = Arc::new(MemoryProgressStore::default());
        let rec = RedemptionRecord::new(community, "X", "1", RedemptionStatus::Success, 1);
        secondary.upsert_record(&rec).await.unwrap();

        // Unreachable primary: fallback kicks in.
        let dual = DualProgressStore::new(
            Arc::new(FailingProgressStore::default()),
            secondary.clone(),
        );
        assert!(dual.get_record(community, "X", "1").await.unwrap().is_some());

        // Healthy but empty primary: its answer is trusted, no fallback.
        let dual = DualProgressStore::new(Arc::new(MemoryProgressStore::default()), secondary);
        assert!(dual.get_record(community, "X", "1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn write_fails_only_when_both_backends_reject() {
        let dual = DualProgressStore::new(
            Arc::new(FailingProgressStore::default()),
            Arc::new(FailingProgressStore::default()),
        );
        let rec = RedemptionRecord::new(Uuid::new_v4(), "X", "1", RedemptionStatus::Failed, 1);
        assert!(dual.upsert_record(&rec).await.is_err());
    }
}
