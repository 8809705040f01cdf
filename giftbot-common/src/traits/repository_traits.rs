// File: giftbot-common/src/traits/repository_traits.rs

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Error;
use crate::models::code::{CodeProgress, CodeValidity, GiftCode, ReactivationEvent};
use crate::models::community::Community;
use crate::models::priority::{AlliancePriority, PriorityLevel};
use crate::models::redemption::RedemptionRecord;
use crate::models::requirement::CodeRequirement;

/// Durable idempotent redemption tracking: the `code_progress` table plus the
/// `redemption_records` table keyed `(community_id, code, account_id)`.
///
/// Implemented by the primary (postgres) and secondary (sqlite) backends and
/// by the dual-write composite the coordinator actually uses.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn get_code_progress(&self, code: &str) -> Result<Option<CodeProgress>, Error>;
    async fn set_globally_processed(&self, code: &str, processed: bool) -> Result<(), Error>;

    /// Codes with `globally_processed = false`, i.e. work to re-dispatch
    /// after a restart.
    async fn list_unprocessed_codes(&self) -> Result<Vec<String>, Error>;

    /// Atomic upsert; last writer wins per key.
    async fn upsert_record(&self, record: &RedemptionRecord) -> Result<(), Error>;

    async fn get_record(
        &self,
        community_id: Uuid,
        code: &str,
        account_id: &str,
    ) -> Result<Option<RedemptionRecord>, Error>;

    /// One round trip for a whole roster. Implementations must not loop over
    /// per-account queries.
    async fn get_records_for_accounts(
        &self,
        community_id: Uuid,
        code: &str,
        account_ids: &[String],
    ) -> Result<Vec<RedemptionRecord>, Error>;

    /// Clears every community's records for a code (reactivation). Returns
    /// the number of rows removed.
    async fn delete_records_for_code(&self, code: &str) -> Result<u64, Error>;
}

#[async_trait]
pub trait CodeRepository: Send + Sync {
    async fn upsert_code(&self, code: &GiftCode) -> Result<(), Error>;
    async fn get_code(&self, code: &str) -> Result<Option<GiftCode>, Error>;
    async fn set_validity(&self, code: &str, validity: CodeValidity) -> Result<(), Error>;
    async fn list_codes(&self) -> Result<Vec<GiftCode>, Error>;
}

#[async_trait]
pub trait RequirementRepository: Send + Sync {
    async fn get_requirement(&self, code: &str) -> Result<Option<CodeRequirement>, Error>;
    async fn upsert_requirement(&self, req: &CodeRequirement) -> Result<(), Error>;

    /// Used when the redemption API teaches us a requirement mid-job.
    async fn mark_vip_required(&self, code: &str) -> Result<(), Error>;
    async fn raise_min_level(&self, code: &str, min_level: i32) -> Result<(), Error>;
}

#[async_trait]
pub trait PriorityRepository: Send + Sync {
    async fn get_priorities(&self, community_id: Uuid) -> Result<Vec<AlliancePriority>, Error>;
    async fn set_priority(
        &self,
        community_id: Uuid,
        alliance_id: Uuid,
        level: PriorityLevel,
    ) -> Result<(), Error>;
}

#[async_trait]
pub trait CommunityRepository: Send + Sync {
    async fn get_community(&self, community_id: Uuid) -> Result<Option<Community>, Error>;
    async fn list_enabled_communities(&self) -> Result<Vec<Community>, Error>;
    async fn upsert_community(&self, community: &Community) -> Result<(), Error>;
}

#[async_trait]
pub trait ReactivationHistoryRepository: Send + Sync {
    /// Append-only; reactivation events are audit data and never updated.
    async fn record_reactivation(&self, event: &ReactivationEvent) -> Result<(), Error>;
    async fn list_reactivations(&self, code: &str) -> Result<Vec<ReactivationEvent>, Error>;
}
