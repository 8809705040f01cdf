// File: src/test_utils/mod.rs
//
// In-memory doubles shared by unit and integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use giftbot_common::models::{
    Account, AlliancePriority, CodeProgress, CodeRequirement, CodeValidity, Community, GiftCode,
    PriorityLevel, ReactivationEvent, RedemptionRecord,
};
use giftbot_common::traits::repository_traits::{
    CodeRepository, CommunityRepository, PriorityRepository, ProgressStore,
    ReactivationHistoryRepository, RequirementRepository,
};
use crate::Error;
use crate::platforms::wos::{AttemptExecutor, RawOutcome, Session, SessionProvider};
use crate::services::redeem::RosterProvider;

/// DashMap-backed progress store; counts batch lookups so tests can assert
/// "one store call per roster".
#[derive(Default)]
pub struct MemoryProgressStore {
    progress: DashMap<String, CodeProgress>,
    records: DashMap<(Uuid, String, String), RedemptionRecord>,
    batch_lookups: AtomicUsize,
}

impl MemoryProgressStore {
    pub fn batch_lookup_count(&self) -> usize {
        self.batch_lookups.load(Ordering::SeqCst)
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn get_code_progress(&self, code: &str) -> Result<Option<CodeProgress>, Error> {
        Ok(self.progress.get(code).map(|p| p.clone()))
    }

    async fn set_globally_processed(&self, code: &str, processed: bool) -> Result<(), Error> {
        self.progress.insert(
            code.to_string(),
            CodeProgress {
                code: code.to_string(),
                globally_processed: processed,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn list_unprocessed_codes(&self) -> Result<Vec<String>, Error> {
        Ok(self
            .progress
            .iter()
            .filter(|p| !p.globally_processed)
            .map(|p| p.code.clone())
            .collect())
    }

    async fn upsert_record(&self, record: &RedemptionRecord) -> Result<(), Error> {
        self.records.insert(
            (
                record.community_id,
                record.code.clone(),
                record.account_id.clone(),
            ),
            record.clone(),
        );
        Ok(())
    }

    async fn get_record(
        &self,
        community_id: Uuid,
        code: &str,
        account_id: &str,
    ) -> Result<Option<RedemptionRecord>, Error> {
        Ok(self
            .records
            .get(&(community_id, code.to_string(), account_id.to_string()))
            .map(|r| r.clone()))
    }

    async fn get_records_for_accounts(
        &self,
        community_id: Uuid,
        code: &str,
        account_ids: &[String],
    ) -> Result<Vec<RedemptionRecord>, Error> {
        self.batch_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(account_ids
            .iter()
            .filter_map(|id| {
                self.records
                    .get(&(community_id, code.to_string(), id.clone()))
                    .map(|r| r.clone())
            })
            .collect())
    }

    async fn delete_records_for_code(&self, code: &str) -> Result<u64, Error> {
        let before = self.records.len();
        self.records.retain(|(_, c, _), _| c != code);
        Ok((before - self.records.len()) as u64)
    }
}

/// A store that is always down. Every call errors.
#[derive(Default)]
pub struct FailingProgressStore;

fn offline() -> Error {
    Error::Platform("store offline".to_string())
}

#[async_trait]
impl ProgressStore for FailingProgressStore {
    async fn get_code_progress(&self, _code: &str) -> Result<Option<CodeProgress>, Error> {
        Err(offline())
    }
    async fn set_globally_processed(&self, _code: &str, _processed: bool) -> Result<(), Error> {
        Err(offline())
    }
    async fn list_unprocessed_codes(&self) -> Result<Vec<String>, Error> {
        Err(offline())
    }
    async fn upsert_record(&self, _record: &RedemptionRecord) -> Result<(), Error> {
        Err(offline())
    }
    async fn get_record(
        &self,
        _community_id: Uuid,
        _code: &str,
        _account_id: &str,
    ) -> Result<Option<RedemptionRecord>, Error> {
        Err(offline())
    }
    async fn get_records_for_accounts(
        &self,
        _community_id: Uuid,
        _code: &str,
        _account_ids: &[String],
    ) -> Result<Vec<RedemptionRecord>, Error> {
        Err(offline())
    }
    async fn delete_records_for_code(&self, _code: &str) -> Result<u64, Error> {
        Err(offline())
    }
}

#[derive(Default)]
pub struct MemoryRequirementRepository {
    requirements: DashMap<String, CodeRequirement>,
}

impl MemoryRequirementRepository {
    pub fn with(req: CodeRequirement) -> Self {
        let repo = Self::default();
        repo.requirements.insert(req.code.clone(), req);
        repo
    }
}

#[async_trait]
impl RequirementRepository for MemoryRequirementRepository {
    async fn get_requirement(&self, code: &str) -> Result<Option<CodeRequirement>, Error> {
        Ok(self.requirements.get(code).map(|r| r.clone()))
    }

    async fn upsert_requirement(&self, req: &CodeRequirement) -> Result<(), Error> {
        self.requirements.insert(req.code.clone(), req.clone());
        Ok(())
    }

    async fn mark_vip_required(&self, code: &str) -> Result<(), Error> {
        let mut req = self
            .requirements
            .get(code)
            .map(|r| r.clone())
            .unwrap_or_else(|| CodeRequirement::none(code));
        req.vip_required = true;
        req.learned_from_error = true;
        req.updated_at = Utc::now();
        self.requirements.insert(code.to_string(), req);
        Ok(())
    }

    async fn raise_min_level(&self, code: &str, min_level: i32) -> Result<(), Error> {
        let mut req = self
            .requirements
            .get(code)
            .map(|r| r.clone())
            .unwrap_or_else(|| CodeRequirement::none(code));
        req.min_level = req.min_level.max(min_level);
        req.learned_from_error = true;
        req.updated_at = Utc::now();
        self.requirements.insert(code.to_string(), req);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryCodeRepository {
    codes: DashMap<String, GiftCode>,
}

#[async_trait]
impl CodeRepository for MemoryCodeRepository {
    async fn upsert_code(&self, code: &GiftCode) -> Result<(), Error> {
        self.codes.insert(code.code.clone(), code.clone());
        Ok(())
    }

    async fn get_code(&self, code: &str) -> Result<Option<GiftCode>, Error> {
        Ok(self.codes.get(code).map(|c| c.clone()))
    }

    async fn set_validity(&self, code: &str, validity: CodeValidity) -> Result<(), Error> {
        match self.codes.get_mut(code) {
            Some(mut existing) => {
                existing.validity = validity;
                Ok(())
            }
            None => Err(Error::NotFound(format!("code {} is not registered", code))),
        }
    }

    async fn list_codes(&self) -> Result<Vec<GiftCode>, Error> {
        Ok(self.codes.iter().map(|c| c.clone()).collect())
    }
}

#[derive(Default)]
pub struct MemoryCommunityRepository {
    communities: DashMap<Uuid, Community>,
}

#[async_trait]
impl CommunityRepository for MemoryCommunityRepository {
    async fn get_community(&self, community_id: Uuid) -> Result<Option<Community>, Error> {
        Ok(self.communities.get(&community_id).map(|c| c.clone()))
    }

    async fn list_enabled_communities(&self) -> Result<Vec<Community>, Error> {
        Ok(self
            .communities
            .iter()
            .filter(|c| c.auto_redeem_enabled)
            .map(|c| c.clone())
            .collect())
    }

    async fn upsert_community(&self, community: &Community) -> Result<(), Error> {
        self.communities
            .insert(community.community_id, community.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryPriorityRepository {
    priorities: DashMap<(Uuid, Uuid), PriorityLevel>,
}

#[async_trait]
impl PriorityRepository for MemoryPriorityRepository {
    async fn get_priorities(&self, community_id: Uuid) -> Result<Vec<AlliancePriority>, Error> {
        Ok(self
            .priorities
            .iter()
            .filter(|e| e.key().0 == community_id)
            .map(|e| AlliancePriority {
                community_id: e.key().0,
                alliance_id: e.key().1,
                level: *e.value(),
            })
            .collect())
    }

    async fn set_priority(
        &self,
        community_id: Uuid,
        alliance_id: Uuid,
        level: PriorityLevel,
    ) -> Result<(), Error> {
        self.priorities.insert((community_id, alliance_id), level);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryReactivationHistory {
    events: DashMap<String, Vec<ReactivationEvent>>,
}

#[async_trait]
impl ReactivationHistoryRepository for MemoryReactivationHistory {
    async fn record_reactivation(&self, event: &ReactivationEvent) -> Result<(), Error> {
        self.events
            .entry(event.code.clone())
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn list_reactivations(&self, code: &str) -> Result<Vec<ReactivationEvent>, Error> {
        Ok(self.events.get(code).map(|e| e.clone()).unwrap_or_default())
    }
}

/// Fixed rosters keyed by community.
#[derive(Default)]
pub struct StaticRosterProvider {
    rosters: DashMap<Uuid, Vec<Account>>,
}

impl StaticRosterProvider {
    pub fn with(community_id: Uuid, roster: Vec<Account>) -> Self {
        let provider = Self::default();
        provider.rosters.insert(community_id, roster);
        provider
    }

    pub fn insert(&self, community_id: Uuid, roster: Vec<Account>) {
        self.rosters.insert(community_id, roster);
    }
}

#[async_trait]
impl RosterProvider for StaticRosterProvider {
    async fn get_roster(&self, community_id: Uuid) -> Result<Vec<Account>, Error> {
        self.rosters
            .get(&community_id)
            .map(|r| r.clone())
            .ok_or_else(|| Error::NotFound(format!("no roster for community {}", community_id)))
    }
}

/// Session provider that always succeeds and counts acquisitions per account.
/// Every session carries a distinct captcha token, the way a real login plus
/// captcha solve would.
#[derive(Default)]
pub struct CountingSessionProvider {
    acquisitions: DashMap<String, usize>,
}

impl CountingSessionProvider {
    pub fn acquisitions_for(&self, account_id: &str) -> usize {
        self.acquisitions.get(account_id).map(|n| *n).unwrap_or(0)
    }
}

#[async_trait]
impl SessionProvider for CountingSessionProvider {
    async fn acquire(&self, account_id: &str) -> Result<Session, Error> {
        let mut count = self.acquisitions.entry(account_id.to_string()).or_insert(0);
        *count += 1;
        let token = format!("solved-{}-{}", account_id, *count);
        drop(count);
        Ok(Session {
            account_id: account_id.to_string(),
            captcha_token: token,
            acquired_at: Utc::now(),
        })
    }
}

/// Executor that replays a per-account script of outcomes and counts calls.
/// Once a script runs dry it repeats its last entry.
pub struct ScriptedExecutor {
    scripts: DashMap<String, Mutex<Vec<RawOutcome>>>,
    fallback: RawOutcome,
    calls: DashMap<String, usize>,
    order: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new(fallback: RawOutcome) -> Self {
        Self {
            scripts: DashMap::new(),
            fallback,
            calls: DashMap::new(),
            order: Mutex::new(Vec::new()),
        }
    }

    pub fn script(self, account_id: &str, outcomes: Vec<RawOutcome>) -> Self {
        self.scripts
            .insert(account_id.to_string(), Mutex::new(outcomes));
        self
    }

    pub fn calls_for(&self, account_id: &str) -> usize {
        self.calls.get(account_id).map(|n| *n).unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.iter().map(|e| *e.value()).sum()
    }

    /// Account ids in the order their attempts arrived.
    pub async fn call_order(&self) -> Vec<String> {
        self.order.lock().await.clone()
    }
}

#[async_trait]
impl AttemptExecutor for ScriptedExecutor {
    async fn attempt(&self, session: &Session, _code: &str) -> Result<RawOutcome, Error> {
        *self
            .calls
            .entry(session.account_id.clone())
            .or_insert(0) += 1;
        self.order.lock().await.push(session.account_id.clone());

        if let Some(script) = self.scripts.get(&session.account_id) {
            let mut outcomes = script.lock().await;
            if outcomes.len() > 1 {
                return Ok(outcomes.remove(0));
            }
            if let Some(last) = outcomes.first() {
                return Ok(last.clone());
            }
        }
        Ok(self.fallback.clone())
    }
}
