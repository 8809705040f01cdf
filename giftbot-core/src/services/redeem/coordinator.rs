// File: src/services/redeem/coordinator.rs
//
// One job = one (community, code) pair, driven through
// Queued -> Locked -> Filtering -> Dispatching -> Draining -> Completed.
// Account pipelines run in a bounded worker pool; a failure in one account
// never aborts the rest of the job.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use dashmap::DashMap;
use futures_util::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use giftbot_common::models::{
    Account, CodeRequirement, JobKey, JobSummary, PriorityLevel, RedemptionRecord,
    RedemptionStatus,
};
use giftbot_common::traits::repository_traits::{
    PriorityRepository, ProgressStore, RequirementRepository,
};
use crate::Error;
use crate::config::RedeemConfig;
use crate::eventbus::{EventBus, RedeemEvent};
use crate::platforms::wos::{AttemptExecutor, SessionProvider};
use super::RosterProvider;
use super::eligibility::EligibilityFilter;
use super::job_locks::JobLockService;
use super::retry::{AttemptCounters, AttemptState, LearnedRequirement, NextAction, RetryPolicy};

#[derive(Debug)]
struct Countdown {
    remaining: usize,
    abandoned: bool,
}

/// Tracks how many dispatched communities still owe a completion for each
/// code. `globally_processed` flips only when the countdown seeded at trigger
/// time reaches zero with no job having aborted.
#[derive(Clone, Default)]
pub struct CompletionTracker {
    countdowns: Arc<DashMap<String, Countdown>>,
}

impl CompletionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called by the trigger surface when it fans a code out to `count`
    /// communities. Concurrent triggers accumulate; their no-op jobs each
    /// hand their registration back via `complete_one`.
    pub fn register(&self, code: &str, count: usize) {
        if count == 0 {
            return;
        }
        self.countdowns
            .entry(code.to_string())
            .or_insert(Countdown { remaining: 0, abandoned: false })
            .remaining += count;
    }

    /// One community finished (or no-opped). Returns true when this was the
    /// last outstanding registration and no sibling job aborted. A job run
    /// outside any fan-out stands alone and completes immediately.
    pub fn complete_one(&self, code: &str) -> bool {
        match self.countdowns.get_mut(code) {
            None => true,
            Some(mut countdown) => {
                countdown.remaining = countdown.remaining.saturating_sub(1);
                if countdown.remaining == 0 {
                    let abandoned = countdown.abandoned;
                    drop(countdown);
                    self.countdowns.remove(code);
                    !abandoned
                } else {
                    false
                }
            }
        }
    }

    /// A job aborted at the job level. Its slot is consumed, and the whole
    /// countdown is poisoned: the code stays unprocessed so startup
    /// reconciliation re-dispatches it.
    pub fn abandon(&self, code: &str) {
        if let Some(mut countdown) = self.countdowns.get_mut(code) {
            countdown.abandoned = true;
            countdown.remaining = countdown.remaining.saturating_sub(1);
            if countdown.remaining == 0 {
                drop(countdown);
                self.countdowns.remove(code);
            }
        }
    }
}

/// Requirement knowledge shared by the workers of one job, so a VIP/level
/// error learned by one account pre-skips the accounts still queued behind it.
struct SharedRequirement {
    vip_required: AtomicBool,
    min_level: AtomicI32,
}

impl SharedRequirement {
    fn seed(req: &CodeRequirement) -> Self {
        Self {
            vip_required: AtomicBool::new(req.vip_required),
            min_level: AtomicI32::new(req.min_level),
        }
    }

    fn skip_reason(&self, account: &Account) -> Option<&'static str> {
        if self.vip_required.load(Ordering::SeqCst) && account.is_vip == Some(false) {
            return Some("vip_required");
        }
        if account.level < self.min_level.load(Ordering::SeqCst) {
            return Some("level_too_low");
        }
        None
    }
}

struct WorkerCtx {
    community_id: Uuid,
    code: String,
    sessions: Arc<dyn SessionProvider>,
    executor: Arc<dyn AttemptExecutor>,
    store: Arc<dyn ProgressStore>,
    requirements: Arc<dyn RequirementRepository>,
    policy: RetryPolicy,
    shared_req: SharedRequirement,
    bus: EventBus,
}

#[derive(Debug)]
struct AccountResult {
    account_id: String,
    status: RedemptionStatus,
    skip_reason: Option<String>,
}

impl AccountResult {
    fn failed(account_id: String) -> Self {
        Self {
            account_id,
            status: RedemptionStatus::Failed,
            skip_reason: None,
        }
    }
}

pub struct RedemptionCoordinator {
    store: Arc<dyn ProgressStore>,
    requirements: Arc<dyn RequirementRepository>,
    priorities: Arc<dyn PriorityRepository>,
    roster: Arc<dyn RosterProvider>,
    sessions: Arc<dyn SessionProvider>,
    executor: Arc<dyn AttemptExecutor>,
    locks: JobLockService,
    completion: CompletionTracker,
    bus: EventBus,
    config: RedeemConfig,
}

impl RedemptionCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn ProgressStore>,
        requirements: Arc<dyn RequirementRepository>,
        priorities: Arc<dyn PriorityRepository>,
        roster: Arc<dyn RosterProvider>,
        sessions: Arc<dyn SessionProvider>,
        executor: Arc<dyn AttemptExecutor>,
        locks: JobLockService,
        completion: CompletionTracker,
        bus: EventBus,
        config: RedeemConfig,
    ) -> Self {
        Self {
            store,
            requirements,
            priorities,
            roster,
            sessions,
            executor,
            locks,
            completion,
            bus,
            config,
        }
    }

    pub fn locks(&self) -> &JobLockService {
        &self.locks
    }

    pub fn completion(&self) -> &CompletionTracker {
        &self.completion
    }

    /// Runs one job to completion. Returns `Ok(None)` when another run for
    /// the same `(community, code)` already holds the lock — the idempotent
    /// no-op that absorbs duplicate triggers.
    ///
    /// Only job-level infra failures (roster fetch) surface as `Err`;
    /// per-account trouble stays inside the summary.
    pub async fn run_job(
        &self,
        community_id: Uuid,
        code: &str,
    ) -> Result<Option<JobSummary>, Error> {
        let key = JobKey::new(community_id, code);
        let code = key.code.clone();

        let Some(_guard) = self.locks.try_acquire(&key) else {
            info!(
                "Job for {} / community {} already running; dropping duplicate trigger",
                code, community_id
            );
            // Consume this trigger's countdown slot. When the real run (and
            // every sibling) already handed theirs back, this was the last
            // outstanding slot and the flag flips now rather than waiting
            // for the next startup scan.
            if self.completion.complete_one(&code) {
                if let Err(e) = self.store.set_globally_processed(&code, true).await {
                    warn!("Could not flag {} globally processed: {:?}", code, e);
                }
            }
            return Ok(None);
        };

        debug!("Job {} / community {}: filtering", code, community_id);
        let roster = match self.roster.get_roster(community_id).await {
            Ok(roster) => roster,
            Err(e) => {
                error!(
                    "Roster fetch failed for community {}; aborting job for {}: {:?}",
                    community_id, code, e
                );
                self.completion.abandon(&code);
                return Err(e);
            }
        };

        let filter = EligibilityFilter::new(Arc::clone(&self.store), Arc::clone(&self.requirements));
        let eligibility = filter.filter(community_id, &code, &roster).await;

        let mut summary = JobSummary {
            total_roster: roster.len() as u32,
            ..Default::default()
        };
        summary.already_redeemed += eligibility.already_done.len() as u32;

        for (account_id, reason) in &eligibility.skipped {
            summary.record_skip(account_id, reason);
            let record =
                RedemptionRecord::new(community_id, &code, account_id, RedemptionStatus::Skipped, 0);
            if let Err(e) = self.store.upsert_record(&record).await {
                warn!("Could not persist skip record for {}: {:?}", account_id, e);
            }
        }

        if eligibility.candidates.is_empty() {
            info!(
                "Job {} / community {}: nothing to do ({} already done, {} skipped)",
                code,
                community_id,
                eligibility.already_done.len(),
                eligibility.skipped.len()
            );
            self.finish(community_id, &code, &summary).await;
            return Ok(Some(summary));
        }

        // Dispatching: Critical -> High -> Normal, stable within each tier.
        let tiers = match self.priorities.get_priorities(community_id).await {
            Ok(tiers) => tiers,
            Err(e) => {
                warn!("Priority lookup failed for community {}: {:?}", community_id, e);
                Vec::new()
            }
        };
        let tier_of = |account: &Account| -> PriorityLevel {
            account
                .alliance_id
                .and_then(|aid| tiers.iter().find(|p| p.alliance_id == aid))
                .map(|p| p.level)
                .unwrap_or_default()
        };
        let mut candidates = eligibility.candidates;
        candidates.sort_by_key(|a| tier_of(a));

        debug!(
            "Job {} / community {}: dispatching {} accounts at concurrency {}",
            code,
            community_id,
            candidates.len(),
            self.config.worker_concurrency
        );

        let ctx = Arc::new(WorkerCtx {
            community_id,
            code: code.clone(),
            sessions: Arc::clone(&self.sessions),
            executor: Arc::clone(&self.executor),
            store: Arc::clone(&self.store),
            requirements: Arc::clone(&self.requirements),
            policy: RetryPolicy::new(&self.config),
            shared_req: SharedRequirement::seed(&eligibility.requirement),
            bus: self.bus.clone(),
        });

        let semaphore = Arc::new(Semaphore::new(self.config.worker_concurrency.max(1)));
        let mut workers: JoinSet<AccountResult> = JoinSet::new();
        for account in candidates {
            let semaphore = Arc::clone(&semaphore);
            let ctx = Arc::clone(&ctx);
            let account_id = account.account_id.clone();
            workers.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return AccountResult::failed(account_id),
                };
                match std::panic::AssertUnwindSafe(redeem_account(ctx, account))
                    .catch_unwind()
                    .await
                {
                    Ok(result) => result,
                    Err(_) => {
                        error!("Account pipeline panicked for {}", account_id);
                        AccountResult::failed(account_id)
                    }
                }
            });
        }

        // Draining: every in-flight attempt (including its internal retries)
        // runs to a terminal state.
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(result) => {
                    debug!("Account {} finished as {}", result.account_id, result.status);
                    match result.status {
                        RedemptionStatus::Success => summary.succeeded += 1,
                        RedemptionStatus::AlreadyRedeemed => summary.already_redeemed += 1,
                        RedemptionStatus::Skipped => {
                            let reason = result.skip_reason.as_deref().unwrap_or("skipped");
                            summary.record_skip(&result.account_id, reason);
                        }
                        RedemptionStatus::Failed => summary.failed += 1,
                    }
                }
                Err(e) => {
                    error!("Worker task failed to join: {:?}", e);
                    summary.failed += 1;
                }
            }
        }

        self.finish(community_id, &code, &summary).await;
        Ok(Some(summary))
    }

    async fn finish(&self, community_id: Uuid, code: &str, summary: &JobSummary) {
        info!(
            "Job {} / community {} completed: {} succeeded, {} already redeemed, {} skipped, {} failed of {}",
            code,
            community_id,
            summary.succeeded,
            summary.already_redeemed,
            summary.skipped,
            summary.failed,
            summary.total_roster
        );

        if self.completion.complete_one(code) {
            if let Err(e) = self.store.set_globally_processed(code, true).await {
                warn!("Could not flag {} globally processed: {:?}", code, e);
            }
        }

        self.bus
            .publish(RedeemEvent::JobCompleted {
                community_id,
                code: code.to_string(),
                summary: summary.clone(),
            })
            .await;
    }
}

/// The full pipeline for one account: session, attempt, classification, and
/// retries, until a terminal state. Persists its own record.
async fn redeem_account(ctx: Arc<WorkerCtx>, account: Account) -> AccountResult {
    // A requirement learned by an earlier worker pre-skips this account
    // without spending a session on it.
    if let Some(reason) = ctx.shared_req.skip_reason(&account) {
        let record = RedemptionRecord::new(
            ctx.community_id,
            &ctx.code,
            &account.account_id,
            RedemptionStatus::Skipped,
            0,
        );
        persist(&ctx, &record).await;
        return AccountResult {
            account_id: account.account_id,
            status: RedemptionStatus::Skipped,
            skip_reason: Some(reason.to_string()),
        };
    }

    let mut session = match ctx.sessions.acquire(&account.account_id).await {
        Ok(session) => session,
        Err(e) => {
            warn!("Session acquisition failed for {}: {:?}", account.account_id, e);
            let record = RedemptionRecord::new(
                ctx.community_id,
                &ctx.code,
                &account.account_id,
                RedemptionStatus::Failed,
                0,
            );
            persist(&ctx, &record).await;
            return AccountResult::failed(account.account_id);
        }
    };

    let mut counters = AttemptCounters::default();
    let mut state = AttemptState::Pending;
    debug!("Account {} entering {:?}", account.account_id, state);

    loop {
        state = AttemptState::Attempting;
        counters.attempts += 1;
        debug!(
            "Account {} {:?} ({} on attempt {})",
            account.account_id, state, ctx.code, counters.attempts
        );

        let action = match ctx.executor.attempt(&session, &ctx.code).await {
            Ok(outcome) => {
                debug!(
                    "Attempt {} for {} on {}: {:?}",
                    counters.attempts, account.account_id, ctx.code, outcome
                );
                ctx.policy.on_outcome(&outcome, account.level, &mut counters)
            }
            Err(e) => {
                warn!(
                    "Attempt {} errored for {} on {}: {:?}",
                    counters.attempts, account.account_id, ctx.code, e
                );
                ctx.policy.on_transport_error(&counters)
            }
        };

        match action {
            NextAction::Finish(outcome) => {
                state = match outcome.status {
                    RedemptionStatus::Success | RedemptionStatus::AlreadyRedeemed => {
                        AttemptState::Succeeded
                    }
                    RedemptionStatus::Skipped => AttemptState::Skipped,
                    RedemptionStatus::Failed => AttemptState::Failed,
                };
                debug!("Account {} reached {:?}", account.account_id, state);

                if let Some(raw) = &outcome.raw {
                    warn!(
                        "Giving up on {} after {} attempts with unrecognized status: {}",
                        account.account_id, counters.attempts, raw
                    );
                }
                apply_learned(&ctx, outcome.learned).await;

                let record = RedemptionRecord::new(
                    ctx.community_id,
                    &ctx.code,
                    &account.account_id,
                    outcome.status,
                    counters.attempts as i32,
                );
                persist(&ctx, &record).await;

                return AccountResult {
                    account_id: account.account_id,
                    status: outcome.status,
                    skip_reason: outcome.skip_reason.map(|r| r.to_string()),
                };
            }

            NextAction::BackoffThenRetry(delay) => {
                if ctx.bus.is_shutdown() {
                    info!(
                        "Shutdown in progress; not scheduling retry for {} on {}",
                        account.account_id, ctx.code
                    );
                    return AccountResult::failed(account.account_id);
                }
                state = AttemptState::Retrying;
                debug!(
                    "Account {} {:?}; retrying in {:?}",
                    account.account_id, state, delay
                );
                sleep(delay).await;
            }

            // Both paths discard the current session: a stale login and a
            // burned captcha token are each cured by acquiring a fresh
            // session, which logs in again and solves a new captcha.
            NextAction::ReloginThenRetry(delay) | NextAction::SolveCaptchaThenRetry(delay) => {
                if ctx.bus.is_shutdown() {
                    info!(
                        "Shutdown in progress; not re-logging {} for {}",
                        account.account_id, ctx.code
                    );
                    return AccountResult::failed(account.account_id);
                }
                state = AttemptState::Retrying;
                debug!(
                    "Account {} {:?}; re-acquiring session in {:?} (relogins {})",
                    account.account_id, state, delay, counters.relogins
                );
                sleep(delay).await;
                session = match ctx.sessions.acquire(&account.account_id).await {
                    Ok(session) => session,
                    Err(e) => {
                        warn!("Re-login failed for {}: {:?}", account.account_id, e);
                        let record = RedemptionRecord::new(
                            ctx.community_id,
                            &ctx.code,
                            &account.account_id,
                            RedemptionStatus::Failed,
                            counters.attempts as i32,
                        );
                        persist(&ctx, &record).await;
                        return AccountResult::failed(account.account_id);
                    }
                };
            }
        }
    }
}

async fn apply_learned(ctx: &WorkerCtx, learned: Option<LearnedRequirement>) {
    match learned {
        Some(LearnedRequirement::VipRequired) => {
            ctx.shared_req.vip_required.store(true, Ordering::SeqCst);
            if let Err(e) = ctx.requirements.mark_vip_required(&ctx.code).await {
                warn!("Could not record VIP requirement for {}: {:?}", ctx.code, e);
            }
        }
        Some(LearnedRequirement::MinLevelAbove(level)) => {
            let floor = level + 1;
            ctx.shared_req.min_level.fetch_max(floor, Ordering::SeqCst);
            if let Err(e) = ctx.requirements.raise_min_level(&ctx.code, floor).await {
                warn!("Could not record level requirement for {}: {:?}", ctx.code, e);
            }
        }
        None => {}
    }
}

/// Store degradation never aborts a job; the dual store already absorbed
/// single-backend failures, so an error here means both backends are down.
async fn persist(ctx: &WorkerCtx, record: &RedemptionRecord) {
    if let Err(e) = ctx.store.upsert_record(record).await {
        warn!(
            "Could not persist record for {} on {}: {:?}",
            record.account_id, record.code, e
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_tracker_counts_down_per_code() {
        let tracker = CompletionTracker::new();
        tracker.register("CODE", 3);
        assert!(!tracker.complete_one("CODE"));
        assert!(!tracker.complete_one("CODE"));
        assert!(tracker.complete_one("CODE"));
    }

    #[test]
    fn untracked_code_completes_standalone() {
        let tracker = CompletionTracker::new();
        assert!(tracker.complete_one("ADHOC"));
    }

    #[test]
    fn concurrent_registrations_accumulate() {
        let tracker = CompletionTracker::new();
        tracker.register("CODE", 1);
        tracker.register("CODE", 1);
        assert!(!tracker.complete_one("CODE"));
        assert!(tracker.complete_one("CODE"));
    }

    #[test]
    fn abandoned_code_never_completes() {
        let tracker = CompletionTracker::new();
        tracker.register("CODE", 2);
        tracker.abandon("CODE");
        // The surviving sibling must not flip the flag.
        assert!(!tracker.complete_one("CODE"));
        // The countdown is gone; a fresh dispatch starts clean.
        tracker.register("CODE", 1);
        assert!(tracker.complete_one("CODE"));
    }
}
