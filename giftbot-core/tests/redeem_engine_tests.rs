// tests/redeem_engine_tests.rs
//
// End-to-end runs of the redemption engine against in-memory backends and a
// scripted gift code API.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use giftbot_common::models::{
    Account, CodeValidity, Community, GiftCode, JobKey, PriorityLevel, RedemptionRecord,
    RedemptionStatus,
};
use giftbot_common::traits::repository_traits::{
    CodeRepository, CommunityRepository, PriorityRepository, ProgressStore,
    ReactivationHistoryRepository, RequirementRepository,
};
use giftbot_core::config::RedeemConfig;
use giftbot_core::eventbus::{EventBus, RedeemEvent};
use giftbot_core::Error;
use giftbot_core::platforms::wos::{AttemptExecutor, RawOutcome, Session};
use giftbot_core::services::redeem::{
    CompletionTracker, JobLockService, ReactivationDetector, RedeemTriggerService,
    RedemptionCoordinator,
};
use giftbot_core::tasks::startup_reconciliation::reconcile_unprocessed_codes;
use giftbot_core::test_utils::{
    CountingSessionProvider, MemoryCodeRepository, MemoryCommunityRepository,
    MemoryPriorityRepository, MemoryProgressStore, MemoryReactivationHistory,
    MemoryRequirementRepository, ScriptedExecutor, StaticRosterProvider,
};

fn fast_config() -> RedeemConfig {
    RedeemConfig {
        retry_delay_base: Duration::from_millis(1),
        max_login_delay: Duration::from_millis(4),
        max_retry_delay: Duration::from_millis(4),
        ..RedeemConfig::default()
    }
}

fn account(id: &str, level: i32, vip: Option<bool>, alliance_id: Option<Uuid>) -> Account {
    Account {
        account_id: id.to_string(),
        display_name: format!("player-{}", id),
        level,
        alliance_id,
        is_vip: vip,
    }
}

struct Harness {
    store: Arc<MemoryProgressStore>,
    requirements: Arc<MemoryRequirementRepository>,
    priorities: Arc<MemoryPriorityRepository>,
    roster: Arc<StaticRosterProvider>,
    sessions: Arc<CountingSessionProvider>,
    executor: Arc<ScriptedExecutor>,
    completion: CompletionTracker,
    bus: EventBus,
    coordinator: Arc<RedemptionCoordinator>,
}

impl Harness {
    fn new(config: RedeemConfig, executor: ScriptedExecutor) -> Self {
        giftbot_core::init_tracing();
        let store = Arc::new(MemoryProgressStore::default());
        let requirements = Arc::new(MemoryRequirementRepository::default());
        let priorities = Arc::new(MemoryPriorityRepository::default());
        let roster = Arc::new(StaticRosterProvider::default());
        let sessions = Arc::new(CountingSessionProvider::default());
        let executor = Arc::new(executor);
        let completion = CompletionTracker::new();
        let bus = EventBus::new();

        let coordinator = Arc::new(RedemptionCoordinator::new(
            store.clone(),
            requirements.clone(),
            priorities.clone(),
            roster.clone(),
            sessions.clone(),
            executor.clone(),
            JobLockService::new(),
            completion.clone(),
            bus.clone(),
            config,
        ));

        Self {
            store,
            requirements,
            priorities,
            roster,
            sessions,
            executor,
            completion,
            bus,
            coordinator,
        }
    }

    fn triggers(
        &self,
        codes: Arc<MemoryCodeRepository>,
        communities: Arc<MemoryCommunityRepository>,
    ) -> RedeemTriggerService {
        RedeemTriggerService::new(
            self.coordinator.clone(),
            codes,
            communities,
            self.store.clone(),
            self.completion.clone(),
            self.bus.clone(),
        )
    }
}

async fn wait_until_processed(store: &MemoryProgressStore, code: &str) {
    for _ in 0..200 {
        if let Ok(Some(progress)) = store.get_code_progress(code).await {
            if progress.globally_processed {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("code {} never reached globally_processed", code);
}

#[tokio::test]
async fn winter25_end_to_end() {
    let community = Uuid::new_v4();
    let executor = ScriptedExecutor::new(RawOutcome::Success)
        .script("vip_only", vec![RawOutcome::VipRequired]);
    let h = Harness::new(fast_config(), executor);

    // One account already holds a terminal record from an earlier run.
    h.store
        .upsert_record(&RedemptionRecord::new(
            community,
            "WINTER25",
            "done_before",
            RedemptionStatus::Success,
            1,
        ))
        .await
        .unwrap();

    h.roster.insert(
        community,
        vec![
            account("fresh", 30, None, None),
            account("done_before", 30, None, None),
            account("vip_only", 30, Some(false), None),
        ],
    );

    let mut events = h.bus.subscribe(Some(10)).await;
    let summary = h
        .coordinator
        .run_job(community, "WINTER25")
        .await
        .unwrap()
        .expect("job should run");

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.already_redeemed, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.total_roster, 3);
    assert!(summary
        .skipped_reasons
        .contains(&("vip_only".to_string(), "vip_required".to_string())));

    // The API taught us the VIP requirement.
    let req = h
        .requirements
        .get_requirement("WINTER25")
        .await
        .unwrap()
        .expect("requirement learned");
    assert!(req.vip_required);
    assert!(req.learned_from_error);

    let fresh = h
        .store
        .get_record(community, "WINTER25", "fresh")
        .await
        .unwrap()
        .expect("record persisted");
    assert_eq!(fresh.status, RedemptionStatus::Success);
    assert_eq!(fresh.attempts, 1);

    let progress = h
        .store
        .get_code_progress("WINTER25")
        .await
        .unwrap()
        .expect("progress row");
    assert!(progress.globally_processed);

    match events.recv().await.expect("job completed event") {
        RedeemEvent::JobCompleted { code, summary, .. } => {
            assert_eq!(code, "WINTER25");
            assert_eq!(summary.succeeded, 1);
        }
        other => panic!("expected JobCompleted, got {:?}", other),
    }
}

#[tokio::test]
async fn second_run_is_a_no_op() {
    let community = Uuid::new_v4();
    let h = Harness::new(fast_config(), ScriptedExecutor::new(RawOutcome::Success));
    h.roster.insert(
        community,
        vec![account("a", 10, None, None), account("b", 10, None, None)],
    );

    let first = h.coordinator.run_job(community, "CODE").await.unwrap().unwrap();
    assert_eq!(first.succeeded, 2);
    assert_eq!(h.executor.total_calls(), 2);

    let record_before = h.store.get_record(community, "CODE", "a").await.unwrap().unwrap();

    let second = h.coordinator.run_job(community, "CODE").await.unwrap().unwrap();
    assert_eq!(second.succeeded, 0);
    assert_eq!(second.already_redeemed, 2);
    // No account touched the API again.
    assert_eq!(h.executor.total_calls(), 2);

    let record_after = h.store.get_record(community, "CODE", "a").await.unwrap().unwrap();
    assert_eq!(record_after.status, record_before.status);
    assert_eq!(record_after.attempts, record_before.attempts);
}

#[tokio::test]
async fn session_expiry_recovers_with_one_relogin() {
    let community = Uuid::new_v4();
    let executor = ScriptedExecutor::new(RawOutcome::Success)
        .script("a", vec![RawOutcome::SessionExpired, RawOutcome::Success]);
    let h = Harness::new(fast_config(), executor);
    h.roster.insert(community, vec![account("a", 10, None, None)]);

    let summary = h.coordinator.run_job(community, "CODE").await.unwrap().unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(h.executor.calls_for("a"), 2);
    // Initial login plus exactly one re-login.
    assert_eq!(h.sessions.acquisitions_for("a"), 2);
}

/// Redemption API double that burns every captcha token it sees. The first
/// solve comes back wrong, and resubmitting a burned token can never work;
/// only an attempt carrying a newly solved captcha succeeds.
#[derive(Default)]
struct BurnedTokenExecutor {
    burned: DashMap<String, ()>,
    calls: AtomicUsize,
}

#[async_trait]
impl AttemptExecutor for BurnedTokenExecutor {
    async fn attempt(&self, session: &Session, _code: &str) -> Result<RawOutcome, Error> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self
            .burned
            .insert(session.captcha_token.clone(), ())
            .is_some()
        {
            return Ok(RawOutcome::CaptchaTransient);
        }
        if call == 1 {
            return Ok(RawOutcome::CaptchaTransient);
        }
        Ok(RawOutcome::Success)
    }
}

#[tokio::test]
async fn captcha_rejection_retries_with_a_freshly_solved_token() {
    let community = Uuid::new_v4();
    let executor = Arc::new(BurnedTokenExecutor::default());
    let store = Arc::new(MemoryProgressStore::default());
    let sessions = Arc::new(CountingSessionProvider::default());
    let roster = Arc::new(StaticRosterProvider::with(
        community,
        vec![account("a", 10, None, None)],
    ));

    let coordinator = RedemptionCoordinator::new(
        store.clone(),
        Arc::new(MemoryRequirementRepository::default()),
        Arc::new(MemoryPriorityRepository::default()),
        roster,
        sessions.clone(),
        executor.clone(),
        JobLockService::new(),
        CompletionTracker::new(),
        EventBus::new(),
        fast_config(),
    );

    let summary = coordinator.run_job(community, "CODE").await.unwrap().unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 0);
    // The retry carried a fresh session, not the burned token.
    assert_eq!(sessions.acquisitions_for("a"), 2);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 2);

    let record = store.get_record(community, "CODE", "a").await.unwrap().unwrap();
    assert_eq!(record.status, RedemptionStatus::Success);
    assert_eq!(record.attempts, 2);
}

#[tokio::test]
async fn concurrent_duplicate_job_collapses() {
    let community = Uuid::new_v4();
    let h = Harness::new(fast_config(), ScriptedExecutor::new(RawOutcome::Success));
    h.roster.insert(community, vec![account("a", 10, None, None)]);

    let (first, second) = tokio::join!(
        h.coordinator.run_job(community, "CODE"),
        h.coordinator.run_job(community, "CODE"),
    );

    let summaries: Vec<_> = [first.unwrap(), second.unwrap()]
        .into_iter()
        .flatten()
        .collect();
    assert_eq!(summaries.len(), 1, "exactly one run should execute");
    assert_eq!(h.executor.calls_for("a"), 1);
}

#[tokio::test]
async fn late_duplicate_completion_flips_the_flag() {
    let community = Uuid::new_v4();
    let h = Harness::new(fast_config(), ScriptedExecutor::new(RawOutcome::Success));
    h.roster.insert(community, vec![account("a", 10, None, None)]);

    // Two triggers raced for the same code and both registered a slot.
    h.completion.register("CODE", 2);

    let summary = h.coordinator.run_job(community, "CODE").await.unwrap();
    assert!(summary.is_some());
    // One slot is still outstanding, so the flag has not flipped.
    assert!(h.store.get_code_progress("CODE").await.unwrap().is_none());

    // The duplicate saw the lock held while the real run was draining and
    // hands its slot back only after that run finished.
    let guard = h
        .coordinator
        .locks()
        .try_acquire(&JobKey::new(community, "CODE"))
        .expect("lock free after the real run");
    let duplicate = h.coordinator.run_job(community, "CODE").await.unwrap();
    assert!(duplicate.is_none());
    drop(guard);

    // The last slot came back through the duplicate; the flag flips now
    // instead of waiting for the next startup scan.
    let progress = h
        .store
        .get_code_progress("CODE")
        .await
        .unwrap()
        .expect("progress row");
    assert!(progress.globally_processed);
}

#[tokio::test]
async fn unknown_status_gives_up_after_three_attempts() {
    let community = Uuid::new_v4();
    let executor = ScriptedExecutor::new(RawOutcome::Unknown("MAINTENANCE_MODE".to_string()));
    let h = Harness::new(fast_config(), executor);
    h.roster.insert(community, vec![account("a", 10, None, None)]);

    let summary = h.coordinator.run_job(community, "CODE").await.unwrap().unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(h.executor.calls_for("a"), 3);

    let record = h.store.get_record(community, "CODE", "a").await.unwrap().unwrap();
    assert_eq!(record.status, RedemptionStatus::Failed);
    assert_eq!(record.attempts, 3);
}

#[tokio::test]
async fn critical_alliance_goes_first() {
    let community = Uuid::new_v4();
    let critical_alliance = Uuid::new_v4();
    let config = RedeemConfig {
        worker_concurrency: 1,
        ..fast_config()
    };
    let h = Harness::new(config, ScriptedExecutor::new(RawOutcome::Success));

    h.priorities
        .set_priority(community, critical_alliance, PriorityLevel::Critical)
        .await
        .unwrap();
    h.roster.insert(
        community,
        vec![
            account("n1", 10, None, None),
            account("n2", 10, None, None),
            account("c1", 10, None, Some(critical_alliance)),
        ],
    );

    h.coordinator.run_job(community, "CODE").await.unwrap().unwrap();

    let order = h.executor.call_order().await;
    assert_eq!(order.first().map(String::as_str), Some("c1"));
    assert_eq!(order.len(), 3);
}

#[tokio::test]
async fn shutdown_stops_retries_mid_job() {
    let community = Uuid::new_v4();
    let executor = ScriptedExecutor::new(RawOutcome::RateLimited);
    let h = Harness::new(fast_config(), executor);
    h.roster.insert(community, vec![account("a", 10, None, None)]);

    h.bus.shutdown();
    let summary = h.coordinator.run_job(community, "CODE").await.unwrap().unwrap();

    assert_eq!(summary.failed, 1);
    // The first attempt ran; the retry was never scheduled.
    assert_eq!(h.executor.calls_for("a"), 1);
}

#[tokio::test]
async fn roster_failure_aborts_job_and_leaves_code_open() {
    let community = Uuid::new_v4();
    let h = Harness::new(fast_config(), ScriptedExecutor::new(RawOutcome::Success));
    // No roster registered for the community: fetch errors.

    h.completion.register("CODE", 1);
    let result = h.coordinator.run_job(community, "CODE").await;
    assert!(result.is_err());

    // The flag must not have flipped.
    assert!(h.store.get_code_progress("CODE").await.unwrap().is_none());
    assert_eq!(h.executor.total_calls(), 0);
}

#[tokio::test]
async fn discovery_dispatches_only_unprocessed_codes() {
    let community = Uuid::new_v4();
    let h = Harness::new(fast_config(), ScriptedExecutor::new(RawOutcome::Success));
    h.roster.insert(community, vec![account("a", 10, None, None)]);

    let codes = Arc::new(MemoryCodeRepository::default());
    let communities = Arc::new(MemoryCommunityRepository::default());
    communities
        .upsert_community(&Community {
            community_id: community,
            name: "state 245".to_string(),
            auto_redeem_enabled: true,
            notification_channel: None,
        })
        .await
        .unwrap();

    // A code processed in the past must not be re-dispatched.
    codes
        .upsert_code(&GiftCode::new("OLDCODE", chrono::Utc::now()))
        .await
        .unwrap();
    h.store.set_globally_processed("OLDCODE", true).await.unwrap();

    let triggers = h.triggers(codes.clone(), communities);
    let mut events = h.bus.subscribe(Some(10)).await;

    let dispatched = triggers
        .on_codes_discovered(&[
            "  winter25 ".to_string(),
            "WINTER25".to_string(),
            "OLDCODE".to_string(),
        ])
        .await
        .unwrap();
    assert_eq!(dispatched, vec!["WINTER25".to_string()]);

    match events.recv().await.expect("discovery event") {
        RedeemEvent::CodesDiscovered { codes, .. } => {
            assert_eq!(codes, vec!["WINTER25".to_string()]);
        }
        other => panic!("expected CodesDiscovered, got {:?}", other),
    }

    wait_until_processed(&h.store, "WINTER25").await;
    let record = h
        .store
        .get_record(community, "WINTER25", "a")
        .await
        .unwrap()
        .expect("job ran for the enabled community");
    assert_eq!(record.status, RedemptionStatus::Success);

    // The code itself was registered uppercase.
    assert!(codes.get_code("WINTER25").await.unwrap().is_some());
}

#[tokio::test]
async fn reactivated_code_clears_history_and_reruns() {
    let community = Uuid::new_v4();
    let h = Harness::new(fast_config(), ScriptedExecutor::new(RawOutcome::Success));
    h.roster.insert(community, vec![account("a", 10, None, None)]);

    let codes = Arc::new(MemoryCodeRepository::default());
    let communities = Arc::new(MemoryCommunityRepository::default());
    let history = Arc::new(MemoryReactivationHistory::default());
    communities
        .upsert_community(&Community {
            community_id: community,
            name: "state 245".to_string(),
            auto_redeem_enabled: true,
            notification_channel: None,
        })
        .await
        .unwrap();

    // The code failed for everyone while it was broken upstream.
    let mut gift_code = GiftCode::new("BOOM", chrono::Utc::now());
    gift_code.validity = CodeValidity::Invalid;
    codes.upsert_code(&gift_code).await.unwrap();
    h.store.set_globally_processed("BOOM", true).await.unwrap();
    for id in ["a", "w", "x", "y", "z"] {
        h.store
            .upsert_record(&RedemptionRecord::new(
                community,
                "BOOM",
                id,
                RedemptionStatus::Failed,
                3,
            ))
            .await
            .unwrap();
    }

    let triggers = Arc::new(h.triggers(codes.clone(), communities));
    let detector = ReactivationDetector::new(
        codes.clone(),
        h.store.clone(),
        history.clone(),
        triggers,
        h.bus.clone(),
    );

    let mut events = h.bus.subscribe(Some(10)).await;
    let reactivated = detector
        .observe_validity("boom", CodeValidity::Valid)
        .await
        .unwrap();
    assert!(reactivated);

    match events.recv().await.expect("reactivation event") {
        RedeemEvent::CodeReactivated { code, previous_status } => {
            assert_eq!(code, "BOOM");
            assert_eq!(previous_status, CodeValidity::Invalid);
        }
        other => panic!("expected CodeReactivated, got {:?}", other),
    }

    let audit = history.list_reactivations("BOOM").await.unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].previous_status, CodeValidity::Invalid);

    // Old records are gone and the job ran again from scratch.
    wait_until_processed(&h.store, "BOOM").await;
    let rerun = h
        .store
        .get_record(community, "BOOM", "a")
        .await
        .unwrap()
        .expect("fresh record");
    assert_eq!(rerun.status, RedemptionStatus::Success);
    assert_eq!(rerun.attempts, 1);
    assert!(h.store.get_record(community, "BOOM", "x").await.unwrap().is_none());
}

#[tokio::test]
async fn validity_flap_without_reactivation_changes_nothing() {
    let h = Harness::new(fast_config(), ScriptedExecutor::new(RawOutcome::Success));
    let codes = Arc::new(MemoryCodeRepository::default());
    let communities = Arc::new(MemoryCommunityRepository::default());
    let history = Arc::new(MemoryReactivationHistory::default());

    // Valid -> Expired is a closure, not a reactivation.
    codes
        .upsert_code(&GiftCode::new("LIVE", chrono::Utc::now()))
        .await
        .unwrap();
    codes.set_validity("LIVE", CodeValidity::Valid).await.unwrap();

    let triggers = Arc::new(h.triggers(codes.clone(), communities));
    let detector = ReactivationDetector::new(
        codes.clone(),
        h.store.clone(),
        history.clone(),
        triggers,
        h.bus.clone(),
    );

    let reactivated = detector
        .observe_validity("LIVE", CodeValidity::Expired)
        .await
        .unwrap();
    assert!(!reactivated);
    assert!(history.list_reactivations("LIVE").await.unwrap().is_empty());
    assert_eq!(
        codes.get_code("LIVE").await.unwrap().unwrap().validity,
        CodeValidity::Expired
    );
}

#[tokio::test]
async fn startup_scan_resumes_interrupted_codes() {
    let community = Uuid::new_v4();
    let h = Harness::new(fast_config(), ScriptedExecutor::new(RawOutcome::Success));
    h.roster.insert(community, vec![account("a", 10, None, None)]);

    let codes = Arc::new(MemoryCodeRepository::default());
    let communities = Arc::new(MemoryCommunityRepository::default());
    communities
        .upsert_community(&Community {
            community_id: community,
            name: "state 245".to_string(),
            auto_redeem_enabled: true,
            notification_channel: None,
        })
        .await
        .unwrap();

    // Simulates a crash after discovery seeded the row but before any job ran.
    h.store.set_globally_processed("HALFDONE", false).await.unwrap();
    h.store.set_globally_processed("FINISHED", true).await.unwrap();

    let triggers = h.triggers(codes, communities);
    let store: Arc<dyn ProgressStore> = h.store.clone();
    reconcile_unprocessed_codes(&store, &triggers).await.unwrap();

    wait_until_processed(&h.store, "HALFDONE").await;
    let record = h
        .store
        .get_record(community, "HALFDONE", "a")
        .await
        .unwrap()
        .expect("resumed job ran");
    assert_eq!(record.status, RedemptionStatus::Success);
    // The finished code was not touched.
    assert_eq!(h.executor.total_calls(), 1);
}
