// File: src/services/redeem/triggers.rs
//
// The trigger surface: turns discovered or re-opened codes into fan-out
// across every enabled community. Jobs are spawned, never awaited here; the
// coordinator's locks and the completion countdown keep concurrent triggers
// from double-running anything.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use giftbot_common::models::{GiftCode, normalize_code};
use giftbot_common::traits::repository_traits::{
    CodeRepository, CommunityRepository, ProgressStore,
};
use crate::Error;
use crate::eventbus::{EventBus, RedeemEvent};
use super::coordinator::{CompletionTracker, RedemptionCoordinator};

pub struct RedeemTriggerService {
    coordinator: Arc<RedemptionCoordinator>,
    codes: Arc<dyn CodeRepository>,
    communities: Arc<dyn CommunityRepository>,
    store: Arc<dyn ProgressStore>,
    completion: CompletionTracker,
    bus: EventBus,
}

impl RedeemTriggerService {
    pub fn new(
        coordinator: Arc<RedemptionCoordinator>,
        codes: Arc<dyn CodeRepository>,
        communities: Arc<dyn CommunityRepository>,
        store: Arc<dyn ProgressStore>,
        completion: CompletionTracker,
        bus: EventBus,
    ) -> Self {
        Self {
            coordinator,
            codes,
            communities,
            store,
            completion,
            bus,
        }
    }

    /// Entry point for discovery (scraper, channel scan, manual submission).
    /// Registers each new code, then fans the unprocessed ones out. Returns
    /// the normalized codes that were actually dispatched.
    ///
    /// Per-code persistence trouble skips that code rather than aborting the
    /// whole batch.
    pub async fn on_codes_discovered(&self, raw_codes: &[String]) -> Result<Vec<String>, Error> {
        let mut dispatched = Vec::new();

        for raw in raw_codes {
            let code = normalize_code(raw);
            if code.is_empty() || dispatched.contains(&code) {
                continue;
            }

            match self.codes.get_code(&code).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    let gift_code = GiftCode::new(&code, Utc::now());
                    if let Err(e) = self.codes.upsert_code(&gift_code).await {
                        warn!("Could not register discovered code {}: {:?}", code, e);
                        continue;
                    }
                }
                Err(e) => {
                    warn!("Code lookup failed for {}: {:?}", code, e);
                    continue;
                }
            }

            match self.store.get_code_progress(&code).await {
                Ok(Some(progress)) if progress.globally_processed => {
                    info!("Code {} already globally processed; nothing to dispatch", code);
                    continue;
                }
                Ok(Some(_)) => {}
                Ok(None) => {
                    // Seed the progress row so a crash before any job
                    // completes still leaves the code visible to the
                    // startup scan.
                    if let Err(e) = self.store.set_globally_processed(&code, false).await {
                        warn!("Could not seed progress for {}: {:?}", code, e);
                        continue;
                    }
                }
                Err(e) => {
                    warn!("Progress lookup failed for {}: {:?}", code, e);
                    continue;
                }
            }

            dispatched.push(code);
        }

        if dispatched.is_empty() {
            return Ok(dispatched);
        }

        self.bus
            .publish(RedeemEvent::CodesDiscovered {
                codes: dispatched.clone(),
                discovered_at: Utc::now(),
            })
            .await;

        for code in &dispatched {
            self.dispatch_code(code).await?;
        }
        Ok(dispatched)
    }

    /// Manual re-run of a single code. Clears the global flag and fans out
    /// again; per-account records stay, so accounts already redeemed resolve
    /// as no-ops during filtering.
    pub async fn retrigger(&self, raw_code: &str) -> Result<(), Error> {
        let code = normalize_code(raw_code);
        if self.codes.get_code(&code).await?.is_none() {
            return Err(Error::NotFound(format!("code {} is not registered", code)));
        }
        self.store.set_globally_processed(&code, false).await?;
        info!("Manual retrigger for {}", code);
        self.dispatch_code(&code).await
    }

    /// Fans one code out to every enabled community, seeding the completion
    /// countdown first so no job can flip the global flag while siblings are
    /// still queued.
    pub async fn dispatch_code(&self, code: &str) -> Result<(), Error> {
        let communities = self.communities.list_enabled_communities().await?;
        if communities.is_empty() {
            // No community wants it; the flag flips so the startup scan
            // does not re-dispatch an empty fan-out forever.
            info!("No enabled communities for {}; marking processed", code);
            if let Err(e) = self.store.set_globally_processed(code, true).await {
                warn!("Could not flag {} processed: {:?}", code, e);
            }
            return Ok(());
        }

        self.completion.register(code, communities.len());
        info!(
            "Dispatching {} to {} enabled communities",
            code,
            communities.len()
        );

        for community in communities {
            let coordinator = Arc::clone(&self.coordinator);
            let code = code.to_string();
            tokio::spawn(async move {
                match coordinator.run_job(community.community_id, &code).await {
                    Ok(_) => {}
                    Err(e) => {
                        error!(
                            "Job for {} / community {} ({}) aborted: {:?}",
                            code, community.community_id, community.name, e
                        );
                    }
                }
            });
        }
        Ok(())
    }
}
