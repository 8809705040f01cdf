// File: src/services/redeem/reactivation.rs
//
// Watches code validity transitions. A code that was Invalid or Expired and
// is observed Valid again has been re-opened upstream; everyone gets a fresh
// chance at it, so the old per-account records go away before re-dispatch.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use giftbot_common::models::{CodeValidity, ReactivationEvent, normalize_code};
use giftbot_common::traits::repository_traits::{
    CodeRepository, ProgressStore, ReactivationHistoryRepository,
};
use crate::Error;
use crate::eventbus::{EventBus, RedeemEvent};
use super::triggers::RedeemTriggerService;

pub struct ReactivationDetector {
    codes: Arc<dyn CodeRepository>,
    store: Arc<dyn ProgressStore>,
    history: Arc<dyn ReactivationHistoryRepository>,
    triggers: Arc<RedeemTriggerService>,
    bus: EventBus,
}

impl ReactivationDetector {
    pub fn new(
        codes: Arc<dyn CodeRepository>,
        store: Arc<dyn ProgressStore>,
        history: Arc<dyn ReactivationHistoryRepository>,
        triggers: Arc<RedeemTriggerService>,
        bus: EventBus,
    ) -> Self {
        Self {
            codes,
            store,
            history,
            triggers,
            bus,
        }
    }

    /// Records a freshly observed validity for `code` and reacts to it.
    /// Returns true when the observation was a reactivation (closed before,
    /// valid now) and a full re-dispatch was kicked off.
    pub async fn observe_validity(
        &self,
        raw_code: &str,
        observed: CodeValidity,
    ) -> Result<bool, Error> {
        let code = normalize_code(raw_code);
        let previous = match self.codes.get_code(&code).await? {
            Some(existing) => existing.validity,
            None => {
                return Err(Error::NotFound(format!("code {} is not registered", code)));
            }
        };

        if previous == observed {
            return Ok(false);
        }
        self.codes.set_validity(&code, observed).await?;

        if !(previous.is_closed() && observed == CodeValidity::Valid) {
            return Ok(false);
        }

        info!(
            "Code {} reactivated ({} -> valid); clearing records and re-dispatching",
            code, previous
        );

        let cleared = self.store.delete_records_for_code(&code).await?;
        info!("Cleared {} redemption records for {}", cleared, code);
        self.store.set_globally_processed(&code, false).await?;

        let event = ReactivationEvent {
            code: code.clone(),
            previous_status: previous,
            reactivated_at: Utc::now(),
        };
        if let Err(e) = self.history.record_reactivation(&event).await {
            // Audit trail only; the redemption rerun matters more.
            warn!("Could not record reactivation of {}: {:?}", code, e);
        }

        self.bus
            .publish(RedeemEvent::CodeReactivated {
                code: code.clone(),
                previous_status: previous,
            })
            .await;

        self.triggers.dispatch_code(&code).await?;
        Ok(true)
    }
}
