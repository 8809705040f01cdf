// File: src/tasks/startup_reconciliation.rs

use std::sync::Arc;

use tracing::{error, info};

use giftbot_common::traits::repository_traits::ProgressStore;
use crate::Error;
use crate::services::redeem::RedeemTriggerService;

/// Scans for codes whose `globally_processed` flag is still false and
/// re-dispatches each one. Run once at startup; a crash mid-fan-out leaves
/// the flag unset, so interrupted work resumes here and per-account records
/// keep the rerun idempotent.
///
/// Returns Ok(()) even if some codes fail to dispatch (logs errors).
pub async fn reconcile_unprocessed_codes(
    store: &Arc<dyn ProgressStore>,
    triggers: &RedeemTriggerService,
) -> Result<(), Error> {
    let unprocessed = store.list_unprocessed_codes().await?;

    if unprocessed.is_empty() {
        info!("Startup scan: no unprocessed codes.");
        return Ok(());
    }

    info!(
        "Startup scan: {} unprocessed code(s); re-dispatching...",
        unprocessed.len()
    );

    for code in unprocessed {
        match triggers.dispatch_code(&code).await {
            Ok(()) => {
                info!("Re-dispatched {}", code);
            }
            Err(e) => {
                error!("Failed to re-dispatch {}: {:?}", code, e);
            }
        }
    }

    Ok(())
}
