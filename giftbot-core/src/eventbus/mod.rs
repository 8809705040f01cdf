//! src/eventbus/mod.rs
//!
//! In-process event bus with guaranteed delivery to multiple subscribers via
//! bounded MPSC queues. The notification layer subscribes here for completed
//! job summaries; the shutdown watch doubles as the engine's cancellation
//! signal (in-flight attempts finish, no new retries are scheduled).

use std::sync::Arc;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, mpsc, watch};
use uuid::Uuid;

use giftbot_common::models::{CodeValidity, JobSummary};

/// Events the redemption engine publishes or reacts to.
#[derive(Debug, Clone)]
pub enum RedeemEvent {
    /// Discovery handed us codes; one job per enabled community is fanned out.
    CodesDiscovered {
        codes: Vec<String>,
        discovered_at: DateTime<Utc>,
    },

    /// A previously invalid/expired code started working again.
    CodeReactivated {
        code: String,
        previous_status: CodeValidity,
    },

    /// A coordinator run finished; carries the aggregate for notifications.
    JobCompleted {
        community_id: Uuid,
        code: String,
        summary: JobSummary,
    },

    /// System-wide event for debugging or administration.
    SystemMessage(String),
}

impl RedeemEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            RedeemEvent::CodesDiscovered { .. } => "codes_discovered",
            RedeemEvent::CodeReactivated { .. } => "code_reactivated",
            RedeemEvent::JobCompleted { .. } => "job_completed",
            RedeemEvent::SystemMessage(_) => "system_message",
        }
    }
}

/// Each subscriber gets its own `mpsc::Sender<RedeemEvent>`.
///
/// - If a subscriber's buffer fills, `publish` awaits until there is space
///   (backpressure).
/// - If a subscriber has dropped its `Receiver`, sends to it simply fail and
///   are ignored.
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::Sender<RedeemEvent>>>>,
    shutdown_tx: watch::Sender<bool>,
    pub shutdown_rx: watch::Receiver<bool>,
}

const DEFAULT_BUFFER_SIZE: usize = 1000;

impl EventBus {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            subscribers: Arc::new(Mutex::new(vec![])),
            shutdown_tx: tx,
            shutdown_rx: rx,
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Returns a receiver on which events will be delivered.
    pub async fn subscribe(&self, buffer_size: Option<usize>) -> mpsc::Receiver<RedeemEvent> {
        let size = buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE);
        let (tx, rx) = mpsc::channel(size);
        let mut subs = self.subscribers.lock().await;
        subs.push(tx);
        rx
    }

    /// Publish an event to all subscribers.
    pub async fn publish(&self, event: RedeemEvent) {
        let senders = {
            let subs = self.subscribers.lock().await;
            subs.clone()
        };
        for s in senders {
            let _ = s.send(event.clone()).await;
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
