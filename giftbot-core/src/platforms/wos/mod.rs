// File: src/platforms/wos/mod.rs
//
// Integration with the game's gift code web API: session acquisition (login +
// captcha), and the single-shot redemption call. Retry decisions live in the
// services layer; this module only talks the wire protocol and classifies
// responses.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::Error;

pub mod auth;
pub mod captcha;
pub mod client;

pub use auth::WosSessionProvider;
pub use captcha::{CaptchaSolver, RemoteCaptchaSolver};
pub use client::{RawOutcome, WosRedeemClient};

/// Short-lived authenticated context for one account: a login established on
/// the game server plus a solved captcha token. Never shared across accounts;
/// re-acquired mid-job when the API reports the session expired.
#[derive(Debug, Clone)]
pub struct Session {
    pub account_id: String,
    pub captcha_token: String,
    pub acquired_at: DateTime<Utc>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn acquire(&self, account_id: &str) -> Result<Session, Error>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AttemptExecutor: Send + Sync {
    /// Exactly one redemption call. No retry logic here.
    async fn attempt(&self, session: &Session, code: &str) -> Result<RawOutcome, Error>;
}
