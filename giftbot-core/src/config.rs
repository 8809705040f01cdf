// giftbot-core/src/config.rs

use std::time::Duration;
use serde::{Deserialize, Serialize};

/// Engine tuning knobs. Defaults are the values the production bot converged
/// on after the rate-limit incidents; embedders override per deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedeemConfig {
    /// Concurrent account attempts per job.
    pub worker_concurrency: usize,

    /// Login attempts per session acquisition.
    pub max_login_attempts: u32,
    /// Overall redemption attempts per account, all categories included.
    pub max_redemption_attempts: u32,
    /// Attempts allowed for unrecognized API statuses before giving up.
    pub max_unknown_attempts: u32,

    /// Base delay for every backoff computation.
    pub retry_delay_base: Duration,
    /// Ceiling for login backoff.
    pub max_login_delay: Duration,
    /// Ceiling for redemption backoff.
    pub max_retry_delay: Duration,

    pub api: WosApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WosApiConfig {
    pub player_url: String,
    pub captcha_url: String,
    pub giftcode_url: String,
    /// Shared secret appended to the form body before md5 signing.
    pub sign_secret: String,
    pub request_timeout: Duration,
}

impl Default for RedeemConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: 2,
            max_login_attempts: 5,
            max_redemption_attempts: 10,
            max_unknown_attempts: 3,
            retry_delay_base: Duration::from_secs(2),
            max_login_delay: Duration::from_secs(30),
            max_retry_delay: Duration::from_secs(60),
            api: WosApiConfig::default(),
        }
    }
}

impl Default for WosApiConfig {
    fn default() -> Self {
        Self {
            player_url: "https://wos-giftcode-api.centurygame.com/api/player".to_string(),
            captcha_url: "https://wos-giftcode-api.centurygame.com/api/captcha".to_string(),
            giftcode_url: "https://wos-giftcode-api.centurygame.com/api/gift_code".to_string(),
            sign_secret: String::new(),
            request_timeout: Duration::from_secs(15),
        }
    }
}
