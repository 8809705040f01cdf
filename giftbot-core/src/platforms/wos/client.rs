// File: src/platforms/wos/client.rs

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::warn;

use crate::Error;
use crate::config::WosApiConfig;
use super::auth::sign_form;
use super::{AttemptExecutor, Session};

/// Closed classification of everything the redemption API can say. All
/// downstream retry logic operates on this enum only; `Unknown` keeps the raw
/// message for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawOutcome {
    // Terminal success for the account.
    Success,
    AlreadyRedeemed,
    /// Account already claimed a reward of the same tier; counts as done.
    SameTierClaimed,

    // Terminal failure: the code itself is bad for everyone.
    InvalidCode,
    Expired,
    UsageLimit,
    TimeWindowError,

    // Terminal for this account; teaches us a code requirement.
    VipRequired,
    LevelRequired,

    // The login is stale; remedy is a fresh session, not waiting.
    SessionExpired,

    // Transient; retry with backoff.
    RateLimited,
    CaptchaTransient,

    /// Unrecognized status; carries the raw API message.
    Unknown(String),
}

impl RawOutcome {
    /// Maps a `(msg, err_code)` pair from the API body. Message strings
    /// arrive with a trailing period which callers strip first.
    pub fn from_api(msg: &str, err_code: Option<i64>) -> RawOutcome {
        let upper = msg.to_uppercase();

        if upper.contains("CAPTCHA") {
            // 40100 GET TOO FREQUENT, 40101 CHECK TOO FREQUENT,
            // 40102 EXPIRED, 40103 CHECK ERROR
            return RawOutcome::CaptchaTransient;
        }
        if upper.contains("NOT LOGIN") {
            return RawOutcome::SessionExpired;
        }
        if is_vip_error(&upper) {
            return RawOutcome::VipRequired;
        }
        if is_level_error(&upper) {
            return RawOutcome::LevelRequired;
        }

        match (upper.as_str(), err_code) {
            ("SUCCESS", _) => RawOutcome::Success,
            ("RECEIVED", Some(40008)) => RawOutcome::AlreadyRedeemed,
            ("SAME TYPE EXCHANGE", Some(40011)) => RawOutcome::SameTierClaimed,
            ("TIME ERROR", Some(40007)) => RawOutcome::TimeWindowError,
            ("CDK NOT FOUND", Some(40014)) => RawOutcome::InvalidCode,
            ("USAGE LIMIT", Some(40009)) => RawOutcome::UsageLimit,
            ("EXPIRED", _) | ("CDK EXPIRED", _) => RawOutcome::Expired,
            _ => RawOutcome::Unknown(msg.to_string()),
        }
    }
}

fn is_vip_error(upper: &str) -> bool {
    const VIP_ERRORS: [&str; 4] = [
        "RECHARGE_MONEY_VIP",
        "VIP_REQUIREMENT_NOT_MET",
        "NEED_VIP_STATUS",
        "ERR_CDK_VIP_REQUIRED",
    ];
    VIP_ERRORS.iter().any(|e| upper.contains(e))
}

fn is_level_error(upper: &str) -> bool {
    const LEVEL_ERRORS: [&str; 3] = [
        "ERR_CDK_STOVE_LV",
        "FURNACE_LEVEL_TOO_LOW",
        "LEVEL_REQUIREMENT_NOT_MET",
    ];
    LEVEL_ERRORS.iter().any(|e| upper.contains(e))
}

/// The redemption call itself. One HTTP round trip per `attempt`; the
/// classifier/retry policy decides what happens next.
pub struct WosRedeemClient {
    http: reqwest::Client,
    api: WosApiConfig,
}

impl WosRedeemClient {
    pub fn new(http: reqwest::Client, api: WosApiConfig) -> Self {
        Self { http, api }
    }
}

#[async_trait]
impl AttemptExecutor for WosRedeemClient {
    async fn attempt(&self, session: &Session, code: &str) -> Result<RawOutcome, Error> {
        let body = sign_form(
            &[
                ("fid", session.account_id.clone()),
                ("cdk", code.to_string()),
                ("captcha_code", session.captcha_token.clone()),
                ("time", Utc::now().timestamp_millis().to_string()),
            ],
            &self.api.sign_secret,
        );

        let resp = self
            .http
            .post(&self.api.giftcode_url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .timeout(self.api.request_timeout)
            .send()
            .await?;

        if resp.status().as_u16() == 429 {
            warn!("Rate limited (429) redeeming {} for account {}", code, session.account_id);
            return Ok(RawOutcome::RateLimited);
        }
        if !resp.status().is_success() {
            return Ok(RawOutcome::Unknown(format!("HTTP_{}", resp.status().as_u16())));
        }

        let text = resp.text().await?;
        let json: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(_) => {
                // The API serves an HTML interstitial when throttling hard.
                let trimmed = text.trim_start();
                if trimmed.starts_with("<!DOCTYPE") || trimmed.starts_with("<html") {
                    return Ok(RawOutcome::RateLimited);
                }
                return Ok(RawOutcome::Unknown("RESPONSE_PARSE_ERROR".to_string()));
            }
        };

        let msg = json
            .get("msg")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown Error")
            .trim_end_matches('.');
        let err_code = json.get("err_code").and_then(|c| c.as_i64());

        Ok(RawOutcome::from_api(msg, err_code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_documented_status_pairs() {
        assert_eq!(RawOutcome::from_api("SUCCESS", None), RawOutcome::Success);
        assert_eq!(
            RawOutcome::from_api("RECEIVED", Some(40008)),
            RawOutcome::AlreadyRedeemed
        );
        assert_eq!(
            RawOutcome::from_api("SAME TYPE EXCHANGE", Some(40011)),
            RawOutcome::SameTierClaimed
        );
        assert_eq!(
            RawOutcome::from_api("TIME ERROR", Some(40007)),
            RawOutcome::TimeWindowError
        );
        assert_eq!(
            RawOutcome::from_api("CDK NOT FOUND", Some(40014)),
            RawOutcome::InvalidCode
        );
        assert_eq!(
            RawOutcome::from_api("USAGE LIMIT", Some(40009)),
            RawOutcome::UsageLimit
        );
    }

    #[test]
    fn captcha_family_is_transient() {
        for msg in [
            "CAPTCHA CHECK ERROR",
            "CAPTCHA GET TOO FREQUENT",
            "CAPTCHA CHECK TOO FREQUENT",
            "CAPTCHA EXPIRED",
        ] {
            assert_eq!(RawOutcome::from_api(msg, None), RawOutcome::CaptchaTransient);
        }
    }

    #[test]
    fn session_and_requirement_errors() {
        assert_eq!(RawOutcome::from_api("NOT LOGIN", None), RawOutcome::SessionExpired);
        assert_eq!(
            RawOutcome::from_api("ERR_CDK_VIP_REQUIRED", None),
            RawOutcome::VipRequired
        );
        assert_eq!(
            RawOutcome::from_api("ERR_CDK_STOVE_LV", None),
            RawOutcome::LevelRequired
        );
    }

    #[test]
    fn unrecognized_status_keeps_raw_message() {
        match RawOutcome::from_api("SOME NEW THING", Some(99999)) {
            RawOutcome::Unknown(raw) => assert_eq!(raw, "SOME NEW THING"),
            other => panic!("expected Unknown, got {:?}", other),
        }
    }
}
