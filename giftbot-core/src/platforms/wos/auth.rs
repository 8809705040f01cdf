// File: src/platforms/wos/auth.rs

use std::cmp::min;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::{BASE64_STANDARD, Engine as _};
use chrono::Utc;
use md5::{Digest, Md5};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::Error;
use crate::config::{RedeemConfig, WosApiConfig};
use super::captcha::CaptchaSolver;
use super::{Session, SessionProvider};

/// Builds a signed form body the way the game API expects: keys sorted,
/// `k=v` joined with `&`, md5 of (form + secret) prepended as `sign`.
pub fn sign_form(pairs: &[(&str, String)], secret: &str) -> String {
    let mut sorted: Vec<(&str, &str)> = pairs.iter().map(|(k, v)| (*k, v.as_str())).collect();
    sorted.sort_by_key(|(k, _)| *k);

    let form = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Md5::new();
    hasher.update(form.as_bytes());
    hasher.update(secret.as_bytes());
    let sign = format!("{:x}", hasher.finalize());

    format!("sign={}&{}", sign, form)
}

fn millis_now() -> String {
    Utc::now().timestamp_millis().to_string()
}

/// Obtains an authenticated session plus solved captcha token for one
/// account. Login is retried up to the configured ceiling on transient infra
/// failures with linear backoff; an account the API rejects outright is a
/// permanent `CredentialsRejected` and is not retried.
pub struct WosSessionProvider {
    http: reqwest::Client,
    api: WosApiConfig,
    solver: Arc<dyn CaptchaSolver>,
    max_login_attempts: u32,
    retry_delay_base: Duration,
    max_login_delay: Duration,
}

impl WosSessionProvider {
    pub fn new(http: reqwest::Client, config: &RedeemConfig, solver: Arc<dyn CaptchaSolver>) -> Self {
        Self {
            http,
            api: config.api.clone(),
            solver,
            max_login_attempts: config.max_login_attempts,
            retry_delay_base: config.retry_delay_base,
            max_login_delay: config.max_login_delay,
        }
    }

    /// One login call: player-info request that establishes the server-side
    /// session for this account id.
    async fn login_once(&self, account_id: &str) -> Result<(), Error> {
        let body = sign_form(
            &[("fid", account_id.to_string()), ("time", millis_now())],
            &self.api.sign_secret,
        );

        let resp = self
            .http
            .post(&self.api.player_url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .timeout(self.api.request_timeout)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Error::Platform(format!(
                "login HTTP {} for account {}",
                resp.status(),
                account_id
            )));
        }

        let json: Value = resp.json().await?;
        let msg = json.get("msg").and_then(|m| m.as_str()).unwrap_or("");

        // The player API answers lowercase "success".
        if msg.eq_ignore_ascii_case("success") {
            Ok(())
        } else {
            Err(Error::CredentialsRejected(format!(
                "login rejected for account {}: {}",
                account_id, msg
            )))
        }
    }

    async fn login(&self, account_id: &str) -> Result<(), Error> {
        for attempt in 1..=self.max_login_attempts {
            match self.login_once(account_id).await {
                Ok(()) => {
                    debug!("Login established for account {} (attempt {})", account_id, attempt);
                    return Ok(());
                }
                // Permanent: the API looked at the account and said no.
                Err(e @ Error::CredentialsRejected(_)) => return Err(e),
                Err(e) => {
                    if attempt == self.max_login_attempts {
                        return Err(e);
                    }
                    let delay = min(
                        self.retry_delay_base * attempt,
                        self.max_login_delay,
                    );
                    warn!(
                        "Login attempt {}/{} failed for account {}: {:?}, retrying in {:?}",
                        attempt, self.max_login_attempts, account_id, e, delay
                    );
                    sleep(delay).await;
                }
            }
        }
        unreachable!("login loop always returns within the attempt ceiling")
    }

    /// Fetch the captcha image for an established session.
    async fn fetch_captcha_image(&self, account_id: &str) -> Result<Vec<u8>, Error> {
        let body = sign_form(
            &[("fid", account_id.to_string()), ("time", millis_now())],
            &self.api.sign_secret,
        );

        let resp = self
            .http
            .post(&self.api.captcha_url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .timeout(self.api.request_timeout)
            .send()
            .await?;

        if resp.status().as_u16() == 429 {
            return Err(Error::Captcha("captcha fetch rate limited".to_string()));
        }
        if !resp.status().is_success() {
            return Err(Error::Captcha(format!("captcha HTTP {}", resp.status())));
        }

        let json: Value = resp.json().await?;
        let msg = json.get("msg").and_then(|m| m.as_str()).unwrap_or("");

        // This endpoint answers uppercase SUCCESS, unlike the player API.
        if !msg.eq_ignore_ascii_case("SUCCESS") {
            return Err(Error::Captcha(format!("captcha API returned: {}", msg)));
        }

        let img = json
            .get("data")
            .and_then(|d| d.get("img"))
            .and_then(|i| i.as_str())
            .ok_or_else(|| Error::Captcha("captcha response missing image".to_string()))?;

        decode_captcha_image(img)
    }
}

/// The API ships the image as a data URI (`data:image/...;base64,<payload>`)
/// or as bare base64.
fn decode_captcha_image(img: &str) -> Result<Vec<u8>, Error> {
    let payload = match img.split_once(";base64,") {
        Some((_, b64)) => b64,
        None => img,
    };
    BASE64_STANDARD
        .decode(payload)
        .map_err(|e| Error::Captcha(format!("bad captcha image: {}", e)))
}

#[async_trait]
impl SessionProvider for WosSessionProvider {
    async fn acquire(&self, account_id: &str) -> Result<Session, Error> {
        self.login(account_id).await?;

        let image = self.fetch_captcha_image(account_id).await?;
        let captcha_token = self.solver.solve(&image).await?;

        Ok(Session {
            account_id: account_id.to_string(),
            captcha_token,
            acquired_at: Utc::now(),
        })
    }
}
