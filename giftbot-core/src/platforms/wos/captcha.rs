// File: src/platforms/wos/captcha.rs

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::Error;

/// The captcha-solving backend: image bytes in, solved token out. Opaque to
/// the engine; the production deployment points this at a solver service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    async fn solve(&self, image: &[u8]) -> Result<String, Error>;
}

/// Remote solver speaking a minimal JSON protocol: POST the raw image, read
/// `{"token": "..."}` back.
pub struct RemoteCaptchaSolver {
    http: reqwest::Client,
    endpoint: String,
}

impl RemoteCaptchaSolver {
    pub fn new(http: reqwest::Client, endpoint: &str) -> Self {
        Self {
            http,
            endpoint: endpoint.to_string(),
        }
    }
}

#[async_trait]
impl CaptchaSolver for RemoteCaptchaSolver {
    async fn solve(&self, image: &[u8]) -> Result<String, Error> {
        let resp = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", "application/octet-stream")
            .body(image.to_vec())
            .send()
            .await?;

        if !resp.status().is_success() {
            warn!("Captcha solver returned HTTP {}", resp.status());
            return Err(Error::Captcha(format!("solver HTTP {}", resp.status())));
        }

        let body: Value = resp.json().await?;
        match body.get("token").and_then(|t| t.as_str()) {
            Some(token) if !token.is_empty() => Ok(token.to_string()),
            _ => Err(Error::Captcha("solver returned no token".to_string())),
        }
    }
}
