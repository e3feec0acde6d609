use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

/// Verdict from the external fraud-check collaborator. `Unavailable`
/// covers transport failures and timeouts; the coordinator retries it
/// exactly once and then treats it as a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FraudVerdict {
    Approved,
    Rejected,
    Unavailable,
}

#[async_trait]
pub trait FraudCheck: Send + Sync {
    /// Ask the collaborator whether this (user, promotion) pair may redeem.
    async fn validate(&self, user_id: i64, promotion_id: Uuid) -> FraudVerdict;

    /// Get the collaborator name, for logging.
    fn name(&self) -> &str;
}

/// HTTP adapter for the fraud-check service. The client timeout bounds how
/// long a redemption request can wait on the collaborator; a timed-out call
/// comes back `Unavailable` before any capacity is touched.
pub struct HttpFraudCheck {
    base_url: String,
    client: reqwest::Client,
}

impl HttpFraudCheck {
    /// Fails rather than falling back to a client without the timeout:
    /// the timeout is what bounds how long a redemption can wait here.
    pub fn new(base_url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build fraud check HTTP client")?;
        Ok(Self { base_url, client })
    }
}

#[async_trait]
impl FraudCheck for HttpFraudCheck {
    async fn validate(&self, user_id: i64, promotion_id: Uuid) -> FraudVerdict {
        let resp = self
            .client
            .post(format!("{}/api/validate", self.base_url))
            .json(&json!({
                "user_id": user_id,
                "promo_id": promotion_id,
            }))
            .send()
            .await;

        let resp = match resp {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(error = %e, "Fraud check transport failure");
                return FraudVerdict::Unavailable;
            }
        };

        if resp.status().is_server_error() {
            return FraudVerdict::Unavailable;
        }
        if !resp.status().is_success() {
            return FraudVerdict::Rejected;
        }

        match resp.json::<serde_json::Value>().await {
            Ok(body) if body.get("ok").and_then(|v| v.as_bool()) == Some(true) => {
                FraudVerdict::Approved
            }
            Ok(_) => FraudVerdict::Rejected,
            Err(e) => {
                tracing::warn!(error = %e, "Fraud check returned an unreadable body");
                FraudVerdict::Unavailable
            }
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}
