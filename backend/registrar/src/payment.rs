//! Payment-link creation — calls the remote `create-payment` function and
//! returns the provider URL the registrant is sent to.
//!
//! ## Resilience
//!
//! * Every request carries the client-wide timeout set up in `main`.
//! * Rate-limit responses and connection failures are retried with
//!   exponential back-off, at most `max_attempts` times in total. Failures
//!   that may have reached the provider (timeouts, 5xx) are not retried.

use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{AppError, Result};

const MAX_BACKOFF_MS: u64 = 4_000;
const INITIAL_BACKOFF_MS: u64 = 500;

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

/// Body of the payment-creation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub amount: i64,
    pub name: String,
    pub email: String,
    pub phone: String,
    /// Free-text message from the registrant; the function calls it `prayer`.
    #[serde(rename = "prayer")]
    pub message: Option<String>,
    pub event_id: Option<String>,
    pub event_name: Option<String>,
    pub event_slug: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PaymentResponse {
    pub link: Option<String>,
    /// Provider-side reference later echoed by status callbacks.
    pub id: Option<String>,
    pub error: Option<String>,
    pub message: Option<String>,
}

/// Where to send the registrant, and how the provider will refer to the payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentLink {
    pub url: String,
    pub reference: Option<String>,
}

pub trait PaymentGateway: Send + Sync {
    fn create_link(
        &self,
        request: &PaymentRequest,
    ) -> impl Future<Output = Result<PaymentLink>> + Send;
}

// ─────────────────────────────────────────────────────────
// HTTP implementation
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PaymentClient {
    client: Client,
    url: String,
    api_key: Option<String>,
    max_attempts: u32,
}

impl PaymentClient {
    pub fn new(client: Client, url: String, api_key: Option<String>, max_attempts: u32) -> Self {
        Self {
            client,
            url,
            api_key,
            max_attempts: max_attempts.max(1),
        }
    }
}

impl PaymentGateway for PaymentClient {
    async fn create_link(&self, request: &PaymentRequest) -> Result<PaymentLink> {
        let mut backoff = INITIAL_BACKOFF_MS;
        let mut attempt = 1;

        loop {
            let mut builder = self.client.post(&self.url).json(request);
            if let Some(key) = &self.api_key {
                builder = builder.bearer_auth(key);
            }

            let retry_reason = match builder.send().await {
                Err(e) if e.is_connect() => format!("connection failed: {e}"),
                Err(e) => return Err(AppError::Http(e)),
                Ok(resp) if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS => {
                    "rate limited".to_string()
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body: PaymentResponse = resp.json().await.unwrap_or_default();
                    debug!("Payment function answered {status}");
                    if !status.is_success() && body.error.is_none() && body.message.is_none() {
                        return Err(AppError::Payment(format!(
                            "payment function returned {status}"
                        )));
                    }
                    return decode_response(body);
                }
            };

            if attempt >= self.max_attempts {
                return Err(AppError::Payment(format!(
                    "gave up after {attempt} attempts: {retry_reason}"
                )));
            }
            warn!("Payment request {retry_reason} (will retry in {backoff}ms)");
            tokio::time::sleep(Duration::from_millis(backoff)).await;
            backoff = (backoff * 2).min(MAX_BACKOFF_MS);
            attempt += 1;
        }
    }
}

/// Turn the function's answer into a link, or the message it reported.
pub fn decode_response(body: PaymentResponse) -> Result<PaymentLink> {
    if let Some(error) = body.error {
        return Err(AppError::Payment(error));
    }
    match body.link {
        Some(url) if !url.trim().is_empty() => Ok(PaymentLink {
            url,
            reference: body.id,
        }),
        _ => Err(AppError::Payment(
            body.message
                .unwrap_or_else(|| "no payment link was returned".to_string()),
        )),
    }
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
