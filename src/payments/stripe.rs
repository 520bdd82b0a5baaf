use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::config::{Config, PlanPrices};
use crate::error::{AppError, Result, msg};
use crate::models::{PlanTier, UpsertSubscription};

use super::BillingProvider;

type HmacSha256 = Hmac<Sha256>;

/// How far a signature timestamp may sit in the future before it is refused.
const FUTURE_SKEW_SECS: i64 = 60;

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: Option<String>,
    pub webhook_secret: String,
    pub api_base: String,
    pub tolerance_secs: i64,
    pub timeout: Duration,
}

impl StripeConfig {
    /// `None` when no webhook signing secret is configured.
    pub fn from_config(config: &Config) -> Option<Self> {
        let webhook_secret = config.stripe_webhook_secret.clone()?;
        Some(Self {
            secret_key: config.stripe_secret_key.clone(),
            webhook_secret,
            api_base: config.stripe_api_base.trim_end_matches('/').to_string(),
            tolerance_secs: config.webhook_tolerance_secs,
            timeout: config.billing_http_timeout,
        })
    }
}

#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    config: StripeConfig,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl BillingProvider for StripeClient {
    fn verify_webhook_signature(&self, payload: &[u8], signature: &str, now: i64) -> Result<bool> {
        verify_stripe_signature(
            &self.config.webhook_secret,
            payload,
            signature,
            self.config.tolerance_secs,
            now,
        )
    }

    async fn retrieve_subscription(&self, subscription_id: &str) -> Result<StripeSubscription> {
        let secret_key = self
            .config
            .secret_key
            .as_deref()
            .ok_or_else(|| AppError::Upstream("STRIPE_SECRET_KEY is not configured".into()))?;

        let response = self
            .client
            .get(format!(
                "{}/v1/subscriptions/{}",
                self.config.api_base, subscription_id
            ))
            .basic_auth(secret_key, None::<&str>)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("Stripe API error: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!(
                "Stripe API error ({}): {}",
                status, error_text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("Failed to parse Stripe response: {}", e)))
    }
}

/// Verify a `Stripe-Signature` header (`t=<unix>,v1=<hex>[,v1=<hex>...]`).
///
/// The MAC is HMAC-SHA256 over `"{t}.{body}"` keyed by the webhook secret.
/// Timestamps older than `tolerance_secs`, or more than a minute ahead of
/// `now`, are refused to limit replays.
pub fn verify_stripe_signature(
    secret: &str,
    payload: &[u8],
    header: &str,
    tolerance_secs: i64,
    now: i64,
) -> Result<bool> {
    let mut timestamp = None;
    let mut candidates = Vec::new();

    for part in header.split(',') {
        let part = part.trim();
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = Some(t);
        } else if let Some(s) = part.strip_prefix("v1=") {
            candidates.push(s);
        }
    }

    let timestamp_str =
        timestamp.ok_or_else(|| AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()))?;
    if candidates.is_empty() {
        return Err(AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()));
    }

    let timestamp: i64 = timestamp_str
        .parse()
        .map_err(|_| AppError::BadRequest(msg::INVALID_TIMESTAMP_IN_SIGNATURE.into()))?;

    let Some(age) = now.checked_sub(timestamp) else {
        tracing::warn!("Stripe webhook rejected: timestamp out of range ({})", timestamp);
        return Ok(false);
    };
    if age > tolerance_secs {
        tracing::warn!(
            "Stripe webhook rejected: timestamp too old (age={}s, max={}s)",
            age,
            tolerance_secs
        );
        return Ok(false);
    }
    if age < -FUTURE_SKEW_SECS {
        tracing::warn!(
            "Stripe webhook rejected: timestamp in the future (age={}s)",
            age
        );
        return Ok(false);
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Internal(msg::INVALID_WEBHOOK_SECRET.into()))?;
    mac.update(timestamp_str.as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());
    let expected_bytes = expected.as_bytes();

    // Signature length is not secret, so the length check may short-circuit
    Ok(candidates.iter().any(|candidate| {
        let provided = candidate.as_bytes();
        provided.len() == expected_bytes.len() && bool::from(expected_bytes.ct_eq(provided))
    }))
}

/// Envelope of every webhook delivery. `data.object` is parsed per event type.
#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

// ============ checkout.session.completed ============

#[derive(Debug, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    pub mode: Option<String>,
    pub customer: Option<String>,
    pub subscription: Option<String>,
    /// Set by our checkout flow to the merchant id.
    pub client_reference_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl StripeCheckoutSession {
    /// Merchant this checkout was started for, if the session says so.
    pub fn merchant_reference(&self) -> Option<&str> {
        self.client_reference_id
            .as_deref()
            .or_else(|| self.metadata.get("merchant_id").map(String::as_str))
            .filter(|id| !id.is_empty())
    }
}

// ============ invoice.* ============

#[derive(Debug, Deserialize)]
pub struct StripeInvoice {
    pub id: String,
    pub customer: Option<String>,
    pub subscription: Option<String>,
    /// Newer API versions move the subscription id under `parent`.
    #[serde(default)]
    pub parent: Option<StripeInvoiceParent>,
}

#[derive(Debug, Deserialize)]
pub struct StripeInvoiceParent {
    pub subscription_details: Option<StripeInvoiceSubscriptionDetails>,
}

#[derive(Debug, Deserialize)]
pub struct StripeInvoiceSubscriptionDetails {
    pub subscription: Option<String>,
}

impl StripeInvoice {
    pub fn subscription_id(&self) -> Option<&str> {
        self.subscription.as_deref().or_else(|| {
            self.parent
                .as_ref()?
                .subscription_details
                .as_ref()?
                .subscription
                .as_deref()
        })
    }
}

// ============ customer.subscription.* ============

#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    pub customer: Option<String>,
    pub status: String,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub items: StripeSubscriptionItems,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StripeSubscriptionItems {
    #[serde(default)]
    pub data: Vec<StripeSubscriptionItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscriptionItem {
    pub price: Option<StripePrice>,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripePrice {
    pub id: String,
}

impl StripeSubscription {
    fn first_item(&self) -> Option<&StripeSubscriptionItem> {
        self.items.data.first()
    }

    pub fn price_id(&self) -> Option<&str> {
        self.first_item()?.price.as_ref().map(|p| p.id.as_str())
    }

    /// Billing period, read from the subscription or, on newer API
    /// versions, from its first item.
    pub fn period(&self) -> (Option<i64>, Option<i64>) {
        let item = self.first_item();
        (
            self.current_period_start
                .or_else(|| item.and_then(|i| i.current_period_start)),
            self.current_period_end
                .or_else(|| item.and_then(|i| i.current_period_end)),
        )
    }

    /// Plan tier from `metadata.plan`, then the configured price map, then Basic.
    pub fn plan_tier(&self, prices: &PlanPrices) -> PlanTier {
        if let Some(tier) = self
            .metadata
            .get("plan")
            .and_then(|plan| plan.parse::<PlanTier>().ok())
        {
            return tier;
        }
        self.price_id()
            .and_then(|price| prices.tier_for_price(price))
            .unwrap_or(PlanTier::Basic)
    }

    pub fn to_upsert(&self, prices: &PlanPrices) -> UpsertSubscription {
        let (current_period_start, current_period_end) = self.period();
        UpsertSubscription {
            plan: self.plan_tier(prices),
            status: self.status.clone(),
            current_period_start,
            current_period_end,
            external_subscription_id: self.id.clone(),
            cancel_at_period_end: self.cancel_at_period_end,
        }
    }
}
