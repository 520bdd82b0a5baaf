use std::env;
use std::time::Duration;

use crate::models::PlanTier;

/// Stripe price ids for each plan tier, used when a subscription carries no
/// `plan` metadata.
#[derive(Debug, Clone, Default)]
pub struct PlanPrices {
    pub basic: Option<String>,
    pub growth: Option<String>,
    pub enterprise: Option<String>,
}

impl PlanPrices {
    pub fn tier_for_price(&self, price_id: &str) -> Option<PlanTier> {
        let matches = |configured: &Option<String>| configured.as_deref() == Some(price_id);
        if matches(&self.enterprise) {
            Some(PlanTier::Enterprise)
        } else if matches(&self.growth) {
            Some(PlanTier::Growth)
        } else if matches(&self.basic) {
            Some(PlanTier::Basic)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub dev_mode: bool,
    /// Secret API key for provider calls (retrieving subscriptions).
    pub stripe_secret_key: Option<String>,
    /// Webhook signing secret. Webhooks are refused with MISSING_CONFIG when unset.
    pub stripe_webhook_secret: Option<String>,
    pub stripe_api_base: String,
    pub webhook_tolerance_secs: i64,
    pub billing_http_timeout: Duration,
    pub plan_prices: PlanPrices,
    pub voucher_ttl_secs: i64,
    pub expiry_sweep_interval: Duration,
}

const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com";
const DEFAULT_WEBHOOK_TOLERANCE_SECS: i64 = 300;
const DEFAULT_BILLING_TIMEOUT_SECS: u64 = 10;
const DEFAULT_VOUCHER_TTL_HOURS: i64 = 24;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 5 * 60;

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Voucher lifetime in seconds from a configured hour count. Values that are
/// not positive or overflow fall back to the default.
fn voucher_ttl_secs(hours: Option<i64>) -> i64 {
    let default = DEFAULT_VOUCHER_TTL_HOURS * 3600;
    match hours {
        None => default,
        Some(h) => match h.checked_mul(3600).filter(|secs| *secs > 0) {
            Some(secs) => secs,
            None => {
                tracing::warn!(
                    "VOUCHER_TTL_HOURS={} is out of range, using {}h",
                    h,
                    DEFAULT_VOUCHER_TTL_HOURS
                );
                default
            }
        },
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("HAPPYHOUR_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = parse_var("PORT").unwrap_or(3000);

        let stripe_webhook_secret = non_empty_var("STRIPE_WEBHOOK_SECRET");
        if stripe_webhook_secret.is_none() {
            tracing::warn!("STRIPE_WEBHOOK_SECRET is not set; billing webhooks will be refused");
        }

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "happyhour.db".to_string()),
            dev_mode,
            stripe_secret_key: non_empty_var("STRIPE_SECRET_KEY"),
            stripe_webhook_secret,
            stripe_api_base: non_empty_var("STRIPE_API_BASE")
                .unwrap_or_else(|| DEFAULT_STRIPE_API_BASE.to_string()),
            webhook_tolerance_secs: parse_var("STRIPE_WEBHOOK_TOLERANCE_SECS")
                .unwrap_or(DEFAULT_WEBHOOK_TOLERANCE_SECS),
            billing_http_timeout: Duration::from_secs(
                parse_var("BILLING_HTTP_TIMEOUT_SECS").unwrap_or(DEFAULT_BILLING_TIMEOUT_SECS),
            ),
            plan_prices: PlanPrices {
                basic: non_empty_var("STRIPE_PRICE_BASIC"),
                growth: non_empty_var("STRIPE_PRICE_GROWTH"),
                enterprise: non_empty_var("STRIPE_PRICE_ENTERPRISE"),
            },
            voucher_ttl_secs: voucher_ttl_secs(parse_var("VOUCHER_TTL_HOURS")),
            expiry_sweep_interval: Duration::from_secs(
                parse_var("EXPIRY_SWEEP_INTERVAL_SECS").unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS),
            ),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
