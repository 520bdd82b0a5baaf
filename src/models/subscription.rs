use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum PlanTier {
    Basic,
    Growth,
    Enterprise,
}

/// A merchant's recurring billing relationship. One per merchant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub merchant_id: String,
    pub plan: PlanTier,
    /// Provider status string, mirrored verbatim (`active`, `past_due`, ...).
    pub status: String,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    pub external_subscription_id: String,
    pub cancel_at_period_end: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Full subscription state as reported by the provider, written on checkout
/// and on subscription updates.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertSubscription {
    pub plan: PlanTier,
    pub status: String,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    pub external_subscription_id: String,
    pub cancel_at_period_end: bool,
}
