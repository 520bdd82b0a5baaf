use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

/// Merchant-level view of billing health, derived from the provider's
/// subscription status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "snake_case")]
pub enum MerchantStatus {
    Active,
    PastDue,
    Canceled,
    Trial,
}

impl MerchantStatus {
    /// Map a provider subscription status onto the merchant status.
    ///
    /// Total over all strings: unknown or future provider statuses count as
    /// active so a vocabulary change never locks a paying merchant out.
    /// `Trial` is never produced here; it is only the initial state.
    pub fn from_provider_status(status: &str) -> Self {
        match status {
            "past_due" | "unpaid" => MerchantStatus::PastDue,
            "canceled" | "incomplete_expired" => MerchantStatus::Canceled,
            _ => MerchantStatus::Active,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Merchant {
    pub id: String,
    pub name: String,
    /// Billing provider customer id (`cus_...`), set on first checkout.
    pub billing_customer_id: Option<String>,
    pub subscription_status: MerchantStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateMerchant {
    pub name: String,
    #[serde(default)]
    pub billing_customer_id: Option<String>,
}
