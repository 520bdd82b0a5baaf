use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "lowercase")]
pub enum DealStatus {
    Draft,
    Live,
    Paused,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deal {
    pub id: String,
    pub venue_id: String,
    pub title: String,
    pub discount_percent: i32,
    pub starts_at: i64,
    pub ends_at: i64,
    /// Total redemptions allowed across all vouchers (None = unlimited)
    pub max_redemptions: Option<i32>,
    pub redeemed_count: i32,
    pub min_spend_cents: Option<i64>,
    pub status: DealStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Deal {
    pub fn cap_reached(&self) -> bool {
        self.max_redemptions
            .is_some_and(|max| self.redeemed_count >= max)
    }

    /// Live and inside its time window.
    pub fn is_claimable_at(&self, now: i64) -> bool {
        self.status == DealStatus::Live && self.starts_at <= now && now < self.ends_at
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateDeal {
    pub title: String,
    pub discount_percent: i32,
    pub starts_at: i64,
    pub ends_at: i64,
    #[serde(default)]
    pub max_redemptions: Option<i32>,
    #[serde(default)]
    pub min_spend_cents: Option<i64>,
    pub status: DealStatus,
}
