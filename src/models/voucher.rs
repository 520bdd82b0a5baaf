use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use super::{Deal, User, Venue};

/// Voucher lifecycle. `Issued` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "lowercase")]
pub enum VoucherStatus {
    Issued,
    Redeemed,
    Cancelled,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voucher {
    pub id: String,
    pub code: String,
    pub deal_id: String,
    pub user_id: String,
    pub status: VoucherStatus,
    pub issued_at: i64,
    pub expires_at: i64,
    pub redeemed_at: Option<i64>,
}

/// Voucher with the deal, venue and user it belongs to, as shown to the
/// merchant at the till.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoucherDetails {
    #[serde(flatten)]
    pub voucher: Voucher,
    pub deal: Deal,
    pub venue: Venue,
    pub user: User,
}
