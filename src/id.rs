//! Prefixed ID generation for Happy Hour entities.
//!
//! All IDs use an `hh_` brand prefix so they never collide with payment
//! provider IDs (Stripe's `cus_`, `sub_`, `evt_`, etc.).
//!
//! Format: `hh_{entity}_{uuid_simple}` (32 hex chars, no hyphens)

use rand::Rng;
use uuid::Uuid;

/// Alphabet for voucher codes. Omits 0/O and 1/I so codes survive being read
/// aloud or typed from a phone screen.
const VOUCHER_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub const VOUCHER_CODE_PREFIX: &str = "HH";

#[derive(Debug, Clone, Copy)]
pub enum EntityType {
    Merchant,
    Subscription,
    Venue,
    Deal,
    User,
    Voucher,
}

impl EntityType {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Merchant => "hh_mer",
            Self::Subscription => "hh_sub",
            Self::Venue => "hh_ven",
            Self::Deal => "hh_deal",
            Self::User => "hh_usr",
            Self::Voucher => "hh_vch",
        }
    }

    pub fn gen_id(&self) -> String {
        format!("{}_{}", self.prefix(), Uuid::new_v4().as_simple())
    }
}

/// Generate a human-readable voucher code in `HH-XXXX-XXXX` format (40 bits of entropy).
pub fn generate_voucher_code() -> String {
    let mut rng = rand::thread_rng();
    let mut part = || -> String {
        (0..4)
            .map(|_| VOUCHER_CODE_ALPHABET[rng.gen_range(0..VOUCHER_CODE_ALPHABET.len())] as char)
            .collect()
    };

    format!("{}-{}-{}", VOUCHER_CODE_PREFIX, part(), part())
}

/// Canonical form of a typed voucher code: trimmed and upper-cased.
pub fn normalize_voucher_code(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}
