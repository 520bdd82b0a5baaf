use chrono::Utc;
use rusqlite::{Connection, ErrorCode, TransactionBehavior, params, types::Value};

use crate::error::{AppError, Result, msg};
use crate::id::{EntityType, generate_voucher_code};
use crate::models::*;

use super::from_row::{
    DEAL_COLS, MERCHANT_COLS, PROCESSED_EVENT_COLS, SUBSCRIPTION_COLS, USER_COLS, VENUE_COLS,
    VOUCHER_COLS, FromRow, query_all, query_one,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

/// Builder for dynamic UPDATE statements with optional fields.
/// Combines multiple field updates into a single query.
struct UpdateBuilder {
    table: &'static str,
    key_column: &'static str,
    key: String,
    fields: Vec<(&'static str, Value)>,
    updated_at: Option<i64>,
}

impl UpdateBuilder {
    fn new(table: &'static str, key_column: &'static str, key: &str) -> Self {
        Self {
            table,
            key_column,
            key: key.to_string(),
            fields: Vec::new(),
            updated_at: None,
        }
    }

    fn with_updated_at(mut self, at: i64) -> Self {
        self.updated_at = Some(at);
        self
    }

    fn set(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.fields.push((column, value.into()));
        self
    }

    fn set_opt<V: Into<Value>>(self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(column, v),
            None => self,
        }
    }

    fn execute(mut self, conn: &Connection) -> Result<bool> {
        if self.fields.is_empty() {
            return Ok(false);
        }
        if let Some(at) = self.updated_at {
            self.fields.push(("updated_at", at.into()));
        }
        let sets: Vec<String> = self
            .fields
            .iter()
            .map(|(col, _)| format!("{} = ?", col))
            .collect();
        let mut values: Vec<Value> = self.fields.into_iter().map(|(_, v)| v).collect();
        values.push(self.key.into());
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            self.table,
            sets.join(", "),
            self.key_column
        );
        let affected = conn.execute(&sql, rusqlite::params_from_iter(values))?;
        Ok(affected > 0)
    }
}

// ============ Merchants ============

pub fn create_merchant(conn: &Connection, input: &CreateMerchant) -> Result<Merchant> {
    let id = EntityType::Merchant.gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO merchants (id, name, billing_customer_id, subscription_status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![
            &id,
            &input.name,
            &input.billing_customer_id,
            MerchantStatus::Trial.as_ref(),
            now
        ],
    )?;

    Ok(Merchant {
        id,
        name: input.name.clone(),
        billing_customer_id: input.billing_customer_id.clone(),
        subscription_status: MerchantStatus::Trial,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_merchant_by_id(conn: &Connection, id: &str) -> Result<Option<Merchant>> {
    query_one(
        conn,
        &format!("SELECT {} FROM merchants WHERE id = ?1", MERCHANT_COLS),
        &[&id],
    )
}

pub fn get_merchant_by_billing_customer(
    conn: &Connection,
    customer_id: &str,
) -> Result<Option<Merchant>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM merchants WHERE billing_customer_id = ?1",
            MERCHANT_COLS
        ),
        &[&customer_id],
    )
}

/// Attach a billing customer id to a merchant that has none yet.
/// Returns false if the merchant is missing or already linked.
pub fn link_billing_customer(
    conn: &Connection,
    merchant_id: &str,
    customer_id: &str,
    at: i64,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE merchants SET billing_customer_id = ?1, updated_at = ?2
         WHERE id = ?3 AND billing_customer_id IS NULL",
        params![customer_id, at, merchant_id],
    )?;
    Ok(affected > 0)
}

pub fn set_merchant_subscription_status(
    conn: &Connection,
    merchant_id: &str,
    status: MerchantStatus,
    at: i64,
) -> Result<bool> {
    UpdateBuilder::new("merchants", "id", merchant_id)
        .with_updated_at(at)
        .set("subscription_status", status.as_ref().to_string())
        .execute(conn)
}

// ============ Subscriptions ============

pub fn get_subscription_for_merchant(
    conn: &Connection,
    merchant_id: &str,
) -> Result<Option<Subscription>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM subscriptions WHERE merchant_id = ?1",
            SUBSCRIPTION_COLS
        ),
        &[&merchant_id],
    )
}

/// Create or overwrite the merchant's subscription. The unique key on
/// `merchant_id` keeps it one-to-one.
pub fn upsert_subscription(
    conn: &Connection,
    merchant_id: &str,
    input: &UpsertSubscription,
    at: i64,
) -> Result<Subscription> {
    let id = EntityType::Subscription.gen_id();

    let subscription = conn.query_row(
        &format!(
            "INSERT INTO subscriptions (id, merchant_id, plan, status, current_period_start,
                current_period_end, external_subscription_id, cancel_at_period_end, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
             ON CONFLICT(merchant_id) DO UPDATE SET
                plan = excluded.plan,
                status = excluded.status,
                current_period_start = excluded.current_period_start,
                current_period_end = excluded.current_period_end,
                external_subscription_id = excluded.external_subscription_id,
                cancel_at_period_end = excluded.cancel_at_period_end,
                updated_at = excluded.updated_at
             RETURNING {}",
            SUBSCRIPTION_COLS
        ),
        params![
            &id,
            merchant_id,
            input.plan.as_ref(),
            &input.status,
            input.current_period_start,
            input.current_period_end,
            &input.external_subscription_id,
            input.cancel_at_period_end,
            at
        ],
        Subscription::from_row,
    )?;

    Ok(subscription)
}

/// Partial update of a subscription from a billing event. `None` fields are left as-is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionPatch {
    pub plan: Option<PlanTier>,
    pub status: Option<String>,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    pub cancel_at_period_end: Option<bool>,
}

/// Returns false when the merchant has no subscription row.
pub fn patch_subscription(
    conn: &Connection,
    merchant_id: &str,
    patch: &SubscriptionPatch,
    at: i64,
) -> Result<bool> {
    UpdateBuilder::new("subscriptions", "merchant_id", merchant_id)
        .with_updated_at(at)
        .set_opt("plan", patch.plan.map(|p| p.as_ref().to_string()))
        .set_opt("status", patch.status.clone())
        .set_opt("current_period_start", patch.current_period_start)
        .set_opt("current_period_end", patch.current_period_end)
        .set_opt("cancel_at_period_end", patch.cancel_at_period_end)
        .execute(conn)
}

// ============ Processed Events ============

pub fn get_processed_event(conn: &Connection, event_id: &str) -> Result<Option<ProcessedEvent>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM processed_events WHERE event_id = ?1",
            PROCESSED_EVENT_COLS
        ),
        &[&event_id],
    )
}

pub fn is_event_processed(conn: &Connection, event_id: &str) -> Result<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM processed_events WHERE event_id = ?1)",
        params![event_id],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Record an event in the dedup ledger.
///
/// Returns false if the id was already recorded. Callers run this inside the
/// same transaction as the event's side effects.
pub fn try_record_processed_event(
    conn: &Connection,
    event_id: &str,
    event_type: &str,
    at: i64,
) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO processed_events (event_id, event_type, processed_at)
         VALUES (?1, ?2, ?3)",
        params![event_id, event_type, at],
    )?;
    Ok(affected > 0)
}

pub fn count_processed_events(conn: &Connection) -> Result<i64> {
    let count = conn.query_row("SELECT COUNT(*) FROM processed_events", [], |row| row.get(0))?;
    Ok(count)
}

// ============ Users ============

pub fn create_user(conn: &Connection, input: &CreateUser) -> Result<User> {
    let id = EntityType::User.gen_id();
    let now = now();
    let email = input.email.trim().to_lowercase();

    conn.execute(
        "INSERT INTO users (id, name, email, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![&id, &input.name, &email, now],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict("A user with this email already exists".into())
        } else {
            e.into()
        }
    })?;

    Ok(User {
        id,
        name: input.name.clone(),
        email,
        created_at: now,
    })
}

pub fn get_user_by_id(conn: &Connection, id: &str) -> Result<Option<User>> {
    query_one(
        conn,
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLS),
        &[&id],
    )
}

// ============ Venues ============

pub fn create_venue(conn: &Connection, merchant_id: &str, input: &CreateVenue) -> Result<Venue> {
    let id = EntityType::Venue.gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO venues (id, merchant_id, name, address, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![&id, merchant_id, &input.name, &input.address, now],
    )?;

    Ok(Venue {
        id,
        merchant_id: merchant_id.to_string(),
        name: input.name.clone(),
        address: input.address.clone(),
        created_at: now,
    })
}

pub fn get_venue_by_id(conn: &Connection, id: &str) -> Result<Option<Venue>> {
    query_one(
        conn,
        &format!("SELECT {} FROM venues WHERE id = ?1", VENUE_COLS),
        &[&id],
    )
}

// ============ Deals ============

pub fn create_deal(conn: &Connection, venue_id: &str, input: &CreateDeal) -> Result<Deal> {
    if !(1..=100).contains(&input.discount_percent) {
        return Err(AppError::BadRequest(
            "discount_percent must be between 1 and 100".into(),
        ));
    }
    if input.ends_at <= input.starts_at {
        return Err(AppError::BadRequest("ends_at must be after starts_at".into()));
    }
    if input.max_redemptions.is_some_and(|max| max < 0) {
        return Err(AppError::BadRequest("max_redemptions cannot be negative".into()));
    }

    let id = EntityType::Deal.gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO deals (id, venue_id, title, discount_percent, starts_at, ends_at,
            max_redemptions, redeemed_count, min_spend_cents, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?9, ?10, ?10)",
        params![
            &id,
            venue_id,
            &input.title,
            input.discount_percent,
            input.starts_at,
            input.ends_at,
            input.max_redemptions,
            input.min_spend_cents,
            input.status.as_ref(),
            now
        ],
    )?;

    Ok(Deal {
        id,
        venue_id: venue_id.to_string(),
        title: input.title.clone(),
        discount_percent: input.discount_percent,
        starts_at: input.starts_at,
        ends_at: input.ends_at,
        max_redemptions: input.max_redemptions,
        redeemed_count: 0,
        min_spend_cents: input.min_spend_cents,
        status: input.status,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_deal_by_id(conn: &Connection, id: &str) -> Result<Option<Deal>> {
    query_one(
        conn,
        &format!("SELECT {} FROM deals WHERE id = ?1", DEAL_COLS),
        &[&id],
    )
}

pub fn set_deal_status(conn: &Connection, deal_id: &str, status: DealStatus) -> Result<bool> {
    UpdateBuilder::new("deals", "id", deal_id)
        .with_updated_at(now())
        .set("status", status.as_ref().to_string())
        .execute(conn)
}

/// Increment the deal's redeemed count only while it is below the cap.
///
/// Returns false when the cap is already reached. The guard lives in the
/// UPDATE itself so concurrent callers can never push the count past the cap.
pub fn try_increment_redeemed_count(conn: &Connection, deal_id: &str, at: i64) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE deals SET redeemed_count = redeemed_count + 1, updated_at = ?1
         WHERE id = ?2 AND (max_redemptions IS NULL OR redeemed_count < max_redemptions)",
        params![at, deal_id],
    )?;
    Ok(affected > 0)
}

/// Move LIVE/PAUSED deals whose window has closed to EXPIRED.
pub fn expire_ended_deals(conn: &Connection, now: i64) -> Result<usize> {
    let affected = conn.execute(
        "UPDATE deals SET status = 'expired', updated_at = ?1
         WHERE status IN ('live', 'paused') AND ends_at <= ?1",
        params![now],
    )?;
    Ok(affected)
}

// ============ Vouchers ============

pub fn get_voucher_by_id(conn: &Connection, id: &str) -> Result<Option<Voucher>> {
    query_one(
        conn,
        &format!("SELECT {} FROM vouchers WHERE id = ?1", VOUCHER_COLS),
        &[&id],
    )
}

pub fn get_voucher_by_code(conn: &Connection, code: &str) -> Result<Option<Voucher>> {
    query_one(
        conn,
        &format!("SELECT {} FROM vouchers WHERE code = ?1", VOUCHER_COLS),
        &[&code],
    )
}

pub fn list_vouchers_for_deal(conn: &Connection, deal_id: &str) -> Result<Vec<Voucher>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM vouchers WHERE deal_id = ?1 ORDER BY issued_at",
            VOUCHER_COLS
        ),
        &[&deal_id],
    )
}

/// Insert a voucher row as-is. Used by claiming and by fixtures that need
/// vouchers in a specific state.
pub fn insert_voucher(conn: &Connection, voucher: &Voucher) -> Result<()> {
    conn.execute(
        "INSERT INTO vouchers (id, code, deal_id, user_id, status, issued_at, expires_at, redeemed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            &voucher.id,
            &voucher.code,
            &voucher.deal_id,
            &voucher.user_id,
            voucher.status.as_ref(),
            voucher.issued_at,
            voucher.expires_at,
            voucher.redeemed_at
        ],
    )?;
    Ok(())
}

/// Number of attempts at finding an unused voucher code before giving up.
const VOUCHER_CODE_ATTEMPTS: usize = 5;

/// Issue a voucher on a deal for a user.
///
/// Runs in an IMMEDIATE transaction so the availability checks and the insert
/// see the same deal state.
pub fn claim_voucher_atomic(
    conn: &mut Connection,
    deal_id: &str,
    user_id: &str,
    ttl_secs: i64,
    now: i64,
) -> Result<Voucher> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let deal = get_deal_by_id(&tx, deal_id)?
        .ok_or_else(|| AppError::NotFound(msg::DEAL_NOT_FOUND.into()))?;
    if get_user_by_id(&tx, user_id)?.is_none() {
        return Err(AppError::NotFound(msg::USER_NOT_FOUND.into()));
    }
    if !deal.is_claimable_at(now) {
        return Err(AppError::DealUnavailable);
    }
    if deal.cap_reached() {
        return Err(AppError::CapReached);
    }

    let already_holding: bool = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM vouchers WHERE deal_id = ?1 AND user_id = ?2 AND status = 'issued')",
        params![deal_id, user_id],
        |row| row.get(0),
    )?;
    if already_holding {
        return Err(AppError::Conflict(msg::ALREADY_CLAIMED.into()));
    }

    let expires_at = (now + ttl_secs).min(deal.ends_at);

    for _ in 0..VOUCHER_CODE_ATTEMPTS {
        let voucher = Voucher {
            id: EntityType::Voucher.gen_id(),
            code: generate_voucher_code(),
            deal_id: deal_id.to_string(),
            user_id: user_id.to_string(),
            status: VoucherStatus::Issued,
            issued_at: now,
            expires_at,
            redeemed_at: None,
        };

        match insert_voucher(&tx, &voucher) {
            Ok(()) => {
                tx.commit()?;
                return Ok(voucher);
            }
            Err(AppError::Database(e)) if is_unique_violation(&e) => {
                tracing::debug!("Voucher code collision, retrying");
                continue;
            }
            Err(e) => return Err(e),
        }
    }

    Err(AppError::Internal(
        "Could not generate a unique voucher code".into(),
    ))
}

/// Redeem a voucher: validate it and consume it together with one unit of
/// the deal's redemption cap.
///
/// Everything happens in one IMMEDIATE transaction, and both writes are
/// guarded updates, so of any number of concurrent callers at most one
/// succeeds per voucher and the deal never exceeds its cap.
pub fn redeem_voucher_atomic(conn: &mut Connection, voucher_id: &str, now: i64) -> Result<Voucher> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let voucher = get_voucher_by_id(&tx, voucher_id)?
        .ok_or_else(|| AppError::NotFound(msg::VOUCHER_NOT_FOUND.into()))?;

    match voucher.status {
        VoucherStatus::Issued => {}
        VoucherStatus::Redeemed => return Err(AppError::AlreadyRedeemed),
        VoucherStatus::Cancelled => return Err(AppError::VoucherCancelled),
        VoucherStatus::Expired => return Err(AppError::Expired),
    }

    if now > voucher.expires_at {
        return Err(AppError::Expired);
    }

    if !try_increment_redeemed_count(&tx, &voucher.deal_id, now)? {
        return Err(AppError::CapReached);
    }

    let affected = tx.execute(
        "UPDATE vouchers SET status = 'redeemed', redeemed_at = ?1
         WHERE id = ?2 AND status = 'issued' AND expires_at >= ?1",
        params![now, &voucher.id],
    )?;
    if affected == 0 {
        // Dropping the transaction rolls back the deal increment
        return Err(AppError::AlreadyRedeemed);
    }

    tx.commit()?;

    Ok(Voucher {
        status: VoucherStatus::Redeemed,
        redeemed_at: Some(now),
        ..voucher
    })
}

/// Cancel an issued voucher. Returns false if it was not in ISSUED state.
pub fn cancel_voucher(conn: &Connection, voucher_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE vouchers SET status = 'cancelled' WHERE id = ?1 AND status = 'issued'",
        params![voucher_id],
    )?;
    Ok(affected > 0)
}

/// Move ISSUED vouchers past their expiry to EXPIRED.
pub fn expire_stale_vouchers(conn: &Connection, now: i64) -> Result<usize> {
    let affected = conn.execute(
        "UPDATE vouchers SET status = 'expired' WHERE status = 'issued' AND expires_at < ?1",
        params![now],
    )?;
    Ok(affected)
}

/// Load a voucher with its deal, venue and user.
pub fn get_voucher_details(conn: &Connection, voucher: Voucher) -> Result<VoucherDetails> {
    let deal = get_deal_by_id(conn, &voucher.deal_id)?
        .ok_or_else(|| AppError::Internal(format!("Deal {} missing for voucher", voucher.deal_id)))?;
    let venue = get_venue_by_id(conn, &deal.venue_id)?
        .ok_or_else(|| AppError::Internal(format!("Venue {} missing for deal", deal.venue_id)))?;
    let user = get_user_by_id(conn, &voucher.user_id)?
        .ok_or_else(|| AppError::Internal(format!("User {} missing for voucher", voucher.user_id)))?;

    Ok(VoucherDetails {
        voucher,
        deal,
        venue,
        user,
    })
}
