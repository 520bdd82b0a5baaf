use rusqlite::Connection;

use super::migrations::{run_migrations, MigrationError};

/// Bring a database up to the current schema version.
///
/// Safe to call on every startup: applied migrations are skipped.
pub fn init_db(conn: &mut Connection) -> Result<(), MigrationError> {
    run_migrations(conn)
}

/// Core schema (migration 1).
pub(super) const BASELINE_SCHEMA: &str = r#"
    -- Merchants (restaurant businesses)
    CREATE TABLE IF NOT EXISTS merchants (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        billing_customer_id TEXT UNIQUE,
        subscription_status TEXT NOT NULL DEFAULT 'trial'
            CHECK (subscription_status IN ('active', 'past_due', 'canceled', 'trial')),
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );

    -- Subscriptions (one per merchant, never hard-deleted)
    CREATE TABLE IF NOT EXISTS subscriptions (
        id TEXT PRIMARY KEY,
        merchant_id TEXT NOT NULL UNIQUE REFERENCES merchants(id),
        plan TEXT NOT NULL CHECK (plan IN ('basic', 'growth', 'enterprise')),
        status TEXT NOT NULL,
        current_period_start INTEGER,
        current_period_end INTEGER,
        external_subscription_id TEXT NOT NULL,
        cancel_at_period_end INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_subscriptions_external ON subscriptions(external_subscription_id);

    -- Billing webhook dedup ledger
    CREATE TABLE IF NOT EXISTS processed_events (
        event_id TEXT PRIMARY KEY,
        event_type TEXT NOT NULL,
        processed_at INTEGER NOT NULL
    );

    -- Diners
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        email TEXT NOT NULL UNIQUE,
        created_at INTEGER NOT NULL
    );

    -- Venues (restaurant locations)
    CREATE TABLE IF NOT EXISTS venues (
        id TEXT PRIMARY KEY,
        merchant_id TEXT NOT NULL REFERENCES merchants(id),
        name TEXT NOT NULL,
        address TEXT,
        created_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_venues_merchant ON venues(merchant_id);

    -- Deals (time-boxed discounts at a venue)
    CREATE TABLE IF NOT EXISTS deals (
        id TEXT PRIMARY KEY,
        venue_id TEXT NOT NULL REFERENCES venues(id),
        title TEXT NOT NULL,
        discount_percent INTEGER NOT NULL CHECK (discount_percent BETWEEN 1 AND 100),
        starts_at INTEGER NOT NULL,
        ends_at INTEGER NOT NULL,
        max_redemptions INTEGER CHECK (max_redemptions IS NULL OR max_redemptions >= 0),
        redeemed_count INTEGER NOT NULL DEFAULT 0
            CHECK (redeemed_count >= 0 AND (max_redemptions IS NULL OR redeemed_count <= max_redemptions)),
        min_spend_cents INTEGER,
        status TEXT NOT NULL CHECK (status IN ('draft', 'live', 'paused', 'expired')),
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        CHECK (ends_at > starts_at)
    );
    CREATE INDEX IF NOT EXISTS idx_deals_venue ON deals(venue_id);
    CREATE INDEX IF NOT EXISTS idx_deals_status_end ON deals(status, ends_at);

    -- Vouchers (per-user claims on a deal; audit records, never deleted)
    CREATE TABLE IF NOT EXISTS vouchers (
        id TEXT PRIMARY KEY,
        code TEXT NOT NULL UNIQUE,
        deal_id TEXT NOT NULL REFERENCES deals(id),
        user_id TEXT NOT NULL REFERENCES users(id),
        status TEXT NOT NULL CHECK (status IN ('issued', 'redeemed', 'cancelled', 'expired')),
        issued_at INTEGER NOT NULL,
        expires_at INTEGER NOT NULL,
        redeemed_at INTEGER
    );
    CREATE INDEX IF NOT EXISTS idx_vouchers_deal ON vouchers(deal_id);
    CREATE INDEX IF NOT EXISTS idx_vouchers_status_expiry ON vouchers(status, expires_at);
"#;

/// One outstanding voucher per user and deal (migration 2).
pub(super) const ONE_ISSUED_VOUCHER_PER_USER: &str = r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_vouchers_one_issued_per_user
        ON vouchers(deal_id, user_id) WHERE status = 'issued';
"#;
