//! Row mapping trait and helpers for reducing boilerplate in queries.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to rusqlite errors.
///
/// A corrupt enum value fails the read instead of panicking.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const MERCHANT_COLS: &str =
    "id, name, billing_customer_id, subscription_status, created_at, updated_at";

pub const SUBSCRIPTION_COLS: &str = "id, merchant_id, plan, status, current_period_start, current_period_end, external_subscription_id, cancel_at_period_end, created_at, updated_at";

pub const PROCESSED_EVENT_COLS: &str = "event_id, event_type, processed_at";

pub const USER_COLS: &str = "id, name, email, created_at";

pub const VENUE_COLS: &str = "id, merchant_id, name, address, created_at";

pub const DEAL_COLS: &str = "id, venue_id, title, discount_percent, starts_at, ends_at, max_redemptions, redeemed_count, min_spend_cents, status, created_at, updated_at";

pub const VOUCHER_COLS: &str =
    "id, code, deal_id, user_id, status, issued_at, expires_at, redeemed_at";

// ============ FromRow Implementations ============

impl FromRow for Merchant {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Merchant {
            id: row.get(0)?,
            name: row.get(1)?,
            billing_customer_id: row.get(2)?,
            subscription_status: parse_enum(row, 3, "subscription_status")?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }
}

impl FromRow for Subscription {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Subscription {
            id: row.get(0)?,
            merchant_id: row.get(1)?,
            plan: parse_enum(row, 2, "plan")?,
            status: row.get(3)?,
            current_period_start: row.get(4)?,
            current_period_end: row.get(5)?,
            external_subscription_id: row.get(6)?,
            cancel_at_period_end: row.get::<_, i32>(7)? != 0,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }
}

impl FromRow for ProcessedEvent {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ProcessedEvent {
            event_id: row.get(0)?,
            event_type: row.get(1)?,
            processed_at: row.get(2)?,
        })
    }
}

impl FromRow for User {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            name: row.get(1)?,
            email: row.get(2)?,
            created_at: row.get(3)?,
        })
    }
}

impl FromRow for Venue {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Venue {
            id: row.get(0)?,
            merchant_id: row.get(1)?,
            name: row.get(2)?,
            address: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

impl FromRow for Deal {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Deal {
            id: row.get(0)?,
            venue_id: row.get(1)?,
            title: row.get(2)?,
            discount_percent: row.get(3)?,
            starts_at: row.get(4)?,
            ends_at: row.get(5)?,
            max_redemptions: row.get(6)?,
            redeemed_count: row.get(7)?,
            min_spend_cents: row.get(8)?,
            status: parse_enum(row, 9, "status")?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }
}

impl FromRow for Voucher {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Voucher {
            id: row.get(0)?,
            code: row.get(1)?,
            deal_id: row.get(2)?,
            user_id: row.get(3)?,
            status: parse_enum(row, 4, "status")?,
            issued_at: row.get(5)?,
            expires_at: row.get(6)?,
            redeemed_at: row.get(7)?,
        })
    }
}
