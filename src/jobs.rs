//! Background maintenance.

use std::time::Duration;

use rusqlite::Connection;

use crate::db::{AppState, queries};
use crate::error::Result;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub vouchers_expired: usize,
    pub deals_expired: usize,
}

/// Mark lapsed vouchers and ended deals EXPIRED.
///
/// Redemption checks expiry itself, so this only keeps stored statuses tidy.
pub fn run_expiry_sweep(conn: &Connection, now: i64) -> Result<SweepReport> {
    Ok(SweepReport {
        vouchers_expired: queries::expire_stale_vouchers(conn, now)?,
        deals_expired: queries::expire_ended_deals(conn, now)?,
    })
}

pub fn spawn_expiry_sweep(state: AppState, interval: Duration) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;

            let conn = match state.db.get() {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!("Failed to get db connection for expiry sweep: {}", e);
                    continue;
                }
            };

            match run_expiry_sweep(&conn, state.clock.now()) {
                Ok(report) => {
                    if report != SweepReport::default() {
                        tracing::debug!(
                            "Expiry sweep: {} vouchers, {} deals expired",
                            report.vouchers_expired,
                            report.deals_expired
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!("Expiry sweep failed: {}", e);
                }
            }
        }
    });

    tracing::info!("Expiry sweep started (every {}s)", interval.as_secs());
}
