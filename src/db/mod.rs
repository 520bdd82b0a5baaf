mod from_row;
pub mod migrations;
pub mod queries;
mod schema;

pub use schema::init_db;

use std::sync::Arc;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::clock::Clock;
use crate::config::PlanPrices;
use crate::payments::BillingProvider;

pub type DbPool = Pool<SqliteConnectionManager>;

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Application state shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    /// Billing provider for webhook verification and subscription lookups.
    /// `None` when no webhook signing secret is configured.
    pub billing: Option<Arc<dyn BillingProvider>>,
    pub plan_prices: PlanPrices,
    /// Lifetime of a freshly claimed voucher, capped by the deal's end.
    pub voucher_ttl_secs: i64,
    pub clock: Arc<dyn Clock>,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path).with_init(|conn| {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", true)
    });
    Pool::builder().max_size(10).build(manager)
}
