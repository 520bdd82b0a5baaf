//! Test utilities and fixtures for Happy Hour integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use serde_json::Value;
use tempfile::TempDir;

pub use happyhour::clock::{Clock, FixedClock};
pub use happyhour::config::PlanPrices;
pub use happyhour::db::{AppState, DbPool, create_pool, init_db, queries};
pub use happyhour::error::{AppError, Result};
pub use happyhour::handlers;
pub use happyhour::id::generate_voucher_code;
pub use happyhour::models::*;
pub use happyhour::payments::{BillingProvider, StripeSubscription, verify_stripe_signature};

/// Fixed "current time" for every test (2025-06-15T15:06:40Z).
pub const NOW: i64 = 1_750_000_000;
pub const ONE_HOUR: i64 = 3600;
pub const ONE_DAY: i64 = 86400;

pub const TEST_WEBHOOK_SECRET: &str = "whsec_test123secret456";
pub const TEST_VOUCHER_TTL_SECS: i64 = 2 * ONE_HOUR;

pub const PRICE_BASIC: &str = "price_basic_monthly";
pub const PRICE_GROWTH: &str = "price_growth_monthly";
pub const PRICE_ENTERPRISE: &str = "price_enterprise_monthly";

pub fn test_plan_prices() -> PlanPrices {
    PlanPrices {
        basic: Some(PRICE_BASIC.to_string()),
        growth: Some(PRICE_GROWTH.to_string()),
        enterprise: Some(PRICE_ENTERPRISE.to_string()),
    }
}

// ============ Billing provider fake ============

/// In-process billing provider. Verifies signatures for real against
/// `TEST_WEBHOOK_SECRET` and serves subscriptions from a map.
#[derive(Default)]
pub struct MockBilling {
    subscriptions: Mutex<HashMap<String, StripeSubscription>>,
    fail: AtomicBool,
    retrieve_calls: AtomicUsize,
}

impl MockBilling {
    pub fn put_subscription(&self, sub: StripeSubscription) {
        self.subscriptions
            .lock()
            .unwrap()
            .insert(sub.id.clone(), sub);
    }

    /// Make every `retrieve_subscription` call fail (provider outage).
    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    pub fn retrieve_calls(&self) -> usize {
        self.retrieve_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BillingProvider for MockBilling {
    fn verify_webhook_signature(&self, payload: &[u8], signature: &str, now: i64) -> Result<bool> {
        verify_stripe_signature(TEST_WEBHOOK_SECRET, payload, signature, 300, now)
    }

    async fn retrieve_subscription(&self, subscription_id: &str) -> Result<StripeSubscription> {
        self.retrieve_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::Upstream("provider unavailable".into()));
        }
        self.subscriptions
            .lock()
            .unwrap()
            .get(subscription_id)
            .cloned()
            .ok_or_else(|| AppError::Upstream(format!("No such subscription: {}", subscription_id)))
    }
}

/// Build a provider subscription object the way the Stripe API returns it.
pub fn stripe_subscription(id: &str, customer: &str, status: &str, price: &str) -> StripeSubscription {
    serde_json::from_value(stripe_subscription_json(id, customer, status, price))
        .expect("subscription fixture should deserialize")
}

pub fn stripe_subscription_json(id: &str, customer: &str, status: &str, price: &str) -> Value {
    serde_json::json!({
        "id": id,
        "object": "subscription",
        "customer": customer,
        "status": status,
        "cancel_at_period_end": false,
        "current_period_start": NOW - ONE_DAY,
        "current_period_end": NOW + 29 * ONE_DAY,
        "metadata": {},
        "items": {
            "object": "list",
            "data": [{ "id": "si_1", "price": { "id": price } }]
        }
    })
}

// ============ App state ============

/// A file-backed database in a temp dir plus the state handlers run against.
/// File-backed so that every pooled connection sees the same data.
pub struct TestContext {
    pub state: AppState,
    pub clock: Arc<FixedClock>,
    pub billing: Arc<MockBilling>,
    pub db_path: String,
    _dir: TempDir,
}

impl TestContext {
    pub fn conn(&self) -> PooledConnection<SqliteConnectionManager> {
        self.state.db.get().expect("Failed to get test connection")
    }
}

pub fn create_test_context() -> TestContext {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = dir
        .path()
        .join("happyhour_test.db")
        .to_string_lossy()
        .into_owned();

    let pool = create_pool(&db_path).expect("Failed to create test pool");
    {
        let mut conn = pool.get().expect("Failed to get connection");
        init_db(&mut conn).expect("Failed to initialize schema");
    }

    let clock = Arc::new(FixedClock::new(NOW));
    let billing = Arc::new(MockBilling::default());

    let state = AppState {
        db: pool,
        billing: Some(billing.clone() as Arc<dyn BillingProvider>),
        plan_prices: test_plan_prices(),
        voucher_ttl_secs: TEST_VOUCHER_TTL_SECS,
        clock: clock.clone() as Arc<dyn Clock>,
    };

    TestContext {
        state,
        clock,
        billing,
        db_path,
        _dir: dir,
    }
}

/// Create an in-memory test database with schema initialized
pub fn setup_test_db() -> Connection {
    let mut conn = Connection::open_in_memory().expect("Failed to create in-memory database");
    conn.pragma_update(None, "foreign_keys", true)
        .expect("Failed to enable foreign keys");
    init_db(&mut conn).expect("Failed to initialize schema");
    conn
}

/// Open a second connection to a test database file, as another process would.
pub fn open_thread_connection(db_path: &str) -> Connection {
    let conn = Connection::open(db_path).expect("thread failed to open db");
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .expect("failed to set busy timeout");
    conn
}

// ============ Fixtures ============

pub fn create_test_merchant(conn: &Connection, name: &str, customer_id: Option<&str>) -> Merchant {
    queries::create_merchant(
        conn,
        &CreateMerchant {
            name: name.to_string(),
            billing_customer_id: customer_id.map(String::from),
        },
    )
    .expect("Failed to create test merchant")
}

pub fn create_test_user(conn: &Connection, email: &str) -> User {
    queries::create_user(
        conn,
        &CreateUser {
            name: format!("Test User {}", email),
            email: email.to_string(),
        },
    )
    .expect("Failed to create test user")
}

pub fn create_test_venue(conn: &Connection, merchant_id: &str) -> Venue {
    queries::create_venue(
        conn,
        merchant_id,
        &CreateVenue {
            name: "Test Cantina".to_string(),
            address: Some("42 Test St".to_string()),
        },
    )
    .expect("Failed to create test venue")
}

/// A LIVE deal that started an hour ago and ends in a day.
pub fn create_test_deal(conn: &Connection, venue_id: &str, max_redemptions: Option<i32>) -> Deal {
    create_test_deal_with(
        conn,
        venue_id,
        CreateDeal {
            title: "2-for-1 margaritas".to_string(),
            discount_percent: 50,
            starts_at: NOW - ONE_HOUR,
            ends_at: NOW + ONE_DAY,
            max_redemptions,
            min_spend_cents: None,
            status: DealStatus::Live,
        },
    )
}

pub fn create_test_deal_with(conn: &Connection, venue_id: &str, input: CreateDeal) -> Deal {
    queries::create_deal(conn, venue_id, &input).expect("Failed to create test deal")
}

/// Insert an ISSUED voucher directly, bypassing claim rules.
pub fn create_test_voucher(conn: &Connection, deal_id: &str, user_id: &str, expires_at: i64) -> Voucher {
    let voucher = Voucher {
        id: happyhour::id::EntityType::Voucher.gen_id(),
        code: generate_voucher_code(),
        deal_id: deal_id.to_string(),
        user_id: user_id.to_string(),
        status: VoucherStatus::Issued,
        issued_at: NOW - ONE_HOUR,
        expires_at,
        redeemed_at: None,
    };
    queries::insert_voucher(conn, &voucher).expect("Failed to create test voucher");
    voucher
}

/// Everything a redemption needs: merchant, venue, deal with the given cap,
/// and one user. Returns (deal, user).
pub fn setup_deal(conn: &Connection, max_redemptions: Option<i32>) -> (Deal, User) {
    let merchant = create_test_merchant(conn, "Test Merchant", None);
    let venue = create_test_venue(conn, &merchant.id);
    let deal = create_test_deal(conn, &venue.id, max_redemptions);
    let user = create_test_user(conn, &format!("{}@example.com", deal.id));
    (deal, user)
}

/// A deal plus one redeemable voucher expiring in an hour.
pub fn setup_redeemable_voucher(conn: &Connection, max_redemptions: Option<i32>) -> (Deal, Voucher) {
    let (deal, user) = setup_deal(conn, max_redemptions);
    let voucher = create_test_voucher(conn, &deal.id, &user.id, NOW + ONE_HOUR);
    (deal, voucher)
}

// ============ HTTP helpers ============

pub fn webhook_app(state: AppState) -> Router {
    handlers::webhooks::router().with_state(state)
}

pub fn voucher_app(state: AppState) -> Router {
    handlers::vouchers::router().with_state(state)
}

pub fn compute_stripe_signature(payload: &[u8], secret: &str, timestamp: i64) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(signed_payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub fn stripe_signature_header(payload: &[u8], secret: &str, timestamp: i64) -> String {
    format!(
        "t={},v1={}",
        timestamp,
        compute_stripe_signature(payload, secret, timestamp)
    )
}

/// A webhook request signed with the test secret at `NOW`.
pub fn signed_webhook_request(payload: &[u8]) -> Request<Body> {
    let header = stripe_signature_header(payload, TEST_WEBHOOK_SECRET, NOW);
    webhook_request(payload, Some(&header))
}

pub fn webhook_request(payload: &[u8], signature: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhooks/stripe")
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header("stripe-signature", signature);
    }
    builder.body(Body::from(payload.to_vec())).unwrap()
}

/// Envelope for a Stripe event with the given id, type and object.
pub fn stripe_event(id: &str, event_type: &str, object: Value) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "id": id,
        "object": "event",
        "type": event_type,
        "created": NOW,
        "data": { "object": object }
    }))
    .unwrap()
}

pub fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");
    serde_json::from_slice(&bytes).expect("Response body should be JSON")
}
