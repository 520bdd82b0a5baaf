use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use std::sync::Arc;

use happyhour::clock::{Clock, SystemClock};
use happyhour::config::Config;
use happyhour::db::{AppState, create_pool, init_db, queries};
use happyhour::handlers;
use happyhour::jobs::spawn_expiry_sweep;
use happyhour::models::{CreateDeal, CreateMerchant, CreateUser, CreateVenue, DealStatus};
use happyhour::payments::{BillingProvider, StripeClient, StripeConfig};

#[derive(Parser, Debug)]
#[command(name = "happyhour")]
#[command(about = "Billing reconciliation and voucher redemption for Happy Hour")]
struct Cli {
    /// Seed the database with dev data (merchant, venue, user, live deal)
    #[arg(long)]
    seed: bool,

    /// Delete the database on exit (dev mode only)
    #[arg(long)]
    ephemeral: bool,
}

/// Seeds the database with a merchant, venue, user and a live deal.
/// Only runs in dev mode.
fn seed_dev_data(state: &AppState) {
    let conn = state.db.get().expect("Failed to get db connection for seeding");
    let now = state.clock.now();

    tracing::info!("============================================");
    tracing::info!("SEEDING DEV DATA");
    tracing::info!("============================================");

    let user = match queries::create_user(
        &conn,
        &CreateUser {
            name: "Dev Diner".to_string(),
            email: "diner@happyhour.local".to_string(),
        },
    ) {
        Ok(user) => user,
        Err(e) => {
            tracing::info!("Skipping seed, database already has dev data: {}", e);
            return;
        }
    };
    tracing::info!("User: {} (id: {})", user.email, user.id);

    let merchant = queries::create_merchant(
        &conn,
        &CreateMerchant {
            name: "Dev Taqueria".to_string(),
            billing_customer_id: None,
        },
    )
    .expect("Failed to create dev merchant");
    tracing::info!("Merchant: {} (id: {})", merchant.name, merchant.id);

    let venue = queries::create_venue(
        &conn,
        &merchant.id,
        &CreateVenue {
            name: "Dev Taqueria Downtown".to_string(),
            address: Some("1 Main St".to_string()),
        },
    )
    .expect("Failed to create dev venue");
    tracing::info!("Venue: {} (id: {})", venue.name, venue.id);

    let deal = queries::create_deal(
        &conn,
        &venue.id,
        &CreateDeal {
            title: "Half-price tacos".to_string(),
            discount_percent: 50,
            starts_at: now,
            ends_at: now + 7 * 86400,
            max_redemptions: Some(100),
            min_spend_cents: None,
            status: DealStatus::Live,
        },
    )
    .expect("Failed to create dev deal");
    tracing::info!("Deal: {} (id: {})", deal.title, deal.id);
    tracing::info!("");
    tracing::info!("Claim a voucher:");
    tracing::info!(
        "  curl -X POST localhost:3000/deals/{}/claim -H 'content-type: application/json' -d '{{\"user_id\":\"{}\"}}'",
        deal.id,
        user.id
    );
    tracing::info!("============================================");
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "happyhour=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let mut conn = db_pool.get().expect("Failed to get connection");
        init_db(&mut conn).expect("Failed to initialize database");
    }

    let billing = StripeConfig::from_config(&config)
        .map(|stripe| {
            StripeClient::new(stripe).map(|client| Arc::new(client) as Arc<dyn BillingProvider>)
        })
        .transpose()
        .expect("Failed to create Stripe client");

    let state = AppState {
        db: db_pool,
        billing,
        plan_prices: config.plan_prices.clone(),
        voucher_ttl_secs: config.voucher_ttl_secs,
        clock: Arc::new(SystemClock),
    };

    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set HAPPYHOUR_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    spawn_expiry_sweep(state.clone(), config.expiry_sweep_interval);

    let app = Router::new()
        .merge(handlers::health::router())
        .merge(handlers::webhooks::router())
        .merge(handlers::vouchers::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    let cleanup_on_exit = cli.ephemeral && config.dev_mode;
    if cleanup_on_exit {
        tracing::info!("EPHEMERAL MODE: database will be deleted on exit");
    }

    tracing::info!("Happy Hour server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to start server");

    if cleanup_on_exit {
        let db_path = &config.database_path;
        if let Err(e) = std::fs::remove_file(db_path) {
            tracing::warn!("Failed to remove {}: {}", db_path, e);
        } else {
            tracing::info!("Removed {}", db_path);
        }
        let _ = std::fs::remove_file(format!("{}-wal", db_path));
        let _ = std::fs::remove_file(format!("{}-shm", db_path));
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
