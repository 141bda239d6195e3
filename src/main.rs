//! Ownership engine - fractional yacht share trading and usage allocation
//!
//! Runs the engine with a scripted end-to-end scenario: primary share
//! sales, a listing through its ROFR window, a public settlement via the
//! waitlist, usage consumption against fuel credits, and the annual
//! allocation reset.
//!
//! Module structure:
//! - `domain/` - Core business types (Yacht, OwnershipRecord, ShareListing)
//! - `services/` - Business logic (Engine, ShareLedger, RofrManager, ...)
//! - `io/` - External interfaces (notification events, trade log)
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use clap::Parser;
use ownership_engine::domain::types::{UserId, YachtId};
use ownership_engine::infra::{Config, Metrics};
use ownership_engine::io::{create_event_channel, EngineEvent};
use ownership_engine::services::Engine;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Ownership engine - share trading and booking allocation
#[derive(Parser, Debug)]
#[command(name = "ownership-engine", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config/dev.toml")]
    config: String,
}

fn to_json<T: Serialize>(payload: &T) -> String {
    serde_json::to_string(payload).unwrap_or_default()
}

/// Notification collaborator stub: logs every event it would deliver
fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::SharesPurchased(p) => info!(payload = %to_json(p), "notify_shares_purchased"),
        EngineEvent::ListingOpenedForRofr(p) => {
            info!(payload = %to_json(p), "notify_listing_opened_for_rofr")
        }
        EngineEvent::ListingPublished(p) => info!(payload = %to_json(p), "notify_listing_published"),
        EngineEvent::ListingSold(p) => info!(payload = %to_json(p), "notify_listing_sold"),
        EngineEvent::ListingCancelled(p) => info!(payload = %to_json(p), "notify_listing_cancelled"),
        EngineEvent::WaitlistOffer(p) => info!(payload = %to_json(p), "notify_waitlist_offer"),
        EngineEvent::UsageConsumed(p) => info!(payload = %to_json(p), "notify_usage_consumed"),
        EngineEvent::AllocationReset(p) => info!(payload = %to_json(p), "notify_allocation_reset"),
        EngineEvent::FuelLowBalance(p) => info!(payload = %to_json(p), "notify_fuel_low_balance"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for full event visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = %env!("CARGO_PKG_VERSION"), "ownership-engine starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    info!(
        config_file = %config.config_file(),
        site_id = %config.site_id(),
        default_total_shares = %config.default_total_shares(),
        utilization_factor = %config.utilization_factor(),
        annual_engine_hours = %config.annual_engine_hours(),
        rofr_window_days = %config.rofr_window_days(),
        waitlist_ttl_days = %config.waitlist_ttl_days(),
        trade_log_file = %config.trade_log_file(),
        "config_loaded"
    );

    // Notification event channel (bounded, drop-on-full)
    let (event_sender, mut event_rx) = create_event_channel(1024, config.site_id().to_string());
    let consumer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            log_event(&event);
        }
    });

    let metrics = Arc::new(Metrics::new());
    let engine = Arc::new(Engine::new(config.clone(), metrics.clone(), Some(event_sender)));

    // Periodic metrics reporter
    let reporter_metrics = metrics.clone();
    let reporter_engine = engine.clone();
    let interval_secs = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        loop {
            interval.tick().await;
            reporter_metrics
                .report(reporter_engine.yacht_count(), reporter_engine.open_listing_count())
                .log();
        }
    });

    let started_at = Utc::now();
    run_scenario(&engine, &config, started_at)?;

    // Let the consumer drain before the final snapshot
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    metrics.report(engine.yacht_count(), engine.open_listing_count()).log();

    drop(engine);
    consumer.abort();
    info!("ownership-engine shutdown complete");
    Ok(())
}

/// Drive the engine through one compressed ownership lifecycle.
///
/// Timestamps are supplied explicitly, so a month of market activity
/// runs in one process without waiting on wall-clock time.
fn run_scenario(engine: &Engine, config: &Config, t0: DateTime<Utc>) -> anyhow::Result<()> {
    let day = |n: i64| t0 + Duration::days(n);

    // A five-share yacht goes on sale
    let yacht_id = YachtId::new();
    engine.create_yacht_shares(
        yacht_id,
        "Azur 44",
        "Port de Sóller",
        10,
        config.default_total_shares(),
        13_000_000,
        t0,
    )?;

    let anna = UserId::new();
    let bruno = UserId::new();
    let clara = UserId::new();
    let diego = UserId::new();

    // Primary sales: Anna takes one share, Bruno two
    let anna_record = engine.purchase_shares(yacht_id, anna, 1, 13_000_000, t0)?;
    engine.purchase_shares(yacht_id, bruno, 2, 13_000_000, day(1))?;
    info!(
        anna = %engine.owner_fraction(yacht_id, anna).unwrap_or_default(),
        bruno = %engine.owner_fraction(yacht_id, bruno).unwrap_or_default(),
        "primary_sales_settled"
    );

    // Anna funds her fuel wallet and spends a weekend aboard
    engine.top_up_fuel(anna, 60_000)?;
    engine.consume_usage(anna_record.id, 2, 3.5, day(3))?;

    // Anna lists her share; Bruno pre-empts it inside the ROFR window
    let first_listing = engine.create_listing(anna_record.id, 1, 14_500_000, day(5))?;
    engine.publish_listing(first_listing.id, day(5))?;
    engine.exercise_right(first_listing.id, bruno, day(15))?;

    // Clara tries the same listing a moment later and loses the race
    if let Err(e) = engine.exercise_right(first_listing.id, clara, day(15)) {
        warn!(error = %e, "exercise_after_settlement_rejected");
    }

    // Bruno skips manual funding; auto-top-up covers his first trip
    let bruno_record = engine
        .record_for_owner(yacht_id, bruno)
        .context("ownership record missing after settlement")?;
    engine.set_fuel_auto_topup(bruno, true)?;
    engine.consume_usage(bruno_record.id, 3, 6.0, day(18))?;

    // Bruno relists one of his three shares; Diego queues on the waitlist
    let second_listing = engine.create_listing(bruno_record.id, 1, 15_000_000, day(20))?;
    engine.publish_listing(second_listing.id, day(20))?;
    engine.join_waitlist(yacht_id, diego, 1, 15_000_000, true, day(22))?;

    // No co-owner acts; the scheduler sweep expires the window on day 51
    // and the waitlist head receives the offer
    engine.tick(day(51));

    // Diego completes the purchase from the public listing
    engine.purchase_listing(second_listing.id, diego, 1, day(52))?;
    info!(
        bruno = %engine.owner_fraction(yacht_id, bruno).unwrap_or_default(),
        diego = %engine.owner_fraction(yacht_id, diego).unwrap_or_default(),
        "marketplace_settled"
    );

    // A year later the scheduler restores Bruno's entitlements
    let (allocation, applied) =
        engine.reset_annual_allocation(bruno_record.id, day(367))?;
    info!(
        applied = %applied,
        days_remaining = %allocation.days_remaining,
        engine_hours_remaining = %allocation.engine_hours_remaining,
        "annual_reset"
    );

    Ok(())
}
