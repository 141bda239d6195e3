//! Tests for the Engine module

use super::*;
use crate::io::events::create_event_channel;
use chrono::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

/// Test harness that keeps the event receiver and trade-log dir alive
struct TestEngine {
    engine: Engine,
    event_rx: mpsc::Receiver<crate::io::events::EngineEvent>,
    #[allow(dead_code)]
    dir: TempDir,
}

impl std::ops::Deref for TestEngine {
    type Target = Engine;
    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

fn create_test_engine() -> TestEngine {
    let dir = TempDir::new().unwrap();
    let trade_log = dir.path().join("trades.jsonl");
    let config = Config::default().with_trade_log_file(trade_log.to_str().unwrap());
    let (events, event_rx) = create_event_channel(64, "test".to_string());
    let engine = Engine::new(config, Arc::new(Metrics::new()), Some(events));
    TestEngine { engine, event_rx, dir }
}

fn drain_events(rx: &mut mpsc::Receiver<crate::io::events::EngineEvent>) -> Vec<crate::io::events::EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

const SHARE_PRICE: Cents = 13_000_000;

fn setup_yacht(engine: &Engine, now: DateTime<Utc>) -> YachtId {
    let yacht_id = YachtId::new();
    engine
        .create_yacht_shares(yacht_id, "Nimbus 465", "Dubai Marina", 12, 5, SHARE_PRICE, now)
        .unwrap();
    yacht_id
}

fn assert_share_conservation(engine: &Engine, yacht_id: YachtId) {
    let (issued, total) = engine.ledger.audit_share_count(yacht_id).unwrap();
    assert_eq!(issued, total, "share conservation violated");
}

#[test]
fn test_primary_purchase_seeds_entitlements() {
    let mut t = create_test_engine();
    let now = Utc::now();
    let yacht_id = setup_yacht(&t, now);
    let buyer = UserId::new();

    let record = t.purchase_shares(yacht_id, buyer, 1, SHARE_PRICE, now).unwrap();
    assert_eq!(record.shares_owned, 1);
    assert_eq!(t.yacht(yacht_id).unwrap().available_shares, 4);

    // Freshly seeded, non-negative allocation: 73 days / 50 hours for 1/5
    let allocation = t.allocation(record.id).unwrap();
    assert_eq!(allocation.days_remaining, 73);
    assert!((allocation.engine_hours_remaining - 50.0).abs() < 1e-9);

    // Wallet opened, fraction derived in lowest terms
    assert!(t.fuel_wallet(buyer).is_some());
    assert_eq!(t.owner_fraction(yacht_id, buyer).unwrap(), "1/5");
    assert_share_conservation(&t, yacht_id);

    let events = drain_events(&mut t.event_rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, crate::io::events::EngineEvent::SharesPurchased(_))));
}

#[test]
fn test_purchase_over_available_rejected() {
    let t = create_test_engine();
    let now = Utc::now();
    let yacht_id = setup_yacht(&t, now);

    let err = t.purchase_shares(yacht_id, UserId::new(), 6, SHARE_PRICE, now).unwrap_err();
    assert!(matches!(err, EngineError::InsufficientShares { .. }));
    assert_eq!(t.yacht(yacht_id).unwrap().available_shares, 5);
    assert_share_conservation(&t, yacht_id);
}

#[test]
fn test_rofr_exercise_transfers_the_block() {
    let mut t = create_test_engine();
    let now = Utc::now();
    let yacht_id = setup_yacht(&t, now);
    let a = UserId::new();
    let b = UserId::new();
    let a_record = t.purchase_shares(yacht_id, a, 1, SHARE_PRICE, now).unwrap();
    t.purchase_shares(yacht_id, b, 1, SHARE_PRICE, now).unwrap();

    let listing = t.create_listing(a_record.id, 1, 14_500_000, now).unwrap();
    t.publish_listing(listing.id, now).unwrap();

    let day10 = now + Duration::days(10);
    let sold = t.exercise_right(listing.id, b, day10).unwrap();
    assert_eq!(sold.state, crate::domain::listing::ListingState::RofrSold);

    // A is fully divested, B holds the block
    assert_eq!(t.ownership_record(a_record.id).unwrap().shares_owned, 0);
    let b_record = t.record_for_owner(yacht_id, b).unwrap();
    assert_eq!(b_record.shares_owned, 2);
    assert_share_conservation(&t, yacht_id);

    // Seller's allocation is gone, buyer's grant is pro-rated
    assert!(t.allocation(a_record.id).is_none());
    let b_allocation = t.allocation(b_record.id).unwrap();
    assert!(b_allocation.days_remaining > 73);
    assert!(b_allocation.days_remaining < 146);

    let events = drain_events(&mut t.event_rx);
    assert!(events.iter().any(|e| matches!(
        e,
        crate::io::events::EngineEvent::ListingSold(p) if p.channel == SaleChannel::Rofr
    )));
}

#[test]
fn test_exercise_at_window_close_rejected() {
    let t = create_test_engine();
    let now = Utc::now();
    let yacht_id = setup_yacht(&t, now);
    let a = UserId::new();
    let b = UserId::new();
    let a_record = t.purchase_shares(yacht_id, a, 1, SHARE_PRICE, now).unwrap();
    t.purchase_shares(yacht_id, b, 1, SHARE_PRICE, now).unwrap();

    let listing = t.create_listing(a_record.id, 1, 14_500_000, now).unwrap();
    t.publish_listing(listing.id, now).unwrap();

    // Half-open window: day 30 on the dot is out
    let err = t.exercise_right(listing.id, b, now + Duration::days(30)).unwrap_err();
    assert!(matches!(err, EngineError::ListingNoLongerAvailable { .. }));
    assert_eq!(t.ownership_record(a_record.id).unwrap().shares_owned, 1);
}

#[test]
fn test_expired_listing_sells_publicly() {
    let mut t = create_test_engine();
    let now = Utc::now();
    let yacht_id = setup_yacht(&t, now);
    let a = UserId::new();
    let b = UserId::new();
    let a_record = t.purchase_shares(yacht_id, a, 1, SHARE_PRICE, now).unwrap();
    t.purchase_shares(yacht_id, b, 1, SHARE_PRICE, now).unwrap();

    let listing = t.create_listing(a_record.id, 1, 14_500_000, now).unwrap();
    t.publish_listing(listing.id, now).unwrap();

    // Nobody acts for 31 days; the scheduler sweep expires the window
    let day31 = now + Duration::days(31);
    let (open, transitioned) = t.expire_if_due(listing.id, day31).unwrap();
    assert!(transitioned);
    assert_eq!(open.state, crate::domain::listing::ListingState::PublicOpen);

    // Idempotent: a second sweep changes nothing
    let (_, transitioned) = t.expire_if_due(listing.id, day31).unwrap();
    assert!(!transitioned);

    // An outside buyer purchases the whole listing
    let c = UserId::new();
    let sold = t.purchase_listing(listing.id, c, 1, day31).unwrap();
    assert_eq!(sold.state, crate::domain::listing::ListingState::Sold);
    assert_eq!(t.record_for_owner(yacht_id, c).unwrap().shares_owned, 1);
    assert_share_conservation(&t, yacht_id);

    let events = drain_events(&mut t.event_rx);
    let published = events
        .iter()
        .filter(|e| matches!(e, crate::io::events::EngineEvent::ListingPublished(_)))
        .count();
    assert_eq!(published, 1, "idempotent expiry must emit one event");
    assert!(events.iter().any(|e| matches!(
        e,
        crate::io::events::EngineEvent::ListingSold(p) if p.channel == SaleChannel::Public
    )));
}

#[test]
fn test_concurrent_exercise_single_winner() {
    let now = Utc::now();
    let dir = TempDir::new().unwrap();
    let config =
        Config::default().with_trade_log_file(dir.path().join("trades.jsonl").to_str().unwrap());
    let metrics = Arc::new(Metrics::new());
    let engine = Arc::new(Engine::new(config, metrics.clone(), None));

    let yacht_id = setup_yacht(&engine, now);
    let a = UserId::new();
    let b = UserId::new();
    let c = UserId::new();
    let a_record = engine.purchase_shares(yacht_id, a, 1, SHARE_PRICE, now).unwrap();
    engine.purchase_shares(yacht_id, b, 1, SHARE_PRICE, now).unwrap();
    engine.purchase_shares(yacht_id, c, 1, SHARE_PRICE, now).unwrap();

    let listing = engine.create_listing(a_record.id, 1, 14_500_000, now).unwrap();
    engine.publish_listing(listing.id, now).unwrap();

    // B and C race for the same listing in the same instant
    let day1 = now + Duration::days(1);
    let handles: Vec<_> = [b, c]
        .into_iter()
        .map(|buyer| {
            let engine = engine.clone();
            std::thread::spawn(move || engine.exercise_right(listing.id, buyer, day1))
        })
        .collect();

    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let wins = outcomes.iter().filter(|r| r.is_ok()).count();
    let conflicts = outcomes
        .iter()
        .filter(|r| {
            matches!(r, Err(EngineError::ListingNoLongerAvailable { .. }))
        })
        .count();

    assert_eq!(wins, 1);
    assert_eq!(conflicts, 1);
    assert_eq!(metrics.conflicts_total(), 1);
    assert_share_conservation(&engine, yacht_id);
}

#[test]
fn test_over_consumption_rejected_unchanged() {
    let t = create_test_engine();
    let now = Utc::now();
    let yacht_id = setup_yacht(&t, now);
    let owner = UserId::new();
    let record = t.purchase_shares(yacht_id, owner, 1, SHARE_PRICE, now).unwrap();
    t.top_up_fuel(owner, 100_000).unwrap();

    let err = t.consume_usage(record.id, 80, 2.0, now).unwrap_err();
    assert!(matches!(err, EngineError::InsufficientAllocation { .. }));
    assert_eq!(t.allocation(record.id).unwrap().days_remaining, 73);
    assert_eq!(t.fuel_wallet(owner).unwrap().balance_cents, 100_000);
}

#[test]
fn test_consumption_charges_fuel() {
    let t = create_test_engine();
    let now = Utc::now();
    let yacht_id = setup_yacht(&t, now);
    let owner = UserId::new();
    let record = t.purchase_shares(yacht_id, owner, 1, SHARE_PRICE, now).unwrap();
    t.top_up_fuel(owner, 100_000).unwrap();

    let allocation = t.consume_usage(record.id, 3, 4.0, now).unwrap();
    assert_eq!(allocation.days_remaining, 70);
    assert!((allocation.engine_hours_remaining - 46.0).abs() < 1e-9);
    // 4 engine hours at the default 4500c/h
    assert_eq!(t.fuel_wallet(owner).unwrap().balance_cents, 82_000);
}

#[test]
fn test_auto_topup_covers_an_empty_wallet() {
    let t = create_test_engine();
    let now = Utc::now();
    let yacht_id = setup_yacht(&t, now);
    let owner = UserId::new();
    let record = t.purchase_shares(yacht_id, owner, 1, SHARE_PRICE, now).unwrap();
    t.set_fuel_auto_topup(owner, true).unwrap();

    // Empty wallet, but auto-top-up covers the 2h charge (9000c)
    let allocation = t.consume_usage(record.id, 1, 2.0, now).unwrap();
    assert_eq!(allocation.days_remaining, 72);

    let wallet = t.fuel_wallet(owner).unwrap();
    assert_eq!(wallet.balance_cents, 41_000); // 50000 - 9000
    assert_eq!(wallet.total_purchased_cents, 50_000);
}

#[test]
fn test_underfunded_wallet_blocks_booking() {
    let t = create_test_engine();
    let now = Utc::now();
    let yacht_id = setup_yacht(&t, now);
    let owner = UserId::new();
    let record = t.purchase_shares(yacht_id, owner, 1, SHARE_PRICE, now).unwrap();

    // Wallet opened at zero balance; the fuel gate rejects the booking
    // before any entitlement is touched
    let err = t.consume_usage(record.id, 2, 3.0, now).unwrap_err();
    assert!(matches!(err, EngineError::InsufficientFuel { .. }));
    assert_eq!(t.allocation(record.id).unwrap().days_remaining, 73);
}

#[test]
fn test_annual_reset_via_engine() {
    let t = create_test_engine();
    let now = Utc::now();
    let yacht_id = setup_yacht(&t, now);
    let owner = UserId::new();
    let record = t.purchase_shares(yacht_id, owner, 1, SHARE_PRICE, now).unwrap();
    t.top_up_fuel(owner, 100_000).unwrap();
    t.consume_usage(record.id, 10, 5.0, now).unwrap();

    let (_, applied) = t.reset_annual_allocation(record.id, now + Duration::days(100)).unwrap();
    assert!(!applied);

    let (allocation, applied) =
        t.reset_annual_allocation(record.id, now + Duration::days(366)).unwrap();
    assert!(applied);
    assert_eq!(allocation.days_remaining, 73);

    let (_, applied) = t.reset_annual_allocation(record.id, now + Duration::days(366)).unwrap();
    assert!(!applied, "reset must be idempotent within a cycle");
}

#[test]
fn test_cancel_releases_reservation() {
    let t = create_test_engine();
    let now = Utc::now();
    let yacht_id = setup_yacht(&t, now);
    let a = UserId::new();
    let b = UserId::new();
    let a_record = t.purchase_shares(yacht_id, a, 2, SHARE_PRICE, now).unwrap();
    t.purchase_shares(yacht_id, b, 1, SHARE_PRICE, now).unwrap();

    let listing = t.create_listing(a_record.id, 2, 14_500_000, now).unwrap();
    t.publish_listing(listing.id, now).unwrap();

    // While listed, the shares cannot move elsewhere
    let err = t.ledger.transfer_shares(a_record.id, b, 1, SHARE_PRICE, now).unwrap_err();
    assert!(matches!(err, EngineError::OverTransfer { .. }));

    t.cancel_listing(listing.id, now).unwrap();
    assert_eq!(t.ownership_record(a_record.id).unwrap().shares_reserved, 0);

    // Released shares transfer freely again
    t.ledger.transfer_shares(a_record.id, b, 1, SHARE_PRICE, now).unwrap();
    assert_share_conservation(&t, yacht_id);
}

#[test]
fn test_waitlist_offer_on_public_open() {
    let mut t = create_test_engine();
    let now = Utc::now();
    let yacht_id = setup_yacht(&t, now);
    let a = UserId::new();
    let b = UserId::new();
    let a_record = t.purchase_shares(yacht_id, a, 1, SHARE_PRICE, now).unwrap();
    t.purchase_shares(yacht_id, b, 1, SHARE_PRICE, now).unwrap();

    // Two prospects queue: a returning guest should be served first
    let first = UserId::new();
    let returning = UserId::new();
    t.join_waitlist(yacht_id, first, 1, SHARE_PRICE, false, now).unwrap();
    t.join_waitlist(yacht_id, returning, 1, SHARE_PRICE, true, now + Duration::hours(1))
        .unwrap();

    let err = t.join_waitlist(yacht_id, first, 1, SHARE_PRICE, false, now).unwrap_err();
    assert!(matches!(err, EngineError::DuplicateEntry { .. }));

    let listing = t.create_listing(a_record.id, 1, 14_500_000, now).unwrap();
    t.publish_listing(listing.id, now).unwrap();
    t.expire_if_due(listing.id, now + Duration::days(31)).unwrap();

    let offer = t.waitlist.offer(listing.id).unwrap();
    assert_eq!(offer.user_id, returning);

    // Decline advances to the remaining entry
    let next = t.decline_waitlist_offer(listing.id, now + Duration::days(32)).unwrap();
    assert_eq!(next.user_id, first);

    // The offered buyer completes the purchase; the offer is consumed
    t.purchase_listing(listing.id, first, 1, now + Duration::days(32)).unwrap();
    assert!(t.waitlist.offer(listing.id).is_none());

    let events = drain_events(&mut t.event_rx);
    let offers = events
        .iter()
        .filter(|e| matches!(e, crate::io::events::EngineEvent::WaitlistOffer(_)))
        .count();
    assert_eq!(offers, 2);
}

#[test]
fn test_tick_runs_all_sweeps() {
    let t = create_test_engine();
    let now = Utc::now();
    let yacht_id = setup_yacht(&t, now);
    let a = UserId::new();
    let b = UserId::new();
    let a_record = t.purchase_shares(yacht_id, a, 1, SHARE_PRICE, now).unwrap();
    t.purchase_shares(yacht_id, b, 1, SHARE_PRICE, now).unwrap();

    t.join_waitlist(yacht_id, UserId::new(), 1, SHARE_PRICE, false, now).unwrap();

    let listing = t.create_listing(a_record.id, 1, 14_500_000, now).unwrap();
    t.publish_listing(listing.id, now).unwrap();

    // One tick past the window: listing expires and the head is offered
    let day31 = now + Duration::days(31);
    t.tick(day31);
    assert_eq!(
        t.listing(listing.id).unwrap().state,
        crate::domain::listing::ListingState::PublicOpen
    );
    assert!(t.waitlist.offer(listing.id).is_some());

    // Two days later the offer timed out (48h window) and the queue is
    // empty, so it lapses entirely
    t.tick(day31 + Duration::days(3));
    assert!(t.waitlist.offer(listing.id).is_none());

    // Redundant ticks are safe
    t.tick(day31 + Duration::days(3));
}

#[test]
fn test_partial_public_purchase_keeps_listing_open() {
    let t = create_test_engine();
    let now = Utc::now();
    let yacht_id = setup_yacht(&t, now);
    let a = UserId::new();
    let a_record = t.purchase_shares(yacht_id, a, 3, SHARE_PRICE, now).unwrap();

    let listing = t.create_listing(a_record.id, 2, 14_000_000, now).unwrap();
    t.publish_listing(listing.id, now).unwrap();
    t.expire_if_due(listing.id, now + Duration::days(30)).unwrap();

    let buyer = UserId::new();
    let day31 = now + Duration::days(31);
    let open = t.purchase_listing(listing.id, buyer, 1, day31).unwrap();
    assert_eq!(open.state, crate::domain::listing::ListingState::PublicOpen);
    assert_eq!(open.shares_for_sale, 1);
    assert_eq!(t.ownership_record(a_record.id).unwrap().shares_reserved, 1);
    assert_share_conservation(&t, yacht_id);
}
