//! Engine - operation orchestration across the ownership services
//!
//! The Engine is the composition root the transport adapters call:
//! - Share ledger (yacht partitions, ownership records, transfers)
//! - ROFR manager (listing lifecycle and window gating)
//! - Allocation tracker (usage days / engine hours)
//! - Waitlist (demand queueing and offers)
//! - Fuel wallets (prepaid fuel credits)
//!
//! Every operation takes `now` explicitly - time is compared at call
//! time, never held across calls - performs its service mutations in a
//! fixed order (listing lock before ledger lock), emits notification
//! events fire-and-forget, and records metrics. Services use interior
//! locks, so the engine is `Arc`-shareable across request tasks.

#[cfg(test)]
mod tests;

use crate::domain::error::{EngineError, EngineResult};
use crate::domain::listing::ShareListing;
use crate::domain::types::{
    Cents, ListingId, OwnershipRecord, RecordId, UserId, WaitlistEntry, Yacht, YachtId,
};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::events::{
    AllocationResetPayload, EventSender, FuelLowBalancePayload, ListingSoldPayload,
    ListingWindowPayload, SaleChannel, SharesPurchasedPayload, UsageConsumedPayload,
    WaitlistOfferPayload,
};
use crate::io::trade_log::{TradeLog, TradeRecord};
use crate::services::allocation::{AllocationTracker, UsageAllocation};
use crate::services::fuel_wallets::{FuelWallet, FuelWallets};
use crate::services::ledger::ShareLedger;
use crate::services::rofr::RofrManager;
use crate::services::waitlist::{Waitlist, WaitlistOffer};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Central orchestrator for all ownership operations
pub struct Engine {
    pub(crate) ledger: ShareLedger,
    pub(crate) rofr: RofrManager,
    pub(crate) allocation: AllocationTracker,
    pub(crate) waitlist: Waitlist,
    pub(crate) fuel: FuelWallets,
    trade_log: TradeLog,
    config: Config,
    metrics: Arc<Metrics>,
    events: Option<EventSender>,
}

impl Engine {
    /// Create a new Engine with the given configuration and dependencies
    pub fn new(config: Config, metrics: Arc<Metrics>, events: Option<EventSender>) -> Self {
        Self {
            ledger: ShareLedger::new(),
            rofr: RofrManager::new(config.rofr_window_days()),
            allocation: AllocationTracker::new(
                config.utilization_factor(),
                config.annual_engine_hours(),
            ),
            waitlist: Waitlist::new(
                config.waitlist_ttl_days(),
                config.waitlist_response_window_hours(),
            ),
            fuel: FuelWallets::new(
                config.fuel_low_balance_threshold_cents(),
                config.fuel_auto_topup_amount_cents(),
            ),
            trade_log: TradeLog::new(config.trade_log_file()),
            config,
            metrics,
            events,
        }
    }

    /// Record latency and classify the outcome of an operation
    fn observe<T>(&self, op: &'static str, started: Instant, result: &EngineResult<T>) {
        let latency_us = started.elapsed().as_micros() as u64;
        self.metrics.record_operation(latency_us);
        if let Err(e) = result {
            if e.is_conflict() {
                self.metrics.record_conflict();
            } else {
                self.metrics.record_rejection();
            }
            debug!(op = %op, error = %e, "operation_rejected");
        }
    }

    /// Issue the share partition for a yacht
    pub fn create_yacht_shares(
        &self,
        yacht_id: YachtId,
        name: &str,
        location: &str,
        capacity: u32,
        total_shares: u32,
        share_price_cents: Cents,
        now: DateTime<Utc>,
    ) -> EngineResult<Yacht> {
        let started = Instant::now();
        let result = self.ledger.create_yacht_shares(Yacht::new(
            yacht_id,
            name,
            location,
            capacity,
            total_shares,
            share_price_cents,
            now,
        ));
        self.observe("create_yacht_shares", started, &result);
        result
    }

    /// Purchase shares from the yacht's unsold pool.
    ///
    /// Settles the ledger mutation, seeds the buyer's usage allocation,
    /// opens their fuel wallet, consumes any waitlist entry they held
    /// for the yacht, and logs the trade.
    pub fn purchase_shares(
        &self,
        yacht_id: YachtId,
        buyer_id: UserId,
        count: u32,
        price_per_share_cents: Cents,
        now: DateTime<Utc>,
    ) -> EngineResult<OwnershipRecord> {
        let started = Instant::now();
        let result = (|| {
            let yacht =
                self.ledger.yacht(yacht_id).ok_or(EngineError::YachtNotFound(yacht_id))?;
            let (record, _created) =
                self.ledger.purchase_shares(yacht_id, buyer_id, count, price_per_share_cents, now)?;

            self.allocation.seed_purchase(&record, yacht.total_shares, count, now);
            self.fuel.open(buyer_id);
            self.waitlist.remove_entry(yacht_id, buyer_id);

            self.trade_log.append(&TradeRecord::new(
                yacht_id,
                None,
                None,
                buyer_id,
                count,
                price_per_share_cents,
                SaleChannel::Primary,
                now,
            ));
            if let Some(events) = &self.events {
                events.send_shares_purchased(SharesPurchasedPayload {
                    site: None,
                    ts: now,
                    yacht_id,
                    buyer_id,
                    record_id: record.id,
                    shares: count,
                    price_per_share_cents,
                });
            }
            self.metrics.record_purchase();
            Ok(record)
        })();
        self.observe("purchase_shares", started, &result);
        result
    }

    /// Draft a listing of `count` shares from an ownership record.
    ///
    /// Reserves the shares so they cannot be transferred elsewhere while
    /// the listing is open.
    pub fn create_listing(
        &self,
        seller_record_id: RecordId,
        count: u32,
        asking_price_cents: Cents,
        now: DateTime<Utc>,
    ) -> EngineResult<ShareListing> {
        let started = Instant::now();
        let result = (|| {
            let record = self.ledger.reserve_shares(seller_record_id, count)?;
            Ok(self.rofr.create_listing(
                record.yacht_id,
                record.owner_id,
                seller_record_id,
                count,
                asking_price_cents,
                now,
            ))
        })();
        self.observe("create_listing", started, &result);
        result
    }

    /// Publish a draft listing into its 30-day co-owner ROFR window
    pub fn publish_listing(
        &self,
        listing_id: ListingId,
        now: DateTime<Utc>,
    ) -> EngineResult<ShareListing> {
        let started = Instant::now();
        let result = (|| {
            let listing =
                self.rofr.listing(listing_id).ok_or(EngineError::ListingNotFound(listing_id))?;
            let co_owners = self.ledger.co_owners(listing.yacht_id, listing.seller_id);
            let published = self.rofr.publish_listing(listing_id, co_owners, now)?;

            if let Some(events) = &self.events {
                events.send_listing_opened_for_rofr(ListingWindowPayload {
                    site: None,
                    ts: now,
                    listing_id,
                    yacht_id: published.yacht_id,
                    shares: published.shares_for_sale,
                    asking_price_cents: published.asking_price_cents,
                    closes_at: published.closes_at,
                });
            }
            self.metrics.record_listing_published();
            Ok(published)
        })();
        self.observe("publish_listing", started, &result);
        result
    }

    /// A co-owner exercises their right of first refusal.
    ///
    /// First committed exercise wins; the loser of a race receives
    /// `ListingNoLongerAvailable`.
    pub fn exercise_right(
        &self,
        listing_id: ListingId,
        buyer_id: UserId,
        now: DateTime<Utc>,
    ) -> EngineResult<ShareListing> {
        let started = Instant::now();
        let result = (|| {
            let total_shares = self.total_shares_for_listing(listing_id)?;
            let (listing, (from, to)) =
                self.rofr.exercise_right(listing_id, buyer_id, now, |l| {
                    self.ledger.transfer_reserved(
                        l.seller_record_id,
                        buyer_id,
                        l.shares_for_sale,
                        l.asking_price_cents,
                        now,
                    )
                })?;

            self.settle_transfer(
                &listing,
                &from,
                &to,
                listing.shares_for_sale,
                total_shares,
                SaleChannel::Rofr,
                now,
            );
            self.metrics.record_rofr_exercised();
            Ok(listing)
        })();
        self.observe("exercise_right", started, &result);
        result
    }

    /// Resolve the share partition size behind a listing before mutating
    fn total_shares_for_listing(&self, listing_id: ListingId) -> EngineResult<u32> {
        let listing =
            self.rofr.listing(listing_id).ok_or(EngineError::ListingNotFound(listing_id))?;
        let yacht = self
            .ledger
            .yacht(listing.yacht_id)
            .ok_or(EngineError::YachtNotFound(listing.yacht_id))?;
        Ok(yacht.total_shares)
    }

    /// Scheduler entry point: expire a lapsed ROFR window to the public
    /// market and offer the listing to the waitlist head. Idempotent.
    pub fn expire_if_due(
        &self,
        listing_id: ListingId,
        now: DateTime<Utc>,
    ) -> EngineResult<(ShareListing, bool)> {
        let started = Instant::now();
        let result = (|| {
            let (listing, transitioned) = self.rofr.expire_if_due(listing_id, now)?;
            if transitioned {
                self.metrics.record_rofr_expired();
                if let Some(events) = &self.events {
                    events.send_listing_published(ListingWindowPayload {
                        site: None,
                        ts: now,
                        listing_id,
                        yacht_id: listing.yacht_id,
                        shares: listing.shares_for_sale,
                        asking_price_cents: listing.asking_price_cents,
                        closes_at: None,
                    });
                }
                self.offer_to_waitlist(listing_id, listing.yacht_id, now);
            }
            Ok((listing, transitioned))
        })();
        self.observe("expire_if_due", started, &result);
        result
    }

    /// Purchase shares from a public listing; any verified user may buy
    pub fn purchase_listing(
        &self,
        listing_id: ListingId,
        buyer_id: UserId,
        count: u32,
        now: DateTime<Utc>,
    ) -> EngineResult<ShareListing> {
        let started = Instant::now();
        let result = (|| {
            let total_shares = self.total_shares_for_listing(listing_id)?;
            let (listing, (from, to)) =
                self.rofr.purchase_listing(listing_id, buyer_id, count, now, |l| {
                    self.ledger.transfer_reserved(
                        l.seller_record_id,
                        buyer_id,
                        count,
                        l.asking_price_cents,
                        now,
                    )
                })?;

            self.settle_transfer(&listing, &from, &to, count, total_shares, SaleChannel::Public, now);
            self.metrics.record_public_sale();
            Ok(listing)
        })();
        self.observe("purchase_listing", started, &result);
        result
    }

    /// Shared settlement tail for ROFR and public sales
    #[allow(clippy::too_many_arguments)]
    fn settle_transfer(
        &self,
        listing: &ShareListing,
        from: &OwnershipRecord,
        to: &OwnershipRecord,
        count: u32,
        total_shares: u32,
        channel: SaleChannel,
        now: DateTime<Utc>,
    ) {
        // Buyer inherits the seller's cycle anchor and a pro-rated
        // entitlement for the rest of it
        let anchor = self.allocation.cycle_start(from.id).unwrap_or(now);
        self.allocation.grant_transfer(to, total_shares, count, anchor, now);
        if from.shares_owned == 0 {
            self.allocation.clear(from.id);
        }

        self.fuel.open(to.owner_id);
        self.waitlist.mark_fulfilled(listing.id);
        self.waitlist.remove_entry(listing.yacht_id, to.owner_id);

        self.trade_log.append(&TradeRecord::new(
            listing.yacht_id,
            Some(listing.id),
            Some(from.owner_id),
            to.owner_id,
            count,
            listing.asking_price_cents,
            channel,
            now,
        ));
        if let Some(events) = &self.events {
            events.send_listing_sold(ListingSoldPayload {
                site: None,
                ts: now,
                listing_id: listing.id,
                yacht_id: listing.yacht_id,
                seller_id: from.owner_id,
                buyer_id: to.owner_id,
                shares: count,
                price_per_share_cents: listing.asking_price_cents,
                channel,
            });
        }
        self.metrics.record_transfer();
        debug!(listing = %listing.to_json(), "listing_settlement_recorded");
    }

    /// Cancel an unsold listing and release its reserved shares
    pub fn cancel_listing(
        &self,
        listing_id: ListingId,
        now: DateTime<Utc>,
    ) -> EngineResult<ShareListing> {
        let started = Instant::now();
        let result = (|| {
            let (listing, released) = self.rofr.cancel_listing(listing_id, now)?;
            self.ledger.release_shares(listing.seller_record_id, released)?;
            self.waitlist.mark_fulfilled(listing_id);

            if let Some(events) = &self.events {
                events.send_listing_cancelled(ListingWindowPayload {
                    site: None,
                    ts: now,
                    listing_id,
                    yacht_id: listing.yacht_id,
                    shares: released,
                    asking_price_cents: listing.asking_price_cents,
                    closes_at: None,
                });
            }
            self.metrics.record_listing_cancelled();
            Ok(listing)
        })();
        self.observe("cancel_listing", started, &result);
        result
    }

    /// Consume usage days and engine hours from an ownership record.
    ///
    /// The estimated fuel cost is charged inside the allocation check,
    /// so an underfunded wallet rejects the booking before any
    /// entitlement is decremented.
    pub fn consume_usage(
        &self,
        record_id: RecordId,
        days: u32,
        engine_hours: f64,
        now: DateTime<Utc>,
    ) -> EngineResult<UsageAllocation> {
        let started = Instant::now();
        let result = (|| {
            let record =
                self.ledger.record(record_id).ok_or(EngineError::RecordNotFound(record_id))?;
            let fuel_cost =
                (engine_hours * self.config.fuel_cost_per_engine_hour_cents() as f64).round()
                    as Cents;

            let (allocation, charge) =
                self.allocation.consume_guarded(record_id, days, engine_hours, || {
                    self.fuel.charge(record.owner_id, fuel_cost)
                })?;

            if charge.auto_topped_up {
                self.metrics.record_fuel_topup();
            }
            if charge.low_balance {
                self.metrics.record_fuel_low_balance();
                if let Some(events) = &self.events {
                    events.send_fuel_low_balance(FuelLowBalancePayload {
                        site: None,
                        ts: now,
                        owner_id: record.owner_id,
                        balance_cents: charge.balance_cents,
                    });
                }
            }
            if let Some(events) = &self.events {
                events.send_usage_consumed(UsageConsumedPayload {
                    site: None,
                    ts: now,
                    record_id,
                    days,
                    engine_hours,
                    days_remaining: allocation.days_remaining,
                    engine_hours_remaining: allocation.engine_hours_remaining,
                });
            }
            self.metrics.record_usage(days, engine_hours);
            Ok(allocation)
        })();
        self.observe("consume_usage", started, &result);
        result
    }

    /// Scheduler entry point: apply the annual allocation reset at the
    /// record's ownership anniversary. Idempotent.
    pub fn reset_annual_allocation(
        &self,
        record_id: RecordId,
        now: DateTime<Utc>,
    ) -> EngineResult<(UsageAllocation, bool)> {
        let started = Instant::now();
        let result = (|| {
            let record =
                self.ledger.record(record_id).ok_or(EngineError::RecordNotFound(record_id))?;
            let yacht = self
                .ledger
                .yacht(record.yacht_id)
                .ok_or(EngineError::YachtNotFound(record.yacht_id))?;

            let (allocation, applied) = self.allocation.reset_annual(
                record_id,
                record.shares_owned,
                yacht.total_shares,
                now,
            )?;
            if applied {
                if let Some(events) = &self.events {
                    events.send_allocation_reset(AllocationResetPayload {
                        site: None,
                        ts: now,
                        record_id,
                        days_remaining: allocation.days_remaining,
                        engine_hours_remaining: allocation.engine_hours_remaining,
                    });
                }
            }
            Ok((allocation, applied))
        })();
        self.observe("reset_annual_allocation", started, &result);
        result
    }

    /// Join the waitlist for a yacht.
    ///
    /// The priority tier is fixed at join time against the yacht's
    /// current reference share price.
    pub fn join_waitlist(
        &self,
        yacht_id: YachtId,
        user_id: UserId,
        desired_shares: u32,
        max_budget_cents: Cents,
        returning_guest: bool,
        now: DateTime<Utc>,
    ) -> EngineResult<WaitlistEntry> {
        let started = Instant::now();
        let result = (|| {
            let yacht =
                self.ledger.yacht(yacht_id).ok_or(EngineError::YachtNotFound(yacht_id))?;
            let entry = self.waitlist.join(
                yacht_id,
                user_id,
                desired_shares,
                max_budget_cents,
                returning_guest,
                yacht.share_price_cents,
                now,
            )?;
            self.metrics.record_waitlist_join();
            Ok(entry)
        })();
        self.observe("join_waitlist", started, &result);
        result
    }

    /// The offered buyer declined; advance the offer to the next entry
    pub fn decline_waitlist_offer(
        &self,
        listing_id: ListingId,
        now: DateTime<Utc>,
    ) -> Option<WaitlistOffer> {
        let next = self.waitlist.decline_offer(listing_id, now);
        if let Some(offer) = &next {
            self.emit_waitlist_offer(offer, now);
        }
        next
    }

    /// Extend an offer to the waitlist head and emit the event
    fn offer_to_waitlist(&self, listing_id: ListingId, yacht_id: YachtId, now: DateTime<Utc>) {
        if let Some(offer) = self.waitlist.open_offer(listing_id, yacht_id, now) {
            self.emit_waitlist_offer(&offer, now);
        }
    }

    fn emit_waitlist_offer(&self, offer: &WaitlistOffer, now: DateTime<Utc>) {
        self.metrics.record_waitlist_offer();
        if let Some(events) = &self.events {
            events.send_waitlist_offer(WaitlistOfferPayload {
                site: None,
                ts: now,
                listing_id: offer.listing_id,
                yacht_id: offer.yacht_id,
                user_id: offer.user_id,
                desired_shares: offer.desired_shares,
                response_deadline: offer.response_deadline,
            });
        }
    }

    /// Credit an owner's fuel wallet
    pub fn top_up_fuel(&self, owner_id: UserId, amount_cents: Cents) -> EngineResult<FuelWallet> {
        let started = Instant::now();
        let result = self.fuel.top_up(owner_id, amount_cents);
        if result.is_ok() {
            self.metrics.record_fuel_topup();
        }
        self.observe("top_up_fuel", started, &result);
        result
    }

    pub fn set_fuel_auto_topup(&self, owner_id: UserId, enabled: bool) -> EngineResult<FuelWallet> {
        self.fuel.set_auto_topup(owner_id, enabled)
    }

    /// Periodic sweep, driven by the external scheduler: expires lapsed
    /// ROFR windows, advances timed-out waitlist offers, and drops
    /// expired waitlist entries. Safe to invoke redundantly.
    pub fn tick(&self, now: DateTime<Utc>) {
        for listing_id in self.rofr.due_for_expiry(now) {
            // Failures here are already-expired races; nothing to do
            let _ = self.expire_if_due(listing_id, now);
        }
        for listing_id in self.waitlist.timed_out_offers(now) {
            if let Some(offer) = self.waitlist.advance_if_timed_out(listing_id, now) {
                self.emit_waitlist_offer(&offer, now);
            }
        }
        let expired = self.waitlist.sweep_expired(now);
        if expired > 0 {
            self.metrics.record_waitlist_expired(expired as u64);
        }
    }

    // Read accessors for adapters and the metrics reporter

    pub fn yacht(&self, yacht_id: YachtId) -> Option<Yacht> {
        self.ledger.yacht(yacht_id)
    }

    pub fn ownership_record(&self, record_id: RecordId) -> Option<OwnershipRecord> {
        self.ledger.record(record_id)
    }

    pub fn record_for_owner(&self, yacht_id: YachtId, owner_id: UserId) -> Option<OwnershipRecord> {
        self.ledger.record_for_owner(yacht_id, owner_id)
    }

    pub fn listing(&self, listing_id: ListingId) -> Option<ShareListing> {
        self.rofr.listing(listing_id)
    }

    pub fn allocation(&self, record_id: RecordId) -> Option<UsageAllocation> {
        self.allocation.allocation(record_id)
    }

    pub fn fuel_wallet(&self, owner_id: UserId) -> Option<FuelWallet> {
        self.fuel.wallet(owner_id)
    }

    /// An owner's stake rendered in lowest terms, e.g. "1/5"
    pub fn owner_fraction(&self, yacht_id: YachtId, owner_id: UserId) -> Option<String> {
        let yacht = self.ledger.yacht(yacht_id)?;
        let record = self.ledger.record_for_owner(yacht_id, owner_id)?;
        Some(crate::domain::types::share_fraction(record.shares_owned, yacht.total_shares))
    }

    pub fn yacht_count(&self) -> usize {
        self.ledger.yacht_count()
    }

    pub fn open_listing_count(&self) -> usize {
        self.rofr.open_listing_count()
    }
}
