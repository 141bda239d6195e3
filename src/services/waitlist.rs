//! Waitlist matching - fair ordering of demand against intermittent supply
//!
//! Entries queue per yacht, ordered by `(priority_tier desc, joined_at
//! asc)` with the tier computed once at join time. When a listing opens
//! to the public the head entry is offered the purchase with a bounded
//! response window; decline or timeout advances to the next entry.
//! Entries expire after a configured TTL and are removed by a periodic
//! sweep.

use crate::domain::error::{EngineError, EngineResult};
use crate::domain::types::{Cents, ListingId, UserId, WaitlistEntry, YachtId};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

/// An outstanding purchase offer to the head of a queue
#[derive(Debug, Clone)]
pub struct WaitlistOffer {
    pub listing_id: ListingId,
    pub yacht_id: YachtId,
    pub user_id: UserId,
    pub desired_shares: u32,
    pub offered_at: DateTime<Utc>,
    pub response_deadline: DateTime<Utc>,
}

#[derive(Default)]
struct WaitlistState {
    entries: FxHashMap<YachtId, Vec<WaitlistEntry>>,
    offers: FxHashMap<ListingId, WaitlistOffer>,
}

/// Per-yacht waitlist queues and outstanding offers
pub struct Waitlist {
    state: RwLock<WaitlistState>,
    ttl: Duration,
    response_window: Duration,
}

impl Waitlist {
    pub fn new(ttl_days: i64, response_window_hours: i64) -> Self {
        Self {
            state: RwLock::new(WaitlistState::default()),
            ttl: Duration::days(ttl_days),
            response_window: Duration::hours(response_window_hours),
        }
    }

    /// Join the queue for a yacht.
    ///
    /// `asking_price_cents` is the current reference price the budget is
    /// measured against; the tier is fixed from that moment on.
    pub fn join(
        &self,
        yacht_id: YachtId,
        user_id: UserId,
        desired_shares: u32,
        max_budget_cents: Cents,
        returning_guest: bool,
        asking_price_cents: Cents,
        now: DateTime<Utc>,
    ) -> EngineResult<WaitlistEntry> {
        let mut state = self.state.write();
        let queue = state.entries.entry(yacht_id).or_default();

        if queue.iter().any(|e| e.user_id == user_id && e.expires_at > now) {
            return Err(EngineError::DuplicateEntry { yacht_id, user_id });
        }

        let mut priority_tier = 0u8;
        if returning_guest {
            priority_tier += 2;
        }
        if max_budget_cents >= asking_price_cents {
            priority_tier += 1;
        }

        let entry = WaitlistEntry {
            yacht_id,
            user_id,
            desired_shares,
            max_budget_cents,
            priority_tier,
            joined_at: now,
            expires_at: now + self.ttl,
        };

        info!(
            yacht_id = %yacht_id,
            user_id = %user_id,
            desired_shares = %desired_shares,
            priority_tier = %priority_tier,
            expires_at = %entry.expires_at,
            "waitlist_joined"
        );

        queue.push(entry.clone());
        Ok(entry)
    }

    /// Pop the best-placed live entry for a yacht
    fn pop_next(state: &mut WaitlistState, yacht_id: YachtId, now: DateTime<Utc>) -> Option<WaitlistEntry> {
        let queue = state.entries.get_mut(&yacht_id)?;

        let mut best: Option<usize> = None;
        for (i, entry) in queue.iter().enumerate() {
            if entry.expires_at <= now {
                continue;
            }
            match best {
                None => best = Some(i),
                Some(b) => {
                    let current = &queue[b];
                    if entry.priority_tier > current.priority_tier
                        || (entry.priority_tier == current.priority_tier
                            && entry.joined_at < current.joined_at)
                    {
                        best = Some(i);
                    }
                }
            }
        }

        best.map(|i| queue.remove(i))
    }

    /// A listing reached the public market: offer it to the head entry.
    ///
    /// The head entry is consumed by the offer. Idempotent per listing -
    /// a listing with an outstanding offer gets no second one.
    pub fn open_offer(
        &self,
        listing_id: ListingId,
        yacht_id: YachtId,
        now: DateTime<Utc>,
    ) -> Option<WaitlistOffer> {
        let mut state = self.state.write();
        if state.offers.contains_key(&listing_id) {
            return None;
        }

        let entry = Self::pop_next(&mut state, yacht_id, now)?;
        let offer = WaitlistOffer {
            listing_id,
            yacht_id,
            user_id: entry.user_id,
            desired_shares: entry.desired_shares,
            offered_at: now,
            response_deadline: now + self.response_window,
        };

        info!(
            listing_id = %listing_id,
            yacht_id = %yacht_id,
            user_id = %offer.user_id,
            response_deadline = %offer.response_deadline,
            "waitlist_offer_extended"
        );

        state.offers.insert(listing_id, offer.clone());
        Some(offer)
    }

    /// The offered buyer declined: advance to the next entry, if any
    pub fn decline_offer(&self, listing_id: ListingId, now: DateTime<Utc>) -> Option<WaitlistOffer> {
        let yacht_id = {
            let mut state = self.state.write();
            let offer = state.offers.remove(&listing_id)?;
            debug!(
                listing_id = %listing_id,
                user_id = %offer.user_id,
                "waitlist_offer_declined"
            );
            offer.yacht_id
        };
        self.open_offer(listing_id, yacht_id, now)
    }

    /// Advance past an offer whose response deadline has passed.
    ///
    /// Scheduler entry point; a live offer is left alone.
    pub fn advance_if_timed_out(
        &self,
        listing_id: ListingId,
        now: DateTime<Utc>,
    ) -> Option<WaitlistOffer> {
        {
            let state = self.state.read();
            let offer = state.offers.get(&listing_id)?;
            if now < offer.response_deadline {
                return None;
            }
            debug!(
                listing_id = %listing_id,
                user_id = %offer.user_id,
                "waitlist_offer_timed_out"
            );
        }
        self.decline_offer(listing_id, now)
    }

    /// The listing settled; drop any outstanding offer for it
    pub fn mark_fulfilled(&self, listing_id: ListingId) {
        self.state.write().offers.remove(&listing_id);
    }

    /// Remove a user's entry after they acquired shares another way
    pub fn remove_entry(&self, yacht_id: YachtId, user_id: UserId) {
        let mut state = self.state.write();
        if let Some(queue) = state.entries.get_mut(&yacht_id) {
            queue.retain(|e| e.user_id != user_id);
        }
    }

    /// Remove expired entries; returns how many were dropped
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.state.write();
        let mut expired = 0usize;
        for (yacht_id, queue) in state.entries.iter_mut() {
            let before = queue.len();
            queue.retain(|e| {
                if e.expires_at <= now {
                    info!(
                        yacht_id = %yacht_id,
                        user_id = %e.user_id,
                        joined_at = %e.joined_at,
                        "waitlist_entry_expired"
                    );
                    false
                } else {
                    true
                }
            });
            expired += before - queue.len();
        }
        if expired > 0 {
            debug!(expired = %expired, "waitlist_sweep");
        }
        expired
    }

    /// Live entries queued for a yacht
    pub fn entry_count(&self, yacht_id: YachtId, now: DateTime<Utc>) -> usize {
        self.state
            .read()
            .entries
            .get(&yacht_id)
            .map(|q| q.iter().filter(|e| e.expires_at > now).count())
            .unwrap_or(0)
    }

    pub fn offer(&self, listing_id: ListingId) -> Option<WaitlistOffer> {
        self.state.read().offers.get(&listing_id).cloned()
    }

    /// Offers whose response deadline has passed
    pub fn timed_out_offers(&self, now: DateTime<Utc>) -> Vec<ListingId> {
        self.state
            .read()
            .offers
            .values()
            .filter(|o| now >= o.response_deadline)
            .map(|o| o.listing_id)
            .collect()
    }
}
