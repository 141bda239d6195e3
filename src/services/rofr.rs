//! Right-of-first-refusal window management for share listings
//!
//! Owns every `ShareListing` state transition. The contended path
//! (several co-owners racing for one listing) is resolved with a
//! conditional check-and-transition under the listing map's write lock:
//! the first caller to commit wins, later callers observe the moved
//! state and get `ListingNoLongerAvailable`. Ledger settlement runs
//! inside that lock, so a listing is only marked sold after the share
//! transfer committed, and a failed settlement leaves it untouched.

use crate::domain::error::{EngineError, EngineResult};
use crate::domain::listing::{ListingEvent, ListingEventKind, ListingState, ShareListing};
use crate::domain::types::{Cents, ListingId, RecordId, UserId, YachtId};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

/// Manages listing lifecycle and the ROFR window gate
pub struct RofrManager {
    listings: RwLock<FxHashMap<ListingId, ShareListing>>,
    window: Duration,
}

/// Error for a listing that cannot serve the requested transition:
/// already-taken listings are an expected race, everything else is a
/// caller error.
fn unavailable_or_invalid(listing: &ShareListing, expected: &'static str) -> EngineError {
    match listing.state {
        ListingState::RofrSold | ListingState::Sold | ListingState::Cancelled => {
            EngineError::ListingNoLongerAvailable { listing_id: listing.id }
        }
        state => EngineError::InvalidListingState {
            listing_id: listing.id,
            state: state.as_str(),
            expected,
        },
    }
}

impl RofrManager {
    pub fn new(window_days: i64) -> Self {
        Self { listings: RwLock::new(FxHashMap::default()), window: Duration::days(window_days) }
    }

    /// Create a draft listing, invisible until published.
    ///
    /// The caller must already hold the share reservation for it.
    pub fn create_listing(
        &self,
        yacht_id: YachtId,
        seller_id: UserId,
        seller_record_id: RecordId,
        shares_for_sale: u32,
        asking_price_cents: Cents,
        now: DateTime<Utc>,
    ) -> ShareListing {
        let listing = ShareListing::new(
            yacht_id,
            seller_id,
            seller_record_id,
            shares_for_sale,
            asking_price_cents,
            now,
        );

        debug!(
            listing_id = %listing.id,
            yacht_id = %yacht_id,
            seller_id = %seller_id,
            shares = %shares_for_sale,
            asking_price_cents = %asking_price_cents,
            "listing_drafted"
        );

        self.listings.write().insert(listing.id, listing.clone());
        listing
    }

    /// Open the ROFR window: Draft -> RofrOpen, `closes_at = now + window`.
    ///
    /// `eligible_owners` is the co-owner snapshot taken at publish time;
    /// owners joining later hold no right on this listing.
    pub fn publish_listing(
        &self,
        listing_id: ListingId,
        eligible_owners: Vec<UserId>,
        now: DateTime<Utc>,
    ) -> EngineResult<ShareListing> {
        let mut listings = self.listings.write();
        let listing =
            listings.get_mut(&listing_id).ok_or(EngineError::ListingNotFound(listing_id))?;

        if listing.state != ListingState::Draft {
            return Err(unavailable_or_invalid(listing, "draft"));
        }

        listing.state = ListingState::RofrOpen;
        listing.opens_at = Some(now);
        listing.closes_at = Some(now + self.window);
        listing.eligible_owners = eligible_owners.into_iter().collect();
        listing.record(ListingEvent::new(ListingEventKind::Published, now));

        info!(
            listing_id = %listing_id,
            yacht_id = %listing.yacht_id,
            closes_at = %(now + self.window),
            eligible_owners = %listing.eligible_owners.len(),
            "listing_rofr_opened"
        );

        Ok(listing.clone())
    }

    /// Exercise the right of first refusal.
    ///
    /// Only an eligible co-owner, only inside the half-open window
    /// `[opens_at, closes_at)`. `settle` performs the ledger transfer and
    /// runs before the state moves; its error is returned verbatim with
    /// the listing unchanged.
    pub fn exercise_right<T>(
        &self,
        listing_id: ListingId,
        buyer_id: UserId,
        now: DateTime<Utc>,
        settle: impl FnOnce(&ShareListing) -> EngineResult<T>,
    ) -> EngineResult<(ShareListing, T)> {
        let mut listings = self.listings.write();
        let listing =
            listings.get_mut(&listing_id).ok_or(EngineError::ListingNotFound(listing_id))?;

        if listing.state != ListingState::RofrOpen {
            return Err(unavailable_or_invalid(listing, "rofr_open"));
        }
        if !listing.rofr_window_open(now) {
            // Window lapsed; the listing is awaiting the expiry sweep
            return Err(EngineError::ListingNoLongerAvailable { listing_id });
        }
        if !listing.is_eligible(buyer_id) {
            return Err(EngineError::NotEligible { listing_id, user_id: buyer_id });
        }

        let outcome = settle(listing)?;

        listing.state = ListingState::RofrSold;
        listing.record(
            ListingEvent::new(ListingEventKind::RightExercised, now)
                .with_actor(buyer_id)
                .with_detail(&format!("shares={}", listing.shares_for_sale)),
        );

        info!(
            listing_id = %listing_id,
            yacht_id = %listing.yacht_id,
            buyer_id = %buyer_id,
            shares = %listing.shares_for_sale,
            "rofr_exercised"
        );

        Ok((listing.clone(), outcome))
    }

    /// Scheduler entry point: move an expired window to the public market.
    ///
    /// Idempotent - a listing already past the window returns its current
    /// state with `transitioned == false` and no duplicate history.
    pub fn expire_if_due(
        &self,
        listing_id: ListingId,
        now: DateTime<Utc>,
    ) -> EngineResult<(ShareListing, bool)> {
        let mut listings = self.listings.write();
        let listing =
            listings.get_mut(&listing_id).ok_or(EngineError::ListingNotFound(listing_id))?;

        let due = listing.state == ListingState::RofrOpen
            && listing.closes_at.is_some_and(|closes| now >= closes);
        if !due {
            return Ok((listing.clone(), false));
        }

        // Passage state: the expired window opens to the public in the
        // same transition.
        listing.state = ListingState::RofrExpired;
        listing.record(ListingEvent::new(ListingEventKind::WindowExpired, now));
        listing.state = ListingState::PublicOpen;
        listing.record(ListingEvent::new(ListingEventKind::PublicOpened, now));

        info!(
            listing_id = %listing_id,
            yacht_id = %listing.yacht_id,
            shares = %listing.shares_for_sale,
            "listing_public_opened"
        );

        Ok((listing.clone(), true))
    }

    /// Purchase from a public listing; partial purchases keep it open.
    pub fn purchase_listing<T>(
        &self,
        listing_id: ListingId,
        buyer_id: UserId,
        count: u32,
        now: DateTime<Utc>,
        settle: impl FnOnce(&ShareListing) -> EngineResult<T>,
    ) -> EngineResult<(ShareListing, T)> {
        let mut listings = self.listings.write();
        let listing =
            listings.get_mut(&listing_id).ok_or(EngineError::ListingNotFound(listing_id))?;

        if listing.state != ListingState::PublicOpen {
            return Err(unavailable_or_invalid(listing, "public_open"));
        }
        if count > listing.shares_for_sale {
            return Err(EngineError::InsufficientShares {
                yacht_id: listing.yacht_id,
                requested: count,
                available: listing.shares_for_sale,
            });
        }

        let outcome = settle(listing)?;

        listing.shares_for_sale -= count;
        listing.record(
            ListingEvent::new(ListingEventKind::SharesSold, now)
                .with_actor(buyer_id)
                .with_detail(&format!("shares={count}")),
        );
        if listing.shares_for_sale == 0 {
            listing.state = ListingState::Sold;
        }

        info!(
            listing_id = %listing_id,
            yacht_id = %listing.yacht_id,
            buyer_id = %buyer_id,
            shares = %count,
            remaining = %listing.shares_for_sale,
            "listing_purchase_settled"
        );

        Ok((listing.clone(), outcome))
    }

    /// Cancel a listing that has not sold.
    ///
    /// Returns the listing and the share count whose reservation the
    /// caller must release.
    pub fn cancel_listing(
        &self,
        listing_id: ListingId,
        now: DateTime<Utc>,
    ) -> EngineResult<(ShareListing, u32)> {
        let mut listings = self.listings.write();
        let listing =
            listings.get_mut(&listing_id).ok_or(EngineError::ListingNotFound(listing_id))?;

        match listing.state {
            ListingState::Draft | ListingState::RofrOpen | ListingState::PublicOpen => {}
            _ => return Err(unavailable_or_invalid(listing, "draft|rofr_open|public_open")),
        }

        let released = listing.shares_for_sale;
        listing.state = ListingState::Cancelled;
        listing.record(ListingEvent::new(ListingEventKind::Cancelled, now));

        info!(
            listing_id = %listing_id,
            yacht_id = %listing.yacht_id,
            released_shares = %released,
            "listing_cancelled"
        );

        Ok((listing.clone(), released))
    }

    pub fn listing(&self, listing_id: ListingId) -> Option<ShareListing> {
        self.listings.read().get(&listing_id).cloned()
    }

    /// Listings whose ROFR window has lapsed and await the expiry sweep
    pub fn due_for_expiry(&self, now: DateTime<Utc>) -> Vec<ListingId> {
        self.listings
            .read()
            .values()
            .filter(|l| {
                l.state == ListingState::RofrOpen && l.closes_at.is_some_and(|c| now >= c)
            })
            .map(|l| l.id)
            .collect()
    }

    /// Listings currently visible to somebody (ROFR or public)
    pub fn open_listing_count(&self) -> usize {
        self.listings
            .read()
            .values()
            .filter(|l| matches!(l.state, ListingState::RofrOpen | ListingState::PublicOpen))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> RofrManager {
        RofrManager::new(30)
    }

    fn draft_listing(m: &RofrManager, now: DateTime<Utc>) -> (ShareListing, UserId) {
        let seller = UserId::new();
        let listing =
            m.create_listing(YachtId::new(), seller, RecordId::new(), 1, 14_500_000, now);
        (listing, seller)
    }

    #[test]
    fn test_publish_opens_window() {
        let m = manager();
        let now = Utc::now();
        let (listing, _) = draft_listing(&m, now);
        let co_owner = UserId::new();

        let published = m.publish_listing(listing.id, vec![co_owner], now).unwrap();
        assert_eq!(published.state, ListingState::RofrOpen);
        assert_eq!(published.opens_at, Some(now));
        assert_eq!(published.closes_at, Some(now + Duration::days(30)));
        assert!(published.is_eligible(co_owner));
    }

    #[test]
    fn test_publish_twice_rejected() {
        let m = manager();
        let now = Utc::now();
        let (listing, _) = draft_listing(&m, now);

        m.publish_listing(listing.id, vec![], now).unwrap();
        let err = m.publish_listing(listing.id, vec![], now).unwrap_err();
        assert!(matches!(err, EngineError::InvalidListingState { expected: "draft", .. }));
    }

    #[test]
    fn test_exercise_right_inside_window() {
        let m = manager();
        let now = Utc::now();
        let (listing, _) = draft_listing(&m, now);
        let co_owner = UserId::new();
        m.publish_listing(listing.id, vec![co_owner], now).unwrap();

        let (sold, _) = m
            .exercise_right(listing.id, co_owner, now + Duration::days(10), |_| Ok(()))
            .unwrap();
        assert_eq!(sold.state, ListingState::RofrSold);
    }

    #[test]
    fn test_exercise_right_at_exact_close_rejected() {
        let m = manager();
        let now = Utc::now();
        let (listing, _) = draft_listing(&m, now);
        let co_owner = UserId::new();
        m.publish_listing(listing.id, vec![co_owner], now).unwrap();

        // Window is [opens_at, closes_at): the boundary itself is outside
        let err = m
            .exercise_right(listing.id, co_owner, now + Duration::days(30), |_| Ok(()))
            .unwrap_err();
        assert!(matches!(err, EngineError::ListingNoLongerAvailable { .. }));
    }

    #[test]
    fn test_exercise_right_requires_eligibility() {
        let m = manager();
        let now = Utc::now();
        let (listing, _) = draft_listing(&m, now);
        m.publish_listing(listing.id, vec![UserId::new()], now).unwrap();

        let outsider = UserId::new();
        let err = m.exercise_right(listing.id, outsider, now, |_| Ok(())).unwrap_err();
        assert!(matches!(err, EngineError::NotEligible { .. }));
    }

    #[test]
    fn test_second_exercise_loses_race() {
        let m = manager();
        let now = Utc::now();
        let (listing, _) = draft_listing(&m, now);
        let b = UserId::new();
        let c = UserId::new();
        m.publish_listing(listing.id, vec![b, c], now).unwrap();

        m.exercise_right(listing.id, b, now, |_| Ok(())).unwrap();
        let err = m.exercise_right(listing.id, c, now, |_| Ok(())).unwrap_err();
        assert!(matches!(err, EngineError::ListingNoLongerAvailable { .. }));
    }

    #[test]
    fn test_settlement_error_leaves_listing_open() {
        let m = manager();
        let now = Utc::now();
        let (listing, _) = draft_listing(&m, now);
        let co_owner = UserId::new();
        m.publish_listing(listing.id, vec![co_owner], now).unwrap();

        let err = m
            .exercise_right(listing.id, co_owner, now, |l| {
                Err::<(), _>(EngineError::RecordNotFound(l.seller_record_id))
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::RecordNotFound(_)));
        assert_eq!(m.listing(listing.id).unwrap().state, ListingState::RofrOpen);
    }

    #[test]
    fn test_expire_if_due_is_idempotent() {
        let m = manager();
        let now = Utc::now();
        let (listing, _) = draft_listing(&m, now);
        m.publish_listing(listing.id, vec![], now).unwrap();

        let day31 = now + Duration::days(31);
        let (expired, transitioned) = m.expire_if_due(listing.id, day31).unwrap();
        assert!(transitioned);
        assert_eq!(expired.state, ListingState::PublicOpen);
        let events_after_first = expired.events.len();

        // Second invocation: same terminal observation, no new history
        let (again, transitioned) = m.expire_if_due(listing.id, day31).unwrap();
        assert!(!transitioned);
        assert_eq!(again.state, ListingState::PublicOpen);
        assert_eq!(again.events.len(), events_after_first);
    }

    #[test]
    fn test_expire_before_close_is_noop() {
        let m = manager();
        let now = Utc::now();
        let (listing, _) = draft_listing(&m, now);
        m.publish_listing(listing.id, vec![], now).unwrap();

        let (unchanged, transitioned) =
            m.expire_if_due(listing.id, now + Duration::days(29)).unwrap();
        assert!(!transitioned);
        assert_eq!(unchanged.state, ListingState::RofrOpen);
    }

    #[test]
    fn test_public_purchase_partial_then_sold() {
        let m = manager();
        let now = Utc::now();
        let seller = UserId::new();
        let listing =
            m.create_listing(YachtId::new(), seller, RecordId::new(), 2, 14_500_000, now);
        m.publish_listing(listing.id, vec![], now).unwrap();
        m.expire_if_due(listing.id, now + Duration::days(30)).unwrap();

        let buyer = UserId::new();
        let day31 = now + Duration::days(31);
        let (open, _) = m.purchase_listing(listing.id, buyer, 1, day31, |_| Ok(())).unwrap();
        assert_eq!(open.state, ListingState::PublicOpen);
        assert_eq!(open.shares_for_sale, 1);

        let (sold, _) = m.purchase_listing(listing.id, buyer, 1, day31, |_| Ok(())).unwrap();
        assert_eq!(sold.state, ListingState::Sold);

        let err = m.purchase_listing(listing.id, buyer, 1, day31, |_| Ok(())).unwrap_err();
        assert!(matches!(err, EngineError::ListingNoLongerAvailable { .. }));
    }

    #[test]
    fn test_public_purchase_during_rofr_rejected() {
        let m = manager();
        let now = Utc::now();
        let (listing, _) = draft_listing(&m, now);
        m.publish_listing(listing.id, vec![], now).unwrap();

        let err = m.purchase_listing(listing.id, UserId::new(), 1, now, |_| Ok(())).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidListingState { expected: "public_open", .. }
        ));
    }

    #[test]
    fn test_cancel_releases_remaining_shares() {
        let m = manager();
        let now = Utc::now();
        let seller = UserId::new();
        let listing =
            m.create_listing(YachtId::new(), seller, RecordId::new(), 2, 14_500_000, now);
        m.publish_listing(listing.id, vec![], now).unwrap();

        let (cancelled, released) = m.cancel_listing(listing.id, now).unwrap();
        assert_eq!(cancelled.state, ListingState::Cancelled);
        assert_eq!(released, 2);

        let err = m.cancel_listing(listing.id, now).unwrap_err();
        assert!(matches!(err, EngineError::ListingNoLongerAvailable { .. }));
    }

    #[test]
    fn test_due_for_expiry_scan() {
        let m = manager();
        let now = Utc::now();
        let (a, _) = draft_listing(&m, now);
        let (b, _) = draft_listing(&m, now);
        m.publish_listing(a.id, vec![], now).unwrap();
        m.publish_listing(b.id, vec![], now + Duration::days(5)).unwrap();

        let due = m.due_for_expiry(now + Duration::days(30));
        assert_eq!(due, vec![a.id]);

        let due = m.due_for_expiry(now + Duration::days(36));
        assert_eq!(due.len(), 2);
    }
}
