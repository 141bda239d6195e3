//! Typed channel for notification events
//!
//! The engine emits events fire-and-forget; delivery to owners (push,
//! email, in-app) is the notification collaborator's job. Uses bounded
//! mpsc channels to prevent unbounded memory growth: if the consumer
//! falls behind, events are dropped rather than blocking an operation.

use crate::domain::types::{Cents, ListingId, RecordId, UserId, YachtId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

/// Events emitted by the engine for the notification collaborator
#[derive(Debug)]
pub enum EngineEvent {
    /// Primary-market shares purchased from the yacht's unsold pool
    SharesPurchased(SharesPurchasedPayload),
    /// A listing entered its co-owner ROFR window
    ListingOpenedForRofr(ListingWindowPayload),
    /// A listing reached the public marketplace
    ListingPublished(ListingWindowPayload),
    /// A listing settled (ROFR exercise or public purchase)
    ListingSold(ListingSoldPayload),
    /// A listing was cancelled by its seller
    ListingCancelled(ListingWindowPayload),
    /// A waitlisted buyer was offered a purchase opportunity
    WaitlistOffer(WaitlistOfferPayload),
    /// Usage days / engine hours were consumed
    UsageConsumed(UsageConsumedPayload),
    /// An annual allocation reset was applied
    AllocationReset(AllocationResetPayload),
    /// A fuel wallet dropped below the low-balance threshold
    FuelLowBalance(FuelLowBalancePayload),
}

/// Which market a settlement happened on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SaleChannel {
    Primary,
    Rofr,
    Public,
}

impl SaleChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaleChannel::Primary => "primary",
            SaleChannel::Rofr => "rofr",
            SaleChannel::Public => "public",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SharesPurchasedPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    pub ts: DateTime<Utc>,
    pub yacht_id: YachtId,
    pub buyer_id: UserId,
    pub record_id: RecordId,
    pub shares: u32,
    pub price_per_share_cents: Cents,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListingWindowPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    pub ts: DateTime<Utc>,
    pub listing_id: ListingId,
    pub yacht_id: YachtId,
    pub shares: u32,
    pub asking_price_cents: Cents,
    /// End of the ROFR window, when one is running
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closes_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListingSoldPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    pub ts: DateTime<Utc>,
    pub listing_id: ListingId,
    pub yacht_id: YachtId,
    pub seller_id: UserId,
    pub buyer_id: UserId,
    pub shares: u32,
    pub price_per_share_cents: Cents,
    pub channel: SaleChannel,
}

#[derive(Debug, Clone, Serialize)]
pub struct WaitlistOfferPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    pub ts: DateTime<Utc>,
    pub listing_id: ListingId,
    pub yacht_id: YachtId,
    pub user_id: UserId,
    pub desired_shares: u32,
    pub response_deadline: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageConsumedPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    pub ts: DateTime<Utc>,
    pub record_id: RecordId,
    pub days: u32,
    pub engine_hours: f64,
    pub days_remaining: u32,
    pub engine_hours_remaining: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllocationResetPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    pub ts: DateTime<Utc>,
    pub record_id: RecordId,
    pub days_remaining: u32,
    pub engine_hours_remaining: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FuelLowBalancePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    pub ts: DateTime<Utc>,
    pub owner_id: UserId,
    pub balance_cents: Cents,
}

/// Sender handle for engine events
///
/// Clone this to share across multiple producers.
/// Non-blocking - if the channel is full, events are dropped.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<EngineEvent>,
    site_id: String,
}

impl EventSender {
    pub fn new(tx: mpsc::Sender<EngineEvent>, site_id: String) -> Self {
        Self { tx, site_id }
    }

    fn site(&self) -> Option<String> {
        Some(self.site_id.clone())
    }

    pub fn send_shares_purchased(&self, mut payload: SharesPurchasedPayload) {
        payload.site = self.site();
        let _ = self.tx.try_send(EngineEvent::SharesPurchased(payload));
    }

    pub fn send_listing_opened_for_rofr(&self, mut payload: ListingWindowPayload) {
        payload.site = self.site();
        let _ = self.tx.try_send(EngineEvent::ListingOpenedForRofr(payload));
    }

    pub fn send_listing_published(&self, mut payload: ListingWindowPayload) {
        payload.site = self.site();
        let _ = self.tx.try_send(EngineEvent::ListingPublished(payload));
    }

    pub fn send_listing_sold(&self, mut payload: ListingSoldPayload) {
        payload.site = self.site();
        let _ = self.tx.try_send(EngineEvent::ListingSold(payload));
    }

    pub fn send_listing_cancelled(&self, mut payload: ListingWindowPayload) {
        payload.site = self.site();
        let _ = self.tx.try_send(EngineEvent::ListingCancelled(payload));
    }

    pub fn send_waitlist_offer(&self, mut payload: WaitlistOfferPayload) {
        payload.site = self.site();
        let _ = self.tx.try_send(EngineEvent::WaitlistOffer(payload));
    }

    pub fn send_usage_consumed(&self, mut payload: UsageConsumedPayload) {
        payload.site = self.site();
        let _ = self.tx.try_send(EngineEvent::UsageConsumed(payload));
    }

    pub fn send_allocation_reset(&self, mut payload: AllocationResetPayload) {
        payload.site = self.site();
        let _ = self.tx.try_send(EngineEvent::AllocationReset(payload));
    }

    pub fn send_fuel_low_balance(&self, mut payload: FuelLowBalancePayload) {
        payload.site = self.site();
        let _ = self.tx.try_send(EngineEvent::FuelLowBalance(payload));
    }
}

/// Create a new event channel pair
///
/// Returns (sender, receiver) where the sender can be cloned and shared.
/// Buffer size determines how many events can be queued before drops.
pub fn create_event_channel(
    buffer_size: usize,
    site_id: String,
) -> (EventSender, mpsc::Receiver<EngineEvent>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (EventSender::new(tx, site_id), rx)
}
