//! Share listing model and its sale state machine

use crate::domain::types::{Cents, ListingId, RecordId, UserId, YachtId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use smallvec::SmallVec;

/// Sale state of a listing
///
/// The full lifecycle is
/// `Draft -> RofrOpen -> (RofrSold | RofrExpired) -> PublicOpen -> (Sold | Cancelled)`.
/// `RofrExpired` is a passage state: the expiry sweep moves an expired
/// window straight on to `PublicOpen` in the same call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ListingState {
    Draft,
    RofrOpen,
    RofrSold,
    RofrExpired,
    PublicOpen,
    Sold,
    Cancelled,
}

impl ListingState {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingState::Draft => "draft",
            ListingState::RofrOpen => "rofr_open",
            ListingState::RofrSold => "rofr_sold",
            ListingState::RofrExpired => "rofr_expired",
            ListingState::PublicOpen => "public_open",
            ListingState::Sold => "sold",
            ListingState::Cancelled => "cancelled",
        }
    }

    /// Terminal states accept no further transitions
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, ListingState::RofrSold | ListingState::Sold | ListingState::Cancelled)
    }
}

/// Event kinds recorded in a listing's history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingEventKind {
    Created,
    Published,
    RightExercised,
    WindowExpired,
    PublicOpened,
    SharesSold,
    Cancelled,
}

impl ListingEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingEventKind::Created => "created",
            ListingEventKind::Published => "published",
            ListingEventKind::RightExercised => "right_exercised",
            ListingEventKind::WindowExpired => "window_expired",
            ListingEventKind::PublicOpened => "public_opened",
            ListingEventKind::SharesSold => "shares_sold",
            ListingEventKind::Cancelled => "cancelled",
        }
    }
}

/// A single event in a listing's history
#[derive(Debug, Clone)]
pub struct ListingEvent {
    pub kind: ListingEventKind,
    pub ts: DateTime<Utc>,
    pub actor: Option<UserId>,
    pub detail: Option<String>,
}

impl ListingEvent {
    pub fn new(kind: ListingEventKind, ts: DateTime<Utc>) -> Self {
        Self { kind, ts, actor: None, detail: None }
    }

    pub fn with_actor(mut self, actor: UserId) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn with_detail(mut self, detail: &str) -> Self {
        self.detail = Some(detail.to_string());
        self
    }

    fn to_json_value(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        obj.insert("t".to_string(), serde_json::Value::String(self.kind.as_str().to_string()));
        obj.insert("ts".to_string(), serde_json::Value::String(self.ts.to_rfc3339()));
        if let Some(actor) = &self.actor {
            obj.insert("by".to_string(), serde_json::Value::String(actor.to_string()));
        }
        if let Some(d) = &self.detail {
            obj.insert("x".to_string(), serde_json::Value::String(d.clone()));
        }
        serde_json::Value::Object(obj)
    }
}

/// A seller's offer of N shares of one yacht at an asking price
#[derive(Debug, Clone)]
pub struct ShareListing {
    pub id: ListingId,
    pub yacht_id: YachtId,
    pub seller_id: UserId,
    /// Ownership record the listed shares are reserved against
    pub seller_record_id: RecordId,
    pub shares_for_sale: u32,
    /// Asking price per share, in cents
    pub asking_price_cents: Cents,
    pub state: ListingState,
    /// Set when the listing is published
    pub opens_at: Option<DateTime<Utc>>,
    /// `opens_at` + the configured ROFR window
    pub closes_at: Option<DateTime<Utc>>,
    /// Co-owners eligible to exercise the right, snapshotted at publish
    pub eligible_owners: SmallVec<[UserId; 4]>,
    pub created_at: DateTime<Utc>,
    pub events: Vec<ListingEvent>,
}

impl ShareListing {
    /// Create a draft listing.
    ///
    /// The listing starts in `Draft`, invisible to everyone; the caller
    /// is responsible for reserving the shares in the ledger.
    pub fn new(
        yacht_id: YachtId,
        seller_id: UserId,
        seller_record_id: RecordId,
        shares_for_sale: u32,
        asking_price_cents: Cents,
        now: DateTime<Utc>,
    ) -> Self {
        let mut listing = Self {
            id: ListingId::new(),
            yacht_id,
            seller_id,
            seller_record_id,
            shares_for_sale,
            asking_price_cents,
            state: ListingState::Draft,
            opens_at: None,
            closes_at: None,
            eligible_owners: SmallVec::new(),
            created_at: now,
            events: Vec::with_capacity(8),
        };
        listing.record(ListingEvent::new(ListingEventKind::Created, now).with_actor(seller_id));
        listing
    }

    /// Append an event to the history
    pub fn record(&mut self, event: ListingEvent) {
        self.events.push(event);
    }

    /// Whether the ROFR window is open at `now`.
    ///
    /// The window is half-open, `[opens_at, closes_at)`: a call at
    /// exactly `closes_at` is already outside it.
    pub fn rofr_window_open(&self, now: DateTime<Utc>) -> bool {
        match (self.opens_at, self.closes_at) {
            (Some(opens), Some(closes)) => now >= opens && now < closes,
            _ => false,
        }
    }

    /// Whether `user` may exercise the right of first refusal
    pub fn is_eligible(&self, user: UserId) -> bool {
        self.eligible_owners.contains(&user)
    }

    /// Convert to JSON string for the trade log and event payloads
    pub fn to_json(&self) -> String {
        let mut obj = serde_json::Map::new();
        obj.insert("lid".to_string(), serde_json::Value::String(self.id.to_string()));
        obj.insert("yid".to_string(), serde_json::Value::String(self.yacht_id.to_string()));
        obj.insert("seller".to_string(), serde_json::Value::String(self.seller_id.to_string()));
        obj.insert("shares".to_string(), serde_json::Value::Number(self.shares_for_sale.into()));
        obj.insert("ask".to_string(), serde_json::Value::Number(self.asking_price_cents.into()));
        obj.insert(
            "state".to_string(),
            serde_json::Value::String(self.state.as_str().to_string()),
        );
        if let Some(opens) = self.opens_at {
            obj.insert("t0".to_string(), serde_json::Value::String(opens.to_rfc3339()));
        }
        if let Some(closes) = self.closes_at {
            obj.insert("t1".to_string(), serde_json::Value::String(closes.to_rfc3339()));
        }
        let events: Vec<serde_json::Value> =
            self.events.iter().map(|e| e.to_json_value()).collect();
        obj.insert("ev".to_string(), serde_json::Value::Array(events));
        serde_json::Value::Object(obj).to_string()
    }
}
