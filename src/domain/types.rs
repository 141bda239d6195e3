//! Shared types for the ownership engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable)
#[inline]
pub fn new_id() -> Uuid {
    Uuid::now_v7()
}

/// Amounts of money are integer cents; the engine never does float
/// arithmetic on prices.
pub type Cents = u64;

macro_rules! id_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(new_id())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(
    /// Newtype wrapper for yacht IDs to provide type safety
    YachtId
);
id_newtype!(
    /// Newtype wrapper for user IDs to provide type safety
    UserId
);
id_newtype!(
    /// Newtype wrapper for ownership record IDs
    RecordId
);
id_newtype!(
    /// Newtype wrapper for share listing IDs
    ListingId
);
id_newtype!(
    /// Newtype wrapper for settled trade IDs
    TradeId
);

/// A yacht whose ownership is partitioned into shares
///
/// `total_shares` is fixed at creation; `available_shares` counts the
/// unsold remainder. Location and capacity are descriptive only.
#[derive(Debug, Clone, Serialize)]
pub struct Yacht {
    pub id: YachtId,
    pub name: String,
    pub location: String,
    pub capacity: u32,
    pub total_shares: u32,
    pub available_shares: u32,
    /// Current reference price per share, in cents
    pub share_price_cents: Cents,
    pub created_at: DateTime<Utc>,
}

impl Yacht {
    pub fn new(
        id: YachtId,
        name: &str,
        location: &str,
        capacity: u32,
        total_shares: u32,
        share_price_cents: Cents,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.to_string(),
            location: location.to_string(),
            capacity,
            total_shares,
            available_shares: total_shares,
            share_price_cents,
            created_at: now,
        }
    }
}

/// Binds a user to a count of shares of one yacht
///
/// `shares_reserved` counts shares backing an open listing; they still
/// belong to the seller but cannot be transferred elsewhere until the
/// listing settles or is cancelled.
#[derive(Debug, Clone, Serialize)]
pub struct OwnershipRecord {
    pub id: RecordId,
    pub yacht_id: YachtId,
    pub owner_id: UserId,
    pub shares_owned: u32,
    pub shares_reserved: u32,
    /// Total paid across all acquisitions, in cents
    pub purchase_price_cents: Cents,
    pub purchase_date: DateTime<Utc>,
}

impl OwnershipRecord {
    pub fn new(
        yacht_id: YachtId,
        owner_id: UserId,
        shares_owned: u32,
        purchase_price_cents: Cents,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RecordId::new(),
            yacht_id,
            owner_id,
            shares_owned,
            shares_reserved: 0,
            purchase_price_cents,
            purchase_date: now,
        }
    }

    /// Shares the owner may list or transfer right now
    #[inline]
    pub fn shares_transferable(&self) -> u32 {
        self.shares_owned - self.shares_reserved
    }
}

/// A prospective buyer queued for shares of a yacht
#[derive(Debug, Clone, Serialize)]
pub struct WaitlistEntry {
    pub yacht_id: YachtId,
    pub user_id: UserId,
    pub desired_shares: u32,
    pub max_budget_cents: Cents,
    /// Computed once at join time; never recomputed
    pub priority_tier: u8,
    pub joined_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Render a share count as a fraction of the yacht in lowest terms
///
/// Always derived at read time from the owned count and the yacht's
/// total; never stored, so it cannot drift from the ledger.
pub fn share_fraction(count: u32, total_shares: u32) -> String {
    if total_shares == 0 {
        return "0".to_string();
    }
    if count == 0 {
        return format!("0/{}", total_shares);
    }
    if count == total_shares {
        return "1/1".to_string();
    }
    let d = gcd(count, total_shares);
    format!("{}/{}", count / d, total_shares / d)
}
