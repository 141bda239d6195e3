//! Typed errors for engine operations
//!
//! Every mutation failure is reported to the caller as one of these
//! kinds and leaves state unchanged. `ListingNoLongerAvailable` is
//! expected under normal operation (two co-owners racing for the same
//! listing) and is kept distinct from the programming-error kinds so
//! adapters can render it as "someone else already claimed this".

use crate::domain::types::{Cents, ListingId, RecordId, UserId, YachtId};
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("yacht {yacht_id} already has shares issued")]
    AlreadyInitialized { yacht_id: YachtId },

    #[error("yacht {yacht_id}: {requested} shares requested, {available} available")]
    InsufficientShares { yacht_id: YachtId, requested: u32, available: u32 },

    #[error("record {record_id}: {requested} shares requested, {transferable} transferable")]
    OverTransfer { record_id: RecordId, requested: u32, transferable: u32 },

    #[error("listing {listing_id} is {state}, operation requires {expected}")]
    InvalidListingState { listing_id: ListingId, state: &'static str, expected: &'static str },

    #[error("listing {listing_id} is no longer available")]
    ListingNoLongerAvailable { listing_id: ListingId },

    #[error("user {user_id} holds no right of first refusal on listing {listing_id}")]
    NotEligible { listing_id: ListingId, user_id: UserId },

    #[error(
        "record {record_id}: requested {days_requested} days / {hours_requested} engine hours, \
         {days_remaining} days / {hours_remaining} hours remaining"
    )]
    InsufficientAllocation {
        record_id: RecordId,
        days_requested: u32,
        hours_requested: f64,
        days_remaining: u32,
        hours_remaining: f64,
    },

    #[error("user {user_id} already has an active waitlist entry for yacht {yacht_id}")]
    DuplicateEntry { yacht_id: YachtId, user_id: UserId },

    #[error("fuel wallet of {owner_id}: {required_cents} cents required, {balance_cents} held")]
    InsufficientFuel { owner_id: UserId, required_cents: Cents, balance_cents: Cents },

    #[error("yacht {0} not found")]
    YachtNotFound(YachtId),

    #[error("ownership record {0} not found")]
    RecordNotFound(RecordId),

    #[error("listing {0} not found")]
    ListingNotFound(ListingId),

    #[error("fuel wallet of {0} not found")]
    WalletNotFound(UserId),
}

impl EngineError {
    /// Conflicts expected under normal concurrent use, as opposed to
    /// caller bugs or rule violations
    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::ListingNoLongerAvailable { .. })
    }
}
