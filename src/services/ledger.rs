//! Share ledger - authoritative owner-of-record for yacht shares
//!
//! The ledger exclusively owns `Yacht` and `OwnershipRecord` mutation.
//! All mutating operations run under a single write lock, which is the
//! transaction boundary: a transfer either updates both records or
//! neither. Shares backing an open listing are reserved so the share
//! conservation invariant (`available + Σ owned == total`) and the
//! listing invariant (`shares_for_sale <= seller.shares_owned`) cannot
//! be violated by a concurrent transfer.

use crate::domain::error::{EngineError, EngineResult};
use crate::domain::types::{Cents, OwnershipRecord, RecordId, UserId, Yacht, YachtId};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::info;

#[derive(Default)]
struct LedgerState {
    yachts: FxHashMap<YachtId, Yacht>,
    records: FxHashMap<RecordId, OwnershipRecord>,
}

impl LedgerState {
    fn record_for_owner(&mut self, yacht_id: YachtId, owner_id: UserId) -> Option<&mut OwnershipRecord> {
        self.records
            .values_mut()
            .find(|r| r.yacht_id == yacht_id && r.owner_id == owner_id)
    }

    /// Credit `count` shares to the buyer, creating a record if needed.
    /// Returns the id of the touched record.
    fn credit_buyer(
        &mut self,
        yacht_id: YachtId,
        buyer_id: UserId,
        count: u32,
        price_per_share_cents: Cents,
        now: DateTime<Utc>,
    ) -> RecordId {
        if let Some(record) = self.record_for_owner(yacht_id, buyer_id) {
            record.shares_owned += count;
            record.purchase_price_cents += count as Cents * price_per_share_cents;
            record.id
        } else {
            let record = OwnershipRecord::new(
                yacht_id,
                buyer_id,
                count,
                count as Cents * price_per_share_cents,
                now,
            );
            let id = record.id;
            self.records.insert(id, record);
            id
        }
    }
}

/// Authoritative share accounting for all yachts
pub struct ShareLedger {
    state: RwLock<LedgerState>,
}

impl ShareLedger {
    pub fn new() -> Self {
        Self { state: RwLock::new(LedgerState::default()) }
    }

    /// Issue the share partition for a yacht.
    ///
    /// Fails with `AlreadyInitialized` if shares already exist for the
    /// yacht id. `total_shares` is immutable afterwards.
    pub fn create_yacht_shares(&self, yacht: Yacht) -> EngineResult<Yacht> {
        let mut state = self.state.write();
        if state.yachts.contains_key(&yacht.id) {
            return Err(EngineError::AlreadyInitialized { yacht_id: yacht.id });
        }

        info!(
            yacht_id = %yacht.id,
            name = %yacht.name,
            total_shares = %yacht.total_shares,
            share_price_cents = %yacht.share_price_cents,
            "yacht_shares_created"
        );

        state.yachts.insert(yacht.id, yacht.clone());
        Ok(yacht)
    }

    /// Purchase shares from the yacht's unsold pool.
    ///
    /// Decrements `available_shares` and creates or extends the buyer's
    /// ownership record in one transaction. Returns the updated record
    /// and whether it was newly created.
    pub fn purchase_shares(
        &self,
        yacht_id: YachtId,
        buyer_id: UserId,
        count: u32,
        price_per_share_cents: Cents,
        now: DateTime<Utc>,
    ) -> EngineResult<(OwnershipRecord, bool)> {
        let mut state = self.state.write();

        let yacht = state.yachts.get_mut(&yacht_id).ok_or(EngineError::YachtNotFound(yacht_id))?;
        if count > yacht.available_shares {
            return Err(EngineError::InsufficientShares {
                yacht_id,
                requested: count,
                available: yacht.available_shares,
            });
        }
        yacht.available_shares -= count;

        let existed = state.record_for_owner(yacht_id, buyer_id).is_some();
        let record_id = state.credit_buyer(yacht_id, buyer_id, count, price_per_share_cents, now);
        let record = state.records[&record_id].clone();

        info!(
            yacht_id = %yacht_id,
            buyer_id = %buyer_id,
            record_id = %record.id,
            shares = %count,
            price_per_share_cents = %price_per_share_cents,
            shares_owned = %record.shares_owned,
            "shares_purchased"
        );

        Ok((record, !existed))
    }

    /// Move shares between owners, atomic across both records.
    ///
    /// Fails with `OverTransfer` if `count` exceeds the seller's
    /// transferable (unreserved) shares; nothing is mutated on failure.
    pub fn transfer_shares(
        &self,
        from_record_id: RecordId,
        to_buyer_id: UserId,
        count: u32,
        price_per_share_cents: Cents,
        now: DateTime<Utc>,
    ) -> EngineResult<(OwnershipRecord, OwnershipRecord)> {
        let mut state = self.state.write();
        self.transfer_locked(&mut state, from_record_id, to_buyer_id, count, price_per_share_cents, now, false)
    }

    /// Settle a transfer of previously reserved shares (listing settlement).
    ///
    /// The reservation guarantees the shares are present, so this cannot
    /// fail on share count once the listing exists.
    pub fn transfer_reserved(
        &self,
        from_record_id: RecordId,
        to_buyer_id: UserId,
        count: u32,
        price_per_share_cents: Cents,
        now: DateTime<Utc>,
    ) -> EngineResult<(OwnershipRecord, OwnershipRecord)> {
        let mut state = self.state.write();
        self.transfer_locked(&mut state, from_record_id, to_buyer_id, count, price_per_share_cents, now, true)
    }

    #[allow(clippy::too_many_arguments)]
    fn transfer_locked(
        &self,
        state: &mut LedgerState,
        from_record_id: RecordId,
        to_buyer_id: UserId,
        count: u32,
        price_per_share_cents: Cents,
        now: DateTime<Utc>,
        from_reserved: bool,
    ) -> EngineResult<(OwnershipRecord, OwnershipRecord)> {
        let from = state
            .records
            .get_mut(&from_record_id)
            .ok_or(EngineError::RecordNotFound(from_record_id))?;

        let budget = if from_reserved { from.shares_reserved } else { from.shares_transferable() };
        if count > budget {
            return Err(EngineError::OverTransfer {
                record_id: from_record_id,
                requested: count,
                transferable: budget,
            });
        }

        from.shares_owned -= count;
        if from_reserved {
            from.shares_reserved -= count;
        }
        let yacht_id = from.yacht_id;
        let seller_id = from.owner_id;
        let from_snapshot = from.clone();

        let to_record_id =
            state.credit_buyer(yacht_id, to_buyer_id, count, price_per_share_cents, now);
        let to_snapshot = state.records[&to_record_id].clone();

        info!(
            yacht_id = %yacht_id,
            seller_id = %seller_id,
            buyer_id = %to_buyer_id,
            shares = %count,
            price_per_share_cents = %price_per_share_cents,
            seller_remaining = %from_snapshot.shares_owned,
            "shares_transferred"
        );

        Ok((from_snapshot, to_snapshot))
    }

    /// Reserve shares against an open listing
    pub fn reserve_shares(&self, record_id: RecordId, count: u32) -> EngineResult<OwnershipRecord> {
        let mut state = self.state.write();
        let record =
            state.records.get_mut(&record_id).ok_or(EngineError::RecordNotFound(record_id))?;
        if count > record.shares_transferable() {
            return Err(EngineError::OverTransfer {
                record_id,
                requested: count,
                transferable: record.shares_transferable(),
            });
        }
        record.shares_reserved += count;
        Ok(record.clone())
    }

    /// Release a reservation (listing cancelled or partially settled)
    pub fn release_shares(&self, record_id: RecordId, count: u32) -> EngineResult<OwnershipRecord> {
        let mut state = self.state.write();
        let record =
            state.records.get_mut(&record_id).ok_or(EngineError::RecordNotFound(record_id))?;
        record.shares_reserved = record.shares_reserved.saturating_sub(count);
        Ok(record.clone())
    }

    pub fn yacht(&self, yacht_id: YachtId) -> Option<Yacht> {
        self.state.read().yachts.get(&yacht_id).cloned()
    }

    pub fn record(&self, record_id: RecordId) -> Option<OwnershipRecord> {
        self.state.read().records.get(&record_id).cloned()
    }

    pub fn record_for_owner(&self, yacht_id: YachtId, owner_id: UserId) -> Option<OwnershipRecord> {
        self.state
            .read()
            .records
            .values()
            .find(|r| r.yacht_id == yacht_id && r.owner_id == owner_id)
            .cloned()
    }

    /// Current co-owners of a yacht, excluding one user (the seller)
    pub fn co_owners(&self, yacht_id: YachtId, excluding: UserId) -> Vec<UserId> {
        self.state
            .read()
            .records
            .values()
            .filter(|r| r.yacht_id == yacht_id && r.shares_owned > 0 && r.owner_id != excluding)
            .map(|r| r.owner_id)
            .collect()
    }

    pub fn yacht_count(&self) -> usize {
        self.state.read().yachts.len()
    }

    /// Share conservation check: `(available + Σ owned, total)` for a yacht.
    ///
    /// The two numbers are equal after every operation; exposed for
    /// audits to assert it.
    pub fn audit_share_count(&self, yacht_id: YachtId) -> Option<(u32, u32)> {
        let state = self.state.read();
        let yacht = state.yachts.get(&yacht_id)?;
        let owned: u32 = state
            .records
            .values()
            .filter(|r| r.yacht_id == yacht_id)
            .map(|r| r.shares_owned)
            .sum();
        Some((yacht.available_shares + owned, yacht.total_shares))
    }
}

impl Default for ShareLedger {
    fn default() -> Self {
        Self::new()
    }
}
