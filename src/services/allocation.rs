//! Usage allocation tracking - days and engine hours per ownership record
//!
//! Converts share ownership into consumable annual entitlements and
//! enforces they are never over-drawn. This service is the only writer
//! of `days_remaining` / `engine_hours_remaining`; the ledger never
//! touches them.

use crate::domain::error::{EngineError, EngineResult};
use crate::domain::types::{OwnershipRecord, RecordId, UserId, YachtId};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

/// Days in one entitlement cycle
const CYCLE_DAYS: i64 = 365;

/// Consumable entitlement state for one ownership record
#[derive(Debug, Clone)]
pub struct UsageAllocation {
    pub record_id: RecordId,
    pub yacht_id: YachtId,
    pub owner_id: UserId,
    pub days_remaining: u32,
    pub engine_hours_remaining: f64,
    /// Anniversary anchor; the annual reset advances it by whole cycles
    pub cycle_started_at: DateTime<Utc>,
    /// Share count the current cycle's entitlement was computed from
    pub shares_basis: u32,
}

/// Owns entitlement seeding, consumption and the annual reset
pub struct AllocationTracker {
    allocations: RwLock<FxHashMap<RecordId, UsageAllocation>>,
    utilization_factor: f64,
    annual_engine_hours: f64,
}

impl AllocationTracker {
    pub fn new(utilization_factor: f64, annual_engine_hours: f64) -> Self {
        Self {
            allocations: RwLock::new(FxHashMap::default()),
            utilization_factor,
            annual_engine_hours,
        }
    }

    /// Full-cycle entitlement for `shares` of a yacht split `total_shares` ways
    pub fn full_entitlement(&self, shares: u32, total_shares: u32) -> (u32, f64) {
        if total_shares == 0 {
            return (0, 0.0);
        }
        let fraction = shares as f64 / total_shares as f64;
        let days = (CYCLE_DAYS as f64 * fraction * self.utilization_factor).round() as u32;
        let hours = self.annual_engine_hours * fraction;
        (days, hours)
    }

    /// Fraction of the cycle remaining at `now` for a cycle anchored at `anchor`
    fn remaining_fraction(anchor: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        let elapsed = (now - anchor).num_days().clamp(0, CYCLE_DAYS);
        (CYCLE_DAYS - elapsed) as f64 / CYCLE_DAYS as f64
    }

    /// Seed entitlements after a primary-market purchase.
    ///
    /// A new owner starts a fresh cycle with the full entitlement; an
    /// owner adding shares mid-cycle receives the added shares'
    /// entitlement pro-rated over the remainder of their current cycle.
    pub fn seed_purchase(
        &self,
        record: &OwnershipRecord,
        total_shares: u32,
        added_shares: u32,
        now: DateTime<Utc>,
    ) -> UsageAllocation {
        let mut allocations = self.allocations.write();
        let allocation = match allocations.get_mut(&record.id) {
            Some(existing) => {
                let (days, hours) = self.full_entitlement(added_shares, total_shares);
                let frac = Self::remaining_fraction(existing.cycle_started_at, now);
                existing.days_remaining += (days as f64 * frac).round() as u32;
                existing.engine_hours_remaining += hours * frac;
                existing.shares_basis = record.shares_owned;
                existing.clone()
            }
            None => {
                let (days, hours) = self.full_entitlement(record.shares_owned, total_shares);
                let allocation = UsageAllocation {
                    record_id: record.id,
                    yacht_id: record.yacht_id,
                    owner_id: record.owner_id,
                    days_remaining: days,
                    engine_hours_remaining: hours,
                    cycle_started_at: now,
                    shares_basis: record.shares_owned,
                };
                allocations.insert(record.id, allocation.clone());
                allocation
            }
        };

        info!(
            record_id = %record.id,
            owner_id = %record.owner_id,
            days_remaining = %allocation.days_remaining,
            engine_hours_remaining = %allocation.engine_hours_remaining,
            "allocation_seeded"
        );
        allocation
    }

    /// Seed entitlements for shares acquired from another owner mid-cycle.
    ///
    /// The buyer receives a pro-rated entitlement for the remainder of
    /// the current annual period and inherits the cycle anchor, so both
    /// sides reset at the same anniversary.
    pub fn grant_transfer(
        &self,
        record: &OwnershipRecord,
        total_shares: u32,
        added_shares: u32,
        cycle_anchor: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> UsageAllocation {
        let mut allocations = self.allocations.write();
        let (days, hours) = self.full_entitlement(added_shares, total_shares);

        let allocation = match allocations.get_mut(&record.id) {
            Some(existing) => {
                let frac = Self::remaining_fraction(existing.cycle_started_at, now);
                existing.days_remaining += (days as f64 * frac).round() as u32;
                existing.engine_hours_remaining += hours * frac;
                existing.shares_basis = record.shares_owned;
                existing.clone()
            }
            None => {
                let frac = Self::remaining_fraction(cycle_anchor, now);
                let allocation = UsageAllocation {
                    record_id: record.id,
                    yacht_id: record.yacht_id,
                    owner_id: record.owner_id,
                    days_remaining: (days as f64 * frac).round() as u32,
                    engine_hours_remaining: hours * frac,
                    cycle_started_at: cycle_anchor,
                    shares_basis: record.shares_owned,
                };
                allocations.insert(record.id, allocation.clone());
                allocation
            }
        };

        info!(
            record_id = %record.id,
            owner_id = %record.owner_id,
            days_remaining = %allocation.days_remaining,
            engine_hours_remaining = %allocation.engine_hours_remaining,
            "allocation_granted_prorated"
        );
        allocation
    }

    /// Consume usage, with a commit hook that runs between the
    /// availability check and the decrement.
    ///
    /// The hook (the engine charges the fuel wallet there) runs under
    /// the allocation lock: if it errors, nothing is decremented; once
    /// it succeeds, both dimensions decrement atomically.
    pub fn consume_guarded<T>(
        &self,
        record_id: RecordId,
        days: u32,
        engine_hours: f64,
        commit: impl FnOnce() -> EngineResult<T>,
    ) -> EngineResult<(UsageAllocation, T)> {
        let mut allocations = self.allocations.write();
        let allocation =
            allocations.get_mut(&record_id).ok_or(EngineError::RecordNotFound(record_id))?;

        if days > allocation.days_remaining || engine_hours > allocation.engine_hours_remaining {
            return Err(EngineError::InsufficientAllocation {
                record_id,
                days_requested: days,
                hours_requested: engine_hours,
                days_remaining: allocation.days_remaining,
                hours_remaining: allocation.engine_hours_remaining,
            });
        }

        let outcome = commit()?;

        allocation.days_remaining -= days;
        allocation.engine_hours_remaining -= engine_hours;

        info!(
            record_id = %record_id,
            days = %days,
            engine_hours = %engine_hours,
            days_remaining = %allocation.days_remaining,
            engine_hours_remaining = %allocation.engine_hours_remaining,
            "usage_consumed"
        );

        Ok((allocation.clone(), outcome))
    }

    /// Consume usage with no commit hook
    pub fn consume(
        &self,
        record_id: RecordId,
        days: u32,
        engine_hours: f64,
    ) -> EngineResult<UsageAllocation> {
        self.consume_guarded(record_id, days, engine_hours, || Ok(()))
            .map(|(allocation, ())| allocation)
    }

    /// Anniversary reset, driven by the external scheduler.
    ///
    /// Idempotent: acts only when a full cycle has elapsed since the
    /// anchor, advances the anchor by whole cycles, and restores the
    /// full entitlement for the *current* share count. Mid-cycle calls
    /// return the allocation unchanged.
    pub fn reset_annual(
        &self,
        record_id: RecordId,
        current_shares: u32,
        total_shares: u32,
        now: DateTime<Utc>,
    ) -> EngineResult<(UsageAllocation, bool)> {
        let mut allocations = self.allocations.write();
        let allocation =
            allocations.get_mut(&record_id).ok_or(EngineError::RecordNotFound(record_id))?;

        if now < allocation.cycle_started_at + Duration::days(CYCLE_DAYS) {
            return Ok((allocation.clone(), false));
        }

        while now >= allocation.cycle_started_at + Duration::days(CYCLE_DAYS) {
            allocation.cycle_started_at += Duration::days(CYCLE_DAYS);
        }

        let (days, hours) = self.full_entitlement(current_shares, total_shares);
        allocation.days_remaining = days;
        allocation.engine_hours_remaining = hours;
        allocation.shares_basis = current_shares;

        info!(
            record_id = %record_id,
            days_remaining = %days,
            engine_hours_remaining = %hours,
            cycle_started_at = %allocation.cycle_started_at,
            "allocation_reset"
        );

        Ok((allocation.clone(), true))
    }

    /// Drop the allocation of a fully divested record
    pub fn clear(&self, record_id: RecordId) {
        if self.allocations.write().remove(&record_id).is_some() {
            debug!(record_id = %record_id, "allocation_cleared");
        }
    }

    pub fn allocation(&self, record_id: RecordId) -> Option<UsageAllocation> {
        self.allocations.read().get(&record_id).cloned()
    }

    /// Cycle anchor for a record, if it has an allocation
    pub fn cycle_start(&self, record_id: RecordId) -> Option<DateTime<Utc>> {
        self.allocations.read().get(&record_id).map(|a| a.cycle_started_at)
    }
}
