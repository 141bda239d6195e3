//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `engine` - Central operation orchestrator composing the services below
//! - `ledger` - Authoritative share accounting per yacht
//! - `rofr` - Listing lifecycle and right-of-first-refusal windows
//! - `allocation` - Usage-day and engine-hour entitlement tracking
//! - `waitlist` - Priority-ordered demand queue with offers
//! - `fuel_wallets` - Prepaid fuel-credit wallets

pub mod allocation;
pub mod engine;
pub mod fuel_wallets;
pub mod ledger;
pub mod rofr;
pub mod waitlist;

// Re-export commonly used types
pub use allocation::{AllocationTracker, UsageAllocation};
pub use engine::Engine;
pub use fuel_wallets::{FuelWallet, FuelWallets};
pub use ledger::ShareLedger;
pub use rofr::RofrManager;
pub use waitlist::{Waitlist, WaitlistOffer};
