//! Domain models - core business types for share ownership
//!
//! This module contains the canonical data types used throughout the engine:
//! - `Yacht` - a yacht whose ownership is partitioned into shares
//! - `OwnershipRecord` - a user's holding of shares in one yacht
//! - `ShareListing` - a seller's offer, with its sale state machine
//! - `WaitlistEntry` - a queued prospective buyer
//! - `EngineError` - the typed error taxonomy for all operations

pub mod error;
pub mod listing;
pub mod types;
