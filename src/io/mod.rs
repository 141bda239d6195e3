//! IO modules - external system interfaces
//!
//! This module contains the engine's outward-facing IO:
//! - `events` - Typed fire-and-forget channel for notification events
//! - `trade_log` - Settled-trade output to file (JSONL format)

pub mod events;
pub mod trade_log;

// Re-export commonly used types
pub use events::{create_event_channel, EngineEvent, EventSender, SaleChannel};
pub use trade_log::{TradeLog, TradeRecord};
