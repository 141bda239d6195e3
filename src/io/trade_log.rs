//! Trade log - writes settled trades to file
//!
//! Trades are written in JSONL format (one JSON object per line)
//! to the file specified in config. This is the durable audit record
//! the marketplace history views are built from.

use crate::domain::types::{Cents, ListingId, TradeId, UserId, YachtId};
use crate::io::events::SaleChannel;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{error, info};

/// One settled transfer of shares
#[derive(Debug, Clone, Serialize)]
pub struct TradeRecord {
    pub trade_id: TradeId,
    pub ts: DateTime<Utc>,
    pub yacht_id: YachtId,
    /// Absent for primary-market purchases
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listing_id: Option<ListingId>,
    /// Absent for primary-market purchases (the operator is the seller)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seller_id: Option<UserId>,
    pub buyer_id: UserId,
    pub shares: u32,
    pub price_per_share_cents: Cents,
    pub channel: SaleChannel,
}

impl TradeRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        yacht_id: YachtId,
        listing_id: Option<ListingId>,
        seller_id: Option<UserId>,
        buyer_id: UserId,
        shares: u32,
        price_per_share_cents: Cents,
        channel: SaleChannel,
        ts: DateTime<Utc>,
    ) -> Self {
        Self {
            trade_id: TradeId::new(),
            ts,
            yacht_id,
            listing_id,
            seller_id,
            buyer_id,
            shares,
            price_per_share_cents,
            channel,
        }
    }
}

/// Append-only writer for settled trades
pub struct TradeLog {
    file_path: String,
}

impl TradeLog {
    pub fn new(file_path: &str) -> Self {
        info!(file_path = %file_path, "trade_log_initialized");
        Self { file_path: file_path.to_string() }
    }

    /// Write a trade to the log file
    /// Returns true if successful, false otherwise
    pub fn append(&self, trade: &TradeRecord) -> bool {
        let json = match serde_json::to_string(trade) {
            Ok(json) => json,
            Err(e) => {
                error!(trade_id = %trade.trade_id, error = %e, "trade_serialize_failed");
                return false;
            }
        };

        match self.append_line(&json) {
            Ok(()) => {
                info!(
                    trade_id = %trade.trade_id,
                    yacht_id = %trade.yacht_id,
                    buyer_id = %trade.buyer_id,
                    shares = %trade.shares,
                    channel = %trade.channel.as_str(),
                    "trade_logged"
                );
                true
            }
            Err(e) => {
                error!(
                    trade_id = %trade.trade_id,
                    error = %e,
                    "trade_log_write_failed"
                );
                false
            }
        }
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_trade() -> TradeRecord {
        TradeRecord::new(
            YachtId::new(),
            Some(ListingId::new()),
            Some(UserId::new()),
            UserId::new(),
            1,
            14_500_000,
            SaleChannel::Public,
            Utc::now(),
        )
    }

    #[test]
    fn test_append_writes_one_line_per_trade() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trades.jsonl");
        let log = TradeLog::new(path.to_str().unwrap());

        assert!(log.append(&sample_trade()));
        assert!(log.append(&sample_trade()));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["shares"], 1);
        assert_eq!(parsed["channel"], "public");
        assert!(parsed["listing_id"].is_string());
    }

    #[test]
    fn test_primary_trade_omits_seller() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trades.jsonl");
        let log = TradeLog::new(path.to_str().unwrap());

        let trade = TradeRecord::new(
            YachtId::new(),
            None,
            None,
            UserId::new(),
            2,
            13_000_000,
            SaleChannel::Primary,
            Utc::now(),
        );
        assert!(log.append(&trade));

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert!(parsed.get("seller_id").is_none());
        assert!(parsed.get("listing_id").is_none());
        assert_eq!(parsed["channel"], "primary");
    }
}
