//! Core types used throughout sigsim
//!
//! Defines the market-event and asset-metadata structures shared by the
//! event store, the simulation engine, and the reporting layer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One market observation from the event stream. Immutable once read.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketEvent {
    /// Registry key of the asset this event belongs to.
    pub asset_id: u32,
    /// Display type as recorded by the ingest pipeline (e.g. "swap").
    pub kind: String,
    /// Quote token symbol for this venue.
    pub quote_token: String,
    /// Quote-currency value of one base unit at this event.
    pub base_price: f64,
    /// Asset price expressed in base units.
    pub token_price: f64,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
    /// Monotonic ordering key within a venue; the simulation's logical clock.
    pub block_number: i64,
}

/// Static per-asset metadata, loaded once per run from the registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetMeta {
    pub asset_id: u32,
    pub name: String,
    pub contract_address: String,
    pub description: String,
    pub image_url: String,
    /// Signal timestamp; defines the buy-eligibility window.
    pub call_timestamp: i64,
}

/// Side of an executed trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeSide::Buy => write!(f, "BUY"),
            TradeSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Executed trade, appended to the wallet's trade log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub block_number: i64,
    #[serde(rename = "type")]
    pub side: TradeSide,
    /// Signed cash movement in base units (negative for buys).
    pub cash_delta: f64,
    pub asset_id: u32,
    pub token_price: f64,
}

/// Behavior toggles carried through to the result metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomOptions {
    /// Restrict buys to the New York cash session (09:00-16:59 local).
    #[serde(default)]
    pub ny_trading_times: bool,
}
