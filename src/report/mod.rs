//! Result reporting
//!
//! Builds the artifacts persisted at the end of a run: a compacted wallet
//! snapshot and the discovery metadata written beside it. The snapshot is a
//! distinct value from the live ledger; producing it never mutates the run.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::simulator::wallet::{Position, Wallet};
use crate::types::{CustomOptions, TradeRecord};

/// Compacted end-of-run wallet snapshot.
///
/// Copy contract: every field is deep-copied from the live wallet. Positions
/// are filtered to those that traded (non-empty history) and their histories
/// are cleared — per-tick history is replay-transient and never persisted.
/// The valuation series is run-length compressed via [`compress_series`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletSnapshot {
    pub cash: f64,
    pub holdings_value_base: f64,
    pub holdings_value_quote: f64,
    pub total_value_quote: f64,
    pub positions: HashMap<u32, Position>,
    pub trades: Vec<TradeRecord>,
    pub valuation_series: BTreeMap<i64, f64>,
}

/// Discovery metadata written beside every result document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimMetadata {
    pub buy_amount: f64,
    pub tps: Vec<f64>,
    pub tp_amounts: Vec<f64>,
    pub custom_opts: CustomOptions,
    pub name: String,
    pub date: String,
    pub id: u32,
}

/// Build the reporting snapshot from a finished run's ledger.
pub fn snapshot_wallet(wallet: &Wallet) -> WalletSnapshot {
    let positions = wallet
        .positions
        .iter()
        .filter(|(_, position)| !position.trading_history.is_empty())
        .map(|(id, position)| {
            let mut retained = position.clone();
            retained.trading_history.clear();
            (*id, retained)
        })
        .collect();

    WalletSnapshot {
        cash: wallet.cash,
        holdings_value_base: wallet.holdings_value_base,
        holdings_value_quote: wallet.holdings_value_quote,
        total_value_quote: wallet.total_value_quote,
        positions,
        trades: wallet.trades.clone(),
        valuation_series: compress_series(&wallet.valuation_series),
    }
}

/// Run-length compression of a valuation series: the first sample is always
/// kept, and a later sample survives only when its value differs from the
/// immediately preceding one. Keys iterate in ascending numeric order, so a
/// source series assembled out of block order still compresses correctly.
pub fn compress_series(series: &BTreeMap<i64, f64>) -> BTreeMap<i64, f64> {
    let mut compressed = BTreeMap::new();
    let mut previous: Option<f64> = None;

    for (&block, &value) in series {
        if previous != Some(value) {
            compressed.insert(block, value);
        }
        previous = Some(value);
    }

    compressed
}
