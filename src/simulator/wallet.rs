//! Wallet ledger
//!
//! Cash balance, per-asset position state, the append-only trade log, and
//! the valuation time series for one simulation run. The ledger is owned
//! exclusively by its run task; the processor is the only writer.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::types::{AssetMeta, TradeRecord};

/// Per-asset position state, seeded flat from the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    #[serde(flatten)]
    pub meta: AssetMeta,
    pub entry_price: f64,
    /// Current take-profit target (entry price x active ladder multiplier).
    pub tp_price: f64,
    /// Index into the take-profit ladder; always < ladder length.
    pub tp_stage: usize,
    /// Block at which price first crossed the active target; 0 = none queued.
    pub queued_block: i64,
    /// Price observed when the take-profit was queued.
    pub queued_price: f64,
    /// Last observed market price.
    pub mark_price: f64,
    /// Asset units held; 0 = flat.
    pub balance: f64,
    /// Block -> observed price, populated only while the position is held.
    pub trading_history: BTreeMap<i64, f64>,
}

impl Position {
    pub fn new(meta: AssetMeta) -> Self {
        Self {
            meta,
            entry_price: 0.0,
            tp_price: 0.0,
            tp_stage: 0,
            queued_block: 0,
            queued_price: 0.0,
            mark_price: 0.0,
            balance: 0.0,
            trading_history: BTreeMap::new(),
        }
    }

    pub fn is_flat(&self) -> bool {
        self.balance == 0.0
    }

    pub fn has_queued_tp(&self) -> bool {
        self.queued_block != 0
    }

    pub fn clear_queue(&mut self) {
        self.queued_block = 0;
        self.queued_price = 0.0;
    }
}

/// The shared ledger for one run: cash plus every seeded position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    /// Cash balance in base units.
    pub cash: f64,
    /// Mark-to-market value of all held positions, in base units.
    pub holdings_value_base: f64,
    /// Same holdings expressed in quote currency.
    pub holdings_value_quote: f64,
    /// Holdings plus cash, in quote currency.
    pub total_value_quote: f64,
    pub positions: HashMap<u32, Position>,
    /// Append-only log of executed trades.
    pub trades: Vec<TradeRecord>,
    /// Block -> portfolio value in quote currency.
    pub valuation_series: BTreeMap<i64, f64>,
}

impl Wallet {
    /// Seed a fresh ledger with full starting cash and one flat position
    /// per registry entry.
    pub fn new(starting_cash: f64, assets: HashMap<u32, AssetMeta>) -> Self {
        let positions = assets
            .into_iter()
            .map(|(id, meta)| (id, Position::new(meta)))
            .collect();

        Self {
            cash: starting_cash,
            holdings_value_base: 0.0,
            holdings_value_quote: 0.0,
            total_value_quote: 0.0,
            positions,
            trades: Vec::new(),
            valuation_series: BTreeMap::new(),
        }
    }

    /// Full mark-to-market revaluation at the given block.
    ///
    /// The valuation-series sample is skipped when any component is
    /// non-finite, so one NaN tick cannot poison the persisted series.
    pub fn revalue(&mut self, base_price: f64, block_number: i64) {
        let holdings_base: f64 = self
            .positions
            .values()
            .map(|p| p.balance * p.mark_price)
            .sum();

        self.holdings_value_base = holdings_base;
        self.holdings_value_quote = holdings_base * base_price;
        self.total_value_quote = self.holdings_value_quote + self.cash * base_price;

        let sample = (holdings_base + self.cash) * base_price;
        if sample.is_finite() {
            self.valuation_series.insert(block_number, sample);
        }
    }
}
