//! Simulation engine
//!
//! The chronological event processor and the controller that drives it.
//! One `Simulation` owns one run end to end: it seeds the wallet from the
//! asset registry, replays event batches in block order, and hands the
//! finished ledger to the reporter. Progress is published through a shared
//! [`StatusHandle`] so the control API can poll without touching the run.

pub mod wallet;

use anyhow::{bail, Context, Result};
use chrono::{Local, TimeZone, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use crate::persistence::ResultStore;
use crate::report::{self, SimMetadata};
use crate::store::EventSource;
use crate::types::{AssetMeta, CustomOptions, MarketEvent, TradeRecord, TradeSide};
use wallet::Wallet;

/// Blocks that must elapse between queueing a take-profit and executing it.
const TP_EXECUTION_DELAY_BLOCKS: i64 = 3;
/// Cash that must remain available beyond the buy amount for a buy to fire.
const CASH_SAFETY_MARGIN: f64 = 0.1;
/// Buy-eligibility window around the signal call timestamp, in seconds.
const CALL_WINDOW_SECS: i64 = 2;
/// Fetch retries before a data-source outage fails the run.
const FETCH_RETRIES: u32 = 3;

/// Strategy configuration for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyParams {
    /// Cash spent per triggered signal, in base units.
    pub buy_amount: f64,
    /// Take-profit ladder as entry-price multipliers.
    pub tps: Vec<f64>,
    /// Fraction of the remaining balance sold at each ladder stage.
    pub tp_amounts: Vec<f64>,
    /// Slippage tolerance in percent for the delayed-execution gate.
    pub slippage_pct: f64,
    pub custom_opts: CustomOptions,
    pub starting_cash: f64,
    /// Timestamp window width requested per batch, in seconds.
    pub batch_size: i64,
    pub name: String,
    pub start_timestamp: i64,
    pub end_timestamp: i64,
}

impl StrategyParams {
    /// Reject parameter sets the engine's invariants cannot hold under.
    pub fn validate(&self) -> Result<()> {
        if self.buy_amount <= 0.0 {
            bail!("buy_amount must be positive");
        }
        if self.starting_cash < 0.0 {
            bail!("starting_cash must not be negative");
        }
        if self.tps.is_empty() {
            bail!("take-profit ladder must not be empty");
        }
        if self.tps.len() != self.tp_amounts.len() {
            bail!(
                "take-profit ladder mismatch: {} levels vs {} sell fractions",
                self.tps.len(),
                self.tp_amounts.len()
            );
        }
        if self.tps.iter().any(|tp| *tp <= 0.0) {
            bail!("take-profit multipliers must be positive");
        }
        if self
            .tp_amounts
            .iter()
            .any(|amount| *amount <= 0.0 || *amount > 1.0)
        {
            bail!("sell fractions must be within (0, 1]");
        }
        if self.slippage_pct < 0.0 {
            bail!("slippage_pct must not be negative");
        }
        if self.batch_size <= 0 {
            bail!("batch_size must be positive");
        }
        if self.start_timestamp > self.end_timestamp {
            bail!("start_timestamp must not exceed end_timestamp");
        }
        Ok(())
    }
}

/// Progress record exposed to pollers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimStatus {
    pub start_timestamp: i64,
    pub current_timestamp: i64,
    pub end_timestamp: i64,
    pub sim_name: String,
    pub done: bool,
    pub failed: bool,
}

/// Shared progress handle for one run.
///
/// The controller is the only writer; the control API reads snapshots. The
/// cancellation flag may be raised from any task and is honored at batch
/// boundaries.
#[derive(Debug, Default)]
pub struct StatusHandle {
    status: RwLock<SimStatus>,
    cancelled: AtomicBool,
}

impl StatusHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SimStatus {
        match self.status.read() {
            Ok(status) => status.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        let status = self.snapshot();
        status.done || status.failed
    }

    pub fn mark_failed(&self) {
        self.write(|status| status.failed = true);
    }

    fn init(&self, params: &StrategyParams) {
        self.write(|status| {
            status.start_timestamp = params.start_timestamp;
            status.current_timestamp = params.start_timestamp;
            status.end_timestamp = params.end_timestamp;
            status.sim_name = params.name.clone();
        });
    }

    fn set_current(&self, timestamp: i64) {
        self.write(|status| status.current_timestamp = timestamp);
    }

    fn mark_done(&self) {
        self.write(|status| status.done = true);
    }

    fn write(&self, update: impl FnOnce(&mut SimStatus)) {
        let mut status = match self.status.write() {
            Ok(status) => status,
            Err(poisoned) => poisoned.into_inner(),
        };
        update(&mut status);
    }
}

/// Running trade counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Statistics {
    pub total_buys: u32,
    pub total_sells: u32,
    pub total_spent: f64,
    pub total_received: f64,
}

/// One simulation run: controller, processor, and the ledger they share.
pub struct Simulation<S: EventSource> {
    source: S,
    params: StrategyParams,
    status: Arc<StatusHandle>,
    wallet: Wallet,
    stats: Statistics,
}

impl<S: EventSource> Simulation<S> {
    /// The wallet is seeded here, before any event can be processed, so the
    /// engine never observes an uninitialized ledger.
    pub fn new(
        source: S,
        assets: HashMap<u32, AssetMeta>,
        params: StrategyParams,
        status: Arc<StatusHandle>,
    ) -> Self {
        let wallet = Wallet::new(params.starting_cash, assets);
        Self {
            source,
            params,
            status,
            wallet,
            stats: Statistics::default(),
        }
    }

    pub fn stats(&self) -> Statistics {
        self.stats
    }

    /// Drive the replay loop to completion and persist the result.
    ///
    /// Returns the persisted metadata, or `None` when the run was cancelled
    /// before finishing (a cancelled run writes nothing).
    pub fn run(mut self, results: &ResultStore) -> Result<Option<SimMetadata>> {
        self.params
            .validate()
            .context("invalid strategy parameters")?;
        self.status.init(&self.params);

        info!(
            name = %self.params.name,
            start = self.params.start_timestamp,
            end = self.params.end_timestamp,
            assets = self.wallet.positions.len(),
            "simulation started"
        );

        let mut cursor = self.params.start_timestamp;
        while cursor <= self.params.end_timestamp {
            if self.status.is_cancelled() {
                info!(name = %self.params.name, cursor, "simulation cancelled");
                return Ok(None);
            }

            let events = self.fetch_batch(cursor)?;
            match self.process_batch(events) {
                // Progress: resume just past the last processed event.
                Some(last_timestamp) => cursor = last_timestamp + 1,
                // Empty window: skip it. End-of-data is decided by the
                // timestamp bound alone, never by an empty batch.
                None => cursor += self.params.batch_size,
            }
        }

        info!(
            name = %self.params.name,
            cash = self.wallet.cash,
            total_value_quote = self.wallet.total_value_quote,
            total_buys = self.stats.total_buys,
            total_sells = self.stats.total_sells,
            total_spent = self.stats.total_spent,
            total_received = self.stats.total_received,
            "simulation finished"
        );

        let snapshot = report::snapshot_wallet(&self.wallet);
        let metadata = results
            .save(&snapshot, &self.params)
            .context("persisting simulation result")?;

        // Completion is flagged only after the result is on disk.
        self.status.mark_done();
        Ok(Some(metadata))
    }

    fn fetch_batch(&mut self, cursor: i64) -> Result<Vec<MarketEvent>> {
        let mut attempt = 0;
        loop {
            match self.source.fetch_events(cursor, self.params.batch_size) {
                Ok(events) => return Ok(events),
                Err(err) if attempt < FETCH_RETRIES => {
                    attempt += 1;
                    warn!(error = %err, cursor, attempt, "event fetch failed, retrying");
                }
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("event fetch failed at cursor {cursor}"))
                }
            }
        }
    }

    /// Process one batch in non-decreasing block order and mutate the wallet
    /// in place. Returns the timestamp of the last event processed, or
    /// `None` when the batch held no events.
    fn process_batch(&mut self, mut events: Vec<MarketEvent>) -> Option<i64> {
        // Stable sort: same-block events keep their arrival order.
        events.sort_by_key(|event| event.block_number);

        let mut previous_block = 0i64;
        let mut last_timestamp = None;

        for event in &events {
            self.process_positions(event);

            // Full revaluation once per distinct block, not once per event.
            if previous_block != event.block_number {
                self.wallet.revalue(event.base_price, event.block_number);
            }

            previous_block = event.block_number;
            last_timestamp = Some(event.timestamp);
            self.status.set_current(event.timestamp);
        }

        last_timestamp
    }

    /// Position transitions for one event. Unknown assets and NaN prices
    /// skip trading; the caller still advances the valuation tick.
    fn process_positions(&mut self, event: &MarketEvent) {
        if !self.wallet.positions.contains_key(&event.asset_id) {
            return;
        }
        if event.token_price.is_nan() {
            return;
        }

        self.try_buy(event);
        self.step_take_profit(event);
    }

    /// Buy trigger: flat position, event inside the call window, cash above
    /// the buy amount plus the safety margin, and (when enabled) the local
    /// hour inside the trading session. Either every side effect commits or
    /// none do.
    fn try_buy(&mut self, event: &MarketEvent) {
        let buy_amount = self.params.buy_amount;
        {
            let Some(position) = self.wallet.positions.get(&event.asset_id) else {
                return;
            };
            if !position.is_flat() {
                return;
            }
            if (event.timestamp - position.meta.call_timestamp).abs() > CALL_WINDOW_SECS {
                return;
            }
            if self.wallet.cash <= buy_amount + CASH_SAFETY_MARGIN {
                return;
            }
            if self.params.custom_opts.ny_trading_times && !within_ny_session(event.timestamp) {
                return;
            }
        }

        let Some(position) = self.wallet.positions.get_mut(&event.asset_id) else {
            return;
        };
        position.balance = buy_amount / event.token_price;
        position.entry_price = event.token_price;
        position.tp_price = event.token_price * self.params.tps[0];

        self.wallet.cash -= buy_amount;
        self.wallet.trades.push(TradeRecord {
            block_number: event.block_number,
            side: TradeSide::Buy,
            cash_delta: -buy_amount,
            asset_id: event.asset_id,
            token_price: event.token_price,
        });
        self.stats.total_buys += 1;
        self.stats.total_spent += buy_amount;

        info!(
            asset_id = event.asset_id,
            block = event.block_number,
            price = event.token_price,
            amount = buy_amount,
            "signal bought"
        );
    }

    /// Take-profit state machine for a held position: queue on target cross,
    /// then execute after the block delay if the slippage gate passes, else
    /// drop the queue. A dropped queue is not retried; the price must cross
    /// the target again.
    fn step_take_profit(&mut self, event: &MarketEvent) {
        let mut proceeds = None;
        {
            let Some(position) = self.wallet.positions.get_mut(&event.asset_id) else {
                return;
            };
            if position.is_flat() {
                return;
            }

            if event.token_price > position.tp_price && !position.has_queued_tp() {
                position.queued_block = event.block_number;
                position.queued_price = event.token_price;
            }

            if position.has_queued_tp()
                && event.block_number - position.queued_block >= TP_EXECUTION_DELAY_BLOCKS
            {
                let drift_pct =
                    (event.token_price - position.queued_price) / position.queued_price * 100.0;

                if drift_pct.abs() <= self.params.slippage_pct {
                    let stage = position.tp_stage;
                    let sale_units = position.balance * self.params.tp_amounts[stage];
                    let sale_value = sale_units * event.token_price;

                    position.balance -= sale_units;
                    if stage + 1 < self.params.tps.len() {
                        position.tp_stage = stage + 1;
                        position.tp_price =
                            position.entry_price * self.params.tps[position.tp_stage];
                    }
                    position.clear_queue();
                    proceeds = Some(sale_value);

                    info!(
                        asset_id = event.asset_id,
                        stage = stage + 1,
                        block = event.block_number,
                        sale_value,
                        sell_pct = self.params.tp_amounts[stage] * 100.0,
                        "take-profit executed after block delay"
                    );
                } else {
                    // Slippage gate failed: drop the queue without selling.
                    position.clear_queue();
                }
            }

            position.mark_price = event.token_price;
            position
                .trading_history
                .insert(event.block_number, event.token_price);
        }

        if let Some(sale_value) = proceeds {
            self.wallet.cash += sale_value;
            self.wallet.trades.push(TradeRecord {
                block_number: event.block_number,
                side: TradeSide::Sell,
                cash_delta: sale_value,
                asset_id: event.asset_id,
                token_price: event.token_price,
            });
            self.stats.total_sells += 1;
            self.stats.total_received += sale_value;

            // Reflect realized proceeds without waiting for the next block.
            self.wallet.revalue(event.base_price, event.block_number);
        }
    }

    #[cfg(test)]
    fn wallet(&self) -> &Wallet {
        &self.wallet
    }
}

fn within_ny_session(timestamp: i64) -> bool {
    match Local.timestamp_opt(timestamp, 0) {
        chrono::LocalResult::Single(time) => (9..=16).contains(&time.hour()),
        _ => false,
    }
}
