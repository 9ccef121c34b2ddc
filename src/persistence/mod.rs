//! Result persistence
//!
//! Writes one finished run as a pair of JSON documents — the wallet
//! snapshot under `<id>.json` and its discovery metadata under
//! `<id>.json_meta` — plus a flat CSV export of the trade log. Listing
//! scans the metadata documents; loading returns the raw snapshot bytes.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use rand::Rng;
use std::fs;
use std::path::PathBuf;
use tracing::warn;

use crate::report::{SimMetadata, WalletSnapshot};
use crate::simulator::StrategyParams;
use crate::types::TradeRecord;

/// Inclusive range of the 9-digit run identifier.
const ID_RANGE: std::ops::RangeInclusive<u32> = 111_111_111..=999_999_999;

/// On-disk store for finished simulation results.
#[derive(Debug, Clone)]
pub struct ResultStore {
    out_dir: PathBuf,
}

impl ResultStore {
    pub fn new(out_dir: &str) -> Result<Self> {
        let out_dir = PathBuf::from(out_dir);
        fs::create_dir_all(&out_dir)
            .with_context(|| format!("Failed to create output directory {}", out_dir.display()))?;
        Ok(Self { out_dir })
    }

    /// Persist one finished run and return its metadata.
    ///
    /// A failure anywhere here is fatal to the run: a half-written result
    /// is worse than none.
    pub fn save(&self, snapshot: &WalletSnapshot, params: &StrategyParams) -> Result<SimMetadata> {
        let id = self.allocate_id();
        let metadata = SimMetadata {
            buy_amount: params.buy_amount,
            tps: params.tps.clone(),
            tp_amounts: params.tp_amounts.clone(),
            custom_opts: params.custom_opts,
            name: params.name.clone(),
            date: Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            id,
        };

        let snapshot_json =
            serde_json::to_vec_pretty(snapshot).context("Failed to serialize wallet snapshot")?;
        let metadata_json =
            serde_json::to_vec_pretty(&metadata).context("Failed to serialize run metadata")?;

        let result_path = self.result_path(id);
        fs::write(&result_path, snapshot_json)
            .with_context(|| format!("Failed to write {}", result_path.display()))?;

        let meta_path = self.meta_path(id);
        fs::write(&meta_path, metadata_json)
            .with_context(|| format!("Failed to write {}", meta_path.display()))?;

        self.write_trades_csv(id, &snapshot.trades)?;

        Ok(metadata)
    }

    /// All discoverable runs, in directory order. Unreadable or stale
    /// metadata documents are skipped with a warning rather than failing
    /// the listing.
    pub fn list(&self) -> Result<Vec<SimMetadata>> {
        let entries = fs::read_dir(&self.out_dir)
            .with_context(|| format!("Failed to read {}", self.out_dir.display()))?;

        let mut runs = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| {
                format!("Failed to read entry in {}", self.out_dir.display())
            })?;
            let path = entry.path();
            if !path.is_file()
                || path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| ext != "json_meta")
                    .unwrap_or(true)
            {
                continue;
            }

            let data = match fs::read(&path) {
                Ok(data) => data,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable metadata");
                    continue;
                }
            };
            match serde_json::from_slice::<SimMetadata>(&data) {
                Ok(metadata) => runs.push(metadata),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping malformed metadata");
                }
            }
        }

        Ok(runs)
    }

    /// Raw snapshot bytes for one run id, or `None` when no such result
    /// exists. The id must be a bare number; anything else is rejected so
    /// a crafted id can never traverse outside the output directory.
    pub fn load_raw(&self, id: &str) -> Result<Option<Vec<u8>>> {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
            bail!("result id must be numeric");
        }

        let path = self.out_dir.join(format!("{id}.json"));
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => {
                Err(err).with_context(|| format!("Failed to read {}", path.display()))
            }
        }
    }

    /// Draw 9-digit ids until one is free. Collisions are only probable
    /// enough to matter across concurrent runs, hence the existence check.
    fn allocate_id(&self) -> u32 {
        let mut rng = rand::thread_rng();
        loop {
            let id = rng.gen_range(ID_RANGE);
            if !self.result_path(id).exists() {
                return id;
            }
        }
    }

    fn write_trades_csv(&self, id: u32, trades: &[TradeRecord]) -> Result<()> {
        let path = self.out_dir.join(format!("{id}_trades.csv"));
        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        for trade in trades {
            writer
                .serialize(trade)
                .context("Failed to serialize trade record")?;
        }
        writer.flush().context("Failed to flush trade CSV")?;
        Ok(())
    }

    fn result_path(&self, id: u32) -> PathBuf {
        self.out_dir.join(format!("{id}.json"))
    }

    fn meta_path(&self, id: u32) -> PathBuf {
        self.out_dir.join(format!("{id}.json_meta"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CustomOptions, TradeSide};
    use std::collections::{BTreeMap, HashMap};

    fn temp_store() -> ResultStore {
        let dir = std::env::temp_dir().join(format!(
            "sigsim-persist-{}-{}",
            std::process::id(),
            rand::random::<u64>()
        ));
        ResultStore::new(dir.to_str().unwrap()).unwrap()
    }

    fn params() -> StrategyParams {
        StrategyParams {
            buy_amount: 0.2,
            tps: vec![2.0, 10.0],
            tp_amounts: vec![0.5, 1.0],
            slippage_pct: 10.0,
            custom_opts: CustomOptions::default(),
            starting_cash: 100.0,
            batch_size: 100,
            name: "persist-test".into(),
            start_timestamp: 0,
            end_timestamp: 10,
        }
    }

    fn snapshot() -> WalletSnapshot {
        WalletSnapshot {
            cash: 99.8,
            holdings_value_base: 0.2,
            holdings_value_quote: 30.0,
            total_value_quote: 15_000.0,
            positions: HashMap::new(),
            trades: vec![TradeRecord {
                block_number: 1,
                side: TradeSide::Buy,
                cash_delta: -0.2,
                asset_id: 1,
                token_price: 1.0,
            }],
            valuation_series: BTreeMap::from([(1, 15_000.0)]),
        }
    }

    #[test]
    fn save_then_list_then_load() {
        let store = temp_store();
        let metadata = store.save(&snapshot(), &params()).unwrap();

        assert!(ID_RANGE.contains(&metadata.id));
        assert_eq!(metadata.id.to_string().len(), 9);
        assert_eq!(metadata.name, "persist-test");

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0], metadata);

        let raw = store.load_raw(&metadata.id.to_string()).unwrap().unwrap();
        let restored: WalletSnapshot = serde_json::from_slice(&raw).unwrap();
        assert_eq!(restored, snapshot());
    }

    #[test]
    fn trade_log_csv_is_written_beside_the_result() {
        let store = temp_store();
        let metadata = store.save(&snapshot(), &params()).unwrap();

        let csv_path = store.out_dir.join(format!("{}_trades.csv", metadata.id));
        let contents = fs::read_to_string(csv_path).unwrap();
        assert!(contents.contains("BUY"));
        assert!(contents.contains("block_number"));
    }

    #[test]
    fn missing_result_loads_as_none() {
        let store = temp_store();
        assert!(store.load_raw("123456789").unwrap().is_none());
    }

    #[test]
    fn non_numeric_ids_are_rejected() {
        let store = temp_store();
        assert!(store.load_raw("../etc/passwd").is_err());
        assert!(store.load_raw("").is_err());
        assert!(store.load_raw("12a").is_err());
    }

    #[test]
    fn listing_skips_malformed_metadata() {
        let store = temp_store();
        store.save(&snapshot(), &params()).unwrap();
        fs::write(store.out_dir.join("broken.json_meta"), b"not json").unwrap();

        assert_eq!(store.list().unwrap().len(), 1);
    }
}
