//! SQLite event store
//!
//! Supplies time-ordered market events in timestamp windows plus the static
//! asset registry used to seed a run's positions. All access goes through
//! parameterized queries. Events come back in storage order; the processor
//! is responsible for sorting.

use rusqlite::{Connection, OpenFlags};
use std::collections::HashMap;
use thiserror::Error;
use tracing::warn;

use crate::types::{AssetMeta, MarketEvent};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("event store query failed: {0}")]
    Query(#[from] rusqlite::Error),
}

/// Batched, time-windowed access to market events.
///
/// `fetch_events` covers the half-open window `[start, start + batch_size)`.
/// An empty vec means the window held no events, not end-of-data; callers
/// bound termination by the overall timestamp range instead.
#[cfg_attr(test, mockall::automock)]
pub trait EventSource {
    fn fetch_events(
        &mut self,
        start_timestamp: i64,
        batch_size: i64,
    ) -> Result<Vec<MarketEvent>, StoreError>;
}

/// Event store backed by a SQLite database produced by the ingest pipeline.
pub struct SqliteEventStore {
    conn: Connection,
}

impl SqliteEventStore {
    /// Open an existing database read-write (ingest helpers need writes).
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        Ok(Self { conn })
    }

    /// In-memory store, used by tests and ad hoc replays.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    /// Create the expected tables when pointing at a fresh database.
    pub fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS events (
                asset_id     INTEGER NOT NULL,
                kind         TEXT NOT NULL,
                quote_token  TEXT NOT NULL,
                base_price   REAL,
                token_price  REAL,
                timestamp    INTEGER NOT NULL,
                block_number INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events (timestamp);
            CREATE TABLE IF NOT EXISTS assets (
                asset_id         INTEGER PRIMARY KEY,
                name             TEXT,
                contract_address TEXT NOT NULL,
                description      TEXT,
                image_url        TEXT,
                call_timestamp   INTEGER NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Insert one event. Used for seeding test fixtures and small imports.
    pub fn insert_event(&self, event: &MarketEvent) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO events (asset_id, kind, quote_token, base_price, token_price, timestamp, block_number)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                event.asset_id,
                event.kind,
                event.quote_token,
                finite_or_null(event.base_price),
                finite_or_null(event.token_price),
                event.timestamp,
                event.block_number,
            ],
        )?;
        Ok(())
    }

    /// Insert one registry entry.
    pub fn insert_asset(&self, meta: &AssetMeta) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO assets (asset_id, name, contract_address, description, image_url, call_timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                meta.asset_id,
                meta.name,
                meta.contract_address,
                meta.description,
                meta.image_url,
                meta.call_timestamp,
            ],
        )?;
        Ok(())
    }

    /// Min/max event timestamp, or `None` when the store holds no events.
    pub fn time_range(&self) -> Result<Option<(i64, i64)>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT MIN(timestamp), MAX(timestamp) FROM events")?;
        let range = stmt.query_row([], |row| {
            let min_ts: Option<i64> = row.get(0)?;
            let max_ts: Option<i64> = row.get(1)?;
            Ok(min_ts.zip(max_ts))
        })?;
        Ok(range)
    }

    /// Load the full asset registry, keyed by asset id.
    ///
    /// Nullable display columns default to empty strings so a sparse
    /// registry row still seeds a usable position.
    pub fn list_assets(&self) -> Result<HashMap<u32, AssetMeta>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT asset_id, name, contract_address, description, image_url, call_timestamp
             FROM assets",
        )?;

        let mut assets = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok(AssetMeta {
                asset_id: row.get(0)?,
                name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                contract_address: row.get(2)?,
                description: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                image_url: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                call_timestamp: row.get(5)?,
            })
        })?;

        for row in rows {
            match row {
                Ok(meta) => {
                    assets.insert(meta.asset_id, meta);
                }
                Err(err) => warn!(error = %err, "skipping malformed registry row"),
            }
        }

        Ok(assets)
    }
}

impl EventSource for SqliteEventStore {
    fn fetch_events(
        &mut self,
        start_timestamp: i64,
        batch_size: i64,
    ) -> Result<Vec<MarketEvent>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT asset_id, kind, quote_token, base_price, token_price, timestamp, block_number
             FROM events WHERE timestamp >= ?1 AND timestamp < ?2",
        )?;

        let rows = stmt.query_map(
            rusqlite::params![start_timestamp, start_timestamp + batch_size],
            |row| {
                Ok(MarketEvent {
                    asset_id: row.get(0)?,
                    kind: row.get(1)?,
                    quote_token: row.get(2)?,
                    base_price: row.get::<_, Option<f64>>(3)?.unwrap_or(f64::NAN),
                    token_price: row.get::<_, Option<f64>>(4)?.unwrap_or(f64::NAN),
                    timestamp: row.get(5)?,
                    block_number: row.get(6)?,
                })
            },
        )?;

        let mut events = Vec::new();
        for row in rows {
            match row {
                Ok(event) => events.push(event),
                // Malformed rows are skipped; the batch keeps going.
                Err(err) => warn!(error = %err, "skipping malformed event row"),
            }
        }

        Ok(events)
    }
}

/// A preloaded, in-memory event source for tests and vector replays.
#[derive(Debug, Clone, Default)]
pub struct StaticEventSource {
    events: Vec<MarketEvent>,
}

impl StaticEventSource {
    pub fn new(events: Vec<MarketEvent>) -> Self {
        Self { events }
    }
}

impl EventSource for StaticEventSource {
    fn fetch_events(
        &mut self,
        start_timestamp: i64,
        batch_size: i64,
    ) -> Result<Vec<MarketEvent>, StoreError> {
        let end = start_timestamp + batch_size;
        Ok(self
            .events
            .iter()
            .filter(|e| e.timestamp >= start_timestamp && e.timestamp < end)
            .cloned()
            .collect())
    }
}

fn finite_or_null(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}
