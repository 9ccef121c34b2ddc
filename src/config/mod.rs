//! Configuration management for sigsim
//!
//! Loads from optional config files + environment variables via .env

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub output: OutputConfig,
    pub simulator: SimulatorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the control API
    pub host: String,
    /// Bind port for the control API
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite event database
    pub database_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Directory for persisted simulation results
    pub dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulatorConfig {
    /// Event batch size in seconds of timestamp window
    pub batch_size: i64,
    /// Starting cash per run, in base units
    pub starting_cash: f64,
    /// Default per-signal buy amount when a request omits it
    pub default_buy_amount: f64,
    /// Default take-profit ladder (entry-price multipliers)
    pub default_tps: Vec<f64>,
    /// Default sell fraction per take-profit stage
    pub default_tp_amounts: Vec<f64>,
    /// Default slippage tolerance in percent
    pub default_slippage_pct: f64,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Config::builder()
            // Server defaults
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            // Store defaults
            .set_default("store.database_path", "signals.db")?
            // Output defaults
            .set_default("output.dir", "sim_output")?
            // Simulator defaults
            .set_default("simulator.batch_size", 100)?
            .set_default("simulator.starting_cash", 100.0)?
            .set_default("simulator.default_buy_amount", 0.2)?
            .set_default("simulator.default_tps", vec![2.0, 10.0])?
            .set_default("simulator.default_tp_amounts", vec![0.5, 1.0])?
            .set_default("simulator.default_slippage_pct", 10.0)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (SIGSIM_*)
            .add_source(Environment::with_prefix("SIGSIM").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        Ok(app_config)
    }

    /// Generate a digest of the config for startup logging
    pub fn digest(&self) -> String {
        format!(
            "bind={}:{} db={} out={} batch={}",
            self.server.host,
            self.server.port,
            self.store.database_path,
            self.output.dir,
            self.simulator.batch_size
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
