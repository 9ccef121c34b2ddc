//! HTTP control surface
//!
//! REST endpoints for starting simulations, polling progress, and fetching
//! persisted results. Each accepted run executes on its own blocking task;
//! the handlers never wait on a simulation.

mod registry;

pub use registry::RunRegistry;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::AppConfig;
use crate::persistence::ResultStore;
use crate::simulator::{Simulation, StatusHandle, StrategyParams};
use crate::store::SqliteEventStore;
use crate::types::CustomOptions;

/// Shared state behind every handler.
pub struct AppState {
    pub config: AppConfig,
    pub registry: RunRegistry,
    pub results: ResultStore,
}

pub type SharedState = Arc<AppState>;

/// Create the API router with all endpoints
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/run_sim", post(run_sim))
        .route("/list_sims", get(list_sims))
        .route("/load_sim", get(load_sim))
        .route("/running_sims", get(running_sims))
        .with_state(state)
        // CORS for the frontend
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Body of `POST /run_sim`. Strategy fields missing from the request fall
/// back to the configured defaults.
#[derive(Debug, Deserialize)]
pub struct RunSimRequest {
    pub name: String,
    pub start_timestamp: i64,
    pub end_timestamp: i64,
    pub buy_amount: Option<f64>,
    pub tps: Option<Vec<f64>>,
    pub tp_amounts: Option<Vec<f64>>,
    pub slippage: Option<f64>,
    #[serde(default)]
    pub custom_opts: CustomOptions,
}

impl RunSimRequest {
    fn into_params(self, config: &AppConfig) -> StrategyParams {
        let defaults = &config.simulator;
        StrategyParams {
            buy_amount: self.buy_amount.unwrap_or(defaults.default_buy_amount),
            tps: self.tps.unwrap_or_else(|| defaults.default_tps.clone()),
            tp_amounts: self
                .tp_amounts
                .unwrap_or_else(|| defaults.default_tp_amounts.clone()),
            slippage_pct: self.slippage.unwrap_or(defaults.default_slippage_pct),
            custom_opts: self.custom_opts,
            starting_cash: defaults.starting_cash,
            batch_size: defaults.batch_size,
            name: self.name,
            start_timestamp: self.start_timestamp,
            end_timestamp: self.end_timestamp,
        }
    }
}

/// POST /run_sim - validate, register, and launch one simulation
async fn run_sim(State(state): State<SharedState>, Json(request): Json<RunSimRequest>) -> Response {
    let params = request.into_params(&state.config);
    if let Err(err) = params.validate() {
        return error_response(StatusCode::BAD_REQUEST, &err.to_string());
    }

    let store = match SqliteEventStore::open(&state.config.store.database_path) {
        Ok(store) => store,
        Err(err) => {
            error!(error = %err, "failed to open event store");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "event store unavailable");
        }
    };
    let assets = match store.list_assets() {
        Ok(assets) => assets,
        Err(err) => {
            error!(error = %err, "failed to load asset registry");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "asset registry unavailable");
        }
    };

    let handle = Arc::new(StatusHandle::new());
    state.registry.add(handle.clone());

    let results = state.results.clone();
    let name = params.name.clone();
    // Batch fetches and result writes block, so the whole run lives on a
    // blocking task and never ties up the API.
    tokio::task::spawn_blocking(move || {
        let simulation = Simulation::new(store, assets, params, handle.clone());
        match simulation.run(&results) {
            Ok(Some(metadata)) => {
                info!(name = %name, id = metadata.id, "simulation result persisted");
            }
            Ok(None) => {}
            Err(err) => {
                error!(name = %name, error = %err, "simulation failed");
                handle.mark_failed();
            }
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({ "status": "simulation started" })),
    )
        .into_response()
}

/// GET /list_sims - metadata of every persisted run
async fn list_sims(State(state): State<SharedState>) -> Response {
    match state.results.list() {
        Ok(runs) => Json(runs).into_response(),
        Err(err) => {
            error!(error = %err, "failed to list simulation results");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to list results")
        }
    }
}

#[derive(Debug, Deserialize)]
struct LoadSimQuery {
    id: Option<String>,
}

/// GET /load_sim?id=<run id> - raw JSON payload of one persisted run
async fn load_sim(State(state): State<SharedState>, Query(query): Query<LoadSimQuery>) -> Response {
    let Some(id) = query.id.filter(|id| !id.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "missing id parameter");
    };

    match state.results.load_raw(&id) {
        Ok(Some(data)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            data,
        )
            .into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "no such simulation"),
        Err(err) => error_response(StatusCode::NOT_FOUND, &err.to_string()),
    }
}

/// GET /running_sims - currently processing simulations (prunes finished)
async fn running_sims(State(state): State<SharedState>) -> Response {
    Json(state.registry.active()).into_response()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
