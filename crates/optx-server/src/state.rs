//! # Application State
//!
//! This module defines the shared state that is available to all HTTP request handlers.
//! The state is created once at server startup and shared via `Arc` across all
//! concurrent requests.
//!
//! ## Components
//!
//! - **Node count**: The active worker count, updated through `POST /cluster`. Cost
//!   calculators sample it once per estimation request.
//! - **Cost calculator**: Stateless and shared by every request that does not pin
//!   its own cluster width.
//! - **Comparator**: Weights used to report a single comparable cost figure.
//! - **Server config**: Listen address, initial cluster width and selectivity defaults.
//!
//! Catalogs, memos and lookups are per request: each request carries its own
//! table statistics and plan, and a memo-backed lookup must not outlive one
//! estimation.

use optx_core::cluster::AtomicNodeCount;
use optx_core::comparator::CostComparator;
use optx_core::cost::{CostCalculator, ExchangeCostCalculator};
use optx_core::stats::StatsConfig;
use std::sync::Arc;
use tracing::warn;

/// Server-level configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address to bind.
    pub listen_addr: String,
    /// Worker count reported until the first `POST /cluster`.
    pub cluster_width: usize,
    /// Selectivity defaults for predicate estimation.
    pub stats: StatsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
            cluster_width: 1,
            stats: StatsConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `OPTX_LISTEN_ADDR` and `OPTX_CLUSTER_WIDTH`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var("OPTX_LISTEN_ADDR") {
            config.listen_addr = addr;
        }
        if let Ok(width) = std::env::var("OPTX_CLUSTER_WIDTH") {
            match width.parse::<usize>() {
                Ok(w) => config.cluster_width = w,
                Err(e) => warn!("Ignoring OPTX_CLUSTER_WIDTH={:?}: {}", width, e),
            }
        }
        config
    }
}

/// Shared application state, accessible by all request handlers via Axum's State extractor.
pub struct AppState {
    /// Active worker count, shared with the cost calculator.
    pub nodes: Arc<AtomicNodeCount>,
    /// Cost calculator priced against `nodes`.
    pub cost_calculator: Arc<dyn CostCalculator>,
    pub comparator: CostComparator,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let nodes = Arc::new(AtomicNodeCount::new(config.cluster_width));
        Self {
            cost_calculator: Arc::new(ExchangeCostCalculator::new(nodes.clone())),
            nodes,
            comparator: CostComparator::default(),
            config,
        }
    }
}
