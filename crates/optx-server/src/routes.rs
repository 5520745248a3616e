//! # HTTP Route Handlers
//!
//! This module defines the Axum route handlers for the estimation service.
//!
//! ## Estimation Pipeline
//!
//! `POST /estimate` runs one estimation per request:
//!
//! 1. **Catalog**: Build an in-memory catalog from the table statistics in the body.
//! 2. **Memo**: Insert the plan into a fresh memo, one group per node.
//! 3. **Lookup**: Create a memo-backed lookup for this request only.
//! 4. **Estimate**: Compute root statistics and costs, then a per-node breakdown
//!    that is served from the lookup's cache.
//!
//! ## Error Handling
//!
//! Errors are returned as HTTP status codes with descriptive messages:
//! - 400 / 422 from Axum's JSON extractor for malformed bodies
//! - 422 Unprocessable Entity: the plan violates an estimation invariant
//!   (unresolved group reference, duplicate node id, no node id left for the
//!   memo's group references, unsupported exchange kind)

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use optx_core::catalog::{InMemoryCatalog, TableStatistics};
use optx_core::cluster::{FixedNodeCount, NodeCountProvider};
use optx_core::cost::{CostCalculator, ExchangeCostCalculator, PlanNodeCostEstimate};
use optx_core::error::EstimationError;
use optx_core::estimate::Estimate;
use optx_core::expr::TableRef;
use optx_core::filter::HeuristicFilterEstimator;
use optx_core::lookup::{Lookup, MemoLookup};
use optx_core::memo::{GroupId, Memo};
use optx_core::plan::{PlanNodeId, PlanNodeIdAllocator, PlanNodeKind, PlanRef};
use optx_core::session::{Session, TypeProvider};
use optx_core::stats::{PlanNodeStatsEstimate, PlanStatsCalculator};

use crate::state::AppState;

/// All routes of the service.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/cluster", get(get_cluster).post(set_cluster))
        .route("/estimate", post(estimate))
        .with_state(state)
}

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfo {
    pub active_nodes: usize,
}

/// GET /cluster: current worker count.
pub async fn get_cluster(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(ClusterInfo {
        active_nodes: state.nodes.active_node_count(),
    })
}

/// POST /cluster: replace the worker count.
pub async fn set_cluster(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ClusterInfo>,
) -> impl IntoResponse {
    state.nodes.set(req.active_nodes);
    Json(ClusterInfo {
        active_nodes: state.nodes.active_node_count(),
    })
}

/// Statistics of one base table referenced by the plan.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    pub schema: String,
    pub name: String,
    #[serde(flatten)]
    pub statistics: TableStatistics,
}

/// Request body for `POST /estimate`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimateRequest {
    pub plan: PlanRef,
    #[serde(default)]
    pub tables: Vec<TableInfo>,
    /// Price the plan against this many workers instead of the current cluster.
    pub cluster_width: Option<usize>,
    #[serde(default)]
    pub session: Session,
    #[serde(default)]
    pub types: TypeProvider,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeEstimate {
    pub id: PlanNodeId,
    pub kind: PlanNodeKind,
    pub group: GroupId,
    pub output_row_count: Estimate,
    pub output_size_in_bytes: Estimate,
    pub cost: PlanNodeCostEstimate,
    pub cumulative_cost: PlanNodeCostEstimate,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimateResponse {
    pub cluster_width: usize,
    pub stats: PlanNodeStatsEstimate,
    pub cost: PlanNodeCostEstimate,
    pub cumulative_cost: PlanNodeCostEstimate,
    /// Cumulative cost collapsed with the server's comparator weights.
    pub weighted_cost: Estimate,
    /// One entry per plan node, in memo group order (children before parents).
    pub nodes: Vec<NodeEstimate>,
}

/// POST /estimate: statistics and costs for a plan.
pub async fn estimate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EstimateRequest>,
) -> Result<Json<EstimateResponse>, (StatusCode, String)> {
    info!(
        "Estimating plan rooted at node {} (query {:?}, {} tables)",
        req.plan.id,
        req.session.query_id,
        req.tables.len()
    );
    let response = run_estimation(&state, &req)
        .map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, format!("Estimation failed: {}", e)))?;
    Ok(Json(response))
}

/// Core estimation logic, independent of the HTTP layer.
fn run_estimation(state: &AppState, req: &EstimateRequest) -> Result<EstimateResponse, EstimationError> {
    let mut catalog = InMemoryCatalog::new();
    for table in &req.tables {
        catalog.add_table(&TableRef::new(&table.schema, &table.name), table.statistics.clone());
    }
    let stats_calculator = PlanStatsCalculator::new(Arc::new(catalog))
        .with_filter_estimator(Arc::new(HeuristicFilterEstimator::new(state.config.stats.clone())));
    let cost_calculator: Arc<dyn CostCalculator> = match req.cluster_width {
        Some(width) => Arc::new(ExchangeCostCalculator::new(Arc::new(FixedNodeCount(width)))),
        None => state.cost_calculator.clone(),
    };

    // Each request gets a fresh memo and lookup: nothing is cached across requests.
    let mut ids = PlanNodeIdAllocator::starting_after(&req.plan);
    let (memo, root_group) = Memo::from_plan(&req.plan, &mut ids)?;
    let lookup = MemoLookup::new(&memo, Arc::new(stats_calculator), cost_calculator.clone());
    let width = lookup.cluster_width();
    let (session, types) = (&req.session, &req.types);

    let mut nodes = Vec::with_capacity(memo.num_groups());
    for group in 0..memo.num_groups() as GroupId {
        let node = memo.resolve_one(group)?;
        let stats = lookup.get_stats(&node, session, types)?;
        nodes.push(NodeEstimate {
            id: node.id,
            kind: node.kind(),
            group,
            output_row_count: stats.output_row_count,
            output_size_in_bytes: stats.output_size_in_bytes(),
            cost: cost_calculator.calculate_cost_with_width(&node, &lookup, width, session, types)?,
            cumulative_cost: lookup.get_cumulative_cost(&node, session, types)?,
        });
    }

    let root = memo.resolve_one(root_group)?;
    let cumulative_cost = lookup.get_cumulative_cost(&root, session, types)?;
    debug!(
        "Estimated {} nodes at width {}: cumulative cost {}",
        nodes.len(),
        width,
        cumulative_cost
    );
    Ok(EstimateResponse {
        cluster_width: width,
        stats: lookup.get_stats(&root, session, types)?,
        cost: cost_calculator.calculate_cost_with_width(&root, &lookup, width, session, types)?,
        cumulative_cost,
        weighted_cost: state.comparator.weighted(&cumulative_cost),
        nodes,
    })
}
