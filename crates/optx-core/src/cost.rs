//! # Cost Model
//!
//! This module defines the cost estimate and the default per-operator cost
//! formulas used to compare plan alternatives.
//!
//! ## Multi-Dimensional Cost
//!
//! Query execution cost is not a single number: it depends on CPU time, memory
//! consumption and network transfer. [`PlanNodeCostEstimate`] keeps the three
//! dimensions apart, each an [`Estimate`] that may be unknown. Collapsing them into
//! one comparable value is the job of the
//! [`CostComparator`](crate::comparator::CostComparator).
//!
//! ## Per-Node Formulas
//!
//! With `size(n)` the estimated output size in bytes of `n`, read through the
//! [`Lookup`]:
//!
//! | Operator                          | cpu                  | memory       | network |
//! |-----------------------------------|----------------------|--------------|---------|
//! | Output, Values, EnforceSingleRow  | 0                    | 0            | 0       |
//! | Filter                            | `size(source)`       | 0            | 0       |
//! | Project, Limit, TableScan         | `size(self)`         | 0            | 0       |
//! | Aggregation                       | `size(source)`       | `size(self)` | 0       |
//! | Join, SemiJoin                    | see below            | see below    | 0       |
//! | Exchange                          | see below            | 0            | see below |
//!
//! Any other operator costs unknown. A `GroupReference` must be resolved before
//! it reaches the formulas and is rejected with `UnresolvedReference`.
//!
//! ### Joins
//!
//! The probe side is the left input (or the semi-join source), the build side the
//! right input (or the filtering source). A replicated build side is copied to
//! every worker and each extra copy is locally repartitioned once more:
//!
//! ```text
//! m       = replicated ? cluster_width : 1
//! cpu     = size(probe) + size(build) * m + size(self) [+ size(build) * (m - 1) if replicated]
//! memory  = size(build) * m
//! network = 0    (charged by the exchanges around the join)
//! ```
//!
//! ### Exchanges
//!
//! ```text
//! GATHER       cpu = 0           network = size(self)
//! REPARTITION  cpu = size(self)  network = size(self)
//! REPLICATE    cpu = 0           network = size(self) * cluster_width
//! LOCAL scope                    network = 0
//! ```
//!
//! ## Cumulative Cost
//!
//! The cost of a plan is the cost of its root plus the cumulative cost of each
//! child, where every child is read through the same [`Lookup`] so that group
//! references are resolved and child results come from its cache.
//!
//! ## Cluster Width
//!
//! The worker count is sampled once per top-level call and passed down the whole
//! traversal, so a single estimate is never computed against two widths.

use crate::cluster::{sample_width, NodeCountProvider};
use crate::error::{EstimationError, Result};
use crate::estimate::Estimate;
use crate::lookup::Lookup;
use crate::plan::{DistributionType, ExchangeScope, ExchangeType, PlanOp, PlanRef};
use crate::session::{Session, TypeProvider};
use crate::stats::PlanNodeStatsEstimate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;
use std::sync::Arc;
use tracing::trace;

/// Estimated CPU, memory and network expenditure of a node or a plan subtree.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlanNodeCostEstimate {
    pub cpu: Estimate,
    pub memory: Estimate,
    pub network: Estimate,
}

impl PlanNodeCostEstimate {
    pub fn new(cpu: Estimate, memory: Estimate, network: Estimate) -> Self {
        Self { cpu, memory, network }
    }

    pub fn zero() -> Self {
        Self::new(Estimate::ZERO, Estimate::ZERO, Estimate::ZERO)
    }

    /// Every component unknown.
    pub fn unknown() -> Self {
        Self::new(Estimate::UNKNOWN, Estimate::UNKNOWN, Estimate::UNKNOWN)
    }

    pub fn cpu_cost(cpu: impl Into<Estimate>) -> Self {
        Self::new(cpu.into(), Estimate::ZERO, Estimate::ZERO)
    }

    pub fn memory_cost(memory: impl Into<Estimate>) -> Self {
        Self::new(Estimate::ZERO, memory.into(), Estimate::ZERO)
    }

    pub fn network_cost(network: impl Into<Estimate>) -> Self {
        Self::new(Estimate::ZERO, Estimate::ZERO, network.into())
    }

    pub fn has_unknown_components(&self) -> bool {
        self.cpu.is_unknown() || self.memory.is_unknown() || self.network.is_unknown()
    }
}

impl Add for PlanNodeCostEstimate {
    type Output = PlanNodeCostEstimate;

    fn add(self, other: PlanNodeCostEstimate) -> PlanNodeCostEstimate {
        PlanNodeCostEstimate::new(
            self.cpu + other.cpu,
            self.memory + other.memory,
            self.network + other.network,
        )
    }
}

impl fmt::Display for PlanNodeCostEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{cpu: {}, memory: {}, network: {}}}",
            self.cpu, self.memory, self.network
        )
    }
}

/// Computes the cost of plan nodes.
///
/// Implementors provide the per-node formula for a given cluster width; the
/// provided methods sample the width once and layer the cumulative traversal on
/// top of it.
pub trait CostCalculator: Send + Sync {
    /// Current number of workers, at least one.
    fn cluster_width(&self) -> usize;

    /// Cost of `node` alone, priced against `cluster_width` workers.
    fn calculate_cost_with_width(
        &self,
        node: &PlanRef,
        lookup: &dyn Lookup,
        cluster_width: usize,
        session: &Session,
        types: &TypeProvider,
    ) -> Result<PlanNodeCostEstimate>;

    /// Cost of `node` alone.
    fn calculate_cost(
        &self,
        node: &PlanRef,
        lookup: &dyn Lookup,
        session: &Session,
        types: &TypeProvider,
    ) -> Result<PlanNodeCostEstimate> {
        let width = self.cluster_width();
        self.calculate_cost_with_width(node, lookup, width, session, types)
    }

    /// Cost of `node` plus the cumulative cost of each of its sources, all priced
    /// against the same `cluster_width`.
    fn cumulative_cost_with_width(
        &self,
        node: &PlanRef,
        lookup: &dyn Lookup,
        cluster_width: usize,
        session: &Session,
        types: &TypeProvider,
    ) -> Result<PlanNodeCostEstimate> {
        let own = self.calculate_cost_with_width(node, lookup, cluster_width, session, types)?;
        node.sources().into_iter().try_fold(own, |total, source| {
            Ok(total + lookup.cumulative_cost_at(source, cluster_width, session, types)?)
        })
    }

    /// Cost of the whole subtree rooted at `node`.
    fn calculate_cumulative_cost(
        &self,
        node: &PlanRef,
        lookup: &dyn Lookup,
        session: &Session,
        types: &TypeProvider,
    ) -> Result<PlanNodeCostEstimate> {
        let width = self.cluster_width();
        self.cumulative_cost_with_width(node, lookup, width, session, types)
    }
}

/// Default cost calculator charging data movement to explicit exchange nodes.
pub struct ExchangeCostCalculator {
    nodes: Arc<dyn NodeCountProvider>,
}

impl ExchangeCostCalculator {
    pub fn new(nodes: Arc<dyn NodeCountProvider>) -> Self {
        Self { nodes }
    }
}

impl CostCalculator for ExchangeCostCalculator {
    fn cluster_width(&self) -> usize {
        sample_width(self.nodes.as_ref())
    }

    fn calculate_cost_with_width(
        &self,
        node: &PlanRef,
        lookup: &dyn Lookup,
        cluster_width: usize,
        session: &Session,
        types: &TypeProvider,
    ) -> Result<PlanNodeCostEstimate> {
        let size = |n: &PlanRef| -> Result<Estimate> {
            Ok(lookup.get_stats(n, session, types)?.output_size_in_bytes())
        };

        let cost = match &node.op {
            PlanOp::GroupReference { group, .. } => {
                return Err(EstimationError::UnresolvedReference {
                    node: node.id,
                    reason: format!("cost requested for a reference to group {}", group),
                })
            }
            PlanOp::Output { .. } | PlanOp::Values { .. } | PlanOp::EnforceSingleRow { .. } => {
                PlanNodeCostEstimate::zero()
            }
            PlanOp::Filter { source, .. } => PlanNodeCostEstimate::cpu_cost(size(source)?),
            PlanOp::Project { .. } | PlanOp::Limit { .. } | PlanOp::TableScan { .. } => {
                PlanNodeCostEstimate::cpu_cost(size(node)?)
            }
            PlanOp::Aggregation { source, .. } => {
                PlanNodeCostEstimate::cpu_cost(size(source)?) + PlanNodeCostEstimate::memory_cost(size(node)?)
            }
            PlanOp::Join {
                left,
                right,
                distribution,
                ..
            } => join_cost(size(left)?, size(right)?, size(node)?, *distribution, cluster_width),
            PlanOp::SemiJoin {
                source,
                filtering_source,
                distribution,
                ..
            } => join_cost(
                size(source)?,
                size(filtering_source)?,
                size(node)?,
                *distribution,
                cluster_width,
            ),
            PlanOp::Exchange {
                exchange_type,
                scope,
                ..
            } => calculate_exchange_cost(
                cluster_width,
                &lookup.get_stats(node, session, types)?,
                *exchange_type,
                *scope,
            )?,
            _ => PlanNodeCostEstimate::unknown(),
        };

        trace!(
            "Cost of {:?} node {} at width {}: {}",
            node.kind(),
            node.id,
            cluster_width,
            cost
        );
        Ok(cost)
    }
}

fn join_cost(
    probe_size: Estimate,
    build_size: Estimate,
    output_size: Estimate,
    distribution: Option<DistributionType>,
    cluster_width: usize,
) -> PlanNodeCostEstimate {
    let replicated = distribution == Some(DistributionType::Replicated);
    let multiplier = if replicated { cluster_width as f64 } else { 1.0 };

    let mut cpu = probe_size + build_size * multiplier + output_size;
    if replicated {
        // local repartitioning of the replicated build side
        cpu = cpu + build_size * (multiplier - 1.0);
    }
    let memory = build_size * multiplier;
    PlanNodeCostEstimate::new(cpu, memory, Estimate::ZERO)
}

/// Cost of moving an exchange's output, given its statistics.
pub fn calculate_exchange_cost(
    cluster_width: usize,
    exchange_stats: &PlanNodeStatsEstimate,
    exchange_type: ExchangeType,
    scope: ExchangeScope,
) -> Result<PlanNodeCostEstimate> {
    let size = exchange_stats.output_size_in_bytes();
    let (cpu, network) = match exchange_type {
        ExchangeType::Gather => (Estimate::ZERO, size),
        ExchangeType::Repartition => (size, size),
        ExchangeType::Replicate => (Estimate::ZERO, size * cluster_width as f64),
        other => return Err(EstimationError::UnsupportedExchangeKind(other)),
    };
    let network = match scope {
        ExchangeScope::Local => Estimate::ZERO,
        ExchangeScope::Remote => network,
    };
    Ok(PlanNodeCostEstimate::cpu_cost(cpu) + PlanNodeCostEstimate::network_cost(network))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::FixedNodeCount;
    use crate::lookup::StatelessLookup;
    use crate::plan::{PlanBuilder, PlanNode, PlanNodeId};
    use crate::stats::{StatsCalculator, SymbolStatsEstimate};
    use std::collections::HashMap;

    /// Stats calculator returning a fixed output size per node id.
    struct SizedStats(HashMap<PlanNodeId, f64>);

    impl StatsCalculator for SizedStats {
        fn calculate_stats(
            &self,
            node: &PlanNode,
            _lookup: &dyn Lookup,
            _session: &Session,
            _types: &TypeProvider,
        ) -> Result<PlanNodeStatsEstimate> {
            Ok(match self.0.get(&node.id) {
                Some(size) => sized(*size),
                None => PlanNodeStatsEstimate::unknown(),
            })
        }
    }

    fn sized(bytes: f64) -> PlanNodeStatsEstimate {
        PlanNodeStatsEstimate::new(bytes)
            .with_symbol("x", SymbolStatsEstimate::unknown().with_average_row_size(1.0))
    }

    fn cost_of(node: &PlanRef, sizes: &[(&PlanRef, f64)], width: usize) -> Result<PlanNodeCostEstimate> {
        let stats = SizedStats(sizes.iter().map(|(n, s)| (n.id, *s)).collect());
        let calculator = Arc::new(ExchangeCostCalculator::new(Arc::new(FixedNodeCount(width))));
        let lookup = StatelessLookup::new(Arc::new(stats), calculator.clone());
        calculator.calculate_cost(node, &lookup, &Session::default(), &TypeProvider::new())
    }

    fn cost(cpu: f64, memory: f64, network: f64) -> PlanNodeCostEstimate {
        PlanNodeCostEstimate::new(cpu.into(), memory.into(), network.into())
    }

    #[test]
    fn test_exchange_cost_table() {
        let stats = sized(1000.0);
        let remote = |t| calculate_exchange_cost(4, &stats, t, ExchangeScope::Remote).unwrap();
        assert_eq!(remote(ExchangeType::Gather), cost(0.0, 0.0, 1000.0));
        assert_eq!(remote(ExchangeType::Repartition), cost(1000.0, 0.0, 1000.0));
        assert_eq!(remote(ExchangeType::Replicate), cost(0.0, 0.0, 4000.0));

        for t in [ExchangeType::Gather, ExchangeType::Repartition, ExchangeType::Replicate] {
            let local = calculate_exchange_cost(4, &stats, t, ExchangeScope::Local).unwrap();
            assert_eq!(local.network, Estimate::ZERO);
        }
        assert_eq!(
            calculate_exchange_cost(4, &stats, ExchangeType::RoundRobin, ExchangeScope::Remote),
            Err(EstimationError::UnsupportedExchangeKind(ExchangeType::RoundRobin))
        );
    }

    #[test]
    fn test_join_cost_formula() {
        let mut p = PlanBuilder::new();
        let probe = p.values(&["a"], vec![]);
        let build = p.values(&["b"], vec![]);
        for (distribution, expected) in [
            (Some(DistributionType::Partitioned), cost(180.0, 50.0, 0.0)),
            (None, cost(180.0, 50.0, 0.0)),
            (Some(DistributionType::Replicated), cost(480.0, 200.0, 0.0)),
        ] {
            let join = p.join(
                crate::expr::JoinType::Inner,
                probe.clone(),
                build.clone(),
                &[("a", "b")],
                distribution,
            );
            let sizes = [(&probe, 100.0), (&build, 50.0), (&join, 30.0)];
            assert_eq!(cost_of(&join, &sizes, 4).unwrap(), expected);

            let semi = p.semi_join(probe.clone(), build.clone(), "a", "b", "m", distribution);
            let sizes = [(&probe, 100.0), (&build, 50.0), (&semi, 30.0)];
            assert_eq!(cost_of(&semi, &sizes, 4).unwrap(), expected);
        }
    }

    #[test]
    fn test_simple_operator_costs() {
        let mut p = PlanBuilder::new();
        let scan = p.values(&["x"], vec![]);
        let filter = p.filter(scan.clone(), crate::expr::Expr::symbol("x"));
        let agg = p.aggregation(filter.clone(), &["x"], vec![]);
        let limit = p.limit(agg.clone(), 5);
        let output = p.output(limit.clone(), &["x"]);
        let sizes = [(&scan, 400.0), (&filter, 40.0), (&agg, 10.0), (&limit, 5.0), (&output, 5.0)];

        assert_eq!(cost_of(&filter, &sizes, 1).unwrap(), cost(400.0, 0.0, 0.0));
        assert_eq!(cost_of(&agg, &sizes, 1).unwrap(), cost(40.0, 10.0, 0.0));
        assert_eq!(cost_of(&limit, &sizes, 1).unwrap(), cost(5.0, 0.0, 0.0));
        assert_eq!(cost_of(&output, &sizes, 1).unwrap(), PlanNodeCostEstimate::zero());
    }

    #[test]
    fn test_unknown_size_propagates() {
        let mut p = PlanBuilder::new();
        let probe = p.values(&["a"], vec![]);
        let build = p.values(&["b"], vec![]);
        let join = p.join(crate::expr::JoinType::Inner, probe.clone(), build.clone(), &[], None);
        // build side size is unknown
        let cost = cost_of(&join, &[(&probe, 100.0), (&join, 30.0)], 4).unwrap();
        assert!(cost.cpu.is_unknown());
        assert!(cost.memory.is_unknown());
        assert_eq!(cost.network, Estimate::ZERO);

        let window = p.window(probe.clone(), &[], &[("rn", "row_number")]);
        assert_eq!(cost_of(&window, &[], 4).unwrap(), PlanNodeCostEstimate::unknown());
    }

    #[test]
    fn test_group_reference_is_fatal() {
        let mut p = PlanBuilder::new();
        let reference = p.group_reference(3, vec![]);
        assert!(matches!(
            cost_of(&reference, &[], 4),
            Err(EstimationError::UnresolvedReference { .. })
        ));
    }

    #[test]
    fn test_cumulative_cost_sums_subtree() {
        let mut p = PlanBuilder::new();
        let scan = p.values(&["x"], vec![]);
        let filter = p.filter(scan.clone(), crate::expr::Expr::symbol("x"));
        let gather = p.exchange(ExchangeType::Gather, ExchangeScope::Remote, vec![filter.clone()]);
        let sizes = SizedStats(
            [(scan.id, 400.0), (filter.id, 40.0), (gather.id, 40.0)]
                .into_iter()
                .collect(),
        );
        let calculator = Arc::new(ExchangeCostCalculator::new(Arc::new(FixedNodeCount(2))));
        let lookup = StatelessLookup::new(Arc::new(sizes), calculator.clone());
        let total = calculator
            .calculate_cumulative_cost(&gather, &lookup, &Session::default(), &TypeProvider::new())
            .unwrap();
        assert_eq!(total, cost(400.0, 0.0, 40.0));
    }

    #[test]
    fn test_cost_arithmetic() {
        let a = cost(1.0, 2.0, 3.0);
        assert_eq!(a + PlanNodeCostEstimate::zero(), a);
        assert!((a + PlanNodeCostEstimate::unknown()).has_unknown_components());
        assert_eq!(PlanNodeCostEstimate::cpu_cost(5.0), cost(5.0, 0.0, 0.0));
    }
}
