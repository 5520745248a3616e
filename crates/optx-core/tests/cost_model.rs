//! Cost formulas evaluated end to end through a memo.
//!
//! Node sizes are either derived from catalog statistics or pinned per node with
//! a fixed-size statistics calculator, so that each formula can be checked
//! against hand-computed numbers.

use optx_core::catalog::{InMemoryCatalog, TableStatistics};
use optx_core::cluster::{AtomicNodeCount, FixedNodeCount, NodeCountProvider};
use optx_core::comparator::CostComparator;
use optx_core::cost::{CostCalculator, ExchangeCostCalculator, PlanNodeCostEstimate};
use optx_core::error::{EstimationError, Result};
use optx_core::estimate::Estimate;
use optx_core::expr::{JoinType, TableRef};
use optx_core::lookup::{Lookup, MemoLookup, StatelessLookup};
use optx_core::memo::Memo;
use optx_core::plan::{
    DistributionType, ExchangeScope, ExchangeType, PlanBuilder, PlanNode, PlanNodeId,
    PlanNodeIdAllocator, PlanRef,
};
use optx_core::session::{Session, TypeProvider};
use optx_core::stats::{PlanNodeStatsEstimate, PlanStatsCalculator, StatsCalculator, SymbolStatsEstimate};
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

/// Output size pinned per node id; nodes without an entry have unknown stats.
struct FixedSizes(HashMap<PlanNodeId, f64>);

impl StatsCalculator for FixedSizes {
    fn calculate_stats(
        &self,
        node: &PlanNode,
        _lookup: &dyn Lookup,
        _session: &Session,
        _types: &TypeProvider,
    ) -> Result<PlanNodeStatsEstimate> {
        Ok(match self.0.get(&node.id) {
            Some(bytes) => PlanNodeStatsEstimate::new(*bytes)
                .with_symbol("v", SymbolStatsEstimate::unknown().with_average_row_size(1.0)),
            None => PlanNodeStatsEstimate::unknown(),
        })
    }
}

/// A 1000-row table of one-byte values: output size 1000.
fn kilobyte_catalog() -> Arc<InMemoryCatalog> {
    let mut catalog = InMemoryCatalog::new();
    catalog.add_table(
        &TableRef::new("test", "t"),
        TableStatistics::new(1000.0).with_column(
            "v",
            SymbolStatsEstimate::unknown()
                .with_nulls_fraction(0.0)
                .with_distinct_values_count(10.0)
                .with_average_row_size(1.0),
        ),
    );
    Arc::new(catalog)
}

fn exchange_cost(exchange_type: ExchangeType, scope: ExchangeScope) -> Result<PlanNodeCostEstimate> {
    let mut p = PlanBuilder::new();
    let scan = p.table_scan(TableRef::new("test", "t"), &[("v", "v")]);
    let exchange = p.exchange(exchange_type, scope, vec![scan]);
    let mut ids = PlanNodeIdAllocator::starting_after(&exchange);
    let (memo, root) = Memo::from_plan(&exchange, &mut ids)?;

    let costs = Arc::new(ExchangeCostCalculator::new(Arc::new(FixedNodeCount(4))));
    let lookup = MemoLookup::new(
        &memo,
        Arc::new(PlanStatsCalculator::new(kilobyte_catalog())),
        costs.clone(),
    );
    let member = memo.resolve_one(root)?;
    costs.calculate_cost(&member, &lookup, &Session::default(), &TypeProvider::new())
}

fn cost(cpu: f64, memory: f64, network: f64) -> PlanNodeCostEstimate {
    PlanNodeCostEstimate::new(cpu.into(), memory.into(), network.into())
}

#[test]
fn test_exchange_costs_at_width_four() {
    let remote = ExchangeScope::Remote;
    assert_eq!(exchange_cost(ExchangeType::Gather, remote).unwrap(), cost(0.0, 0.0, 1000.0));
    assert_eq!(exchange_cost(ExchangeType::Repartition, remote).unwrap(), cost(1000.0, 0.0, 1000.0));
    assert_eq!(exchange_cost(ExchangeType::Replicate, remote).unwrap(), cost(0.0, 0.0, 4000.0));

    for exchange_type in [ExchangeType::Gather, ExchangeType::Repartition, ExchangeType::Replicate] {
        let local = exchange_cost(exchange_type, ExchangeScope::Local).unwrap();
        assert_eq!(local.network, Estimate::ZERO);
    }
    assert_eq!(
        exchange_cost(ExchangeType::Repartition, ExchangeScope::Local).unwrap().cpu,
        Estimate::of(1000.0)
    );
}

#[test]
fn test_unsupported_exchange_is_fatal() {
    assert_eq!(
        exchange_cost(ExchangeType::RoundRobin, ExchangeScope::Remote),
        Err(EstimationError::UnsupportedExchangeKind(ExchangeType::RoundRobin))
    );
}

/// Join over group references to a probe of 100 bytes and a build of 50 bytes,
/// producing 30 bytes. Returns (own cost, cumulative cost).
fn join_through_memo(distribution: Option<DistributionType>) -> (PlanNodeCostEstimate, PlanNodeCostEstimate) {
    let mut p = PlanBuilder::new();
    let probe = p.values(&["a"], vec![]);
    let build = p.values(&["b"], vec![]);
    let join = p.join(JoinType::Inner, probe.clone(), build.clone(), &[("a", "b")], distribution);
    let sizes = FixedSizes(
        [(probe.id, 100.0), (build.id, 50.0), (join.id, 30.0)]
            .into_iter()
            .collect(),
    );

    let mut ids = PlanNodeIdAllocator::starting_after(&join);
    let (memo, root) = Memo::from_plan(&join, &mut ids).unwrap();
    let costs = Arc::new(ExchangeCostCalculator::new(Arc::new(FixedNodeCount(4))));
    let lookup = MemoLookup::new(&memo, Arc::new(sizes), costs.clone());
    let session = Session::default();
    let types = TypeProvider::new();

    let member = memo.resolve_one(root).unwrap();
    let own = costs.calculate_cost(&member, &lookup, &session, &types).unwrap();
    let reference = memo.group_reference(root, &mut ids).unwrap();
    let cumulative = lookup.get_cumulative_cost(&reference, &session, &types).unwrap();
    (own, cumulative)
}

#[test]
fn test_join_cost_by_distribution() {
    let (own, cumulative) = join_through_memo(Some(DistributionType::Partitioned));
    assert_eq!(own, cost(180.0, 50.0, 0.0));
    // Values inputs cost nothing
    assert_eq!(cumulative, own);

    let (own, _) = join_through_memo(Some(DistributionType::Replicated));
    assert_eq!(own, cost(480.0, 200.0, 0.0));
}

#[test]
fn test_cluster_width_is_sampled_once_per_call() {
    // A provider that reports a different width on every read.
    let reads = Arc::new(AtomicNodeCount::new(0));
    let counter = reads.clone();
    let provider = move || {
        let n = counter.active_node_count() + 1;
        counter.set(n);
        n
    };

    let mut p = PlanBuilder::new();
    let scan = p.table_scan(TableRef::new("test", "t"), &[("v", "v")]);
    let inner = p.exchange(ExchangeType::Replicate, ExchangeScope::Remote, vec![scan]);
    let outer = p.exchange(ExchangeType::Replicate, ExchangeScope::Remote, vec![inner]);

    let costs: Arc<dyn CostCalculator> = Arc::new(ExchangeCostCalculator::new(Arc::new(provider)));
    let lookup = StatelessLookup::new(Arc::new(PlanStatsCalculator::new(kilobyte_catalog())), costs.clone());
    let total = costs
        .calculate_cumulative_cost(&outer, &lookup, &Session::default(), &TypeProvider::new())
        .unwrap();

    // both exchanges priced at the single sampled width of 1
    assert_eq!(reads.active_node_count(), 1);
    assert_eq!(total.network, Estimate::of(2000.0));
}

#[test]
fn test_cheapest_prefers_broadcasting_a_tiny_build_side() {
    // probe 1,000,000 bytes, build 10 bytes: shuffling the probe side costs far
    // more than replicating the build side to four workers
    let mut p = PlanBuilder::new();
    let probe = p.values(&["a"], vec![]);
    let build = p.values(&["b"], vec![]);

    let probe_shuffled = p.exchange(ExchangeType::Repartition, ExchangeScope::Remote, vec![probe.clone()]);
    let build_shuffled = p.exchange(ExchangeType::Repartition, ExchangeScope::Remote, vec![build.clone()]);
    let partitioned = p.join(
        JoinType::Inner,
        probe_shuffled.clone(),
        build_shuffled.clone(),
        &[("a", "b")],
        Some(DistributionType::Partitioned),
    );

    let build_replicated = p.exchange(ExchangeType::Replicate, ExchangeScope::Remote, vec![build.clone()]);
    let replicated = p.join(
        JoinType::Inner,
        probe.clone(),
        build_replicated.clone(),
        &[("a", "b")],
        Some(DistributionType::Replicated),
    );

    let sizes = FixedSizes(
        [
            (probe.id, 1_000_000.0),
            (build.id, 10.0),
            (probe_shuffled.id, 1_000_000.0),
            (build_shuffled.id, 10.0),
            (build_replicated.id, 10.0),
            (partitioned.id, 100.0),
            (replicated.id, 100.0),
        ]
        .into_iter()
        .collect(),
    );
    let lookup = StatelessLookup::new(
        Arc::new(sizes),
        Arc::new(ExchangeCostCalculator::new(Arc::new(FixedNodeCount(4)))),
    );
    let (best, _) = CostComparator::default()
        .cheapest(
            &[partitioned, replicated.clone()],
            &lookup,
            &Session::default(),
            &TypeProvider::new(),
        )
        .unwrap()
        .unwrap();
    assert_eq!(best.id, replicated.id);
}

#[test]
fn test_unresolved_reference_never_yields_a_number() {
    let mut p = PlanBuilder::new();
    let reference = p.group_reference(0, vec![]);
    let stats = Arc::new(PlanStatsCalculator::new(kilobyte_catalog()));
    let costs = Arc::new(ExchangeCostCalculator::new(Arc::new(FixedNodeCount(4))));
    let memo = Memo::new();
    let lookup = MemoLookup::new(&memo, stats.clone(), costs.clone());
    let session = Session::default();
    let types = TypeProvider::new();

    assert!(matches!(
        costs.calculate_cost(&reference, &lookup, &session, &types),
        Err(EstimationError::UnresolvedReference { .. })
    ));
    assert!(matches!(
        stats.calculate_stats(&reference, &lookup, &session, &types),
        Err(EstimationError::UnresolvedReference { .. })
    ));
    // a reference to a group the memo does not have
    assert_eq!(
        lookup.get_stats(&reference, &session, &types).unwrap_err(),
        EstimationError::UnknownGroup(0)
    );
}

fn maybe_size() -> impl Strategy<Value = Option<f64>> {
    prop::option::of(0.0..1e9f64)
}

proptest! {
    #[test]
    fn unknown_child_size_makes_join_cost_unknown(
        probe_size in maybe_size(),
        build_size in maybe_size(),
        output_size in maybe_size(),
        replicated in any::<bool>(),
        width in 1usize..64,
    ) {
        let mut p = PlanBuilder::new();
        let probe = p.values(&["a"], vec![]);
        let build = p.values(&["b"], vec![]);
        let distribution = if replicated { DistributionType::Replicated } else { DistributionType::Partitioned };
        let join = p.join(JoinType::Inner, probe.clone(), build.clone(), &[("a", "b")], Some(distribution));

        let sizes: HashMap<PlanNodeId, f64> = [(&probe, probe_size), (&build, build_size), (&join, output_size)]
            .into_iter()
            .filter_map(|(node, size): (&PlanRef, Option<f64>)| size.map(|s| (node.id, s)))
            .collect();
        let costs = Arc::new(ExchangeCostCalculator::new(Arc::new(FixedNodeCount(width))));
        let lookup = StatelessLookup::new(Arc::new(FixedSizes(sizes)), costs.clone());
        let cost = costs
            .calculate_cost(&join, &lookup, &Session::default(), &TypeProvider::new())
            .unwrap();

        let all_known = probe_size.is_some() && build_size.is_some() && output_size.is_some();
        prop_assert_eq!(cost.cpu.is_known(), all_known);
        prop_assert_eq!(cost.memory.is_known(), build_size.is_some());
        prop_assert_eq!(cost.network, Estimate::ZERO);
        if let Some(cpu) = cost.cpu.value() {
            prop_assert!(cpu >= 0.0);
        }
    }
}
