//! # Lookup: Reference Resolution and Estimate Memoization
//!
//! Calculators never look at a node's children directly. They go through a
//! [`Lookup`], which
//!
//! - materializes `GroupReference` nodes into the members of their group, and
//! - memoizes statistics and cumulative costs per resolved node.
//!
//! Because a calculator receives the lookup it was called from, a child lookup
//! made while computing a parent goes through the same cache, and resolution is
//! transparent at every level of the recursion.
//!
//! ## Variants
//!
//! | Variant           | Groups      | Caching | Shareable across threads |
//! |-------------------|-------------|---------|--------------------------|
//! | [`MemoLookup`]    | via a Memo  | yes     | no (`!Sync`)             |
//! | [`StatelessLookup`] | rejected  | no      | yes                      |
//! | [`FnLookup`]      | via a closure | no   | when the closure is      |
//! | [`NoLookup`]      | rejected    | n/a     | yes                      |
//!
//! A `MemoLookup` belongs to one optimization step on one thread. Its caches use
//! `RefCell`, so the compiler refuses to share it between threads.
//!
//! ## Caching Protocol
//!
//! Calculators re-enter the lookup while a result is being computed, so the
//! cache cannot be filled with a single atomic "compute if absent". Each entry
//! goes through two phases instead:
//!
//! ```text
//! begin(key):    Done(v)     -> hit, return v
//!                InProgress  -> DuplicateComputation (re-entry on the same key)
//!                absent      -> mark InProgress, caller computes
//! complete(key): InProgress  -> Done(v)
//!                otherwise   -> DuplicateComputation
//! ```
//!
//! A failed computation removes its `InProgress` marker again.

use crate::cost::{CostCalculator, PlanNodeCostEstimate};
use crate::error::{EstimationError, Result};
use crate::memo::{GroupId, Memo};
use crate::plan::{PlanNode, PlanNodeId, PlanOp, PlanRef};
use crate::session::{Session, TypeProvider};
use crate::stats::{PlanNodeStatsEstimate, StatsCalculator};
use std::cell::{OnceCell, RefCell};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tracing::{debug, trace};

/// Resolves group references and provides statistics and cumulative costs.
pub trait Lookup {
    /// `node` itself unless it is a `GroupReference`; otherwise the single
    /// member of the referenced group.
    ///
    /// Legacy: fails with `NonSingletonGroup` when the group does not hold exactly
    /// one member. Callers exploring several alternatives should use
    /// [`resolve_group`](Lookup::resolve_group) and pick a member themselves.
    fn resolve(&self, node: &PlanRef) -> Result<PlanRef> {
        let PlanOp::GroupReference { group, .. } = &node.op else {
            return Ok(node.clone());
        };
        let mut members = self.resolve_group(node)?;
        match members.len() {
            1 => Ok(members.remove(0)),
            n => Err(EstimationError::NonSingletonGroup {
                group: *group,
                members: n,
            }),
        }
    }

    /// All members of the group referenced by `node`, which must be a
    /// `GroupReference`.
    fn resolve_group(&self, node: &PlanNode) -> Result<Vec<PlanRef>>;

    fn get_stats(
        &self,
        node: &PlanRef,
        session: &Session,
        types: &TypeProvider,
    ) -> Result<PlanNodeStatsEstimate>;

    /// Number of workers this lookup prices plans against.
    fn cluster_width(&self) -> usize;

    /// Cumulative cost of `node` priced against `cluster_width` workers.
    fn cumulative_cost_at(
        &self,
        node: &PlanRef,
        cluster_width: usize,
        session: &Session,
        types: &TypeProvider,
    ) -> Result<PlanNodeCostEstimate>;

    fn get_cumulative_cost(
        &self,
        node: &PlanRef,
        session: &Session,
        types: &TypeProvider,
    ) -> Result<PlanNodeCostEstimate> {
        let width = self.cluster_width();
        self.cumulative_cost_at(node, width, session, types)
    }
}

fn not_a_group_reference(node: &PlanNode) -> EstimationError {
    EstimationError::UnresolvedReference {
        node: node.id,
        reason: format!("{:?} node is not a group reference", node.kind()),
    }
}

/// Cache keys identify the resolved plan node they belong to.
trait CacheKey: Copy + Eq + Hash {
    fn node(&self) -> PlanNodeId;
}

impl CacheKey for PlanNodeId {
    fn node(&self) -> PlanNodeId {
        *self
    }
}

/// Costs are cached per node and cluster width.
impl CacheKey for (PlanNodeId, usize) {
    fn node(&self) -> PlanNodeId {
        self.0
    }
}

enum Slot<T> {
    InProgress,
    Done(T),
}

/// Two-phase cache; see the module documentation.
struct MemoCache<K, T> {
    slots: HashMap<K, Slot<T>>,
    what: &'static str,
}

impl<K: CacheKey, T: Clone> MemoCache<K, T> {
    fn new(what: &'static str) -> Self {
        Self {
            slots: HashMap::new(),
            what,
        }
    }

    /// Cached value for `key`, or `None` after marking `key` in progress.
    fn begin(&mut self, key: K) -> Result<Option<T>> {
        match self.slots.get(&key) {
            Some(Slot::Done(value)) => Ok(Some(value.clone())),
            Some(Slot::InProgress) => Err(self.duplicate(key)),
            None => {
                self.slots.insert(key, Slot::InProgress);
                Ok(None)
            }
        }
    }

    fn complete(&mut self, key: K, value: T) -> Result<()> {
        match self.slots.get(&key) {
            Some(Slot::InProgress) => {
                self.slots.insert(key, Slot::Done(value));
                Ok(())
            }
            _ => Err(self.duplicate(key)),
        }
    }

    fn abandon(&mut self, key: K) {
        if matches!(self.slots.get(&key), Some(Slot::InProgress)) {
            self.slots.remove(&key);
        }
    }

    fn len(&self) -> usize {
        self.slots
            .values()
            .filter(|s| matches!(s, Slot::Done(_)))
            .count()
    }

    fn duplicate(&self, key: K) -> EstimationError {
        EstimationError::DuplicateComputation {
            node: key.node(),
            what: self.what,
        }
    }
}

/// Run `compute` under the two-phase protocol of `cache`.
fn cached<K, T>(
    cache: &RefCell<MemoCache<K, T>>,
    key: K,
    compute: impl FnOnce() -> Result<T>,
) -> Result<T>
where
    K: CacheKey,
    T: Clone,
{
    let hit = cache.borrow_mut().begin(key)?;
    if let Some(value) = hit {
        trace!("Cache hit: {} for node {}", cache.borrow().what, key.node());
        return Ok(value);
    }
    match compute() {
        Ok(value) => {
            cache.borrow_mut().complete(key, value.clone())?;
            Ok(value)
        }
        Err(e) => {
            cache.borrow_mut().abandon(key);
            Err(e)
        }
    }
}

/// Memo-backed lookup for one optimization step.
///
/// Resolves group references through the bound [`Memo`] and caches statistics
/// and cumulative costs by resolved node. The cluster width is sampled on first
/// use and kept for the lifetime of the lookup, so every alternative compared
/// during the step is priced against the same cluster.
pub struct MemoLookup<'a> {
    memo: &'a Memo,
    stats_calculator: Arc<dyn StatsCalculator>,
    cost_calculator: Arc<dyn CostCalculator>,
    stats: RefCell<MemoCache<PlanNodeId, PlanNodeStatsEstimate>>,
    costs: RefCell<MemoCache<(PlanNodeId, usize), PlanNodeCostEstimate>>,
    cluster_width: OnceCell<usize>,
}

impl<'a> MemoLookup<'a> {
    pub fn new(
        memo: &'a Memo,
        stats_calculator: Arc<dyn StatsCalculator>,
        cost_calculator: Arc<dyn CostCalculator>,
    ) -> Self {
        debug!(
            "Created memo lookup over {} groups ({} members)",
            memo.num_groups(),
            memo.num_members()
        );
        Self {
            memo,
            stats_calculator,
            cost_calculator,
            stats: RefCell::new(MemoCache::new("statistics")),
            costs: RefCell::new(MemoCache::new("cost")),
            cluster_width: OnceCell::new(),
        }
    }

    /// Number of nodes with cached statistics.
    pub fn cached_stats(&self) -> usize {
        self.stats.borrow().len()
    }

    /// Number of cached cumulative costs.
    pub fn cached_costs(&self) -> usize {
        self.costs.borrow().len()
    }
}

impl Lookup for MemoLookup<'_> {
    fn resolve_group(&self, node: &PlanNode) -> Result<Vec<PlanRef>> {
        match &node.op {
            PlanOp::GroupReference { group, .. } => Ok(self.memo.resolve(*group)?.to_vec()),
            _ => Err(not_a_group_reference(node)),
        }
    }

    fn get_stats(
        &self,
        node: &PlanRef,
        session: &Session,
        types: &TypeProvider,
    ) -> Result<PlanNodeStatsEstimate> {
        let key = self.resolve(node)?;
        cached(&self.stats, key.id, || {
            self.stats_calculator.calculate_stats(&key, self, session, types)
        })
    }

    fn cluster_width(&self) -> usize {
        *self
            .cluster_width
            .get_or_init(|| self.cost_calculator.cluster_width())
    }

    fn cumulative_cost_at(
        &self,
        node: &PlanRef,
        cluster_width: usize,
        session: &Session,
        types: &TypeProvider,
    ) -> Result<PlanNodeCostEstimate> {
        let key = self.resolve(node)?;
        cached(&self.costs, (key.id, cluster_width), || {
            self.cost_calculator
                .cumulative_cost_with_width(&key, self, cluster_width, session, types)
        })
    }
}

/// Lookup over fully materialized plans.
///
/// Holds no mutable state and can be shared across threads. Statistics and costs
/// are recomputed on every call, and group references are rejected.
#[derive(Clone)]
pub struct StatelessLookup {
    stats_calculator: Arc<dyn StatsCalculator>,
    cost_calculator: Arc<dyn CostCalculator>,
}

impl StatelessLookup {
    pub fn new(stats_calculator: Arc<dyn StatsCalculator>, cost_calculator: Arc<dyn CostCalculator>) -> Self {
        Self {
            stats_calculator,
            cost_calculator,
        }
    }
}

impl Lookup for StatelessLookup {
    fn resolve_group(&self, node: &PlanNode) -> Result<Vec<PlanRef>> {
        Err(EstimationError::UnresolvedReference {
            node: node.id,
            reason: "stateless lookup cannot resolve groups".into(),
        })
    }

    fn get_stats(
        &self,
        node: &PlanRef,
        session: &Session,
        types: &TypeProvider,
    ) -> Result<PlanNodeStatsEstimate> {
        let node = self.resolve(node)?;
        self.stats_calculator.calculate_stats(&node, self, session, types)
    }

    fn cluster_width(&self) -> usize {
        self.cost_calculator.cluster_width()
    }

    fn cumulative_cost_at(
        &self,
        node: &PlanRef,
        cluster_width: usize,
        session: &Session,
        types: &TypeProvider,
    ) -> Result<PlanNodeCostEstimate> {
        let node = self.resolve(node)?;
        self.cost_calculator
            .cumulative_cost_with_width(&node, self, cluster_width, session, types)
    }
}

/// Lookup that resolves groups through a caller-supplied function, for drivers
/// that keep their own group storage instead of a [`Memo`].
///
/// Statistics are computed without caching, and are unknown unless a stats
/// calculator is attached. Costs are always unknown.
pub struct FnLookup<F> {
    resolver: F,
    stats_calculator: Option<Arc<dyn StatsCalculator>>,
}

impl<F> FnLookup<F>
where
    F: Fn(GroupId) -> Vec<PlanRef>,
{
    pub fn new(resolver: F) -> Self {
        Self {
            resolver,
            stats_calculator: None,
        }
    }

    pub fn with_stats_calculator(mut self, stats_calculator: Arc<dyn StatsCalculator>) -> Self {
        self.stats_calculator = Some(stats_calculator);
        self
    }
}

impl<F> Lookup for FnLookup<F>
where
    F: Fn(GroupId) -> Vec<PlanRef>,
{
    fn resolve_group(&self, node: &PlanNode) -> Result<Vec<PlanRef>> {
        match &node.op {
            PlanOp::GroupReference { group, .. } => Ok((self.resolver)(*group)),
            _ => Err(not_a_group_reference(node)),
        }
    }

    fn get_stats(
        &self,
        node: &PlanRef,
        session: &Session,
        types: &TypeProvider,
    ) -> Result<PlanNodeStatsEstimate> {
        match &self.stats_calculator {
            Some(calculator) => calculator.calculate_stats(&*self.resolve(node)?, self, session, types),
            None => Ok(PlanNodeStatsEstimate::unknown()),
        }
    }

    fn cluster_width(&self) -> usize {
        1
    }

    fn cumulative_cost_at(
        &self,
        _: &PlanRef,
        _: usize,
        _: &Session,
        _: &TypeProvider,
    ) -> Result<PlanNodeCostEstimate> {
        Ok(PlanNodeCostEstimate::unknown())
    }
}

/// Lookup that performs no lookup at all: group references are rejected and
/// every estimate is unknown.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLookup;

impl Lookup for NoLookup {
    fn resolve_group(&self, node: &PlanNode) -> Result<Vec<PlanRef>> {
        Err(EstimationError::UnresolvedReference {
            node: node.id,
            reason: "group resolution is not available".into(),
        })
    }

    fn get_stats(&self, _: &PlanRef, _: &Session, _: &TypeProvider) -> Result<PlanNodeStatsEstimate> {
        Ok(PlanNodeStatsEstimate::unknown())
    }

    fn cluster_width(&self) -> usize {
        1
    }

    fn cumulative_cost_at(
        &self,
        _: &PlanRef,
        _: usize,
        _: &Session,
        _: &TypeProvider,
    ) -> Result<PlanNodeCostEstimate> {
        Ok(PlanNodeCostEstimate::unknown())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::cluster::FixedNodeCount;
    use crate::cost::ExchangeCostCalculator;
    use crate::estimate::Estimate;
    use crate::expr::ScalarValue;
    use crate::plan::PlanBuilder;
    use crate::stats::PlanStatsCalculator;

    fn calculators() -> (Arc<dyn StatsCalculator>, Arc<dyn CostCalculator>) {
        (
            Arc::new(PlanStatsCalculator::new(Arc::new(InMemoryCatalog::new()))),
            Arc::new(ExchangeCostCalculator::new(Arc::new(FixedNodeCount(4)))),
        )
    }

    #[test]
    fn test_forced_second_write_is_rejected() {
        let mut cache: MemoCache<PlanNodeId, u32> = MemoCache::new("statistics");
        let key = PlanNodeId(7);
        assert_eq!(cache.begin(key).unwrap(), None);
        cache.complete(key, 1).unwrap();
        assert_eq!(
            cache.complete(key, 2).unwrap_err(),
            EstimationError::DuplicateComputation {
                node: key,
                what: "statistics"
            }
        );
        assert_eq!(cache.begin(key).unwrap(), Some(1));
    }

    #[test]
    fn test_reentry_on_in_progress_key_is_rejected() {
        let mut cache: MemoCache<(PlanNodeId, usize), u32> = MemoCache::new("cost");
        let key = (PlanNodeId(3), 4);
        assert_eq!(cache.begin(key).unwrap(), None);
        assert!(matches!(
            cache.begin(key),
            Err(EstimationError::DuplicateComputation { node: PlanNodeId(3), .. })
        ));
        cache.abandon(key);
        assert_eq!(cache.begin(key).unwrap(), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_resolve_is_identity_for_concrete_nodes() {
        let mut p = PlanBuilder::new();
        let values = p.values(&["x"], vec![vec![ScalarValue::Int64(1)]]);
        let memo = Memo::new();
        let (stats, costs) = calculators();
        let lookup = MemoLookup::new(&memo, stats, costs);
        assert!(Arc::ptr_eq(&lookup.resolve(&values).unwrap(), &values));
        assert!(matches!(
            lookup.resolve_group(&values),
            Err(EstimationError::UnresolvedReference { .. })
        ));
    }

    #[test]
    fn test_stateless_and_no_lookup_reject_groups() {
        let mut p = PlanBuilder::new();
        let reference = p.group_reference(0, vec![]);
        let (stats, costs) = calculators();
        let stateless = StatelessLookup::new(stats, costs);
        let session = Session::default();
        let types = TypeProvider::new();

        assert!(matches!(
            stateless.get_stats(&reference, &session, &types),
            Err(EstimationError::UnresolvedReference { .. })
        ));
        assert!(matches!(
            NoLookup.resolve(&reference),
            Err(EstimationError::UnresolvedReference { .. })
        ));
        assert!(NoLookup.get_stats(&reference, &session, &types).unwrap().is_unknown());
        assert!(NoLookup
            .get_cumulative_cost(&reference, &session, &types)
            .unwrap()
            .has_unknown_components());
    }

    #[test]
    fn test_fn_lookup_resolves_through_closure() {
        let mut p = PlanBuilder::new();
        let values = p.values(&["x"], vec![vec![ScalarValue::Int64(1)], vec![ScalarValue::Int64(2)]]);
        let reference = p.group_reference(0, values.output_symbols());
        let limit = p.limit(reference.clone(), 1);
        let other = values.clone();
        let resolver = move |group: GroupId| match group {
            0 => vec![values.clone()],
            _ => vec![other.clone(), other.clone()],
        };
        let session = Session::default();
        let types = TypeProvider::new();

        let (stats, _) = calculators();
        let lookup = FnLookup::new(&resolver).with_stats_calculator(stats);
        assert_eq!(lookup.get_stats(&reference, &session, &types).unwrap().output_row_count, Estimate::of(2.0));
        assert_eq!(lookup.get_stats(&limit, &session, &types).unwrap().output_row_count, Estimate::of(1.0));
        assert!(lookup
            .get_cumulative_cost(&limit, &session, &types)
            .unwrap()
            .has_unknown_components());

        let ambiguous = p.group_reference(1, vec!["x".into()]);
        assert!(matches!(
            lookup.resolve(&ambiguous),
            Err(EstimationError::NonSingletonGroup { group: 1, members: 2 })
        ));
        assert!(FnLookup::new(&resolver)
            .get_stats(&limit, &session, &types)
            .unwrap()
            .is_unknown());
    }

    #[test]
    fn test_memo_lookup_pins_cluster_width() {
        use crate::cluster::AtomicNodeCount;

        let nodes = Arc::new(AtomicNodeCount::new(2));
        let memo = Memo::new();
        let lookup = MemoLookup::new(
            &memo,
            Arc::new(PlanStatsCalculator::new(Arc::new(InMemoryCatalog::new()))),
            Arc::new(ExchangeCostCalculator::new(nodes.clone())),
        );
        assert_eq!(lookup.cluster_width(), 2);
        nodes.set(16);
        assert_eq!(lookup.cluster_width(), 2);
    }
}
