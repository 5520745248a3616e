//! # Plan Representation
//!
//! A plan is an immutable tree of [`PlanNode`]s. Each node carries a stable
//! [`PlanNodeId`] and a [`PlanOp`] describing the relational operator. Children
//! are shared through `Arc` ([`PlanRef`]) so the memo can hand the same node to
//! many lookups without copying subtrees.
//!
//! ## Closed Operator Set
//!
//! `PlanOp` is a closed sum type. Estimators match on it exhaustively and keep a
//! default arm for operators they do not specialize (e.g. `Window` has no
//! statistics rule), which yields an *unknown* estimate instead of an error.
//!
//! ## Group References
//!
//! `PlanOp::GroupReference` is a symbolic placeholder standing for "whatever plan
//! currently lives in memo group G". It owns no children. Estimators refuse to
//! price it directly; it must be resolved through a [`Lookup`](crate::lookup::Lookup)
//! first.
//!
//! ## Identity
//!
//! Memoization keys on `PlanNodeId`, never on structural equality. Ids are handed
//! out by a [`PlanNodeIdAllocator`] and survive [`PlanNode::map_sources`], which is
//! how the memo swaps real children for group references.

use crate::error::{EstimationError, Result};
use crate::expr::{AggExpr, Expr, JoinType, ScalarValue, SortKey, Symbol, TableRef};
use crate::memo::GroupId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Shared, immutable handle to a plan node.
pub type PlanRef = Arc<PlanNode>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanNodeId(pub u64);

impl fmt::Display for PlanNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out unique plan node ids.
#[derive(Debug)]
pub struct PlanNodeIdAllocator {
    /// `None` once `u64::MAX` has been handed out.
    next: Option<u64>,
}

impl Default for PlanNodeIdAllocator {
    fn default() -> Self {
        Self { next: Some(0) }
    }
}

impl PlanNodeIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// An allocator whose ids never collide with any id already used in `plan`.
    pub fn starting_after(plan: &PlanNode) -> Self {
        fn max_id(node: &PlanNode) -> u64 {
            node.sources()
                .into_iter()
                .map(|s| max_id(s))
                .fold(node.id.0, u64::max)
        }
        Self {
            next: max_id(plan).checked_add(1),
        }
    }

    pub fn next_id(&mut self) -> Result<PlanNodeId> {
        let id = self.next.ok_or(EstimationError::PlanNodeIdsExhausted)?;
        self.next = id.checked_add(1);
        Ok(PlanNodeId(id))
    }
}

/// How the build side of a join or semi-join is laid out across workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DistributionType {
    /// Both sides hash-partitioned on the join keys.
    Partitioned,
    /// Build side broadcast to every worker.
    Replicated,
}

/// Data movement performed by an `Exchange` node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExchangeType {
    /// Funnel all rows to a single consumer.
    Gather,
    /// Hash-partition rows across consumers.
    Repartition,
    /// Send every row to every consumer.
    Replicate,
    /// Spread rows evenly without a partitioning function. The cost model has no
    /// formula for it.
    RoundRobin,
}

/// Whether an exchange crosses worker boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExchangeScope {
    /// Between drivers of the same worker; no network transfer.
    Local,
    /// Between workers.
    Remote,
}

/// One relational operator together with its identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    pub id: PlanNodeId,
    #[serde(flatten)]
    pub op: PlanOp,
}

/// Relational operators known to the estimation core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlanOp {
    /// Root of a query: renames/selects the final output columns.
    Output {
        source: PlanRef,
        columns: Vec<Symbol>,
    },
    Filter {
        source: PlanRef,
        predicate: Expr,
    },
    Project {
        source: PlanRef,
        assignments: Vec<(Symbol, Expr)>,
    },
    /// Grouped (or, with empty `group_by`, global) aggregation.
    Aggregation {
        source: PlanRef,
        group_by: Vec<Symbol>,
        aggregates: Vec<(Symbol, AggExpr)>,
    },
    /// Equi-join. `left` is the probe side and `right` the build side.
    Join {
        left: PlanRef,
        right: PlanRef,
        join_type: JoinType,
        criteria: Vec<(Symbol, Symbol)>,
        #[serde(default)]
        distribution: Option<DistributionType>,
    },
    /// Marks each `source` row with whether its key appears in `filtering_source`.
    SemiJoin {
        source: PlanRef,
        filtering_source: PlanRef,
        source_join_symbol: Symbol,
        filtering_source_join_symbol: Symbol,
        semi_join_output: Symbol,
        #[serde(default)]
        distribution: Option<DistributionType>,
    },
    /// Data movement. All sources share the output layout of the first one.
    Exchange {
        sources: Vec<PlanRef>,
        exchange_type: ExchangeType,
        scope: ExchangeScope,
    },
    /// Leaf reading a base table. Each assignment maps an output symbol to a column.
    TableScan {
        table: TableRef,
        assignments: Vec<(Symbol, String)>,
    },
    /// Inline rows.
    Values {
        outputs: Vec<Symbol>,
        rows: Vec<Vec<ScalarValue>>,
    },
    Limit {
        source: PlanRef,
        count: u64,
    },
    /// Fails at runtime unless the source produces exactly one row.
    EnforceSingleRow {
        source: PlanRef,
    },
    Sort {
        source: PlanRef,
        order: Vec<SortKey>,
    },
    /// Window functions, each producing one new symbol.
    Window {
        source: PlanRef,
        partition_by: Vec<Symbol>,
        functions: Vec<(Symbol, String)>,
    },
    /// Placeholder for the members of a memo group.
    GroupReference {
        group: GroupId,
        outputs: Vec<Symbol>,
    },
}

/// Data-free discriminant of a [`PlanOp`], used in logs and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlanNodeKind {
    Output,
    Filter,
    Project,
    Aggregation,
    Join,
    SemiJoin,
    Exchange,
    TableScan,
    Values,
    Limit,
    EnforceSingleRow,
    Sort,
    Window,
    GroupReference,
}

impl PlanNode {
    pub fn new(id: PlanNodeId, op: PlanOp) -> Self {
        Self { id, op }
    }

    pub fn kind(&self) -> PlanNodeKind {
        match &self.op {
            PlanOp::Output { .. } => PlanNodeKind::Output,
            PlanOp::Filter { .. } => PlanNodeKind::Filter,
            PlanOp::Project { .. } => PlanNodeKind::Project,
            PlanOp::Aggregation { .. } => PlanNodeKind::Aggregation,
            PlanOp::Join { .. } => PlanNodeKind::Join,
            PlanOp::SemiJoin { .. } => PlanNodeKind::SemiJoin,
            PlanOp::Exchange { .. } => PlanNodeKind::Exchange,
            PlanOp::TableScan { .. } => PlanNodeKind::TableScan,
            PlanOp::Values { .. } => PlanNodeKind::Values,
            PlanOp::Limit { .. } => PlanNodeKind::Limit,
            PlanOp::EnforceSingleRow { .. } => PlanNodeKind::EnforceSingleRow,
            PlanOp::Sort { .. } => PlanNodeKind::Sort,
            PlanOp::Window { .. } => PlanNodeKind::Window,
            PlanOp::GroupReference { .. } => PlanNodeKind::GroupReference,
        }
    }

    pub fn is_group_reference(&self) -> bool {
        matches!(self.op, PlanOp::GroupReference { .. })
    }

    /// Children in operator order. Joins list probe before build.
    pub fn sources(&self) -> Vec<&PlanRef> {
        match &self.op {
            PlanOp::Output { source, .. }
            | PlanOp::Filter { source, .. }
            | PlanOp::Project { source, .. }
            | PlanOp::Aggregation { source, .. }
            | PlanOp::Limit { source, .. }
            | PlanOp::EnforceSingleRow { source }
            | PlanOp::Sort { source, .. }
            | PlanOp::Window { source, .. } => vec![source],
            PlanOp::Join { left, right, .. } => vec![left, right],
            PlanOp::SemiJoin {
                source,
                filtering_source,
                ..
            } => vec![source, filtering_source],
            PlanOp::Exchange { sources, .. } => sources.iter().collect(),
            PlanOp::TableScan { .. } | PlanOp::Values { .. } | PlanOp::GroupReference { .. } => {
                vec![]
            }
        }
    }

    /// Rebuild this node with every child replaced by `f(child)`. The id is kept.
    pub fn map_sources<F>(&self, mut f: F) -> Result<PlanNode>
    where
        F: FnMut(&PlanRef) -> Result<PlanRef>,
    {
        let mut op = self.op.clone();
        match &mut op {
            PlanOp::Output { source, .. }
            | PlanOp::Filter { source, .. }
            | PlanOp::Project { source, .. }
            | PlanOp::Aggregation { source, .. }
            | PlanOp::Limit { source, .. }
            | PlanOp::EnforceSingleRow { source }
            | PlanOp::Sort { source, .. }
            | PlanOp::Window { source, .. } => *source = f(source)?,
            PlanOp::Join { left, right, .. } => {
                *left = f(left)?;
                *right = f(right)?;
            }
            PlanOp::SemiJoin {
                source,
                filtering_source,
                ..
            } => {
                *source = f(source)?;
                *filtering_source = f(filtering_source)?;
            }
            PlanOp::Exchange { sources, .. } => {
                for source in sources.iter_mut() {
                    *source = f(source)?;
                }
            }
            PlanOp::TableScan { .. } | PlanOp::Values { .. } | PlanOp::GroupReference { .. } => {}
        }
        Ok(PlanNode { id: self.id, op })
    }

    /// Output symbols, in order. Fixed at construction because nodes are immutable.
    pub fn output_symbols(&self) -> Vec<Symbol> {
        match &self.op {
            PlanOp::Output { columns, .. } => columns.clone(),
            PlanOp::Filter { source, .. }
            | PlanOp::Limit { source, .. }
            | PlanOp::EnforceSingleRow { source }
            | PlanOp::Sort { source, .. } => source.output_symbols(),
            PlanOp::Project { assignments, .. } => {
                assignments.iter().map(|(s, _)| s.clone()).collect()
            }
            PlanOp::Aggregation {
                group_by,
                aggregates,
                ..
            } => group_by
                .iter()
                .cloned()
                .chain(aggregates.iter().map(|(s, _)| s.clone()))
                .collect(),
            PlanOp::Join { left, right, .. } => {
                let mut out = left.output_symbols();
                out.extend(right.output_symbols());
                out
            }
            PlanOp::SemiJoin {
                source,
                semi_join_output,
                ..
            } => {
                let mut out = source.output_symbols();
                out.push(semi_join_output.clone());
                out
            }
            PlanOp::Exchange { sources, .. } => sources
                .first()
                .map(|s| s.output_symbols())
                .unwrap_or_default(),
            PlanOp::TableScan { assignments, .. } => {
                assignments.iter().map(|(s, _)| s.clone()).collect()
            }
            PlanOp::Window {
                source, functions, ..
            } => {
                let mut out = source.output_symbols();
                out.extend(functions.iter().map(|(s, _)| s.clone()));
                out
            }
            PlanOp::Values { outputs, .. } | PlanOp::GroupReference { outputs, .. } => {
                outputs.clone()
            }
        }
    }
}

/// Convenience constructor for plan trees with freshly allocated ids.
///
/// Every method returns a [`PlanRef`] so calls can be nested the way the plan
/// reads:
///
/// ```
/// use optx_core::expr::{JoinType, TableRef};
/// use optx_core::plan::PlanBuilder;
///
/// let mut p = PlanBuilder::new();
/// let orders = p.table_scan(TableRef::new("tpch", "orders"), &[("o_custkey", "o_custkey")]);
/// let customer = p.table_scan(TableRef::new("tpch", "customer"), &[("c_custkey", "c_custkey")]);
/// let join = p.join(JoinType::Inner, orders, customer, &[("o_custkey", "c_custkey")], None);
/// assert_eq!(join.output_symbols().len(), 2);
/// ```
#[derive(Debug, Default)]
pub struct PlanBuilder {
    next: u64,
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give up the builder and keep allocating ids where it left off.
    pub fn into_allocator(self) -> PlanNodeIdAllocator {
        PlanNodeIdAllocator { next: Some(self.next) }
    }

    pub fn node(&mut self, op: PlanOp) -> PlanRef {
        let id = PlanNodeId(self.next);
        self.next += 1;
        Arc::new(PlanNode::new(id, op))
    }

    pub fn table_scan(&mut self, table: TableRef, assignments: &[(&str, &str)]) -> PlanRef {
        self.node(PlanOp::TableScan {
            table,
            assignments: assignments
                .iter()
                .map(|(s, c)| (Symbol::from(*s), c.to_string()))
                .collect(),
        })
    }

    pub fn values(&mut self, outputs: &[&str], rows: Vec<Vec<ScalarValue>>) -> PlanRef {
        self.node(PlanOp::Values {
            outputs: outputs.iter().map(|s| Symbol::from(*s)).collect(),
            rows,
        })
    }

    pub fn output(&mut self, source: PlanRef, columns: &[&str]) -> PlanRef {
        self.node(PlanOp::Output {
            source,
            columns: columns.iter().map(|s| Symbol::from(*s)).collect(),
        })
    }

    pub fn filter(&mut self, source: PlanRef, predicate: Expr) -> PlanRef {
        self.node(PlanOp::Filter { source, predicate })
    }

    pub fn project(&mut self, source: PlanRef, assignments: Vec<(Symbol, Expr)>) -> PlanRef {
        self.node(PlanOp::Project {
            source,
            assignments,
        })
    }

    pub fn aggregation(
        &mut self,
        source: PlanRef,
        group_by: &[&str],
        aggregates: Vec<(Symbol, AggExpr)>,
    ) -> PlanRef {
        self.node(PlanOp::Aggregation {
            source,
            group_by: group_by.iter().map(|s| Symbol::from(*s)).collect(),
            aggregates,
        })
    }

    pub fn join(
        &mut self,
        join_type: JoinType,
        left: PlanRef,
        right: PlanRef,
        criteria: &[(&str, &str)],
        distribution: Option<DistributionType>,
    ) -> PlanRef {
        self.node(PlanOp::Join {
            left,
            right,
            join_type,
            criteria: criteria
                .iter()
                .map(|(l, r)| (Symbol::from(*l), Symbol::from(*r)))
                .collect(),
            distribution,
        })
    }

    pub fn semi_join(
        &mut self,
        source: PlanRef,
        filtering_source: PlanRef,
        source_join_symbol: &str,
        filtering_source_join_symbol: &str,
        semi_join_output: &str,
        distribution: Option<DistributionType>,
    ) -> PlanRef {
        self.node(PlanOp::SemiJoin {
            source,
            filtering_source,
            source_join_symbol: Symbol::from(source_join_symbol),
            filtering_source_join_symbol: Symbol::from(filtering_source_join_symbol),
            semi_join_output: Symbol::from(semi_join_output),
            distribution,
        })
    }

    pub fn exchange(
        &mut self,
        exchange_type: ExchangeType,
        scope: ExchangeScope,
        sources: Vec<PlanRef>,
    ) -> PlanRef {
        self.node(PlanOp::Exchange {
            sources,
            exchange_type,
            scope,
        })
    }

    pub fn limit(&mut self, source: PlanRef, count: u64) -> PlanRef {
        self.node(PlanOp::Limit { source, count })
    }

    pub fn enforce_single_row(&mut self, source: PlanRef) -> PlanRef {
        self.node(PlanOp::EnforceSingleRow { source })
    }

    pub fn window(
        &mut self,
        source: PlanRef,
        partition_by: &[&str],
        functions: &[(&str, &str)],
    ) -> PlanRef {
        self.node(PlanOp::Window {
            source,
            partition_by: partition_by.iter().map(|s| Symbol::from(*s)).collect(),
            functions: functions
                .iter()
                .map(|(s, f)| (Symbol::from(*s), f.to_string()))
                .collect(),
        })
    }

    pub fn group_reference(&mut self, group: GroupId, outputs: Vec<Symbol>) -> PlanRef {
        self.node(PlanOp::GroupReference { group, outputs })
    }
}
