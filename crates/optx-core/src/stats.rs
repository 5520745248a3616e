//! # Statistics Estimation
//!
//! This module defines the statistics structures and the per-operator derivation
//! rules used to predict the output of every plan node.
//!
//! ## Statistics Hierarchy
//!
//! - **Node-level**: output row count.
//! - **Symbol-level**: null fraction, number of distinct values (NDV), low/high
//!   value and average serialized width, for each output symbol.
//!
//! Every quantity is an [`Estimate`] and may be unknown. The output size in bytes,
//! which the cost model consumes, is derived from the row count and the per-symbol
//! widths:
//!
//! ```text
//! output_size = rows * Σ_symbols avg_row_size * (1 - nulls_fraction)
//! ```
//!
//! ## Derivation Rules
//!
//! [`PlanStatsCalculator`] dispatches on the operator. Statistics of children are
//! always obtained through the [`Lookup`] passed in, never by recursing on the
//! raw child, so that group references are resolved and results are memoized
//! uniformly:
//!
//! - **TableScan**: table statistics from the [`Catalog`], renamed to the scan's symbols.
//! - **Values**: computed from the literal rows.
//! - **Filter**: delegated to the [`FilterStatsEstimator`] collaborator.
//! - **Join**: `|L| * |R| / Π max(NDV(l), NDV(r))` over the equi-join criteria,
//!   floored at the preserved side for outer joins.
//! - **Aggregation**: product of group-by NDVs, capped by the input row count.
//! - **Limit / EnforceSingleRow**: row count clamped to the limit / to one.
//! - **Exchange**: sum of its sources.
//! - **Output / Sort / Project / SemiJoin**: row count of the source.
//!
//! Operators without a rule (currently `Window`) get [`PlanNodeStatsEstimate::unknown`].

use crate::catalog::Catalog;
use crate::error::{EstimationError, Result};
use crate::estimate::Estimate;
use crate::expr::{AggExpr, AggFunc, Expr, JoinType, ScalarValue, Symbol};
use crate::filter::{FilterStatsEstimator, HeuristicFilterEstimator};
use crate::lookup::Lookup;
use crate::plan::{PlanNode, PlanOp, PlanRef};
use crate::session::{Session, TypeProvider};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::trace;

/// Statistics of one output symbol.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolStatsEstimate {
    pub low_value: Estimate,
    pub high_value: Estimate,
    /// Fraction of rows that are NULL, in [0, 1].
    pub nulls_fraction: Estimate,
    pub distinct_values_count: Estimate,
    /// Average width of a non-null value in bytes.
    pub average_row_size: Estimate,
}

impl SymbolStatsEstimate {
    /// Every field unknown.
    pub fn unknown() -> Self {
        Self::default()
    }

    /// A symbol with no non-null values: empty range, NDV 0, all nulls.
    pub fn empty() -> Self {
        Self {
            low_value: Estimate::UNKNOWN,
            high_value: Estimate::UNKNOWN,
            nulls_fraction: Estimate::of(1.0),
            distinct_values_count: Estimate::ZERO,
            average_row_size: Estimate::ZERO,
        }
    }

    pub fn with_low_value(mut self, v: f64) -> Self {
        self.low_value = Estimate::of(v);
        self
    }

    pub fn with_high_value(mut self, v: f64) -> Self {
        self.high_value = Estimate::of(v);
        self
    }

    pub fn with_nulls_fraction(mut self, v: f64) -> Self {
        self.nulls_fraction = Estimate::of(v);
        self
    }

    pub fn with_distinct_values_count(mut self, v: f64) -> Self {
        self.distinct_values_count = Estimate::of(v);
        self
    }

    pub fn with_average_row_size(mut self, v: f64) -> Self {
        self.average_row_size = Estimate::of(v);
        self
    }

    /// Cap the distinct value count at `rows`; a relation cannot hold more
    /// distinct values than rows.
    fn capped_to(mut self, rows: Estimate) -> Self {
        if self.distinct_values_count.is_known() && rows.is_known() {
            self.distinct_values_count = self.distinct_values_count.min(rows);
        }
        self
    }

    /// Statistics of a constant column.
    fn of_literal(value: &ScalarValue, fixed_width: Option<f64>) -> Self {
        if value.is_null() {
            return Self::empty();
        }
        let numeric = value.as_f64().map(Estimate::of).unwrap_or_default();
        Self {
            low_value: numeric,
            high_value: numeric,
            nulls_fraction: Estimate::ZERO,
            distinct_values_count: Estimate::of(1.0),
            average_row_size: Estimate::of(fixed_width.unwrap_or_else(|| value.estimated_size())),
        }
    }
}

/// Statistics of a plan node's output.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanNodeStatsEstimate {
    pub output_row_count: Estimate,
    pub symbol_statistics: HashMap<Symbol, SymbolStatsEstimate>,
}

impl PlanNodeStatsEstimate {
    /// Nothing is known about the output.
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn new(output_row_count: f64) -> Self {
        Self {
            output_row_count: Estimate::of(output_row_count),
            symbol_statistics: HashMap::new(),
        }
    }

    pub fn with_symbol(mut self, symbol: impl Into<Symbol>, stats: SymbolStatsEstimate) -> Self {
        self.symbol_statistics.insert(symbol.into(), stats);
        self
    }

    /// Statistics for `symbol`, unknown when not tracked.
    pub fn symbol(&self, symbol: &Symbol) -> SymbolStatsEstimate {
        self.symbol_statistics.get(symbol).cloned().unwrap_or_default()
    }

    pub fn is_unknown(&self) -> bool {
        self.output_row_count.is_unknown()
    }

    /// Estimated size of the output in bytes.
    ///
    /// An unknown null fraction counts as "no nulls"; an unknown row count or an
    /// unknown width of any symbol makes the size unknown.
    pub fn output_size_in_bytes(&self) -> Estimate {
        let row_width: Estimate = self
            .symbol_statistics
            .values()
            .map(|s| {
                let non_null = 1.0 - s.nulls_fraction.or(0.0);
                s.average_row_size * non_null
            })
            .sum();
        self.output_row_count * row_width
    }

    /// Same statistics restricted to (and ordered like) `symbols`.
    fn project(&self, symbols: &[Symbol]) -> Self {
        Self {
            output_row_count: self.output_row_count,
            symbol_statistics: symbols
                .iter()
                .map(|s| (s.clone(), self.symbol(s)))
                .collect(),
        }
    }

    /// Same symbols with a new row count; NDVs are capped at the new count.
    fn with_row_count(&self, rows: Estimate) -> Self {
        Self {
            output_row_count: rows,
            symbol_statistics: self
                .symbol_statistics
                .iter()
                .map(|(s, stats)| (s.clone(), stats.clone().capped_to(rows)))
                .collect(),
        }
    }
}

/// Knobs for heuristic selectivity estimation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Selectivity of predicates the estimator cannot analyze.
    pub default_filter_selectivity: f64,
    /// Selectivity of a range comparison when the symbol's value range is unknown.
    pub range_selectivity: f64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            default_filter_selectivity: 0.1,
            range_selectivity: 0.33,
        }
    }
}

/// Derives the output statistics of a single plan node.
///
/// Implementations must read child statistics through `lookup` so that group
/// references are resolved and memoization applies transitively.
pub trait StatsCalculator: Send + Sync {
    fn calculate_stats(
        &self,
        node: &PlanNode,
        lookup: &dyn Lookup,
        session: &Session,
        types: &TypeProvider,
    ) -> Result<PlanNodeStatsEstimate>;
}

/// Default statistics calculator: one derivation rule per operator.
pub struct PlanStatsCalculator {
    catalog: Arc<dyn Catalog>,
    filter_estimator: Arc<dyn FilterStatsEstimator>,
}

impl PlanStatsCalculator {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self {
            catalog,
            filter_estimator: Arc::new(HeuristicFilterEstimator::default()),
        }
    }

    pub fn with_filter_estimator(mut self, estimator: Arc<dyn FilterStatsEstimator>) -> Self {
        self.filter_estimator = estimator;
        self
    }
}

impl StatsCalculator for PlanStatsCalculator {
    fn calculate_stats(
        &self,
        node: &PlanNode,
        lookup: &dyn Lookup,
        session: &Session,
        types: &TypeProvider,
    ) -> Result<PlanNodeStatsEstimate> {
        let source_stats =
            |source: &PlanRef| -> Result<PlanNodeStatsEstimate> { lookup.get_stats(source, session, types) };

        let stats = match &node.op {
            PlanOp::GroupReference { .. } => {
                return Err(EstimationError::UnresolvedReference {
                    node: node.id,
                    reason: "statistics requested for an unresolved group reference".into(),
                })
            }
            PlanOp::TableScan { table, assignments } => match self.catalog.get_table_stats(table) {
                Some(table_stats) => PlanNodeStatsEstimate {
                    output_row_count: table_stats.row_count,
                    symbol_statistics: assignments
                        .iter()
                        .map(|(symbol, column)| (symbol.clone(), table_stats.column(column)))
                        .collect(),
                },
                None => PlanNodeStatsEstimate::unknown(),
            },
            PlanOp::Values { outputs, rows } => values_stats(outputs, rows, types),
            PlanOp::Output { source, columns } => source_stats(source)?.project(columns),
            PlanOp::Sort { source, .. } => source_stats(source)?,
            PlanOp::Filter { source, predicate } => {
                self.filter_estimator
                    .filter_stats(&source_stats(source)?, predicate, session, types)
            }
            PlanOp::Project {
                source,
                assignments,
            } => project_stats(&source_stats(source)?, assignments, types),
            PlanOp::Aggregation {
                source,
                group_by,
                aggregates,
            } => aggregation_stats(&source_stats(source)?, group_by, aggregates, types),
            PlanOp::Join {
                left,
                right,
                join_type,
                criteria,
                ..
            } => join_stats(&source_stats(left)?, &source_stats(right)?, *join_type, criteria),
            PlanOp::SemiJoin {
                source,
                semi_join_output,
                ..
            } => {
                let input = source_stats(source)?;
                let marker = SymbolStatsEstimate::unknown()
                    .with_low_value(0.0)
                    .with_high_value(1.0)
                    .with_nulls_fraction(0.0)
                    .with_distinct_values_count(2.0)
                    .with_average_row_size(1.0)
                    .capped_to(input.output_row_count);
                input.with_symbol(semi_join_output.clone(), marker)
            }
            PlanOp::Exchange { sources, .. } => {
                let inputs = sources
                    .iter()
                    .map(|s| source_stats(s))
                    .collect::<Result<Vec<_>>>()?;
                exchange_stats(&inputs, &node.output_symbols())
            }
            PlanOp::Limit { source, count } => {
                let input = source_stats(source)?;
                let rows = input.output_row_count.min(Estimate::of(*count as f64));
                input.with_row_count(rows)
            }
            PlanOp::EnforceSingleRow { source } => {
                source_stats(source)?.with_row_count(Estimate::of(1.0))
            }
            _ => PlanNodeStatsEstimate::unknown(),
        };

        trace!(
            "Stats for {:?} node {}: rows={}, size={}",
            node.kind(),
            node.id,
            stats.output_row_count,
            stats.output_size_in_bytes()
        );
        Ok(stats)
    }
}

fn values_stats(outputs: &[Symbol], rows: &[Vec<ScalarValue>], types: &TypeProvider) -> PlanNodeStatsEstimate {
    let row_count = rows.len() as f64;
    let mut stats = PlanNodeStatsEstimate::new(row_count);

    for (index, symbol) in outputs.iter().enumerate() {
        let column: Vec<&ScalarValue> = rows.iter().filter_map(|r| r.get(index)).collect();
        let non_null: Vec<&ScalarValue> = column.iter().copied().filter(|v| !v.is_null()).collect();
        let distinct: HashSet<&ScalarValue> = non_null.iter().copied().collect();
        let numeric: Vec<f64> = non_null.iter().filter_map(|v| v.as_f64()).collect();

        let nulls_fraction = if row_count > 0.0 {
            (column.len() - non_null.len()) as f64 / row_count
        } else {
            0.0
        };
        let average_row_size = match types.get(symbol).and_then(|t| t.fixed_width()) {
            Some(width) => width,
            None if non_null.is_empty() => 0.0,
            None => non_null.iter().map(|v| v.estimated_size()).sum::<f64>() / non_null.len() as f64,
        };

        let mut symbol_stats = SymbolStatsEstimate::unknown()
            .with_nulls_fraction(nulls_fraction)
            .with_distinct_values_count(distinct.len() as f64)
            .with_average_row_size(average_row_size);
        if !numeric.is_empty() {
            symbol_stats.low_value = Estimate::of(numeric.iter().copied().fold(f64::INFINITY, f64::min));
            symbol_stats.high_value = Estimate::of(numeric.iter().copied().fold(f64::NEG_INFINITY, f64::max));
        }
        stats.symbol_statistics.insert(symbol.clone(), symbol_stats);
    }
    stats
}

fn project_stats(
    input: &PlanNodeStatsEstimate,
    assignments: &[(Symbol, Expr)],
    types: &TypeProvider,
) -> PlanNodeStatsEstimate {
    let mut stats = PlanNodeStatsEstimate {
        output_row_count: input.output_row_count,
        symbol_statistics: HashMap::new(),
    };
    for (symbol, expr) in assignments {
        let fixed_width = types.get(symbol).and_then(|t| t.fixed_width());
        let symbol_stats = match expr {
            Expr::Symbol(source_symbol) => input.symbol(source_symbol),
            Expr::Literal(value) => SymbolStatsEstimate::of_literal(value, fixed_width),
            // Computed expressions: only the width is derivable, and only from the type.
            _ => SymbolStatsEstimate {
                average_row_size: fixed_width.map(Estimate::of).unwrap_or_default(),
                ..SymbolStatsEstimate::unknown()
            },
        };
        stats.symbol_statistics.insert(symbol.clone(), symbol_stats);
    }
    stats
}

fn aggregation_stats(
    input: &PlanNodeStatsEstimate,
    group_by: &[Symbol],
    aggregates: &[(Symbol, AggExpr)],
    types: &TypeProvider,
) -> PlanNodeStatsEstimate {
    // Global aggregation always produces exactly one row. Otherwise assume every
    // combination of group-by values exists, capped by the input row count.
    let rows = if group_by.is_empty() {
        Estimate::of(1.0)
    } else {
        let combinations = group_by.iter().fold(Estimate::of(1.0), |acc, symbol| {
            acc * input.symbol(symbol).distinct_values_count
        });
        combinations.min(input.output_row_count).max(Estimate::of(1.0))
    };

    let mut stats = PlanNodeStatsEstimate {
        output_row_count: rows,
        symbol_statistics: HashMap::new(),
    };
    for symbol in group_by {
        stats
            .symbol_statistics
            .insert(symbol.clone(), input.symbol(symbol).capped_to(rows));
    }
    for (symbol, aggregate) in aggregates {
        let fixed_width = types.get(symbol).and_then(|t| t.fixed_width());
        let argument = aggregate.arg.as_ref().map(|a| input.symbol(a)).unwrap_or_default();
        let symbol_stats = match aggregate.func {
            AggFunc::Count => SymbolStatsEstimate {
                // a count never exceeds its input rows, or the argument's NDV when distinct
                high_value: if aggregate.distinct {
                    argument.distinct_values_count
                } else {
                    input.output_row_count
                },
                ..SymbolStatsEstimate::unknown()
                    .with_nulls_fraction(0.0)
                    .with_low_value(0.0)
                    .with_average_row_size(8.0)
            },
            AggFunc::Min | AggFunc::Max => SymbolStatsEstimate {
                distinct_values_count: argument.distinct_values_count.min(rows),
                ..argument
            },
            AggFunc::Sum | AggFunc::Avg => SymbolStatsEstimate {
                average_row_size: Estimate::of(fixed_width.unwrap_or(8.0)),
                ..SymbolStatsEstimate::unknown()
            },
        };
        stats.symbol_statistics.insert(symbol.clone(), symbol_stats);
    }
    stats
}

fn join_stats(
    left: &PlanNodeStatsEstimate,
    right: &PlanNodeStatsEstimate,
    join_type: JoinType,
    criteria: &[(Symbol, Symbol)],
) -> PlanNodeStatsEstimate {
    // Each equi-join clause contributes 1 / max(NDV_left, NDV_right) under the
    // containment assumption; clauses are treated as independent. Without NDV
    // information every value is assumed distinct.
    let selectivity = criteria.iter().fold(Estimate::of(1.0), |acc, (l, r)| {
        let left_ndv = left.symbol(l).distinct_values_count.or_else(left.output_row_count);
        let right_ndv = right.symbol(r).distinct_values_count.or_else(right.output_row_count);
        acc / left_ndv.max(right_ndv).max(Estimate::of(1.0))
    });
    let inner_rows = left.output_row_count * right.output_row_count * selectivity;

    let rows = match join_type {
        JoinType::Inner => inner_rows,
        JoinType::Left => inner_rows.max(left.output_row_count),
        JoinType::Right => inner_rows.max(right.output_row_count),
        JoinType::Full => inner_rows.max(left.output_row_count.max(right.output_row_count)),
    };

    PlanNodeStatsEstimate {
        output_row_count: rows,
        symbol_statistics: left
            .symbol_statistics
            .iter()
            .chain(right.symbol_statistics.iter())
            .map(|(s, stats)| (s.clone(), stats.clone().capped_to(rows)))
            .collect(),
    }
}

fn exchange_stats(inputs: &[PlanNodeStatsEstimate], outputs: &[Symbol]) -> PlanNodeStatsEstimate {
    let rows: Estimate = inputs.iter().map(|i| i.output_row_count).sum();
    if inputs.len() == 1 || rows.value() == Some(0.0) {
        return match inputs.first() {
            Some(only) => only.project(outputs).with_row_count(rows),
            None => PlanNodeStatsEstimate::unknown(),
        };
    }

    // Row-weighted merge of per-source symbol statistics.
    let mut stats = PlanNodeStatsEstimate {
        output_row_count: rows,
        symbol_statistics: HashMap::new(),
    };
    for symbol in outputs {
        let per_source: Vec<(SymbolStatsEstimate, Estimate)> = inputs
            .iter()
            .map(|i| (i.symbol(symbol), i.output_row_count))
            .collect();
        let weighted = |field: fn(&SymbolStatsEstimate) -> Estimate| -> Estimate {
            per_source
                .iter()
                .map(|(s, r)| field(s) * *r)
                .sum::<Estimate>()
                / rows
        };
        let merged = SymbolStatsEstimate {
            low_value: fold_estimates(per_source.iter().map(|(s, _)| s.low_value), Estimate::min),
            high_value: fold_estimates(per_source.iter().map(|(s, _)| s.high_value), Estimate::max),
            nulls_fraction: weighted(|s| s.nulls_fraction),
            distinct_values_count: fold_estimates(
                per_source.iter().map(|(s, _)| s.distinct_values_count),
                Estimate::max,
            ),
            average_row_size: weighted(|s| s.average_row_size),
        };
        stats.symbol_statistics.insert(symbol.clone(), merged);
    }
    stats
}

fn fold_estimates(
    mut values: impl Iterator<Item = Estimate>,
    f: fn(Estimate, Estimate) -> Estimate,
) -> Estimate {
    let first = values.next().unwrap_or_default();
    values.fold(first, f)
}
