//! # Filter Selectivity
//!
//! A `Filter` node's statistics are produced by a [`FilterStatsEstimator`]
//! collaborator. The default, [`HeuristicFilterEstimator`], derives a selectivity
//! from the predicate shape and the input's symbol statistics:
//!
//! | Predicate             | Selectivity                                        |
//! |-----------------------|----------------------------------------------------|
//! | `s = literal`         | `1 / NDV(s)`                                       |
//! | `a = b`               | `1 / max(NDV(a), NDV(b))`                          |
//! | `s <> x`              | `1 - sel(s = x)`                                   |
//! | `s < literal` (etc.)  | covered fraction of `[low, high]`, else the range default |
//! | `s IS [NOT] NULL`     | null fraction (or its complement)                  |
//! | `NOT p`               | `1 - sel(p)`                                       |
//! | `p AND q`             | `sel(p) * sel(q)` (independence)                   |
//! | `p OR q`              | `sel(p) + sel(q) - sel(p) * sel(q)`                |
//! | `TRUE` / `FALSE`      | 1 / 0                                              |
//! | anything else         | `default_filter_selectivity`                       |
//!
//! Output row count is `input_rows * selectivity`. Distinct value counts are
//! scaled by the same ratio and capped at the new row count. A symbol
//! constrained by `s = literal` gets NDV 1 and no nulls. When no row survives,
//! every symbol has NDV 0, an empty range and a null fraction of 1.

use crate::estimate::Estimate;
use crate::expr::{BinaryOp, Expr, ScalarValue, Symbol, UnaryOp};
use crate::session::{Session, TypeProvider};
use crate::stats::{PlanNodeStatsEstimate, StatsConfig, SymbolStatsEstimate};
use tracing::trace;

/// Derives the statistics of rows surviving a predicate.
pub trait FilterStatsEstimator: Send + Sync {
    fn filter_stats(
        &self,
        input: &PlanNodeStatsEstimate,
        predicate: &Expr,
        session: &Session,
        types: &TypeProvider,
    ) -> PlanNodeStatsEstimate;
}

#[derive(Debug, Clone, Default)]
pub struct HeuristicFilterEstimator {
    config: StatsConfig,
}

impl HeuristicFilterEstimator {
    pub fn new(config: StatsConfig) -> Self {
        Self { config }
    }

    /// Fraction of input rows satisfying `predicate`, in [0, 1].
    pub fn selectivity(&self, predicate: &Expr, input: &PlanNodeStatsEstimate) -> f64 {
        let sel = match predicate {
            Expr::Literal(ScalarValue::Bool(true)) => 1.0,
            Expr::Literal(ScalarValue::Bool(false)) | Expr::Literal(ScalarValue::Null) => 0.0,
            Expr::And(conjuncts) => conjuncts
                .iter()
                .map(|c| self.selectivity(c, input))
                .product(),
            Expr::Or(disjuncts) => disjuncts.iter().fold(0.0, |acc, d| {
                let s = self.selectivity(d, input);
                acc + s - acc * s
            }),
            Expr::UnaryOp { op, operand } => self.unary_selectivity(*op, operand, input),
            Expr::BinaryOp { op, left, right } => self.comparison_selectivity(*op, left, right, input),
            _ => self.config.default_filter_selectivity,
        };
        sel.clamp(0.0, 1.0)
    }

    fn unary_selectivity(&self, op: UnaryOp, operand: &Expr, input: &PlanNodeStatsEstimate) -> f64 {
        match (op, operand) {
            (UnaryOp::Not, inner) => 1.0 - self.selectivity(inner, input),
            (UnaryOp::IsNull, Expr::Symbol(s)) => input
                .symbol(s)
                .nulls_fraction
                .or(self.config.default_filter_selectivity),
            (UnaryOp::IsNotNull, Expr::Symbol(s)) => input
                .symbol(s)
                .nulls_fraction
                .map(|n| 1.0 - n)
                .or(1.0 - self.config.default_filter_selectivity),
            _ => self.config.default_filter_selectivity,
        }
    }

    fn comparison_selectivity(
        &self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        input: &PlanNodeStatsEstimate,
    ) -> f64 {
        match (op, left, right) {
            (BinaryOp::Eq, Expr::Symbol(s), Expr::Literal(_))
            | (BinaryOp::Eq, Expr::Literal(_), Expr::Symbol(s)) => self.equality(input.symbol(s)),
            (BinaryOp::Eq, Expr::Symbol(a), Expr::Symbol(b)) => {
                let ndv = input
                    .symbol(a)
                    .distinct_values_count
                    .max(input.symbol(b).distinct_values_count);
                match ndv.value() {
                    Some(n) if n >= 1.0 => 1.0 / n,
                    _ => self.config.default_filter_selectivity,
                }
            }
            (BinaryOp::NotEq, l, r) => 1.0 - self.comparison_selectivity(BinaryOp::Eq, l, r, input),
            (op, Expr::Symbol(s), Expr::Literal(v)) if op.is_range_comparison() => {
                self.range(op, &input.symbol(s), v)
            }
            (op, Expr::Literal(v), Expr::Symbol(s)) if op.is_range_comparison() => {
                self.range(flip(op), &input.symbol(s), v)
            }
            (op, _, _) if op.is_range_comparison() => self.config.range_selectivity,
            _ => self.config.default_filter_selectivity,
        }
    }

    fn equality(&self, stats: SymbolStatsEstimate) -> f64 {
        let non_null = 1.0 - stats.nulls_fraction.or(0.0);
        match stats.distinct_values_count.value() {
            Some(ndv) if ndv >= 1.0 => non_null / ndv,
            Some(_) => 0.0,
            None => self.config.default_filter_selectivity,
        }
    }

    /// Uniform-distribution estimate over `[low, high]`.
    fn range(&self, op: BinaryOp, stats: &SymbolStatsEstimate, literal: &ScalarValue) -> f64 {
        let (Some(low), Some(high), Some(value)) = (
            stats.low_value.value(),
            stats.high_value.value(),
            literal.as_f64(),
        ) else {
            return self.config.range_selectivity;
        };
        let non_null = 1.0 - stats.nulls_fraction.or(0.0);
        if high <= low {
            let satisfied = match op {
                BinaryOp::Lt => low < value,
                BinaryOp::LtEq => low <= value,
                BinaryOp::Gt => low > value,
                _ => low >= value,
            };
            return if satisfied { non_null } else { 0.0 };
        }
        let below = ((value - low) / (high - low)).clamp(0.0, 1.0);
        let fraction = match op {
            BinaryOp::Lt | BinaryOp::LtEq => below,
            _ => 1.0 - below,
        };
        fraction * non_null
    }
}

/// `literal < s` is `s > literal`.
fn flip(op: BinaryOp) -> BinaryOp {
    match op {
        BinaryOp::Lt => BinaryOp::Gt,
        BinaryOp::LtEq => BinaryOp::GtEq,
        BinaryOp::Gt => BinaryOp::Lt,
        BinaryOp::GtEq => BinaryOp::LtEq,
        other => other,
    }
}

/// Symbols pinned to a single value by top-level `s = literal` conjuncts.
fn equality_constrained(predicate: &Expr) -> Vec<&Symbol> {
    predicate
        .conjuncts()
        .into_iter()
        .filter_map(|c| match c {
            Expr::BinaryOp {
                op: BinaryOp::Eq,
                left,
                right,
            } => match (left.as_ref(), right.as_ref()) {
                (Expr::Symbol(s), Expr::Literal(v)) | (Expr::Literal(v), Expr::Symbol(s))
                    if !v.is_null() =>
                {
                    Some(s)
                }
                _ => None,
            },
            _ => None,
        })
        .collect()
}

impl FilterStatsEstimator for HeuristicFilterEstimator {
    fn filter_stats(
        &self,
        input: &PlanNodeStatsEstimate,
        predicate: &Expr,
        _session: &Session,
        _types: &TypeProvider,
    ) -> PlanNodeStatsEstimate {
        let selectivity = self.selectivity(predicate, input);
        let rows = input.output_row_count * selectivity;
        let pinned = equality_constrained(predicate);

        let symbol_statistics = input
            .symbol_statistics
            .iter()
            .map(|(symbol, stats)| {
                if rows.value() == Some(0.0) {
                    return (symbol.clone(), SymbolStatsEstimate::empty());
                }
                let mut stats = stats.clone();
                if pinned.contains(&symbol) {
                    stats.distinct_values_count = Estimate::of(1.0);
                    stats.nulls_fraction = Estimate::ZERO;
                } else {
                    stats.distinct_values_count = stats.distinct_values_count * selectivity;
                }
                if stats.distinct_values_count.is_known() && rows.is_known() {
                    stats.distinct_values_count = stats.distinct_values_count.min(rows);
                }
                (symbol.clone(), stats)
            })
            .collect();

        trace!(
            "Filter selectivity {:.4}: rows {} -> {}",
            selectivity,
            input.output_row_count,
            rows
        );
        PlanNodeStatsEstimate {
            output_row_count: rows,
            symbol_statistics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> PlanNodeStatsEstimate {
        PlanNodeStatsEstimate::new(1000.0)
            .with_symbol(
                "k",
                SymbolStatsEstimate::unknown()
                    .with_distinct_values_count(50.0)
                    .with_nulls_fraction(0.0)
                    .with_low_value(0.0)
                    .with_high_value(100.0)
                    .with_average_row_size(8.0),
            )
            .with_symbol(
                "n",
                SymbolStatsEstimate::unknown()
                    .with_distinct_values_count(10.0)
                    .with_nulls_fraction(0.2)
                    .with_average_row_size(8.0),
            )
            .with_symbol("u", SymbolStatsEstimate::unknown())
    }

    fn eq(symbol: &str, v: i64) -> Expr {
        Expr::binary(BinaryOp::Eq, Expr::symbol(symbol), Expr::literal(ScalarValue::Int64(v)))
    }

    fn cmp(op: BinaryOp, symbol: &str, v: i64) -> Expr {
        Expr::binary(op, Expr::symbol(symbol), Expr::literal(ScalarValue::Int64(v)))
    }

    #[test]
    fn test_equality_uses_ndv() {
        let est = HeuristicFilterEstimator::default();
        assert!((est.selectivity(&eq("k", 5), &input()) - 0.02).abs() < 1e-9);
        // 0.8 non-null / 10 distinct
        assert!((est.selectivity(&eq("n", 5), &input()) - 0.08).abs() < 1e-9);
        assert!((est.selectivity(&eq("u", 5), &input()) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_range_interpolates() {
        let est = HeuristicFilterEstimator::default();
        assert!((est.selectivity(&cmp(BinaryOp::Lt, "k", 25), &input()) - 0.25).abs() < 1e-9);
        assert!((est.selectivity(&cmp(BinaryOp::GtEq, "k", 25), &input()) - 0.75).abs() < 1e-9);
        let flipped = Expr::binary(BinaryOp::Gt, Expr::literal(ScalarValue::Int64(25)), Expr::symbol("k"));
        assert!((est.selectivity(&flipped, &input()) - 0.25).abs() < 1e-9);
        assert!((est.selectivity(&cmp(BinaryOp::Lt, "u", 25), &input()) - 0.33).abs() < 1e-9);
    }

    #[test]
    fn test_open_range_uses_range_default() {
        let est = HeuristicFilterEstimator::default();
        let open = PlanNodeStatsEstimate::new(1000.0).with_symbol(
            "x",
            SymbolStatsEstimate::unknown()
                .with_low_value(f64::NEG_INFINITY)
                .with_high_value(100.0)
                .with_nulls_fraction(0.0),
        );
        assert!(open.symbol(&"x".into()).low_value.is_unknown());
        assert!((est.selectivity(&cmp(BinaryOp::Lt, "x", 50), &open) - 0.33).abs() < 1e-9);
    }

    #[test]
    fn test_boolean_connectives() {
        let est = HeuristicFilterEstimator::default();
        let and = Expr::And(vec![eq("k", 1), cmp(BinaryOp::Lt, "k", 50)]);
        assert!((est.selectivity(&and, &input()) - 0.01).abs() < 1e-9);
        let or = Expr::Or(vec![cmp(BinaryOp::Lt, "k", 50), cmp(BinaryOp::Lt, "k", 50)]);
        assert!((est.selectivity(&or, &input()) - 0.75).abs() < 1e-9);
        let not = Expr::UnaryOp {
            op: UnaryOp::Not,
            operand: Box::new(cmp(BinaryOp::Lt, "k", 25)),
        };
        assert!((est.selectivity(&not, &input()) - 0.75).abs() < 1e-9);
        assert_eq!(est.selectivity(&Expr::literal(ScalarValue::Bool(false)), &input()), 0.0);
    }

    #[test]
    fn test_filter_stats_pins_equality_symbol() {
        let est = HeuristicFilterEstimator::default();
        let stats = est.filter_stats(&input(), &eq("k", 7), &Session::default(), &TypeProvider::new());
        assert_eq!(stats.output_row_count, Estimate::of(20.0));
        assert_eq!(stats.symbol(&"k".into()).distinct_values_count, Estimate::of(1.0));
        assert_eq!(stats.symbol(&"n".into()).distinct_values_count, Estimate::of(0.2));
    }

    #[test]
    fn test_false_predicate_empties_every_symbol() {
        let est = HeuristicFilterEstimator::default();
        let input = input().with_symbol(
            "x",
            SymbolStatsEstimate::unknown()
                .with_distinct_values_count(40.0)
                .with_low_value(-10.0)
                .with_high_value(10.0)
                .with_nulls_fraction(0.25),
        );
        let stats = est.filter_stats(
            &input,
            &Expr::literal(ScalarValue::Bool(false)),
            &Session::default(),
            &TypeProvider::new(),
        );
        assert_eq!(stats.output_row_count, Estimate::of(0.0));
        for name in ["x", "k", "n", "u"] {
            let s = stats.symbol(&name.into());
            assert_eq!(s.distinct_values_count, Estimate::of(0.0), "{}", name);
            assert!(s.low_value.is_unknown() && s.high_value.is_unknown(), "{}", name);
            assert_eq!(s.nulls_fraction, Estimate::of(1.0), "{}", name);
        }
    }

    #[test]
    fn test_true_predicate_keeps_input() {
        let est = HeuristicFilterEstimator::default();
        let stats = est.filter_stats(
            &input(),
            &Expr::literal(ScalarValue::Bool(true)),
            &Session::default(),
            &TypeProvider::new(),
        );
        assert_eq!(stats, input());
    }

    #[test]
    fn test_unknown_rows_stay_unknown() {
        let est = HeuristicFilterEstimator::default();
        let stats = est.filter_stats(
            &PlanNodeStatsEstimate::unknown(),
            &eq("k", 7),
            &Session::default(),
            &TypeProvider::new(),
        );
        assert!(stats.is_unknown());
    }
}
