//! # optx-core: Statistics and Cost Estimation
//!
//! This crate implements the estimation core of a Cascades-style cost-based query
//! optimizer. Given a plan, either a materialized tree or a memo of equivalence
//! groups, it predicts per-operator output statistics and CPU/memory/network
//! costs, memoized so that the search driver can cheaply compare competing
//! equivalent plans.
//!
//! ## Module Overview
//!
//! - **`plan`**: The plan node sum type, including the `GroupReference` placeholder.
//! - **`memo`**: Equivalence groups of plan alternatives, addressed by id.
//! - **`lookup`**: Group resolution and memoization of stats and costs.
//! - **`stats`**: Statistics structures and per-operator derivation rules.
//! - **`filter`**: Predicate selectivity estimation for `Filter` nodes.
//! - **`cost`**: Cost estimates and the exchange-aware cost formulas.
//! - **`comparator`**: Weighted cost comparison and cheapest-member selection.
//! - **`cluster`**: Worker count providers.
//! - **`catalog`**: Base-table statistics.
//! - **`estimate`**: Numeric estimates with an explicit unknown value.
//! - **`expr`**, **`session`**: Scalar vocabulary and pass-through query context.
//! - **`error`**: The fatal error taxonomy.
//!
//! ## Typical Use
//!
//! ```
//! use optx_core::catalog::InMemoryCatalog;
//! use optx_core::cluster::FixedNodeCount;
//! use optx_core::cost::ExchangeCostCalculator;
//! use optx_core::expr::ScalarValue;
//! use optx_core::lookup::{Lookup, MemoLookup};
//! use optx_core::memo::Memo;
//! use optx_core::plan::{ExchangeScope, ExchangeType, PlanBuilder};
//! use optx_core::session::{Session, TypeProvider};
//! use optx_core::stats::PlanStatsCalculator;
//! use std::sync::Arc;
//!
//! let mut p = PlanBuilder::new();
//! let values = p.values(&["x"], vec![vec![ScalarValue::Int64(1)], vec![ScalarValue::Int64(2)]]);
//! let root = p.exchange(ExchangeType::Gather, ExchangeScope::Remote, vec![values]);
//!
//! let mut ids = p.into_allocator();
//! let (memo, root_group) = Memo::from_plan(&root, &mut ids).unwrap();
//! let lookup = MemoLookup::new(
//!     &memo,
//!     Arc::new(PlanStatsCalculator::new(Arc::new(InMemoryCatalog::new()))),
//!     Arc::new(ExchangeCostCalculator::new(Arc::new(FixedNodeCount(4)))),
//! );
//!
//! let reference = memo.group_reference(root_group, &mut ids).unwrap();
//! let cost = lookup
//!     .get_cumulative_cost(&reference, &Session::default(), &TypeProvider::new())
//!     .unwrap();
//! // two 8-byte values gathered over the network
//! assert_eq!(cost.network.value(), Some(16.0));
//! ```

pub mod catalog;
pub mod cluster;
pub mod comparator;
pub mod cost;
pub mod error;
pub mod estimate;
pub mod expr;
pub mod filter;
pub mod lookup;
pub mod memo;
pub mod plan;
pub mod session;
pub mod stats;
