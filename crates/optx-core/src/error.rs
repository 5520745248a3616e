//! # Estimation Errors
//!
//! Every error in this crate signals a planner-internal invariant violation, never
//! a user-facing query error. None of them is retried locally: the current
//! optimization attempt is aborted and the search driver decides whether to skip
//! the offending plan alternative or fail the query.
//!
//! Missing statistics are *not* errors. They are represented by the unknown
//! [`Estimate`](crate::estimate::Estimate) sentinel, which flows through the
//! arithmetic and only degrades the quality of the optimizer's decision.

use crate::memo::GroupId;
use crate::plan::{ExchangeType, PlanNodeId};

/// Result alias used throughout the estimation core.
pub type Result<T, E = EstimationError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EstimationError {
    /// A `GroupReference` reached stats/cost dispatch without being resolved, or
    /// group resolution was requested where it is not possible.
    #[error("Unresolved group reference at node {node}: {reason}")]
    UnresolvedReference { node: PlanNodeId, reason: String },

    /// Legacy singleton resolution on a group that does not hold exactly one member.
    #[error("Group {group} is not a singleton group: it has {members} members")]
    NonSingletonGroup { group: GroupId, members: usize },

    /// A second result was about to be stored for a node already cached (or still
    /// being computed) by the same lookup.
    #[error("{what} for node {node} already computed")]
    DuplicateComputation { node: PlanNodeId, what: &'static str },

    /// The cost model has no formula for this exchange kind.
    #[error("Unsupported type [{0:?}] of the exchange")]
    UnsupportedExchangeKind(ExchangeType),

    #[error("Unknown group {0}")]
    UnknownGroup(GroupId),

    /// A memo member whose output symbols differ from the rest of its group.
    #[error("Output symbols of the new member do not match group {group}")]
    SchemaMismatch { group: GroupId },

    #[error("Plan node id {0} is used by more than one node")]
    DuplicateNodeId(PlanNodeId),

    /// No plan node id is left above the largest id already in use.
    #[error("Plan node ids exhausted")]
    PlanNodeIdsExhausted,
}
