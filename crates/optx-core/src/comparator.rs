//! # Cost Comparison
//!
//! [`CostComparator`] collapses the three cost dimensions into one comparable
//! value and supplies the explicit selection policy for groups with several
//! members:
//!
//! ```text
//! weighted = cpu_weight * cpu + memory_weight * memory + network_weight * network
//! ```
//!
//! The default weights (1.0, 1.0, 10.0) make network transfer the dominant
//! dimension, the usual assumption for distributed execution. A cost with any
//! unknown component has an unknown weighted value and ranks after every known
//! cost.

use crate::cost::PlanNodeCostEstimate;
use crate::error::Result;
use crate::estimate::Estimate;
use crate::lookup::Lookup;
use crate::plan::PlanRef;
use crate::session::{Session, TypeProvider};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostComparator {
    pub cpu_weight: f64,
    pub memory_weight: f64,
    pub network_weight: f64,
}

impl Default for CostComparator {
    fn default() -> Self {
        Self {
            cpu_weight: 1.0,
            memory_weight: 1.0,
            network_weight: 10.0,
        }
    }
}

impl CostComparator {
    pub fn weighted(&self, cost: &PlanNodeCostEstimate) -> Estimate {
        cost.cpu * self.cpu_weight + cost.memory * self.memory_weight + cost.network * self.network_weight
    }

    /// Total order on costs: known before unknown, then by weighted value.
    pub fn compare(&self, a: &PlanNodeCostEstimate, b: &PlanNodeCostEstimate) -> Ordering {
        match (self.weighted(a).value(), self.weighted(b).value()) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }

    /// The candidate with the lowest cumulative cost, with that cost.
    ///
    /// Ties keep the earliest candidate. Returns `None` for an empty slice.
    pub fn cheapest(
        &self,
        candidates: &[PlanRef],
        lookup: &dyn Lookup,
        session: &Session,
        types: &TypeProvider,
    ) -> Result<Option<(PlanRef, PlanNodeCostEstimate)>> {
        let mut best: Option<(PlanRef, PlanNodeCostEstimate)> = None;
        for candidate in candidates {
            let cost = lookup.get_cumulative_cost(candidate, session, types)?;
            let better = match &best {
                Some((_, best_cost)) => self.compare(&cost, best_cost) == Ordering::Less,
                None => true,
            };
            if better {
                best = Some((candidate.clone(), cost));
            }
        }
        if let Some((node, cost)) = &best {
            debug!(
                "Cheapest of {} candidates: node {} with cost {}",
                candidates.len(),
                node.id,
                cost
            );
        }
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cost(cpu: f64, memory: f64, network: f64) -> PlanNodeCostEstimate {
        PlanNodeCostEstimate::new(cpu.into(), memory.into(), network.into())
    }

    #[test]
    fn test_network_dominates() {
        let cmp = CostComparator::default();
        assert_eq!(cmp.weighted(&cost(1.0, 2.0, 3.0)), Estimate::of(33.0));
        assert_eq!(cmp.compare(&cost(100.0, 0.0, 0.0), &cost(0.0, 0.0, 20.0)), Ordering::Less);
    }

    #[test]
    fn test_unknown_ranks_last() {
        let cmp = CostComparator::default();
        let unknown = PlanNodeCostEstimate::unknown();
        let huge = cost(1e12, 1e12, 1e12);
        assert_eq!(cmp.compare(&huge, &unknown), Ordering::Less);
        assert_eq!(cmp.compare(&unknown, &huge), Ordering::Greater);
        assert_eq!(cmp.compare(&unknown, &unknown), Ordering::Equal);
    }
}
