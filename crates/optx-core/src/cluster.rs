//! # Cluster Width
//!
//! Exchange and join costs scale with the number of workers a plan runs on. The
//! count is read through [`NodeCountProvider`], which may change at any time as
//! workers join and leave. Cost calculators sample it once per top-level call and
//! pass that value down, so one cost estimate is never computed against two
//! different widths.

use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Source of the current number of worker nodes.
pub trait NodeCountProvider: Send + Sync {
    fn active_node_count(&self) -> usize;
}

/// A constant worker count.
#[derive(Debug, Clone, Copy)]
pub struct FixedNodeCount(pub usize);

impl NodeCountProvider for FixedNodeCount {
    fn active_node_count(&self) -> usize {
        self.0
    }
}

/// A worker count updated concurrently by membership changes.
#[derive(Debug)]
pub struct AtomicNodeCount(AtomicUsize);

impl AtomicNodeCount {
    pub fn new(count: usize) -> Self {
        Self(AtomicUsize::new(count))
    }

    pub fn set(&self, count: usize) {
        let previous = self.0.swap(count, Ordering::Relaxed);
        if previous != count {
            debug!("Active node count changed: {} -> {}", previous, count);
        }
    }
}

impl NodeCountProvider for AtomicNodeCount {
    fn active_node_count(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

impl<F> NodeCountProvider for F
where
    F: Fn() -> usize + Send + Sync,
{
    fn active_node_count(&self) -> usize {
        self()
    }
}

/// Sample `provider`, treating an empty cluster as a single node.
pub fn sample_width(provider: &dyn NodeCountProvider) -> usize {
    provider.active_node_count().max(1)
}
