//! # Memo: Equivalence Groups of Plan Alternatives
//!
//! The memo compactly stores many structurally different but logically
//! equivalent plans. Each [`Group`] is an equivalence class: every member
//! produces the same logical result with the same output symbols. Members refer
//! to their inputs through `GroupReference` nodes instead of owning concrete
//! subtrees, so one physical alternative for a subplan is automatically shared
//! by every parent that references its group.
//!
//! ```text
//! group 2: [ Join(#3: ref(0), ref(1)) , Join(#7: ref(1), ref(0)) ]
//! group 0: [ TableScan(#0 orders) ]
//! group 1: [ TableScan(#1 customer) ]
//! ```
//!
//! ## Ownership
//!
//! Groups live in an arena indexed by [`GroupId`]. Ids are assigned on insertion
//! and never reused while the memo lives. The estimation core only *reads* the
//! memo; groups are created and populated by the rule engine of the search
//! driver between optimization steps.
//!
//! ## Resolution
//!
//! [`Memo::resolve`] returns all members of a group, in no particular order.
//! [`Memo::resolve_one`] is the legacy singleton path: it fails unless the group
//! holds exactly one member. It never picks among several members; a caller that
//! needs one representative must supply the selection policy (for example
//! [`CostComparator::cheapest`](crate::comparator::CostComparator::cheapest)).

use crate::error::{EstimationError, Result};
use crate::expr::Symbol;
use crate::plan::{PlanNode, PlanNodeId, PlanNodeIdAllocator, PlanOp, PlanRef};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace};

pub type GroupId = u32;

/// An equivalence class of plan nodes.
#[derive(Debug, Clone)]
pub struct Group {
    pub id: GroupId,
    members: Vec<PlanRef>,
    outputs: Vec<Symbol>,
}

impl Group {
    pub fn members(&self) -> &[PlanRef] {
        &self.members
    }

    /// Output symbols shared by every member.
    pub fn outputs(&self) -> &[Symbol] {
        &self.outputs
    }
}

#[derive(Debug, Default)]
pub struct Memo {
    groups: Vec<Group>,
    node_ids: HashSet<PlanNodeId>,
}

impl Memo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a memo from a fully materialized plan tree.
    ///
    /// Every node becomes the single member of its own group, with its children
    /// replaced by references to their groups. Returns the memo and the root group.
    pub fn from_plan(root: &PlanRef, ids: &mut PlanNodeIdAllocator) -> Result<(Memo, GroupId)> {
        let mut memo = Memo::new();
        let root_group = memo.insert_tree(root, ids)?;
        debug!(
            "Built memo from plan: root_group={}, groups={}",
            root_group,
            memo.num_groups()
        );
        Ok((memo, root_group))
    }

    fn insert_tree(&mut self, node: &PlanRef, ids: &mut PlanNodeIdAllocator) -> Result<GroupId> {
        if node.is_group_reference() {
            return Err(EstimationError::UnresolvedReference {
                node: node.id,
                reason: "a plan inserted into a memo must not contain group references".into(),
            });
        }
        let rewritten = node.map_sources(|source| {
            let child_group = self.insert_tree(source, ids)?;
            Ok(Arc::new(PlanNode::new(
                ids.next_id()?,
                PlanOp::GroupReference {
                    group: child_group,
                    outputs: source.output_symbols(),
                },
            )))
        })?;
        self.insert_group(Arc::new(rewritten))
    }

    /// Create a new group whose only member is `node`.
    pub fn insert_group(&mut self, node: PlanRef) -> Result<GroupId> {
        self.register_id(&node)?;
        let id = self.groups.len() as GroupId;
        trace!("Created group {} for {:?} node {}", id, node.kind(), node.id);
        self.groups.push(Group {
            id,
            outputs: node.output_symbols(),
            members: vec![node],
        });
        Ok(id)
    }

    /// Add an equivalent alternative to an existing group.
    pub fn add_member(&mut self, group: GroupId, node: PlanRef) -> Result<()> {
        let outputs = self.group(group)?.outputs.clone();
        if node.output_symbols() != outputs {
            return Err(EstimationError::SchemaMismatch { group });
        }
        self.register_id(&node)?;
        trace!("Added {:?} node {} to group {}", node.kind(), node.id, group);
        self.groups[group as usize].members.push(node);
        Ok(())
    }

    fn register_id(&mut self, node: &PlanNode) -> Result<()> {
        if !self.node_ids.insert(node.id) {
            return Err(EstimationError::DuplicateNodeId(node.id));
        }
        Ok(())
    }

    pub fn group(&self, group: GroupId) -> Result<&Group> {
        self.groups
            .get(group as usize)
            .ok_or(EstimationError::UnknownGroup(group))
    }

    /// Current members of a group. No ordering guarantee.
    pub fn resolve(&self, group: GroupId) -> Result<&[PlanRef]> {
        Ok(self.group(group)?.members())
    }

    /// The only member of a group.
    ///
    /// Legacy: assumes the group has already been narrowed to a single member.
    /// Fails with `NonSingletonGroup` for empty or ambiguous groups rather than
    /// guessing.
    pub fn resolve_one(&self, group: GroupId) -> Result<PlanRef> {
        match self.resolve(group)? {
            [only] => Ok(only.clone()),
            members => Err(EstimationError::NonSingletonGroup {
                group,
                members: members.len(),
            }),
        }
    }

    /// A fresh `GroupReference` node pointing at `group`.
    pub fn group_reference(&self, group: GroupId, ids: &mut PlanNodeIdAllocator) -> Result<PlanRef> {
        let outputs = self.group(group)?.outputs.clone();
        Ok(Arc::new(PlanNode::new(
            ids.next_id()?,
            PlanOp::GroupReference { group, outputs },
        )))
    }

    /// Materialize the plan rooted at `group` by recursively substituting the
    /// single member of every referenced group.
    pub fn extract(&self, group: GroupId) -> Result<PlanRef> {
        let node = self.resolve_one(group)?;
        let materialized = node.map_sources(|source| match &source.op {
            PlanOp::GroupReference { group, .. } => self.extract(*group),
            _ => Ok(source.clone()),
        })?;
        Ok(Arc::new(materialized))
    }

    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn num_members(&self) -> usize {
        self.groups.iter().map(|g| g.members.len()).sum()
    }
}
