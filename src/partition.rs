//! Splitting a scene into worker buckets.
//!
//! Partitioning happens in two steps:
//! 1. [`walk`] lists every primitive in traversal order and the [`SizeOracle`]
//!    costs all of them concurrently.
//! 2. [`partition_costs`] replays the list once, sequentially, and decides for
//!    every primitive which worker gets it.
//!
//! The second step does no I/O, so the boundary rules can be tested on plain
//! cost lists.

use std::{collections::HashSet, num::NonZeroU32};

use instant::Instant;
use serde::{Deserialize, Serialize};

use crate::{
    data_structures::{
        plan::{PartitionPlan, PrimitiveCost, PrimitiveRef, WorkerId},
        scene_graph::SceneGraph,
    },
    error::SizeLookupError,
    size::SizeOracle,
};

/// When to move on to the next worker. With both thresholds set, whichever
/// fires first for the primitive just assigned closes the bucket.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalancePolicy {
    /// Close a bucket once its running cost reaches this many bytes.
    pub byte_budget: Option<u64>,
    /// Target number of workers, balanced by primitive count.
    pub num_workers: Option<NonZeroU32>,
}

impl BalancePolicy {
    pub fn byte_budget(bytes: u64) -> Self {
        Self {
            byte_budget: Some(bytes),
            num_workers: None,
        }
    }

    pub fn worker_count(workers: NonZeroU32) -> Self {
        Self {
            byte_budget: None,
            num_workers: Some(workers),
        }
    }
}

/**
 * State of the single assignment pass.
 *
 * `worker` is the ordinal currently being filled, `running_cost` the bytes
 * already in it and `assigned` the number of primitives handed out over all
 * workers. `chunk` is `ceil(T / N)` when balancing by count.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Accumulator {
    pub worker: u32,
    pub running_cost: u64,
    pub assigned: usize,
    byte_budget: Option<u64>,
    chunk: Option<usize>,
}

impl Accumulator {
    pub fn new(policy: &BalancePolicy, total_primitives: usize) -> Self {
        let chunk = policy
            .num_workers
            .map(|n| total_primitives.div_ceil(n.get() as usize).max(1));
        Self {
            worker: 1,
            running_cost: 0,
            assigned: 0,
            byte_budget: policy.byte_budget,
            chunk,
        }
    }

    /// Assigns one primitive to the current worker and advances to the next
    /// worker if that filled the current one. Returns the worker that got it.
    pub fn step(&mut self, cost: u64) -> WorkerId {
        let assigned_to = WorkerId::Ordinal(self.worker);
        self.running_cost = self.running_cost.saturating_add(cost);
        self.assigned += 1;

        let over_budget = self
            .byte_budget
            .is_some_and(|budget| self.running_cost >= budget);
        let count_reached = self
            .chunk
            .is_some_and(|chunk| self.assigned >= chunk * self.worker as usize);
        if over_budget || count_reached {
            self.worker += 1;
            self.running_cost = 0;
        }
        assigned_to
    }
}

/// Every primitive of every meshed top-level node, in document order. A mesh
/// referenced by more than one node is listed once, at its first reference.
pub fn walk(scene: &SceneGraph) -> Vec<PrimitiveRef> {
    let mut seen = HashSet::new();
    scene
        .nodes
        .iter()
        .filter_map(|node| node.mesh)
        .filter(|mesh_idx| seen.insert(*mesh_idx))
        .filter_map(|mesh_idx| scene.mesh(mesh_idx).map(|mesh| (mesh_idx, mesh)))
        .flat_map(|(mesh_idx, mesh)| {
            (0..mesh.primitives.len()).map(move |primitive| PrimitiveRef {
                mesh: mesh_idx,
                mesh_name: mesh.name.clone(),
                primitive,
            })
        })
        .collect()
}

/// Replays the boundary decisions over precomputed costs.
///
/// `refs` and `costs` are zipped; they must come from the same [`walk`].
pub fn partition_costs(
    refs: &[PrimitiveRef],
    costs: &[PrimitiveCost],
    policy: &BalancePolicy,
) -> PartitionPlan {
    let mut acc = Accumulator::new(policy, refs.len());
    let mut plan = PartitionPlan::default();
    for (prim_ref, cost) in refs.iter().zip(costs) {
        let cost = cost.total();
        let worker = acc.step(cost);
        plan.buckets
            .entry(worker)
            .or_default()
            .push(&prim_ref.mesh_name, prim_ref.primitive, cost);
        plan.total_size += cost;
    }
    plan
}

pub struct ScenePartitioner<'a> {
    oracle: SizeOracle<'a>,
    lookup_concurrency: usize,
}

impl<'a> ScenePartitioner<'a> {
    pub fn new(oracle: SizeOracle<'a>, lookup_concurrency: usize) -> Self {
        Self {
            oracle,
            lookup_concurrency,
        }
    }

    pub async fn partition(
        &self,
        scene: &SceneGraph,
        policy: &BalancePolicy,
    ) -> Result<PartitionPlan, SizeLookupError> {
        let start = Instant::now();
        let refs = walk(scene);
        let costs = self
            .oracle
            .cost_all(scene, &refs, self.lookup_concurrency)
            .await?;
        let plan = partition_costs(&refs, &costs, policy);
        log::info!(
            "Split {} primitives ({} bytes) into {} workers in {:?}",
            refs.len(),
            plan.total_size,
            plan.len(),
            start.elapsed()
        );
        Ok(plan)
    }
}
