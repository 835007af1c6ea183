//! Partition plan: which worker renders which primitives.

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::InputError;

/// Identifies a worker. Ordinals start at 1; `Master` is the coordinator-facing
/// worker that only exists in the routing layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum WorkerId {
    Master,
    Ordinal(u32),
}

impl WorkerId {
    pub const MASTER: &'static str = "master";

    pub fn is_master(&self) -> bool {
        matches!(self, WorkerId::Master)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerId::Master => f.write_str(Self::MASTER),
            WorkerId::Ordinal(n) => write!(f, "{n}"),
        }
    }
}

impl FromStr for WorkerId {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == Self::MASTER {
            return Ok(WorkerId::Master);
        }
        match s.parse::<u32>() {
            Ok(n) if n > 0 => Ok(WorkerId::Ordinal(n)),
            _ => Err(InputError::Invalid {
                field: "worker_id",
                reason: format!("`{s}` is neither `master` nor a positive ordinal"),
            }),
        }
    }
}

impl From<WorkerId> for String {
    fn from(id: WorkerId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for WorkerId {
    type Error = InputError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Address of one primitive in traversal order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrimitiveRef {
    pub mesh: usize,
    pub mesh_name: String,
    pub primitive: usize,
}

/// Bytes a worker has to hold to render one primitive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PrimitiveCost {
    pub geometry: u64,
    pub material: u64,
}

impl PrimitiveCost {
    pub fn total(&self) -> u64 {
        self.geometry + self.material
    }
}

/// The work handed to one worker. Serializes to the `{ work, total_size }`
/// object the render workers read.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerBucket {
    pub work: BTreeMap<String, Vec<usize>>,
    pub total_size: u64,
}

impl WorkerBucket {
    pub fn push(&mut self, mesh_name: &str, primitive: usize, cost: u64) {
        self.work
            .entry(mesh_name.to_string())
            .or_default()
            .push(primitive);
        self.total_size += cost;
    }

    pub fn primitive_count(&self) -> usize {
        self.work.values().map(Vec::len).sum()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionPlan {
    pub buckets: BTreeMap<WorkerId, WorkerBucket>,
    pub total_size: u64,
}

impl PartitionPlan {
    pub fn worker_ids(&self) -> impl Iterator<Item = WorkerId> + '_ {
        self.buckets.keys().copied()
    }

    pub fn bucket(&self, id: WorkerId) -> Option<&WorkerBucket> {
        self.buckets.get(&id)
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
