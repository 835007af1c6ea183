//! Routing plan: the broadcast channel and the per-worker queues hanging off it.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::data_structures::plan::WorkerId;

/// Tag value that every ordinary worker subscribes to.
pub const BROADCAST_TAG: &str = "ALL";

/// Message attribute the delivery filters look at.
pub const TARGET_ATTRIBUTE: &str = "target";

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelHandle(pub String);

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueHandle(pub String);

/// How ordinary workers are addressed on the broadcast channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterScheme {
    /// Workers only see messages tagged `ALL`.
    #[default]
    BroadcastOnly,
    /// Workers see `ALL` plus messages tagged with their own id.
    BroadcastAndDirect,
}

/// Subscription filter on a queue: a message is delivered when its `attribute`
/// carries one of the accepted tags.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryFilter {
    pub attribute: String,
    pub accepts: BTreeSet<String>,
}

impl DeliveryFilter {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            attribute: TARGET_ATTRIBUTE.to_string(),
            accepts: tags.into_iter().map(Into::into).collect(),
        }
    }

    pub fn for_worker(id: WorkerId, scheme: FilterScheme) -> Self {
        match (id, scheme) {
            (WorkerId::Master, _) => Self::new([WorkerId::MASTER]),
            (_, FilterScheme::BroadcastOnly) => Self::new([BROADCAST_TAG]),
            (WorkerId::Ordinal(_), FilterScheme::BroadcastAndDirect) => {
                Self::new([BROADCAST_TAG.to_string(), id.to_string()])
            }
        }
    }

    pub fn matches(&self, tag: &str) -> bool {
        self.accepts.contains(tag)
    }

    /// Renders the filter the way pub/sub brokers usually take it,
    /// e.g. `{"target":["ALL"]}`.
    pub fn to_policy_json(&self) -> serde_json::Value {
        let mut policy = serde_json::Map::new();
        policy.insert(self.attribute.clone(), serde_json::json!(self.accepts));
        serde_json::Value::Object(policy)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRoute {
    pub queue: QueueHandle,
    pub filter: DeliveryFilter,
}

/// Output of the topology builder. A worker whose queue could not be
/// provisioned has no entry in `routes` and a reason in `failures`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingPlan {
    pub channel: ChannelHandle,
    pub routes: BTreeMap<WorkerId, WorkerRoute>,
    #[serde(default)]
    pub failures: BTreeMap<WorkerId, String>,
}

impl RoutingPlan {
    pub fn new(channel: ChannelHandle) -> Self {
        Self {
            channel,
            routes: BTreeMap::new(),
            failures: BTreeMap::new(),
        }
    }

    pub fn route(&self, id: WorkerId) -> Option<&WorkerRoute> {
        self.routes.get(&id)
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}
