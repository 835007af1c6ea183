use serde::{Deserialize, Serialize};

use crate::data_structures::{
    plan::{WorkerBucket, WorkerId},
    routing::{ChannelHandle, QueueHandle},
};

/// Where a scene lives in the blob store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneLocation {
    pub bucket: String,
    pub root: String,
}

impl SceneLocation {
    pub fn new(bucket: impl Into<String>, root: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            root: root.into(),
        }
    }

    /// Joins `key` onto the scene root with exactly one `/` in between.
    pub fn key(&self, key: &str) -> String {
        let root = self.root.trim_end_matches('/');
        let key = key.trim_start_matches('/');
        if root.is_empty() {
            key.to_string()
        } else {
            format!("{root}/{key}")
        }
    }
}

/**
 * The sole input of a render worker.
 *
 * Field names on the wire are the ones the worker runtime parses, hence the
 * renames on the routing handles. A missing handle goes out as an empty string.
 */
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerDescriptor {
    pub scene_info: WorkerBucket,
    pub scene_bucket: String,
    pub scene_root: String,
    pub worker_id: WorkerId,
    #[serde(rename = "sqs_queue_arn", with = "empty_as_none")]
    pub queue: Option<QueueHandle>,
    #[serde(rename = "sns_topic_arn", with = "empty_as_none")]
    pub channel: Option<ChannelHandle>,
}

impl WorkerDescriptor {
    pub fn to_payload(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

mod empty_as_none {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<T, S>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Serialize,
        S: Serializer,
    {
        match value {
            Some(v) => v.serialize(serializer),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        T: From<String>,
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok((!s.is_empty()).then(|| T::from(s)))
    }
}

impl From<String> for QueueHandle {
    fn from(value: String) -> Self {
        QueueHandle(value)
    }
}

impl From<String> for ChannelHandle {
    fn from(value: String) -> Self {
        ChannelHandle(value)
    }
}
