use std::{num::NonZeroU32, path::Path, sync::Arc};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::{
    data_structures::routing::FilterScheme,
    dispatch::{DispatchOptions, Invoker, MemoryInvoker},
    resources::blob::BlobStore,
    topology::{Broker, MemoryBroker},
};

pub const BYTES_PER_GB: f64 = 1e9;

/// Whether a run talks to the fleet at all.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Partition only: no topology, no triggers, the plan goes back to the caller.
    Local,
    #[default]
    Fleet,
}

/// Defaults for requests that don't bring their own balancing parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    pub memory_per_worker_gb: Option<f64>,
    pub num_workers: Option<NonZeroU32>,
    /// Size lookups in flight at once.
    pub lookup_concurrency: usize,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            memory_per_worker_gb: Some(1.0),
            num_workers: NonZeroU32::new(2),
            lookup_concurrency: 32,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    pub filter_scheme: FilterScheme,
    /// Queues provisioned at once.
    pub provision_concurrency: usize,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            filter_scheme: FilterScheme::default(),
            provision_concurrency: 8,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mode: Mode,
    /// Name of the scene document below the scene root.
    pub scene_file: String,
    /// Directory the filesystem blob store serves buckets from.
    pub blob_root: String,
    /// Program the process invoker starts for every worker.
    pub worker_program: Option<String>,
    pub partition: PartitionConfig,
    pub topology: TopologyConfig,
    pub dispatch: DispatchOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            scene_file: "scene.gltf".to_string(),
            blob_root: "./assets".to_string(),
            worker_program: None,
            partition: PartitionConfig::default(),
            topology: TopologyConfig::default(),
            dispatch: DispatchOptions::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// Everything a run needs: configuration and the external collaborators.
#[derive(Clone)]
pub struct Context {
    pub config: Config,
    pub blob_store: Arc<dyn BlobStore>,
    pub broker: Arc<dyn Broker>,
    pub invoker: Arc<dyn Invoker>,
}

impl Context {
    pub fn new(
        config: Config,
        blob_store: Arc<dyn BlobStore>,
        broker: Arc<dyn Broker>,
        invoker: Arc<dyn Invoker>,
    ) -> Self {
        Self {
            config,
            blob_store,
            broker,
            invoker,
        }
    }

    /// A context with in-process broker and invoker, e.g. for local runs.
    pub fn in_memory(config: Config, blob_store: Arc<dyn BlobStore>) -> Self {
        Self::new(
            config,
            blob_store,
            Arc::new(MemoryBroker::new()),
            Arc::new(MemoryInvoker::new()),
        )
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
