//! Handing the plan out to the workers.
//!
//! Every worker gets a [`WorkerDescriptor`] with its bucket, the scene location
//! and its routing handles, and is triggered asynchronously. Triggers are fire
//! and forget: nothing here waits for a worker to finish or retries a trigger.

use std::{
    collections::HashSet,
    path::PathBuf,
    process::Stdio,
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::{
    data_structures::{
        descriptor::{SceneLocation, WorkerDescriptor},
        plan::{PartitionPlan, WorkerBucket, WorkerId},
        routing::RoutingPlan,
    },
    error::{DispatchError, InvokeError, report},
};

/// Starts a worker with a payload and returns once the start was accepted.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke_async(&self, function: &str, payload: Vec<u8>) -> Result<(), InvokeError>;
}

/// What to do with a worker whose queue could not be provisioned.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissingRoute {
    /// Fail the run before anything is triggered.
    #[default]
    Abort,
    /// Leave the worker out.
    Drop,
    /// Start it anyway, with empty routing handles.
    Dispatch,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchOptions {
    pub function_name: String,
    pub missing_route: MissingRoute,
    /// Also start the coordinator-facing `master` worker.
    pub include_master: bool,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            function_name: "path-tracer-worker".to_string(),
            missing_route: MissingRoute::default(),
            include_master: true,
        }
    }
}

/// Builds one descriptor per worker of `plan`, plus `master` if configured.
///
/// `routing` is `None` when no topology was built (local mode); descriptors
/// then carry no handles and the missing-route policy doesn't apply.
pub fn build_descriptors(
    plan: &PartitionPlan,
    routing: Option<&RoutingPlan>,
    location: &SceneLocation,
    options: &DispatchOptions,
) -> Result<Vec<WorkerDescriptor>, DispatchError> {
    let master = options.include_master.then(|| {
        (
            WorkerId::Master,
            WorkerBucket {
                work: Default::default(),
                total_size: plan.total_size,
            },
        )
    });
    let workers = master
        .into_iter()
        .chain(plan.buckets.iter().map(|(id, bucket)| (*id, bucket.clone())));

    let mut descriptors = Vec::with_capacity(plan.len() + 1);
    for (worker_id, scene_info) in workers {
        let route = routing.and_then(|r| r.route(worker_id));
        if routing.is_some() && route.is_none() {
            match options.missing_route {
                MissingRoute::Abort => return Err(DispatchError::MissingRoute(worker_id)),
                MissingRoute::Drop => {
                    log::warn!("Worker {worker_id} has no queue and won't be started");
                    continue;
                }
                MissingRoute::Dispatch => {
                    log::warn!("Worker {worker_id} has no queue, starting it without one");
                }
            }
        }
        descriptors.push(WorkerDescriptor {
            scene_info,
            scene_bucket: location.bucket.clone(),
            scene_root: location.root.clone(),
            worker_id,
            queue: route.map(|r| r.queue.clone()),
            channel: routing.map(|r| r.channel.clone()),
        });
    }
    Ok(descriptors)
}

pub struct Dispatcher<'a> {
    invoker: &'a dyn Invoker,
    function: &'a str,
}

impl<'a> Dispatcher<'a> {
    pub fn new(invoker: &'a dyn Invoker, function: &'a str) -> Self {
        Self { invoker, function }
    }

    /// Triggers every descriptor concurrently and returns the ones whose
    /// trigger was accepted. Rejected triggers are logged, not retried.
    pub async fn dispatch(&self, descriptors: Vec<WorkerDescriptor>) -> Vec<WorkerDescriptor> {
        let triggers = descriptors.into_iter().map(|descriptor| async move {
            match self.trigger(&descriptor).await {
                Ok(()) => Some(descriptor),
                Err(e) => {
                    log::error!("{}", report(&e));
                    None
                }
            }
        });
        let accepted: Vec<_> = futures::future::join_all(triggers)
            .await
            .into_iter()
            .flatten()
            .collect();
        log::info!("Started {} workers via `{}`", accepted.len(), self.function);
        accepted
    }

    async fn trigger(&self, descriptor: &WorkerDescriptor) -> Result<(), DispatchError> {
        let worker = descriptor.worker_id;
        let payload = descriptor
            .to_payload()
            .map_err(|source| DispatchError::Serialize { worker, source })?;
        self.invoker
            .invoke_async(self.function, payload)
            .await
            .map_err(|source| DispatchError::Invoke { worker, source })
    }
}

/// Starts `program <function>` with the payload on stdin and leaves it running.
#[derive(Debug, Clone)]
pub struct ProcessInvoker {
    program: PathBuf,
}

impl ProcessInvoker {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Invoker for ProcessInvoker {
    async fn invoke_async(&self, function: &str, payload: Vec<u8>) -> Result<(), InvokeError> {
        let spawn_error = |source| InvokeError::Spawn {
            function: function.to_string(),
            source,
        };
        let mut child = tokio::process::Command::new(&self.program)
            .arg(function)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .map_err(spawn_error)?;
        let Some(mut stdin) = child.stdin.take() else {
            return Err(InvokeError::Rejected {
                function: function.to_string(),
                reason: "worker stdin is not available".to_string(),
            });
        };
        stdin.write_all(&payload).await.map_err(spawn_error)?;
        drop(stdin);

        let function = function.to_string();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => log::debug!("`{function}` exited with {status}"),
                Err(e) => log::debug!("lost track of `{function}`: {e}"),
            }
        });
        Ok(())
    }
}

/// Records payloads instead of starting anything.
#[derive(Debug, Default)]
pub struct MemoryInvoker {
    invocations: Mutex<Vec<(String, Vec<u8>)>>,
    rejected: Mutex<HashSet<WorkerId>>,
}

impl MemoryInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the trigger for `worker` fail.
    pub fn reject(&self, worker: WorkerId) {
        self.rejected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(worker);
    }

    pub fn invocations(&self) -> Vec<(String, Vec<u8>)> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The recorded payloads, parsed back into descriptors.
    pub fn descriptors(&self) -> Vec<WorkerDescriptor> {
        self.invocations()
            .iter()
            .filter_map(|(_, payload)| serde_json::from_slice(payload).ok())
            .collect()
    }
}

#[async_trait]
impl Invoker for MemoryInvoker {
    async fn invoke_async(&self, function: &str, payload: Vec<u8>) -> Result<(), InvokeError> {
        let worker = serde_json::from_slice::<WorkerDescriptor>(&payload)
            .ok()
            .map(|d| d.worker_id);
        let rejected = worker.is_some_and(|w| {
            self.rejected
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(&w)
        });
        if rejected {
            return Err(InvokeError::Rejected {
                function: function.to_string(),
                reason: "worker rejected".to_string(),
            });
        }
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((function.to_string(), payload));
        Ok(())
    }
}
