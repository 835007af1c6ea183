//! Message routing between the coordinator and the workers.
//!
//! One broadcast channel per scene, one queue per worker subscribed to it. The
//! subscription filter decides which published messages end up in which queue:
//! `master` only gets messages tagged `master`, every other worker gets the
//! ones tagged `ALL`.

use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;
use futures::{StreamExt, stream};
use instant::Instant;

use crate::{
    data_structures::{
        plan::WorkerId,
        routing::{ChannelHandle, DeliveryFilter, FilterScheme, QueueHandle, RoutingPlan, WorkerRoute},
    },
    error::{BrokerError, TopologyError},
};

/// Pub/sub broker the topology is provisioned on.
///
/// Creating something that already exists may either succeed with the existing
/// handle or fail with [`BrokerError::AlreadyExists`]; the builder accepts both.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn create_channel(&self, name: &str) -> Result<ChannelHandle, BrokerError>;

    async fn create_queue(&self, name: &str) -> Result<QueueHandle, BrokerError>;

    async fn subscribe(
        &self,
        channel: &ChannelHandle,
        queue: &QueueHandle,
        filter: &DeliveryFilter,
    ) -> Result<(), BrokerError>;

    /// Restricts `queue` to deliveries published on `allowed`.
    async fn set_queue_access_policy(
        &self,
        queue: &QueueHandle,
        allowed: &ChannelHandle,
    ) -> Result<(), BrokerError>;
}

pub fn channel_name(scene_name: &str) -> String {
    format!("{scene_name}-topic")
}

pub fn queue_name(scene_name: &str, worker: WorkerId) -> String {
    format!("{scene_name}-{worker}-queue")
}

pub struct TopologyBuilder<'a> {
    broker: &'a dyn Broker,
    scheme: FilterScheme,
    concurrency: usize,
}

impl<'a> TopologyBuilder<'a> {
    pub fn new(broker: &'a dyn Broker) -> Self {
        Self {
            broker,
            scheme: FilterScheme::default(),
            concurrency: 8,
        }
    }

    pub fn with_scheme(mut self, scheme: FilterScheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Provisions the channel and a queue for `master` plus every given worker.
    ///
    /// Only a failure to create the channel fails the call. A worker whose
    /// queue can't be set up is left out of `routes` and listed in `failures`.
    pub async fn build(
        &self,
        scene_name: &str,
        workers: impl IntoIterator<Item = WorkerId>,
    ) -> Result<RoutingPlan, TopologyError> {
        let start = Instant::now();
        let name = channel_name(scene_name);
        let channel = match self.broker.create_channel(&name).await {
            Ok(handle) => handle,
            Err(BrokerError::AlreadyExists { handle, .. }) => ChannelHandle(handle),
            Err(source) => return Err(TopologyError::Channel { name, source }),
        };

        let workers: BTreeSet<WorkerId> = std::iter::once(WorkerId::Master)
            .chain(workers)
            .collect();
        let results: Vec<_> = stream::iter(workers)
            .map(|worker| {
                let channel = &channel;
                async move { (worker, self.provision(scene_name, channel, worker).await) }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut plan = RoutingPlan::new(channel);
        for (worker, result) in results {
            match result {
                Ok(route) => {
                    plan.routes.insert(worker, route);
                }
                Err(e) => {
                    let reason = source_message(&e);
                    log::warn!("{e}: {reason}");
                    plan.failures.insert(worker, reason);
                }
            }
        }
        log::info!(
            "Provisioned {} of {} queues on {} in {:?}",
            plan.routes.len(),
            plan.routes.len() + plan.failures.len(),
            plan.channel.0,
            start.elapsed()
        );
        Ok(plan)
    }

    async fn provision(
        &self,
        scene_name: &str,
        channel: &ChannelHandle,
        worker: WorkerId,
    ) -> Result<WorkerRoute, TopologyError> {
        let fail = |source| TopologyError::Queue { worker, source };
        let queue = match self.broker.create_queue(&queue_name(scene_name, worker)).await {
            Ok(handle) => handle,
            Err(BrokerError::AlreadyExists { handle, .. }) => QueueHandle(handle),
            Err(source) => return Err(fail(source)),
        };
        self.broker
            .set_queue_access_policy(&queue, channel)
            .await
            .map_err(fail)?;
        let filter = DeliveryFilter::for_worker(worker, self.scheme);
        self.broker
            .subscribe(channel, &queue, &filter)
            .await
            .map_err(fail)?;
        Ok(WorkerRoute { queue, filter })
    }
}

fn source_message(e: &TopologyError) -> String {
    match e {
        TopologyError::Channel { source, .. } | TopologyError::Queue { source, .. } => {
            source.to_string()
        }
    }
}

/// A message as it sits in a queue of the [`MemoryBroker`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub tag: String,
    pub body: String,
}

#[derive(Debug, Default)]
struct QueueState {
    handle: Option<QueueHandle>,
    allowed: Option<ChannelHandle>,
    messages: Vec<Message>,
}

#[derive(Debug, Default)]
struct BrokerState {
    channels: BTreeMap<String, ChannelHandle>,
    queues: BTreeMap<String, QueueState>,
    subscriptions: Vec<(ChannelHandle, QueueHandle, DeliveryFilter)>,
    failing_queues: HashSet<String>,
}

impl BrokerState {
    fn queue_mut(&mut self, handle: &QueueHandle) -> Option<&mut QueueState> {
        self.queues
            .values_mut()
            .find(|q| q.handle.as_ref() == Some(handle))
    }
}

/**
 * In-process broker.
 *
 * Useful for local runs and for observing what a provisioned topology
 * actually delivers. By default creates are idempotent; [`MemoryBroker::strict`]
 * answers repeated creates with `AlreadyExists` like some hosted brokers do.
 */
#[derive(Debug, Default)]
pub struct MemoryBroker {
    state: Mutex<BrokerState>,
    strict: bool,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::default()
        }
    }

    /// Makes every later `create_queue` for `name` fail.
    pub fn fail_queue(&self, name: &str) {
        self.lock().failing_queues.insert(name.to_string());
    }

    pub fn channel_count(&self) -> usize {
        self.lock().channels.len()
    }

    pub fn queue_count(&self) -> usize {
        self.lock().queues.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.lock().subscriptions.len()
    }

    /// Publishes `body` tagged `tag` and returns how many queues received it.
    pub fn publish(&self, channel: &ChannelHandle, tag: &str, body: &str) -> usize {
        let mut state = self.lock();
        let targets: Vec<QueueHandle> = state
            .subscriptions
            .iter()
            .filter(|(c, _, filter)| c == channel && filter.matches(tag))
            .map(|(_, q, _)| q.clone())
            .collect();
        let mut delivered = 0;
        for queue in targets {
            if let Some(q) = state.queue_mut(&queue) {
                if q.allowed.as_ref() == Some(channel) {
                    q.messages.push(Message {
                        tag: tag.to_string(),
                        body: body.to_string(),
                    });
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Takes every message currently waiting in `queue`.
    pub fn drain(&self, queue: &QueueHandle) -> Vec<Message> {
        self.lock()
            .queue_mut(queue)
            .map(|q| std::mem::take(&mut q.messages))
            .unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn create_channel(&self, name: &str) -> Result<ChannelHandle, BrokerError> {
        let mut state = self.lock();
        if let Some(existing) = state.channels.get(name) {
            return if self.strict {
                Err(BrokerError::AlreadyExists {
                    name: name.to_string(),
                    handle: existing.0.clone(),
                })
            } else {
                Ok(existing.clone())
            };
        }
        let handle = ChannelHandle(format!("mem:channel:{name}"));
        state.channels.insert(name.to_string(), handle.clone());
        Ok(handle)
    }

    async fn create_queue(&self, name: &str) -> Result<QueueHandle, BrokerError> {
        let mut state = self.lock();
        if state.failing_queues.contains(name) {
            return Err(BrokerError::Rejected(format!("queue `{name}` refused")));
        }
        let strict = self.strict;
        let queue = state.queues.entry(name.to_string()).or_default();
        match &queue.handle {
            Some(existing) if strict => Err(BrokerError::AlreadyExists {
                name: name.to_string(),
                handle: existing.0.clone(),
            }),
            Some(existing) => Ok(existing.clone()),
            None => {
                let handle = QueueHandle(format!("mem:queue:{name}"));
                queue.handle = Some(handle.clone());
                Ok(handle)
            }
        }
    }

    async fn subscribe(
        &self,
        channel: &ChannelHandle,
        queue: &QueueHandle,
        filter: &DeliveryFilter,
    ) -> Result<(), BrokerError> {
        let mut state = self.lock();
        if !state.channels.values().any(|c| c == channel) {
            return Err(BrokerError::NotFound(channel.0.clone()));
        }
        if state.queue_mut(queue).is_none() {
            return Err(BrokerError::NotFound(queue.0.clone()));
        }
        let exists = state
            .subscriptions
            .iter()
            .any(|(c, q, f)| c == channel && q == queue && f == filter);
        if !exists {
            state
                .subscriptions
                .push((channel.clone(), queue.clone(), filter.clone()));
        }
        Ok(())
    }

    async fn set_queue_access_policy(
        &self,
        queue: &QueueHandle,
        allowed: &ChannelHandle,
    ) -> Result<(), BrokerError> {
        let mut state = self.lock();
        let q = state
            .queue_mut(queue)
            .ok_or_else(|| BrokerError::NotFound(queue.0.clone()))?;
        q.allowed = Some(allowed.clone());
        Ok(())
    }
}
