//! A whole run, from trigger request to started workers.
//!
//! The steps are strictly ordered:
//! 1. Validate the request (nothing is downloaded for a bad one)
//! 2. Download and load the scene
//! 3. Cost and partition all primitives
//! 4. Provision the routing topology for the resulting worker ids (fleet mode)
//! 5. Build one descriptor per worker and trigger them (fleet mode)
//!
//! In local mode the run stops after step 3 and hands the plan back.

use std::num::NonZeroU32;

use instant::Instant;
use serde::{Deserialize, Serialize};

use crate::{
    context::{BYTES_PER_GB, Context, Mode, PartitionConfig},
    data_structures::{
        descriptor::{SceneLocation, WorkerDescriptor},
        plan::PartitionPlan,
        routing::RoutingPlan,
    },
    dispatch::{Dispatcher, build_descriptors},
    error::{InputError, RunError, report},
    partition::{BalancePolicy, ScenePartitioner},
    resources::fetch_scene,
    size::SizeOracle,
    topology::TopologyBuilder,
};

/// What triggers a run. Balancing fields left out fall back to the configured
/// defaults; if the request sets any of them, only the request's values count.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub scene_bucket: String,
    #[serde(default)]
    pub scene_root: String,
    #[serde(default)]
    pub scene_name: String,
    #[serde(default)]
    pub num_workers: Option<u32>,
    #[serde(default)]
    pub memory_per_worker_bytes: Option<u64>,
    #[serde(default)]
    pub memory_per_worker_gb: Option<f64>,
}

impl Request {
    pub fn validate(
        &self,
        defaults: &PartitionConfig,
    ) -> Result<(SceneLocation, BalancePolicy), InputError> {
        for (field, value) in [
            ("scene_bucket", &self.scene_bucket),
            ("scene_root", &self.scene_root),
            ("scene_name", &self.scene_name),
        ] {
            if value.trim().is_empty() {
                return Err(InputError::Missing(field));
            }
        }
        if let Some(c) = self
            .scene_name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(InputError::Invalid {
                field: "scene_name",
                reason: format!("`{c}` can't be used in channel or queue names"),
            });
        }

        let bucket = self.scene_bucket.trim();
        if bucket.contains(['/', '\\']) || matches!(bucket, "." | "..") {
            return Err(InputError::Invalid {
                field: "scene_bucket",
                reason: format!("`{bucket}` is not a single bucket name"),
            });
        }
        let root = self.scene_root.trim();
        if root.starts_with(['/', '\\']) || root.split(['/', '\\']).any(|s| s == "." || s == "..") {
            return Err(InputError::Invalid {
                field: "scene_root",
                reason: format!("`{root}` must be relative and may not contain `.` or `..`"),
            });
        }

        let num_workers = match self.num_workers {
            Some(n) => Some(NonZeroU32::new(n).ok_or_else(|| InputError::Invalid {
                field: "num_workers",
                reason: "must be at least 1".to_string(),
            })?),
            None => None,
        };
        let byte_budget = match (self.memory_per_worker_bytes, self.memory_per_worker_gb) {
            (Some(0), _) => {
                return Err(InputError::Invalid {
                    field: "memory_per_worker_bytes",
                    reason: "must be at least 1".to_string(),
                });
            }
            (Some(bytes), _) => Some(bytes),
            (None, Some(gb)) => Some(gb_to_bytes(gb).ok_or_else(|| InputError::Invalid {
                field: "memory_per_worker_gb",
                reason: format!("{gb} is not a positive size"),
            })?),
            (None, None) => None,
        };

        let policy = if num_workers.is_some() || byte_budget.is_some() {
            BalancePolicy {
                byte_budget,
                num_workers,
            }
        } else {
            BalancePolicy {
                byte_budget: defaults.memory_per_worker_gb.and_then(gb_to_bytes),
                num_workers: defaults.num_workers,
            }
        };
        if policy.byte_budget.is_none() && policy.num_workers.is_none() {
            return Err(InputError::Missing("num_workers or memory_per_worker_bytes"));
        }

        let location = SceneLocation::new(bucket, root);
        Ok((location, policy))
    }
}

fn gb_to_bytes(gb: f64) -> Option<u64> {
    let bytes = (gb * BYTES_PER_GB).round();
    (bytes.is_finite() && bytes >= 1.0).then_some(bytes as u64)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub plan: PartitionPlan,
    /// `None` in local mode.
    pub routing: Option<RoutingPlan>,
    /// Descriptors of the workers whose trigger was accepted. In local mode
    /// the descriptors that would have been sent.
    pub descriptors: Vec<WorkerDescriptor>,
}

pub async fn run(ctx: &Context, request: &Request) -> Result<RunOutcome, RunError> {
    let start = Instant::now();
    let config = &ctx.config;
    let (location, policy) = request.validate(&config.partition)?;

    let scene = fetch_scene(ctx.blob_store.as_ref(), &location, &config.scene_file).await?;
    let oracle = SizeOracle::new(ctx.blob_store.as_ref(), &location);
    let plan = ScenePartitioner::new(oracle, config.partition.lookup_concurrency)
        .partition(&scene, &policy)
        .await?;

    let outcome = match config.mode {
        Mode::Local => {
            let descriptors = build_descriptors(&plan, None, &location, &config.dispatch)?;
            RunOutcome {
                plan,
                routing: None,
                descriptors,
            }
        }
        Mode::Fleet => {
            let routing = TopologyBuilder::new(ctx.broker.as_ref())
                .with_scheme(config.topology.filter_scheme)
                .with_concurrency(config.topology.provision_concurrency)
                .build(&request.scene_name, plan.worker_ids())
                .await?;
            let descriptors =
                build_descriptors(&plan, Some(&routing), &location, &config.dispatch)?;
            let descriptors = Dispatcher::new(ctx.invoker.as_ref(), &config.dispatch.function_name)
                .dispatch(descriptors)
                .await;
            RunOutcome {
                plan,
                routing: Some(routing),
                descriptors,
            }
        }
    };
    log::info!(
        "Run for scene `{}` finished in {:?}",
        request.scene_name,
        start.elapsed()
    );
    Ok(outcome)
}

/// Response of the trigger entry point.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub status_code: u16,
    pub body: String,
}

impl Response {
    fn ok(body: String) -> Self {
        Self {
            status_code: 200,
            body,
        }
    }

    fn failure(trace: String) -> Self {
        log::error!("{trace}");
        Self {
            status_code: 500,
            body: serde_json::json!({ "error": trace }).to_string(),
        }
    }
}

/// Reads a request either as a bare JSON object or wrapped in an HTTP-style
/// event whose `body` field holds the request as a string.
pub fn parse_event(event: &str) -> Result<Request, InputError> {
    #[derive(Deserialize)]
    struct Wrapped {
        body: String,
    }
    let malformed = |e: serde_json::Error| InputError::Malformed(e.to_string());
    let value: serde_json::Value = serde_json::from_str(event).map_err(malformed)?;
    if value.get("body").is_some_and(serde_json::Value::is_string) {
        let wrapped: Wrapped = serde_json::from_value(value).map_err(malformed)?;
        serde_json::from_str(&wrapped.body).map_err(malformed)
    } else {
        serde_json::from_value(value).map_err(malformed)
    }
}

/// Runs one trigger event. 200 carries the started descriptors (the plan in
/// local mode), 500 carries `{"error": "<trace>"}`.
pub async fn handle_event(ctx: &Context, event: &str) -> Response {
    let request = match parse_event(event) {
        Ok(request) => request,
        Err(e) => return Response::failure(report(&RunError::from(e))),
    };
    match run(ctx, &request).await {
        Ok(outcome) => {
            let body = match ctx.config.mode {
                Mode::Local => serde_json::to_string(&outcome.plan),
                Mode::Fleet => serde_json::to_string(&outcome.descriptors),
            };
            match body {
                Ok(body) => Response::ok(body),
                Err(e) => Response::failure(report(&e)),
            }
        }
        Err(e) => Response::failure(report(&e)),
    }
}
