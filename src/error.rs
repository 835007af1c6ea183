//! Error taxonomy.
//!
//! Every external operation returns one of these instead of logging and
//! handing back an empty value. `RunError` is what a whole run fails with.

use thiserror::Error;

use crate::data_structures::plan::WorkerId;

/// Malformed or missing request fields. Raised before any partitioning work.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("missing field `{0}`")]
    Missing(&'static str),
    #[error("invalid field `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("request is not valid JSON: {0}")]
    Malformed(String),
}

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("object {bucket}/{key} not found")]
    NotFound { bucket: String, key: String },
    #[error("io problem on {bucket}/{key}: {source}")]
    Io {
        bucket: String,
        key: String,
        #[source]
        source: std::io::Error,
    },
    /// Bucket or key would resolve outside the store.
    #[error("`{bucket}/{key}` is not a valid object path")]
    InvalidPath { bucket: String, key: String },
}

/// A texture size could not be determined. Fatal for the whole run.
#[derive(Error, Debug)]
pub enum SizeLookupError {
    #[error("size lookup for image {image} failed")]
    Blob {
        image: usize,
        #[source]
        source: BlobError,
    },
    #[error("material {0} is not part of the scene")]
    UnknownMaterial(usize),
    #[error("image {0} is not part of the scene")]
    UnknownImage(usize),
}

#[derive(Error, Debug)]
pub enum SceneLoadError {
    #[error("scene could not be downloaded")]
    Download(#[from] BlobError),
    #[error("scene is not a valid glTF document")]
    Gltf(#[from] gltf::Error),
    #[error("glTF document has no scene")]
    NoScene,
    /// Work is keyed by mesh name, so two meshes may not share one.
    #[error("more than one mesh is named `{0}`")]
    DuplicateMeshName(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The resource is already there. Carries its handle so callers can reuse it.
    #[error("`{name}` already exists")]
    AlreadyExists { name: String, handle: String },
    #[error("`{0}` not found")]
    NotFound(String),
    #[error("broker rejected the request: {0}")]
    Rejected(String),
}

/// A single queue/channel operation failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("could not create broadcast channel `{name}`")]
    Channel {
        name: String,
        #[source]
        source: BrokerError,
    },
    #[error("could not provision queue for worker {worker}")]
    Queue {
        worker: WorkerId,
        #[source]
        source: BrokerError,
    },
}

#[derive(Error, Debug)]
pub enum InvokeError {
    #[error("could not start `{function}`")]
    Spawn {
        function: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invocation of `{function}` rejected: {reason}")]
    Rejected { function: String, reason: String },
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("worker {0} has no routing entry")]
    MissingRoute(WorkerId),
    #[error("descriptor for worker {worker} could not be serialized")]
    Serialize {
        worker: WorkerId,
        #[source]
        source: serde_json::Error,
    },
    #[error("trigger for worker {worker} failed")]
    Invoke {
        worker: WorkerId,
        #[source]
        source: InvokeError,
    },
}

#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    SceneLoad(#[from] SceneLoadError),
    #[error(transparent)]
    SizeLookup(#[from] SizeLookupError),
    #[error(transparent)]
    Topology(#[from] TopologyError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// `error: cause: cause` on one line, for logs and failure responses.
pub fn report(e: &dyn std::error::Error) -> String {
    let mut out = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
