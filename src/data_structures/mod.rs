//! Data structures shared by the partitioner, the topology builder and the dispatcher.
//!
//! - `scene_graph` is the read-only view of a loaded scene
//! - `plan` holds worker ids, buckets and the partition plan
//! - `routing` holds channel/queue handles, delivery filters and the routing plan
//! - `descriptor` is the payload each worker is started with

pub mod descriptor;
pub mod plan;
pub mod routing;
pub mod scene_graph;
