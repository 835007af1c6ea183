//! scene-split
//!
//! Splits a glTF scene into balanced units of work for a fleet of render
//! workers and sets up the message routing the coordinator and the workers
//! talk over. Partitioning itself is a single sequential pass over
//! precomputed primitive costs; everything that touches the outside world
//! (blob store, pub/sub broker, worker invocation) sits behind a trait.
//!
//! High-level modules
//! - `context`: configuration and the external collaborators of a run
//! - `data_structures`: scene graph, partition plan, routing plan, worker descriptors
//! - `dispatch`: building worker descriptors and triggering workers
//! - `error`: typed errors for every external operation
//! - `flow`: a whole run and the trigger entry point
//! - `partition`: balancing policies and the assignment pass
//! - `resources`: blob stores and glTF loading
//! - `size`: byte cost of a primitive
//! - `topology`: broadcast channel and per-worker queues
//!

pub mod context;
pub mod data_structures;
pub mod dispatch;
pub mod error;
pub mod flow;
pub mod partition;
pub mod resources;
pub mod size;
pub mod topology;

// Re-exports commonly used types for convenience in downstream code.
pub use context::{Config, Context, Mode};
pub use data_structures::plan::{PartitionPlan, WorkerBucket, WorkerId};
pub use flow::{Request, Response, RunOutcome, handle_event, run};
pub use partition::BalancePolicy;
