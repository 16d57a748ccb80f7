//! Site controller of a federated multi-round computation.
//!
//! The controller polls the central router for the runs of its site, detects
//! status changes and advances each run's state machine, delegating the
//! computation of every round to a registered task model.

pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod machine;
pub mod runlog;
pub mod snapshot;
pub mod store;
pub mod task;

pub use config::ControllerConfig;
pub use dispatcher::Dispatcher;
pub use error::{ConfigErr, ControllerErr, Result, StoreErr, TaskValidationErr};
pub use machine::{Barrier, RunMachine};
pub use snapshot::{MemorySnapshotStore, SnapshotCache, SnapshotStore};
pub use store::ArtifactStore;
pub use task::{Registry, TaskContext, TaskModel};
