//! Shared entities, configuration, error taxonomy, and Clock/IdGen
//! capability traits for the Hybrid Collection Orchestrator.
//!
//! This is the foundation crate: every other `hco-*` crate depends on it,
//! and it depends on none of them.

pub mod clock;
pub mod config;
pub mod entities;
pub mod error;

pub use clock::{Clock, IdGen, SystemClock, UuidGen};
pub use config::OrchestratorConfig;
pub use entities::{
    Checkpoint, CheckpointType, CollectedItem, DeltaCursor, DeltaType, Job, JobLog, JobManifest,
    JobStatus, JobType, Matter, Route, Shard, ShardStatus,
};
pub use error::Kind as ErrorKind;
