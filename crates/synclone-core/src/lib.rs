pub mod cancel;
pub mod checkpoint;
pub mod checkpoint_store;
pub mod config;
pub mod discovery;
pub mod error;
pub mod filter;
pub mod git_sync;
pub mod model;
pub mod orchestrator;
mod orchestrator_resume;
pub mod orchestrator_types;
mod orchestrator_workers;
pub mod paths;
pub mod progress;
pub mod retry;

pub use cancel::CancelToken;
pub use checkpoint::{Checkpoint, CheckpointStatus};
pub use checkpoint_store::{CheckpointStore, RetentionPolicy};
pub use config::{ConnectionConfig, SyncConfig};
pub use error::{CheckpointError, SyncError};
pub use orchestrator::Orchestrator;
pub use orchestrator_types::{OrchestratorOptions, SyncReport, SyncRequest};
