//! Draftsman-State: checkpoint persistence for drafting runs
//!
//! Every phase change and section transition of a run is written here as a
//! full snapshot, so an interrupted run resumes from its last checkpoint
//! instead of starting over.
//!
//! ## Key Components
//!
//! - `CheckpointStore`: backend-agnostic async trait
//! - `SurrealCheckpointStore`: SurrealDB implementation (`mem://`, `surrealkv://`, remote)
//! - `fakes::MemoryCheckpointStore`: in-memory implementation for tests

mod error;
pub mod fakes;
mod handle;
mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_store;

pub use error::{StateError, StorageError};
pub use handle::{connect_from_env, connect_url, CloudConfig};
pub use schema::CheckpointRow;
pub use storage_traits::{
    verify_checkpoint, CheckpointRecord, CheckpointStore, ContentDigest, RunId, RunIndexEntry,
    StorageResult,
};
pub use surreal_store::SurrealCheckpointStore;

/// Result type for draftsman-state connection operations
pub type Result<T> = std::result::Result<T, StateError>;
