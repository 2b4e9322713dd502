//! Persistence layer — checkpoint storage keyed by thread id.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlCheckpointStore;
pub use memory::MemoryCheckpointStore;
pub use traits::{Checkpoint, CheckpointStore};
