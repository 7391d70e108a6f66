//! Shared data model for the Tidemark sync core.
//!
//! Pure types only: bindings, schema mappings, sync state, checkpoints,
//! watermarks, row batches, the event wire format, and the error taxonomy.
//! Kept dependency-light so every other crate can share them without
//! circular dependencies.

pub mod batch;
pub mod binding;
pub mod checkpoint;
pub mod error;
pub mod event;
pub mod mapping;
pub mod state;
pub mod watermark;

pub use batch::{CellValue, ColumnData, RowBatch};
pub use binding::{ColumnSpec, TableBinding, TargetType};
pub use checkpoint::ProgressCheckpoint;
pub use error::{ErrorKind, SyncError};
pub use event::{LogLevel, RunId, SyncEvent, SyncKind, SyncPhase, WorkerStatus};
pub use mapping::{MappingDiff, SchemaMapping};
pub use state::{SyncState, SyncStatus};
pub use watermark::{ComponentOrder, Watermark};
