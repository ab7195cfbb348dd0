//! Object store adapter for omap-backed dictionaries
//!
//! # Features
//! - Per-object omap (ordered key-value sub-map) reads and writes
//! - Asynchronous submission with completion handles
//! - Named exclusive locks with bounded wait
//! - In-memory backend with background workers and fault injection

pub mod completion;
pub mod error;
pub mod memory;
pub mod store;
pub mod types;

pub use completion::{Completer, Completion};
pub use error::{StoreError, StoreResult};
pub use memory::{MemoryObjectStore, MemoryStoreConfig, ObjectState, StoreStats};
pub use store::ObjectStore;
pub use types::{ObjectId, OmapQuery, OmapValues, ReadOp, ReadResults, WriteOp, WriteStep};
