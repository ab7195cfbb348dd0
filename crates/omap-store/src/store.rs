//! Object store adapter contract
//!
//! Reads and writes against one object's omap, plus named exclusive locks.
//! Asynchronous operations are submitted synchronously (and may be rejected
//! right away) and resolve later through a [`Completion`].

use crate::completion::Completion;
use crate::error::StoreResult;
use crate::types::{ObjectId, ReadOp, ReadResults, WriteOp};
use std::time::Duration;

/// Trait for object store backends
pub trait ObjectStore: Send + Sync + 'static {
    /// Check whether a pool is available
    fn pool_exists(&self, pool: &str) -> bool;

    /// Read a single omap value, blocking.
    ///
    /// Returns [`StoreError::NotFound`](crate::StoreError::NotFound) when either
    /// the object or the key does not exist.
    fn get(&self, oid: &ObjectId, key: &str) -> StoreResult<String>;

    /// Submit a batched omap read.
    ///
    /// The completion resolves to one result per query, or to an error for
    /// the whole operation (e.g. missing object).
    fn aio_read(&self, oid: &ObjectId, op: ReadOp) -> StoreResult<Completion<ReadResults>>;

    /// Submit an omap write; creates the object if needed
    fn aio_write(&self, oid: &ObjectId, op: WriteOp) -> StoreResult<Completion<()>>;

    /// Take an exclusive lock, waiting at most `timeout` for a current holder to release it
    fn lock_exclusive(
        &self,
        oid: &ObjectId,
        name: &str,
        owner: &str,
        description: &str,
        timeout: Duration,
    ) -> StoreResult<()>;

    /// Release an exclusive lock held by `owner`
    fn unlock(&self, oid: &ObjectId, name: &str, owner: &str) -> StoreResult<()>;

    /// Blocking batched read, convenience over [`aio_read`](Self::aio_read)
    fn read(&self, oid: &ObjectId, op: ReadOp) -> StoreResult<ReadResults> {
        self.aio_read(oid, op)?.wait()
    }

    /// Blocking write, convenience over [`aio_write`](Self::aio_write)
    fn write(&self, oid: &ObjectId, op: WriteOp) -> StoreResult<()> {
        self.aio_write(oid, op)?.wait()
    }
}
