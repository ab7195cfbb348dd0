//! Per-partition increment locks owned by one transaction

use crate::partition::{Partition, PartitionMap};
use omap_store::{ObjectId, ObjectStore, StoreResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Name of the exclusive lock serializing atomic increments on a partition object
pub const ATOMIC_INC_LOCK: &str = "ATOMIC_INC";

/// Exclusive `ATOMIC_INC` locks held by one transaction
///
/// Anything still held when the value is dropped gets released.
pub struct PartitionLocks {
    store: Arc<dyn ObjectStore>,
    oids: PartitionMap<ObjectId>,
    owner: String,
    held: PartitionMap<bool>,
}

impl PartitionLocks {
    pub fn new(store: Arc<dyn ObjectStore>, oids: PartitionMap<ObjectId>, owner: String) -> Self {
        Self {
            store,
            oids,
            owner,
            held: PartitionMap::default(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn is_held(&self, partition: Partition) -> bool {
        self.held[partition]
    }

    /// Take the lock on `partition`, waiting at most `timeout`
    pub fn acquire(
        &mut self,
        partition: Partition,
        description: &str,
        timeout: Duration,
    ) -> StoreResult<()> {
        if self.held[partition] {
            return Ok(());
        }

        let oid = &self.oids[partition];
        self.store
            .lock_exclusive(oid, ATOMIC_INC_LOCK, &self.owner, description, timeout)?;
        self.held[partition] = true;
        debug!(owner = %self.owner, object = %oid, "Acquired {} lock", ATOMIC_INC_LOCK);
        Ok(())
    }

    /// Release every held lock. Unlock failures are logged and dropped.
    pub fn release_all(&mut self) {
        for (partition, held) in self.held.iter_mut() {
            if !*held {
                continue;
            }
            *held = false;

            let oid = &self.oids[partition];
            match self.store.unlock(oid, ATOMIC_INC_LOCK, &self.owner) {
                Ok(()) => debug!(owner = %self.owner, object = %oid, "Released {} lock", ATOMIC_INC_LOCK),
                Err(e) => warn!(
                    owner = %self.owner,
                    object = %oid,
                    errno = e.errno(),
                    "Failed to release {} lock: {}",
                    ATOMIC_INC_LOCK,
                    e
                ),
            }
        }
    }

    /// Number of partitions currently locked
    pub fn held_count(&self) -> usize {
        self.held.iter().filter(|(_, held)| **held).count()
    }
}

impl Drop for PartitionLocks {
    fn drop(&mut self) {
        self.release_all();
    }
}
