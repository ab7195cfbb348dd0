//! Transactions
//!
//! A [`TransactionContext`] stages mutations for both partitions and keeps a
//! read-your-writes cache, so an increment after a `set` of the same key sees
//! the staged value. Nothing reaches the backend before commit, except the
//! reads and lock acquisitions done by [`TransactionContext::atomic_inc`].
//!
//! Commit submits one write per dirty partition. Private and shared writes are
//! independent: one may land while the other fails.

mod coordinator;
mod locks;

pub use coordinator::{CommitFinisher, PendingCommit, PendingWrite};
pub use locks::{PartitionLocks, ATOMIC_INC_LOCK};

use crate::dictionary::Dictionary;
use crate::error::{DictError, Result};
use crate::partition::{Partition, PartitionMap};
use crate::result::CommitResult;
use omap_store::{StoreError, WriteOp};
use std::collections::HashMap;
use std::time::SystemTime;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Staged state of a key as seen by the transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedValue {
    Present(String),
    Deleted,
}

/// A batch of mutations against one dictionary
pub struct TransactionContext<'d> {
    dict: &'d Dictionary,
    writes: PartitionMap<WriteOp>,
    dirty: PartitionMap<bool>,
    locks: PartitionLocks,
    cache: HashMap<String, CachedValue>,
    changed: bool,
    not_found: bool,
    error: Option<String>,
    mtime: Option<SystemTime>,
}

impl<'d> TransactionContext<'d> {
    pub(crate) fn new(dict: &'d Dictionary) -> Self {
        let id = Uuid::new_v4().to_string();
        debug!(id = %id, "Transaction started");
        Self {
            dict,
            writes: PartitionMap::default(),
            dirty: PartitionMap::default(),
            locks: PartitionLocks::new(dict.store().clone(), dict.oids().clone(), id),
            cache: HashMap::new(),
            changed: false,
            not_found: false,
            error: None,
            mtime: None,
        }
    }

    /// Unique transaction id, also the owner of its increment locks
    pub fn id(&self) -> &str {
        self.locks.owner()
    }

    /// Whether any mutation has been staged
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// Staged view of `key`, if this transaction touched it
    pub fn cached(&self, key: &str) -> Option<&CachedValue> {
        self.cache.get(key)
    }

    /// Whether the increment lock on `partition` is held by this transaction
    pub fn holds_lock(&self, partition: Partition) -> bool {
        self.locks.is_held(partition)
    }

    /// Stage an upsert
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let partition = route(key)?;
        self.writes[partition].set_one(key, value);
        self.dirty[partition] = true;
        self.changed = true;
        self.cache
            .insert(key.to_string(), CachedValue::Present(value.to_string()));
        Ok(())
    }

    /// Stage a deletion
    pub fn unset(&mut self, key: &str) -> Result<()> {
        let partition = route(key)?;
        self.writes[partition].remove_one(key);
        self.dirty[partition] = true;
        self.changed = true;
        self.cache.insert(key.to_string(), CachedValue::Deleted);
        Ok(())
    }

    /// Add `diff` to the integer stored at `key`.
    ///
    /// A missing key is not created; it makes the commit report not-found.
    /// The first increment that reads from the backend takes the partition's
    /// `ATOMIC_INC` lock, held until commit or rollback. Failing to get the
    /// lock also makes the commit report not-found.
    ///
    /// # Panics
    ///
    /// If the current value is not a base-10 signed 64-bit integer.
    pub fn atomic_inc(&mut self, key: &str, diff: i64) -> Result<()> {
        let partition = route(key)?;

        let base = match self.cache.get(key) {
            Some(CachedValue::Deleted) => {
                self.not_found = true;
                return Ok(());
            }
            Some(CachedValue::Present(value)) => value.clone(),
            None => match self.read_under_lock(partition, key) {
                Some(value) => value,
                None => return Ok(()),
            },
        };

        let current: i64 = base
            .parse()
            .unwrap_or_else(|e| panic!("Corrupted counter value for key {}: {:?} ({})", key, base, e));
        self.set(key, &current.saturating_add(diff).to_string())
    }

    /// Read the base value of an increment with the partition lock held.
    ///
    /// `None` means the increment is abandoned and the reason was recorded.
    fn read_under_lock(&mut self, partition: Partition, key: &str) -> Option<String> {
        let value = self.read_base(partition, key)?;
        if self.locks.is_held(partition) {
            return Some(value);
        }

        let description = format!("atomic_inc({})", key);
        if let Err(e) = self
            .locks
            .acquire(partition, &description, self.dict.lock_timeout())
        {
            warn!(
                id = %self.id(),
                errno = e.errno(),
                "Cannot take {} lock on {} partition: {}",
                ATOMIC_INC_LOCK,
                partition,
                e
            );
            self.not_found = true;
            return None;
        }

        // Another transaction may have committed between the first read and the lock
        self.read_base(partition, key)
    }

    fn read_base(&mut self, partition: Partition, key: &str) -> Option<String> {
        match self.dict.store().get(&self.dict.oids()[partition], key) {
            Ok(value) => Some(value),
            Err(StoreError::NotFound) => {
                self.cache.insert(key.to_string(), CachedValue::Deleted);
                self.not_found = true;
                None
            }
            Err(e) => {
                error!(id = %self.id(), key, errno = e.errno(), "Increment read failed: {}", e);
                if self.error.is_none() {
                    self.error = Some(format!("reading {}: {}", key, e));
                }
                None
            }
        }
    }

    /// Modification time written with every partition object on commit
    pub fn set_timestamp(&mut self, mtime: SystemTime) {
        self.mtime = Some(mtime);
    }

    /// Commit and wait for the outcome
    pub fn commit(self) -> CommitResult {
        match self.prepare() {
            Commit::Finished(result) => result,
            Commit::Pending(commit) => futures::executor::block_on(commit.run()),
        }
    }

    /// Commit and return immediately; `callback` gets the outcome exactly once.
    ///
    /// Without staged changes the callback runs before this returns. Otherwise
    /// it runs on a completion thread after every partition write finished.
    pub fn commit_async<F>(self, callback: F)
    where
        F: FnOnce(CommitResult) + Send + 'static,
    {
        let dict = self.dict;
        match self.prepare() {
            Commit::Finished(result) => callback(result),
            Commit::Pending(commit) => dict.cluster().spawn_pending(async move {
                callback(commit.run().await);
            }),
        }
    }

    /// Discard staged mutations and release held locks
    pub fn rollback(mut self) {
        debug!(id = %self.id(), "Transaction rolled back");
        self.locks.release_all();
    }

    /// Submit every dirty partition's write
    fn prepare(self) -> Commit {
        let Self {
            dict,
            mut writes,
            dirty,
            locks,
            changed,
            not_found,
            error,
            mtime,
            ..
        } = self;
        let finisher = CommitFinisher::new(locks, not_found, error);

        if !changed {
            return Commit::Finished(finisher.finish(Vec::new()));
        }

        let store = dict.store().as_ref();
        let mut pending = Vec::with_capacity(Partition::ALL.len());
        for partition in Partition::ALL {
            if !dirty[partition] {
                continue;
            }
            let mut op = std::mem::take(&mut writes[partition]);
            if let Some(mtime) = mtime {
                op.set_mtime(mtime);
            }
            pending.push(PendingWrite::submit(store, partition, &dict.oids()[partition], op));
        }

        debug!(writes = pending.len(), "Transaction committing");
        Commit::Pending(PendingCommit::new(pending, finisher))
    }
}

enum Commit {
    Finished(CommitResult),
    Pending(PendingCommit),
}

fn route(key: &str) -> Result<Partition> {
    Partition::route(key).ok_or_else(|| DictError::InvalidKey(key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DictSettings;
    use crate::result::DictStatus;
    use omap_store::{MemoryObjectStore, ObjectStore};
    use std::sync::Arc;
    use std::time::Duration;

    fn setup() -> (Arc<MemoryObjectStore>, Dictionary) {
        let store = Arc::new(MemoryObjectStore::with_pool("dicts").unwrap());
        let settings = DictSettings::new("alice").lock_timeout(Duration::from_millis(50));
        let dict = Dictionary::init(store.clone(), Some("oid=meta:pool=dicts"), &settings).unwrap();
        (store, dict)
    }

    #[test]
    fn test_invalid_key_rejected() {
        let (_store, dict) = setup();
        let mut txn = dict.transaction_init();

        assert!(matches!(txn.set("nope", "v"), Err(DictError::InvalidKey(_))));
        assert!(matches!(txn.unset("nope"), Err(DictError::InvalidKey(_))));
        assert!(matches!(txn.atomic_inc("nope", 1), Err(DictError::InvalidKey(_))));
        assert!(!txn.is_changed());
    }

    #[test]
    fn test_cache_tracks_staged_values() {
        let (_store, dict) = setup();
        let mut txn = dict.transaction_init();

        txn.set("private/a", "1").unwrap();
        assert_eq!(txn.cached("private/a"), Some(&CachedValue::Present("1".to_string())));

        txn.unset("private/a").unwrap();
        assert_eq!(txn.cached("private/a"), Some(&CachedValue::Deleted));
        assert!(txn.is_changed());
    }

    #[test]
    fn test_inc_after_set_uses_cache() {
        let (store, dict) = setup();
        let mut txn = dict.transaction_init();

        txn.set("shared/n", "5").unwrap();
        txn.atomic_inc("shared/n", 3).unwrap();

        assert_eq!(txn.cached("shared/n"), Some(&CachedValue::Present("8".to_string())));
        // Served from cache: no backend read and no lock
        assert_eq!(store.stats().reads, 0);
        assert!(!txn.holds_lock(Partition::Shared));
        assert_eq!(txn.commit().status, DictStatus::Ok);
    }

    #[test]
    fn test_inc_of_missing_key() {
        let (store, dict) = setup();
        let mut txn = dict.transaction_init();

        txn.atomic_inc("private/missing", 1).unwrap();

        assert_eq!(txn.cached("private/missing"), Some(&CachedValue::Deleted));
        assert!(!txn.holds_lock(Partition::Private));
        assert!(!txn.is_changed());
        assert_eq!(txn.commit(), CommitResult::not_found());
        assert_eq!(store.stats().writes, 0);
    }

    #[test]
    fn test_inc_takes_lock_once() {
        let (store, dict) = setup();
        store.seed(dict.shared_oid(), [("shared/n".to_string(), "10".to_string())]);
        store.seed(dict.shared_oid(), [("shared/m".to_string(), "20".to_string())]);

        let mut txn = dict.transaction_init();
        txn.atomic_inc("shared/n", 1).unwrap();
        txn.atomic_inc("shared/m", -1).unwrap();

        assert!(txn.holds_lock(Partition::Shared));
        assert_eq!(store.stats().locks, 1);
        assert_eq!(
            store.lock_holder(dict.shared_oid(), ATOMIC_INC_LOCK).as_deref(),
            Some(txn.id())
        );

        assert_eq!(txn.commit(), CommitResult::ok());
        assert_eq!(store.get(dict.shared_oid(), "shared/n").unwrap(), "11");
        assert_eq!(store.get(dict.shared_oid(), "shared/m").unwrap(), "19");
        assert_eq!(store.held_locks(), 0);
    }

    #[test]
    fn test_inc_saturates() {
        let (store, dict) = setup();
        store.seed(dict.private_oid(), [("private/n".to_string(), i64::MAX.to_string())]);

        let mut txn = dict.transaction_init();
        txn.atomic_inc("private/n", 1).unwrap();
        txn.commit();

        assert_eq!(store.get(dict.private_oid(), "private/n").unwrap(), i64::MAX.to_string());
    }

    #[test]
    #[should_panic(expected = "Corrupted counter value")]
    fn test_inc_of_non_integer_panics() {
        let (store, dict) = setup();
        store.seed(dict.private_oid(), [("private/n".to_string(), "abc".to_string())]);

        let mut txn = dict.transaction_init();
        let _ = txn.atomic_inc("private/n", 1);
    }

    #[test]
    fn test_set_timestamp_sets_mtime() {
        let (store, dict) = setup();
        let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);

        let mut txn = dict.transaction_init();
        txn.set("private/a", "1").unwrap();
        txn.set("shared/b", "2").unwrap();
        txn.set_timestamp(mtime);
        assert_eq!(txn.commit(), CommitResult::ok());

        assert_eq!(store.object(dict.private_oid()).unwrap().mtime, Some(mtime));
        assert_eq!(store.object(dict.shared_oid()).unwrap().mtime, Some(mtime));
    }

    #[test]
    fn test_rollback_writes_nothing_and_unlocks() {
        let (store, dict) = setup();
        store.seed(dict.private_oid(), [("private/n".to_string(), "1".to_string())]);

        let mut txn = dict.transaction_init();
        txn.set("shared/a", "x").unwrap();
        txn.atomic_inc("private/n", 1).unwrap();
        assert_eq!(store.held_locks(), 1);

        txn.rollback();

        assert_eq!(store.held_locks(), 0);
        assert_eq!(store.stats().writes, 0);
        assert_eq!(store.get(dict.private_oid(), "private/n").unwrap(), "1");
        assert!(store.object(dict.shared_oid()).is_none());
    }

    #[test]
    fn test_only_dirty_partitions_written() {
        let (store, dict) = setup();
        let mut txn = dict.transaction_init();
        txn.set("private/a", "1").unwrap();

        assert_eq!(txn.commit(), CommitResult::ok());
        assert_eq!(store.stats().writes, 1);
        assert!(store.object(dict.shared_oid()).is_none());
    }

    #[test]
    fn test_read_error_fails_commit() {
        let (store, dict) = setup();
        store.seed(dict.private_oid(), [("private/n".to_string(), "1".to_string())]);
        store.fail_next_read(dict.private_oid(), StoreError::Io("timeout".to_string()));

        let mut txn = dict.transaction_init();
        txn.atomic_inc("private/n", 1).unwrap();
        txn.set("shared/a", "x").unwrap();
        let result = txn.commit();

        assert_eq!(result.status, DictStatus::Failed);
        assert!(result.error.unwrap().contains("private/n"));
        // The unrelated write still landed
        assert_eq!(store.get(dict.shared_oid(), "shared/a").unwrap(), "x");
        assert_eq!(store.get(dict.private_oid(), "private/n").unwrap(), "1");
    }
}
