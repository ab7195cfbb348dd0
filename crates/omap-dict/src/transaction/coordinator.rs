//! Commit join: waits for every partition write, then decides the outcome
//!
//! Synchronous and asynchronous commits run the same [`PendingCommit`]
//! future. Only [`CommitFinisher::finish`] computes the aggregate result and
//! releases the increment locks, and it runs exactly once per commit.

use super::locks::PartitionLocks;
use crate::partition::Partition;
use crate::result::CommitResult;
use futures::future::join_all;
use omap_store::{Completion, ObjectId, ObjectStore, StoreResult, WriteOp};
use tracing::{debug, error};

/// A submitted partition write
pub struct PendingWrite {
    partition: Partition,
    completion: Completion<()>,
}

impl PendingWrite {
    /// Submit `op` for `partition`. A synchronous rejection becomes an
    /// already-resolved failed completion.
    pub fn submit(store: &dyn ObjectStore, partition: Partition, oid: &ObjectId, op: WriteOp) -> Self {
        let completion = match store.aio_write(oid, op) {
            Ok(completion) => completion,
            Err(e) => {
                error!(
                    object = %oid,
                    errno = e.errno(),
                    "Failed to submit {} partition write: {}",
                    partition,
                    e
                );
                Completion::ready(Err(e))
            }
        };
        Self {
            partition,
            completion,
        }
    }

    async fn outcome(self) -> (Partition, StoreResult<()>) {
        (self.partition, self.completion.await)
    }
}

/// Decides the terminal result of a transaction once its writes are done
pub struct CommitFinisher {
    locks: PartitionLocks,
    not_found: bool,
    error: Option<String>,
}

impl CommitFinisher {
    /// `error` is a failure already recorded before the writes were submitted
    pub fn new(locks: PartitionLocks, not_found: bool, error: Option<String>) -> Self {
        Self {
            locks,
            not_found,
            error,
        }
    }

    /// Aggregate the per-partition outcomes, release locks and produce the result
    pub fn finish(mut self, outcomes: Vec<(Partition, StoreResult<()>)>) -> CommitResult {
        for (partition, outcome) in outcomes {
            if let Err(e) = outcome {
                error!(
                    owner = %self.locks.owner(),
                    errno = e.errno(),
                    "Commit of {} partition failed: {}",
                    partition,
                    e
                );
                if self.error.is_none() {
                    self.error = Some(format!("{} partition: {}", partition, e));
                }
            }
        }

        self.locks.release_all();

        let result = if self.not_found {
            CommitResult::not_found()
        } else if let Some(error) = self.error.take() {
            CommitResult::failed(error)
        } else {
            CommitResult::ok()
        };
        debug!(owner = %self.locks.owner(), status = %result.status, "Transaction finished");
        result
    }
}

/// Writes in flight plus the finisher that consumes their outcomes
pub struct PendingCommit {
    writes: Vec<PendingWrite>,
    finisher: CommitFinisher,
}

impl PendingCommit {
    pub fn new(writes: Vec<PendingWrite>, finisher: CommitFinisher) -> Self {
        Self { writes, finisher }
    }

    /// Wait for all writes, in whatever order they complete
    pub async fn run(self) -> CommitResult {
        let outcomes = join_all(self.writes.into_iter().map(PendingWrite::outcome)).await;
        self.finisher.finish(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::PartitionMap;
    use crate::result::DictStatus;
    use omap_store::{MemoryObjectStore, StoreError};
    use std::sync::Arc;
    use std::time::Duration;

    fn setup() -> (Arc<MemoryObjectStore>, PartitionMap<ObjectId>) {
        let store = Arc::new(MemoryObjectStore::with_pool("dicts").unwrap());
        let oids = PartitionMap::new(
            ObjectId::new("dicts", "d/private/u"),
            ObjectId::new("dicts", "d/shared"),
        );
        (store, oids)
    }

    fn write_op(key: &str, value: &str) -> WriteOp {
        let mut op = WriteOp::new();
        op.set_one(key, value);
        op
    }

    #[test]
    fn test_both_partitions_ok() {
        let (store, oids) = setup();
        store.set_object_latency(&oids[Partition::Private], Duration::from_millis(20));

        let writes = vec![
            PendingWrite::submit(store.as_ref(), Partition::Private, &oids[Partition::Private], write_op("private/a", "1")),
            PendingWrite::submit(store.as_ref(), Partition::Shared, &oids[Partition::Shared], write_op("shared/b", "2")),
        ];
        let locks = PartitionLocks::new(store.clone(), oids.clone(), "t".to_string());
        let commit = PendingCommit::new(writes, CommitFinisher::new(locks, false, None));

        let result = futures::executor::block_on(commit.run());

        assert_eq!(result, CommitResult::ok());
        assert_eq!(store.get(&oids[Partition::Private], "private/a").unwrap(), "1");
        assert_eq!(store.get(&oids[Partition::Shared], "shared/b").unwrap(), "2");
    }

    #[test]
    fn test_rejected_submission_fails_and_unlocks() {
        let (store, oids) = setup();
        store.seed(&oids[Partition::Shared], [("shared/n".to_string(), "1".to_string())]);
        let mut locks = PartitionLocks::new(store.clone(), oids.clone(), "t".to_string());
        locks
            .acquire(Partition::Shared, "atomic_inc(shared/n)", Duration::from_millis(10))
            .unwrap();

        store.reject_submissions(true);
        let writes = vec![PendingWrite::submit(
            store.as_ref(),
            Partition::Shared,
            &oids[Partition::Shared],
            write_op("shared/n", "2"),
        )];
        let result =
            futures::executor::block_on(PendingCommit::new(writes, CommitFinisher::new(locks, false, None)).run());

        assert_eq!(result.status, DictStatus::Failed);
        assert!(result.error.is_some());
        assert_eq!(store.held_locks(), 0);
    }

    #[test]
    fn test_not_found_wins_over_failure() {
        let (store, oids) = setup();
        store.fail_next_write(&oids[Partition::Private], StoreError::Io("disk".to_string()));

        let writes = vec![PendingWrite::submit(
            store.as_ref(),
            Partition::Private,
            &oids[Partition::Private],
            write_op("private/a", "1"),
        )];
        let locks = PartitionLocks::new(store.clone(), oids, "t".to_string());
        let result =
            futures::executor::block_on(PendingCommit::new(writes, CommitFinisher::new(locks, true, None)).run());

        assert_eq!(result, CommitResult::not_found());
    }

    #[test]
    fn test_no_writes_uses_recorded_error() {
        let (store, oids) = setup();
        let locks = PartitionLocks::new(store, oids, "t".to_string());

        let result = CommitFinisher::new(locks, false, Some("read failed".to_string())).finish(Vec::new());

        assert_eq!(result, CommitResult::failed("read failed"));
    }
}
