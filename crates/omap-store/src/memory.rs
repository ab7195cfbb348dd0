//! In-memory object store
//!
//! Keeps every object's omap in process memory and executes asynchronous
//! operations on a pool of background worker threads, so completions fire on
//! threads other than the submitter's and may finish out of order.

use crate::completion::Completion;
use crate::error::{StoreError, StoreResult};
use crate::store::ObjectStore;
use crate::types::{ObjectId, OmapValues, ReadOp, ReadResults, WriteOp};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, error, warn};

/// Default number of worker threads
const DEFAULT_WORKERS: usize = 4;

/// In-memory store configuration
#[derive(Debug, Clone)]
pub struct MemoryStoreConfig {
    /// Worker threads executing asynchronous operations
    pub workers: usize,
    /// Artificial delay applied before every asynchronous operation
    pub latency: Duration,
    /// Pools that exist at startup
    pub pools: Vec<String>,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            latency: Duration::ZERO,
            pools: Vec::new(),
        }
    }
}

impl MemoryStoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set number of worker threads
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set per-operation latency
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Add a pool
    pub fn pool(mut self, name: impl Into<String>) -> Self {
        self.pools.push(name.into());
        self
    }
}

/// Stored object: omap plus modification time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectState {
    pub omap: OmapValues,
    pub mtime: Option<SystemTime>,
}

/// Operation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub reads: u64,
    pub writes: u64,
    pub locks: u64,
    pub unlocks: u64,
}

#[derive(Debug)]
struct LockEntry {
    owner: String,
    description: String,
    acquired_at: Instant,
}

#[derive(Debug, Default)]
struct Faults {
    writes: HashMap<ObjectId, VecDeque<StoreError>>,
    reads: HashMap<ObjectId, VecDeque<StoreError>>,
    submissions: HashMap<ObjectId, VecDeque<StoreError>>,
    latency: HashMap<ObjectId, Duration>,
}

#[derive(Debug, Default)]
struct Counters {
    reads: AtomicU64,
    writes: AtomicU64,
    locks: AtomicU64,
    unlocks: AtomicU64,
}

struct StoreState {
    pools: RwLock<HashSet<String>>,
    objects: Mutex<HashMap<ObjectId, ObjectState>>,
    locks: Mutex<HashMap<(ObjectId, String), LockEntry>>,
    lock_released: Condvar,
    faults: Mutex<Faults>,
    reject_submissions: AtomicBool,
    default_latency: Duration,
    counters: Counters,
}

impl StoreState {
    fn latency_for(&self, oid: &ObjectId) -> Duration {
        self.faults
            .lock()
            .latency
            .get(oid)
            .copied()
            .unwrap_or(self.default_latency)
    }

    fn take_fault(queue: &mut HashMap<ObjectId, VecDeque<StoreError>>, oid: &ObjectId) -> Option<StoreError> {
        let pending = queue.get_mut(oid)?;
        let fault = pending.pop_front();
        if pending.is_empty() {
            queue.remove(oid);
        }
        fault
    }

    fn read(&self, oid: &ObjectId, op: &ReadOp) -> StoreResult<ReadResults> {
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        if let Some(fault) = Self::take_fault(&mut self.faults.lock().reads, oid) {
            return Err(fault);
        }

        let objects = self.objects.lock();
        let object = objects.get(oid).ok_or(StoreError::NotFound)?;
        Ok(op
            .queries()
            .iter()
            .map(|query| Ok(query.evaluate(&object.omap)))
            .collect())
    }

    fn write(&self, oid: &ObjectId, op: &WriteOp) -> StoreResult<()> {
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        if let Some(fault) = Self::take_fault(&mut self.faults.lock().writes, oid) {
            return Err(fault);
        }

        let mut objects = self.objects.lock();
        let object = objects.entry(oid.clone()).or_default();
        op.apply_to(&mut object.omap);
        object.mtime = Some(op.mtime().unwrap_or_else(SystemTime::now));
        Ok(())
    }
}

/// Job executed by a worker thread
struct Job {
    oid: ObjectId,
    run: Box<dyn FnOnce(&StoreState) + Send>,
}

/// Object store holding everything in memory
pub struct MemoryObjectStore {
    state: Arc<StoreState>,
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl MemoryObjectStore {
    /// Create a store with the given config and start its workers
    pub fn new(config: MemoryStoreConfig) -> StoreResult<Self> {
        let state = Arc::new(StoreState {
            pools: RwLock::new(config.pools.iter().cloned().collect()),
            objects: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            lock_released: Condvar::new(),
            faults: Mutex::new(Faults::default()),
            reject_submissions: AtomicBool::new(false),
            default_latency: config.latency,
            counters: Counters::default(),
        });

        let (sender, receiver) = unbounded::<Job>();
        let mut workers = Vec::with_capacity(config.workers);
        for i in 0..config.workers.max(1) {
            let receiver = receiver.clone();
            let state = Arc::clone(&state);
            let handle = thread::Builder::new()
                .name(format!("omap-store-{}", i))
                .spawn(move || Self::worker_loop(state, receiver))
                .map_err(|e| StoreError::Io(e.to_string()))?;
            workers.push(handle);
        }

        Ok(Self {
            state,
            sender: Some(sender),
            workers,
        })
    }

    /// Create a store with a single pool and default settings
    pub fn with_pool(pool: impl Into<String>) -> StoreResult<Self> {
        Self::new(MemoryStoreConfig::default().pool(pool))
    }

    fn worker_loop(state: Arc<StoreState>, receiver: Receiver<Job>) {
        while let Ok(job) = receiver.recv() {
            let latency = state.latency_for(&job.oid);
            if !latency.is_zero() {
                thread::sleep(latency);
            }
            (job.run)(&state);
        }
        debug!("Store worker stopped");
    }

    fn submit(&self, oid: &ObjectId, run: Box<dyn FnOnce(&StoreState) + Send>) -> StoreResult<()> {
        if self.state.reject_submissions.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected("submissions disabled".to_string()));
        }
        let rejected = StoreState::take_fault(&mut self.state.faults.lock().submissions, oid);
        if let Some(fault) = rejected {
            return Err(fault);
        }
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| StoreError::Rejected("store is shut down".to_string()))?;
        sender
            .send(Job {
                oid: oid.clone(),
                run,
            })
            .map_err(|_| StoreError::Rejected("store workers are gone".to_string()))
    }

    fn check_pool(&self, oid: &ObjectId) -> StoreResult<()> {
        if self.pool_exists(oid.pool()) {
            Ok(())
        } else {
            Err(StoreError::PoolNotFound(oid.pool().to_string()))
        }
    }

    // ==================== Administration ====================

    /// Create a pool (no-op if it exists)
    pub fn create_pool(&self, pool: impl Into<String>) {
        self.state.pools.write().insert(pool.into());
    }

    /// Snapshot of an object, if it exists
    pub fn object(&self, oid: &ObjectId) -> Option<ObjectState> {
        self.state.objects.lock().get(oid).cloned()
    }

    /// Snapshot of an object's omap, if it exists
    pub fn omap(&self, oid: &ObjectId) -> Option<OmapValues> {
        self.object(oid).map(|o| o.omap)
    }

    /// Insert omap entries directly, bypassing the worker queue
    pub fn seed(&self, oid: &ObjectId, entries: impl IntoIterator<Item = (String, String)>) {
        let mut objects = self.state.objects.lock();
        objects.entry(oid.clone()).or_default().omap.extend(entries);
    }

    /// Current holder of a named lock
    pub fn lock_holder(&self, oid: &ObjectId, name: &str) -> Option<String> {
        self.state
            .locks
            .lock()
            .get(&(oid.clone(), name.to_string()))
            .map(|entry| entry.owner.clone())
    }

    /// Number of locks currently held across all objects
    pub fn held_locks(&self) -> usize {
        self.state.locks.lock().len()
    }

    /// Operation counters
    pub fn stats(&self) -> StoreStats {
        let c = &self.state.counters;
        StoreStats {
            reads: c.reads.load(Ordering::Relaxed),
            writes: c.writes.load(Ordering::Relaxed),
            locks: c.locks.load(Ordering::Relaxed),
            unlocks: c.unlocks.load(Ordering::Relaxed),
        }
    }

    // ==================== Fault Injection ====================

    /// Make the next asynchronous write to `oid` complete with `error`
    pub fn fail_next_write(&self, oid: &ObjectId, error: StoreError) {
        self.state
            .faults
            .lock()
            .writes
            .entry(oid.clone())
            .or_default()
            .push_back(error);
    }

    /// Make the next read of `oid`, blocking or asynchronous, fail with `error`
    pub fn fail_next_read(&self, oid: &ObjectId, error: StoreError) {
        self.state
            .faults
            .lock()
            .reads
            .entry(oid.clone())
            .or_default()
            .push_back(error);
    }

    /// Reject every asynchronous submission synchronously while enabled
    pub fn reject_submissions(&self, reject: bool) {
        self.state.reject_submissions.store(reject, Ordering::SeqCst);
    }

    /// Reject the next asynchronous submission against `oid` synchronously
    pub fn reject_next_submission(&self, oid: &ObjectId) {
        self.state
            .faults
            .lock()
            .submissions
            .entry(oid.clone())
            .or_default()
            .push_back(StoreError::Rejected(format!("injected rejection for {}", oid)));
    }

    /// Delay every asynchronous operation on `oid`
    pub fn set_object_latency(&self, oid: &ObjectId, latency: Duration) {
        self.state.faults.lock().latency.insert(oid.clone(), latency);
    }

    /// Stop accepting work and join the workers after they drain the queue
    pub fn shutdown(&mut self) {
        self.sender.take();
        for handle in self.workers.drain(..) {
            if let Err(e) = handle.join() {
                error!("Failed to join store worker: {:?}", e);
            }
        }
    }
}

impl ObjectStore for MemoryObjectStore {
    fn pool_exists(&self, pool: &str) -> bool {
        self.state.pools.read().contains(pool)
    }

    fn get(&self, oid: &ObjectId, key: &str) -> StoreResult<String> {
        self.check_pool(oid)?;
        self.state.counters.reads.fetch_add(1, Ordering::Relaxed);
        if let Some(fault) = StoreState::take_fault(&mut self.state.faults.lock().reads, oid) {
            return Err(fault);
        }

        let objects = self.state.objects.lock();
        objects
            .get(oid)
            .and_then(|object| object.omap.get(key).cloned())
            .ok_or(StoreError::NotFound)
    }

    fn aio_read(&self, oid: &ObjectId, op: ReadOp) -> StoreResult<Completion<ReadResults>> {
        self.check_pool(oid)?;
        let (completer, completion) = Completion::pair();
        let target = oid.clone();
        self.submit(
            oid,
            Box::new(move |state| completer.complete(state.read(&target, &op))),
        )?;
        Ok(completion)
    }

    fn aio_write(&self, oid: &ObjectId, op: WriteOp) -> StoreResult<Completion<()>> {
        self.check_pool(oid)?;
        let (completer, completion) = Completion::pair();
        let target = oid.clone();
        self.submit(
            oid,
            Box::new(move |state| completer.complete(state.write(&target, &op))),
        )?;
        Ok(completion)
    }

    fn lock_exclusive(
        &self,
        oid: &ObjectId,
        name: &str,
        owner: &str,
        description: &str,
        timeout: Duration,
    ) -> StoreResult<()> {
        self.check_pool(oid)?;
        self.state.counters.locks.fetch_add(1, Ordering::Relaxed);

        let key = (oid.clone(), name.to_string());
        // `None` means the timeout is too large to represent: wait without a deadline
        let deadline = Instant::now().checked_add(timeout);
        let mut locks = self.state.locks.lock();

        loop {
            match locks.get(&key) {
                None => break,
                // Re-locking by the holder is a no-op
                Some(entry) if entry.owner == owner => return Ok(()),
                Some(entry) => {
                    if deadline.map_or(false, |deadline| Instant::now() >= deadline) {
                        debug!(
                            oid = %oid,
                            lock = name,
                            holder = %entry.owner,
                            held_for = ?entry.acquired_at.elapsed(),
                            description = %entry.description,
                            "Lock wait expired"
                        );
                        return Err(StoreError::Busy {
                            name: name.to_string(),
                            holder: entry.owner.clone(),
                        });
                    }
                }
            }
            match deadline {
                Some(deadline) => {
                    self.state.lock_released.wait_until(&mut locks, deadline);
                }
                None => self.state.lock_released.wait(&mut locks),
            }
        }

        locks.insert(
            key,
            LockEntry {
                owner: owner.to_string(),
                description: description.to_string(),
                acquired_at: Instant::now(),
            },
        );
        Ok(())
    }

    fn unlock(&self, oid: &ObjectId, name: &str, owner: &str) -> StoreResult<()> {
        self.check_pool(oid)?;
        self.state.counters.unlocks.fetch_add(1, Ordering::Relaxed);

        let key = (oid.clone(), name.to_string());
        let mut locks = self.state.locks.lock();

        match locks.get(&key) {
            Some(entry) if entry.owner == owner => {
                locks.remove(&key);
                self.state.lock_released.notify_all();
                Ok(())
            }
            Some(entry) => Err(StoreError::LockOwnerMismatch {
                expected: owner.to_string(),
                actual: entry.owner.clone(),
            }),
            None => Err(StoreError::NotFound),
        }
    }
}

impl Drop for MemoryObjectStore {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            if self.state.locks.lock().len() > 0 {
                warn!("MemoryObjectStore dropped with locks still held");
            }
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn store() -> MemoryObjectStore {
        MemoryObjectStore::with_pool("test").unwrap()
    }

    fn oid(name: &str) -> ObjectId {
        ObjectId::new("test", name)
    }

    #[test]
    fn test_write_then_get() {
        let store = store();
        let mut op = WriteOp::new();
        op.set_one("k", "v");

        store.write(&oid("obj"), op).unwrap();

        assert_eq!(store.get(&oid("obj"), "k").unwrap(), "v");
        assert_eq!(store.get(&oid("obj"), "missing"), Err(StoreError::NotFound));
        assert_eq!(store.get(&oid("other"), "k"), Err(StoreError::NotFound));
    }

    #[test]
    fn test_read_missing_object() {
        let store = store();
        let result = store.read(&oid("nothing"), ReadOp::new().get_many(["a"]));

        assert_eq!(result, Err(StoreError::NotFound));
    }

    #[test]
    fn test_read_reports_per_query_results() {
        let store = store();
        store.seed(
            &oid("obj"),
            vec![
                ("a/1".to_string(), "1".to_string()),
                ("a/2".to_string(), "2".to_string()),
                ("b/1".to_string(), "3".to_string()),
            ],
        );

        let op = ReadOp::new()
            .get_range("", "a/", usize::MAX)
            .get_many(["b/1", "b/9"]);
        let results = store.read(&oid("obj"), op).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap().len(), 2);
        let exact = results[1].as_ref().unwrap();
        assert_eq!(exact.get("b/1").map(String::as_str), Some("3"));
        assert!(!exact.contains_key("b/9"));
    }

    #[test]
    fn test_unknown_pool_rejected() {
        let store = store();
        let bad = ObjectId::new("nope", "obj");

        assert!(matches!(store.get(&bad, "k"), Err(StoreError::PoolNotFound(_))));
        assert!(matches!(
            store.aio_write(&bad, WriteOp::new()),
            Err(StoreError::PoolNotFound(_))
        ));
    }

    #[test]
    fn test_injected_write_failure_is_one_shot() {
        let store = store();
        store.fail_next_write(&oid("obj"), StoreError::Io("disk full".to_string()));

        let mut op = WriteOp::new();
        op.set_one("k", "v");
        assert_eq!(
            store.write(&oid("obj"), op.clone()),
            Err(StoreError::Io("disk full".to_string()))
        );
        assert!(store.omap(&oid("obj")).is_none());

        store.write(&oid("obj"), op).unwrap();
        assert_eq!(store.get(&oid("obj"), "k").unwrap(), "v");
    }

    #[test]
    fn test_rejected_submissions() {
        let store = store();
        store.reject_submissions(true);

        assert!(matches!(
            store.aio_write(&oid("obj"), WriteOp::new()),
            Err(StoreError::Rejected(_))
        ));

        store.reject_submissions(false);
        assert!(store.aio_write(&oid("obj"), WriteOp::new()).is_ok());
    }

    #[test]
    fn test_rejected_submission_per_object() {
        let store = store();
        store.reject_next_submission(&oid("a"));

        assert!(store.aio_write(&oid("b"), WriteOp::new()).is_ok());
        assert!(matches!(
            store.aio_write(&oid("a"), WriteOp::new()),
            Err(StoreError::Rejected(_))
        ));
        // One-shot
        assert!(store.aio_write(&oid("a"), WriteOp::new()).is_ok());
    }

    #[test]
    fn test_mtime_recorded() {
        let store = store();
        let when = SystemTime::UNIX_EPOCH + Duration::from_secs(1_500_000_000);
        let mut op = WriteOp::new();
        op.set_one("k", "v").set_mtime(when);

        store.write(&oid("obj"), op).unwrap();
        assert_eq!(store.object(&oid("obj")).unwrap().mtime, Some(when));
    }

    #[test]
    fn test_lock_unlock() {
        let store = store();
        let obj = oid("obj");

        store.lock_exclusive(&obj, "L", "worker-1", "test", Duration::ZERO).unwrap();

        // Second acquire should fail immediately with zero wait
        let result = store.lock_exclusive(&obj, "L", "worker-2", "test", Duration::ZERO);
        assert!(matches!(result, Err(StoreError::Busy { .. })));

        // Unlock by wrong owner should fail
        let result = store.unlock(&obj, "L", "worker-2");
        assert!(matches!(result, Err(StoreError::LockOwnerMismatch { .. })));

        store.unlock(&obj, "L", "worker-1").unwrap();
        assert_eq!(store.unlock(&obj, "L", "worker-1"), Err(StoreError::NotFound));

        // Now another worker can acquire
        store.lock_exclusive(&obj, "L", "worker-2", "test", Duration::ZERO).unwrap();
        assert_eq!(store.lock_holder(&obj, "L").as_deref(), Some("worker-2"));
    }

    #[test]
    fn test_lock_waits_for_release() {
        let store = Arc::new(store());
        let obj = oid("obj");
        store.lock_exclusive(&obj, "L", "first", "test", Duration::ZERO).unwrap();

        let releaser = {
            let store = Arc::clone(&store);
            let obj = obj.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                store.unlock(&obj, "L", "first").unwrap();
            })
        };

        store
            .lock_exclusive(&obj, "L", "second", "test", Duration::from_secs(5))
            .unwrap();
        assert_eq!(store.lock_holder(&obj, "L").as_deref(), Some("second"));
        releaser.join().unwrap();
    }

    #[test]
    fn test_lock_without_deadline() {
        let store = Arc::new(store());
        let obj = oid("obj");

        // Uncontended: acquired right away
        store.lock_exclusive(&obj, "L", "first", "test", Duration::MAX).unwrap();

        let releaser = {
            let store = Arc::clone(&store);
            let obj = obj.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                store.unlock(&obj, "L", "first").unwrap();
            })
        };

        store
            .lock_exclusive(&obj, "L", "second", "test", Duration::MAX)
            .unwrap();
        assert_eq!(store.lock_holder(&obj, "L").as_deref(), Some("second"));
        releaser.join().unwrap();
    }

    #[test]
    fn test_locks_are_per_object_and_name() {
        let store = store();
        store.lock_exclusive(&oid("a"), "L", "x", "", Duration::ZERO).unwrap();
        store.lock_exclusive(&oid("b"), "L", "y", "", Duration::ZERO).unwrap();
        store.lock_exclusive(&oid("a"), "M", "y", "", Duration::ZERO).unwrap();

        assert_eq!(store.held_locks(), 3);
        // Locks never create objects
        assert!(store.object(&oid("a")).is_none());
    }

    #[test]
    fn test_completions_fire_out_of_order() {
        let store = MemoryObjectStore::new(MemoryStoreConfig::new().pool("test").workers(2)).unwrap();
        store.set_object_latency(&oid("slow"), Duration::from_millis(100));

        let mut slow_op = WriteOp::new();
        slow_op.set_one("k", "slow");
        let mut fast_op = WriteOp::new();
        fast_op.set_one("k", "fast");

        let slow = store.aio_write(&oid("slow"), slow_op).unwrap();
        let fast = store.aio_write(&oid("fast"), fast_op).unwrap();

        fast.wait().unwrap();
        assert!(store.object(&oid("slow")).is_none());
        slow.wait().unwrap();
        assert_eq!(store.get(&oid("slow"), "k").unwrap(), "slow");
    }

    #[test]
    fn test_shutdown_drains_queue() {
        let mut store = store();
        let mut op = WriteOp::new();
        op.remove(BTreeSet::new()).set_one("k", "v");
        let completion = store.aio_write(&oid("obj"), op).unwrap();

        store.shutdown();
        assert!(completion.wait().is_ok());
        assert!(matches!(
            store.aio_write(&oid("obj"), WriteOp::new()),
            Err(StoreError::Rejected(_))
        ));
    }
}
