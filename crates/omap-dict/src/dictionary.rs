//! Dictionary handle: lookups, transactions and iteration over one user's
//! private partition and the shared partition.

use crate::cluster::Cluster;
use crate::config::{escape_dict_string, DictConfig, DictSettings};
use crate::error::{DictError, Result};
use crate::iterate::{DictIterator, IterateFlags};
use crate::partition::{Partition, PartitionMap, PATH_SEPARATOR};
use crate::result::LookupResult;
use crate::transaction::TransactionContext;
use omap_store::{ObjectId, ObjectStore, ReadOp, ReadResults, StoreError, StoreResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// An open dictionary
pub struct Dictionary {
    config: DictConfig,
    username: String,
    lock_timeout: Duration,
    oids: PartitionMap<ObjectId>,
    cluster: Cluster,
}

impl Dictionary {
    /// Open the dictionary described by `uri` for `settings.username`
    ///
    /// Fails with [`DictError::Config`] on a malformed URI, with
    /// [`DictError::Connection`] when the cluster cannot be reached and with
    /// [`DictError::Create`] when the pool does not exist.
    pub fn init(
        store: Arc<dyn ObjectStore>,
        uri: Option<&str>,
        settings: &DictSettings,
    ) -> Result<Self> {
        let config = DictConfig::from_uri(uri)?;

        let username = if settings.username.contains(PATH_SEPARATOR) {
            escape_dict_string(&settings.username)
        } else {
            settings.username.clone()
        };

        let cluster = Cluster::init(store)?;
        if let Some(path) = &config.cluster_config {
            debug!(path = %path.display(), "Using cluster configuration");
        }

        if !cluster.store().pool_exists(&config.pool) {
            error!(pool = %config.pool, "Pool does not exist");
            return Err(DictError::Create(format!("pool {} does not exist", config.pool)));
        }

        let oids = PartitionMap::new(
            ObjectId::new(&config.pool, format!("{}/private/{}", config.oid, username)),
            ObjectId::new(&config.pool, format!("{}/shared", config.oid)),
        );

        info!(
            pool = %config.pool,
            private = %oids[Partition::Private].name(),
            shared = %oids[Partition::Shared].name(),
            "Dictionary opened"
        );

        Ok(Self {
            config,
            username,
            lock_timeout: settings.lock_timeout,
            oids,
            cluster,
        })
    }

    /// Wait for outstanding asynchronous operations and close the connection
    pub fn deinit(mut self) {
        self.cluster.deinit();
    }

    /// Block until every asynchronous lookup and commit has invoked its callback
    pub fn wait(&self) {
        self.cluster.pending().wait_all();
    }

    /// Number of asynchronous operations still in flight
    pub fn pending_count(&self) -> usize {
        self.cluster.pending().len()
    }

    pub fn config(&self) -> &DictConfig {
        &self.config
    }

    /// Username as used in the private object name
    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    pub fn oid_for(&self, partition: Partition) -> &ObjectId {
        &self.oids[partition]
    }

    pub fn private_oid(&self) -> &ObjectId {
        self.oid_for(Partition::Private)
    }

    pub fn shared_oid(&self) -> &ObjectId {
        self.oid_for(Partition::Shared)
    }

    pub(crate) fn oids(&self) -> &PartitionMap<ObjectId> {
        &self.oids
    }

    pub(crate) fn store(&self) -> &Arc<dyn ObjectStore> {
        self.cluster.store()
    }

    pub(crate) fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    /// Read one key
    pub fn lookup(&self, key: &str) -> LookupResult {
        let Some(partition) = Partition::route(key) else {
            return LookupResult::Failed(DictError::InvalidKey(key.to_string()).to_string());
        };

        let result = match self.store().get(self.oid_for(partition), key) {
            Ok(value) => LookupResult::Found(value),
            Err(StoreError::NotFound) => LookupResult::NotFound,
            Err(e) => {
                error!(key, errno = e.errno(), "Lookup failed: {}", e);
                LookupResult::Failed(e.to_string())
            }
        };
        debug!(key, status = %result.status(), "Lookup");
        result
    }

    /// Read one key without blocking; `callback` gets the result exactly once.
    ///
    /// When the read cannot be submitted the callback runs before this returns.
    pub fn lookup_async<F>(&self, key: &str, callback: F)
    where
        F: FnOnce(LookupResult) + Send + 'static,
    {
        let Some(partition) = Partition::route(key) else {
            callback(LookupResult::Failed(DictError::InvalidKey(key.to_string()).to_string()));
            return;
        };

        let oid = self.oid_for(partition);
        let completion = match self.store().aio_read(oid, ReadOp::new().get_many([key])) {
            Ok(completion) => completion,
            Err(e) => {
                error!(key, object = %oid, errno = e.errno(), "Failed to submit lookup: {}", e);
                callback(LookupResult::Failed(e.to_string()));
                return;
            }
        };

        let key = key.to_string();
        self.cluster.spawn_pending(async move {
            let result = lookup_result(&key, completion.await);
            debug!(key = %key, status = %result.status(), "Async lookup");
            callback(result);
        });
    }

    /// Start a transaction
    pub fn transaction_init(&self) -> TransactionContext<'_> {
        TransactionContext::new(self)
    }

    /// Iterate keys under `paths` (or exactly `paths` with [`IterateFlags::EXACT_KEY`])
    ///
    /// Paths outside both namespaces are ignored. Backend failures do not
    /// make this return an error: the iterator then yields nothing and its
    /// [`deinit`](DictIterator::deinit) reports the failure.
    pub fn iterate_init<S: AsRef<str>>(
        &self,
        paths: &[S],
        flags: IterateFlags,
    ) -> Result<DictIterator> {
        DictIterator::start(self, paths, flags)
    }
}

fn lookup_result(key: &str, result: StoreResult<ReadResults>) -> LookupResult {
    let query = match result {
        Ok(results) => results.into_iter().next(),
        Err(StoreError::NotFound) => return LookupResult::NotFound,
        Err(e) => return LookupResult::Failed(e.to_string()),
    };

    match query {
        Some(Ok(mut values)) => match values.remove(key) {
            Some(value) => LookupResult::Found(value),
            None => LookupResult::NotFound,
        },
        Some(Err(StoreError::NotFound)) => LookupResult::NotFound,
        Some(Err(e)) => LookupResult::Failed(e.to_string()),
        None => LookupResult::Failed("empty read result".to_string()),
    }
}
