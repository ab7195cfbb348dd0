//! Transactional key-value dictionary on top of an object store's omaps
//!
//! Keys live in two namespaces: `private/...` keys belong to the dictionary's
//! user and `shared/...` keys are visible to everyone. Each namespace is one
//! backend object whose omap holds the key-value pairs.
//!
//! # Example
//!
//! ```
//! use omap_dict::{Dictionary, DictSettings, LookupResult};
//! use omap_store::MemoryObjectStore;
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryObjectStore::with_pool("mail_dictionaries").unwrap());
//! let dict = Dictionary::init(store, Some("oid=metadata"), &DictSettings::new("alice")).unwrap();
//!
//! let mut txn = dict.transaction_init();
//! txn.set("shared/counter", "1").unwrap();
//! txn.atomic_inc("shared/counter", 41).unwrap();
//! assert!(txn.commit().status.is_ok());
//!
//! assert_eq!(dict.lookup("shared/counter"), LookupResult::Found("42".to_string()));
//! dict.deinit();
//! ```

pub mod cluster;
pub mod config;
pub mod dictionary;
pub mod error;
pub mod iterate;
pub mod partition;
pub mod result;
pub mod transaction;

pub use cluster::{Cluster, PendingCompletions};
pub use config::{escape_dict_string, DictConfig, DictSettings, DEFAULT_LOCK_TIMEOUT, DEFAULT_POOL};
pub use dictionary::Dictionary;
pub use error::{DictError, Result};
pub use iterate::{DictEntry, DictIterator, IterateFlags};
pub use partition::{Partition, PartitionMap, PRIVATE_PREFIX, SHARED_PREFIX};
pub use result::{CommitResult, DictStatus, LookupResult};
pub use transaction::{CachedValue, TransactionContext, ATOMIC_INC_LOCK};
