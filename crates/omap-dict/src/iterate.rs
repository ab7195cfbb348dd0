//! Prefix and exact-key iteration across both partitions
//!
//! All backend reads happen in [`Dictionary::iterate_init`](crate::Dictionary::iterate_init);
//! the iterator then walks the collected result sets in memory.

use crate::dictionary::Dictionary;
use crate::error::{DictError, Result};
use crate::partition::{Partition, PartitionMap, PATH_SEPARATOR};
use crate::result::DictStatus;
use futures::future::join_all;
use omap_store::{Completion, OmapValues, ReadOp, ReadResults, StoreResult};
use std::collections::{btree_map, BTreeSet, VecDeque};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use tracing::{debug, error};

/// Iteration flags
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IterateFlags(u32);

impl IterateFlags {
    /// Include keys below the direct children of each path
    pub const RECURSE: Self = Self(0x01);
    pub const SORT_BY_KEY: Self = Self(0x02);
    pub const SORT_BY_VALUE: Self = Self(0x04);
    /// Yield keys only
    pub const NO_VALUE: Self = Self(0x08);
    /// Treat paths as exact keys instead of prefixes
    pub const EXACT_KEY: Self = Self(0x10);
    pub const ASYNC: Self = Self(0x20);

    const UNSUPPORTED: Self = Self(Self::SORT_BY_KEY.0 | Self::SORT_BY_VALUE.0 | Self::ASYNC.0);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for IterateFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for IterateFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for IterateFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(IterateFlags, &str); 6] = [
            (IterateFlags::RECURSE, "RECURSE"),
            (IterateFlags::SORT_BY_KEY, "SORT_BY_KEY"),
            (IterateFlags::SORT_BY_VALUE, "SORT_BY_VALUE"),
            (IterateFlags::NO_VALUE, "NO_VALUE"),
            (IterateFlags::EXACT_KEY, "EXACT_KEY"),
            (IterateFlags::ASYNC, "ASYNC"),
        ];
        let set: Vec<_> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "IterateFlags({})", set.join(" | "))
    }
}

/// One key yielded by a [`DictIterator`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DictEntry {
    pub key: String,
    /// `None` when iterating with [`IterateFlags::NO_VALUE`]
    pub value: Option<String>,
}

/// Query a result set answers
#[derive(Debug, Clone, PartialEq, Eq)]
enum Origin {
    Prefix(String),
    Exact,
}

struct ResultSet {
    origin: Origin,
    entries: btree_map::IntoIter<String, String>,
}

/// Queries issued against one partition object, in submission order
struct PartitionRead {
    partition: Partition,
    origins: Vec<Origin>,
    completion: Completion<ReadResults>,
}

/// Forward-only iterator over the result sets of an iteration
pub struct DictIterator {
    flags: IterateFlags,
    sets: VecDeque<ResultSet>,
    error: Option<String>,
}

impl DictIterator {
    pub(crate) fn start<S: AsRef<str>>(
        dict: &Dictionary,
        paths: &[S],
        flags: IterateFlags,
    ) -> Result<Self> {
        if flags.intersects(IterateFlags::UNSUPPORTED) {
            return Err(DictError::Unsupported(format!(
                "iteration flags {:?}",
                IterateFlags(flags.0 & IterateFlags::UNSUPPORTED.0)
            )));
        }

        let mut iter = Self {
            flags,
            sets: VecDeque::new(),
            error: None,
        };

        let mut classified: PartitionMap<BTreeSet<String>> = PartitionMap::default();
        for path in paths {
            let path = path.as_ref();
            match Partition::route(path) {
                Some(partition) => {
                    classified[partition].insert(path.to_string());
                }
                None => debug!(path, "Ignoring path outside dictionary namespaces"),
            }
        }
        if classified.iter().all(|(_, paths)| paths.is_empty()) {
            iter.fail("no valid paths".to_string());
            return Ok(iter);
        }

        let reads = iter.submit(dict, classified);
        if iter.error.is_none() {
            iter.collect_results(reads);
        }
        if iter.error.is_some() {
            iter.sets.clear();
        }
        Ok(iter)
    }

    /// Submit one read per partition with paths, private first
    fn submit(
        &mut self,
        dict: &Dictionary,
        classified: PartitionMap<BTreeSet<String>>,
    ) -> Vec<PartitionRead> {
        let exact = self.flags.contains(IterateFlags::EXACT_KEY);
        let mut reads = Vec::new();

        for (partition, paths) in classified.iter() {
            if paths.is_empty() {
                continue;
            }

            let (op, origins) = if exact {
                (ReadOp::new().get_many(paths.iter().cloned()), vec![Origin::Exact])
            } else {
                paths.iter().fold((ReadOp::new(), Vec::new()), |(op, mut origins), path| {
                    origins.push(Origin::Prefix(path.clone()));
                    (op.get_range("", path.clone(), usize::MAX), origins)
                })
            };

            let oid = dict.oid_for(partition);
            match dict.store().aio_read(oid, op) {
                Ok(completion) => reads.push(PartitionRead {
                    partition,
                    origins,
                    completion,
                }),
                Err(e) => {
                    error!(object = %oid, errno = e.errno(), "Failed to submit {} iteration read: {}", partition, e);
                    self.fail(format!("{} partition: {}", partition, e));
                    // Later partitions are not submitted
                    break;
                }
            }
        }
        reads
    }

    fn collect_results(&mut self, reads: Vec<PartitionRead>) {
        let waits = reads.into_iter().map(|read| async move {
            let result: StoreResult<ReadResults> = read.completion.await;
            (read.partition, read.origins, result)
        });

        for (partition, origins, result) in futures::executor::block_on(join_all(waits)) {
            let results = match result {
                Ok(results) => results,
                Err(e) => {
                    error!(errno = e.errno(), "Iteration read of {} partition failed: {}", partition, e);
                    self.fail(format!("{} partition: {}", partition, e));
                    continue;
                }
            };

            for (origin, query) in origins.into_iter().zip(results) {
                match query {
                    Ok(values) => {
                        debug!(partition = %partition, origin = ?origin, entries = values.len(), "Iteration query done");
                        self.push(origin, values);
                    }
                    Err(e) => {
                        error!(errno = e.errno(), origin = ?origin, "Iteration query on {} partition failed: {}", partition, e);
                        self.fail(format!("{} partition: {}", partition, e));
                    }
                }
            }
        }
    }

    fn push(&mut self, origin: Origin, values: OmapValues) {
        self.sets.push_back(ResultSet {
            origin,
            entries: values.into_iter(),
        });
    }

    fn fail(&mut self, error: String) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// Whether an entry is below a direct child of its originating prefix
    fn is_filtered(flags: IterateFlags, origin: &Origin, key: &str) -> bool {
        if flags.intersects(IterateFlags::RECURSE | IterateFlags::EXACT_KEY) {
            return false;
        }
        match origin {
            Origin::Prefix(prefix) => key
                .get(prefix.len()..)
                .map_or(false, |rest| rest.contains(PATH_SEPARATOR)),
            Origin::Exact => false,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// Description of the first failure, if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Finish the iteration
    pub fn deinit(self) -> DictStatus {
        if self.error.is_some() {
            DictStatus::Failed
        } else {
            DictStatus::Ok
        }
    }
}

impl Iterator for DictIterator {
    type Item = DictEntry;

    fn next(&mut self) -> Option<DictEntry> {
        loop {
            let set = self.sets.front_mut()?;
            let Some((key, value)) = set.entries.next() else {
                self.sets.pop_front();
                continue;
            };
            if Self::is_filtered(self.flags, &set.origin, &key) {
                continue;
            }

            let value = if self.flags.contains(IterateFlags::NO_VALUE) {
                None
            } else {
                Some(value)
            };
            return Some(DictEntry { key, value });
        }
    }
}
