//! Key namespaces and their backing objects
//!
//! Every dictionary is split into two partitions, each stored in its own
//! backend object. A key's first path segment decides its partition.

use std::fmt;
use std::ops::{Index, IndexMut};

/// Path prefix of per-user keys
pub const PRIVATE_PREFIX: &str = "private/";
/// Path prefix of keys shared by all users
pub const SHARED_PREFIX: &str = "shared/";

/// Separator between key path segments
pub const PATH_SEPARATOR: char = '/';

/// One of the two independently stored halves of a dictionary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Partition {
    Private,
    Shared,
}

impl Partition {
    /// Both partitions, in commit and iteration order
    pub const ALL: [Partition; 2] = [Partition::Private, Partition::Shared];

    /// Partition owning `key`, or `None` for keys outside both namespaces
    pub fn route(key: &str) -> Option<Partition> {
        if key.starts_with(PRIVATE_PREFIX) {
            Some(Partition::Private)
        } else if key.starts_with(SHARED_PREFIX) {
            Some(Partition::Shared)
        } else {
            None
        }
    }

    pub fn prefix(self) -> &'static str {
        match self {
            Partition::Private => PRIVATE_PREFIX,
            Partition::Shared => SHARED_PREFIX,
        }
    }

    fn slot(self) -> usize {
        match self {
            Partition::Private => 0,
            Partition::Shared => 1,
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Partition::Private => f.write_str("private"),
            Partition::Shared => f.write_str("shared"),
        }
    }
}

/// Fixed two-slot map keyed by [`Partition`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionMap<T> {
    slots: [T; 2],
}

impl<T> PartitionMap<T> {
    pub fn new(private: T, shared: T) -> Self {
        Self {
            slots: [private, shared],
        }
    }

    /// Build a map by evaluating `f` for each partition
    pub fn from_fn(mut f: impl FnMut(Partition) -> T) -> Self {
        Self::new(f(Partition::Private), f(Partition::Shared))
    }

    /// Iterate `(partition, value)` pairs, private first
    pub fn iter(&self) -> impl Iterator<Item = (Partition, &T)> {
        Partition::ALL.into_iter().zip(self.slots.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Partition, &mut T)> {
        Partition::ALL.into_iter().zip(self.slots.iter_mut())
    }
}

impl<T> Index<Partition> for PartitionMap<T> {
    type Output = T;

    fn index(&self, partition: Partition) -> &T {
        &self.slots[partition.slot()]
    }
}

impl<T> IndexMut<Partition> for PartitionMap<T> {
    fn index_mut(&mut self, partition: Partition) -> &mut T {
        &mut self.slots[partition.slot()]
    }
}
