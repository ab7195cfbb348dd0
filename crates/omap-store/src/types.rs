//! Object store data types
//!
//! Objects are addressed by pool + name. Each object carries an omap: an
//! ordered key-value sub-map, separate from the object's byte content.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::SystemTime;

/// Contents (or a slice of the contents) of an object's omap
pub type OmapValues = BTreeMap<String, String>;

/// Per-query results of a [`ReadOp`], in query order
pub type ReadResults = Vec<crate::StoreResult<OmapValues>>;

/// Address of a backend object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
    pool: String,
    name: String,
}

impl ObjectId {
    pub fn new(pool: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            pool: pool.into(),
            name: name.into(),
        }
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.pool, self.name)
    }
}

/// A single omap query inside a read operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OmapQuery {
    /// Fetch exactly these keys; absent keys are simply missing from the result
    Keys(BTreeSet<String>),
    /// Fetch keys sorted after `start_after` that start with `prefix`, at most `limit` of them
    Range {
        start_after: String,
        prefix: String,
        limit: usize,
    },
}

impl OmapQuery {
    /// Evaluate this query against an omap
    pub fn evaluate(&self, omap: &OmapValues) -> OmapValues {
        match self {
            OmapQuery::Keys(keys) => keys
                .iter()
                .filter_map(|k| omap.get(k).map(|v| (k.clone(), v.clone())))
                .collect(),
            OmapQuery::Range {
                start_after,
                prefix,
                limit,
            } => {
                let start = if start_after.as_str() > prefix.as_str() {
                    start_after.as_str()
                } else {
                    prefix.as_str()
                };
                omap.range::<str, _>((std::ops::Bound::Included(start), std::ops::Bound::Unbounded))
                    .filter(|(k, _)| k.as_str() != start_after.as_str())
                    .take_while(|(k, _)| k.starts_with(prefix.as_str()))
                    .take(*limit)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            }
        }
    }
}

/// Batched read against one object; every query reports its own status
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadOp {
    queries: Vec<OmapQuery>,
}

impl ReadOp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an exact key-set lookup
    pub fn get_many<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.queries
            .push(OmapQuery::Keys(keys.into_iter().map(Into::into).collect()));
        self
    }

    /// Add a prefix range scan
    pub fn get_range(
        mut self,
        start_after: impl Into<String>,
        prefix: impl Into<String>,
        limit: usize,
    ) -> Self {
        self.queries.push(OmapQuery::Range {
            start_after: start_after.into(),
            prefix: prefix.into(),
            limit,
        });
        self
    }

    pub fn queries(&self) -> &[OmapQuery] {
        &self.queries
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

/// One mutation step of a [`WriteOp`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteStep {
    Set(OmapValues),
    Remove(BTreeSet<String>),
}

/// Ordered batch of omap mutations applied atomically to one object
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOp {
    steps: Vec<WriteStep>,
    mtime: Option<SystemTime>,
}

impl WriteOp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage upserts
    pub fn set(&mut self, values: OmapValues) -> &mut Self {
        self.steps.push(WriteStep::Set(values));
        self
    }

    /// Stage a single upsert
    pub fn set_one(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let mut values = OmapValues::new();
        values.insert(key.into(), value.into());
        self.set(values)
    }

    /// Stage deletions
    pub fn remove(&mut self, keys: BTreeSet<String>) -> &mut Self {
        self.steps.push(WriteStep::Remove(keys));
        self
    }

    /// Stage a single deletion
    pub fn remove_one(&mut self, key: impl Into<String>) -> &mut Self {
        let mut keys = BTreeSet::new();
        keys.insert(key.into());
        self.remove(keys)
    }

    /// Modification time recorded on the object when the op is applied
    pub fn set_mtime(&mut self, mtime: SystemTime) -> &mut Self {
        self.mtime = Some(mtime);
        self
    }

    pub fn mtime(&self) -> Option<SystemTime> {
        self.mtime
    }

    pub fn steps(&self) -> &[WriteStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Apply all steps in order to an omap
    pub fn apply_to(&self, omap: &mut OmapValues) {
        for step in &self.steps {
            match step {
                WriteStep::Set(values) => {
                    omap.extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                WriteStep::Remove(keys) => {
                    for key in keys {
                        omap.remove(key);
                    }
                }
            }
        }
    }
}
