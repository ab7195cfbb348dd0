//! Three-valued outcomes shared by lookup, commit and iteration

use std::fmt;

/// Outcome of a dictionary operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DictStatus {
    /// Completed with the requested effect or value
    Ok,
    /// Key missing, or an increment in the transaction targeted a missing key
    NotFound,
    /// Backend error other than missing key, or invalid input
    Failed,
}

impl DictStatus {
    /// Legacy numeric code: 1 = ok, 0 = not found, -1 = failed
    pub fn code(self) -> i32 {
        match self {
            DictStatus::Ok => 1,
            DictStatus::NotFound => 0,
            DictStatus::Failed => -1,
        }
    }

    pub fn is_ok(self) -> bool {
        self == DictStatus::Ok
    }
}

impl fmt::Display for DictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DictStatus::Ok => f.write_str("OK"),
            DictStatus::NotFound => f.write_str("NOTFOUND"),
            DictStatus::Failed => f.write_str("FAILED"),
        }
    }
}

/// Result of a single-key lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupResult {
    Found(String),
    NotFound,
    /// Backend or input error, with its description
    Failed(String),
}

impl LookupResult {
    pub fn status(&self) -> DictStatus {
        match self {
            LookupResult::Found(_) => DictStatus::Ok,
            LookupResult::NotFound => DictStatus::NotFound,
            LookupResult::Failed(_) => DictStatus::Failed,
        }
    }

    /// The value, when found
    pub fn value(&self) -> Option<&str> {
        match self {
            LookupResult::Found(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<String> {
        match self {
            LookupResult::Found(value) => Some(value),
            _ => None,
        }
    }
}

/// Terminal result of a transaction commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitResult {
    pub status: DictStatus,
    /// First backend error seen, when the commit failed
    pub error: Option<String>,
}

impl CommitResult {
    pub fn ok() -> Self {
        Self {
            status: DictStatus::Ok,
            error: None,
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: DictStatus::NotFound,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: DictStatus::Failed,
            error: Some(error.into()),
        }
    }
}

impl fmt::Display for CommitResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            Some(error) => write!(f, "{} ({})", self.status, error),
            None => write!(f, "{}", self.status),
        }
    }
}
