//! Dictionary configuration
//!
//! A dictionary is configured by a URI of `key=value` pairs joined by `:`,
//! e.g. `oid=metadata:pool=mail_dictionaries`, plus per-user settings.

use crate::error::{DictError, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Pool used when the URI does not name one
pub const DEFAULT_POOL: &str = "mail_dictionaries";

/// Wait applied when taking the atomic-increment lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Separator between URI properties
const URI_SEPARATOR: char = ':';

/// Backend location of a dictionary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DictConfig {
    /// Pool holding the partition objects
    pub pool: String,
    /// Base identifier the partition object names are derived from
    pub oid: String,
    /// Cluster configuration file, passed through to the connection layer
    pub cluster_config: Option<PathBuf>,
}

impl Default for DictConfig {
    fn default() -> Self {
        Self {
            pool: DEFAULT_POOL.to_string(),
            oid: String::new(),
            cluster_config: None,
        }
    }
}

impl DictConfig {
    /// Parse a dictionary URI. `None` or an empty URI yields the defaults.
    ///
    /// Recognized keys: `oid`, `pool`, `config`. Anything else is rejected.
    pub fn from_uri(uri: Option<&str>) -> Result<Self> {
        let mut config = Self::default();
        let uri = match uri {
            Some(uri) if !uri.is_empty() => uri,
            _ => return Ok(config),
        };

        for prop in uri.split(URI_SEPARATOR) {
            if let Some(oid) = prop.strip_prefix("oid=") {
                config.oid = oid.to_string();
            } else if let Some(pool) = prop.strip_prefix("pool=") {
                config.pool = pool.to_string();
            } else if let Some(path) = prop.strip_prefix("config=") {
                config.cluster_config = Some(PathBuf::from(path));
            } else {
                return Err(DictError::Config(format!("Invalid URI! (unrecognized '{}')", prop)));
            }
        }

        Ok(config)
    }
}

/// Per-user dictionary settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DictSettings {
    /// Owner of the private partition
    pub username: String,
    /// Maximum wait for the atomic-increment lock
    pub lock_timeout: Duration,
}

impl DictSettings {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Set lock wait timeout
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }
}

/// Escape `/` and `\` so the result is a single path segment
///
/// `/` becomes `\|` and `\` becomes `\\`.
pub fn escape_dict_string(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        match c {
            '/' => escaped.push_str("\\|"),
            '\\' => escaped.push_str("\\\\"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        assert_eq!(DictConfig::from_uri(None).unwrap(), DictConfig::default());
        assert_eq!(DictConfig::from_uri(Some("")).unwrap(), DictConfig::default());
        assert_eq!(DictConfig::default().pool, "mail_dictionaries");
    }

    #[test]
    fn test_parse_all_keys() {
        let config =
            DictConfig::from_uri(Some("oid=metadata:pool=librmb-index:config=/etc/ceph/ceph.conf"))
                .unwrap();

        assert_eq!(config.oid, "metadata");
        assert_eq!(config.pool, "librmb-index");
        assert_eq!(config.cluster_config, Some(PathBuf::from("/etc/ceph/ceph.conf")));
    }

    #[test]
    fn test_later_value_wins() {
        let config = DictConfig::from_uri(Some("pool=a:pool=b")).unwrap();
        assert_eq!(config.pool, "b");
    }

    #[test]
    fn test_unknown_key_rejected() {
        let result = DictConfig::from_uri(Some("oid=x:colour=blue"));
        assert!(matches!(result, Err(DictError::Config(_))));
    }

    #[test]
    fn test_empty_segment_rejected() {
        let result = DictConfig::from_uri(Some("oid=x::pool=y"));
        assert!(matches!(result, Err(DictError::Config(_))));
    }

    #[test]
    fn test_settings_builder() {
        let settings = DictSettings::new("alice").lock_timeout(Duration::from_millis(5));
        assert_eq!(settings.username, "alice");
        assert_eq!(settings.lock_timeout, Duration::from_millis(5));
        assert_eq!(DictSettings::new("bob").lock_timeout, DEFAULT_LOCK_TIMEOUT);
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape_dict_string("plain"), "plain");
        assert_eq!(escape_dict_string("a/b"), "a\\|b");
        assert_eq!(escape_dict_string("a\\b"), "a\\\\b");
        assert_eq!(escape_dict_string("back\\slash/mix"), "back\\\\slash\\|mix");
        assert_eq!(escape_dict_string("trailing/"), "trailing\\|");
    }
}
