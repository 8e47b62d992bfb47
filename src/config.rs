//! Search and rate-limit configuration
//!
//! Everything has a default, so an empty JSON object is a valid config file.
//! `DEGREES_*` environment variables override individual fields.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Upstream windows are 15 minutes long
pub const DEFAULT_WINDOW_SECS: u64 = 15 * 60;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    /// Neighbors recorded per expanded node
    pub max_connections_per_node: usize,

    /// Nodes reported in a result's connection map, across all paths
    pub max_reported_nodes: usize,

    /// Shortest paths returned by the cache per query
    pub max_cached_paths: usize,

    pub external_call_timeout_ms: u64,

    /// Extra attempts for a timed out or transiently failing call
    pub external_retries: u32,

    /// Result pages fetched per expansion (each page is one call)
    pub max_pages_per_expand: u32,

    /// Worker threads in the search service
    pub workers: usize,

    pub rate_limits: RateLimitConfig,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_connections_per_node: 100,
            max_reported_nodes: 500,
            max_cached_paths: 64,
            external_call_timeout_ms: 10_000,
            external_retries: 1,
            max_pages_per_expand: 1,
            workers: 4,
            rate_limits: RateLimitConfig::default(),
        }
    }
}

impl SearchConfig {
    /// Load from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = fs::File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }

    /// Override fields from `DEGREES_*` environment variables.
    /// Unparseable values are ignored with a warning.
    pub fn apply_env(mut self) -> Self {
        fn read<T: std::str::FromStr>(name: &str) -> Option<T> {
            let raw = env::var(name).ok()?;
            match raw.parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!("Ignoring {}={:?}: not a valid value", name, raw);
                    None
                }
            }
        }

        if let Some(v) = read("DEGREES_MAX_CONNECTIONS_PER_NODE") {
            self.max_connections_per_node = v;
        }
        if let Some(v) = read("DEGREES_MAX_REPORTED_NODES") {
            self.max_reported_nodes = v;
        }
        if let Some(v) = read("DEGREES_MAX_CACHED_PATHS") {
            self.max_cached_paths = v;
        }
        if let Some(v) = read("DEGREES_EXTERNAL_CALL_TIMEOUT_MS") {
            self.external_call_timeout_ms = v;
        }
        if let Some(v) = read("DEGREES_EXTERNAL_RETRIES") {
            self.external_retries = v;
        }
        if let Some(v) = read("DEGREES_MAX_PAGES_PER_EXPAND") {
            self.max_pages_per_expand = v;
        }
        if let Some(v) = read("DEGREES_WORKERS") {
            self.workers = v;
        }
        self
    }

    pub fn external_call_timeout(&self) -> Duration {
        Duration::from_millis(self.external_call_timeout_ms)
    }
}

/// Nominal ceiling of one upstream resource
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceLimit {
    pub app_limit: u32,
    pub user_limit: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_window_secs() -> u64 {
    DEFAULT_WINDOW_SECS
}

impl ResourceLimit {
    pub const fn new(app_limit: u32, user_limit: u32) -> Self {
        Self {
            app_limit,
            user_limit,
            window_secs: DEFAULT_WINDOW_SECS,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Per-resource ceilings, keyed by resource name
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    pub resources: BTreeMap<String, ResourceLimit>,

    /// Used for resources missing from `resources`
    pub fallback: ResourceLimit,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let resources = [
            ("search/tweets", ResourceLimit::new(450, 180)),
            ("friends/ids", ResourceLimit::new(15, 15)),
            ("followers/ids", ResourceLimit::new(15, 15)),
            ("users/lookup", ResourceLimit::new(300, 900)),
        ]
        .into_iter()
        .map(|(name, limit)| (name.to_string(), limit))
        .collect();

        Self {
            resources,
            fallback: ResourceLimit::new(15, 15),
        }
    }
}

impl RateLimitConfig {
    pub fn limit_for(&self, resource: &str) -> ResourceLimit {
        self.resources.get(resource).copied().unwrap_or(self.fallback)
    }

    /// Same ceiling for every known resource, handy for tests and replays
    pub fn uniform(limit: u32) -> Self {
        let mut config = Self::default();
        for value in config.resources.values_mut() {
            *value = ResourceLimit::new(limit, limit);
        }
        config.fallback = ResourceLimit::new(limit, limit);
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_file_gives_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{}}").unwrap();

        let config = SearchConfig::load(file.path()).unwrap();
        assert_eq!(config, SearchConfig::default());
    }

    #[test]
    fn test_partial_override() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"max_connections_per_node": 7, "rate_limits": {{"resources": {{"search/tweets": {{"app_limit": 1, "user_limit": 2}}}}}}}}"#
        )
        .unwrap();

        let config = SearchConfig::load(file.path()).unwrap();
        assert_eq!(config.max_connections_per_node, 7);
        assert_eq!(config.max_reported_nodes, 500);

        let limit = config.rate_limits.limit_for("search/tweets");
        assert_eq!((limit.app_limit, limit.user_limit), (1, 2));
        assert_eq!(limit.window_secs, DEFAULT_WINDOW_SECS);
    }

    #[test]
    fn test_unknown_resource_uses_fallback() {
        let config = RateLimitConfig::default();
        assert_eq!(config.limit_for("lists/members"), config.fallback);
    }
}
