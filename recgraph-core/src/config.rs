//! Configuration types
//!
//! Values can be built in code (`GraphConfig::default().with_*`) or loaded
//! from environment variables with defaults for anything unset.

use std::time::Duration;

use regex::Regex;

use crate::error::{ConfigError, GraphResult};

/// Default bound on nested spanning records per traversal.
pub const DEFAULT_MAX_SPANNING_DEPTH: usize = 5;

/// Hard ceiling for `max_spanning_depth`.
pub const MAX_SPANNING_DEPTH_CEILING: usize = 64;

/// Default record freshness window (30 seconds).
pub const DEFAULT_RECORD_TTL_MS: u64 = 30_000;

/// Default window after expiry during which stale data may still be served.
pub const DEFAULT_STALE_TTL_MS: u64 = 24 * 60 * 60 * 1000;

/// Default emission denylist: data-model-object api names.
pub const DEFAULT_EMISSION_DENYLIST: &[&str] = &["__dlm$"];

/// Graph cache configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphConfig {
    /// Maximum nesting of spanning records during ingest and traversal.
    pub max_spanning_depth: usize,
    /// How long ingested records are fresh.
    pub record_ttl: Duration,
    /// How long expired records may still be served from the durable store.
    pub stale_ttl: Duration,
    /// Regex patterns; records whose api name matches any are never emitted.
    pub emission_denylist: Vec<String>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_spanning_depth: DEFAULT_MAX_SPANNING_DEPTH,
            record_ttl: Duration::from_millis(DEFAULT_RECORD_TTL_MS),
            stale_ttl: Duration::from_millis(DEFAULT_STALE_TTL_MS),
            emission_denylist: DEFAULT_EMISSION_DENYLIST
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

impl GraphConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_spanning_depth(mut self, depth: usize) -> Self {
        self.max_spanning_depth = depth;
        self
    }

    pub fn with_record_ttl(mut self, ttl: Duration) -> Self {
        self.record_ttl = ttl;
        self
    }

    pub fn with_stale_ttl(mut self, ttl: Duration) -> Self {
        self.stale_ttl = ttl;
        self
    }

    pub fn with_emission_denylist<S: Into<String>>(
        mut self,
        patterns: impl IntoIterator<Item = S>,
    ) -> Self {
        self.emission_denylist = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Create GraphConfig from environment variables.
    ///
    /// Environment variables:
    /// - `RECGRAPH_MAX_SPANNING_DEPTH`: spanning depth bound (default: 5)
    /// - `RECGRAPH_RECORD_TTL_MS`: record freshness in ms (default: 30000)
    /// - `RECGRAPH_STALE_TTL_MS`: stale window in ms (default: 86400000)
    /// - `RECGRAPH_EMIT_DENYLIST`: comma-separated regex patterns (default: `__dlm$`)
    ///
    /// Unparseable values fall back to defaults; call [`GraphConfig::validate`]
    /// to reject out-of-range ones.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_spanning_depth = std::env::var("RECGRAPH_MAX_SPANNING_DEPTH")
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(defaults.max_spanning_depth);

        let record_ttl = std::env::var("RECGRAPH_RECORD_TTL_MS")
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.record_ttl);

        let stale_ttl = std::env::var("RECGRAPH_STALE_TTL_MS")
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.stale_ttl);

        let emission_denylist = std::env::var("RECGRAPH_EMIT_DENYLIST")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or(defaults.emission_denylist);

        Self {
            max_spanning_depth,
            record_ttl,
            stale_ttl,
            emission_denylist,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> GraphResult<()> {
        if self.max_spanning_depth == 0 || self.max_spanning_depth > MAX_SPANNING_DEPTH_CEILING {
            return Err(ConfigError::InvalidValue {
                field: "max_spanning_depth".to_string(),
                value: self.max_spanning_depth.to_string(),
                reason: format!("must be between 1 and {MAX_SPANNING_DEPTH_CEILING}"),
            }
            .into());
        }

        if self.record_ttl.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "record_ttl".to_string(),
                value: format!("{:?}", self.record_ttl),
                reason: "must be positive".to_string(),
            }
            .into());
        }

        self.compiled_denylist()?;
        Ok(())
    }

    /// Compile the emission denylist patterns.
    pub fn compiled_denylist(&self) -> Result<Vec<Regex>, ConfigError> {
        self.emission_denylist
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })
            })
            .collect()
    }

    /// Record TTL in milliseconds, saturating.
    pub fn record_ttl_ms(&self) -> i64 {
        i64::try_from(self.record_ttl.as_millis()).unwrap_or(i64::MAX)
    }

    /// Stale TTL in milliseconds, saturating.
    pub fn stale_ttl_ms(&self) -> i64 {
        i64::try_from(self.stale_ttl.as_millis()).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GraphError;

    #[test]
    fn test_default_config_is_valid() {
        let config = GraphConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_spanning_depth, 5);
        assert_eq!(config.record_ttl_ms(), 30_000);
    }

    #[test]
    fn test_rejects_zero_depth() {
        let config = GraphConfig::default().with_max_spanning_depth(0);
        assert!(matches!(
            config.validate(),
            Err(GraphError::Config(ConfigError::InvalidValue { field, .. })) if field == "max_spanning_depth"
        ));
    }

    #[test]
    fn test_rejects_zero_ttl() {
        let config = GraphConfig::default().with_record_ttl(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(GraphError::Config(ConfigError::InvalidValue { field, .. })) if field == "record_ttl"
        ));
    }

    #[test]
    fn test_rejects_bad_pattern() {
        let config = GraphConfig::default().with_emission_denylist(["(unclosed"]);
        assert!(matches!(
            config.validate(),
            Err(GraphError::Config(ConfigError::InvalidPattern { .. }))
        ));
    }

    #[test]
    fn test_denylist_matches_dmo_suffix() {
        let patterns = GraphConfig::default()
            .compiled_denylist()
            .expect("default patterns compile");
        assert!(patterns.iter().any(|p| p.is_match("UnifiedIndividual__dlm")));
        assert!(!patterns.iter().any(|p| p.is_match("Account")));
    }
}
