//! Engine configuration
//!
//! `TreeConfig` is plain serde data. Missing fields fall back to their defaults,
//! so a config file only needs the values it overrides.

use crate::db::fractional_ordering::MAX_JITTER_ROUNDS;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for the page hierarchy engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Titles starting with any of these prefixes can never be deleted
    pub protected_title_prefixes: Vec<String>,

    /// Random bisection rounds applied to every generated position key
    pub jitter_rounds: u32,

    /// Deepest level a create or reparent may place a page at (root level is 0)
    pub max_tree_depth: usize,

    /// Retries for placements whose position the engine generated itself
    pub max_placement_retries: usize,

    /// First retry delay; doubles on every further attempt
    pub retry_base_delay_ms: u64,

    pub trash_retention_days: u32,

    pub event_channel_capacity: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            protected_title_prefixes: vec!["__system:".to_string()],
            jitter_rounds: 12,
            max_tree_depth: 1000,
            max_placement_retries: 3,
            retry_base_delay_ms: 10,
            trash_retention_days: 30,
            event_channel_capacity: 256,
        }
    }
}

impl TreeConfig {
    /// Read a JSON config file and validate it
    pub async fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid config {}: {}", path.display(), e))?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.protected_title_prefixes.iter().any(|p| p.is_empty()) {
            return Err("protected_title_prefixes cannot contain an empty prefix".to_string());
        }

        if self.jitter_rounds > MAX_JITTER_ROUNDS {
            return Err(format!(
                "jitter_rounds cannot exceed {}",
                MAX_JITTER_ROUNDS
            ));
        }

        if self.max_tree_depth == 0 {
            return Err("max_tree_depth must be greater than 0".to_string());
        }

        if self.event_channel_capacity == 0 {
            return Err("event_channel_capacity must be greater than 0".to_string());
        }

        if self.max_placement_retries > 16 {
            return Err("max_placement_retries cannot exceed 16".to_string());
        }

        Ok(())
    }

    pub fn trash_retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.trash_retention_days))
    }
}
