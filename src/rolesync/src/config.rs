//! Run configuration
//!
//! Loaded from a JSON file, then overridden by environment variables:
//!
//! - `PGDSN` - base connection string
//! - `ROLESYNC_MAX_CONNECTIONS` - connection cap (default: 256)
//! - `ROLESYNC_REAL` - `1`/`true` to apply changes instead of a dry run

use crate::error::{Result, RoleSyncError};
use crate::inspect::DEFAULT_BLACKLIST;
use crate::rule::{Entry, RoleRule};
use crate::session::DEFAULT_MAX_CONNECTIONS;
use serde::Deserialize;
use std::path::Path;

/// Reconciliation settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Base connection string, URL or `key=value` style
    pub connstring: String,

    /// Maximum number of simultaneous connections, one per database
    pub max_connections: usize,

    /// Log statements instead of executing them
    pub dry_run: bool,

    /// Patterns of role names never altered nor dropped
    pub roles_blacklist: Vec<String>,

    /// Role rules
    pub rules: Vec<RoleRule>,

    /// Directory entries fed to templated rules
    pub entries: Vec<Entry>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            connstring: String::new(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            dry_run: true,
            roles_blacklist: DEFAULT_BLACKLIST.iter().map(|p| p.to_string()).collect(),
            rules: Vec::new(),
            entries: Vec::new(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Apply overrides from the process environment
    pub fn apply_env(self) -> Result<Self> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_env_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(connstring) = lookup("PGDSN") {
            self.connstring = connstring;
        }
        if let Some(max) = lookup("ROLESYNC_MAX_CONNECTIONS") {
            self.max_connections = max.parse().map_err(|_| {
                RoleSyncError::Config(format!("ROLESYNC_MAX_CONNECTIONS is not a number: {max}"))
            })?;
        }
        if let Some(real) = lookup("ROLESYNC_REAL") {
            self.dry_run = !matches!(real.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        Ok(self)
    }

    /// Check settings that serde cannot
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(RoleSyncError::Config(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if let Some(rule) = self.rules.iter().find(|r| r.names.is_empty()) {
            return Err(RoleSyncError::Config(format!(
                "rule without role name: {rule:?}"
            )));
        }
        Ok(())
    }
}
