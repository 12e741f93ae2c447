// SPDX-License-Identifier: Apache-2.0

//! Audit configuration
//!
//! Fixed for the lifetime of the process: read once by the load-time hook
//! from an optional JSON file (`SQLAUDIT_CONFIG`) and environment overrides.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AuditError, AuditResult};

/// Path to a JSON config file
pub const ENV_CONFIG: &str = "SQLAUDIT_CONFIG";
/// `0`/`false`/`off` disables the audit sink (calls are still forwarded)
pub const ENV_ENABLED: &str = "SQLAUDIT_ENABLED";
/// Audit store path, or `:memory:`
pub const ENV_STORE: &str = "SQLAUDIT_STORE";
/// Colon-separated list of SQLite library names to try
pub const ENV_LIBRARY: &str = "SQLAUDIT_LIBRARY";
/// Directory for rolling JSON diagnostics
pub const ENV_LOG_DIR: &str = "SQLAUDIT_LOG_DIR";
/// Diagnostic filter directive (overridden by `RUST_LOG`)
pub const ENV_LOG: &str = "SQLAUDIT_LOG";

const DEFAULT_STORE_PATH: &str = "/tmp/sqlite_analytics.duckdb";
const IN_MEMORY_MARKER: &str = ":memory:";

/// Where the audit store lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StoreLocation {
    InMemory,
    Path(PathBuf),
}

impl StoreLocation {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw == IN_MEMORY_MARKER || raw.is_empty() {
            Self::InMemory
        } else {
            Self::Path(PathBuf::from(raw))
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::InMemory => None,
            Self::Path(path) => Some(path.as_path()),
        }
    }
}

impl Default for StoreLocation {
    fn default() -> Self {
        Self::Path(PathBuf::from(DEFAULT_STORE_PATH))
    }
}

impl From<String> for StoreLocation {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<StoreLocation> for String {
    fn from(location: StoreLocation) -> Self {
        location.to_string()
    }
}

impl fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InMemory => f.write_str(IN_MEMORY_MARKER),
            Self::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Configuration for the preload library
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Whether audit records are written at all
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Audit store location
    #[serde(default)]
    pub store_location: StoreLocation,
    /// SQLite library names tried in order when resolving the originals
    #[serde(default = "default_library_candidates")]
    pub library: Vec<String>,
    /// Rolling JSON log directory; stderr when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Rolled log files older than this are removed at startup
    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: u64,
}

fn default_true() -> bool {
    true
}

fn default_library_candidates() -> Vec<String> {
    if cfg!(target_os = "macos") {
        vec![
            "libsqlite3.dylib".to_string(),
            "/usr/lib/libsqlite3.dylib".to_string(),
        ]
    } else {
        vec!["libsqlite3.so.0".to_string(), "libsqlite3.so".to_string()]
    }
}

fn default_log_filter() -> String {
    "sqlaudit_preload=info,sqlaudit_core=info".to_string()
}

fn default_log_retention_days() -> u64 {
    14
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            store_location: StoreLocation::default(),
            library: default_library_candidates(),
            log_dir: None,
            log_filter: default_log_filter(),
            log_retention_days: default_log_retention_days(),
        }
    }
}

impl AuditConfig {
    /// Loads configuration from the process environment
    pub fn load() -> AuditResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> AuditResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(ENV_CONFIG).filter(|p| !p.trim().is_empty()) {
            Some(path) => Self::from_file(Path::new(path.trim()))?,
            None => Self::default(),
        };
        config.apply_overrides(lookup)?;
        Ok(config)
    }

    /// Reads a JSON config file
    pub fn from_file(path: &Path) -> AuditResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AuditError::config(format!("Failed to read {}: {e}", path.display()))
        })?;

        serde_json::from_str(&content).map_err(|e| {
            AuditError::config(format!("Failed to parse {}: {e}", path.display()))
        })
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> AuditResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_ENABLED) {
            self.enabled = parse_flag(&raw)?;
        }

        if let Some(raw) = lookup(ENV_STORE) {
            self.store_location = StoreLocation::parse(&raw);
        }

        if let Some(raw) = lookup(ENV_LIBRARY) {
            let candidates: Vec<String> = raw
                .split(':')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if candidates.is_empty() {
                return Err(AuditError::config(format!("{ENV_LIBRARY} is empty")));
            }
            self.library = candidates;
        }

        if let Some(raw) = lookup(ENV_LOG_DIR).filter(|s| !s.trim().is_empty()) {
            self.log_dir = Some(PathBuf::from(raw.trim()));
        }

        if let Some(raw) = lookup(ENV_LOG).filter(|s| !s.trim().is_empty()) {
            self.log_filter = raw.trim().to_string();
        }

        Ok(())
    }
}

fn parse_flag(raw: &str) -> AuditResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(AuditError::config(format!(
            "{ENV_ENABLED} must be a boolean, got '{other}'"
        ))),
    }
}
