// SPDX-License-Identifier: Apache-2.0

//! Audit Types
//!
//! Type definitions shared by the interceptor and the audit sink.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::AuditError;

/// How far a statement's lifecycle has progressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Prepared,
    Executing,
    Completed,
    Finalized,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Prepared,
        Stage::Executing,
        Stage::Completed,
        Stage::Finalized,
    ];

    /// Value stored in the `status` column
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prepared => "prepared",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Finalized => "finalized",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AuditError::config(format!("Unknown lifecycle stage: {s}")))
    }
}

/// Where a call came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub hostname: String,
    pub address: String,
}

/// One lifecycle transition, built by the interceptor and consumed by a sink.
///
/// The timestamp is not part of the record: the store assigns it at insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub query: String,
    pub stage: Stage,
    pub caller: CallerIdentity,
    pub thread_id: String,
}

impl AuditRecord {
    pub fn new(query: impl Into<String>, stage: Stage, caller: CallerIdentity) -> Self {
        Self {
            query: query.into(),
            stage,
            caller,
            thread_id: current_thread_id(),
        }
    }

    /// Truncated query for diagnostics (first 100 chars)
    pub fn preview(&self) -> String {
        let mut preview = self.query.chars().take(100).collect::<String>();
        if self.query.chars().nth(100).is_some() {
            preview.push_str("...");
        }
        preview
    }
}

/// Opaque identifier of the calling thread.
///
/// Only meaningful within one process run.
pub fn current_thread_id() -> String {
    let thread = std::thread::current();
    match thread.name() {
        Some(name) => format!("{:?}:{}", thread.id(), name),
        None => format!("{:?}", thread.id()),
    }
}

/// A row read back from the audit table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: i64,
    pub query: String,
    /// Store-assigned insert time (UTC, no zone stored)
    pub timestamp: Option<NaiveDateTime>,
    pub hostname: String,
    pub address: String,
    pub thread_id: String,
    pub stage: Stage,
}

/// Filters for reading the audit trail back
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryQuery {
    /// Only rows at this stage
    #[serde(default)]
    pub stage: Option<Stage>,
    /// Case-insensitive substring over query, hostname and thread id
    #[serde(default)]
    pub search: Option<String>,
    /// Most recent first instead of submission order
    #[serde(default)]
    pub newest_first: bool,
    #[serde(default = "default_history_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    /// Only rows written within this many seconds of now
    #[serde(default)]
    pub within_secs: Option<u64>,
}

fn default_history_limit() -> usize {
    1000
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            stage: None,
            search: None,
            newest_first: false,
            limit: default_history_limit(),
            offset: 0,
            within_secs: None,
        }
    }
}

impl HistoryQuery {
    pub fn stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    pub fn within(mut self, window: Duration) -> Self {
        self.within_secs = Some(window.as_secs());
        self
    }
}

/// Statement kinds the stats break the trail down by, first keyword wins
pub const QUERY_TYPES: [&str; 6] = ["SELECT", "INSERT", "UPDATE", "DELETE", "CREATE", "OTHER"];

/// Audit trail statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditStats {
    pub total: u64,
    pub by_stage: HashMap<String, u64>,
    /// Keyed by [`QUERY_TYPES`]
    pub by_query_type: HashMap<String, u64>,
    pub hosts: u64,
    pub threads: u64,
    pub first_seen: Option<NaiveDateTime>,
    pub last_seen: Option<NaiveDateTime>,
}

impl AuditStats {
    pub fn count(&self, stage: Stage) -> u64 {
        self.by_stage.get(stage.as_str()).copied().unwrap_or(0)
    }

    pub fn count_type(&self, query_type: &str) -> u64 {
        self.by_query_type.get(query_type).copied().unwrap_or(0)
    }

    /// Rows per hour between the first and last row, over at least one hour
    pub fn queries_per_hour(&self) -> f64 {
        let hours = match (self.first_seen, self.last_seen) {
            (Some(first), Some(last)) => (last - first).num_milliseconds() as f64 / 3_600_000.0,
            _ => 0.0,
        };
        self.total as f64 / hours.max(1.0)
    }
}
