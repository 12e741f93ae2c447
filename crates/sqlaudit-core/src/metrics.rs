// SPDX-License-Identifier: Apache-2.0

//! Lightweight in-memory counters for the audit path.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct AuditMetrics {
    written: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    panicked: AtomicU64,
}

impl AuditMetrics {
    pub fn record_written(&self) {
        self.written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// A transition that had nowhere to go (sink disabled or unavailable)
    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_panicked(&self) {
        self.panicked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, tracked_statements: usize) -> MetricsSnapshot {
        MetricsSnapshot {
            written: self.written.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            tracked_statements,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub written: u64,
    pub failed: u64,
    pub skipped: u64,
    pub panicked: u64,
    /// Prepared statements whose text is retained until finalize
    pub tracked_statements: usize,
}
