// SPDX-License-Identifier: Apache-2.0

//! Call Interceptor
//!
//! A [`SqliteApi`] decorator that records a lifecycle trail for every
//! statement and otherwise behaves exactly like the implementation it wraps:
//! arguments, out-parameters and return codes pass through untouched.
//!
//! 1. Prepare: record `prepared` with the caller's text, then forward
//! 2. Step: forward, then record `completed` on `SQLITE_DONE`, else `executing`
//! 3. Finalize: record `finalized`, then forward (the handle dies there)
//!
//! Statement text is captured when the statement is prepared and kept until
//! it is finalized. Step and finalize reuse the captured copy only while the
//! handle still reports it through `sqlite3_sql`.

use std::collections::HashMap;
use std::ffi::CStr;
use std::os::raw::{c_char, c_int};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::api::SqliteApi;
use crate::ffi::{self, sqlite3, sqlite3_stmt, SQLITE_DONE, SQLITE_OK};
use crate::identity::CallerIdentityResolver;
use crate::metrics::{AuditMetrics, MetricsSnapshot};
use crate::sink::AuditSink;
use crate::types::{AuditRecord, Stage};

/// Logging implementation of [`SqliteApi`] over any inner implementation
pub struct Interceptor<A> {
    inner: A,
    /// `None` when auditing is disabled or the store failed to open
    sink: Option<Arc<dyn AuditSink>>,
    resolver: CallerIdentityResolver,
    /// Statement handle address -> text captured at prepare time
    statements: Mutex<HashMap<usize, TrackedStatement>>,
    metrics: AuditMetrics,
}

impl<A: SqliteApi> Interceptor<A> {
    pub fn new(
        inner: A,
        sink: Option<Arc<dyn AuditSink>>,
        resolver: CallerIdentityResolver,
    ) -> Self {
        Self {
            inner,
            sink,
            resolver,
            statements: Mutex::new(HashMap::new()),
            metrics: AuditMetrics::default(),
        }
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }

    pub fn is_auditing(&self) -> bool {
        self.sink.is_some()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.statements.lock().len())
    }

    /// Builds a record and hands it to the sink. Never fails, never unwinds.
    fn submit(&self, query: &str, stage: Stage) {
        let Some(sink) = &self.sink else {
            self.metrics.record_skipped();
            return;
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let record = AuditRecord::new(query, stage, self.resolver.resolve());
            (sink.write(&record), record)
        }));

        match outcome {
            Ok((Ok(()), _)) => self.metrics.record_written(),
            Ok((Err(e), record)) => {
                self.metrics.record_failed();
                warn!(
                    stage = %stage,
                    thread_id = %record.thread_id,
                    query = %record.preview(),
                    "Dropped audit record: {}",
                    e
                );
            }
            Err(_) => {
                self.metrics.record_panicked();
                error!(stage = %stage, "Audit path panicked; record dropped");
            }
        }
    }

    /// Remembers the text of a freshly prepared statement
    unsafe fn track(&self, stmt: *mut sqlite3_stmt) {
        let sql = self.inner.sql(stmt);
        let mut statements = self.statements.lock();
        match ffi::statement_sql(sql) {
            Some(text) => {
                statements.insert(stmt as usize, TrackedStatement::new(sql, text));
            }
            None => {
                statements.remove(&(stmt as usize));
            }
        }
    }

    /// Text currently attached to `stmt`.
    ///
    /// The captured copy is only trusted while the handle still reports the
    /// same text. A handle finalized out of our sight (`sqlite3_exec`) can be
    /// reused by a statement prepared through an entry point we don't wrap
    /// (`sqlite3_prepare_v3`, `sqlite3_prepare16`, ...); such entries are
    /// dropped and the live text is read instead. `release` stops tracking.
    unsafe fn statement_text(&self, stmt: *mut sqlite3_stmt, release: bool) -> Option<Arc<str>> {
        if stmt.is_null() {
            return None;
        }

        let key = stmt as usize;
        let sql = self.inner.sql(stmt);

        {
            let mut statements = self.statements.lock();
            let tracked = if release {
                statements.remove(&key)
            } else {
                statements.get(&key).cloned()
            };

            match tracked {
                Some(entry) if entry.matches(sql) => return Some(entry.text),
                Some(_) => {
                    statements.remove(&key);
                    debug!(handle = key, "Discarding stale text for reused statement handle");
                }
                None => {}
            }
        }

        ffi::statement_sql(sql).map(Arc::from)
    }
}

/// Statement text captured at prepare time, with the `sqlite3_sql` pointer
/// it was read from
#[derive(Clone)]
struct TrackedStatement {
    sql: usize,
    text: Arc<str>,
}

impl TrackedStatement {
    fn new(sql: *const c_char, text: String) -> Self {
        Self {
            sql: sql as usize,
            text: Arc::from(text),
        }
    }

    /// # Safety
    ///
    /// `sql` must be null or a live `sqlite3_sql` result.
    unsafe fn matches(&self, sql: *const c_char) -> bool {
        !sql.is_null()
            && sql as usize == self.sql
            && CStr::from_ptr(sql).to_bytes() == self.text.as_bytes()
    }
}

impl<A: SqliteApi> SqliteApi for Interceptor<A> {
    unsafe fn prepare_v2(
        &self,
        db: *mut sqlite3,
        sql: *const c_char,
        n_byte: c_int,
        stmt: *mut *mut sqlite3_stmt,
        tail: *mut *const c_char,
    ) -> c_int {
        if self.sink.is_some() {
            if let Some(text) = ffi::input_sql(sql, n_byte) {
                self.submit(&text, Stage::Prepared);
            }
        }

        let rc = self.inner.prepare_v2(db, sql, n_byte, stmt, tail);

        if rc == SQLITE_OK && self.sink.is_some() && !stmt.is_null() && !(*stmt).is_null() {
            self.track(*stmt);
        }

        rc
    }

    unsafe fn step(&self, stmt: *mut sqlite3_stmt) -> c_int {
        let rc = self.inner.step(stmt);

        if self.sink.is_some() {
            if let Some(text) = self.statement_text(stmt, false) {
                let stage = if rc == SQLITE_DONE {
                    Stage::Completed
                } else {
                    Stage::Executing
                };
                self.submit(&text, stage);
            }
        }

        rc
    }

    unsafe fn finalize(&self, stmt: *mut sqlite3_stmt) -> c_int {
        if self.sink.is_some() {
            if let Some(text) = self.statement_text(stmt, true) {
                self.submit(&text, Stage::Finalized);
            }
        }

        self.inner.finalize(stmt)
    }

    unsafe fn sql(&self, stmt: *mut sqlite3_stmt) -> *const c_char {
        self.inner.sql(stmt)
    }
}
