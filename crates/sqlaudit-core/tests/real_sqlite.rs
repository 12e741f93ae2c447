// SPDX-License-Identifier: Apache-2.0

//! Interceptor in front of a real SQLite build.
//!
//! The bundled library is linked statically, so `LinkedSqlite` calls it
//! directly instead of going through dlopen.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::ptr;
use std::sync::Arc;

use libsqlite3_sys as raw;
use sqlaudit_core::ffi::{sqlite3, sqlite3_stmt, SQLITE_DONE, SQLITE_OK, SQLITE_ROW};
use sqlaudit_core::{
    AuditError, AuditResult, AuditSink, CallerIdentityResolver, DuckDbSink, HistoryQuery,
    HostLookup, Interceptor, SqliteApi, Stage, StoreLocation,
};

struct LinkedSqlite;

impl SqliteApi for LinkedSqlite {
    unsafe fn prepare_v2(
        &self,
        db: *mut sqlite3,
        sql: *const c_char,
        n_byte: c_int,
        stmt: *mut *mut sqlite3_stmt,
        tail: *mut *const c_char,
    ) -> c_int {
        raw::sqlite3_prepare_v2(
            db as *mut raw::sqlite3,
            sql,
            n_byte,
            stmt as *mut *mut raw::sqlite3_stmt,
            tail,
        )
    }

    unsafe fn step(&self, stmt: *mut sqlite3_stmt) -> c_int {
        raw::sqlite3_step(stmt as *mut raw::sqlite3_stmt)
    }

    unsafe fn finalize(&self, stmt: *mut sqlite3_stmt) -> c_int {
        raw::sqlite3_finalize(stmt as *mut raw::sqlite3_stmt)
    }

    unsafe fn sql(&self, stmt: *mut sqlite3_stmt) -> *const c_char {
        raw::sqlite3_sql(stmt as *mut raw::sqlite3_stmt)
    }
}

struct Unresolvable;

impl HostLookup for Unresolvable {
    fn hostname(&self) -> AuditResult<String> {
        Ok("sandbox".to_string())
    }

    fn address(&self, hostname: &str) -> AuditResult<std::net::IpAddr> {
        Err(AuditError::identity(format!("{hostname} is not in DNS")))
    }
}

/// Owned in-memory database with a two-row `users` table
struct Database(*mut raw::sqlite3);

impl Database {
    fn open() -> Self {
        let mut db = ptr::null_mut();
        let path = CString::new(":memory:").unwrap();
        let rc = unsafe { raw::sqlite3_open(path.as_ptr(), &mut db) };
        assert_eq!(rc, raw::SQLITE_OK);

        let setup = CString::new(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);
             INSERT INTO users (name) VALUES ('ada'), ('grace');",
        )
        .unwrap();
        let rc = unsafe {
            raw::sqlite3_exec(db, setup.as_ptr(), None, ptr::null_mut(), ptr::null_mut())
        };
        assert_eq!(rc, raw::SQLITE_OK);

        Self(db)
    }

    fn handle(&self) -> *mut sqlite3 {
        self.0 as *mut sqlite3
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        unsafe {
            raw::sqlite3_close(self.0);
        }
    }
}

fn audited(resolver: CallerIdentityResolver) -> (Interceptor<LinkedSqlite>, Arc<DuckDbSink>) {
    let sink = Arc::new(DuckDbSink::open(&StoreLocation::InMemory).unwrap());
    let api = Interceptor::new(
        LinkedSqlite,
        Some(sink.clone() as Arc<dyn AuditSink>),
        resolver,
    );
    (api, sink)
}

/// Runs `sql` to completion through `api`, returning the step count
unsafe fn run(api: &impl SqliteApi, db: &Database, sql: &str) -> usize {
    let text = CString::new(sql).unwrap();
    let mut stmt = ptr::null_mut();
    let rc = api.prepare_v2(db.handle(), text.as_ptr(), -1, &mut stmt, ptr::null_mut());
    assert_eq!(rc, SQLITE_OK);
    assert!(!stmt.is_null());

    let mut steps = 0;
    loop {
        steps += 1;
        match api.step(stmt) {
            SQLITE_ROW => continue,
            SQLITE_DONE => break,
            other => panic!("unexpected step result {other}"),
        }
    }

    assert_eq!(api.finalize(stmt), SQLITE_OK);
    steps
}

#[test]
fn test_select_produces_lifecycle_trail() {
    let (api, sink) = audited(CallerIdentityResolver::system());
    let db = Database::open();

    let steps = unsafe { run(&api, &db, "SELECT * FROM users") };
    assert_eq!(steps, 3);

    let rows = sink.history(&HistoryQuery::default()).unwrap();
    let trail: Vec<Stage> = rows.iter().map(|r| r.stage).collect();
    assert_eq!(
        trail,
        vec![
            Stage::Prepared,
            Stage::Executing,
            Stage::Executing,
            Stage::Completed,
            Stage::Finalized,
        ]
    );
    assert!(rows.iter().all(|r| r.query == "SELECT * FROM users"));
    assert!(rows.iter().all(|r| r.timestamp.is_some()));
}

#[test]
fn test_step_results_match_unaudited_library() {
    let (api, _sink) = audited(CallerIdentityResolver::system());
    let db = Database::open();

    let audited_steps = unsafe { run(&api, &db, "SELECT name FROM users ORDER BY id") };
    let direct_steps = unsafe { run(&LinkedSqlite, &db, "SELECT name FROM users ORDER BY id") };
    assert_eq!(audited_steps, direct_steps);
}

#[test]
fn test_rows_are_readable_through_interceptor() {
    let (api, _sink) = audited(CallerIdentityResolver::system());
    let db = Database::open();
    let text = CString::new("SELECT name FROM users ORDER BY id").unwrap();

    let names = unsafe {
        let mut stmt = ptr::null_mut();
        let rc = api.prepare_v2(db.handle(), text.as_ptr(), -1, &mut stmt, ptr::null_mut());
        assert_eq!(rc, SQLITE_OK);

        let mut names = Vec::new();
        while api.step(stmt) == SQLITE_ROW {
            let value = raw::sqlite3_column_text(stmt as *mut raw::sqlite3_stmt, 0);
            names.push(CStr::from_ptr(value as *const c_char).to_string_lossy().into_owned());
        }
        api.finalize(stmt);
        names
    };

    assert_eq!(names, vec!["ada".to_string(), "grace".to_string()]);
}

#[test]
fn test_failed_prepare_is_reported_unchanged() {
    let (api, sink) = audited(CallerIdentityResolver::system());
    let db = Database::open();
    let text = CString::new("SELEC oops").unwrap();

    let (rc, stmt) = unsafe {
        let mut stmt = ptr::null_mut();
        let rc = api.prepare_v2(db.handle(), text.as_ptr(), -1, &mut stmt, ptr::null_mut());
        (rc, stmt)
    };

    assert_ne!(rc, SQLITE_OK);
    assert!(stmt.is_null());

    let rows = sink.history(&HistoryQuery::default()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].stage, Stage::Prepared);
    assert_eq!(rows[0].query, "SELEC oops");
    assert_eq!(api.metrics().tracked_statements, 0);
}

#[test]
fn test_write_statement_completes_on_first_step() {
    let (api, sink) = audited(CallerIdentityResolver::system());
    let db = Database::open();

    let steps = unsafe { run(&api, &db, "INSERT INTO users (name) VALUES ('linus')") };
    assert_eq!(steps, 1);

    let stats = sink.stats().unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.count(Stage::Prepared), 1);
    assert_eq!(stats.count(Stage::Executing), 0);
    assert_eq!(stats.count(Stage::Completed), 1);
    assert_eq!(stats.count(Stage::Finalized), 1);
}

#[test]
fn test_handle_reused_by_unwrapped_prepare_logs_its_own_text() {
    let (api, sink) = audited(CallerIdentityResolver::system());
    let db = Database::open();
    let first = CString::new("SELECT 'secret_a'").unwrap();
    let second = CString::new("SELECT 'other_b'").unwrap();

    let (reused, tracked) = unsafe {
        let mut stmt = ptr::null_mut();
        let rc = api.prepare_v2(db.handle(), first.as_ptr(), -1, &mut stmt, ptr::null_mut());
        assert_eq!(rc, SQLITE_OK);
        let freed = stmt;

        // Disposed of inside the library, the way sqlite3_exec does it
        assert_eq!(raw::sqlite3_finalize(freed as *mut raw::sqlite3_stmt), raw::SQLITE_OK);

        let mut other: *mut raw::sqlite3_stmt = ptr::null_mut();
        let rc = raw::sqlite3_prepare_v3(
            db.0,
            second.as_ptr(),
            -1,
            0,
            &mut other,
            ptr::null_mut(),
        );
        assert_eq!(rc, raw::SQLITE_OK);
        let other = other as *mut sqlite3_stmt;

        assert_eq!(api.step(other), SQLITE_ROW);
        assert_eq!(api.step(other), SQLITE_DONE);
        let tracked = api.metrics().tracked_statements;
        assert_eq!(api.finalize(other), SQLITE_OK);
        (other == freed, tracked)
    };

    if reused {
        assert_eq!(tracked, 0);
    }

    let rows = sink.history(&HistoryQuery::default()).unwrap();
    let trail: Vec<(Stage, &str)> = rows.iter().map(|r| (r.stage, r.query.as_str())).collect();
    assert_eq!(
        trail,
        vec![
            (Stage::Prepared, "SELECT 'secret_a'"),
            (Stage::Executing, "SELECT 'other_b'"),
            (Stage::Completed, "SELECT 'other_b'"),
            (Stage::Finalized, "SELECT 'other_b'"),
        ]
    );
}

#[test]
fn test_empty_statement_is_recorded_as_prepared() {
    let (api, sink) = audited(CallerIdentityResolver::system());
    let db = Database::open();
    let empty = CString::new("").unwrap();

    let (rc, stmt) = unsafe {
        let mut stmt = ptr::null_mut();
        let rc = api.prepare_v2(db.handle(), empty.as_ptr(), -1, &mut stmt, ptr::null_mut());
        (rc, stmt)
    };

    assert_eq!(rc, SQLITE_OK);
    assert!(stmt.is_null());

    let rows = sink.history(&HistoryQuery::default()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].stage, Stage::Prepared);
    assert_eq!(rows[0].query, "");
}

#[test]
fn test_unresolvable_host_uses_loopback() {
    let (api, sink) = audited(CallerIdentityResolver::new(Arc::new(Unresolvable)));
    let db = Database::open();

    unsafe { run(&api, &db, "SELECT count(*) FROM users") };

    let rows = sink.history(&HistoryQuery::default()).unwrap();
    assert_eq!(rows.len(), 4);
    assert!(rows.iter().all(|r| r.hostname == "sandbox"));
    assert!(rows.iter().all(|r| r.address == "127.0.0.1"));
}

#[test]
fn test_parallel_connections_lose_no_records() {
    const THREADS: usize = 6;
    const QUERIES: usize = 5;

    let (api, sink) = audited(CallerIdentityResolver::system());
    let api = Arc::new(api);

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let api = Arc::clone(&api);
            std::thread::spawn(move || {
                let db = Database::open();
                for _ in 0..QUERIES {
                    // Two rows: prepared, 2x executing, completed, finalized
                    unsafe { run(&*api, &db, "SELECT * FROM users") };
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    let stats = sink.stats().unwrap();
    assert_eq!(stats.total, (THREADS * QUERIES * 5) as u64);
    assert_eq!(stats.count(Stage::Executing), (THREADS * QUERIES * 2) as u64);
    assert!(stats.threads >= THREADS as u64);
}
