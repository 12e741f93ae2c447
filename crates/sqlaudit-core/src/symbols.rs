// SPDX-License-Identifier: Apache-2.0

//! Original-Implementation Table
//!
//! Resolves the real SQLite entry points with `dlopen`/`dlsym`. A handle
//! obtained from `dlopen` only searches the named library and its
//! dependencies, so the lookups land on the real functions even while this
//! crate's own exports shadow them through `LD_PRELOAD`.
//!
//! The table is all-or-nothing: a library that is missing any of the
//! required symbols is closed again and the next candidate is tried.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_void};

use tracing::{debug, info, warn};

use crate::api::SqliteApi;
use crate::error::{AuditError, AuditResult};
use crate::ffi::{sqlite3, sqlite3_stmt, FinalizeFn, PrepareV2Fn, SqlFn, StepFn};

pub const PREPARE_V2: &str = "sqlite3_prepare_v2";
pub const STEP: &str = "sqlite3_step";
pub const FINALIZE: &str = "sqlite3_finalize";
pub const SQL: &str = "sqlite3_sql";

/// Resolved addresses of the real SQLite functions
///
/// Immutable once built. The library handle is never closed, so the
/// pointers stay valid for the life of the process.
#[derive(Debug, Clone, Copy)]
pub struct OriginalTable {
    prepare_v2: PrepareV2Fn,
    step: StepFn,
    finalize: FinalizeFn,
    sql: SqlFn,
}

impl OriginalTable {
    /// Opens the first candidate library that exports every required symbol
    pub fn resolve(candidates: &[String]) -> AuditResult<Self> {
        let mut last_error = None;

        for library in candidates {
            match Self::resolve_library(library) {
                Ok(table) => {
                    info!(library = %library, "Resolved original SQLite entry points");
                    return Ok(table);
                }
                Err(e) => {
                    debug!(library = %library, error = %e, "SQLite candidate rejected");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            AuditError::library_unavailable("<none>", "no candidate libraries configured")
        }))
    }

    fn resolve_library(library: &str) -> AuditResult<Self> {
        let handle = open_library(library)?;

        // SAFETY: handle is a live dlopen handle.
        let table = unsafe { Self::bind(handle, library) };

        if table.is_err() {
            // SAFETY: nothing resolved from this handle escapes on failure.
            if unsafe { libc::dlclose(handle) } != 0 {
                warn!(library = %library, "dlclose failed: {}", last_dl_error());
            }
        }

        table
    }

    /// Casts each symbol to the signature SQLite documents for it.
    unsafe fn bind(handle: *mut c_void, library: &str) -> AuditResult<Self> {
        Ok(Self {
            prepare_v2: std::mem::transmute::<*mut c_void, PrepareV2Fn>(lookup(
                handle, library, PREPARE_V2,
            )?),
            step: std::mem::transmute::<*mut c_void, StepFn>(lookup(handle, library, STEP)?),
            finalize: std::mem::transmute::<*mut c_void, FinalizeFn>(lookup(
                handle, library, FINALIZE,
            )?),
            sql: std::mem::transmute::<*mut c_void, SqlFn>(lookup(handle, library, SQL)?),
        })
    }
}

impl SqliteApi for OriginalTable {
    unsafe fn prepare_v2(
        &self,
        db: *mut sqlite3,
        sql: *const c_char,
        n_byte: c_int,
        stmt: *mut *mut sqlite3_stmt,
        tail: *mut *const c_char,
    ) -> c_int {
        (self.prepare_v2)(db, sql, n_byte, stmt, tail)
    }

    unsafe fn step(&self, stmt: *mut sqlite3_stmt) -> c_int {
        (self.step)(stmt)
    }

    unsafe fn finalize(&self, stmt: *mut sqlite3_stmt) -> c_int {
        (self.finalize)(stmt)
    }

    unsafe fn sql(&self, stmt: *mut sqlite3_stmt) -> *const c_char {
        (self.sql)(stmt)
    }
}

fn open_library(library: &str) -> AuditResult<*mut c_void> {
    let name = CString::new(library)
        .map_err(|_| AuditError::library_unavailable(library, "name contains a NUL byte"))?;

    // SAFETY: name is a valid NUL-terminated string.
    let handle = unsafe { libc::dlopen(name.as_ptr(), libc::RTLD_LAZY) };
    if handle.is_null() {
        return Err(AuditError::library_unavailable(library, last_dl_error()));
    }

    Ok(handle)
}

unsafe fn lookup(handle: *mut c_void, library: &str, symbol: &str) -> AuditResult<*mut c_void> {
    let name = CString::new(symbol)
        .map_err(|_| AuditError::symbol_missing(library, symbol, "name contains a NUL byte"))?;

    // Clear any stale error so a null result can be attributed correctly
    libc::dlerror();
    let addr = libc::dlsym(handle, name.as_ptr());
    if addr.is_null() {
        return Err(AuditError::symbol_missing(library, symbol, last_dl_error()));
    }

    Ok(addr)
}

fn last_dl_error() -> String {
    // SAFETY: dlerror returns null or a NUL-terminated thread-local string.
    let message = unsafe { libc::dlerror() };
    if message.is_null() {
        "unknown dynamic loader error".to_string()
    } else {
        unsafe { CStr::from_ptr(message) }
            .to_string_lossy()
            .into_owned()
    }
}
