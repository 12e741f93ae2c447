// SPDX-License-Identifier: Apache-2.0

//! SQLite C ABI surface
//!
//! Only the handful of declarations the interceptor needs. Handles are
//! opaque: they are passed through, never dereferenced.

#![allow(non_camel_case_types)]

use std::borrow::Cow;
use std::ffi::CStr;
use std::os::raw::{c_char, c_int};

/// Opaque `sqlite3` database handle
#[repr(C)]
pub struct sqlite3 {
    _private: [u8; 0],
}

/// Opaque `sqlite3_stmt` prepared statement handle
#[repr(C)]
pub struct sqlite3_stmt {
    _private: [u8; 0],
}

pub const SQLITE_OK: c_int = 0;
pub const SQLITE_ERROR: c_int = 1;
pub const SQLITE_MISUSE: c_int = 21;
pub const SQLITE_ROW: c_int = 100;
pub const SQLITE_DONE: c_int = 101;

pub type PrepareV2Fn = unsafe extern "C" fn(
    db: *mut sqlite3,
    sql: *const c_char,
    n_byte: c_int,
    stmt: *mut *mut sqlite3_stmt,
    tail: *mut *const c_char,
) -> c_int;

pub type StepFn = unsafe extern "C" fn(stmt: *mut sqlite3_stmt) -> c_int;

pub type FinalizeFn = unsafe extern "C" fn(stmt: *mut sqlite3_stmt) -> c_int;

pub type SqlFn = unsafe extern "C" fn(stmt: *mut sqlite3_stmt) -> *const c_char;

/// Reads the SQL text handed to `sqlite3_prepare_v2`.
///
/// Follows SQLite's rule for `nByte`: negative means read up to the NUL
/// terminator, otherwise read at most `nByte` bytes, stopping early at a NUL.
///
/// # Safety
///
/// `sql` must be null or satisfy the same contract SQLite places on `zSql`.
pub unsafe fn input_sql<'a>(sql: *const c_char, n_byte: c_int) -> Option<Cow<'a, str>> {
    if sql.is_null() {
        return None;
    }

    let bytes: &'a [u8] = if n_byte < 0 {
        CStr::from_ptr(sql).to_bytes()
    } else {
        let limit = n_byte as usize;
        let base = sql as *const u8;
        let mut len = 0;
        while len < limit && *base.add(len) != 0 {
            len += 1;
        }
        std::slice::from_raw_parts(base, len)
    };

    Some(String::from_utf8_lossy(bytes))
}

/// Reads a statement's SQL as returned by `sqlite3_sql`.
///
/// # Safety
///
/// `sql` must be null or point to a NUL-terminated string that stays valid
/// for the duration of the call.
pub unsafe fn statement_sql(sql: *const c_char) -> Option<String> {
    if sql.is_null() {
        return None;
    }

    let text = CStr::from_ptr(sql).to_string_lossy();
    if text.is_empty() {
        None
    } else {
        Some(text.into_owned())
    }
}
