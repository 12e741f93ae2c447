// SPDX-License-Identifier: Apache-2.0

//! Exported SQLite entry points
//!
//! With the library preloaded, the dynamic linker binds the host's calls to
//! these symbols instead of the system SQLite's. Each one hands off to the
//! process context; when the real library could not be resolved the call is
//! refused with `SQLITE_ERROR` instead of jumping to an unresolved address.

use std::os::raw::{c_char, c_int};
use std::ptr;
use std::sync::Once;

use sqlaudit_core::ffi::{sqlite3, sqlite3_stmt, SQLITE_ERROR};
use sqlaudit_core::{Interceptor, OriginalTable, SqliteApi};
use tracing::error;

use crate::context::{context, AuditContext};

static REFUSAL_REPORTED: Once = Once::new();

fn forwarder(context: &AuditContext) -> Option<&Interceptor<OriginalTable>> {
    let api = context.api();
    if api.is_none() {
        REFUSAL_REPORTED.call_once(|| {
            if let Some(e) = context.resolution_error() {
                error!("Refusing SQLite calls: {}", e);
            }
        });
    }
    api
}

unsafe fn prepare_v2_in(
    context: &AuditContext,
    db: *mut sqlite3,
    z_sql: *const c_char,
    n_byte: c_int,
    pp_stmt: *mut *mut sqlite3_stmt,
    pz_tail: *mut *const c_char,
) -> c_int {
    match forwarder(context) {
        Some(api) => api.prepare_v2(db, z_sql, n_byte, pp_stmt, pz_tail),
        None => {
            if !pp_stmt.is_null() {
                *pp_stmt = ptr::null_mut();
            }
            SQLITE_ERROR
        }
    }
}

unsafe fn step_in(context: &AuditContext, p_stmt: *mut sqlite3_stmt) -> c_int {
    match forwarder(context) {
        Some(api) => api.step(p_stmt),
        None => SQLITE_ERROR,
    }
}

unsafe fn finalize_in(context: &AuditContext, p_stmt: *mut sqlite3_stmt) -> c_int {
    match forwarder(context) {
        Some(api) => api.finalize(p_stmt),
        None => SQLITE_ERROR,
    }
}

/// # Safety
///
/// Same contract as SQLite's `sqlite3_prepare_v2`.
#[no_mangle]
pub unsafe extern "C" fn sqlite3_prepare_v2(
    db: *mut sqlite3,
    z_sql: *const c_char,
    n_byte: c_int,
    pp_stmt: *mut *mut sqlite3_stmt,
    pz_tail: *mut *const c_char,
) -> c_int {
    prepare_v2_in(context(), db, z_sql, n_byte, pp_stmt, pz_tail)
}

/// # Safety
///
/// Same contract as SQLite's `sqlite3_step`.
#[no_mangle]
pub unsafe extern "C" fn sqlite3_step(p_stmt: *mut sqlite3_stmt) -> c_int {
    step_in(context(), p_stmt)
}

/// # Safety
///
/// Same contract as SQLite's `sqlite3_finalize`.
#[no_mangle]
pub unsafe extern "C" fn sqlite3_finalize(p_stmt: *mut sqlite3_stmt) -> c_int {
    finalize_in(context(), p_stmt)
}
