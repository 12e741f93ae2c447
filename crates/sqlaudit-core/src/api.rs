// SPDX-License-Identifier: Apache-2.0

//! SqliteApi trait definition
//!
//! The seam between the exported entry points and whatever actually runs the
//! statement. [`OriginalTable`](crate::symbols::OriginalTable) forwards to
//! the real library; [`Interceptor`](crate::interceptor::Interceptor) wraps
//! any implementation and adds the audit trail; tests plug in fakes.

use std::os::raw::{c_char, c_int};

use crate::ffi::{sqlite3, sqlite3_stmt};

/// The slice of the SQLite C API that gets intercepted
///
/// Every method has the exact contract of the C function it is named after,
/// including ownership of the handles and validity of the out-parameters.
pub trait SqliteApi: Send + Sync {
    /// `sqlite3_prepare_v2`
    ///
    /// # Safety
    ///
    /// Arguments must satisfy the C function's contract.
    unsafe fn prepare_v2(
        &self,
        db: *mut sqlite3,
        sql: *const c_char,
        n_byte: c_int,
        stmt: *mut *mut sqlite3_stmt,
        tail: *mut *const c_char,
    ) -> c_int;

    /// `sqlite3_step`
    ///
    /// # Safety
    ///
    /// `stmt` must be a live statement handle from this library.
    unsafe fn step(&self, stmt: *mut sqlite3_stmt) -> c_int;

    /// `sqlite3_finalize`
    ///
    /// # Safety
    ///
    /// `stmt` must be null or a live statement handle; it is invalid afterwards.
    unsafe fn finalize(&self, stmt: *mut sqlite3_stmt) -> c_int;

    /// `sqlite3_sql`: the statement's original text, owned by the statement
    ///
    /// # Safety
    ///
    /// `stmt` must be null or a live statement handle.
    unsafe fn sql(&self, stmt: *mut sqlite3_stmt) -> *const c_char;
}

impl<T: SqliteApi + ?Sized> SqliteApi for Box<T> {
    unsafe fn prepare_v2(
        &self,
        db: *mut sqlite3,
        sql: *const c_char,
        n_byte: c_int,
        stmt: *mut *mut sqlite3_stmt,
        tail: *mut *const c_char,
    ) -> c_int {
        (**self).prepare_v2(db, sql, n_byte, stmt, tail)
    }

    unsafe fn step(&self, stmt: *mut sqlite3_stmt) -> c_int {
        (**self).step(stmt)
    }

    unsafe fn finalize(&self, stmt: *mut sqlite3_stmt) -> c_int {
        (**self).finalize(stmt)
    }

    unsafe fn sql(&self, stmt: *mut sqlite3_stmt) -> *const c_char {
        (**self).sql(stmt)
    }
}
