// SPDX-License-Identifier: Apache-2.0

//! sqlaudit preload library
//!
//! Build as a shared object and inject it with `LD_PRELOAD` (or
//! `DYLD_INSERT_LIBRARIES`). It exports `sqlite3_prepare_v2`,
//! `sqlite3_step` and `sqlite3_finalize`, forwards each call to the real
//! SQLite and appends the statement lifecycle to a DuckDB audit table.

pub mod context;
pub mod exports;
pub mod observability;

pub use context::{context, AuditContext};

/// Builds the process context as soon as the library is mapped, before the
/// host's `main` runs.
#[cfg(not(test))]
#[ctor::ctor]
fn on_load() {
    let context = context();
    match context.api() {
        Some(api) => tracing::info!(
            auditing = api.is_auditing(),
            store = %context.config().store_location,
            "sqlaudit loaded"
        ),
        None => tracing::warn!("sqlaudit loaded without a usable SQLite library"),
    }
}
