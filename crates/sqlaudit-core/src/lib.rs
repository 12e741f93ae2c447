// SPDX-License-Identifier: Apache-2.0

//! SQLite call auditing
//!
//! Building blocks for a preloadable shim that sits in front of the system
//! SQLite library:
//! - **Symbol table**: the real `sqlite3_*` entry points, resolved at runtime
//! - **Interceptor**: a decorator that forwards every call and records each
//!   statement's lifecycle
//! - **Sink**: the append-only DuckDB table those records land in
//!
//! The exported C symbols themselves live in the `sqlaudit_preload` library.

pub mod api;
pub mod config;
pub mod error;
pub mod ffi;
pub mod identity;
pub mod interceptor;
pub mod metrics;
pub mod sink;
pub mod symbols;
pub mod types;

pub use api::SqliteApi;
pub use config::{AuditConfig, StoreLocation};
pub use error::{AuditError, AuditResult};
pub use identity::{CallerIdentityResolver, HostLookup, SystemLookup};
pub use interceptor::Interceptor;
pub use metrics::MetricsSnapshot;
pub use sink::{AuditSink, DuckDbSink};
pub use symbols::OriginalTable;
pub use types::*;
