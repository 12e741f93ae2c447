// SPDX-License-Identifier: Apache-2.0

//! Error types for the audit pipeline
//!
//! None of these ever cross the FFI boundary: the intercepted entry points
//! only ever return SQLite result codes. Errors are reported through
//! `tracing` and otherwise swallowed, except for symbol resolution failures
//! which disable forwarding altogether.

use thiserror::Error;

/// Unified error type for interception and audit operations
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Failed to load SQLite library {library}: {message}")]
    LibraryUnavailable { library: String, message: String },

    #[error("Symbol {symbol} not found in {library}: {message}")]
    SymbolMissing {
        library: String,
        symbol: String,
        message: String,
    },

    #[error("Audit store initialization failed: {message}")]
    SinkInit { message: String },

    #[error("Audit write failed: {message}")]
    Write { message: String },

    #[error("Audit read failed: {message}")]
    Read { message: String },

    #[error("Caller identity lookup failed: {message}")]
    Identity { message: String },

    #[error("Invalid configuration: {message}")]
    Config { message: String },
}

impl AuditError {
    pub fn library_unavailable(library: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::LibraryUnavailable {
            library: library.into(),
            message: msg.into(),
        }
    }

    pub fn symbol_missing(
        library: impl Into<String>,
        symbol: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::SymbolMissing {
            library: library.into(),
            symbol: symbol.into(),
            message: msg.into(),
        }
    }

    pub fn sink_init(msg: impl Into<String>) -> Self {
        Self::SinkInit { message: msg.into() }
    }

    pub fn write(msg: impl Into<String>) -> Self {
        Self::Write { message: msg.into() }
    }

    pub fn read(msg: impl Into<String>) -> Self {
        Self::Read { message: msg.into() }
    }

    pub fn identity(msg: impl Into<String>) -> Self {
        Self::Identity { message: msg.into() }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config { message: msg.into() }
    }

    /// Returns true for errors that make forwarding to SQLite unsafe
    pub fn is_resolution_error(&self) -> bool {
        matches!(
            self,
            Self::LibraryUnavailable { .. } | Self::SymbolMissing { .. }
        )
    }
}

/// Result type alias for audit operations
pub type AuditResult<T> = Result<T, AuditError>;
