// SPDX-License-Identifier: Apache-2.0

//! Process-wide audit context
//!
//! Everything the exported entry points need, built exactly once. Nothing in
//! here is mutated after [`AuditContext::bootstrap`] returns except the sink's
//! connection, which the sink serializes itself.

use std::sync::{Arc, OnceLock};

use sqlaudit_core::{
    AuditConfig, AuditError, AuditSink, CallerIdentityResolver, DuckDbSink, Interceptor,
    MetricsSnapshot, OriginalTable,
};
use tracing::{error, info, warn};

use crate::observability;

static CONTEXT: OnceLock<AuditContext> = OnceLock::new();

/// The interceptor stack for this process, or the reason there is none
pub struct AuditContext {
    config: AuditConfig,
    forward: Result<Interceptor<OriginalTable>, AuditError>,
}

impl AuditContext {
    /// Opens the sink, then resolves the real library.
    ///
    /// A sink failure only disables auditing. A resolution failure leaves the
    /// context unable to forward; entry points then refuse every call.
    pub fn bootstrap(config: AuditConfig) -> Self {
        let sink = open_sink(&config);

        let forward = OriginalTable::resolve(&config.library)
            .map(|table| Interceptor::new(table, sink, CallerIdentityResolver::system()));

        if let Err(e) = &forward {
            error!(
                candidates = ?config.library,
                "Cannot resolve SQLite, intercepted calls will be refused: {}",
                e
            );
        }

        Self { config, forward }
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    /// The interceptor, if the real library was resolved
    pub fn api(&self) -> Option<&Interceptor<OriginalTable>> {
        self.forward.as_ref().ok()
    }

    pub fn resolution_error(&self) -> Option<&AuditError> {
        self.forward.as_ref().err()
    }

    pub fn metrics(&self) -> Option<MetricsSnapshot> {
        self.api().map(Interceptor::metrics)
    }
}

fn open_sink(config: &AuditConfig) -> Option<Arc<dyn AuditSink>> {
    if !config.enabled {
        info!("Auditing disabled by configuration");
        return None;
    }

    match DuckDbSink::open(&config.store_location) {
        Ok(sink) => {
            info!(store = %config.store_location, "Audit store ready");
            Some(Arc::new(sink))
        }
        Err(e) => {
            error!(
                store = %config.store_location,
                "Audit store unavailable, calls will be forwarded without auditing: {}",
                e
            );
            None
        }
    }
}

/// Returns the process context, building it on first use.
///
/// The load-time hook calls this before `main`, so entry points normally
/// find it ready.
pub fn context() -> &'static AuditContext {
    CONTEXT.get_or_init(|| {
        let loaded = AuditConfig::load();
        let config = match &loaded {
            Ok(config) => config.clone(),
            Err(_) => AuditConfig::default(),
        };

        observability::init_tracing(&config);
        if let Err(e) = loaded {
            warn!("Ignoring invalid configuration, using defaults: {}", e);
        }

        AuditContext::bootstrap(config)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlaudit_core::StoreLocation;
    use tempfile::tempdir;

    fn config(library: &str, store: StoreLocation) -> AuditConfig {
        AuditConfig {
            library: vec![library.to_string()],
            store_location: store,
            ..AuditConfig::default()
        }
    }

    #[test]
    fn test_unresolvable_library_refuses_forwarding() {
        let context = AuditContext::bootstrap(config(
            "libdefinitely-not-sqlite.so.9",
            StoreLocation::InMemory,
        ));

        assert!(context.api().is_none());
        assert!(context.metrics().is_none());
        assert!(context
            .resolution_error()
            .is_some_and(AuditError::is_resolution_error));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_library_without_sqlite_symbols_refuses_forwarding() {
        let context = AuditContext::bootstrap(config("libc.so.6", StoreLocation::InMemory));

        assert!(matches!(
            context.resolution_error(),
            Some(AuditError::SymbolMissing { .. })
        ));
    }

    #[test]
    fn test_store_is_created_before_resolution() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit").join("store.duckdb");

        let context = AuditContext::bootstrap(config(
            "libdefinitely-not-sqlite.so.9",
            StoreLocation::Path(path.clone()),
        ));

        assert!(context.api().is_none());
        assert!(path.exists());
    }

    #[test]
    fn test_disabled_config_skips_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("never.duckdb");
        let mut config = config("libdefinitely-not-sqlite.so.9", StoreLocation::Path(path.clone()));
        config.enabled = false;

        let context = AuditContext::bootstrap(config);

        assert!(!context.config().enabled);
        assert!(!path.exists());
    }
}
