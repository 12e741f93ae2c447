// SPDX-License-Identifier: Apache-2.0

//! Caller Identity Resolver
//!
//! Best-effort (hostname, address) for the current process. Recomputed on
//! every audited call so a host rename shows up immediately.

use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};
use std::sync::Arc;

use tracing::debug;

use crate::error::{AuditError, AuditResult};
use crate::types::CallerIdentity;

/// Address recorded when the hostname does not resolve
pub const FALLBACK_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Hostname recorded when the system refuses to report one
pub const FALLBACK_HOSTNAME: &str = "unknown";

/// Source of host facts, swappable in tests
pub trait HostLookup: Send + Sync {
    fn hostname(&self) -> AuditResult<String>;
    fn address(&self, hostname: &str) -> AuditResult<IpAddr>;
}

/// Queries the operating system
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLookup;

impl HostLookup for SystemLookup {
    fn hostname(&self) -> AuditResult<String> {
        hostname::get()
            .map_err(|e| AuditError::identity(format!("gethostname failed: {e}")))?
            .into_string()
            .map_err(|raw| AuditError::identity(format!("hostname is not UTF-8: {raw:?}")))
    }

    fn address(&self, hostname: &str) -> AuditResult<IpAddr> {
        let addrs: Vec<IpAddr> = (hostname, 0)
            .to_socket_addrs()
            .map_err(|e| AuditError::identity(format!("cannot resolve {hostname}: {e}")))?
            .map(|addr| addr.ip())
            .collect();

        // Prefer IPv4 like gethostbyname would
        addrs
            .iter()
            .find(|ip| ip.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| AuditError::identity(format!("no address for {hostname}")))
    }
}

/// Derives the identity attached to each audit record
#[derive(Clone)]
pub struct CallerIdentityResolver {
    lookup: Arc<dyn HostLookup>,
}

impl CallerIdentityResolver {
    pub fn new(lookup: Arc<dyn HostLookup>) -> Self {
        Self { lookup }
    }

    pub fn system() -> Self {
        Self::new(Arc::new(SystemLookup))
    }

    /// Never fails. Without a usable hostname there is nothing to resolve,
    /// so both halves take their fallbacks.
    pub fn resolve(&self) -> CallerIdentity {
        let hostname = match self.lookup.hostname() {
            Ok(name) if !name.trim().is_empty() => name,
            Ok(_) => {
                debug!("System reported an empty hostname");
                return Self::fallback();
            }
            Err(e) => {
                debug!("Using fallback identity: {}", e);
                return Self::fallback();
            }
        };

        let address = match self.lookup.address(&hostname) {
            Ok(ip) => ip,
            Err(e) => {
                debug!("Using fallback address: {}", e);
                FALLBACK_ADDRESS
            }
        };

        CallerIdentity {
            hostname,
            address: address.to_string(),
        }
    }

    fn fallback() -> CallerIdentity {
        CallerIdentity {
            hostname: FALLBACK_HOSTNAME.to_string(),
            address: FALLBACK_ADDRESS.to_string(),
        }
    }
}

impl Default for CallerIdentityResolver {
    fn default() -> Self {
        Self::system()
    }
}

impl std::fmt::Debug for CallerIdentityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallerIdentityResolver").finish_non_exhaustive()
    }
}
