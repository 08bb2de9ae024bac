//! Service configuration.
//!
//! Sources are merged in this order (later sources override earlier):
//! 1. Defaults from `ServiceConfig::default()`
//! 2. Environment variables prefixed `SSR_` (e.g. `SSR_PORT`, `SSR_CACHE_TTL_MS`)
//! 3. Command line overrides applied by the binary

use crate::cache::CacheConfig;
use crate::runtime::SandboxConfig;
use figment::providers::{Env, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "SSR_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub host: IpAddr,
    pub port: u16,
    /// Directory holding component definition files.
    pub components_dir: PathBuf,
    /// Fragment cache TTL; 0 disables caching.
    pub cache_ttl_ms: u64,
    /// Maximum number of cached fragments.
    pub cache_size: usize,
    /// Per-render time budget; 0 means unlimited.
    pub render_timeout_ms: u64,
    /// V8 heap limit per render context; 0 means unlimited.
    pub max_heap_bytes: usize,
    /// Default tracing filter, overridden by `RUST_LOG`.
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::from([127, 0, 0, 1]),
            port: 3001,
            components_dir: PathBuf::from("components"),
            cache_ttl_ms: 30_000,
            cache_size: 500,
            render_timeout_ms: 0,
            max_heap_bytes: 64 * 1024 * 1024,
            log_level: "info".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Defaults merged with `SSR_*` environment variables.
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(ServiceConfig::default())).merge(Env::prefixed(ENV_PREFIX))
    }

    pub fn load() -> Result<Self, figment::Error> {
        Self::from_figment(Self::figment())
    }

    pub fn from_figment(figment: Figment) -> Result<Self, figment::Error> {
        figment.extract()
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn cache(&self) -> CacheConfig {
        CacheConfig {
            ttl: Duration::from_millis(self.cache_ttl_ms),
            max_entries: self.cache_size,
        }
    }

    pub fn sandbox(&self) -> SandboxConfig {
        SandboxConfig {
            max_heap_size: (self.max_heap_bytes > 0).then_some(self.max_heap_bytes),
            timeout: (self.render_timeout_ms > 0).then(|| Duration::from_millis(self.render_timeout_ms)),
        }
    }
}
