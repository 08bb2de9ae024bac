//! # wc-ssr
//!
//! Server-side rendering of web components in per-request V8 sandboxes,
//! a TTL/LRU fragment cache in front of it, and a headless driver that runs
//! the components' client hydration lifecycle against server markup.
//!
//! ## Security Guarantees
//!
//! - **Allowlist**: only tags defined by files in the components directory render
//! - **No filesystem, network, environment or timers** inside a render context
//! - **Per-request isolation**: every render gets a fresh isolate, so globals
//!   set by one request are never visible to the next
//! - **Bounded**: heap limit per isolate, optional wall-clock timeout
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use wc_ssr::{CacheConfig, ComponentRegistry, FragmentCache, Renderer, SandboxConfig};
//!
//! let registry = Arc::new(ComponentRegistry::load("./components")?);
//! let renderer = Renderer::new(
//!     registry,
//!     SandboxConfig::default(),
//!     FragmentCache::new(CacheConfig::default()),
//! )?;
//!
//! let props = serde_json::json!({ "name": "Ada" });
//! let fragment = renderer.render("ssr-hello-widget", props.as_object().unwrap())?;
//! println!("{}", fragment.html);
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod hydrate;
pub mod loader;
pub mod logging;
mod ops;
pub mod pipeline;
pub mod props;
pub mod runtime;
pub mod service;

pub use cache::{CacheConfig, CacheKey, CacheStats, Clock, FragmentCache, ManualClock, SystemClock};
pub use config::ServiceConfig;
pub use error::RenderError;
pub use hydrate::{check_hydration, HydrationCheck, HydrationReport, MountOptions, MountedElement};
pub use loader::{ComponentDefinition, ComponentRegistry};
pub use ops::{ConsoleLevel, ConsoleOutput};
pub use pipeline::{RenderedFragment, Renderer};
pub use props::{Properties, RenderRequest};
pub use runtime::{ContextFactory, Environment, RenderContext, SandboxConfig, SERVER_RENDERED_ATTR};
