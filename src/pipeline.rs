//! Render pipeline: allowlist, cache, sandbox, serialization.

use crate::cache::{CacheKey, CacheStats, FragmentCache};
use crate::error::RenderError;
use crate::loader::ComponentRegistry;
use crate::props::{to_attributes, Properties};
use crate::runtime::{ContextFactory, SandboxConfig};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Markup for one render request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedFragment {
    pub html: String,
    pub cache_hit: bool,
    pub elapsed_ms: f64,
}

/// Renders allowlisted components in fresh sandboxes and caches the markup.
///
/// `Renderer` is `Send + Sync`: share it behind an `Arc`. Every call to
/// [`render`](Self::render) builds and drops its own isolate on the
/// calling thread, so run it on a blocking-capable thread from async code.
pub struct Renderer {
    registry: Arc<ComponentRegistry>,
    factory: ContextFactory,
    cache: FragmentCache,
}

impl Renderer {
    /// Build a renderer and execute every definition once in a throwaway
    /// sandbox, so broken component sources fail at startup rather than
    /// per request.
    pub fn new(
        registry: Arc<ComponentRegistry>,
        sandbox: SandboxConfig,
        cache: FragmentCache,
    ) -> Result<Self, RenderError> {
        let factory = ContextFactory::new(sandbox, registry.clone());
        let mut startup = factory.create()?;
        startup.console().emit("<startup>");
        drop(startup);

        tracing::info!(
            components = registry.len(),
            allowed = ?registry.allowed_tags(),
            "component definitions loaded"
        );

        Ok(Self {
            registry,
            factory,
            cache,
        })
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Sandbox factory renders run in; also used to drive hydration.
    pub fn factory(&self) -> &ContextFactory {
        &self.factory
    }

    pub fn cache(&self) -> &FragmentCache {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Render `tag` with `props`.
    ///
    /// Fails with [`RenderError::TagNotAllowed`] before the cache is
    /// consulted when the tag is not allowlisted.
    pub fn render(&self, tag: &str, props: &Properties) -> Result<RenderedFragment, RenderError> {
        let start = Instant::now();

        if !self.registry.is_allowed(tag) {
            return Err(RenderError::TagNotAllowed(tag.to_string()));
        }

        let key = CacheKey::new(tag, props);
        if let Some(html) = self.cache.get(&key) {
            tracing::debug!(tag, "cache hit");
            return Ok(RenderedFragment {
                html,
                cache_hit: true,
                elapsed_ms: elapsed_ms(start),
            });
        }

        let attributes = to_attributes(props);
        let html = self.factory.create()?.render(tag, &attributes, props)?;
        self.cache.put(key, html.clone());

        let elapsed_ms = elapsed_ms(start);
        tracing::debug!(tag, elapsed_ms, bytes = html.len(), "rendered");

        Ok(RenderedFragment {
            html,
            cache_hit: false,
            elapsed_ms,
        })
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    (start.elapsed().as_secs_f64() * 10_000.0).round() / 10.0
}
