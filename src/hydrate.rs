//! Headless hydration driver.
//!
//! The hydration controller that ships to browsers is the `SSRElement` base
//! class in the component definitions. This module runs that controller in
//! a client-environment sandbox (`__SSR__ = false`) against server markup,
//! so a deployment can check that its components adopt the server shadow
//! tree instead of rendering a fresh one, and bind interactivity once.
//!
//! ```text
//! server markup ─mount─► connectedCallback ─┬─ [ssr]        ─► adopt ─► bindEvents
//!                                           │   └─ [lazy]   ─► observe ─visible─► bindEvents
//!                                           └─ no [ssr]     ─► renderClient ─► bindEvents
//! ```

use crate::error::RenderError;
use crate::ops::ConsoleOutput;
use crate::pipeline::Renderer;
use crate::props::{to_attributes, Properties};
use crate::runtime::{js_string, ContextFactory, Environment, RenderContext};
use serde::Deserialize;
use std::collections::BTreeMap;

pub use crate::runtime::SERVER_RENDERED_ATTR;

/// Defer binding until the element is visible.
pub const LAZY_ATTR: &str = "lazy";

/// Per-element diagnostic logging.
pub const DEBUG_ATTR: &str = "data-debug";

/// Lifecycle methods that produce shadow content on the client. None of
/// them may run while a server-rendered element hydrates.
pub const FRESH_RENDER_METHODS: &[&str] = &["renderClient", "renderInner", "template", "render"];

/// How an element is mounted into the headless document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountOptions {
    pub lazy: bool,
    pub debug: bool,
    /// Attach the declarative shadow root before connecting, as a parser
    /// with declarative shadow DOM support does. Without it the component
    /// must adopt the `<template>` itself.
    pub upgrade_declarative: bool,
    pub environment: Environment,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            lazy: false,
            debug: false,
            upgrade_declarative: true,
            environment: Environment::Client,
        }
    }
}

impl MountOptions {
    fn extra_attributes(&self) -> impl Iterator<Item = (String, String)> {
        let lazy = self.lazy.then(|| (LAZY_ATTR.to_string(), String::new()));
        let debug = self.debug.then(|| (DEBUG_ATTR.to_string(), String::new()));
        lazy.into_iter().chain(debug)
    }
}

/// Snapshot of a mounted element.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HydrationReport {
    /// Call counts of the element's lifecycle methods it defines.
    pub calls: BTreeMap<String, u32>,
    /// Event listeners registered inside the shadow tree.
    pub listeners: u32,
    /// Intersection observers watching the element.
    pub observers: u32,
    pub connected: bool,
    pub shadow_html: Option<String>,
    pub light_html: String,
    pub has_server_render: bool,
}

impl HydrationReport {
    pub fn calls(&self, method: &str) -> u32 {
        self.calls.get(method).copied().unwrap_or(0)
    }

    /// Total calls into [`FRESH_RENDER_METHODS`].
    pub fn fresh_renders(&self) -> u32 {
        FRESH_RENDER_METHODS.iter().map(|m| self.calls(m)).sum()
    }

    pub fn binds(&self) -> u32 {
        self.calls("bindEvents")
    }
}

/// One element connected to the body of its own headless document.
pub struct MountedElement {
    context: RenderContext,
    tag: String,
}

impl MountedElement {
    /// Mount an element parsed from server markup (`<tag ... ssr>...</tag>`).
    pub fn server_rendered(
        factory: &ContextFactory,
        markup: &str,
        options: MountOptions,
    ) -> Result<(Self, HydrationReport), RenderError> {
        let (tag, mut attributes, inner) = split_outer(markup)?;
        attributes.extend(options.extra_attributes());
        Self::mount(factory, tag, &attributes, inner, options)
    }

    /// Mount a client-only element built from `props`, with no server markup.
    pub fn fresh(
        factory: &ContextFactory,
        tag: &str,
        props: &Properties,
        options: MountOptions,
    ) -> Result<(Self, HydrationReport), RenderError> {
        let mut attributes = to_attributes(props);
        attributes.extend(options.extra_attributes());
        Self::mount(factory, tag.to_string(), &attributes, "", options)
    }

    fn mount(
        factory: &ContextFactory,
        tag: String,
        attributes: &[(String, String)],
        light_html: &str,
        options: MountOptions,
    ) -> Result<(Self, HydrationReport), RenderError> {
        let mut element = Self {
            context: factory.create_in(options.environment)?,
            tag,
        };
        let call = format!(
            "mount({}, {}, {}, {})",
            js_string(&element.tag)?,
            serde_json::to_string(attributes).map_err(RenderError::failure)?,
            js_string(light_html)?,
            options.upgrade_declarative,
        );
        let report = element.drive(&call)?;
        Ok((element, report))
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn report(&mut self) -> Result<HydrationReport, RenderError> {
        self.drive("report()")
    }

    /// Deliver one intersection entry to every observer of the element.
    pub fn intersect(&mut self, visible: bool) -> Result<HydrationReport, RenderError> {
        self.drive(&format!("intersect({})", visible))
    }

    /// Set an attribute on the live element, or remove it with `None`.
    pub fn set_attribute(
        &mut self,
        name: &str,
        value: Option<&str>,
    ) -> Result<HydrationReport, RenderError> {
        let value = match value {
            Some(value) => js_string(value)?,
            None => "null".to_string(),
        };
        self.drive(&format!("setAttribute({}, {})", js_string(name)?, value))
    }

    /// Remove the element from the document.
    pub fn unmount(&mut self) -> Result<HydrationReport, RenderError> {
        self.drive("unmount()")
    }

    pub fn console(&mut self) -> ConsoleOutput {
        self.context.console()
    }

    fn drive(&mut self, call: &str) -> Result<HydrationReport, RenderError> {
        let json = self
            .context
            .eval_to_string(&format!("globalThis.__wc_hydration__.{}", call))?;
        serde_json::from_str(&json).map_err(RenderError::failure)
    }
}

/// Outcome of [`check_hydration`] for one component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HydrationCheck {
    pub tag: String,
    /// Eager mount of the server markup.
    pub eager: HydrationReport,
    /// Lazy mount of the same markup, before it becomes visible.
    pub lazy_before: HydrationReport,
    /// After one visible intersection.
    pub lazy_after: HydrationReport,
    /// After a second visible intersection.
    pub lazy_after_repeat: HydrationReport,
}

impl HydrationCheck {
    /// Components without a server render hook have nothing to hydrate and
    /// always pass.
    pub fn passed(&self) -> bool {
        if !self.eager.has_server_render {
            return true;
        }
        let reports = [&self.eager, &self.lazy_before, &self.lazy_after, &self.lazy_after_repeat];
        reports.iter().all(|r| r.fresh_renders() == 0 && r.binds() <= 1)
            && self.lazy_before.binds() == 0
            && self.lazy_after.binds() == self.eager.binds()
            && self.lazy_after_repeat.binds() == self.lazy_after.binds()
            && self.lazy_after.observers == 0
    }
}

/// Render `tag` on the server, then hydrate the markup eagerly and lazily
/// in client sandboxes.
pub fn check_hydration(
    renderer: &Renderer,
    tag: &str,
    props: &Properties,
) -> Result<HydrationCheck, RenderError> {
    let fragment = renderer.render(tag, props)?;
    let factory = renderer.factory();

    let (mut eager_element, eager) =
        MountedElement::server_rendered(factory, &fragment.html, MountOptions::default())?;
    eager_element.console().emit(tag);

    let lazy = MountOptions {
        lazy: true,
        ..Default::default()
    };
    let (mut lazy_element, lazy_before) =
        MountedElement::server_rendered(factory, &fragment.html, lazy)?;
    let lazy_after = lazy_element.intersect(true)?;
    let lazy_after_repeat = lazy_element.intersect(true)?;
    lazy_element.console().emit(tag);

    let check = HydrationCheck {
        tag: tag.to_string(),
        eager,
        lazy_before,
        lazy_after,
        lazy_after_repeat,
    };
    tracing::debug!(tag, passed = check.passed(), "hydration checked");
    Ok(check)
}

/// Split `<tag attrs>inner</tag>` as the render pipeline serializes it.
fn split_outer(markup: &str) -> Result<(String, Vec<(String, String)>, &str), RenderError> {
    let invalid = || RenderError::InvalidRequestShape("markup is not a single element".into());

    let rest = markup.trim().strip_prefix('<').ok_or_else(invalid)?;
    let name_end = rest
        .find(|c: char| c.is_ascii_whitespace() || c == '>')
        .ok_or_else(invalid)?;
    if name_end == 0 {
        return Err(invalid());
    }
    let tag = rest[..name_end].to_ascii_lowercase();

    let mut attributes = Vec::new();
    let mut cursor = &rest[name_end..];
    loop {
        cursor = cursor.trim_start();
        if let Some(after) = cursor.strip_prefix('>') {
            cursor = after;
            break;
        }
        let end = cursor
            .find(|c: char| c.is_ascii_whitespace() || c == '=' || c == '>')
            .ok_or_else(invalid)?;
        if end == 0 {
            return Err(invalid());
        }
        let name = cursor[..end].to_string();
        cursor = &cursor[end..];
        let value = match cursor.strip_prefix("=\"") {
            Some(after) => {
                let close = after.find('"').ok_or_else(invalid)?;
                cursor = &after[close + 1..];
                unescape_attribute(&after[..close])
            }
            None => String::new(),
        };
        attributes.push((name, value));
    }

    let inner = cursor
        .strip_suffix(format!("</{}>", tag).as_str())
        .ok_or_else(invalid)?;
    Ok((tag, attributes, inner))
}

fn unescape_attribute(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
