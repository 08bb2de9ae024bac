//! Render contexts: one fresh V8 isolate per render request.
//!
//! Each context provides only what headless rendering needs:
//! - a minimal `document` with `createElement`, attributes and serialization
//! - `customElements` and the `HTMLElement` base class
//! - an `IntersectionObserver` that only fires when driven from Rust
//! - `console.log/info/debug/warn/error` (captured, not printed)
//! - the `__SSR__` flag so components can skip client-only work
//! - No fs, net, env, timers or fetch
//!
//! Every loaded definition is executed again in every context, so tag
//! definitions and component globals can never leak between requests.

use crate::error::RenderError;
use crate::loader::ComponentRegistry;
use crate::ops::{wc_sandbox, ConsoleOutput};
use crate::props::Properties;
use deno_core::{v8, JsRuntime, RuntimeOptions};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Attribute marking markup produced by the server.
pub const SERVER_RENDERED_ATTR: &str = "ssr";

/// Which side of the page a context stands in for. Components read it
/// from `window.__SSR__` when their definitions load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Environment {
    #[default]
    Server,
    /// Headless stand-in for a browser, used to drive hydration.
    Client,
}

impl Environment {
    fn flag_script(self) -> &'static str {
        match self {
            Self::Server => "globalThis.__SSR__ = true;",
            Self::Client => "globalThis.__SSR__ = false;",
        }
    }
}

/// Configuration for render sandboxes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxConfig {
    /// Maximum heap size in bytes (default: 64MB, None = unlimited)
    pub max_heap_size: Option<usize>,
    /// Maximum time for one render, definitions included (None = unlimited)
    pub timeout: Option<Duration>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_heap_size: Some(64 * 1024 * 1024),
            timeout: None,
        }
    }
}

/// Builds a fresh [`RenderContext`] for every render.
#[derive(Debug, Clone)]
pub struct ContextFactory {
    config: SandboxConfig,
    registry: Arc<ComponentRegistry>,
}

impl ContextFactory {
    pub fn new(config: SandboxConfig, registry: Arc<ComponentRegistry>) -> Self {
        Self { config, registry }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Create a new isolate, set the server flag and execute every
    /// component definition inside it.
    pub fn create(&self) -> Result<RenderContext, RenderError> {
        self.create_in(Environment::Server)
    }

    /// Like [`create`](Self::create), for the given environment.
    pub fn create_in(&self, environment: Environment) -> Result<RenderContext, RenderError> {
        let mut runtime = JsRuntime::new(RuntimeOptions {
            extensions: vec![wc_sandbox::init_ops_and_esm()],
            create_params: self
                .config
                .max_heap_size
                .map(|max_bytes| v8::Isolate::create_params().heap_limits(0, max_bytes)),
            ..Default::default()
        });

        if self.config.max_heap_size.is_some() {
            let handle = runtime.v8_isolate().thread_safe_handle();
            runtime.add_near_heap_limit_callback(move |current, initial| {
                tracing::warn!(
                    current_mb = current / (1024 * 1024),
                    initial_mb = initial / (1024 * 1024),
                    "render context near heap limit, terminating"
                );
                handle.terminate_execution();
                // Headroom so V8 can unwind instead of aborting the process.
                current * 2
            });
        }

        runtime.op_state().borrow_mut().put(ConsoleOutput::default());

        let watchdog = self
            .config
            .timeout
            .map(|timeout| Watchdog::arm(runtime.v8_isolate().thread_safe_handle(), timeout));

        let mut context = RenderContext { runtime, watchdog };

        context
            .runtime
            .execute_script("<sandbox>", environment.flag_script().to_string())
            .map_err(|e| context.failure(e))?;

        for definition in self.registry.definitions() {
            context
                .runtime
                .execute_script("<component>", definition.source().to_string())
                .map_err(|e| {
                    context.failure(format!("component '{}': {}", definition.file_name(), e))
                })?;
        }

        Ok(context)
    }
}

/// An isolated sandbox good for exactly one render.
pub struct RenderContext {
    runtime: JsRuntime,
    watchdog: Option<Watchdog>,
}

impl RenderContext {
    /// Instantiate `tag`, inject `attributes`, call its server render hook
    /// with `props`, mark it server-rendered and return its outer markup.
    ///
    /// Consumes the context: it is dropped as soon as the markup exists.
    pub fn render(
        mut self,
        tag: &str,
        attributes: &[(String, String)],
        props: &Properties,
    ) -> Result<String, RenderError> {
        // Props go through JSON.parse so keys like `__proto__` stay plain
        // own properties instead of object-literal prototype setters.
        let call = format!(
            "globalThis.__wc_render__({}, {}, JSON.parse({}), {})",
            js_string(tag)?,
            serde_json::to_string(attributes).map_err(RenderError::failure)?,
            js_string(&serde_json::to_string(props).map_err(RenderError::failure)?)?,
            js_string(SERVER_RENDERED_ATTR)?,
        );

        let result = self.runtime.execute_script("<render>", call);
        self.console().emit(tag);

        let html_global = result.map_err(|e| self.failure(e))?;
        self.finish_watchdog()?;

        let scope = &mut self.runtime.handle_scope();
        let local = v8::Local::new(scope, &html_global);
        if local.is_string() {
            Ok(local.to_rust_string_lossy(scope))
        } else {
            Err(RenderError::RenderFailure(
                "render entry point must return a string".into(),
            ))
        }
    }

    /// Evaluate a script in this context and return its string form.
    ///
    /// Used to inspect the sandbox surface and to drive mounted elements.
    pub fn eval_to_string(&mut self, code: &str) -> Result<String, RenderError> {
        let value = self
            .runtime
            .execute_script("<eval>", code.to_string())
            .map_err(|e| self.failure(e))?;
        let scope = &mut self.runtime.handle_scope();
        let local = v8::Local::new(scope, &value);
        Ok(local.to_rust_string_lossy(scope))
    }

    /// Console output captured so far.
    pub fn console(&mut self) -> ConsoleOutput {
        self.runtime
            .op_state()
            .borrow()
            .borrow::<ConsoleOutput>()
            .clone()
    }

    /// Map a script error, reporting a timeout instead if the watchdog
    /// terminated execution.
    fn failure(&mut self, err: impl std::fmt::Display) -> RenderError {
        match self.watchdog.take().and_then(Watchdog::finish) {
            Some(timeout) => watchdog_timeout(timeout),
            None => RenderError::failure(err),
        }
    }

    fn finish_watchdog(&mut self) -> Result<(), RenderError> {
        match self.watchdog.take().and_then(Watchdog::finish) {
            Some(timeout) => Err(watchdog_timeout(timeout)),
            None => Ok(()),
        }
    }
}

/// JS string literal for `text`.
pub(crate) fn js_string(text: &str) -> Result<String, RenderError> {
    serde_json::to_string(text).map_err(RenderError::failure)
}

fn watchdog_timeout(timeout: Duration) -> RenderError {
    RenderError::RenderFailure(format!("render timed out after {}ms", timeout.as_millis()))
}

/// Terminates an isolate if it is still running when the timeout elapses.
struct Watchdog {
    timeout: Duration,
    done: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<bool>>,
}

impl Watchdog {
    fn arm(handle: v8::IsolateHandle, timeout: Duration) -> Self {
        let (done, wait) = mpsc::channel::<()>();
        let thread = std::thread::spawn(move || match wait.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                handle.terminate_execution();
                true
            }
            _ => false,
        });
        Self {
            timeout,
            done: Some(done),
            thread: Some(thread),
        }
    }

    /// Disarm; returns the timeout if it had already fired.
    fn finish(mut self) -> Option<Duration> {
        self.stop().then_some(self.timeout)
    }

    fn stop(&mut self) -> bool {
        // Dropping the sender wakes the watcher with `Disconnected`.
        self.done.take();
        self.thread
            .take()
            .map(|thread| thread.join().unwrap_or(false))
            .unwrap_or(false)
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}
