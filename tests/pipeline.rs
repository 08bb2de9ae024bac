//! End-to-end render pipeline tests against real V8 sandboxes.

use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use wc_ssr::{
    CacheConfig, ComponentDefinition, ConsoleLevel, ComponentRegistry, ContextFactory, FragmentCache,
    ManualClock, Properties, RenderError, Renderer, SandboxConfig,
};

const ECHO_WIDGET: &str = r#"
class EchoWidget extends HTMLElement {
  renderSSR(props) {
    const items = JSON.parse(this.getAttribute("data-prop-items") || "[]");
    return `<ul>${items.map((i) => `<li>${i}</li>`).join("")}</ul><b>${props.title}</b>`;
  }
}
customElements.define("echo-widget", EchoWidget);
"#;

const COUNTER_WIDGET: &str = r#"
class CounterWidget extends HTMLElement {
  renderSSR() {
    globalThis.__renders = (globalThis.__renders || 0) + 1;
    return `<span>${globalThis.__renders}</span>`;
  }
}
customElements.define("counter-widget", CounterWidget);
"#;

const PROTO_WIDGET: &str = r#"
class ProtoWidget extends HTMLElement {
  renderSSR(props) {
    const own = Object.prototype.hasOwnProperty.call(props, "__proto__");
    const polluted = "a" in {};
    return `<i>${own} ${props["__proto__"].a} ${polluted}</i>`;
  }
}
customElements.define("proto-widget", ProtoWidget);
"#;

const THROWING_WIDGET: &str = r#"
class ThrowingWidget extends HTMLElement {
  renderSSR() {
    throw new Error("kaboom");
  }
}
customElements.define("throwing-widget", ThrowingWidget);
"#;

const SPIN_WIDGET: &str = r#"
class SpinWidget extends HTMLElement {
  renderSSR() {
    for (;;) {}
  }
}
customElements.define("spin-widget", SpinWidget);
"#;

fn components_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("components")
}

fn props(value: Value) -> Properties {
    value.as_object().cloned().unwrap_or_default()
}

fn bundled_renderer(cache: CacheConfig) -> Renderer {
    let registry = ComponentRegistry::load(components_dir()).unwrap();
    Renderer::new(Arc::new(registry), SandboxConfig::default(), FragmentCache::new(cache)).unwrap()
}

fn fixture_registry(files: &[(&str, &str)]) -> Arc<ComponentRegistry> {
    let definitions = files
        .iter()
        .map(|(name, source)| ComponentDefinition::new(*name, *source))
        .collect();
    Arc::new(ComponentRegistry::from_definitions("fixtures", definitions))
}

fn fixture_renderer(files: &[(&str, &str)]) -> Renderer {
    Renderer::new(
        fixture_registry(files),
        SandboxConfig::default(),
        FragmentCache::new(CacheConfig {
            ttl: Duration::ZERO,
            max_entries: 16,
        }),
    )
    .unwrap()
}

#[test]
fn test_hello_widget_renders_declarative_shadow_dom() {
    let renderer = bundled_renderer(CacheConfig::default());
    let fragment = renderer
        .render("ssr-hello-widget", &props(json!({ "name": "Ada" })))
        .unwrap();

    assert!(!fragment.cache_hit);
    assert!(fragment.html.starts_with(r#"<ssr-hello-widget name="Ada" ssr><template shadowrootmode="open">"#));
    assert!(fragment.html.contains("Hello, Ada!"));
    assert!(fragment.html.ends_with("</template></ssr-hello-widget>"));
}

#[test]
fn test_hello_widget_defaults_and_escapes_name() {
    let renderer = bundled_renderer(CacheConfig::default());

    let html = renderer.render("ssr-hello-widget", &Properties::new()).unwrap().html;
    assert!(html.contains("Hello, World!"));

    let html = renderer
        .render("ssr-hello-widget", &props(json!({ "name": "<script>" })))
        .unwrap()
        .html;
    assert!(html.contains("Hello, &lt;script&gt;!"));
    assert!(!html.contains("<script>"));
}

#[test]
fn test_component_without_render_hook_renders_empty_marked_element() {
    let renderer = bundled_renderer(CacheConfig::default());
    let html = renderer
        .render("hello-widget", &props(json!({ "message": "Hi" })))
        .unwrap()
        .html;
    assert_eq!(html, r#"<hello-widget message="Hi" ssr></hello-widget>"#);
}

#[test]
fn test_second_render_is_cache_hit() {
    let renderer = bundled_renderer(CacheConfig::default());
    let p = props(json!({ "name": "Ada" }));

    let first = renderer.render("ssr-hello-widget", &p).unwrap();
    let second = renderer.render("ssr-hello-widget", &p).unwrap();

    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(first.html, second.html);

    let stats = renderer.cache_stats();
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.bytes, first.html.len());
}

#[test]
fn test_cache_entry_expires_after_ttl() {
    let clock = Arc::new(ManualClock::new());
    let registry = ComponentRegistry::load(components_dir()).unwrap();
    let cache = FragmentCache::with_clock(
        CacheConfig {
            ttl: Duration::from_millis(1_000),
            max_entries: 10,
        },
        clock.clone(),
    );
    let renderer = Renderer::new(Arc::new(registry), SandboxConfig::default(), cache).unwrap();
    let p = props(json!({ "name": "Ada" }));

    renderer.render("ssr-hello-widget", &p).unwrap();
    clock.advance(Duration::from_millis(1_000));
    assert!(renderer.render("ssr-hello-widget", &p).unwrap().cache_hit);

    clock.advance(Duration::from_millis(1_001));
    assert!(!renderer.render("ssr-hello-widget", &p).unwrap().cache_hit);
}

#[test]
fn test_unknown_tag_rejected_before_cache() {
    let renderer = bundled_renderer(CacheConfig::default());
    let before = renderer.cache_stats();

    let err = renderer
        .render("not-a-component", &Properties::new())
        .unwrap_err();

    assert_eq!(err, RenderError::TagNotAllowed("not-a-component".into()));
    assert_eq!(renderer.cache_stats(), before);
}

#[test]
fn test_object_builtin_keys_render_as_plain_attributes() {
    let renderer = fixture_renderer(&[("echo-widget.js", ECHO_WIDGET)]);
    let html = renderer
        .render(
            "echo-widget",
            &props(json!({ "constructor": "x", "__proto__": { "a": 1 }, "title": "t" })),
        )
        .unwrap()
        .html;

    assert!(html.contains(r#"constructor="x""#));
    assert!(html.contains(r#"data-prop-__proto__="{&quot;a&quot;:1}""#));
    assert!(html.contains("<b>t</b>"));
}

#[test]
fn test_proto_key_reaches_render_hook_as_own_property() {
    let renderer = fixture_renderer(&[("proto-widget.js", PROTO_WIDGET)]);
    let html = renderer
        .render("proto-widget", &props(json!({ "__proto__": { "a": 1 } })))
        .unwrap()
        .html;

    assert!(html.contains("<i>true 1 false</i>"));
}

#[test]
fn test_deeply_nested_props_render() {
    let mut value = json!({ "leaf": true });
    for _ in 0..40 {
        value = json!({ "nested": value });
    }
    let renderer = fixture_renderer(&[("echo-widget.js", ECHO_WIDGET)]);
    let html = renderer
        .render("echo-widget", &props(json!({ "deep": value, "title": "d" })))
        .unwrap()
        .html;

    assert!(html.contains("data-prop-deep="));
    assert!(html.contains("<b>d</b>"));
}

#[test]
fn test_structured_props_travel_as_json_attributes() {
    let renderer = fixture_renderer(&[("echo-widget.js", ECHO_WIDGET)]);
    let html = renderer
        .render(
            "echo-widget",
            &props(json!({ "items": [1, 2], "title": "list", "count": 3, "skip": null })),
        )
        .unwrap()
        .html;

    assert!(html.contains(r#"data-prop-items="[1,2]""#));
    assert!(html.contains(r#"count="3""#));
    assert!(html.contains(r#"title="list""#));
    assert!(!html.contains("skip"));
    assert!(html.contains("<ul><li>1</li><li>2</li></ul><b>list</b>"));
}

#[test]
fn test_renders_do_not_share_globals() {
    let renderer = fixture_renderer(&[("counter-widget.js", COUNTER_WIDGET)]);

    for _ in 0..3 {
        let html = renderer.render("counter-widget", &Properties::new()).unwrap().html;
        assert_eq!(html, "<counter-widget ssr><span>1</span></counter-widget>");
    }
}

#[test]
fn test_sandbox_surface_is_restricted() {
    let factory = ContextFactory::new(SandboxConfig::default(), fixture_registry(&[]));
    let mut context = factory.create().unwrap();

    for global in ["Deno", "fetch", "require", "process", "XMLHttpRequest", "__bootstrap"] {
        let kind = context.eval_to_string(&format!("typeof {}", global)).unwrap();
        assert_eq!(kind, "undefined", "{} should not be reachable", global);
    }
    assert_eq!(context.eval_to_string("String(globalThis.__SSR__)").unwrap(), "true");
    assert_eq!(context.eval_to_string("String(window === globalThis)").unwrap(), "true");
    assert_eq!(context.eval_to_string("typeof customElements.define").unwrap(), "function");
}

#[test]
fn test_console_output_is_captured() {
    let factory = ContextFactory::new(SandboxConfig::default(), fixture_registry(&[]));
    let mut context = factory.create().unwrap();

    context
        .eval_to_string(r#"console.log("hello", { a: 1 }); console.warn("careful"); console.error("bad")"#)
        .unwrap();

    let console = context.console();
    assert_eq!(console.at(ConsoleLevel::Log), vec![r#"hello {"a":1}"#]);
    assert_eq!(console.at(ConsoleLevel::Warn), vec!["careful"]);
    assert_eq!(console.at(ConsoleLevel::Error), vec!["bad"]);
    assert_eq!(console.lines().len(), 3);
}

#[test]
fn test_broken_definition_fails_at_startup() {
    let result = Renderer::new(
        fixture_registry(&[("broken-widget.js", "class {")]),
        SandboxConfig::default(),
        FragmentCache::new(CacheConfig::default()),
    );

    match result {
        Err(RenderError::RenderFailure(message)) => assert!(message.contains("broken-widget.js")),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("broken definition should not load"),
    }
}

#[test]
fn test_throwing_render_hook_is_render_failure() {
    let renderer = fixture_renderer(&[("throwing-widget.js", THROWING_WIDGET)]);
    let err = renderer.render("throwing-widget", &Properties::new()).unwrap_err();

    match err {
        RenderError::RenderFailure(message) => assert!(message.contains("kaboom")),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(renderer.cache_stats().entries, 0);
}

#[test]
fn test_runaway_render_times_out() {
    let renderer = Renderer::new(
        fixture_registry(&[("spin-widget.js", SPIN_WIDGET)]),
        SandboxConfig {
            timeout: Some(Duration::from_millis(200)),
            ..Default::default()
        },
        FragmentCache::new(CacheConfig::default()),
    )
    .unwrap();

    let err = renderer.render("spin-widget", &Properties::new()).unwrap_err();
    assert_eq!(
        err,
        RenderError::RenderFailure("render timed out after 200ms".into())
    );
}
