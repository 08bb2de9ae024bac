//! wc-ssr CLI
//!
//! Server mode (default):
//!   wc-ssr serve [--components <dir>] [--host <ip>] [--port <port>]
//!
//! Single-shot mode:
//!   wc-ssr render <tag> [props-json]
//!
//! Hydration check (every allowlisted tag unless one is given):
//!   wc-ssr verify [tag] [props-json]
//!
//! Every setting can also come from `SSR_*` environment variables, e.g.
//! `SSR_PORT=3001 SSR_CACHE_TTL_MS=0 wc-ssr serve`. Flags win over the
//! environment.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use figment::Figment;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use wc_ssr::logging::init_logging;
use wc_ssr::{
    check_hydration, CacheConfig, ComponentRegistry, FragmentCache, Properties, Renderer,
    ServiceConfig,
};

#[derive(Parser)]
#[command(name = "wc-ssr")]
#[command(about = "Server-side rendering for web components", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Directory holding component definition files
    #[arg(long, global = true, value_name = "DIR")]
    components: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP render service
    Serve {
        #[arg(long)]
        host: Option<IpAddr>,

        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Render one component and print its markup to stdout
    Render {
        /// Custom element tag
        tag: String,

        /// Properties as a JSON object
        #[arg(value_name = "PROPS_JSON")]
        props: Option<String>,
    },

    /// Check that server markup hydrates without a client re-render
    Verify {
        /// Custom element tag (default: every allowlisted tag)
        tag: Option<String>,

        /// Properties as a JSON object
        #[arg(value_name = "PROPS_JSON")]
        props: Option<String>,
    },
}

fn load_config(cli: &Cli) -> Result<ServiceConfig> {
    let mut figment: Figment = ServiceConfig::figment();
    if let Some(dir) = &cli.components {
        figment = figment.merge(("components_dir", dir));
    }
    if let Some(Command::Serve { host, port }) = &cli.command {
        if let Some(host) = host {
            figment = figment.merge(("host", host));
        }
        if let Some(port) = port {
            figment = figment.merge(("port", port));
        }
    }
    ServiceConfig::from_figment(figment).context("Invalid configuration")
}

fn build_renderer(config: &ServiceConfig, cache: FragmentCache) -> Result<Renderer> {
    let registry = ComponentRegistry::load(&config.components_dir)?;
    Renderer::new(Arc::new(registry), config.sandbox(), cache)
        .map_err(|e| anyhow!("Failed to load components: {}", e))
}

async fn run_server(config: ServiceConfig) -> Result<()> {
    let renderer = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || {
            build_renderer(&config, FragmentCache::new(config.cache()))
        })
        .await??
    };

    let addr = config.socket_addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!(
        %addr,
        components = renderer.registry().len(),
        cache_ttl_ms = config.cache_ttl_ms,
        "SSR service listening"
    );

    axum::serve(listener, wc_ssr::service::router(Arc::new(renderer)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("SSR service shutting down");
    Ok(())
}

fn parse_props(props_json: Option<&str>) -> Result<Properties> {
    match props_json {
        Some(json) => serde_json::from_str(json).map_err(|e| anyhow!("Invalid props JSON: {}", e)),
        None => Ok(Properties::new()),
    }
}

fn uncached() -> FragmentCache {
    FragmentCache::new(CacheConfig {
        ttl: Duration::ZERO,
        ..Default::default()
    })
}

/// Render once without caching (original single-shot behavior)
fn run_single_shot(config: &ServiceConfig, tag: &str, props_json: Option<&str>) -> Result<()> {
    let props = parse_props(props_json)?;
    let renderer = build_renderer(config, uncached())?;
    let fragment = renderer.render(tag, &props)?;

    println!("{}", fragment.html);
    Ok(())
}

fn run_verify(config: &ServiceConfig, tag: Option<&str>, props_json: Option<&str>) -> Result<()> {
    let props = parse_props(props_json)?;
    let renderer = build_renderer(config, uncached())?;
    let tags: Vec<String> = match tag {
        Some(tag) => vec![tag.to_string()],
        None => renderer.registry().allowed_tags().iter().cloned().collect(),
    };

    let mut failed = Vec::new();
    for tag in &tags {
        let check = check_hydration(&renderer, tag, &props)?;
        if check.passed() {
            println!("ok    {}", tag);
        } else {
            println!(
                "FAIL  {} (fresh renders {}, binds {}/{})",
                tag,
                check.eager.fresh_renders(),
                check.eager.binds(),
                check.lazy_after_repeat.binds()
            );
            failed.push(tag.as_str());
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("Hydration check failed for: {}", failed.join(", ")))
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_logging(&config.log_level)?;

    match cli.command {
        Some(Command::Render { tag, props }) => {
            tokio::task::spawn_blocking(move || run_single_shot(&config, &tag, props.as_deref()))
                .await?
        }
        Some(Command::Verify { tag, props }) => {
            tokio::task::spawn_blocking(move || {
                run_verify(&config, tag.as_deref(), props.as_deref())
            })
            .await?
        }
        Some(Command::Serve { .. }) | None => run_server(config).await,
    }
}
