//! wardend - warden authentication daemon
//!
//! Startup sequence:
//!
//! 1. Parse flags, initialize tracing.
//! 2. Load configuration (defaults when no file is present).
//! 3. Register built-in backends and run deferred startup callbacks.
//! 4. Assemble storage, crypto, key provider, and token service from
//!    the configured selectors.
//! 5. Build the tree, exercise the bootstrap gate if requested, wire
//!    health pollers, and serve the socket until interrupted.
//!
//! A store that does not advertise `Mutable` forces read-only mode
//! regardless of configuration.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use warden_daemon::bootstrap::Bootstrapper;
use warden_daemon::protocol::dispatch::{Dispatcher, log_serving_mode};
use warden_daemon::protocol::server::{ProtocolServer, default_socket_path};
use warden_core::config::ServerConfig;
use warden_core::context::OpContext;
use warden_core::health::HealthRegistry;
use warden_core::kv::StoreCapability;
use warden_core::token::TokenConfig;
use warden_core::tree::Tree;
use warden_core::{crypto, keys, kv, startup, token};

/// warden authentication daemon.
#[derive(Parser, Debug)]
#[command(name = "wardend")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the server configuration file.
    #[arg(short, long, default_value = "warden.toml")]
    config: PathBuf,

    /// Socket path override.
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Force read-only mode regardless of configuration.
    #[arg(long)]
    readonly: bool,

    /// One-shot GLOBAL_ROOT grant, `entity:secret`. Consumed at
    /// startup and permanently disabled afterwards.
    #[arg(long, value_name = "ENTITY:SECRET")]
    bootstrap: Option<String>,

    /// Log filter (tracing EnvFilter syntax).
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = if args.config.exists() {
        ServerConfig::from_file(&args.config)
            .with_context(|| format!("loading {}", args.config.display()))?
    } else {
        info!(config = %args.config.display(), "no configuration file; using defaults");
        ServerConfig::default()
    };

    if config.plugin.enabled {
        // External hooks are provisioned by out-of-process tooling;
        // the daemon only records the intent.
        warn!(path = %config.plugin.path.display(), "plugin loading is not performed in-process");
    }

    warden_core::register_builtin_backends();
    startup::run(&config);

    let store = kv::from_config(&config).context("assembling storage backend")?;
    let hasher = crypto::from_config(&config).context("assembling crypto backend")?;
    let provider = keys::from_config(&config).context("assembling key provider")?;
    let tokens =
        token::from_config(&config, provider.as_ref()).context("assembling token service")?;

    let store_mutable = store.capabilities().contains(&StoreCapability::Mutable);
    let mut readonly = config.server.readonly || args.readonly;
    if !store_mutable && !readonly {
        warn!("store lacks the Mutable capability; forcing read-only mode");
        readonly = true;
    }

    let tree = Arc::new(Tree::new(store.clone(), hasher).context("building directory tree")?);

    let gate = Bootstrapper::new();
    if let Some(spec) = &args.bootstrap {
        if readonly {
            anyhow::bail!("cannot bootstrap a read-only server");
        }
        gate.bootstrap(&OpContext::background(), &tree, spec)
            .context("bootstrap failed")?;
    } else {
        gate.disable();
    }

    let health = Arc::new(HealthRegistry::new());
    {
        let store = store.clone();
        health.register_fn("kv", move || {
            store
                .keys(&OpContext::background(), "/entities/*")
                .is_ok()
        });
        let tokens_probe = tokens.clone();
        health.register_fn("token", move || {
            // A service with no verification key reports unhealthy; a
            // rejected probe token means the key is present and working.
            !matches!(
                tokens_probe.validate(&OpContext::background(), "probe"),
                Err(warden_core::Error::KeyUnavailable)
            )
        });
    }

    let dispatcher = Arc::new(Dispatcher::new(
        tree,
        tokens,
        TokenConfig::from_server_config(&config),
        health,
        readonly,
    ));
    log_serving_mode(&dispatcher);

    let socket_path = args.socket.unwrap_or_else(default_socket_path);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    runtime.block_on(async move {
        let server = ProtocolServer::bind(&socket_path, dispatcher)?;
        tokio::select! {
            result = server.run() => result.context("protocol server failed"),
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received; shutting down");
                Ok(())
            }
        }
    })?;

    store.close().map_err(|e| anyhow::anyhow!("closing store: {e}"))?;
    Ok(())
}
