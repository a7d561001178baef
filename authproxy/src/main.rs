//! Process entry point: loads configuration, wires the event bus / worker pool /
//! control-plane server together, and blocks forever servicing WebSocket connections.

use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::prelude::*;

use slippi_authproxy_config::ProxyConfig;
use slippi_authproxy_eventbus::{CommandBus, EventBus};
use slippi_authproxy_gg_api::APIClient;
use slippi_authproxy_matchmaking::WorkerConfig;
use slippi_authproxy_pool::WorkerPool;
use slippi_authproxy_server::ControlPlaneServer;

const USER_AGENT: &str = "slippi-authproxy";

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    init_logging();

    let config_path = config_path_from_args();
    let config = ProxyConfig::load(&config_path)?;

    tracing::info!(
        listen_port = config.listen_port,
        mm_host = %config.mm_host,
        pool_size = config.roster.len(),
        "loaded configuration"
    );

    let worker_config = WorkerConfig::new(config.mm_host.clone(), config.mm_port, config.api_base_url.clone(), config.app_version.clone())
        .with_verify_tls(config.verify_tls);

    let api_client = APIClient::new(USER_AGENT, config.verify_tls);

    let events = EventBus::new();
    let commands = CommandBus::new();

    let pool = Arc::new(WorkerPool::new(config.roster, worker_config, api_client, events.clone()));
    pool.listen(&commands);

    let server = ControlPlaneServer::bind(config.listen_port, commands, &events)?;

    tracing::info!(pool_size = pool.size(), listen_port = config.listen_port, "authproxy ready");

    server.run();

    Ok(())
}

/// Installs the `tracing` subscriber, matching the upstream demo binary's setup: a
/// compact formatter plus an `EnvFilter` driven by `RUST_LOG` (defaulting to `info`
/// with the HTTP client's chattier logs quieted down).
fn init_logging() {
    if std::env::var_os("RUST_LOG").is_none() {
        // SAFETY: called once, at the very start of `main`, before any other thread
        // has been spawned.
        unsafe { std::env::set_var("RUST_LOG", "info,ureq=warn") };
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().compact())
        .init();
}

/// The config file path: the first CLI argument, or `authproxy.toml` in the current
/// directory if none was given.
fn config_path_from_args() -> PathBuf {
    std::env::args().nth(1).map(PathBuf::from).unwrap_or_else(|| PathBuf::from("authproxy.toml"))
}
