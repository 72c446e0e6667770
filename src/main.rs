#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::Result;
use clap::Parser;
use relay_client::admin::{run_admin_server, AdminState};
use relay_client::config::Config;
use relay_client::metrics::Metrics;
use relay_client::transport::Transports;
use relay_client::{runtime, worker};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn parse_duration(s: &str) -> Result<Duration, String> {
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Flags mirror every `Config` field so the binary is usable with zero
/// config file. Precedence: flags > `RELAY_CLIENT_*` env > config file >
/// built-in defaults.
#[derive(Parser)]
#[command(name = "relay-client", about = "Reverse HTTP relay client")]
struct Cli {
    /// Path to a TOML or JSON config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    server_name: Option<String>,

    #[arg(long)]
    relay_scheme: Option<String>,
    #[arg(long)]
    relay_address: Option<String>,
    #[arg(long)]
    relay_prefix: Option<String>,

    #[arg(long)]
    backend_scheme: Option<String>,
    #[arg(long)]
    backend_address: Option<String>,
    #[arg(long)]
    backend_path: Option<String>,
    /// Forward the pulled request's original Host header to the backend.
    #[arg(long)]
    preserve_host: bool,

    #[arg(long)]
    num_pending_requests: Option<usize>,
    #[arg(long)]
    max_idle_conns_per_host: Option<usize>,
    #[arg(long)]
    max_chunk_size: Option<usize>,
    #[arg(long)]
    block_size: Option<usize>,

    #[arg(long, value_parser = parse_duration)]
    remote_request_timeout: Option<Duration>,
    #[arg(long, value_parser = parse_duration)]
    backend_response_timeout: Option<Duration>,

    /// Use HTTP/1.1 only against the backend, never HTTP/2.
    #[arg(long)]
    disable_http2: bool,
    /// Force HTTP/2 against the backend (H2C prior-knowledge if `backend_scheme` is `http`).
    #[arg(long)]
    force_http2: bool,

    /// Skip wrapping the relay client with an identity-provider bearer token.
    #[arg(long)]
    disable_auth_for_remote: bool,
    #[arg(long)]
    root_ca_file: Option<PathBuf>,
    #[arg(long)]
    authentication_token_file: Option<PathBuf>,

    #[arg(long, default_value = "0.0.0.0:9091")]
    admin_listen: String,
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply_to(&self, config: &mut Config) {
        if let Some(ref v) = self.server_name {
            config.server_name = v.clone();
        }
        if let Some(ref v) = self.relay_scheme {
            config.relay_scheme = v.clone();
        }
        if let Some(ref v) = self.relay_address {
            config.relay_address = v.clone();
        }
        if let Some(ref v) = self.relay_prefix {
            config.relay_prefix = v.clone();
        }
        if let Some(ref v) = self.backend_scheme {
            config.backend_scheme = v.clone();
        }
        if let Some(ref v) = self.backend_address {
            config.backend_address = v.clone();
        }
        if let Some(ref v) = self.backend_path {
            config.backend_path = v.clone();
        }
        if self.preserve_host {
            config.preserve_host = true;
        }
        if let Some(v) = self.num_pending_requests {
            config.num_pending_requests = v;
        }
        if let Some(v) = self.max_idle_conns_per_host {
            config.max_idle_conns_per_host = v;
        }
        if let Some(v) = self.max_chunk_size {
            config.max_chunk_size = v;
        }
        if let Some(v) = self.block_size {
            config.block_size = v;
        }
        if let Some(v) = self.remote_request_timeout {
            config.remote_request_timeout = v;
        }
        if let Some(v) = self.backend_response_timeout {
            config.backend_response_timeout = v;
        }
        if self.disable_http2 {
            config.disable_http2 = true;
        }
        if self.force_http2 {
            config.force_http2 = true;
        }
        if self.disable_auth_for_remote {
            config.disable_auth_for_remote = true;
        }
        if let Some(ref v) = self.root_ca_file {
            config.root_ca_file = Some(v.clone());
        }
        if let Some(ref v) = self.authentication_token_file {
            config.authentication_token_file = Some(v.clone());
        }
        config.admin_listen = self.admin_listen.clone();
        if let Some(ref v) = self.log_level {
            config.log_level = v.clone();
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let worker_threads = runtime::get_container_cpu_limit();
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()?;

    rt.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply_to(&mut config);
    config.validate()?;

    init_tracing(&config.log_level);

    let config = Arc::new(config);
    let transports = Arc::new(Transports::build(&config).await?);

    let metrics = Metrics::install();
    let ready = Arc::new(AtomicBool::new(false));

    let admin_state = AdminState {
        metrics,
        ready: ready.clone(),
    };
    let admin_listen = config.admin_listen.clone();
    tokio::spawn(async move {
        if let Err(e) = run_admin_server(&admin_listen, admin_state).await {
            tracing::error!("admin: server failed, error={}", e);
        }
    });

    tracing::info!(
        "worker: starting pool, server_name={}, relay_address={}, backend_address={}, pollers={}",
        config.server_name,
        config.relay_address,
        config.backend_address,
        config.num_pending_requests
    );

    for _ in 0..config.num_pending_requests {
        let config = config.clone();
        let transports = transports.clone();
        tokio::spawn(async move {
            worker::run_worker_loop(config, transports).await;
        });
    }

    ready.store(true, Ordering::Relaxed);

    wait_for_shutdown().await;
    tracing::info!("relay-client: shutdown signal received, exiting");
    Ok(())
}

fn init_tracing(log_level: &str) {
    let (non_blocking, guard) = tracing_appender::non_blocking::NonBlockingBuilder::default()
        .buffered_lines_limit(128_000)
        .lossy(true)
        .finish(std::io::stdout());

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(log_level.to_string())),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .json(),
        )
        .init();

    std::mem::forget(guard);
}

async fn wait_for_shutdown() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("relay-client: received SIGINT"),
        _ = terminate => tracing::info!("relay-client: received SIGTERM"),
    }
}
