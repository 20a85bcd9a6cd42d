//! jmap-server - serves the JMAP core and mail methods over HTTP from an
//! in-memory fixture store.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use jmap_server::{JmapService, NetworkConfig, NetworkModule, ServerConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "jmap-server", version, about = "JMAP server backed by an in-memory mail store")]
struct Cli {
    /// Address to bind.
    #[arg(long, env = "JMAP_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on (0 picks a free port).
    #[arg(long, env = "JMAP_PORT", default_value_t = 8080)]
    port: u16,

    /// Allowed CORS origins, comma separated; `*` allows any.
    #[arg(long, env = "JMAP_CORS_ORIGINS", value_delimiter = ',', default_value = "*")]
    cors_origins: Vec<String>,

    /// JSON fixture with `mailboxes` and `emails` to serve.
    #[arg(long, env = "JMAP_FIXTURE")]
    fixture: Option<PathBuf>,

    /// Maximum method calls in one request.
    #[arg(long, env = "JMAP_MAX_CALLS", default_value_t = 16)]
    max_calls: usize,

    /// Maximum request body size in bytes.
    #[arg(long, env = "JMAP_MAX_REQUEST_BYTES", default_value_t = 10_000_000)]
    max_request_bytes: usize,

    /// Request timeout in seconds.
    #[arg(long, env = "JMAP_REQUEST_TIMEOUT", default_value_t = 30)]
    request_timeout: u64,

    /// Username every request is attributed to.
    #[arg(long, env = "JMAP_USERNAME", default_value = "user@example.com")]
    username: String,

    /// Id of the served mail account.
    #[arg(long, env = "JMAP_ACCOUNT_ID", default_value = "a1")]
    account_id: String,

    /// Prefix for URLs in the session resource, e.g. `https://mail.example.com`.
    #[arg(long, env = "JMAP_PUBLIC_URL", default_value = "")]
    public_url: String,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

impl Cli {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            username: self.username.clone(),
            account_id: self.account_id.clone(),
            account_name: self.username.clone(),
            fixture: self.fixture.clone(),
            public_url: self.public_url.clone(),
            max_calls_in_request: self.max_calls,
            max_size_request: self.max_request_bytes,
            ..ServerConfig::default()
        }
    }

    fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            cors_origins: self.cors_origins.clone(),
            request_timeout: Duration::from_secs(self.request_timeout),
            max_body_bytes: self.max_request_bytes,
            ..NetworkConfig::default()
        }
    }
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    let service = Arc::new(JmapService::new(cli.server_config())?);
    let mut network = NetworkModule::new(cli.network_config(), service);
    let port = network.start().await?;
    info!(host = %cli.host, port, "jmap-server listening");

    network.serve(shutdown_signal()).await
}
