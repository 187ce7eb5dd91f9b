use anyhow::Context;
use clap::Parser;
use mimic_gateway::{Gateway, GatewayConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "mimic-gateway",
    about = "Mock-or-proxy gateway for chat-completion backends"
)]
struct Args {
    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Backend URL requests are proxied to; empty disables proxying
    #[arg(short, long, env = "MIMIC_BACKEND_URL")]
    backend_url: Option<String>,

    /// Content text of the mock stream
    #[arg(long)]
    mock_content: Option<String>,

    /// Reasoning text of the mock stream
    #[arg(long)]
    mock_thinking: Option<String>,

    /// Comma-separated function names eligible for mocking (e.g. chat,codebase)
    #[arg(long)]
    mock_functions: Option<String>,

    /// Emit bare text lines instead of data: events
    #[arg(long)]
    raw_mode: bool,

    /// Disable mocking entirely and proxy everything
    #[arg(long)]
    no_mock: bool,

    /// YAML config file; flags override file values
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => GatewayConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => GatewayConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(backend_url) = args.backend_url {
        config.backend_url = backend_url;
    }
    if let Some(mock_content) = args.mock_content {
        config.mock_content = mock_content;
    }
    if let Some(mock_thinking) = args.mock_thinking {
        config.mock_thinking = mock_thinking;
    }
    if let Some(mock_functions) = args.mock_functions {
        config.mock_functions = mock_functions;
    }
    if args.raw_mode {
        config.raw_mode = true;
    }
    if args.no_mock {
        config.mock_enabled = false;
    }

    let gateway = Gateway::new(config.clone());

    // Surface each handled request as a log line, newest first.
    let log = Arc::clone(gateway.log());
    gateway.log().set_observer(move || {
        if let Some(entry) = log.get(0) {
            info!(
                "[{}] {} {} {}",
                entry.timestamp, entry.summary, entry.request.method, entry.request.uri
            );
        }
    });

    gateway.start(config)?;
    tokio::signal::ctrl_c().await.ok();
    gateway.stop()?;

    Ok(())
}
