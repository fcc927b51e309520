use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use branchkv::actions::HttpActionInvoker;
use branchkv::indexing::IndexingService;
use branchkv::server::client::GrpcDialer;
use branchkv::server::grpc;
use branchkv::storage::Store;
use branchkv::{Config, Server};

#[derive(Parser, Debug)]
#[command(name = "branchkv-server")]
#[command(about = "branchkv - distributed versioned key-value store server")]
#[command(version)]
struct Args {
    /// Path to the cluster configuration file
    #[arg(short, long, default_value = "./server.json")]
    config: String,

    /// Action runtime endpoint hosting merge functions
    #[arg(long, default_value = "http://127.0.0.1:3233/actions")]
    action_endpoint: String,

    /// Action invocation timeout in seconds
    #[arg(long, default_value = "30")]
    action_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_file(&args.config)?;
    config.validate()?;

    tracing::info!("branchkv {}", branchkv::VERSION);
    tracing::info!("Self: {}", config.self_addr);
    tracing::info!("Servers: {:?}", config.servers);
    tracing::info!("Initial range owner: {}", config.initial);
    tracing::info!("Split threshold: {}", config.threshold);
    tracing::info!("Action runtime: {}", args.action_endpoint);

    let bind: std::net::SocketAddr = config.self_addr.parse()?;

    let invoker = HttpActionInvoker::new(
        args.action_endpoint,
        Duration::from_secs(args.action_timeout),
    )?;

    let server = Server::new(
        config,
        Arc::new(Store::new()),
        Arc::new(IndexingService::new()),
        Arc::new(GrpcDialer),
        Arc::new(invoker),
    );

    grpc::serve(server, bind).await?;

    Ok(())
}
