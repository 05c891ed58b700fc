use clap::Parser;
use one_broker::{BrokerConfig, BrokerServer};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Rendezvous broker: a WebSocket server that pairs dialers with registered
/// listeners by public key.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[arg(long, default_value = "localhost")]
    host: String,

    #[arg(long, default_value_t = 8000)]
    port: u16,

    #[arg(long = "ping-interval", default_value_t = 25000)]
    ping_interval_ms: u64,

    #[arg(long)]
    log: bool,

    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else if cli.log {
        EnvFilter::new("info")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = BrokerConfig {
        host: cli.host,
        port: cli.port,
        ping_interval: Duration::from_millis(cli.ping_interval_ms),
    };
    let server = BrokerServer::new(config);

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    match server.run(shutdown).await.map_err(anyhow::Error::from) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "broker exited with an error");
            std::process::ExitCode::FAILURE
        }
    }
}
