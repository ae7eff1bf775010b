use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use uppe_watch::{Config, MonitorServer, ServiceError};

#[derive(Parser, Debug)]
#[command(version, about = "Watch TCP reachability of hosts on behalf of connected clients")]
struct Args {
    /// Port to listen on, overrides the configured one
    port: Option<u16>,
    /// Config file (default: $XDG_CONFIG_HOME/uppe-watch/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Address to bind
    #[arg(long)]
    bind: Option<String>,
    /// Maximum number of concurrently connected clients
    #[arg(long)]
    max_clients: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logger::init_tracing();
    let args = Args::parse();

    let mut config = Config::from_config(args.config.as_ref())
        .map_err(ServiceError::from)
        .inspect_err(|e| error!(error = %e, "FATAL: cannot load configuration"))?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(max_clients) = args.max_clients {
        config.server.max_clients = max_clients;
    }
    info!("\n{config}");

    let server = MonitorServer::bind(&config).await.inspect_err(|e| {
        error!(error = %e, "FATAL: cannot start monitor");
    })?;

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c, running until killed");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!("monitor stopped");
    Ok(())
}
