use clap::Parser;
use replicated_kv::{CoordinatorConfig, CoordinatorOptions};
use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Replicated key-value store coordinator", long_about = None)]
struct Cli {
    /// Address the client-facing gRPC service binds to.
    client_addr: SocketAddr,
    /// Address storage nodes connect to.
    node_addr: SocketAddr,
    /// Number of nodes each key is replicated on.
    replication_factor: usize,
    /// Write logs under this directory instead of the terminal.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let info_logger = match cli.log_dir {
        Some(dir) => replicated_kv::create_root_logger_for_file(&dir, "coordinator".to_string())?,
        None => replicated_kv::create_root_logger_for_stdout("coordinator".to_string()),
    };

    let _coordinator = replicated_kv::start_coordinator(CoordinatorConfig {
        client_listen_addr: cli.client_addr,
        node_listen_addr: cli.node_addr,
        replication_factor: cli.replication_factor,
        info_logger: info_logger.clone(),
        options: CoordinatorOptions::default(),
    })
    .await?;

    tokio::signal::ctrl_c().await?;
    slog::info!(info_logger, "Interrupted. Shutting down.");

    Ok(())
}
