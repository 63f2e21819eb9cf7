use clap::Parser;
use replicated_kv::{NodeExit, StorageNodeConfig};
use std::error::Error;
use std::net::{IpAddr, SocketAddr};

#[derive(Parser, Debug)]
#[command(author, version, about = "Replicated key-value store storage node", long_about = None)]
struct Cli {
    /// Local address to connect from.
    local_ip: IpAddr,
    /// The coordinator's node-facing address.
    coordinator_addr: SocketAddr,
    /// Identifier announced to the coordinator. Must be unique among live nodes.
    node_id: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let info_logger = replicated_kv::create_root_logger_for_stdout(cli.node_id.clone());

    let exit = replicated_kv::run_storage_node(StorageNodeConfig {
        local_ip: cli.local_ip,
        coordinator_addr: cli.coordinator_addr,
        node_id: cli.node_id,
        info_logger: info_logger.clone(),
        outbound_queue_capacity: None,
    })
    .await?;

    match exit {
        NodeExit::Killed => slog::info!(info_logger, "Exiting after kill command"),
    }

    Ok(())
}
