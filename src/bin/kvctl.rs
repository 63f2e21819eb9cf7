use clap::{Parser, Subcommand};
use replicated_kv::KvRpcClient;
use std::error::Error;
use std::net::SocketAddr;

#[derive(Parser, Debug)]
#[command(author, version, about = "Talk to a replicated key-value store coordinator", long_about = None)]
struct Cli {
    /// The coordinator's client-facing address.
    coordinator_addr: SocketAddr,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read a key. Keys like "CMD get-replicas-of <key>" run admin commands.
    Get { key: String },
    /// Overwrite a key.
    Put { key: String, value: String },
    /// Set a key to NEW_VALUE only if it currently holds TEST_VALUE.
    TestSet {
        key: String,
        test_value: String,
        new_value: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let mut client = KvRpcClient::connect(cli.coordinator_addr).await?;

    let value = match cli.command {
        Command::Get { key } => client.get(key).await?,
        Command::Put { key, value } => client.put(key, value).await?,
        Command::TestSet {
            key,
            test_value,
            new_value,
        } => client.test_set(key, test_value, new_value).await?,
    };
    println!("{}", value);

    Ok(())
}
