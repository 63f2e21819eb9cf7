use crate::api::front_end::KvFrontEnd;
use crate::api::options::CoordinatorOptionsValidated;
use crate::coordinator::{self, ConnectionSettings, NodeListener, SharedMetadata};
use crate::server::{self, RpcServer, ShutdownHandle};
use crate::CoordinatorOptions;
use std::convert::TryFrom;
use std::io;
use std::net::SocketAddr;
use tokio::net::TcpListener;

pub struct CoordinatorConfig {
    /// Where the gRPC client surface listens.
    pub client_listen_addr: SocketAddr,
    /// Where storage nodes connect. Port 0 picks a free port, see `Coordinator::node_listen_addr()`.
    pub node_listen_addr: SocketAddr,
    pub replication_factor: usize,
    pub info_logger: slog::Logger,
    pub options: CoordinatorOptions,
}

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorCreationError {
    #[error("Illegal options for configuring coordinator: {0}")]
    IllegalOptions(String),
    #[error("Failed to bind node listener")]
    NodeListenerBind(io::Error),
}

/// Coordinator is a running coordinator. Dropping it stops both listeners.
pub struct Coordinator {
    pub front_end: KvFrontEnd,
    node_listen_addr: SocketAddr,
    metadata: SharedMetadata,
    _shutdown_handle: ShutdownHandle,
}

impl Coordinator {
    /// The address storage nodes should connect to.
    pub fn node_listen_addr(&self) -> SocketAddr {
        self.node_listen_addr
    }

    /// Sorted ids of the nodes currently registered, killed ones included until they disconnect.
    pub fn connected_node_ids(&self) -> Vec<String> {
        self.metadata
            .read()
            .node_ids()
            .into_iter()
            .map(|id| id.into_inner())
            .collect()
    }
}

pub async fn start_coordinator(config: CoordinatorConfig) -> Result<Coordinator, CoordinatorCreationError> {
    let root_logger = config.info_logger;

    if config.replication_factor == 0 {
        return Err(CoordinatorCreationError::IllegalOptions(
            "Replication factor must be at least 1".to_string(),
        ));
    }
    let options = CoordinatorOptionsValidated::try_from(config.options)
        .map_err(|e| CoordinatorCreationError::IllegalOptions(e.to_string()))?;

    let listener = TcpListener::bind(config.node_listen_addr)
        .await
        .map_err(CoordinatorCreationError::NodeListenerBind)?;
    let node_listen_addr = listener.local_addr().map_err(CoordinatorCreationError::NodeListenerBind)?;

    let metadata = SharedMetadata::new();
    let (shutdown_handle, shutdown_signal) = server::shutdown_signal();

    let (dispatcher_client, dispatcher) = coordinator::create_dispatcher(
        root_logger.new(slog::o!("Component" => "Dispatcher")),
        metadata.clone(),
        config.replication_factor,
        options.request_queue_capacity,
    );
    tokio::spawn(dispatcher.run_event_loop());

    let (membership_tx, membership_engine) = coordinator::create_membership_engine(
        root_logger.new(slog::o!("Component" => "Membership")),
        metadata.clone(),
        config.replication_factor,
        options.membership_queue_capacity,
    );
    tokio::spawn(membership_engine.run_event_loop());

    let node_listener = NodeListener::new(
        root_logger.new(slog::o!("Component" => "NodeListener")),
        listener,
        membership_tx,
        ConnectionSettings {
            mailbox_capacity: options.mailbox_capacity,
            max_frame_length: options.max_frame_length,
        },
    );
    tokio::spawn(node_listener.run(shutdown_signal.clone()));

    let front_end = KvFrontEnd::new(
        root_logger.new(slog::o!("Component" => "FrontEnd")),
        dispatcher_client,
        metadata.clone(),
    );
    let rpc_server = RpcServer::new(root_logger.new(slog::o!("Component" => "RpcServer")), front_end.clone());
    tokio::spawn(rpc_server.run(config.client_listen_addr, shutdown_signal));

    slog::info!(
        root_logger,
        "Coordinator started: clients on {}, nodes on {}, replication factor {}",
        config.client_listen_addr,
        node_listen_addr,
        config.replication_factor
    );

    Ok(Coordinator {
        front_end,
        node_listen_addr,
        metadata,
        _shutdown_handle: shutdown_handle,
    })
}
