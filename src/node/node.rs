use crate::node::store::KvStore;
use crate::wire::{decode_message, encode_message, FrameError, LineFrameCodec, RequestBatch, ResponseBatch};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::io;
use std::net::{IpAddr, SocketAddr};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::codec::{FramedRead, FramedWrite};

const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 1000;

pub struct StorageNodeConfig {
    /// Local address to bind the outbound connection to. The port is picked by the OS.
    pub local_ip: IpAddr,
    pub coordinator_addr: SocketAddr,
    pub node_id: String,
    pub info_logger: slog::Logger,
    pub outbound_queue_capacity: Option<usize>,
}

/// Why a storage node stopped without an error.
#[derive(Debug, Eq, PartialEq)]
pub enum NodeExit {
    /// The coordinator sent a kill command and we acknowledged it.
    Killed,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageNodeError {
    #[error("Failed to connect to coordinator")]
    Connect(io::Error),
    #[error("Connection to coordinator failed: {0}")]
    Frame(#[from] FrameError),
    // The coordinator only ever sends well formed batches, so this is treated as fatal.
    #[error("Received malformed request from coordinator")]
    MalformedRequest(serde_json::Error),
    #[error("Failed to encode response")]
    Encode(serde_json::Error),
    #[error("Coordinator closed the connection")]
    CoordinatorHungUp,
    #[error("Outbound writer task has exited")]
    WriterExited,
}

enum WriterExit {
    Killed,
    QueueClosed,
}

/// `run_storage_node()` connects to the coordinator, introduces itself, then applies requests in
/// arrival order until the connection drops or the coordinator kills us.
///
/// The inbound side runs on the calling task. Responses are pushed through a queue to a single
/// writer task, so they hit the wire in the order requests were applied.
pub async fn run_storage_node(config: StorageNodeConfig) -> Result<NodeExit, StorageNodeError> {
    let logger = config.info_logger.new(slog::o!("NodeId" => config.node_id.clone()));

    let stream = connect(config.local_ip, config.coordinator_addr)
        .await
        .map_err(StorageNodeError::Connect)?;
    let (read_half, write_half) = stream.into_split();
    let mut frames_in = FramedRead::new(read_half, LineFrameCodec::new());
    let mut frames_out = FramedWrite::new(write_half, LineFrameCodec::new());

    // Handshake is the bare node id.
    frames_out.send(Bytes::from(config.node_id.clone())).await?;
    slog::info!(logger, "Connected to coordinator at {}", config.coordinator_addr);

    let capacity = config
        .outbound_queue_capacity
        .unwrap_or(DEFAULT_OUTBOUND_QUEUE_CAPACITY);
    let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
    let mut writer = tokio::spawn(write_responses(logger.clone(), frames_out, outbound_rx));

    let mut store = KvStore::new();
    loop {
        tokio::select! {
            writer_result = &mut writer => {
                return writer_outcome(writer_result);
            }
            frame = frames_in.next() => {
                let payload = match frame {
                    Some(Ok(payload)) => payload,
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        slog::warn!(logger, "Coordinator closed the connection");
                        return Err(StorageNodeError::CoordinatorHungUp);
                    }
                };

                let batch: RequestBatch = decode_message(&payload).map_err(StorageNodeError::MalformedRequest)?;
                slog::debug!(logger, "Request {:?}", batch);
                let response = store.apply(batch);

                if outbound_tx.send(response).await.is_err() {
                    return writer_outcome(writer.await);
                }
            }
        }
    }
}

fn writer_outcome(result: Result<Result<WriterExit, StorageNodeError>, JoinError>) -> Result<NodeExit, StorageNodeError> {
    match result {
        Ok(Ok(WriterExit::Killed)) => Ok(NodeExit::Killed),
        Ok(Ok(WriterExit::QueueClosed)) => Err(StorageNodeError::WriterExited),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(StorageNodeError::WriterExited),
    }
}

async fn write_responses(
    logger: slog::Logger,
    mut frames_out: FramedWrite<OwnedWriteHalf, LineFrameCodec>,
    mut outbound: mpsc::Receiver<ResponseBatch>,
) -> Result<WriterExit, StorageNodeError> {
    while let Some(response) = outbound.recv().await {
        let payload = encode_message(&response).map_err(StorageNodeError::Encode)?;
        frames_out.send(payload).await?;

        if response.kill {
            slog::warn!(logger, "Killed by coordinator");
            return Ok(WriterExit::Killed);
        }
    }

    Ok(WriterExit::QueueClosed)
}

async fn connect(local_ip: IpAddr, coordinator_addr: SocketAddr) -> io::Result<TcpStream> {
    let socket = match local_ip {
        IpAddr::V4(_) => TcpSocket::new_v4()?,
        IpAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.bind(SocketAddr::new(local_ip, 0))?;
    socket.connect(coordinator_addr).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::KeyOp;
    use bytes::BytesMut;
    use std::collections::HashMap;
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use tokio::net::TcpListener;

    type CoordinatorSide = (
        FramedRead<tokio::net::tcp::OwnedReadHalf, LineFrameCodec>,
        FramedWrite<OwnedWriteHalf, LineFrameCodec>,
    );

    async fn start_node(id: &str) -> (CoordinatorSide, tokio::task::JoinHandle<Result<NodeExit, StorageNodeError>>) {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let config = StorageNodeConfig {
            local_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            coordinator_addr: listener.local_addr().unwrap(),
            node_id: id.to_string(),
            info_logger: slog::Logger::root(slog::Discard, slog::o!()),
            outbound_queue_capacity: None,
        };
        let node = tokio::spawn(run_storage_node(config));

        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, write_half) = stream.into_split();
        let side = (
            FramedRead::new(read_half, LineFrameCodec::new()),
            FramedWrite::new(write_half, LineFrameCodec::new()),
        );
        (side, node)
    }

    async fn next_frame(frames_in: &mut FramedRead<tokio::net::tcp::OwnedReadHalf, LineFrameCodec>) -> BytesMut {
        tokio::time::timeout(Duration::from_secs(5), frames_in.next())
            .await
            .expect("Unexpected timeout")
            .expect("Node hung up")
            .expect("Bad frame")
    }

    #[tokio::test]
    async fn handshake_then_ordered_responses_then_kill() {
        // -- setup --
        let ((mut frames_in, mut frames_out), node) = start_node("n1").await;
        assert_eq!(&next_frame(&mut frames_in).await[..], b"n1");

        // -- execute --
        for (correlation_id, op) in vec![(1, KeyOp::put(1, "x")), (2, KeyOp::get())] {
            let mut keys = HashMap::new();
            keys.insert("a".to_string(), op);
            let batch = RequestBatch {
                correlation_id,
                keys,
                kill: false,
            };
            frames_out.send(encode_message(&batch).unwrap()).await.unwrap();
        }
        let kill = RequestBatch {
            correlation_id: 3,
            kill: true,
            ..RequestBatch::default()
        };
        frames_out.send(encode_message(&kill).unwrap()).await.unwrap();

        // -- verify --
        let first: ResponseBatch = decode_message(&next_frame(&mut frames_in).await).unwrap();
        let second: ResponseBatch = decode_message(&next_frame(&mut frames_in).await).unwrap();
        let third: ResponseBatch = decode_message(&next_frame(&mut frames_in).await).unwrap();
        assert_eq!(first.correlation_id, 1);
        assert_eq!(second.correlation_id, 2);
        assert_eq!(second.values["a"].value, "x");
        assert!(third.kill);

        let exit = tokio::time::timeout(Duration::from_secs(5), node).await.unwrap().unwrap();
        assert_eq!(exit.unwrap(), NodeExit::Killed);
    }

    #[tokio::test]
    async fn garbage_from_coordinator_is_fatal() {
        let ((mut frames_in, mut frames_out), node) = start_node("n1").await;
        next_frame(&mut frames_in).await;

        frames_out.send(Bytes::from_static(b"not json")).await.unwrap();

        let exit = tokio::time::timeout(Duration::from_secs(5), node).await.unwrap().unwrap();
        assert!(matches!(exit, Err(StorageNodeError::MalformedRequest(_))));
    }

    #[tokio::test]
    async fn coordinator_hang_up_ends_node() {
        let ((mut frames_in, frames_out), node) = start_node("n1").await;
        next_frame(&mut frames_in).await;

        drop(frames_out);
        drop(frames_in);

        let exit = tokio::time::timeout(Duration::from_secs(5), node).await.unwrap().unwrap();
        assert!(exit.is_err());
    }
}
