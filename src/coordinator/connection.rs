use crate::coordinator::mailbox::{Mailbox, MailboxItem};
use crate::coordinator::membership::MembershipEvent;
use crate::coordinator::metadata::NodeId;
use crate::server::ShutdownSignal;
use crate::wire::{decode_message, encode_message, LineFrameCodec, RequestBatch, ResponseBatch};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite};

type PendingReplies = Arc<Mutex<HashMap<u64, oneshot::Sender<ResponseBatch>>>>;

#[derive(Clone)]
pub(crate) struct ConnectionSettings {
    pub(crate) mailbox_capacity: usize,
    pub(crate) max_frame_length: usize,
}

/// NodeListener accepts storage node connections until shut down. Each connection gets a reader
/// task (this side answers requests) and a writer task (drains the node's mailbox).
pub(crate) struct NodeListener {
    logger: slog::Logger,
    listener: TcpListener,
    membership: mpsc::Sender<MembershipEvent>,
    settings: ConnectionSettings,
}

impl NodeListener {
    pub(crate) fn new(
        logger: slog::Logger,
        listener: TcpListener,
        membership: mpsc::Sender<MembershipEvent>,
        settings: ConnectionSettings,
    ) -> Self {
        NodeListener {
            logger,
            listener,
            membership,
            settings,
        }
    }

    pub(crate) async fn run(self, shutdown_signal: ShutdownSignal) {
        let shutdown = shutdown_signal.clone().wait();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        let connection = NodeConnection {
                            logger: self.logger.new(slog::o!("Peer" => peer_addr.to_string())),
                            membership: self.membership.clone(),
                            settings: self.settings.clone(),
                        };
                        tokio::spawn(connection.run(stream, peer_addr, shutdown_signal.clone()));
                    }
                    Err(e) => slog::warn!(self.logger, "Failed to accept node connection: {:?}", e),
                },
            }
        }

        slog::info!(self.logger, "Node listener has exited");
    }
}

struct NodeConnection {
    logger: slog::Logger,
    membership: mpsc::Sender<MembershipEvent>,
    settings: ConnectionSettings,
}

impl NodeConnection {
    async fn run(self, stream: TcpStream, peer_addr: SocketAddr, shutdown_signal: ShutdownSignal) {
        let codec = LineFrameCodec::with_max_frame_length(self.settings.max_frame_length);
        let (read_half, write_half) = stream.into_split();
        let mut frames_in = FramedRead::new(read_half, codec.clone());
        let frames_out = FramedWrite::new(write_half, codec);

        let id = match Self::read_handshake(&mut frames_in).await {
            Some(id) => id,
            None => {
                slog::warn!(self.logger, "No valid handshake from {}", peer_addr);
                return;
            }
        };
        let logger = self.logger.new(slog::o!("NodeId" => id.to_string()));

        let (mailbox, queue) = Mailbox::new(self.settings.mailbox_capacity);
        let (registered_tx, registered_rx) = oneshot::channel();
        let connect = MembershipEvent::Connect {
            id: id.clone(),
            mailbox: mailbox.clone(),
            registered: registered_tx,
        };
        if self.membership.send(connect).await.is_err() {
            slog::warn!(logger, "Membership engine is gone. Dropping connection.");
            return;
        }
        match registered_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                slog::warn!(logger, "{}", e);
                return;
            }
            Err(_) => return,
        }

        let pending = PendingReplies::default();
        let writer = RequestWriter {
            logger: logger.clone(),
            id,
            frames_out,
            queue,
            mailbox: mailbox.clone(),
            pending: pending.clone(),
            membership: self.membership,
        };
        tokio::spawn(writer.run());

        read_responses(&logger, &mut frames_in, &pending, shutdown_signal).await;
        mailbox.close_with(MailboxItem::Disconnected).await;
    }

    async fn read_handshake(frames_in: &mut FramedRead<OwnedReadHalf, LineFrameCodec>) -> Option<NodeId> {
        let payload = match frames_in.next().await {
            Some(Ok(payload)) => payload,
            _ => return None,
        };
        let id = String::from_utf8(payload.to_vec()).ok()?;
        if id.is_empty() {
            return None;
        }
        Some(NodeId::new(id))
    }
}

/// Routes node responses to whoever is waiting on their correlation id, until the link fails.
async fn read_responses(
    logger: &slog::Logger,
    frames_in: &mut FramedRead<OwnedReadHalf, LineFrameCodec>,
    pending: &PendingReplies,
    shutdown_signal: ShutdownSignal,
) {
    let shutdown = shutdown_signal.wait();
    tokio::pin!(shutdown);

    loop {
        let payload = tokio::select! {
            _ = &mut shutdown => return,
            frame = frames_in.next() => match frame {
                Some(Ok(payload)) => payload,
                Some(Err(e)) => {
                    slog::warn!(logger, "Node link failed: {}", e);
                    return;
                }
                None => {
                    slog::info!(logger, "Node closed its connection");
                    return;
                }
            },
        };

        let response: ResponseBatch = match decode_message(&payload) {
            Ok(response) => response,
            Err(e) => {
                slog::warn!(logger, "Undecodable response, dropping node: {}", e);
                return;
            }
        };
        slog::debug!(logger, "Response {:?}", response);

        let waiting = pending
            .lock()
            .expect("Pending replies lock poison")
            .remove(&response.correlation_id);
        match waiting {
            Some(reply) => {
                let _ = reply.send(response);
            }
            None => slog::debug!(logger, "No one waiting on {}", response.correlation_id),
        }
    }
}

struct RequestWriter {
    logger: slog::Logger,
    id: NodeId,
    frames_out: FramedWrite<OwnedWriteHalf, LineFrameCodec>,
    queue: mpsc::Receiver<MailboxItem>,
    mailbox: Mailbox,
    pending: PendingReplies,
    membership: mpsc::Sender<MembershipEvent>,
}

impl RequestWriter {
    async fn run(mut self) {
        let mut next_correlation_id: u64 = 0;

        while let Some(item) = self.queue.recv().await {
            let request = match item {
                MailboxItem::Request(request) => request,
                MailboxItem::Disconnected => break,
            };

            next_correlation_id += 1;
            let batch = RequestBatch {
                correlation_id: next_correlation_id,
                keys: request.keys,
                kill: request.kill,
            };
            let payload = match encode_message(&batch) {
                Ok(payload) => payload,
                Err(e) => {
                    slog::warn!(self.logger, "Failed to encode request: {}", e);
                    let _ = request.reply.send(ResponseBatch::unavailable());
                    continue;
                }
            };

            // Registered before the write so the reader can never see the response first.
            self.pending
                .lock()
                .expect("Pending replies lock poison")
                .insert(next_correlation_id, request.reply);
            slog::debug!(self.logger, "Request {:?}", batch);
            if let Err(e) = self.frames_out.send(payload).await {
                slog::warn!(self.logger, "Failed to write to node: {}", e);
                break;
            }
        }

        self.tear_down().await;
    }

    async fn tear_down(mut self) {
        self.mailbox.close();
        let _ = self.membership.send(MembershipEvent::Disconnect { id: self.id }).await;

        let orphaned: Vec<_> = self
            .pending
            .lock()
            .expect("Pending replies lock poison")
            .drain()
            .map(|(_, reply)| reply)
            .collect();
        for reply in orphaned {
            let _ = reply.send(ResponseBatch::unavailable());
        }

        self.queue.close();
        while let Some(item) = self.queue.recv().await {
            if let MailboxItem::Request(request) = item {
                request.reply_unavailable();
            }
        }
    }
}
