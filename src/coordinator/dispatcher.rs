use crate::coordinator::fan_in;
use crate::coordinator::mailbox::{Mailbox, NodeRequest};
use crate::coordinator::metadata::{MetadataTable, SharedMetadata};
use crate::wire::{KeyOp, ResponseBatch};
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};

pub(crate) fn create(
    logger: slog::Logger,
    metadata: SharedMetadata,
    replication_factor: usize,
    queue_capacity: usize,
) -> (DispatcherClient, Dispatcher) {
    let (tx, rx) = mpsc::channel(queue_capacity);
    let client = DispatcherClient { sender: tx };
    let dispatcher = Dispatcher {
        logger,
        receiver: rx,
        metadata,
        replication_factor,
    };

    (client, dispatcher)
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Operation {
    Get,
    Put { value: String },
    TestSet { test_value: String, new_value: String },
}

impl Operation {
    fn is_write(&self) -> bool {
        !matches!(self, Operation::Get)
    }
}

#[derive(Debug)]
struct ClientRequest {
    key: String,
    operation: Operation,
    reply: oneshot::Sender<ResponseBatch>,
}

#[derive(Debug, thiserror::Error)]
#[error("Dispatcher task has exited")]
pub(crate) struct DispatcherExited;

/// DispatcherClient is the sending half of the global request queue.
#[derive(Clone)]
pub(crate) struct DispatcherClient {
    sender: mpsc::Sender<ClientRequest>,
}

impl DispatcherClient {
    /// Queues the operation and waits for the fan-in verdict. Blocks for as long as the answering
    /// replica takes; there is no timeout.
    pub(crate) async fn submit(&self, key: String, operation: Operation) -> Result<ResponseBatch, DispatcherExited> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ClientRequest {
                key,
                operation,
                reply: tx,
            })
            .await
            .map_err(|_| DispatcherExited)?;

        rx.await.map_err(|_| DispatcherExited)
    }
}

/// Dispatcher is the single consumer of the request queue. Being the only place that assigns
/// versions makes writes to one key totally ordered: versions are handed out in queue order, and
/// each replica's mailbox sees the writes in that same order.
pub(crate) struct Dispatcher {
    logger: slog::Logger,
    receiver: mpsc::Receiver<ClientRequest>,
    metadata: SharedMetadata,
    replication_factor: usize,
}

impl Dispatcher {
    pub(crate) async fn run_event_loop(mut self) {
        while let Some(request) = self.receiver.recv().await {
            // Finishing one hand-off before planning the next keeps each mailbox in version order.
            for (mailbox, write) in self.handle_request(request) {
                mailbox.send(write).await;
            }
        }
        slog::info!(self.logger, "Request queue closed. Dispatcher exiting.");
    }

    // This must NOT be async. Waiting on replicas happens in the spawned fan-in task so that the
    // next request can be dispatched right away. Reads are queued here; writes are returned for the
    // event loop to hand off, since a full mailbox must delay a write rather than lose it.
    fn handle_request(&mut self, request: ClientRequest) -> Vec<(Mailbox, NodeRequest)> {
        let ClientRequest { key, operation, reply } = request;

        let plan = {
            let mut table = self.metadata.write();
            self.plan_fan_out(&mut table, &key, &operation)
        };

        let (key_op, mailboxes) = match plan {
            Some(plan) => plan,
            None => {
                slog::debug!(self.logger, "Failing fast on {:?}: no replica can serve it", key);
                let _ = reply.send(ResponseBatch::unavailable());
                return Vec::new();
            }
        };

        let mut responses = Vec::with_capacity(mailboxes.len());
        let mut writes = Vec::new();
        for mailbox in mailboxes {
            let mut keys = HashMap::with_capacity(1);
            keys.insert(key.clone(), key_op.clone());
            let (node_request, response) = NodeRequest::new(keys);
            if key_op.is_write() {
                writes.push((mailbox, node_request));
            } else {
                mailbox.request(node_request);
            }
            responses.push(response);
        }

        tokio::spawn(fan_in::first_available(
            self.logger.clone(),
            self.metadata.clone(),
            key,
            key_op.is_write(),
            responses,
            reply,
        ));

        writes
    }

    /// Decides, under the metadata lock, what to send and to whom. `None` means fail fast.
    fn plan_fan_out(
        &self,
        table: &mut MetadataTable,
        key: &str,
        operation: &Operation,
    ) -> Option<(KeyOp, Vec<Mailbox>)> {
        let needs_placement = match table.key(key) {
            None => true,
            // Every holder left without a fan-out failing. Start over on the next write.
            Some(key_md) => operation.is_write() && !key_md.unavailable && key_md.replicas.is_empty(),
        };
        if needs_placement {
            let key_md = table.assign_initial_replicas(key, self.replication_factor, &mut rand::thread_rng());
            slog::debug!(self.logger, "Placed {:?} on {:?}", key, key_md.replicas);
        }

        let key_md = table.key_mut(key)?;
        if key_md.unavailable || key_md.replicas.is_empty() {
            return None;
        }

        let key_op = match operation {
            Operation::Get => KeyOp::get(),
            Operation::Put { value } => {
                key_md.version += 1;
                KeyOp::put(key_md.version, value.clone())
            }
            Operation::TestSet { test_value, new_value } => {
                key_md.version += 1;
                KeyOp::test_set(key_md.version, test_value.clone(), new_value.clone())
            }
        };
        if key_op.is_write() {
            key_md.pending_writes += 1;
        }

        Some((key_op, table.replica_mailboxes(key)))
    }
}
