use crate::coordinator::mailbox::Mailbox;
use crate::coordinator::metadata::{DuplicateNodeError, MetadataTable, NodeId, SharedMetadata};
use crate::coordinator::replication;
use rand::Rng;
use std::collections::HashSet;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug)]
pub(crate) enum MembershipEvent {
    Connect {
        id: NodeId,
        mailbox: Mailbox,
        registered: oneshot::Sender<Result<(), DuplicateNodeError>>,
    },
    Disconnect {
        id: NodeId,
    },
    /// A replication task lost its target. Its leftover keys need a new home.
    Repartition {
        keys: HashSet<String>,
    },
}

pub(crate) fn create(
    logger: slog::Logger,
    metadata: SharedMetadata,
    replication_factor: usize,
    queue_capacity: usize,
) -> (mpsc::Sender<MembershipEvent>, MembershipEngine) {
    let (tx, rx) = mpsc::channel(queue_capacity);
    let engine = MembershipEngine {
        logger,
        receiver: rx,
        events: tx.downgrade(),
        metadata,
        replication_factor,
    };

    (tx, engine)
}

/// MembershipEngine applies node connects and disconnects to the metadata table and launches the
/// replication tasks that keep every key on enough nodes.
pub(crate) struct MembershipEngine {
    logger: slog::Logger,
    receiver: mpsc::Receiver<MembershipEvent>,
    // Weak, so the loop ends once every connection and replication task is gone.
    events: mpsc::WeakSender<MembershipEvent>,
    metadata: SharedMetadata,
    replication_factor: usize,
}

impl MembershipEngine {
    pub(crate) async fn run_event_loop(mut self) {
        while let Some(event) = self.receiver.recv().await {
            self.handle_event(event);
        }
        slog::info!(self.logger, "Membership queue closed. Engine exiting.");
    }

    fn handle_event(&mut self, event: MembershipEvent) {
        match event {
            MembershipEvent::Connect { id, mailbox, registered } => self.handle_connect(id, mailbox, registered),
            MembershipEvent::Disconnect { id } => self.handle_disconnect(id),
            MembershipEvent::Repartition { keys } => {
                slog::info!(self.logger, "Repartitioning {} keys after a failed replication", keys.len());
                self.partition_and_replicate(keys);
            }
        }
    }

    fn handle_connect(
        &mut self,
        id: NodeId,
        mailbox: Mailbox,
        registered: oneshot::Sender<Result<(), DuplicateNodeError>>,
    ) {
        let registration = self.metadata.write().register_node(id.clone(), mailbox);
        let live_nodes = match registration {
            Ok(live_nodes) => live_nodes,
            Err(e) => {
                slog::warn!(self.logger, "Rejecting connection: {}", e);
                let _ = registered.send(Err(e));
                return;
            }
        };

        if registered.send(Ok(())).is_err() {
            // Connection went away before it could start serving.
            self.handle_disconnect(id);
            return;
        }
        slog::info!(self.logger, "Node {} connected ({} live)", id, live_nodes);

        // With no more nodes than replicas per key, every node is supposed to hold everything.
        if live_nodes <= self.replication_factor {
            let keys = self.metadata.read().keys_with_replicas();
            if !keys.is_empty() {
                slog::info!(self.logger, "Bootstrapping {} with {} keys", id, keys.len());
                self.spawn_replication(id, keys);
            }
        }
    }

    fn handle_disconnect(&mut self, id: NodeId) {
        let orphaned = self.metadata.write().remove_node(&id);
        match orphaned {
            Some(keys) => {
                slog::info!(self.logger, "Node {} disconnected, re-replicating {} keys", id, keys.len());
                self.partition_and_replicate(keys);
            }
            None => slog::debug!(self.logger, "Disconnect of unknown node {}", id),
        }
    }

    fn partition_and_replicate(&self, keys: HashSet<String>) {
        if keys.is_empty() {
            return;
        }

        let (assignments, unplaced) = {
            let table = self.metadata.read();
            partition(&table, keys, &mut rand::thread_rng())
        };
        if !unplaced.is_empty() {
            slog::warn!(self.logger, "No live node can take {} keys", unplaced.len());
        }

        for (target, keys) in assignments {
            self.spawn_replication(target, keys);
        }
    }

    fn spawn_replication(&self, target: NodeId, keys: HashSet<String>) {
        let logger = self.logger.new(slog::o!("Target" => target.to_string()));
        tokio::spawn(replication::replicate(
            logger,
            self.metadata.clone(),
            self.events.clone(),
            target,
            keys,
        ));
    }
}

/// Walks the live nodes in random order, handing each one every remaining key it doesn't already
/// hold. The subsets are disjoint. Returns the assignments and the keys no node could take.
pub(crate) fn partition<R: Rng + ?Sized>(
    table: &MetadataTable,
    mut keys: HashSet<String>,
    rng: &mut R,
) -> (Vec<(NodeId, HashSet<String>)>, HashSet<String>) {
    let mut assignments = Vec::new();

    for id in table.shuffled_candidates(rng) {
        if keys.is_empty() {
            break;
        }
        let held = match table.node(&id) {
            Some(node) => &node.keys,
            None => continue,
        };

        let (subset, rest): (HashSet<String>, HashSet<String>) = keys.into_iter().partition(|key| !held.contains(key));
        keys = rest;
        if !subset.is_empty() {
            assignments.push((id, subset));
        }
    }

    (assignments, keys)
}
