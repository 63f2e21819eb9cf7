use crate::coordinator::mailbox::{Mailbox, MailboxItem, NodeRequest};
use crate::coordinator::metadata::{NodeId, SharedMetadata};
use crate::node::KvStore;
use crate::wire::{KeyOp, RequestBatch, VersionedValue};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

pub(crate) fn quiet_logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}

/// FakeNode plays a storage node behind a mailbox, without a socket in between.
pub(crate) struct FakeNode {
    mailbox: Mailbox,
}

impl FakeNode {
    pub(crate) fn serve(mailbox: Mailbox, mut queue: mpsc::Receiver<MailboxItem>) -> FakeNode {
        tokio::spawn(async move {
            let mut store = KvStore::new();
            while let Some(MailboxItem::Request(request)) = queue.recv().await {
                let response = store.apply(RequestBatch {
                    correlation_id: 0,
                    keys: request.keys,
                    kill: request.kill,
                });
                let _ = request.reply.send(response);
            }
        });

        FakeNode { mailbox }
    }

    /// Writes straight into the node's store, bypassing the dispatcher.
    pub(crate) async fn seed(&self, key: &str, version: u64, value: &str) {
        self.call(key, KeyOp::put(version, value)).await;
    }

    pub(crate) async fn get(&self, key: &str) -> VersionedValue {
        self.call(key, KeyOp::query()).await
    }

    async fn call(&self, key: &str, op: KeyOp) -> VersionedValue {
        let mut keys = HashMap::new();
        keys.insert(key.to_string(), op);
        let (request, response) = NodeRequest::new(keys);
        self.mailbox.request(request);

        let mut response = tokio::time::timeout(Duration::from_secs(5), response)
            .await
            .expect("Fake node timed out")
            .expect("Fake node dropped the reply");
        response.values.remove(key).expect("Fake node response lacks the key")
    }
}

/// Registers a fresh node `id` in the table and serves its mailbox.
pub(crate) fn spawn_fake_node(metadata: &SharedMetadata, id: &str) -> FakeNode {
    let (mailbox, queue) = Mailbox::new(64);
    metadata
        .write()
        .register_node(NodeId::new(id), mailbox.clone())
        .expect("Duplicate fake node");
    FakeNode::serve(mailbox, queue)
}

pub(crate) async fn wait_until<F: FnMut() -> bool>(mut condition: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "Condition not met in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
