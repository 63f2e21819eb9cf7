use crate::wire::{KeyOp, ResponseBatch};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// NodeRequest is one batch destined for a single storage node, plus the channel its response
/// will be delivered on. The connection assigns the correlation id when it hits the wire.
#[derive(Debug)]
pub(crate) struct NodeRequest {
    pub(crate) keys: HashMap<String, KeyOp>,
    pub(crate) kill: bool,
    pub(crate) reply: oneshot::Sender<ResponseBatch>,
}

impl NodeRequest {
    pub(crate) fn new(keys: HashMap<String, KeyOp>) -> (Self, oneshot::Receiver<ResponseBatch>) {
        let (tx, rx) = oneshot::channel();
        (
            NodeRequest {
                keys,
                kill: false,
                reply: tx,
            },
            rx,
        )
    }

    pub(crate) fn kill() -> (Self, oneshot::Receiver<ResponseBatch>) {
        let (mut request, rx) = Self::new(HashMap::new());
        request.kill = true;
        (request, rx)
    }

    pub(crate) fn reply_unavailable(self) {
        let _ = self.reply.send(ResponseBatch::unavailable());
    }
}

#[derive(Debug)]
pub(crate) enum MailboxItem {
    Request(NodeRequest),
    /// Terminal item. The reader half observed that the connection is gone.
    Disconnected,
}

/// Mailbox is the ordered, bounded request queue of one storage node connection.
///
/// Once closed, every further request is answered `unavailable` on the spot. `request()` never
/// waits: a full queue is also answered `unavailable`, which the fan-in treats like any failed
/// replica. `send()` waits for space.
#[derive(Clone, Debug)]
pub(crate) struct Mailbox {
    sender: mpsc::Sender<MailboxItem>,
    closed: Arc<AtomicBool>,
}

impl Mailbox {
    pub(crate) fn new(capacity: usize) -> (Self, mpsc::Receiver<MailboxItem>) {
        let (tx, rx) = mpsc::channel(capacity);
        let mailbox = Mailbox {
            sender: tx,
            closed: Arc::new(AtomicBool::new(false)),
        };
        (mailbox, rx)
    }

    pub(crate) fn request(&self, request: NodeRequest) {
        if self.is_closed() {
            request.reply_unavailable();
            return;
        }

        match self.sender.try_reserve() {
            Ok(permit) => permit.send(MailboxItem::Request(request)),
            Err(_) => request.reply_unavailable(),
        }
    }

    /// Like `request()`, but waits for queue space instead of answering `unavailable`. Writes to a
    /// replica go through here, so a live replica sees every write.
    pub(crate) async fn send(&self, request: NodeRequest) {
        if self.is_closed() {
            request.reply_unavailable();
            return;
        }

        match self.sender.reserve().await {
            Ok(permit) => permit.send(MailboxItem::Request(request)),
            Err(_) => request.reply_unavailable(),
        }
    }

    /// Marks the mailbox closed, then enqueues `item` as the last thing the connection will see
    /// from new senders. This one waits for queue space so the item is never lost.
    pub(crate) async fn close_with(&self, item: MailboxItem) {
        self.close();

        if let Err(mpsc::error::SendError(MailboxItem::Request(request))) = self.sender.send(item).await {
            request.reply_unavailable();
        }
    }

    /// Marks the mailbox closed without enqueueing anything.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
