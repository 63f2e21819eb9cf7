use crate::coordinator::metadata::SharedMetadata;
use crate::wire::ResponseBatch;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::oneshot;

/// `first_available()` waits on the per-replica responses of one fan-out and forwards the first one
/// that isn't `unavailable` to `reply`. The other responses are dropped unread; their replicas
/// still apply the request, which is harmless because nodes ignore versions they have seen.
///
/// A replica whose response channel is dropped counts as unavailable. If every replica is
/// unavailable, the key is flagged unavailable and so is the reply.
pub(crate) async fn first_available(
    logger: slog::Logger,
    metadata: SharedMetadata,
    key: String,
    is_write: bool,
    responses: Vec<oneshot::Receiver<ResponseBatch>>,
    reply: oneshot::Sender<ResponseBatch>,
) {
    let num_replicas = responses.len();
    let mut pending: FuturesUnordered<_> = responses.into_iter().collect();

    while let Some(result) = pending.next().await {
        let response = match result {
            Ok(response) if !response.unavailable => response,
            _ => continue,
        };

        let flagged_meanwhile = {
            let mut table = metadata.write();
            match table.key_mut(&key) {
                Some(key_md) => {
                    if is_write {
                        key_md.pending_writes = key_md.pending_writes.saturating_sub(1);
                    }
                    key_md.unavailable
                }
                None => false,
            }
        };

        let _ = if flagged_meanwhile {
            reply.send(ResponseBatch::unavailable())
        } else {
            reply.send(response)
        };
        return;
    }

    slog::warn!(logger, "All {} replicas of {:?} are unavailable", num_replicas, key);
    {
        let mut table = metadata.write();
        if let Some(key_md) = table.key_mut(&key) {
            key_md.unavailable = true;
            if is_write {
                key_md.pending_writes = key_md.pending_writes.saturating_sub(1);
            }
        }
    }
    let _ = reply.send(ResponseBatch::unavailable());
}
