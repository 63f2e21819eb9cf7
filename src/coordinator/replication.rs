use crate::coordinator::mailbox::NodeRequest;
use crate::coordinator::membership::MembershipEvent;
use crate::coordinator::metadata::{NodeId, SharedMetadata};
use crate::wire::{KeyOp, ResponseBatch, VersionedValue};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

// Pause before asking again when no holder answered at all.
const NO_ANSWER_RETRY_DELAY: Duration = Duration::from_millis(10);

/// `replicate()` copies `keys` onto `target` and registers it as a replica of each, one round at a
/// time, until no key is left:
///
/// 1. Query every live holder for the keys it holds and merge by highest version.
/// 2. Push the merged values to the target as one batched Put.
/// 3. Register the target for each key whose acked version is the current version and has no
///    write in flight. Other keys go around again.
///
/// Keys that lost every replica are dropped. If the target stops answering, the leftover keys are
/// handed back to the membership engine to be placed elsewhere.
pub(crate) async fn replicate(
    logger: slog::Logger,
    metadata: SharedMetadata,
    events: mpsc::WeakSender<MembershipEvent>,
    target: NodeId,
    mut keys: HashSet<String>,
) {
    slog::debug!(logger, "Replicating {} keys", keys.len());

    while !keys.is_empty() {
        let (target_mailbox, holders) = {
            let table = metadata.read();
            keys.retain(|key| table.key(key).map(|key_md| !key_md.replicas.is_empty()).unwrap_or(false));
            let target_mailbox = table.node(&target).map(|node| node.mailbox.clone());
            (target_mailbox, table.holders_of(keys.iter()))
        };
        if keys.is_empty() {
            break;
        }
        let target_mailbox = match target_mailbox {
            Some(mailbox) => mailbox,
            None => {
                slog::warn!(logger, "Target left before replication finished");
                request_repartition(&logger, &events, keys).await;
                return;
            }
        };

        let mut queries = Vec::with_capacity(holders.len());
        for (_, (mailbox, held)) in holders {
            let ops = held.into_iter().map(|key| (key, KeyOp::query())).collect();
            let (request, response) = NodeRequest::new(ops);
            mailbox.request(request);
            queries.push(response);
        }
        let merged = merge_highest_version(queries, keys.len()).await;
        if merged.is_empty() {
            tokio::time::sleep(NO_ANSWER_RETRY_DELAY).await;
            continue;
        }

        let puts = merged
            .into_iter()
            .map(|(key, latest)| (key, KeyOp::put(latest.version, latest.value)))
            .collect();
        let (request, ack) = NodeRequest::new(puts);
        target_mailbox.request(request);
        let ack = match ack.await {
            Ok(ack) if !ack.unavailable => ack,
            _ => {
                slog::warn!(logger, "Target failed to accept replicated keys");
                request_repartition(&logger, &events, keys).await;
                return;
            }
        };

        {
            let mut table = metadata.write();
            keys.retain(|key| {
                let (orphaned, settled) = match table.key(key) {
                    None => (true, false),
                    Some(key_md) => {
                        let settled = ack
                            .values
                            .get(key)
                            .map(|acked| key_md.pending_writes == 0 && acked.version == key_md.version)
                            .unwrap_or(false);
                        (key_md.replicas.is_empty(), settled)
                    }
                };
                if orphaned {
                    return false;
                }
                !(settled && table.register_replica(key, &target))
            });
        }
    }

    slog::debug!(logger, "Replication finished");
}

/// Collects Query responses and keeps the highest version seen per key. Returns early once every
/// one of `num_keys` keys has a value; stragglers are dropped unread.
pub(crate) async fn merge_highest_version(
    responses: Vec<oneshot::Receiver<ResponseBatch>>,
    num_keys: usize,
) -> HashMap<String, VersionedValue> {
    let mut merged: HashMap<String, VersionedValue> = HashMap::with_capacity(num_keys);
    let mut pending: FuturesUnordered<_> = responses.into_iter().collect();

    while let Some(result) = pending.next().await {
        let response = match result {
            Ok(response) if !response.unavailable => response,
            _ => continue,
        };

        for (key, value) in response.values {
            let newer = merged
                .get(&key)
                .map(|existing| value.version > existing.version)
                .unwrap_or(true);
            if newer {
                merged.insert(key, value);
            }
        }

        if merged.len() >= num_keys {
            break;
        }
    }

    merged
}

async fn request_repartition(
    logger: &slog::Logger,
    events: &mpsc::WeakSender<MembershipEvent>,
    keys: HashSet<String>,
) {
    let sent = match events.upgrade() {
        Some(sender) => sender.send(MembershipEvent::Repartition { keys }).await.is_ok(),
        None => false,
    };
    if !sent {
        slog::warn!(logger, "Membership engine is gone. Dropping leftover keys.");
    }
}
