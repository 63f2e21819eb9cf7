use crate::coordinator::mailbox::{Mailbox, MailboxItem, NodeRequest};
use crate::coordinator::metadata::{MetadataTable, NodeId, SharedMetadata};

const COMMAND_PREFIX: &str = "CMD";

/// Fault-injection commands smuggled through `Get` keys.
#[derive(Debug, Eq, PartialEq)]
pub(crate) enum AdminCommand {
    GetReplicasOf { key: String },
    KillReplica { id: NodeId },
    KillReplicasOf { key: String, count: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("Replica count {0:?} is not a number")]
    InvalidCount(String),
    #[error("Replica count must not be negative, got {0}")]
    NegativeCount(i64),
}

impl AdminCommand {
    /// `None` means `key` is not a well-formed command and is served as an ordinary key.
    pub(crate) fn parse(key: &str) -> Option<Result<AdminCommand, AdminError>> {
        if !key.starts_with(COMMAND_PREFIX) {
            return None;
        }

        let tokens: Vec<&str> = key.split_whitespace().collect();
        match tokens.as_slice() {
            [_, "get-replicas-of", key] => Some(Ok(AdminCommand::GetReplicasOf { key: key.to_string() })),
            [_, "kill-replica", id] => Some(Ok(AdminCommand::KillReplica { id: NodeId::new(*id) })),
            [_, "kill-replicas-of", key, count] => Some(parse_count(count).map(|count| AdminCommand::KillReplicasOf {
                key: key.to_string(),
                count,
            })),
            _ => None,
        }
    }
}

fn parse_count(count: &str) -> Result<usize, AdminError> {
    let count: i64 = count
        .parse()
        .map_err(|_| AdminError::InvalidCount(count.to_string()))?;
    if count < 0 {
        return Err(AdminError::NegativeCount(count));
    }

    Ok(count as usize)
}

/// Runs `command` and renders its reply the way clients expect it.
pub(crate) async fn execute(logger: &slog::Logger, metadata: &SharedMetadata, command: AdminCommand) -> String {
    match command {
        AdminCommand::GetReplicasOf { key } => {
            let ids: Vec<String> = metadata
                .read()
                .live_replicas_of(&key)
                .into_iter()
                .map(NodeId::into_inner)
                .collect();
            ids.join(" ")
        }
        AdminCommand::KillReplica { id } => {
            let victim = {
                let mut table = metadata.write();
                mark_killed(&mut table, &id)
            };
            match victim {
                Some(mailbox) => {
                    slog::info!(logger, "Killing {}", id);
                    deliver_kill(mailbox).await;
                    "true".to_string()
                }
                None => "false".to_string(),
            }
        }
        AdminCommand::KillReplicasOf { key, count } => {
            let victims: Vec<(NodeId, Mailbox)> = {
                let mut table = metadata.write();
                let ids: Vec<NodeId> = table.live_replicas_of(&key).into_iter().take(count).collect();
                ids.into_iter()
                    .filter_map(|id| mark_killed(&mut table, &id).map(|mailbox| (id, mailbox)))
                    .collect()
            };

            let killed = victims.len();
            for (id, mailbox) in victims {
                slog::info!(logger, "Killing {} (replica of {:?})", id, key);
                deliver_kill(mailbox).await;
            }
            killed.to_string()
        }
    }
}

/// Flags the node killed and closes its mailbox so no new work reaches it. `None` if it is unknown
/// or already killed.
fn mark_killed(table: &mut MetadataTable, id: &NodeId) -> Option<Mailbox> {
    let node = table.node_mut(id)?;
    if node.killed {
        return None;
    }

    node.killed = true;
    node.mailbox.close();
    Some(node.mailbox.clone())
}

/// Sends the kill as the mailbox's last item and waits for the node to acknowledge it, or for the
/// connection to give up on it.
async fn deliver_kill(mailbox: Mailbox) {
    let (request, ack) = NodeRequest::kill();
    mailbox.close_with(MailboxItem::Request(request)).await;
    let _ = ack.await;
}
