use crate::coordinator::mailbox::Mailbox;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// NodeId is the identifier a storage node announces in its handshake.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) struct NodeId(String);

impl NodeId {
    pub(crate) fn new(id: impl Into<String>) -> Self {
        NodeId(id.into())
    }

    pub(crate) fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Default)]
pub(crate) struct KeyMetadata {
    /// Last version handed out for this key. Only the dispatcher advances it.
    pub(crate) version: u64,
    /// Sticky. Set once a fan-out found no replica able to answer.
    pub(crate) unavailable: bool,
    /// Write fan-outs that have not yet produced a winning response.
    pub(crate) pending_writes: usize,
    pub(crate) replicas: HashSet<NodeId>,
}

#[derive(Debug)]
pub(crate) struct NodeMetadata {
    pub(crate) id: NodeId,
    /// Mirror of every `KeyMetadata::replicas` set containing this node.
    pub(crate) keys: HashSet<String>,
    pub(crate) mailbox: Mailbox,
    pub(crate) killed: bool,
}

impl NodeMetadata {
    /// A node we may still hand new work to.
    fn accepts_work(&self) -> bool {
        !self.killed && !self.mailbox.is_closed()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Node {0} is already connected")]
pub(crate) struct DuplicateNodeError(pub(crate) NodeId);

/// MetadataTable is the coordinator's view of which node holds which key.
///
/// Every method here is pure in-memory bookkeeping. Callers hold the table lock only for the
/// duration of one call (or a short run of calls) and never across an await.
#[derive(Debug, Default)]
pub(crate) struct MetadataTable {
    keys: HashMap<String, KeyMetadata>,
    nodes: HashMap<NodeId, NodeMetadata>,
}

impl MetadataTable {
    pub(crate) fn key(&self, key: &str) -> Option<&KeyMetadata> {
        self.keys.get(key)
    }

    pub(crate) fn key_mut(&mut self, key: &str) -> Option<&mut KeyMetadata> {
        self.keys.get_mut(key)
    }

    pub(crate) fn node(&self, id: &NodeId) -> Option<&NodeMetadata> {
        self.nodes.get(id)
    }

    pub(crate) fn node_mut(&mut self, id: &NodeId) -> Option<&mut NodeMetadata> {
        self.nodes.get_mut(id)
    }

    #[cfg(test)]
    pub(crate) fn live_node_count(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Returns the live node count including the new node.
    pub(crate) fn register_node(&mut self, id: NodeId, mailbox: Mailbox) -> Result<usize, DuplicateNodeError> {
        if self.nodes.contains_key(&id) {
            return Err(DuplicateNodeError(id));
        }

        self.nodes.insert(
            id.clone(),
            NodeMetadata {
                id,
                keys: HashSet::new(),
                mailbox,
                killed: false,
            },
        );

        Ok(self.nodes.len())
    }

    /// Drops the node and strips it from every replica set it was part of. Returns the keys it
    /// held, which are now under-replicated.
    pub(crate) fn remove_node(&mut self, id: &NodeId) -> Option<HashSet<String>> {
        let node = self.nodes.remove(id)?;
        for key in node.keys.iter() {
            if let Some(key_md) = self.keys.get_mut(key) {
                key_md.replicas.remove(id);
            }
        }

        Some(node.keys)
    }

    /// Picks `min(replication_factor, candidates)` distinct nodes uniformly at random and makes
    /// them the replica set of `key`, creating its metadata if needed.
    pub(crate) fn assign_initial_replicas<R: Rng + ?Sized>(
        &mut self,
        key: &str,
        replication_factor: usize,
        rng: &mut R,
    ) -> &mut KeyMetadata {
        let mut candidates = self.placement_candidates();
        let amount = replication_factor.min(candidates.len());
        let (chosen, _) = candidates.partial_shuffle(rng, amount);
        let chosen: Vec<NodeId> = chosen.to_vec();

        for id in chosen.iter() {
            if let Some(node) = self.nodes.get_mut(id) {
                node.keys.insert(key.to_string());
            }
        }

        let key_md = self.keys.entry(key.to_string()).or_default();
        key_md.replicas.extend(chosen);
        key_md
    }

    /// Nodes that may receive new keys, in random order.
    pub(crate) fn shuffled_candidates<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<NodeId> {
        let mut candidates = self.placement_candidates();
        candidates.shuffle(rng);
        candidates
    }

    fn placement_candidates(&self) -> Vec<NodeId> {
        let mut candidates: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|node| node.accepts_work())
            .map(|node| node.id.clone())
            .collect();
        // Sorted so that seeded placement is repeatable.
        candidates.sort();
        candidates
    }

    pub(crate) fn replica_mailboxes(&self, key: &str) -> Vec<Mailbox> {
        self.keys
            .get(key)
            .map(|key_md| {
                key_md
                    .replicas
                    .iter()
                    .filter_map(|id| self.nodes.get(id))
                    .map(|node| node.mailbox.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Replica ids of `key` that have not been killed, sorted.
    pub(crate) fn live_replicas_of(&self, key: &str) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = match self.keys.get(key) {
            Some(key_md) => key_md
                .replicas
                .iter()
                .filter(|id| self.nodes.get(*id).map(|node| !node.killed).unwrap_or(false))
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        ids.sort();
        ids
    }

    pub(crate) fn keys_with_replicas(&self) -> HashSet<String> {
        self.keys
            .iter()
            .filter(|(_, key_md)| !key_md.replicas.is_empty())
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// For each node currently holding any of `keys`, its mailbox and the subset it holds.
    pub(crate) fn holders_of<'a, I>(&self, keys: I) -> HashMap<NodeId, (Mailbox, Vec<String>)>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut holders: HashMap<NodeId, (Mailbox, Vec<String>)> = HashMap::new();
        for key in keys {
            let key_md = match self.keys.get(key) {
                Some(key_md) => key_md,
                None => continue,
            };
            for id in key_md.replicas.iter() {
                if let Some(node) = self.nodes.get(id) {
                    holders
                        .entry(id.clone())
                        .or_insert_with(|| (node.mailbox.clone(), Vec::new()))
                        .1
                        .push(key.clone());
                }
            }
        }
        holders
    }

    /// Adds `node` to the replica set of `key` and clears the key's unavailability. Returns false
    /// if either side is unknown, in which case nothing changes.
    pub(crate) fn register_replica(&mut self, key: &str, id: &NodeId) -> bool {
        let node = match self.nodes.get_mut(id) {
            Some(node) => node,
            None => return false,
        };
        let key_md = match self.keys.get_mut(key) {
            Some(key_md) => key_md,
            None => return false,
        };

        node.keys.insert(key.to_string());
        key_md.replicas.insert(id.clone());
        key_md.unavailable = false;
        true
    }

    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        for (key, key_md) in self.keys.iter() {
            for id in key_md.replicas.iter() {
                let node = self
                    .nodes
                    .get(id)
                    .unwrap_or_else(|| panic!("{} lists disconnected replica {}", key, id));
                assert!(node.keys.contains(key), "{} does not mirror {}", id, key);
            }
        }
        for (id, node) in self.nodes.iter() {
            for key in node.keys.iter() {
                assert!(self.keys[key].replicas.contains(id), "{} claims {} but key disagrees", id, key);
            }
        }
    }
}

/// SharedMetadata is the single lock around the metadata table shared by the dispatcher, the
/// membership engine, replication tasks and the client-facing service.
#[derive(Clone, Default)]
pub(crate) struct SharedMetadata {
    table: Arc<RwLock<MetadataTable>>,
}

impl SharedMetadata {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, MetadataTable> {
        self.table.read().expect("Metadata read lock poison")
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, MetadataTable> {
        self.table.write().expect("Metadata write lock poison")
    }
}
