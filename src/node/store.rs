use crate::wire::{KeyOp, Opcode, RequestBatch, ResponseBatch, VersionedValue};
use std::collections::HashMap;

/// KvStore is a storage node's local copy of its share of the keyspace.
///
/// It never invents versions. Every version it holds was assigned by the coordinator, and a stored
/// version only ever moves forward, so replaying an old write is a no-op.
#[derive(Debug, Default)]
pub(crate) struct KvStore {
    entries: HashMap<String, VersionedValue>,
}

impl KvStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Applies every key operation of `batch` and builds the matching response. Kill batches are
    /// acknowledged without touching state.
    pub(crate) fn apply(&mut self, batch: RequestBatch) -> ResponseBatch {
        if batch.kill {
            return ResponseBatch {
                correlation_id: batch.correlation_id,
                kill: true,
                ..ResponseBatch::default()
            };
        }

        let mut values = HashMap::with_capacity(batch.keys.len());
        for (key, op) in batch.keys {
            let result = self.apply_key(&key, op);
            values.insert(key, result);
        }

        ResponseBatch {
            correlation_id: batch.correlation_id,
            values,
            ..ResponseBatch::default()
        }
    }

    fn apply_key(&mut self, key: &str, op: KeyOp) -> VersionedValue {
        match op.opcode {
            Opcode::Get => self.entry(key).clone(),
            Opcode::Query => self.entries.get(key).cloned().unwrap_or_default(),
            Opcode::Put => {
                let entry = self.entry(key);
                if op.version > entry.version {
                    *entry = VersionedValue::new(op.version, op.new_value);
                }
                entry.clone()
            }
            Opcode::TestSet => {
                let entry = self.entry(key);
                if op.version > entry.version {
                    if entry.value == op.test_value {
                        entry.value = op.new_value;
                    }
                    // Even a failed comparison consumes the version, so the coordinator's
                    // clock and ours stay aligned.
                    entry.version = op.version;
                }
                entry.clone()
            }
        }
    }

    /// Unseen keys materialize as `(0, "")`.
    fn entry(&mut self, key: &str) -> &mut VersionedValue {
        self.entries.entry(key.to_string()).or_default()
    }

    #[cfg(test)]
    fn peek(&self, key: &str) -> Option<&VersionedValue> {
        self.entries.get(key)
    }
}
