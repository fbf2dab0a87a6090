/// Open transaction registry
///
/// Each transaction reads at the store version current when it began and
/// remembers the keys it read. Commit validation fails when any of those keys,
/// or any key it writes, changed after the snapshot.

use bytes::Bytes;
use dstore_core::rpc::RpcStatus;
use dstore_core::{Error, Key, Result, TransactionHandle};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct OpenTransaction {
    pub snapshot_version: i64,
    pub read_only: bool,
    pub read_set: HashSet<Key>,
}

#[derive(Debug, Default)]
pub struct TransactionRegistry {
    open: HashMap<TransactionHandle, OpenTransaction>,
}

impl TransactionRegistry {
    pub fn begin(&mut self, snapshot_version: i64, read_only: bool) -> TransactionHandle {
        let handle = TransactionHandle::new(Bytes::copy_from_slice(Uuid::new_v4().as_bytes()));
        self.open.insert(
            handle.clone(),
            OpenTransaction {
                snapshot_version,
                read_only,
                read_set: HashSet::new(),
            },
        );
        handle
    }

    /// Snapshot version of an open transaction, recording `reads`
    pub fn read(&mut self, handle: &TransactionHandle, reads: impl IntoIterator<Item = Key>) -> Result<i64> {
        let tx = self.open.get_mut(handle).ok_or_else(|| unknown(handle))?;
        tx.read_set.extend(reads);
        Ok(tx.snapshot_version)
    }

    /// Close a transaction and hand back its record
    pub fn finish(&mut self, handle: &TransactionHandle) -> Result<OpenTransaction> {
        self.open.remove(handle).ok_or_else(|| unknown(handle))
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }
}

fn unknown(handle: &TransactionHandle) -> Error {
    RpcStatus::new(
        RpcStatus::INVALID_ARGUMENT,
        format!("unknown or finished transaction {:?}", handle),
    )
    .into_error()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_unique() {
        let mut registry = TransactionRegistry::default();
        let a = registry.begin(1, false);
        let b = registry.begin(1, false);
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_read_records_keys_and_finish_closes() {
        let mut registry = TransactionRegistry::default();
        let handle = registry.begin(7, true);
        assert_eq!(registry.read(&handle, vec![Key::new("Task", 1)]).unwrap(), 7);

        let tx = registry.finish(&handle).unwrap();
        assert!(tx.read_only);
        assert!(tx.read_set.contains(&Key::new("Task", 1)));
        assert!(registry.is_empty());
        assert!(matches!(registry.finish(&handle), Err(Error::Transport(_))));
    }
}
