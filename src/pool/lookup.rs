use super::local::AccountSet;
use crate::{
    config::TX_SLOT_SIZE,
    traits::{PoolTransaction, TxHash},
};
use alloy_primitives::U256;
use metrics::{register_gauge, Gauge};
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc};
use tracing::error;

/// Number of slots a single transaction occupies.
pub(crate) fn num_slots<T: PoolTransaction>(tx: &T) -> usize {
    (tx.size() + TX_SLOT_SIZE - 1) / TX_SLOT_SIZE
}

struct LookupInner<T> {
    slots: usize,
    locals: HashMap<TxHash, Arc<T>>,
    remotes: HashMap<TxHash, Arc<T>>,
}

/// Hash to transaction index over everything the pool tracks.
///
/// The index takes its own read-write lock so `get`/`has` style access can
/// peek into the pool without acquiring the widely scoped coordinator lock.
/// Entries are partitioned into locals and remotes so the priced view can
/// enumerate the remote half cheaply.
///
/// Its contents are tightly coupled to the pool's internal bookkeeping: no
/// code outside the pool may mutate it.
pub(crate) struct TxLookup<T> {
    inner: RwLock<LookupInner<T>>,
    slots_gauge: Gauge,
}

impl<T: PoolTransaction> TxLookup<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: RwLock::new(LookupInner {
                slots: 0,
                locals: HashMap::new(),
                remotes: HashMap::new(),
            }),
            slots_gauge: register_gauge!("transaction_pool.slots"),
        }
    }

    /// Returns a transaction if it exists in the lookup.
    pub(crate) fn get(&self, hash: &TxHash) -> Option<Arc<T>> {
        let inner = self.inner.read();
        inner.locals.get(hash).or_else(|| inner.remotes.get(hash)).cloned()
    }

    /// Returns a transaction if it exists in the remote partition.
    pub(crate) fn get_remote(&self, hash: &TxHash) -> Option<Arc<T>> {
        self.inner.read().remotes.get(hash).cloned()
    }

    pub(crate) fn contains(&self, hash: &TxHash) -> bool {
        let inner = self.inner.read();
        inner.locals.contains_key(hash) || inner.remotes.contains_key(hash)
    }

    /// The current number of transactions in the lookup.
    pub(crate) fn count(&self) -> usize {
        let inner = self.inner.read();
        inner.locals.len() + inner.remotes.len()
    }

    /// The current number of local transactions in the lookup.
    pub(crate) fn local_count(&self) -> usize {
        self.inner.read().locals.len()
    }

    /// The current number of remote transactions in the lookup.
    pub(crate) fn remote_count(&self) -> usize {
        self.inner.read().remotes.len()
    }

    /// The current number of capacity slots in use.
    pub(crate) fn slots(&self) -> usize {
        self.inner.read().slots
    }

    /// Adds a transaction to the lookup.
    pub(crate) fn add(&self, tx: Arc<T>, local: bool) {
        let mut inner = self.inner.write();
        inner.slots += num_slots(&*tx);
        self.slots_gauge.set(inner.slots as f64);
        if local {
            inner.locals.insert(tx.hash(), tx);
        } else {
            inner.remotes.insert(tx.hash(), tx);
        }
    }

    /// Removes a transaction from the lookup, returning it if it was tracked.
    pub(crate) fn remove(&self, hash: &TxHash) -> Option<Arc<T>> {
        let mut inner = self.inner.write();
        let tx = match inner.locals.remove(hash).or_else(|| inner.remotes.remove(hash)) {
            Some(tx) => tx,
            None => {
                error!(target: "txpool", ?hash, "No transaction found to be deleted");
                return None
            }
        };
        inner.slots -= num_slots(&*tx);
        self.slots_gauge.set(inner.slots as f64);
        Some(tx)
    }

    /// Migrates remote transactions whose sender joined the locals set,
    /// returning how many moved over.
    pub(crate) fn remote_to_locals(&self, locals: &AccountSet) -> usize {
        let mut inner = self.inner.write();
        let migrate = inner
            .remotes
            .iter()
            .filter(|(_, tx)| locals.contains_tx(&***tx))
            .map(|(hash, _)| *hash)
            .collect::<Vec<_>>();
        for hash in &migrate {
            if let Some(tx) = inner.remotes.remove(hash) {
                inner.locals.insert(*hash, tx);
            }
        }
        migrate.len()
    }

    /// Finds all remote transactions below the given tip threshold.
    pub(crate) fn remotes_below_tip(&self, threshold: &U256) -> Vec<Arc<T>> {
        let mut found = Vec::with_capacity(128);
        // Only iterate remotes
        self.range(
            |_, tx, _| {
                if tx.gas_price() < *threshold {
                    found.push(tx.clone());
                }
                true
            },
            false,
            true,
        );
        found
    }

    /// Calls `f` on each entry of the selected partitions until it returns
    /// `false`. The callback also receives whether the entry is local.
    pub(crate) fn range(
        &self,
        mut f: impl FnMut(&TxHash, &Arc<T>, bool) -> bool,
        locals: bool,
        remotes: bool,
    ) {
        let inner = self.inner.read();
        if locals {
            for (hash, tx) in &inner.locals {
                if !f(hash, tx, true) {
                    return
                }
            }
        }
        if remotes {
            for (hash, tx) in &inner.remotes {
                if !f(hash, tx, false) {
                    return
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockTransaction;
    use alloy_primitives::Address;

    #[test]
    fn add_and_remove_track_slots() {
        let lookup = TxLookup::new();
        let small = Arc::new(MockTransaction::new(Address::random(), 0).with_size(100));
        let large =
            Arc::new(MockTransaction::new(Address::random(), 0).with_size(TX_SLOT_SIZE + 1));
        lookup.add(small.clone(), true);
        lookup.add(large.clone(), false);

        assert_eq!(lookup.count(), 2);
        assert_eq!(lookup.local_count(), 1);
        assert_eq!(lookup.remote_count(), 1);
        assert_eq!(lookup.slots(), 3);
        assert!(lookup.contains(&small.hash()));
        assert!(lookup.get_remote(&small.hash()).is_none());
        assert!(lookup.get_remote(&large.hash()).is_some());

        lookup.remove(&large.hash());
        assert_eq!(lookup.slots(), 1);
        assert_eq!(lookup.count(), 1);
        assert!(lookup.remove(&large.hash()).is_none());
    }

    #[test]
    fn remote_to_locals_migrates_matching_senders() {
        let lookup = TxLookup::new();
        let sender = Address::random();
        let mine = Arc::new(MockTransaction::new(sender, 0));
        let other = Arc::new(MockTransaction::new(Address::random(), 0));
        lookup.add(mine.clone(), false);
        lookup.add(other.clone(), false);

        let mut locals = AccountSet::new();
        locals.add(sender);
        assert_eq!(lookup.remote_to_locals(&locals), 1);
        assert_eq!(lookup.local_count(), 1);
        assert!(lookup.get_remote(&mine.hash()).is_none());
        assert!(lookup.get_remote(&other.hash()).is_some());
    }

    #[test]
    fn remotes_below_tip_ignores_locals() {
        let lookup = TxLookup::new();
        let cheap_remote = Arc::new(MockTransaction::new(Address::random(), 0).with_gas_price(5));
        let cheap_local = Arc::new(MockTransaction::new(Address::random(), 0).with_gas_price(5));
        let priced_remote =
            Arc::new(MockTransaction::new(Address::random(), 0).with_gas_price(50));
        lookup.add(cheap_remote.clone(), false);
        lookup.add(cheap_local, true);
        lookup.add(priced_remote, false);

        let below = lookup.remotes_below_tip(&U256::from(10));
        assert_eq!(below.len(), 1);
        assert_eq!(below[0].hash(), cheap_remote.hash());
    }
}
