use crate::traits::PoolTransaction;
use alloy_primitives::U256;
use std::{collections::BTreeMap, sync::Arc};

/// Nonce-indexed container for a single sender's transactions.
///
/// The same structure backs both the strictly continuous pending lists and the
/// gapped queue lists; strictness is enforced one level up in
/// [`TxList`](super::list::TxList). The ordered map gives logarithmic access
/// to the nonce extrema and in-order iteration for flattening.
pub(crate) struct TxSortedMap<T> {
    items: BTreeMap<u64, Arc<T>>,
}

impl<T> Default for TxSortedMap<T> {
    fn default() -> Self {
        Self { items: BTreeMap::new() }
    }
}

impl<T: PoolTransaction> TxSortedMap<T> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Stores the transaction under its nonce, replacing any previous entry.
    pub(crate) fn put(&mut self, tx: Arc<T>) {
        self.items.insert(tx.nonce(), tx);
    }

    pub(crate) fn get(&self, nonce: u64) -> Option<&Arc<T>> {
        self.items.get(&nonce)
    }

    pub(crate) fn get_cost(&self, nonce: u64) -> Option<U256> {
        self.items.get(&nonce).map(|tx| tx.cost())
    }

    /// Deletes the transaction with the given nonce, reporting whether one was
    /// present.
    pub(crate) fn remove(&mut self, nonce: u64) -> bool {
        self.items.remove(&nonce).is_some()
    }

    /// Removes and returns all transactions with a nonce lower than the
    /// provided threshold, in ascending nonce order.
    pub(crate) fn forward(&mut self, threshold: u64) -> Vec<Arc<T>> {
        let keep = self.items.split_off(&threshold);
        std::mem::replace(&mut self.items, keep).into_values().collect()
    }

    /// Removes and returns every transaction the predicate matches. Callers
    /// must not assume any ordering of the result.
    pub(crate) fn filter(&mut self, mut predicate: impl FnMut(&T) -> bool) -> Vec<Arc<T>> {
        let mut removed = Vec::new();
        self.items.retain(|_, tx| {
            if predicate(tx) {
                removed.push(tx.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Places a hard limit on the number of items, returning all transactions
    /// exceeding that limit. The highest nonces are dropped first.
    pub(crate) fn cap(&mut self, threshold: usize) -> Vec<Arc<T>> {
        if self.items.len() <= threshold {
            return Vec::new()
        }
        let mut removed = Vec::new();
        while self.items.len() > threshold {
            match self.items.pop_last() {
                Some((_, tx)) => removed.push(tx),
                None => break,
            }
        }
        removed
    }

    /// Pops a sequentially increasing run of transactions starting at the
    /// provided nonce as long as the cumulative cost stays within the balance.
    ///
    /// `start` is the virtual nonce of the account, not necessarily the first
    /// nonce stored here. Entries with nonces lower than `start` are returned
    /// as well rather than left to linger in a broken state.
    pub(crate) fn ready(&mut self, start: u64, balance: &U256) -> Vec<Arc<T>> {
        let mut ready = Vec::new();
        let mut expected = match self.items.first_key_value() {
            Some((&lowest, _)) if lowest <= start => lowest,
            _ => return ready,
        };
        let mut total = U256::ZERO;
        while let Some(entry) = self.items.first_entry() {
            if *entry.key() != expected {
                break
            }
            let cumulative = total.saturating_add(entry.get().cost());
            if cumulative > *balance {
                break
            }
            total = cumulative;
            ready.push(entry.remove());
            expected += 1;
        }
        ready
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The lowest stored nonce, if any.
    pub(crate) fn smallest(&self) -> Option<u64> {
        self.items.first_key_value().map(|(&nonce, _)| nonce)
    }

    /// The transaction with the highest nonce, if any.
    pub(crate) fn last_element(&self) -> Option<&Arc<T>> {
        self.items.last_key_value().map(|(_, tx)| tx)
    }

    /// Creates a nonce-sorted slice of the current transactions.
    pub(crate) fn flatten(&self) -> Vec<Arc<T>> {
        self.items.values().cloned().collect()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&u64, &Arc<T>)> {
        self.items.iter()
    }
}
