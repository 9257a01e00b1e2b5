use super::nonce_map::TxSortedMap;
use crate::traits::PoolTransaction;
use alloy_primitives::U256;
use std::sync::Arc;

/// A list of transactions belonging to one account, sorted by nonce.
///
/// The same type serves both halves of the pool: in strict mode it holds the
/// contiguous executable transactions of the pending set, in non-strict mode
/// the gapped transactions of the queue.
pub(crate) struct TxList<T> {
    /// Whether nonces are strictly continuous or not.
    strict: bool,
    txs: TxSortedMap<T>,
    /// Cost of the highest costing transaction. Only lowered when it exceeds
    /// the balance.
    costcap: U256,
    /// Gas limit of the highest spending transaction. Only lowered when it
    /// exceeds the block limit.
    gascap: u64,
}

impl<T: PoolTransaction> TxList<T> {
    pub(crate) fn new(strict: bool) -> Self {
        Self { strict, txs: TxSortedMap::new(), costcap: U256::ZERO, gascap: 0 }
    }

    /// Whether the list holds a transaction with the given nonce.
    pub(crate) fn contains(&self, nonce: u64) -> bool {
        self.txs.get(nonce).is_some()
    }

    pub(crate) fn get(&self, nonce: u64) -> Option<&Arc<T>> {
        self.txs.get(nonce)
    }

    pub(crate) fn get_cost(&self, nonce: u64) -> Option<U256> {
        self.txs.get_cost(nonce)
    }

    /// Tries to insert a new transaction, returning whether it was accepted
    /// and, if so, any previous transaction it replaced.
    ///
    /// A replacement must exceed the displaced entry's price by at least
    /// `price_bump` percent; anything cheaper is rejected without touching the
    /// list.
    pub(crate) fn add(&mut self, tx: Arc<T>, price_bump: u64) -> (bool, Option<Arc<T>>) {
        let old = self.txs.get(tx.nonce()).cloned();
        if let Some(old) = &old {
            let old_price = old.gas_price();
            let new_price = tx.gas_price();
            if old_price >= new_price {
                return (false, None)
            }
            // threshold = old_price * (100 + price_bump) / 100
            let threshold =
                old_price.saturating_mul(U256::from(100 + price_bump)) / U256::from(100);
            if new_price < threshold {
                return (false, None)
            }
        }
        if self.costcap < tx.cost() {
            self.costcap = tx.cost();
        }
        if self.gascap < tx.gas_limit() {
            self.gascap = tx.gas_limit();
        }
        self.txs.put(tx);
        (true, old)
    }

    /// Removes all transactions with a nonce lower than the threshold; see
    /// [`TxSortedMap::forward`].
    pub(crate) fn forward(&mut self, threshold: u64) -> Vec<Arc<T>> {
        self.txs.forward(threshold)
    }

    /// Removes all transactions whose cost or gas limit exceeds the given
    /// thresholds. The first result holds the removed transactions; in strict
    /// mode the second holds every transaction invalidated by the gap the
    /// removal tore open.
    ///
    /// The cached caps make the common no-change case a single comparison,
    /// which matters because this runs for every account on every head change.
    pub(crate) fn filter(
        &mut self,
        cost_limit: &U256,
        gas_limit: u64,
    ) -> (Vec<Arc<T>>, Vec<Arc<T>>) {
        // If all transactions are below the threshold, short circuit
        if self.costcap <= *cost_limit && self.gascap <= gas_limit {
            return (Vec::new(), Vec::new())
        }
        // Lower the caps to the thresholds
        self.costcap = *cost_limit;
        self.gascap = gas_limit;

        let removed =
            self.txs.filter(|tx| tx.gas_limit() > gas_limit || tx.cost() > *cost_limit);
        if removed.is_empty() {
            return (Vec::new(), Vec::new())
        }
        let mut invalids = Vec::new();
        // If the list was strict, filter anything above the lowest removed nonce
        if self.strict {
            let lowest = removed.iter().map(|tx| tx.nonce()).min().unwrap_or(u64::MAX);
            invalids = self.txs.filter(|tx| tx.nonce() > lowest);
        }
        (removed, invalids)
    }

    /// Places a hard limit on the number of items; see [`TxSortedMap::cap`].
    pub(crate) fn cap(&mut self, threshold: usize) -> Vec<Arc<T>> {
        self.txs.cap(threshold)
    }

    /// Removes every transaction with a nonce at or above the given cutoff.
    pub(crate) fn cut(&mut self, cutoff: u64) -> Vec<Arc<T>> {
        self.txs.filter(|tx| tx.nonce() >= cutoff)
    }

    /// Deletes the given transaction, returning whether it was found, plus any
    /// transactions invalidated by the deletion in strict mode.
    pub(crate) fn remove(&mut self, tx: &T) -> (bool, Vec<Arc<T>>) {
        let nonce = tx.nonce();
        if !self.txs.remove(nonce) {
            return (false, Vec::new())
        }
        if self.strict {
            return (true, self.txs.filter(|t| t.nonce() > nonce))
        }
        (true, Vec::new())
    }

    /// Pops the contiguous, affordable run of transactions starting at the
    /// given virtual nonce; see [`TxSortedMap::ready`].
    pub(crate) fn ready(&mut self, start: u64, balance: &U256) -> Vec<Arc<T>> {
        self.txs.ready(start, balance)
    }

    pub(crate) fn len(&self) -> usize {
        self.txs.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    /// The lowest stored nonce, if any.
    pub(crate) fn smallest(&self) -> Option<u64> {
        self.txs.smallest()
    }

    /// Nonce-sorted slice of the current transactions.
    pub(crate) fn flatten(&self) -> Vec<Arc<T>> {
        self.txs.flatten()
    }

    /// The transaction with the highest nonce, if any.
    pub(crate) fn last_element(&self) -> Option<&Arc<T>> {
        self.txs.last_element()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&u64, &Arc<T>)> {
        self.txs.iter()
    }
}
