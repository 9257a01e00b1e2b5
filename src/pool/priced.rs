use super::lookup::{num_slots, TxLookup};
use crate::traits::PoolTransaction;
use alloy_primitives::U256;
use metrics::{register_histogram, Histogram};
use parking_lot::Mutex;
use std::{
    cmp::Ordering,
    collections::BinaryHeap,
    sync::{
        atomic::{AtomicI64, Ordering as AtomicOrdering},
        Arc,
    },
    time::Instant,
};

/// urgent : floating is the capacity ratio of the two heaps
const URGENT_RATIO: usize = 4;
const FLOATING_RATIO: usize = 1;

/// Effective tip of a transaction under the given base fee, or the raw gas
/// price when the chain does not price by base fee.
pub(crate) fn effective_gas_tip<T: PoolTransaction>(tx: &T, base_fee: Option<U256>) -> U256 {
    match base_fee {
        Some(fee) => tx.gas_price().saturating_sub(fee),
        None => tx.gas_price(),
    }
}

/// One price point tracked by the heaps.
///
/// The score is computed when the entry is pushed: the effective tip under
/// the base fee of that moment for the urgent heap, the raw gas price for the
/// floating heap. Changing the base fee therefore forces a reheap.
struct PricedEntry<T> {
    score: U256,
    nonce: u64,
    seq: u64,
    tx: Arc<T>,
}

impl<T> Ord for PricedEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // The binary heap pops its greatest entry, so order entries such that
        // the cheapest comes out first. On equal score the higher nonce goes
        // first: evicting the later transaction of a sender keeps the
        // executable prefix intact. The sequence number is the final,
        // deterministic tie break.
        other
            .score
            .cmp(&self.score)
            .then(self.nonce.cmp(&other.nonce))
            .then(self.seq.cmp(&other.seq))
    }
}

impl<T> PartialOrd for PricedEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> PartialEq for PricedEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for PricedEntry<T> {}

struct Heaps<T> {
    urgent: BinaryHeap<PricedEntry<T>>,
    floating: BinaryHeap<PricedEntry<T>>,
    base_fee: Option<U256>,
    seq: u64,
}

impl<T: PoolTransaction> Heaps<T> {
    fn next_entry(&mut self, score: U256, tx: Arc<T>) -> PricedEntry<T> {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        PricedEntry { score, nonce: tx.nonce(), seq, tx }
    }
}

/// Price-sorted view over the remote transactions of the pool, used to answer
/// which transaction is currently the worst and to make room under pressure.
///
/// Two heaps are used: the urgent heap (scored by effective tip under the
/// current base fee) and the floating heap (scored by raw gas price). New
/// remote transactions enter the urgent heap; [`discard`](PricedList::discard)
/// balances the heaps towards a 4:1 ratio by demoting urgent entries into the
/// floating heap and only ever drops from the floating side.
///
/// Entries are not removed here when the pool drops a transaction elsewhere.
/// Instead a stale counter accumulates and heap tops that no longer resolve in
/// the remote partition of the lookup are skipped lazily; once more than a
/// quarter of the tracked entries are stale the heaps are rebuilt from
/// scratch.
pub(crate) struct PricedList<T> {
    /// Number of stale price points (re-heap trigger).
    stales: AtomicI64,
    /// The set of all transactions; only its remote half is tracked here.
    all: Arc<TxLookup<T>>,
    heaps: Mutex<Heaps<T>>,
    reheap_duration: Histogram,
}

impl<T: PoolTransaction> PricedList<T> {
    pub(crate) fn new(all: Arc<TxLookup<T>>) -> Self {
        Self {
            stales: AtomicI64::new(0),
            all,
            heaps: Mutex::new(Heaps {
                urgent: BinaryHeap::new(),
                floating: BinaryHeap::new(),
                base_fee: None,
                seq: 0,
            }),
            reheap_duration: register_histogram!("transaction_pool.reheap_duration"),
        }
    }

    /// Inserts a new transaction into the urgent heap. Local transactions are
    /// not tracked at all; they are never eviction candidates.
    pub(crate) fn put(&self, tx: &Arc<T>, local: bool) {
        if local {
            return
        }
        let mut heaps = self.heaps.lock();
        let score = effective_gas_tip(&**tx, heaps.base_fee);
        let entry = heaps.next_entry(score, tx.clone());
        heaps.urgent.push(entry);
    }

    /// Notifies the priced list that transactions dropped from the pool
    /// elsewhere. The list keeps a counter of stale entries and rebuilds the
    /// heaps once enough of them went stale.
    pub(crate) fn removed(&self, count: usize) {
        let stales = self.stales.fetch_add(count as i64, AtomicOrdering::Relaxed) + count as i64;
        let mut heaps = self.heaps.lock();
        if stales <= ((heaps.urgent.len() + heaps.floating.len()) / 4) as i64 {
            return
        }
        self.reheap_locked(&mut heaps);
    }

    /// Checks whether a transaction is cheaper than (or as cheap as) the
    /// lowest priced remote transaction currently being tracked.
    ///
    /// With two heaps, being underpriced means being no better than the worst
    /// item of every non-empty heap. When both heaps are empty nothing is
    /// underpriced: there are no remotes to make room from, and the caller's
    /// capacity checks decide instead.
    pub(crate) fn underpriced(&self, tx: &T) -> bool {
        let mut heaps = self.heaps.lock();
        let base_fee = heaps.base_fee;
        let urgent_under =
            self.underpriced_for(&mut heaps.urgent, effective_gas_tip(tx, base_fee));
        let floating_under = self.underpriced_for(&mut heaps.floating, tx.gas_price());
        (urgent_under || heaps.urgent.is_empty()) &&
            (floating_under || heaps.floating.is_empty()) &&
            (!heaps.urgent.is_empty() || !heaps.floating.is_empty())
    }

    /// Checks the given heap's cheapest live entry against the given score.
    fn underpriced_for(&self, heap: &mut BinaryHeap<PricedEntry<T>>, score: U256) -> bool {
        // Discard stale price points if found at the heap start
        while let Some(head) = heap.peek() {
            if self.all.get_remote(&head.tx.hash()).is_none() {
                // removed or migrated
                self.stales.fetch_sub(1, AtomicOrdering::Relaxed);
                heap.pop();
                continue
            }
            break
        }
        match heap.peek() {
            // there is no remote transaction at all
            None => false,
            Some(head) => head.score >= score,
        }
    }

    /// Finds enough of the most underpriced remote transactions to free the
    /// requested number of slots, removes them from the heaps and returns them
    /// for removal from the rest of the pool.
    ///
    /// Returns `None` without touching anything observable when the slots
    /// cannot be freed and `force` is not set; the drops are pushed back onto
    /// the urgent heap.
    pub(crate) fn discard(&self, slots: usize, force: bool) -> Option<Vec<Arc<T>>> {
        let mut heaps = self.heaps.lock();
        let mut drop = Vec::with_capacity(slots);
        let mut needed = slots as i64;
        while needed > 0 {
            if heaps.urgent.len() * FLOATING_RATIO > heaps.floating.len() * URGENT_RATIO {
                let Some(entry) = heaps.urgent.pop() else { break };
                if self.all.get_remote(&entry.tx.hash()).is_none() {
                    // stale entry found during cleanup
                    self.stales.fetch_sub(1, AtomicOrdering::Relaxed);
                    continue
                }
                // non stale transaction found, demote it into the floating heap
                let score = entry.tx.gas_price();
                let demoted = heaps.next_entry(score, entry.tx);
                heaps.floating.push(demoted);
            } else {
                // stop if both heaps are drained
                let Some(entry) = heaps.floating.pop() else { break };
                if self.all.get_remote(&entry.tx.hash()).is_none() {
                    self.stales.fetch_sub(1, AtomicOrdering::Relaxed);
                    continue
                }
                // non stale transaction found, discard it
                needed -= num_slots(&*entry.tx) as i64;
                drop.push(entry.tx);
            }
        }
        // If we still can't make enough room for the new transaction
        if needed > 0 && !force {
            for tx in drop {
                let score = effective_gas_tip(&*tx, heaps.base_fee);
                let entry = heaps.next_entry(score, tx);
                heaps.urgent.push(entry);
            }
            return None
        }
        Some(drop)
    }

    /// Pushes previously discarded transactions back onto the urgent heap;
    /// used when the caller decided not to go through with their eviction.
    pub(crate) fn reinstate(&self, txs: &[Arc<T>]) {
        let mut heaps = self.heaps.lock();
        for tx in txs {
            let score = effective_gas_tip(&**tx, heaps.base_fee);
            let entry = heaps.next_entry(score, tx.clone());
            heaps.urgent.push(entry);
        }
    }

    /// Forcibly rebuilds the heaps from the current remote transaction set.
    pub(crate) fn reheap(&self) {
        let mut heaps = self.heaps.lock();
        self.reheap_locked(&mut heaps);
    }

    fn reheap_locked(&self, heaps: &mut Heaps<T>) {
        let start = Instant::now();
        self.stales.store(0, AtomicOrdering::Relaxed);

        let mut remotes = Vec::with_capacity(self.all.remote_count());
        // Only iterate remotes
        self.all.range(
            |_, tx, _| {
                remotes.push(tx.clone());
                true
            },
            false,
            true,
        );
        let base_fee = heaps.base_fee;
        let entries = remotes
            .into_iter()
            .map(|tx| {
                let score = effective_gas_tip(&*tx, base_fee);
                heaps.next_entry(score, tx)
            })
            .collect::<Vec<_>>();
        heaps.urgent = BinaryHeap::from(entries);

        // balance out the two heaps by moving the worse fifth of transactions
        // into the floating heap
        let floating_count = heaps.urgent.len() * FLOATING_RATIO / (URGENT_RATIO + FLOATING_RATIO);
        let mut floating = Vec::with_capacity(floating_count);
        for _ in 0..floating_count {
            let Some(entry) = heaps.urgent.pop() else { break };
            let score = entry.tx.gas_price();
            floating.push(heaps.next_entry(score, entry.tx));
        }
        heaps.floating = BinaryHeap::from(floating);

        self.reheap_duration.record(start.elapsed().as_secs_f64());
    }

    /// Updates the base fee the urgent heap scores by and triggers a reheap.
    pub(crate) fn set_base_fee(&self, base_fee: U256) {
        let mut heaps = self.heaps.lock();
        heaps.base_fee = Some(base_fee);
        self.reheap_locked(&mut heaps);
    }

    #[cfg(test)]
    pub(crate) fn stales(&self) -> i64 {
        self.stales.load(AtomicOrdering::Relaxed)
    }

    /// The cheapest live entry of the urgent heap, by effective tip.
    #[cfg(test)]
    pub(crate) fn urgent_head(&self) -> Option<Arc<T>> {
        let mut heaps = self.heaps.lock();
        while let Some(head) = heaps.urgent.peek() {
            if self.all.get_remote(&head.tx.hash()).is_none() {
                heaps.urgent.pop();
                continue
            }
            return Some(head.tx.clone())
        }
        None
    }
}
