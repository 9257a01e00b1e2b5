//! Transaction pool internals.
//!
//! The pool gathers all currently known transactions: they enter when they are
//! received from the network or submitted locally, and exit when they are
//! included in the chain or evicted. Two sets are maintained per account:
//!
//!  - _Pending_: transactions whose nonces form a gapless run from the
//!    account's state nonce and which the account can afford. These are
//!    executable on the current state and surfaced to block production.
//!  - _Queued_: transactions that are currently not executable, either because
//!    an earlier nonce is missing or because the account cannot fund them yet.
//!    They wait for state changes that eventually promote them into pending.
//!
//! The classification depends on the chain state, so every head change feeds a
//! reset through the maintenance loop: transactions mined on the abandoned
//! branch are re-injected, stale and unpayable entries are dropped, demoted
//! pending transactions move back into the queue and newly executable queued
//! transactions are promoted. A single background task serializes all of
//! these mutations; the hash index and the priced view carry their own locks
//! so plain lookups never wait on it.

pub(crate) mod list;
pub(crate) mod local;
pub(crate) mod lookup;
pub(crate) mod nonce_map;
pub(crate) mod noncer;
pub(crate) mod priced;

use self::{
    list::TxList,
    local::AccountSet,
    lookup::{num_slots, TxLookup},
    nonce_map::TxSortedMap,
    noncer::Noncer,
    priced::{effective_gas_tip, PricedList},
};
use crate::{
    config::{PoolConfig, TX_MAX_SIZE},
    error::{PoolError, PoolResult},
    journal::TxJournal,
    metrics::TxPoolMetrics,
    traits::{
        ChainBackend, Header, NewTxsEvent, PoolTransaction, StateView, TxHash, TxStatus,
    },
    validate::{validate_transaction, validate_transaction_with_state, ValidationOptions},
};
use alloy_primitives::{Address, U256};
use fnv::FnvHashMap;
use parking_lot::{Mutex, RwLock};
use std::{
    collections::{BinaryHeap, HashMap, HashSet},
    fmt,
    sync::Arc,
    time::Instant,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

/// Buffer size of the channels handed out by
/// [`subscribe_new_txs`](TxPool::subscribe_new_txs).
const NEW_TXS_LISTENER_BUFFER: usize = 1024;

/// Reorgs deeper than this are not replayed into the pool; they only happen
/// during initial sync or pathological resets and the transactions involved
/// are long stale.
const MAX_REORG_DEPTH: u64 = 64;

/// Requests processed by the pool's maintenance task.
pub(crate) enum PoolRequest<T> {
    /// The chain head moved; reset the pool from the old to the new head.
    Reset {
        /// Head the pool tracked so far.
        old: Option<Header>,
        /// New canonical head.
        new: Header,
    },
    /// Promote executable transactions of the given dirty accounts.
    Promote {
        /// Accounts that received new transactions.
        accounts: AccountSet,
    },
    /// A transaction entered the pending set directly and awaits publication.
    QueueEvent {
        /// The directly promoted transaction.
        tx: Arc<T>,
    },
    /// Barrier: acknowledged once every previously submitted request took
    /// effect.
    Sync {
        /// Acknowledgement channel.
        done: oneshot::Sender<()>,
    },
    /// Flush the journal and stop the maintenance task.
    Shutdown {
        /// Acknowledgement channel.
        done: oneshot::Sender<()>,
    },
}

/// Outcome of a single add, threaded back to the batching caller.
struct AddOutcome<T> {
    /// Whether the transaction displaced an already pooled one.
    replaced: bool,
    /// Set when the transaction went straight into the pending set.
    direct: Option<Arc<T>>,
}

/// Handle to the transaction pool: the staging area between transaction
/// ingress and block production.
///
/// Clones are cheap and share the same pool. The pool accepts candidate
/// transactions, validates them against static rules and the current chain
/// state, and keeps them in the pending or queued set until they are mined,
/// evicted or aged out. Spawn [`maintain_transaction_pool`][crate::maintain_transaction_pool]
/// to process head changes, promotions and the periodic upkeep.
pub struct TxPool<C: ChainBackend<T>, T: PoolTransaction> {
    pub(crate) inner: Arc<PoolInner<C, T>>,
}

impl<C: ChainBackend<T>, T: PoolTransaction> Clone for TxPool<C, T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<C: ChainBackend<T>, T: PoolTransaction> fmt::Debug for TxPool<C, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxPool").field("config", &self.inner.config).finish_non_exhaustive()
    }
}

/// Shared pool internals behind the [`TxPool`] handle.
pub(crate) struct PoolInner<C: ChainBackend<T>, T: PoolTransaction> {
    pub(crate) config: PoolConfig,
    pub(crate) chain: C,
    /// Minimum effective tip required of remote transactions.
    gas_tip: RwLock<U256>,
    /// All tracked transactions, readable without the coordinator lock.
    all: Arc<TxLookup<T>>,
    /// Price-sorted view over the remote transactions, for eviction decisions.
    priced: PricedList<T>,
    /// Coordinator-owned state, only written under this lock.
    pool: RwLock<PoolState<C::StateView, T>>,
    /// Listeners for transactions entering the pending set.
    listeners: Mutex<Vec<mpsc::Sender<NewTxsEvent<T>>>>,
    /// Producer half of the maintenance request channel.
    pub(crate) requests: mpsc::UnboundedSender<PoolRequest<T>>,
    /// Consumer half, claimed once by the maintenance task.
    pub(crate) request_rx: Mutex<Option<mpsc::UnboundedReceiver<PoolRequest<T>>>>,
    metrics: TxPoolMetrics,
}

/// The mutable heart of the pool, guarded by a single lock.
struct PoolState<S: StateView, T: PoolTransaction> {
    /// All currently processable transactions.
    pending: FnvHashMap<Address, TxList<T>>,
    /// Queued but non-processable transactions.
    queue: FnvHashMap<Address, TxList<T>>,
    /// Last heartbeat from each known account.
    beats: FnvHashMap<Address, Instant>,
    /// Pending state tracking virtual nonces.
    pending_nonces: Noncer<S>,
    /// Accounts exempt from the eviction rules.
    locals: AccountSet,
    /// Journal of local transactions to back up to disk.
    journal: Option<TxJournal<T>>,
    /// Head the pool currently mirrors.
    current_head: Header,
    /// State at the current head.
    current_state: S,
    /// Evictions performed since the last reorg run; throttles add-path churn.
    changes_since_reorg: usize,
}

impl<C: ChainBackend<T>, T: PoolTransaction> TxPool<C, T> {
    /// Creates a new transaction pool to gather, sort and filter inbound
    /// transactions.
    ///
    /// The pool mirrors the chain's current head right away and replays the
    /// local transaction journal, if one is configured. Chain head changes
    /// are only picked up once the maintenance task runs.
    pub fn new(config: PoolConfig, chain: C) -> PoolResult<Self> {
        // Sanitize the input to ensure no vulnerable gas prices are set
        let config = config.sanitize();

        let head = chain.current_head();
        let state = chain
            .state_at(head.state_root)
            .ok_or(PoolError::StateUnavailable(head.state_root))?;

        let mut locals = AccountSet::new();
        for addr in &config.locals {
            info!(target: "txpool", %addr, "Setting new local account");
            locals.add(*addr);
        }
        let journal = if !config.no_locals && !config.journal.is_empty() {
            Some(TxJournal::new(&config.journal))
        } else {
            None
        };

        let all = Arc::new(TxLookup::new());
        let priced = PricedList::new(Arc::clone(&all));
        if let Some(fee) = head.base_fee {
            priced.set_base_fee(fee);
        }
        let (requests, request_rx) = mpsc::unbounded_channel();

        let pool = PoolState {
            pending: FnvHashMap::default(),
            queue: FnvHashMap::default(),
            beats: FnvHashMap::default(),
            pending_nonces: Noncer::new(state.clone()),
            locals,
            journal,
            current_head: head,
            current_state: state,
            changes_since_reorg: 0,
        };
        let inner = Arc::new(PoolInner {
            gas_tip: RwLock::new(U256::from(config.price_limit)),
            config,
            chain,
            all,
            priced,
            pool: RwLock::new(pool),
            listeners: Mutex::new(Vec::new()),
            requests,
            request_rx: Mutex::new(Some(request_rx)),
            metrics: TxPoolMetrics::default(),
        });

        let pool = Self { inner };
        pool.load_journal();
        Ok(pool)
    }

    /// Replays the configured journal into the pool, then rotates it so it
    /// reflects what actually survived the replay.
    fn load_journal(&self) {
        // Take the journal out so the replayed adds don't try to append to it
        let journal = self.inner.pool.write().journal.take();
        let Some(mut journal) = journal else { return };

        if let Err(err) = journal.load(|txs| {
            self.add_txs(txs, true).into_iter().filter(Result::is_err).count()
        }) {
            warn!(target: "txpool", %err, "Failed to load transaction journal");
        }

        let mut pool = self.inner.pool.write();
        pool.journal = Some(journal);
        let locals = self.inner.local_txs_locked(&mut pool);
        if let Some(journal) = pool.journal.as_mut() {
            if let Err(err) = journal.rotate(locals) {
                warn!(target: "txpool", %err, "Failed to rotate transaction journal");
            }
        }
    }

    /// Returns the configuration the pool runs with.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Enqueues a single transaction received from the network.
    pub fn add_remote(&self, tx: T) -> PoolResult<()> {
        self.add_remotes(vec![tx]).pop().unwrap_or(Ok(()))
    }

    /// Enqueues a batch of transactions received from the network. Errors are
    /// reported per slot in the returned vector.
    pub fn add_remotes(&self, txs: Vec<T>) -> Vec<PoolResult<()>> {
        self.add_txs(txs, false)
    }

    /// Enqueues a single transaction submitted by this node's own user.
    pub fn add_local(&self, tx: T) -> PoolResult<()> {
        self.add_locals(vec![tx]).pop().unwrap_or(Ok(()))
    }

    /// Enqueues a batch of locally submitted transactions, marking their
    /// senders as exempt from eviction and journaling them to disk.
    pub fn add_locals(&self, txs: Vec<T>) -> Vec<PoolResult<()>> {
        self.add_txs(txs, !self.inner.config.no_locals)
    }

    /// Validates and admits a batch of transactions, then asks the
    /// maintenance task to promote whatever became executable.
    fn add_txs(&self, txs: Vec<T>, local: bool) -> Vec<PoolResult<()>> {
        let inner = &self.inner;
        // Filter out known transactions without obtaining the pool lock
        let mut results: Vec<Option<PoolError>> = Vec::with_capacity(txs.len());
        let mut news = Vec::new();
        for (i, tx) in txs.iter().enumerate() {
            if inner.all.contains(&tx.hash()) {
                inner.metrics.known_transactions.increment(1);
                results.push(Some(PoolError::AlreadyKnown));
            } else {
                results.push(None);
                news.push(i);
            }
        }
        if !news.is_empty() {
            let mut dirty = AccountSet::new();
            let mut direct = Vec::new();
            {
                let mut pool = inner.pool.write();
                for &i in &news {
                    match inner.add_locked(&mut pool, txs[i].clone(), local) {
                        Ok(outcome) => {
                            if !outcome.replaced {
                                dirty.add(txs[i].sender());
                            }
                            if let Some(tx) = outcome.direct {
                                direct.push(tx);
                            }
                        }
                        Err(err) => results[i] = Some(err),
                    }
                }
            }
            for tx in direct {
                let _ = inner.requests.send(PoolRequest::QueueEvent { tx });
            }
            if !dirty.is_empty() {
                let _ = inner.requests.send(PoolRequest::Promote { accounts: dirty });
            }
        }
        results.into_iter().map(|err| err.map_or(Ok(()), Err)).collect()
    }

    /// Returns a transaction if it is tracked by the pool.
    pub fn get(&self, hash: &TxHash) -> Option<Arc<T>> {
        self.inner.all.get(hash)
    }

    /// Whether the pool tracks a transaction with the given hash.
    pub fn contains(&self, hash: &TxHash) -> bool {
        self.inner.all.contains(hash)
    }

    /// Where the transaction with the given hash currently resides.
    pub fn status(&self, hash: &TxHash) -> TxStatus {
        let Some(tx) = self.inner.all.get(hash) else { return TxStatus::Unknown };
        let addr = tx.sender();
        let pool = self.inner.pool.read();
        let held = |list: Option<&TxList<T>>| {
            list.and_then(|list| list.get(tx.nonce())).map_or(false, |held| held.hash() == *hash)
        };
        if held(pool.pending.get(&addr)) {
            return TxStatus::Pending
        }
        if held(pool.queue.get(&addr)) {
            return TxStatus::Queued
        }
        TxStatus::Unknown
    }

    /// Snapshot of all executable transactions, grouped by sender in
    /// ascending nonce order.
    ///
    /// With `enforce_tips` set, non-local runs are cut at the first
    /// transaction whose effective tip falls below the pool's floor, keeping
    /// the surfaced run contiguous.
    pub fn pending(&self, enforce_tips: bool) -> HashMap<Address, Vec<Arc<T>>> {
        let gas_tip = *self.inner.gas_tip.read();
        let pool = self.inner.pool.read();
        let base_fee = pool.current_head.base_fee;
        let mut pending = HashMap::with_capacity(pool.pending.len());
        for (addr, list) in pool.pending.iter() {
            let mut txs = list.flatten();
            if enforce_tips && !pool.locals.contains(addr) {
                if let Some(cut) =
                    txs.iter().position(|tx| effective_gas_tip(&**tx, base_fee) < gas_tip)
                {
                    txs.truncate(cut);
                }
            }
            if !txs.is_empty() {
                pending.insert(*addr, txs);
            }
        }
        pending
    }

    /// Current number of (pending, queued) transactions.
    pub fn stats(&self) -> (usize, usize) {
        let pool = self.inner.pool.read();
        let pending = pool.pending.values().map(|list| list.len()).sum();
        let queued = pool.queue.values().map(|list| list.len()).sum();
        (pending, queued)
    }

    /// The accounts currently treated as local.
    pub fn locals(&self) -> Vec<Address> {
        self.inner.pool.write().locals.flatten()
    }

    /// Updates the minimum tip required for pool inclusion, dropping all
    /// remote transactions below the new threshold.
    pub fn set_gas_tip(&self, tip: U256) {
        let mut pool = self.inner.pool.write();
        let old = {
            let mut gas_tip = self.inner.gas_tip.write();
            std::mem::replace(&mut *gas_tip, tip)
        };
        // If the min miner fee increased, remove transactions below the new threshold
        if tip > old {
            let drops = self.inner.all.remotes_below_tip(&tip);
            for tx in &drops {
                self.inner.remove_tx_locked(&mut pool, tx.hash(), false);
            }
            self.inner.priced.removed(drops.len());
        }
        info!(target: "txpool", %tip, "Transaction pool tip threshold updated");
    }

    /// Subscribes to the transactions entering the pending set.
    pub fn subscribe_new_txs(&self) -> mpsc::Receiver<NewTxsEvent<T>> {
        let (sender, rx) = mpsc::channel(NEW_TXS_LISTENER_BUFFER);
        self.inner.listeners.lock().push(sender);
        rx
    }

    /// Waits until every request submitted before this call has been
    /// processed by the maintenance task. A barrier for tests and callers
    /// that need read-your-writes promotion.
    pub async fn sync(&self) {
        let (done, wait) = oneshot::channel();
        if self.inner.requests.send(PoolRequest::Sync { done }).is_err() {
            return
        }
        let _ = wait.await;
    }

    /// Terminates the maintenance task, flushes the journal and drops all
    /// event subscriptions.
    pub async fn close(&self) {
        // Without a running maintenance task the shutdown happens inline
        if self.inner.request_rx.lock().is_some() {
            self.inner.shutdown();
            return
        }
        let (done, wait) = oneshot::channel();
        if self.inner.requests.send(PoolRequest::Shutdown { done }).is_ok() && wait.await.is_ok() {
            return
        }
        self.inner.shutdown();
    }
}

impl<C: ChainBackend<T>, T: PoolTransaction> PoolInner<C, T> {
    /// Validates a transaction and admits it into the pool: straight into the
    /// pending set when it continues the sender's executable run, into the
    /// queue otherwise. Requires the pool lock.
    fn add_locked(
        &self,
        pool: &mut PoolState<C::StateView, T>,
        tx: T,
        local: bool,
    ) -> PoolResult<AddOutcome<T>> {
        // If the transaction is already known, discard it
        let hash = tx.hash();
        if self.all.contains(&hash) {
            trace!(target: "txpool", ?hash, "Discarding already known transaction");
            self.metrics.known_transactions.increment(1);
            return Err(PoolError::AlreadyKnown)
        }
        // Make the local flag. If it's from local source or it's from the network but
        // the sender is marked as local previously, treat it as the local transaction.
        let is_local = local || pool.locals.contains_tx(&tx);

        // If the transaction fails basic validation, discard it
        if let Err(err) = self.validate_tx_locked(pool, &tx, is_local) {
            trace!(target: "txpool", ?hash, %err, "Discarding invalid transaction");
            self.metrics.invalid_transactions.increment(1);
            return Err(err)
        }
        let tx = Arc::new(tx);
        let from = tx.sender();

        // If the transaction pool is full, discard underpriced transactions
        if self.all.slots() + num_slots(&*tx) >
            (self.config.global_slots + self.config.global_queue) as usize
        {
            // If the new transaction is underpriced, don't accept it
            if !is_local && self.priced.underpriced(&*tx) {
                trace!(target: "txpool", ?hash, price = %tx.gas_price(), "Discarding underpriced transaction");
                self.metrics.underpriced_transactions.increment(1);
                return Err(PoolError::Underpriced)
            }

            // We're about to replace a transaction. The reorg does a more thorough
            // analysis of what to remove and how, but it runs async. We don't want to
            // overload it by creating a gap in the meantime, so we only allow a
            // bounded number of changes between runs.
            if pool.changes_since_reorg > (self.config.global_slots / 4) as usize {
                self.metrics.overflowed_transactions.increment(1);
                return Err(PoolError::TxPoolOverflow)
            }

            // New transaction is better than our worse ones, make room for it.
            // If it's a local transaction, forcibly discard all available transactions.
            // Otherwise if we can't make enough room for new one, abort the operation.
            let slack = self.all.slots() + num_slots(&*tx) -
                (self.config.global_slots + self.config.global_queue) as usize;
            let Some(drop) = self.priced.discard(slack, is_local) else {
                self.metrics.overflowed_transactions.increment(1);
                return Err(PoolError::TxPoolOverflow)
            };

            // A gapped transaction must never churn out transactions that are
            // already pending
            if !is_local && self.is_future_locked(pool, &from, &tx) {
                let replaces_pending = drop.iter().any(|dropped| {
                    pool.pending
                        .get(&dropped.sender())
                        .map_or(false, |list| list.contains(dropped.nonce()))
                });
                if replaces_pending {
                    self.priced.reinstate(&drop);
                    trace!(target: "txpool", ?hash, "Discarding future transaction replacing pending tx");
                    return Err(PoolError::FutureReplacePending)
                }
            }
            pool.changes_since_reorg += drop.len();

            // Kick out the underpriced remote transactions
            for dropped in &drop {
                trace!(target: "txpool", hash = ?dropped.hash(), price = %dropped.gas_price(), "Discarding freshly underpriced transaction");
                self.metrics.underpriced_transactions.increment(1);
                self.remove_tx_locked(pool, dropped.hash(), false);
            }
        }

        // Try to replace an existing transaction in the pending pool
        if pool.pending.get(&from).map_or(false, |list| list.contains(tx.nonce())) {
            // Nonce already pending, check if required price bump is met
            let (inserted, old) = match pool.pending.get_mut(&from) {
                Some(list) => list.add(tx.clone(), self.config.price_bump),
                None => (false, None),
            };
            if !inserted {
                self.metrics.pending_discards.increment(1);
                return Err(PoolError::ReplaceUnderpriced)
            }
            // New transaction is better, replace the old one
            if let Some(old) = old {
                self.all.remove(&old.hash());
                self.priced.removed(1);
                self.metrics.pending_replacements.increment(1);
            }
            self.all.add(tx.clone(), is_local);
            self.priced.put(&tx, is_local);
            self.journal_tx_locked(pool, &tx);
            pool.beats.insert(from, Instant::now());
            trace!(target: "txpool", ?hash, %from, "Pooled new executable transaction");
            return Ok(AddOutcome { replaced: true, direct: Some(tx) })
        }

        // The next expected nonce goes straight into the pending set
        if tx.nonce() == pool.pending_nonces.get(&from) {
            self.all.add(tx.clone(), is_local);
            self.priced.put(&tx, is_local);
            if !self.promote_tx_locked(pool, from, tx.clone()) {
                return Err(PoolError::ReplaceUnderpriced)
            }
            self.mark_local_locked(pool, local, from);
            self.journal_tx_locked(pool, &tx);
            trace!(target: "txpool", ?hash, %from, "Pooled new executable transaction");
            return Ok(AddOutcome { replaced: false, direct: Some(tx) })
        }

        // New transaction isn't replacing a pending one, push into queue
        let replaced = self.enqueue_tx_locked(pool, tx.clone(), is_local, true)?;

        // Mark local addresses and journal local transactions
        self.mark_local_locked(pool, local, from);
        self.journal_tx_locked(pool, &tx);
        trace!(target: "txpool", ?hash, %from, "Pooled new future transaction");
        Ok(AddOutcome { replaced, direct: None })
    }

    /// Registers a brand new local sender and migrates its already pooled
    /// remote transactions out of the eviction heaps.
    fn mark_local_locked(&self, pool: &mut PoolState<C::StateView, T>, local: bool, from: Address) {
        if !local || pool.locals.contains(&from) {
            return
        }
        info!(target: "txpool", %from, "Setting new local account");
        pool.locals.add(from);
        let migrated = self.all.remote_to_locals(&pool.locals);
        self.priced.removed(migrated);
    }

    /// Runs the static and stateful validation rules against a candidate.
    fn validate_tx_locked(
        &self,
        pool: &PoolState<C::StateView, T>,
        tx: &T,
        is_local: bool,
    ) -> PoolResult<()> {
        let opts = ValidationOptions {
            max_size: TX_MAX_SIZE,
            min_tip: if is_local { U256::ZERO } else { *self.gas_tip.read() },
        };
        validate_transaction(tx, &pool.current_head, &opts)?;
        validate_transaction_with_state(
            tx,
            &pool.current_state,
            None::<fn(&Address) -> u64>,
            |addr, nonce| {
                // Cumulative cost of everything pooled ahead of this nonce
                let mut spent = U256::ZERO;
                for list in [pool.pending.get(addr), pool.queue.get(addr)].into_iter().flatten() {
                    for (&pooled, pooled_tx) in list.iter() {
                        if pooled < nonce {
                            spent = spent.saturating_add(pooled_tx.cost());
                        }
                    }
                }
                spent
            },
            |addr, nonce| {
                pool.pending
                    .get(addr)
                    .and_then(|list| list.get_cost(nonce))
                    .or_else(|| pool.queue.get(addr).and_then(|list| list.get_cost(nonce)))
            },
        )
    }

    /// Whether the transaction would extend the sender's executable run or
    /// land beyond a gap.
    fn is_future_locked(
        &self,
        pool: &mut PoolState<C::StateView, T>,
        from: &Address,
        tx: &T,
    ) -> bool {
        match pool.pending.get(from) {
            Some(list) => {
                if list.contains(tx.nonce()) {
                    return false
                }
                match list.last_element() {
                    Some(last) => tx.nonce() != last.nonce() + 1,
                    None => true,
                }
            }
            None => pool.pending_nonces.get(from) != tx.nonce(),
        }
    }

    /// Inserts a new transaction into the non-executable queue.
    ///
    /// With `add_all` unset the transaction is only shuffled between the
    /// internal lists and must already be tracked by the lookup.
    fn enqueue_tx_locked(
        &self,
        pool: &mut PoolState<C::StateView, T>,
        tx: Arc<T>,
        is_local: bool,
        add_all: bool,
    ) -> PoolResult<bool> {
        let from = tx.sender();
        let hash = tx.hash();
        let list = pool.queue.entry(from).or_insert_with(|| TxList::new(false));
        let (inserted, old) = list.add(tx.clone(), self.config.price_bump);
        if !inserted {
            // An older transaction was better, discard this
            self.metrics.queued_discards.increment(1);
            return Err(PoolError::ReplaceUnderpriced)
        }
        let replaced = old.is_some();
        // Discard any previous transaction and mark this
        if let Some(old) = old {
            self.all.remove(&old.hash());
            self.priced.removed(1);
            self.metrics.queued_replacements.increment(1);
        }
        // If the transaction isn't in lookup set but it's expected to be there,
        // show the error log.
        if add_all {
            self.all.add(tx.clone(), is_local);
            self.priced.put(&tx, is_local);
        } else if !self.all.contains(&hash) {
            warn!(target: "txpool", ?hash, "Missing transaction in lookup set, please report the issue");
        }
        // If we never record the heartbeat, do it right now
        if !pool.beats.contains_key(&from) {
            pool.beats.insert(from, Instant::now());
        }
        Ok(replaced)
    }

    /// Moves a transaction into the pending list of the account, returning
    /// whether it was inserted or an older entry was better.
    fn promote_tx_locked(
        &self,
        pool: &mut PoolState<C::StateView, T>,
        addr: Address,
        tx: Arc<T>,
    ) -> bool {
        let hash = tx.hash();
        let nonce = tx.nonce();
        let list = pool.pending.entry(addr).or_insert_with(|| TxList::new(true));
        let (inserted, old) = list.add(tx, self.config.price_bump);
        if !inserted {
            // An older transaction was better, discard this
            self.all.remove(&hash);
            self.priced.removed(1);
            return false
        }
        // Otherwise discard any previous transaction and mark this
        if let Some(old) = old {
            self.all.remove(&old.hash());
            self.priced.removed(1);
        }
        // Set the potentially new pending nonce and refresh the heartbeat
        pool.pending_nonces.set(addr, nonce + 1);
        pool.beats.insert(addr, Instant::now());
        true
    }

    /// Removes a single transaction from the pool, moving all subsequent
    /// pending transactions of the account back into the queue.
    fn remove_tx_locked(
        &self,
        pool: &mut PoolState<C::StateView, T>,
        hash: TxHash,
        outofbound: bool,
    ) {
        // Fetch the transaction we wish to delete
        let Some(tx) = self.all.get(&hash) else { return };
        let addr = tx.sender();

        // Remove it from the list of known transactions
        self.all.remove(&hash);
        if outofbound {
            self.priced.removed(1);
        }
        // Remove the transaction from the pending lists and reset the account nonce
        if let Some((removed, invalids)) = pool.pending.get_mut(&addr).map(|list| list.remove(&tx))
        {
            if removed {
                // If no more pending transactions are left, remove the list
                if pool.pending.get(&addr).map_or(false, |list| list.is_empty()) {
                    pool.pending.remove(&addr);
                }
                // Postpone any invalidated transactions
                for invalid in invalids {
                    // Internal shuffle shouldn't touch the lookup set
                    let _ = self.enqueue_tx_locked(pool, invalid, false, false);
                }
                // Update the account nonce if needed
                pool.pending_nonces.set_if_lower(addr, tx.nonce());
                return
            }
        }
        // Transaction is in the future queue
        if let Some((removed, empty)) = pool.queue.get_mut(&addr).map(|list| {
            let (removed, _) = list.remove(&tx);
            (removed, list.is_empty())
        }) {
            if removed && empty {
                pool.queue.remove(&addr);
                pool.beats.remove(&addr);
            }
        }
    }

    /// Runs the accumulated reset, promotion and event work as a single pass.
    /// All mutations funnel through here, one batch at a time.
    pub(crate) fn run_reorg(
        &self,
        reset: Option<(Option<Header>, Header)>,
        dirty: Option<AccountSet>,
        mut events: HashMap<Address, TxSortedMap<T>>,
    ) {
        let mut promote_addrs = match (&reset, dirty) {
            (None, Some(mut dirty)) => dirty.flatten(),
            _ => Vec::new(),
        };
        let mut pool = self.pool.write();
        let mut injected = Vec::new();
        if let Some((old, new)) = &reset {
            // Reset from the old head to the new, rescheduling any reorged transactions
            injected = self.reset_locked(&mut pool, old.as_ref(), new);
            // Nonces were reset, discard any events that became stale
            events.retain(|addr, set| {
                set.forward(pool.pending_nonces.get(addr));
                !set.is_empty()
            });
            // Reset needs promote for all addresses
            promote_addrs = pool.queue.keys().copied().collect();
        }
        // Check for pending transactions for every account that sent new ones
        let promoted = self.promote_executables_locked(&mut pool, &promote_addrs);

        // If a new block appeared, validate the pool of pending transactions. This will
        // remove any transaction that has been included in the block or was invalidated
        // because of another transaction (e.g. higher gas price).
        if reset.is_some() {
            self.demote_unexecutables_locked(&mut pool);
            if let Some(fee) = pool.current_head.base_fee {
                self.priced.set_base_fee(fee);
            }
            // Update all accounts to the latest known pending nonce
            let mut nonces = FnvHashMap::default();
            for (addr, list) in pool.pending.iter() {
                if let Some(highest) = list.last_element() {
                    nonces.insert(*addr, highest.nonce() + 1);
                }
            }
            pool.pending_nonces.set_all(nonces);
        }
        // Ensure pool.queue and pool.pending sizes stay within the configured limits.
        self.truncate_pending_locked(&mut pool);
        self.truncate_queue_locked(&mut pool);

        pool.changes_since_reorg = 0;
        drop(pool);

        // Notify subsystems for the newly added transactions
        for tx in promoted.into_iter().chain(injected) {
            events.entry(tx.sender()).or_default().put(tx);
        }
        if !events.is_empty() {
            let txs = events.into_values().flat_map(|set| set.flatten()).collect::<Vec<_>>();
            self.notify_new_txs(txs);
        }
    }

    /// (Re)sets the state of the pool to the new head of the chain and
    /// re-injects any transactions dropped along the abandoned branch.
    /// Returns the re-injections that went straight back into pending.
    fn reset_locked(
        &self,
        pool: &mut PoolState<C::StateView, T>,
        old_head: Option<&Header>,
        new_head: &Header,
    ) -> Vec<Arc<T>> {
        // If we're reorging an old state, reinject all dropped transactions
        let mut reinject = Vec::new();
        if let Some(old_head) = old_head {
            if old_head.hash != new_head.parent_hash {
                // If the reorg is too deep, avoid doing it (will happen during fast sync)
                let depth = old_head.number.abs_diff(new_head.number);
                if depth > MAX_REORG_DEPTH {
                    debug!(target: "txpool", depth, "Skipping deep transaction reorg");
                } else {
                    match self.reorged_transactions(old_head, new_head) {
                        Some(dropped) => reinject = dropped,
                        None => return Vec::new(),
                    }
                }
            }
        }
        // Initialize the internal state to the current head
        let Some(state) = self.chain.state_at(new_head.state_root) else {
            warn!(target: "txpool", root = ?new_head.state_root, "Failed to reset txpool state");
            return Vec::new()
        };
        pool.current_head = new_head.clone();
        pool.current_state = state.clone();
        pool.pending_nonces = Noncer::new(state);

        // Inject any transactions discarded due to reorgs
        debug!(target: "txpool", count = reinject.len(), "Reinjecting stale transactions");
        let mut injected = Vec::new();
        for tx in reinject {
            if let Ok(outcome) = self.add_locked(pool, tx, false) {
                if let Some(tx) = outcome.direct {
                    injected.push(tx);
                }
            }
        }
        injected
    }

    /// Walks the abandoned and the new branch down to their common ancestor
    /// and returns the transactions that were mined on the abandoned branch
    /// only. `None` means the walk failed and the reset must be abandoned.
    fn reorged_transactions(&self, old_head: &Header, new_head: &Header) -> Option<Vec<T>> {
        let mut rem = match self.chain.block(old_head.hash, old_head.number) {
            Some(block) => block,
            None => {
                // The reorg rewound above the pulled in blocks
                if new_head.number >= old_head.number {
                    warn!(target: "txpool", old = ?old_head.hash, "Transaction pool reset with missing old head");
                    return None
                }
                debug!(target: "txpool", old = old_head.number, new = new_head.number, "Skipped deep transaction reorg");
                return Some(Vec::new())
            }
        };
        let mut add = match self.chain.block(new_head.hash, new_head.number) {
            Some(block) => block,
            None => {
                warn!(target: "txpool", new = ?new_head.hash, "Transaction pool reset with missing new head");
                return None
            }
        };
        let mut discarded = Vec::new();
        let mut included = Vec::new();
        while rem.header.number > add.header.number {
            discarded.append(&mut rem.transactions);
            rem = match self
                .chain
                .block(rem.header.parent_hash, rem.header.number.saturating_sub(1))
            {
                Some(block) => block,
                None => {
                    warn!(target: "txpool", block = rem.header.number, "Unrooted old chain seen by tx pool");
                    return None
                }
            };
        }
        while add.header.number > rem.header.number {
            included.append(&mut add.transactions);
            add = match self
                .chain
                .block(add.header.parent_hash, add.header.number.saturating_sub(1))
            {
                Some(block) => block,
                None => {
                    warn!(target: "txpool", block = add.header.number, "Unrooted new chain seen by tx pool");
                    return None
                }
            };
        }
        while rem.header.hash != add.header.hash {
            discarded.append(&mut rem.transactions);
            rem = match self
                .chain
                .block(rem.header.parent_hash, rem.header.number.saturating_sub(1))
            {
                Some(block) => block,
                None => {
                    warn!(target: "txpool", block = rem.header.number, "Unrooted old chain seen by tx pool");
                    return None
                }
            };
            included.append(&mut add.transactions);
            add = match self
                .chain
                .block(add.header.parent_hash, add.header.number.saturating_sub(1))
            {
                Some(block) => block,
                None => {
                    warn!(target: "txpool", block = add.header.number, "Unrooted new chain seen by tx pool");
                    return None
                }
            };
        }
        Some(tx_difference(discarded, &included))
    }

    /// Moves transactions that have become processable from the future queue
    /// to the set of pending transactions.
    fn promote_executables_locked(
        &self,
        pool: &mut PoolState<C::StateView, T>,
        accounts: &[Address],
    ) -> Vec<Arc<T>> {
        // Track the promoted transactions to broadcast them at once
        let mut promoted = Vec::new();
        for addr in accounts {
            let state_nonce = pool.current_state.nonce(addr);
            let balance = pool.current_state.balance(addr);
            let gas_limit = pool.current_head.gas_limit;
            let (forwards, drops, readies) = match pool.queue.get_mut(addr) {
                Some(list) => {
                    // Drop all transactions that are deemed too old (low nonce)
                    let forwards = list.forward(state_nonce);
                    // Drop all transactions that are too costly (low balance or out of gas)
                    let (drops, _) = list.filter(&balance, gas_limit);
                    // Gather all executable transactions
                    let readies = list.ready(pool.pending_nonces.get(addr), &balance);
                    (forwards, drops, readies)
                }
                None => continue,
            };
            for tx in &forwards {
                self.all.remove(&tx.hash());
            }
            trace!(target: "txpool", count = forwards.len(), "Removed old queued transactions");
            for tx in &drops {
                self.all.remove(&tx.hash());
            }
            trace!(target: "txpool", count = drops.len(), "Removed unpayable queued transactions");
            self.priced.removed(forwards.len() + drops.len());

            // Promote the executable run into the pending set
            for tx in readies {
                let hash = tx.hash();
                if self.promote_tx_locked(pool, *addr, tx.clone()) {
                    trace!(target: "txpool", ?hash, "Promoting queued transaction");
                    promoted.push(tx);
                }
            }
            // Drop all transactions over the allowed queue limit
            if !pool.locals.contains(addr) {
                let caps = match pool.queue.get_mut(addr) {
                    Some(list) => list.cap(self.config.account_queue as usize),
                    None => Vec::new(),
                };
                for tx in &caps {
                    self.all.remove(&tx.hash());
                    trace!(target: "txpool", hash = ?tx.hash(), "Removed cap-exceeding queued transaction");
                }
                self.priced.removed(caps.len());
                self.metrics.queued_discards.increment(caps.len() as u64);
            }
            // Delete the entire queue entry if it became empty
            if pool.queue.get(addr).map_or(false, |list| list.is_empty()) {
                pool.queue.remove(addr);
                pool.beats.remove(addr);
            }
        }
        promoted
    }

    /// Removes invalidated and processed transactions from the pending lists;
    /// anything that became unexecutable is moved back into the future queue
    /// and anything no longer fundable is dropped outright.
    fn demote_unexecutables_locked(&self, pool: &mut PoolState<C::StateView, T>) {
        let addrs = pool.pending.keys().copied().collect::<Vec<_>>();
        for addr in addrs {
            let nonce = pool.current_state.nonce(&addr);
            let balance = pool.current_state.balance(&addr);
            let gas_limit = pool.current_head.gas_limit;
            let (olds, drops, invalids, unfunded, gapped) = {
                let Some(list) = pool.pending.get_mut(&addr) else { continue };
                // Drop all transactions that are deemed too old (low nonce)
                let olds = list.forward(nonce);
                // Drop all transactions that are too costly (low balance or out
                // of gas), and queue any invalids back for later
                let (drops, invalids) = list.filter(&balance, gas_limit);
                // Demote the tail the account can no longer fund cumulatively
                let mut unfunded = Vec::new();
                let mut total = U256::ZERO;
                let mut cut = None;
                for (&pooled, tx) in list.iter() {
                    total = total.saturating_add(tx.cost());
                    if total > balance {
                        cut = Some(pooled);
                        break
                    }
                }
                if let Some(cut) = cut {
                    unfunded = list.cut(cut);
                }
                // If there's a gap in front, postpone all transactions
                let mut gapped = Vec::new();
                if list.smallest().map_or(false, |lowest| lowest != nonce) {
                    gapped = list.cap(0);
                }
                (olds, drops, invalids, unfunded, gapped)
            };
            for tx in &olds {
                trace!(target: "txpool", hash = ?tx.hash(), "Removed old pending transaction");
                self.all.remove(&tx.hash());
            }
            for tx in &drops {
                trace!(target: "txpool", hash = ?tx.hash(), "Removed unpayable pending transaction");
                self.all.remove(&tx.hash());
            }
            self.priced.removed(olds.len() + drops.len());
            for tx in invalids {
                trace!(target: "txpool", hash = ?tx.hash(), "Demoting pending transaction");
                let _ = self.enqueue_tx_locked(pool, tx, false, false);
            }
            for tx in unfunded {
                trace!(target: "txpool", hash = ?tx.hash(), "Demoting unaffordable pending transaction");
                let _ = self.enqueue_tx_locked(pool, tx, false, false);
            }
            if !gapped.is_empty() {
                warn!(target: "txpool", count = gapped.len(), "Demoting invalidated transactions");
                for tx in gapped {
                    let _ = self.enqueue_tx_locked(pool, tx, false, false);
                }
            }
            // Delete the entire pending entry if it became empty
            if pool.pending.get(&addr).map_or(false, |list| list.is_empty()) {
                pool.pending.remove(&addr);
            }
        }
    }

    /// Shrinks the pending set back under the global limit, penalizing the
    /// accounts with the most transactions first so the pain spreads roughly
    /// evenly. Local accounts are spared.
    fn truncate_pending_locked(&self, pool: &mut PoolState<C::StateView, T>) {
        let mut pending: u64 = pool.pending.values().map(|list| list.len() as u64).sum();
        if pending <= self.config.global_slots {
            return
        }
        // Assemble a spam order to penalize large transactors first
        let mut spammers = BinaryHeap::new();
        for (addr, list) in pool.pending.iter() {
            // Only evict transactions from high rollers
            if !pool.locals.contains(addr) && list.len() as u64 > self.config.account_slots {
                spammers.push((list.len(), *addr));
            }
        }
        // Gradually drop transactions from offenders
        let mut offenders: Vec<Address> = Vec::new();
        while pending > self.config.global_slots && !spammers.is_empty() {
            // Retrieve the next offender
            let Some((_, offender)) = spammers.pop() else { break };
            offenders.push(offender);
            // Equalize balances until all the same or below threshold
            if offenders.len() > 1 {
                // Calculate the equalization threshold for all current offenders
                let threshold = pool.pending.get(&offender).map_or(0, |list| list.len());
                // Iteratively reduce all offenders until below limit or threshold reached
                while pending > self.config.global_slots &&
                    pool.pending
                        .get(&offenders[offenders.len() - 2])
                        .map_or(0, |list| list.len()) >
                        threshold
                {
                    for i in 0..offenders.len() - 1 {
                        let addr = offenders[i];
                        pending -= self.drop_one_pending_locked(pool, addr);
                    }
                }
            }
        }
        // If still above threshold, reduce to limit or min allowance
        if pending > self.config.global_slots && !offenders.is_empty() {
            while pending > self.config.global_slots &&
                pool.pending
                    .get(&offenders[offenders.len() - 1])
                    .map_or(0, |list| list.len() as u64) >
                    self.config.account_slots
            {
                for i in 0..offenders.len() {
                    let addr = offenders[i];
                    pending -= self.drop_one_pending_locked(pool, addr);
                }
            }
        }
    }

    /// Drops the highest-nonce pending transaction of the account, returning
    /// how many transactions went away.
    fn drop_one_pending_locked(&self, pool: &mut PoolState<C::StateView, T>, addr: Address) -> u64 {
        let caps = match pool.pending.get_mut(&addr) {
            Some(list) if !list.is_empty() => {
                let len = list.len();
                list.cap(len - 1)
            }
            _ => return 0,
        };
        for tx in &caps {
            self.all.remove(&tx.hash());
            // Update the account nonce to the dropped transaction
            pool.pending_nonces.set_if_lower(addr, tx.nonce());
            trace!(target: "txpool", hash = ?tx.hash(), "Removed fairness-exceeding pending transaction");
        }
        self.priced.removed(caps.len());
        self.metrics.pending_discards.increment(caps.len() as u64);
        caps.len() as u64
    }

    /// Drops the oldest queued transactions if the pool ran over the global
    /// queue limit, judged by each account's last heartbeat. Local accounts
    /// are spared.
    fn truncate_queue_locked(&self, pool: &mut PoolState<C::StateView, T>) {
        let queued: u64 = pool.queue.values().map(|list| list.len() as u64).sum();
        if queued <= self.config.global_queue {
            return
        }
        // Sort all accounts with queued transactions by heartbeat
        let mut addresses = pool
            .queue
            .keys()
            .filter(|addr| !pool.locals.contains(addr))
            .map(|addr| (*addr, pool.beats.get(addr).copied().unwrap_or_else(Instant::now)))
            .collect::<Vec<_>>();
        // Youngest heartbeats first, so the oldest pop off the back
        addresses.sort_by(|a, b| b.1.cmp(&a.1));

        // Drop transactions until the total is below the limit or only locals remain
        let mut drop = queued - self.config.global_queue;
        while drop > 0 {
            let Some((addr, _)) = addresses.pop() else { break };
            let txs = match pool.queue.get(&addr) {
                Some(list) => list.flatten(),
                None => continue,
            };
            let size = txs.len() as u64;
            // Remove all transactions if they are fewer than the overflow
            if size <= drop {
                for tx in txs {
                    self.remove_tx_locked(pool, tx.hash(), true);
                }
                drop -= size;
                self.metrics.queued_discards.increment(size);
                continue
            }
            // Otherwise drop only the last few transactions
            for tx in txs.iter().rev() {
                if drop == 0 {
                    break
                }
                self.remove_tx_locked(pool, tx.hash(), true);
                drop -= 1;
                self.metrics.queued_discards.increment(1);
            }
        }
    }

    /// Drops every queued transaction of accounts that went silent for longer
    /// than the configured lifetime. Local senders are spared.
    pub(crate) fn evict_stale(&self) {
        let mut pool = self.pool.write();
        let addrs = pool.queue.keys().copied().collect::<Vec<_>>();
        for addr in addrs {
            // Skip local transactions from the eviction mechanism
            if pool.locals.contains(&addr) {
                continue
            }
            // Any non-locals old enough should be removed
            let expired = pool
                .beats
                .get(&addr)
                .map_or(true, |beat| beat.elapsed() > self.config.lifetime);
            if !expired {
                continue
            }
            let txs = match pool.queue.get(&addr) {
                Some(list) => list.flatten(),
                None => continue,
            };
            debug!(target: "txpool", %addr, count = txs.len(), "Removed old queued transactions");
            self.metrics.queued_evictions.increment(txs.len() as u64);
            for tx in txs {
                self.remove_tx_locked(&mut pool, tx.hash(), true);
            }
        }
    }

    /// Regenerates the journal to hold exactly the currently pooled local
    /// transactions.
    pub(crate) fn rotate_journal(&self) {
        let mut pool = self.pool.write();
        if pool.journal.is_none() {
            return
        }
        let locals = self.local_txs_locked(&mut pool);
        if let Some(journal) = pool.journal.as_mut() {
            if let Err(err) = journal.rotate(locals) {
                warn!(target: "txpool", %err, "Failed to rotate local tx journal");
            }
        }
    }

    /// Refreshes the population gauges and logs the pool status.
    pub(crate) fn report_stats(&self) {
        let pool = self.pool.read();
        let pending: usize = pool.pending.values().map(|list| list.len()).sum();
        let queued: usize = pool.queue.values().map(|list| list.len()).sum();
        let locals = pool.locals.len();
        drop(pool);
        self.metrics.pending_transactions.set(pending as f64);
        self.metrics.queued_transactions.set(queued as f64);
        self.metrics.local_transactions.set(self.all.local_count() as f64);
        debug!(
            target: "txpool",
            pending,
            queued,
            locals,
            slots = self.all.slots(),
            "Transaction pool status report"
        );
    }

    /// The head the pool currently mirrors.
    pub(crate) fn tracked_head(&self) -> Header {
        self.pool.read().current_head.clone()
    }

    /// Flushes the journal and drops all listeners. The pool still answers
    /// reads afterwards but no maintenance happens anymore.
    pub(crate) fn shutdown(&self) {
        let mut pool = self.pool.write();
        if pool.journal.is_some() {
            let locals = self.local_txs_locked(&mut pool);
            if let Some(journal) = pool.journal.as_mut() {
                if let Err(err) = journal.rotate(locals) {
                    warn!(target: "txpool", %err, "Failed to rotate local tx journal");
                }
                journal.close();
            }
        }
        drop(pool);
        self.listeners.lock().clear();
        info!(target: "txpool", "Transaction pool stopped");
    }

    /// Appends the transaction to the journal when its sender is local.
    fn journal_tx_locked(&self, pool: &mut PoolState<C::StateView, T>, tx: &Arc<T>) {
        // Only journal if it's enabled and the transaction is local
        if !pool.locals.contains(&tx.sender()) {
            return
        }
        let Some(journal) = pool.journal.as_mut() else { return };
        if let Err(err) = journal.insert(tx) {
            warn!(target: "txpool", %err, "Failed to journal local transaction");
        }
    }

    /// Gathers every pooled transaction of the local accounts.
    fn local_txs_locked(
        &self,
        pool: &mut PoolState<C::StateView, T>,
    ) -> HashMap<Address, Vec<Arc<T>>> {
        let mut txs = HashMap::new();
        for addr in pool.locals.flatten() {
            let mut held = Vec::new();
            if let Some(pending) = pool.pending.get(&addr) {
                held.extend(pending.flatten());
            }
            if let Some(queued) = pool.queue.get(&addr) {
                held.extend(queued.flatten());
            }
            if !held.is_empty() {
                txs.insert(addr, held);
            }
        }
        txs
    }

    /// Delivers an event to every live subscriber, dropping the ones that
    /// went away.
    fn notify_new_txs(&self, txs: Vec<Arc<T>>) {
        if txs.is_empty() {
            return
        }
        let event = NewTxsEvent { txs };
        let mut listeners = self.listeners.lock();
        listeners.retain_mut(|listener| match listener.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(target: "txpool", "Failed to deliver new txs event; channel full");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

/// Returns the transactions of `a` that are not contained in `b`.
fn tx_difference<T: PoolTransaction>(a: Vec<T>, b: &[T]) -> Vec<T> {
    let keep = b.iter().map(|tx| tx.hash()).collect::<HashSet<_>>();
    a.into_iter().filter(|tx| !keep.contains(&tx.hash())).collect()
}

#[cfg(test)]
impl<C: ChainBackend<T>, T: PoolTransaction> PoolInner<C, T> {
    /// Checks the cross-index bookkeeping that must hold after every public
    /// operation: the lookup tracks exactly the union of the account lists,
    /// slot accounting matches, and pending runs are gapless.
    fn assert_invariants(&self) {
        let pool = self.pool.read();
        let mut tracked = 0usize;
        let mut slots = 0usize;
        for (addr, list) in pool.pending.iter().chain(pool.queue.iter()) {
            for (_, tx) in list.iter() {
                assert!(self.all.contains(&tx.hash()), "list entry missing from lookup");
                assert_eq!(tx.sender(), *addr, "transaction filed under the wrong account");
                tracked += 1;
                slots += num_slots(&**tx);
            }
        }
        assert_eq!(tracked, self.all.count(), "lookup size diverged from the account lists");
        assert_eq!(slots, self.all.slots(), "slot accounting diverged");
        for list in pool.pending.values() {
            let nonces = list.iter().map(|(nonce, _)| *nonce).collect::<Vec<_>>();
            for pair in nonces.windows(2) {
                assert_eq!(pair[0] + 1, pair[1], "pending nonces gapped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::TX_SLOT_SIZE,
        test_utils::{test_pool, test_pool_with_config, MockChain, MockTransaction},
    };
    use std::time::Duration;

    /// Executes all requests the add paths queued up, the way the maintenance
    /// task would, but inline and without an async runtime.
    fn drive(pool: &TxPool<MockChain, MockTransaction>) {
        let mut reset = None;
        let mut dirty = AccountSet::new();
        let mut events: HashMap<Address, TxSortedMap<MockTransaction>> = HashMap::new();
        {
            let mut guard = pool.inner.request_rx.lock();
            let requests = guard.as_mut().expect("maintenance not running");
            while let Ok(request) = requests.try_recv() {
                match request {
                    PoolRequest::Reset { old, new } => {
                        reset = match reset.take() {
                            Some((first_old, _)) => Some((first_old, new)),
                            None => Some((old, new)),
                        }
                    }
                    PoolRequest::Promote { accounts } => dirty.merge(&accounts),
                    PoolRequest::QueueEvent { tx } => {
                        events.entry(tx.sender()).or_default().put(tx);
                    }
                    PoolRequest::Sync { done } => {
                        let _ = done.send(());
                    }
                    PoolRequest::Shutdown { .. } => {}
                }
            }
        }
        if reset.is_some() || !dirty.is_empty() || !events.is_empty() {
            pool.inner.run_reorg(reset, (!dirty.is_empty()).then_some(dirty), events);
        }
    }

    /// Applies a head change inline, as the maintenance task would on a head
    /// event.
    fn reset_to(pool: &TxPool<MockChain, MockTransaction>, old: Option<Header>, new: Header) {
        pool.inner.run_reorg(Some((old, new)), None, HashMap::new());
    }

    fn fund(chain: &MockChain, addr: Address) {
        chain.state().set_balance(addr, U256::from(u128::MAX));
    }

    fn nonces(txs: &[Arc<MockTransaction>]) -> Vec<u64> {
        txs.iter().map(|tx| tx.nonce()).collect()
    }

    #[test]
    fn promotes_contiguous_run_and_parks_the_gap() {
        let (pool, chain) = test_pool();
        let a = Address::random();
        chain.state().set_nonce(a, 5);
        fund(&chain, a);

        let tx6 = MockTransaction::new(a, 6);
        let tx5 = MockTransaction::new(a, 5);
        let tx8 = MockTransaction::new(a, 8);
        pool.add_remote(tx6.clone()).unwrap();
        pool.add_remote(tx5.clone()).unwrap();
        pool.add_remote(tx8.clone()).unwrap();
        drive(&pool);

        let pending = pool.pending(false);
        assert_eq!(nonces(&pending[&a]), vec![5, 6]);
        assert_eq!(pool.stats(), (2, 1));
        assert_eq!(pool.status(&tx5.hash()), TxStatus::Pending);
        assert_eq!(pool.status(&tx6.hash()), TxStatus::Pending);
        assert_eq!(pool.status(&tx8.hash()), TxStatus::Queued);
        // the virtual nonce sits one past the pending run
        assert_eq!(pool.inner.pool.write().pending_nonces.get(&a), 7);
        pool.inner.assert_invariants();
    }

    #[test]
    fn resubmission_is_rejected_as_known() {
        let (pool, chain) = test_pool();
        let a = Address::random();
        fund(&chain, a);

        let tx = MockTransaction::new(a, 0);
        assert!(pool.add_remote(tx.clone()).is_ok());
        assert_eq!(pool.add_remote(tx.clone()), Err(PoolError::AlreadyKnown));

        // batches report per-slot errors
        let other = MockTransaction::new(a, 1);
        let results = pool.add_remotes(vec![other.clone(), other]);
        assert!(results[0].is_ok());
        assert_eq!(results[1], Err(PoolError::AlreadyKnown));
        assert_eq!(pool.stats(), (2, 0));
        pool.inner.assert_invariants();
    }

    #[test]
    fn replacement_enforces_price_bump() {
        let (pool, chain) = test_pool();
        let a = Address::random();
        chain.state().set_nonce(a, 5);
        fund(&chain, a);

        let original = MockTransaction::new(a, 5).with_gas_price(100);
        pool.add_remote(original.clone()).unwrap();
        assert_eq!(pool.status(&original.hash()), TxStatus::Pending);

        // 9% bump is under the configured 10%
        let cheap = MockTransaction::new(a, 5).with_gas_price(109);
        assert_eq!(pool.add_remote(cheap.clone()), Err(PoolError::ReplaceUnderpriced));
        assert!(!pool.contains(&cheap.hash()));

        let replacement = MockTransaction::new(a, 5).with_gas_price(110);
        pool.add_remote(replacement.clone()).unwrap();
        assert!(!pool.contains(&original.hash()));
        assert_eq!(pool.status(&replacement.hash()), TxStatus::Pending);
        assert_eq!(pool.stats(), (1, 0));
        pool.inner.assert_invariants();
    }

    #[test]
    fn full_pool_rejects_underpriced_and_evicts_for_better() {
        let config =
            PoolConfig { global_slots: 1, global_queue: 1, journal: String::new(), ..Default::default() };
        let (pool, chain) = test_pool_with_config(config);

        // two slots worth of transaction fill the pool completely
        let holder = Address::random();
        fund(&chain, holder);
        let resident =
            MockTransaction::new(holder, 0).with_gas_price(50).with_size(TX_SLOT_SIZE + 1);
        pool.add_remote(resident.clone()).unwrap();
        assert_eq!(pool.status(&resident.hash()), TxStatus::Pending);

        // a cheaper transaction cannot make room for itself
        let cheaper = Address::random();
        fund(&chain, cheaper);
        let rejected = MockTransaction::new(cheaper, 0).with_gas_price(40);
        assert_eq!(pool.add_remote(rejected), Err(PoolError::Underpriced));
        assert!(pool.contains(&resident.hash()));

        // a better priced one evicts the resident
        let better = Address::random();
        fund(&chain, better);
        let accepted = MockTransaction::new(better, 0).with_gas_price(60);
        pool.add_remote(accepted.clone()).unwrap();
        assert!(!pool.contains(&resident.hash()));
        assert!(pool.contains(&accepted.hash()));
        pool.inner.assert_invariants();
    }

    #[test]
    fn gapped_transaction_cannot_churn_pending() {
        let config =
            PoolConfig { global_slots: 1, global_queue: 1, journal: String::new(), ..Default::default() };
        let (pool, chain) = test_pool_with_config(config);

        let holder = Address::random();
        fund(&chain, holder);
        let resident =
            MockTransaction::new(holder, 0).with_gas_price(50).with_size(TX_SLOT_SIZE + 1);
        pool.add_remote(resident.clone()).unwrap();

        // gapped remote, well priced, would have to drop the pending resident
        let future_sender = Address::random();
        fund(&chain, future_sender);
        let gapped = MockTransaction::new(future_sender, 5).with_gas_price(100);
        assert_eq!(pool.add_remote(gapped), Err(PoolError::FutureReplacePending));
        assert!(pool.contains(&resident.hash()));
        pool.inner.assert_invariants();
    }

    #[test]
    fn eviction_churn_is_throttled_between_reorgs() {
        let config =
            PoolConfig { global_slots: 1, global_queue: 1, journal: String::new(), ..Default::default() };
        let (pool, chain) = test_pool_with_config(config);

        let holder = Address::random();
        fund(&chain, holder);
        let resident =
            MockTransaction::new(holder, 0).with_gas_price(50).with_size(TX_SLOT_SIZE + 1);
        pool.add_remote(resident.clone()).unwrap();

        pool.inner.pool.write().changes_since_reorg = 1;
        let better = Address::random();
        fund(&chain, better);
        let blocked = MockTransaction::new(better, 0).with_gas_price(60);
        assert_eq!(pool.add_remote(blocked.clone()), Err(PoolError::TxPoolOverflow));

        // a reorg pass resets the budget
        drive(&pool);
        assert_eq!(pool.inner.pool.read().changes_since_reorg, 0);
        pool.add_remote(blocked.clone()).unwrap();
        assert!(pool.contains(&blocked.hash()));
        pool.inner.assert_invariants();
    }

    #[test]
    fn reorged_transactions_are_reinjected() {
        let (pool, chain) = test_pool();
        let a = Address::random();
        chain.state().set_nonce(a, 5);
        fund(&chain, a);

        // the transaction was mined in b1; the chain then switched to b2
        let mined = MockTransaction::new(a, 5);
        let genesis = chain.genesis();
        let b1 = chain.make_block(&genesis, vec![mined.clone()]);
        let b2 = chain.make_block(&genesis, vec![]);

        assert!(!pool.contains(&mined.hash()));
        reset_to(&pool, Some(b1), b2);

        assert!(pool.contains(&mined.hash()));
        assert_eq!(pool.status(&mined.hash()), TxStatus::Pending);
        assert_eq!(nonces(&pool.pending(false)[&a]), vec![5]);
        pool.inner.assert_invariants();
    }

    #[test]
    fn balance_drop_demotes_the_unaffordable_tail() {
        let (pool, chain) = test_pool();
        let a = Address::random();
        chain.state().set_nonce(a, 5);
        chain.state().set_balance(a, U256::from(1200));

        // each costs 4 * 100 = 400
        let tx = |nonce| {
            MockTransaction::new(a, nonce)
                .with_gas_price(4)
                .with_gas_limit(100)
                .with_intrinsic_gas(50)
        };
        for nonce in [5, 6, 7] {
            pool.add_remote(tx(nonce)).unwrap();
        }
        assert_eq!(pool.stats(), (3, 0));

        // the account loses most of its balance in the next block
        chain.state().set_balance(a, U256::from(500));
        let genesis = chain.genesis();
        let next = chain.make_block(&genesis, vec![]);
        reset_to(&pool, Some(genesis), next);

        let pending = pool.pending(false);
        assert_eq!(nonces(&pending[&a]), vec![5]);
        assert_eq!(pool.stats(), (1, 2));
        pool.inner.assert_invariants();
    }

    #[test]
    fn lifetime_eviction_spares_locals() {
        let config = PoolConfig {
            lifetime: Duration::from_secs(1),
            journal: String::new(),
            ..Default::default()
        };
        let (pool, chain) = test_pool_with_config(config);

        let remote = Address::random();
        let local = Address::random();
        fund(&chain, remote);
        fund(&chain, local);

        // both keep a gapped transaction in the queue
        let remote_tx = MockTransaction::new(remote, 3);
        let local_tx = MockTransaction::new(local, 3);
        pool.add_remote(remote_tx.clone()).unwrap();
        pool.add_local(local_tx.clone()).unwrap();
        assert_eq!(pool.stats(), (0, 2));

        // silence both senders past the lifetime
        let expired = Instant::now() - Duration::from_secs(5);
        {
            let mut state = pool.inner.pool.write();
            state.beats.insert(remote, expired);
            state.beats.insert(local, expired);
        }
        pool.inner.evict_stale();

        assert!(!pool.contains(&remote_tx.hash()));
        assert!(pool.contains(&local_tx.hash()));
        assert_eq!(pool.stats(), (0, 1));
        pool.inner.assert_invariants();
    }

    #[test]
    fn pending_enforce_tips_cuts_cheap_remote_runs() {
        let (pool, chain) = test_pool();
        let remote = Address::random();
        let local = Address::random();
        fund(&chain, remote);
        fund(&chain, local);

        pool.add_remote(MockTransaction::new(remote, 0).with_gas_price(30)).unwrap();
        pool.add_local(MockTransaction::new(local, 0).with_gas_price(30)).unwrap();

        // raise the floor without sweeping, as a base fee change would
        *pool.inner.gas_tip.write() = U256::from(50);

        let loose = pool.pending(false);
        assert!(loose.contains_key(&remote));
        assert!(loose.contains_key(&local));

        let enforced = pool.pending(true);
        assert!(!enforced.contains_key(&remote));
        // locals are exempt from the tip filter
        assert!(enforced.contains_key(&local));
    }

    #[test]
    fn gas_tip_raise_sweeps_cheap_remotes() {
        let (pool, chain) = test_pool();
        let remote = Address::random();
        let local = Address::random();
        fund(&chain, remote);
        fund(&chain, local);

        let cheap_remote = MockTransaction::new(remote, 0).with_gas_price(30);
        let cheap_local = MockTransaction::new(local, 0).with_gas_price(30);
        pool.add_remote(cheap_remote.clone()).unwrap();
        pool.add_local(cheap_local.clone()).unwrap();

        pool.set_gas_tip(U256::from(50));
        assert!(!pool.contains(&cheap_remote.hash()));
        assert!(pool.contains(&cheap_local.hash()));

        // and the new floor applies to fresh remote submissions
        let rejected = MockTransaction::new(remote, 0).with_gas_price(40);
        assert_eq!(pool.add_remote(rejected), Err(PoolError::Underpriced));
        pool.inner.assert_invariants();
    }

    #[test]
    fn queue_caps_apply_per_account() {
        let config = PoolConfig {
            account_queue: 2,
            journal: String::new(),
            ..Default::default()
        };
        let (pool, chain) = test_pool_with_config(config);
        let a = Address::random();
        fund(&chain, a);

        // all gapped: nonces 10..14 while the account sits at nonce 0
        for nonce in 10..14 {
            pool.add_remote(MockTransaction::new(a, nonce)).unwrap();
        }
        assert_eq!(pool.stats(), (0, 4));
        drive(&pool);
        assert_eq!(pool.stats(), (0, 2));
        pool.inner.assert_invariants();
    }

    #[test]
    fn queue_overflow_drops_the_stalest_account() {
        let config = PoolConfig {
            global_queue: 2,
            journal: String::new(),
            ..Default::default()
        };
        let (pool, chain) = test_pool_with_config(config);
        let stale = Address::random();
        let fresh = Address::random();
        fund(&chain, stale);
        fund(&chain, fresh);

        for nonce in [5u64, 6] {
            pool.add_remote(MockTransaction::new(stale, nonce)).unwrap();
        }
        pool.inner.pool.write().beats.insert(stale, Instant::now() - Duration::from_secs(60));
        for nonce in [5u64, 6] {
            pool.add_remote(MockTransaction::new(fresh, nonce)).unwrap();
        }
        drive(&pool);

        assert_eq!(pool.stats(), (0, 2));
        let state = pool.inner.pool.read();
        assert!(!state.queue.contains_key(&stale));
        assert!(state.queue.contains_key(&fresh));
        drop(state);
        pool.inner.assert_invariants();
    }

    #[test]
    fn pending_overflow_equalizes_spammers() {
        let config = PoolConfig {
            global_slots: 4,
            account_slots: 1,
            journal: String::new(),
            ..Default::default()
        };
        let (pool, chain) = test_pool_with_config(config);
        let x = Address::random();
        let y = Address::random();
        fund(&chain, x);
        fund(&chain, y);

        for nonce in 0..4 {
            pool.add_remote(MockTransaction::new(x, nonce)).unwrap();
        }
        for nonce in 0..2 {
            pool.add_remote(MockTransaction::new(y, nonce)).unwrap();
        }
        assert_eq!(pool.stats(), (6, 0));
        drive(&pool);

        // the larger spammer was cut down to the smaller one's size
        let pending = pool.pending(false);
        assert_eq!(nonces(&pending[&x]), vec![0, 1]);
        assert_eq!(nonces(&pending[&y]), vec![0, 1]);
        pool.inner.assert_invariants();
    }

    #[tokio::test]
    async fn journal_restores_local_transactions() {
        let dir = tempfile::tempdir().unwrap();
        let journal = dir.path().join("transactions.encoded").display().to_string();
        let config = PoolConfig { journal: journal.clone(), ..Default::default() };

        let chain = MockChain::new();
        let local = Address::random();
        chain.state().set_balance(local, U256::from(u128::MAX));

        let tx = MockTransaction::new(local, 0);
        {
            let pool = TxPool::new(config.clone(), chain.clone()).unwrap();
            pool.add_local(tx.clone()).unwrap();
            pool.close().await;
        }

        let pool = TxPool::new(config, chain).unwrap();
        assert!(pool.contains(&tx.hash()));
        assert_eq!(pool.status(&tx.hash()), TxStatus::Pending);
        assert_eq!(pool.locals(), vec![local]);
        pool.inner.assert_invariants();
    }
}
