//! The pool's maintenance task: consumes chain head events and pool requests,
//! debounces them into single reorg passes, and drives the periodic upkeep
//! (queue eviction, journal rotation, stats reporting).

use crate::{
    config::{EVICTION_INTERVAL, STATS_REPORT_INTERVAL},
    pool::{local::AccountSet, nonce_map::TxSortedMap, PoolInner, PoolRequest, TxPool},
    traits::{ChainBackend, HeadEvent, Header, PoolTransaction},
};
use alloy_primitives::Address;
use std::{collections::HashMap, sync::Arc};
use tokio::{
    sync::{mpsc, oneshot},
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, info, warn};

/// Maintains the state of the transaction pool: applies chain head changes,
/// promotes queued transactions, evicts aged ones and rotates the journal.
///
/// Concurrent resets and promotion requests are debounced into a single pass,
/// so a burst of head events costs one walk over the affected accounts. The
/// task finishes when [`TxPool::close`] is called or the head subscription
/// ends.
pub async fn maintain_transaction_pool<C, T>(pool: TxPool<C, T>)
where
    C: ChainBackend<T>,
    T: PoolTransaction,
{
    let inner = Arc::clone(&pool.inner);
    let mut head_events = inner.chain.subscribe_head_events();
    let Some(mut requests) = inner.request_rx.lock().take() else {
        warn!(target: "txpool", "Transaction pool maintenance started twice");
        return
    };
    let mut current_head = inner.tracked_head();

    let mut evict = interval(EVICTION_INTERVAL);
    evict.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut journal = interval(inner.config.rejournal);
    journal.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stats = interval(STATS_REPORT_INTERVAL);
    stats.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // Intervals fire immediately once; swallow that before entering the loop
    evict.tick().await;
    journal.tick().await;
    stats.tick().await;

    info!(
        target: "txpool",
        chain = inner.chain.chain_config().chain_id,
        "Transaction pool maintenance started"
    );

    loop {
        tokio::select! {
            event = head_events.recv() => {
                let Some(HeadEvent { head }) = event else {
                    debug!(target: "txpool", "Chain head subscription closed");
                    return
                };
                let old = std::mem::replace(&mut current_head, head.clone());
                let batch = drain(&mut requests, Batch::with_reset(Some(old), head));
                if let Some(ack) = run_batch(&inner, batch) {
                    let _ = ack.send(());
                    return
                }
            }
            request = requests.recv() => {
                let Some(request) = request else { return };
                let batch = drain(&mut requests, Batch::from_request(request));
                if let Some(ack) = run_batch(&inner, batch) {
                    let _ = ack.send(());
                    return
                }
            }
            _ = evict.tick() => inner.evict_stale(),
            _ = journal.tick() => inner.rotate_journal(),
            _ = stats.tick() => inner.report_stats(),
        }
    }
}

/// A debounced set of pool requests, executed as one reorg pass.
struct Batch<T: PoolTransaction> {
    /// Oldest-to-newest head movement observed in this batch.
    reset: Option<(Option<Header>, Header)>,
    /// Accounts whose queues need a promotion check.
    dirty: AccountSet,
    /// Direct pending placements awaiting event publication, per sender.
    events: HashMap<Address, TxSortedMap<T>>,
    /// Barrier acknowledgements to fire once the batch took effect.
    barriers: Vec<oneshot::Sender<()>>,
    /// Set when a shutdown was requested; ends the task after this batch.
    shutdown: Option<oneshot::Sender<()>>,
}

impl<T: PoolTransaction> Batch<T> {
    fn with_reset(old: Option<Header>, new: Header) -> Self {
        Self {
            reset: Some((old, new)),
            dirty: AccountSet::new(),
            events: HashMap::new(),
            barriers: Vec::new(),
            shutdown: None,
        }
    }

    fn from_request(request: PoolRequest<T>) -> Self {
        let mut batch = Self {
            reset: None,
            dirty: AccountSet::new(),
            events: HashMap::new(),
            barriers: Vec::new(),
            shutdown: None,
        };
        batch.absorb(request);
        batch
    }

    fn absorb(&mut self, request: PoolRequest<T>) {
        match request {
            PoolRequest::Reset { old, new } => {
                // Chain the movements: keep the oldest known head, adopt the newest
                self.reset = match self.reset.take() {
                    Some((first_old, _)) => Some((first_old, new)),
                    None => Some((old, new)),
                };
            }
            PoolRequest::Promote { accounts } => self.dirty.merge(&accounts),
            PoolRequest::QueueEvent { tx } => {
                self.events.entry(tx.sender()).or_default().put(tx);
            }
            PoolRequest::Sync { done } => self.barriers.push(done),
            PoolRequest::Shutdown { done } => self.shutdown = Some(done),
        }
    }
}

/// Pulls every immediately available request into the batch.
fn drain<T: PoolTransaction>(
    requests: &mut mpsc::UnboundedReceiver<PoolRequest<T>>,
    mut batch: Batch<T>,
) -> Batch<T> {
    while batch.shutdown.is_none() {
        match requests.try_recv() {
            Ok(request) => batch.absorb(request),
            Err(_) => break,
        }
    }
    batch
}

/// Executes the batch. Returns the shutdown acknowledgement when the task
/// should end; the pool teardown has already happened by then.
fn run_batch<C, T>(inner: &Arc<PoolInner<C, T>>, batch: Batch<T>) -> Option<oneshot::Sender<()>>
where
    C: ChainBackend<T>,
    T: PoolTransaction,
{
    let Batch { reset, dirty, events, barriers, shutdown } = batch;
    if reset.is_some() || !dirty.is_empty() || !events.is_empty() {
        let dirty = (!dirty.is_empty()).then_some(dirty);
        inner.run_reorg(reset, dirty, events);
    }
    for done in barriers {
        let _ = done.send(());
    }
    if shutdown.is_some() {
        inner.shutdown();
    }
    shutdown
}
