//! Transaction pool metrics.

use metrics::{
    describe_counter, describe_gauge, describe_histogram, register_counter, register_gauge,
    Counter, Gauge,
};

pub(crate) struct TxPoolMetrics {
    pub(crate) known_transactions: Counter,
    pub(crate) invalid_transactions: Counter,
    pub(crate) underpriced_transactions: Counter,
    pub(crate) overflowed_transactions: Counter,
    pub(crate) pending_replacements: Counter,
    pub(crate) pending_discards: Counter,
    pub(crate) queued_replacements: Counter,
    pub(crate) queued_discards: Counter,
    pub(crate) queued_evictions: Counter,
    pub(crate) pending_transactions: Gauge,
    pub(crate) queued_transactions: Gauge,
    pub(crate) local_transactions: Gauge,
}

impl Default for TxPoolMetrics {
    /// Initialize TxPoolMetrics struct and register them
    fn default() -> Self {
        Self {
            known_transactions: register_counter!("transaction_pool.known_transactions"),
            invalid_transactions: register_counter!("transaction_pool.invalid_transactions"),
            underpriced_transactions: register_counter!("transaction_pool.underpriced_transactions"),
            overflowed_transactions: register_counter!("transaction_pool.overflowed_transactions"),
            pending_replacements: register_counter!("transaction_pool.pending_replacements"),
            pending_discards: register_counter!("transaction_pool.pending_discards"),
            queued_replacements: register_counter!("transaction_pool.queued_replacements"),
            queued_discards: register_counter!("transaction_pool.queued_discards"),
            queued_evictions: register_counter!("transaction_pool.queued_evictions"),
            pending_transactions: register_gauge!("transaction_pool.pending_transactions"),
            queued_transactions: register_gauge!("transaction_pool.queued_transactions"),
            local_transactions: register_gauge!("transaction_pool.local_transactions"),
        }
    }
}

/// Describe transaction pool metrics
pub fn describe() {
    describe_counter!(
        "transaction_pool.known_transactions",
        "Number of submissions of already tracked transactions"
    );
    describe_counter!(
        "transaction_pool.invalid_transactions",
        "Number of transactions rejected by validation"
    );
    describe_counter!(
        "transaction_pool.underpriced_transactions",
        "Number of remote transactions dropped for being underpriced"
    );
    describe_counter!(
        "transaction_pool.overflowed_transactions",
        "Number of transactions rejected because no room could be made"
    );
    describe_counter!(
        "transaction_pool.pending_replacements",
        "Number of pending transactions displaced by higher priced ones"
    );
    describe_counter!(
        "transaction_pool.pending_discards",
        "Number of pending transactions dropped by capacity limits"
    );
    describe_counter!(
        "transaction_pool.queued_replacements",
        "Number of queued transactions displaced by higher priced ones"
    );
    describe_counter!(
        "transaction_pool.queued_discards",
        "Number of queued transactions dropped by capacity limits"
    );
    describe_counter!(
        "transaction_pool.queued_evictions",
        "Number of queued transactions dropped by the lifetime check"
    );
    describe_gauge!(
        "transaction_pool.pending_transactions",
        "Number of currently executable transactions"
    );
    describe_gauge!(
        "transaction_pool.queued_transactions",
        "Number of currently parked transactions"
    );
    describe_gauge!(
        "transaction_pool.local_transactions",
        "Number of transactions from local senders"
    );
    describe_gauge!("transaction_pool.slots", "Number of capacity slots currently in use");
    describe_histogram!(
        "transaction_pool.reheap_duration",
        "Time spent rebuilding the priced heaps"
    );
}
