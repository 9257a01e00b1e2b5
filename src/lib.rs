#![warn(missing_debug_implementations, missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

//! Account-based transaction pool: the in-memory staging area between
//! transaction ingress and block production.
//!
//! The pool accepts candidate transactions from the network and from local
//! submitters, validates them against static rules and the current chain
//! state, and sorts them into two per-account sets:
//!
//!  - the _pending_ set holds transactions whose nonces run gaplessly from the
//!    account's state nonce and which the account can afford; these are
//!    executable right now and are what block production consumes,
//!  - the _queued_ set holds everything that has to wait, either for a missing
//!    earlier nonce or for funds.
//!
//! Transactions move between the sets as the chain advances: every new head
//! triggers a reset that re-injects reorged transactions, drops mined and
//! unpayable ones and promotes whatever became executable. Capacity is
//! accounted in 32 KiB slots and enforced along several axes at once: per
//! account, globally, by price (a dual-heap eviction index over the remote
//! transactions) and by age. Senders registered as local are exempt from
//! eviction and their transactions survive restarts through an on-disk
//! journal.
//!
//! [`TxPool::new`] wires the pool to a [`ChainBackend`]; spawn
//! [`maintain_transaction_pool`] alongside it to process head events and run
//! the periodic upkeep.

mod config;
pub mod error;
mod journal;
mod maintain;
pub mod metrics;
mod pool;
mod traits;
mod validate;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{PoolConfig, TX_MAX_SIZE, TX_SLOT_SIZE};
pub use error::{PoolError, PoolResult};
pub use journal::JournalError;
pub use maintain::maintain_transaction_pool;
pub use pool::TxPool;
pub use traits::{
    Block, ChainBackend, ChainConfig, HeadEvent, Header, NewTxsEvent, PoolTransaction, StateView,
    TxHash, TxKind, TxStatus,
};
