//! Transaction pool errors.

use alloy_primitives::{B256, U256};

/// Transaction pool result type.
pub type PoolResult<T> = Result<T, PoolError>;

/// All errors the transaction pool can return.
///
/// Errors are values: the add pipeline surfaces the first violated rule and
/// leaves the pool untouched, it never aborts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The transaction hash is already tracked by the pool.
    #[error("already known")]
    AlreadyKnown,
    /// A remote transaction's price does not beat the cheapest transaction
    /// currently tracked, so there is no room to make for it.
    #[error("transaction underpriced")]
    Underpriced,
    /// A replacement transaction did not clear the configured price bump over
    /// the entry it tried to displace.
    #[error("replace transaction underpriced")]
    ReplaceUnderpriced,
    /// The pool is full and no room could be made without violating the
    /// eviction rules.
    #[error("txpool is full")]
    TxPoolOverflow,
    /// The transaction's nonce is below the account's current state nonce.
    #[error("nonce too low: next nonce {next}, tx nonce {tx}")]
    NonceTooLow {
        /// Next nonce expected by the state.
        next: u64,
        /// Nonce carried by the transaction.
        tx: u64,
    },
    /// The transaction's nonce is beyond the first gap of a pool that forbids
    /// gapped insertions.
    #[error("nonce too high: tx nonce {tx}, gapped nonce {gap}")]
    NonceTooHigh {
        /// Nonce carried by the transaction.
        tx: u64,
        /// First gapped nonce of the account.
        gap: u64,
    },
    /// The sender cannot fund this transaction on top of what it already has
    /// pooled.
    #[error("insufficient funds: balance {balance}, needed {needed}")]
    InsufficientFunds {
        /// Current balance of the sender.
        balance: U256,
        /// Funds the sender would need.
        needed: U256,
    },
    /// A gapped transaction may not evict currently pending transactions to
    /// make room for itself.
    #[error("future transaction attempts to replace pending")]
    FutureReplacePending,
    /// The transaction kind is not handled by this pool.
    #[error("transaction type not supported")]
    TxTypeNotSupported,
    /// The serialized transaction exceeds the pool's hard size cap.
    #[error("oversized data: size {size}, limit {limit}")]
    OversizedData {
        /// Serialized size of the transaction.
        size: usize,
        /// Maximum size the pool accepts.
        limit: usize,
    },
    /// The transaction carries a negative value.
    #[error("negative value")]
    NegativeValue,
    /// The transaction requires more gas than the current block allows.
    #[error("exceeds block gas limit: tx gas {have}, block limit {limit}")]
    GasLimit {
        /// Gas limit of the transaction.
        have: u64,
        /// Gas limit of the current head block.
        limit: u64,
    },
    /// The price terms overflow the 256 bit cost accounting.
    #[error("gas price very high")]
    PriceVeryHigh,
    /// The signature does not recover to the claimed sender.
    #[error("invalid sender")]
    InvalidSender,
    /// The gas limit does not cover the transaction's intrinsic gas.
    #[error("intrinsic gas too low: needed {needed}, allowed {allowed}")]
    IntrinsicGas {
        /// Intrinsic gas of the transaction.
        needed: u64,
        /// Gas limit of the transaction.
        allowed: u64,
    },
    /// No state is available for the given state root.
    #[error("state unavailable for root {0}")]
    StateUnavailable(B256),
}
