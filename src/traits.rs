//! Interfaces between the pool and its collaborators: the capability surface
//! of pooled transactions, and the chain/state access the pool consumes.

use alloy_primitives::{Address, B256, U256};
use alloy_rlp::{Decodable, Encodable};
use std::{fmt, sync::Arc};
use tokio::sync::mpsc;

/// Hash identifying a pooled transaction.
pub type TxHash = B256;

/// Transaction kinds known to the chain.
///
/// The pool only handles [`Normal`](TxKind::Normal), [`Recharge`](TxKind::Recharge)
/// and [`Withdraw`](TxKind::Withdraw) transactions; anything else is rejected
/// at the ingress boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxKind {
    /// A plain value transfer or contract interaction, fully caller-supplied.
    Normal,
    /// A protocol-built balance top-up.
    Recharge,
    /// A protocol-built balance withdrawal.
    Withdraw,
    /// Any other kind, identified by its raw type tag.
    Other(u8),
}

/// Capability surface the pool requires of a transaction.
///
/// The pool treats transactions as opaque values: it never decodes payloads or
/// executes anything, it only reads the accessors below. Implementations must
/// be cheap to clone; pooled transactions are shared behind [`Arc`]s.
pub trait PoolTransaction:
    fmt::Debug + Clone + Send + Sync + Encodable + Decodable + 'static
{
    /// Hash of the transaction, its stable identity inside the pool.
    fn hash(&self) -> TxHash;

    /// Address of the sender, recovered from the signature and cached.
    fn sender(&self) -> Address;

    /// Nonce of the transaction.
    fn nonce(&self) -> u64;

    /// Gas price the sender offers.
    fn gas_price(&self) -> U256;

    /// Maximum gas the transaction may consume.
    fn gas_limit(&self) -> u64;

    /// Value transferred by the transaction.
    fn value(&self) -> U256;

    /// Total funds the sender must hold to afford this transaction. The exact
    /// make-up depends on [`kind`](PoolTransaction::kind).
    fn cost(&self) -> U256;

    /// Serialized byte size, the basis of slot accounting.
    fn size(&self) -> usize;

    /// Kind tag of the transaction.
    fn kind(&self) -> TxKind;

    /// Minimum gas the transaction consumes before any execution happens.
    fn intrinsic_gas(&self) -> u64;

    /// Recovers the signing address. `None` when the signature does not verify.
    fn recover_sender(&self) -> Option<Address>;
}

/// Read access to account state at a fixed chain head.
///
/// Cloning yields an independent handle onto the same snapshot.
pub trait StateView: Clone + Send + Sync + 'static {
    /// Next nonce expected of the account.
    fn nonce(&self, addr: &Address) -> u64;

    /// Current balance of the account.
    fn balance(&self, addr: &Address) -> U256;
}

/// Static description of the chain the pool serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainConfig {
    /// Identifier of the chain.
    pub chain_id: u64,
}

/// Block header fields the pool consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Hash of the block.
    pub hash: B256,
    /// Hash of the parent block.
    pub parent_hash: B256,
    /// Height of the block.
    pub number: u64,
    /// Gas limit of the block.
    pub gas_limit: u64,
    /// State root the block commits to.
    pub state_root: B256,
    /// Base fee of the block, if the chain prices by one.
    pub base_fee: Option<U256>,
}

/// A block together with its transactions, as surfaced by
/// [`ChainBackend::block`].
#[derive(Debug, Clone)]
pub struct Block<T> {
    /// Header of the block.
    pub header: Header,
    /// Transactions included in the block.
    pub transactions: Vec<T>,
}

/// Notification of a new canonical chain head.
#[derive(Debug, Clone)]
pub struct HeadEvent {
    /// The new head of the chain.
    pub head: Header,
}

/// Chain access the pool consumes.
///
/// The pool never interprets chain data beyond what these methods expose; fork
/// choice and state commitment live behind this interface.
pub trait ChainBackend<T: PoolTransaction>: Send + Sync + 'static {
    /// State snapshot type produced by [`state_at`](ChainBackend::state_at).
    type StateView: StateView;

    /// Returns the chain's static configuration.
    fn chain_config(&self) -> ChainConfig;

    /// Returns the current canonical head.
    fn current_head(&self) -> Header;

    /// Returns the block with the given hash at the given height, if known.
    fn block(&self, hash: B256, number: u64) -> Option<Block<T>>;

    /// Returns a state snapshot at the given state root, if available.
    fn state_at(&self, root: B256) -> Option<Self::StateView>;

    /// Subscribes to canonical head changes.
    fn subscribe_head_events(&self) -> mpsc::UnboundedReceiver<HeadEvent>;
}

/// Event published whenever transactions become executable.
#[derive(Debug, Clone)]
pub struct NewTxsEvent<T> {
    /// Transactions that entered the pending set.
    pub txs: Vec<Arc<T>>,
}

/// Where a transaction currently resides within the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// The transaction is executable on the current state.
    Pending,
    /// The transaction is parked, waiting for predecessors or funds.
    Queued,
    /// The transaction is not tracked by the pool.
    Unknown,
}
