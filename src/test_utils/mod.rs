//! Mock implementations of the pool's collaborators for testing.

use crate::{
    traits::{
        Block, ChainBackend, ChainConfig, HeadEvent, Header, PoolTransaction, StateView, TxHash,
        TxKind,
    },
    PoolConfig, TxPool,
};
use alloy_primitives::{Address, B256, U256};
use alloy_rlp::{Decodable, Encodable, RlpDecodable, RlpEncodable};
use parking_lot::{Mutex, RwLock};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::mpsc;

/// A fully controllable transaction for pool tests.
///
/// Builder methods that change the transaction's terms also regenerate its
/// hash, so a repriced copy counts as a distinct transaction the way a
/// re-signed one would.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockTransaction {
    /// Hash identifying this transaction.
    pub hash: B256,
    /// Sender address; the mock treats it as already recovered.
    pub sender: Address,
    /// Nonce of the transaction.
    pub nonce: u64,
    /// Offered gas price.
    pub gas_price: U256,
    /// Gas limit of the transaction.
    pub gas_limit: u64,
    /// Transferred value.
    pub value: U256,
    /// Serialized size in bytes.
    pub size: usize,
    /// Kind tag.
    pub kind: TxKind,
    /// Intrinsic gas reported to the validator.
    pub intrinsic_gas: u64,
    /// Whether sender recovery succeeds.
    pub valid_signature: bool,
}

impl MockTransaction {
    /// A well-formed normal transaction from the given sender.
    pub fn new(sender: Address, nonce: u64) -> Self {
        Self {
            hash: B256::random(),
            sender,
            nonce,
            gas_price: U256::from(100),
            gas_limit: 100_000,
            value: U256::ZERO,
            size: 128,
            kind: TxKind::Normal,
            intrinsic_gas: 21_000,
            valid_signature: true,
        }
    }

    /// Sets the nonce, regenerating the hash.
    pub fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = nonce;
        self.rng_hash()
    }

    /// Sets the gas price, regenerating the hash.
    pub fn with_gas_price(self, gas_price: u64) -> Self {
        self.with_gas_price_raw(U256::from(gas_price))
    }

    /// Sets the gas price from a full-width value, regenerating the hash.
    pub fn with_gas_price_raw(mut self, gas_price: U256) -> Self {
        self.gas_price = gas_price;
        self.rng_hash()
    }

    /// Sets the gas limit, regenerating the hash.
    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self.rng_hash()
    }

    /// Sets the transferred value, regenerating the hash.
    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self.rng_hash()
    }

    /// Sets the serialized size, regenerating the hash.
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self.rng_hash()
    }

    /// Sets the kind tag.
    pub fn with_kind(mut self, kind: TxKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the intrinsic gas reported to the validator.
    pub fn with_intrinsic_gas(mut self, intrinsic_gas: u64) -> Self {
        self.intrinsic_gas = intrinsic_gas;
        self
    }

    /// Makes sender recovery fail.
    pub fn unsigned(mut self) -> Self {
        self.valid_signature = false;
        self
    }

    /// The follow-up transaction of the same sender.
    pub fn next(&self) -> Self {
        Self { hash: B256::random(), nonce: self.nonce + 1, ..self.clone() }
    }

    /// Assigns a fresh random hash.
    pub fn rng_hash(mut self) -> Self {
        self.hash = B256::random();
        self
    }
}

impl PoolTransaction for MockTransaction {
    fn hash(&self) -> TxHash {
        self.hash
    }

    fn sender(&self) -> Address {
        self.sender
    }

    fn nonce(&self) -> u64 {
        self.nonce
    }

    fn gas_price(&self) -> U256 {
        self.gas_price
    }

    fn gas_limit(&self) -> u64 {
        self.gas_limit
    }

    fn value(&self) -> U256 {
        self.value
    }

    fn cost(&self) -> U256 {
        self.gas_price.saturating_mul(U256::from(self.gas_limit)).saturating_add(self.value)
    }

    fn size(&self) -> usize {
        self.size
    }

    fn kind(&self) -> TxKind {
        self.kind
    }

    fn intrinsic_gas(&self) -> u64 {
        self.intrinsic_gas
    }

    fn recover_sender(&self) -> Option<Address> {
        self.valid_signature.then_some(self.sender)
    }
}

/// Wire shape of a [`MockTransaction`]; kept separate so the RLP derives stay
/// on plain field types.
#[derive(RlpEncodable, RlpDecodable)]
struct MockTransactionRlp {
    hash: B256,
    sender: Address,
    nonce: u64,
    gas_price: U256,
    gas_limit: u64,
    value: U256,
    size: u64,
    kind: u8,
    intrinsic_gas: u64,
    valid_signature: bool,
}

fn kind_tag(kind: TxKind) -> u8 {
    match kind {
        TxKind::Normal => 0,
        TxKind::Recharge => 1,
        TxKind::Withdraw => 2,
        TxKind::Other(tag) => tag,
    }
}

fn kind_from_tag(tag: u8) -> TxKind {
    match tag {
        0 => TxKind::Normal,
        1 => TxKind::Recharge,
        2 => TxKind::Withdraw,
        tag => TxKind::Other(tag),
    }
}

impl Encodable for MockTransaction {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        MockTransactionRlp {
            hash: self.hash,
            sender: self.sender,
            nonce: self.nonce,
            gas_price: self.gas_price,
            gas_limit: self.gas_limit,
            value: self.value,
            size: self.size as u64,
            kind: kind_tag(self.kind),
            intrinsic_gas: self.intrinsic_gas,
            valid_signature: self.valid_signature,
        }
        .encode(out)
    }
}

impl Decodable for MockTransaction {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let raw = MockTransactionRlp::decode(buf)?;
        Ok(Self {
            hash: raw.hash,
            sender: raw.sender,
            nonce: raw.nonce,
            gas_price: raw.gas_price,
            gas_limit: raw.gas_limit,
            value: raw.value,
            size: raw.size as usize,
            kind: kind_from_tag(raw.kind),
            intrinsic_gas: raw.intrinsic_gas,
            valid_signature: raw.valid_signature,
        })
    }
}

/// In-memory account state.
///
/// Clones share the underlying accounts, so tests can mutate balances and
/// nonces the pool already looks at and observe the effect of the next reset.
#[derive(Debug, Clone, Default)]
pub struct MockStateView {
    accounts: Arc<RwLock<HashMap<Address, (u64, U256)>>>,
}

impl MockStateView {
    /// Sets the account's nonce.
    pub fn set_nonce(&self, addr: Address, nonce: u64) {
        self.accounts.write().entry(addr).or_insert((0, U256::ZERO)).0 = nonce;
    }

    /// Sets the account's balance.
    pub fn set_balance(&self, addr: Address, balance: U256) {
        self.accounts.write().entry(addr).or_insert((0, U256::ZERO)).1 = balance;
    }
}

impl StateView for MockStateView {
    fn nonce(&self, addr: &Address) -> u64 {
        self.accounts.read().get(addr).map_or(0, |(nonce, _)| *nonce)
    }

    fn balance(&self, addr: &Address) -> U256 {
        self.accounts.read().get(addr).map_or(U256::ZERO, |(_, balance)| *balance)
    }
}

/// Scriptable chain backend: tests register blocks and move the head.
#[derive(Debug, Clone)]
pub struct MockChain {
    inner: Arc<MockChainInner>,
}

#[derive(Debug)]
struct MockChainInner {
    config: ChainConfig,
    genesis: Header,
    head: RwLock<Header>,
    blocks: RwLock<HashMap<B256, Block<MockTransaction>>>,
    state: MockStateView,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<HeadEvent>>>,
}

impl MockChain {
    /// A chain consisting of an empty genesis block.
    pub fn new() -> Self {
        let genesis = Header {
            hash: B256::random(),
            parent_hash: B256::ZERO,
            number: 0,
            gas_limit: 30_000_000,
            state_root: B256::random(),
            base_fee: None,
        };
        let mut blocks = HashMap::new();
        blocks
            .insert(genesis.hash, Block { header: genesis.clone(), transactions: Vec::new() });
        Self {
            inner: Arc::new(MockChainInner {
                config: ChainConfig { chain_id: 1337 },
                head: RwLock::new(genesis.clone()),
                genesis,
                blocks: RwLock::new(blocks),
                state: MockStateView::default(),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The genesis header.
    pub fn genesis(&self) -> Header {
        self.inner.genesis.clone()
    }

    /// The shared state snapshot every `state_at` call resolves to.
    pub fn state(&self) -> MockStateView {
        self.inner.state.clone()
    }

    /// Builds and registers a block on top of the given parent, returning its
    /// header. The head does not move.
    pub fn make_block(&self, parent: &Header, transactions: Vec<MockTransaction>) -> Header {
        let header = Header {
            hash: B256::random(),
            parent_hash: parent.hash,
            number: parent.number + 1,
            gas_limit: parent.gas_limit,
            state_root: B256::random(),
            base_fee: None,
        };
        self.inner
            .blocks
            .write()
            .insert(header.hash, Block { header: header.clone(), transactions });
        header
    }

    /// Moves the canonical head and notifies all subscribers.
    pub fn set_head(&self, head: Header) {
        *self.inner.head.write() = head.clone();
        self.inner
            .subscribers
            .lock()
            .retain(|sub| sub.send(HeadEvent { head: head.clone() }).is_ok());
    }
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainBackend<MockTransaction> for MockChain {
    type StateView = MockStateView;

    fn chain_config(&self) -> ChainConfig {
        self.inner.config
    }

    fn current_head(&self) -> Header {
        self.inner.head.read().clone()
    }

    fn block(&self, hash: B256, _number: u64) -> Option<Block<MockTransaction>> {
        self.inner.blocks.read().get(&hash).cloned()
    }

    fn state_at(&self, _root: B256) -> Option<Self::StateView> {
        Some(self.inner.state.clone())
    }

    fn subscribe_head_events(&self) -> mpsc::UnboundedReceiver<HeadEvent> {
        let (sender, rx) = mpsc::unbounded_channel();
        self.inner.subscribers.lock().push(sender);
        rx
    }
}

/// A pool over a fresh [`MockChain`], journaling disabled.
pub fn test_pool() -> (TxPool<MockChain, MockTransaction>, MockChain) {
    test_pool_with_config(PoolConfig { journal: String::new(), ..Default::default() })
}

/// A pool over a fresh [`MockChain`] with the given configuration.
pub fn test_pool_with_config(
    config: PoolConfig,
) -> (TxPool<MockChain, MockTransaction>, MockChain) {
    let chain = MockChain::new();
    let pool = TxPool::new(config, chain.clone()).expect("mock state is always available");
    (pool, chain)
}
