//! Transaction validation shared by the pool's ingress paths.
//!
//! The checks run cheapest first and surface the first violated rule as a
//! typed [`PoolError`]. Only [`Normal`](TxKind::Normal) transactions carry
//! caller-supplied terms; the other recognized kinds are built by the protocol
//! upstream and pass with the kind gate alone.

use crate::{
    error::PoolError,
    traits::{Header, PoolTransaction, StateView, TxKind},
};
use alloy_primitives::{Address, U256};

/// Knobs for the stateless validation pass, differing between pool flavors
/// without duplicating the checks themselves.
pub(crate) struct ValidationOptions {
    /// Maximum size of a transaction the caller can meaningfully handle.
    pub(crate) max_size: usize,
    /// Minimum gas tip needed to allow a transaction into the caller's pool.
    pub(crate) min_tip: U256,
}

/// Checks whether a transaction is valid according to the consensus rules,
/// without touching state-dependent validation (balance, nonce).
pub(crate) fn validate_transaction<T: PoolTransaction>(
    tx: &T,
    head: &Header,
    opts: &ValidationOptions,
) -> Result<(), PoolError> {
    // Reject kinds not implemented by the calling pool
    match tx.kind() {
        TxKind::Normal | TxKind::Recharge | TxKind::Withdraw => {}
        TxKind::Other(_) => return Err(PoolError::TxTypeNotSupported),
    }
    if tx.kind() != TxKind::Normal {
        return Ok(())
    }
    // Before any expensive validation, sanity check that the tx is smaller
    // than the maximum limit the pool can meaningfully handle
    if tx.size() > opts.max_size {
        return Err(PoolError::OversizedData { size: tx.size(), limit: opts.max_size })
    }
    // Ensure the transaction doesn't exceed the current block limit gas
    if tx.gas_limit() > head.gas_limit {
        return Err(PoolError::GasLimit { have: tx.gas_limit(), limit: head.gas_limit })
    }
    // The full cost must fit the 256 bit accounting
    if tx
        .gas_price()
        .checked_mul(U256::from(tx.gas_limit()))
        .and_then(|fee| fee.checked_add(tx.value()))
        .is_none()
    {
        return Err(PoolError::PriceVeryHigh)
    }
    // Make sure the transaction is signed properly
    if tx.recover_sender() != Some(tx.sender()) {
        return Err(PoolError::InvalidSender)
    }
    // Ensure the transaction has more gas than the bare minimum needed to
    // cover the transaction metadata
    let intrinsic = tx.intrinsic_gas();
    if tx.gas_limit() < intrinsic {
        return Err(PoolError::IntrinsicGas { needed: intrinsic, allowed: tx.gas_limit() })
    }
    if tx.gas_price() < opts.min_tip {
        return Err(PoolError::Underpriced)
    }
    Ok(())
}

/// Checks whether a transaction is valid according to the pool's internal
/// state rules (balance, nonce, gaps).
///
/// `first_nonce_gap` is optional: when set, nonces beyond the account's first
/// pooled gap are forbidden; when `None`, gapped insertions are permitted.
/// `existing_expenditure` must return the cumulative cost of the already
/// pooled transactions of the account ahead of the given nonce, and
/// `existing_cost` the cost of the already pooled transaction at exactly that
/// nonce, so replacements and nonce expansions cannot overdraft.
pub(crate) fn validate_transaction_with_state<T, S, G, E, C>(
    tx: &T,
    state: &S,
    first_nonce_gap: Option<G>,
    existing_expenditure: E,
    existing_cost: C,
) -> Result<(), PoolError>
where
    T: PoolTransaction,
    S: StateView,
    G: Fn(&Address) -> u64,
    E: Fn(&Address, u64) -> U256,
    C: Fn(&Address, u64) -> Option<U256>,
{
    if tx.kind() != TxKind::Normal {
        return Ok(())
    }
    // Ensure the transaction adheres to nonce ordering
    let from = tx.sender();
    let next = state.nonce(&from);
    if next > tx.nonce() {
        return Err(PoolError::NonceTooLow { next, tx: tx.nonce() })
    }
    if let Some(first_gap) = first_nonce_gap {
        let gap = first_gap(&from);
        if gap < tx.nonce() {
            return Err(PoolError::NonceTooHigh { tx: tx.nonce(), gap })
        }
    }
    // Ensure the transactor has enough funds to cover the transaction costs
    let balance = state.balance(&from);
    let cost = tx.cost();
    if balance < cost {
        return Err(PoolError::InsufficientFunds { balance, needed: cost })
    }
    // Ensure the transactor can fund replacements or nonce expansions on top
    // of everything it already has pooled ahead of this transaction
    let spent = existing_expenditure(&from, tx.nonce());
    let need = match existing_cost(&from, tx.nonce()) {
        Some(prev) if cost >= prev => spent.saturating_add(cost - prev),
        Some(prev) => spent.saturating_sub(prev - cost),
        None => spent.saturating_add(cost),
    };
    if balance < need {
        return Err(PoolError::InsufficientFunds { balance, needed: need })
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockStateView, MockTransaction};
    use alloy_primitives::B256;

    fn head() -> Header {
        Header {
            hash: B256::random(),
            parent_hash: B256::random(),
            number: 1,
            gas_limit: 1_000_000,
            state_root: B256::random(),
            base_fee: None,
        }
    }

    fn opts() -> ValidationOptions {
        ValidationOptions { max_size: crate::TX_MAX_SIZE, min_tip: U256::from(1) }
    }

    #[test]
    fn rejects_unknown_kinds() {
        let tx = MockTransaction::new(Address::random(), 0).with_kind(TxKind::Other(42));
        assert_eq!(
            validate_transaction(&tx, &head(), &opts()),
            Err(PoolError::TxTypeNotSupported)
        );
    }

    #[test]
    fn protocol_kinds_skip_the_rule_set() {
        // an unsigned zero-gas recharge passes, the same terms as normal don't
        let tx = MockTransaction::new(Address::random(), 0)
            .with_kind(TxKind::Recharge)
            .with_gas_limit(0)
            .unsigned();
        assert_eq!(validate_transaction(&tx, &head(), &opts()), Ok(()));

        let tx = tx.with_kind(TxKind::Normal);
        assert!(validate_transaction(&tx, &head(), &opts()).is_err());
    }

    #[test]
    fn rejects_oversized_and_overgassed() {
        let tx = MockTransaction::new(Address::random(), 0).with_size(crate::TX_MAX_SIZE + 1);
        assert!(matches!(
            validate_transaction(&tx, &head(), &opts()),
            Err(PoolError::OversizedData { .. })
        ));

        let tx = MockTransaction::new(Address::random(), 0).with_gas_limit(2_000_000);
        assert!(matches!(
            validate_transaction(&tx, &head(), &opts()),
            Err(PoolError::GasLimit { .. })
        ));
    }

    #[test]
    fn rejects_cost_overflow() {
        let tx = MockTransaction::new(Address::random(), 0)
            .with_gas_price_raw(U256::MAX)
            .with_gas_limit(2);
        assert_eq!(validate_transaction(&tx, &head(), &opts()), Err(PoolError::PriceVeryHigh));
    }

    #[test]
    fn rejects_bad_signature_and_intrinsic_gas() {
        let tx = MockTransaction::new(Address::random(), 0).unsigned();
        assert_eq!(validate_transaction(&tx, &head(), &opts()), Err(PoolError::InvalidSender));

        let tx = MockTransaction::new(Address::random(), 0).with_gas_limit(20_000);
        assert!(matches!(
            validate_transaction(&tx, &head(), &opts()),
            Err(PoolError::IntrinsicGas { .. })
        ));
    }

    #[test]
    fn rejects_below_min_tip() {
        let tx = MockTransaction::new(Address::random(), 0).with_gas_price(3);
        let opts = ValidationOptions { max_size: crate::TX_MAX_SIZE, min_tip: U256::from(5) };
        assert_eq!(validate_transaction(&tx, &head(), &opts), Err(PoolError::Underpriced));
    }

    #[test]
    fn stateful_checks_nonce_and_funds() {
        let state = MockStateView::default();
        let sender = Address::random();
        state.set_nonce(sender, 5);
        state.set_balance(sender, U256::from(1_000_000u64));

        let stale = MockTransaction::new(sender, 4);
        let err = validate_transaction_with_state(
            &stale,
            &state,
            None::<fn(&Address) -> u64>,
            |_, _| U256::ZERO,
            |_, _| None,
        );
        assert_eq!(err, Err(PoolError::NonceTooLow { next: 5, tx: 4 }));

        let broke = MockTransaction::new(sender, 5).with_gas_price(100).with_gas_limit(100_000);
        let err = validate_transaction_with_state(
            &broke,
            &state,
            None::<fn(&Address) -> u64>,
            |_, _| U256::ZERO,
            |_, _| None,
        );
        assert!(matches!(err, Err(PoolError::InsufficientFunds { .. })));
    }

    #[test]
    fn stateful_accounts_for_pooled_expenditure() {
        let state = MockStateView::default();
        let sender = Address::random();
        state.set_balance(sender, U256::from(25_000u64));

        // cost = 100 * 100 = 10_000
        let tx = MockTransaction::new(sender, 2).with_gas_price(100).with_gas_limit(100);

        // two pooled predecessors at 10_000 each exhaust the balance
        let err = validate_transaction_with_state(
            &tx,
            &state,
            None::<fn(&Address) -> u64>,
            |_, _| U256::from(20_000u64),
            |_, _| None,
        );
        assert!(matches!(err, Err(PoolError::InsufficientFunds { .. })));

        // replacing an existing 9_000 cost entry only needs the bump
        let ok = validate_transaction_with_state(
            &tx,
            &state,
            None::<fn(&Address) -> u64>,
            |_, _| U256::from(20_000u64),
            |_, _| Some(U256::from(9_000u64)),
        );
        assert_eq!(ok, Ok(()));
    }

    #[test]
    fn gap_callback_forbids_far_nonces() {
        let state = MockStateView::default();
        let sender = Address::random();
        let tx = MockTransaction::new(sender, 9);
        let err = validate_transaction_with_state(
            &tx,
            &state,
            Some(|_: &Address| 3u64),
            |_, _| U256::ZERO,
            |_, _| None,
        );
        assert_eq!(err, Err(PoolError::NonceTooHigh { tx: 9, gap: 3 }));
    }
}
