use crate::traits::PoolTransaction;
use alloy_primitives::Address;
use std::collections::HashSet;

/// The set of accounts whose transactions are treated as local: exempt from
/// eviction rules and persisted through the journal.
///
/// The set only grows during normal operation; it is replaced wholesale at
/// shutdown.
pub(crate) struct AccountSet {
    accounts: HashSet<Address>,
    cache: Option<Vec<Address>>,
}

impl AccountSet {
    pub(crate) fn new() -> Self {
        Self { accounts: HashSet::new(), cache: None }
    }

    /// Checks if a given address is contained within the set.
    pub(crate) fn contains(&self, addr: &Address) -> bool {
        self.accounts.contains(addr)
    }

    /// Checks if the sender of a given transaction is within the set.
    pub(crate) fn contains_tx<T: PoolTransaction>(&self, tx: &T) -> bool {
        self.contains(&tx.sender())
    }

    /// Inserts a new address into the set to track.
    pub(crate) fn add(&mut self, addr: Address) {
        self.accounts.insert(addr);
        self.cache = None;
    }

    /// Adds the sender of the transaction into the set.
    pub(crate) fn add_tx<T: PoolTransaction>(&mut self, tx: &T) {
        self.add(tx.sender());
    }

    /// Copies all addresses from the other set into this one.
    pub(crate) fn merge(&mut self, other: &AccountSet) {
        self.accounts.extend(other.accounts.iter().copied());
        self.cache = None;
    }

    /// Returns the list of addresses within this set, caching it for later
    /// reuse until the next mutation.
    pub(crate) fn flatten(&mut self) -> Vec<Address> {
        if self.cache.is_none() {
            self.cache = Some(self.accounts.iter().copied().collect());
        }
        self.cache.clone().unwrap_or_default()
    }

    pub(crate) fn len(&self) -> usize {
        self.accounts.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockTransaction;

    #[test]
    fn tracks_addresses_and_senders() {
        let mut set = AccountSet::new();
        assert!(set.is_empty());

        let tx = MockTransaction::new(Address::random(), 0);
        assert!(!set.contains_tx(&tx));
        set.add_tx(&tx);
        assert!(set.contains_tx(&tx));
        assert!(set.contains(&tx.sender()));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn merge_unions_the_sets() {
        let (a, b) = (Address::random(), Address::random());
        let mut left = AccountSet::new();
        left.add(a);
        let mut right = AccountSet::new();
        right.add(b);
        left.merge(&right);
        assert!(left.contains(&a));
        assert!(left.contains(&b));

        let mut flat = left.flatten();
        flat.sort_unstable();
        let mut expected = vec![a, b];
        expected.sort_unstable();
        assert_eq!(flat, expected);
    }
}
