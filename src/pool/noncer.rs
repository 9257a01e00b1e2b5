use crate::traits::StateView;
use alloy_primitives::Address;
use fnv::FnvHashMap;

/// Virtual nonce tracker: the next nonce of each account assuming all of its
/// currently pending transactions get executed.
///
/// Falls back to the state nonce for accounts it has not been told about.
pub(crate) struct Noncer<S> {
    fallback: S,
    nonces: FnvHashMap<Address, u64>,
}

impl<S: StateView> Noncer<S> {
    pub(crate) fn new(fallback: S) -> Self {
        Self { fallback, nonces: FnvHashMap::default() }
    }

    /// Returns the current virtual nonce of the account.
    pub(crate) fn get(&mut self, addr: &Address) -> u64 {
        if let Some(nonce) = self.nonces.get(addr) {
            return *nonce
        }
        let nonce = self.fallback.nonce(addr);
        self.nonces.insert(*addr, nonce);
        nonce
    }

    /// Sets the virtual nonce of the account to the given value.
    pub(crate) fn set(&mut self, addr: Address, nonce: u64) {
        self.nonces.insert(addr, nonce);
    }

    /// Lowers the tracked nonce if the given one is smaller; used when a
    /// pending transaction is removed out from under the account.
    pub(crate) fn set_if_lower(&mut self, addr: Address, nonce: u64) {
        if self.get(&addr) <= nonce {
            return
        }
        self.nonces.insert(addr, nonce);
    }

    /// Replaces the tracked nonces wholesale.
    pub(crate) fn set_all(&mut self, all: FnvHashMap<Address, u64>) {
        self.nonces = all;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockStateView;

    #[test]
    fn falls_back_to_state_nonce() {
        let state = MockStateView::default();
        let addr = Address::random();
        state.set_nonce(addr, 7);

        let mut noncer = Noncer::new(state);
        assert_eq!(noncer.get(&addr), 7);

        noncer.set(addr, 9);
        assert_eq!(noncer.get(&addr), 9);

        noncer.set_if_lower(addr, 12);
        assert_eq!(noncer.get(&addr), 9);
        noncer.set_if_lower(addr, 4);
        assert_eq!(noncer.get(&addr), 4);
    }
}
