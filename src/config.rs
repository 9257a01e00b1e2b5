use alloy_primitives::Address;
use std::time::Duration;
use tracing::warn;

/// One slot of pool capacity, in bytes of serialized transaction.
///
/// All capacity limits are expressed in slots rather than transaction counts,
/// so oversized transactions occupy proportionally more of the pool.
pub const TX_SLOT_SIZE: usize = 32 * 1024;

/// Maximum size of a single transaction the pool accepts: four slots.
pub const TX_MAX_SIZE: usize = 4 * TX_SLOT_SIZE;

/// Time interval to check for evictable queued transactions.
pub(crate) const EVICTION_INTERVAL: Duration = Duration::from_secs(60);

/// Time interval to report transaction pool stats.
pub(crate) const STATS_REPORT_INTERVAL: Duration = Duration::from_secs(8);

/// Configuration options for the transaction pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Addresses that should be treated by default as local.
    pub locals: Vec<Address>,
    /// Whether local transaction handling should be disabled.
    pub no_locals: bool,
    /// Path of the journal of local transactions to survive node restarts.
    /// An empty path disables journaling.
    pub journal: String,
    /// Time interval to regenerate the local transaction journal.
    pub rejournal: Duration,
    /// Minimum gas price to enforce for acceptance into the pool.
    pub price_limit: u64,
    /// Minimum price bump percentage to replace an already existing transaction (nonce).
    pub price_bump: u64,
    /// Number of executable transaction slots guaranteed per account.
    pub account_slots: u64,
    /// Maximum number of executable transaction slots for all accounts.
    pub global_slots: u64,
    /// Maximum number of non-executable transaction slots permitted per account.
    pub account_queue: u64,
    /// Maximum number of non-executable transaction slots for all accounts.
    pub global_queue: u64,
    /// Maximum amount of time non-executable transactions are queued.
    pub lifetime: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            locals: Vec::new(),
            no_locals: false,
            journal: "transactions.encoded".to_string(),
            rejournal: Duration::from_secs(60 * 60),
            price_limit: 1,
            price_bump: 10,
            account_slots: 16,
            // urgent + floating queue capacity with 4:1 ratio
            global_slots: 4096 + 1024,
            account_queue: 64,
            global_queue: 1024,
            lifetime: Duration::from_secs(3 * 60 * 60),
        }
    }
}

impl PoolConfig {
    /// Returns a sanitized copy of the configuration, replacing anything that's
    /// unreasonable or unworkable.
    pub fn sanitize(&self) -> Self {
        let defaults = Self::default();
        let mut conf = self.clone();
        if conf.rejournal < Duration::from_secs(1) {
            warn!(target: "txpool", provided = ?conf.rejournal, "Sanitizing invalid txpool journal time");
            conf.rejournal = Duration::from_secs(1);
        }
        if conf.price_limit < 1 {
            warn!(target: "txpool", provided = conf.price_limit, "Sanitizing invalid txpool price limit");
            conf.price_limit = defaults.price_limit;
        }
        if conf.price_bump < 1 {
            warn!(target: "txpool", provided = conf.price_bump, "Sanitizing invalid txpool price bump");
            conf.price_bump = defaults.price_bump;
        }
        if conf.account_slots < 1 {
            warn!(target: "txpool", provided = conf.account_slots, "Sanitizing invalid txpool account slots");
            conf.account_slots = defaults.account_slots;
        }
        if conf.global_slots < 1 {
            warn!(target: "txpool", provided = conf.global_slots, "Sanitizing invalid txpool global slots");
            conf.global_slots = defaults.global_slots;
        }
        if conf.account_queue < 1 {
            warn!(target: "txpool", provided = conf.account_queue, "Sanitizing invalid txpool account queue");
            conf.account_queue = defaults.account_queue;
        }
        if conf.global_queue < 1 {
            warn!(target: "txpool", provided = conf.global_queue, "Sanitizing invalid txpool global queue");
            conf.global_queue = defaults.global_queue;
        }
        if conf.lifetime.is_zero() {
            warn!(target: "txpool", "Sanitizing invalid txpool lifetime");
            conf.lifetime = defaults.lifetime;
        }
        conf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let config = PoolConfig::default();
        assert_eq!(config.global_slots, 5120);
        assert_eq!(config.price_bump, 10);
        assert!(!config.journal.is_empty());
    }

    #[test]
    fn sanitize_floors_invalid_values() {
        let config = PoolConfig {
            rejournal: Duration::ZERO,
            price_limit: 0,
            price_bump: 0,
            account_slots: 0,
            global_slots: 0,
            account_queue: 0,
            global_queue: 0,
            lifetime: Duration::ZERO,
            ..Default::default()
        };
        let sane = config.sanitize();
        let defaults = PoolConfig::default();
        assert_eq!(sane.rejournal, Duration::from_secs(1));
        assert_eq!(sane.price_limit, defaults.price_limit);
        assert_eq!(sane.price_bump, defaults.price_bump);
        assert_eq!(sane.account_slots, defaults.account_slots);
        assert_eq!(sane.global_slots, defaults.global_slots);
        assert_eq!(sane.account_queue, defaults.account_queue);
        assert_eq!(sane.global_queue, defaults.global_queue);
        assert_eq!(sane.lifetime, defaults.lifetime);
    }

    #[test]
    fn sanitize_keeps_valid_values() {
        let config = PoolConfig { price_limit: 7, global_queue: 2048, ..Default::default() };
        let sane = config.sanitize();
        assert_eq!(sane.price_limit, 7);
        assert_eq!(sane.global_queue, 2048);
    }
}
