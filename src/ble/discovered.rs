//! Peripherals seen during the current scan pass.
//!
//! The radio needs the platform peripheral object to connect, so every
//! advertiser is remembered. Advertisers with rotating random addresses
//! would otherwise fill the table forever: it is emptied at the start of
//! each pass and holds at most `capacity` entries, evicting the one seen
//! least recently.

use std::collections::HashMap;

/// Default number of peripherals remembered per pass.
pub const DEFAULT_DISCOVERY_CAPACITY: usize = 256;

/// Bounded address → peripheral table.
#[derive(Debug)]
pub struct DiscoveredPeripherals<P> {
    entries: HashMap<String, (P, u64)>,
    capacity: usize,
    /// Bumped on every insert; the smallest stamp is evicted first.
    clock: u64,
}

impl<P: Clone> DiscoveredPeripherals<P> {
    /// Create a table holding at most `capacity` peripherals (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
            clock: 0,
        }
    }

    /// Remember `peripheral` under `address`, refreshing it if already known.
    pub fn insert(&mut self, address: impl Into<String>, peripheral: P) {
        let address = address.into();
        self.clock += 1;

        if !self.entries.contains_key(&address) && self.entries.len() >= self.capacity {
            let stalest = self
                .entries
                .iter()
                .min_by_key(|(_, (_, seen))| *seen)
                .map(|(address, _)| address.clone());
            if let Some(stalest) = stalest {
                self.entries.remove(&stalest);
            }
        }

        self.entries.insert(address, (peripheral, self.clock));
    }

    /// Look up a peripheral by address.
    pub fn get(&self, address: &str) -> Option<P> {
        self.entries.get(address).map(|(peripheral, _)| peripheral.clone())
    }

    /// Forget everything. Called when a new scan pass begins.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of remembered peripherals.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is remembered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<P: Clone> Default for DiscoveredPeripherals<P> {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_DISCOVERY_CAPACITY)
    }
}
