//! Bounded LRU store for session keys derived by the HiChain engine.
//!
//! # Invariants
//!
//! - Capacity is fixed at construction; inserting past capacity evicts the
//!   oldest entry by insertion order.
//! - `get_by_index` resolves ties newest-first: if two entries share an
//!   index (e.g. after eviction and re-derivation), the most recently
//!   inserted one wins.
//! - `get_by_device_and_index` resolves ties oldest-first, matching a peer
//!   that re-sends its original index after a partial re-handshake.

use std::sync::RwLock;

use hichain_crypto::SessionKeyBytes;

/// A derived symmetric key, indexed and associated with the device that
/// negotiated it.
#[derive(Debug, Clone)]
pub struct SessionKeyEntry {
    /// Key bytes (16 bytes, AES-128).
    pub key: SessionKeyBytes,
    /// Index under which this key was inserted (the auth seq it was
    /// derived for).
    pub index: i64,
    /// Device id of the peer this key was negotiated with.
    pub device_id: String,
}

/// Bounded, insertion-ordered collection of session keys.
///
/// Default capacity is 2, matching the spec's bound on concurrently valid
/// keys per connection (current + one in-flight re-negotiation).
pub struct SessionKeyStore {
    capacity: usize,
    entries: RwLock<Vec<SessionKeyEntry>>,
}

impl SessionKeyStore {
    /// Default capacity (2 live keys).
    pub const DEFAULT_CAPACITY: usize = 2;

    /// Build an empty store with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { capacity, entries: RwLock::new(Vec::with_capacity(capacity)) }
    }

    /// Insert a key, evicting the oldest entry if this would exceed
    /// capacity.
    pub fn insert(&self, entry: SessionKeyEntry) {
        let mut entries = self.entries.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        if entries.len() >= self.capacity {
            entries.remove(0);
        }
        entries.push(entry);
    }

    /// Look up by index, newest insertion wins on collision.
    #[must_use]
    pub fn get_by_index(&self, index: i64) -> Option<SessionKeyEntry> {
        let entries = self.entries.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.iter().rev().find(|entry| entry.index == index).cloned()
    }

    /// Look up by (device id, index), oldest insertion wins on collision.
    #[must_use]
    pub fn get_by_device_and_index(&self, device_id: &str, index: i64) -> Option<SessionKeyEntry> {
        let entries = self.entries.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.iter().find(|entry| entry.device_id == device_id && entry.index == index).cloned()
    }

    /// The most recently inserted key, if any.
    #[must_use]
    pub fn get_newest(&self) -> Option<SessionKeyEntry> {
        let entries = self.entries.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.last().cloned()
    }

    /// Remove every entry belonging to `device_id`.
    pub fn evict_device(&self, device_id: &str) {
        let mut entries = self.entries.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.retain(|entry| entry.device_id != device_id);
    }

    /// Remove the single entry whose index equals `index`, if present.
    pub fn evict_index(&self, index: i64) {
        let mut entries = self.entries.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(pos) = entries.iter().position(|entry| entry.index == index) {
            entries.remove(pos);
        }
    }

    /// Current number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(std::sync::PoisonError::into_inner).len()
    }

    /// Whether the store currently holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionKeyStore {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
