//! Descriptor-keyed table of live connection records.

use std::collections::HashMap;

use mio::Token;
use thiserror::Error;

/// Releases what a record holds before it is dropped.
///
/// Called exactly once, when the record leaves the registry.
pub trait Teardown {
    fn teardown(&mut self);
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("connection registry is full ({capacity} entries)")]
pub struct RegistryFull {
    pub capacity: usize,
}

/// A size-bounded map from descriptor token to connection record.
///
/// Every registered descriptor has exactly one record. Removing a record
/// tears it down; looking up a removed key yields `None`, which is how stale
/// readiness notifications get ignored.
#[derive(Debug)]
pub struct ConnectionRegistry<T> {
    entries: HashMap<Token, T>,
    capacity: usize,
}

impl<T: Teardown> ConnectionRegistry<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Inserts or updates the record for `key`.
    ///
    /// Re-inserting an existing key replaces its record in place and hands
    /// back the old one without tearing it down.
    pub fn insert(&mut self, key: Token, value: T) -> Result<Option<T>, RegistryFull> {
        if !self.entries.contains_key(&key) && self.is_full() {
            return Err(RegistryFull {
                capacity: self.capacity,
            });
        }

        Ok(self.entries.insert(key, value))
    }

    pub fn get(&self, key: Token) -> Option<&T> {
        self.entries.get(&key)
    }

    pub fn get_mut(&mut self, key: Token) -> Option<&mut T> {
        self.entries.get_mut(&key)
    }

    pub fn contains(&self, key: Token) -> bool {
        self.entries.contains_key(&key)
    }

    /// Removes and tears down the record for `key`. Unknown keys are a no-op.
    pub fn remove(&mut self, key: Token) -> Option<T> {
        let mut value = self.entries.remove(&key)?;
        value.teardown();
        Some(value)
    }

    /// Tears down every record, each exactly once, and releases the table's
    /// storage. Returns how many records were removed.
    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        for (_, mut value) in self.entries.drain() {
            value.teardown();
        }
        self.entries.shrink_to_fit();
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn keys(&self) -> Vec<Token> {
        self.entries.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Token, &T)> {
        self.entries.iter().map(|(key, value)| (*key, value))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Token, &mut T)> {
        self.entries.iter_mut().map(|(key, value)| (*key, value))
    }
}
