//! Bounded set of GPU-resident pages
//!
//! Keeps at most `capacity` pages, each bound to one texture handle. Entries
//! are ordered by last use; eviction removes the least recently used entry.
//! Entries touched in the same tick are ordered by when they were touched, so
//! eviction is deterministic for a given sequence of calls.

use std::collections::{BTreeMap, HashMap};

use crate::core::error::Error;
use crate::core::types::Result;
use crate::render::TextureHandle;
use crate::streaming::page::PageKey;

/// A resident page and its texture
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResidentEntry {
    pub key: PageKey,
    pub handle: TextureHandle,
    /// Tick the page became resident
    pub inserted: u64,
    /// Tick the page was last drawn or kept alive
    pub last_used: u64,
}

struct Slot {
    entry: ResidentEntry,
    /// Sequence number of the last insert or touch, breaks `last_used` ties
    seq: u64,
}

/// Fixed-capacity LRU over resident pages
pub struct PageSet {
    slots: HashMap<PageKey, Slot>,
    /// `(last_used, seq)` -> key, oldest first
    order: BTreeMap<(u64, u64), PageKey>,
    capacity: usize,
    next_seq: u64,
}

impl PageSet {
    /// Create an empty set holding at most `capacity` pages
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity < 1 {
            return Err(Error::Config("page set capacity must be at least 1".into()));
        }
        Ok(Self {
            slots: HashMap::with_capacity(capacity),
            order: BTreeMap::new(),
            capacity,
            next_seq: 0,
        })
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Make `key` resident with `handle`.
    ///
    /// An existing entry for `key` is refreshed in place (new handle, new
    /// last use) and the previous entry is returned. Otherwise, when the set
    /// is full, the least recently used entry is evicted first and returned.
    /// The caller owns the returned entry's handle.
    pub fn insert(&mut self, key: PageKey, handle: TextureHandle, now: u64) -> Option<ResidentEntry> {
        let seq = self.bump_seq();

        if let Some(slot) = self.slots.get_mut(&key) {
            let previous = slot.entry;
            self.order.remove(&(previous.last_used, slot.seq));
            slot.entry.handle = handle;
            slot.entry.last_used = now;
            slot.seq = seq;
            self.order.insert((now, seq), key);
            return Some(previous);
        }

        let evicted = if self.is_full() { self.evict() } else { None };

        self.slots.insert(
            key,
            Slot {
                entry: ResidentEntry {
                    key,
                    handle,
                    inserted: now,
                    last_used: now,
                },
                seq,
            },
        );
        self.order.insert((now, seq), key);
        evicted
    }

    /// Mark a resident page as used at `now`. Returns false if not resident.
    pub fn touch(&mut self, key: PageKey, now: u64) -> bool {
        let seq = self.bump_seq();
        let Some(slot) = self.slots.get_mut(&key) else {
            return false;
        };
        self.order.remove(&(slot.entry.last_used, slot.seq));
        slot.entry.last_used = now;
        slot.seq = seq;
        self.order.insert((now, seq), key);
        true
    }

    /// Remove and return the least recently used entry
    pub fn evict(&mut self) -> Option<ResidentEntry> {
        let (_, key) = self.order.pop_first()?;
        let slot = self.slots.remove(&key)?;
        log::trace!("Evicting page {} (last used {})", key, slot.entry.last_used);
        Some(slot.entry)
    }

    pub fn get(&self, key: PageKey) -> Option<&ResidentEntry> {
        self.slots.get(&key).map(|slot| &slot.entry)
    }

    pub fn contains(&self, key: PageKey) -> bool {
        self.slots.contains_key(&key)
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Resident keys, least recently used first
    pub fn keys(&self) -> impl Iterator<Item = PageKey> + '_ {
        self.order.values().copied()
    }

    /// Remove every entry, least recently used first
    pub fn drain(&mut self) -> Vec<ResidentEntry> {
        let mut drained = Vec::with_capacity(self.slots.len());
        while let Some(entry) = self.evict() {
            drained.push(entry);
        }
        drained
    }
}
