//! Fixed-capacity open-addressing hash table.
//!
//! The table never grows: capacity is chosen at construction and an insert
//! into a full table fails with [`TableError::Full`]. Collisions are resolved
//! by linear probing from `hash(key) % capacity`, wrapping around once.
//!
//! Removal uses backward-shift deletion. Clearing a slot in place would cut
//! the probe chain of every key that was displaced past it, making those keys
//! unreachable; shifting the tail of the cluster back keeps every chain intact
//! without tombstones.

use std::borrow::Borrow;

use thiserror::Error;

/// Errors reported by [`OpenTable::insert`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TableError {
    #[error("table is full")]
    Full,
    #[error("key is already present")]
    Duplicate,
    #[error("key is reserved as the empty marker")]
    ReservedKey,
}

/// A key usable in an [`OpenTable`].
///
/// Every key domain reserves one value that can never be stored: it stands for
/// "no key" in the source format and is rejected on insert.
pub trait SlotKey {
    fn slot_hash(&self) -> usize;
    fn is_reserved(&self) -> bool;
}

impl SlotKey for u32 {
    fn slot_hash(&self) -> usize {
        *self as usize
    }

    fn is_reserved(&self) -> bool {
        *self == u32::MAX
    }
}

impl SlotKey for str {
    fn slot_hash(&self) -> usize {
        self.bytes()
            .fold(0usize, |hash, b| hash.wrapping_mul(31).wrapping_add(b as usize))
    }

    fn is_reserved(&self) -> bool {
        self.is_empty()
    }
}

impl SlotKey for String {
    fn slot_hash(&self) -> usize {
        self.as_str().slot_hash()
    }

    fn is_reserved(&self) -> bool {
        self.is_empty()
    }
}

/// Socket-keyed table holding per-connection state.
pub type SocketTable<V> = OpenTable<u32, V>;

/// Name-keyed table holding modules or handlers.
pub type NameTable<V> = OpenTable<String, V>;

pub struct OpenTable<K, V> {
    slots: Vec<Option<(K, V)>>,
    len: usize,
}

impl<K: SlotKey + Eq, V> OpenTable<K, V> {
    /// Creates a table with exactly `capacity` slots (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots, len: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    fn home<Q: SlotKey + ?Sized>(&self, key: &Q) -> usize {
        key.slot_hash() % self.slots.len()
    }

    /// Returns the slot index holding `key`, if any.
    fn find<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: SlotKey + Eq + ?Sized,
    {
        if key.is_reserved() {
            return None;
        }
        let cap = self.slots.len();
        let start = self.home(key);
        for step in 0..cap {
            let idx = (start + step) % cap;
            match &self.slots[idx] {
                None => return None,
                Some((k, _)) if <K as Borrow<Q>>::borrow(k) == key => return Some(idx),
                Some(_) => {}
            }
        }
        None
    }

    /// Inserts a new entry. Existing entries are never overwritten.
    pub fn insert(&mut self, key: K, value: V) -> Result<(), TableError> {
        if key.is_reserved() {
            return Err(TableError::ReservedKey);
        }
        let cap = self.slots.len();
        let start = self.home(&key);
        for step in 0..cap {
            let idx = (start + step) % cap;
            match &self.slots[idx] {
                None => {
                    self.slots[idx] = Some((key, value));
                    self.len += 1;
                    return Ok(());
                }
                Some((k, _)) if *k == key => return Err(TableError::Duplicate),
                Some(_) => {}
            }
        }
        Err(TableError::Full)
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: SlotKey + Eq + ?Sized,
    {
        let idx = self.find(key)?;
        self.slots[idx].as_ref().map(|(_, v)| v)
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: SlotKey + Eq + ?Sized,
    {
        let idx = self.find(key)?;
        self.slots[idx].as_mut().map(|(_, v)| v)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: SlotKey + Eq + ?Sized,
    {
        self.find(key).is_some()
    }

    /// Removes `key` and returns its value, shifting the rest of the probe
    /// cluster back so later lookups still find displaced keys.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: SlotKey + Eq + ?Sized,
    {
        let mut hole = self.find(key)?;
        let (_, value) = self.slots[hole].take()?;
        self.len -= 1;

        let cap = self.slots.len();
        let mut next = (hole + 1) % cap;
        while let Some((k, _)) = &self.slots[next] {
            let home = self.home(k);
            // The entry may move into the hole only if its home slot does not
            // lie cyclically within (hole, next].
            let stays = if hole <= next {
                hole < home && home <= next
            } else {
                hole < home || home <= next
            };
            if !stays {
                self.slots[hole] = self.slots[next].take();
                hole = next;
            }
            next = (next + 1) % cap;
        }

        Some(value)
    }

    /// Removes and returns every entry.
    pub fn drain(&mut self) -> Vec<(K, V)> {
        self.len = 0;
        self.slots.iter_mut().filter_map(Option::take).collect()
    }

    /// Iterates entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.slots
            .iter()
            .filter_map(|slot| slot.as_ref().map(|(k, v)| (k, v)))
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(k, _)| k)
    }
}
