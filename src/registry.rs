//! Fixed-capacity pools addressed by generational keys.
//!
//! Channel slots and message carriers both live in a [`SlotArena`]. A key
//! carries the generation of the entry it was issued for, so a key kept
//! around after its entry was freed (and possibly reused) is recognized as
//! stale instead of silently aliasing the new occupant.

use crate::error::{Error, Result};

/// Opaque handle to an entry in a [`SlotArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Key {
    index: u32,
    generation: u32,
}

impl Key {
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

#[derive(Debug)]
struct Entry<T> {
    generation: u32,
    value: Option<T>,
}

/// A pool of at most `capacity` live values.
#[derive(Debug)]
pub struct SlotArena<T> {
    resource: &'static str,
    capacity: usize,
    entries: Vec<Entry<T>>,
    free: Vec<usize>,
    live: usize,
}

impl<T> SlotArena<T> {
    /// Creates an empty pool. `resource` names the pool in
    /// [`Error::ResourceExhausted`] errors.
    pub fn new(resource: &'static str, capacity: usize) -> Self {
        Self {
            resource,
            capacity,
            entries: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of occupied entries.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Stores a value, failing with `ResourceExhausted` when every entry is
    /// occupied. Freed entries are reused before the pool grows.
    pub fn insert(&mut self, value: T) -> Result<Key> {
        let index = match self.free.pop() {
            Some(index) => index,
            None if self.entries.len() < self.capacity => {
                self.entries.push(Entry {
                    generation: 0,
                    value: None,
                });
                self.entries.len() - 1
            }
            None => {
                return Err(Error::ResourceExhausted {
                    resource: self.resource,
                    capacity: self.capacity,
                })
            }
        };
        let entry = &mut self.entries[index];
        entry.value = Some(value);
        self.live += 1;
        Ok(Key {
            index: index as u32,
            generation: entry.generation,
        })
    }

    pub fn get(&self, key: Key) -> Option<&T> {
        self.entries
            .get(key.index())
            .filter(|e| e.generation == key.generation)
            .and_then(|e| e.value.as_ref())
    }

    pub fn get_mut(&mut self, key: Key) -> Option<&mut T> {
        self.entries
            .get_mut(key.index())
            .filter(|e| e.generation == key.generation)
            .and_then(|e| e.value.as_mut())
    }

    /// Like [`Self::get`], but a stale or unknown key is a protocol
    /// violation.
    pub fn lookup(&self, key: Key) -> Result<&T> {
        self.get(key)
            .ok_or_else(|| Error::violation(format!("stale or unknown {} handle", self.resource)))
    }

    pub fn lookup_mut(&mut self, key: Key) -> Result<&mut T> {
        let resource = self.resource;
        self.get_mut(key)
            .ok_or_else(|| Error::violation(format!("stale or unknown {} handle", resource)))
    }

    /// Frees the entry behind `key` and returns its value. The key, and any
    /// copies of it, are invalid afterwards.
    pub fn remove(&mut self, key: Key) -> Option<T> {
        let entry = self
            .entries
            .get_mut(key.index())
            .filter(|e| e.generation == key.generation)?;
        let value = entry.value.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(key.index());
        self.live -= 1;
        Some(value)
    }

    /// Frees every entry for which `pred` returns true.
    pub fn remove_where<F: FnMut(&T) -> bool>(&mut self, mut pred: F) -> usize {
        let keys: Vec<_> = self
            .iter()
            .filter(|(_, value)| pred(value))
            .map(|(key, _)| key)
            .collect();
        keys.iter().filter(|&&key| self.remove(key).is_some()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Key, &T)> {
        self.entries.iter().enumerate().filter_map(|(index, e)| {
            e.value.as_ref().map(|value| {
                let key = Key {
                    index: index as u32,
                    generation: e.generation,
                };
                (key, value)
            })
        })
    }
}
