//! Growable, order-agnostic table of connection handles.

use crate::error::GrowError;
use std::ops::{Index, IndexMut};

/// Starting capacity used when none is configured.
pub const DEFAULT_INITIAL_CAPACITY: usize = 5;

/// Table of live connection handles with amortized O(1) insertion and O(1)
/// removal.
///
/// Slot 0 is the anchor slot: the relay server puts its listener there and it
/// stays there for the lifetime of the set. [`remove_at`](Self::remove_at)
/// refuses to touch it. All other slots are unordered.
///
/// Capacity is tracked explicitly and doubles whenever an add finds the set
/// full. Growth goes through [`Vec::try_reserve_exact`], so running out of
/// memory (or hitting the optional slot limit) fails the add instead of
/// aborting the process.
#[derive(Debug)]
pub struct ConnectionSet<T> {
    slots: Vec<T>,
    capacity: usize,
    limit: Option<usize>,
}

impl<T> ConnectionSet<T> {
    /// Creates an empty set with room for `initial_capacity` handles.
    ///
    /// An initial capacity of zero is bumped to one so that doubling makes
    /// progress.
    pub fn new(initial_capacity: usize) -> Self {
        let capacity = initial_capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            limit: None,
        }
    }

    /// Creates an empty set that never holds more than `limit` handles.
    ///
    /// Growth stops at `limit`: the doubling step is clamped to it and adds
    /// beyond it fail like an allocation failure would.
    pub fn with_limit(initial_capacity: usize, limit: usize) -> Self {
        let limit = limit.max(1);
        let mut set = Self::new(initial_capacity.min(limit));
        set.limit = Some(limit);
        set
    }

    /// Appends `item` and returns the slot it landed in.
    ///
    /// When the set is full its capacity doubles first. If that growth fails
    /// the set is left exactly as it was and `item` is handed back inside the
    /// error.
    pub fn add(&mut self, item: T) -> Result<usize, GrowError<T>> {
        if self.slots.len() == self.capacity {
            if let Err(capacity) = self.grow() {
                return Err(GrowError::new(item, capacity));
            }
        }
        debug_assert!(self.slots.len() < self.capacity);

        self.slots.push(item);
        Ok(self.slots.len() - 1)
    }

    /// Removes the handle at `index` in O(1) and returns it.
    ///
    /// The handle from the last occupied slot is moved into `index`, so
    /// removal does not preserve order. A caller scanning by index must look
    /// at `index` again after a removal and re-read [`len`](Self::len) as its
    /// bound.
    ///
    /// # Panics
    ///
    /// Panics if `index` is 0 (the anchor slot) or out of bounds.
    pub fn remove_at(&mut self, index: usize) -> T {
        assert!(index != 0, "Slot 0 is pinned and cannot be removed");
        assert!(
            index < self.slots.len(),
            "Slot {} out of bounds for connection set of length {}",
            index,
            self.slots.len()
        );
        self.slots.swap_remove(index)
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of slots available before the next doubling.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.slots.get_mut(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.slots.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.slots.iter_mut()
    }

    // On failure returns the unchanged capacity.
    fn grow(&mut self) -> Result<(), usize> {
        let mut new_capacity = self.capacity.checked_mul(2).ok_or(self.capacity)?;
        if let Some(limit) = self.limit {
            new_capacity = new_capacity.min(limit);
        }
        if new_capacity <= self.capacity {
            return Err(self.capacity);
        }

        self.slots
            .try_reserve_exact(new_capacity - self.slots.len())
            .map_err(|_| self.capacity)?;
        self.capacity = new_capacity;
        Ok(())
    }
}

impl<T> Index<usize> for ConnectionSet<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.slots[index]
    }
}

impl<T> IndexMut<usize> for ConnectionSet<T> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        &mut self.slots[index]
    }
}

impl<'a, T> IntoIterator for &'a ConnectionSet<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.slots.iter()
    }
}
