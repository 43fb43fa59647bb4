//! Request pool.
//!
//! Fixed-capacity slab for transient request objects. Slots are recycled
//! through a free list; every reuse bumps the slot generation so a stale
//! [`RequestId`] (for example in a late completion event) never resolves to a
//! newer request.

use std::fmt;

use crate::error::{LanewireError, Result};

/// Handle to a request held in a [`RequestPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId {
    index: u32,
    generation: u32,
}

impl RequestId {
    #[inline]
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index as usize
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req#{}.{}", self.index, self.generation)
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Bounded slab of requests.
#[derive(Debug)]
pub struct RequestPool<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    capacity: usize,
    len: usize,
}

impl<T> RequestPool<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            capacity,
            len: 0,
        }
    }

    /// Store `value`, returning its handle.
    ///
    /// Fails with `NoMemory` once `capacity` requests are live.
    pub fn alloc(&mut self, value: T) -> Result<RequestId> {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.value = Some(value);
            self.len += 1;
            return Ok(RequestId {
                index,
                generation: slot.generation,
            });
        }

        if self.slots.len() >= self.capacity {
            return Err(LanewireError::NoMemory("request pool exhausted"));
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        self.len += 1;
        Ok(RequestId {
            index,
            generation: 0,
        })
    }

    /// Remove the request, returning it. `None` for a stale or unknown id.
    pub fn release(&mut self, id: RequestId) -> Option<T> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation {
            return None;
        }
        let value = slot.value.take()?;
        self.free.push(id.index);
        self.len -= 1;
        Some(value)
    }

    #[must_use]
    pub fn get(&self, id: RequestId) -> Option<&T> {
        self.slots
            .get(id.index())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, id: RequestId) -> Option<&mut T> {
        self.slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    /// Handles of all live requests.
    #[must_use]
    pub fn ids(&self) -> Vec<RequestId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.value.is_some())
            .map(|(index, slot)| RequestId {
                index: index as u32,
                generation: slot.generation,
            })
            .collect()
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}
