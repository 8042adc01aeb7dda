// Copyright (c) 2024-present Tidal Physics contributors.
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! A generational arena - a contiguous growable array type which allows removing
//! from the middle without shifting and therefore without invalidating other indices.
//!
//! The pool hands out [`Handle`]s instead of references. A handle stores the index
//! of the record it points to plus the generation of that record at the time the
//! handle was issued. Freeing a record bumps its generation, so every handle that
//! pointed to the old object becomes detectably stale instead of silently aliasing
//! whatever gets spawned into the reused slot later. This is what makes handles
//! safe to keep around across unrelated insertions and removals.

use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    fmt::{Debug, Display, Formatter},
    hash::{Hash, Hasher},
    marker::PhantomData,
    ops::{Index, IndexMut},
};

/// Generation that is never assigned to an alive record.
pub const INVALID_GENERATION: u32 = 0;

/// Non-owning reference to an object stored in a [`Pool`]. Stays the same size as
/// a `u64` and is freely copyable; validity can always be checked against the pool
/// that issued it.
#[derive(Serialize, Deserialize)]
pub struct Handle<T> {
    /// Index of the record in the pool.
    index: u32,
    /// Generation of the record at the time this handle was issued. The handle is
    /// valid only while these match.
    generation: u32,
    #[serde(skip)]
    type_marker: PhantomData<T>,
}

impl<T> Handle<T> {
    /// "Null" handle, never resolves to an object.
    pub const NONE: Handle<T> = Handle {
        index: 0,
        generation: INVALID_GENERATION,
        type_marker: PhantomData,
    };

    #[inline(always)]
    pub fn is_none(self) -> bool {
        self.index == 0 && self.generation == INVALID_GENERATION
    }

    #[inline(always)]
    pub fn is_some(self) -> bool {
        !self.is_none()
    }

    #[inline(always)]
    pub fn index(self) -> u32 {
        self.index
    }

    #[inline(always)]
    pub fn generation(self) -> u32 {
        self.generation
    }

    #[inline(always)]
    pub fn new(index: u32, generation: u32) -> Self {
        Handle {
            index,
            generation,
            type_marker: PhantomData,
        }
    }

    /// Packs the handle into a single integer, index in the low half.
    #[inline(always)]
    pub fn encode_to_u64(self) -> u64 {
        (self.index as u64) | ((self.generation as u64) << 32)
    }

    #[inline(always)]
    pub fn decode_from_u64(num: u64) -> Self {
        Self {
            index: num as u32,
            generation: (num >> 32) as u32,
            type_marker: PhantomData,
        }
    }
}

impl<T> Clone for Handle<T> {
    #[inline]
    fn clone(&self) -> Handle<T> {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> Default for Handle<T> {
    #[inline]
    fn default() -> Self {
        Self::NONE
    }
}

impl<T> PartialEq for Handle<T> {
    #[inline]
    fn eq(&self, other: &Handle<T>) -> bool {
        self.generation == other.generation && self.index == other.index
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> PartialOrd for Handle<T> {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Handle<T> {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.index.cmp(&other.index)
    }
}

impl<T> Display for Handle<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.index, self.generation)
    }
}

impl<T> Debug for Handle<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[Idx: {}; Gen: {}]", self.index, self.generation)
    }
}

#[derive(Debug, Clone)]
struct PoolRecord<T> {
    /// Incremented on every free, so handles from previous occupants never match.
    generation: u32,
    payload: Option<T>,
}

/// Pool stores objects in a contiguous block of memory and gives out generational
/// [`Handle`]s to them. Freed slots are reused by later spawns, but with a bumped
/// generation, which turns every use-after-free into a recoverable error instead
/// of undefined behavior.
#[derive(Debug, Clone)]
pub struct Pool<T> {
    records: Vec<PoolRecord<T>>,
    free_stack: Vec<u32>,
}

impl<T> Default for Pool<T> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Pool<T> {
    #[inline]
    pub fn new() -> Self {
        Pool {
            records: Vec::new(),
            free_stack: Vec::new(),
        }
    }

    #[inline]
    pub fn with_capacity(capacity: u32) -> Self {
        Pool {
            records: Vec::with_capacity(capacity as usize),
            free_stack: Vec::new(),
        }
    }

    /// Puts an object into the pool and returns a fresh handle to it.
    #[inline]
    #[must_use]
    pub fn spawn(&mut self, payload: T) -> Handle<T> {
        self.spawn_with(|_| payload)
    }

    /// Construct a value with the handle it would be given.
    /// Note: Handle is _not_ valid until function has finished executing.
    #[inline]
    #[must_use]
    pub fn spawn_with<F: FnOnce(Handle<T>) -> T>(&mut self, callback: F) -> Handle<T> {
        if let Some(free_index) = self.free_stack.pop() {
            let record = &mut self.records[free_index as usize];

            if record.payload.is_some() {
                panic!(
                    "Attempt to spawn an object at pool record with payload! Record index is {}",
                    free_index
                );
            }

            let generation = record.generation + 1;
            let handle = Handle::new(free_index, generation);

            let payload = callback(handle);

            record.generation = generation;
            record.payload = Some(payload);
            handle
        } else {
            let generation = 1;
            let handle = Handle::new(self.records.len() as u32, generation);

            let payload = callback(handle);

            self.records.push(PoolRecord {
                generation,
                payload: Some(payload),
            });

            handle
        }
    }

    /// Destroys the object the handle points to and returns it.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale or out of bounds. Use [`Pool::try_free`] when
    /// the handle comes from an untrusted source.
    #[inline]
    pub fn free(&mut self, handle: Handle<T>) -> T {
        match self.try_free(handle) {
            Some(payload) => payload,
            None => panic!("Attempt to free destroyed object at {:?} handle.", handle),
        }
    }

    /// Destroys the object the handle points to. Returns `None` (leaving the pool
    /// untouched) if the handle is stale, out of bounds or already freed.
    #[inline]
    pub fn try_free(&mut self, handle: Handle<T>) -> Option<T> {
        let record = self.records.get_mut(handle.index as usize)?;
        if record.generation != handle.generation {
            return None;
        }
        let payload = record.payload.take()?;
        // Bump generation here as well, so a stale handle cannot match a record
        // that sits on the free stack.
        record.generation += 1;
        self.free_stack.push(handle.index);
        Some(payload)
    }

    /// Borrows an object by its handle.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale or out of bounds.
    #[inline]
    #[must_use]
    pub fn borrow(&self, handle: Handle<T>) -> &T {
        self.try_borrow(handle).unwrap_or_else(|| {
            panic!(
                "Attempt to borrow object using dangling handle {:?}!",
                handle
            )
        })
    }

    /// Mutably borrows an object by its handle.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale or out of bounds.
    #[inline]
    #[must_use]
    pub fn borrow_mut(&mut self, handle: Handle<T>) -> &mut T {
        self.try_borrow_mut(handle).unwrap_or_else(|| {
            panic!(
                "Attempt to borrow object using dangling handle {:?}!",
                handle
            )
        })
    }

    /// Borrows an object by its handle, `None` if the handle is stale.
    #[inline]
    #[must_use]
    pub fn try_borrow(&self, handle: Handle<T>) -> Option<&T> {
        self.records
            .get(handle.index as usize)
            .filter(|record| record.generation == handle.generation)
            .and_then(|record| record.payload.as_ref())
    }

    /// Mutably borrows an object by its handle, `None` if the handle is stale.
    #[inline]
    #[must_use]
    pub fn try_borrow_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        self.records
            .get_mut(handle.index as usize)
            .filter(|record| record.generation == handle.generation)
            .and_then(|record| record.payload.as_mut())
    }

    #[inline]
    pub fn is_valid_handle(&self, handle: Handle<T>) -> bool {
        self.try_borrow(handle).is_some()
    }

    /// Amount of alive objects in the pool.
    #[inline]
    pub fn alive_count(&self) -> u32 {
        self.iter().count() as u32
    }

    /// Total amount of records, including vacant ones.
    #[inline]
    pub fn total_count(&self) -> u32 {
        self.records.len() as u32
    }

    /// Destroys every object in the pool. All outstanding handles become stale.
    #[inline]
    pub fn clear(&mut self) {
        for (index, record) in self.records.iter_mut().enumerate() {
            if record.payload.take().is_some() {
                record.generation += 1;
                self.free_stack.push(index as u32);
            }
        }
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.records.iter().filter_map(|r| r.payload.as_ref())
    }

    #[inline]
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.records.iter_mut().filter_map(|r| r.payload.as_mut())
    }

    /// Iterates over alive records, yielding the handle together with the object.
    #[inline]
    pub fn pair_iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.records.iter().enumerate().filter_map(|(i, r)| {
            r.payload
                .as_ref()
                .map(|payload| (Handle::new(i as u32, r.generation), payload))
        })
    }

    #[inline]
    pub fn pair_iter_mut(&mut self) -> impl Iterator<Item = (Handle<T>, &mut T)> {
        self.records.iter_mut().enumerate().filter_map(|(i, r)| {
            r.payload
                .as_mut()
                .map(|payload| (Handle::new(i as u32, r.generation), payload))
        })
    }
}

impl<T> Index<Handle<T>> for Pool<T> {
    type Output = T;

    #[inline]
    fn index(&self, index: Handle<T>) -> &Self::Output {
        self.borrow(index)
    }
}

impl<T> IndexMut<Handle<T>> for Pool<T> {
    #[inline]
    fn index_mut(&mut self, index: Handle<T>) -> &mut Self::Output {
        self.borrow_mut(index)
    }
}
