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

//! Shape resources and logical sub-shape identity.
//!
//! Collision shapes are engine-owned objects; the crate stores them in a
//! generational pool and hands out stable [`ShapeHandle`]s. A body is composed
//! of one or more *logical sub-shapes*, each referring to a pooled shape with a
//! local transform and a caller-supplied tag. Query results report logical
//! indices and tags, never the engine's own collider identifiers.

use crate::pool::Handle;
use fxhash::FxHashMap;
use nalgebra::Isometry3;
use rapier3d::geometry::{ColliderHandle, SharedShape};

/// A pooled collision shape plus the density used when instancing it on bodies.
pub struct ShapeResource {
    pub(crate) shape: SharedShape,
    pub(crate) density: f32,
}

impl ShapeResource {
    pub fn new(shape: SharedShape, density: f32) -> Self {
        Self { shape, density }
    }

    /// The wrapped engine shape.
    #[inline]
    pub fn shape(&self) -> &SharedShape {
        &self.shape
    }

    #[inline]
    pub fn density(&self) -> f32 {
        self.density
    }
}

/// Stable handle to a pooled shape.
pub type ShapeHandle = Handle<ShapeResource>;

/// Resolved identity of a sub-shape hit by a query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubShapeInfo {
    /// Logical index the caller received from `add_sub_shape`.
    pub index: u32,
    /// Caller-supplied tag of that sub-shape.
    pub tag: u64,
}

impl SubShapeInfo {
    /// Sentinel returned when the engine identifier does not map to any
    /// registered logical sub-shape.
    pub const NOT_FOUND: SubShapeInfo = SubShapeInfo {
        index: u32::MAX,
        tag: u64::MAX,
    };

    #[inline]
    pub fn is_found(&self) -> bool {
        *self != Self::NOT_FOUND
    }
}

/// One logical sub-shape of a body.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SubShapeSlot {
    pub shape: ShapeHandle,
    pub local: Isometry3<f32>,
    pub tag: u64,
}

/// Per-body table of logical sub-shapes and the mapping from the engine's
/// collider identifiers back to logical indices.
///
/// Mutations only mark the set dirty; the composite is rebuilt from scratch on
/// commit. The rebuild is always full, never incremental - the policy is
/// confined to [`crate::world::PhysicsWorld::commit_shapes`] and this table, so
/// an incremental structure can replace it without touching callers.
#[derive(Default)]
pub(crate) struct SubShapeSet {
    slots: Vec<Option<SubShapeSlot>>,
    collider_map: FxHashMap<ColliderHandle, u32>,
    colliders: Vec<ColliderHandle>,
    dirty: bool,
}

impl SubShapeSet {
    /// Registers a sub-shape and returns its logical index. Indices of removed
    /// slots are reused; live indices never move.
    pub fn add(&mut self, slot: SubShapeSlot) -> u32 {
        self.dirty = true;
        match self.slots.iter().position(|s| s.is_none()) {
            Some(vacant) => {
                self.slots[vacant] = Some(slot);
                vacant as u32
            }
            None => {
                self.slots.push(Some(slot));
                (self.slots.len() - 1) as u32
            }
        }
    }

    pub fn remove(&mut self, index: u32) -> bool {
        match self.slots.get_mut(index as usize) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                self.dirty = true;
                true
            }
            _ => false,
        }
    }

    pub fn set_local(&mut self, index: u32, local: Isometry3<f32>) -> bool {
        match self.slots.get_mut(index as usize).and_then(Option::as_mut) {
            Some(slot) => {
                slot.local = local;
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, index: u32) -> Option<&SubShapeSlot> {
        self.slots.get(index as usize).and_then(Option::as_ref)
    }

    pub fn occupied(&self) -> impl Iterator<Item = (u32, SubShapeSlot)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|s| (index as u32, *s)))
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Colliders currently realizing this set in the engine.
    pub fn colliders(&self) -> &[ColliderHandle] {
        &self.colliders
    }

    /// Takes ownership of the realized colliders and clears the identifier map;
    /// called at the start of a rebuild.
    pub fn take_colliders(&mut self) -> Vec<ColliderHandle> {
        self.collider_map.clear();
        std::mem::take(&mut self.colliders)
    }

    /// Records the freshly built colliders, in storage order, with the logical
    /// index each one realizes.
    pub fn set_colliders(&mut self, built: Vec<(ColliderHandle, u32)>) {
        self.collider_map.clear();
        self.colliders.clear();
        for (collider, index) in built {
            self.collider_map.insert(collider, index);
            self.colliders.push(collider);
        }
        self.dirty = false;
    }

    /// Maps an engine collider identifier back to the logical sub-shape.
    ///
    /// A body with exactly one sub-shape resolves to it without consulting the
    /// identifier at all. This is required for correctness, not speed: such a
    /// body is realized as a plain leaf shape, and the engine has no usable
    /// sub-shape identifier to offer for a non-composite leaf.
    pub fn resolve(&self, collider: ColliderHandle) -> SubShapeInfo {
        let mut occupied = self.occupied();
        if let (Some((index, slot)), None) = (occupied.next(), occupied.next()) {
            return SubShapeInfo {
                index,
                tag: slot.tag,
            };
        }
        match self.collider_map.get(&collider) {
            Some(&index) => match self.get(index) {
                Some(slot) => SubShapeInfo {
                    index,
                    tag: slot.tag,
                },
                None => SubShapeInfo::NOT_FOUND,
            },
            None => SubShapeInfo::NOT_FOUND,
        }
    }
}
