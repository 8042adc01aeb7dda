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

//! Contact membership tracking for volume bodies.

use crate::world::BodyHandle;
use parking_lot::Mutex;
use rapier3d::{
    dynamics::RigidBodySet,
    geometry::{ColliderSet, ContactPair},
    pipeline::EventHandler,
    prelude::CollisionEvent,
};

/// Set of bodies currently touching a volume, with a reference count per body.
///
/// A body made of several sub-shapes can overlap a volume through more than one
/// contact region at the same time; the engine then reports one begin/end event
/// pair per region. A plain set would drop the body on the first end event even
/// though contact persists through another region, so each entry counts how many
/// regions currently keep it alive.
///
/// The id array stays dense at all times, which lets callers take a snapshot
/// view of "everything inside the volume" without any allocation.
#[derive(Default, Debug, Clone)]
pub struct ContactList {
    ids: Vec<BodyHandle>,
    contact_count: Vec<u32>,
}

impl ContactList {
    /// Registers one more contact region with `body`. Inserts the body with a
    /// count of one if it was not present yet.
    pub fn add(&mut self, body: BodyHandle) {
        match self.ids.iter().position(|id| *id == body) {
            Some(index) => self.contact_count[index] += 1,
            None => {
                self.ids.push(body);
                self.contact_count.push(1);
            }
        }
    }

    /// Unregisters one contact region with `body`. The entry is erased (swap
    /// with last, keeping the array dense) exactly when its count reaches zero.
    /// Removing an absent body is a no-op.
    pub fn remove(&mut self, body: BodyHandle) {
        if let Some(index) = self.ids.iter().position(|id| *id == body) {
            self.contact_count[index] -= 1;
            if self.contact_count[index] == 0 {
                self.ids.swap_remove(index);
                self.contact_count.swap_remove(index);
            }
        }
    }

    /// Erases `body` entirely, regardless of how many contact regions are still
    /// registered. Used when the body itself is destroyed and no further end
    /// events can be trusted to arrive.
    pub fn purge(&mut self, body: BodyHandle) {
        if let Some(index) = self.ids.iter().position(|id| *id == body) {
            self.ids.swap_remove(index);
            self.contact_count.swap_remove(index);
        }
    }

    /// Dense snapshot of every body currently inside the volume.
    #[inline]
    pub fn bodies(&self) -> &[BodyHandle] {
        &self.ids
    }

    #[inline]
    pub fn contains(&self, body: BodyHandle) -> bool {
        self.ids.contains(&body)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
        self.contact_count.clear();
    }
}

/// Records the engine's collision begin/end events during a step.
///
/// The engine invokes [`EventHandler`] callbacks from whatever threads its step
/// scheduler uses, hence the mutex. Nothing else touches the queue until the
/// step returns, at which point the world drains it synchronously on the calling
/// thread and applies the events to the contact trackers. This keeps all tracker
/// mutation out of callback context.
#[derive(Default)]
pub(crate) struct CollisionEventQueue {
    events: Mutex<Vec<CollisionEvent>>,
}

impl CollisionEventQueue {
    /// Takes every event recorded since the previous drain.
    pub fn drain(&self) -> Vec<CollisionEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl EventHandler for CollisionEventQueue {
    fn handle_collision_event(
        &self,
        _bodies: &RigidBodySet,
        _colliders: &ColliderSet,
        event: CollisionEvent,
        _contact_pair: Option<&ContactPair>,
    ) {
        self.events.lock().push(event);
    }

    fn handle_contact_force_event(
        &self,
        _dt: f32,
        _bodies: &RigidBodySet,
        _colliders: &ColliderSet,
        _contact_pair: &ContactPair,
        _total_force_magnitude: f32,
    ) {
        // Force thresholds are not part of the volume model.
    }
}
