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

//! Gravity-volume extension layer on top of the rapier3d rigid-body engine.
//!
//! The engine solves collisions and integrates bodies; this crate adds what a
//! game with non-uniform gravity needs on top of it:
//!
//! - **Stable handles** for shapes and characters ([`pool::Pool`]), and
//!   engine-generational handles for bodies, so stale accesses are detectable
//!   errors instead of undefined behavior.
//! - **Gravity volumes**: sensor bodies that track which bodies overlap them
//!   ([`contact::ContactList`]) and pull those bodies with a radial well or a
//!   directional field ([`gravity::GravityMode`]), evaluated per step against
//!   the volume's live transform.
//! - **A virtual character controller** ([`character`]) that integrates the
//!   local field, re-orients its up axis to match it and delegates movement to
//!   the engine's kinematic character solver.
//! - **Logical sub-shape identity** ([`shape`]): query results name the
//!   caller's sub-shape indices and tags instead of raw engine identifiers.
//!
//! Everything is owned by a per-world context object,
//! [`world::PhysicsWorld`]; there is no global state. A typical frame is:
//!
//! ```text
//! world.update(dt, substeps);        // engine step + contact drain + gravity
//! for character in &characters {
//!     world.update_character(*character, dt);
//! }
//! ```

pub mod character;
pub mod contact;
pub mod gravity;
pub mod pool;
pub mod shape;
pub mod world;

pub use character::{CharacterDesc, CharacterHandle, GroundState, LostVolumeResponse};
pub use contact::ContactList;
pub use gravity::{GravityMode, VolumeBody};
pub use pool::{Handle, Pool};
pub use shape::{ShapeHandle, ShapeResource, SubShapeInfo};
pub use world::{
    BodyDesc, BodyHandle, Intersection, MotionKind, PhysicsWorld, PhysicsWorldDesc,
    QueryResultsStorage, RayCastOptions, ShapeCastHit,
};

pub use nalgebra as algebra;
pub use rapier3d;
