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

//! Virtual character controller state.
//!
//! A character is not a regular rigid body: its motion is solved by the
//! engine's kinematic character solver, while this crate supplies the gravity
//! term and keeps the character oriented so that its local up axis matches the
//! "up" of whatever gravity volume it currently stands in.

use crate::{pool::Handle, shape::ShapeHandle, world::BodyHandle};
use nalgebra::{Unit, UnitQuaternion, UnitVector3, Vector3};
use rapier3d::{
    control::{CharacterAutostep, CharacterLength, KinematicCharacterController},
    dynamics::RigidBodyHandle,
    geometry::{ColliderHandle, SharedShape},
};

/// Step-up ceiling as a fraction of the character shape height, applied along
/// the current up axis.
const STEP_UP_FRACTION: f32 = 0.25;
/// Stick-to-floor probe length as a fraction of the character shape height,
/// applied along the negated up axis.
const STICK_TO_FLOOR_FRACTION: f32 = 0.15;
/// Gap kept between the character shape and obstacles by the engine solver.
const CHARACTER_PADDING: f32 = 0.02;

/// Contact state of a character with respect to the ground.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroundState {
    /// Standing on walkable ground.
    OnGround,
    /// Touching ground too steep to stand on; the character slides.
    OnSteepGround,
    /// No ground contact.
    InAir,
    /// The solver reports ground contact, but no supporting surface answers a
    /// probe along the down axis.
    Unsupported,
}

/// What happens to the cached gravity velocity when the character loses
/// contact with every gravity volume.
///
/// Both behaviors exist in the wild; the choice is explicit here. `Zero` is
/// the default: a stale contribution from a volume the character has left
/// points in a direction that no longer means anything once it enters the
/// next, differently oriented field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LostVolumeResponse {
    /// Reset the cached gravity velocity to zero.
    #[default]
    Zero,
    /// Keep the last computed gravity velocity until a volume is touched again.
    Freeze,
}

/// Creation parameters for a character.
#[derive(Clone, Debug)]
pub struct CharacterDesc {
    /// Shape moved by the character solver.
    pub shape: ShapeHandle,
    pub position: Vector3<f32>,
    pub rotation: UnitQuaternion<f32>,
    /// Optional shape for an inner kinematic body that shadows the character
    /// inside the simulation, so sensor volumes and ray casts can see it.
    /// Without it the character is invisible to gravity volumes.
    pub inner_shape: Option<ShapeHandle>,
    /// Collision layer of the inner body, any-match semantics.
    pub inner_layer: u32,
    pub lost_volume: LostVolumeResponse,
}

impl Default for CharacterDesc {
    fn default() -> Self {
        Self {
            shape: Handle::NONE,
            position: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
            inner_shape: None,
            inner_layer: u32::MAX,
            lost_volume: LostVolumeResponse::default(),
        }
    }
}

/// Runtime state of one character. Owned by the world's character pool.
pub struct Character {
    pub(crate) controller: KinematicCharacterController,
    pub(crate) shape: SharedShape,
    pub(crate) position: Vector3<f32>,
    pub(crate) rotation: UnitQuaternion<f32>,
    pub(crate) up: UnitVector3<f32>,
    /// Caller-driven movement velocity.
    pub(crate) linear_velocity: Vector3<f32>,
    /// Accumulated gravity-field contribution, fed to the solver as an
    /// external velocity term.
    pub(crate) gravity_velocity: Vector3<f32>,
    /// Bodies touched during the last update. Cleared and repopulated every
    /// update.
    pub(crate) contact_bodies: Vec<BodyHandle>,
    pub(crate) inner_body: Option<RigidBodyHandle>,
    pub(crate) inner_collider: Option<ColliderHandle>,
    pub(crate) ground_state: GroundState,
    pub(crate) ground_velocity: Vector3<f32>,
    pub(crate) lost_volume: LostVolumeResponse,
}

impl Character {
    pub(crate) fn new(
        shape: SharedShape,
        position: Vector3<f32>,
        rotation: UnitQuaternion<f32>,
        lost_volume: LostVolumeResponse,
    ) -> Self {
        let mut controller = KinematicCharacterController::default();
        controller.up = Vector3::y_axis();
        controller.offset = CharacterLength::Absolute(CHARACTER_PADDING);
        controller.max_slope_climb_angle = std::f32::consts::FRAC_PI_4;
        controller.autostep = Some(CharacterAutostep {
            max_height: CharacterLength::Relative(STEP_UP_FRACTION),
            min_width: CharacterLength::Relative(0.1),
            include_dynamic_bodies: false,
        });
        controller.snap_to_ground = Some(CharacterLength::Relative(STICK_TO_FLOOR_FRACTION));

        Self {
            controller,
            shape,
            position,
            rotation,
            up: Unit::new_normalize(rotation * Vector3::y()),
            linear_velocity: Vector3::zeros(),
            gravity_velocity: Vector3::zeros(),
            contact_bodies: Vec::new(),
            inner_body: None,
            inner_collider: None,
            ground_state: GroundState::InAir,
            ground_velocity: Vector3::zeros(),
            lost_volume,
        }
    }

    /// Rotates the character so its up axis coincides with `new_up`, using the
    /// shortest arc between the two directions.
    pub(crate) fn reorient(&mut self, new_up: UnitVector3<f32>) {
        let delta = shortest_arc(&self.up, &new_up);
        let mut rotation = delta * self.rotation;
        rotation.renormalize();
        self.rotation = rotation;
        self.up = new_up;
    }

    /// Replaces the rotation wholesale and re-derives the up axis from it.
    pub(crate) fn set_rotation(&mut self, rotation: UnitQuaternion<f32>) {
        self.rotation = rotation;
        self.up = Unit::new_normalize(rotation * Vector3::y());
    }
}

/// Handle to a character owned by a world.
pub type CharacterHandle = Handle<Character>;

/// Shortest-arc rotation mapping `from` onto `to`.
///
/// Identical directions yield the identity rotation. Opposite directions have
/// no unique shortest arc; a half turn about an arbitrary axis orthogonal to
/// `from` is used.
pub(crate) fn shortest_arc(
    from: &UnitVector3<f32>,
    to: &UnitVector3<f32>,
) -> UnitQuaternion<f32> {
    UnitQuaternion::rotation_between(from.as_ref(), to.as_ref()).unwrap_or_else(|| {
        let mut axis = from.cross(&Vector3::x());
        if axis.norm_squared() <= f32::EPSILON {
            axis = from.cross(&Vector3::y());
        }
        UnitQuaternion::from_axis_angle(&Unit::new_normalize(axis), std::f32::consts::PI)
    })
}

#[cfg(test)]
mod test {
    use super::{shortest_arc, Character, LostVolumeResponse};
    use approx::assert_relative_eq;
    use nalgebra::{Unit, UnitQuaternion, Vector3};
    use rapier3d::geometry::SharedShape;

    fn test_character(rotation: UnitQuaternion<f32>) -> Character {
        Character::new(
            SharedShape::capsule(
                nalgebra::Point3::new(0.0, -0.5, 0.0),
                nalgebra::Point3::new(0.0, 0.5, 0.0),
                0.3,
            ),
            Vector3::zeros(),
            rotation,
            LostVolumeResponse::default(),
        )
    }

    #[test]
    fn shortest_arc_of_identical_vectors_is_identity() {
        let up = Unit::new_normalize(Vector3::new(0.3, 0.9, -0.1));
        let arc = shortest_arc(&up, &up);
        assert_relative_eq!(arc.angle(), 0.0, epsilon = 1.0e-6);
    }

    #[test]
    fn shortest_arc_of_opposite_vectors_is_half_turn() {
        let up = Vector3::y_axis();
        let down = Unit::new_normalize(-Vector3::y());
        let arc = shortest_arc(&up, &down);
        assert_relative_eq!(arc.angle(), std::f32::consts::PI, epsilon = 1.0e-5);
        assert_relative_eq!(arc * up.into_inner(), -Vector3::y(), epsilon = 1.0e-5);
    }

    #[test]
    fn shortest_arc_maps_from_onto_to() {
        let from = Unit::new_normalize(Vector3::new(1.0, 1.0, 0.0));
        let to = Unit::new_normalize(Vector3::new(-0.2, 0.5, 0.8));
        let arc = shortest_arc(&from, &to);
        assert_relative_eq!(
            arc * from.into_inner(),
            to.into_inner(),
            epsilon = 1.0e-5
        );
    }

    #[test]
    fn reorient_hits_target_up_from_arbitrary_start() {
        let start = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.9)
            * UnitQuaternion::from_axis_angle(&Vector3::x_axis(), -1.3);
        let mut character = test_character(start);
        let target = Unit::new_normalize(Vector3::new(0.6, -0.3, 0.74));
        character.reorient(target);
        assert_relative_eq!(
            character.rotation * Vector3::y(),
            target.into_inner(),
            epsilon = 1.0e-4
        );
        assert_eq!(character.up, target);
    }

    #[test]
    fn reorient_to_current_up_is_stable() {
        let mut character = test_character(UnitQuaternion::identity());
        let before = character.rotation;
        let up = character.up;
        character.reorient(up);
        assert_relative_eq!(
            character.rotation.angle_to(&before),
            0.0,
            epsilon = 1.0e-6
        );
    }

    #[test]
    fn set_rotation_rederives_up() {
        let mut character = test_character(UnitQuaternion::identity());
        let quarter = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), std::f32::consts::FRAC_PI_2);
        character.set_rotation(quarter);
        assert_relative_eq!(
            character.up.into_inner(),
            quarter * Vector3::y(),
            epsilon = 1.0e-6
        );
    }
}
