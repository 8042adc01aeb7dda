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

//! Per-volume gravity fields.
//!
//! A sensor body can carry a [`GravityMode`] describing the field inside it.
//! The field is evaluated against the volume body's current transform every
//! step, so moving or rotating the volume moves the field with it.

use crate::contact::ContactList;
use nalgebra::{UnitQuaternion, Vector3};

/// Shape of the gravity field carried by a volume. Immutable once constructed;
/// reconfiguring a volume replaces the whole value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GravityMode {
    /// Point gravity well. `offset` is expressed in the volume's local frame,
    /// so the well travels and rotates together with the volume body.
    Radial {
        offset: Vector3<f32>,
        strength: f32,
    },
    /// Field that is constant in the volume's local frame. The world-space pull
    /// is the local vector rotated by the volume's current rotation.
    Vector { field: Vector3<f32> },
}

impl GravityMode {
    /// Radial well centered on the volume body.
    #[inline]
    pub fn radial(strength: f32) -> Self {
        Self::Radial {
            offset: Vector3::zeros(),
            strength,
        }
    }

    /// Radial well displaced from the volume body by a local-frame offset.
    #[inline]
    pub fn radial_at(offset: Vector3<f32>, strength: f32) -> Self {
        Self::Radial { offset, strength }
    }

    /// Directional field; `field` carries both direction and magnitude.
    #[inline]
    pub fn vector(field: Vector3<f32>) -> Self {
        Self::Vector { field }
    }

    /// Velocity contribution (per second) of the field at `query`, given the
    /// volume body's current world transform.
    ///
    /// The radial branch pulls toward the well with inverse-square falloff and
    /// returns a zero vector at the singularity instead of dividing by zero.
    pub fn velocity_at(
        &self,
        volume_position: &Vector3<f32>,
        volume_rotation: &UnitQuaternion<f32>,
        query: &Vector3<f32>,
    ) -> Vector3<f32> {
        match *self {
            GravityMode::Radial { offset, strength } => {
                let source = volume_position + volume_rotation * offset;
                let to_source = source - query;
                let distance_sq = to_source.norm_squared();
                if distance_sq <= f32::EPSILON {
                    return Vector3::zeros();
                }
                to_source / distance_sq.sqrt() * (strength / distance_sq)
            }
            GravityMode::Vector { field } => volume_rotation * field,
        }
    }

    /// The direction an object at `query` would call "up": away from a radial
    /// well, opposite the pull of a directional field.
    ///
    /// Degenerate inputs (query at the well center, zero field) fall back to
    /// the world Y axis rather than producing NaN.
    pub fn up_at(
        &self,
        volume_position: &Vector3<f32>,
        volume_rotation: &UnitQuaternion<f32>,
        query: &Vector3<f32>,
    ) -> Vector3<f32> {
        match *self {
            GravityMode::Radial { offset, .. } => {
                let source = volume_position + volume_rotation * offset;
                (query - source)
                    .try_normalize(f32::EPSILON)
                    .unwrap_or_else(Vector3::y)
            }
            GravityMode::Vector { field } => (volume_rotation * -field)
                .try_normalize(f32::EPSILON)
                .unwrap_or_else(Vector3::y),
        }
    }
}

/// Per-volume state attached to every sensor body. Exists if and only if the
/// body was created with the sensor flag set.
#[derive(Default, Debug, Clone)]
pub struct VolumeBody {
    /// Bodies currently overlapping the volume.
    pub contact_list: ContactList,
    /// Active field; `None` means the volume tracks contacts but exerts nothing.
    pub gravity: Option<GravityMode>,
}

#[cfg(test)]
mod test {
    use super::GravityMode;
    use approx::assert_relative_eq;
    use nalgebra::{UnitQuaternion, Vector3};

    #[test]
    fn radial_pull_points_toward_source() {
        let mode = GravityMode::radial(100.0);
        let origin = Vector3::zeros();
        let rotation = UnitQuaternion::identity();
        for query in [
            Vector3::new(10.0, 0.0, 0.0),
            Vector3::new(0.0, -3.0, 4.0),
            Vector3::new(-1.0, 2.0, -2.0),
        ] {
            let velocity = mode.velocity_at(&origin, &rotation, &query);
            let toward = -query.normalize();
            assert_relative_eq!(velocity.normalize(), toward, epsilon = 1.0e-5);
        }
    }

    #[test]
    fn radial_magnitude_follows_inverse_square() {
        let mode = GravityMode::radial(100.0);
        let origin = Vector3::zeros();
        let rotation = UnitQuaternion::identity();
        let near = mode
            .velocity_at(&origin, &rotation, &Vector3::new(5.0, 0.0, 0.0))
            .norm();
        let mid = mode
            .velocity_at(&origin, &rotation, &Vector3::new(10.0, 0.0, 0.0))
            .norm();
        let far = mode
            .velocity_at(&origin, &rotation, &Vector3::new(20.0, 0.0, 0.0))
            .norm();
        assert!(near > mid && mid > far);
        assert_relative_eq!(mid, 1.0, epsilon = 1.0e-5);
        assert_relative_eq!(near / far, 16.0, epsilon = 1.0e-3);
    }

    #[test]
    fn radial_center_is_finite() {
        let mode = GravityMode::radial(100.0);
        let origin = Vector3::zeros();
        let rotation = UnitQuaternion::identity();
        let velocity = mode.velocity_at(&origin, &rotation, &origin);
        assert_eq!(velocity, Vector3::zeros());
        let up = mode.up_at(&origin, &rotation, &origin);
        assert!(up.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn radial_offset_is_local_to_volume_frame() {
        let mode = GravityMode::radial_at(Vector3::new(1.0, 0.0, 0.0), 4.0);
        let position = Vector3::new(5.0, 0.0, 0.0);
        // Quarter turn about Y maps local +X to world -Z: source = (5, 0, -1).
        let rotation = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), std::f32::consts::FRAC_PI_2);
        let query = Vector3::new(5.0, 0.0, -3.0);
        let velocity = mode.velocity_at(&position, &rotation, &query);
        assert_relative_eq!(velocity, Vector3::new(0.0, 0.0, 1.0), epsilon = 1.0e-5);
    }

    #[test]
    fn vector_field_rotates_with_volume() {
        let field = Vector3::new(0.0, -9.8, 0.0);
        let mode = GravityMode::vector(field);
        let position = Vector3::zeros();
        let query = Vector3::new(3.0, 1.0, -2.0);
        let rotation =
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.73);

        let rotated = mode.velocity_at(&position, &rotation, &query);
        assert_relative_eq!(rotated, rotation * field, epsilon = 1.0e-6);

        let up = mode.up_at(&position, &rotation, &query);
        assert_relative_eq!(up, rotation * Vector3::y(), epsilon = 1.0e-6);
    }

    #[test]
    fn radial_up_points_away_from_well() {
        let mode = GravityMode::radial(1.0);
        let origin = Vector3::zeros();
        let rotation = UnitQuaternion::identity();
        let query = Vector3::new(0.0, 7.0, 0.0);
        assert_relative_eq!(
            mode.up_at(&origin, &rotation, &query),
            Vector3::y(),
            epsilon = 1.0e-6
        );
    }
}
