//! Identifier and transform types

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a simulated character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharacterId(pub Uuid);

impl CharacterId {
    /// Create a new random character ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CharacterId {
    fn default() -> Self {
        Self::new()
    }
}

/// Position and rotation of a character or base.
///
/// Characters use a Z-up frame: local X is forward, local Y is right and
/// local Z is up.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

impl Transform {
    /// Create a new transform with position and rotation
    pub fn from_position_rotation(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    /// Forward direction (positive X in local space)
    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::X
    }

    /// Up direction (positive Z in local space)
    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Z
    }

    /// Transform a point from local space into world space
    pub fn transform_point(&self, local: Vec3) -> Vec3 {
        self.position + self.rotation * local
    }

    /// Transform a world-space point into local space
    pub fn inverse_transform_point(&self, world: Vec3) -> Vec3 {
        self.rotation.inverse() * (world - self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_round_trip() {
        let transform = Transform::from_position_rotation(
            Vec3::new(5.0, 0.0, 0.0),
            Quat::from_rotation_z(std::f32::consts::FRAC_PI_2),
        );
        let world = transform.transform_point(Vec3::X);
        assert!((world - Vec3::new(5.0, 1.0, 0.0)).length() < 1.0e-5);
        let local = transform.inverse_transform_point(world);
        assert!((local - Vec3::X).length() < 1.0e-5);
    }

    #[test]
    fn test_z_up_axes() {
        let transform = Transform::default();
        assert_eq!(transform.up(), Vec3::Z);
        assert_eq!(transform.forward(), Vec3::X);
    }
}
