//! Capsule orientation under arbitrary gravity

use glam::{Quat, Vec3};
use strider_core::math::{make_from_zx, project_on_plane, quat_axis_x, quat_axis_z, KINDA_SMALL, THRESH_NORMALS_ARE_PARALLEL};

use crate::character::CharacterMovement;
use crate::gravity::GravityMessage;

/// Rotations closer than this (in radians) are considered equal.
const ANGLE_TOLERANCE: f32 = 1.0e-3_f32 * (std::f32::consts::PI / 180.0);

impl CharacterMovement {
    pub fn component_axis_x(&self) -> Vec3 {
        quat_axis_x(self.rotation)
    }

    /// Capsule up axis.
    pub fn component_axis_z(&self) -> Vec3 {
        quat_axis_z(self.rotation)
    }

    /// Up axis the capsule should be rotated to.
    pub fn component_desired_axis_z(&self) -> Vec3 {
        let floor_normal = self.current_floor.hit.impact_normal;
        if self.config.align_component_to_floor && self.is_moving_on_ground() && floor_normal != Vec3::ZERO {
            return floor_normal;
        }
        if self.config.align_component_to_gravity {
            return -self.gravity_direction(true);
        }
        self.component_axis_z()
    }

    /// Rotate the capsule so its up axis matches the desired one, keeping forward.
    pub fn update_component_rotation(&mut self) {
        if !self.has_valid_data() {
            return;
        }
        let desired_up = self.component_desired_axis_z();
        if desired_up.dot(self.component_axis_z()) >= THRESH_NORMALS_ARE_PARALLEL {
            return;
        }
        self.rotation = make_from_zx(desired_up, self.component_axis_x());
    }

    /// Keep the current up axis while facing as close to `rotation`'s forward as possible.
    pub fn constrain_component_rotation(&self, rotation: Quat) -> Quat {
        make_from_zx(self.component_axis_z(), quat_axis_x(rotation))
    }

    /// Turn toward the movement direction at the configured rate.
    pub(crate) fn physics_rotation(&mut self, delta_time: f32) {
        if !self.config.orient_rotation_to_movement || !self.has_valid_data() {
            return;
        }

        let up = self.component_axis_z();
        let forward = project_on_plane(self.acceleration, up);
        if forward.length_squared() < KINDA_SMALL {
            return;
        }

        let mut desired = make_from_zx(up, forward);
        if self.is_moving_on_ground() || self.is_falling() {
            desired = self.constrain_component_rotation(desired);
        }

        let current = self.rotation;
        let angle = current.angle_between(desired);
        if angle <= ANGLE_TOLERANCE {
            return;
        }

        let max_turn = (self.config.rotation_rate * delta_time).max(0.0).to_radians();
        let alpha = (max_turn / angle).min(1.0);
        self.rotation = if alpha >= 1.0 {
            desired
        } else {
            current.slerp(desired, alpha).normalize()
        };
    }

    /// Per-tick gravity bookkeeping: floor alignment, replication, capsule up.
    pub(crate) fn update_gravity(&mut self) {
        let floor_normal = self.current_floor.hit.impact_normal;
        if self.config.align_custom_gravity_to_floor && self.is_moving_on_ground() && floor_normal != Vec3::ZERO {
            self.gravity.align_to_floor(floor_normal);
        }

        if self.authority {
            self.gravity.replicate();
        }

        self.update_component_rotation();
    }

    /// Gravity acceleration at the character.
    pub fn gravity_vector(&self) -> Vec3 {
        self.gravity.gravity(self.location)
    }

    /// Unit gravity direction at the character; see [`GravityModel::direction`](crate::gravity::GravityModel::direction).
    pub fn gravity_direction(&self, avoid_zero: bool) -> Vec3 {
        self.gravity.direction(self.location, avoid_zero)
    }

    pub fn gravity_magnitude(&self) -> f32 {
        self.gravity.magnitude()
    }

    /// Set a custom gravity direction; zero reverts to the point or world gravity.
    pub fn set_gravity_direction(&mut self, direction: Vec3) {
        self.gravity.set_direction(direction);
    }

    pub fn set_gravity_point(&mut self, point: Option<Vec3>) {
        self.gravity.set_point(point);
    }

    pub fn set_gravity_scale(&mut self, scale: f32) {
        self.gravity.set_scale(scale);
    }

    pub fn gravity_scale(&self) -> f32 {
        self.gravity.scale()
    }

    /// Gravity changes queued for remote copies since the last call.
    pub fn drain_gravity_messages(&mut self) -> Vec<GravityMessage> {
        self.gravity.drain_messages()
    }

    pub fn apply_gravity_message(&mut self, message: GravityMessage) {
        self.gravity.apply_message(message);
    }
}
