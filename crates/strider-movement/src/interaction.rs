//! Impulses and forces on the character, and pushes it gives simulated bodies

use glam::{Quat, Vec3};
use strider_core::math::{is_nearly_zero, project_on_plane, quat_axis_x, safe_normal, KINDA_SMALL, SMALL};
use strider_core::{CollisionWorld, Hit};
use tracing::warn;

use crate::character::CharacterMovement;
use crate::events::MovementEvent;
use crate::mode::MovementMode;

impl CharacterMovement {
    /// Queue an impulse for the next tick.
    ///
    /// Unless `velocity_change` is set the impulse is divided by the character mass.
    pub fn add_impulse(&mut self, impulse: Vec3, velocity_change: bool) {
        if impulse == Vec3::ZERO || self.mode == MovementMode::None || !self.has_valid_data() {
            return;
        }
        let mut final_impulse = impulse;
        if !velocity_change {
            if self.config.mass > SMALL {
                final_impulse /= self.config.mass;
            } else {
                warn!(mass = self.config.mass, "impulse on a character without mass");
            }
        }
        self.pending_impulse += final_impulse;
    }

    /// Queue a force applied over the next tick.
    pub fn add_force(&mut self, force: Vec3) {
        if force == Vec3::ZERO || self.mode == MovementMode::None || !self.has_valid_data() {
            return;
        }
        if self.config.mass > SMALL {
            self.pending_force += force / self.config.mass;
        } else {
            warn!(mass = self.config.mass, "force on a character without mass");
        }
    }

    /// Knockback from a hit, with upward momentum halved when already rising faster than a jump.
    pub fn apply_damage_momentum(&mut self, direction: Vec3, impulse_scale: f32, scale_by_mass: bool) {
        if impulse_scale <= 3.0 {
            return;
        }
        let mut impulse = direction * impulse_scale;
        let mut mass_scaled = impulse;
        if scale_by_mass && self.config.mass > SMALL {
            mass_scaled /= self.config.mass;
        }

        let up = self.component_axis_z();
        if self.velocity.dot(up) > self.config.jump_z_velocity && mass_scaled.dot(up) > 0.0 {
            impulse = project_on_plane(impulse, up) + up * (impulse.dot(up) * 0.5);
        }
        self.add_impulse(impulse, !scale_by_mass);
    }

    /// Add input along the character's forward direction, flattened onto the capsule plane.
    ///
    /// `view` overrides the character rotation, e.g. with a camera rotation.
    pub fn move_forward(&mut self, value: f32, view: Option<Quat>) {
        if value == 0.0 {
            return;
        }
        let up = self.component_axis_z();
        let forward = safe_normal(project_on_plane(quat_axis_x(view.unwrap_or(self.rotation)), up));
        self.add_input_vector(forward * value);
    }

    /// Add input to the right of the forward direction, on the capsule plane.
    pub fn move_right(&mut self, value: f32, view: Option<Quat>) {
        if value == 0.0 {
            return;
        }
        let up = self.component_axis_z();
        let forward = safe_normal(project_on_plane(quat_axis_x(view.unwrap_or(self.rotation)), up));
        self.add_input_vector(up.cross(forward) * value);
    }

    /// Apply pending impulses and forces, leaving the ground if they overcome gravity.
    pub(crate) fn apply_accumulated_forces(&mut self, world: &dyn CollisionWorld, delta_time: f32) {
        let has_pending = self.pending_impulse != Vec3::ZERO || self.pending_force != Vec3::ZERO;
        if has_pending && self.is_moving_on_ground() {
            let impulse = self.pending_impulse + self.pending_force * delta_time + self.gravity_vector() * delta_time;
            if impulse.dot(self.component_axis_z()) > SMALL {
                self.set_movement_mode(world, MovementMode::Falling);
            }
        }

        self.velocity += self.pending_impulse + self.pending_force * delta_time;
        self.pending_impulse = Vec3::ZERO;
        self.pending_force = Vec3::ZERO;
    }

    pub(crate) fn clear_accumulated_forces(&mut self) {
        self.pending_impulse = Vec3::ZERO;
        self.pending_force = Vec3::ZERO;
        self.pending_launch = None;
    }

    /// Push a simulated body the character ran into.
    pub(crate) fn apply_impact_physics_forces(
        &mut self,
        world: &dyn CollisionWorld,
        hit: &Hit,
        impact_acceleration: Vec3,
        impact_velocity: Vec3,
    ) {
        if !self.config.enable_physics_interaction || !hit.blocking {
            return;
        }
        let Some(surface) = hit.surface else {
            return;
        };
        let Some(body) = world.simulated_body(surface) else {
            return;
        };

        let body_mass = body.mass.max(1.0);
        let mut point = hit.impact_point;
        if self.config.push_force_using_z_offset && body.bounds_half_height != 0.0 {
            let up = self.component_axis_z();
            let on_plane = point - up * (point - body.center_of_mass).dot(up);
            point = on_plane + up * (body.bounds_half_height.abs() * self.config.push_force_point_z_offset_factor);
        }

        let virtual_velocity = if impact_acceleration == Vec3::ZERO {
            impact_velocity
        } else {
            safe_normal(impact_acceleration) * self.max_speed()
        };
        let body_at_rest = is_nearly_zero(body.linear_velocity, KINDA_SMALL);

        let mut modifier = 1.0;
        if self.config.scale_push_force_to_velocity && !body_at_rest {
            let dot = body.linear_velocity.dot(virtual_velocity);
            if dot > 0.0 && dot < 1.0 {
                modifier *= dot;
            }
        }
        if self.config.push_force_scaled_to_mass {
            modifier *= body_mass;
        }

        let direction = -hit.impact_normal * modifier;
        let (force, impulse) = if body_at_rest {
            (direction * self.config.initial_push_force_factor, true)
        } else {
            (direction * self.config.push_force_factor, false)
        };
        self.push_event(MovementEvent::ImpactForce {
            surface,
            force,
            point,
            impulse,
        });
    }

    /// Press down on a simulated body the character is standing on.
    pub(crate) fn apply_downward_force(&mut self, world: &dyn CollisionWorld, _delta_time: f32) {
        let scale = self.config.standing_downward_force_scale;
        if scale == 0.0 || !self.current_floor.hit.is_valid_blocking_hit() {
            return;
        }
        let Some(surface) = self.current_floor.hit.surface else {
            return;
        };
        let gravity = self.gravity_vector();
        if gravity == Vec3::ZERO || world.simulated_body(surface).is_none() {
            return;
        }
        let point = self.current_floor.hit.impact_point;
        self.push_event(MovementEvent::ImpactForce {
            surface,
            force: gravity * self.config.mass * scale,
            point,
            impulse: false,
        });
    }
}
