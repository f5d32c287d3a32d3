//! Jumping and launching

use glam::Vec3;
use rand::Rng;
use strider_core::math::{project_on_plane, safe_normal, KINDA_SMALL};
use strider_core::CollisionWorld;
use tracing::trace;

use crate::character::CharacterMovement;
use crate::events::MovementEvent;
use crate::mode::MovementMode;

/// Jump input and the state of the current jump.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JumpState {
    /// Jump input is held
    pub pressed: bool,
    /// A jump was performed last tick and the input is still held
    pub was_jumping: bool,
    /// How long the input has been held
    pub key_hold_time: f32,
    /// Time the held jump keeps countering gravity
    pub force_time_remaining: f32,
    /// Jumps performed since last on the ground
    pub current_count: u32,
}

impl CharacterMovement {
    pub fn jump_state(&self) -> &JumpState {
        &self.jump
    }

    /// Press jump. The jump happens at the next tick if still allowed.
    ///
    /// Returns whether a jump is currently allowed.
    pub fn jump(&mut self) -> bool {
        self.jump.pressed = true;
        self.jump.key_hold_time = 0.0;
        self.can_jump()
    }

    /// Release jump.
    pub fn stop_jumping(&mut self) {
        self.jump.pressed = false;
        self.reset_jump_state();
    }

    /// Whether a jump may start or continue now.
    pub fn can_jump(&self) -> bool {
        !self.crouch.is_crouched && self.jump_is_allowed()
    }

    fn jump_is_allowed(&self) -> bool {
        let can_attempt = !self.crouch.wants_to_crouch && (self.is_moving_on_ground() || self.is_falling());
        if !can_attempt {
            return false;
        }

        let max_count = self.config.jump_max_count;
        let max_hold = self.config.jump_max_hold_time;
        if !self.jump.was_jumping || max_hold <= 0.0 {
            if self.jump.current_count == 0 && self.is_falling() {
                // Falling counts as having used the first jump
                self.jump.current_count + 1 < max_count
            } else {
                self.jump.current_count < max_count
            }
        } else {
            let key_held = self.jump.pressed && self.jump.key_hold_time < max_hold;
            key_held
                && (self.jump.current_count < max_count
                    || (self.jump.was_jumping && self.jump.current_count == max_count))
        }
    }

    /// Turn held jump input into a jump.
    pub(crate) fn check_jump_input(&mut self, world: &dyn CollisionWorld, _delta_time: f32) {
        if !self.jump.pressed {
            return;
        }

        if self.jump.current_count == 0 && self.is_falling() {
            self.jump.current_count += 1;
        }

        let did_jump = self.can_jump() && self.do_jump(world);
        if did_jump && !self.jump.was_jumping {
            self.jump.current_count += 1;
            self.jump.force_time_remaining = self.config.jump_max_hold_time;
            self.notify_apex = self.config.notify_jump_apex;
            self.push_event(MovementEvent::Jumped);
        }
        self.jump.was_jumping = did_jump;
    }

    /// Consume jump input at the end of a move.
    pub(crate) fn clear_jump_input(&mut self, delta_time: f32) {
        if self.jump.pressed {
            self.jump.key_hold_time += delta_time;
            // Stay pressed while the hold can still add force
            if self.jump.key_hold_time >= self.config.jump_max_hold_time {
                self.jump.pressed = false;
            }
        } else {
            self.jump.force_time_remaining = 0.0;
            self.jump.was_jumping = false;
        }
    }

    pub(crate) fn reset_jump_state(&mut self) {
        self.jump.pressed = false;
        self.jump.was_jumping = false;
        self.jump.key_hold_time = 0.0;
        self.jump.force_time_remaining = 0.0;
        if !self.is_falling() {
            self.jump.current_count = 0;
        }
    }

    /// Leave the ground along capsule up with the jump speed.
    pub(crate) fn do_jump(&mut self, world: &dyn CollisionWorld) -> bool {
        if !self.can_jump() {
            return false;
        }
        let up = self.component_axis_z();
        self.velocity = project_on_plane(self.velocity, up) + up * self.config.jump_z_velocity;
        self.set_movement_mode(world, MovementMode::Falling);
        true
    }

    /// Apex height of a jump under the current gravity.
    pub fn max_jump_height(&self) -> f32 {
        let gravity = self.gravity_magnitude();
        if gravity > KINDA_SMALL {
            self.config.jump_z_velocity * self.config.jump_z_velocity / (2.0 * gravity)
        } else {
            0.0
        }
    }

    /// Jump off something the character cannot stand on, in a random direction.
    pub fn jump_off(&mut self, world: &dyn CollisionWorld) {
        let max_speed = self.max_speed() * 0.85;
        let direction = self.best_direction_off_base();
        self.velocity += direction * max_speed;

        let up = self.component_axis_z();
        let mut velocity_2d = project_on_plane(self.velocity, up);
        if velocity_2d.length() > max_speed {
            velocity_2d = project_on_plane(safe_normal(self.velocity) * max_speed, up);
        }
        self.velocity = velocity_2d + up * (self.config.jump_z_velocity * self.config.jump_off_jump_z_factor);
        self.set_movement_mode(world, MovementMode::Falling);
    }

    fn best_direction_off_base(&mut self) -> Vec3 {
        let angle = self.rng.gen_range(0.0..std::f32::consts::TAU);
        self.rotation * safe_normal(Vec3::new(angle.cos(), angle.sin(), 0.5))
    }

    /// Queue a launch for the next tick.
    ///
    /// Without overrides the launch adds to the current velocity. Each override
    /// replaces the matching part, split along capsule up.
    pub fn launch(&mut self, launch_velocity: Vec3, override_horizontal: bool, override_vertical: bool) {
        if self.mode == MovementMode::None || !self.has_valid_data() {
            return;
        }
        let velocity = self.velocity;
        let up = self.component_axis_z();
        let final_velocity = match (override_horizontal, override_vertical) {
            (false, false) => velocity + launch_velocity,
            (true, true) => launch_velocity,
            (true, false) => project_on_plane(launch_velocity, up) + up * velocity.dot(up),
            (false, true) => project_on_plane(velocity, up) + up * launch_velocity.dot(up),
        };
        self.pending_launch = Some(final_velocity);
    }

    /// Apply a queued launch.
    pub(crate) fn handle_pending_launch(&mut self, world: &dyn CollisionWorld) -> bool {
        let Some(launch) = self.pending_launch.take() else {
            return false;
        };
        if launch == Vec3::ZERO || !self.has_valid_data() {
            return false;
        }
        trace!(?launch, "launching");
        self.velocity = launch;
        self.set_movement_mode(world, MovementMode::Falling);
        self.force_next_floor_check = true;
        self.push_event(MovementEvent::Launched { velocity: launch });
        true
    }
}
