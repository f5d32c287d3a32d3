//! Velocity integration: acceleration, friction, braking and path following

use glam::Vec3;
use strider_core::math::{clamp_length_max, project_on_plane, safe_normal, KINDA_SMALL, SMALL};

use crate::character::{CharacterMovement, BRAKE_TO_STOP_VELOCITY, MIN_TICK_TIME};
use crate::mode::MovementMode;

impl CharacterMovement {
    /// Update velocity for one sub-step from acceleration, friction and braking.
    ///
    /// `fluid` applies friction as drag on the whole velocity, as in water
    /// or air volumes.
    pub fn calc_velocity(&mut self, delta_time: f32, friction: f32, fluid: bool, braking_deceleration: f32) {
        if !self.has_valid_data() || self.root_motion.has_anim_root_motion() || delta_time < MIN_TICK_TIME {
            return;
        }

        let friction = friction.max(0.0);
        let max_accel = self.max_acceleration();
        let mut max_speed = self.max_speed();

        let mut zero_requested_acceleration = true;
        let mut requested_acceleration = Vec3::ZERO;
        let mut requested_speed = 0.0;
        if let Some((accel, speed)) = self.apply_requested_move(delta_time, max_accel, max_speed, friction) {
            requested_acceleration = clamp_length_max(accel, max_accel);
            requested_speed = speed;
            zero_requested_acceleration = false;
        }

        // Requested moves ignore the analog modifier; everything below uses it
        max_speed = requested_speed
            .max(max_speed * self.analog_input_modifier)
            .max(self.min_analog_speed());

        let zero_acceleration = self.acceleration == Vec3::ZERO;
        if zero_acceleration && zero_requested_acceleration {
            let braking_friction = if self.config.use_separate_braking_friction {
                self.config.braking_friction
            } else {
                friction
            };
            self.apply_velocity_braking(delta_time, braking_friction, braking_deceleration);
        } else if !zero_acceleration {
            // Friction limits how fast input can change direction
            let accel_dir = safe_normal(self.acceleration);
            let speed = self.velocity.length();
            self.velocity -= (self.velocity - accel_dir * speed) * (delta_time * friction).min(1.0);
        }

        if fluid {
            self.velocity *= 1.0 - (friction * delta_time).min(1.0);
        }

        let new_max_speed = if self.is_exceeding_max_speed(max_speed) {
            self.velocity.length()
        } else {
            max_speed
        };
        self.velocity += self.acceleration * delta_time;
        self.velocity += requested_acceleration * delta_time;
        self.velocity = clamp_length_max(self.velocity, new_max_speed);
    }

    /// Slow down with friction and constant deceleration, without reversing.
    pub fn apply_velocity_braking(&mut self, delta_time: f32, friction: f32, braking_deceleration: f32) {
        if self.velocity == Vec3::ZERO
            || !self.has_valid_data()
            || self.root_motion.has_anim_root_motion()
            || delta_time < MIN_TICK_TIME
        {
            return;
        }

        let friction_factor = self.config.braking_friction_factor.max(0.0);
        let friction = (friction * friction_factor).max(0.0);
        let braking_deceleration = braking_deceleration.max(0.0);
        let zero_friction = friction == 0.0;
        let zero_braking = braking_deceleration == 0.0;
        if zero_friction && zero_braking {
            return;
        }

        let old_velocity = self.velocity;
        let max_time_step = self.config.braking_sub_step();
        let rev_accel = if zero_braking {
            Vec3::ZERO
        } else {
            -braking_deceleration * safe_normal(self.velocity)
        };

        // Sub-stepped so low frame rates brake about the same as high ones
        let mut remaining = delta_time;
        while remaining >= MIN_TICK_TIME {
            let dt = if remaining > max_time_step && !zero_friction {
                max_time_step.min(remaining * 0.5)
            } else {
                remaining
            };
            remaining -= dt;

            self.velocity += (-friction * self.velocity + rev_accel) * dt;
            if self.velocity.dot(old_velocity) <= 0.0 {
                self.velocity = Vec3::ZERO;
                return;
            }
        }

        let speed_sq = self.velocity.length_squared();
        if speed_sq <= KINDA_SMALL
            || (!zero_braking && speed_sq <= BRAKE_TO_STOP_VELOCITY * BRAKE_TO_STOP_VELOCITY)
        {
            self.velocity = Vec3::ZERO;
        }
    }

    /// Apply a path-following velocity request.
    ///
    /// Returns the acceleration needed to reach the request and the requested
    /// speed, or `None` if no request is active.
    fn apply_requested_move(
        &mut self,
        delta_time: f32,
        max_accel: f32,
        max_speed: f32,
        friction: f32,
    ) -> Option<(Vec3, f32)> {
        if !self.has_requested_velocity {
            return None;
        }
        let requested_sq = self.requested_velocity.length_squared();
        if requested_sq < KINDA_SMALL {
            return None;
        }

        let requested_len = requested_sq.sqrt();
        let move_dir = self.requested_velocity / requested_len;
        let speed = if self.requested_move_with_max_speed {
            max_speed
        } else {
            max_speed.min(requested_len)
        };
        let move_velocity = move_dir * speed;

        let mut acceleration = Vec3::ZERO;
        let should_accelerate = self.config.requested_move_use_acceleration
            && self.velocity.length_squared() < (speed * 1.01) * (speed * 1.01);
        if should_accelerate {
            let current = self.velocity.length();
            self.velocity -= (self.velocity - move_dir * current) * (delta_time * friction).min(1.0);
            acceleration = clamp_length_max((move_velocity - self.velocity) / delta_time, max_accel);
        } else {
            // Decelerate instantly so we don't slide through the destination
            self.velocity = move_velocity;
        }

        Some((acceleration, speed))
    }

    /// Ask to move with `velocity` this tick, as path following does.
    pub fn request_direct_move(&mut self, velocity: Vec3, force_max_speed: bool) {
        if velocity.length_squared() < KINDA_SMALL {
            return;
        }

        if self.is_falling() {
            let fall_velocity = clamp_length_max(velocity, self.max_speed());
            let gravity_dir = self.gravity_direction(false);
            if gravity_dir != Vec3::ZERO {
                self.perform_air_control_for_path_following(fall_velocity, gravity_dir);
            }
            return;
        }

        self.requested_velocity = velocity;
        self.has_requested_velocity = true;
        self.requested_move_with_max_speed = force_max_speed;

        if self.is_moving_on_ground() {
            let up = self.component_axis_z();
            self.requested_velocity = project_on_plane(self.requested_velocity, up);
        }
    }

    /// Steer a falling character toward a path target below it.
    fn perform_air_control_for_path_following(&mut self, move_velocity: Vec3, gravity_dir: Vec3) {
        let move_speed_z = -move_velocity.dot(gravity_dir);
        let low_gravity = self.gravity_magnitude() < (0.9 * self.gravity.world_gravity_z()).abs();
        if self.velocity.dot(gravity_dir) <= 0.0 || !(move_speed_z < 0.0 || low_gravity) || move_speed_z >= 0.0 {
            return;
        }

        let velocity_2d = project_on_plane(self.velocity, gravity_dir);
        if velocity_2d.length_squared() == 0.0 {
            self.acceleration = Vec3::ZERO;
            return;
        }

        let dist_2d = project_on_plane(move_velocity, gravity_dir).length();
        self.acceleration = safe_normal(move_velocity) * self.max_acceleration();

        if dist_2d < 0.5 * move_speed_z.abs() && self.velocity.dot(move_velocity) > 0.5 * dist_2d * dist_2d {
            self.acceleration = -self.acceleration;
        }

        if dist_2d < 1.5 * self.radius {
            self.velocity = gravity_dir * self.velocity.dot(gravity_dir);
            self.acceleration = Vec3::ZERO;
        } else if self.velocity.dot(move_velocity) < 0.0 {
            let m = (0.2 - self.last_delta_time).max(0.0);
            self.velocity = velocity_2d * m + gravity_dir * self.velocity.dot(gravity_dir);
        }
    }

    /// Drop any pending path-following request.
    pub fn clear_requested_move(&mut self) {
        self.requested_velocity = Vec3::ZERO;
        self.has_requested_velocity = false;
    }

    /// Maximum speed in the current mode.
    pub fn max_speed(&self) -> f32 {
        match self.mode {
            MovementMode::Walking | MovementMode::NavWalking => {
                if self.crouch.is_crouched {
                    self.config.max_walk_speed_crouched
                } else {
                    self.config.max_walk_speed
                }
            }
            MovementMode::Falling => self.config.max_walk_speed,
            MovementMode::Swimming => self.config.max_swim_speed,
            MovementMode::Flying => self.config.max_fly_speed,
            MovementMode::Custom(tag) => self
                .custom_strategy(tag)
                .and_then(|strategy| strategy.max_speed(self))
                .unwrap_or(self.config.max_custom_movement_speed),
            MovementMode::None => 0.0,
        }
    }

    /// Lowest speed analog input may request.
    pub fn min_analog_speed(&self) -> f32 {
        match self.mode {
            MovementMode::Walking | MovementMode::NavWalking | MovementMode::Falling => {
                self.config.min_analog_walk_speed
            }
            _ => 0.0,
        }
    }

    /// Braking deceleration of the current mode.
    pub fn max_braking_deceleration(&self) -> f32 {
        match self.mode {
            MovementMode::Walking | MovementMode::NavWalking => self.config.braking_deceleration_walking,
            MovementMode::Falling => self.config.braking_deceleration_falling,
            MovementMode::Swimming => self.config.braking_deceleration_swimming,
            MovementMode::Flying => self.config.braking_deceleration_flying,
            MovementMode::Custom(_) | MovementMode::None => 0.0,
        }
    }

    pub fn is_exceeding_max_speed(&self, max_speed: f32) -> bool {
        let max_speed = max_speed.max(0.0) * 1.01;
        self.velocity.length_squared() > max_speed * max_speed
    }

    /// Remove input components the current mode cannot use.
    pub fn constrain_input_acceleration(&self, input: Vec3) -> Vec3 {
        if self.is_moving_on_ground() || self.is_falling() {
            project_on_plane(input, self.component_axis_z())
        } else {
            input
        }
    }

    /// Turn a unit-range input vector into an acceleration.
    pub fn scale_input_acceleration(&self, input: Vec3) -> Vec3 {
        clamp_length_max(input, 1.0) * self.max_acceleration()
    }

    /// Fraction of max acceleration requested by the current input.
    pub fn compute_analog_input_modifier(&self) -> f32 {
        let max_accel = self.max_acceleration();
        if self.acceleration.length_squared() > 0.0 && max_accel > SMALL {
            (self.acceleration.length() / max_accel).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Velocity after applying `gravity` for `delta_time`, limited to terminal velocity.
    pub fn new_fall_velocity(&self, velocity: Vec3, gravity: Vec3, delta_time: f32) -> Vec3 {
        if delta_time <= 0.0 {
            return velocity;
        }
        let mut result = velocity + gravity * delta_time;
        let terminal = self.volume.terminal_velocity.abs();
        if result.length_squared() > terminal * terminal {
            let gravity_dir = safe_normal(gravity);
            if result.dot(gravity_dir) > terminal {
                result = project_on_plane(result, gravity_dir) + gravity_dir * terminal;
            }
        }
        result
    }

    /// Run `f` with the acceleration temporarily replaced, restoring it on return.
    pub(crate) fn with_scoped_acceleration<R>(&mut self, acceleration: Vec3, f: impl FnOnce(&mut Self) -> R) -> R {
        let saved = std::mem::replace(&mut self.acceleration, acceleration);
        let result = f(self);
        self.acceleration = saved;
        result
    }
}
