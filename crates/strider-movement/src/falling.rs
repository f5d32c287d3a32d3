//! Falling: gravity, air control and landing

use glam::Vec3;
use rand::Rng;
use strider_core::math::{
    clamp_length_max, is_nearly_zero, project_on_plane, safe_normal, segment_alpha, vectors_equal, KINDA_SMALL,
};
use strider_core::{CollisionWorld, Hit};
use tracing::{debug, trace};

use crate::character::{CharacterMovement, MIN_TICK_TIME, VERTICAL_SLOPE_NORMAL_Z};
use crate::events::MovementEvent;
use crate::floor::is_within_edge_tolerance;
use crate::mode::{MovementMode, MovementStrategy};

pub struct FallingStrategy;

impl MovementStrategy for FallingStrategy {
    fn simulate(&self, movement: &mut CharacterMovement, world: &dyn CollisionWorld, delta_time: f32, iterations: u32) {
        movement.phys_falling(world, delta_time, iterations);
    }
}

impl CharacterMovement {
    /// Input acceleration usable in the air: lateral only, scaled by air control.
    pub fn falling_lateral_acceleration(&self, gravity_dir: Vec3) -> Vec3 {
        let mut fall_acceleration = project_on_plane(self.acceleration, gravity_dir);
        if !self.root_motion.has_anim_root_motion() && fall_acceleration.length_squared() > 0.0 {
            fall_acceleration = self.air_control(self.config.air_control, fall_acceleration, gravity_dir);
            fall_acceleration = clamp_length_max(fall_acceleration, self.max_acceleration());
        }
        fall_acceleration
    }

    pub fn air_control(&self, tick_air_control: f32, fall_acceleration: Vec3, gravity_dir: Vec3) -> Vec3 {
        let control = if tick_air_control != 0.0 {
            self.boost_air_control(tick_air_control, gravity_dir)
        } else {
            tick_air_control
        };
        fall_acceleration * control
    }

    /// Full air control for a burst while nearly still laterally.
    pub fn boost_air_control(&self, tick_air_control: f32, gravity_dir: Vec3) -> f32 {
        let threshold = self.config.air_control_boost_velocity_threshold;
        if self.config.air_control_boost_multiplier > 0.0
            && project_on_plane(self.velocity, gravity_dir).length_squared() < threshold * threshold
        {
            (self.config.air_control_boost_multiplier * tick_air_control).min(1.0)
        } else {
            tick_air_control
        }
    }

    /// Keep air control from pushing into a steep surface.
    pub fn limit_air_control(&self, fall_acceleration: Vec3, hit: &Hit, gravity_dir: Vec3, check_for_valid_landing_spot: bool) -> Vec3 {
        if hit.is_valid_blocking_hit() && hit.normal.dot(gravity_dir) < -VERTICAL_SLOPE_NORMAL_Z {
            // Only walls and floors facing against gravity reach here
            let landing = check_for_valid_landing_spot && self.is_valid_landing_spot_without_floor(hit);
            if !landing && fall_acceleration.dot(hit.normal) < 0.0 {
                let normal_2d = safe_normal(project_on_plane(hit.normal, gravity_dir));
                return project_on_plane(fall_acceleration, normal_2d);
            }
        } else if hit.start_penetrating {
            return if fall_acceleration.dot(hit.normal) > 0.0 {
                fall_acceleration
            } else {
                Vec3::ZERO
            };
        }
        fall_acceleration
    }

    fn is_valid_landing_spot_without_floor(&self, hit: &Hit) -> bool {
        if !hit.blocking || hit.start_penetrating || !self.is_walkable(hit) {
            return false;
        }
        let capsule_down = -self.component_axis_z();
        let bottom = hit.location + capsule_down * (self.half_height - self.radius).max(0.0);
        let top = hit.location - capsule_down;
        segment_alpha(hit.impact_point, bottom, top) < 0.0
            && is_within_edge_tolerance(hit.location, capsule_down, self.radius, hit.impact_point)
    }

    pub(crate) fn phys_falling(&mut self, world: &dyn CollisionWorld, delta_time: f32, mut iterations: u32) {
        if delta_time < MIN_TICK_TIME {
            return;
        }

        let gravity_dir = self.gravity_direction(false);
        if gravity_dir == Vec3::ZERO {
            self.acceleration = Vec3::ZERO;
            self.velocity = Vec3::ZERO;
            return;
        }

        let fall_acceleration = self.falling_lateral_acceleration(gravity_dir);
        let has_air_control = fall_acceleration.length_squared() > 0.0;

        let mut remaining = delta_time;
        while remaining >= MIN_TICK_TIME && iterations < self.config.max_simulation_iterations {
            iterations += 1;
            let time_tick = self.simulation_time_step(remaining, iterations);
            remaining -= time_tick;

            let old_location = self.location;
            let rotation = self.rotation;
            self.just_teleported = false;

            self.restore_pre_additive_root_motion_velocity();

            let old_velocity = self.velocity;
            let mut velocity_no_air_control = self.velocity;

            if !self.root_motion_overrides_velocity() {
                let old_velocity_z = gravity_dir * self.velocity.dot(gravity_dir);
                let lateral = project_on_plane(self.velocity, gravity_dir);

                if has_air_control {
                    velocity_no_air_control = self.lateral_fall_velocity(lateral, Vec3::ZERO, time_tick, gravity_dir)
                        + old_velocity_z;
                }
                self.velocity = self.lateral_fall_velocity(lateral, fall_acceleration, time_tick, gravity_dir)
                    + old_velocity_z;
                if !has_air_control {
                    velocity_no_air_control = self.velocity;
                }
            }

            let gravity = self.gravity_vector();
            self.velocity = self.new_fall_velocity(self.velocity, gravity, time_tick);
            velocity_no_air_control = self.new_fall_velocity(velocity_no_air_control, gravity, time_tick);
            let air_control_accel = (self.velocity - velocity_no_air_control) / time_tick;

            self.apply_root_motion_to_velocity(world, time_tick);

            if self.notify_apex && -self.velocity.dot(gravity_dir) <= 0.0 {
                self.notify_apex = false;
                trace!(location = ?self.location, "jump apex");
                self.push_event(MovementEvent::JumpApex);
            }

            let mut adjusted = (old_velocity + self.velocity) * 0.5 * time_tick;
            let mut hit = self.safe_move_updated_component(world, adjusted, rotation);
            self.update_physics_volume(world);
            if !self.has_valid_data() {
                return;
            }

            let mut last_move_time_slice = time_tick;
            let mut sub_time_tick_remaining = time_tick * (1.0 - hit.time);

            if self.is_swimming() {
                remaining += sub_time_tick_remaining;
                self.start_swimming(world, old_location, old_velocity, time_tick, remaining, iterations);
                return;
            }

            if hit.blocking {
                let location = self.location;
                if self.is_valid_landing_spot(world, location, &hit) {
                    remaining += sub_time_tick_remaining;
                    self.process_landed(world, &hit, remaining, iterations);
                    return;
                }

                // Deflect using the final velocity so the slide includes all of gravity
                adjusted = self.velocity * time_tick;

                if !hit.start_penetrating && self.should_check_for_valid_landing_spot(&hit) {
                    let floor = self.find_floor(world, location, false, None);
                    if floor.is_walkable_floor() && self.is_valid_landing_spot(world, location, &floor.hit) {
                        remaining += sub_time_tick_remaining;
                        self.process_landed(world, &floor.hit, remaining, iterations);
                        return;
                    }
                }

                self.handle_impact(world, &hit, last_move_time_slice, adjusted);
                if !self.has_valid_data() || !self.is_falling() {
                    return;
                }

                if has_air_control {
                    let air_control_delta_v =
                        self.limit_air_control(air_control_accel, &hit, gravity_dir, false) * last_move_time_slice;
                    adjusted = (velocity_no_air_control + air_control_delta_v) * last_move_time_slice;
                }

                let old_hit_normal = hit.normal;
                let old_hit_impact_normal = hit.impact_normal;
                let mut delta = self.compute_slide_vector(adjusted, 1.0 - hit.time, old_hit_normal, &hit);

                if sub_time_tick_remaining > KINDA_SMALL && !self.just_teleported {
                    self.set_deflected_velocity(delta / sub_time_tick_remaining, gravity_dir);
                }

                if sub_time_tick_remaining > KINDA_SMALL && delta.dot(adjusted) > 0.0 {
                    hit = self.safe_move_updated_component(world, delta, rotation);

                    if hit.blocking {
                        // Second wall
                        last_move_time_slice = sub_time_tick_remaining;
                        sub_time_tick_remaining *= 1.0 - hit.time;

                        let location = self.location;
                        if self.is_valid_landing_spot(world, location, &hit) {
                            remaining += sub_time_tick_remaining;
                            self.process_landed(world, &hit, remaining, iterations);
                            return;
                        }

                        self.handle_impact(world, &hit, last_move_time_slice, delta);
                        if !self.has_valid_data() || !self.is_falling() {
                            return;
                        }

                        if has_air_control && hit.normal.dot(gravity_dir) < -VERTICAL_SLOPE_NORMAL_Z {
                            delta = self.compute_slide_vector(
                                velocity_no_air_control * last_move_time_slice,
                                1.0,
                                old_hit_normal,
                                &hit,
                            );
                        }

                        delta = self.two_wall_adjust(delta, &hit, old_hit_normal);

                        if has_air_control {
                            let air_control_delta_v = self.limit_air_control(air_control_accel, &hit, gravity_dir, false)
                                * sub_time_tick_remaining;
                            // Never back into the first wall
                            if air_control_delta_v.dot(old_hit_normal) > 0.0 {
                                delta += air_control_delta_v * sub_time_tick_remaining;
                            }
                        }

                        if sub_time_tick_remaining > KINDA_SMALL && !self.just_teleported {
                            self.set_deflected_velocity(delta / sub_time_tick_remaining, gravity_dir);
                        }

                        // Straddling two slopes, neither of which can be stood on
                        let ditch = old_hit_impact_normal.dot(gravity_dir) < 0.0
                            && hit.impact_normal.dot(gravity_dir) < 0.0
                            && delta.dot(gravity_dir).abs() <= KINDA_SMALL
                            && hit.impact_normal.dot(old_hit_impact_normal) < 0.0;

                        hit = self.safe_move_updated_component(world, delta, rotation);

                        if hit.time == 0.0 {
                            // Stuck; try a side step
                            let mut side_delta = safe_normal(project_on_plane(old_hit_normal + hit.impact_normal, gravity_dir));
                            if is_nearly_zero(side_delta, KINDA_SMALL) {
                                side_delta = gravity_dir.cross(safe_normal(project_on_plane(old_hit_normal, gravity_dir)));
                            }
                            hit = self.safe_move_updated_component(world, side_delta, rotation);
                        }

                        let location = self.location;
                        if ditch || hit.time == 0.0 || self.is_valid_landing_spot(world, location, &hit) {
                            debug!(ditch, stuck = hit.time == 0.0, "landing between surfaces");
                            self.process_landed(world, &hit, 0.0, iterations);
                            return;
                        } else if self.perch_radius_threshold() > 0.0
                            && hit.time == 1.0
                            && old_hit_impact_normal.dot(gravity_dir) <= -self.config.walkable_floor_z
                        {
                            self.jitter_out_of_perch_ditch(world, old_location, time_tick, gravity_dir);
                        }
                    }
                }
            }

            if project_on_plane(self.velocity, gravity_dir).length_squared() <= KINDA_SMALL * 10.0 {
                self.velocity = gravity_dir * self.velocity.dot(gravity_dir);
            }
        }
    }

    /// Lateral velocity after one sub-step of air acceleration, friction and braking.
    fn lateral_fall_velocity(&mut self, lateral: Vec3, acceleration: Vec3, time_tick: f32, gravity_dir: Vec3) -> Vec3 {
        let saved_velocity = std::mem::replace(&mut self.velocity, lateral);
        let friction = self.config.falling_lateral_friction;
        let braking = self.max_braking_deceleration();
        self.with_scoped_acceleration(acceleration, |movement| {
            movement.calc_velocity(time_tick, friction, false, braking);
        });
        let result = project_on_plane(self.velocity, gravity_dir);
        self.velocity = saved_velocity;
        result
    }

    /// Velocity after deflecting off a surface; root motion keeps its lateral part.
    fn set_deflected_velocity(&mut self, new_velocity: Vec3, gravity_dir: Vec3) {
        if self.root_motion_overrides_velocity() {
            self.velocity = project_on_plane(self.velocity, gravity_dir) + gravity_dir * new_velocity.dot(gravity_dir);
        } else {
            self.velocity = new_velocity;
        }
    }

    /// Shake loose from a virtual ditch inside the perch radius.
    fn jitter_out_of_perch_ditch(&mut self, world: &dyn CollisionWorld, old_location: Vec3, time_tick: f32, gravity_dir: Vec3) {
        let moved = self.location - old_location;
        let z_moved = moved.dot(gravity_dir).abs();
        let moved_2d_sq = project_on_plane(moved, gravity_dir).length_squared();
        if z_moved > 0.2 * time_tick || moved_2d_sq > 4.0 * time_tick {
            return;
        }

        let max_speed = self.max_speed();
        let jitter = Vec3::new(
            self.rng.gen::<f32>() - 0.5,
            self.rng.gen::<f32>() - 0.5,
            self.rng.gen::<f32>() - 0.5,
        ) * (0.25 * max_speed);
        let velocity = self.velocity + jitter;
        let fall_speed = (self.config.jump_z_velocity * 0.25).max(1.0);
        self.velocity = project_on_plane(velocity, gravity_dir) - gravity_dir * fall_speed;
        trace!(velocity = ?self.velocity, "jitter out of perch ditch");

        let rotation = self.rotation;
        let delta = self.velocity * time_tick;
        self.safe_move_updated_component(world, delta, rotation);
    }

    /// Whether `hit` is somewhere the falling character can land.
    pub fn is_valid_landing_spot(&mut self, world: &dyn CollisionWorld, location: Vec3, hit: &Hit) -> bool {
        if !hit.blocking {
            return false;
        }

        if !hit.start_penetrating {
            if !self.is_valid_landing_spot_without_floor(hit) {
                return false;
            }
        } else {
            // Next to a vertical or overhanging wall; do not pop onto a floor
            let capsule_down = -self.component_axis_z();
            if hit.normal.dot(capsule_down) > -KINDA_SMALL {
                return false;
            }
        }

        self.find_floor(world, location, false, Some(hit)).is_walkable_floor()
    }

    /// A hit on the edge of a surface below the capsule may hide a walkable top.
    pub fn should_check_for_valid_landing_spot(&self, hit: &Hit) -> bool {
        let up = self.component_axis_z();
        hit.normal.dot(up) > KINDA_SMALL
            && !vectors_equal(hit.normal, hit.impact_normal, KINDA_SMALL)
            && is_within_edge_tolerance(self.location, -up, self.radius, hit.impact_point)
    }

    /// Land on `hit` and continue with the remaining time.
    pub(crate) fn process_landed(&mut self, world: &dyn CollisionWorld, hit: &Hit, remaining: f32, iterations: u32) {
        debug!(location = ?self.location, surface = ?hit.surface, "landed");
        self.push_event(MovementEvent::Landed { hit: hit.clone() });
        if self.is_falling() {
            self.set_post_landed_physics(world, hit);
        }
        self.start_new_physics(world, remaining, iterations);
    }

    pub(crate) fn set_post_landed_physics(&mut self, world: &dyn CollisionWorld, hit: &Hit) {
        if self.config.can_swim && self.is_in_water() {
            self.set_movement_mode(world, MovementMode::Swimming);
            return;
        }

        let gravity = if self.is_falling() {
            self.gravity_vector()
        } else {
            Vec3::ZERO
        };
        let pre_impact_acceleration = self.acceleration + gravity;
        let pre_impact_velocity = self.velocity;

        match self.config.default_land_mode {
            MovementMode::Walking | MovementMode::NavWalking | MovementMode::Falling => {
                let ground_mode = self.ground_mode;
                self.set_movement_mode(world, ground_mode);
            }
            _ => self.set_default_movement_mode(world),
        }

        self.apply_impact_physics_forces(world, hit, pre_impact_acceleration, pre_impact_velocity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MovementConfig;
    use strider_physics::PhysicsWorld;

    const DT: f32 = 1.0 / 60.0;

    fn ground() -> PhysicsWorld {
        let mut world = PhysicsWorld::new();
        world.create_ground(0.0);
        world.refresh_queries();
        world
    }

    fn falling_at(world: &PhysicsWorld, location: Vec3, config: MovementConfig) -> CharacterMovement {
        let mut character = CharacterMovement::new(config);
        character.set_location(location);
        character.set_movement_mode(world, MovementMode::Falling);
        character.drain_events();
        character
    }

    fn landings(events: &[MovementEvent]) -> usize {
        events
            .iter()
            .filter(|event| {
                matches!(
                    event,
                    MovementEvent::ModeChanged {
                        previous: MovementMode::Falling,
                        current: MovementMode::Walking,
                    }
                )
            })
            .count()
    }

    #[test]
    fn test_lands_once_from_step_height() {
        let world = ground();
        // 30 above the resting height, within the max step height
        let mut character = falling_at(&world, Vec3::new(0.0, 0.0, 120.15), MovementConfig::default());

        let mut events = Vec::new();
        for _ in 0..60 {
            character.tick(&world, DT);
            events.extend(character.drain_events());
        }
        assert_eq!(landings(&events), 1);
        assert!(character.is_walking());
        assert!(character.velocity().z.abs() < 1.0e-3, "bounced: {}", character.velocity());
        assert!(events.iter().any(|event| matches!(event, MovementEvent::Landed { .. })));
        assert!((character.location().z - 90.15).abs() < 0.5);
    }

    #[test]
    fn test_free_fall_follows_gravity() {
        let world = PhysicsWorld::new();
        let mut character = CharacterMovement::new(MovementConfig::default());
        character.set_movement_mode(&world, MovementMode::Falling);
        character.tick(&world, 0.1);
        // Two sub-steps of 0.05 with trapezoid integration land exactly on the analytic curve
        assert!((character.velocity().z + 98.0).abs() < 1.0e-2);
        assert!((character.location().z + 0.5 * 980.0 * 0.01).abs() < 1.0e-2);
    }

    #[test]
    fn test_terminal_velocity() {
        let world = PhysicsWorld::new();
        let mut character = CharacterMovement::new(MovementConfig::default());
        character.set_movement_mode(&world, MovementMode::Falling);
        character.set_velocity(Vec3::new(100.0, 0.0, -3990.0));
        character.tick(&world, 0.1);
        assert!((character.velocity().z + 4000.0).abs() < 1.0e-2);
        assert!((character.velocity().x - 100.0).abs() < 1.0e-2);
    }

    #[test]
    fn test_air_control_boost() {
        let character = CharacterMovement::new(MovementConfig::default());
        // Still laterally: boosted to 2 * 0.05
        assert!((character.boost_air_control(0.05, -Vec3::Z) - 0.1).abs() < 1.0e-6);

        let mut moving = CharacterMovement::new(MovementConfig::default());
        moving.set_velocity(Vec3::new(100.0, 0.0, -500.0));
        assert!((moving.boost_air_control(0.05, -Vec3::Z) - 0.05).abs() < 1.0e-6);

        moving.acceleration = Vec3::new(2048.0, 0.0, 500.0);
        let lateral = moving.falling_lateral_acceleration(-Vec3::Z);
        assert!((lateral - Vec3::new(2048.0 * 0.05, 0.0, 0.0)).length() < 1.0e-3);
    }

    #[test]
    fn test_limit_air_control_against_wall() {
        let character = CharacterMovement::new(MovementConfig::default());
        let wall = Hit {
            blocking: true,
            normal: Vec3::new(-0.6, 0.0, 0.8),
            impact_normal: Vec3::new(-0.6, 0.0, 0.8),
            ..Default::default()
        };
        let limited = character.limit_air_control(Vec3::new(100.0, 50.0, 0.0), &wall, -Vec3::Z, false);
        assert!(limited.x.abs() < 1.0e-3);
        assert!((limited.y - 50.0).abs() < 1.0e-3);

        let penetrating = Hit {
            start_penetrating: true,
            normal: Vec3::X,
            ..Default::default()
        };
        assert_eq!(character.limit_air_control(-Vec3::X, &penetrating, -Vec3::Z, false), Vec3::ZERO);
        assert_eq!(character.limit_air_control(Vec3::X, &penetrating, -Vec3::Z, false), Vec3::X);
    }

    #[test]
    fn test_apex_notified_once() {
        let world = ground();
        let config = MovementConfig {
            notify_jump_apex: true,
            ..Default::default()
        };
        let mut character = CharacterMovement::new(config);
        character.initialize(&world, Vec3::new(0.0, 0.0, 90.15));
        character.jump();

        let mut events = Vec::new();
        for _ in 0..90 {
            character.tick(&world, DT);
            events.extend(character.drain_events());
        }
        let apexes = events.iter().filter(|event| **event == MovementEvent::JumpApex).count();
        assert_eq!(apexes, 1);
        assert!(character.is_walking());
    }

    #[test]
    fn test_slides_down_wall_while_falling() {
        let mut world = PhysicsWorld::new();
        world.create_static_box(Vec3::new(50.0, 500.0, 500.0), Vec3::new(150.0, 0.0, 0.0));
        world.refresh_queries();
        let mut character = falling_at(&world, Vec3::new(0.0, 0.0, 0.0), MovementConfig::default());
        character.set_velocity(Vec3::new(400.0, 0.0, 0.0));

        for _ in 0..30 {
            character.tick(&world, DT);
        }
        assert!(character.is_falling());
        assert!(character.location().x <= 100.0 - 34.0 + 0.01);
        assert!(character.location().z < -50.0);
        assert!(character.velocity().x.abs() < 1.0e-2);
    }

    #[test]
    fn test_lands_on_wall_under_sideways_gravity() {
        let mut world = PhysicsWorld::new();
        // Wall face at x = 100, gravity pulls along +X
        world.create_static_box(Vec3::new(50.0, 1000.0, 1000.0), Vec3::new(150.0, 0.0, 0.0));
        world.refresh_queries();
        let config = MovementConfig {
            align_component_to_gravity: true,
            ..Default::default()
        };
        let mut character = CharacterMovement::new(config);
        character.set_gravity_direction(Vec3::X);
        character.initialize(&world, Vec3::new(-200.0, 0.0, 0.0));

        for _ in 0..120 {
            character.tick(&world, DT);
        }
        let up = character.component_axis_z();
        assert!((up - Vec3::new(-1.0, 0.0, 0.0)).length() < 1.0e-3, "up = {up}");
        assert_eq!(character.mode(), MovementMode::Walking);
        assert!((character.location().x - (100.0 - 90.15)).abs() < 0.5);
    }

    #[test]
    fn test_zero_gravity_direction_stops() {
        let world = PhysicsWorld::new();
        let mut character = CharacterMovement::new(MovementConfig::default());
        character.set_movement_mode(&world, MovementMode::Falling);
        character.set_velocity(Vec3::new(10.0, 0.0, 0.0));
        character.set_gravity_scale(0.0);
        character.phys_falling(&world, 0.1, 0);
        assert_eq!(character.velocity(), Vec3::ZERO);
    }
}
