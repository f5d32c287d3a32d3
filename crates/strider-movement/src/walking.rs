//! Walking: following walkable floors, stepping, and ledges

use glam::Vec3;
use strider_core::math::{
    is_nearly_zero, project_on_plane, rotate_angle_axis, safe_normal, KINDA_SMALL, THRESH_NORMALS_ARE_ORTHOGONAL,
};
use strider_core::{CollisionWorld, Hit, QueryFilter, SurfaceId};
use tracing::{debug, trace};

use crate::character::{CharacterMovement, MAX_FLOOR_DIST, MIN_FLOOR_DIST, MIN_TICK_TIME};
use crate::events::MovementEvent;
use crate::floor::FloorResult;
use crate::mode::{MovementMode, MovementStrategy};
use crate::step::StepDownResult;

/// Walking and NavWalking.
pub struct WalkingStrategy;

impl MovementStrategy for WalkingStrategy {
    fn simulate(&self, movement: &mut CharacterMovement, world: &dyn CollisionWorld, delta_time: f32, iterations: u32) {
        movement.phys_walking(world, delta_time, iterations);
    }
}

/// State restored by [`CharacterMovement::revert_move`].
struct MoveStart {
    location: Vec3,
    base: Option<SurfaceId>,
    base_location: Option<Vec3>,
    floor: FloorResult,
}

impl CharacterMovement {
    pub(crate) fn phys_walking(&mut self, world: &dyn CollisionWorld, delta_time: f32, mut iterations: u32) {
        if delta_time < MIN_TICK_TIME {
            return;
        }

        self.just_teleported = false;
        let mut checked_fall = false;
        let mut tried_ledge_move = false;
        let mut remaining = delta_time;

        while remaining >= MIN_TICK_TIME && iterations < self.config.max_simulation_iterations {
            iterations += 1;
            self.just_teleported = false;
            let time_tick = self.simulation_time_step(remaining, iterations);
            remaining -= time_tick;

            let start = MoveStart {
                location: self.location,
                base: self.based.base,
                base_location: self
                    .based
                    .base
                    .and_then(|base| world.base_transform(base, self.based.bone.as_deref()))
                    .map(|(location, _)| location),
                floor: self.current_floor.clone(),
            };
            let old_location = start.location;

            self.restore_pre_additive_root_motion_velocity();
            self.maintain_horizontal_ground_velocity();

            let old_velocity = self.velocity;
            self.acceleration = project_on_plane(self.acceleration, self.component_axis_z());

            if !self.root_motion_overrides_velocity() {
                let braking = self.max_braking_deceleration();
                self.calc_velocity(time_tick, self.config.ground_friction, false, braking);
            }
            self.apply_root_motion_to_velocity(world, time_tick);

            if self.is_falling() {
                // Root motion lifted us off before anything moved
                self.start_new_physics(world, remaining + time_tick, iterations.saturating_sub(1));
                return;
            }

            let move_velocity = self.velocity;
            let delta = move_velocity * time_tick;
            let zero_delta = is_nearly_zero(delta, KINDA_SMALL);
            let mut step_down = StepDownResult::default();

            if zero_delta {
                remaining = 0.0;
            } else {
                self.move_along_floor(world, move_velocity, time_tick, &mut step_down);
                self.update_physics_volume(world);

                if self.is_falling() {
                    let desired = delta.length();
                    if desired > KINDA_SMALL {
                        let actual = project_on_plane(self.location - old_location, self.component_axis_z()).length();
                        remaining += time_tick * (1.0 - (actual / desired).min(1.0));
                    }
                    self.start_new_physics(world, remaining, iterations);
                    return;
                } else if self.is_swimming() {
                    self.start_swimming(world, old_location, old_velocity, time_tick, remaining, iterations);
                    return;
                }
            }

            // The step may already have found the floor
            if step_down.computed_floor {
                self.current_floor = step_down.floor;
            } else {
                let location = self.location;
                self.current_floor = self.find_floor(world, location, zero_delta, None);
            }

            let check_ledges = !self.can_walk_off_ledges();
            if check_ledges && !self.current_floor.is_walkable_floor() {
                let gravity_dir = -self.component_axis_z();
                let new_delta = if tried_ledge_move {
                    Vec3::ZERO
                } else {
                    self.ledge_move(world, old_location, delta, gravity_dir)
                };

                if new_delta != Vec3::ZERO {
                    self.revert_move(world, &start, false);
                    tried_ledge_move = true;
                    self.velocity = new_delta / time_tick;
                    remaining += time_tick;
                    continue;
                }

                let must_jump = zero_delta || self.must_jump_off(world, start.base);
                if (must_jump || !checked_fall)
                    && self.check_fall(world, &start.floor, delta, old_location, remaining, time_tick, iterations, must_jump)
                {
                    return;
                }
                checked_fall = true;

                self.revert_move(world, &start, true);
                break;
            }

            if self.current_floor.is_walkable_floor() {
                self.adjust_floor_height(world);
                self.set_base_from_floor(world);
            } else if self.current_floor.hit.start_penetrating && remaining <= 0.0 {
                // Pop out of the floor instead of sweeping down through it
                let mut hit = self.current_floor.hit.clone();
                hit.trace_end = hit.trace_start + self.component_axis_z() * MAX_FLOOR_DIST;
                let adjustment = self.penetration_adjustment(&hit);
                let rotation = self.rotation;
                self.resolve_penetration(world, adjustment, &hit, rotation);
            }

            if self.is_swimming() {
                let velocity = self.velocity;
                self.start_swimming(world, old_location, velocity, time_tick, remaining, iterations);
                return;
            }

            if !self.current_floor.is_walkable_floor() && !self.current_floor.hit.start_penetrating {
                let must_jump = self.just_teleported || zero_delta || self.must_jump_off(world, start.base);
                if (must_jump || !checked_fall)
                    && self.check_fall(world, &start.floor, delta, old_location, remaining, time_tick, iterations, must_jump)
                {
                    return;
                }
                checked_fall = true;
            }

            // Velocity follows the actual move
            if self.is_moving_on_ground()
                && !self.just_teleported
                && !self.root_motion_overrides_velocity()
                && time_tick >= MIN_TICK_TIME
            {
                self.velocity = (self.location - old_location) / time_tick;
            }

            if self.location == old_location {
                break;
            }
        }

        if self.is_moving_on_ground() {
            self.maintain_horizontal_ground_velocity();
        }
        debug_assert!(self.velocity.is_finite(), "velocity became NaN while walking");
    }

    /// Leaving the base is forced when there was none, or it is gone.
    fn must_jump_off(&self, world: &dyn CollisionWorld, old_base: Option<SurfaceId>) -> bool {
        match old_base {
            None => true,
            Some(base) => world.base_transform(base, None).is_none() && world.is_dynamic_base(base),
        }
    }

    /// Move along the current floor, ramping over slopes and stepping over barriers.
    pub fn move_along_floor(
        &mut self,
        world: &dyn CollisionWorld,
        velocity: Vec3,
        delta_time: f32,
        step_down: &mut StepDownResult,
    ) {
        if !self.current_floor.is_walkable_floor() {
            return;
        }

        let up = self.component_axis_z();
        let delta = project_on_plane(velocity, up) * delta_time;
        let floor_hit = self.current_floor.hit.clone();
        let mut ramp = self.compute_ground_movement_delta(delta, up, &floor_hit, self.current_floor.line_trace);
        let rotation = self.rotation;
        let mut hit = self.safe_move_updated_component(world, ramp, rotation);
        let mut last_time_slice = delta_time;

        if hit.start_penetrating {
            // Deflect off it rather than hitch for the rest of the update
            self.handle_impact(world, &hit, 0.0, Vec3::ZERO);
            let normal = hit.normal;
            self.slide_along_surface(world, delta, 1.0, normal, &mut hit, true);
            if hit.start_penetrating {
                debug!(surface = ?hit.surface, "stuck in geometry");
                self.push_event(MovementEvent::StuckInGeometry { hit: hit.clone() });
            }
            return;
        }

        if !hit.is_valid_blocking_hit() {
            return;
        }

        let mut percent_applied = hit.time;
        if hit.time > 0.0 && hit.normal.dot(up) > KINDA_SMALL && self.is_walkable(&hit) {
            // Another walkable ramp
            let initial_remaining = 1.0 - percent_applied;
            ramp = self.compute_ground_movement_delta(delta * initial_remaining, up, &hit, false);
            last_time_slice *= initial_remaining;
            hit = self.safe_move_updated_component(world, ramp, rotation);
            let second_percent = hit.time * initial_remaining;
            percent_applied = (percent_applied + second_percent).clamp(0.0, 1.0);
        }

        if !hit.is_valid_blocking_hit() {
            return;
        }

        let hit_is_base = hit.surface.is_some() && hit.surface == self.based.base;
        if self.can_step_up(&hit) || hit_is_base {
            let remaining_delta = delta * (1.0 - percent_applied);
            match self.step_up(world, -up, remaining_delta, &hit) {
                Some(result) => {
                    trace!(impact_normal = ?hit.impact_normal, "stepped over barrier");
                    *step_down = result;
                    self.just_teleported |= !self.config.maintain_horizontal_ground_velocity;
                }
                None => {
                    trace!(impact_normal = ?hit.impact_normal, "step up failed");
                    self.handle_impact(world, &hit, last_time_slice, ramp);
                    let normal = hit.normal;
                    self.slide_along_surface(world, delta, 1.0 - percent_applied, normal, &mut hit, true);
                }
            }
        } else if !hit.props.can_step_up {
            self.handle_impact(world, &hit, last_time_slice, ramp);
            let normal = hit.normal;
            self.slide_along_surface(world, delta, 1.0 - percent_applied, normal, &mut hit, true);
        }
    }

    /// Turn a move on the capsule plane into one parallel to a walkable ramp.
    ///
    /// The move is lifted along `delta_plane_normal` onto the ramp plane.
    /// With `maintain_horizontal_ground_velocity` the horizontal part is
    /// kept, otherwise the result is rescaled to the length of `delta`.
    pub fn compute_ground_movement_delta(
        &self,
        delta: Vec3,
        delta_plane_normal: Vec3,
        ramp_hit: &Hit,
        hit_from_line_trace: bool,
    ) -> Vec3 {
        let floor_normal = ramp_hit.impact_normal;
        let floor_dot_delta = floor_normal.dot(delta);
        let floor_dot_up = floor_normal.dot(delta_plane_normal);
        if hit_from_line_trace
            || floor_dot_delta.abs() <= THRESH_NORMALS_ARE_ORTHOGONAL
            || floor_dot_up <= KINDA_SMALL
            || !self.is_walkable(ramp_hit)
        {
            return delta;
        }

        let ramp = delta - delta_plane_normal * (floor_dot_delta / floor_dot_up);
        if self.config.maintain_horizontal_ground_velocity {
            ramp
        } else {
            safe_normal(ramp) * delta.length()
        }
    }

    /// Keep ground velocity on the capsule plane.
    pub(crate) fn maintain_horizontal_ground_velocity(&mut self) {
        let up = self.component_axis_z();
        if self.config.maintain_horizontal_ground_velocity {
            self.velocity = project_on_plane(self.velocity, up);
        } else {
            self.velocity = safe_normal(project_on_plane(self.velocity, up)) * self.velocity.length();
        }
    }

    /// Move toward the average floor distance when outside the allowed band.
    pub(crate) fn adjust_floor_height(&mut self, world: &dyn CollisionWorld) {
        if !self.current_floor.blocking_hit {
            return;
        }

        let old_floor_dist = self.current_floor.floor_dist;
        // Adjusting off a line trace would climb unwalkable walls
        if self.current_floor.line_trace && old_floor_dist < MIN_FLOOR_DIST {
            return;
        }
        if (MIN_FLOOR_DIST..=MAX_FLOOR_DIST).contains(&old_floor_dist) {
            return;
        }

        let avg_floor_dist = (MIN_FLOOR_DIST + MAX_FLOOR_DIST) * 0.5;
        let move_dist = avg_floor_dist - old_floor_dist;
        let up = self.component_axis_z();
        let initial_location = self.location;
        let rotation = self.rotation;

        let adjust_hit = self.safe_move_updated_component(world, up * move_dist, rotation);
        trace!(move_dist, blocked = adjust_hit.blocking, "adjusted floor height");

        // Moved amount along up, which is the full move when nothing was hit
        self.current_floor.floor_dist += (self.location - initial_location).dot(up);
        if adjust_hit.is_valid_blocking_hit() && move_dist < 0.0 && self.is_walkable(&adjust_hit) {
            let floor_dist = self.current_floor.floor_dist;
            self.current_floor.set_from_sweep(adjust_hit, floor_dist, true);
        }

        self.just_teleported |= !self.config.maintain_horizontal_ground_velocity || old_floor_dist < 0.0;
    }

    /// Whether walking may continue off the edge of a floor.
    pub fn can_walk_off_ledges(&self) -> bool {
        if !self.config.can_walk_off_ledges_when_crouching && self.crouch.is_crouched {
            return false;
        }
        self.config.can_walk_off_ledges
    }

    /// Sideways move along a ledge, trying left then right of `delta`.
    pub fn ledge_move(&self, world: &dyn CollisionWorld, old_location: Vec3, delta: Vec3, gravity_dir: Vec3) -> Vec3 {
        if !self.has_valid_data() || delta == Vec3::ZERO {
            return Vec3::ZERO;
        }

        let left = rotate_angle_axis(project_on_plane(delta, gravity_dir), std::f32::consts::FRAC_PI_2, gravity_dir);
        if self.check_ledge_direction(world, old_location, left, gravity_dir) {
            return left;
        }
        let right = -left;
        if self.check_ledge_direction(world, old_location, right, gravity_dir) {
            return right;
        }
        Vec3::ZERO
    }

    /// Whether moving by `side_step` keeps a walkable floor under the character.
    pub fn check_ledge_direction(
        &self,
        world: &dyn CollisionWorld,
        old_location: Vec3,
        side_step: Vec3,
        gravity_dir: Vec3,
    ) -> bool {
        let side_dest = old_location + side_step;
        let shape = self.capsule_shape();
        let filter = QueryFilter::default();
        let mut result = world.sweep(old_location, side_dest, self.rotation, &shape, &filter);

        if result.blocking && !self.is_walkable(&result) {
            return false;
        }
        if !result.blocking {
            let down = gravity_dir * (self.config.max_step_height + self.config.ledge_check_threshold);
            result = world.sweep(side_dest, side_dest + down, self.rotation, &shape, &filter);
        }
        result.time < 1.0 && self.is_walkable(&result)
    }

    /// Undo a move that left the floor.
    fn revert_move(&mut self, world: &dyn CollisionWorld, start: &MoveStart, fail_move: bool) {
        self.location = start.location;
        self.just_teleported = false;

        // Only keep the old base if it could not have moved meanwhile
        let restore_base = start.base.is_some_and(|base| {
            let current = world.base_transform(base, None).map(|(location, _)| location);
            current.is_some() && (!world.is_dynamic_base(base) || current == start.base_location)
        });
        if restore_base {
            self.current_floor = start.floor.clone();
            let bone = start.floor.hit.bone.clone();
            self.set_base(world, start.base, bone);
        } else {
            self.set_base(world, None, None);
        }

        if fail_move {
            self.velocity = Vec3::ZERO;
            self.acceleration = Vec3::ZERO;
        }
    }

    /// Walk off the ledge if allowed, notifying and starting to fall.
    ///
    /// Returns true if the walk continued as a fall.
    #[allow(clippy::too_many_arguments)]
    fn check_fall(
        &mut self,
        world: &dyn CollisionWorld,
        old_floor: &FloorResult,
        delta: Vec3,
        old_location: Vec3,
        remaining: f32,
        time_tick: f32,
        iterations: u32,
        must_jump: bool,
    ) -> bool {
        if !must_jump && !self.can_walk_off_ledges() {
            return false;
        }

        self.push_event(MovementEvent::WalkedOffLedge {
            previous_floor_impact_normal: old_floor.hit.impact_normal,
            previous_floor_normal: old_floor.hit.normal,
            previous_location: old_location,
            time_delta: time_tick,
        });
        if self.is_moving_on_ground() {
            self.start_falling(world, iterations, remaining, time_tick, delta, old_location);
        }
        true
    }

    /// Switch to falling, giving back the part of the tick the move did not use.
    pub(crate) fn start_falling(
        &mut self,
        world: &dyn CollisionWorld,
        iterations: u32,
        remaining: f32,
        time_tick: f32,
        delta: Vec3,
        sub_location: Vec3,
    ) {
        let desired = delta.length();
        let remaining = if desired < KINDA_SMALL {
            0.0
        } else {
            let actual = (self.location - sub_location).length();
            remaining + time_tick * (1.0 - (actual / desired).min(1.0))
        };

        if self.is_moving_on_ground() {
            self.set_movement_mode(world, MovementMode::Falling);
        }
        self.start_new_physics(world, remaining, iterations);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MovementConfig;
    use glam::Quat;
    use strider_physics::PhysicsWorld;

    const DT: f32 = 1.0 / 60.0;

    fn standing_on(world: &PhysicsWorld, location: Vec3, config: MovementConfig) -> CharacterMovement {
        let mut character = CharacterMovement::new(config);
        character.initialize(world, location);
        character
    }

    fn flat_ground() -> PhysicsWorld {
        let mut world = PhysicsWorld::new();
        world.create_ground(0.0);
        world.refresh_queries();
        world
    }

    /// A 200 x 200 block with its top at z = 100.
    fn block() -> PhysicsWorld {
        let mut world = PhysicsWorld::new();
        world.create_static_box(Vec3::new(100.0, 100.0, 50.0), Vec3::new(0.0, 0.0, 50.0));
        world.refresh_queries();
        world
    }

    #[test]
    fn test_resting_on_flat_ground() {
        let world = flat_ground();
        let mut character = standing_on(&world, Vec3::new(0.0, 0.0, 90.15), MovementConfig::default());
        let z = character.location().z;
        character.tick(&world, DT);

        assert_eq!(character.mode(), MovementMode::Walking);
        assert!(character.velocity().length() < 1.0e-3);
        assert!((character.location().z - z).abs() <= MAX_FLOOR_DIST - MIN_FLOOR_DIST);
        assert!(character.current_floor().is_walkable_floor());
    }

    #[test]
    fn test_accelerates_to_max_walk_speed() {
        let world = flat_ground();
        let mut character = standing_on(&world, Vec3::new(0.0, 0.0, 90.15), MovementConfig::default());
        for _ in 0..120 {
            character.add_input_vector(Vec3::X);
            character.tick(&world, DT);
        }
        assert_eq!(character.mode(), MovementMode::Walking);
        assert!((character.velocity().x - 600.0).abs() < 1.0, "v = {}", character.velocity());
        assert!(character.velocity().z.abs() < 1.0e-3);
        assert!(character.current_floor().is_walkable_floor());
    }

    #[test]
    fn test_braking_stops_on_release() {
        let world = flat_ground();
        let mut character = standing_on(&world, Vec3::new(0.0, 0.0, 90.15), MovementConfig::default());
        character.set_velocity(Vec3::new(600.0, 0.0, 0.0));
        for _ in 0..60 {
            character.tick(&world, DT);
        }
        assert_eq!(character.velocity(), Vec3::ZERO);
    }

    #[test]
    fn test_slides_along_wall() {
        let mut world = PhysicsWorld::new();
        world.create_ground(0.0);
        world.create_static_box(Vec3::new(10.0, 500.0, 200.0), Vec3::new(60.0, 0.0, 200.0));
        world.refresh_queries();
        let mut character = standing_on(&world, Vec3::new(0.0, 0.0, 90.15), MovementConfig::default());

        for _ in 0..30 {
            character.add_input_vector(Vec3::new(1.0, 1.0, 0.0).normalize());
            character.tick(&world, DT);
        }
        // Blocked in x by the wall face at 50, free along y
        assert!(character.location().x < 50.0 - 34.0 + 0.01);
        assert!(character.location().y > 50.0);
        assert_eq!(character.mode(), MovementMode::Walking);
        assert!(character.events().iter().any(|event| matches!(event, MovementEvent::MoveBlocked { .. })));
    }

    #[test]
    fn test_walks_off_ledge() {
        let world = block();
        let mut character = standing_on(&world, Vec3::new(60.0, 0.0, 190.15), MovementConfig::default());
        assert_eq!(character.mode(), MovementMode::Walking);
        character.set_velocity(Vec3::new(600.0, 0.0, 0.0));

        let mut fell = false;
        for _ in 0..30 {
            character.add_input_vector(Vec3::X);
            character.tick(&world, DT);
            if character.is_falling() {
                fell = true;
                break;
            }
        }
        assert!(fell);
        assert!(character
            .drain_events()
            .iter()
            .any(|event| matches!(event, MovementEvent::WalkedOffLedge { .. })));
    }

    #[test]
    fn test_ledge_blocks_when_walking_off_disabled() {
        let world = block();
        let config = MovementConfig {
            can_walk_off_ledges: false,
            ..Default::default()
        };
        let mut character = standing_on(&world, Vec3::new(60.0, 0.0, 190.15), config);
        for _ in 0..60 {
            character.add_input_vector(Vec3::X);
            character.tick(&world, DT);
        }
        assert_eq!(character.mode(), MovementMode::Walking);
        // Perched on the edge at most
        assert!(character.location().x <= 100.0 + 34.0 + 1.0, "x = {}", character.location().x);
        assert!(character.current_floor().is_walkable_floor());
    }

    #[test]
    fn test_walks_up_onto_low_step() {
        let mut world = PhysicsWorld::new();
        world.create_ground(0.0);
        world.create_static_box(Vec3::new(100.0, 200.0, 15.0), Vec3::new(150.0, 0.0, 15.0));
        world.refresh_queries();
        let mut character = standing_on(&world, Vec3::new(0.0, 0.0, 90.15), MovementConfig::default());

        for _ in 0..60 {
            character.add_input_vector(Vec3::X);
            character.tick(&world, DT);
        }
        assert_eq!(character.mode(), MovementMode::Walking);
        assert!(character.location().x > 100.0);
        assert!((character.location().z - (30.0 + 90.15)).abs() < 1.0, "z = {}", character.location().z);
    }

    #[test]
    fn test_blocked_by_tall_wall() {
        let mut world = PhysicsWorld::new();
        world.create_ground(0.0);
        world.create_static_box(Vec3::new(100.0, 200.0, 40.0), Vec3::new(150.0, 0.0, 40.0));
        world.refresh_queries();
        let mut character = standing_on(&world, Vec3::new(0.0, 0.0, 90.15), MovementConfig::default());

        for _ in 0..60 {
            character.add_input_vector(Vec3::X);
            character.tick(&world, DT);
        }
        assert!(character.location().x < 50.0 - 34.0 + 0.01);
        assert!((character.location().z - 90.15).abs() < 1.0);
    }

    #[test]
    fn test_walks_up_ramp_keeping_floor() {
        let mut world = PhysicsWorld::new();
        world.create_ground(0.0);
        // 20 degree ramp starting near the character
        let rotation = Quat::from_rotation_y(-20.0_f32.to_radians());
        world.create_rotated_box(Vec3::new(300.0, 200.0, 10.0), Vec3::new(350.0, 0.0, 0.0), rotation);
        world.refresh_queries();
        let mut character = standing_on(&world, Vec3::new(0.0, 0.0, 90.15), MovementConfig::default());

        for _ in 0..60 {
            character.add_input_vector(Vec3::X);
            character.tick(&world, DT);
            assert!(character.is_walking(), "left the ground at {}", character.location());
            assert!(character.current_floor().is_walkable_floor());
        }
        assert!(character.location().z > 120.0);
    }

    #[test]
    fn test_ground_delta_on_ramp() {
        let world = flat_ground();
        let character = standing_on(&world, Vec3::new(0.0, 0.0, 90.15), MovementConfig::default());
        let normal = Vec3::new(-0.5, 0.0, 0.75_f32.sqrt());
        let ramp = Hit {
            blocking: true,
            normal,
            impact_normal: normal,
            ..Default::default()
        };
        let delta = character.compute_ground_movement_delta(Vec3::new(10.0, 0.0, 0.0), Vec3::Z, &ramp, false);
        // Horizontal length kept, rising along the ramp
        assert!((delta.x - 10.0).abs() < 1.0e-3);
        assert!(delta.z > 5.0);
        assert!(delta.dot(normal).abs() < 1.0e-3);

        let from_line = character.compute_ground_movement_delta(Vec3::new(10.0, 0.0, 0.0), Vec3::Z, &ramp, true);
        assert_eq!(from_line, Vec3::new(10.0, 0.0, 0.0));
    }

    #[test]
    fn test_adjust_floor_height_into_band() {
        let world = flat_ground();
        let mut character = standing_on(&world, Vec3::new(0.0, 0.0, 90.15), MovementConfig::default());
        character.set_location(Vec3::new(0.0, 0.0, 93.0));
        let location = character.location();
        character.current_floor = character.find_floor(&world, location, false, None);
        character.adjust_floor_height(&world);

        let dist = character.current_floor().floor_dist;
        assert!((MIN_FLOOR_DIST..=MAX_FLOOR_DIST).contains(&dist), "floor dist {dist}");
        assert!((character.location().z - 90.15).abs() < 0.05);
    }
}
