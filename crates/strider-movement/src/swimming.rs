//! Swimming: buoyancy, fluid drag and entering or leaving water

use glam::Vec3;
use strider_core::math::{clamp_length_max, project_on_plane, quat_axis_x, safe_normal, KINDA_SMALL};
use strider_core::{CollisionWorld, Hit, QueryFilter};
use tracing::debug;

use crate::character::{CharacterMovement, MIN_TICK_TIME, SWIM_BOB_SPEED};
use crate::mode::{MovementMode, MovementStrategy};

pub struct SwimmingStrategy;

impl MovementStrategy for SwimmingStrategy {
    fn simulate(&self, movement: &mut CharacterMovement, world: &dyn CollisionWorld, delta_time: f32, iterations: u32) {
        movement.phys_swimming(world, delta_time, iterations);
    }
}

impl CharacterMovement {
    /// Fraction of the capsule below the water surface, 0 when out of water.
    pub fn immersion_depth(&self, world: &dyn CollisionWorld) -> f32 {
        if !self.volume.water {
            return 0.0;
        }
        if self.half_height == 0.0 || self.config.buoyancy == 0.0 {
            return 1.0;
        }
        let half = self.component_axis_z() * self.half_height;
        match world.water_entry(self.location + half, self.location - half) {
            Some(time) => 1.0 - time,
            None => 1.0,
        }
    }

    pub(crate) fn phys_swimming(&mut self, world: &dyn CollisionWorld, delta_time: f32, mut iterations: u32) {
        if delta_time < MIN_TICK_TIME {
            return;
        }

        let gravity_dir = self.gravity_direction(false);
        if gravity_dir == Vec3::ZERO {
            self.acceleration = Vec3::ZERO;
            self.velocity = Vec3::ZERO;
            return;
        }

        self.restore_pre_additive_root_motion_velocity();

        let velocity_up = -self.velocity.dot(gravity_dir);
        let acceleration_up = -self.acceleration.dot(gravity_dir);
        let depth = self.immersion_depth(world);
        let net_buoyancy = self.config.buoyancy * depth;
        let max_swim_speed = self.config.max_swim_speed;
        let mut limited_up_acceleration = false;

        if !self.root_motion_overrides_velocity() && velocity_up > 0.33 * max_swim_speed && net_buoyancy != 0.0 {
            // Damp the climb out of water
            let damped = (0.33 * max_swim_speed).max(velocity_up * depth * depth);
            self.velocity = project_on_plane(self.velocity, gravity_dir) - gravity_dir * damped;
        } else if depth < 0.65 {
            limited_up_acceleration = acceleration_up > 0.0;
            self.acceleration = project_on_plane(self.acceleration, gravity_dir) - gravity_dir * acceleration_up.min(0.1);
        }

        iterations += 1;
        let mut old_location = self.location;
        self.just_teleported = false;

        if !self.root_motion_overrides_velocity() {
            let friction = 0.5 * self.volume.fluid_friction * depth;
            self.calc_velocity(delta_time, friction, true, self.max_braking_deceleration());
            self.velocity += self.gravity_vector() * (delta_time * (1.0 - net_buoyancy));
        }

        self.apply_root_motion_to_velocity(world, delta_time);

        let mut adjusted = self.velocity * delta_time;
        let (air_time, mut hit) = self.swim(world, adjusted);
        let remaining = delta_time * air_time;

        if !self.is_swimming() {
            self.start_new_physics(world, remaining, iterations);
            return;
        }

        if hit.time < 1.0 {
            let velocity_up = -self.velocity.dot(gravity_dir);
            if limited_up_acceleration && velocity_up >= 0.0 {
                // Climbing against an obstacle at the surface
                let climb = velocity_up + acceleration_up * delta_time;
                self.velocity = project_on_plane(self.velocity, gravity_dir) - gravity_dir * climb;
                adjusted = self.velocity * (1.0 - hit.time) * delta_time;
                let (_, retry_hit) = self.swim(world, adjusted);
                hit = retry_hit;
                if !self.is_swimming() {
                    self.start_new_physics(world, remaining, iterations);
                    return;
                }
            }

            let up_down = gravity_dir.dot(safe_normal(self.velocity));
            let mut stepped_up = false;
            if up_down < 0.5 && up_down > -0.2 && hit.impact_normal.dot(gravity_dir).abs() < 0.2 && self.can_step_up(&hit) {
                let step_location = self.location;
                let real_velocity = self.velocity;
                // Moving up may leave the water
                self.velocity = project_on_plane(self.velocity, gravity_dir) - gravity_dir;

                stepped_up = self.step_up(world, gravity_dir, adjusted * (1.0 - hit.time), &hit).is_some();
                if stepped_up {
                    self.update_physics_volume(world);
                    if !self.is_swimming() {
                        self.start_new_physics(world, remaining, iterations);
                        return;
                    }
                    old_location += gravity_dir * (self.location - step_location).dot(gravity_dir);
                }
                self.velocity = real_velocity;
            }

            if !stepped_up {
                self.handle_impact(world, &hit, delta_time, adjusted);
                let normal = hit.normal;
                self.slide_along_surface(world, adjusted, 1.0 - hit.time, normal, &mut hit, true);
            }
        }

        let moved_time = delta_time - remaining;
        if !self.root_motion_overrides_velocity() && !self.just_teleported && moved_time > KINDA_SMALL {
            let velocity_z = self.velocity.dot(gravity_dir);
            self.velocity = (self.location - old_location) / moved_time;
            if !self.volume.water {
                self.velocity = project_on_plane(self.velocity, gravity_dir) + gravity_dir * velocity_z;
            }
        }

        if !self.volume.water && self.is_swimming() {
            self.set_movement_mode(world, MovementMode::Falling);
        }
        if !self.is_swimming() {
            self.start_new_physics(world, remaining, iterations);
        }
    }

    /// Move through water by `delta`, stopping at the surface when leaving it.
    ///
    /// Returns the fraction of the move left over after surfacing, and the
    /// hit of the last move.
    pub fn swim(&mut self, world: &dyn CollisionWorld, delta: Vec3) -> (f32, Hit) {
        let start = self.location;
        let rotation = self.rotation;
        let mut hit = self.safe_move_updated_component(world, delta, rotation);
        self.update_physics_volume(world);

        let mut air_time = 0.0;
        if !self.is_in_water() {
            let location = self.location;
            let end = self.find_water_line(world, start, location);
            let desired_dist = delta.length();
            if end != location && desired_dist > KINDA_SMALL {
                air_time = (end - location).length() / desired_dist;
                // Water line ahead of us, not behind
                if (location - start).dot(end - location) > 0.0 {
                    air_time = 0.0;
                }
                hit = self.safe_move_updated_component(world, end - location, rotation);
                self.update_physics_volume(world);
            }
        }
        (air_time, hit)
    }

    /// Point on the water surface between a submerged and a dry location.
    ///
    /// The point is nudged slightly into the volume the character is in.
    pub fn find_water_line(&self, world: &dyn CollisionWorld, in_water: Vec3, out_of_water: Vec3) -> Vec3 {
        let Some(time) = world.water_entry(out_of_water, in_water) else {
            return out_of_water;
        };
        let direction = safe_normal(in_water - out_of_water);
        let surface = out_of_water + (in_water - out_of_water) * time;
        if self.is_in_water() {
            surface + direction * 0.1
        } else {
            surface - direction * 0.1
        }
    }

    /// Continue a sub-step that just entered water.
    pub(crate) fn start_swimming(
        &mut self,
        world: &dyn CollisionWorld,
        old_location: Vec3,
        old_velocity: Vec3,
        time_tick: f32,
        mut remaining: f32,
        iterations: u32,
    ) {
        if remaining < MIN_TICK_TIME || time_tick < MIN_TICK_TIME {
            return;
        }

        if !self.root_motion_overrides_velocity() && !self.just_teleported {
            // End velocity from the average velocity over the tick
            let average = (self.location - old_location) / time_tick;
            self.velocity = clamp_length_max(average * 2.0 - old_velocity, self.volume.terminal_velocity);
        }

        let location = self.location;
        let end = self.find_water_line(world, location, old_location);
        if end != location {
            let actual_dist = (location - old_location).length();
            if actual_dist > KINDA_SMALL {
                remaining += time_tick * (end - location).length() / actual_dist;
            }
            let rotation = self.rotation;
            self.move_updated_component(world, end - location, rotation);
        }

        let gravity_dir = self.gravity_direction(false);
        if !self.root_motion_overrides_velocity() && gravity_dir != Vec3::ZERO {
            let down_speed = self.velocity.dot(gravity_dir);
            if down_speed > 0.0 && down_speed < SWIM_BOB_SPEED * -2.0 {
                // Smooth bob at the surface
                let velocity_2d = project_on_plane(self.velocity, gravity_dir);
                self.velocity = velocity_2d - gravity_dir * (SWIM_BOB_SPEED - velocity_2d.length() * 0.7);
            }
        }

        if remaining >= MIN_TICK_TIME && iterations < self.config.max_simulation_iterations {
            self.phys_swimming(world, remaining, iterations);
        }
    }

    /// React to the physics volume changing under the character.
    pub(crate) fn physics_volume_changed(&mut self, world: &dyn CollisionWorld) {
        if !self.has_valid_data() {
            return;
        }

        if self.volume.water {
            if self.config.can_swim && !self.is_swimming() {
                self.set_movement_mode(world, MovementMode::Swimming);
            }
            return;
        }

        if !self.is_swimming() {
            return;
        }
        self.set_movement_mode(world, MovementMode::Falling);

        let gravity_dir = self.gravity_direction(true);
        if self.acceleration.dot(gravity_dir) >= 0.0 {
            return;
        }
        let Some(jump_dir) = self.should_jump_out_of_water(gravity_dir) else {
            return;
        };
        if jump_dir.dot(self.acceleration) > 0.0 && self.check_water_jump(world, jump_dir, gravity_dir) {
            debug!(location = ?self.location, "jumping out of water");
            self.velocity = project_on_plane(self.velocity, gravity_dir) - gravity_dir * self.config.out_of_water_z;
        }
    }

    /// Look direction when rising and looking up steeply enough to leave the water.
    pub fn should_jump_out_of_water(&self, gravity_dir: Vec3) -> Option<Vec3> {
        if self.velocity.dot(gravity_dir) >= 0.0 {
            return None;
        }
        let look = quat_axis_x(self.control_rotation.unwrap_or(self.rotation));
        let threshold = (self.config.jump_out_of_water_pitch + 90.0).to_radians().cos();
        (look.dot(gravity_dir) < threshold).then_some(look)
    }

    /// Whether a wall ahead is low enough to climb out onto.
    pub fn check_water_jump(&self, world: &dyn CollisionWorld, check_dir: Vec3, gravity_dir: Vec3) -> bool {
        if !self.has_valid_data() {
            return false;
        }

        let location = self.location;
        let check_point = location + safe_normal(project_on_plane(check_dir, gravity_dir)) * (self.radius * 1.2);
        let filter = QueryFilter::default();
        let hit = world.sweep(location, check_point, self.rotation, &self.capsule_shape(), &filter);
        if !hit.blocking {
            return false;
        }

        let wall_normal = -hit.impact_normal;
        let start = location - gravity_dir * self.config.max_step_height;
        let end = start + wall_normal * (self.radius * 3.2);
        let top = world.line_trace(start, end, &filter);
        !top.blocking || self.is_walkable(&top)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MovementConfig;
    use crate::events::MovementEvent;
    use glam::Quat;
    use strider_core::PhysicsVolume;
    use strider_physics::PhysicsWorld;

    const DT: f32 = 1.0 / 60.0;

    /// Water everywhere below z = 0.
    fn pool() -> PhysicsWorld {
        let mut world = PhysicsWorld::new();
        world.add_water_volume(
            Vec3::new(-5000.0, -5000.0, -5000.0),
            Vec3::new(5000.0, 5000.0, 0.0),
            PhysicsVolume {
                water: true,
                ..Default::default()
            },
        );
        world.refresh_queries();
        world
    }

    fn swimmer(world: &PhysicsWorld, location: Vec3, config: MovementConfig) -> CharacterMovement {
        let mut character = CharacterMovement::new(config);
        character.initialize(world, location);
        character
    }

    #[test]
    fn test_spawning_in_water_swims() {
        let world = pool();
        let character = swimmer(&world, Vec3::new(0.0, 0.0, -500.0), MovementConfig::default());
        assert!(character.is_swimming());
        assert!(character.is_in_water());
    }

    #[test]
    fn test_neutral_buoyancy_holds_depth() {
        let world = pool();
        let mut character = swimmer(&world, Vec3::new(0.0, 0.0, -500.0), MovementConfig::default());
        for _ in 0..60 {
            character.tick(&world, DT);
        }
        assert!(character.is_swimming());
        assert!(character.velocity().length() < 1.0e-3);
        assert!((character.location().z + 500.0).abs() < 1.0e-2);
    }

    #[test]
    fn test_sinks_without_buoyancy() {
        let world = pool();
        let config = MovementConfig {
            buoyancy: 0.0,
            ..Default::default()
        };
        let mut character = swimmer(&world, Vec3::new(0.0, 0.0, -500.0), config);
        for _ in 0..30 {
            character.tick(&world, DT);
        }
        assert!(character.is_swimming());
        assert!(character.velocity().z < -100.0);
        assert!(character.location().z < -500.0);
    }

    #[test]
    fn test_swims_toward_input() {
        let world = pool();
        let mut character = swimmer(&world, Vec3::new(0.0, 0.0, -500.0), MovementConfig::default());
        for _ in 0..120 {
            character.add_input_vector(Vec3::X);
            character.tick(&world, DT);
        }
        assert!(character.velocity().x > 100.0);
        assert!(character.velocity().x <= 300.0 + 1.0e-2);
        assert!(character.location().x > 100.0);
    }

    #[test]
    fn test_immersion_depth() {
        let world = pool();
        let mut character = swimmer(&world, Vec3::new(0.0, 0.0, -44.0), MovementConfig::default());
        // Top at 44, bottom at -132: a quarter of the capsule is above the surface
        assert!((character.immersion_depth(&world) - 0.75).abs() < 1.0e-3);

        character.set_location(Vec3::new(0.0, 0.0, -500.0));
        assert_eq!(character.immersion_depth(&world), 1.0);

        character.volume = PhysicsVolume::default();
        assert_eq!(character.immersion_depth(&world), 0.0);
    }

    #[test]
    fn test_find_water_line() {
        let world = pool();
        let mut character = CharacterMovement::new(MovementConfig::default());
        character.set_location(Vec3::new(0.0, 0.0, 50.0));
        let line = character.find_water_line(&world, Vec3::new(0.0, 0.0, -50.0), Vec3::new(0.0, 0.0, 50.0));
        // Nudged back out of the water while dry
        assert!((line - Vec3::new(0.0, 0.0, 0.1)).length() < 1.0e-4);

        let dry = character.find_water_line(&world, Vec3::new(0.0, 0.0, 60.0), Vec3::new(0.0, 0.0, 50.0));
        assert_eq!(dry, Vec3::new(0.0, 0.0, 50.0));
    }

    #[test]
    fn test_falling_into_water() {
        let world = pool();
        let mut character = CharacterMovement::new(MovementConfig::default());
        character.initialize(&world, Vec3::new(0.0, 0.0, 200.0));
        assert!(character.is_falling());

        let mut entered = false;
        for _ in 0..60 {
            character.tick(&world, DT);
            if character
                .drain_events()
                .iter()
                .any(|event| matches!(event, MovementEvent::ModeChanged { current: MovementMode::Swimming, .. }))
            {
                entered = true;
                break;
            }
        }
        assert!(entered);
        assert!(character.is_swimming());
        assert!(character.location().z <= 0.0);
    }

    fn leaving_water_by_wall(control: Quat) -> CharacterMovement {
        let mut world = PhysicsWorld::new();
        // Ledge top at z = 60, face at x = 60
        world.create_static_box(Vec3::new(100.0, 500.0, 50.0), Vec3::new(160.0, 0.0, 10.0));
        world.refresh_queries();

        let mut character = CharacterMovement::new(MovementConfig::default());
        character.set_location(Vec3::new(0.0, 0.0, 50.0));
        character.set_movement_mode(&world, MovementMode::Swimming);
        character.set_control_rotation(Some(control));
        character.set_velocity(Vec3::new(0.0, 0.0, 100.0));
        character.acceleration = Vec3::new(1000.0, 0.0, 500.0);
        character.physics_volume_changed(&world);
        character
    }

    #[test]
    fn test_jumps_out_of_water_onto_ledge() {
        let character = leaving_water_by_wall(Quat::from_rotation_y(-30.0_f32.to_radians()));
        assert!(character.is_falling());
        assert!((character.velocity().z - 420.0).abs() < 1.0e-3);
    }

    #[test]
    fn test_level_look_does_not_jump_out() {
        let character = leaving_water_by_wall(Quat::IDENTITY);
        assert!(character.is_falling());
        assert!((character.velocity().z - 100.0).abs() < 1.0e-3);
    }
}
