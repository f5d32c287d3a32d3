//! Flying: free movement with fluid drag and no gravity

use glam::Vec3;
use strider_core::math::safe_normal;
use strider_core::CollisionWorld;

use crate::character::{CharacterMovement, MIN_TICK_TIME};
use crate::mode::MovementStrategy;

pub struct FlyingStrategy;

impl MovementStrategy for FlyingStrategy {
    fn simulate(&self, movement: &mut CharacterMovement, world: &dyn CollisionWorld, delta_time: f32, iterations: u32) {
        movement.phys_flying(world, delta_time, iterations);
    }
}

impl CharacterMovement {
    pub(crate) fn phys_flying(&mut self, world: &dyn CollisionWorld, delta_time: f32, _iterations: u32) {
        if delta_time < MIN_TICK_TIME {
            return;
        }

        // Gravity only orients steps here, but flying still needs a direction
        let gravity_dir = self.gravity_direction(false);
        if gravity_dir == Vec3::ZERO {
            self.acceleration = Vec3::ZERO;
            self.velocity = Vec3::ZERO;
            return;
        }

        self.restore_pre_additive_root_motion_velocity();

        if !self.root_motion_overrides_velocity() {
            let friction = 0.5 * self.volume.fluid_friction;
            self.calc_velocity(delta_time, friction, true, self.max_braking_deceleration());
        }

        self.apply_root_motion_to_velocity(world, delta_time);

        self.just_teleported = false;
        let mut old_location = self.location;
        let adjusted = self.velocity * delta_time;
        let rotation = self.rotation;
        let mut hit = self.safe_move_updated_component(world, adjusted, rotation);

        if hit.time < 1.0 {
            let up_down = gravity_dir.dot(safe_normal(self.velocity));
            let mut stepped_up = false;

            if up_down < 0.5 && up_down > -0.2 && hit.impact_normal.dot(gravity_dir).abs() < 0.2 && self.can_step_up(&hit) {
                let step_location = self.location;
                stepped_up = self.step_up(world, gravity_dir, adjusted * (1.0 - hit.time), &hit).is_some();
                if stepped_up {
                    old_location += gravity_dir * (self.location - step_location).dot(gravity_dir);
                }
            }

            if !stepped_up {
                self.handle_impact(world, &hit, delta_time, adjusted);
                let normal = hit.normal;
                self.slide_along_surface(world, adjusted, 1.0 - hit.time, normal, &mut hit, true);
            }
        }

        if !self.just_teleported && !self.root_motion_overrides_velocity() {
            self.velocity = (self.location - old_location) / delta_time;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MovementConfig;
    use crate::mode::MovementMode;
    use strider_physics::PhysicsWorld;

    const DT: f32 = 1.0 / 60.0;

    fn flyer(world: &PhysicsWorld, location: Vec3) -> CharacterMovement {
        let mut character = CharacterMovement::new(MovementConfig::default());
        character.set_location(location);
        character.set_movement_mode(world, MovementMode::Flying);
        character
    }

    #[test]
    fn test_hovers_without_input() {
        let world = PhysicsWorld::new();
        let mut character = flyer(&world, Vec3::new(0.0, 0.0, 500.0));
        for _ in 0..30 {
            character.tick(&world, DT);
        }
        assert!(character.is_flying());
        assert_eq!(character.location(), Vec3::new(0.0, 0.0, 500.0));
    }

    #[test]
    fn test_flies_up_with_input() {
        let world = PhysicsWorld::new();
        let mut character = flyer(&world, Vec3::new(0.0, 0.0, 500.0));
        for _ in 0..60 {
            character.add_input_vector(Vec3::Z);
            character.tick(&world, DT);
        }
        assert!(character.location().z > 600.0);
        assert!(character.velocity().length() <= 600.0 + 1.0e-2);
    }

    #[test]
    fn test_drag_slows_without_input() {
        let world = PhysicsWorld::new();
        let mut character = flyer(&world, Vec3::new(0.0, 0.0, 500.0));
        character.set_velocity(Vec3::new(500.0, 0.0, 0.0));
        character.tick(&world, DT);
        let speed = character.velocity().x;
        assert!(speed < 500.0 && speed > 490.0, "speed {speed}");
    }

    #[test]
    fn test_steps_over_low_obstacle() {
        let mut world = PhysicsWorld::new();
        world.create_ground(0.0);
        world.create_static_box(Vec3::new(100.0, 200.0, 15.0), Vec3::new(150.0, 0.0, 15.0));
        world.refresh_queries();
        let mut character = flyer(&world, Vec3::new(0.0, 0.0, 90.15));

        for _ in 0..60 {
            character.add_input_vector(Vec3::X);
            character.tick(&world, DT);
        }
        assert!(character.is_flying());
        assert!(character.location().x > 100.0);
        assert!(character.location().z > 30.0 + 88.0);
    }

    #[test]
    fn test_slides_along_wall() {
        let mut world = PhysicsWorld::new();
        world.create_static_box(Vec3::new(50.0, 500.0, 500.0), Vec3::new(150.0, 0.0, 500.0));
        world.refresh_queries();
        let mut character = flyer(&world, Vec3::new(0.0, 0.0, 500.0));

        for _ in 0..30 {
            character.add_input_vector(Vec3::new(1.0, 1.0, 0.0));
            character.tick(&world, DT);
        }
        assert!(character.location().x <= 100.0 - 34.0 + 0.01);
        assert!(character.location().y > 20.0);
    }
}
