//! Crouching: resizing the capsule without getting stuck in geometry

use strider_core::math::KINDA_SMALL;
use strider_core::{CollisionShape, CollisionWorld, QueryFilter};
use tracing::debug;

use crate::character::{CharacterMovement, MIN_FLOOR_DIST};
use crate::error::MovementError;
use crate::events::MovementEvent;

/// Extra height given to the standing capsule when testing whether it fits.
const UNCROUCH_SWEEP_INFLATION: f32 = KINDA_SMALL * 10.0;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrouchState {
    /// Crouch input is held
    pub wants_to_crouch: bool,
    /// The capsule is at the crouched size
    pub is_crouched: bool,
    /// Resizing keeps the capsule bottom in place (set while grounded)
    pub maintains_base_location: bool,
}

impl CharacterMovement {
    pub fn is_crouching(&self) -> bool {
        self.crouch.is_crouched
    }

    pub fn wants_to_crouch(&self) -> bool {
        self.crouch.wants_to_crouch
    }

    pub fn can_crouch_in_current_state(&self) -> bool {
        self.config.can_crouch && (self.is_falling() || self.is_moving_on_ground())
    }

    /// Request crouching and shrink the capsule right away.
    ///
    /// The request stays held, so a crouch that fails now is retried at the
    /// next tick until [`uncrouch`](Self::uncrouch) is called.
    pub fn crouch(&mut self, world: &dyn CollisionWorld) -> Result<(), MovementError> {
        self.crouch.wants_to_crouch = true;
        self.do_crouch(world)
    }

    /// Release crouching and grow back to the standing size if there is room.
    pub fn uncrouch(&mut self, world: &dyn CollisionWorld) -> Result<(), MovementError> {
        self.crouch.wants_to_crouch = false;
        self.do_uncrouch(world)
    }

    fn do_crouch(&mut self, world: &dyn CollisionWorld) -> Result<(), MovementError> {
        if !self.has_valid_data() {
            return Ok(());
        }
        if !self.can_crouch_in_current_state() {
            return Err(MovementError::CannotCrouch);
        }

        let old_radius = self.radius;
        let old_half_height = self.half_height;
        let crouched_half_height = self.config.crouched_half_height.max(old_radius).max(0.0);
        if old_half_height == crouched_half_height {
            self.crouch.is_crouched = true;
            self.push_event(MovementEvent::Crouched {
                half_height_adjust: 0.0,
            });
            return Ok(());
        }

        self.set_capsule_size(old_radius, crouched_half_height);
        let half_height_adjust = old_half_height - crouched_half_height;
        let capsule_down = -self.component_axis_z();

        if crouched_half_height > old_half_height {
            let test_location = self.location + capsule_down * half_height_adjust;
            let encroached = world.overlap_test(
                test_location,
                self.rotation,
                &self.capsule_shape(),
                &QueryFilter::default(),
            );
            if encroached {
                debug!(half_height = crouched_half_height, "crouched capsule encroached");
                self.set_capsule_size(old_radius, old_half_height);
                return Err(MovementError::Encroached);
            }
        }

        if self.crouch.maintains_base_location {
            let rotation = self.rotation;
            self.move_updated_component(world, capsule_down * half_height_adjust, rotation);
        }

        self.crouch.is_crouched = true;
        self.force_next_floor_check = true;
        self.push_event(MovementEvent::Crouched {
            half_height_adjust: self.config.capsule_half_height - crouched_half_height,
        });
        Ok(())
    }

    fn do_uncrouch(&mut self, world: &dyn CollisionWorld) -> Result<(), MovementError> {
        if !self.has_valid_data() {
            return Ok(());
        }

        let standing_radius = self.config.capsule_radius;
        let standing_half_height = self.config.capsule_half_height.max(standing_radius);
        if self.half_height == standing_half_height {
            self.crouch.is_crouched = false;
            self.push_event(MovementEvent::UnCrouched {
                half_height_adjust: 0.0,
            });
            return Ok(());
        }

        let crouched_half_height = self.half_height;
        let half_height_adjust = standing_half_height - crouched_half_height;
        let location = self.location;
        let rotation = self.rotation;
        let capsule_down = -self.component_axis_z();
        let filter = QueryFilter::default();

        self.set_capsule_size(standing_radius, standing_half_height);
        let standing_shape =
            CollisionShape::capsule(self.radius, self.half_height + UNCROUCH_SWEEP_INFLATION);
        let standing_shape_half_height = self.half_height + UNCROUCH_SWEEP_INFLATION;

        let encroached = if !self.crouch.maintains_base_location {
            // Grow in place
            let mut encroached = world.overlap_test(location, rotation, &standing_shape, &filter);
            if encroached && half_height_adjust > 0.0 {
                // Find the floor with a sphere, then stand up from there
                let radius = self.radius;
                let trace_dist = self.half_height - radius;
                let short_shape = CollisionShape::capsule(radius, radius);
                let hit = world.sweep(location, location + capsule_down * trace_dist, rotation, &short_shape, &filter);
                if !hit.start_penetrating {
                    let distance_to_base = hit.time * trace_dist + radius;
                    let new_location = location
                        - capsule_down
                            * (-distance_to_base
                                + self.half_height
                                + UNCROUCH_SWEEP_INFLATION
                                + MIN_FLOOR_DIST / 2.0);
                    encroached = world.overlap_test(new_location, rotation, &standing_shape, &filter);
                    if !encroached {
                        self.location = new_location;
                    }
                }
            }
            encroached
        } else {
            // Grow while keeping the capsule bottom in place
            let mut standing_location =
                location - capsule_down * (standing_shape_half_height - crouched_half_height);
            let mut encroached = world.overlap_test(standing_location, rotation, &standing_shape, &filter);

            if encroached && self.is_moving_on_ground() {
                // Something may be just overhead; try settling onto the floor
                let min_floor_dist = KINDA_SMALL * 10.0;
                if self.current_floor.blocking_hit && self.current_floor.floor_dist > min_floor_dist {
                    standing_location += capsule_down * (self.current_floor.floor_dist - min_floor_dist);
                    encroached = world.overlap_test(standing_location, rotation, &standing_shape, &filter);
                }
            }

            if !encroached {
                self.location = standing_location;
                self.force_next_floor_check = true;
            }
            encroached
        };

        if encroached {
            debug!(half_height = standing_half_height, "standing capsule encroached");
            self.set_capsule_size(self.radius, crouched_half_height);
            return Err(MovementError::Encroached);
        }

        self.crouch.is_crouched = false;
        self.push_event(MovementEvent::UnCrouched { half_height_adjust });
        Ok(())
    }

    /// Apply held crouch input before the mode runs.
    pub(crate) fn update_character_state_before_movement(&mut self, world: &dyn CollisionWorld) {
        let crouching = self.crouch.is_crouched;
        let can_crouch = self.can_crouch_in_current_state();
        let result = if crouching && (!self.crouch.wants_to_crouch || !can_crouch) {
            self.do_uncrouch(world)
        } else if !crouching && self.crouch.wants_to_crouch && can_crouch {
            self.do_crouch(world)
        } else {
            Ok(())
        };
        if let Err(err) = result {
            debug!(%err, "crouch state unchanged");
        }
    }

    /// Stand up when the new mode no longer allows crouching.
    pub(crate) fn update_character_state_after_movement(&mut self, world: &dyn CollisionWorld) {
        if self.crouch.is_crouched && !self.can_crouch_in_current_state() {
            if let Err(err) = self.do_uncrouch(world) {
                debug!(%err, "still crouched after movement");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MovementConfig;
    use crate::mode::MovementMode;
    use glam::Vec3;
    use strider_physics::PhysicsWorld;

    fn standing_under(ceiling_z: Option<f32>, config: MovementConfig) -> (PhysicsWorld, CharacterMovement) {
        let mut world = PhysicsWorld::new();
        world.create_ground(0.0);
        if let Some(z) = ceiling_z {
            world.create_static_box(Vec3::new(500.0, 500.0, 50.0), Vec3::new(0.0, 0.0, z + 50.0));
        }
        world.refresh_queries();
        let mut character = CharacterMovement::new(config);
        character.initialize(&world, Vec3::new(0.0, 0.0, 90.15));
        (world, character)
    }

    #[test]
    fn test_crouch_keeps_feet_on_floor() {
        let (world, mut character) = standing_under(None, MovementConfig::default());
        character.crouch(&world).unwrap();
        assert!(character.is_crouching());
        assert_eq!(character.half_height(), 40.0);
        // Bottom stays where it was
        assert!((character.location().z - 42.15).abs() < 0.2, "z = {}", character.location().z);
        assert!(character.drain_events().contains(&MovementEvent::Crouched {
            half_height_adjust: 48.0
        }));
    }

    #[test]
    fn test_crouch_requires_ground_or_air() {
        let (world, mut character) = standing_under(None, MovementConfig::default());
        character.set_movement_mode(&world, MovementMode::Flying);
        assert!(matches!(character.crouch(&world), Err(MovementError::CannotCrouch)));
        assert!(!character.is_crouching());
    }

    #[test]
    fn test_growing_crouch_touching_ceiling() {
        let config = MovementConfig {
            crouched_half_height: 100.0,
            ..Default::default()
        };
        // Grown capsule top would be at 90.15 + 12 + 100
        let (world, mut character) = standing_under(Some(202.15), config.clone());
        assert!(character.crouch(&world).is_ok());
        assert_eq!(character.half_height(), 100.0);

        let (world, mut character) = standing_under(Some(201.15), config);
        assert!(matches!(character.crouch(&world), Err(MovementError::Encroached)));
        assert_eq!(character.half_height(), 88.0);
        assert_eq!(character.location(), Vec3::new(0.0, 0.0, 90.15));
    }

    #[test]
    fn test_uncrouch_blocked_by_ceiling() {
        let (mut world, mut character) = standing_under(None, MovementConfig::default());
        character.crouch(&world).unwrap();
        // Low ceiling between crouched and standing height
        world.create_static_box(Vec3::new(500.0, 500.0, 50.0), Vec3::new(0.0, 0.0, 150.0));
        world.refresh_queries();
        assert!(matches!(character.uncrouch(&world), Err(MovementError::Encroached)));
        assert_eq!(character.half_height(), 40.0);
        assert!(character.is_crouching());
    }

    #[test]
    fn test_uncrouch_restores_size() {
        let (world, mut character) = standing_under(None, MovementConfig::default());
        character.crouch(&world).unwrap();
        character.uncrouch(&world).unwrap();
        assert!(!character.is_crouching());
        assert_eq!(character.half_height(), 88.0);
        assert!((character.location().z - 90.15).abs() < 0.2);
    }

    #[test]
    fn test_held_crouch_applied_by_tick() {
        let (world, mut character) = standing_under(None, MovementConfig::default());
        character.crouch.wants_to_crouch = true;
        character.tick(&world, 1.0 / 60.0);
        assert!(character.is_crouching());
        assert_eq!(character.max_speed(), 300.0);
        character.crouch.wants_to_crouch = false;
        character.tick(&world, 1.0 / 60.0);
        assert!(!character.is_crouching());
    }
}
