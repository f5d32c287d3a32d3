//! Swept moves, penetration recovery and sliding along surfaces

use glam::{Quat, Vec3};
use strider_core::math::{clamp_length_max, is_nearly_zero, project_on_plane, safe_normal, DELTA, KINDA_SMALL};
use strider_core::{CollisionWorld, Hit, QueryFilter};
use tracing::trace;

use crate::character::{CharacterMovement, MIN_FLOOR_DIST};
use crate::events::MovementEvent;

/// Distance kept from a surface after a blocked sweep, and added to depenetration.
const PULLBACK_DISTANCE: f32 = 0.125;
/// Inflation of the overlap test used before teleporting out of penetration.
const PENETRATION_OVERLAP_INFLATION: f32 = 0.1;
/// Surfaces the capsule starts inside of but moves away from are skipped this many times.
const MAX_IGNORED_START_OVERLAPS: usize = 4;

/// Hit fraction reduced so the shape stops just short of the surface.
fn pull_back_time(time: f32, distance: f32) -> f32 {
    if distance <= 0.0 {
        return 0.0;
    }
    let time_back = 0.1_f32.clamp(0.1 / distance, 1.0 / distance) + 0.001;
    (time - time_back).clamp(0.0, 1.0)
}

impl CharacterMovement {
    /// Move by `delta` with a swept capsule, stopping at the first blocking hit.
    ///
    /// Returns the blocking hit, or a miss ending at the target. Surfaces the
    /// capsule starts inside of are skipped when moving out of them; other
    /// initial overlaps are reported with `start_penetrating` and do not move
    /// the character.
    pub fn move_updated_component(&mut self, world: &dyn CollisionWorld, delta: Vec3, rotation: Quat) -> Hit {
        self.move_with_filter(world, delta, rotation, QueryFilter::default(), true)
    }

    /// Swept move that ignores hits against `filter`, and optionally skips
    /// surfaces the capsule is already inside of when moving out of them.
    pub(crate) fn move_with_filter(
        &mut self,
        world: &dyn CollisionWorld,
        delta: Vec3,
        rotation: Quat,
        mut filter: QueryFilter,
        ignore_moving_out: bool,
    ) -> Hit {
        let start = self.location;
        let end = start + delta;
        let rotation = rotation.normalize();

        if is_nearly_zero(delta, 0.0) {
            self.rotation = rotation;
            return Hit::miss(start, end);
        }

        let shape = self.capsule_shape();
        let mut hit = world.sweep(start, end, rotation, &shape, &filter);
        if ignore_moving_out {
            let direction = safe_normal(delta);
            for _ in 0..MAX_IGNORED_START_OVERLAPS {
                let moving_out = hit.start_penetrating && hit.impact_normal.dot(direction) > 0.0;
                match hit.surface {
                    Some(surface) if moving_out => {
                        filter.ignore.push(surface);
                        hit = world.sweep(start, end, rotation, &shape, &filter);
                    }
                    _ => break,
                }
            }
        }

        if hit.start_penetrating {
            hit.time = 0.0;
            hit.location = start;
            self.rotation = rotation;
            return hit;
        }

        if hit.blocking {
            let distance = delta.length();
            hit.time = pull_back_time(hit.time, distance);
            hit.distance = distance * hit.time;
            hit.location = start + delta * hit.time;
        }

        self.location = hit.location;
        self.rotation = rotation;
        hit
    }

    /// Swept move that first resolves any initial penetration, then retries.
    pub fn safe_move_updated_component(&mut self, world: &dyn CollisionWorld, delta: Vec3, rotation: Quat) -> Hit {
        let mut hit = self.move_with_filter(world, delta, rotation, QueryFilter::default(), false);
        if hit.start_penetrating {
            let adjustment = self.penetration_adjustment(&hit);
            if self.resolve_penetration(world, adjustment, &hit, rotation) {
                hit = self.move_with_filter(world, delta, rotation, QueryFilter::default(), false);
            }
        }
        hit
    }

    /// Direction and distance that would take the capsule out of a penetration.
    pub fn penetration_adjustment(&self, hit: &Hit) -> Vec3 {
        if !hit.start_penetrating {
            return Vec3::ZERO;
        }
        let depth = if hit.penetration_depth > 0.0 {
            hit.penetration_depth
        } else {
            PULLBACK_DISTANCE
        };
        let adjustment = hit.normal * (depth + PULLBACK_DISTANCE);
        clamp_length_max(adjustment, self.config.max_depenetration)
    }

    /// Try to push the capsule out of geometry it started inside of.
    ///
    /// Returns true if the character moved.
    pub fn resolve_penetration(
        &mut self,
        world: &dyn CollisionWorld,
        adjustment: Vec3,
        hit: &Hit,
        rotation: Quat,
    ) -> bool {
        if adjustment == Vec3::ZERO {
            return false;
        }

        // Slightly inflated so the teleport cannot land in a fresh overlap
        let shape = self.capsule_shape().inflated(PENETRATION_OVERLAP_INFLATION);
        let target = hit.trace_start + adjustment;
        if !world.overlap_test(target, rotation, &shape, &QueryFilter::default()) {
            self.location += adjustment;
            self.rotation = rotation;
            self.just_teleported = true;
            trace!(?adjustment, "teleported out of penetration");
            return true;
        }

        let before = self.location;
        let sweep_out = self.move_with_filter(world, adjustment, rotation, QueryFilter::default(), true);
        let mut moved = self.moved(before);

        if !moved && sweep_out.start_penetrating {
            // Combine both depenetration directions to escape two surfaces at once
            let second = self.penetration_adjustment(&sweep_out);
            let combined = adjustment + second;
            if second != adjustment && combined != Vec3::ZERO {
                self.move_with_filter(world, combined, rotation, QueryFilter::default(), true);
                moved = self.moved(before);
            }
        }

        if !moved {
            let move_delta = hit.trace_end - hit.trace_start;
            if move_delta != Vec3::ZERO {
                self.move_with_filter(world, adjustment + move_delta, rotation, QueryFilter::default(), true);
                moved = self.moved(before);
            }
        }

        self.just_teleported |= moved;
        moved
    }

    /// Slide the remainder of a blocked move along the blocking surface.
    ///
    /// Returns the fraction of `time` actually applied. `hit` is updated with
    /// the last hit of the slide.
    pub fn slide_along_surface(
        &mut self,
        world: &dyn CollisionWorld,
        delta: Vec3,
        time: f32,
        normal: Vec3,
        hit: &mut Hit,
        handle_impact: bool,
    ) -> f32 {
        if !hit.blocking {
            return 0.0;
        }

        let mut normal = normal;
        if self.is_moving_on_ground() {
            let up = self.component_axis_z();
            let dot = normal.dot(up);
            if dot > 0.0 {
                // Never get pushed up an unwalkable surface
                if !self.is_walkable(hit) {
                    normal = safe_normal(project_on_plane(normal, up));
                }
            } else if dot < -KINDA_SMALL {
                // Impacts on the upper capsule must not push down into the floor
                if self.current_floor.floor_dist < MIN_FLOOR_DIST && self.current_floor.blocking_hit {
                    let floor_normal = self.current_floor.hit.normal;
                    let floor_opposed = delta.dot(floor_normal) < 0.0 && floor_normal.dot(up) < 1.0 - DELTA;
                    if floor_opposed {
                        normal = floor_normal;
                    }
                    normal = safe_normal(project_on_plane(normal, up));
                }
            }
        }

        let old_hit_normal = normal;
        let mut slide_delta = self.compute_slide_vector(delta, time, normal, hit);
        if slide_delta.dot(delta) <= 0.0 {
            return 0.0;
        }

        let rotation = self.rotation;
        *hit = self.safe_move_updated_component(world, slide_delta, rotation);
        let first_hit_percent = hit.time;
        let mut percent_applied = first_hit_percent;

        if hit.is_valid_blocking_hit() {
            if handle_impact {
                self.handle_impact(world, hit, first_hit_percent * time, slide_delta);
            }

            slide_delta = self.two_wall_adjust(slide_delta, hit, old_hit_normal);

            // Only continue when the new direction is significant and not reversed
            if !is_nearly_zero(slide_delta, 1.0e-3) && slide_delta.dot(delta) > 0.0 {
                *hit = self.safe_move_updated_component(world, slide_delta, rotation);
                let second_hit_percent = hit.time * (1.0 - first_hit_percent);
                percent_applied += second_hit_percent;

                if handle_impact && hit.blocking {
                    self.handle_impact(world, hit, second_hit_percent * time, slide_delta);
                }
            }
        }

        percent_applied.clamp(0.0, 1.0)
    }

    /// Slide vector along `normal`, with slope-boost prevention while falling.
    pub fn compute_slide_vector(&self, delta: Vec3, time: f32, normal: Vec3, hit: &Hit) -> Vec3 {
        let result = project_on_plane(delta, normal) * time;
        if self.is_falling() {
            self.handle_slope_boosting(result, delta, time, normal, hit)
        } else {
            result
        }
    }

    /// Keep a slide from carrying the character higher than the original move.
    pub fn handle_slope_boosting(&self, slide: Vec3, delta: Vec3, time: f32, normal: Vec3, _hit: &Hit) -> Vec3 {
        let up = self.component_axis_z();
        let mut result = slide;
        let dot = result.dot(up);

        if dot > 0.0 {
            let z_limit = delta.dot(up) * time;
            if dot - z_limit > KINDA_SMALL {
                if z_limit > 0.0 {
                    // Scale the whole vector so we don't turn back into the impact
                    result *= z_limit / dot;
                } else {
                    result = Vec3::ZERO;
                }

                // The rest continues horizontally along the surface
                let remainder = project_on_plane(slide - result, up);
                let normal_2d = safe_normal(project_on_plane(normal, up));
                result += project_on_plane(remainder, normal_2d);
            }
        }

        result
    }

    /// Adjust a slide after hitting a second surface.
    pub fn two_wall_adjust(&self, delta: Vec3, hit: &Hit, old_hit_normal: Vec3) -> Vec3 {
        let in_delta = delta;
        let hit_normal = hit.normal;
        let mut delta = delta;

        if old_hit_normal.dot(hit_normal) <= 0.0 {
            // Corner of 90 degrees or less: move along the crease
            let desired = delta;
            let crease = safe_normal(hit_normal.cross(old_hit_normal));
            delta = crease * (delta.dot(crease) * (1.0 - hit.time));
            if desired.dot(delta) < 0.0 {
                delta = -delta;
            }
        } else {
            let desired = delta;
            delta = self.compute_slide_vector(delta, 1.0 - hit.time, hit_normal, hit);
            if delta.dot(desired) <= 0.0 {
                delta = Vec3::ZERO;
            } else if ((hit_normal.dot(old_hit_normal)) - 1.0).abs() < KINDA_SMALL {
                // Same wall again; nudge off it
                delta += hit_normal * 0.01;
            }
        }

        if self.is_moving_on_ground() {
            let up = self.component_axis_z();
            let dot_delta = delta.dot(up);
            if dot_delta > 0.0 {
                let dot_hit_normal = hit.normal.dot(up);
                if dot_hit_normal > KINDA_SMALL
                    && (dot_hit_normal >= self.config.walkable_floor_z || self.is_walkable(hit))
                {
                    // Slide up walkable surfaces keeping horizontal speed
                    let time = 1.0 - hit.time;
                    let scaled = safe_normal(delta) * in_delta.length();
                    delta = (project_on_plane(in_delta, up) + up * (scaled.dot(up) / dot_hit_normal)) * time;
                } else {
                    delta = project_on_plane(delta, up);
                }
            } else if dot_delta < 0.0
                && self.current_floor.floor_dist < MIN_FLOOR_DIST
                && self.current_floor.blocking_hit
            {
                delta = project_on_plane(delta, up);
            }
        }

        delta
    }

    /// React to a blocking hit: notify and push simulated bodies.
    pub fn handle_impact(&mut self, world: &dyn CollisionWorld, hit: &Hit, _time_slice: f32, _delta: Vec3) {
        self.push_event(MovementEvent::MoveBlocked { hit: hit.clone() });

        if self.config.enable_physics_interaction {
            let gravity = if self.is_falling() {
                self.gravity_vector()
            } else {
                Vec3::ZERO
            };
            let accel = self.acceleration + gravity;
            let velocity = self.velocity;
            self.apply_impact_physics_forces(world, hit, accel, velocity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MovementConfig;
    use crate::mode::MovementMode;
    use strider_physics::PhysicsWorld;

    fn wall_world() -> PhysicsWorld {
        let mut world = PhysicsWorld::new();
        // Wall face at x = 100
        world.create_static_box(Vec3::new(50.0, 500.0, 500.0), Vec3::new(150.0, 0.0, 0.0));
        world.refresh_queries();
        world
    }

    fn flying_character(world: &PhysicsWorld) -> CharacterMovement {
        let mut character = CharacterMovement::new(MovementConfig::default());
        character.set_movement_mode(world, MovementMode::Flying);
        character.drain_events();
        character
    }

    #[test]
    fn test_pull_back_time() {
        // Long moves stop about a centimetre short
        let time = pull_back_time(0.5, 100.0);
        assert!((time - 0.489).abs() < 1.0e-4);
        assert_eq!(pull_back_time(0.0, 100.0), 0.0);
        assert_eq!(pull_back_time(0.5, 0.0), 0.0);
    }

    #[test]
    fn test_move_stops_before_wall() {
        let world = wall_world();
        let mut character = flying_character(&world);
        let hit = character.move_updated_component(&world, Vec3::new(200.0, 0.0, 0.0), Quat::IDENTITY);
        assert!(hit.is_valid_blocking_hit());
        let x = character.location().x;
        assert!(x < 66.0 && x > 63.0, "stopped at {x}");
        assert!((hit.normal + Vec3::X).length() < 1.0e-3);
    }

    #[test]
    fn test_wall_slide_keeps_tangential_motion() {
        let world = wall_world();
        let mut character = flying_character(&world);
        let delta = Vec3::new(200.0, 100.0, 0.0);
        let mut hit = character.move_updated_component(&world, delta, Quat::IDENTITY);
        assert!(hit.blocking);
        let before = character.location();
        let normal = hit.normal;
        let applied = character.slide_along_surface(&world, delta, 1.0 - hit.time, normal, &mut hit, true);
        assert!(applied > 0.0);
        let after = character.location();
        assert!(after.y > before.y + 10.0);
        assert!(after.x < 66.0);
    }

    #[test]
    fn test_penetration_adjustment_clamped() {
        let mut character = CharacterMovement::new(MovementConfig::default());
        character.config_mut().max_depenetration = 5.0;
        let hit = Hit {
            blocking: true,
            start_penetrating: true,
            normal: Vec3::Z,
            penetration_depth: 20.0,
            ..Default::default()
        };
        assert!((character.penetration_adjustment(&hit) - Vec3::new(0.0, 0.0, 5.0)).length() < 1.0e-5);
        let shallow = Hit {
            penetration_depth: 0.0,
            ..hit.clone()
        };
        assert!((character.penetration_adjustment(&shallow).z - 0.25).abs() < 1.0e-5);
        assert_eq!(character.penetration_adjustment(&Hit::default()), Vec3::ZERO);
    }

    #[test]
    fn test_safe_move_resolves_penetration() {
        let mut world = PhysicsWorld::new();
        world.create_ground(0.0);
        world.refresh_queries();
        let mut character = flying_character(&world);
        // Sunk 10 units into the ground
        character.set_location(Vec3::new(0.0, 0.0, 78.0));
        let hit = character.safe_move_updated_component(&world, Vec3::new(10.0, 0.0, 0.0), Quat::IDENTITY);
        assert!(!hit.start_penetrating);
        assert!(character.location().z >= 88.0);
        assert!(character.just_teleported());
    }

    #[test]
    fn test_two_wall_corner_moves_along_crease() {
        let character = CharacterMovement::new(MovementConfig::default());
        let hit = Hit {
            blocking: true,
            normal: -Vec3::Y,
            time: 0.0,
            ..Default::default()
        };
        let adjusted = character.two_wall_adjust(Vec3::new(10.0, 10.0, 5.0), &hit, -Vec3::X);
        assert!(adjusted.x.abs() < 1.0e-4 && adjusted.y.abs() < 1.0e-4);
        assert!((adjusted.z - 5.0).abs() < 1.0e-4);
    }

    #[test]
    fn test_slope_boosting_limited_while_falling() {
        let world = PhysicsWorld::new();
        let mut character = CharacterMovement::new(MovementConfig::default());
        character.set_movement_mode(&world, MovementMode::Falling);
        let normal = safe_normal(Vec3::new(-1.0, 0.0, 1.0));
        let delta = Vec3::new(10.0, 0.0, 0.0);
        let slide = character.compute_slide_vector(delta, 1.0, normal, &Hit::default());
        // Would climb 5 units up the ramp; the climb is removed
        assert!(slide.z <= KINDA_SMALL);
    }
}
