//! Stepping up onto ledges no higher than the max step height

use glam::{Quat, Vec3};
use strider_core::math::segment_alpha;
use strider_core::{CollisionWorld, Hit};
use tracing::trace;

use crate::character::{CharacterMovement, MAX_FLOOR_DIST, MAX_STEP_SIDE_Z};
use crate::floor::{is_within_edge_tolerance, FloorResult};

/// Floor found at the end of a successful step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepDownResult {
    /// `floor` was computed by the step and can be used instead of a new floor check
    pub computed_floor: bool,
    pub floor: FloorResult,
}

/// Location and rotation restored when a step is abandoned.
#[derive(Clone, Copy)]
struct StepSnapshot {
    location: Vec3,
    rotation: Quat,
}

impl CharacterMovement {
    /// Whether the character may step up onto the surface in `hit`.
    pub fn can_step_up(&self, hit: &Hit) -> bool {
        if !hit.is_valid_blocking_hit() || self.is_falling() {
            return false;
        }
        hit.props.can_step_up
    }

    /// Try to climb over the obstacle in `hit` while moving by `delta`.
    ///
    /// The character moves up against gravity, forward, then back down. On
    /// success the step-down floor is returned (computed when walking). On
    /// failure location and rotation are exactly as before the call.
    pub fn step_up(
        &mut self,
        world: &dyn CollisionWorld,
        gravity_dir: Vec3,
        delta: Vec3,
        hit: &Hit,
    ) -> Option<StepDownResult> {
        if !self.can_step_up(hit) || self.config.max_step_height <= 0.0 {
            return None;
        }

        let old_location = self.location;
        let radius = self.radius;
        let half_height = self.half_height;
        let capsule_down = -self.component_axis_z();
        let max_step_height = self.config.max_step_height;

        // Only step when the impact lies between the capsule bottom and the top hemisphere
        let bottom = old_location + capsule_down * half_height;
        let top = old_location - capsule_down * (half_height - radius).max(0.0);
        let alpha = segment_alpha(hit.impact_point, bottom, top);
        if alpha > 1.0 || alpha <= 0.0 {
            return None;
        }

        let mut step_travel_up = max_step_height;
        let mut step_travel_down = step_travel_up;
        let step_side_z = -hit.impact_normal.dot(gravity_dir);
        let mut floor_point = old_location + capsule_down * half_height;

        if self.is_moving_on_ground() && self.current_floor.is_walkable_floor() {
            // Max step height is measured from the floor, not from where we hover
            let floor_dist = self.current_floor.floor_dist.max(0.0);
            step_travel_up = (step_travel_up - floor_dist).max(0.0);
            step_travel_down = max_step_height + MAX_FLOOR_DIST * 2.0;

            let hit_vertical_face = !is_within_edge_tolerance(hit.location, capsule_down, radius, hit.impact_point);
            if !self.current_floor.line_trace && !hit_vertical_face {
                floor_point = self.current_floor.hit.impact_point;
            } else {
                floor_point += capsule_down * self.current_floor.floor_dist;
            }
        }

        let snapshot = StepSnapshot {
            location: self.location,
            rotation: self.rotation,
        };
        let rotation = self.rotation;

        // Up
        let sweep_up = self.move_updated_component(world, -gravity_dir * step_travel_up, rotation);
        if sweep_up.start_penetrating {
            trace!("step up rejected: penetrating going up");
            self.restore_step(snapshot);
            return None;
        }

        // Forward
        let mut forward = self.move_updated_component(world, delta, rotation);
        if forward.blocking {
            if forward.start_penetrating {
                trace!("step up rejected: penetrating going forward");
                self.restore_step(snapshot);
                return None;
            }

            // Blocked above and ahead; report both
            if sweep_up.blocking {
                self.handle_impact(world, &sweep_up, 0.0, Vec3::ZERO);
            }
            self.handle_impact(world, &forward, 0.0, Vec3::ZERO);
            if self.is_falling() {
                return Some(StepDownResult::default());
            }

            let forward_time = forward.time;
            let normal = forward.normal;
            let slide_amount = self.slide_along_surface(world, delta, 1.0 - forward_time, normal, &mut forward, true);

            if self.is_falling() {
                self.restore_step(snapshot);
                return None;
            }
            if forward_time == 0.0 && slide_amount == 0.0 {
                trace!("step up rejected: no forward progress");
                self.restore_step(snapshot);
                return None;
            }
        }

        // Down
        let rotation = self.rotation;
        let down = self.move_updated_component(world, gravity_dir * step_travel_down, rotation);
        if down.start_penetrating {
            trace!("step up rejected: penetrating going down");
            self.restore_step(snapshot);
            return None;
        }

        let mut result = StepDownResult::default();
        if down.is_valid_blocking_hit() {
            let delta_z = (floor_point - down.impact_point).dot(capsule_down);
            if delta_z > max_step_height {
                trace!(height = delta_z, "step up rejected: too high");
                self.restore_step(snapshot);
                return None;
            }

            if !self.is_walkable(&down) {
                if delta.dot(down.impact_normal) < 0.0 {
                    trace!(normal = ?down.impact_normal, "step up rejected: unwalkable normal opposed to movement");
                    self.restore_step(snapshot);
                    return None;
                }
                // Stepping down onto an unwalkable surface is fine, stepping up onto one is not
                if (old_location - down.location).dot(capsule_down) > 0.0 {
                    trace!(normal = ?down.impact_normal, "step up rejected: unwalkable normal above old position");
                    self.restore_step(snapshot);
                    return None;
                }
            }

            if !is_within_edge_tolerance(down.location, capsule_down, radius, down.impact_point) {
                trace!("step up rejected: outside edge tolerance");
                self.restore_step(snapshot);
                return None;
            }

            if delta_z > 0.0 && !self.can_step_up(&down) {
                trace!("step up rejected: surface cannot be stepped on");
                self.restore_step(snapshot);
                return None;
            }

            if self.is_moving_on_ground() {
                let location = self.location;
                result.floor = self.find_floor(world, location, false, Some(&down));

                // A real step we cannot perch on; better to slide along it
                if (old_location - down.location).dot(capsule_down) > 0.0
                    && !result.floor.blocking_hit
                    && step_side_z < MAX_STEP_SIDE_Z
                {
                    trace!("step up rejected: no floor on top of the step");
                    self.restore_step(snapshot);
                    return None;
                }
                result.computed_floor = true;
            }
        }

        trace!(height = (old_location - self.location).dot(capsule_down), "stepped up");
        self.just_teleported |= !self.config.maintain_horizontal_ground_velocity;
        Some(result)
    }

    fn restore_step(&mut self, snapshot: StepSnapshot) {
        self.location = snapshot.location;
        self.rotation = snapshot.rotation;
    }
}
