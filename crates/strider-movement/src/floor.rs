//! Floor detection
//!
//! Every ground routine works from a [`FloorResult`]: a downward capsule
//! sweep, backed up by a line trace along the capsule axis when the sweep
//! lands on an edge or starts inside geometry. Distances are measured from
//! the bottom of the capsule along capsule-down and may be negative when the
//! capsule is slightly embedded.

use glam::{Quat, Vec3};
use strider_core::math::{safe_normal, KINDA_SMALL, THRESH_NORMALS_ARE_PARALLEL};
use strider_core::{CollisionShape, CollisionWorld, Hit, QueryFilter};

use crate::character::{
    CharacterMovement, MAX_FLOOR_DIST, MIN_FLOOR_DIST, SWEEP_EDGE_REJECT_DISTANCE,
};

/// Result of a floor query below the capsule.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FloorResult {
    /// A blocking hit was found by the sweep or the line trace
    pub blocking_hit: bool,
    /// The hit surface can be walked on
    pub walkable_floor: bool,
    /// The result came from the line trace rather than the sweep
    pub line_trace: bool,
    /// Distance from the capsule bottom to the floor found by the sweep
    pub floor_dist: f32,
    /// Distance to the floor found by the line trace
    pub line_dist: f32,
    pub hit: Hit,
}

impl FloorResult {
    pub fn clear(&mut self) {
        *self = FloorResult::default();
    }

    pub fn is_walkable_floor(&self) -> bool {
        self.blocking_hit && self.walkable_floor
    }

    pub fn distance_to_floor(&self) -> f32 {
        if self.line_trace {
            self.line_dist
        } else {
            self.floor_dist
        }
    }

    pub fn set_from_sweep(&mut self, hit: Hit, floor_dist: f32, walkable: bool) {
        self.blocking_hit = hit.is_valid_blocking_hit();
        self.walkable_floor = walkable;
        self.line_trace = false;
        self.floor_dist = floor_dist;
        self.line_dist = 0.0;
        self.hit = hit;
    }

    /// Replace the normals and surface of the sweep hit with a line trace hit.
    ///
    /// Requires an existing blocking sweep; the sweep's time, location and
    /// trace ends are kept.
    pub fn set_from_line_trace(&mut self, hit: Hit, floor_dist: f32, line_dist: f32, walkable: bool) {
        if !(self.hit.blocking && hit.blocking) {
            return;
        }
        let old = std::mem::replace(&mut self.hit, hit);
        self.hit.time = old.time;
        self.hit.impact_point = old.impact_point;
        self.hit.location = old.location;
        self.hit.trace_start = old.trace_start;
        self.hit.trace_end = old.trace_end;

        self.line_trace = true;
        self.floor_dist = floor_dist;
        self.line_dist = line_dist;
        self.walkable_floor = walkable;
    }
}

/// True if `point` lies within the capsule's footprint, minus the edge rejection margin.
pub fn is_within_edge_tolerance(location: Vec3, capsule_down: Vec3, radius: f32, point: Vec3) -> bool {
    let on_axis = location + capsule_down * (point - location).dot(capsule_down);
    let dist_sq = (on_axis - point).length_squared();
    let reduced = KINDA_SMALL.max(radius - SWEEP_EDGE_REJECT_DISTANCE);
    dist_sq < reduced * reduced
}

impl CharacterMovement {
    /// Whether `hit` is a surface this character can stand on.
    pub fn is_walkable(&self, hit: &Hit) -> bool {
        if !hit.is_valid_blocking_hit() {
            return false;
        }
        let threshold = hit
            .props
            .walkable_override
            .modify_walkable_floor_z(self.config.walkable_floor_z);
        hit.impact_normal.dot(self.component_axis_z()) >= threshold
    }

    /// Perch threshold clamped to be non-negative.
    pub fn perch_radius_threshold(&self) -> f32 {
        self.config.perch_radius_threshold.max(0.0)
    }

    /// Radius within which the character can stand on an edge.
    pub fn valid_perch_radius(&self) -> f32 {
        (self.radius - self.perch_radius_threshold()).clamp(0.11, self.radius.max(0.11))
    }

    /// Compute the distance to the floor below `location`.
    ///
    /// The sweep distance must be at least the line distance. A valid
    /// downward sweep already performed by the caller can be passed in to
    /// skip the sweep.
    pub fn compute_floor_dist(
        &self,
        world: &dyn CollisionWorld,
        location: Vec3,
        line_distance: f32,
        sweep_distance: f32,
        sweep_radius: f32,
        downward_hit: Option<&Hit>,
    ) -> FloorResult {
        let mut result = FloorResult::default();
        let radius = self.radius;
        let half_height = self.half_height;
        let capsule_down = -self.component_axis_z();

        let mut skip_sweep = false;
        if let Some(downward) = downward_hit.filter(|hit| hit.is_valid_blocking_hit()) {
            let dot = capsule_down.dot(safe_normal(downward.trace_end - downward.trace_start));
            if dot >= THRESH_NORMALS_ARE_PARALLEL
                && is_within_edge_tolerance(
                    downward.location,
                    capsule_down,
                    radius,
                    downward.impact_point,
                )
            {
                skip_sweep = true;
                let walkable = self.is_walkable(downward);
                let floor_dist = (location - downward.location).length();
                result.set_from_sweep(downward.clone(), floor_dist, walkable);
                if walkable {
                    return result;
                }
            }
        }

        if sweep_distance < line_distance {
            debug_assert!(sweep_distance >= line_distance);
            return FloorResult::default();
        }

        let max_penetration_adjust = MAX_FLOOR_DIST.max(radius);

        if !skip_sweep && sweep_distance > 0.0 && sweep_radius > 0.0 {
            // A shorter capsule avoids odd results when starting on a surface
            let mut shrink_height = (half_height - radius) * (1.0 - 0.9);
            let mut trace_dist = sweep_distance + shrink_height;
            let mut test_radius = sweep_radius;
            let mut test_half_height = half_height - shrink_height;

            let mut hit = self.floor_sweep_test(
                world,
                location,
                location + capsule_down * trace_dist,
                test_radius,
                test_half_height,
            );

            if hit.blocking {
                if hit.start_penetrating
                    || !is_within_edge_tolerance(location, capsule_down, test_radius, hit.impact_point)
                {
                    // Retry with a thinner, shorter capsule to ignore adjacent geometry
                    shrink_height = (half_height - radius) * (1.0 - 0.1);
                    trace_dist = sweep_distance + shrink_height;
                    test_radius = (test_radius - SWEEP_EDGE_REJECT_DISTANCE - KINDA_SMALL).max(0.0);
                    test_half_height = (half_height - shrink_height).max(test_radius);
                    hit = self.floor_sweep_test(
                        world,
                        location,
                        location + capsule_down * trace_dist,
                        test_radius,
                        test_half_height,
                    );
                }

                let sweep_result = (hit.time * trace_dist - shrink_height).max(-max_penetration_adjust);
                let walkable_hit = hit.is_valid_blocking_hit() && self.is_walkable(&hit);
                result.set_from_sweep(hit, sweep_result, false);
                if walkable_hit && sweep_result <= sweep_distance {
                    result.walkable_floor = true;
                    return result;
                }
            }
        }

        // A missed sweep means the shorter line trace would miss too, unless the sweep was stuck
        if !result.blocking_hit && !result.hit.start_penetrating {
            result.floor_dist = sweep_distance;
            return result;
        }

        if line_distance > 0.0 {
            let trace_dist = line_distance + half_height;
            let hit = world.line_trace(
                location,
                location + capsule_down * trace_dist,
                &QueryFilter::default(),
            );
            if hit.blocking && hit.time > 0.0 {
                let line_result = (hit.time * trace_dist - half_height).max(-max_penetration_adjust);
                result.blocking_hit = true;
                if line_result <= line_distance && self.is_walkable(&hit) {
                    let floor_dist = result.floor_dist;
                    result.set_from_line_trace(hit, floor_dist, line_result, true);
                    return result;
                }
            }
        }

        result.walkable_floor = false;
        result.floor_dist = sweep_distance;
        result
    }

    /// Sweep used by the floor check: the capsule itself, or an enclosed box
    /// when flat-based floor checks are enabled.
    pub fn floor_sweep_test(
        &self,
        world: &dyn CollisionWorld,
        start: Vec3,
        end: Vec3,
        radius: f32,
        half_height: f32,
    ) -> Hit {
        let filter = QueryFilter::default();
        if !self.config.use_flat_base_for_floor_checks {
            return world.sweep_capsule(start, end, self.rotation, radius, half_height, &filter);
        }

        let half_extents = Vec3::new(radius * 0.707, radius * 0.707, half_height);
        let box_up = self.component_axis_z();
        let box_rotation = strider_core::math::make_from_z(box_up);

        // Corners along the major axes first, then the unrotated box
        let rotated = Quat::from_axis_angle(box_up, std::f32::consts::FRAC_PI_4) * box_rotation;
        let hit = world.sweep_box(start, end, rotated, half_extents, &filter);
        if hit.blocking {
            return hit;
        }
        world.sweep_box(start, end, box_rotation, half_extents, &filter)
    }

    /// Find the floor below `location`, reusing the cached floor when allowed.
    pub fn find_floor(
        &mut self,
        world: &dyn CollisionWorld,
        location: Vec3,
        can_use_cached: bool,
        downward_hit: Option<&Hit>,
    ) -> FloorResult {
        if !self.has_valid_data() {
            return FloorResult::default();
        }

        // Slightly longer while walking so the height adjustment cannot invalidate the result
        let height_check_adjust = if self.is_moving_on_ground() {
            MAX_FLOOR_DIST + KINDA_SMALL
        } else {
            -MAX_FLOOR_DIST
        };
        let check_dist = MAX_FLOOR_DIST.max(self.config.max_step_height + height_check_adjust);

        let mut need_to_validate = true;
        let mut result = if self.config.always_check_floor
            || !can_use_cached
            || self.force_next_floor_check
            || self.just_teleported
        {
            self.force_next_floor_check = false;
            self.compute_floor_dist(world, location, check_dist, check_dist, self.radius, downward_hit)
        } else {
            let base = self.based.base;
            if let Some(base) = base {
                self.force_next_floor_check = world.is_dynamic_base(base);
            }
            if !self.force_next_floor_check && base.is_some() {
                need_to_validate = false;
                self.current_floor.clone()
            } else {
                self.force_next_floor_check = false;
                self.compute_floor_dist(world, location, check_dist, check_dist, self.radius, downward_hit)
            }
        };

        if need_to_validate
            && result.blocking_hit
            && !result.line_trace
            && self.should_compute_perch_result(&result.hit, true)
        {
            let mut max_perch_dist = check_dist;
            if self.is_moving_on_ground() {
                max_perch_dist += self.config.perch_additional_height.max(0.0);
            }

            match self.compute_perch_result(world, self.valid_perch_radius(), &result.hit, max_perch_dist) {
                Some(perch) => {
                    // Keep the height adjustment from lifting us beyond the perch distance
                    let avg_floor_dist = (MIN_FLOOR_DIST + MAX_FLOOR_DIST) * 0.5;
                    let move_up = avg_floor_dist - result.floor_dist;
                    if move_up + perch.floor_dist >= max_perch_dist {
                        result.floor_dist = avg_floor_dist;
                    }
                    if !result.walkable_floor {
                        let floor_dist = result.floor_dist;
                        let line_dist = perch.floor_dist.min(perch.line_dist);
                        result.set_from_line_trace(perch.hit, floor_dist, line_dist, true);
                    }
                }
                None => result.walkable_floor = false,
            }
        }

        result
    }

    /// Whether a floor hit is far enough out on an edge to need a perch check.
    pub fn should_compute_perch_result(&self, hit: &Hit, check_radius: bool) -> bool {
        if !hit.is_valid_blocking_hit() {
            return false;
        }
        if self.perch_radius_threshold() <= SWEEP_EDGE_REJECT_DISTANCE {
            return false;
        }
        if check_radius {
            let capsule_down = -self.component_axis_z();
            let on_axis = hit.location + capsule_down * (hit.impact_point - hit.location).dot(capsule_down);
            let dist_sq = (on_axis - hit.impact_point).length_squared();
            let perch_radius = self.valid_perch_radius();
            if dist_sq <= perch_radius * perch_radius {
                return false;
            }
        }
        true
    }

    /// Check for a walkable floor below `hit` using a reduced radius.
    ///
    /// Returns the floor found, or `None` if there is nothing walkable within
    /// `max_floor_dist` of the capsule base.
    pub fn compute_perch_result(
        &self,
        world: &dyn CollisionWorld,
        test_radius: f32,
        hit: &Hit,
        max_floor_dist: f32,
    ) -> Option<FloorResult> {
        if max_floor_dist <= 0.0 {
            return None;
        }

        let capsule_down = -self.component_axis_z();
        let on_axis = hit.location + capsule_down * (hit.impact_point - hit.location).dot(capsule_down);
        let hit_above_base = (on_axis - (hit.location + capsule_down * self.half_height)).length();
        let line_dist = (max_floor_dist - hit_above_base).max(0.0);
        let sweep_dist = max_floor_dist.max(0.0) + self.radius;

        let perch = self.compute_floor_dist(world, hit.location, line_dist, sweep_dist, test_radius, None);
        if !perch.is_walkable_floor() || hit_above_base + perch.floor_dist > max_floor_dist {
            return None;
        }
        Some(perch)
    }

    /// Build a capsule shape of the current size.
    pub fn capsule_shape(&self) -> CollisionShape {
        CollisionShape::capsule(self.radius, self.half_height)
    }
}
