//! Movement of simulated proxies driven by replicated snapshots

use glam::{Quat, Vec3};
use strider_core::math::safe_normal;
use strider_core::{CollisionWorld, SurfaceId};
use tracing::{trace, warn};

use crate::character::{CharacterMovement, MIN_FLOOR_DIST, MIN_TICK_TIME};
use crate::mode::MovementMode;
use crate::step::StepDownResult;

/// Replicated state for a character this process does not control.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyState {
    pub location: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
    pub base: Option<SurfaceId>,
    pub bone: Option<String>,
    pub packed_mode: u8,
}

impl CharacterMovement {
    /// Take over a replicated snapshot. The mode change is applied on the next
    /// [`simulate_movement`](Self::simulate_movement).
    pub fn apply_proxy_state(&mut self, world: &dyn CollisionWorld, state: ProxyState) {
        if state.packed_mode != self.mode.pack(self.ground_mode) {
            self.pending_network_mode = Some(state.packed_mode);
        } else if state.location != self.location {
            self.just_teleported = true;
        }

        self.location = state.location;
        self.rotation = state.rotation;
        self.velocity = state.velocity;
        if state.base != self.based.base || state.bone != self.based.bone {
            self.set_base(world, state.base, state.bone);
        }
    }

    /// Switch to a mode received over the network.
    ///
    /// Returns false, leaving the mode alone, when `packed` is not a valid mode.
    pub fn apply_network_movement_mode(&mut self, world: &dyn CollisionWorld, packed: u8) -> bool {
        let Some((mode, ground_mode)) = MovementMode::unpack(packed) else {
            warn!(packed, "ignoring invalid replicated movement mode");
            return false;
        };
        self.ground_mode = ground_mode;
        self.set_movement_mode(world, mode);
        true
    }

    /// Extrapolate a simulated proxy along its replicated velocity.
    pub fn simulate_movement(&mut self, world: &dyn CollisionWorld, delta_time: f32) {
        if !self.has_valid_data() || delta_time < MIN_TICK_TIME {
            return;
        }

        if let Some(packed) = self.pending_network_mode.take() {
            self.apply_network_movement_mode(world, packed);
        } else if self.just_teleported {
            // Keep the replicated base, but the floor under it is stale
            self.just_teleported = false;
            self.update_floor_from_adjustment(world);
        }
        self.handle_pending_launch(world);

        if self.mode == MovementMode::None {
            return;
        }

        self.acceleration = safe_normal(self.velocity);
        self.analog_input_modifier = 1.0;
        self.update_gravity();
        self.update_based_movement(world, delta_time);

        let mut step_down = StepDownResult::default();
        let velocity = self.velocity;
        self.move_smooth(world, velocity, delta_time, &mut step_down);
        self.has_requested_velocity = false;

        if self.is_moving_on_ground() || self.is_falling() {
            self.settle_proxy_on_floor(world, delta_time, step_down);
        }

        self.save_base_location(world);
        self.just_teleported = false;
        self.last_update_location = self.location;
        self.last_update_rotation = self.rotation;
        self.last_update_velocity = self.velocity;
    }

    fn settle_proxy_on_floor(&mut self, world: &dyn CollisionWorld, delta_time: f32, step_down: StepDownResult) {
        let gravity = self.gravity_vector();
        if step_down.computed_floor {
            self.current_floor = step_down.floor;
        } else if self.is_moving_on_ground() || (gravity != Vec3::ZERO && self.velocity.dot(gravity) >= 0.0) {
            let location = self.location;
            let zero_velocity = self.velocity == Vec3::ZERO;
            self.current_floor = self.find_floor(world, location, zero_velocity, None);
        } else {
            self.current_floor.clear();
        }

        if !self.current_floor.is_walkable_floor() {
            self.velocity = self.new_fall_velocity(self.velocity, gravity, delta_time);
            self.set_movement_mode(world, MovementMode::Falling);
        } else if self.is_moving_on_ground() {
            self.adjust_floor_height(world);
            self.set_base_from_floor(world);
        } else if self.current_floor.floor_dist <= MIN_FLOOR_DIST {
            trace!(floor_dist = self.current_floor.floor_dist, "proxy landed");
            let hit = self.current_floor.hit.clone();
            self.set_post_landed_physics(world, &hit);
        } else {
            self.velocity = self.new_fall_velocity(self.velocity, gravity, delta_time);
            self.current_floor.clear();
        }
    }

    /// Move by `velocity` without simulating forces.
    ///
    /// Grounded characters follow the floor. Everything else sweeps, stepping
    /// up when flying and sliding otherwise.
    pub fn move_smooth(
        &mut self,
        world: &dyn CollisionWorld,
        velocity: Vec3,
        delta_time: f32,
        step_down: &mut StepDownResult,
    ) {
        if !self.has_valid_data() {
            return;
        }

        // Custom strategies may need to run even at rest
        if let MovementMode::Custom(_) = self.mode {
            self.start_new_physics(world, delta_time, 0);
            return;
        }

        let delta = velocity * delta_time;
        if delta == Vec3::ZERO {
            return;
        }

        if self.is_moving_on_ground() {
            self.move_along_floor(world, velocity, delta_time, step_down);
            return;
        }

        let rotation = self.rotation;
        let mut hit = self.safe_move_updated_component(world, delta, rotation);
        if !hit.is_valid_blocking_hit() {
            return;
        }

        let mut stepped_up = false;
        if self.is_flying() && self.can_step_up(&hit) {
            let capsule_down = -self.component_axis_z();
            if hit.impact_normal.dot(capsule_down).abs() < 0.2 {
                let up_down = capsule_down.dot(safe_normal(delta));
                if up_down < 0.5 && up_down > -0.2 {
                    stepped_up = self.step_up(world, capsule_down, delta * (1.0 - hit.time), &hit).is_some();
                }
            }
        }

        if !stepped_up {
            let normal = hit.normal;
            self.slide_along_surface(world, delta, 1.0 - hit.time, normal, &mut hit, false);
        }
    }
}
