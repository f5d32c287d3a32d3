//! Movement tuning

use std::path::Path;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::MovementError;
use crate::mode::MovementMode;

/// Every tunable of a character's movement.
///
/// Distances are in centimetres, speeds in cm/s and accelerations in cm/s².
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementConfig {
    // Capsule
    pub capsule_radius: f32,
    pub capsule_half_height: f32,
    /// Half height while crouched (clamped to at least the radius)
    pub crouched_half_height: f32,

    // Speeds
    pub max_walk_speed: f32,
    pub max_walk_speed_crouched: f32,
    pub max_swim_speed: f32,
    pub max_fly_speed: f32,
    pub max_custom_movement_speed: f32,
    /// Lowest speed analog input can request while walking
    pub min_analog_walk_speed: f32,
    pub max_acceleration: f32,

    // Braking and friction
    pub braking_deceleration_walking: f32,
    pub braking_deceleration_falling: f32,
    pub braking_deceleration_swimming: f32,
    pub braking_deceleration_flying: f32,
    pub ground_friction: f32,
    /// Friction used while braking when `use_separate_braking_friction` is set
    pub braking_friction: f32,
    pub braking_friction_factor: f32,
    pub use_separate_braking_friction: bool,
    pub braking_sub_step_time: f32,
    pub falling_lateral_friction: f32,

    // Air control
    pub air_control: f32,
    pub air_control_boost_multiplier: f32,
    pub air_control_boost_velocity_threshold: f32,

    // Jumping
    pub jump_z_velocity: f32,
    pub jump_off_jump_z_factor: f32,
    pub jump_max_count: u32,
    /// How long holding jump keeps applying jump force
    pub jump_max_hold_time: f32,
    pub apply_gravity_while_jumping: bool,
    pub notify_jump_apex: bool,

    // Floors, steps and ledges
    pub max_step_height: f32,
    /// Minimum dot of a floor normal with the capsule up for it to be walkable
    pub walkable_floor_z: f32,
    pub perch_radius_threshold: f32,
    pub perch_additional_height: f32,
    pub ledge_check_threshold: f32,
    pub can_walk_off_ledges: bool,
    pub can_walk_off_ledges_when_crouching: bool,
    pub maintain_horizontal_ground_velocity: bool,
    pub always_check_floor: bool,
    pub use_flat_base_for_floor_checks: bool,

    // Sub-stepping
    pub max_simulation_time_step: f32,
    pub max_simulation_iterations: u32,
    pub max_depenetration: f32,

    // Fluids
    pub buoyancy: f32,
    pub out_of_water_z: f32,
    pub jump_out_of_water_pitch: f32,
    pub can_swim: bool,
    pub can_fly: bool,
    pub can_crouch: bool,

    // Modes
    pub default_land_mode: MovementMode,
    pub default_water_mode: MovementMode,

    // Gravity and orientation
    pub world_gravity_z: f32,
    pub gravity_scale: f32,
    /// Initial custom gravity direction; zero uses world gravity
    pub custom_gravity_direction: Vec3,
    /// Initial gravity attractor point
    pub gravity_point: Option<Vec3>,
    pub align_component_to_floor: bool,
    pub align_component_to_gravity: bool,
    pub align_custom_gravity_to_floor: bool,
    pub disable_gravity_replication: bool,
    pub orient_rotation_to_movement: bool,
    /// Turn rate in degrees per second used by `orient_rotation_to_movement`
    pub rotation_rate: f32,

    // Bases
    pub impart_base_velocity_x: bool,
    pub impart_base_velocity_y: bool,
    pub impart_base_velocity_z: bool,
    pub impart_base_angular_velocity: bool,
    pub ignore_base_rotation: bool,

    // Physics interaction
    pub mass: f32,
    pub enable_physics_interaction: bool,
    pub push_force_factor: f32,
    pub initial_push_force_factor: f32,
    pub push_force_point_z_offset_factor: f32,
    pub push_force_using_z_offset: bool,
    pub push_force_scaled_to_mass: bool,
    pub scale_push_force_to_velocity: bool,
    pub standing_downward_force_scale: f32,

    // Path following
    pub requested_move_use_acceleration: bool,

    /// Seed for the random jitter used to escape perches and ditches
    pub random_seed: u64,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            capsule_radius: 34.0,
            capsule_half_height: 88.0,
            crouched_half_height: 40.0,

            max_walk_speed: 600.0,
            max_walk_speed_crouched: 300.0,
            max_swim_speed: 300.0,
            max_fly_speed: 600.0,
            max_custom_movement_speed: 600.0,
            min_analog_walk_speed: 0.0,
            max_acceleration: 2048.0,

            braking_deceleration_walking: 2048.0,
            braking_deceleration_falling: 0.0,
            braking_deceleration_swimming: 0.0,
            braking_deceleration_flying: 0.0,
            ground_friction: 8.0,
            braking_friction: 0.0,
            braking_friction_factor: 2.0,
            use_separate_braking_friction: false,
            braking_sub_step_time: 1.0 / 33.0,
            falling_lateral_friction: 0.0,

            air_control: 0.05,
            air_control_boost_multiplier: 2.0,
            air_control_boost_velocity_threshold: 25.0,

            jump_z_velocity: 420.0,
            jump_off_jump_z_factor: 0.5,
            jump_max_count: 1,
            jump_max_hold_time: 0.0,
            apply_gravity_while_jumping: true,
            notify_jump_apex: true,

            max_step_height: 45.0,
            walkable_floor_z: 0.71,
            perch_radius_threshold: 0.0,
            perch_additional_height: 40.0,
            ledge_check_threshold: 4.0,
            can_walk_off_ledges: true,
            can_walk_off_ledges_when_crouching: false,
            maintain_horizontal_ground_velocity: true,
            always_check_floor: true,
            use_flat_base_for_floor_checks: false,

            max_simulation_time_step: 0.05,
            max_simulation_iterations: 8,
            max_depenetration: 100.0,

            buoyancy: 1.0,
            out_of_water_z: 420.0,
            jump_out_of_water_pitch: 11.25,
            can_swim: true,
            can_fly: true,
            can_crouch: true,

            default_land_mode: MovementMode::Walking,
            default_water_mode: MovementMode::Swimming,

            world_gravity_z: -980.0,
            gravity_scale: 1.0,
            custom_gravity_direction: Vec3::ZERO,
            gravity_point: None,
            align_component_to_floor: false,
            align_component_to_gravity: false,
            align_custom_gravity_to_floor: false,
            disable_gravity_replication: false,
            orient_rotation_to_movement: false,
            rotation_rate: 360.0,

            impart_base_velocity_x: true,
            impart_base_velocity_y: true,
            impart_base_velocity_z: true,
            impart_base_angular_velocity: true,
            ignore_base_rotation: false,

            mass: 100.0,
            enable_physics_interaction: true,
            push_force_factor: 750_000.0,
            initial_push_force_factor: 500.0,
            push_force_point_z_offset_factor: -0.75,
            push_force_using_z_offset: false,
            push_force_scaled_to_mass: false,
            scale_push_force_to_velocity: true,
            standing_downward_force_scale: 1.0,

            requested_move_use_acceleration: true,

            random_seed: 0x5EED,
        }
    }
}

impl MovementConfig {
    /// Parse a config from TOML. Missing fields keep their defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, MovementError> {
        Ok(toml::from_str(contents)?)
    }

    /// Load a config from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MovementError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| MovementError::Config {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Walkable floor threshold expressed as a slope angle in degrees
    pub fn walkable_floor_angle(&self) -> f32 {
        self.walkable_floor_z.clamp(-1.0, 1.0).acos().to_degrees()
    }

    /// Set the walkable floor threshold from a slope angle in degrees
    pub fn set_walkable_floor_angle(&mut self, degrees: f32) {
        self.walkable_floor_z = degrees.clamp(0.0, 90.0).to_radians().cos();
    }

    /// Sub-step length used while braking
    pub fn braking_sub_step(&self) -> f32 {
        self.braking_sub_step_time.clamp(1.0 / 75.0, 1.0 / 20.0)
    }
}
