//! Per-character movement state and the mode state machine

use std::collections::HashMap;
use std::sync::Arc;

use glam::{Quat, Vec3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use strider_core::math::{clamp_length_max, KINDA_SMALL};
use strider_core::{CharacterId, CollisionWorld, PhysicsVolume, SurfaceId, Transform};
use tracing::{debug, trace};

use crate::based::BasedMovement;
use crate::config::MovementConfig;
use crate::crouch::CrouchState;
use crate::events::MovementEvent;
use crate::falling::FallingStrategy;
use crate::floor::FloorResult;
use crate::flying::FlyingStrategy;
use crate::gravity::GravityModel;
use crate::jump::JumpState;
use crate::mode::{MovementMode, MovementStrategy};
use crate::root_motion::RootMotionState;
use crate::swimming::SwimmingStrategy;
use crate::walking::WalkingStrategy;

/// Shortest time slice worth simulating.
pub const MIN_TICK_TIME: f32 = 1.0e-6;
/// Lowest distance the capsule bottom rests above the floor while walking.
pub const MIN_FLOOR_DIST: f32 = 1.9;
/// Highest distance the capsule bottom rests above the floor while walking.
pub const MAX_FLOOR_DIST: f32 = 2.4;
/// Speed below which braking stops the character outright.
pub const BRAKE_TO_STOP_VELOCITY: f32 = 10.0;
/// Margin from the capsule edge within which floor hits are rejected.
pub const SWEEP_EDGE_REJECT_DISTANCE: f32 = 0.15;
/// Steps onto surfaces steeper than this (along up) need a floor under them.
pub const MAX_STEP_SIDE_Z: f32 = 0.08;
/// Normals within this of horizontal are treated as vertical walls.
pub const VERTICAL_SLOPE_NORMAL_Z: f32 = 0.001;
/// Upward speed given when surfacing slowly while swimming.
pub const SWIM_BOB_SPEED: f32 = -80.0;

/// Player inputs replayed with a move.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveFlags {
    pub jump: bool,
    pub crouch: bool,
}

static WALKING: WalkingStrategy = WalkingStrategy;
static FALLING: FallingStrategy = FallingStrategy;
static SWIMMING: SwimmingStrategy = SwimmingStrategy;
static FLYING: FlyingStrategy = FlyingStrategy;

/// Strategy handle for the active mode.
enum ActiveStrategy {
    Builtin(&'static dyn MovementStrategy),
    Custom(Arc<dyn MovementStrategy>),
}

impl ActiveStrategy {
    fn get(&self) -> &dyn MovementStrategy {
        match self {
            ActiveStrategy::Builtin(strategy) => *strategy,
            ActiveStrategy::Custom(strategy) => strategy.as_ref(),
        }
    }
}

/// Movement state of one character.
///
/// All simulation happens through `&mut self` against a borrowed
/// [`CollisionWorld`]; nothing here is shared between characters.
pub struct CharacterMovement {
    pub(crate) config: MovementConfig,
    id: CharacterId,

    pub(crate) mode: MovementMode,
    pub(crate) ground_mode: MovementMode,

    pub(crate) location: Vec3,
    pub(crate) rotation: Quat,
    pub(crate) velocity: Vec3,
    pub(crate) acceleration: Vec3,
    pub(crate) input_vector: Vec3,
    pub(crate) analog_input_modifier: f32,
    /// Where the owner is looking, if it differs from the capsule rotation
    pub(crate) control_rotation: Option<Quat>,

    pub(crate) radius: f32,
    pub(crate) half_height: f32,

    pub(crate) gravity: GravityModel,
    pub(crate) current_floor: FloorResult,
    pub(crate) volume: PhysicsVolume,

    pub(crate) just_teleported: bool,
    pub(crate) force_next_floor_check: bool,

    pub(crate) based: BasedMovement,

    // Path following
    pub(crate) requested_velocity: Vec3,
    pub(crate) has_requested_velocity: bool,
    pub(crate) requested_move_with_max_speed: bool,

    // Accumulated forces
    pub(crate) pending_impulse: Vec3,
    pub(crate) pending_force: Vec3,
    pub(crate) pending_launch: Option<Vec3>,

    pub(crate) jump: JumpState,
    pub(crate) crouch: CrouchState,
    pub(crate) root_motion: RootMotionState,
    pub(crate) notify_apex: bool,

    /// Mode received from the network, applied at the next proxy update
    pub(crate) pending_network_mode: Option<u8>,

    pub(crate) events: Vec<MovementEvent>,
    pub(crate) rng: StdRng,
    custom_modes: HashMap<u8, Arc<dyn MovementStrategy>>,

    pub(crate) authority: bool,
    active: bool,

    pub(crate) last_update_location: Vec3,
    pub(crate) last_update_rotation: Quat,
    pub(crate) last_update_velocity: Vec3,
    /// Length of the current tick
    pub(crate) last_delta_time: f32,
}

impl CharacterMovement {
    pub fn new(config: MovementConfig) -> Self {
        Self::with_id(CharacterId::new(), config)
    }

    pub fn with_id(id: CharacterId, config: MovementConfig) -> Self {
        let gravity = GravityModel::new(&config);
        let rng = StdRng::seed_from_u64(config.random_seed);
        let mode = config.default_land_mode;
        let ground_mode = if mode == MovementMode::NavWalking {
            MovementMode::NavWalking
        } else {
            MovementMode::Walking
        };
        let radius = config.capsule_radius;
        let half_height = config.capsule_half_height;

        Self {
            config,
            id,
            mode,
            ground_mode,
            location: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
            acceleration: Vec3::ZERO,
            input_vector: Vec3::ZERO,
            analog_input_modifier: 1.0,
            control_rotation: None,
            radius,
            half_height,
            gravity,
            current_floor: FloorResult::default(),
            volume: PhysicsVolume::default(),
            just_teleported: false,
            force_next_floor_check: true,
            based: BasedMovement::default(),
            requested_velocity: Vec3::ZERO,
            has_requested_velocity: false,
            requested_move_with_max_speed: false,
            pending_impulse: Vec3::ZERO,
            pending_force: Vec3::ZERO,
            pending_launch: None,
            jump: JumpState::default(),
            crouch: CrouchState::default(),
            root_motion: RootMotionState::default(),
            notify_apex: false,
            pending_network_mode: None,
            events: Vec::new(),
            rng,
            custom_modes: HashMap::new(),
            authority: true,
            active: true,
            last_update_location: Vec3::ZERO,
            last_update_rotation: Quat::IDENTITY,
            last_update_velocity: Vec3::ZERO,
            last_delta_time: 0.0,
        }
    }

    pub fn id(&self) -> CharacterId {
        self.id
    }

    pub fn config(&self) -> &MovementConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut MovementConfig {
        &mut self.config
    }

    pub fn mode(&self) -> MovementMode {
        self.mode
    }

    /// Ground mode remembered across non-ground modes (Walking or NavWalking).
    pub fn ground_mode(&self) -> MovementMode {
        self.ground_mode
    }

    pub fn location(&self) -> Vec3 {
        self.location
    }

    pub fn rotation(&self) -> Quat {
        self.rotation
    }

    pub fn transform(&self) -> Transform {
        Transform::from_position_rotation(self.location, self.rotation)
    }

    pub fn velocity(&self) -> Vec3 {
        self.velocity
    }

    pub fn acceleration(&self) -> Vec3 {
        self.acceleration
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn half_height(&self) -> f32 {
        self.half_height
    }

    pub fn current_floor(&self) -> &FloorResult {
        &self.current_floor
    }

    pub fn physics_volume(&self) -> &PhysicsVolume {
        &self.volume
    }

    pub fn just_teleported(&self) -> bool {
        self.just_teleported
    }

    pub fn is_authority(&self) -> bool {
        self.authority
    }

    /// Whether this copy owns the gravity state and replicates it.
    pub fn set_authority(&mut self, authority: bool) {
        self.authority = authority;
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Place the character without any checks or floor update.
    pub fn set_location(&mut self, location: Vec3) {
        self.location = location;
    }

    pub fn set_rotation(&mut self, rotation: Quat) {
        self.rotation = rotation.normalize();
    }

    pub fn set_velocity(&mut self, velocity: Vec3) {
        self.velocity = velocity;
    }

    /// Look rotation of the owner (camera or controller); `None` uses the capsule rotation.
    pub fn set_control_rotation(&mut self, rotation: Option<Quat>) {
        self.control_rotation = rotation.map(Quat::normalize);
    }

    /// Input direction for the next tick, accumulated until consumed.
    pub fn add_input_vector(&mut self, input: Vec3) {
        self.input_vector += input;
    }

    pub fn set_input_vector(&mut self, input: Vec3) {
        self.input_vector = input;
    }

    pub fn is_moving_on_ground(&self) -> bool {
        self.mode.is_grounded()
    }

    pub fn is_walking(&self) -> bool {
        self.mode == MovementMode::Walking
    }

    pub fn is_falling(&self) -> bool {
        self.mode == MovementMode::Falling
    }

    pub fn is_swimming(&self) -> bool {
        self.mode == MovementMode::Swimming
    }

    pub fn is_flying(&self) -> bool {
        self.mode == MovementMode::Flying
    }

    pub fn is_in_water(&self) -> bool {
        self.volume.water
    }

    /// Character is active with a usable capsule.
    pub fn has_valid_data(&self) -> bool {
        self.active && self.radius > 0.0 && self.half_height > 0.0 && self.location.is_finite()
    }

    /// Register the strategy simulating `MovementMode::Custom(tag)`.
    pub fn register_custom_mode(&mut self, tag: u8, strategy: Arc<dyn MovementStrategy>) {
        self.custom_modes.insert(tag, strategy);
    }

    pub(crate) fn custom_strategy(&self, tag: u8) -> Option<&Arc<dyn MovementStrategy>> {
        self.custom_modes.get(&tag)
    }

    /// Take every event queued since the last call.
    pub fn drain_events(&mut self) -> Vec<MovementEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[MovementEvent] {
        &self.events
    }

    pub(crate) fn push_event(&mut self, event: MovementEvent) {
        self.events.push(event);
    }

    /// Resize the capsule.
    pub fn set_capsule_size(&mut self, radius: f32, half_height: f32) {
        self.radius = radius.max(0.0);
        self.half_height = half_height.max(self.radius);
    }

    /// Advance the character by `delta_time` using the accumulated input vector.
    pub fn tick(&mut self, world: &dyn CollisionWorld, delta_time: f32) {
        let input = std::mem::take(&mut self.input_vector);
        if !self.has_valid_data() || delta_time < MIN_TICK_TIME {
            return;
        }

        self.check_jump_input(world, delta_time);
        let constrained = self.constrain_input_acceleration(input);
        self.acceleration = self.scale_input_acceleration(constrained);
        self.analog_input_modifier = self.compute_analog_input_modifier();
        self.perform_movement(world, delta_time);
    }

    /// Simulate one move from an explicit acceleration, as replayed by the
    /// server or by a client after a correction.
    pub fn move_autonomous(
        &mut self,
        world: &dyn CollisionWorld,
        delta_time: f32,
        acceleration: Vec3,
        flags: MoveFlags,
    ) {
        if !self.has_valid_data() {
            return;
        }
        self.update_from_move_flags(flags);
        self.check_jump_input(world, delta_time);

        let constrained = self.constrain_input_acceleration(acceleration);
        self.acceleration = clamp_length_max(constrained, self.max_acceleration());
        self.analog_input_modifier = self.compute_analog_input_modifier();
        self.perform_movement(world, delta_time);
    }

    /// Restore the jump and crouch inputs recorded with a move.
    pub fn update_from_move_flags(&mut self, flags: MoveFlags) {
        let was_pressed = self.jump.pressed;
        self.jump.pressed = flags.jump;
        if flags.jump && !was_pressed {
            self.jump.key_hold_time = 0.0;
        }
        self.crouch.wants_to_crouch = flags.crouch;
    }

    /// Inputs to record with a move.
    pub fn move_flags(&self) -> MoveFlags {
        MoveFlags {
            jump: self.jump.pressed,
            crouch: self.crouch.wants_to_crouch,
        }
    }

    /// Run one full movement update.
    pub fn perform_movement(&mut self, world: &dyn CollisionWorld, delta_time: f32) {
        if !self.has_valid_data() || delta_time < MIN_TICK_TIME {
            return;
        }

        self.last_delta_time = delta_time;
        self.update_physics_volume(world);
        self.update_gravity();

        if self.mode == MovementMode::None {
            self.clear_accumulated_forces();
            return;
        }

        // Something else moved us since the last update
        if self.is_moving_on_ground() && self.location != self.last_update_location {
            self.force_next_floor_check = true;
        }

        self.update_based_movement(world, delta_time);

        self.apply_accumulated_forces(world, delta_time);
        self.update_character_state_before_movement(world);
        if self.mode == MovementMode::NavWalking && self.crouch.wants_to_crouch {
            self.crouch.wants_to_crouch = false;
        }
        self.handle_pending_launch(world);
        self.clear_accumulated_forces();

        self.apply_root_motion_override(delta_time);

        self.clear_jump_input(delta_time);
        self.start_new_physics(world, delta_time, 0);

        if !self.has_valid_data() {
            return;
        }

        self.update_character_state_after_movement(world);
        if !self.root_motion.has_anim_root_motion() {
            self.physics_rotation(delta_time);
        }

        self.has_requested_velocity = false;
        self.save_base_location(world);

        self.last_update_location = self.location;
        self.last_update_rotation = self.rotation;
        self.last_update_velocity = self.velocity;

        self.apply_downward_force(world, delta_time);
        debug_assert!(self.velocity.is_finite(), "velocity became NaN");
    }

    fn strategy_for(&self, mode: MovementMode) -> Option<ActiveStrategy> {
        match mode {
            MovementMode::None => None,
            MovementMode::Walking | MovementMode::NavWalking => Some(ActiveStrategy::Builtin(&WALKING)),
            MovementMode::Falling => Some(ActiveStrategy::Builtin(&FALLING)),
            MovementMode::Swimming => Some(ActiveStrategy::Builtin(&SWIMMING)),
            MovementMode::Flying => Some(ActiveStrategy::Builtin(&FLYING)),
            MovementMode::Custom(tag) => self.custom_modes.get(&tag).cloned().map(ActiveStrategy::Custom),
        }
    }

    /// Hand the remaining time to the strategy of the current mode.
    pub fn start_new_physics(&mut self, world: &dyn CollisionWorld, delta_time: f32, iterations: u32) {
        if delta_time < MIN_TICK_TIME
            || iterations >= self.config.max_simulation_iterations
            || !self.has_valid_data()
        {
            return;
        }

        let Some(strategy) = self.strategy_for(self.mode) else {
            return;
        };
        trace!(mode = ?self.mode, delta_time, iterations, "simulating");
        strategy.get().simulate(self, world, delta_time, iterations);

        // Leaving ground must never keep a stale floor
        if !self.is_moving_on_ground() {
            self.current_floor.clear();
        }
    }

    /// Length of the next sub-step.
    ///
    /// Slices are at most `max_simulation_time_step` long, except on the last
    /// allowed iteration, which takes all the remaining time.
    pub fn simulation_time_step(&self, remaining: f32, iterations: u32) -> f32 {
        let max_step = self.config.max_simulation_time_step;
        let mut remaining = remaining;
        if remaining > max_step && iterations < self.config.max_simulation_iterations {
            // Split the rest evenly when it only slightly exceeds one step
            remaining = max_step.min(remaining * 0.5);
        }
        remaining.max(MIN_TICK_TIME)
    }

    /// Change mode, running the mode exit and entry logic.
    pub fn set_movement_mode(&mut self, world: &dyn CollisionWorld, mode: MovementMode) {
        if mode == self.mode {
            return;
        }
        let previous = self.mode;
        self.mode = mode;
        self.on_movement_mode_changed(world, previous);
    }

    fn on_movement_mode_changed(&mut self, world: &dyn CollisionWorld, previous: MovementMode) {
        if !self.has_valid_data() {
            return;
        }

        if self.mode == MovementMode::NavWalking {
            self.ground_mode = MovementMode::NavWalking;
            let up = self.component_axis_z();
            self.velocity = strider_core::math::project_on_plane(self.velocity, up);
        }

        if self.mode.is_grounded() {
            if self.mode == MovementMode::Walking {
                self.ground_mode = MovementMode::Walking;
            }
            self.crouch.maintains_base_location = true;
            let location = self.location;
            self.current_floor = self.find_floor(world, location, false, None);
            self.update_component_rotation();
            self.adjust_floor_height(world);
            self.set_base_from_floor(world);
            self.maintain_horizontal_ground_velocity();
        } else {
            self.current_floor.clear();
            self.crouch.maintains_base_location = false;
            self.update_component_rotation();

            if self.mode == MovementMode::Falling {
                self.velocity += self.imparted_base_velocity(world);
                self.push_event(MovementEvent::StartedFalling);
            }

            self.set_base(world, None, None);

            if self.mode == MovementMode::None {
                self.velocity = Vec3::ZERO;
                self.has_requested_velocity = false;
                self.clear_jump_input(0.0);
            }
        }

        if !self.jump.pressed || !self.is_falling() {
            self.reset_jump_state();
        }

        debug!(id = ?self.id, ?previous, current = ?self.mode, "movement mode changed");
        self.push_event(MovementEvent::ModeChanged {
            previous,
            current: self.mode,
        });
    }

    /// Pick the water mode when in water, else the default land mode.
    pub fn set_default_movement_mode(&mut self, world: &dyn CollisionWorld) {
        let location = self.location;
        self.volume = world.physics_volume(location);
        if self.config.can_swim && self.is_in_water() {
            self.set_movement_mode(world, self.config.default_water_mode);
        } else if self.mode != self.config.default_land_mode {
            let saved_velocity = self.velocity;
            self.set_movement_mode(world, self.config.default_land_mode);

            // Walking failed here; fall right away instead of a frame later
            if self.mode == MovementMode::Walking && self.based.base.is_none() {
                self.velocity = saved_velocity;
                self.set_movement_mode(world, MovementMode::Falling);
            }
        }
    }

    /// Place a newly spawned character and pick its starting mode.
    pub fn initialize(&mut self, world: &dyn CollisionWorld, location: Vec3) {
        self.location = location;
        self.velocity = Vec3::ZERO;
        self.current_floor.clear();
        self.based = BasedMovement::default();
        self.mode = MovementMode::None;
        self.set_default_movement_mode(world);
        self.save_base_location(world);
        self.last_update_location = self.location;
        self.last_update_rotation = self.rotation;
    }

    /// Move the character to `location` discontinuously and re-evaluate its mode.
    pub fn teleport(&mut self, world: &dyn CollisionWorld, location: Vec3) {
        self.location = location;
        self.on_teleported(world);
    }

    pub(crate) fn on_teleported(&mut self, world: &dyn CollisionWorld) {
        if !self.has_valid_data() {
            return;
        }

        let was_falling = self.is_falling();
        self.just_teleported = true;
        self.update_floor_from_adjustment(world);

        // Keep walking only when the floor is close enough to stay on
        let old_base = self.based.base;
        let up = self.component_axis_z();
        let mut new_base = None;
        if old_base.is_some()
            && self.current_floor.is_walkable_floor()
            && self.current_floor.floor_dist <= MAX_FLOOR_DIST
            && self.velocity.dot(up) <= 0.0
        {
            new_base = self.current_floor.hit.surface;
        } else {
            self.current_floor.clear();
        }

        let saved_velocity = self.velocity;
        self.set_default_movement_mode(world);
        if self.mode == MovementMode::Walking
            && (!self.current_floor.is_walkable_floor() || (old_base.is_some() && new_base.is_none()))
        {
            self.velocity = saved_velocity;
            self.set_movement_mode(world, MovementMode::Falling);
        }

        if was_falling && self.is_moving_on_ground() {
            let hit = self.current_floor.hit.clone();
            self.process_landed(world, &hit, 0.0, 0);
        }

        self.save_base_location(world);
    }

    /// Treat the next update as following a discontinuous position change.
    pub fn mark_teleported(&mut self) {
        self.just_teleported = true;
    }

    /// Re-find the floor after an external position change while based.
    pub fn update_floor_from_adjustment(&mut self, world: &dyn CollisionWorld) {
        if self.based.base.is_some() {
            let location = self.location;
            self.current_floor = self.find_floor(world, location, false, None);
        } else {
            self.current_floor.clear();
        }
    }

    /// Refresh the physics volume and react to entering or leaving water.
    pub fn update_physics_volume(&mut self, world: &dyn CollisionWorld) {
        let volume = world.physics_volume(self.location);
        if volume != self.volume {
            self.volume = volume;
            self.physics_volume_changed(world);
        }
    }

    /// Maximum acceleration, in cm/s².
    pub fn max_acceleration(&self) -> f32 {
        self.config.max_acceleration
    }

    /// Whether the character moved measurably since `old_location`.
    pub(crate) fn moved(&self, old_location: Vec3) -> bool {
        (self.location - old_location).length_squared() > KINDA_SMALL * KINDA_SMALL
    }

    /// Id of the current base.
    pub fn base(&self) -> Option<SurfaceId> {
        self.based.base
    }
}
