//! Client-side prediction with replay on correction

use std::collections::VecDeque;

use glam::Vec3;
use strider_core::math::clamp_length_max;
use strider_core::CollisionWorld;
use strider_movement::{CharacterMovement, MoveFlags, MovementMode};
use tracing::{debug, trace, warn};

use crate::base::resolve_location;
use crate::config::NetConfig;
use crate::error::NetError;
use crate::messages::{ClientMove, ServerAdjustment, ServerResponse};

/// A move simulated locally and not yet acknowledged by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedMove {
    pub timestamp: f32,
    pub delta_time: f32,
    pub acceleration: Vec3,
    pub flags: MoveFlags,
    /// Where the move ended when it was first simulated
    pub end_location: Vec3,
    pub end_velocity: Vec3,
}

/// Client side of one locally controlled character's reconciliation.
#[derive(Debug, Clone)]
pub struct ClientPrediction {
    config: NetConfig,
    current_timestamp: f32,
    saved_moves: VecDeque<SavedMove>,
    last_acked: Option<SavedMove>,
}

impl ClientPrediction {
    pub fn new(config: NetConfig) -> Self {
        Self {
            config,
            current_timestamp: 0.0,
            saved_moves: VecDeque::new(),
            last_acked: None,
        }
    }

    pub fn current_timestamp(&self) -> f32 {
        self.current_timestamp
    }

    pub fn saved_moves(&self) -> impl Iterator<Item = &SavedMove> {
        self.saved_moves.iter()
    }

    pub fn last_acked_move(&self) -> Option<&SavedMove> {
        self.last_acked.as_ref()
    }

    /// Simulate one move locally and build the message describing it.
    pub fn replicate_move(
        &mut self,
        movement: &mut CharacterMovement,
        world: &dyn CollisionWorld,
        delta_time: f32,
        acceleration: Vec3,
        flags: MoveFlags,
    ) -> ClientMove {
        let delta_time = self.update_timestamp(delta_time);
        let acceleration = clamp_length_max(acceleration, movement.max_acceleration());

        movement.move_autonomous(world, delta_time, acceleration, flags);

        if self.saved_moves.len() >= self.config.max_saved_moves {
            warn!(count = self.saved_moves.len(), "too many unacknowledged moves, flushing");
            self.saved_moves.clear();
        }
        self.saved_moves.push_back(SavedMove {
            timestamp: self.current_timestamp,
            delta_time,
            acceleration,
            flags,
            end_location: movement.location(),
            end_velocity: movement.velocity(),
        });

        let based = movement.based_movement();
        let location = if based.has_relative_location(world) {
            based.location
        } else {
            movement.location()
        };
        ClientMove {
            timestamp: self.current_timestamp,
            delta_time,
            acceleration,
            location,
            base: based.base,
            bone: based.bone.clone(),
            packed_mode: movement.mode().pack(movement.ground_mode()),
            flags,
        }
    }

    /// Advance the timestamp by `delta_time` and return the step the server will derive from it.
    ///
    /// The server only sees timestamps, so the step is recomputed from them
    /// the same way and capped by `max_move_delta_time`. Past
    /// `min_time_between_timestamp_resets` the timestamp wraps back.
    fn update_timestamp(&mut self, delta_time: f32) -> f32 {
        let reset_interval = self.config.min_time_between_timestamp_resets;
        let mut previous = self.current_timestamp;
        if reset_interval > 0.0 && previous > reset_interval {
            debug!(timestamp = previous, "resetting client timestamp");
            self.current_timestamp -= reset_interval;
            previous -= reset_interval;
        }
        self.current_timestamp += delta_time;
        (self.current_timestamp - previous).min(self.config.max_move_delta_time)
    }

    /// Acknowledge the move at `timestamp`, dropping it and every older move.
    pub fn ack_move(&mut self, timestamp: f32) -> Result<(), NetError> {
        let index = self
            .saved_moves
            .iter()
            .position(|saved| saved.timestamp == timestamp)
            .ok_or(NetError::UnknownTimestamp(timestamp))?;
        self.last_acked = self.saved_moves.drain(..=index).last();
        Ok(())
    }

    /// Apply a server verdict.
    ///
    /// Returns `Ok(false)` when it refers to a move no longer buffered.
    pub fn handle_response(
        &mut self,
        movement: &mut CharacterMovement,
        world: &dyn CollisionWorld,
        response: &ServerResponse,
    ) -> Result<bool, NetError> {
        match response {
            ServerResponse::AckGoodMove { timestamp } => Ok(self.ack_or_log(*timestamp)),
            ServerResponse::Adjust(adjustment) => self.adjust_position(movement, world, adjustment),
        }
    }

    fn ack_or_log(&mut self, timestamp: f32) -> bool {
        match self.ack_move(timestamp) {
            Ok(()) => true,
            Err(err) => {
                debug!(
                    last_acked = ?self.last_acked.as_ref().map(|saved| saved.timestamp),
                    current = self.current_timestamp,
                    "{err}"
                );
                false
            }
        }
    }

    fn adjust_position(
        &mut self,
        movement: &mut CharacterMovement,
        world: &dyn CollisionWorld,
        adjustment: &ServerAdjustment,
    ) -> Result<bool, NetError> {
        if !movement.has_valid_data() {
            return Ok(false);
        }
        if MovementMode::unpack(adjustment.server_mode).is_none() {
            return Err(NetError::InvalidMode(adjustment.server_mode));
        }

        let bone = adjustment.bone.as_deref();
        let unresolved_base = adjustment.has_base
            && adjustment
                .new_base
                .map_or(true, |base| world.base_transform(base, bone).is_none());
        if unresolved_base && adjustment.base_relative {
            return Err(NetError::UnresolvedBase);
        }

        if !self.ack_or_log(adjustment.timestamp) {
            return Ok(false);
        }

        let new_location = resolve_location(
            world,
            adjustment.new_location,
            adjustment.new_base,
            bone,
            adjustment.base_relative,
        )
        .ok_or(NetError::UnresolvedBase)?;

        debug!(
            timestamp = adjustment.timestamp,
            error = (movement.location() - new_location).length(),
            client = ?movement.location(),
            server = ?new_location,
            replay = self.saved_moves.len(),
            "applying server correction"
        );

        movement.set_location(new_location);
        movement.set_velocity(adjustment.new_velocity);
        movement.set_rotation(adjustment.new_rotation);

        let previous_base = movement.base();
        movement.apply_network_movement_mode(world, adjustment.server_mode);

        let (mut base, mut base_bone) = (adjustment.new_base, adjustment.bone.clone());
        if unresolved_base {
            // Keep walking on whatever is under us rather than falling for a frame
            base = None;
            base_bone = None;
            if previous_base.is_some() {
                let floor = movement.find_floor(world, new_location, false, None);
                if floor.is_walkable_floor() {
                    base = floor.hit.surface;
                    base_bone = floor.hit.bone;
                }
            }
        }
        movement.set_base(world, base, base_bone);
        movement.update_floor_from_adjustment(world);
        movement.mark_teleported();

        self.replay_saved_moves(movement, world);
        Ok(true)
    }

    fn replay_saved_moves(&self, movement: &mut CharacterMovement, world: &dyn CollisionWorld) {
        if self.saved_moves.is_empty() {
            return;
        }
        let current_flags = movement.move_flags();
        for saved in &self.saved_moves {
            trace!(timestamp = saved.timestamp, "replaying move");
            movement.move_autonomous(world, saved.delta_time, saved.acceleration, saved.flags);
        }
        movement.update_from_move_flags(current_flags);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;
    use strider_core::math::make_from_z;
    use strider_movement::MovementConfig;
    use strider_physics::PhysicsWorld;

    const DT: f32 = 1.0 / 60.0;

    fn standing() -> (PhysicsWorld, CharacterMovement) {
        let mut world = PhysicsWorld::new();
        world.create_ground(0.0);
        world.refresh_queries();
        let mut character = CharacterMovement::new(MovementConfig::default());
        character.initialize(&world, Vec3::new(0.0, 0.0, 90.15));
        (world, character)
    }

    fn correction(timestamp: f32, character: &CharacterMovement, location: Vec3) -> ServerResponse {
        ServerResponse::Adjust(ServerAdjustment {
            timestamp,
            ack_good_move: false,
            delta_time: DT,
            new_location: location,
            new_velocity: Vec3::ZERO,
            new_rotation: character.rotation(),
            new_base: character.base(),
            bone: None,
            has_base: character.base().is_some(),
            base_relative: false,
            server_mode: character.mode().pack(character.ground_mode()),
        })
    }

    #[test]
    fn test_replicate_move_records_saved_move() {
        let (world, mut character) = standing();
        let mut client = ClientPrediction::new(NetConfig::default());
        let sent = client.replicate_move(&mut character, &world, DT, Vec3::new(1.0e6, 0.0, 0.0), MoveFlags::default());

        assert_eq!(sent.timestamp, DT);
        assert!((sent.acceleration.length() - character.max_acceleration()).abs() < 1.0e-2);
        assert_eq!(sent.location, character.location());
        assert_eq!(sent.packed_mode, MovementMode::Walking.pack(MovementMode::Walking));
        assert_eq!(client.saved_moves().count(), 1);
    }

    #[test]
    fn test_long_frame_step_is_capped() {
        let (world, mut character) = standing();
        let mut client = ClientPrediction::new(NetConfig::default());
        client.replicate_move(&mut character, &world, DT, Vec3::ZERO, MoveFlags::default());
        let sent = client.replicate_move(&mut character, &world, 0.25, Vec3::ZERO, MoveFlags::default());

        assert_eq!(sent.delta_time, 0.125);
        assert_eq!(client.saved_moves().last().map(|saved| saved.delta_time), Some(0.125));
        // The timestamp still carries the whole frame
        assert!((sent.timestamp - (DT + 0.25)).abs() < 1.0e-6);
    }

    #[test]
    fn test_timestamp_wraps_after_reset_interval() {
        let (world, mut character) = standing();
        let config = NetConfig {
            min_time_between_timestamp_resets: 0.1,
            ..NetConfig::default()
        };
        let mut client = ClientPrediction::new(config);
        let mut timestamps = Vec::new();
        for _ in 0..8 {
            let sent = client.replicate_move(&mut character, &world, 0.02, Vec3::ZERO, MoveFlags::default());
            assert!((sent.delta_time - 0.02).abs() < 1.0e-5, "delta = {}", sent.delta_time);
            timestamps.push(sent.timestamp);
        }

        assert!(client.current_timestamp() <= 0.1 + 0.02);
        assert!(timestamps.windows(2).any(|pair| pair[1] < pair[0]));
        assert_eq!(client.saved_moves().count(), 8);
    }

    #[test]
    fn test_correction_applies_server_rotation() {
        let (world, mut character) = standing();
        let mut client = ClientPrediction::new(NetConfig::default());
        let sent = client.replicate_move(&mut character, &world, DT, Vec3::ZERO, MoveFlags::default());
        assert!((character.component_axis_x() - Vec3::X).length() < 1.0e-4);

        let turned = Quat::from_rotation_z(std::f32::consts::FRAC_PI_2);
        let mut response = correction(sent.timestamp, &character, sent.location + Vec3::X * 10.0);
        if let ServerResponse::Adjust(adjustment) = &mut response {
            adjustment.new_rotation = turned;
        }
        assert!(client.handle_response(&mut character, &world, &response).unwrap());

        assert!(character.rotation().angle_between(turned) < 1.0e-4);
        assert!((character.component_axis_x() - Vec3::Y).length() < 1.0e-4);
    }

    #[test]
    fn test_correction_applies_server_gravity_alignment() {
        let (world, mut character) = standing();
        let mut client = ClientPrediction::new(NetConfig::default());
        let sent = client.replicate_move(&mut character, &world, DT, Vec3::ZERO, MoveFlags::default());

        // Server is aligned to gravity pulling along -X and has the character airborne
        let aligned = make_from_z(Vec3::X);
        let mut response = correction(sent.timestamp, &character, Vec3::new(0.0, 0.0, 1000.0));
        if let ServerResponse::Adjust(adjustment) = &mut response {
            adjustment.new_rotation = aligned;
            adjustment.new_base = None;
            adjustment.has_base = false;
            adjustment.server_mode = MovementMode::Falling.pack(MovementMode::Walking);
        }
        assert!(client.handle_response(&mut character, &world, &response).unwrap());

        assert!(character.is_falling());
        assert!((character.component_axis_z() - Vec3::X).length() < 1.0e-4);
    }

    #[test]
    fn test_ack_drops_older_moves() {
        let (world, mut character) = standing();
        let mut client = ClientPrediction::new(NetConfig::default());
        let mut timestamps = Vec::new();
        for _ in 0..4 {
            timestamps.push(client.replicate_move(&mut character, &world, DT, Vec3::ZERO, MoveFlags::default()).timestamp);
        }

        let ack = ServerResponse::AckGoodMove { timestamp: timestamps[2] };
        assert!(client.handle_response(&mut character, &world, &ack).unwrap());
        assert_eq!(client.saved_moves().count(), 1);
        assert_eq!(client.last_acked_move().map(|saved| saved.timestamp), Some(timestamps[2]));

        // Already dropped
        let stale = ServerResponse::AckGoodMove { timestamp: timestamps[0] };
        assert!(!client.handle_response(&mut character, &world, &stale).unwrap());
        assert!(matches!(client.ack_move(timestamps[0]), Err(NetError::UnknownTimestamp(_))));
    }

    #[test]
    fn test_buffer_flushes_when_full() {
        let (world, mut character) = standing();
        let config = NetConfig {
            max_saved_moves: 3,
            ..NetConfig::default()
        };
        let mut client = ClientPrediction::new(config);
        for _ in 0..4 {
            client.replicate_move(&mut character, &world, DT, Vec3::ZERO, MoveFlags::default());
        }
        assert_eq!(client.saved_moves().count(), 1);
    }

    #[test]
    fn test_correction_replays_later_moves() {
        let (world, mut character) = standing();
        let mut client = ClientPrediction::new(NetConfig::default());
        let push = Vec3::new(2048.0, 0.0, 0.0);

        let first = client.replicate_move(&mut character, &world, DT, push, MoveFlags::default());
        let first_velocity = character.velocity();
        for _ in 0..5 {
            client.replicate_move(&mut character, &world, DT, push, MoveFlags::default());
        }
        let predicted = character.location();

        // Server had the first move end 20 units further along y
        let corrected_first = first.location + Vec3::new(0.0, 20.0, 0.0);
        let mut response = correction(first.timestamp, &character, corrected_first);
        if let ServerResponse::Adjust(adjustment) = &mut response {
            adjustment.new_velocity = first_velocity;
        }
        assert!(client.handle_response(&mut character, &world, &response).unwrap());

        assert_eq!(client.saved_moves().count(), 5);
        assert!(character.is_walking());
        assert!((character.location().y - 20.0).abs() < 0.5, "y = {}", character.location().y);
        assert!((character.location().x - predicted.x).abs() < 1.0);
    }

    #[test]
    fn test_unknown_timestamp_correction_ignored() {
        let (world, mut character) = standing();
        let mut client = ClientPrediction::new(NetConfig::default());
        client.replicate_move(&mut character, &world, DT, Vec3::ZERO, MoveFlags::default());
        let before = character.location();

        let response = correction(42.0, &character, before + Vec3::X * 100.0);
        assert!(!client.handle_response(&mut character, &world, &response).unwrap());
        assert_eq!(character.location(), before);
    }

    #[test]
    fn test_unresolved_relative_base_is_an_error() {
        let (world, mut character) = standing();
        let mut client = ClientPrediction::new(NetConfig::default());
        let sent = client.replicate_move(&mut character, &world, DT, Vec3::ZERO, MoveFlags::default());

        let mut response = correction(sent.timestamp, &character, Vec3::ZERO);
        if let ServerResponse::Adjust(adjustment) = &mut response {
            adjustment.new_base = Some(strider_core::SurfaceId(u64::MAX));
            adjustment.has_base = true;
            adjustment.base_relative = true;
        }
        assert!(matches!(
            client.handle_response(&mut character, &world, &response),
            Err(NetError::UnresolvedBase)
        ));
        assert_eq!(client.saved_moves().count(), 1);
    }

    #[test]
    fn test_unresolved_absolute_base_finds_floor() {
        let (world, mut character) = standing();
        let ground = character.base();
        let mut client = ClientPrediction::new(NetConfig::default());
        let sent = client.replicate_move(&mut character, &world, DT, Vec3::ZERO, MoveFlags::default());

        let target = sent.location + Vec3::new(30.0, 0.0, 0.0);
        let mut response = correction(sent.timestamp, &character, target);
        if let ServerResponse::Adjust(adjustment) = &mut response {
            adjustment.new_base = None;
            adjustment.has_base = true;
        }
        assert!(client.handle_response(&mut character, &world, &response).unwrap());
        assert_eq!(character.base(), ground);
        assert!(character.just_teleported());
    }
}
