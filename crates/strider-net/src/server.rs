//! Authoritative handling of client moves

use strider_core::CollisionWorld;
use strider_movement::{CharacterMovement, MovementMode};
use tracing::{debug, trace, warn};

use crate::base::{resolve_location, uses_relative_location};
use crate::config::NetConfig;
use crate::error::NetError;
use crate::messages::{ClientMove, ServerAdjustment, ServerResponse};

/// Server side of one character's reconciliation.
///
/// Each received [`ClientMove`] is simulated against the server's copy of the
/// character and compared with what the client reported. The verdict is kept
/// until [`ServerMoveHandler::send_client_adjustment`] flushes it, once per
/// network tick.
#[derive(Debug, Clone)]
pub struct ServerMoveHandler {
    config: NetConfig,
    current_timestamp: f32,
    server_time: f32,
    last_update_time: Option<f32>,
    force_client_update: bool,
    pending: Option<ServerResponse>,
}

impl ServerMoveHandler {
    pub fn new(config: NetConfig) -> Self {
        Self {
            config,
            current_timestamp: 0.0,
            server_time: 0.0,
            last_update_time: None,
            force_client_update: false,
            pending: None,
        }
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    /// Timestamp of the last accepted move.
    pub fn current_timestamp(&self) -> f32 {
        self.current_timestamp
    }

    /// Correct the client on the next move regardless of its error.
    pub fn force_client_update(&mut self) {
        self.force_client_update = true;
    }

    /// Simulate a client move and decide whether the client needs correcting.
    ///
    /// Returns `Ok(false)` when the move was dropped as out of date.
    pub fn handle_move(
        &mut self,
        movement: &mut CharacterMovement,
        world: &dyn CollisionWorld,
        client_move: &ClientMove,
    ) -> Result<bool, NetError> {
        if MovementMode::unpack(client_move.packed_mode).is_none() {
            return Err(NetError::InvalidMode(client_move.packed_mode));
        }
        let Some(previous) = self.previous_timestamp(client_move.timestamp) else {
            debug!(
                timestamp = client_move.timestamp,
                current = self.current_timestamp,
                "dropping out of date client move"
            );
            return Ok(false);
        };

        let delta_time = (client_move.timestamp - previous).min(self.config.max_move_delta_time);
        self.current_timestamp = client_move.timestamp;
        self.server_time += delta_time;

        movement.move_autonomous(world, delta_time, client_move.acceleration, client_move.flags);
        self.handle_client_error(movement, world, client_move, delta_time);
        Ok(true)
    }

    /// The timestamp `timestamp` should be measured from, or `None` when it is out of date.
    ///
    /// A timestamp far behind the current one means the client wrapped its
    /// clock, so the current timestamp is wrapped the same way.
    fn previous_timestamp(&self, timestamp: f32) -> Option<f32> {
        if timestamp > self.current_timestamp {
            return Some(self.current_timestamp);
        }
        let reset_interval = self.config.min_time_between_timestamp_resets;
        if reset_interval > 0.0 && self.current_timestamp - timestamp > reset_interval * 0.5 {
            debug!(timestamp, current = self.current_timestamp, "client timestamp reset detected");
            return Some(self.current_timestamp - reset_interval);
        }
        None
    }

    fn handle_client_error(
        &mut self,
        movement: &mut CharacterMovement,
        world: &dyn CollisionWorld,
        client_move: &ClientMove,
        delta_time: f32,
    ) {
        // A correction went out recently; the client will resync from it
        let rate_limited = self.last_update_time.is_some_and(|last| {
            last != self.server_time && self.server_time - last < self.config.client_error_update_rate_limit
        });
        if rate_limited {
            trace!(timestamp = client_move.timestamp, "client error check rate limited");
            return;
        }

        let bone = client_move.bone.as_deref();
        let relative = uses_relative_location(world, client_move.base);
        let client_location = resolve_location(world, client_move.location, client_move.base, bone, relative)
            .unwrap_or(client_move.location);

        if self.force_client_update || self.client_error(movement, client_move, client_location) {
            let based = movement.based_movement();
            let base_relative = based.has_relative_location(world);
            let new_location = if base_relative { based.location } else { movement.location() };

            warn!(
                timestamp = client_move.timestamp,
                error = (movement.location() - client_location).length(),
                client = ?client_location,
                server = ?movement.location(),
                "correcting client"
            );
            self.last_update_time = Some(self.server_time);
            self.pending = Some(ServerResponse::Adjust(ServerAdjustment {
                timestamp: client_move.timestamp,
                ack_good_move: false,
                delta_time,
                new_location,
                new_velocity: movement.velocity(),
                new_rotation: movement.rotation(),
                new_base: based.base,
                bone: based.bone.clone(),
                has_base: based.base.is_some(),
                base_relative,
                server_mode: movement.mode().pack(movement.ground_mode()),
            }));
        } else {
            if self.config.client_authoritative_position {
                adopt_client_state(movement, world, client_move, client_location);
            }
            // An ack never overrides a correction that has not been sent yet
            if !self.pending.as_ref().is_some_and(ServerResponse::is_correction) {
                self.pending = Some(ServerResponse::AckGoodMove {
                    timestamp: client_move.timestamp,
                });
            }
        }

        self.force_client_update = false;
    }

    fn client_error(&self, movement: &CharacterMovement, client_move: &ClientMove, client_location: glam::Vec3) -> bool {
        if client_move.packed_mode != movement.mode().pack(movement.ground_mode()) {
            return true;
        }
        let based = movement.based_movement();
        if client_move.base != based.base || client_move.bone != based.bone {
            return true;
        }
        (movement.location() - client_location).length_squared() > self.config.max_position_error_squared
    }

    /// The verdict waiting to be sent, if any.
    pub fn pending_adjustment(&self) -> Option<&ServerResponse> {
        self.pending.as_ref()
    }

    /// Take the pending verdict for sending to the client.
    pub fn send_client_adjustment(&mut self) -> Option<ServerResponse> {
        self.pending.take()
    }
}

/// Trust a client that is within tolerance.
fn adopt_client_state(
    movement: &mut CharacterMovement,
    world: &dyn CollisionWorld,
    client_move: &ClientMove,
    client_location: glam::Vec3,
) {
    let based = movement.based_movement();
    let unchanged = movement.location() == client_location
        && client_move.packed_mode == movement.mode().pack(movement.ground_mode())
        && client_move.base == based.base
        && client_move.bone == based.bone;
    if unchanged {
        return;
    }

    movement.set_location(client_location);
    movement.apply_network_movement_mode(world, client_move.packed_mode);
    movement.set_base(world, client_move.base, client_move.bone.clone());
    movement.update_floor_from_adjustment(world);
    movement.save_base_location(world);
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use strider_movement::{MoveFlags, MovementConfig};
    use strider_physics::PhysicsWorld;

    const DT: f32 = 1.0 / 60.0;

    fn standing() -> (PhysicsWorld, CharacterMovement) {
        let mut world = PhysicsWorld::new();
        world.create_ground(0.0);
        world.refresh_queries();
        let mut character = CharacterMovement::new(MovementConfig::default());
        character.set_authority(true);
        character.initialize(&world, Vec3::new(0.0, 0.0, 90.15));
        (world, character)
    }

    fn client_move(character: &CharacterMovement, timestamp: f32, location: Vec3) -> ClientMove {
        ClientMove {
            timestamp,
            delta_time: DT,
            acceleration: Vec3::ZERO,
            location,
            base: character.base(),
            bone: None,
            packed_mode: character.mode().pack(character.ground_mode()),
            flags: MoveFlags::default(),
        }
    }

    #[test]
    fn test_matching_move_is_acked() {
        let (world, mut character) = standing();
        let mut server = ServerMoveHandler::new(NetConfig::default());
        let location = character.location();
        let sent = client_move(&character, DT, location);
        let accepted = server.handle_move(&mut character, &world, &sent);
        assert!(accepted.unwrap());
        assert_eq!(server.send_client_adjustment(), Some(ServerResponse::AckGoodMove { timestamp: DT }));
        assert_eq!(server.send_client_adjustment(), None);
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let (world, mut character) = standing();
        let mut server = ServerMoveHandler::new(NetConfig::default());
        let location = character.location();
        let sent = client_move(&character, 0.1, location);
        server.handle_move(&mut character, &world, &sent).unwrap();
        server.send_client_adjustment();

        let stale = client_move(&character, 0.1, location);
        assert!(!server.handle_move(&mut character, &world, &stale).unwrap());
        assert!(server.pending_adjustment().is_none());
        assert_eq!(server.current_timestamp(), 0.1);
    }

    #[test]
    fn test_invalid_mode_is_an_error() {
        let (world, mut character) = standing();
        let mut server = ServerMoveHandler::new(NetConfig::default());
        let mut bad = client_move(&character, DT, character.location());
        bad.packed_mode = 6;
        assert!(matches!(
            server.handle_move(&mut character, &world, &bad),
            Err(NetError::InvalidMode(6))
        ));
    }

    #[test]
    fn test_mode_mismatch_is_corrected() {
        let (world, mut character) = standing();
        let mut server = ServerMoveHandler::new(NetConfig::default());
        let mut mismatched = client_move(&character, DT, character.location());
        mismatched.packed_mode = MovementMode::Flying.pack(MovementMode::Walking);
        server.handle_move(&mut character, &world, &mismatched).unwrap();
        let Some(ServerResponse::Adjust(adjustment)) = server.pending_adjustment() else {
            panic!("expected a correction");
        };
        assert_eq!(adjustment.server_mode, MovementMode::Walking.pack(MovementMode::Walking));
    }

    #[test]
    fn test_timestamp_reset_is_accepted() {
        let (world, mut character) = standing();
        let config = NetConfig {
            min_time_between_timestamp_resets: 1.0,
            ..NetConfig::default()
        };
        let mut server = ServerMoveHandler::new(config);
        let location = character.location();
        let sent = client_move(&character, 1.01, location);
        server.handle_move(&mut character, &world, &sent).unwrap();
        server.send_client_adjustment();

        // The client wrapped from 1.01 to 0.01 and stepped 0.02
        let wrapped = client_move(&character, 0.03, location);
        assert!(server.handle_move(&mut character, &world, &wrapped).unwrap());
        assert_eq!(server.current_timestamp(), 0.03);
        assert_eq!(server.pending_adjustment(), Some(&ServerResponse::AckGoodMove { timestamp: 0.03 }));

        // Slightly older is still stale
        let stale = client_move(&character, 0.02, location);
        assert!(!server.handle_move(&mut character, &world, &stale).unwrap());
    }

    #[test]
    fn test_move_delta_is_capped() {
        let (world, mut character) = standing();
        character.initialize(&world, Vec3::new(0.0, 0.0, 1000.0));
        assert!(character.is_falling());
        let mut server = ServerMoveHandler::new(NetConfig::default());
        let location = character.location();
        let sent = client_move(&character, 5.0, location);
        server.handle_move(&mut character, &world, &sent).unwrap();

        // Five seconds of falling would have hit the ground; 0.125s drops under 8 units
        let drop = 1000.0 - character.location().z;
        assert!(drop > 5.0 && drop < 10.0, "drop = {drop}");
        assert_eq!(server.current_timestamp(), 5.0);
    }

    #[test]
    fn test_forced_update_corrects_good_move() {
        let (world, mut character) = standing();
        let mut server = ServerMoveHandler::new(NetConfig::default());
        server.force_client_update();
        let location = character.location();
        let sent = client_move(&character, DT, location);
        server.handle_move(&mut character, &world, &sent).unwrap();
        assert!(server.pending_adjustment().is_some_and(ServerResponse::is_correction));

        // Only once
        server.send_client_adjustment();
        let location = character.location();
        let sent = client_move(&character, 2.0 * DT, location);
        server.handle_move(&mut character, &world, &sent).unwrap();
        assert!(!server.pending_adjustment().is_some_and(ServerResponse::is_correction));
    }

    #[test]
    fn test_client_authoritative_position_adopted() {
        let (world, mut character) = standing();
        let config = NetConfig {
            client_authoritative_position: true,
            ..NetConfig::default()
        };
        let mut server = ServerMoveHandler::new(config);
        let nudged = character.location() + Vec3::new(1.0, 0.0, 0.0);
        let sent = client_move(&character, DT, nudged);
        server.handle_move(&mut character, &world, &sent).unwrap();
        assert_eq!(character.location(), nudged);
        assert_eq!(server.pending_adjustment(), Some(&ServerResponse::AckGoodMove { timestamp: DT }));
    }

    #[test]
    fn test_rate_limit_skips_error_checks() {
        let (world, mut character) = standing();
        let config = NetConfig {
            client_error_update_rate_limit: 1.0,
            ..NetConfig::default()
        };
        let mut server = ServerMoveHandler::new(config);
        let far = character.location() + Vec3::new(50.0, 0.0, 0.0);
        let sent = client_move(&character, DT, far);
        server.handle_move(&mut character, &world, &sent).unwrap();
        assert!(server.send_client_adjustment().is_some_and(|r| r.is_correction()));

        // Still wrong, but within the rate limit of the last correction
        let sent = client_move(&character, 2.0 * DT, far);
        server.handle_move(&mut character, &world, &sent).unwrap();
        assert!(server.pending_adjustment().is_none());
    }
}
