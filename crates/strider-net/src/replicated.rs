//! Snapshots that drive simulated proxies

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use strider_core::{CollisionWorld, SurfaceId};
use strider_movement::{CharacterMovement, MovementMode, ProxyState};

use crate::base::resolve_location;
use crate::error::NetError;

/// Movement state broadcast to every peer that does not own the character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicatedMovement {
    /// Relative to `base` when `base_relative` is set
    pub location: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
    pub base: Option<SurfaceId>,
    pub bone: Option<String>,
    pub base_relative: bool,
    pub packed_mode: u8,
}

impl ReplicatedMovement {
    /// Snapshot the authoritative state of `movement`.
    pub fn capture(movement: &CharacterMovement, world: &dyn CollisionWorld) -> Self {
        let based = movement.based_movement();
        let base_relative = based.has_relative_location(world);
        Self {
            location: if base_relative { based.location } else { movement.location() },
            rotation: movement.rotation(),
            velocity: movement.velocity(),
            base: based.base,
            bone: based.bone.clone(),
            base_relative,
            packed_mode: movement.mode().pack(movement.ground_mode()),
        }
    }

    /// Push this snapshot into a simulated proxy.
    pub fn apply(&self, movement: &mut CharacterMovement, world: &dyn CollisionWorld) -> Result<(), NetError> {
        if MovementMode::unpack(self.packed_mode).is_none() {
            return Err(NetError::InvalidMode(self.packed_mode));
        }
        let location = resolve_location(world, self.location, self.base, self.bone.as_deref(), self.base_relative)
            .ok_or(NetError::UnresolvedBase)?;

        movement.apply_proxy_state(
            world,
            ProxyState {
                location,
                rotation: self.rotation,
                velocity: self.velocity,
                base: self.base,
                bone: self.bone.clone(),
                packed_mode: self.packed_mode,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strider_movement::MovementConfig;
    use strider_physics::PhysicsWorld;

    const DT: f32 = 1.0 / 60.0;

    #[test]
    fn test_proxy_follows_authority() {
        let mut world = PhysicsWorld::new();
        world.create_ground(0.0);
        world.refresh_queries();

        let mut authority = CharacterMovement::new(MovementConfig::default());
        authority.initialize(&world, Vec3::new(0.0, 0.0, 90.15));
        let mut proxy = CharacterMovement::new(MovementConfig::default());
        proxy.initialize(&world, Vec3::new(0.0, 0.0, 90.15));

        for _ in 0..30 {
            authority.add_input_vector(Vec3::X);
            authority.tick(&world, DT);
        }
        ReplicatedMovement::capture(&authority, &world).apply(&mut proxy, &world).unwrap();
        assert_eq!(proxy.location(), authority.location());
        assert_eq!(proxy.velocity(), authority.velocity());

        // Extrapolates along the replicated velocity until the next snapshot
        proxy.simulate_movement(&world, DT);
        assert!(proxy.location().x > authority.location().x);
        assert!(proxy.is_walking());
    }

    #[test]
    fn test_relative_location_on_moving_platform() {
        let mut world = PhysicsWorld::new();
        let platform = world.create_platform(Vec3::new(200.0, 200.0, 10.0), Vec3::new(0.0, 0.0, 100.0));
        world.refresh_queries();

        let mut authority = CharacterMovement::new(MovementConfig::default());
        authority.initialize(&world, Vec3::new(0.0, 0.0, 110.0 + 90.15));
        assert_eq!(authority.base(), Some(platform));

        let snapshot = ReplicatedMovement::capture(&authority, &world);
        assert!(snapshot.base_relative);
        let platform_origin = Vec3::new(0.0, 0.0, 100.0);
        assert!((snapshot.location + platform_origin - authority.location()).length() < 1.0e-3);

        let mut proxy = CharacterMovement::new(MovementConfig::default());
        snapshot.apply(&mut proxy, &world).unwrap();
        assert!((proxy.location() - authority.location()).length() < 1.0e-3);
        assert_eq!(proxy.base(), Some(platform));
    }

    #[test]
    fn test_invalid_snapshot_rejected() {
        let world = PhysicsWorld::new();
        let mut proxy = CharacterMovement::new(MovementConfig::default());
        let snapshot = ReplicatedMovement {
            location: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
            base: Some(SurfaceId(u64::MAX)),
            bone: None,
            base_relative: true,
            packed_mode: 1,
        };
        assert!(matches!(snapshot.apply(&mut proxy, &world), Err(NetError::UnresolvedBase)));

        let bad_mode = ReplicatedMovement {
            base: None,
            base_relative: false,
            packed_mode: 6,
            ..snapshot
        };
        assert!(matches!(bad_mode.apply(&mut proxy, &world), Err(NetError::InvalidMode(6))));
    }
}
