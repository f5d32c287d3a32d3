//! Notifications produced while simulating a character
//!
//! The simulation never calls back into game code. Everything the owner may
//! want to react to is queued here and drained after the tick.

use glam::Vec3;
use strider_core::{Hit, SurfaceId};

use crate::mode::MovementMode;

#[derive(Debug, Clone, PartialEq)]
pub enum MovementEvent {
    ModeChanged {
        previous: MovementMode,
        current: MovementMode,
    },
    /// The character stepped off a ledge and is about to fall
    WalkedOffLedge {
        previous_floor_impact_normal: Vec3,
        previous_floor_normal: Vec3,
        previous_location: Vec3,
        time_delta: f32,
    },
    StartedFalling,
    Landed {
        hit: Hit,
    },
    /// Movement was blocked by a surface
    MoveBlocked {
        hit: Hit,
    },
    Jumped,
    /// Vertical speed crossed zero after a jump
    JumpApex,
    Launched {
        velocity: Vec3,
    },
    Crouched {
        half_height_adjust: f32,
    },
    UnCrouched {
        half_height_adjust: f32,
    },
    /// A base moved but the character could not follow it fully
    UnableToFollowBase {
        delta: Vec3,
        hit: Hit,
    },
    StuckInGeometry {
        hit: Hit,
    },
    /// Force or impulse the character applies to a simulated body it ran into or stands on
    ImpactForce {
        surface: SurfaceId,
        force: Vec3,
        point: Vec3,
        /// Apply as an instantaneous impulse rather than a force over the next step
        impulse: bool,
    },
}
