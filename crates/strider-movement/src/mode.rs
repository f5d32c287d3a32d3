//! Movement modes and the per-mode strategy interface

use serde::{Deserialize, Serialize};

use crate::character::CharacterMovement;
use strider_core::CollisionWorld;

/// The physics state a character is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MovementMode {
    /// No movement is simulated
    None,
    /// Walking on a walkable floor
    #[default]
    Walking,
    /// Walking driven by navigation data; simulated like walking
    NavWalking,
    /// Airborne, under gravity
    Falling,
    /// In a water volume
    Swimming,
    /// Ignoring gravity
    Flying,
    /// A user-registered strategy identified by its tag
    Custom(u8),
}

/// Number of built-in modes; custom tags are packed after them.
const BUILTIN_MODE_COUNT: u8 = 7;
/// Largest custom tag that still fits below the ground-mode bit.
pub const MAX_CUSTOM_MODE_TAG: u8 = 0x7F - BUILTIN_MODE_COUNT;
const GROUND_MODE_BIT: u8 = 0x80;

impl MovementMode {
    /// Walking or NavWalking
    pub fn is_grounded(&self) -> bool {
        matches!(self, MovementMode::Walking | MovementMode::NavWalking)
    }

    fn index(&self) -> u8 {
        match self {
            MovementMode::None => 0,
            MovementMode::Walking => 1,
            MovementMode::NavWalking => 2,
            MovementMode::Falling => 3,
            MovementMode::Swimming => 4,
            MovementMode::Flying => 5,
            MovementMode::Custom(_) => 6,
        }
    }

    /// Pack this mode and the remembered ground mode into one byte for replication.
    ///
    /// Custom tags above [`MAX_CUSTOM_MODE_TAG`] are clamped.
    pub fn pack(&self, ground_mode: MovementMode) -> u8 {
        let mode = match self {
            MovementMode::Custom(tag) => BUILTIN_MODE_COUNT + (*tag).min(MAX_CUSTOM_MODE_TAG),
            other => other.index(),
        };
        let ground_bit = if ground_mode == MovementMode::NavWalking {
            GROUND_MODE_BIT
        } else {
            0
        };
        mode | ground_bit
    }

    /// Unpack a replicated byte into `(mode, ground_mode)`.
    ///
    /// Returns `None` for the reserved index of the bare custom marker.
    pub fn unpack(packed: u8) -> Option<(MovementMode, MovementMode)> {
        let ground_mode = if packed & GROUND_MODE_BIT != 0 {
            MovementMode::NavWalking
        } else {
            MovementMode::Walking
        };
        let mode = match packed & !GROUND_MODE_BIT {
            0 => MovementMode::None,
            1 => MovementMode::Walking,
            2 => MovementMode::NavWalking,
            3 => MovementMode::Falling,
            4 => MovementMode::Swimming,
            5 => MovementMode::Flying,
            6 => return None,
            custom => MovementMode::Custom(custom - BUILTIN_MODE_COUNT),
        };
        Some((mode, ground_mode))
    }
}

/// Physics integrator for one movement mode.
///
/// The state machine calls [`MovementStrategy::simulate`] with the time left
/// in the tick and the number of iterations already spent. Strategies may
/// change the mode and hand the remaining time back through
/// [`CharacterMovement::start_new_physics`].
pub trait MovementStrategy: Send + Sync {
    fn simulate(
        &self,
        movement: &mut CharacterMovement,
        world: &dyn CollisionWorld,
        delta_time: f32,
        iterations: u32,
    );

    /// Maximum speed while this strategy is active, if it differs from the default.
    fn max_speed(&self, movement: &CharacterMovement) -> Option<f32> {
        let _ = movement;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_round_trip() {
        let modes = [
            MovementMode::None,
            MovementMode::Walking,
            MovementMode::NavWalking,
            MovementMode::Falling,
            MovementMode::Swimming,
            MovementMode::Flying,
            MovementMode::Custom(0),
            MovementMode::Custom(MAX_CUSTOM_MODE_TAG),
        ];
        for mode in modes {
            for ground in [MovementMode::Walking, MovementMode::NavWalking] {
                let packed = mode.pack(ground);
                assert_eq!(MovementMode::unpack(packed), Some((mode, ground)));
            }
        }
    }

    #[test]
    fn test_unpack_reserved_index() {
        assert_eq!(MovementMode::unpack(6), None);
    }

    #[test]
    fn test_custom_tag_clamped() {
        let packed = MovementMode::Custom(200).pack(MovementMode::Walking);
        assert_eq!(
            MovementMode::unpack(packed),
            Some((MovementMode::Custom(MAX_CUSTOM_MODE_TAG), MovementMode::Walking))
        );
    }
}
