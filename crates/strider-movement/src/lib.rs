//! Strider Movement - Character movement with arbitrary gravity
//!
//! Integrates a capsule character through walking, falling, swimming and
//! flying against any [`CollisionWorld`](strider_core::CollisionWorld):
//! - Mode state machine with one strategy per mode, plus custom modes
//! - Floor finding, step-up, perching and ledge handling
//! - Gravity along any direction or toward a point, with orientation alignment
//! - Moving bases, root motion, crouching, jumping and launches
//! - Simulated-proxy extrapolation for replicated characters

pub mod based;
pub mod character;
pub mod config;
pub mod crouch;
pub mod error;
pub mod events;
pub mod falling;
pub mod floor;
pub mod flying;
pub mod gravity;
pub mod interaction;
pub mod jump;
pub mod mode;
pub mod moves;
pub mod orientation;
pub mod proxy;
pub mod root_motion;
pub mod step;
pub mod swimming;
pub mod velocity;
pub mod walking;

pub use based::BasedMovement;
pub use character::{
    CharacterMovement, MoveFlags, MAX_FLOOR_DIST, MIN_FLOOR_DIST, MIN_TICK_TIME,
};
pub use config::MovementConfig;
pub use crouch::CrouchState;
pub use error::MovementError;
pub use events::MovementEvent;
pub use floor::FloorResult;
pub use gravity::{GravityMessage, GravityModel};
pub use jump::JumpState;
pub use mode::{MovementMode, MovementStrategy};
pub use proxy::ProxyState;
pub use root_motion::{RootMotionBlend, RootMotionSource, RootMotionState};
pub use step::StepDownResult;
