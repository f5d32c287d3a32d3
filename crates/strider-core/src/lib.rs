//! Strider Core - Shared types and utilities for the Strider movement engine
//!
//! This crate provides the foundational types used by every other crate:
//! - Mathematical primitives (re-exported from glam) and vector helpers
//! - Collision query records and the geometry/base traits a world implements
//! - Transform and character identifiers
//! - Fixed-step simulation clock

pub mod math;
pub mod query;
pub mod time;
pub mod types;

pub use glam::{Mat3, Quat, Vec3};
pub use query::{
    CollisionShape, CollisionWorld, GeometryQuery, Hit, MovementBases, PhysicsVolume,
    QueryFilter, SimulatedBody, SurfaceId, SurfaceProps, WalkableSlopeOverride,
};
pub use time::{SimClock, TimeConfig};
pub use types::{CharacterId, Transform};
