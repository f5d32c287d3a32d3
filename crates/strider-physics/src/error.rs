//! Physics error types

use strider_core::SurfaceId;

#[derive(Debug, thiserror::Error)]
pub enum PhysicsError {
    #[error("unknown surface {0:?}")]
    UnknownSurface(SurfaceId),

    #[error("surface {0:?} is not attached to a rigid body")]
    NoRigidBody(SurfaceId),
}
