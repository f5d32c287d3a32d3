//! Base-relative locations on the wire

use glam::Vec3;
use strider_core::{CollisionWorld, SurfaceId};

/// Whether locations against `base` travel relative to it.
pub(crate) fn uses_relative_location(world: &dyn CollisionWorld, base: Option<SurfaceId>) -> bool {
    base.is_some_and(|base| world.is_dynamic_base(base))
}

/// World location of `location`, which is relative to `base` when the base can move.
///
/// `None` when the base is relative but unknown to `world`.
pub(crate) fn resolve_location(
    world: &dyn CollisionWorld,
    location: Vec3,
    base: Option<SurfaceId>,
    bone: Option<&str>,
    relative: bool,
) -> Option<Vec3> {
    if !relative {
        return Some(location);
    }
    let (base_location, _) = world.base_transform(base?, bone)?;
    Some(location + base_location)
}
