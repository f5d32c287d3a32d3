//! Collision query records and the traits a world must provide
//!
//! The movement code never talks to a physics engine directly. It issues
//! sweeps, line traces and overlap tests through [`GeometryQuery`] and reads
//! the transform and velocity of whatever it stands on through
//! [`MovementBases`]. Any type implementing both is a [`CollisionWorld`].

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Opaque handle to a piece of collision geometry.
///
/// Characters only ever hold this weak handle to the surface they stand on;
/// the world owns the geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceId(pub u64);

/// How a surface modifies the walkable slope threshold.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum WalkableSlopeOverride {
    /// Use the character's own threshold
    #[default]
    Default,
    /// Allow steeper slopes than the character normally would, up to this angle in degrees
    Increase(f32),
    /// Allow only slopes shallower than this angle in degrees
    Decrease(f32),
    /// Never walkable
    Unwalkable,
}

impl WalkableSlopeOverride {
    /// Apply this override to a walkable floor Z threshold.
    pub fn modify_walkable_floor_z(&self, walkable_floor_z: f32) -> f32 {
        match *self {
            WalkableSlopeOverride::Default => walkable_floor_z,
            WalkableSlopeOverride::Increase(angle) => {
                walkable_floor_z.min(angle.to_radians().cos())
            }
            WalkableSlopeOverride::Decrease(angle) => {
                walkable_floor_z.max(angle.to_radians().cos())
            }
            // Larger than any unit-vector dot product
            WalkableSlopeOverride::Unwalkable => 10.0,
        }
    }
}

/// Per-surface movement properties reported with every hit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurfaceProps {
    pub walkable_override: WalkableSlopeOverride,
    /// Whether characters may step up onto this surface
    pub can_step_up: bool,
}

impl Default for SurfaceProps {
    fn default() -> Self {
        Self {
            walkable_override: WalkableSlopeOverride::Default,
            can_step_up: true,
        }
    }
}

/// Result of a sweep or trace.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    /// Whether something blocked the query
    pub blocking: bool,
    /// Whether the shape was already overlapping geometry at the start
    pub start_penetrating: bool,
    /// Fraction of the trace travelled before the hit, in [0, 1]
    pub time: f32,
    /// Distance travelled before the hit
    pub distance: f32,
    /// Location of the shape's centre at the time of the hit
    pub location: Vec3,
    /// Contact point on the hit surface
    pub impact_point: Vec3,
    /// Normal of the swept shape's surface at the contact
    pub normal: Vec3,
    /// Normal of the hit surface at the contact
    pub impact_normal: Vec3,
    pub trace_start: Vec3,
    pub trace_end: Vec3,
    /// Depth of the initial overlap when `start_penetrating`
    pub penetration_depth: f32,
    pub surface: Option<SurfaceId>,
    pub bone: Option<String>,
    pub props: SurfaceProps,
}

impl Hit {
    /// A non-blocking result for a trace from `start` to `end`.
    pub fn miss(start: Vec3, end: Vec3) -> Self {
        Self {
            blocking: false,
            start_penetrating: false,
            time: 1.0,
            distance: (end - start).length(),
            location: end,
            impact_point: Vec3::ZERO,
            normal: Vec3::ZERO,
            impact_normal: Vec3::ZERO,
            trace_start: start,
            trace_end: end,
            penetration_depth: 0.0,
            surface: None,
            bone: None,
            props: SurfaceProps::default(),
        }
    }

    /// A blocking hit that did not start inside geometry.
    pub fn is_valid_blocking_hit(&self) -> bool {
        self.blocking && !self.start_penetrating
    }
}

impl Default for Hit {
    fn default() -> Self {
        Self::miss(Vec3::ZERO, Vec3::ZERO)
    }
}

/// Shape used for sweeps and overlap tests.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CollisionShape {
    /// Capsule aligned with the local Z axis. `half_height` includes the hemispheres.
    Capsule { radius: f32, half_height: f32 },
    /// Box with the given half extents
    Box { half_extents: Vec3 },
}

impl CollisionShape {
    pub fn capsule(radius: f32, half_height: f32) -> Self {
        CollisionShape::Capsule {
            radius,
            half_height,
        }
    }

    /// Return a copy grown by `inflation` in every direction (negative shrinks).
    pub fn inflated(&self, inflation: f32) -> Self {
        match *self {
            CollisionShape::Capsule {
                radius,
                half_height,
            } => {
                let radius = (radius + inflation).max(0.0);
                CollisionShape::Capsule {
                    radius,
                    half_height: (half_height + inflation).max(radius),
                }
            }
            CollisionShape::Box { half_extents } => CollisionShape::Box {
                half_extents: (half_extents + Vec3::splat(inflation)).max(Vec3::ZERO),
            },
        }
    }
}

/// Filter applied to every query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryFilter {
    /// Surfaces that never block this query
    pub ignore: Vec<SurfaceId>,
}

impl QueryFilter {
    pub fn ignoring(surface: SurfaceId) -> Self {
        Self {
            ignore: vec![surface],
        }
    }
}

/// Fluid and gravity properties of the region a character occupies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicsVolume {
    pub water: bool,
    pub fluid_friction: f32,
    pub terminal_velocity: f32,
}

impl Default for PhysicsVolume {
    fn default() -> Self {
        Self {
            water: false,
            fluid_friction: 0.3,
            terminal_velocity: 4000.0,
        }
    }
}

/// Dynamics of a simulated body a character can push.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatedBody {
    pub mass: f32,
    pub linear_velocity: Vec3,
    pub center_of_mass: Vec3,
    /// Half extent of the body's bounds along world Z
    pub bounds_half_height: f32,
}

/// Sweeps, traces and overlaps against the collision world.
pub trait GeometryQuery {
    /// Sweep `shape` with the given rotation from `start` to `end`.
    fn sweep(
        &self,
        start: Vec3,
        end: Vec3,
        rotation: Quat,
        shape: &CollisionShape,
        filter: &QueryFilter,
    ) -> Hit;

    /// Trace a ray from `start` to `end`.
    fn line_trace(&self, start: Vec3, end: Vec3, filter: &QueryFilter) -> Hit;

    /// True if `shape` placed at `location` overlaps blocking geometry.
    ///
    /// Shapes resting exactly on a surface are not overlapping it.
    fn overlap_test(
        &self,
        location: Vec3,
        rotation: Quat,
        shape: &CollisionShape,
        filter: &QueryFilter,
    ) -> bool;

    /// Volume properties at `location`.
    fn physics_volume(&self, _location: Vec3) -> PhysicsVolume {
        PhysicsVolume::default()
    }

    /// Fraction along `start -> end` at which the segment enters water from outside.
    fn water_entry(&self, _start: Vec3, _end: Vec3) -> Option<f32> {
        None
    }

    fn sweep_capsule(
        &self,
        start: Vec3,
        end: Vec3,
        rotation: Quat,
        radius: f32,
        half_height: f32,
        filter: &QueryFilter,
    ) -> Hit {
        self.sweep(
            start,
            end,
            rotation,
            &CollisionShape::capsule(radius, half_height),
            filter,
        )
    }

    fn sweep_box(
        &self,
        start: Vec3,
        end: Vec3,
        rotation: Quat,
        half_extents: Vec3,
        filter: &QueryFilter,
    ) -> Hit {
        self.sweep(
            start,
            end,
            rotation,
            &CollisionShape::Box { half_extents },
            filter,
        )
    }
}

/// Transforms and velocities of surfaces characters stand on.
pub trait MovementBases {
    /// World transform of a base, or `None` if it no longer exists.
    fn base_transform(&self, base: SurfaceId, bone: Option<&str>) -> Option<(Vec3, Quat)>;

    /// Whether the base can move (kinematic or simulated).
    fn is_dynamic_base(&self, base: SurfaceId) -> bool;

    /// Linear velocity of a base.
    fn base_velocity(&self, base: SurfaceId, bone: Option<&str>) -> Vec3;

    /// Velocity at `world_point` due to the base's angular velocity.
    fn base_tangential_velocity(
        &self,
        _base: SurfaceId,
        _bone: Option<&str>,
        _world_point: Vec3,
    ) -> Vec3 {
        Vec3::ZERO
    }

    /// Total velocity of the base at `world_point`.
    fn base_velocity_at(&self, base: SurfaceId, bone: Option<&str>, world_point: Vec3) -> Vec3 {
        self.base_velocity(base, bone) + self.base_tangential_velocity(base, bone, world_point)
    }

    /// Dynamics of a simulated body, if `surface` belongs to one.
    fn simulated_body(&self, _surface: SurfaceId) -> Option<SimulatedBody> {
        None
    }
}

/// Everything the movement code needs from the world.
pub trait CollisionWorld: GeometryQuery + MovementBases {}

impl<T: GeometryQuery + MovementBases> CollisionWorld for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walkable_override() {
        let z = 0.71;
        assert_eq!(WalkableSlopeOverride::Default.modify_walkable_floor_z(z), z);
        assert!(WalkableSlopeOverride::Increase(60.0).modify_walkable_floor_z(z) < 0.51);
        assert!(WalkableSlopeOverride::Decrease(10.0).modify_walkable_floor_z(z) > 0.98);
        assert!(WalkableSlopeOverride::Unwalkable.modify_walkable_floor_z(z) > 1.0);
    }

    #[test]
    fn test_miss_is_not_blocking() {
        let hit = Hit::miss(Vec3::ZERO, Vec3::X);
        assert!(!hit.is_valid_blocking_hit());
        assert_eq!(hit.time, 1.0);
    }

    #[test]
    fn test_inflated_capsule_keeps_valid_proportions() {
        let shape = CollisionShape::capsule(10.0, 12.0).inflated(-5.0);
        match shape {
            CollisionShape::Capsule {
                radius,
                half_height,
            } => {
                assert_eq!(radius, 5.0);
                assert_eq!(half_height, 7.0);
            }
            CollisionShape::Box { .. } => panic!("expected capsule"),
        }
    }
}
