//! Movement queries answered by the rapier query pipeline

use glam::{Quat, Vec3};
use rapier3d::parry::query::{contact, ShapeCastOptions, ShapeCastStatus};
use rapier3d::parry::shape::{Capsule, Cuboid, Shape};
use rapier3d::prelude::{Collider, ColliderHandle, QueryFilter as RapierFilter, Ray};
use strider_core::math::{closest_point_on_segment, quat_axis_z, safe_normal, SMALL};
use strider_core::query::{
    CollisionShape, GeometryQuery, Hit, MovementBases, PhysicsVolume, QueryFilter, SimulatedBody,
    SurfaceId,
};

use crate::convert::{from_point, from_rotation, from_vector, to_isometry, to_point, to_vector};
use crate::{collider_handle, surface_id, PhysicsWorld};

/// Shapes resting within this distance of a surface do not overlap it.
const OVERLAP_TOLERANCE: f32 = 0.01;

enum QueryShape {
    Capsule(Capsule),
    Cuboid(Cuboid),
}

impl QueryShape {
    fn new(shape: &CollisionShape) -> Self {
        match *shape {
            CollisionShape::Capsule {
                radius,
                half_height,
            } => QueryShape::Capsule(Capsule::new_z((half_height - radius).max(0.0), radius)),
            CollisionShape::Box { half_extents } => {
                QueryShape::Cuboid(Cuboid::new(to_vector(half_extents)))
            }
        }
    }

    fn as_shape(&self) -> &dyn Shape {
        match self {
            QueryShape::Capsule(capsule) => capsule,
            QueryShape::Cuboid(cuboid) => cuboid,
        }
    }
}

/// Normal of the swept shape's own surface at `impact_point`.
fn shape_normal(
    shape: &CollisionShape,
    location: Vec3,
    rotation: Quat,
    impact_point: Vec3,
    impact_normal: Vec3,
) -> Vec3 {
    match *shape {
        CollisionShape::Capsule {
            radius,
            half_height,
        } => {
            let axis = quat_axis_z(rotation) * (half_height - radius).max(0.0);
            let core = closest_point_on_segment(impact_point, location - axis, location + axis);
            let normal = safe_normal(core - impact_point);
            if normal == Vec3::ZERO {
                impact_normal
            } else {
                normal
            }
        }
        CollisionShape::Box { .. } => impact_normal,
    }
}

impl PhysicsWorld {
    fn with_filter<R>(&self, filter: &QueryFilter, f: impl FnOnce(RapierFilter) -> R) -> R {
        let ignored: Vec<ColliderHandle> = filter.ignore.iter().map(|s| collider_handle(*s)).collect();
        let predicate = |handle: ColliderHandle, _: &Collider| !ignored.contains(&handle);
        f(RapierFilter::default().exclude_sensors().predicate(&predicate))
    }

    /// Fill in the overlap details of a shape that starts inside `handle`.
    fn penetration_hit(
        &self,
        handle: ColliderHandle,
        shape: &dyn Shape,
        start: Vec3,
        end: Vec3,
        rotation: Quat,
    ) -> Hit {
        let mut hit = Hit::miss(start, end);
        hit.blocking = true;
        hit.start_penetrating = true;
        hit.time = 0.0;
        hit.distance = 0.0;
        hit.location = start;
        hit.surface = Some(surface_id(handle));
        hit.props = self.props_of(handle);

        if let Some(collider) = self.colliders.get(handle) {
            let pos = to_isometry(start, rotation);
            if let Ok(Some(found)) = contact(collider.position(), collider.shape(), &pos, shape, 0.0)
            {
                let normal = from_vector(&found.normal1);
                hit.penetration_depth = (-found.dist).max(0.0);
                hit.normal = normal;
                hit.impact_normal = normal;
                hit.impact_point = from_point(&found.point1);
            }
        }
        hit
    }
}

impl GeometryQuery for PhysicsWorld {
    fn sweep(
        &self,
        start: Vec3,
        end: Vec3,
        rotation: Quat,
        shape: &CollisionShape,
        filter: &QueryFilter,
    ) -> Hit {
        let query_shape = QueryShape::new(shape);
        let parry_shape = query_shape.as_shape();
        let delta = end - start;
        let pos = to_isometry(start, rotation);

        // Initial overlaps are reported as start-penetrating hits whatever the
        // direction of motion; the caller decides whether to ignore them.
        let shrunk = QueryShape::new(&shape.inflated(-OVERLAP_TOLERANCE));
        let overlapping = self.with_filter(filter, |rapier_filter| {
            self.queries.intersection_with_shape(
                &self.bodies,
                &self.colliders,
                &pos,
                shrunk.as_shape(),
                rapier_filter,
            )
        });
        if let Some(handle) = overlapping {
            return self.penetration_hit(handle, parry_shape, start, end, rotation);
        }
        if delta.length_squared() < SMALL {
            return Hit::miss(start, end);
        }

        let mut options = ShapeCastOptions::with_max_time_of_impact(1.0);
        options.stop_at_penetration = false;

        let cast = self.with_filter(filter, |rapier_filter| {
            self.queries.cast_shape(
                &self.bodies,
                &self.colliders,
                &pos,
                &to_vector(delta),
                parry_shape,
                options,
                rapier_filter,
            )
        });

        let Some((handle, cast)) = cast else {
            return Hit::miss(start, end);
        };

        if matches!(cast.status, ShapeCastStatus::PenetratingOrWithinTargetDist) {
            return self.penetration_hit(handle, parry_shape, start, end, rotation);
        }

        let time = cast.time_of_impact.clamp(0.0, 1.0);
        let location = start + delta * time;
        let impact_point = from_point(&cast.witness1);
        let impact_normal = safe_normal(from_vector(&cast.normal1));

        let mut hit = Hit::miss(start, end);
        hit.blocking = true;
        hit.time = time;
        hit.distance = delta.length() * time;
        hit.location = location;
        hit.impact_point = impact_point;
        hit.impact_normal = impact_normal;
        hit.normal = shape_normal(shape, location, rotation, impact_point, impact_normal);
        hit.surface = Some(surface_id(handle));
        hit.props = self.props_of(handle);
        hit
    }

    fn line_trace(&self, start: Vec3, end: Vec3, filter: &QueryFilter) -> Hit {
        let delta = end - start;
        if delta.length_squared() < SMALL {
            return Hit::miss(start, end);
        }
        let ray = Ray::new(to_point(start), to_vector(delta));
        let found = self.with_filter(filter, |rapier_filter| {
            self.queries.cast_ray_and_get_normal(
                &self.bodies,
                &self.colliders,
                &ray,
                1.0,
                true,
                rapier_filter,
            )
        });

        let Some((handle, intersection)) = found else {
            return Hit::miss(start, end);
        };

        let time = intersection.time_of_impact.clamp(0.0, 1.0);
        let normal = safe_normal(from_vector(&intersection.normal));
        let mut hit = Hit::miss(start, end);
        hit.blocking = true;
        hit.start_penetrating = time <= 0.0;
        hit.time = time;
        hit.distance = delta.length() * time;
        hit.location = start + delta * time;
        hit.impact_point = hit.location;
        hit.normal = normal;
        hit.impact_normal = normal;
        hit.surface = Some(surface_id(handle));
        hit.props = self.props_of(handle);
        hit
    }

    fn overlap_test(
        &self,
        location: Vec3,
        rotation: Quat,
        shape: &CollisionShape,
        filter: &QueryFilter,
    ) -> bool {
        let query_shape = QueryShape::new(&shape.inflated(-OVERLAP_TOLERANCE));
        let pos = to_isometry(location, rotation);
        self.with_filter(filter, |rapier_filter| {
            self.queries
                .intersection_with_shape(
                    &self.bodies,
                    &self.colliders,
                    &pos,
                    query_shape.as_shape(),
                    rapier_filter,
                )
                .is_some()
        })
    }

    fn physics_volume(&self, location: Vec3) -> PhysicsVolume {
        self.water_volumes()
            .iter()
            .find(|water| water.contains(location))
            .map(|water| water.volume)
            .unwrap_or_default()
    }

    fn water_entry(&self, start: Vec3, end: Vec3) -> Option<f32> {
        self.water_volumes()
            .iter()
            .filter(|water| water.volume.water)
            .filter_map(|water| water.entry_fraction(start, end))
            .min_by(|a, b| a.total_cmp(b))
    }
}

impl MovementBases for PhysicsWorld {
    fn base_transform(&self, base: SurfaceId, _bone: Option<&str>) -> Option<(Vec3, Quat)> {
        let collider = self.colliders.get(collider_handle(base))?;
        let pos = match collider.parent() {
            Some(parent) => self.bodies.get(parent)?.position(),
            None => collider.position(),
        };
        Some((from_vector(&pos.translation.vector), from_rotation(&pos.rotation)))
    }

    fn is_dynamic_base(&self, base: SurfaceId) -> bool {
        self.colliders
            .get(collider_handle(base))
            .and_then(|collider| collider.parent())
            .and_then(|parent| self.bodies.get(parent))
            .map(|body| !body.is_fixed())
            .unwrap_or(false)
    }

    fn base_velocity(&self, base: SurfaceId, _bone: Option<&str>) -> Vec3 {
        self.colliders
            .get(collider_handle(base))
            .and_then(|collider| collider.parent())
            .and_then(|parent| self.bodies.get(parent))
            .map(|body| from_vector(body.linvel()))
            .unwrap_or(Vec3::ZERO)
    }

    fn base_tangential_velocity(
        &self,
        base: SurfaceId,
        _bone: Option<&str>,
        world_point: Vec3,
    ) -> Vec3 {
        self.colliders
            .get(collider_handle(base))
            .and_then(|collider| collider.parent())
            .and_then(|parent| self.bodies.get(parent))
            .map(|body| {
                let angular = from_vector(body.angvel());
                let center = from_point(body.center_of_mass());
                angular.cross(world_point - center)
            })
            .unwrap_or(Vec3::ZERO)
    }

    fn simulated_body(&self, surface: SurfaceId) -> Option<SimulatedBody> {
        let collider = self.colliders.get(collider_handle(surface))?;
        let body = self.bodies.get(collider.parent()?)?;
        if !body.is_dynamic() {
            return None;
        }
        Some(SimulatedBody {
            mass: body.mass(),
            linear_velocity: from_vector(body.linvel()),
            center_of_mass: from_point(body.center_of_mass()),
            bounds_half_height: collider.compute_aabb().half_extents().z,
        })
    }
}
