//! Axis-aligned fluid volumes

use glam::Vec3;
use rapier3d::parry::bounding_volume::Aabb;
use rapier3d::parry::query::{Ray, RayCast};
use strider_core::PhysicsVolume;

use crate::convert::{to_point, to_vector};

/// A box of fluid characters can swim in
#[derive(Debug, Clone)]
pub struct WaterVolume {
    aabb: Aabb,
    pub volume: PhysicsVolume,
}

impl WaterVolume {
    pub fn new(min: Vec3, max: Vec3, volume: PhysicsVolume) -> Self {
        Self {
            aabb: Aabb::new(to_point(min.min(max)), to_point(min.max(max))),
            volume,
        }
    }

    /// Whether `point` lies inside the volume
    pub fn contains(&self, point: Vec3) -> bool {
        let mins = &self.aabb.mins;
        let maxs = &self.aabb.maxs;
        point.x >= mins.x
            && point.x <= maxs.x
            && point.y >= mins.y
            && point.y <= maxs.y
            && point.z >= mins.z
            && point.z <= maxs.z
    }

    /// Fraction along `start -> end` where the segment enters the volume from outside
    pub fn entry_fraction(&self, start: Vec3, end: Vec3) -> Option<f32> {
        if self.contains(start) {
            return None;
        }
        let ray = Ray::new(to_point(start), to_vector(end - start));
        self.aabb.cast_local_ray(&ray, 1.0, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> WaterVolume {
        WaterVolume::new(
            Vec3::new(-100.0, -100.0, -200.0),
            Vec3::new(100.0, 100.0, 0.0),
            PhysicsVolume {
                water: true,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_contains() {
        let water = pool();
        assert!(water.contains(Vec3::new(0.0, 0.0, -10.0)));
        assert!(!water.contains(Vec3::new(0.0, 0.0, 10.0)));
    }

    #[test]
    fn test_entry_fraction() {
        let water = pool();
        let t = water
            .entry_fraction(Vec3::new(0.0, 0.0, 50.0), Vec3::new(0.0, 0.0, -50.0))
            .unwrap();
        assert!((t - 0.5).abs() < 1.0e-4);
        assert!(water
            .entry_fraction(Vec3::new(0.0, 0.0, -50.0), Vec3::new(0.0, 0.0, -60.0))
            .is_none());
    }
}
