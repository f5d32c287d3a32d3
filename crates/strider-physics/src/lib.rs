//! Strider Physics - Collision world using rapier3d
//!
//! Provides the [`PhysicsWorld`] that movement queries run against: static
//! geometry, kinematic platforms characters can ride, simulated bodies they
//! can push, and water volumes they can swim in.

mod convert;
mod error;
mod query;
mod water;

pub use error::PhysicsError;
pub use water::WaterVolume;

use std::collections::HashMap;

use glam::{Quat, Vec3};
use nalgebra::Unit;
use rapier3d::prelude::*;
use strider_core::{PhysicsVolume, SurfaceId, SurfaceProps};
use tracing::debug;

use convert::{to_isometry, to_point, to_vector};

/// Settings for the rigid bodies characters push around.
///
/// Character movement does its own integration. These only drive the
/// simulated crates and platforms of the world.
#[derive(Debug, Clone)]
pub struct PhysicsConfig {
    /// Gravity on simulated bodies, in cm/s²
    pub gravity: Vec3,
    /// Seconds advanced by [`PhysicsWorld::step`]
    pub timestep: f32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: Vec3::new(0.0, 0.0, -980.0),
            timestep: 1.0 / 60.0,
        }
    }
}

/// Convert a collider handle into the opaque id handed to movement code.
pub fn surface_id(handle: ColliderHandle) -> SurfaceId {
    let (index, generation) = handle.into_raw_parts();
    SurfaceId(u64::from(index) | (u64::from(generation) << 32))
}

/// Recover the collider handle behind a surface id.
pub fn collider_handle(surface: SurfaceId) -> ColliderHandle {
    ColliderHandle::from_raw_parts(surface.0 as u32, (surface.0 >> 32) as u32)
}

/// Geometry that characters sweep against, plus the few bodies they affect.
///
/// Queries take `&self`, so any number of characters can move against one
/// world between two calls to [`step`](Self::step).
pub struct PhysicsWorld {
    pub config: PhysicsConfig,
    pub bodies: RigidBodySet,
    pub colliders: ColliderSet,

    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    params: IntegrationParameters,
    pipeline: PhysicsPipeline,
    islands: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    ccd_solver: CCDSolver,
    queries: QueryPipeline,

    surface_props: HashMap<ColliderHandle, SurfaceProps>,
    water_volumes: Vec<WaterVolume>,
}

impl PhysicsWorld {
    pub fn new() -> Self {
        Self::with_config(PhysicsConfig::default())
    }

    pub fn with_config(config: PhysicsConfig) -> Self {
        let params = IntegrationParameters {
            dt: config.timestep,
            ..IntegrationParameters::default()
        };

        Self {
            config,
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            params,
            pipeline: PhysicsPipeline::new(),
            islands: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            ccd_solver: CCDSolver::new(),
            queries: QueryPipeline::new(),
            surface_props: HashMap::new(),
            water_volumes: Vec::new(),
        }
    }

    /// Advance simulated bodies by one timestep.
    ///
    /// Kinematic platforms keep the pose set by
    /// [`move_kinematic_body`](Self::move_kinematic_body).
    pub fn step(&mut self) {
        let gravity = to_vector(self.config.gravity);
        self.pipeline.step(
            &gravity,
            &self.params,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            None,
            &(),
            &(),
        );
        self.refresh_queries();
    }

    /// Rebuild the query structure so movement sees the latest geometry.
    pub fn refresh_queries(&mut self) {
        self.queries.update(&self.colliders);
    }

    fn insert_static(&mut self, collider: Collider) -> SurfaceId {
        let handle = self.colliders.insert(collider);
        self.refresh_queries();
        surface_id(handle)
    }

    fn insert_body(&mut self, body: RigidBody, collider: Collider) -> SurfaceId {
        let parent = self.bodies.insert(body);
        let handle = self
            .colliders
            .insert_with_parent(collider, parent, &mut self.bodies);
        self.refresh_queries();
        surface_id(handle)
    }

    /// Remove a surface along with any movement properties set on it
    pub fn remove_surface(&mut self, surface: SurfaceId) {
        let handle = collider_handle(surface);
        self.colliders
            .remove(handle, &mut self.islands, &mut self.bodies, true);
        self.surface_props.remove(&handle);
        self.refresh_queries();
    }

    pub fn get_collider(&self, surface: SurfaceId) -> Option<&Collider> {
        self.colliders.get(collider_handle(surface))
    }

    /// Set the movement properties reported for hits against `surface`
    pub fn set_surface_props(
        &mut self,
        surface: SurfaceId,
        props: SurfaceProps,
    ) -> Result<(), PhysicsError> {
        let handle = collider_handle(surface);
        if self.colliders.get(handle).is_none() {
            return Err(PhysicsError::UnknownSurface(surface));
        }
        self.surface_props.insert(handle, props);
        Ok(())
    }

    pub(crate) fn props_of(&self, handle: ColliderHandle) -> SurfaceProps {
        self.surface_props.get(&handle).copied().unwrap_or_default()
    }

    /// Add an axis-aligned water volume
    pub fn add_water_volume(&mut self, min: Vec3, max: Vec3, volume: PhysicsVolume) {
        self.water_volumes.push(WaterVolume::new(min, max, volume));
    }

    pub(crate) fn water_volumes(&self) -> &[WaterVolume] {
        &self.water_volumes
    }

    fn body_of(&self, surface: SurfaceId) -> Result<RigidBodyHandle, PhysicsError> {
        self.colliders
            .get(collider_handle(surface))
            .ok_or(PhysicsError::UnknownSurface(surface))?
            .parent()
            .ok_or(PhysicsError::NoRigidBody(surface))
    }

    /// Teleport a kinematic body and set the velocity it reports to riders
    pub fn move_kinematic_body(
        &mut self,
        surface: SurfaceId,
        position: Vec3,
        rotation: Quat,
        linear_velocity: Vec3,
    ) -> Result<(), PhysicsError> {
        let handle = self.body_of(surface)?;
        if let Some(body) = self.bodies.get_mut(handle) {
            body.set_position(to_isometry(position, rotation), true);
            body.set_linvel(to_vector(linear_velocity), true);
        }
        self.bodies
            .propagate_modified_body_positions_to_colliders(&mut self.colliders);
        self.refresh_queries();
        Ok(())
    }

    /// Apply an instantaneous impulse to the body owning `surface`
    pub fn apply_impulse_at(
        &mut self,
        surface: SurfaceId,
        impulse: Vec3,
        point: Vec3,
    ) -> Result<(), PhysicsError> {
        let handle = self.body_of(surface)?;
        if let Some(body) = self.bodies.get_mut(handle) {
            if body.is_dynamic() {
                debug!(?surface, ?impulse, "applying movement impulse");
                body.apply_impulse_at_point(to_vector(impulse), to_point(point), true);
            }
        }
        Ok(())
    }

    /// Add a force for the next step to the body owning `surface`
    pub fn add_force_at(
        &mut self,
        surface: SurfaceId,
        force: Vec3,
        point: Vec3,
    ) -> Result<(), PhysicsError> {
        let handle = self.body_of(surface)?;
        if let Some(body) = self.bodies.get_mut(handle) {
            if body.is_dynamic() {
                body.add_force_at_point(to_vector(force), to_point(point), true);
            }
        }
        Ok(())
    }

    /// Flat ground at height `z`, solid below.
    pub fn create_ground(&mut self, z: f32) -> SurfaceId {
        self.create_plane(Vec3::new(0.0, 0.0, z), Vec3::Z)
    }

    /// Create an infinite plane through `point` whose solid side is opposite `normal`
    pub fn create_plane(&mut self, point: Vec3, normal: Vec3) -> SurfaceId {
        let plane = ColliderBuilder::halfspace(Unit::new_normalize(to_vector(normal)))
            .translation(to_vector(point))
            .build();
        self.insert_static(plane)
    }

    pub fn create_static_box(&mut self, half_extents: Vec3, position: Vec3) -> SurfaceId {
        self.create_rotated_box(half_extents, position, Quat::IDENTITY)
    }

    /// Static box with an orientation, for ramps and tilted walls
    pub fn create_rotated_box(
        &mut self,
        half_extents: Vec3,
        position: Vec3,
        rotation: Quat,
    ) -> SurfaceId {
        let collider = ColliderBuilder::cuboid(half_extents.x, half_extents.y, half_extents.z)
            .position(to_isometry(position, rotation))
            .build();
        self.insert_static(collider)
    }

    /// Kinematic box that characters can ride, moved with [`move_kinematic_body`](Self::move_kinematic_body)
    pub fn create_platform(&mut self, half_extents: Vec3, position: Vec3) -> SurfaceId {
        let body = RigidBodyBuilder::kinematic_position_based()
            .translation(to_vector(position))
            .build();
        let collider =
            ColliderBuilder::cuboid(half_extents.x, half_extents.y, half_extents.z).build();
        self.insert_body(body, collider)
    }

    /// Simulated box that characters push through impact forces
    pub fn create_dynamic_box(
        &mut self,
        half_extents: Vec3,
        position: Vec3,
        density: f32,
    ) -> SurfaceId {
        let body = RigidBodyBuilder::dynamic()
            .translation(to_vector(position))
            .build();
        let collider = ColliderBuilder::cuboid(half_extents.x, half_extents.y, half_extents.z)
            .density(density)
            .build();
        self.insert_body(body, collider)
    }
}

impl Default for PhysicsWorld {
    fn default() -> Self {
        Self::new()
    }
}
