//! Root motion: velocity driven by animation or by timed motion sources

use glam::Vec3;
use strider_core::math::{project_on_plane, SMALL};
use strider_core::CollisionWorld;

use crate::character::CharacterMovement;
use crate::mode::MovementMode;

/// How a root motion source combines with the simulated velocity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootMotionBlend {
    /// Replaces the velocity
    Override,
    /// Added on top of the velocity, then removed again next tick
    Additive,
}

/// A constant velocity applied for a limited time.
#[derive(Debug, Clone, PartialEq)]
pub struct RootMotionSource {
    pub name: String,
    pub velocity: Vec3,
    pub blend: RootMotionBlend,
    /// Seconds left; a negative duration never expires
    pub remaining: f32,
}

impl RootMotionSource {
    pub fn new(name: impl Into<String>, velocity: Vec3, blend: RootMotionBlend, duration: f32) -> Self {
        Self {
            name: name.into(),
            velocity,
            blend,
            remaining: duration,
        }
    }

    fn finished(&self) -> bool {
        self.remaining == 0.0 || (self.remaining > 0.0 && self.remaining <= SMALL)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RootMotionState {
    /// World-space velocity extracted from animation this tick
    anim_velocity: Option<Vec3>,
    sources: Vec<RootMotionSource>,
    pre_additive_velocity: Vec3,
    additive_applied: bool,
}

impl RootMotionState {
    pub fn has_anim_root_motion(&self) -> bool {
        self.anim_velocity.is_some()
    }

    pub fn has_override_velocity(&self) -> bool {
        self.sources.iter().any(|source| source.blend == RootMotionBlend::Override)
    }

    pub fn has_additive_velocity(&self) -> bool {
        self.sources.iter().any(|source| source.blend == RootMotionBlend::Additive)
    }

    pub fn sources(&self) -> &[RootMotionSource] {
        &self.sources
    }

    /// Drop expired sources and spend `delta_time` of the rest.
    fn prepare(&mut self, delta_time: f32) {
        self.sources.retain(|source| !source.finished());
        for source in &mut self.sources {
            if source.remaining > 0.0 {
                source.remaining = (source.remaining - delta_time).max(0.0);
            }
        }
    }

    /// Last override source wins.
    fn override_velocity(&self) -> Option<Vec3> {
        self.sources
            .iter()
            .rev()
            .find(|source| source.blend == RootMotionBlend::Override)
            .map(|source| source.velocity)
    }

    fn additive_velocity(&self) -> Vec3 {
        self.sources
            .iter()
            .filter(|source| source.blend == RootMotionBlend::Additive)
            .map(|source| source.velocity)
            .sum()
    }
}

impl CharacterMovement {
    pub fn root_motion(&self) -> &RootMotionState {
        &self.root_motion
    }

    /// Set or clear the animation root motion velocity for the next ticks.
    ///
    /// Animation root motion takes precedence over every source.
    pub fn set_anim_root_motion_velocity(&mut self, velocity: Option<Vec3>) {
        self.root_motion.anim_velocity = velocity;
    }

    pub fn add_root_motion_source(&mut self, source: RootMotionSource) {
        self.root_motion.sources.push(source);
    }

    /// Remove every source with the given name. Returns whether any was removed.
    pub fn remove_root_motion_source(&mut self, name: &str) -> bool {
        let before = self.root_motion.sources.len();
        self.root_motion.sources.retain(|source| source.name != name);
        before != self.root_motion.sources.len()
    }

    /// Whether root motion replaces the simulated velocity this tick.
    pub(crate) fn root_motion_overrides_velocity(&self) -> bool {
        self.root_motion.has_anim_root_motion() || self.root_motion.has_override_velocity()
    }

    /// Advance the sources and apply overriding root motion before the mode runs.
    pub(crate) fn apply_root_motion_override(&mut self, delta_time: f32) {
        self.root_motion.prepare(delta_time);
        if delta_time <= 0.0 {
            return;
        }
        if let Some(anim_velocity) = self.root_motion.anim_velocity {
            self.velocity = self.constrain_anim_root_motion_velocity(anim_velocity, self.velocity);
        } else if let Some(override_velocity) = self.root_motion.override_velocity() {
            self.velocity = override_velocity;
        }
    }

    /// Remove the additive velocity applied last sub-step.
    pub(crate) fn restore_pre_additive_root_motion_velocity(&mut self) {
        if self.root_motion.additive_applied {
            self.velocity = self.root_motion.pre_additive_velocity;
            self.root_motion.additive_applied = false;
        }
    }

    /// Apply root motion to the velocity computed by a mode.
    ///
    /// Grounded characters lift off when root motion pushes up harder than
    /// gravity pulls over the tick.
    pub(crate) fn apply_root_motion_to_velocity(&mut self, world: &dyn CollisionWorld, delta_time: f32) {
        if let Some(anim_velocity) = self.root_motion.anim_velocity {
            if delta_time > 0.0 {
                self.velocity = self.constrain_anim_root_motion_velocity(anim_velocity, self.velocity);
            }
            return;
        }

        let old_velocity = self.velocity;
        let mut applied = false;

        if let Some(override_velocity) = self.root_motion.override_velocity() {
            self.velocity = override_velocity;
            applied = true;
        }

        if self.root_motion.has_additive_velocity() {
            self.root_motion.pre_additive_velocity = self.velocity;
            self.velocity += self.root_motion.additive_velocity();
            self.root_motion.additive_applied = true;
            applied = true;
        }

        if applied && self.is_moving_on_ground() {
            let lift = (self.velocity - old_velocity).dot(self.component_axis_z());
            let liftoff_bound = (self.gravity_magnitude() * delta_time).max(SMALL);
            if lift > liftoff_bound {
                self.set_movement_mode(world, MovementMode::Falling);
            }
        }
    }

    /// Animation root motion keeps the velocity along capsule up while falling.
    pub fn constrain_anim_root_motion_velocity(&self, root_motion_velocity: Vec3, current_velocity: Vec3) -> Vec3 {
        if self.is_falling() {
            let up = self.component_axis_z();
            project_on_plane(root_motion_velocity, up) + up * current_velocity.dot(up)
        } else {
            root_motion_velocity
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MovementConfig;
    use strider_physics::PhysicsWorld;

    fn walker() -> (PhysicsWorld, CharacterMovement) {
        let mut world = PhysicsWorld::new();
        world.create_ground(0.0);
        world.refresh_queries();
        let mut character = CharacterMovement::new(MovementConfig::default());
        character.initialize(&world, Vec3::new(0.0, 0.0, 90.15));
        (world, character)
    }

    #[test]
    fn test_source_expires() {
        let (world, mut character) = walker();
        character.add_root_motion_source(RootMotionSource::new(
            "lunge",
            Vec3::new(900.0, 0.0, 0.0),
            RootMotionBlend::Override,
            0.05,
        ));
        for _ in 0..3 {
            character.tick(&world, 1.0 / 60.0);
        }
        assert!(character.root_motion().has_override_velocity());
        character.tick(&world, 1.0 / 60.0);
        assert!(!character.root_motion().has_override_velocity());
    }

    #[test]
    fn test_override_drives_walking() {
        let (world, mut character) = walker();
        character.add_root_motion_source(RootMotionSource::new(
            "lunge",
            Vec3::new(900.0, 0.0, 0.0),
            RootMotionBlend::Override,
            -1.0,
        ));
        character.tick(&world, 0.1);
        assert!((character.location().x - 90.0).abs() < 0.5, "x = {}", character.location().x);
        assert_eq!(character.velocity(), Vec3::new(900.0, 0.0, 0.0));
        assert!(character.remove_root_motion_source("lunge"));
        assert!(!character.remove_root_motion_source("lunge"));
    }

    #[test]
    fn test_anim_root_motion_moves_walker() {
        let (world, mut character) = walker();
        character.set_anim_root_motion_velocity(Some(Vec3::new(200.0, 0.0, 0.0)));
        character.tick(&world, 0.1);
        assert!(character.is_walking());
        assert!((character.location().x - 20.0).abs() < 0.5, "x = {}", character.location().x);

        character.set_anim_root_motion_velocity(None);
        assert!(!character.root_motion().has_anim_root_motion());
    }

    #[test]
    fn test_additive_is_restored() {
        let (world, mut character) = walker();
        character.root_motion.sources.push(RootMotionSource::new(
            "push",
            Vec3::new(0.0, 100.0, 0.0),
            RootMotionBlend::Additive,
            -1.0,
        ));
        character.velocity = Vec3::new(50.0, 0.0, 0.0);
        character.apply_root_motion_to_velocity(&world, 0.1);
        assert_eq!(character.velocity(), Vec3::new(50.0, 100.0, 0.0));
        character.restore_pre_additive_root_motion_velocity();
        assert_eq!(character.velocity(), Vec3::new(50.0, 0.0, 0.0));
    }

    #[test]
    fn test_upward_root_motion_lifts_off() {
        let (world, mut character) = walker();
        character.root_motion.sources.push(RootMotionSource::new(
            "lift",
            Vec3::new(0.0, 0.0, 500.0),
            RootMotionBlend::Override,
            -1.0,
        ));
        character.apply_root_motion_to_velocity(&world, 1.0 / 60.0);
        assert_eq!(character.mode(), MovementMode::Falling);
    }

    #[test]
    fn test_anim_root_motion_keeps_fall_speed() {
        let world = PhysicsWorld::new();
        let mut character = CharacterMovement::new(MovementConfig::default());
        character.set_movement_mode(&world, MovementMode::Falling);
        character.velocity = Vec3::new(0.0, 0.0, -300.0);
        let constrained = character.constrain_anim_root_motion_velocity(Vec3::new(200.0, 0.0, 50.0), character.velocity);
        assert_eq!(constrained, Vec3::new(200.0, 0.0, -300.0));
    }
}
