//! Gravity sources and their replication
//!
//! A character's gravity comes from one of three sources, in priority order:
//! a custom direction, an attractor point, or the world's default Z gravity.
//! The magnitude always comes from the world gravity scaled by
//! `gravity_scale`; the scale's sign can flip the direction.

use glam::Vec3;
use serde::{Deserialize, Serialize};
use strider_core::math::{safe_normal, sign};

use crate::config::MovementConfig;

/// Gravity change sent from the authority to remote copies of a character.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum GravityMessage {
    SetCustomDirection(Vec3),
    ClearCustomDirection,
    SetPoint(Vec3),
    ClearPoint,
    SetScale(f32),
}

#[derive(Debug, Clone)]
pub struct GravityModel {
    world_gravity_z: f32,
    scale: f32,
    custom_direction: Vec3,
    point: Option<Vec3>,
    replication_disabled: bool,

    dirty_custom_direction: bool,
    sent_point: Option<Vec3>,
    sent_scale: f32,
    outbox: Vec<GravityMessage>,
}

impl GravityModel {
    pub fn new(config: &MovementConfig) -> Self {
        let custom_direction = safe_normal(config.custom_gravity_direction);
        Self {
            world_gravity_z: config.world_gravity_z,
            scale: config.gravity_scale,
            custom_direction,
            point: config.gravity_point,
            replication_disabled: config.disable_gravity_replication,
            dirty_custom_direction: custom_direction != Vec3::ZERO,
            sent_point: None,
            sent_scale: 1.0,
            outbox: Vec::new(),
        }
    }

    /// Gravity acceleration at `location`.
    pub fn gravity(&self, location: Vec3) -> Vec3 {
        let magnitude = self.world_gravity_z.abs() * self.scale;
        if self.custom_direction != Vec3::ZERO {
            return self.custom_direction * magnitude;
        }
        if let Some(point) = self.point {
            let toward = point - location;
            if toward != Vec3::ZERO {
                return safe_normal(toward) * magnitude;
            }
        }
        Vec3::new(0.0, 0.0, self.world_gravity_z * self.scale)
    }

    /// Unit gravity direction at `location`.
    ///
    /// With `avoid_zero` the result is never zero, even when the scale or
    /// world gravity is zero.
    pub fn direction(&self, location: Vec3, avoid_zero: bool) -> Vec3 {
        if self.scale != 0.0 {
            let scale_sign = sign(self.scale);
            if self.custom_direction != Vec3::ZERO {
                return self.custom_direction * scale_sign;
            }
            if let Some(point) = self.point {
                let toward = point - location;
                if !avoid_zero || toward != Vec3::ZERO {
                    return safe_normal(toward) * scale_sign;
                }
            }
            if avoid_zero || self.world_gravity_z != 0.0 {
                return Vec3::new(0.0, 0.0, sign(self.world_gravity_z) * scale_sign);
            }
        } else if avoid_zero {
            if self.custom_direction != Vec3::ZERO {
                return self.custom_direction;
            }
            if let Some(point) = self.point {
                let toward = point - location;
                if toward != Vec3::ZERO {
                    return safe_normal(toward);
                }
            }
            return Vec3::new(0.0, 0.0, sign(self.world_gravity_z));
        }
        Vec3::ZERO
    }

    pub fn magnitude(&self) -> f32 {
        (self.world_gravity_z * self.scale).abs()
    }

    pub fn world_gravity_z(&self) -> f32 {
        self.world_gravity_z
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn custom_direction(&self) -> Vec3 {
        self.custom_direction
    }

    pub fn point(&self) -> Option<Vec3> {
        self.point
    }

    /// Set the custom direction. A zero vector falls back to the other sources.
    pub fn set_direction(&mut self, direction: Vec3) {
        self.set_custom_direction(safe_normal(direction));
    }

    fn set_custom_direction(&mut self, direction: Vec3) {
        if self.custom_direction != direction {
            self.dirty_custom_direction = true;
        }
        self.custom_direction = direction;
    }

    pub fn set_point(&mut self, point: Option<Vec3>) {
        self.point = point;
    }

    pub fn set_scale(&mut self, scale: f32) {
        self.scale = scale;
    }

    /// Point gravity at `-floor_normal`, used by align-custom-gravity-to-floor.
    pub fn align_to_floor(&mut self, floor_impact_normal: Vec3) {
        self.set_custom_direction(-floor_impact_normal);
    }

    /// Queue replication of whatever changed since the last call.
    ///
    /// At most one message per source is queued, so several changes between
    /// updates collapse into one.
    pub fn replicate(&mut self) {
        if self.replication_disabled {
            return;
        }
        if self.dirty_custom_direction {
            self.outbox.push(if self.custom_direction != Vec3::ZERO {
                GravityMessage::SetCustomDirection(self.custom_direction)
            } else {
                GravityMessage::ClearCustomDirection
            });
            self.dirty_custom_direction = false;
        }
        if self.sent_point != self.point {
            self.outbox.push(match self.point {
                Some(point) => GravityMessage::SetPoint(point),
                None => GravityMessage::ClearPoint,
            });
            self.sent_point = self.point;
        }
        if self.sent_scale != self.scale {
            self.outbox.push(GravityMessage::SetScale(self.scale));
            self.sent_scale = self.scale;
        }
    }

    /// Take the queued replication messages.
    pub fn drain_messages(&mut self) -> Vec<GravityMessage> {
        std::mem::take(&mut self.outbox)
    }

    /// Apply a message received from the authority.
    pub fn apply_message(&mut self, message: GravityMessage) {
        match message {
            GravityMessage::SetCustomDirection(direction) => self.set_custom_direction(direction),
            GravityMessage::ClearCustomDirection => self.set_custom_direction(Vec3::ZERO),
            GravityMessage::SetPoint(point) => self.point = Some(point),
            GravityMessage::ClearPoint => self.point = None,
            GravityMessage::SetScale(scale) => self.scale = scale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> GravityModel {
        GravityModel::new(&MovementConfig::default())
    }

    #[test]
    fn test_world_default() {
        let gravity = model();
        assert_eq!(gravity.gravity(Vec3::ZERO), Vec3::new(0.0, 0.0, -980.0));
        assert_eq!(gravity.direction(Vec3::ZERO, false), -Vec3::Z);
        assert_eq!(gravity.magnitude(), 980.0);
    }

    #[test]
    fn test_custom_direction_is_normalized() {
        let mut gravity = model();
        gravity.set_direction(Vec3::new(2.0, 0.0, 0.0));
        assert_eq!(gravity.direction(Vec3::ZERO, true), Vec3::X);
        assert!((gravity.gravity(Vec3::ZERO) - Vec3::new(980.0, 0.0, 0.0)).length() < 1.0e-3);
        gravity.set_direction(Vec3::ZERO);
        assert_eq!(gravity.direction(Vec3::ZERO, true), -Vec3::Z);
    }

    #[test]
    fn test_point_gravity() {
        let mut gravity = model();
        gravity.set_point(Some(Vec3::new(0.0, 0.0, -1000.0)));
        let dir = gravity.direction(Vec3::new(1000.0, 0.0, -1000.0), true);
        assert!((dir + Vec3::X).length() < 1.0e-5);
        // At the attractor itself only the avoid-zero variant falls back
        assert_eq!(gravity.direction(Vec3::new(0.0, 0.0, -1000.0), false), Vec3::ZERO);
        assert_eq!(gravity.direction(Vec3::new(0.0, 0.0, -1000.0), true), -Vec3::Z);
    }

    #[test]
    fn test_negative_scale_flips_direction() {
        let mut gravity = model();
        gravity.set_scale(-1.0);
        assert_eq!(gravity.direction(Vec3::ZERO, false), Vec3::Z);
        assert_eq!(gravity.gravity(Vec3::ZERO), Vec3::new(0.0, 0.0, 980.0));
    }

    #[test]
    fn test_avoid_zero_always_unit() {
        let mut gravity = model();
        gravity.set_scale(0.0);
        assert_eq!(gravity.direction(Vec3::ZERO, false), Vec3::ZERO);
        let dir = gravity.direction(Vec3::ZERO, true);
        assert!((dir.length() - 1.0).abs() < 1.0e-6);

        let config = MovementConfig {
            world_gravity_z: 0.0,
            ..Default::default()
        };
        let zero_world = GravityModel::new(&config);
        assert_eq!(zero_world.direction(Vec3::ZERO, false), Vec3::ZERO);
        assert_eq!(zero_world.direction(Vec3::ZERO, true), -Vec3::Z);
    }

    #[test]
    fn test_replication_coalesces_changes() {
        let mut gravity = model();
        gravity.set_direction(Vec3::X);
        gravity.set_direction(Vec3::Y);
        gravity.set_point(Some(Vec3::ONE));
        gravity.set_scale(2.0);
        gravity.replicate();
        let messages = gravity.drain_messages();
        assert_eq!(
            messages,
            vec![
                GravityMessage::SetCustomDirection(Vec3::Y),
                GravityMessage::SetPoint(Vec3::ONE),
                GravityMessage::SetScale(2.0),
            ]
        );

        gravity.replicate();
        assert!(gravity.drain_messages().is_empty());

        gravity.set_direction(Vec3::ZERO);
        gravity.set_point(None);
        gravity.replicate();
        assert_eq!(
            gravity.drain_messages(),
            vec![GravityMessage::ClearCustomDirection, GravityMessage::ClearPoint]
        );
    }

    #[test]
    fn test_replication_disabled() {
        let config = MovementConfig {
            disable_gravity_replication: true,
            ..Default::default()
        };
        let mut gravity = GravityModel::new(&config);
        gravity.set_direction(Vec3::X);
        gravity.replicate();
        assert!(gravity.drain_messages().is_empty());
    }

    #[test]
    fn test_apply_message() {
        let mut gravity = model();
        gravity.apply_message(GravityMessage::SetCustomDirection(Vec3::X));
        gravity.apply_message(GravityMessage::SetScale(0.5));
        assert_eq!(gravity.direction(Vec3::ZERO, true), Vec3::X);
        assert!((gravity.gravity(Vec3::ZERO).x - 490.0).abs() < 1.0e-3);
        gravity.apply_message(GravityMessage::ClearCustomDirection);
        assert_eq!(gravity.direction(Vec3::ZERO, true), -Vec3::Z);
    }
}
