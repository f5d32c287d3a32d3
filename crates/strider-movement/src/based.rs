//! Standing on and following movement bases

use glam::{Quat, Vec3};
use strider_core::math::{is_nearly_zero, KINDA_SMALL};
use strider_core::{CollisionWorld, QueryFilter, SurfaceId, Transform};
use tracing::debug;

use crate::character::CharacterMovement;
use crate::events::MovementEvent;

/// The surface a character stands on and where it stands relative to it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BasedMovement {
    pub base: Option<SurfaceId>,
    pub bone: Option<String>,
    /// Character location relative to the base origin
    pub location: Vec3,
    /// Character rotation relative to the base, or absolute when base rotation is ignored
    pub rotation: Quat,
    /// Base transform when the relative values were saved
    pub(crate) base_location: Vec3,
    pub(crate) base_rotation: Quat,
}

impl BasedMovement {
    /// Whether the saved location is relative to a base that can move.
    pub fn has_relative_location(&self, world: &dyn CollisionWorld) -> bool {
        self.base.is_some_and(|base| world.is_dynamic_base(base))
    }
}

impl CharacterMovement {
    pub fn based_movement(&self) -> &BasedMovement {
        &self.based
    }

    /// Change the base, saving its transform when a new one is set.
    pub fn set_base(&mut self, world: &dyn CollisionWorld, base: Option<SurfaceId>, bone: Option<String>) {
        if self.based.base == base && self.based.bone == bone {
            return;
        }
        self.based.base = base;
        self.based.bone = bone;
        if base.is_some() {
            self.save_base_location(world);
        } else {
            self.based.location = Vec3::ZERO;
            self.based.rotation = Quat::IDENTITY;
        }
    }

    /// Base on the current floor if it is walkable, otherwise clear the base.
    pub(crate) fn set_base_from_floor(&mut self, world: &dyn CollisionWorld) {
        if self.current_floor.is_walkable_floor() {
            let surface = self.current_floor.hit.surface;
            let bone = self.current_floor.hit.bone.clone();
            self.set_base(world, surface, bone);
        } else {
            self.set_base(world, None, None);
        }
    }

    /// Record where the character is relative to a moving base.
    pub fn save_base_location(&mut self, world: &dyn CollisionWorld) {
        if !self.has_valid_data() {
            return;
        }
        let Some(base) = self.based.base else {
            return;
        };
        if !world.is_dynamic_base(base) {
            return;
        }
        let Some((base_location, base_rotation)) = world.base_transform(base, self.based.bone.as_deref()) else {
            return;
        };

        self.based.base_location = base_location;
        self.based.base_rotation = base_rotation;
        self.based.location = self.location - base_location;
        self.based.rotation = if self.config.ignore_base_rotation {
            self.rotation
        } else {
            base_rotation.inverse() * self.rotation
        };
    }

    /// Carry the character along with its base's motion since the last save.
    pub(crate) fn update_based_movement(&mut self, world: &dyn CollisionWorld, _delta_time: f32) {
        if !self.has_valid_data() {
            return;
        }
        let Some(base) = self.based.base else {
            return;
        };
        let Some((new_location, new_rotation)) = world.base_transform(base, self.based.bone.as_deref()) else {
            debug!(?base, "base no longer exists");
            self.set_base(world, None, None);
            return;
        };
        if !world.is_dynamic_base(base) {
            return;
        }

        let old_location = self.based.base_location;
        let old_rotation = self.based.base_rotation;
        let rotation_changed = old_rotation.dot(new_rotation).abs() < 1.0 - 1.0e-8;
        if !rotation_changed && old_location == new_location {
            return;
        }

        let mut final_rotation = self.rotation;
        if rotation_changed && !self.config.ignore_base_rotation {
            let delta_rotation = new_rotation * old_rotation.inverse();
            final_rotation = (delta_rotation * self.rotation).normalize();
            if self.config.orient_rotation_to_movement {
                final_rotation = self.constrain_component_rotation(final_rotation);
            }
        }

        // The capsule bottom stays fixed relative to the base
        let base_offset = self.component_axis_z() * self.half_height;
        let old_base = Transform::from_position_rotation(old_location, old_rotation);
        let new_base = Transform::from_position_rotation(new_location, new_rotation);
        let local_bottom = old_base.inverse_transform_point(self.location - base_offset);
        let new_world_position = new_base.transform_point(local_bottom) + base_offset;
        let delta = new_world_position - self.location;

        let old = self.location;
        let hit = self.move_with_filter(world, delta, final_rotation, QueryFilter::ignoring(base), true);
        if !is_nearly_zero(self.location - (old + delta), KINDA_SMALL) {
            debug!(?delta, "unable to follow base");
            self.push_event(MovementEvent::UnableToFollowBase { delta, hit });
        }
    }

    /// Velocity the base passes on to the character when it leaves it.
    pub fn imparted_base_velocity(&self, world: &dyn CollisionWorld) -> Vec3 {
        let Some(base) = self.based.base else {
            return Vec3::ZERO;
        };
        if !world.is_dynamic_base(base) {
            return Vec3::ZERO;
        }

        let bone = self.based.bone.as_deref();
        let base_velocity = if self.config.impart_base_angular_velocity {
            let bottom = self.location - self.component_axis_z() * self.half_height;
            world.base_velocity_at(base, bone, bottom)
        } else {
            world.base_velocity(base, bone)
        };

        Vec3::new(
            if self.config.impart_base_velocity_x { base_velocity.x } else { 0.0 },
            if self.config.impart_base_velocity_y { base_velocity.y } else { 0.0 },
            if self.config.impart_base_velocity_z { base_velocity.z } else { 0.0 },
        )
    }
}
