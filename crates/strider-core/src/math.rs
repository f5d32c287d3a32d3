//! Vector and rotation helpers shared by the movement code
//!
//! All lengths are in centimetres. The helpers follow the conventions the
//! movement integrators rely on: normalizing a near-zero vector yields zero
//! instead of NaN, and clamps treat tiny limits as zero.

use glam::{Mat3, Quat, Vec3};

/// Generic "small" tolerance used by comparisons of positions and speeds.
pub const KINDA_SMALL: f32 = 1.0e-4;
/// Tolerance for squared-length checks before normalizing.
pub const SMALL: f32 = 1.0e-8;
/// Tolerance used when nudging time fractions.
pub const DELTA: f32 = 1.0e-5;
/// Dot product above which two unit normals are considered parallel (about 1 degree).
pub const THRESH_NORMALS_ARE_PARALLEL: f32 = 0.999_845;
/// Dot product below which two unit normals are considered orthogonal (about 89 degrees).
pub const THRESH_NORMALS_ARE_ORTHOGONAL: f32 = 0.017_455;

/// Normalize `v`, returning zero when its squared length is below [`SMALL`].
pub fn safe_normal(v: Vec3) -> Vec3 {
    let len_sq = v.length_squared();
    if len_sq == 1.0 {
        v
    } else if len_sq < SMALL {
        Vec3::ZERO
    } else {
        v / len_sq.sqrt()
    }
}

/// `1.0` for positive values, `-1.0` otherwise (zero included).
pub fn sign(value: f32) -> f32 {
    if value > 0.0 {
        1.0
    } else {
        -1.0
    }
}

/// Remove the component of `v` along `normal` (which must be unit length).
pub fn project_on_plane(v: Vec3, normal: Vec3) -> Vec3 {
    v - normal * v.dot(normal)
}

/// Clamp the length of `v` to `max`. A limit below [`KINDA_SMALL`] returns zero.
pub fn clamp_length_max(v: Vec3, max: f32) -> Vec3 {
    if max < KINDA_SMALL {
        return Vec3::ZERO;
    }
    let len_sq = v.length_squared();
    if len_sq > max * max {
        v * (max / len_sq.sqrt())
    } else {
        v
    }
}

/// True when every component of `v` is within `tolerance` of zero.
pub fn is_nearly_zero(v: Vec3, tolerance: f32) -> bool {
    v.x.abs() <= tolerance && v.y.abs() <= tolerance && v.z.abs() <= tolerance
}

/// True when `a` and `b` are within `tolerance` of each other.
pub fn nearly_equal(a: f32, b: f32, tolerance: f32) -> bool {
    (a - b).abs() <= tolerance
}

/// True when two vectors are equal within `tolerance` per component.
pub fn vectors_equal(a: Vec3, b: Vec3, tolerance: f32) -> bool {
    is_nearly_zero(a - b, tolerance)
}

/// Local X (forward) axis of a rotation.
pub fn quat_axis_x(q: Quat) -> Vec3 {
    q * Vec3::X
}

/// Local Z (up) axis of a rotation.
pub fn quat_axis_z(q: Quat) -> Vec3 {
    q * Vec3::Z
}

/// Build a rotation whose Z axis is `z` and whose X axis is as close to `x` as possible.
///
/// When the two inputs are (nearly) parallel an arbitrary perpendicular
/// forward axis is chosen so the result is always a valid rotation.
pub fn make_from_zx(z: Vec3, x: Vec3) -> Quat {
    let new_z = safe_normal(z);
    if new_z == Vec3::ZERO {
        return Quat::IDENTITY;
    }
    let mut norm = safe_normal(x);
    if nearly_equal(new_z.dot(norm).abs(), 1.0, KINDA_SMALL) || norm == Vec3::ZERO {
        norm = if new_z.z.abs() < 1.0 - KINDA_SMALL {
            Vec3::Z
        } else {
            Vec3::X
        };
    }
    let new_y = safe_normal(new_z.cross(norm));
    let new_x = new_y.cross(new_z);
    Quat::from_mat3(&Mat3::from_cols(new_x, new_y, new_z)).normalize()
}

/// Build a rotation whose Z axis is `z`, with an arbitrary but stable forward axis.
pub fn make_from_z(z: Vec3) -> Quat {
    let new_z = safe_normal(z);
    if new_z == Vec3::ZERO {
        return Quat::IDENTITY;
    }
    let up = if new_z.z.abs() < 1.0 - KINDA_SMALL {
        Vec3::Z
    } else {
        Vec3::X
    };
    let new_x = safe_normal(up.cross(new_z));
    let new_y = new_z.cross(new_x);
    Quat::from_mat3(&Mat3::from_cols(new_x, new_y, new_z)).normalize()
}

/// Rotate `v` by `angle` radians around the unit `axis`.
pub fn rotate_angle_axis(v: Vec3, angle: f32, axis: Vec3) -> Vec3 {
    Quat::from_axis_angle(axis, angle) * v
}

/// Parameter of the closest point on segment `[a, b]` to `point`, unclamped.
pub fn segment_alpha(point: Vec3, a: Vec3, b: Vec3) -> f32 {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq < SMALL {
        0.0
    } else {
        (point - a).dot(ab) / len_sq
    }
}

/// Closest point on segment `[a, b]` to `point`.
pub fn closest_point_on_segment(point: Vec3, a: Vec3, b: Vec3) -> Vec3 {
    a + (b - a) * segment_alpha(point, a, b).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_normal_zero() {
        assert_eq!(safe_normal(Vec3::ZERO), Vec3::ZERO);
        assert_eq!(safe_normal(Vec3::splat(1.0e-6)), Vec3::ZERO);
        let n = safe_normal(Vec3::new(3.0, 0.0, 4.0));
        assert!((n.length() - 1.0).abs() < 1.0e-6);
    }

    #[test]
    fn test_sign_treats_zero_as_negative() {
        assert_eq!(sign(3.5), 1.0);
        assert_eq!(sign(-0.1), -1.0);
        assert_eq!(sign(0.0), -1.0);
    }

    #[test]
    fn test_clamp_length_max() {
        let v = clamp_length_max(Vec3::new(10.0, 0.0, 0.0), 4.0);
        assert!((v.x - 4.0).abs() < 1.0e-5);
        assert_eq!(clamp_length_max(Vec3::X, 0.0), Vec3::ZERO);
        assert_eq!(clamp_length_max(Vec3::X, 2.0), Vec3::X);
    }

    #[test]
    fn test_make_from_zx_keeps_forward() {
        let q = make_from_zx(Vec3::Z, Vec3::new(1.0, 1.0, 0.0));
        let x = quat_axis_x(q);
        assert!((quat_axis_z(q) - Vec3::Z).length() < 1.0e-5);
        assert!((x - Vec3::new(1.0, 1.0, 0.0).normalize()).length() < 1.0e-5);
    }

    #[test]
    fn test_make_from_zx_parallel_inputs() {
        let q = make_from_zx(Vec3::Z, Vec3::Z);
        assert!((quat_axis_z(q) - Vec3::Z).length() < 1.0e-5);
        assert!(quat_axis_x(q).dot(Vec3::Z).abs() < 1.0e-5);
    }

    #[test]
    fn test_make_from_zx_sideways_up() {
        let q = make_from_zx(-Vec3::X, Vec3::X);
        assert!((quat_axis_z(q) + Vec3::X).length() < 1.0e-5);
        assert!(quat_axis_x(q).dot(Vec3::X).abs() < 1.0e-5);
    }

    #[test]
    fn test_project_on_plane() {
        let v = project_on_plane(Vec3::new(1.0, 2.0, 3.0), Vec3::Z);
        assert_eq!(v, Vec3::new(1.0, 2.0, 0.0));
    }

    #[test]
    fn test_segment_alpha() {
        let a = Vec3::ZERO;
        let b = Vec3::new(0.0, 0.0, 10.0);
        assert!((segment_alpha(Vec3::new(5.0, 0.0, 5.0), a, b) - 0.5).abs() < 1.0e-6);
        assert!(segment_alpha(Vec3::new(0.0, 0.0, -5.0), a, b) < 0.0);
    }
}
