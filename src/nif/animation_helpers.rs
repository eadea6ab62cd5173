use bevy::math::{Quat, Vec3, Vec4};

const QUAT_EPSILON: f32 = 1e-6;

/// Logarithm of a unit quaternion, returned as the rotation vector `axis * angle / 2`.
pub fn quat_log(q: Quat) -> Vec3 {
    let v = Vec3::new(q.x, q.y, q.z);
    let len = v.length();
    if len < QUAT_EPSILON {
        return Vec3::ZERO;
    }
    v / len * len.atan2(q.w)
}

/// Inverse of [`quat_log`].
pub fn quat_exp(v: Vec3) -> Quat {
    let angle = v.length();
    if angle < QUAT_EPSILON {
        return Quat::IDENTITY;
    }
    let s = angle.sin() / angle;
    Quat::from_xyzw(v.x * s, v.y * s, v.z * s, angle.cos()).normalize()
}

/// Flips `q` into the hemisphere of `reference` so interpolation takes the short path.
pub fn align_hemisphere(reference: Quat, q: Quat) -> Quat {
    if reference.dot(q) < 0.0 { -q } else { q }
}

// Shortest-path slerp. glam already picks the short arc, but the inputs are
// renormalized here because track data is not guaranteed to be unit length.
pub fn quat_slerp(a: Quat, b: Quat, t: f32) -> Quat {
    a.normalize().slerp(b.normalize(), t)
}

/// Spherical quadrangle interpolation between `q0` and `q1` with control points `a` and `b`.
pub fn quat_squad(q0: Quat, a: Quat, b: Quat, q1: Quat, t: f32) -> Quat {
    let outer = slerp_no_invert(q0, q1, t);
    let inner = slerp_no_invert(a, b, t);
    slerp_no_invert(outer, inner, 2.0 * t * (1.0 - t)).normalize()
}

// Squad needs the long arc preserved between its control points.
fn slerp_no_invert(a: Quat, b: Quat, t: f32) -> Quat {
    let dot = a.dot(b).clamp(-1.0, 1.0);
    if dot.abs() > 1.0 - QUAT_EPSILON {
        return lerp_quat(a, b, t);
    }
    let theta = dot.acos();
    let sin_theta = theta.sin();
    let wa = ((1.0 - t) * theta).sin() / sin_theta;
    let wb = (t * theta).sin() / sin_theta;
    Quat::from_vec4(Vec4::from(a) * wa + Vec4::from(b) * wb)
}

fn lerp_quat(a: Quat, b: Quat, t: f32) -> Quat {
    Quat::from_vec4(Vec4::from(a).lerp(Vec4::from(b), t)).normalize()
}

/// Rotation taking `reference` to `value`, on the short path.
pub fn relative_rotation(reference: Quat, value: Quat) -> Quat {
    let delta = (reference.inverse() * value).normalize();
    if delta.w < 0.0 { -delta } else { delta }
}

/// Euler XYZ composition used by NIF XyzRotation keys.
pub fn euler_xyz_to_quat(x: f32, y: f32, z: f32) -> Quat {
    Quat::from_rotation_x(x) * Quat::from_rotation_y(y) * Quat::from_rotation_z(z)
}
