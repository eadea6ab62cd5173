use super::animation_helpers::{
    align_hemisphere, euler_xyz_to_quat, quat_exp, quat_log, quat_slerp, quat_squad,
};
use super::error::{BlendError, Result};
use super::types::animation::{Key, KeyType};
use bevy::math::{Quat, Vec3};
use std::fmt::Debug;
use std::ops::{Add, Mul, Sub};

/// Values that interpolate as cubic Hermite splines (positions, scales, euler angles).
pub trait HermiteValue:
    Copy + Default + Add<Output = Self> + Sub<Output = Self> + Mul<f32, Output = Self>
{
}
impl<T> HermiteValue for T where
    T: Copy + Default + Add<Output = T> + Sub<Output = T> + Mul<f32, Output = T>
{
}

/// A value type a [`KeyTrack`] can be keyed with.
pub trait KeyValue: Copy + Debug {
    /// Value between `keys[index]` and `keys[index + 1]` at normalized time `t`.
    fn interpolate(keys: &[Key<Self>], kind: KeyType, index: usize, t: f32) -> Self;
}

impl KeyValue for f32 {
    fn interpolate(keys: &[Key<Self>], kind: KeyType, index: usize, t: f32) -> Self {
        interpolate_hermite(keys, kind, index, t)
    }
}

impl KeyValue for Vec3 {
    fn interpolate(keys: &[Key<Self>], kind: KeyType, index: usize, t: f32) -> Self {
        interpolate_hermite(keys, kind, index, t)
    }
}

impl KeyValue for Quat {
    fn interpolate(keys: &[Key<Self>], kind: KeyType, index: usize, t: f32) -> Self {
        interpolate_rotation(keys, kind, index, t)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Bracket {
    Key(usize),
    Between(usize, f32),
}

/// Time ordered keys of one channel. The search cursor lives with the caller so the
/// track itself can be shared between interpolators.
#[derive(Debug, Clone, Default)]
pub struct KeyTrack<T> {
    pub interpolation: KeyType,
    keys: Vec<Key<T>>,
}

impl<T: KeyValue> KeyTrack<T> {
    pub fn new(interpolation: KeyType, keys: Vec<Key<T>>) -> Result<Self> {
        if keys.iter().any(|key| !key.time.is_finite()) {
            return Err(BlendError::Configuration(
                "key track contains a non-finite key time".to_string(),
            ));
        }
        if keys.windows(2).any(|pair| pair[1].time < pair[0].time) {
            return Err(BlendError::Configuration(
                "key times must be non-decreasing".to_string(),
            ));
        }
        Ok(Self {
            interpolation,
            keys,
        })
    }

    /// Plain `(time, value)` keys interpolated with `interpolation`.
    pub fn from_pairs(interpolation: KeyType, pairs: &[(f32, T)]) -> Result<Self> {
        Self::new(
            interpolation,
            pairs.iter().map(|(time, value)| Key::new(*time, *value)).collect(),
        )
    }

    pub fn keys(&self) -> &[Key<T>] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn start_time(&self) -> Option<f32> {
        self.keys.first().map(|key| key.time)
    }

    pub fn end_time(&self) -> Option<f32> {
        self.keys.last().map(|key| key.time)
    }

    /// Moves the last key to `time` unless that would break the key ordering.
    pub fn retime_last_key(&mut self, time: f32) -> bool {
        let len = self.keys.len();
        if len == 0 || (len >= 2 && self.keys[len - 2].time > time) {
            return false;
        }
        self.keys[len - 1].time = time;
        true
    }

    /// Value at `time`. `cursor` caches the last bracket; queries are cheapest when
    /// time only moves forward.
    pub fn evaluate(&self, time: f32, cursor: &mut usize) -> Option<T> {
        debug_assert!(!self.keys.is_empty(), "evaluating an empty key track");
        match self.locate(time, cursor)? {
            Bracket::Key(index) => Some(self.keys[index].value),
            Bracket::Between(index, t) => {
                Some(T::interpolate(&self.keys, self.interpolation, index, t))
            }
        }
    }

    fn locate(&self, time: f32, cursor: &mut usize) -> Option<Bracket> {
        let len = self.keys.len();
        if len == 0 {
            return None;
        }
        if len == 1 || time <= self.keys[0].time {
            *cursor = 0;
            return Some(Bracket::Key(0));
        }
        let last = len - 1;
        if time >= self.keys[last].time {
            *cursor = last - 1;
            return Some(Bracket::Key(last));
        }

        let mut index = *cursor;
        if index >= last || time < self.keys[index].time {
            index = 0;
        }
        // Terminates because time < keys[last].time here.
        while self.keys[index + 1].time < time {
            index += 1;
        }
        *cursor = index;

        let start = self.keys[index].time;
        let span = self.keys[index + 1].time - start;
        let t = if span > 0.0 { (time - start) / span } else { 0.0 };
        Some(Bracket::Between(index, t))
    }
}

fn hermite<T: HermiteValue>(p0: T, m0: T, p1: T, m1: T, t: f32) -> T {
    let t2 = t * t;
    let t3 = t2 * t;
    p0 * (2.0 * t3 - 3.0 * t2 + 1.0)
        + m0 * (t3 - 2.0 * t2 + t)
        + p1 * (-2.0 * t3 + 3.0 * t2)
        + m1 * (t3 - t2)
}

/// Kochanek-Bartels weights `(outgoing_prev, outgoing_next, incoming_prev, incoming_next)`.
fn tbc_weights<T>(key: &Key<T>) -> (f32, f32, f32, f32) {
    let tension = key.tension.unwrap_or(0.0);
    let continuity = key.continuity.unwrap_or(0.0);
    let bias = key.bias.unwrap_or(0.0);
    let tm = 1.0 - tension;
    (
        0.5 * tm * (1.0 - continuity) * (1.0 + bias),
        0.5 * tm * (1.0 + continuity) * (1.0 - bias),
        0.5 * tm * (1.0 + continuity) * (1.0 + bias),
        0.5 * tm * (1.0 - continuity) * (1.0 - bias),
    )
}

/// Interval correction for uneven key spacing, `(outgoing, incoming)` factors.
fn interval_factors<T>(keys: &[Key<T>], index: usize) -> (f32, f32) {
    if index == 0 || index + 1 >= keys.len() {
        return (1.0, 1.0);
    }
    let dt_prev = keys[index].time - keys[index - 1].time;
    let dt_next = keys[index + 1].time - keys[index].time;
    let sum = dt_prev + dt_next;
    if sum <= 0.0 {
        return (1.0, 1.0);
    }
    (2.0 * dt_next / sum, 2.0 * dt_prev / sum)
}

/// `(incoming, outgoing)` tangents of a TBC key.
fn tbc_tangents<T: HermiteValue>(keys: &[Key<T>], index: usize) -> (T, T) {
    let key = &keys[index];
    let prev = index.checked_sub(1).map(|i| &keys[i]);
    let next = keys.get(index + 1);
    let (d_prev, d_next) = match (prev, next) {
        (Some(p), Some(n)) => (key.value - p.value, n.value - key.value),
        (None, Some(n)) => {
            let d = n.value - key.value;
            (d, d)
        }
        (Some(p), None) => {
            let d = key.value - p.value;
            (d, d)
        }
        (None, None) => (T::default(), T::default()),
    };
    let (out_prev, out_next, in_prev, in_next) = tbc_weights(key);
    let (out_scale, in_scale) = interval_factors(keys, index);
    let outgoing = (d_prev * out_prev + d_next * out_next) * out_scale;
    let incoming = (d_prev * in_prev + d_next * in_next) * in_scale;
    (incoming, outgoing)
}

fn interpolate_hermite<T: HermiteValue>(
    keys: &[Key<T>],
    kind: KeyType,
    index: usize,
    t: f32,
) -> T {
    let a = &keys[index];
    let b = &keys[index + 1];
    match kind {
        KeyType::Const => a.value,
        KeyType::Quadratic => hermite(
            a.value,
            a.forward_tangent.unwrap_or_default(),
            b.value,
            b.backward_tangent.unwrap_or_default(),
            t,
        ),
        KeyType::TBC => {
            let (_, out_a) = tbc_tangents(keys, index);
            let (in_b, _) = tbc_tangents(keys, index + 1);
            hermite(a.value, out_a, b.value, in_b, t)
        }
        KeyType::Linear | KeyType::XyzRotation | KeyType::Unknown(_) => {
            a.value + (b.value - a.value) * t
        }
    }
}

/// `(incoming, outgoing)` squad control points of a rotation key.
fn squad_controls(keys: &[Key<Quat>], index: usize) -> (Quat, Quat) {
    let key = &keys[index];
    let q = key.value.normalize();
    let inverse = q.inverse();
    let d_prev = index
        .checked_sub(1)
        .map(|i| -quat_log(inverse * align_hemisphere(q, keys[i].value.normalize())));
    let d_next = keys
        .get(index + 1)
        .map(|k| quat_log(inverse * align_hemisphere(q, k.value.normalize())));
    let (d_prev, d_next) = match (d_prev, d_next) {
        (Some(p), Some(n)) => (p, n),
        (None, Some(n)) => (n, n),
        (Some(p), None) => (p, p),
        (None, None) => return (q, q),
    };
    let (out_prev, out_next, in_prev, in_next) = tbc_weights(key);
    let (out_scale, in_scale) = interval_factors(keys, index);
    let outgoing_tangent = (d_prev * out_prev + d_next * out_next) * out_scale;
    let incoming_tangent = (d_prev * in_prev + d_next * in_next) * in_scale;
    let outgoing = q * quat_exp((outgoing_tangent - d_next) * 0.5);
    let incoming = q * quat_exp((d_prev - incoming_tangent) * 0.5);
    (incoming, outgoing)
}

fn interpolate_rotation(keys: &[Key<Quat>], kind: KeyType, index: usize, t: f32) -> Quat {
    let a = &keys[index];
    let b = &keys[index + 1];
    match kind {
        KeyType::Const => a.value.normalize(),
        KeyType::Quadratic | KeyType::TBC => {
            let (_, a_out) = squad_controls(keys, index);
            let (b_in, _) = squad_controls(keys, index + 1);
            let q0 = a.value.normalize();
            let sign = if q0.dot(b.value) < 0.0 { -1.0 } else { 1.0 };
            quat_squad(q0, a_out, b_in * sign, b.value.normalize() * sign, t)
        }
        KeyType::Linear | KeyType::XyzRotation | KeyType::Unknown(_) => {
            quat_slerp(a.value, b.value, t)
        }
    }
}

/// Per-axis cursors of an [`EulerRotation`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EulerCursor {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

/// XyzRotation keys: one float track per axis, composed X then Y then Z.
#[derive(Debug, Clone, Default)]
pub struct EulerRotation {
    pub x: KeyTrack<f32>,
    pub y: KeyTrack<f32>,
    pub z: KeyTrack<f32>,
}

impl EulerRotation {
    pub fn is_empty(&self) -> bool {
        self.x.is_empty() && self.y.is_empty() && self.z.is_empty()
    }

    pub fn end_time(&self) -> Option<f32> {
        [self.x.end_time(), self.y.end_time(), self.z.end_time()]
            .into_iter()
            .flatten()
            .reduce(f32::max)
    }

    pub fn evaluate(&self, time: f32, cursor: &mut EulerCursor) -> Quat {
        let axis = |track: &KeyTrack<f32>, cursor: &mut usize| {
            if track.is_empty() {
                0.0
            } else {
                track.evaluate(time, cursor).unwrap_or(0.0)
            }
        };
        let x = axis(&self.x, &mut cursor.x);
        let y = axis(&self.y, &mut cursor.y);
        let z = axis(&self.z, &mut cursor.z);
        euler_xyz_to_quat(x, y, z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    fn vec_close(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-4
    }

    fn quat_close(a: Quat, b: Quat) -> bool {
        a.dot(b).abs() > 1.0 - 1e-4
    }

    #[test]
    fn linear_midpoint() {
        let track = KeyTrack::from_pairs(
            KeyType::Linear,
            &[(0.0, Vec3::ZERO), (1.0, Vec3::new(10.0, 0.0, 0.0))],
        )
        .unwrap();
        let mut cursor = 0;
        let value = track.evaluate(0.5, &mut cursor).unwrap();
        assert!(vec_close(value, Vec3::new(5.0, 0.0, 0.0)), "got {value:?}");
    }

    #[test]
    fn single_key_ignores_time() {
        let track = KeyTrack::from_pairs(KeyType::Linear, &[(0.3, 2.0_f32)]).unwrap();
        let mut cursor = 0;
        assert_eq!(track.evaluate(-5.0, &mut cursor), Some(2.0));
        assert_eq!(track.evaluate(50.0, &mut cursor), Some(2.0));
    }

    #[test]
    fn queries_clamp_outside_the_key_range() {
        let track =
            KeyTrack::from_pairs(KeyType::Linear, &[(1.0, 1.0_f32), (2.0, 3.0)]).unwrap();
        let mut cursor = 0;
        assert_eq!(track.evaluate(0.0, &mut cursor), Some(1.0));
        assert_eq!(track.evaluate(9.0, &mut cursor), Some(3.0));
    }

    #[test]
    fn cursor_scans_forward_and_resets_backwards() {
        let track = KeyTrack::from_pairs(
            KeyType::Linear,
            &[(0.0, 0.0_f32), (1.0, 1.0), (2.0, 2.0), (3.0, 3.0)],
        )
        .unwrap();
        let mut cursor = 0;
        assert_eq!(track.evaluate(2.5, &mut cursor), Some(2.5));
        assert_eq!(cursor, 2);
        assert_eq!(track.evaluate(0.5, &mut cursor), Some(0.5));
        assert_eq!(cursor, 0);
    }

    #[test]
    fn evaluation_is_idempotent_for_the_same_time_sequence() {
        let track = KeyTrack::from_pairs(
            KeyType::TBC,
            &[(0.0, 0.0_f32), (0.4, 2.0), (1.0, -1.0), (1.5, 4.0)],
        )
        .unwrap();
        let times = [0.0, 0.1, 0.45, 0.45, 1.2, 1.5];
        let mut first_cursor = 0;
        let first: Vec<_> = times
            .iter()
            .map(|t| track.evaluate(*t, &mut first_cursor))
            .collect();
        let mut second_cursor = 0;
        let second: Vec<_> = times
            .iter()
            .map(|t| track.evaluate(*t, &mut second_cursor))
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn const_keys_step() {
        let track =
            KeyTrack::from_pairs(KeyType::Const, &[(0.0, 1.0_f32), (1.0, 5.0)]).unwrap();
        let mut cursor = 0;
        assert_eq!(track.evaluate(0.99, &mut cursor), Some(1.0));
        assert_eq!(track.evaluate(1.0, &mut cursor), Some(5.0));
    }

    #[test]
    fn tbc_with_collinear_keys_is_linear() {
        let track = KeyTrack::from_pairs(
            KeyType::TBC,
            &[(0.0, 0.0_f32), (1.0, 10.0), (2.0, 20.0)],
        )
        .unwrap();
        let mut cursor = 0;
        let value = track.evaluate(0.25, &mut cursor).unwrap();
        assert!((value - 2.5).abs() < 1e-4, "got {value}");
        let value = track.evaluate(1.5, &mut cursor).unwrap();
        assert!((value - 15.0).abs() < 1e-4, "got {value}");
    }

    #[test]
    fn quadratic_keys_use_tangents() {
        let flat = KeyTrack::new(
            KeyType::Quadratic,
            vec![Key::new(0.0, 0.0_f32), Key::new(1.0, 1.0)],
        )
        .unwrap();
        let mut cursor = 0;
        // Zero tangents give a smoothstep, symmetric at the midpoint.
        assert!((flat.evaluate(0.5, &mut cursor).unwrap() - 0.5).abs() < 1e-5);
        assert!(flat.evaluate(0.25, &mut cursor).unwrap() < 0.25);

        let steep = KeyTrack::new(
            KeyType::Quadratic,
            vec![
                Key::new(0.0, 0.0_f32).with_tangents(1.0, 1.0),
                Key::new(1.0, 1.0).with_tangents(1.0, 1.0),
            ],
        )
        .unwrap();
        assert!((steep.evaluate(0.25, &mut cursor).unwrap() - 0.25).abs() < 1e-5);
    }

    #[test]
    fn rotation_linear_slerps() {
        let track = KeyTrack::from_pairs(
            KeyType::Linear,
            &[(0.0, Quat::IDENTITY), (1.0, Quat::from_rotation_z(FRAC_PI_2))],
        )
        .unwrap();
        let mut cursor = 0;
        let value = track.evaluate(0.5, &mut cursor).unwrap();
        assert!(quat_close(value, Quat::from_rotation_z(FRAC_PI_2 / 2.0)));
    }

    #[test]
    fn rotation_squad_passes_through_keys() {
        let keys = [
            (0.0, Quat::IDENTITY),
            (1.0, Quat::from_rotation_x(0.8)),
            (2.0, Quat::from_rotation_y(0.6)),
        ];
        let track = KeyTrack::from_pairs(KeyType::TBC, &keys).unwrap();
        let mut cursor = 0;
        for (time, expected) in keys {
            assert!(quat_close(track.evaluate(time, &mut cursor).unwrap(), expected));
        }
        let between = track.evaluate(1.5, &mut cursor).unwrap();
        assert!((between.length() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn euler_rotation_composes_xyz() {
        let euler = EulerRotation {
            x: KeyTrack::from_pairs(KeyType::Linear, &[(0.0, 0.0), (1.0, 1.0)]).unwrap(),
            y: KeyTrack::default(),
            z: KeyTrack::from_pairs(KeyType::Linear, &[(0.0, 0.5)]).unwrap(),
        };
        let mut cursor = EulerCursor::default();
        let value = euler.evaluate(0.5, &mut cursor);
        let expected = Quat::from_rotation_x(0.5) * Quat::from_rotation_z(0.5);
        assert!(quat_close(value, expected));
        assert_eq!(euler.end_time(), Some(1.0));
    }

    #[test]
    fn rejects_decreasing_times() {
        let result = KeyTrack::from_pairs(KeyType::Linear, &[(1.0, 0.0_f32), (0.5, 1.0)]);
        assert!(matches!(result, Err(BlendError::Configuration(_))));
    }

    #[test]
    fn retime_last_key_keeps_ordering() {
        let mut track =
            KeyTrack::from_pairs(KeyType::Linear, &[(0.0, 0.0_f32), (0.8, 1.0)]).unwrap();
        assert!(track.retime_last_key(1.0));
        assert_eq!(track.end_time(), Some(1.0));
        assert!(!track.retime_last_key(-1.0));
    }
}
