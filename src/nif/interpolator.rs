use super::error::{BlendError, Result};
use super::key_track::EulerCursor;
use super::types::{InterpolatorId, NiKeyframeData, NiQuatTransform, RotationKeys};
use bevy::log::debug;
use generational_arena::Arena;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default)]
pub struct KeyframeCursors {
    rotation: usize,
    euler: EulerCursor,
    translation: usize,
    scale: usize,
}

#[derive(Debug, Clone)]
pub enum InterpolatorKind {
    Keyframe {
        data: Arc<NiKeyframeData>,
        cursors: KeyframeCursors,
    },
    /// Frozen transform, valid for any time.
    Pose(NiQuatTransform),
}

/// Produces a transform for a time. Keyframe data is shared, cursors are per instance.
#[derive(Debug, Clone)]
pub struct NiInterpolator {
    kind: InterpolatorKind,
    last: Option<(f32, NiQuatTransform)>,
}

impl NiInterpolator {
    pub fn keyframe(data: Arc<NiKeyframeData>) -> Self {
        Self {
            kind: InterpolatorKind::Keyframe {
                data,
                cursors: KeyframeCursors::default(),
            },
            last: None,
        }
    }

    pub fn pose(transform: NiQuatTransform) -> Self {
        Self {
            kind: InterpolatorKind::Pose(transform),
            last: None,
        }
    }

    pub fn kind(&self) -> &InterpolatorKind {
        &self.kind
    }

    pub fn is_pose(&self) -> bool {
        matches!(self.kind, InterpolatorKind::Pose(_))
    }

    pub fn keyframe_data(&self) -> Option<&Arc<NiKeyframeData>> {
        match &self.kind {
            InterpolatorKind::Keyframe { data, .. } => Some(data),
            InterpolatorKind::Pose(_) => None,
        }
    }

    /// Transform at `time`. Channels without keys stay unset; an interpolator with no
    /// data at all returns [`NiQuatTransform::INVALID`].
    pub fn evaluate(&mut self, time: f32) -> NiQuatTransform {
        if let Some((last_time, value)) = self.last {
            if last_time == time {
                return value;
            }
        }
        let value = match &mut self.kind {
            InterpolatorKind::Pose(transform) => *transform,
            InterpolatorKind::Keyframe { data, cursors } => {
                debug_assert!(!data.is_empty(), "keyframe interpolator without keys");
                if data.is_empty() {
                    debug!("keyframe interpolator queried without keys at {time}");
                }
                evaluate_keyframes(data, cursors, time)
            }
        };
        self.last = Some((time, value));
        value
    }
}

fn evaluate_keyframes(
    data: &NiKeyframeData,
    cursors: &mut KeyframeCursors,
    time: f32,
) -> NiQuatTransform {
    let rotate = match &data.rotations {
        Some(RotationKeys::Quaternion(track)) if !track.is_empty() => {
            track.evaluate(time, &mut cursors.rotation)
        }
        Some(RotationKeys::Euler(euler)) if !euler.is_empty() => {
            Some(euler.evaluate(time, &mut cursors.euler))
        }
        _ => None,
    };
    let translate = if data.translations.is_empty() {
        None
    } else {
        data.translations.evaluate(time, &mut cursors.translation)
    };
    let scale = if data.scales.is_empty() {
        None
    } else {
        data.scales.evaluate(time, &mut cursors.scale)
    };
    NiQuatTransform {
        translate,
        rotate: rotate.map(|q| q.normalize()),
        scale,
    }
}

#[derive(Debug)]
struct PooledInterpolator {
    interpolator: NiInterpolator,
    refs: usize,
}

/// Reference counted interpolators addressed by generational handles.
#[derive(Debug, Default)]
pub struct InterpolatorPool {
    arena: Arena<PooledInterpolator>,
}

impl InterpolatorPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `interpolator` with one reference.
    pub fn insert(&mut self, interpolator: NiInterpolator) -> InterpolatorId {
        InterpolatorId(self.arena.insert(PooledInterpolator {
            interpolator,
            refs: 1,
        }))
    }

    pub fn retain(&mut self, id: InterpolatorId) -> bool {
        match self.arena.get_mut(id.0) {
            Some(pooled) => {
                pooled.refs += 1;
                true
            }
            None => false,
        }
    }

    /// Drops one reference; returns true when the interpolator was freed.
    pub fn release(&mut self, id: InterpolatorId) -> bool {
        let Some(pooled) = self.arena.get_mut(id.0) else {
            return false;
        };
        pooled.refs = pooled.refs.saturating_sub(1);
        if pooled.refs == 0 {
            self.arena.remove(id.0);
            return true;
        }
        false
    }

    pub fn contains(&self, id: InterpolatorId) -> bool {
        self.arena.contains(id.0)
    }

    pub fn get(&self, id: InterpolatorId) -> Option<&NiInterpolator> {
        self.arena.get(id.0).map(|pooled| &pooled.interpolator)
    }

    pub fn get_mut(&mut self, id: InterpolatorId) -> Option<&mut NiInterpolator> {
        self.arena.get_mut(id.0).map(|pooled| &mut pooled.interpolator)
    }

    /// Evaluates `id`, or returns an invalid transform for a stale handle.
    pub fn evaluate(&mut self, id: InterpolatorId, time: f32) -> NiQuatTransform {
        self.get_mut(id)
            .map(|interpolator| interpolator.evaluate(time))
            .unwrap_or(NiQuatTransform::INVALID)
    }

    /// Like [`Self::evaluate`], but a missing or released handle is an error.
    pub fn try_evaluate(&mut self, id: InterpolatorId, time: f32) -> Result<NiQuatTransform> {
        self.get_mut(id)
            .map(|interpolator| interpolator.evaluate(time))
            .ok_or_else(|| {
                BlendError::InvalidInterpolatorQuery(format!(
                    "no interpolator for handle {:?} at time {time}",
                    id.0
                ))
            })
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }
}
