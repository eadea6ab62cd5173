use super::base::NiQuatTransform;
use super::extra_data::TextKeyList;
use crate::nif::error::{BlendError, Result};
use crate::nif::key_track::{EulerRotation, KeyTrack};
use bevy::math::{Quat, Vec3};
use std::fmt::Debug;
use std::sync::Arc;

pub type Quaternion = Quat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyType {
    // Interpolation type for keys
    #[default]
    Linear,
    Quadratic,   // Bezier interpolation
    TBC,         // Tension Bias Continuity interpolation
    XyzRotation, // Euler angles, only meaningful for rotation data
    Const,       // Step function - value is constant between keys
    Unknown(u32),
}

impl From<u32> for KeyType {
    fn from(value: u32) -> Self {
        match value {
            1 => KeyType::Linear,
            2 => KeyType::Quadratic,
            3 => KeyType::TBC,
            4 => KeyType::XyzRotation,
            5 => KeyType::Const,
            _ => KeyType::Unknown(value),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Key<T> {
    pub time: f32,
    pub value: T,
    pub forward_tangent: Option<T>,  // For Quadratic keys
    pub backward_tangent: Option<T>, // For Quadratic keys
    pub tension: Option<f32>,        // For TBC keys
    pub bias: Option<f32>,           // For TBC keys
    pub continuity: Option<f32>,     // For TBC keys
}

impl<T> Key<T> {
    pub fn new(time: f32, value: T) -> Self {
        Self {
            time,
            value,
            forward_tangent: None,
            backward_tangent: None,
            tension: None,
            bias: None,
            continuity: None,
        }
    }

    pub fn with_tangents(mut self, forward: T, backward: T) -> Self {
        self.forward_tangent = Some(forward);
        self.backward_tangent = Some(backward);
        self
    }

    pub fn with_tbc(mut self, tension: f32, bias: f32, continuity: f32) -> Self {
        self.tension = Some(tension);
        self.bias = Some(bias);
        self.continuity = Some(continuity);
        self
    }
}

pub type KeyFloat = Key<f32>;
pub type KeyVec3 = Key<Vec3>;
pub type KeyQuaternion = Key<Quaternion>;

#[derive(Debug, Clone)]
pub enum RotationKeys {
    Quaternion(KeyTrack<Quaternion>),
    Euler(EulerRotation),
}

impl RotationKeys {
    pub fn is_empty(&self) -> bool {
        match self {
            RotationKeys::Quaternion(track) => track.is_empty(),
            RotationKeys::Euler(euler) => euler.is_empty(),
        }
    }
}

/// Keyframe data of one controlled node. Immutable once loaded, shared by `Arc`.
#[derive(Debug, Clone, Default)]
pub struct NiKeyframeData {
    pub rotations: Option<RotationKeys>,
    pub translations: KeyTrack<Vec3>,
    pub scales: KeyTrack<f32>,
}

impl NiKeyframeData {
    pub fn is_empty(&self) -> bool {
        self.translations.is_empty()
            && self.scales.is_empty()
            && self.rotations.as_ref().is_none_or(RotationKeys::is_empty)
    }

    /// Time of the last key over all channels.
    pub fn last_key_time(&self) -> Option<f32> {
        let rotation_end = match &self.rotations {
            Some(RotationKeys::Quaternion(track)) => track.end_time(),
            Some(RotationKeys::Euler(euler)) => euler.end_time(),
            None => None,
        };
        [
            rotation_end,
            self.translations.end_time(),
            self.scales.end_time(),
        ]
        .into_iter()
        .flatten()
        .reduce(f32::max)
    }

    /// Moves the last key of every track to `time`. Tracks whose previous key lies
    /// after `time` are left alone; returns how many tracks were rewritten.
    pub fn retime_last_keys(&mut self, time: f32) -> usize {
        let mut rewritten = 0;
        match &mut self.rotations {
            Some(RotationKeys::Quaternion(track)) => {
                rewritten += usize::from(track.retime_last_key(time));
            }
            Some(RotationKeys::Euler(euler)) => {
                rewritten += usize::from(euler.x.retime_last_key(time));
                rewritten += usize::from(euler.y.retime_last_key(time));
                rewritten += usize::from(euler.z.retime_last_key(time));
            }
            None => {}
        }
        rewritten += usize::from(self.translations.retime_last_key(time));
        rewritten += usize::from(self.scales.retime_last_key(time));
        rewritten
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleType {
    #[default]
    Loop,
    Reverse,
    Clamp,
}

impl From<u32> for CycleType {
    fn from(value: u32) -> Self {
        match value {
            1 => CycleType::Reverse,
            2 => CycleType::Clamp,
            _ => CycleType::Loop,
        }
    }
}

// Represents a single text keyframe
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TextKey {
    pub time: f32,
    pub value: String,
}

impl TextKey {
    pub fn new(time: f32, value: impl Into<String>) -> Self {
        Self {
            time,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum InterpolatorDesc {
    Keyframes(Arc<NiKeyframeData>),
    Pose(NiQuatTransform),
}

/// One (node, interpolator, priority) binding of a sequence asset.
#[derive(Debug, Clone)]
pub struct ControlledBlockDesc {
    pub node_name: String,
    pub interpolator: InterpolatorDesc,
    /// Overrides the activation priority when set.
    pub priority: Option<i8>,
}

/// A fully parsed `.kf` sequence, as handed over by a [`crate::SequenceLoader`].
#[derive(Debug, Clone)]
pub struct SequenceAsset {
    pub name: String,
    pub blocks: Vec<ControlledBlockDesc>,
    pub text_keys: TextKeyList,
    pub begin_key_time: f32,
    pub end_key_time: f32,
    pub cycle_type: CycleType,
    pub frequency: f32,
}

impl SequenceAsset {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blocks: Vec::new(),
            text_keys: TextKeyList::default(),
            begin_key_time: 0.0,
            end_key_time: 0.0,
            cycle_type: CycleType::Loop,
            frequency: 1.0,
        }
    }

    pub fn with_block(
        mut self,
        node_name: impl Into<String>,
        data: NiKeyframeData,
        priority: Option<i8>,
    ) -> Self {
        let data = Arc::new(data);
        if let Some(end) = data.last_key_time() {
            self.end_key_time = self.end_key_time.max(end);
        }
        self.blocks.push(ControlledBlockDesc {
            node_name: node_name.into(),
            interpolator: InterpolatorDesc::Keyframes(data),
            priority,
        });
        self
    }

    pub fn with_text_key(mut self, time: f32, value: impl Into<String>) -> Self {
        self.text_keys.insert(TextKey::new(time, value));
        self
    }

    pub fn with_cycle_type(mut self, cycle_type: CycleType) -> Self {
        self.cycle_type = cycle_type;
        self
    }

    pub fn with_key_times(mut self, begin: f32, end: f32) -> Self {
        self.begin_key_time = begin;
        self.end_key_time = end;
        self
    }

    pub fn duration(&self) -> f32 {
        (self.end_key_time - self.begin_key_time).max(0.0)
    }

    pub fn validate(&self) -> Result<()> {
        if self.frequency <= 0.0 || !self.frequency.is_finite() {
            return Err(BlendError::Configuration(format!(
                "sequence '{}' has invalid frequency {}",
                self.name, self.frequency
            )));
        }
        if self.end_key_time < self.begin_key_time {
            return Err(BlendError::Configuration(format!(
                "sequence '{}' ends ({}) before it begins ({})",
                self.name, self.end_key_time, self.begin_key_time
            )));
        }
        Ok(())
    }
}
