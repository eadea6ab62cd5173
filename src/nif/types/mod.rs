//! This module defines the data structures shared by the blending runtime.

// Declare the sub-modules
pub mod animation;
pub mod base;
pub mod extra_data;

pub use animation::{
    ControlledBlockDesc, CycleType, InterpolatorDesc, Key, KeyFloat, KeyQuaternion, KeyType,
    KeyVec3, NiKeyframeData, Quaternion, RotationKeys, SequenceAsset, TextKey,
};
pub use base::{FormId, InterpolatorId, NiQuatTransform, NodeId, SequenceId};
pub use extra_data::TextKeyList;
