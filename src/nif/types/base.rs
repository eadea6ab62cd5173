use bevy::math::{Quat, Vec3};
use generational_arena::Index;
use std::fmt::Debug;

/// Host form identifier (actor refs, weapons, races, idles...).
pub type FormId = u32;

/// Index of a node inside a [`crate::nif::skeleton::NodePalette`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// Handle to a sequence owned by a controller manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SequenceId(pub Index);

/// Handle to a pooled interpolator owned by a controller manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterpolatorId(pub Index);

/// The C++ NiQuatTransform: translate/rotate/scale where every channel can be unset.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NiQuatTransform {
    pub translate: Option<Vec3>,
    pub rotate: Option<Quat>,
    pub scale: Option<f32>,
}

impl NiQuatTransform {
    pub const INVALID: Self = Self {
        translate: None,
        rotate: None,
        scale: None,
    };

    pub fn new(translate: Vec3, rotate: Quat, scale: f32) -> Self {
        Self {
            translate: Some(translate),
            rotate: Some(rotate),
            scale: Some(scale),
        }
    }

    pub fn from_translate(translate: Vec3) -> Self {
        Self {
            translate: Some(translate),
            ..Self::INVALID
        }
    }

    pub fn from_rotate(rotate: Quat) -> Self {
        Self {
            rotate: Some(rotate),
            ..Self::INVALID
        }
    }

    pub fn from_scale(scale: f32) -> Self {
        Self {
            scale: Some(scale),
            ..Self::INVALID
        }
    }

    /// A transform is valid as soon as one channel carries data.
    pub fn is_valid(&self) -> bool {
        self.translate.is_some() || self.rotate.is_some() || self.scale.is_some()
    }

    pub fn is_fully_valid(&self) -> bool {
        self.translate.is_some() && self.rotate.is_some() && self.scale.is_some()
    }

    /// `self * child`. A channel of the result is only set when both operands set it.
    pub fn compose(&self, child: &NiQuatTransform) -> NiQuatTransform {
        let rotate = self.rotate.unwrap_or(Quat::IDENTITY);
        let scale = self.scale.unwrap_or(1.0);
        NiQuatTransform {
            translate: match (self.translate, child.translate) {
                (Some(parent_t), Some(child_t)) => Some(parent_t + rotate * (child_t * scale)),
                _ => None,
            },
            rotate: match (self.rotate, child.rotate) {
                (Some(parent_r), Some(child_r)) => Some((parent_r * child_r).normalize()),
                _ => None,
            },
            scale: match (self.scale, child.scale) {
                (Some(parent_s), Some(child_s)) => Some(parent_s * child_s),
                _ => None,
            },
        }
    }

    /// Channels unset in `self` are taken from `fallback`.
    pub fn or(&self, fallback: &NiQuatTransform) -> NiQuatTransform {
        NiQuatTransform {
            translate: self.translate.or(fallback.translate),
            rotate: self.rotate.or(fallback.rotate),
            scale: self.scale.or(fallback.scale),
        }
    }
}
