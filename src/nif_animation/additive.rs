use std::collections::HashMap;

use bevy::log::debug;
use bevy::math::{Quat, Vec3};

use crate::nif::animation_helpers::relative_rotation;
use crate::nif::blend_interpolator::NiBlendInterpolator;
use crate::nif::interpolator::InterpolatorPool;
use crate::nif::types::{InterpolatorId, NiQuatTransform, SequenceId};

/// Parameters an additive sequence was initialized with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdditiveInitParams {
    pub reference: Option<SequenceId>,
    pub reference_time: f32,
    pub ignore_priorities: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdditiveMetadata {
    /// Pose the deltas are measured against.
    pub reference_transform: NiQuatTransform,
    pub ignore_priorities: bool,
}

/// Reference poses of additive interpolators, keyed by pool handle.
#[derive(Debug, Default)]
pub struct AdditiveOverlayManager {
    metadata: HashMap<InterpolatorId, AdditiveMetadata>,
    init_params: HashMap<SequenceId, AdditiveInitParams>,
}

impl AdditiveOverlayManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    pub fn metadata(&self, interpolator: InterpolatorId) -> Option<&AdditiveMetadata> {
        self.metadata.get(&interpolator)
    }

    pub fn init_params(&self, sequence: SequenceId) -> Option<&AdditiveInitParams> {
        self.init_params.get(&sequence)
    }

    /// True when `sequence` was already initialized with exactly `params`.
    pub fn is_initialized_with(&self, sequence: SequenceId, params: &AdditiveInitParams) -> bool {
        self.init_params.get(&sequence) == Some(params)
    }

    /// Records the reference pose of each of `sequence`'s interpolators.
    pub fn register(
        &mut self,
        sequence: SequenceId,
        params: AdditiveInitParams,
        references: impl IntoIterator<Item = (InterpolatorId, NiQuatTransform)>,
    ) {
        for (interpolator, reference_transform) in references {
            self.metadata.insert(
                interpolator,
                AdditiveMetadata {
                    reference_transform,
                    ignore_priorities: params.ignore_priorities,
                },
            );
        }
        self.init_params.insert(sequence, params);
    }

    /// Drops everything recorded for `sequence`.
    pub fn forget(&mut self, sequence: SequenceId, interpolators: impl IntoIterator<Item = InterpolatorId>) {
        if self.init_params.remove(&sequence).is_some() {
            for interpolator in interpolators {
                self.metadata.remove(&interpolator);
            }
        }
    }

    /// Adds the weighted deltas of `blend`'s additive entries onto `base`.
    pub fn apply_additive_transforms(
        &self,
        blend: &NiBlendInterpolator,
        time: f32,
        base: NiQuatTransform,
        pool: &mut InterpolatorPool,
    ) -> NiQuatTransform {
        if self.metadata.is_empty() {
            return base;
        }
        let threshold = blend.next_high_non_additive_priority();
        let mut translate_delta = Vec3::ZERO;
        let mut rotate_delta = Quat::IDENTITY;
        let mut scale_delta = 0.0;
        let mut contributed = false;

        for (_, entry) in blend.entries().filter(|(_, entry)| entry.is_additive) {
            let Some(metadata) = self.metadata.get(&entry.interpolator) else {
                continue;
            };
            if !metadata.ignore_priorities && entry.priority < threshold {
                continue;
            }
            let weight = entry.weight * entry.ease_spinner;
            if weight <= 0.0 {
                continue;
            }
            let value = pool.evaluate(entry.interpolator, blend.entry_time(entry, time));
            let reference = metadata.reference_transform;
            if let (Some(value), Some(reference)) = (value.translate, reference.translate) {
                translate_delta += (value - reference) * weight;
                contributed = true;
            }
            if let (Some(value), Some(reference)) = (value.rotate, reference.rotate) {
                let delta = relative_rotation(reference, value);
                rotate_delta = rotate_delta * Quat::IDENTITY.slerp(delta, weight.min(1.0));
                contributed = true;
            }
            if let (Some(value), Some(reference)) = (value.scale, reference.scale) {
                scale_delta += (value - reference) * weight;
                contributed = true;
            }
        }

        if !contributed {
            return base;
        }
        debug!("additive delta applied at {time}");
        NiQuatTransform {
            translate: base.translate.map(|t| t + translate_delta),
            rotate: base.rotate.map(|q| (q * rotate_delta).normalize()),
            scale: base.scale.map(|s| s + scale_delta),
        }
    }
}
