use std::collections::HashMap;
use std::sync::Arc;

use bevy::log::{debug, warn};
use generational_arena::Arena;

use super::blend_interpolator::NiBlendInterpolator;
use super::controller_sequence::{ControlledBlock, NiControllerSequence, SequenceTransition};
use super::error::{BlendError, Result};
use super::interpolator::{InterpolatorPool, NiInterpolator};
use super::skeleton::NodePalette;
use super::types::{
    CycleType, InterpolatorDesc, InterpolatorId, NiQuatTransform, NodeId, SequenceAsset,
    SequenceId,
};
use crate::config::{BlendConfig, BlendFixes};
use crate::nif_animation::additive::{AdditiveInitParams, AdditiveOverlayManager};
use crate::nif_animation::anim_groups::SequenceSlot;
use crate::nif_animation::blend_fixes;

/// Owns the sequences of one skeleton and blends them into a pose every update.
#[derive(Debug, Default)]
pub struct NiControllerManager {
    palette: NodePalette,
    sequences: Arena<NiControllerSequence>,
    names: HashMap<String, SequenceId>,
    interpolators: InterpolatorPool,
    blend_nodes: HashMap<NodeId, NiBlendInterpolator>,
    additive: AdditiveOverlayManager,
    slots: HashMap<SequenceSlot, SequenceId>,
    pose: HashMap<NodeId, NiQuatTransform>,
    weight_threshold: f32,
    only_use_highest_weight: bool,
    smoothing: bool,
    time: f32,
    last_update: Option<f32>,
}

impl NiControllerManager {
    pub fn new(palette: NodePalette) -> Self {
        Self {
            palette,
            ..Self::default()
        }
    }

    pub fn from_config(palette: NodePalette, config: &BlendConfig) -> Self {
        let mut manager = Self::new(palette);
        manager.apply_config(config);
        manager
    }

    pub fn palette(&self) -> &NodePalette {
        &self.palette
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn sequence(&self, id: SequenceId) -> Option<&NiControllerSequence> {
        self.sequences.get(id.0)
    }

    pub fn sequence_by_name(&self, name: &str) -> Option<SequenceId> {
        self.names.get(&name.to_lowercase()).copied()
    }

    pub fn sequences(&self) -> impl Iterator<Item = (SequenceId, &NiControllerSequence)> {
        self.sequences
            .iter()
            .map(|(index, sequence)| (SequenceId(index), sequence))
    }

    pub fn sequence_count(&self) -> usize {
        self.sequences.len()
    }

    pub fn blend_node(&self, node: NodeId) -> Option<&NiBlendInterpolator> {
        self.blend_nodes.get(&node)
    }

    pub fn interpolator_count(&self) -> usize {
        self.interpolators.len()
    }

    pub fn additive(&self) -> &AdditiveOverlayManager {
        &self.additive
    }

    /// Pose published by the last update.
    pub fn pose(&self) -> &HashMap<NodeId, NiQuatTransform> {
        &self.pose
    }

    pub fn node_pose(&self, name: &str) -> Option<NiQuatTransform> {
        let node = self.palette.resolve_node(name)?;
        self.pose.get(&node).copied()
    }

    pub fn set_current(&mut self, slot: SequenceSlot, id: Option<SequenceId>) {
        match id {
            Some(id) => {
                self.slots.insert(slot, id);
            }
            None => {
                self.slots.remove(&slot);
            }
        }
    }

    pub fn current(&self, slot: SequenceSlot) -> Option<SequenceId> {
        self.slots.get(&slot).copied()
    }

    fn apply_config(&mut self, config: &BlendConfig) {
        self.smoothing = config.fix_enabled(BlendFixes::BLEND_SMOOTHING);
        if self.weight_threshold == config.weight_threshold
            && self.only_use_highest_weight == config.only_use_highest_weight
        {
            return;
        }
        self.weight_threshold = config.weight_threshold;
        self.only_use_highest_weight = config.only_use_highest_weight;
        for blend in self.blend_nodes.values_mut() {
            blend.set_weight_threshold(config.weight_threshold);
            blend.set_only_use_highest_weight(config.only_use_highest_weight);
        }
    }

    fn get_sequence(&self, id: SequenceId) -> Result<&NiControllerSequence> {
        self.sequences
            .get(id.0)
            .ok_or_else(|| BlendError::InvalidHandle(format!("sequence {:?}", id.0)))
    }

    fn get_sequence_mut(&mut self, id: SequenceId) -> Result<&mut NiControllerSequence> {
        self.sequences
            .get_mut(id.0)
            .ok_or_else(|| BlendError::InvalidHandle(format!("sequence {:?}", id.0)))
    }

    /// Instantiates `asset` on this skeleton. A sequence with the same name is replaced.
    pub fn add_sequence(&mut self, asset: &SequenceAsset) -> Result<SequenceId> {
        asset.validate()?;
        let key = asset.name.to_lowercase();
        if let Some(existing) = self.names.get(&key).copied() {
            debug!("replacing sequence '{}'", asset.name);
            self.remove_sequence(existing);
        }

        let mut sequence = NiControllerSequence::new(asset.name.clone());
        sequence.text_keys = asset.text_keys.clone();
        sequence.cycle_type = asset.cycle_type;
        sequence.frequency = asset.frequency;
        sequence.begin_key_time = asset.begin_key_time;
        sequence.end_key_time = asset.end_key_time;

        for block in &asset.blocks {
            let Some(node) = self.palette.resolve_node(&block.node_name) else {
                debug!(
                    "'{}': skipping block for unknown node '{}'",
                    asset.name, block.node_name
                );
                continue;
            };
            if sequence.find_block(node).is_some() {
                debug!(
                    "'{}': duplicate block for node '{}'",
                    asset.name, block.node_name
                );
                continue;
            }
            let interpolator = match &block.interpolator {
                InterpolatorDesc::Keyframes(data) if data.is_empty() => {
                    debug!(
                        "'{}': skipping empty keyframe data on '{}'",
                        asset.name, block.node_name
                    );
                    continue;
                }
                InterpolatorDesc::Keyframes(data) => NiInterpolator::keyframe(Arc::clone(data)),
                InterpolatorDesc::Pose(transform) => NiInterpolator::pose(*transform),
            };
            sequence.blocks.push(ControlledBlock {
                node,
                node_name: block.node_name.clone(),
                interpolator: self.interpolators.insert(interpolator),
                priority: block.priority,
                blend_entry: None,
            });
        }

        debug!(
            "added sequence '{}' with {}/{} blocks",
            asset.name,
            sequence.blocks.len(),
            asset.blocks.len()
        );
        let id = SequenceId(self.sequences.insert(sequence));
        self.names.insert(key, id);
        Ok(id)
    }

    /// Drops a sequence, its blend entries and its interpolators.
    pub fn remove_sequence(&mut self, id: SequenceId) -> bool {
        let Some(sequence) = self.sequences.remove(id.0) else {
            return false;
        };
        for blend in self.blend_nodes.values_mut() {
            let owned: Vec<_> = blend
                .entries()
                .filter(|(_, entry)| entry.owner == Some(id))
                .map(|(handle, entry)| (handle, entry.detaching))
                .collect();
            for (handle, detaching) in owned {
                if let Some(entry) = blend.remove_entry(handle) {
                    if detaching {
                        self.interpolators.release(entry.interpolator);
                    }
                }
            }
        }
        self.blend_nodes.retain(|_, blend| !blend.is_empty());

        let interpolators: Vec<InterpolatorId> =
            sequence.blocks.iter().map(|block| block.interpolator).collect();
        self.additive.forget(id, interpolators.iter().copied());
        for interpolator in interpolators {
            self.interpolators.release(interpolator);
        }

        if self.names.get(&sequence.name.to_lowercase()) == Some(&id) {
            self.names.remove(&sequence.name.to_lowercase());
        }
        self.slots.retain(|_, current| *current != id);
        for (_, other) in self.sequences.iter_mut() {
            if other.partner() == Some(id) {
                other.set_partner(None);
            }
        }
        debug!("removed sequence '{}'", sequence.name);
        true
    }

    pub fn activate_sequence(
        &mut self,
        id: SequenceId,
        priority: i8,
        start_over: bool,
        weight: f32,
        ease_in: f32,
        sync: Option<SequenceId>,
    ) -> Result<()> {
        let start_frame = match sync {
            Some(partner_id) => {
                let sequence = self.get_sequence(id)?;
                let partner = self.get_sequence(partner_id)?;
                if !sequence.can_sync_to(id, partner) {
                    return Err(BlendError::TopologyMismatch {
                        source_name: partner.name.clone(),
                        dest_name: sequence.name.clone(),
                        reason: "sequences cannot be time-synced".to_string(),
                    });
                }
                Some(sequence.find_corresponding_morph_frame(partner, partner.last_scaled_time()))
            }
            None => None,
        };
        self.start_sequence(id, priority, start_over, weight, ease_in, false, start_frame)
    }

    #[allow(clippy::too_many_arguments)]
    fn start_sequence(
        &mut self,
        id: SequenceId,
        priority: i8,
        start_over: bool,
        weight: f32,
        ease_in: f32,
        transition: bool,
        start_frame: Option<f32>,
    ) -> Result<()> {
        self.get_sequence_mut(id)?
            .activate(priority, start_over, weight, ease_in, transition, start_frame)?;
        self.attach_entries(id);
        Ok(())
    }

    fn attach_entries(&mut self, id: SequenceId) {
        let threshold = self.weight_threshold;
        let only_highest = self.only_use_highest_weight;
        let Some(sequence) = self.sequences.get_mut(id.0) else {
            return;
        };
        let weight = sequence.weight();
        let ease_spinner = sequence.ease_spinner();
        let sequence_priority = sequence.priority();
        let is_additive = sequence.is_additive;
        for block in &mut sequence.blocks {
            let blend = self
                .blend_nodes
                .entry(block.node)
                .or_insert_with(|| NiBlendInterpolator::new(true, threshold, only_highest));
            let priority = block.priority.unwrap_or(sequence_priority);
            let fading = blend
                .entries()
                .find(|(_, entry)| {
                    entry.detaching
                        && entry.owner == Some(id)
                        && entry.interpolator == block.interpolator
                })
                .map(|(handle, _)| handle);
            // A still fading entry is picked up again; the sequence's own reference
            // covers it from here on.
            if let Some(handle) = fading {
                if blend.resume_entry(handle, weight, priority, ease_spinner) {
                    blend.set_additive(handle, is_additive);
                    block.blend_entry = Some(handle);
                    self.interpolators.release(block.interpolator);
                    continue;
                }
            }
            match blend.add_entry(block.interpolator, Some(id), weight, priority, ease_spinner) {
                Some(handle) => {
                    blend.set_additive(handle, is_additive);
                    block.blend_entry = Some(handle);
                }
                None => warn!(
                    "'{}': no free blend entry on node '{}'",
                    sequence.name, block.node_name
                ),
            }
        }
    }

    /// Detaches the entries of a sequence that became inactive. With blend smoothing
    /// the entries linger at zero target weight until they fade out.
    fn detach_entries(&mut self, id: SequenceId) {
        let smoothing = self.smoothing;
        let Some(sequence) = self.sequences.get_mut(id.0) else {
            return;
        };
        for block in &mut sequence.blocks {
            let Some(handle) = block.blend_entry.take() else {
                continue;
            };
            let Some(blend) = self.blend_nodes.get_mut(&block.node) else {
                continue;
            };
            if smoothing {
                blend.begin_detach(handle);
                self.interpolators.retain(block.interpolator);
            } else {
                blend.remove_entry(handle);
            }
        }
        self.blend_nodes.retain(|_, blend| !blend.is_empty());
    }

    /// Returns true if the sequence went straight to inactive.
    pub fn deactivate_sequence(&mut self, id: SequenceId, ease_out: f32) -> bool {
        let Some(sequence) = self.sequences.get_mut(id.0) else {
            return false;
        };
        let stopped = sequence.deactivate(ease_out, false);
        if stopped {
            self.detach_entries(id);
        }
        stopped
    }

    /// Eases `source` out while `dest` eases in. With `sync` the destination starts at
    /// the frame equivalent to the source's current time.
    pub fn cross_fade(
        &mut self,
        source: SequenceId,
        dest: SequenceId,
        duration: f32,
        priority: i8,
        weight: f32,
        sync: bool,
    ) -> Result<()> {
        if source == dest {
            return Err(BlendError::InvalidHandle(
                "cannot cross-fade a sequence into itself".to_string(),
            ));
        }
        let source_sequence = self.get_sequence(source)?;
        let dest_sequence = self.get_sequence(dest)?;
        let start_frame = (sync && source_sequence.state().is_active()).then(|| {
            dest_sequence
                .find_corresponding_morph_frame(source_sequence, source_sequence.last_scaled_time())
        });
        debug!(
            "cross-fading '{}' -> '{}' over {duration}",
            source_sequence.name, dest_sequence.name
        );
        self.start_sequence(dest, priority, true, weight, duration, false, start_frame)?;
        self.deactivate_sequence(source, duration);
        Ok(())
    }

    /// Transitions between two phases of the same move. The destination stays time-synced
    /// to the source until the transition completes.
    pub fn morph(
        &mut self,
        source: SequenceId,
        dest: SequenceId,
        duration: f32,
        priority: i8,
        weight: f32,
    ) -> Result<()> {
        let source_sequence = self.get_sequence(source)?;
        let dest_sequence = self.get_sequence(dest)?;
        let same_topology = source == dest
            || source_sequence
                .blocks
                .iter()
                .map(|block| block.node)
                .eq(dest_sequence.blocks.iter().map(|block| block.node));
        if source == dest || !same_topology || !dest_sequence.can_sync_to(dest, source_sequence) {
            let reason = if same_topology {
                "sequences cannot be time-synced"
            } else {
                "controlled blocks differ"
            };
            warn!(
                "cannot morph '{}' into '{}': {reason}",
                source_sequence.name, dest_sequence.name
            );
            return Err(BlendError::TopologyMismatch {
                source_name: source_sequence.name.clone(),
                dest_name: dest_sequence.name.clone(),
                reason: reason.to_string(),
            });
        }
        if !source_sequence.state().is_active() {
            debug!(
                "morph source '{}' is inactive, activating '{}' directly",
                source_sequence.name, dest_sequence.name
            );
            return self.start_sequence(dest, priority, true, weight, duration, false, None);
        }
        let start_frame = dest_sequence
            .find_corresponding_morph_frame(source_sequence, source_sequence.last_scaled_time());

        self.start_sequence(dest, priority, true, weight, duration, true, Some(start_frame))?;
        if let Some(sequence) = self.sequences.get_mut(dest.0) {
            sequence.set_partner(Some(source));
        }
        let stopped = match self.sequences.get_mut(source.0) {
            Some(sequence) => {
                sequence.begin_morph_source(duration);
                !sequence.state().is_active()
            }
            None => false,
        };
        if stopped {
            self.detach_entries(source);
        }
        Ok(())
    }

    /// Fades from the last published pose into `dest` through a temporary pose sequence.
    /// Returns the temporary sequence, if any node was animated.
    pub fn blend_from_pose(
        &mut self,
        dest: SequenceId,
        duration: f32,
        priority: i8,
        weight: f32,
    ) -> Result<Option<SequenceId>> {
        let dest_sequence = self.get_sequence(dest)?;
        if dest_sequence.state().is_active() {
            return Err(BlendError::AlreadyActive(dest_sequence.name.clone()));
        }
        let mut animated: Vec<(NodeId, NiQuatTransform)> = self
            .pose
            .iter()
            .filter(|(_, transform)| transform.is_valid())
            .map(|(node, transform)| (*node, *transform))
            .collect();
        if animated.is_empty() || duration <= 0.0 {
            self.start_sequence(dest, priority, true, weight, duration, false, None)?;
            return Ok(None);
        }
        animated.sort_by_key(|(node, _)| *node);

        let mut pose_sequence = NiControllerSequence::new(format!("__pose_to_{}", dest_sequence.name));
        pose_sequence.is_temporary = true;
        pose_sequence.cycle_type = CycleType::Clamp;
        for (node, transform) in animated {
            pose_sequence.blocks.push(ControlledBlock {
                node,
                node_name: self.palette.name(node).unwrap_or_default().to_string(),
                interpolator: self.interpolators.insert(NiInterpolator::pose(transform)),
                priority: None,
                blend_entry: None,
            });
        }
        let pose_id = SequenceId(self.sequences.insert(pose_sequence));
        self.start_sequence(pose_id, priority, true, weight, 0.0, false, None)?;
        if let Some(sequence) = self.sequences.get_mut(pose_id.0) {
            sequence.deactivate(duration, true);
        }
        self.start_sequence(dest, priority, true, weight, duration, true, None)?;
        Ok(Some(pose_id))
    }

    /// Captures reference transforms for `id` and marks it additive. Returns false if it
    /// was already initialized with the same parameters.
    pub fn init_additive_sequence(
        &mut self,
        id: SequenceId,
        reference: Option<SequenceId>,
        reference_time: f32,
        ignore_priorities: bool,
    ) -> Result<bool> {
        let params = AdditiveInitParams {
            reference,
            reference_time,
            ignore_priorities,
        };
        let sequence = self.get_sequence(id)?;
        if self.additive.is_initialized_with(id, &params) {
            return Ok(false);
        }
        let reference_blocks: HashMap<NodeId, InterpolatorId> = match reference {
            Some(reference) => self
                .get_sequence(reference)?
                .blocks
                .iter()
                .map(|block| (block.node, block.interpolator))
                .collect(),
            None => HashMap::new(),
        };
        let begin = sequence.begin_key_time;
        let blocks: Vec<(NodeId, InterpolatorId)> = sequence
            .blocks
            .iter()
            .map(|block| (block.node, block.interpolator))
            .collect();

        let references = blocks
            .iter()
            .map(|(node, interpolator)| {
                let transform = match reference_blocks.get(node) {
                    Some(reference) => {
                        self.interpolators.try_evaluate(*reference, reference_time)?
                    }
                    None => self.interpolators.try_evaluate(*interpolator, begin)?,
                };
                Ok((*interpolator, transform))
            })
            .collect::<Result<Vec<(InterpolatorId, NiQuatTransform)>>>()?;
        self.additive
            .forget(id, blocks.iter().map(|(_, interpolator)| *interpolator));
        self.additive.register(id, params, references);

        if let Some(sequence) = self.sequences.get_mut(id.0) {
            sequence.is_additive = true;
            for block in &sequence.blocks {
                if let (Some(handle), Some(blend)) =
                    (block.blend_entry, self.blend_nodes.get_mut(&block.node))
                {
                    blend.set_additive(handle, true);
                }
            }
            debug!("sequence '{}' is now additive", sequence.name);
        }
        Ok(true)
    }

    fn synced_frame(&self, id: SequenceId) -> Option<f32> {
        let sequence = self.sequences.get(id.0)?;
        let partner = self.sequences.get(sequence.partner()?.0)?;
        Some(sequence.find_corresponding_morph_frame(partner, partner.last_scaled_time()))
    }

    /// Advances every sequence to `time`, recomputes the blend weights and publishes
    /// the pose.
    pub fn update(&mut self, time: f32, config: &BlendConfig) {
        let dt = self.last_update.map_or(0.0, |last| (time - last).max(0.0));
        self.last_update = Some(time);
        self.time = time;
        self.apply_config(config);

        // Synced sequences follow their partner, so they update last.
        let mut active: Vec<(SequenceId, bool)> = self
            .sequences
            .iter()
            .filter(|(_, sequence)| sequence.state().is_active())
            .map(|(index, sequence)| (SequenceId(index), sequence.partner().is_some()))
            .collect();
        active.sort_by_key(|(_, synced)| *synced);

        let mut deactivated = Vec::new();
        for (id, _) in active {
            let synced_frame = self.synced_frame(id);
            let Some(sequence) = self.sequences.get_mut(id.0) else {
                continue;
            };
            if sequence.update(time, synced_frame) == Some(SequenceTransition::Deactivated) {
                deactivated.push(id);
                continue;
            }
            let weight = sequence.weight();
            let ease_spinner = sequence.ease_spinner();
            let scaled_time = sequence.last_scaled_time();
            for block in &sequence.blocks {
                let (Some(handle), Some(blend)) =
                    (block.blend_entry, self.blend_nodes.get_mut(&block.node))
                else {
                    continue;
                };
                blend.set_weight(handle, weight);
                blend.set_ease_spinner(handle, ease_spinner);
                blend.set_update_time(handle, scaled_time);
            }
        }
        for id in deactivated {
            self.detach_entries(id);
        }

        if config.fix_enabled(BlendFixes::CONFLICTING_PRIORITIES) {
            blend_fixes::fix_conflicting_priorities(&self.sequences, &mut self.blend_nodes);
        }
        self.update_weights(dt, config.smoothing_time_constant);

        let mut pose = HashMap::with_capacity(self.blend_nodes.len());
        for (node, blend) in &mut self.blend_nodes {
            let base = blend.blend_values(time, &mut self.interpolators);
            let value =
                self.additive
                    .apply_additive_transforms(blend, time, base, &mut self.interpolators);
            if value.is_valid() {
                pose.insert(*node, value);
            }
        }
        self.pose = pose;

        let finished: Vec<SequenceId> = self
            .sequences
            .iter()
            .filter(|(_, sequence)| sequence.is_temporary && !sequence.state().is_active())
            .map(|(index, _)| SequenceId(index))
            .collect();
        for id in finished {
            self.remove_sequence(id);
        }
    }

    fn update_weights(&mut self, dt: f32, time_constant: f32) {
        let mut released = Vec::new();
        for blend in self.blend_nodes.values_mut() {
            if self.smoothing {
                let faded = blend_fixes::smooth_blend_weights(blend, dt, time_constant);
                released.extend(faded.into_iter().map(|(_, entry)| entry.interpolator));
                continue;
            }
            // Smoothing may have been switched off while entries were still fading.
            let lingering: Vec<_> = blend
                .entries()
                .filter(|(_, entry)| entry.detaching || entry.smoothed_weight.is_some())
                .map(|(handle, entry)| (handle, entry.detaching))
                .collect();
            for (handle, detaching) in lingering {
                if detaching {
                    if let Some(entry) = blend.remove_entry(handle) {
                        released.push(entry.interpolator);
                    }
                } else if let Some(entry) = blend.entry_mut(handle) {
                    entry.smoothed_weight = None;
                }
            }
            blend.compute_normalized_weights();
        }
        for interpolator in released {
            self.interpolators.release(interpolator);
        }
        self.blend_nodes.retain(|_, blend| !blend.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nif::controller_sequence::AnimState;
    use crate::nif::key_track::KeyTrack;
    use crate::nif::types::{KeyType, NiKeyframeData};
    use bevy::math::Vec3;

    fn palette() -> NodePalette {
        NodePalette::from_names(["Bip01", "Bip01 Spine", "Bip01 L Hand"]).unwrap()
    }

    fn moving(from: Vec3, to: Vec3, end: f32) -> NiKeyframeData {
        NiKeyframeData {
            rotations: None,
            translations: KeyTrack::from_pairs(KeyType::Linear, &[(0.0, from), (end, to)])
                .unwrap(),
            scales: KeyTrack::default(),
        }
    }

    fn holding(name: &str, node: &str, value: Vec3) -> SequenceAsset {
        SequenceAsset::new(name).with_block(node, moving(value, value, 1.0), None)
    }

    fn no_fixes() -> BlendConfig {
        BlendConfig {
            fixes: BlendFixes::empty(),
            ..BlendConfig::default()
        }
    }

    fn translate(manager: &NiControllerManager, node: &str) -> Vec3 {
        manager.node_pose(node).and_then(|pose| pose.translate).unwrap()
    }

    #[test]
    fn unknown_nodes_are_skipped_and_names_replace() {
        let mut manager = NiControllerManager::new(palette());
        let asset = holding("Walk", "Bip01", Vec3::X).with_block(
            "Tail",
            moving(Vec3::ZERO, Vec3::Y, 1.0),
            None,
        );
        let first = manager.add_sequence(&asset).unwrap();
        assert_eq!(manager.sequence(first).unwrap().blocks.len(), 1);
        assert_eq!(manager.interpolator_count(), 1);

        let second = manager.add_sequence(&asset).unwrap();
        assert!(manager.sequence(first).is_none());
        assert_eq!(manager.sequence_by_name("walk"), Some(second));
        assert_eq!(manager.interpolator_count(), 1);

        assert!(manager.remove_sequence(second));
        assert_eq!(manager.interpolator_count(), 0);
        assert_eq!(manager.sequence_by_name("walk"), None);
        assert!(!manager.remove_sequence(second));
    }

    #[test]
    fn single_sequence_drives_the_pose() {
        let mut manager = NiControllerManager::new(palette());
        let asset = SequenceAsset::new("walk").with_block(
            "Bip01",
            moving(Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0), 1.0),
            None,
        );
        let id = manager.add_sequence(&asset).unwrap();
        manager.activate_sequence(id, 0, true, 1.0, 0.0, None).unwrap();
        manager.set_current(SequenceSlot::Movement, Some(id));
        let config = BlendConfig::default();
        manager.update(0.0, &config);
        manager.update(0.5, &config);
        assert!((translate(&manager, "bip01") - Vec3::new(5.0, 0.0, 0.0)).length() < 1e-4);
        assert_eq!(manager.current(SequenceSlot::Movement), Some(id));
        assert!(matches!(
            manager.activate_sequence(id, 0, true, 1.0, 0.0, None),
            Err(BlendError::AlreadyActive(_))
        ));
    }

    #[test]
    fn cross_fade_blends_then_detaches_source() {
        let mut manager = NiControllerManager::new(palette());
        let idle = manager.add_sequence(&holding("idle", "Bip01", Vec3::X)).unwrap();
        let aim = manager.add_sequence(&holding("aim", "Bip01", Vec3::Y)).unwrap();
        let config = no_fixes();
        manager.activate_sequence(idle, 0, true, 1.0, 0.0, None).unwrap();
        manager.update(0.0, &config);
        manager.cross_fade(idle, aim, 0.5, 0, 1.0, false).unwrap();
        assert_eq!(manager.sequence(idle).unwrap().state(), AnimState::EaseOut);
        assert_eq!(manager.sequence(aim).unwrap().state(), AnimState::EaseIn);

        manager.update(1.0, &config);
        assert!((translate(&manager, "Bip01") - Vec3::X).length() < 1e-4);
        manager.update(1.25, &config);
        assert!((translate(&manager, "Bip01") - Vec3::new(0.5, 0.5, 0.0)).length() < 1e-4);
        manager.update(1.5, &config);
        assert!((translate(&manager, "Bip01") - Vec3::Y).length() < 1e-4);
        assert_eq!(manager.sequence(idle).unwrap().state(), AnimState::Inactive);
        let node = manager.palette().resolve_node("Bip01").unwrap();
        assert_eq!(manager.blend_node(node).unwrap().entry_count(), 1);
    }

    #[test]
    fn conflicting_priorities_favour_incoming() {
        let mut manager = NiControllerManager::new(palette());
        let idle = manager.add_sequence(&holding("idle", "Bip01", Vec3::X)).unwrap();
        let aim = manager.add_sequence(&holding("aim", "Bip01", Vec3::Y)).unwrap();
        let config = BlendConfig::default();
        manager.activate_sequence(idle, 2, true, 1.0, 0.0, None).unwrap();
        manager.update(0.0, &config);
        manager.cross_fade(idle, aim, 0.5, 2, 1.0, false).unwrap();
        manager.update(1.0, &config);

        let node = manager.palette().resolve_node("Bip01").unwrap();
        let blend = manager.blend_node(node).unwrap();
        let incoming = blend.find_entry(aim).unwrap();
        let outgoing = blend.find_entry(idle).unwrap();
        assert_eq!(blend.entry(incoming).unwrap().priority, 3);
        assert_eq!(blend.entry(outgoing).unwrap().priority, 2);
    }

    #[test]
    fn morph_requires_matching_blocks() {
        let mut manager = NiControllerManager::new(palette());
        let walk = manager.add_sequence(&holding("walk", "Bip01", Vec3::X)).unwrap();
        let lean = manager.add_sequence(&holding("lean", "Bip01 Spine", Vec3::Y)).unwrap();
        manager.activate_sequence(walk, 0, true, 1.0, 0.0, None).unwrap();
        let result = manager.morph(walk, lean, 0.5, 0, 1.0);
        assert!(matches!(result, Err(BlendError::TopologyMismatch { .. })));
        assert_eq!(manager.sequence(walk).unwrap().state(), AnimState::Animating);
        assert_eq!(manager.sequence(lean).unwrap().state(), AnimState::Inactive);
    }

    #[test]
    fn morph_keeps_destination_in_sync() {
        let mut manager = NiControllerManager::new(palette());
        let left = SequenceAsset::new("walk_left").with_block(
            "Bip01",
            moving(Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0), 2.0),
            None,
        );
        let right = SequenceAsset::new("walk_right").with_block(
            "Bip01",
            moving(Vec3::ZERO, Vec3::new(20.0, 0.0, 0.0), 4.0),
            None,
        );
        let left = manager.add_sequence(&left).unwrap();
        let right = manager.add_sequence(&right).unwrap();
        let config = BlendConfig::default();
        manager.activate_sequence(left, 1, true, 1.0, 0.0, None).unwrap();
        manager.update(0.0, &config);
        manager.update(0.5, &config);

        manager.morph(left, right, 1.0, 1, 1.0).unwrap();
        assert_eq!(manager.sequence(left).unwrap().state(), AnimState::MorphSource);
        assert_eq!(manager.sequence(right).unwrap().state(), AnimState::TransDest);
        assert_eq!(manager.sequence(right).unwrap().partner(), Some(left));

        manager.update(1.0, &config);
        let dest = manager.sequence(right).unwrap();
        assert!((dest.last_scaled_time() - 2.0).abs() < 1e-4);

        manager.update(2.0, &config);
        assert_eq!(manager.sequence(left).unwrap().state(), AnimState::Inactive);
        let dest = manager.sequence(right).unwrap();
        assert_eq!(dest.state(), AnimState::Animating);
        assert_eq!(dest.partner(), None);
    }

    #[test]
    fn blend_from_pose_uses_a_temporary_sequence() {
        let mut manager = NiControllerManager::new(palette());
        let idle = manager.add_sequence(&holding("idle", "Bip01", Vec3::X)).unwrap();
        let aim = manager.add_sequence(&holding("aim", "Bip01", Vec3::Y)).unwrap();
        let config = no_fixes();
        manager.activate_sequence(idle, 0, true, 1.0, 0.0, None).unwrap();
        manager.update(0.0, &config);
        assert!(manager.deactivate_sequence(idle, 0.0));

        let pose_id = manager.blend_from_pose(aim, 0.5, 0, 1.0).unwrap().unwrap();
        assert!(manager.sequence(pose_id).unwrap().is_temporary);
        assert_eq!(manager.sequence_count(), 3);

        manager.update(1.0, &config);
        assert!((translate(&manager, "Bip01") - Vec3::X).length() < 1e-4);
        manager.update(1.5, &config);
        assert!((translate(&manager, "Bip01") - Vec3::Y).length() < 1e-4);
        assert!(manager.sequence(pose_id).is_none());
        assert_eq!(manager.sequence_count(), 2);
        assert_eq!(manager.interpolator_count(), 2);
    }

    #[test]
    fn additive_sequences_layer_deltas() {
        let mut manager = NiControllerManager::new(palette());
        let idle = manager.add_sequence(&holding("idle", "Bip01", Vec3::ZERO)).unwrap();
        let lean = manager
            .add_sequence(&holding("lean", "Bip01", Vec3::new(2.0, 0.0, 0.0)))
            .unwrap();
        manager.activate_sequence(idle, 0, true, 1.0, 0.0, None).unwrap();
        manager.activate_sequence(lean, 0, true, 0.5, 0.0, None).unwrap();

        assert!(manager.init_additive_sequence(lean, Some(idle), 0.0, false).unwrap());
        assert!(!manager.init_additive_sequence(lean, Some(idle), 0.0, false).unwrap());
        assert!(manager.sequence(lean).unwrap().is_additive);

        manager.update(0.0, &BlendConfig::default());
        assert!((translate(&manager, "Bip01") - Vec3::X).length() < 1e-4);
    }

    #[test]
    fn smoothing_keeps_detached_entries_until_faded() {
        let mut manager = NiControllerManager::new(palette());
        let idle = manager.add_sequence(&holding("idle", "Bip01", Vec3::X)).unwrap();
        let aim = manager.add_sequence(&holding("aim", "Bip01", Vec3::Y)).unwrap();
        let config = BlendConfig {
            fixes: BlendFixes::default() | BlendFixes::BLEND_SMOOTHING,
            ..BlendConfig::default()
        };
        manager.activate_sequence(idle, 0, true, 1.0, 0.0, None).unwrap();
        manager.update(0.0, &config);
        manager.update(0.1, &config);

        assert!(manager.deactivate_sequence(idle, 0.0));
        manager.activate_sequence(aim, 0, true, 1.0, 0.0, None).unwrap();
        manager.update(0.2, &config);
        let node = manager.palette().resolve_node("Bip01").unwrap();
        assert_eq!(manager.blend_node(node).unwrap().entry_count(), 2);
        let t = translate(&manager, "Bip01");
        assert!(t.x > 0.3 && t.y > 0.6, "got {t:?}");

        for step in 3..30 {
            manager.update(step as f32 * 0.1, &config);
        }
        assert_eq!(manager.blend_node(node).unwrap().entry_count(), 1);
        assert!((translate(&manager, "Bip01") - Vec3::Y).length() < 1e-2);
        assert!(manager.remove_sequence(idle));
        assert_eq!(manager.interpolator_count(), 1);
    }

    fn smoothing() -> BlendConfig {
        BlendConfig {
            fixes: BlendFixes::default() | BlendFixes::BLEND_SMOOTHING,
            ..BlendConfig::default()
        }
    }

    #[test]
    fn deactivating_restores_the_node() {
        let mut manager = NiControllerManager::new(palette());
        let idle = manager.add_sequence(&holding("idle", "Bip01", Vec3::X)).unwrap();
        let aim = manager.add_sequence(&holding("aim", "Bip01", Vec3::Y)).unwrap();
        let node = manager.palette().resolve_node("Bip01").unwrap();
        let config = no_fixes();

        manager.activate_sequence(idle, 0, true, 1.0, 0.0, None).unwrap();
        manager.update(0.0, &config);
        assert!(manager.deactivate_sequence(idle, 0.0));
        assert!(manager.blend_node(node).is_none());
        manager.update(0.1, &config);
        assert!(manager.node_pose("Bip01").is_none());

        manager.activate_sequence(aim, 0, true, 1.0, 0.0, None).unwrap();
        manager.update(0.2, &config);
        assert_eq!(manager.blend_node(node).unwrap().entry_count(), 1);
        manager.activate_sequence(idle, 0, true, 1.0, 0.0, None).unwrap();
        manager.update(0.3, &config);
        assert_eq!(manager.blend_node(node).unwrap().entry_count(), 2);
        assert!(manager.deactivate_sequence(idle, 0.0));
        assert_eq!(manager.blend_node(node).unwrap().entry_count(), 1);
        assert_eq!(manager.interpolator_count(), 2);
    }

    #[test]
    fn smoothed_deactivation_fades_the_node_away() {
        let mut manager = NiControllerManager::new(palette());
        let idle = manager.add_sequence(&holding("idle", "Bip01", Vec3::X)).unwrap();
        let node = manager.palette().resolve_node("Bip01").unwrap();
        let config = smoothing();

        manager.activate_sequence(idle, 0, true, 1.0, 0.0, None).unwrap();
        manager.update(0.0, &config);
        assert!(manager.deactivate_sequence(idle, 0.0));
        assert_eq!(manager.interpolator_count(), 1);
        for step in 1..=200 {
            manager.update(step as f32 * 0.1, &config);
        }
        assert!(manager.blend_node(node).is_none());
        assert!(manager.node_pose("Bip01").is_none());
        assert_eq!(manager.interpolator_count(), 1);
        assert!(manager.remove_sequence(idle));
        assert_eq!(manager.interpolator_count(), 0);
    }

    #[test]
    fn smoothed_deactivation_leaves_other_entries() {
        let mut manager = NiControllerManager::new(palette());
        let idle = manager.add_sequence(&holding("idle", "Bip01", Vec3::X)).unwrap();
        let aim = manager.add_sequence(&holding("aim", "Bip01", Vec3::Y)).unwrap();
        let node = manager.palette().resolve_node("Bip01").unwrap();
        let config = smoothing();

        manager.activate_sequence(aim, 0, true, 1.0, 0.0, None).unwrap();
        manager.update(0.0, &config);
        manager.activate_sequence(idle, 0, true, 1.0, 0.0, None).unwrap();
        manager.update(0.1, &config);
        assert_eq!(manager.blend_node(node).unwrap().entry_count(), 2);

        assert!(manager.deactivate_sequence(idle, 0.0));
        for step in 2..=60 {
            manager.update(step as f32 * 0.1, &config);
        }
        assert_eq!(manager.blend_node(node).unwrap().entry_count(), 1);
        assert!((translate(&manager, "Bip01") - Vec3::Y).length() < 1e-2);
    }

    #[test]
    fn reactivating_reuses_a_fading_entry() {
        let mut manager = NiControllerManager::new(palette());
        let idle = manager.add_sequence(&holding("idle", "Bip01", Vec3::X)).unwrap();
        let aim = manager.add_sequence(&holding("aim", "Bip01", Vec3::Y)).unwrap();
        let node = manager.palette().resolve_node("Bip01").unwrap();
        let config = smoothing();

        manager.activate_sequence(idle, 0, true, 1.0, 0.0, None).unwrap();
        manager.activate_sequence(aim, 0, true, 1.0, 0.0, None).unwrap();
        manager.update(0.0, &config);
        assert!(manager.deactivate_sequence(idle, 0.0));
        manager.activate_sequence(idle, 0, true, 1.0, 0.0, None).unwrap();
        manager.update(0.1, &config);

        let blend = manager.blend_node(node).unwrap();
        assert_eq!(blend.entry_count(), 2);
        let handle = blend.find_entry(idle).unwrap();
        assert!(!blend.entry(handle).unwrap().detaching);
        assert_eq!(
            manager.sequence(idle).unwrap().blocks[0].blend_entry,
            Some(handle)
        );

        assert!(manager.remove_sequence(idle));
        assert_eq!(manager.interpolator_count(), 1);
    }
}
