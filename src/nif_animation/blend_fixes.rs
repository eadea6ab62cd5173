//! Optional corrective passes, each toggled by a [`crate::config::BlendFixes`] flag.

use std::collections::HashMap;
use std::sync::Arc;

use bevy::log::{debug, info};
use generational_arena::Arena;

use crate::nif::blend_interpolator::{BlendEntry, EntryHandle, NiBlendInterpolator};
use crate::nif::controller_sequence::{AnimState, NiControllerSequence};
use crate::nif::types::{InterpolatorDesc, NodeId, SequenceAsset, SequenceId};

use super::anim_groups::AnimGroupId;

/// Smoothed weights below this are treated as faded out.
pub const SMOOTHED_WEIGHT_EPSILON: f32 = 1e-3;
const END_TIME_TOLERANCE: f32 = 1e-4;

/// Bumps an easing-in entry tied with an easing-out entry at a node's top priority.
/// At `i8::MAX` the easing-out entries are lowered instead. Returns how many
/// entries changed priority.
pub fn fix_conflicting_priorities(
    sequences: &Arena<NiControllerSequence>,
    blend_nodes: &mut HashMap<NodeId, NiBlendInterpolator>,
) -> usize {
    let state_of = |owner: Option<SequenceId>| {
        owner
            .and_then(|id| sequences.get(id.0))
            .map_or(AnimState::Inactive, NiControllerSequence::state)
    };
    let mut bumped = 0;
    for blend in blend_nodes.values_mut() {
        let high = blend.high_priority();
        let mut incoming = Vec::new();
        let mut outgoing = Vec::new();
        for (handle, entry) in blend.entries() {
            if entry.is_additive || entry.priority != high {
                continue;
            }
            let state = state_of(entry.owner);
            if state.is_easing_in() {
                incoming.push(handle);
            } else if state.is_easing_out() {
                outgoing.push(handle);
            }
        }
        if incoming.is_empty() || outgoing.is_empty() {
            continue;
        }
        // Nothing ranks above i8::MAX, so the outgoing side steps down instead.
        let (handles, priority) = match high.checked_add(1) {
            Some(raised) => (incoming, raised),
            None => (outgoing, high.saturating_sub(1)),
        };
        for handle in handles {
            if blend.entry(handle).is_some_and(|entry| entry.priority != priority) {
                blend.set_priority(handle, priority);
                bumped += 1;
            }
        }
    }
    if bumped > 0 {
        debug!("reprioritized {bumped} conflicting blend entries");
    }
    bumped
}

/// Moves every track's last key to the `end` text key when it disagrees with the
/// declared end time. Returns true if the asset changed.
pub fn fix_inconsistent_end_time(asset: &mut SequenceAsset) -> bool {
    let Some(end) = asset.text_keys.find_time("end") else {
        return false;
    };
    if (end - asset.end_key_time).abs() <= END_TIME_TOLERANCE {
        return false;
    }
    let mut retimed = 0;
    for block in &mut asset.blocks {
        if let InterpolatorDesc::Keyframes(data) = &mut block.interpolator {
            retimed += Arc::make_mut(data).retime_last_keys(end);
        }
    }
    info!(
        "'{}': end key time {} moved to text key end {} ({} tracks)",
        asset.name, asset.end_key_time, end, retimed
    );
    asset.end_key_time = end;
    true
}

/// Moves smoothed weights toward the normalized weights by `1 - exp(-dt / tau)`.
/// Detaching entries whose smoothed weight has faded are removed and returned.
pub fn smooth_blend_weights(
    blend: &mut NiBlendInterpolator,
    dt: f32,
    tau: f32,
) -> Vec<(EntryHandle, BlendEntry)> {
    blend.compute_normalized_weights();
    let alpha = if tau > 0.0 {
        1.0 - (-dt.max(0.0) / tau).exp()
    } else {
        1.0
    };
    let handles: Vec<EntryHandle> = blend
        .entries()
        .filter(|(_, entry)| !entry.is_additive)
        .map(|(handle, _)| handle)
        .collect();
    // A node seen for the first time starts at its targets instead of fading from zero.
    let fresh = blend
        .entries()
        .all(|(_, entry)| entry.smoothed_weight.is_none());

    for handle in &handles {
        if let Some(entry) = blend.entry_mut(*handle) {
            let target = entry.normalized_weight;
            let previous = match entry.smoothed_weight {
                Some(previous) => previous,
                None if fresh => target,
                None => 0.0,
            };
            entry.smoothed_weight = Some(previous + (target - previous) * alpha);
        }
    }

    let faded: Vec<EntryHandle> = blend
        .entries()
        .filter(|(_, entry)| {
            entry.detaching && entry.smoothed_weight.unwrap_or(0.0) < SMOOTHED_WEIGHT_EPSILON
        })
        .map(|(handle, _)| handle)
        .collect();
    let removed: Vec<(EntryHandle, BlendEntry)> = faded
        .into_iter()
        .filter_map(|handle| blend.remove_entry(handle).map(|entry| (handle, entry)))
        .collect();

    // With only detaching entries left the weights keep decaying until removal.
    let live = blend
        .entries()
        .any(|(_, entry)| !entry.is_additive && !entry.detaching);
    let total: f32 = blend
        .entries()
        .filter(|(_, entry)| !entry.is_additive)
        .filter_map(|(_, entry)| entry.smoothed_weight)
        .sum();
    if live && total > 0.0 {
        for handle in &handles {
            if let Some(entry) = blend.entry_mut(*handle) {
                entry.smoothed_weight = entry.smoothed_weight.map(|weight| weight / total);
            }
        }
    }
    removed
}

/// Fills the cached weapon up/down slots through `load` when they are empty.
/// Returns how many slots were populated.
pub fn fix_missing_up_down_anims(
    group: AnimGroupId,
    weapon_up: &mut Option<SequenceId>,
    weapon_down: &mut Option<SequenceId>,
    mut load: impl FnMut(AnimGroupId) -> Option<SequenceId>,
) -> usize {
    let Some((_, up, down)) = group.group().and_then(|g| g.up_down_family()) else {
        return 0;
    };
    let mut populated = 0;
    if weapon_up.is_none() {
        *weapon_up = load(group.with_group(up));
        populated += usize::from(weapon_up.is_some());
    }
    if weapon_down.is_none() {
        *weapon_down = load(group.with_group(down));
        populated += usize::from(weapon_down.is_some());
    }
    populated
}

/// Action end time for a first-person sequence carrying `respectEndKey` whose
/// third-person counterpart ends elsewhere. `None` keeps the default.
pub fn fix_premature_first_person_end(
    first_person: &NiControllerSequence,
    third_person: Option<&NiControllerSequence>,
) -> Option<f32> {
    if !first_person.text_keys.contains("respectEndKey") {
        return None;
    }
    let third_person = third_person?;
    if (third_person.end_key_time - first_person.end_key_time).abs() <= END_TIME_TOLERANCE {
        return None;
    }
    Some(
        first_person
            .text_keys
            .find_time("end")
            .unwrap_or(first_person.end_key_time),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nif::interpolator::{InterpolatorPool, NiInterpolator};
    use crate::nif::key_track::KeyTrack;
    use crate::nif::types::{KeyType, NiKeyframeData, NiQuatTransform};
    use crate::nif_animation::anim_groups::{AnimGroup, HandType};
    use bevy::math::Vec3;

    fn keyframes(end: f32) -> NiKeyframeData {
        NiKeyframeData {
            rotations: None,
            translations: KeyTrack::from_pairs(
                KeyType::Linear,
                &[(0.0, Vec3::ZERO), (end, Vec3::X)],
            )
            .unwrap(),
            scales: KeyTrack::default(),
        }
    }

    #[test]
    fn end_time_follows_end_text_key() {
        let mut asset = SequenceAsset::new("fire")
            .with_block("Bip01", keyframes(0.8), None)
            .with_text_key(0.0, "start")
            .with_text_key(0.5, "hit")
            .with_text_key(1.0, "end");
        assert_eq!(asset.end_key_time, 0.8);
        assert!(fix_inconsistent_end_time(&mut asset));
        assert_eq!(asset.end_key_time, 1.0);
        let InterpolatorDesc::Keyframes(data) = &asset.blocks[0].interpolator else {
            panic!("expected keyframes");
        };
        assert_eq!(data.translations.end_time(), Some(1.0));
        assert!(!fix_inconsistent_end_time(&mut asset));
    }

    #[test]
    fn end_time_fix_needs_an_end_key() {
        let mut asset = SequenceAsset::new("idle").with_block("Bip01", keyframes(0.8), None);
        assert!(!fix_inconsistent_end_time(&mut asset));
        assert_eq!(asset.end_key_time, 0.8);
    }

    #[test]
    fn incoming_entry_is_bumped_over_outgoing() {
        let mut sequences = Arena::new();
        let mut outgoing = NiControllerSequence::new("out");
        outgoing.end_key_time = 1.0;
        outgoing.activate(3, true, 1.0, 0.0, false, None).unwrap();
        outgoing.deactivate(0.5, false);
        let mut incoming = NiControllerSequence::new("in");
        incoming.end_key_time = 1.0;
        incoming.activate(3, true, 1.0, 0.5, false, None).unwrap();
        let out_id = SequenceId(sequences.insert(outgoing));
        let in_id = SequenceId(sequences.insert(incoming));

        let mut pool = InterpolatorPool::new();
        let mut blend = NiBlendInterpolator::default();
        let a = pool.insert(NiInterpolator::pose(NiQuatTransform::INVALID));
        let b = pool.insert(NiInterpolator::pose(NiQuatTransform::INVALID));
        blend.add_entry(a, Some(out_id), 1.0, 3, 1.0);
        let bumped_handle = blend.add_entry(b, Some(in_id), 1.0, 3, 0.0).unwrap();
        let mut nodes = HashMap::from([(NodeId(0), blend)]);

        assert_eq!(fix_conflicting_priorities(&sequences, &mut nodes), 1);
        assert_eq!(nodes[&NodeId(0)].entry(bumped_handle).unwrap().priority, 4);
        assert_eq!(fix_conflicting_priorities(&sequences, &mut nodes), 0);
    }

    #[test]
    fn smoothing_fades_detached_entries() {
        let mut pool = InterpolatorPool::new();
        let a = pool.insert(NiInterpolator::pose(NiQuatTransform::INVALID));
        let b = pool.insert(NiInterpolator::pose(NiQuatTransform::INVALID));
        let mut blend = NiBlendInterpolator::default();
        let old = blend.add_entry(a, None, 1.0, 0, 1.0).unwrap();
        assert!(smooth_blend_weights(&mut blend, 0.016, 0.1).is_empty());
        assert_eq!(blend.entry(old).unwrap().smoothed_weight, Some(1.0));

        let new = blend.add_entry(b, None, 1.0, 0, 1.0).unwrap();
        blend.begin_detach(old);
        let mut removed = Vec::new();
        for _ in 0..200 {
            removed.extend(smooth_blend_weights(&mut blend, 0.016, 0.1));
            let total: f32 = blend.entries().filter_map(|(_, e)| e.smoothed_weight).sum();
            assert!((total - 1.0).abs() < 1e-4);
            if !removed.is_empty() {
                break;
            }
        }
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].1.interpolator, a);
        assert!(blend.entry(new).unwrap().smoothed_weight.unwrap() > 0.99);
    }

    #[test]
    fn tie_at_max_priority_lowers_outgoing() {
        let mut sequences = Arena::new();
        let mut outgoing = NiControllerSequence::new("out");
        outgoing.end_key_time = 1.0;
        outgoing.activate(i8::MAX, true, 1.0, 0.0, false, None).unwrap();
        outgoing.deactivate(0.5, false);
        let mut incoming = NiControllerSequence::new("in");
        incoming.end_key_time = 1.0;
        incoming.activate(i8::MAX, true, 1.0, 0.5, false, None).unwrap();
        let out_id = SequenceId(sequences.insert(outgoing));
        let in_id = SequenceId(sequences.insert(incoming));

        let mut pool = InterpolatorPool::new();
        let mut blend = NiBlendInterpolator::default();
        let a = pool.insert(NiInterpolator::pose(NiQuatTransform::INVALID));
        let b = pool.insert(NiInterpolator::pose(NiQuatTransform::INVALID));
        let out_handle = blend.add_entry(a, Some(out_id), 1.0, i8::MAX, 1.0).unwrap();
        let in_handle = blend.add_entry(b, Some(in_id), 1.0, i8::MAX, 0.0).unwrap();
        let mut nodes = HashMap::from([(NodeId(0), blend)]);

        assert_eq!(fix_conflicting_priorities(&sequences, &mut nodes), 1);
        let blend = &nodes[&NodeId(0)];
        assert_eq!(blend.entry(in_handle).unwrap().priority, i8::MAX);
        assert_eq!(blend.entry(out_handle).unwrap().priority, i8::MAX - 1);
        assert_eq!(fix_conflicting_priorities(&sequences, &mut nodes), 0);
    }

    #[test]
    fn lone_detaching_entry_fades_out() {
        let mut pool = InterpolatorPool::new();
        let a = pool.insert(NiInterpolator::pose(NiQuatTransform::INVALID));
        let mut blend = NiBlendInterpolator::default();
        let handle = blend.add_entry(a, None, 1.0, 0, 1.0).unwrap();
        smooth_blend_weights(&mut blend, 0.016, 0.1);
        assert_eq!(blend.entry(handle).unwrap().smoothed_weight, Some(1.0));

        blend.begin_detach(handle);
        let mut removed = Vec::new();
        let mut last = 1.0;
        for _ in 0..200 {
            removed.extend(smooth_blend_weights(&mut blend, 0.016, 0.1));
            let Some(entry) = blend.entry(handle) else {
                break;
            };
            let weight = entry.smoothed_weight.unwrap();
            assert!(weight < last, "{weight} did not decay from {last}");
            last = weight;
        }
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].1.interpolator, a);
        assert!(blend.is_empty());
    }

    #[test]
    fn up_down_slots_are_populated_on_demand() {
        let mut arena = Arena::new();
        let up_id = SequenceId(arena.insert(()));
        let mut up = None;
        let mut down = None;
        let mut requested = Vec::new();
        let group = AnimGroupId::new(AnimGroup::Aim, HandType::TwoHandRifle);
        let populated = fix_missing_up_down_anims(group, &mut up, &mut down, |id| {
            requested.push(id);
            (id.group() == Some(AnimGroup::AimUp)).then_some(up_id)
        });
        assert_eq!(populated, 1);
        assert_eq!(up, Some(up_id));
        assert_eq!(down, None);
        assert_eq!(
            requested,
            vec![
                AnimGroupId::new(AnimGroup::AimUp, HandType::TwoHandRifle),
                AnimGroupId::new(AnimGroup::AimDown, HandType::TwoHandRifle)
            ]
        );
        assert_eq!(
            fix_missing_up_down_anims(AnimGroup::Idle.into(), &mut up, &mut down, |_| None),
            0
        );
    }

    #[test]
    fn first_person_keeps_authored_end() {
        let mut first = NiControllerSequence::new("1p");
        first.end_key_time = 1.2;
        let mut third = NiControllerSequence::new("3p");
        third.end_key_time = 0.9;
        assert_eq!(fix_premature_first_person_end(&first, Some(&third)), None);
        first.text_keys.insert(crate::nif::types::TextKey::new(0.0, "respectEndKey"));
        assert_eq!(fix_premature_first_person_end(&first, Some(&third)), Some(1.2));
        assert_eq!(fix_premature_first_person_end(&first, None), None);
    }
}
