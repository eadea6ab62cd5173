use super::interpolator::InterpolatorPool;
use super::types::{InterpolatorId, NiQuatTransform, SequenceId};
use bevy::math::{Quat, Vec3, Vec4};
use bitflags::bitflags;

/// Priority reported when no entry qualifies.
pub const INVALID_PRIORITY: i8 = i8::MIN;
/// Entry handles are a byte wide, as in the NIF runtime.
pub const MAX_ENTRIES: usize = u8::MAX as usize;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BlendFlags: u8 {
        /// Entries are evaluated at their own update time.
        const MANAGER_CONTROLLED = 1;
        const ONLY_USE_HIGHEST_WEIGHT = 1 << 1;
        /// Set whenever an entry changes; cleared by `compute_normalized_weights`.
        const COMPUTE_NORMALIZED_WEIGHTS = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryHandle(pub u8);

/// One sequence's contribution to a node.
#[derive(Debug, Clone, PartialEq)]
pub struct BlendEntry {
    pub interpolator: InterpolatorId,
    pub owner: Option<SequenceId>,
    pub weight: f32,
    pub normalized_weight: f32,
    pub priority: i8,
    pub ease_spinner: f32,
    pub update_time: Option<f32>,
    pub is_additive: bool,
    /// Only tracked while blend smoothing is enabled.
    pub smoothed_weight: Option<f32>,
    /// The owner deactivated; the entry lingers until its smoothed weight fades out.
    pub detaching: bool,
}

impl BlendEntry {
    fn contribution(&self) -> f32 {
        self.weight * self.ease_spinner
    }

    /// Weight actually used when evaluating the node.
    pub fn effective_weight(&self) -> f32 {
        self.smoothed_weight.unwrap_or(self.normalized_weight)
    }
}

/// Per-node blender: combines the entries of every sequence controlling the node.
#[derive(Debug, Clone)]
pub struct NiBlendInterpolator {
    entries: Vec<Option<BlendEntry>>,
    flags: BlendFlags,
    weight_threshold: f32,
    high_priority: i8,
    next_high_priority: i8,
    high_sum: f32,
    next_high_sum: f32,
    high_ease_spinner: f32,
}

impl Default for NiBlendInterpolator {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            flags: BlendFlags::MANAGER_CONTROLLED,
            weight_threshold: 0.0,
            high_priority: INVALID_PRIORITY,
            next_high_priority: INVALID_PRIORITY,
            high_sum: 0.0,
            next_high_sum: 0.0,
            high_ease_spinner: 0.0,
        }
    }
}

impl NiBlendInterpolator {
    pub fn new(manager_controlled: bool, weight_threshold: f32, only_use_highest_weight: bool) -> Self {
        let mut flags = BlendFlags::empty();
        flags.set(BlendFlags::MANAGER_CONTROLLED, manager_controlled);
        flags.set(BlendFlags::ONLY_USE_HIGHEST_WEIGHT, only_use_highest_weight);
        Self {
            flags,
            weight_threshold: weight_threshold.max(0.0),
            ..Self::default()
        }
    }

    pub fn flags(&self) -> BlendFlags {
        self.flags
    }

    pub fn is_dirty(&self) -> bool {
        self.flags.contains(BlendFlags::COMPUTE_NORMALIZED_WEIGHTS)
    }

    fn mark_dirty(&mut self) {
        self.flags.insert(BlendFlags::COMPUTE_NORMALIZED_WEIGHTS);
    }

    pub fn set_only_use_highest_weight(&mut self, enabled: bool) {
        if self.flags.contains(BlendFlags::ONLY_USE_HIGHEST_WEIGHT) != enabled {
            self.flags.set(BlendFlags::ONLY_USE_HIGHEST_WEIGHT, enabled);
            self.mark_dirty();
        }
    }

    pub fn set_weight_threshold(&mut self, threshold: f32) {
        let threshold = threshold.max(0.0);
        if self.weight_threshold != threshold {
            self.weight_threshold = threshold;
            self.mark_dirty();
        }
    }

    pub fn add_entry(
        &mut self,
        interpolator: InterpolatorId,
        owner: Option<SequenceId>,
        weight: f32,
        priority: i8,
        ease_spinner: f32,
    ) -> Option<EntryHandle> {
        let entry = BlendEntry {
            interpolator,
            owner,
            weight: weight.max(0.0),
            normalized_weight: 0.0,
            priority,
            ease_spinner: ease_spinner.clamp(0.0, 1.0),
            update_time: None,
            is_additive: false,
            smoothed_weight: None,
            detaching: false,
        };
        let index = match self.entries.iter().position(Option::is_none) {
            Some(index) => index,
            None if self.entries.len() < MAX_ENTRIES => {
                self.entries.push(None);
                self.entries.len() - 1
            }
            None => return None,
        };
        self.entries[index] = Some(entry);
        self.mark_dirty();
        u8::try_from(index).ok().map(EntryHandle)
    }

    pub fn remove_entry(&mut self, handle: EntryHandle) -> Option<BlendEntry> {
        let removed = self.entries.get_mut(usize::from(handle.0))?.take()?;
        while matches!(self.entries.last(), Some(None)) {
            self.entries.pop();
        }
        self.mark_dirty();
        Some(removed)
    }

    pub fn entry(&self, handle: EntryHandle) -> Option<&BlendEntry> {
        self.entries.get(usize::from(handle.0))?.as_ref()
    }

    // Fields that feed the weight computation go through the setters below.
    pub(crate) fn entry_mut(&mut self, handle: EntryHandle) -> Option<&mut BlendEntry> {
        self.entries.get_mut(usize::from(handle.0))?.as_mut()
    }

    pub fn entries(&self) -> impl Iterator<Item = (EntryHandle, &BlendEntry)> {
        self.entries.iter().enumerate().filter_map(|(index, entry)| {
            let entry = entry.as_ref()?;
            u8::try_from(index).ok().map(|i| (EntryHandle(i), entry))
        })
    }

    pub fn entry_count(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(Option::is_none)
    }

    pub fn find_entry(&self, owner: SequenceId) -> Option<EntryHandle> {
        self.entries()
            .find(|(_, entry)| entry.owner == Some(owner))
            .map(|(handle, _)| handle)
    }

    fn update_entry(&mut self, handle: EntryHandle, apply: impl FnOnce(&mut BlendEntry) -> bool) {
        let changed = match self.entry_mut(handle) {
            Some(entry) => apply(entry),
            None => false,
        };
        if changed {
            self.mark_dirty();
        }
    }

    pub fn set_weight(&mut self, handle: EntryHandle, weight: f32) {
        let weight = weight.max(0.0);
        self.update_entry(handle, |entry| {
            let changed = entry.weight != weight;
            entry.weight = weight;
            changed
        });
    }

    pub fn set_priority(&mut self, handle: EntryHandle, priority: i8) {
        self.update_entry(handle, |entry| {
            let changed = entry.priority != priority;
            entry.priority = priority;
            changed
        });
    }

    pub fn set_ease_spinner(&mut self, handle: EntryHandle, ease_spinner: f32) {
        let ease_spinner = ease_spinner.clamp(0.0, 1.0);
        self.update_entry(handle, |entry| {
            let changed = entry.ease_spinner != ease_spinner;
            entry.ease_spinner = ease_spinner;
            changed
        });
    }

    pub fn set_additive(&mut self, handle: EntryHandle, is_additive: bool) {
        self.update_entry(handle, |entry| {
            let changed = entry.is_additive != is_additive;
            entry.is_additive = is_additive;
            changed
        });
    }

    pub fn set_update_time(&mut self, handle: EntryHandle, time: f32) {
        if let Some(entry) = self.entry_mut(handle) {
            entry.update_time = Some(time);
        }
    }

    /// Zeroes the entry's target weight and flags it for removal once faded.
    pub fn begin_detach(&mut self, handle: EntryHandle) {
        self.update_entry(handle, |entry| {
            let changed = !entry.detaching || entry.weight != 0.0;
            entry.detaching = true;
            entry.weight = 0.0;
            changed
        });
    }

    /// Reclaims a detaching entry for an owner that became active again.
    /// Returns false if the entry was not detaching.
    pub fn resume_entry(
        &mut self,
        handle: EntryHandle,
        weight: f32,
        priority: i8,
        ease_spinner: f32,
    ) -> bool {
        let Some(entry) = self.entry_mut(handle) else {
            return false;
        };
        if !entry.detaching {
            return false;
        }
        entry.detaching = false;
        entry.weight = weight.max(0.0);
        entry.priority = priority;
        entry.ease_spinner = ease_spinner.clamp(0.0, 1.0);
        self.mark_dirty();
        true
    }

    /// Highest priority among non-additive entries.
    pub fn high_priority(&self) -> i8 {
        self.non_additive()
            .map(|(_, entry)| entry.priority)
            .max()
            .unwrap_or(INVALID_PRIORITY)
    }

    /// Second highest distinct priority among non-additive entries.
    pub fn next_high_non_additive_priority(&self) -> i8 {
        let high = self.high_priority();
        self.non_additive()
            .map(|(_, entry)| entry.priority)
            .filter(|priority| *priority < high)
            .max()
            .unwrap_or(INVALID_PRIORITY)
    }

    /// Class totals from the last weight computation: `(high, next_high, high_ease)`.
    pub fn cached_class_sums(&self) -> (f32, f32, f32) {
        (self.high_sum, self.next_high_sum, self.high_ease_spinner)
    }

    fn non_additive(&self) -> impl Iterator<Item = (EntryHandle, &BlendEntry)> {
        self.entries().filter(|(_, entry)| !entry.is_additive)
    }

    /// Recomputes normalized weights if an entry changed since the last call.
    pub fn compute_normalized_weights(&mut self) {
        if !self.is_dirty() {
            return;
        }
        self.flags.remove(BlendFlags::COMPUTE_NORMALIZED_WEIGHTS);

        let mut active = Vec::new();
        for (index, slot) in self.entries.iter_mut().enumerate() {
            if let Some(entry) = slot {
                entry.normalized_weight = 0.0;
                // Detaching entries target zero so they can fade out.
                if !entry.is_additive && !entry.detaching {
                    active.push(index);
                }
            }
        }

        match active.len() {
            0 => {
                self.high_priority = INVALID_PRIORITY;
                self.next_high_priority = INVALID_PRIORITY;
                self.high_sum = 0.0;
                self.next_high_sum = 0.0;
                self.high_ease_spinner = 0.0;
                return;
            }
            1 => {
                if let Some(entry) = self.entries[active[0]].as_mut() {
                    entry.normalized_weight = 1.0;
                    self.high_priority = entry.priority;
                    self.next_high_priority = INVALID_PRIORITY;
                    self.high_sum = entry.contribution();
                    self.next_high_sum = 0.0;
                    self.high_ease_spinner = entry.ease_spinner;
                }
                return;
            }
            2 => self.compute_pair(active[0], active[1]),
            _ => self.compute_classes(&active),
        }

        self.apply_weight_threshold(&active);
        if self.flags.contains(BlendFlags::ONLY_USE_HIGHEST_WEIGHT) {
            self.keep_highest_weight(&active);
        }
    }

    /// Closed form for exactly two non-additive entries.
    fn compute_pair(&mut self, first: usize, second: usize) {
        let (Some(a), Some(b)) = (self.entries[first].clone(), self.entries[second].clone())
        else {
            return;
        };
        let (mut ra, mut rb) = (a.contribution(), b.contribution());
        let (mut ea, mut eb) = (a.ease_spinner, b.ease_spinner);
        if ra <= 0.0 && rb <= 0.0 {
            ra = a.weight;
            rb = b.weight;
            ea = 1.0;
            eb = 1.0;
        }

        let (wa, wb) = if ra <= 0.0 && rb <= 0.0 {
            (0.0, 0.0)
        } else if ra <= 0.0 {
            (0.0, 1.0)
        } else if rb <= 0.0 {
            (1.0, 0.0)
        } else if a.priority == b.priority {
            let total = ra + rb;
            (ra / total, rb / total)
        } else if a.priority > b.priority {
            let low = (1.0 - ea) * rb;
            let total = ra + low;
            (ra / total, low / total)
        } else {
            let low = (1.0 - eb) * ra;
            let total = rb + low;
            (low / total, rb / total)
        };

        let (high, next_high) = if a.priority >= b.priority { (&a, &b) } else { (&b, &a) };
        self.high_priority = high.priority;
        self.next_high_priority = if a.priority == b.priority {
            INVALID_PRIORITY
        } else {
            next_high.priority
        };
        self.high_sum = high.contribution();
        self.next_high_sum = next_high.contribution();
        self.high_ease_spinner = high.ease_spinner;

        if let Some(entry) = self.entries[first].as_mut() {
            entry.normalized_weight = wa;
        }
        if let Some(entry) = self.entries[second].as_mut() {
            entry.normalized_weight = wb;
        }
    }

    /// Two highest priority classes among contributing entries share the weight.
    fn compute_classes(&mut self, active: &[usize]) {
        let mut contributions: Vec<(usize, i8, f32, f32)> = active
            .iter()
            .filter_map(|index| {
                let entry = self.entries[*index].as_ref()?;
                Some((*index, entry.priority, entry.contribution(), entry.ease_spinner))
            })
            .collect();
        if contributions.iter().all(|(_, _, r, _)| *r <= 0.0) {
            // Everything is eased out: fall back to the raw weights.
            for contribution in &mut contributions {
                if let Some(entry) = self.entries[contribution.0].as_ref() {
                    contribution.2 = entry.weight;
                    contribution.3 = 1.0;
                }
            }
        }
        contributions.retain(|(_, _, r, _)| *r > 0.0);

        let Some(high) = contributions.iter().map(|c| c.1).max() else {
            self.high_priority = INVALID_PRIORITY;
            self.next_high_priority = INVALID_PRIORITY;
            self.high_sum = 0.0;
            self.next_high_sum = 0.0;
            self.high_ease_spinner = 0.0;
            return;
        };
        let next_high = contributions
            .iter()
            .map(|c| c.1)
            .filter(|priority| *priority < high)
            .max()
            .unwrap_or(INVALID_PRIORITY);

        let mut high_sum = 0.0;
        let mut next_high_sum = 0.0;
        let mut high_ease = 0.0_f32;
        for (_, priority, r, ease) in &contributions {
            if *priority == high {
                high_sum += r;
                high_ease = high_ease.max(*ease);
            } else if *priority == next_high {
                next_high_sum += r;
            }
        }
        self.high_priority = high;
        self.next_high_priority = next_high;
        self.high_sum = high_sum;
        self.next_high_sum = next_high_sum;
        self.high_ease_spinner = high_ease;

        let low_scale = 1.0 - high_ease;
        let total = high_sum + low_scale * next_high_sum;
        for (index, priority, r, _) in contributions {
            let weight = if priority == high {
                r / total
            } else if priority == next_high {
                low_scale * r / total
            } else {
                0.0
            };
            if let Some(entry) = self.entries[index].as_mut() {
                entry.normalized_weight = weight;
            }
        }
    }

    fn apply_weight_threshold(&mut self, active: &[usize]) {
        if self.weight_threshold <= 0.0 {
            return;
        }
        let threshold = self.weight_threshold;
        let kept: f32 = active
            .iter()
            .filter_map(|index| self.entries[*index].as_ref())
            .map(|entry| entry.normalized_weight)
            .filter(|weight| *weight >= threshold)
            .sum();
        if kept <= 0.0 {
            return;
        }
        for index in active {
            if let Some(entry) = self.entries[*index].as_mut() {
                entry.normalized_weight = if entry.normalized_weight < threshold {
                    0.0
                } else {
                    entry.normalized_weight / kept
                };
            }
        }
    }

    fn keep_highest_weight(&mut self, active: &[usize]) {
        let mut winner: Option<(usize, f32)> = None;
        for index in active {
            if let Some(entry) = self.entries[*index].as_ref() {
                if entry.normalized_weight > winner.map_or(0.0, |(_, weight)| weight) {
                    winner = Some((*index, entry.normalized_weight));
                }
            }
        }
        let Some((winner, _)) = winner else {
            return;
        };
        for index in active {
            if let Some(entry) = self.entries[*index].as_mut() {
                entry.normalized_weight = if *index == winner { 1.0 } else { 0.0 };
            }
        }
    }

    /// Time an entry is queried at.
    pub fn entry_time(&self, entry: &BlendEntry, shared_time: f32) -> f32 {
        if self.flags.contains(BlendFlags::MANAGER_CONTROLLED) {
            entry.update_time.unwrap_or(shared_time)
        } else {
            shared_time
        }
    }

    /// Weighted blend of every non-additive entry. Additive deltas are layered on
    /// afterwards by the additive overlay pass.
    pub fn blend_values(&mut self, time: f32, pool: &mut InterpolatorPool) -> NiQuatTransform {
        self.compute_normalized_weights();

        let contributors: Vec<(InterpolatorId, f32, f32)> = self
            .non_additive()
            .filter(|(_, entry)| entry.effective_weight() > 0.0)
            .map(|(_, entry)| {
                (
                    entry.interpolator,
                    entry.effective_weight(),
                    self.entry_time(entry, time),
                )
            })
            .collect();

        if let [(interpolator, _, entry_time)] = contributors.as_slice() {
            return pool.evaluate(*interpolator, *entry_time);
        }

        let mut translate_sum = Vec3::ZERO;
        let mut translate_weight = 0.0;
        let mut rotate_sum = Vec4::ZERO;
        let mut rotate_weight = 0.0;
        let mut reference: Option<Quat> = None;
        let mut scale_sum = 0.0;
        let mut scale_weight = 0.0;

        for (interpolator, weight, entry_time) in contributors {
            let value = pool.evaluate(interpolator, entry_time);
            if !value.is_valid() {
                continue;
            }
            if let Some(translate) = value.translate {
                translate_sum += translate * weight;
                translate_weight += weight;
            }
            if let Some(rotate) = value.rotate {
                let reference = *reference.get_or_insert(rotate);
                let rotate = if reference.dot(rotate) < 0.0 { -rotate } else { rotate };
                rotate_sum += Vec4::from(rotate) * weight;
                rotate_weight += weight;
            }
            if let Some(scale) = value.scale {
                scale_sum += scale * weight;
                scale_weight += weight;
            }
        }

        NiQuatTransform {
            translate: (translate_weight > 0.0).then(|| translate_sum / translate_weight),
            rotate: (rotate_weight > 0.0 && rotate_sum.length_squared() > f32::EPSILON)
                .then(|| Quat::from_vec4(rotate_sum).normalize()),
            scale: (scale_weight > 0.0).then(|| scale_sum / scale_weight),
        }
    }
}
