use super::blend_interpolator::EntryHandle;
use super::error::{BlendError, Result};
use super::types::{CycleType, InterpolatorId, NodeId, SequenceId, TextKey, TextKeyList};
use bevy::log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnimState {
    #[default]
    Inactive,
    Animating,
    EaseIn,
    EaseOut,
    TransSource,
    TransDest,
    MorphSource,
}

impl AnimState {
    pub fn is_active(self) -> bool {
        self != AnimState::Inactive
    }

    pub fn is_easing_in(self) -> bool {
        matches!(self, AnimState::EaseIn | AnimState::TransDest)
    }

    pub fn is_easing_out(self) -> bool {
        matches!(
            self,
            AnimState::EaseOut | AnimState::TransSource | AnimState::MorphSource
        )
    }
}

/// State change reported by [`NiControllerSequence::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceTransition {
    EaseInComplete,
    /// Reached `Inactive`; the owner must detach the blend entries.
    Deactivated,
}

#[derive(Debug, Clone)]
pub struct ControlledBlock {
    pub node: NodeId,
    pub node_name: String,
    pub interpolator: InterpolatorId,
    /// Overrides the sequence priority for this block.
    pub priority: Option<i8>,
    pub blend_entry: Option<EntryHandle>,
}

/// A playable sequence: controlled blocks plus the activation state machine.
#[derive(Debug, Clone)]
pub struct NiControllerSequence {
    pub name: String,
    pub blocks: Vec<ControlledBlock>,
    pub text_keys: TextKeyList,
    pub cycle_type: CycleType,
    pub frequency: f32,
    pub begin_key_time: f32,
    pub end_key_time: f32,
    pub is_additive: bool,
    /// Removed by the manager once it becomes inactive.
    pub is_temporary: bool,
    state: AnimState,
    weight: f32,
    priority: i8,
    // Anchors are taken at the first update after a state change.
    offset: Option<f32>,
    start_frame: f32,
    ease_start: Option<f32>,
    ease_duration: f32,
    ease_from: f32,
    ease_spinner: f32,
    last_time: Option<f32>,
    last_scaled_time: f32,
    partner: Option<SequenceId>,
}

impl NiControllerSequence {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blocks: Vec::new(),
            text_keys: TextKeyList::default(),
            cycle_type: CycleType::Loop,
            frequency: 1.0,
            begin_key_time: 0.0,
            end_key_time: 0.0,
            is_additive: false,
            is_temporary: false,
            state: AnimState::Inactive,
            weight: 1.0,
            priority: 0,
            offset: None,
            start_frame: 0.0,
            ease_start: None,
            ease_duration: 0.0,
            ease_from: 1.0,
            ease_spinner: 0.0,
            last_time: None,
            last_scaled_time: 0.0,
            partner: None,
        }
    }

    pub fn state(&self) -> AnimState {
        self.state
    }

    pub fn weight(&self) -> f32 {
        self.weight
    }

    pub fn set_weight(&mut self, weight: f32) {
        self.weight = weight.max(0.0);
    }

    pub fn priority(&self) -> i8 {
        self.priority
    }

    pub fn block_priority(&self, block: &ControlledBlock) -> i8 {
        block.priority.unwrap_or(self.priority)
    }

    pub fn ease_spinner(&self) -> f32 {
        self.ease_spinner
    }

    pub fn last_scaled_time(&self) -> f32 {
        self.last_scaled_time
    }

    /// False until the first update after activation.
    pub fn has_started(&self) -> bool {
        self.last_time.is_some()
    }

    pub fn partner(&self) -> Option<SequenceId> {
        self.partner
    }

    pub fn set_partner(&mut self, partner: Option<SequenceId>) {
        self.partner = partner;
    }

    pub fn duration(&self) -> f32 {
        (self.end_key_time - self.begin_key_time).max(0.0)
    }

    pub fn find_block(&self, node: NodeId) -> Option<&ControlledBlock> {
        self.blocks.iter().find(|block| block.node == node)
    }

    /// Sorted `morph:` tags.
    pub fn morph_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self
            .text_keys
            .morph_keys()
            .into_iter()
            .map(|(tag, _)| tag)
            .collect();
        tags.sort();
        tags.dedup();
        tags
    }

    pub fn activate(
        &mut self,
        priority: i8,
        start_over: bool,
        weight: f32,
        ease_in: f32,
        transition: bool,
        start_frame: Option<f32>,
    ) -> Result<()> {
        if self.state.is_active() {
            return Err(BlendError::AlreadyActive(self.name.clone()));
        }
        self.priority = priority;
        self.weight = weight.max(0.0);
        self.start_frame = match start_frame {
            Some(frame) => frame,
            None if start_over || !self.has_started() => self.begin_key_time,
            None => self.last_scaled_time,
        };
        self.offset = None;
        self.last_time = None;
        self.ease_start = None;
        if ease_in > 0.0 {
            self.state = if transition {
                AnimState::TransDest
            } else {
                AnimState::EaseIn
            };
            self.ease_duration = ease_in;
            self.ease_spinner = 0.0;
        } else {
            self.state = AnimState::Animating;
            self.ease_spinner = 1.0;
        }
        debug!("sequence '{}' activated as {:?}", self.name, self.state);
        Ok(())
    }

    /// Returns true if the sequence went straight to `Inactive`.
    pub fn deactivate(&mut self, ease_out: f32, transition: bool) -> bool {
        if !self.state.is_active() {
            return false;
        }
        if ease_out > 0.0 {
            self.state = if transition {
                AnimState::TransSource
            } else {
                AnimState::EaseOut
            };
            self.begin_ease_out(ease_out);
            false
        } else {
            self.stop();
            true
        }
    }

    /// Fades the sequence out as the source of a morph.
    pub fn begin_morph_source(&mut self, duration: f32) {
        if !self.state.is_active() {
            return;
        }
        if duration <= 0.0 {
            self.stop();
            return;
        }
        self.state = AnimState::MorphSource;
        self.begin_ease_out(duration);
    }

    fn begin_ease_out(&mut self, duration: f32) {
        self.ease_duration = duration;
        self.ease_start = None;
        self.ease_from = self.ease_spinner;
    }

    fn stop(&mut self) {
        self.state = AnimState::Inactive;
        self.ease_spinner = 0.0;
        self.partner = None;
    }

    /// Advances the state machine to `time`. A `synced_frame` overrides the local clock
    /// while the sequence follows a morph source.
    pub fn update(&mut self, time: f32, synced_frame: Option<f32>) -> Option<SequenceTransition> {
        if !self.state.is_active() {
            return None;
        }
        let offset = *self.offset.get_or_insert(time);
        let mut transition = None;

        if self.state.is_easing_in() || self.state.is_easing_out() {
            let ease_start = *self.ease_start.get_or_insert(time);
            let progress = if self.ease_duration > 0.0 {
                ((time - ease_start) / self.ease_duration).clamp(0.0, 1.0)
            } else {
                1.0
            };
            if self.state.is_easing_in() {
                if progress >= 1.0 {
                    self.state = AnimState::Animating;
                    self.ease_spinner = 1.0;
                    transition = Some(SequenceTransition::EaseInComplete);
                } else {
                    self.ease_spinner = progress;
                }
            } else if progress >= 1.0 {
                self.stop();
                transition = Some(SequenceTransition::Deactivated);
            } else {
                self.ease_spinner = self.ease_from * (1.0 - progress);
            }
        } else {
            self.ease_spinner = 1.0;
        }

        let scaled = match synced_frame {
            Some(frame) => {
                if transition == Some(SequenceTransition::EaseInComplete) {
                    // Keep running from the synced frame on the local clock.
                    self.offset = Some(time);
                    self.start_frame = frame;
                    self.partner = None;
                }
                frame
            }
            None => self.scaled_time_from(offset, time),
        };
        self.last_time = Some(time);
        self.last_scaled_time = scaled;
        transition
    }

    /// Key time for `time` on the sequence clock. Anchors the clock if needed.
    pub fn compute_scaled_time(&mut self, time: f32) -> f32 {
        let offset = *self.offset.get_or_insert(time);
        self.scaled_time_from(offset, time)
    }

    fn scaled_time_from(&self, offset: f32, time: f32) -> f32 {
        let unbounded = self.start_frame + (time - offset) * self.frequency;
        self.wrap_key_time(unbounded)
    }

    /// Applies the cycle type to an unbounded key time.
    pub fn wrap_key_time(&self, unbounded: f32) -> f32 {
        let begin = self.begin_key_time;
        let duration = self.duration();
        if duration <= 0.0 {
            return begin;
        }
        match self.cycle_type {
            CycleType::Loop => begin + (unbounded - begin).rem_euclid(duration),
            CycleType::Reverse => {
                let phase = (unbounded - begin).rem_euclid(2.0 * duration);
                if phase > duration {
                    begin + 2.0 * duration - phase
                } else {
                    begin + phase
                }
            }
            CycleType::Clamp => unbounded.clamp(begin, self.end_key_time),
        }
    }

    /// Whether `self` may be time-synced to `partner`.
    pub fn can_sync_to(&self, own_id: SequenceId, partner: &NiControllerSequence) -> bool {
        if partner.partner == Some(own_id) {
            debug!(
                "sequence '{}' cannot sync to '{}': circular partner",
                self.name, partner.name
            );
            return false;
        }
        self.morph_tags() == partner.morph_tags()
    }

    /// Time in this sequence equivalent to `partner_time` in `partner`, matched through
    /// shared `morph:` keys or proportionally over the key range.
    pub fn find_corresponding_morph_frame(
        &self,
        partner: &NiControllerSequence,
        partner_time: f32,
    ) -> f32 {
        let ours = self.text_keys.morph_keys();
        let mut anchors = vec![(partner.begin_key_time, self.begin_key_time)];
        for (tag, their_time) in partner.text_keys.morph_keys() {
            if let Some((_, our_time)) = ours.iter().find(|(our_tag, _)| *our_tag == tag) {
                anchors.push((their_time, *our_time));
            }
        }
        anchors.push((partner.end_key_time, self.end_key_time));

        let monotonic = anchors
            .windows(2)
            .all(|pair| pair[1].0 >= pair[0].0 && pair[1].1 >= pair[0].1);
        if !monotonic {
            return self.proportional_frame(partner, partner_time);
        }
        for pair in anchors.windows(2) {
            let ((p0, s0), (p1, s1)) = (pair[0], pair[1]);
            if partner_time >= p0 && partner_time <= p1 {
                let span = p1 - p0;
                let t = if span > 0.0 { (partner_time - p0) / span } else { 0.0 };
                return s0 + t * (s1 - s0);
            }
        }
        self.proportional_frame(partner, partner_time)
    }

    fn proportional_frame(&self, partner: &NiControllerSequence, partner_time: f32) -> f32 {
        let partner_duration = partner.duration();
        if partner_duration <= 0.0 {
            return self.begin_key_time;
        }
        let fraction = ((partner_time - partner.begin_key_time) / partner_duration).clamp(0.0, 1.0);
        self.begin_key_time + fraction * self.duration()
    }

    /// Text keys passed when the clock moved from `previous` to `current`.
    pub fn due_text_keys(&self, previous: Option<f32>, current: f32) -> Vec<&TextKey> {
        let Some(previous) = previous else {
            return self.text_keys.keys_in_range(current, current, true).collect();
        };
        if current >= previous {
            return self.text_keys.keys_in_range(previous, current, false).collect();
        }
        match self.cycle_type {
            CycleType::Reverse => self
                .text_keys
                .iter()
                .filter(|key| key.time >= current && key.time < previous)
                .collect(),
            _ => self
                .text_keys
                .keys_in_range(previous, self.end_key_time, false)
                .chain(
                    self.text_keys
                        .keys_in_range(self.begin_key_time, current, true),
                )
                .collect(),
        }
    }
}
