use bevy::prelude::Event;

use crate::nif::types::FormId;

use super::text_key_parser::TextKeyEventKind;

/// A text key passed by a playing sequence during `advance`.
#[derive(Event, Clone, Debug, PartialEq)]
pub struct AnimationEvent {
    pub actor: FormId,
    pub first_person: bool,
    /// Name of the sequence that carried the key.
    pub sequence: String,
    /// Key time in sequence-local seconds.
    pub time: f32,
    pub kind: TextKeyEventKind,
}

impl AnimationEvent {
    pub fn is_hit(&self) -> bool {
        self.kind == TextKeyEventKind::Hit
    }
}
