// src/nif_animation/mod.rs

pub mod additive;
pub mod anim_groups;
pub mod animation_setup_system;
pub mod bevy_types; // AnimationEvent
pub mod blend_fixes;
pub mod engine; // AnimationEngine resource and its trigger surface
pub mod override_loader;
pub mod parser_helpers; // path normalization, variant markers
pub mod selector;
pub mod sequence_library;
pub mod text_key_parser;

pub use anim_groups::{AnimGroup, AnimGroupId, HandType, SequenceSlot};
pub use bevy_types::AnimationEvent;
pub use engine::{ActorAnimations, AnimationEngine, PersonAnimations};
pub use override_loader::{OverrideLoadSummary, load_override_tree};
pub use selector::{
    ActorInfo, AlwaysTrue, AmmoState, AnimationSelector, ConditionEvaluator, OverrideScope,
    Resolution, RuleKey, SelectionContext, VariantSet,
};
pub use sequence_library::{MemorySequenceLoader, SequenceLibrary, SequenceLoader};
pub use text_key_parser::{TextKeyEvent, TextKeyEventKind};
