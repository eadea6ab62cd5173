use bevy::prelude::*;
pub mod config;
pub mod nif;
pub mod nif_animation;
pub use config::{BlendConfig, BlendFixes};
pub use nif::controller_manager::NiControllerManager;
pub use nif::error::{BlendError, Result};
pub use nif::skeleton::NodePalette;
pub use nif::types::*;
use nif_animation::AnimationEvent;
use nif_animation::animation_setup_system::advance_animation_engine;
pub use nif_animation::{AnimationEngine, SequenceLoader};
/// Registers [`AnimationEvent`] and drives the [`AnimationEngine`] resource, if one is
/// inserted, once per frame.
pub struct NifBlendPlugin;
impl Plugin for NifBlendPlugin {
    fn build(&self, app: &mut App) {
        app.add_event::<AnimationEvent>()
            .add_systems(Update, advance_animation_engine);
    }
}
