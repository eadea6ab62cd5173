use bevy::log::trace;
use bevy::prelude::*;

use super::bevy_types::AnimationEvent;
use super::engine::AnimationEngine;

/// Advances every actor by the frame delta and forwards the passed text keys.
pub fn advance_animation_engine(
    time: Res<Time>,
    engine: Option<ResMut<AnimationEngine>>,
    mut events: EventWriter<AnimationEvent>,
) {
    let Some(mut engine) = engine else {
        return;
    };
    let fired = engine.advance(time.delta_secs());
    if !fired.is_empty() {
        trace!("forwarding {} animation events", fired.len());
    }
    events.write_batch(fired);
}
