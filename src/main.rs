use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use bevy::log::LogPlugin;
use bevy::prelude::*;
use nif_blend::nif::key_track::KeyTrack;
use nif_blend::nif_animation::animation_setup_system::advance_animation_engine;
use nif_blend::nif_animation::{
    ActorInfo, AlwaysTrue, AnimGroup, AnimationEvent, MemorySequenceLoader, OverrideScope,
};
use nif_blend::{
    AnimationEngine, BlendConfig, KeyType, NiKeyframeData, NifBlendPlugin, NodePalette,
    SequenceAsset,
};

const PLAYER: u32 = 0x14;
const IDLE_PATH: &str = "characters/_male/idle.kf";

fn demo_idle() -> Result<SequenceAsset> {
    let sway = NiKeyframeData {
        rotations: None,
        translations: KeyTrack::from_pairs(
            KeyType::Linear,
            &[(0.0, Vec3::ZERO), (0.5, Vec3::new(0.0, 0.0, 2.0)), (1.0, Vec3::ZERO)],
        )?,
        scales: KeyTrack::default(),
    };
    Ok(SequenceAsset::new("Idle")
        .with_block("Bip01 Spine", sway, None)
        .with_text_key(0.0, "start")
        .with_text_key(0.5, "Sound: NPCHumanBreath")
        .with_text_key(1.0, "end"))
}

fn log_events(mut events: EventReader<AnimationEvent>) {
    for event in events.read() {
        info!(
            "{:08X} '{}' @ {:.2}: {:?}",
            event.actor, event.sequence, event.time, event.kind
        );
    }
}

fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => {
            BlendConfig::load(&path).with_context(|| format!("loading blend config {path}"))?
        }
        None => BlendConfig::default(),
    };
    let loader = MemorySequenceLoader::new().with(IDLE_PATH, demo_idle()?);
    let mut engine = AnimationEngine::new(config, Box::new(loader), Box::new(AlwaysTrue))
        .context("creating animation engine")?;

    let palette = NodePalette::from_names(["Bip01", "Bip01 Spine"])?;
    let player = ActorInfo {
        ref_id: PLAYER,
        ..ActorInfo::default()
    };
    engine.add_actor(player, palette, None);
    engine.set_override_path(OverrideScope::Global, false, true, IDLE_PATH, None, false);
    if !engine.play_anim_group(PLAYER, AnimGroup::Idle.into(), false) {
        bail!("no idle override played for {PLAYER:08X}");
    }

    let mut app = App::new();
    app.add_plugins((MinimalPlugins, LogPlugin::default(), NifBlendPlugin))
        .insert_resource(engine)
        .add_systems(Update, log_events.after(advance_animation_engine));
    for _ in 0..90 {
        app.update();
        thread::sleep(Duration::from_millis(16));
    }

    let engine = app.world().resource::<AnimationEngine>();
    if let Some(pose) = engine
        .manager(PLAYER, false)
        .and_then(|manager| manager.node_pose("Bip01 Spine"))
    {
        info!("spine after {:.2}s: {:?}", engine.time(), pose.translate);
    }
    Ok(())
}
