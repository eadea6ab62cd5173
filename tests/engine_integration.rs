use std::fs::{self, File};
use std::path::Path;

use bevy::math::Vec3;
use bevy::prelude::*;
use nif_blend::nif::key_track::KeyTrack;
use nif_blend::nif_animation::{
    ActorInfo, AlwaysTrue, AnimGroup, AnimationEvent, MemorySequenceLoader, TextKeyEventKind,
};
use nif_blend::{
    AnimationEngine, BlendConfig, KeyType, NiKeyframeData, NifBlendPlugin, NodePalette,
    SequenceAsset,
};

fn track(keys: &[(f32, Vec3)]) -> NiKeyframeData {
    NiKeyframeData {
        rotations: None,
        translations: KeyTrack::from_pairs(KeyType::Linear, keys).unwrap(),
        scales: KeyTrack::default(),
    }
}

fn holding(name: &str, value: Vec3) -> SequenceAsset {
    SequenceAsset::new(name).with_block("Bip01", track(&[(0.0, value), (1.0, value)]), None)
}

fn palette() -> NodePalette {
    NodePalette::from_names(["Bip01", "Bip01 Spine", "Bip01 L Hand"]).unwrap()
}

fn actor(ref_id: u32) -> ActorInfo {
    ActorInfo {
        ref_id,
        base_form: 0x7,
        ..ActorInfo::default()
    }
}

fn touch(root: &Path, relative: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    File::create(path).unwrap();
}

fn bip01(engine: &AnimationEngine, ref_id: u32) -> Vec3 {
    engine
        .manager(ref_id, false)
        .and_then(|manager| manager.node_pose("Bip01"))
        .and_then(|pose| pose.translate)
        .unwrap()
}

#[test]
fn override_tree_picks_the_most_specific_tier() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("AnimGroupOverride");
    touch(&root, "_global/Idle.kf");
    touch(&root, "Guns.esp/actor/14/Idle.kf");

    let loader = MemorySequenceLoader::new()
        .with("animgroupoverride/_global/idle.kf", holding("GlobalIdle", Vec3::X))
        .with("animgroupoverride/guns.esp/actor/14/idle.kf", holding("ActorIdle", Vec3::Y));
    let config = BlendConfig {
        override_root: Some(root.clone()),
        mod_load_order: vec!["FalloutNV.esm".to_string(), "Guns.esp".to_string()],
        rng_seed: Some(1),
        ..BlendConfig::default()
    };
    let mut engine = AnimationEngine::new(config, Box::new(loader), Box::new(AlwaysTrue)).unwrap();
    assert!(engine.add_actor(actor(0x14), palette(), None));
    assert!(engine.add_actor(actor(0x15), palette(), None));

    assert!(engine.play_anim_group(0x14, AnimGroup::Idle.into(), false));
    assert!(engine.play_anim_group(0x15, AnimGroup::Idle.into(), false));
    engine.advance(0.1);
    assert!((bip01(&engine, 0x14) - Vec3::Y).length() < 1e-4);
    assert!((bip01(&engine, 0x15) - Vec3::X).length() < 1e-4);

    fs::remove_file(root.join("Guns.esp/actor/14/Idle.kf")).unwrap();
    let summary = engine.reset().unwrap();
    assert_eq!(summary.registered, 1);
    assert_eq!(
        engine.resolve(0x14, AnimGroup::Idle.into(), false).as_deref(),
        Some("animgroupoverride/_global/idle.kf")
    );
}

#[test]
fn end_text_key_retimes_short_tracks() {
    let fire = SequenceAsset::new("Fire")
        .with_block("Bip01", track(&[(0.0, Vec3::ZERO), (0.8, Vec3::X)]), None)
        .with_text_key(0.0, "start")
        .with_text_key(1.0, "end");
    let loader = MemorySequenceLoader::new().with("weapons/fire.kf", fire);
    let mut engine =
        AnimationEngine::new(BlendConfig::default(), Box::new(loader), Box::new(AlwaysTrue))
            .unwrap();
    assert!(engine.add_actor(actor(0x14), palette(), None));
    assert!(engine.play_animation_path(0x14, "Weapons\\Fire.kf", false));

    let started = engine.advance(0.0);
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].kind, TextKeyEventKind::Start);

    engine.advance(0.9);
    assert!((bip01(&engine, 0x14) - Vec3::new(0.9, 0.0, 0.0)).length() < 1e-4);

    let ended = engine.advance(0.2);
    assert!(ended.iter().any(|event| event.kind == TextKeyEventKind::End));
}

#[test]
fn replacing_a_slot_cross_fades() {
    let loader = MemorySequenceLoader::new()
        .with("a/idle.kf", holding("IdleA", Vec3::X))
        .with("b/idle.kf", holding("IdleB", Vec3::Y));
    let mut engine =
        AnimationEngine::new(BlendConfig::default(), Box::new(loader), Box::new(AlwaysTrue))
            .unwrap();
    assert!(engine.add_actor(actor(0x14), palette(), None));
    assert!(engine.play_animation_path(0x14, "a/idle.kf", false));
    engine.advance(0.0);
    engine.advance(1.0);
    assert!((bip01(&engine, 0x14) - Vec3::X).length() < 1e-4);

    assert!(engine.play_animation_path(0x14, "b/idle.kf", false));
    engine.advance(0.1);
    engine.advance(0.2);
    engine.advance(0.1);
    assert!((bip01(&engine, 0x14) - Vec3::Y).length() < 1e-4);

    let manager = engine.manager(0x14, false).unwrap();
    let old = manager.sequence_by_name("IdleA").unwrap();
    assert!(!manager.sequence(old).unwrap().state().is_active());
}

#[test]
fn plugin_forwards_text_keys_as_events() {
    let idle = holding("Idle", Vec3::X).with_text_key(0.0, "start");
    let loader = MemorySequenceLoader::new().with("characters/idle.kf", idle);
    let mut engine =
        AnimationEngine::new(BlendConfig::default(), Box::new(loader), Box::new(AlwaysTrue))
            .unwrap();
    assert!(engine.add_actor(actor(0x14), palette(), None));
    assert!(engine.play_animation_path(0x14, "characters/idle.kf", false));

    let mut app = App::new();
    app.init_resource::<Time>()
        .add_plugins(NifBlendPlugin)
        .insert_resource(engine);
    app.update();

    let events: Vec<AnimationEvent> = app
        .world_mut()
        .resource_mut::<Events<AnimationEvent>>()
        .drain()
        .collect();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].actor, 0x14);
    assert_eq!(events[0].kind, TextKeyEventKind::Start);
}
