use std::collections::HashMap;

use bevy::log::{debug, warn};
use bevy::prelude::Resource;

use crate::config::{BlendConfig, BlendFixes};
use crate::nif::controller_manager::NiControllerManager;
use crate::nif::error::{BlendError, Result};
use crate::nif::skeleton::NodePalette;
use crate::nif::types::{FormId, NiQuatTransform, NodeId, SequenceId};

use super::anim_groups::{AnimGroup, AnimGroupId, SequenceSlot};
use super::bevy_types::AnimationEvent;
use super::blend_fixes::{fix_missing_up_down_anims, fix_premature_first_person_end};
use super::override_loader::{OverrideLoadSummary, load_override_tree};
use super::parser_helpers::{anim_file_stem, normalize_anim_path, validate_anim_path};
use super::selector::{
    ActorInfo, AmmoState, AnimationSelector, ConditionEvaluator, OverrideScope, RuleKey,
    SelectionContext, VariantSet,
};
use super::sequence_library::{SequenceLibrary, SequenceLoader};
use super::text_key_parser::parse_text_key;

#[derive(Debug)]
struct TrackedSequence {
    id: SequenceId,
    previous_time: Option<f32>,
    /// Condition re-checked every tick; the sequence stops once it fails.
    poll_condition: Option<String>,
}

/// One skeleton of an actor (third or first person).
#[derive(Debug)]
pub struct PersonAnimations {
    manager: NiControllerManager,
    loaded: HashMap<String, SequenceId>,
    tracked: Vec<TrackedSequence>,
    weapon_up: Option<SequenceId>,
    weapon_down: Option<SequenceId>,
    action_end: Option<f32>,
}

impl PersonAnimations {
    fn new(palette: NodePalette, config: &BlendConfig) -> Self {
        Self {
            manager: NiControllerManager::from_config(palette, config),
            loaded: HashMap::new(),
            tracked: Vec::new(),
            weapon_up: None,
            weapon_down: None,
            action_end: None,
        }
    }

    pub fn manager(&self) -> &NiControllerManager {
        &self.manager
    }

    pub fn weapon_up_down(&self) -> (Option<SequenceId>, Option<SequenceId>) {
        (self.weapon_up, self.weapon_down)
    }

    /// Engine time at which the last played action counts as finished.
    pub fn action_end(&self) -> Option<f32> {
        self.action_end
    }

    fn track(&mut self, id: SequenceId, poll_condition: Option<String>) {
        self.tracked.retain(|tracked| tracked.id != id);
        self.tracked.push(TrackedSequence {
            id,
            previous_time: None,
            poll_condition,
        });
    }

    fn collect_events(
        &mut self,
        actor: FormId,
        first_person: bool,
        conditions: &dyn ConditionEvaluator,
        blend_time: f32,
        events: &mut Vec<AnimationEvent>,
    ) {
        let mut failed = Vec::new();
        let manager = &self.manager;
        self.tracked.retain_mut(|tracked| {
            let Some(sequence) = manager.sequence(tracked.id) else {
                return false;
            };
            if !sequence.state().is_active() {
                return false;
            }
            if let Some(condition) = &tracked.poll_condition {
                if !conditions.evaluate(condition, actor) {
                    debug!("'{}' stopped: condition '{condition}' failed", sequence.name);
                    failed.push(tracked.id);
                    return false;
                }
            }
            let current = sequence.last_scaled_time();
            for key in sequence.due_text_keys(tracked.previous_time, current) {
                events.extend(parse_text_key(key).into_iter().map(|event| AnimationEvent {
                    actor,
                    first_person,
                    sequence: sequence.name.clone(),
                    time: event.time,
                    kind: event.kind,
                }));
            }
            tracked.previous_time = Some(current);
            true
        });
        for id in failed {
            self.manager.deactivate_sequence(id, blend_time);
            for slot in ALL_SLOTS {
                if self.manager.current(slot) == Some(id) {
                    self.manager.set_current(slot, None);
                }
            }
        }
    }
}

const ALL_SLOTS: [SequenceSlot; 8] = [
    SequenceSlot::Idle,
    SequenceSlot::Movement,
    SequenceSlot::LeftArm,
    SequenceSlot::Weapon,
    SequenceSlot::WeaponUp,
    SequenceSlot::WeaponDown,
    SequenceSlot::SpecialIdle,
    SequenceSlot::Death,
];

fn is_active(manager: &NiControllerManager, id: SequenceId) -> bool {
    manager
        .sequence(id)
        .is_some_and(|sequence| sequence.state().is_active())
}

/// Adds `path` to `manager` unless it is already loaded there.
fn load_sequence(
    manager: &mut NiControllerManager,
    loaded: &mut HashMap<String, SequenceId>,
    path: &str,
    library: &SequenceLibrary,
    config: &BlendConfig,
) -> Result<SequenceId> {
    let key = normalize_anim_path(path);
    if let Some(id) = loaded.get(&key).copied() {
        if manager.sequence(id).is_some() {
            return Ok(id);
        }
    }
    let asset = library.get(&key, config)?;
    let id = manager.add_sequence(&asset)?;
    loaded.insert(key, id);
    Ok(id)
}

#[derive(Debug)]
pub struct ActorAnimations {
    pub info: ActorInfo,
    pub ammo: Option<AmmoState>,
    third_person: PersonAnimations,
    first_person: Option<PersonAnimations>,
}

impl ActorAnimations {
    pub fn person(&self, first_person: bool) -> Option<&PersonAnimations> {
        if first_person {
            self.first_person.as_ref()
        } else {
            Some(&self.third_person)
        }
    }

    fn persons_mut(&mut self) -> impl Iterator<Item = (bool, &mut PersonAnimations)> {
        std::iter::once((false, &mut self.third_person))
            .chain(self.first_person.as_mut().map(|person| (true, person)))
    }
}

struct PlayRequest {
    path: String,
    group: Option<AnimGroupId>,
    slot: SequenceSlot,
    poll_condition: Option<String>,
}

/// Actor animation state, override tables and asset cache behind the external
/// trigger surface. Trigger functions log failures and return `false`.
#[derive(Resource)]
pub struct AnimationEngine {
    config: BlendConfig,
    selector: AnimationSelector,
    library: SequenceLibrary,
    actors: HashMap<FormId, ActorAnimations>,
    idles: HashMap<FormId, String>,
    time: f32,
}

impl AnimationEngine {
    /// Builds the engine and loads the override tree when `config.override_root` is set.
    pub fn new(
        config: BlendConfig,
        loader: Box<dyn SequenceLoader>,
        conditions: Box<dyn ConditionEvaluator>,
    ) -> Result<Self> {
        config.validate()?;
        let mut engine = Self {
            selector: AnimationSelector::new(conditions, config.rng_seed),
            library: SequenceLibrary::new(loader),
            actors: HashMap::new(),
            idles: HashMap::new(),
            time: 0.0,
            config,
        };
        if engine.config.override_root.is_some() {
            engine.reset()?;
        }
        Ok(engine)
    }

    pub fn config(&self) -> &BlendConfig {
        &self.config
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn selector(&self) -> &AnimationSelector {
        &self.selector
    }

    pub fn library(&self) -> &SequenceLibrary {
        &self.library
    }

    pub fn actor(&self, actor: FormId) -> Option<&ActorAnimations> {
        self.actors.get(&actor)
    }

    pub fn manager(&self, actor: FormId, first_person: bool) -> Option<&NiControllerManager> {
        self.actors
            .get(&actor)?
            .person(first_person)
            .map(PersonAnimations::manager)
    }

    pub fn actor_pose(
        &self,
        actor: FormId,
        first_person: bool,
    ) -> Option<&HashMap<NodeId, NiQuatTransform>> {
        self.manager(actor, first_person)
            .map(NiControllerManager::pose)
    }

    /// True once the engine clock passed the end of the actor's last action.
    pub fn action_finished(&self, actor: FormId, first_person: bool) -> bool {
        self.actors
            .get(&actor)
            .and_then(|state| state.person(first_person))
            .and_then(PersonAnimations::action_end)
            .is_none_or(|end| self.time >= end)
    }

    /// Clears every override and reloads the folder tree from `override_root`.
    pub fn reset(&mut self) -> Result<OverrideLoadSummary> {
        self.selector.reset();
        match &self.config.override_root {
            Some(root) => load_override_tree(root, &self.config, &mut self.selector),
            None => Ok(OverrideLoadSummary::default()),
        }
    }

    pub fn add_actor(
        &mut self,
        info: ActorInfo,
        third_person: NodePalette,
        first_person: Option<NodePalette>,
    ) -> bool {
        if self.actors.contains_key(&info.ref_id) {
            warn!("actor {:08X} is already registered", info.ref_id);
            return false;
        }
        let state = ActorAnimations {
            info,
            ammo: None,
            third_person: PersonAnimations::new(third_person, &self.config),
            first_person: first_person.map(|palette| PersonAnimations::new(palette, &self.config)),
        };
        self.actors.insert(info.ref_id, state);
        debug!("registered actor {:08X}", info.ref_id);
        true
    }

    pub fn remove_actor(&mut self, actor: FormId) -> bool {
        self.actors.remove(&actor).is_some()
    }

    pub fn set_actor_weapon(&mut self, actor: FormId, weapon: Option<FormId>) -> bool {
        match self.actors.get_mut(&actor) {
            Some(state) => {
                state.info.weapon = weapon;
                true
            }
            None => false,
        }
    }

    pub fn set_actor_ammo(&mut self, actor: FormId, ammo: Option<AmmoState>) -> bool {
        match self.actors.get_mut(&actor) {
            Some(state) => {
                state.ammo = ammo;
                true
            }
            None => false,
        }
    }

    /// Registers (or with `enable == false` removes) an override at `scope`. The group
    /// is taken from the file name.
    pub fn set_override_path(
        &mut self,
        scope: OverrideScope,
        first_person: bool,
        enable: bool,
        path: &str,
        condition: Option<&str>,
        poll_condition: bool,
    ) -> bool {
        let normalized = match validate_anim_path(path) {
            Ok(normalized) => normalized,
            Err(err) => {
                warn!("rejected override '{path}': {err}");
                return false;
            }
        };
        let Some(group) = AnimGroupId::parse(anim_file_stem(&normalized)) else {
            warn!("rejected override '{path}': file name does not name an animation group");
            return false;
        };
        let key = RuleKey {
            scope,
            first_person,
            group,
        };
        if !enable {
            return self.selector.unregister(key, Some(&normalized));
        }
        let mut set = VariantSet::new([normalized]);
        if let Some(condition) = condition {
            set = set.with_condition(condition, poll_condition);
        }
        match self.selector.register(key, set) {
            Ok(()) => true,
            Err(err) => {
                warn!("rejected override '{path}': {err}");
                false
            }
        }
    }

    pub fn set_weapon_animation_path(
        &mut self,
        weapon: FormId,
        first_person: bool,
        enable: bool,
        path: &str,
    ) -> bool {
        self.set_override_path(
            OverrideScope::Weapon(weapon),
            first_person,
            enable,
            path,
            None,
            false,
        )
    }

    pub fn set_actor_animation_path(
        &mut self,
        actor: FormId,
        first_person: bool,
        enable: bool,
        path: &str,
        condition: Option<&str>,
        poll_condition: bool,
    ) -> bool {
        self.set_override_path(
            OverrideScope::Actor(actor),
            first_person,
            enable,
            path,
            condition,
            poll_condition,
        )
    }

    /// Override path that would play for `actor`, if any.
    pub fn resolve(&mut self, actor: FormId, group: AnimGroupId, first_person: bool) -> Option<String> {
        let (info, ammo) = match self.actors.get(&actor) {
            Some(state) => (state.info, state.ammo),
            None => (
                ActorInfo {
                    ref_id: actor,
                    ..ActorInfo::default()
                },
                None,
            ),
        };
        let context = SelectionContext { first_person, ammo };
        let library = &self.library;
        self.selector
            .resolve_with(&info, group, &context, &|path: &str| library.exists(path))
            .map(|resolution| resolution.path)
    }

    /// Plays the override for `group`. Returns false when no override applies so the
    /// host can fall back to its own animation.
    pub fn play_anim_group(&mut self, actor: FormId, group: AnimGroupId, first_person: bool) -> bool {
        let Some(state) = self.actors.get(&actor) else {
            warn!("play_anim_group: unknown actor {actor:08X}");
            return false;
        };
        let info = state.info;
        let context = SelectionContext {
            first_person,
            ammo: state.ammo,
        };
        let library = &self.library;
        let Some(resolution) =
            self.selector
                .resolve_with(&info, group, &context, &|path: &str| library.exists(path))
        else {
            debug!("no override for {group} on {actor:08X}");
            return false;
        };
        let request = PlayRequest {
            path: resolution.path,
            group: Some(group),
            slot: group.group().map_or(SequenceSlot::Weapon, AnimGroup::slot),
            poll_condition: resolution
                .condition
                .filter(|_| resolution.poll_condition),
        };
        self.play_logged(actor, first_person, request)
    }

    pub fn play_animation_path(&mut self, actor: FormId, path: &str, first_person: bool) -> bool {
        let normalized = match validate_anim_path(path) {
            Ok(normalized) => normalized,
            Err(err) => {
                warn!("play_animation_path: {err}");
                return false;
            }
        };
        let group = AnimGroupId::parse(anim_file_stem(&normalized));
        let request = PlayRequest {
            path: normalized,
            group,
            slot: group
                .and_then(AnimGroupId::group)
                .map_or(SequenceSlot::Weapon, AnimGroup::slot),
            poll_condition: None,
        };
        self.play_logged(actor, first_person, request)
    }

    pub fn register_idle(&mut self, idle: FormId, path: &str) -> bool {
        match validate_anim_path(path) {
            Ok(normalized) => {
                self.idles.insert(idle, normalized);
                true
            }
            Err(err) => {
                warn!("register_idle {idle:08X}: {err}");
                false
            }
        }
    }

    pub fn force_play_idle(&mut self, actor: FormId, idle: FormId) -> bool {
        let Some(path) = self.idles.get(&idle).cloned() else {
            warn!("force_play_idle: idle {idle:08X} is not registered");
            return false;
        };
        let request = PlayRequest {
            path,
            group: None,
            slot: SequenceSlot::SpecialIdle,
            poll_condition: None,
        };
        self.play_logged(actor, false, request)
    }

    /// Loads `path` as an additive overlay measured against `reference` and starts it.
    pub fn init_additive(
        &mut self,
        actor: FormId,
        first_person: bool,
        path: &str,
        reference: Option<&str>,
        reference_time: f32,
        ignore_priorities: bool,
    ) -> bool {
        match self.start_additive(actor, first_person, path, reference, reference_time, ignore_priorities) {
            Ok(()) => true,
            Err(err) => {
                warn!("init_additive '{path}' on {actor:08X}: {err}");
                false
            }
        }
    }

    fn start_additive(
        &mut self,
        actor: FormId,
        first_person: bool,
        path: &str,
        reference: Option<&str>,
        reference_time: f32,
        ignore_priorities: bool,
    ) -> Result<()> {
        let Self {
            config,
            library,
            actors,
            ..
        } = self;
        let person = actors
            .get_mut(&actor)
            .and_then(|state| {
                if first_person {
                    state.first_person.as_mut()
                } else {
                    Some(&mut state.third_person)
                }
            })
            .ok_or_else(|| BlendError::InvalidHandle(format!("actor {actor:08X}")))?;
        let path = validate_anim_path(path)?;
        let id = load_sequence(&mut person.manager, &mut person.loaded, &path, library, config)?;
        let reference = match reference {
            Some(reference) => Some(load_sequence(
                &mut person.manager,
                &mut person.loaded,
                &validate_anim_path(reference)?,
                library,
                config,
            )?),
            None => None,
        };
        person
            .manager
            .init_additive_sequence(id, reference, reference_time, ignore_priorities)?;
        if !is_active(&person.manager, id) {
            let priority = SequenceSlot::Weapon.default_priority();
            person
                .manager
                .activate_sequence(id, priority, true, 1.0, config.default_blend_time, None)?;
            person.track(id, None);
        }
        Ok(())
    }

    fn play_logged(&mut self, actor: FormId, first_person: bool, request: PlayRequest) -> bool {
        let path = request.path.clone();
        match self.play(actor, first_person, request) {
            Ok(id) => {
                debug!("{actor:08X} playing '{path}' ({id:?})");
                true
            }
            Err(err) => {
                warn!("{actor:08X} failed to play '{path}': {err}");
                false
            }
        }
    }

    fn play(&mut self, actor: FormId, first_person: bool, request: PlayRequest) -> Result<SequenceId> {
        let Self {
            config,
            selector,
            library,
            actors,
            time,
            ..
        } = self;
        let state = actors
            .get_mut(&actor)
            .ok_or_else(|| BlendError::InvalidHandle(format!("actor {actor:08X}")))?;
        let info = state.info;
        let ammo = state.ammo;
        let (person, third_person) = if first_person {
            let person = state.first_person.as_mut().ok_or_else(|| {
                BlendError::InvalidHandle(format!("actor {actor:08X} has no first-person skeleton"))
            })?;
            (person, Some(&state.third_person))
        } else {
            (&mut state.third_person, None)
        };

        let id = load_sequence(&mut person.manager, &mut person.loaded, &request.path, library, config)?;
        let slot = request.slot;
        let priority = slot.default_priority();
        let blend_time = config.default_blend_time;
        let manager = &mut person.manager;
        let current = manager
            .current(slot)
            .filter(|current| is_active(manager, *current));
        match current {
            Some(current) if current == id => {
                debug!("'{}' is already playing", request.path);
            }
            Some(current) => {
                if is_active(manager, id) {
                    manager.deactivate_sequence(id, 0.0);
                }
                manager.cross_fade(current, id, blend_time, priority, 1.0, false)?;
            }
            None => {
                if is_active(manager, id) {
                    manager.deactivate_sequence(id, 0.0);
                }
                manager.activate_sequence(id, priority, true, 1.0, blend_time, None)?;
            }
        }
        manager.set_current(slot, Some(id));
        person.track(id, request.poll_condition);

        if let Some(group) = request.group {
            if group.group().is_some_and(AnimGroup::is_family_base) {
                person.weapon_up = None;
                person.weapon_down = None;
                if config.fix_enabled(BlendFixes::MISSING_UP_DOWN) {
                    let context = SelectionContext { first_person, ammo };
                    let PersonAnimations {
                        manager,
                        loaded,
                        weapon_up,
                        weapon_down,
                        ..
                    } = &mut *person;
                    let populated = fix_missing_up_down_anims(group, weapon_up, weapon_down, |variant| {
                        let resolution = selector.resolve_with(
                            &info,
                            variant,
                            &context,
                            &|path: &str| library.exists(path),
                        )?;
                        match load_sequence(manager, loaded, &resolution.path, library, config) {
                            Ok(id) => Some(id),
                            Err(err) => {
                                warn!("could not load '{}' for {variant}: {err}", resolution.path);
                                None
                            }
                        }
                    });
                    if populated > 0 {
                        debug!("populated {populated} up/down variants of {group}");
                    }
                }
                person.manager.set_current(SequenceSlot::WeaponUp, person.weapon_up);
                person.manager.set_current(SequenceSlot::WeaponDown, person.weapon_down);
            }
        }

        if let Some(sequence) = person.manager.sequence(id) {
            let counterpart = third_person.and_then(|third| {
                third
                    .manager
                    .current(slot)
                    .and_then(|current| third.manager.sequence(current))
            });
            let end_key = match counterpart {
                Some(counterpart) => {
                    let kept = config
                        .fix_enabled(BlendFixes::PREMATURE_FIRST_PERSON_END)
                        .then(|| fix_premature_first_person_end(sequence, Some(counterpart)))
                        .flatten();
                    kept.unwrap_or(counterpart.end_key_time)
                }
                None => sequence.end_key_time,
            };
            let length = (end_key - sequence.begin_key_time).max(0.0) / sequence.frequency;
            person.action_end = Some(*time + length);
        }
        Ok(id)
    }

    /// Advances every actor by `dt` seconds and returns the text-key events passed.
    pub fn advance(&mut self, dt: f32) -> Vec<AnimationEvent> {
        if dt.is_finite() && dt > 0.0 {
            self.time += dt;
        }
        let time = self.time;
        let Self {
            config,
            selector,
            actors,
            ..
        } = self;
        let mut events = Vec::new();
        for (actor, state) in actors.iter_mut() {
            for (first_person, person) in state.persons_mut() {
                person.manager.update(time, config);
                person.collect_events(
                    *actor,
                    first_person,
                    selector.conditions(),
                    config.default_blend_time,
                    &mut events,
                );
            }
        }
        if !events.is_empty() {
            debug!("{} text key events at {time}", events.len());
        }
        events
    }

    /// Drops every cached asset. Loaded sequences stay in their managers.
    pub fn clear_asset_cache(&mut self) {
        self.library.clear();
    }
}
