use std::collections::{BTreeSet, HashMap};

use bevy::log::{debug, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::nif::error::{BlendError, Result};
use crate::nif::types::FormId;

use super::anim_groups::{AnimGroup, AnimGroupId, HandType};
use super::parser_helpers::{
    is_empty_reload_variant, is_ordered_variant, is_partial_reload_variant, validate_anim_path,
};

/// Where an override applies. Tiers are searched in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverrideScope {
    Weapon(FormId),
    Actor(FormId),
    BaseForm(FormId),
    Race(FormId),
    CreatureType(u32),
    /// Load order index of the plugin providing the override.
    Mod(u8),
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionPolicy {
    #[default]
    Random,
    /// Alphabetical round-robin per actor.
    Ordered,
}

/// Animations registered together for one group; one of them plays per selection.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantSet {
    pub paths: Vec<String>,
    pub condition: Option<String>,
    /// Re-check the condition every tick while the animation plays.
    pub poll_condition: bool,
    pub policy: SelectionPolicy,
}

impl VariantSet {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            condition: None,
            poll_condition: false,
            policy: SelectionPolicy::Random,
        }
    }

    pub fn with_condition(mut self, condition: impl Into<String>, poll: bool) -> Self {
        self.condition = Some(condition.into());
        self.poll_condition = poll;
        self
    }

    fn is_ordered(&self) -> bool {
        self.policy == SelectionPolicy::Ordered
            || self.paths.iter().any(|path| is_ordered_variant(path))
    }
}

/// Identity of the actor a selection is made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ActorInfo {
    pub ref_id: FormId,
    pub base_form: FormId,
    pub race: Option<FormId>,
    pub creature_type: Option<u32>,
    pub weapon: Option<FormId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AmmoState {
    pub clip_rounds: u32,
    pub clip_size: u32,
}

impl AmmoState {
    pub fn is_empty(&self) -> bool {
        self.clip_rounds == 0
    }

    pub fn is_partial(&self) -> bool {
        self.clip_rounds > 0 && self.clip_rounds < self.clip_size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SelectionContext {
    pub first_person: bool,
    pub ammo: Option<AmmoState>,
}

/// Evaluates override conditions. Supplied by the host's scripting layer.
pub trait ConditionEvaluator: Send + Sync {
    /// Syntax check done once at registration.
    fn validate(&self, condition: &str) -> bool;
    fn evaluate(&self, condition: &str, actor: FormId) -> bool;
}

/// Accepts every condition.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysTrue;

impl ConditionEvaluator for AlwaysTrue {
    fn validate(&self, _condition: &str) -> bool {
        true
    }

    fn evaluate(&self, _condition: &str, _actor: FormId) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuleKey {
    pub scope: OverrideScope,
    pub first_person: bool,
    pub group: AnimGroupId,
}

/// A successful selection.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub path: String,
    pub scope: OverrideScope,
    pub group: AnimGroupId,
    pub condition: Option<String>,
    pub poll_condition: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FamilyKey {
    actor: FormId,
    first_person: bool,
    base: AnimGroup,
    hand: HandType,
}

/// Layered override tables mapping (actor, group, person) to an animation path.
pub struct AnimationSelector {
    rules: HashMap<RuleKey, Vec<VariantSet>>,
    mod_indices: BTreeSet<u8>,
    conditions: Box<dyn ConditionEvaluator>,
    order_cursors: HashMap<(FormId, RuleKey, usize), usize>,
    family_picks: HashMap<FamilyKey, usize>,
    rng: StdRng,
}

impl AnimationSelector {
    pub fn new(conditions: Box<dyn ConditionEvaluator>, seed: Option<u64>) -> Self {
        Self {
            rules: HashMap::new(),
            mod_indices: BTreeSet::new(),
            conditions,
            order_cursors: HashMap::new(),
            family_picks: HashMap::new(),
            rng: match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            },
        }
    }

    pub fn conditions(&self) -> &dyn ConditionEvaluator {
        self.conditions.as_ref()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.values().map(Vec::len).sum()
    }

    /// Pushes `set` on top of the stack for `key`. Invalid paths or conditions reject
    /// the whole set.
    pub fn register(&mut self, key: RuleKey, mut set: VariantSet) -> Result<()> {
        if set.paths.is_empty() {
            return Err(BlendError::Configuration(format!(
                "override for {} has no animation paths",
                key.group
            )));
        }
        set.paths = set
            .paths
            .iter()
            .map(|path| validate_anim_path(path))
            .collect::<Result<Vec<_>>>()?;
        if let Some(condition) = &set.condition {
            if !self.conditions.validate(condition) {
                return Err(BlendError::Configuration(format!(
                    "invalid override condition '{condition}'"
                )));
            }
        }
        if set.is_ordered() {
            set.policy = SelectionPolicy::Ordered;
        }

        let stack = self.rules.entry(key).or_default();
        // Re-registering moves the set to the top of the stack.
        stack.retain(|existing| *existing != set);
        stack.push(set);
        if let OverrideScope::Mod(index) = key.scope {
            self.mod_indices.insert(index);
        }
        debug!("registered override for {} at {:?}", key.group, key.scope);
        Ok(())
    }

    /// Removes every set containing `path`, or the whole stack when `path` is `None`.
    pub fn unregister(&mut self, key: RuleKey, path: Option<&str>) -> bool {
        let Some(stack) = self.rules.get_mut(&key) else {
            return false;
        };
        let before = stack.len();
        match path {
            Some(path) => {
                let Ok(path) = validate_anim_path(path) else {
                    return false;
                };
                stack.retain(|set| !set.paths.contains(&path));
            }
            None => stack.clear(),
        }
        let removed = stack.len() != before;
        if stack.is_empty() {
            self.rules.remove(&key);
            self.order_cursors.retain(|(_, cursor_key, _), _| *cursor_key != key);
        }
        removed
    }

    /// Forgets every override and selection cursor.
    pub fn reset(&mut self) {
        self.rules.clear();
        self.mod_indices.clear();
        self.order_cursors.clear();
        self.family_picks.clear();
    }

    pub fn resolve(&mut self, actor: &ActorInfo, group: AnimGroupId, first_person: bool) -> Option<String> {
        let context = SelectionContext {
            first_person,
            ammo: None,
        };
        self.resolve_with(actor, group, &context, &|_| true)
            .map(|resolution| resolution.path)
    }

    /// Full resolution. `exists` reports whether a candidate asset can be loaded;
    /// missing assets fall through to the next set or tier.
    pub fn resolve_with(
        &mut self,
        actor: &ActorInfo,
        group: AnimGroupId,
        context: &SelectionContext,
        exists: &dyn Fn(&str) -> bool,
    ) -> Option<Resolution> {
        let mut groups = vec![group];
        if group.hand() != HandType::None {
            groups.push(group.without_hand());
        }
        for group in groups {
            for scope in self.tiers(actor) {
                let key = RuleKey {
                    scope,
                    first_person: context.first_person,
                    group,
                };
                if let Some(resolution) = self.resolve_in_tier(actor, key, context, exists) {
                    return Some(resolution);
                }
            }
        }
        None
    }

    fn tiers(&self, actor: &ActorInfo) -> Vec<OverrideScope> {
        let mut tiers = Vec::with_capacity(6 + self.mod_indices.len());
        if let Some(weapon) = actor.weapon {
            tiers.push(OverrideScope::Weapon(weapon));
        }
        tiers.push(OverrideScope::Actor(actor.ref_id));
        tiers.push(OverrideScope::BaseForm(actor.base_form));
        if let Some(race) = actor.race {
            tiers.push(OverrideScope::Race(race));
        }
        if let Some(creature_type) = actor.creature_type {
            tiers.push(OverrideScope::CreatureType(creature_type));
        }
        tiers.extend(self.mod_indices.iter().rev().map(|index| OverrideScope::Mod(*index)));
        tiers.push(OverrideScope::Global);
        tiers
    }

    fn resolve_in_tier(
        &mut self,
        actor: &ActorInfo,
        key: RuleKey,
        context: &SelectionContext,
        exists: &dyn Fn(&str) -> bool,
    ) -> Option<Resolution> {
        let stack = self.rules.get(&key)?.clone();
        for (index, set) in stack.iter().enumerate().rev() {
            if let Some(condition) = &set.condition {
                if !self.conditions.evaluate(condition, actor.ref_id) {
                    continue;
                }
            }
            let candidates = reload_candidates(set, key.group, context);
            let Some(path) = self.pick(actor, key, index, set, &candidates) else {
                continue;
            };
            if !exists(&path) {
                warn!("{}", BlendError::MissingAsset(path));
                continue;
            }
            return Some(Resolution {
                path,
                scope: key.scope,
                group: key.group,
                condition: set.condition.clone(),
                poll_condition: set.poll_condition,
            });
        }
        None
    }

    fn pick(
        &mut self,
        actor: &ActorInfo,
        key: RuleKey,
        index: usize,
        set: &VariantSet,
        candidates: &[&String],
    ) -> Option<String> {
        match candidates.len() {
            0 => return None,
            1 => return Some(candidates[0].clone()),
            _ => {}
        }
        if set.policy == SelectionPolicy::Ordered {
            let mut sorted = candidates.to_vec();
            sorted.sort();
            let cursor = self.order_cursors.entry((actor.ref_id, key, index)).or_insert(0);
            let path = sorted[*cursor % sorted.len()].clone();
            *cursor = (*cursor + 1) % sorted.len();
            return Some(path);
        }

        let family = key.group.group().and_then(|group| {
            group.up_down_family().map(|(base, _, _)| {
                (
                    group == base,
                    FamilyKey {
                        actor: actor.ref_id,
                        first_person: key.first_person,
                        base,
                        hand: key.group.hand(),
                    },
                )
            })
        });
        let choice = match family {
            Some((false, family_key)) => match self.family_picks.get(&family_key) {
                Some(pick) if *pick < candidates.len() => *pick,
                _ => {
                    let pick = self.rng.gen_range(0..candidates.len());
                    self.family_picks.insert(family_key, pick);
                    pick
                }
            },
            Some((true, family_key)) => {
                let pick = self.rng.gen_range(0..candidates.len());
                self.family_picks.insert(family_key, pick);
                pick
            }
            None => self.rng.gen_range(0..candidates.len()),
        };
        Some(candidates[choice].clone())
    }
}

/// Narrows reload sets to `_empty` or `_partial` variants matching the magazine.
fn reload_candidates<'a>(
    set: &'a VariantSet,
    group: AnimGroupId,
    context: &SelectionContext,
) -> Vec<&'a String> {
    let all: Vec<&String> = set.paths.iter().collect();
    let (Some(ammo), true) = (context.ammo, group.group().is_some_and(AnimGroup::is_reload)) else {
        return all;
    };
    let empty: Vec<&String> = all.iter().copied().filter(|p| is_empty_reload_variant(p)).collect();
    let partial: Vec<&String> = all.iter().copied().filter(|p| is_partial_reload_variant(p)).collect();
    if ammo.is_empty() && !empty.is_empty() {
        return empty;
    }
    if ammo.is_partial() && !partial.is_empty() {
        return partial;
    }
    let plain: Vec<&String> = all
        .iter()
        .copied()
        .filter(|p| !is_empty_reload_variant(p) && !is_partial_reload_variant(p))
        .collect();
    if plain.is_empty() { all } else { plain }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACTOR: ActorInfo = ActorInfo {
        ref_id: 0x14,
        base_form: 0x7,
        race: Some(0x19),
        creature_type: None,
        weapon: Some(0x1000),
    };

    fn selector() -> AnimationSelector {
        AnimationSelector::new(Box::new(AlwaysTrue), Some(42))
    }

    fn key(scope: OverrideScope, group: AnimGroup) -> RuleKey {
        RuleKey {
            scope,
            first_person: false,
            group: group.into(),
        }
    }

    struct Deny;
    impl ConditionEvaluator for Deny {
        fn validate(&self, condition: &str) -> bool {
            !condition.contains("bad")
        }
        fn evaluate(&self, condition: &str, _actor: FormId) -> bool {
            condition == "allow"
        }
    }

    #[test]
    fn register_resolve_reset() {
        let mut selector = selector();
        selector
            .register(key(OverrideScope::Actor(0x14), AnimGroup::Idle), VariantSet::new(["a/idle.kf"]))
            .unwrap();
        assert_eq!(
            selector.resolve(&ACTOR, AnimGroup::Idle.into(), false),
            Some("a/idle.kf".to_string())
        );
        assert_eq!(selector.resolve(&ACTOR, AnimGroup::Idle.into(), true), None);
        selector.reset();
        assert_eq!(selector.resolve(&ACTOR, AnimGroup::Idle.into(), false), None);
    }

    #[test]
    fn weapon_tier_beats_actor_tier() {
        let mut selector = selector();
        selector
            .register(key(OverrideScope::Actor(0x14), AnimGroup::Aim), VariantSet::new(["actor/aim.kf"]))
            .unwrap();
        selector
            .register(key(OverrideScope::Weapon(0x1000), AnimGroup::Aim), VariantSet::new(["weapon/aim.kf"]))
            .unwrap();
        selector
            .register(key(OverrideScope::Global, AnimGroup::Aim), VariantSet::new(["global/aim.kf"]))
            .unwrap();
        for _ in 0..4 {
            assert_eq!(
                selector.resolve(&ACTOR, AnimGroup::Aim.into(), false).as_deref(),
                Some("weapon/aim.kf")
            );
        }
    }

    #[test]
    fn higher_mod_index_wins_and_global_is_last() {
        let mut selector = selector();
        selector
            .register(key(OverrideScope::Global, AnimGroup::Equip), VariantSet::new(["g.kf"]))
            .unwrap();
        selector
            .register(key(OverrideScope::Mod(2), AnimGroup::Equip), VariantSet::new(["m2.kf"]))
            .unwrap();
        selector
            .register(key(OverrideScope::Mod(5), AnimGroup::Equip), VariantSet::new(["m5.kf"]))
            .unwrap();
        assert_eq!(selector.resolve(&ACTOR, AnimGroup::Equip.into(), false).as_deref(), Some("m5.kf"));
        assert!(selector.unregister(key(OverrideScope::Mod(5), AnimGroup::Equip), None));
        assert_eq!(selector.resolve(&ACTOR, AnimGroup::Equip.into(), false).as_deref(), Some("m2.kf"));
    }

    #[test]
    fn newest_set_shadows_older_until_removed() {
        let mut selector = selector();
        let rule = key(OverrideScope::Actor(0x14), AnimGroup::Idle);
        selector.register(rule, VariantSet::new(["old.kf"])).unwrap();
        selector.register(rule, VariantSet::new(["new.kf"])).unwrap();
        assert_eq!(selector.resolve(&ACTOR, AnimGroup::Idle.into(), false).as_deref(), Some("new.kf"));
        assert!(selector.unregister(rule, Some("NEW.kf")));
        assert_eq!(selector.resolve(&ACTOR, AnimGroup::Idle.into(), false).as_deref(), Some("old.kf"));
    }

    #[test]
    fn ordered_sets_cycle_alphabetically() {
        let mut selector = selector();
        selector
            .register(
                key(OverrideScope::Global, AnimGroup::Idle),
                VariantSet::new(["idle_order_b.kf", "idle_order_a.kf", "idle_order_c.kf"]),
            )
            .unwrap();
        let picks: Vec<String> = (0..4)
            .filter_map(|_| selector.resolve(&ACTOR, AnimGroup::Idle.into(), false))
            .collect();
        assert_eq!(
            picks,
            vec!["idle_order_a.kf", "idle_order_b.kf", "idle_order_c.kf", "idle_order_a.kf"]
        );
    }

    #[test]
    fn up_down_variants_share_the_random_pick() {
        let mut selector = selector();
        let paths = |suffix: &str| (0..4).map(move |i| format!("attack{suffix}_{i}.kf")).collect::<Vec<_>>();
        for (group, suffix) in [
            (AnimGroup::AttackLeft, ""),
            (AnimGroup::AttackLeftUp, "up"),
            (AnimGroup::AttackLeftDown, "down"),
        ] {
            selector
                .register(key(OverrideScope::Global, group), VariantSet::new(paths(suffix)))
                .unwrap();
        }
        for _ in 0..8 {
            let base = selector.resolve(&ACTOR, AnimGroup::AttackLeft.into(), false).unwrap();
            let up = selector.resolve(&ACTOR, AnimGroup::AttackLeftUp.into(), false).unwrap();
            let down = selector.resolve(&ACTOR, AnimGroup::AttackLeftDown.into(), false).unwrap();
            let index = |path: &str| path.trim_end_matches(".kf").rsplit('_').next().map(str::to_string);
            assert_eq!(index(&base), index(&up));
            assert_eq!(index(&base), index(&down));
        }
    }

    #[test]
    fn reload_variants_follow_ammo() {
        let mut selector = selector();
        selector
            .register(
                key(OverrideScope::Global, AnimGroup::ReloadA),
                VariantSet::new(["reloada.kf", "reloada_empty.kf", "reloada_partial.kf"]),
            )
            .unwrap();
        let mut resolve = |clip_rounds| {
            let context = SelectionContext {
                first_person: false,
                ammo: Some(AmmoState {
                    clip_rounds,
                    clip_size: 10,
                }),
            };
            selector
                .resolve_with(&ACTOR, AnimGroup::ReloadA.into(), &context, &|_| true)
                .map(|r| r.path)
        };
        assert_eq!(resolve(0).as_deref(), Some("reloada_empty.kf"));
        assert_eq!(resolve(4).as_deref(), Some("reloada_partial.kf"));
        assert_eq!(resolve(10).as_deref(), Some("reloada.kf"));
    }

    #[test]
    fn missing_assets_fall_through() {
        let mut selector = selector();
        selector
            .register(key(OverrideScope::Actor(0x14), AnimGroup::Idle), VariantSet::new(["gone.kf"]))
            .unwrap();
        selector
            .register(key(OverrideScope::Global, AnimGroup::Idle), VariantSet::new(["there.kf"]))
            .unwrap();
        let resolution = selector
            .resolve_with(
                &ACTOR,
                AnimGroup::Idle.into(),
                &SelectionContext::default(),
                &|path| path != "gone.kf",
            )
            .unwrap();
        assert_eq!(resolution.path, "there.kf");
        assert_eq!(resolution.scope, OverrideScope::Global);
    }

    #[test]
    fn hand_typed_groups_fall_back_to_plain_group() {
        let mut selector = selector();
        selector
            .register(key(OverrideScope::Global, AnimGroup::Equip), VariantSet::new(["equip.kf"]))
            .unwrap();
        let id = AnimGroupId::new(AnimGroup::Equip, HandType::TwoHandRifle);
        assert_eq!(selector.resolve(&ACTOR, id, false).as_deref(), Some("equip.kf"));
    }

    #[test]
    fn conditions_gate_sets_and_are_validated() {
        let mut selector = AnimationSelector::new(Box::new(Deny), Some(1));
        let rule = key(OverrideScope::Global, AnimGroup::Idle);
        selector.register(rule, VariantSet::new(["fallback.kf"])).unwrap();
        selector
            .register(rule, VariantSet::new(["denied.kf"]).with_condition("deny", false))
            .unwrap();
        assert_eq!(selector.resolve(&ACTOR, AnimGroup::Idle.into(), false).as_deref(), Some("fallback.kf"));
        let rejected = selector.register(rule, VariantSet::new(["x.kf"]).with_condition("bad", true));
        assert!(matches!(rejected, Err(BlendError::Configuration(_))));
        let rejected = selector.register(rule, VariantSet::new(["../x.kf"]));
        assert!(rejected.is_err());
        assert_eq!(selector.rule_count(), 2);
    }
}
