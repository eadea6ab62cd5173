use std::fmt;

/// Animation groups known to the selector. The discriminant is the low byte of an
/// [`AnimGroupId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum AnimGroup {
    Idle = 0,
    DynamicIdle,
    SpecialIdle,
    Forward,
    Backward,
    Left,
    Right,
    TurnLeft,
    TurnRight,
    Equip,
    Unequip,
    Aim,
    AimUp,
    AimDown,
    AimIS,
    AimISUp,
    AimISDown,
    AttackLeft,
    AttackLeftUp,
    AttackLeftDown,
    AttackRight,
    AttackRightUp,
    AttackRightDown,
    PlaceMine,
    PlaceMineUp,
    PlaceMineDown,
    ReloadA,
    ReloadB,
    ReloadC,
    Jam,
    BlockIdle,
    BlockHit,
    Death,
}

const ALL_GROUPS: [AnimGroup; 33] = [
    AnimGroup::Idle,
    AnimGroup::DynamicIdle,
    AnimGroup::SpecialIdle,
    AnimGroup::Forward,
    AnimGroup::Backward,
    AnimGroup::Left,
    AnimGroup::Right,
    AnimGroup::TurnLeft,
    AnimGroup::TurnRight,
    AnimGroup::Equip,
    AnimGroup::Unequip,
    AnimGroup::Aim,
    AnimGroup::AimUp,
    AnimGroup::AimDown,
    AnimGroup::AimIS,
    AnimGroup::AimISUp,
    AnimGroup::AimISDown,
    AnimGroup::AttackLeft,
    AnimGroup::AttackLeftUp,
    AnimGroup::AttackLeftDown,
    AnimGroup::AttackRight,
    AnimGroup::AttackRightUp,
    AnimGroup::AttackRightDown,
    AnimGroup::PlaceMine,
    AnimGroup::PlaceMineUp,
    AnimGroup::PlaceMineDown,
    AnimGroup::ReloadA,
    AnimGroup::ReloadB,
    AnimGroup::ReloadC,
    AnimGroup::Jam,
    AnimGroup::BlockIdle,
    AnimGroup::BlockHit,
    AnimGroup::Death,
];

impl AnimGroup {
    pub fn name(self) -> &'static str {
        match self {
            AnimGroup::Idle => "Idle",
            AnimGroup::DynamicIdle => "DynamicIdle",
            AnimGroup::SpecialIdle => "SpecialIdle",
            AnimGroup::Forward => "Forward",
            AnimGroup::Backward => "Backward",
            AnimGroup::Left => "Left",
            AnimGroup::Right => "Right",
            AnimGroup::TurnLeft => "TurnLeft",
            AnimGroup::TurnRight => "TurnRight",
            AnimGroup::Equip => "Equip",
            AnimGroup::Unequip => "Unequip",
            AnimGroup::Aim => "Aim",
            AnimGroup::AimUp => "AimUp",
            AnimGroup::AimDown => "AimDown",
            AnimGroup::AimIS => "AimIS",
            AnimGroup::AimISUp => "AimISUp",
            AnimGroup::AimISDown => "AimISDown",
            AnimGroup::AttackLeft => "AttackLeft",
            AnimGroup::AttackLeftUp => "AttackLeftUp",
            AnimGroup::AttackLeftDown => "AttackLeftDown",
            AnimGroup::AttackRight => "AttackRight",
            AnimGroup::AttackRightUp => "AttackRightUp",
            AnimGroup::AttackRightDown => "AttackRightDown",
            AnimGroup::PlaceMine => "PlaceMine",
            AnimGroup::PlaceMineUp => "PlaceMineUp",
            AnimGroup::PlaceMineDown => "PlaceMineDown",
            AnimGroup::ReloadA => "ReloadA",
            AnimGroup::ReloadB => "ReloadB",
            AnimGroup::ReloadC => "ReloadC",
            AnimGroup::Jam => "Jam",
            AnimGroup::BlockIdle => "BlockIdle",
            AnimGroup::BlockHit => "BlockHit",
            AnimGroup::Death => "Death",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        ALL_GROUPS
            .iter()
            .copied()
            .find(|group| group.name().eq_ignore_ascii_case(name))
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        ALL_GROUPS.get(usize::from(value)).copied()
    }

    /// `(base, up, down)` for groups whose variants are picked in lockstep.
    pub fn up_down_family(self) -> Option<(AnimGroup, AnimGroup, AnimGroup)> {
        use AnimGroup::*;
        let family = match self {
            Aim | AimUp | AimDown => (Aim, AimUp, AimDown),
            AimIS | AimISUp | AimISDown => (AimIS, AimISUp, AimISDown),
            AttackLeft | AttackLeftUp | AttackLeftDown => {
                (AttackLeft, AttackLeftUp, AttackLeftDown)
            }
            AttackRight | AttackRightUp | AttackRightDown => {
                (AttackRight, AttackRightUp, AttackRightDown)
            }
            PlaceMine | PlaceMineUp | PlaceMineDown => (PlaceMine, PlaceMineUp, PlaceMineDown),
            _ => return None,
        };
        Some(family)
    }

    pub fn is_family_base(self) -> bool {
        self.up_down_family()
            .is_some_and(|(base, _, _)| base == self)
    }

    pub fn is_reload(self) -> bool {
        matches!(self, AnimGroup::ReloadA | AnimGroup::ReloadB | AnimGroup::ReloadC)
    }

    pub fn slot(self) -> SequenceSlot {
        use AnimGroup::*;
        match self {
            Idle | DynamicIdle => SequenceSlot::Idle,
            Forward | Backward | Left | Right | TurnLeft | TurnRight => SequenceSlot::Movement,
            BlockIdle | BlockHit => SequenceSlot::LeftArm,
            AimUp | AimISUp | AttackLeftUp | AttackRightUp | PlaceMineUp => {
                SequenceSlot::WeaponUp
            }
            AimDown | AimISDown | AttackLeftDown | AttackRightDown | PlaceMineDown => {
                SequenceSlot::WeaponDown
            }
            SpecialIdle => SequenceSlot::SpecialIdle,
            Death => SequenceSlot::Death,
            _ => SequenceSlot::Weapon,
        }
    }
}

impl fmt::Display for AnimGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Weapon hand type, the high byte of an [`AnimGroupId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[repr(u8)]
pub enum HandType {
    #[default]
    None = 0,
    HandToHand,
    OneHandMelee,
    TwoHandMelee,
    OneHandPistol,
    TwoHandAutomatic,
    TwoHandRifle,
    TwoHandHandle,
    OneHandGrenade,
    OneHandMine,
    OneHandLandMine,
    TwoHandLauncher,
}

const HAND_PREFIXES: [(HandType, &str); 11] = [
    (HandType::HandToHand, "h2h"),
    (HandType::OneHandMelee, "1hm"),
    (HandType::TwoHandMelee, "2hm"),
    (HandType::OneHandPistol, "1hp"),
    (HandType::TwoHandAutomatic, "2ha"),
    (HandType::TwoHandRifle, "2hr"),
    (HandType::TwoHandHandle, "2hh"),
    (HandType::OneHandGrenade, "1gt"),
    (HandType::OneHandMine, "1md"),
    (HandType::OneHandLandMine, "1lm"),
    (HandType::TwoHandLauncher, "2hl"),
];

impl HandType {
    pub fn prefix(self) -> &'static str {
        HAND_PREFIXES
            .iter()
            .find(|(hand, _)| *hand == self)
            .map_or("", |(_, prefix)| prefix)
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        HAND_PREFIXES
            .iter()
            .find(|(_, p)| p.eq_ignore_ascii_case(prefix))
            .map(|(hand, _)| *hand)
    }

    fn from_u8(value: u8) -> Self {
        if value == 0 {
            return HandType::None;
        }
        HAND_PREFIXES
            .get(usize::from(value) - 1)
            .map_or(HandType::None, |(hand, _)| *hand)
    }
}

/// Group plus hand type, packed as `hand << 8 | group`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AnimGroupId(pub u16);

impl AnimGroupId {
    pub fn new(group: AnimGroup, hand: HandType) -> Self {
        AnimGroupId((u16::from(hand as u8) << 8) | u16::from(group as u8))
    }

    pub fn group(self) -> Option<AnimGroup> {
        AnimGroup::from_u8((self.0 & 0xFF) as u8)
    }

    pub fn hand(self) -> HandType {
        HandType::from_u8((self.0 >> 8) as u8)
    }

    pub fn without_hand(self) -> Self {
        AnimGroupId(self.0 & 0xFF)
    }

    pub fn with_group(self, group: AnimGroup) -> Self {
        AnimGroupId::new(group, self.hand())
    }

    /// Parses a file stem such as `2haAimUp` or `Idle_order_1`. Anything after the
    /// first `_` is a variant suffix.
    pub fn parse(stem: &str) -> Option<Self> {
        let base = stem.split('_').next().unwrap_or(stem);
        if let Some(group) = AnimGroup::from_name(base) {
            return Some(AnimGroupId::new(group, HandType::None));
        }
        let (prefix, rest) = (base.get(..3)?, base.get(3..)?);
        let hand = HandType::from_prefix(prefix)?;
        AnimGroup::from_name(rest).map(|group| AnimGroupId::new(group, hand))
    }
}

impl From<AnimGroup> for AnimGroupId {
    fn from(group: AnimGroup) -> Self {
        AnimGroupId::new(group, HandType::None)
    }
}

impl fmt::Display for AnimGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.group() {
            Some(group) => write!(f, "{}{}", self.hand().prefix(), group),
            None => write!(f, "group#{:04x}", self.0),
        }
    }
}

/// Slots a manager tracks one current sequence for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequenceSlot {
    Idle,
    Movement,
    LeftArm,
    Weapon,
    WeaponUp,
    WeaponDown,
    SpecialIdle,
    Death,
}

impl SequenceSlot {
    pub fn default_priority(self) -> i8 {
        match self {
            SequenceSlot::Idle => 0,
            SequenceSlot::Movement => 1,
            SequenceSlot::SpecialIdle => 2,
            SequenceSlot::Weapon | SequenceSlot::WeaponUp | SequenceSlot::WeaponDown => 3,
            SequenceSlot::LeftArm => 4,
            SequenceSlot::Death => 5,
        }
    }
}
