//! Static spawn metadata, provided by the persistence collaborator and used by the grid
//! loader and the respawn machinery.

use crate::entity::{EntityKind, Position};
use crate::coord::{CellCoord, GridCoord};


/// The kinds of entities that can be spawned from persisted spawn definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SpawnKind {
    Creature,
    GameObject,
    AreaTrigger,
}

impl SpawnKind {

    #[inline]
    pub fn entity_kind(self) -> EntityKind {
        match self {
            SpawnKind::Creature => EntityKind::Creature,
            SpawnKind::GameObject => EntityKind::GameObject,
            SpawnKind::AreaTrigger => EntityKind::AreaTrigger,
        }
    }

    #[inline]
    pub fn from_entity_kind(kind: EntityKind) -> Option<Self> {
        match kind {
            EntityKind::Creature => Some(SpawnKind::Creature),
            EntityKind::GameObject => Some(SpawnKind::GameObject),
            EntityKind::AreaTrigger => Some(SpawnKind::AreaTrigger),
            _ => None,
        }
    }

    /// Only creatures and game objects have respawn records, area triggers are
    /// permanent.
    #[inline]
    pub fn has_respawns(self) -> bool {
        matches!(self, SpawnKind::Creature | SpawnKind::GameObject)
    }

}


/// Identifier of the default spawn group, every spawn without explicit group is in it.
pub const DEFAULT_SPAWN_GROUP: u32 = 0;


/// A spawn definition, the template of an entity materialized when its grid loads.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnData {
    pub kind: SpawnKind,
    pub spawn_id: u64,
    pub entry: u32,
    pub map_id: u32,
    pub position: Position,
    pub group_id: u32,
    /// The pool owning this spawn, pooled spawns are managed externally.
    pub pool_id: Option<u32>,
    /// Respawn delay in seconds.
    pub respawn_delay: u32,
    /// Set for spawns only visible in a personal phase.
    pub phase_id: Option<u32>,
    /// Spawn the entity as an active entity.
    pub active: bool,
    /// Spawn the entity as a world object, visible from afar.
    pub world_object: bool,
    /// Creatures used as escort quest NPC.
    pub escort: bool,
}

impl SpawnData {

    pub fn new(kind: SpawnKind, spawn_id: u64, entry: u32, map_id: u32, position: Position) -> Self {
        Self {
            kind,
            spawn_id,
            entry,
            map_id,
            position,
            group_id: DEFAULT_SPAWN_GROUP,
            pool_id: None,
            respawn_delay: 300,
            phase_id: None,
            active: false,
            world_object: false,
            escort: false,
        }
    }

    #[inline]
    pub fn cell(&self) -> Option<CellCoord> {
        self.position.cell()
    }

    #[inline]
    pub fn grid(&self) -> Option<GridCoord> {
        self.position.grid()
    }

}


/// Flags of a spawn group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SpawnGroupFlags(u32);

impl SpawnGroupFlags {

    pub const NONE: Self = Self(0);
    /// System groups are always active and cannot be toggled.
    pub const SYSTEM: Self = Self(0x01);
    /// The group is inactive unless explicitly toggled.
    pub const MANUAL_SPAWN: Self = Self(0x04);
    /// Escort quest NPCs, that may respawn while escorted depending on configuration.
    pub const ESCORT_QUEST_NPC: Self = Self(0x10);
    /// Despawn the group's entities when its condition stops being met.
    pub const DESPAWN_ON_CONDITION_FAILURE: Self = Self(0x20);

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

}

/// A named set of spawns that are activated and deactivated together.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnGroupData {
    pub group_id: u32,
    pub name: String,
    pub map_id: u32,
    pub flags: SpawnGroupFlags,
}

impl SpawnGroupData {

    /// The default system group every ungrouped spawn belongs to.
    pub fn default_group(map_id: u32) -> Self {
        Self {
            group_id: DEFAULT_SPAWN_GROUP,
            name: "Default Group".to_string(),
            map_id,
            flags: SpawnGroupFlags::SYSTEM,
        }
    }

    #[inline]
    pub fn is_system(&self) -> bool {
        self.flags.contains(SpawnGroupFlags::SYSTEM)
    }

}
