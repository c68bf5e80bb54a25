//! Entity data structures. Entities are owned by their map's directory, every other
//! structure (cells, active lists, move lists) refers to them by [`EntityId`].

use std::fmt;

use glam::Vec3;
use indexmap::IndexSet;

use crate::context::{Outgoing, SessionId};
use crate::coord::{CellCoord, GridCoord};
use crate::util::TimeTracker;


/// The closed set of entity kinds simulated by a map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Player,
    Creature,
    GameObject,
    DynamicObject,
    AreaTrigger,
    Corpse,
}

impl EntityKind {

    pub const ALL: [Self; 6] = [
        Self::Player,
        Self::Creature,
        Self::GameObject,
        Self::DynamicObject,
        Self::AreaTrigger,
        Self::Corpse,
    ];

    #[inline]
    const fn bit(self) -> u8 {
        1 << self as u8
    }

    /// Index of this kind, used for per-kind arrays.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

}

/// A set of entity kinds, used to filter visitors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct KindSet(u8);

impl KindSet {

    pub const EMPTY: Self = Self(0);
    pub const ALL: Self = Self(0b111111);

    #[inline]
    pub const fn of(kind: EntityKind) -> Self {
        Self(kind.bit())
    }

    #[inline]
    pub const fn with(self, kind: EntityKind) -> Self {
        Self(self.0 | kind.bit())
    }

    #[inline]
    pub const fn contains(self, kind: EntityKind) -> bool {
        self.0 & kind.bit() != 0
    }

}


/// Unique identifier of an entity within its map, the kind is part of the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId {
    pub kind: EntityKind,
    pub counter: u64,
}

impl EntityId {

    #[inline]
    pub const fn new(kind: EntityKind, counter: u64) -> Self {
        Self { kind, counter }
    }

}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}-{}", self.kind, self.counter)
    }
}


/// A world position with an orientation, X/Y are the horizontal plane.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub pos: Vec3,
    pub orientation: f32,
}

impl Position {

    #[inline]
    pub const fn new(x: f32, y: f32, z: f32, orientation: f32) -> Self {
        Self { pos: Vec3::new(x, y, z), orientation }
    }

    /// The cell containing this position, none if outside of the map.
    #[inline]
    pub fn cell(&self) -> Option<CellCoord> {
        CellCoord::from_pos(self.pos)
    }

    /// The grid containing this position, none if outside of the map.
    #[inline]
    pub fn grid(&self) -> Option<GridCoord> {
        self.cell().map(CellCoord::grid)
    }

    /// Horizontal distance to another position.
    #[inline]
    pub fn distance_2d(&self, other: &Position) -> f32 {
        self.pos.truncate().distance(other.pos.truncate())
    }

}


/// State of an entity in its kind's deferred move list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MoveState {
    /// Not in any move list.
    #[default]
    None,
    /// Queued, the move will be applied on the next flush.
    Active,
    /// Still present in the move list but cancelled, skipped on flush.
    Inactive,
}

/// A relocation deferred to the next move list flush.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PendingMove {
    pub state: MoveState,
    pub dest: Position,
    /// When the destination grid is not loaded, fall back to the respawn point.
    pub home_fallback: bool,
}


/// References from a unit to others it is fighting or is affected by, used to keep
/// distant partners updated.
#[derive(Debug, Clone, Default)]
pub struct CombatLinks {
    pub partners: Vec<EntityId>,
    pub aura_casters: Vec<EntityId>,
}

impl CombatLinks {

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.partners.is_empty() && self.aura_casters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.partners.iter().chain(self.aura_casters.iter()).copied()
    }

}

/// A straight motion toward a destination, driven by entity updates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Motion {
    pub dest: Position,
    /// Speed in world units per second.
    pub speed: f32,
}

#[derive(Debug, Clone, Default)]
pub struct PlayerData {
    pub session: SessionId,
    pub zone_id: u32,
    /// Dead players walk as ghosts until resurrected.
    pub ghost: bool,
    /// The entity viewed through far sight, if any.
    pub view_point: Option<EntityId>,
    /// Entities currently known by the client.
    pub visible: IndexSet<EntityId>,
    /// Updates waiting to be flushed to the session.
    pub outgoing: Vec<Outgoing>,
    pub combat: CombatLinks,
}

#[derive(Debug, Clone)]
pub struct CreatureData {
    pub alive: bool,
    /// Counting down while the creature is dead.
    pub corpse_decay: TimeTracker,
    /// Respawn delay in seconds, applied when the corpse decays.
    pub respawn_delay: u32,
    /// Set while the creature is being escorted by players.
    pub escorted: bool,
    /// Pets are never protecting their spawn grid.
    pub pet: bool,
    pub motion: Option<Motion>,
    pub combat: CombatLinks,
}

impl Default for CreatureData {
    fn default() -> Self {
        Self {
            alive: true,
            corpse_decay: TimeTracker::default(),
            respawn_delay: 0,
            escorted: false,
            pet: false,
            motion: None,
            combat: CombatLinks::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GameObjectData {
    /// Respawn delay in seconds.
    pub respawn_delay: u32,
    pub transport: Option<TransportData>,
}

/// A game object carrying passengers along its movement.
#[derive(Debug, Clone, Default)]
pub struct TransportData {
    pub passengers: IndexSet<EntityId>,
    /// Velocity in world units per second.
    pub velocity: Vec3,
}

/// Data of dynamic objects and area triggers, both are spell effect volumes.
#[derive(Debug, Clone)]
pub struct EffectData {
    pub caster: EntityId,
    /// None for effects without time limit.
    pub duration: Option<TimeTracker>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorpseType {
    /// Remains of a corpse, only decorative.
    Bones,
    /// A player corpse that can be resurrected.
    Resurrectable,
}

#[derive(Debug, Clone)]
pub struct CorpseData {
    pub owner: EntityId,
    pub corpse_type: CorpseType,
    /// Game time (seconds) of the corpse creation.
    pub created: u64,
}

/// Kind-specific entity data.
#[derive(Debug, Clone)]
pub enum EntityData {
    Player(PlayerData),
    Creature(CreatureData),
    GameObject(GameObjectData),
    DynamicObject(EffectData),
    AreaTrigger(EffectData),
    Corpse(CorpseData),
}

impl EntityData {

    pub fn kind(&self) -> EntityKind {
        match self {
            EntityData::Player(_) => EntityKind::Player,
            EntityData::Creature(_) => EntityKind::Creature,
            EntityData::GameObject(_) => EntityKind::GameObject,
            EntityData::DynamicObject(_) => EntityKind::DynamicObject,
            EntityData::AreaTrigger(_) => EntityKind::AreaTrigger,
            EntityData::Corpse(_) => EntityKind::Corpse,
        }
    }

}


/// Result of an entity update that the map must apply once the parallel phase of the
/// tick is over.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// The entity reached the end of its life and should be removed.
    Expired,
    /// The creature corpse has decayed, the creature should despawn and respawn later.
    CorpseDecayed,
    /// The entity moved to another cell and must be relocated by the map.
    Relocate(Position),
}


/// An entity simulated in a map.
#[derive(Debug, Clone)]
pub struct Entity {
    id: EntityId,
    /// Current position.
    pub position: Position,
    /// The respawn point, where the entity comes back after respawn.
    pub home: Position,
    /// Back reference to the cell indexing this entity, set by the map.
    pub(crate) cell: Option<CellCoord>,
    /// The spawn definition this entity was created from, if any.
    pub spawn_id: Option<u64>,
    /// Template entry.
    pub entry: u32,
    /// Active entities are exempt from distance culling and keep grids loaded.
    pub(crate) active: bool,
    /// World objects are indexed in the world-object bag of cells.
    pub world_object: bool,
    /// Entities visible only to a single owner (personal phasing).
    pub private_owner: Option<EntityId>,
    pub(crate) in_world: bool,
    /// Set when the entity is about to be destroyed with its grid.
    pub(crate) destroyed: bool,
    pub(crate) pending_move: PendingMove,
    /// Set when the entity moved and nearby entities should be notified.
    pub(crate) relocation_notify: bool,
    pub data: EntityData,
}

impl Entity {

    fn new(id: EntityId, position: Position, data: EntityData) -> Self {
        debug_assert_eq!(id.kind, data.kind(), "entity id kind and data mismatch");
        Self {
            id,
            position,
            home: position,
            cell: None,
            spawn_id: None,
            entry: 0,
            active: false,
            world_object: false,
            private_owner: None,
            in_world: false,
            destroyed: false,
            pending_move: PendingMove::default(),
            relocation_notify: false,
            data,
        }
    }

    /// A player entity bound to the given session, players are always active.
    pub fn player(counter: u64, session: SessionId, position: Position) -> Self {
        let mut entity = Self::new(
            EntityId::new(EntityKind::Player, counter),
            position,
            EntityData::Player(PlayerData { session, ..PlayerData::default() }));
        entity.active = true;
        entity.world_object = true;
        entity
    }

    pub fn creature(id: EntityId, entry: u32, position: Position) -> Self {
        let mut entity = Self::new(id, position, EntityData::Creature(CreatureData::default()));
        entity.entry = entry;
        entity
    }

    pub fn game_object(id: EntityId, entry: u32, position: Position) -> Self {
        let mut entity = Self::new(id, position, EntityData::GameObject(GameObjectData::default()));
        entity.entry = entry;
        entity
    }

    pub fn dynamic_object(id: EntityId, caster: EntityId, position: Position, duration_ms: Option<u32>) -> Self {
        Self::new(id, position, EntityData::DynamicObject(EffectData {
            caster,
            duration: duration_ms.map(TimeTracker::new),
        }))
    }

    pub fn area_trigger(id: EntityId, caster: EntityId, position: Position, duration_ms: Option<u32>) -> Self {
        Self::new(id, position, EntityData::AreaTrigger(EffectData {
            caster,
            duration: duration_ms.map(TimeTracker::new),
        }))
    }

    pub fn corpse(id: EntityId, owner: EntityId, position: Position, corpse_type: CorpseType, created: u64) -> Self {
        let mut entity = Self::new(id, position, EntityData::Corpse(CorpseData { owner, corpse_type, created }));
        // Resurrectable corpses are seen from far away by their ghost owner.
        entity.world_object = corpse_type == CorpseType::Resurrectable;
        entity
    }

    /// Builder for spawned entities, the spawn position becomes the respawn point.
    pub fn with_spawn(mut self, spawn_id: u64) -> Self {
        self.spawn_id = Some(spawn_id);
        self.home = self.position;
        self
    }

    pub fn with_home(mut self, home: Position) -> Self {
        self.home = home;
        self
    }

    /// Mark the entity as active before it enters a map, use the map's `set_active`
    /// once in world.
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn with_world_object(mut self, world_object: bool) -> Self {
        self.world_object = world_object;
        self
    }

    #[inline]
    pub fn id(&self) -> EntityId {
        self.id
    }

    #[inline]
    pub fn kind(&self) -> EntityKind {
        self.id.kind
    }

    /// The cell currently indexing this entity.
    #[inline]
    pub fn cell(&self) -> Option<CellCoord> {
        self.cell
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[inline]
    pub fn is_in_world(&self) -> bool {
        self.in_world
    }

    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    #[inline]
    pub fn move_state(&self) -> MoveState {
        self.pending_move.state
    }

    #[inline]
    pub fn needs_relocation_notify(&self) -> bool {
        self.relocation_notify
    }

    /// Players are always world objects, other entities depend on their flag.
    #[inline]
    pub fn is_world_object(&self) -> bool {
        self.kind() == EntityKind::Player || self.world_object
    }

    pub fn is_alive(&self) -> bool {
        match &self.data {
            EntityData::Creature(creature) => creature.alive,
            _ => true,
        }
    }

    pub fn is_pet(&self) -> bool {
        matches!(&self.data, EntityData::Creature(creature) if creature.pet)
    }

    pub fn is_transport(&self) -> bool {
        matches!(&self.data, EntityData::GameObject(GameObjectData { transport: Some(_), .. }))
    }

    pub fn as_player(&self) -> Option<&PlayerData> {
        match &self.data {
            EntityData::Player(player) => Some(player),
            _ => None,
        }
    }

    pub fn as_player_mut(&mut self) -> Option<&mut PlayerData> {
        match &mut self.data {
            EntityData::Player(player) => Some(player),
            _ => None,
        }
    }

    pub fn as_creature(&self) -> Option<&CreatureData> {
        match &self.data {
            EntityData::Creature(creature) => Some(creature),
            _ => None,
        }
    }

    pub fn as_creature_mut(&mut self) -> Option<&mut CreatureData> {
        match &mut self.data {
            EntityData::Creature(creature) => Some(creature),
            _ => None,
        }
    }

    pub fn as_corpse(&self) -> Option<&CorpseData> {
        match &self.data {
            EntityData::Corpse(corpse) => Some(corpse),
            _ => None,
        }
    }

    pub fn as_transport(&self) -> Option<&TransportData> {
        match &self.data {
            EntityData::GameObject(game_object) => game_object.transport.as_ref(),
            _ => None,
        }
    }

    pub fn as_transport_mut(&mut self) -> Option<&mut TransportData> {
        match &mut self.data {
            EntityData::GameObject(game_object) => game_object.transport.as_mut(),
            _ => None,
        }
    }

    /// Links to combat partners and aura casters, only units have some.
    pub fn combat_links(&self) -> Option<&CombatLinks> {
        match &self.data {
            EntityData::Player(player) => Some(&player.combat),
            EntityData::Creature(creature) => Some(&creature.combat),
            _ => None,
        }
    }

    pub fn combat_links_mut(&mut self) -> Option<&mut CombatLinks> {
        match &mut self.data {
            EntityData::Player(player) => Some(&mut player.combat),
            EntityData::Creature(creature) => Some(&mut creature.combat),
            _ => None,
        }
    }

    /// Return true if this entity can be seen by the given observer, private entities
    /// are only visible to their owner.
    #[inline]
    pub fn is_visible_to(&self, observer: EntityId) -> bool {
        self.private_owner.map_or(true, |owner| owner == observer)
    }

    /// Update entity-local state. This never touches anything else than the entity
    /// itself, so it can run in parallel for disjoint entities. Changes that require
    /// the map are returned as an outcome.
    pub fn update(&mut self, diff_ms: u32) -> Option<TickOutcome> {

        let cell = self.cell;
        let position = self.position;

        match &mut self.data {
            EntityData::Creature(creature) => {

                if !creature.alive {
                    creature.corpse_decay.update(diff_ms);
                    return creature.corpse_decay.passed().then_some(TickOutcome::CorpseDecayed);
                }

                let motion = creature.motion?;
                let delta = motion.dest.pos - position.pos;
                let step = motion.speed * diff_ms as f32 / 1000.0;

                let next = if step <= 0.0 {
                    creature.motion = None;
                    return None;
                } else if delta.length() <= step {
                    creature.motion = None;
                    motion.dest
                } else {
                    let pos = position.pos + delta.normalize() * step;
                    Position { pos, orientation: delta.y.atan2(delta.x) }
                };

                match next.cell() {
                    None => {
                        // Motion leading out of the map is dropped.
                        creature.motion = None;
                        None
                    }
                    Some(next_cell) if Some(next_cell) == cell => {
                        self.position = next;
                        self.relocation_notify = true;
                        None
                    }
                    Some(_) => Some(TickOutcome::Relocate(next)),
                }

            }
            EntityData::DynamicObject(effect) |
            EntityData::AreaTrigger(effect) => {
                let duration = effect.duration.as_mut()?;
                duration.update(diff_ms);
                duration.passed().then_some(TickOutcome::Expired)
            }
            EntityData::Player(_) |
            EntityData::GameObject(_) |
            EntityData::Corpse(_) => None,
        }

    }

}
