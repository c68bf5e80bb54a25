//! Interfaces of the collaborators consumed by maps: persistence, terrain, combat,
//! phasing, network sessions and game rules. All methods have a default implementation
//! so that implementors only provide what they support, [`Detached`] implements all of
//! them with their defaults.

use std::sync::Arc;

use glam::Vec3;
use thiserror::Error;

use crate::coord::{CellCoord, GridCoord};
use crate::entity::{CorpseType, Entity, EntityId, Position};
use crate::spawn::{SpawnData, SpawnGroupData, SpawnKind};
use crate::respawn::RespawnRecord;


/// Identifier of a map instance, persisted data is scoped to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MapKey {
    pub map_id: u32,
    pub instance_id: u32,
}

impl MapKey {

    #[inline]
    pub const fn new(map_id: u32, instance_id: u32) -> Self {
        Self { map_id, instance_id }
    }

}

/// Identifier of a network session.
pub type SessionId = u64;


/// A persisted corpse.
#[derive(Debug, Clone, PartialEq)]
pub struct CorpseRecord {
    pub owner: EntityId,
    pub position: Position,
    pub corpse_type: CorpseType,
    /// Game time (seconds) of creation.
    pub created: u64,
}

/// Weather kinds of a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WeatherState {
    #[default]
    Fine,
    Rain,
    Snow,
    Sandstorm,
}

/// An update queued for a player's client, encoding is done by the session layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    /// The entity entered the player's view.
    Create(EntityId),
    /// The entity left the player's view.
    Destroy(EntityId),
    ZoneMusic { zone_id: u32, music_id: u32 },
    ZoneWeather { zone_id: u32, weather: WeatherState, grade: f32 },
    OverrideLight { zone_id: u32, area_light: u32, override_light: u32, transition_ms: u32 },
}

/// A command issued by a session while pumped, applied by the map after the pump.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SessionCommand {
    /// The player moved to a new position.
    Move(Position),
    /// The player leaves the map.
    Leave,
}


/// Error type common to persistence operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    /// The requested record does not exist.
    #[error("not found")]
    NotFound,
    /// The operation is not supported by this persistence backend.
    #[error("the operation is not supported")]
    Unsupported,
    /// All other backend errors.
    #[error("backend: {0}")]
    Backend(String),
}


/// Persisted respawn records, corpses and static spawn metadata.
pub trait Persistence: Send + Sync {

    /// Load all respawn records of the given map instance.
    fn load_respawns(&self, map: MapKey) -> Result<Vec<RespawnRecord>, PersistenceError> {
        let _ = map;
        Err(PersistenceError::Unsupported)
    }

    fn save_respawn(&self, map: MapKey, record: &RespawnRecord) -> Result<(), PersistenceError> {
        let _ = (map, record);
        Err(PersistenceError::Unsupported)
    }

    fn delete_respawn(&self, map: MapKey, kind: SpawnKind, spawn_id: u64) -> Result<(), PersistenceError> {
        let _ = (map, kind, spawn_id);
        Err(PersistenceError::Unsupported)
    }

    fn load_corpses(&self, map: MapKey) -> Result<Vec<CorpseRecord>, PersistenceError> {
        let _ = map;
        Err(PersistenceError::Unsupported)
    }

    fn save_corpse(&self, map: MapKey, corpse: &CorpseRecord) -> Result<(), PersistenceError> {
        let _ = (map, corpse);
        Err(PersistenceError::Unsupported)
    }

    fn delete_corpse(&self, map: MapKey, owner: EntityId) -> Result<(), PersistenceError> {
        let _ = (map, owner);
        Err(PersistenceError::Unsupported)
    }

    /// Static definition of a spawn.
    fn spawn_data(&self, kind: SpawnKind, spawn_id: u64) -> Option<SpawnData> {
        let _ = (kind, spawn_id);
        None
    }

    /// Spawns of the shared world located in the given cell.
    fn cell_spawns(&self, map_id: u32, cell: CellCoord) -> Vec<SpawnData> {
        let _ = (map_id, cell);
        Vec::new()
    }

    /// Spawns of a personal phase located in the given cell.
    fn cell_personal_spawns(&self, map_id: u32, phase_id: u32, cell: CellCoord) -> Vec<SpawnData> {
        let _ = (map_id, phase_id, cell);
        Vec::new()
    }

    fn spawn_group(&self, group_id: u32) -> Option<SpawnGroupData> {
        let _ = group_id;
        None
    }

    /// All spawn groups defined for a map.
    fn map_spawn_groups(&self, map_id: u32) -> Vec<SpawnGroupData> {
        let _ = map_id;
        Vec::new()
    }

    /// Members of a spawn group.
    fn group_spawns(&self, group_id: u32) -> Vec<(SpawnKind, u64)> {
        let _ = group_id;
        Vec::new()
    }

    /// The spawn whose death gates the respawn of the given one, a spawn linked to
    /// itself never respawns on its own.
    fn linked_respawn(&self, kind: SpawnKind, spawn_id: u64) -> Option<(SpawnKind, u64)> {
        let _ = (kind, spawn_id);
        None
    }

}

/// Terrain and collision queries, tiles are loaded along grids.
pub trait Terrain: Send + Sync {

    fn load_tile(&self, map_id: u32, grid: GridCoord) {
        let _ = (map_id, grid);
    }

    fn unload_tile(&self, map_id: u32, grid: GridCoord) {
        let _ = (map_id, grid);
    }

    /// Ground height below the given position.
    fn height(&self, map_id: u32, pos: Vec3) -> Option<f32> {
        let _ = (map_id, pos);
        None
    }

    fn line_of_sight(&self, map_id: u32, from: Vec3, to: Vec3) -> bool {
        let _ = (map_id, from, to);
        true
    }

    /// Zone containing the given position.
    fn zone_at(&self, map_id: u32, pos: Vec3) -> u32 {
        let _ = (map_id, pos);
        0
    }

    /// Rebalance the spatial index after new objects have been loaded.
    fn balance(&self, map_id: u32) {
        let _ = map_id;
    }

}

/// Hooks of the combat and spell systems.
pub trait Combat: Send + Sync {

    /// Stop all combat of the entity.
    fn stop_combat(&self, entity: &mut Entity) {
        if let Some(links) = entity.combat_links_mut() {
            links.partners.clear();
        }
    }

    /// Strip all cross references of an entity about to be destroyed.
    fn cleanup_before_delete(&self, entity: &mut Entity) {
        if let Some(links) = entity.combat_links_mut() {
            links.partners.clear();
            links.aura_casters.clear();
        }
    }

    /// Notify an observer that the target entered its line of sight, called in
    /// parallel from the visit fan-out.
    fn move_in_line_of_sight(&self, observer: &Entity, target: &Entity) {
        let _ = (observer, target);
    }

}

/// Phase tracking, making some entities visible only to specific owners.
pub trait PhaseTracker: Send + Sync {

    fn register(&self, map: MapKey, entity: EntityId) {
        let _ = (map, entity);
    }

    fn unregister(&self, map: MapKey, entity: EntityId) {
        let _ = (map, entity);
    }

    /// A player needs the given grid, return the personal phases to load for it.
    fn load_grid(&self, map: MapKey, player: EntityId, grid: GridCoord) -> Vec<u32> {
        let _ = (map, player, grid);
        Vec::new()
    }

    fn unload_grid(&self, map: MapKey, grid: GridCoord) {
        let _ = (map, grid);
    }

    fn update(&self, map: MapKey, diff_ms: u32) {
        let _ = (map, diff_ms);
    }

}

/// Network sessions of players.
pub trait Sessions: Send + Sync {

    /// Process incoming packets of a session, called in parallel for all players.
    fn pump(&self, session: SessionId, diff_ms: u32) -> Vec<SessionCommand> {
        let _ = (session, diff_ms);
        Vec::new()
    }

    /// Deliver queued updates to a session.
    fn send(&self, session: SessionId, updates: &[Outgoing]) {
        let _ = (session, updates);
    }

}

/// Game rules consulted by the core: conditions, pools and weather.
pub trait Rules: Send + Sync {

    /// Return true if the condition of a spawn group is met.
    fn spawn_group_condition(&self, map: MapKey, group_id: u32) -> bool {
        let _ = (map, group_id);
        true
    }

    /// Return true if the pool currently has the given spawn spawned, used on grid load.
    fn pool_spawned(&self, map: MapKey, pool_id: u32, kind: SpawnKind, spawn_id: u64) -> bool {
        let _ = (map, pool_id, kind, spawn_id);
        true
    }

    /// A pooled spawn is due, the pool decides what to spawn. Return true when the
    /// respawn record can be removed.
    fn update_pool(&self, map: MapKey, pool_id: u32, kind: SpawnKind, spawn_id: u64) -> bool {
        let _ = (map, pool_id, kind, spawn_id);
        true
    }

    /// Advance the weather of a zone, returning the new weather if it changed.
    fn update_weather(&self, map: MapKey, zone_id: u32, diff_ms: u32) -> Option<(WeatherState, f32)> {
        let _ = (map, zone_id, diff_ms);
        None
    }

}


/// A collaborator implementing every interface with its default behavior.
#[derive(Debug, Clone, Copy, Default)]
pub struct Detached;
impl Persistence for Detached { }
impl Terrain for Detached { }
impl Combat for Detached { }
impl PhaseTracker for Detached { }
impl Sessions for Detached { }
impl Rules for Detached { }


/// All collaborators of a map.
#[derive(Clone)]
pub struct MapContext {
    pub persistence: Arc<dyn Persistence>,
    pub terrain: Arc<dyn Terrain>,
    pub combat: Arc<dyn Combat>,
    pub phases: Arc<dyn PhaseTracker>,
    pub sessions: Arc<dyn Sessions>,
    pub rules: Arc<dyn Rules>,
}

impl MapContext {

    /// A context where every collaborator is [`Detached`].
    pub fn detached() -> Self {
        let detached = Arc::new(Detached);
        Self {
            persistence: detached.clone(),
            terrain: detached.clone(),
            combat: detached.clone(),
            phases: detached.clone(),
            sessions: detached.clone(),
            rules: detached,
        }
    }

}
