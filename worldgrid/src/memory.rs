//! In-memory collaborators. They are used by tests and by the demonstration server,
//! the recording ones keep track of the calls made by maps.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use glam::Vec3;

use crate::context::{
    Combat, CorpseRecord, MapContext, MapKey, Outgoing, Persistence, PersistenceError,
    PhaseTracker, Rules, SessionCommand, SessionId, Sessions, Terrain, WeatherState,
};
use crate::coord::{CellCoord, GridCoord};
use crate::entity::{Entity, EntityId};
use crate::spawn::{SpawnData, SpawnGroupData, SpawnKind};
use crate::respawn::RespawnRecord;


/// Lock a mutex, recovering from poisoning.
#[inline]
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}


/// A persistence backend storing everything in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    respawns: Mutex<HashMap<(MapKey, SpawnKind, u64), RespawnRecord>>,
    corpses: Mutex<HashMap<(MapKey, EntityId), CorpseRecord>>,
    spawns: RwLock<HashMap<(SpawnKind, u64), SpawnData>>,
    /// Spawns indexed by map, personal phase and cell.
    cells: RwLock<HashMap<(u32, Option<u32>, CellCoord), Vec<(SpawnKind, u64)>>>,
    groups: RwLock<HashMap<u32, SpawnGroupData>>,
    links: RwLock<HashMap<(SpawnKind, u64), (SpawnKind, u64)>>,
    /// Number of cell spawn queries, one per cell loaded.
    cell_queries: AtomicUsize,
}

impl MemoryStore {

    pub fn new() -> Self {
        Self::default()
    }

    /// Register a spawn definition, spawns outside of the map are ignored.
    pub fn add_spawn(&self, spawn: SpawnData) {
        let Some(cell) = spawn.cell() else { return };
        let key = (spawn.kind, spawn.spawn_id);
        self.cells.write().unwrap_or_else(|e| e.into_inner())
            .entry((spawn.map_id, spawn.phase_id, cell))
            .or_default()
            .push(key);
        self.spawns.write().unwrap_or_else(|e| e.into_inner()).insert(key, spawn);
    }

    pub fn add_spawn_group(&self, group: SpawnGroupData) {
        self.groups.write().unwrap_or_else(|e| e.into_inner()).insert(group.group_id, group);
    }

    /// Link the respawn of a spawn to the death of another one.
    pub fn link_respawn(&self, from: (SpawnKind, u64), to: (SpawnKind, u64)) {
        self.links.write().unwrap_or_else(|e| e.into_inner()).insert(from, to);
    }

    /// Directly insert a persisted respawn record.
    pub fn insert_respawn(&self, map: MapKey, record: RespawnRecord) {
        lock(&self.respawns).insert((map, record.kind, record.spawn_id), record);
    }

    pub fn respawn(&self, map: MapKey, kind: SpawnKind, spawn_id: u64) -> Option<RespawnRecord> {
        lock(&self.respawns).get(&(map, kind, spawn_id)).copied()
    }

    pub fn respawn_count(&self, map: MapKey) -> usize {
        lock(&self.respawns).keys().filter(|(key, _, _)| *key == map).count()
    }

    pub fn corpse_count(&self, map: MapKey) -> usize {
        lock(&self.corpses).keys().filter(|(key, _)| *key == map).count()
    }

    #[inline]
    pub fn cell_queries(&self) -> usize {
        self.cell_queries.load(Ordering::Relaxed)
    }

    fn query_cell(&self, map_id: u32, phase_id: Option<u32>, cell: CellCoord) -> Vec<SpawnData> {
        self.cell_queries.fetch_add(1, Ordering::Relaxed);
        let cells = self.cells.read().unwrap_or_else(|e| e.into_inner());
        let spawns = self.spawns.read().unwrap_or_else(|e| e.into_inner());
        cells.get(&(map_id, phase_id, cell))
            .into_iter()
            .flatten()
            .filter_map(|key| spawns.get(key).cloned())
            .collect()
    }

}

impl Persistence for MemoryStore {

    fn load_respawns(&self, map: MapKey) -> Result<Vec<RespawnRecord>, PersistenceError> {
        Ok(lock(&self.respawns).iter()
            .filter(|((key, _, _), _)| *key == map)
            .map(|(_, record)| *record)
            .collect())
    }

    fn save_respawn(&self, map: MapKey, record: &RespawnRecord) -> Result<(), PersistenceError> {
        lock(&self.respawns).insert((map, record.kind, record.spawn_id), *record);
        Ok(())
    }

    fn delete_respawn(&self, map: MapKey, kind: SpawnKind, spawn_id: u64) -> Result<(), PersistenceError> {
        lock(&self.respawns).remove(&(map, kind, spawn_id))
            .map(|_| ())
            .ok_or(PersistenceError::NotFound)
    }

    fn load_corpses(&self, map: MapKey) -> Result<Vec<CorpseRecord>, PersistenceError> {
        Ok(lock(&self.corpses).iter()
            .filter(|((key, _), _)| *key == map)
            .map(|(_, corpse)| corpse.clone())
            .collect())
    }

    fn save_corpse(&self, map: MapKey, corpse: &CorpseRecord) -> Result<(), PersistenceError> {
        lock(&self.corpses).insert((map, corpse.owner), corpse.clone());
        Ok(())
    }

    fn delete_corpse(&self, map: MapKey, owner: EntityId) -> Result<(), PersistenceError> {
        lock(&self.corpses).remove(&(map, owner))
            .map(|_| ())
            .ok_or(PersistenceError::NotFound)
    }

    fn spawn_data(&self, kind: SpawnKind, spawn_id: u64) -> Option<SpawnData> {
        self.spawns.read().unwrap_or_else(|e| e.into_inner()).get(&(kind, spawn_id)).cloned()
    }

    fn cell_spawns(&self, map_id: u32, cell: CellCoord) -> Vec<SpawnData> {
        self.query_cell(map_id, None, cell)
    }

    fn cell_personal_spawns(&self, map_id: u32, phase_id: u32, cell: CellCoord) -> Vec<SpawnData> {
        self.query_cell(map_id, Some(phase_id), cell)
    }

    fn spawn_group(&self, group_id: u32) -> Option<SpawnGroupData> {
        self.groups.read().unwrap_or_else(|e| e.into_inner()).get(&group_id).cloned()
    }

    fn map_spawn_groups(&self, map_id: u32) -> Vec<SpawnGroupData> {
        let mut groups = self.groups.read().unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|group| group.map_id == map_id)
            .cloned()
            .collect::<Vec<_>>();
        groups.sort_by_key(|group| group.group_id);
        groups
    }

    fn group_spawns(&self, group_id: u32) -> Vec<(SpawnKind, u64)> {
        let mut spawns = self.spawns.read().unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|spawn| spawn.group_id == group_id)
            .map(|spawn| (spawn.kind, spawn.spawn_id))
            .collect::<Vec<_>>();
        spawns.sort_unstable();
        spawns
    }

    fn linked_respawn(&self, kind: SpawnKind, spawn_id: u64) -> Option<(SpawnKind, u64)> {
        self.links.read().unwrap_or_else(|e| e.into_inner()).get(&(kind, spawn_id)).copied()
    }

}


/// A flat terrain in a single zone, keeping track of loaded tiles.
#[derive(Debug, Default)]
pub struct FlatTerrain {
    zone_id: u32,
    tiles: Mutex<HashSet<(u32, GridCoord)>>,
    tile_loads: AtomicUsize,
    balances: AtomicUsize,
}

impl FlatTerrain {

    pub fn new(zone_id: u32) -> Self {
        Self { zone_id, ..Self::default() }
    }

    pub fn is_tile_loaded(&self, map_id: u32, grid: GridCoord) -> bool {
        lock(&self.tiles).contains(&(map_id, grid))
    }

    pub fn loaded_tiles(&self) -> usize {
        lock(&self.tiles).len()
    }

    /// Total number of tile loads, including reloads.
    pub fn tile_loads(&self) -> usize {
        self.tile_loads.load(Ordering::Relaxed)
    }

    pub fn balances(&self) -> usize {
        self.balances.load(Ordering::Relaxed)
    }

}

impl Terrain for FlatTerrain {

    fn load_tile(&self, map_id: u32, grid: GridCoord) {
        self.tile_loads.fetch_add(1, Ordering::Relaxed);
        lock(&self.tiles).insert((map_id, grid));
    }

    fn unload_tile(&self, map_id: u32, grid: GridCoord) {
        lock(&self.tiles).remove(&(map_id, grid));
    }

    fn height(&self, _map_id: u32, _pos: Vec3) -> Option<f32> {
        Some(0.0)
    }

    fn zone_at(&self, _map_id: u32, _pos: Vec3) -> u32 {
        self.zone_id
    }

    fn balance(&self, _map_id: u32) {
        self.balances.fetch_add(1, Ordering::Relaxed);
    }

}


/// A call received by [`RecordingCombat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombatCall {
    StopCombat(EntityId),
    Cleanup(EntityId),
}

/// Combat hooks recording their calls, the default behavior is kept.
#[derive(Debug, Default)]
pub struct RecordingCombat {
    calls: Mutex<Vec<CombatCall>>,
    line_of_sight: AtomicUsize,
}

impl RecordingCombat {

    pub fn calls(&self) -> Vec<CombatCall> {
        lock(&self.calls).clone()
    }

    /// Number of line of sight notifications received.
    pub fn line_of_sight_count(&self) -> usize {
        self.line_of_sight.load(Ordering::Relaxed)
    }

}

impl Combat for RecordingCombat {

    fn stop_combat(&self, entity: &mut Entity) {
        lock(&self.calls).push(CombatCall::StopCombat(entity.id()));
        if let Some(links) = entity.combat_links_mut() {
            links.partners.clear();
        }
    }

    fn cleanup_before_delete(&self, entity: &mut Entity) {
        lock(&self.calls).push(CombatCall::Cleanup(entity.id()));
        if let Some(links) = entity.combat_links_mut() {
            links.partners.clear();
            links.aura_casters.clear();
        }
    }

    fn move_in_line_of_sight(&self, _observer: &Entity, _target: &Entity) {
        self.line_of_sight.fetch_add(1, Ordering::Relaxed);
    }

}


/// Phase tracker recording registrations, personal phases are configured per player.
#[derive(Debug, Default)]
pub struct RecordingPhases {
    registered: Mutex<HashSet<(MapKey, EntityId)>>,
    personal: Mutex<HashMap<EntityId, Vec<u32>>>,
    grid_loads: Mutex<Vec<(EntityId, GridCoord)>>,
    grid_unloads: Mutex<Vec<GridCoord>>,
    updates: AtomicUsize,
}

impl RecordingPhases {

    /// Set the personal phases returned when the player needs a grid.
    pub fn set_personal_phases(&self, player: EntityId, phases: Vec<u32>) {
        lock(&self.personal).insert(player, phases);
    }

    pub fn is_registered(&self, map: MapKey, entity: EntityId) -> bool {
        lock(&self.registered).contains(&(map, entity))
    }

    pub fn grid_loads(&self) -> Vec<(EntityId, GridCoord)> {
        lock(&self.grid_loads).clone()
    }

    pub fn grid_unloads(&self) -> Vec<GridCoord> {
        lock(&self.grid_unloads).clone()
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::Relaxed)
    }

}

impl PhaseTracker for RecordingPhases {

    fn register(&self, map: MapKey, entity: EntityId) {
        lock(&self.registered).insert((map, entity));
    }

    fn unregister(&self, map: MapKey, entity: EntityId) {
        lock(&self.registered).remove(&(map, entity));
    }

    fn load_grid(&self, _map: MapKey, player: EntityId, grid: GridCoord) -> Vec<u32> {
        lock(&self.grid_loads).push((player, grid));
        lock(&self.personal).get(&player).cloned().unwrap_or_default()
    }

    fn unload_grid(&self, _map: MapKey, grid: GridCoord) {
        lock(&self.grid_unloads).push(grid);
    }

    fn update(&self, _map: MapKey, _diff_ms: u32) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

}


/// Sessions with scripted incoming commands, outgoing updates are recorded.
#[derive(Debug, Default)]
pub struct RecordingSessions {
    incoming: Mutex<HashMap<SessionId, VecDeque<SessionCommand>>>,
    sent: Mutex<HashMap<SessionId, Vec<Outgoing>>>,
    pumps: AtomicUsize,
}

impl RecordingSessions {

    /// Queue a command returned on the next pump of the session.
    pub fn push_command(&self, session: SessionId, command: SessionCommand) {
        lock(&self.incoming).entry(session).or_default().push_back(command);
    }

    /// All updates delivered to a session so far.
    pub fn sent(&self, session: SessionId) -> Vec<Outgoing> {
        lock(&self.sent).get(&session).cloned().unwrap_or_default()
    }

    pub fn pumps(&self) -> usize {
        self.pumps.load(Ordering::Relaxed)
    }

}

impl Sessions for RecordingSessions {

    fn pump(&self, session: SessionId, _diff_ms: u32) -> Vec<SessionCommand> {
        self.pumps.fetch_add(1, Ordering::Relaxed);
        lock(&self.incoming).get_mut(&session).map(|queue| queue.drain(..).collect()).unwrap_or_default()
    }

    fn send(&self, session: SessionId, updates: &[Outgoing]) {
        lock(&self.sent).entry(session).or_default().extend_from_slice(updates);
    }

}


/// Rules with configurable spawn group conditions, pools and weather.
#[derive(Debug, Default)]
pub struct MemoryRules {
    conditions: Mutex<HashMap<u32, bool>>,
    /// Pooled spawns currently not spawned by their pool.
    pool_despawned: Mutex<HashSet<(SpawnKind, u64)>>,
    pool_updates: Mutex<Vec<(u32, SpawnKind, u64)>>,
    weather: Mutex<HashMap<u32, (WeatherState, f32)>>,
}

impl MemoryRules {

    pub fn set_condition(&self, group_id: u32, met: bool) {
        lock(&self.conditions).insert(group_id, met);
    }

    pub fn set_pool_spawned(&self, kind: SpawnKind, spawn_id: u64, spawned: bool) {
        let mut despawned = lock(&self.pool_despawned);
        if spawned {
            despawned.remove(&(kind, spawn_id));
        } else {
            despawned.insert((kind, spawn_id));
        }
    }

    pub fn pool_updates(&self) -> Vec<(u32, SpawnKind, u64)> {
        lock(&self.pool_updates).clone()
    }

    /// Queue a weather change, returned on the next weather update of the zone.
    pub fn set_weather(&self, zone_id: u32, weather: WeatherState, grade: f32) {
        lock(&self.weather).insert(zone_id, (weather, grade));
    }

}

impl Rules for MemoryRules {

    fn spawn_group_condition(&self, _map: MapKey, group_id: u32) -> bool {
        lock(&self.conditions).get(&group_id).copied().unwrap_or(true)
    }

    fn pool_spawned(&self, _map: MapKey, _pool_id: u32, kind: SpawnKind, spawn_id: u64) -> bool {
        !lock(&self.pool_despawned).contains(&(kind, spawn_id))
    }

    fn update_pool(&self, _map: MapKey, pool_id: u32, kind: SpawnKind, spawn_id: u64) -> bool {
        lock(&self.pool_updates).push((pool_id, kind, spawn_id));
        true
    }

    fn update_weather(&self, _map: MapKey, zone_id: u32, _diff_ms: u32) -> Option<(WeatherState, f32)> {
        lock(&self.weather).remove(&zone_id)
    }

}


/// All in-memory collaborators, with typed handles kept for inspection.
#[derive(Debug, Clone)]
pub struct MemoryContext {
    pub store: Arc<MemoryStore>,
    pub terrain: Arc<FlatTerrain>,
    pub combat: Arc<RecordingCombat>,
    pub phases: Arc<RecordingPhases>,
    pub sessions: Arc<RecordingSessions>,
    pub rules: Arc<MemoryRules>,
}

impl Default for MemoryContext {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryContext {

    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            terrain: Arc::new(FlatTerrain::new(1)),
            combat: Arc::new(RecordingCombat::default()),
            phases: Arc::new(RecordingPhases::default()),
            sessions: Arc::new(RecordingSessions::default()),
            rules: Arc::new(MemoryRules::default()),
        }
    }

    /// The map context using these collaborators.
    pub fn context(&self) -> MapContext {
        MapContext {
            persistence: self.store.clone(),
            terrain: self.terrain.clone(),
            combat: self.combat.clone(),
            phases: self.phases.clone(),
            sessions: self.sessions.clone(),
            rules: self.rules.clone(),
        }
    }

}


#[cfg(test)]
mod tests {

    use crate::entity::Position;

    use super::*;

    #[test]
    fn store_indexes_cells() {

        let store = MemoryStore::new();
        let pos = Position::new(10.0, 10.0, 0.0, 0.0);
        store.add_spawn(SpawnData::new(SpawnKind::Creature, 1, 100, 0, pos));
        let mut personal = SpawnData::new(SpawnKind::GameObject, 2, 200, 0, pos);
        personal.phase_id = Some(7);
        store.add_spawn(personal);

        let cell = pos.cell().unwrap();
        assert_eq!(store.cell_spawns(0, cell).len(), 1);
        assert_eq!(store.cell_spawns(1, cell).len(), 0);
        assert_eq!(store.cell_personal_spawns(0, 7, cell)[0].spawn_id, 2);
        assert_eq!(store.cell_queries(), 3);
        assert_eq!(store.group_spawns(0), [(SpawnKind::Creature, 1), (SpawnKind::GameObject, 2)]);

    }

    #[test]
    fn store_respawns_scoped() {
        let store = MemoryStore::new();
        let map = MapKey::new(1, 0);
        let other = MapKey::new(1, 1);
        let record = RespawnRecord { kind: SpawnKind::Creature, spawn_id: 1, entry: 0, due: 10, grid_id: 0 };
        store.save_respawn(map, &record).unwrap();
        assert_eq!(store.load_respawns(map).unwrap(), [record]);
        assert!(store.load_respawns(other).unwrap().is_empty());
        assert_eq!(store.delete_respawn(other, SpawnKind::Creature, 1), Err(PersistenceError::NotFound));
        store.delete_respawn(map, SpawnKind::Creature, 1).unwrap();
        assert_eq!(store.respawn_count(map), 0);
    }

}
