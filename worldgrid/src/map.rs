//! Map instances, the world partition index. A map owns its grids, its entities and
//! every directory indexing them, the respawn schedule and the deferred move lists.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::mem;

use glam::Vec3;
use indexmap::{IndexMap, IndexSet};
use thiserror::Error;

use tracing::{debug, error};

use crate::config::{MapConfig, IN_MILLISECONDS};
use crate::context::{MapContext, MapKey, Outgoing};
use crate::coord::{CellArea, CellCoord, GridCoord};
use crate::entity::{Entity, EntityId, EntityKind};
use crate::grid::{Bag, Grid, GridMap, GridState};
use crate::respawn::RespawnSchedule;
use crate::spawn::{SpawnGroupData, SpawnKind};
use crate::task::TaskManager;
use crate::util::{IntervalTimer, Random};
use crate::visit::Visitor;


// Following modules are ordered by dependency, last modules depends on first ones.
pub mod active;
pub mod object;
pub mod movement;
pub mod corpse;
pub mod load;
pub mod unload;
pub mod respawn;
pub mod spawn_group;
pub mod zone;
pub mod script;
pub mod tick;

pub use unload::UnloadMode;
pub use zone::{ZoneDynamicInfo, ZoneLight};
pub use script::ScriptEvent;

use corpse::CorpseDirectory;
use movement::MoveLists;
use tick::CellMarks;


/// Errors returned by map operations, the per-tick driver never returns them but logs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MapError {
    #[error("invalid map coordinates ({x}, {y})")]
    InvalidCoord { x: f32, y: f32 },
    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),
    #[error("entity {0} is already in map")]
    AlreadyInMap(EntityId),
    #[error("unknown spawn {kind:?} {spawn_id}")]
    UnknownSpawn { kind: SpawnKind, spawn_id: u64 },
    #[error("unknown spawn group {0}")]
    UnknownSpawnGroup(u32),
    #[error("spawn group {0} is a system group")]
    SystemSpawnGroup(u32),
}

/// Events of a map, only recorded when an events queue is enabled.
#[derive(Debug, Clone, PartialEq)]
pub enum MapEvent {
    GridLoaded(GridCoord),
    GridUnloaded(GridCoord),
    GridState { coord: GridCoord, state: GridState },
    Added(EntityId),
    Removed(EntityId),
    Respawned { kind: SpawnKind, spawn_id: u64, id: EntityId },
    Evacuated { id: EntityId, to: GridCoord },
}


/// A map instance.
pub struct Map {
    key: MapKey,
    config: MapConfig,
    ctx: MapContext,
    /// Events queue, none if events are not recorded.
    events: Option<Vec<MapEvent>>,
    /// Game time of this map, in milliseconds.
    time_ms: u64,
    /// The sparse grid map.
    grids: GridMap,
    /// The entity directory, sole owner of entities.
    entities: IndexMap<EntityId, Entity>,
    /// Entities by spawn, multiple entities may share a spawn (personal copies).
    spawn_index: HashMap<(SpawnKind, u64), IndexSet<EntityId>>,
    /// Players in world.
    players: IndexSet<EntityId>,
    /// Active entities that are not players.
    active: IndexSet<EntityId>,
    /// Deferred moves, one list per movable kind.
    move_lists: MoveLists,
    /// Entities to destroy at the end of the tick.
    remove_list: IndexSet<EntityId>,
    respawns: RespawnSchedule,
    /// Spawn groups of this map, by identifier.
    spawn_groups: HashMap<u32, SpawnGroupData>,
    /// Spawn groups whose default active state is toggled.
    toggled_groups: HashSet<u32>,
    corpses: CorpseDirectory,
    zones: HashMap<u32, ZoneDynamicInfo>,
    transports: IndexSet<EntityId>,
    /// Scripted events by due time (ms) and sequence number.
    script_events: BTreeMap<(u64, u64), ScriptEvent>,
    script_seq: u64,
    /// Per-kind counters used to generate identifiers.
    next_counters: [u64; 6],
    respawn_timer: IntervalTimer,
    weather_timer: IntervalTimer,
    /// Cells visited during the current tick.
    marks: CellMarks,
    tasks: TaskManager,
    rand: Random,
}

impl Map {

    /// Create a map instance, the start time is the game time in seconds. Respawn
    /// records, spawn groups and corpses are loaded from the persistence collaborator.
    pub fn new(key: MapKey, config: MapConfig, ctx: MapContext, start_time: u64) -> Self {

        let mut map = Self {
            key,
            respawn_timer: IntervalTimer::new(config.respawn_check_interval),
            weather_timer: IntervalTimer::new(config.weather_update_interval),
            tasks: TaskManager::new(config.task_workers),
            config,
            ctx,
            events: None,
            time_ms: start_time * IN_MILLISECONDS,
            grids: GridMap::new(),
            entities: IndexMap::new(),
            spawn_index: HashMap::new(),
            players: IndexSet::new(),
            active: IndexSet::new(),
            move_lists: MoveLists::default(),
            remove_list: IndexSet::new(),
            respawns: RespawnSchedule::new(),
            spawn_groups: HashMap::new(),
            toggled_groups: HashSet::new(),
            corpses: CorpseDirectory::default(),
            zones: HashMap::new(),
            transports: IndexSet::new(),
            script_events: BTreeMap::new(),
            script_seq: 0,
            next_counters: [0; 6],
            marks: CellMarks::new(),
            rand: Random::new(((key.map_id as u64) << 32) | key.instance_id as u64),
        };

        map.load_spawn_groups();
        map.load_respawn_times();
        map.load_corpses();
        map

    }

    #[inline]
    pub fn key(&self) -> MapKey {
        self.key
    }

    #[inline]
    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    #[inline]
    pub fn context(&self) -> &MapContext {
        &self.ctx
    }

    /// Game time in seconds.
    #[inline]
    pub fn now(&self) -> u64 {
        self.time_ms / IN_MILLISECONDS
    }

    /// Game time in milliseconds.
    #[inline]
    pub fn time_ms(&self) -> u64 {
        self.time_ms
    }

    /// Swap in a new events queue and return the previous one. Giving none disables
    /// events recording.
    pub fn swap_events(&mut self, events: Option<Vec<MapEvent>>) -> Option<Vec<MapEvent>> {
        mem::replace(&mut self.events, events)
    }

    #[inline]
    pub(crate) fn push_event(&mut self, event: MapEvent) {
        if let Some(events) = &mut self.events {
            events.push(event);
        }
    }

    /// Generate a new unique entity identifier for the given kind.
    pub fn generate_id(&mut self, kind: EntityKind) -> EntityId {
        let counter = &mut self.next_counters[kind.index()];
        *counter += 1;
        EntityId::new(kind, *counter)
    }

    // =================== //
    //      ENTITIES       //
    // =================== //

    #[inline]
    pub fn contains_entity(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    #[inline]
    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// Mutable access to an entity, its position must be changed through the
    /// relocation functions so that cells stay coherent.
    #[inline]
    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> + '_ {
        self.entities.values()
    }

    #[inline]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Players currently in this map.
    pub fn players(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.players.iter().copied()
    }

    #[inline]
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Active entities that are not players.
    pub fn active_entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.active.iter().copied()
    }

    /// Entities materialized from the given spawn.
    pub fn entities_by_spawn(&self, kind: SpawnKind, spawn_id: u64) -> impl Iterator<Item = EntityId> + '_ {
        self.spawn_index.get(&(kind, spawn_id)).into_iter().flatten().copied()
    }

    fn index_spawn(&mut self, entity: &Entity) {
        if let (Some(spawn_id), Some(kind)) = (entity.spawn_id, SpawnKind::from_entity_kind(entity.kind())) {
            self.spawn_index.entry((kind, spawn_id)).or_default().insert(entity.id());
        }
    }

    fn unindex_spawn(&mut self, entity: &Entity) {
        if let (Some(spawn_id), Some(kind)) = (entity.spawn_id, SpawnKind::from_entity_kind(entity.kind())) {
            if let Some(ids) = self.spawn_index.get_mut(&(kind, spawn_id)) {
                ids.swap_remove(&entity.id());
                if ids.is_empty() {
                    self.spawn_index.remove(&(kind, spawn_id));
                }
            }
        }
    }

    /// Queue an update to a player's client, flushed during the tick.
    pub fn send_to_player(&mut self, id: EntityId, update: Outgoing) {
        if let Some(player) = self.entities.get_mut(&id).and_then(Entity::as_player_mut) {
            player.outgoing.push(update);
        }
    }

    // =================== //
    //        GRIDS        //
    // =================== //

    /// Create the grid at the given coordinate if not existing, the matching terrain
    /// tile is loaded at creation. Return true if the grid has been created.
    pub fn ensure_grid_created(&self, coord: GridCoord) -> bool {

        let created = self.grids.ensure(coord, || {
            let mut grid = Grid::new(coord, self.config.grid_unload_delay);
            grid.set_unload_lock(!self.config.grid_unload);
            self.ctx.terrain.load_tile(self.key.map_id, coord);
            grid
        });

        if created {
            debug!("created grid {coord} of map {}", self.key.map_id);
        }

        created

    }

    /// Ensure that the grid of the given cell is created and its objects loaded.
    /// Return true if objects have been loaded by this call.
    pub fn ensure_grid_loaded(&mut self, cell: CellCoord) -> bool {

        let coord = cell.grid();
        self.ensure_grid_created(coord);

        let Some(grid) = self.grids.get_mut(coord) else {
            return false;
        };

        if grid.is_loaded() {
            return false;
        }

        // Set before loading, entities added by the loader must not load it again.
        grid.set_loaded();
        debug!("loading grid {coord} of map {}", self.key.map_id);

        self.load_grid_objects(coord);
        self.ctx.terrain.balance(self.key.map_id);
        self.push_event(MapEvent::GridLoaded(coord));
        true

    }

    /// Ensure that the grid of the given cell is loaded for an active entity entering
    /// it, the grid becomes active and personal phases of players are loaded.
    pub fn ensure_grid_loaded_for_active_object(&mut self, cell: CellCoord, id: EntityId) {

        self.ensure_grid_loaded(cell);
        let coord = cell.grid();

        if id.kind == EntityKind::Player {
            for phase_id in self.ctx.phases.load_grid(self.key, id, coord) {
                self.load_personal_grid(coord, phase_id, id);
            }
        }

        let delay = self.config.grid_unload_delay;
        let Some(grid) = self.grids.get_mut(coord) else {
            return;
        };

        if grid.state() != GridState::Active {
            grid.ttl.reset(delay / 10);
            grid.set_state(GridState::Active);
            debug!("grid {coord} of map {} is now active", self.key.map_id);
            self.push_event(MapEvent::GridState { coord, state: GridState::Active });
        }

    }

    /// Load the grid at the given world position, return true if it has been loaded by
    /// this call.
    pub fn load_grid_at(&mut self, x: f32, y: f32) -> Result<bool, MapError> {
        let cell = CellCoord::from_world(x, y).ok_or(MapError::InvalidCoord { x, y })?;
        Ok(self.ensure_grid_loaded(cell))
    }

    /// Return the grid coordinate at the given world position if the grid exists.
    pub fn grid_at(&self, x: f32, y: f32) -> Option<GridCoord> {
        GridCoord::from_world(x, y).filter(|&coord| self.grids.contains(coord))
    }

    #[inline]
    pub fn is_grid_created(&self, coord: GridCoord) -> bool {
        self.grids.contains(coord)
    }

    /// Return true if the grid exists and its objects are loaded.
    pub fn is_grid_loaded(&self, coord: GridCoord) -> bool {
        self.grids.read().get(&coord).is_some_and(|grid| grid.is_loaded())
    }

    pub fn grid_state(&self, coord: GridCoord) -> Option<GridState> {
        self.grids.read().get(&coord).map(|grid| grid.state())
    }

    /// Number of active entities protecting the grid from unloading.
    pub fn grid_protection(&self, coord: GridCoord) -> Option<u32> {
        self.grids.read().get(&coord).map(|grid| grid.protection())
    }

    /// Explicitly lock or unlock a grid against unloading, return false if absent.
    pub fn set_grid_unload_lock(&mut self, coord: GridCoord, lock: bool) -> bool {
        match self.grids.get_mut(coord) {
            Some(grid) => {
                grid.set_unload_lock(lock);
                true
            }
            None => false,
        }
    }

    #[inline]
    pub fn grid_count(&self) -> usize {
        self.grids.len()
    }

    /// Coordinates of all existing grids, sorted.
    #[inline]
    pub fn grid_coords(&self) -> Vec<GridCoord> {
        self.grids.coords()
    }

    /// Index an entity in the given cell, the bag depends on the entity. Corpses of a
    /// grid not yet loaded are kept in the cell's pending bag, the grid loader moves
    /// them to the live bags. Return true if the entity is indexed in a live bag.
    pub fn add_to_grid(&mut self, id: EntityId, cell: CellCoord) -> bool {

        let Some(entity) = self.entities.get_mut(&id) else {
            return false;
        };

        debug_assert!(entity.cell.is_none(), "entity {id} is already indexed in a cell");

        let Some(grid) = self.grids.get_mut(cell.grid()) else {
            error!("cannot index entity {id} in cell {cell}, its grid does not exist");
            return false;
        };

        let loaded = grid.is_loaded();
        let Some(grid_cell) = grid.cell_mut(cell) else {
            return false;
        };

        entity.cell = Some(cell);

        if id.kind == EntityKind::Corpse && !loaded {
            grid_cell.insert_pending_corpse(id);
            false
        } else {
            let bag = if entity.is_world_object() { Bag::World } else { Bag::Grid };
            grid_cell.insert(bag, id);
            true
        }

    }

    /// Remove an entity from its current cell, return false if it was not indexed.
    pub fn remove_from_grid(&mut self, id: EntityId) -> bool {

        let Some(entity) = self.entities.get_mut(&id) else {
            return false;
        };

        let Some(cell) = entity.cell.take() else {
            return false;
        };

        let removed = self.grids.get_mut(cell.grid())
            .and_then(|grid| grid.cell_mut(cell))
            .is_some_and(|grid_cell| grid_cell.remove(id));

        debug_assert!(removed, "entity {id} not found in its cell {cell}");
        true

    }

    // =================== //
    //      VISITING       //
    // =================== //

    /// Visit the content of a cell. If the visit is allowed to create the grid or if the
    /// grid is already loaded, the grid is loaded before being visited. Return true if
    /// the cell has been visited.
    pub fn visit<V>(&mut self, cell: CellCoord, visitor: &mut V, no_create: bool) -> bool
    where
        V: Visitor + ?Sized,
    {
        if !no_create || self.is_grid_loaded(cell.grid()) {
            self.ensure_grid_loaded(cell);
            self.visit_no_create(cell, visitor);
            true
        } else {
            false
        }
    }

    /// Visit all cells covering a circle around a position.
    pub fn visit_around<V>(&mut self, pos: Vec3, radius: f32, visitor: &mut V, no_create: bool)
    where
        V: Visitor + ?Sized,
    {
        for cell in CellArea::around(pos.x, pos.y, radius) {
            self.visit(cell, visitor, no_create);
        }
    }

    /// Visit the content of a cell without creating or loading its grid.
    pub fn visit_no_create<V>(&self, cell: CellCoord, visitor: &mut V)
    where
        V: Visitor + ?Sized,
    {

        let filter = visitor.filter();
        let grids = self.grids.read();
        let Some(grid_cell) = grids.get(&cell.grid()).and_then(|grid| grid.cell(cell)) else {
            return;
        };

        for bag in [Bag::Grid, Bag::World] {

            if !filter.accepts_bag(bag) {
                continue;
            }

            for id in grid_cell.bag(bag) {
                if !filter.accepts_kind(id.kind) {
                    continue;
                }
                match self.entities.get(id) {
                    Some(entity) => visitor.visit(entity),
                    None => debug_assert!(false, "dangling entity {id} in cell {cell}"),
                }
            }

        }

    }

    /// Visit every cell of a grid without creating it.
    pub fn visit_grid<V>(&self, coord: GridCoord, visitor: &mut V)
    where
        V: Visitor + ?Sized,
    {
        for cell in coord.cells() {
            self.visit_no_create(cell, visitor);
        }
    }

    /// Count references to entities that are not in the entity directory, and entities
    /// not indexed in the bag of their cell matching their in world state. This is
    /// always zero unless a structural invariant is broken.
    pub fn dangling_references(&self) -> usize {

        let mut dangling = 0;
        let grids = self.grids.read();

        for grid in grids.values() {
            for (cell, grid_cell) in grid.cells() {
                for id in grid_cell.iter().chain(grid_cell.pending_corpses().iter().copied()) {
                    match self.entities.get(&id) {
                        Some(entity) if entity.cell == Some(cell) => {}
                        _ => dangling += 1,
                    }
                }
            }
        }

        for entity in self.entities.values() {
            let Some(cell) = entity.cell else {
                dangling += usize::from(entity.in_world);
                continue;
            };
            // Entities in world are in a live bag, others wait in the pending bag.
            let id = entity.id();
            let indexed = grids.get(&cell.grid())
                .and_then(|grid| grid.cell(cell))
                .is_some_and(|grid_cell| grid_cell.contains(id) && grid_cell.is_live(id) == entity.in_world);
            if !indexed {
                dangling += 1;
            }
        }

        let missing = |id: &EntityId| !self.entities.contains_key(id);
        dangling += self.players.iter().filter(|id| missing(id)).count();
        dangling += self.active.iter().filter(|id| missing(id)).count();
        dangling += self.transports.iter().filter(|id| missing(id)).count();
        dangling += self.remove_list.iter().filter(|id| missing(id)).count();
        dangling += self.spawn_index.values().flatten().filter(|id| missing(id)).count();
        dangling += self.corpses.iter().filter(|id| missing(id)).count();
        dangling

    }

}
