//! Spatial containers: grids of cells indexing entity identifiers, and the sparse grid
//! map of a map instance.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard};

use indexmap::IndexSet;

use crate::coord::{CellCoord, GridCoord, MAX_NUMBER_OF_CELLS};
use crate::entity::{EntityId, EntityKind};
use crate::util::TimeTracker;


/// The two logical bags of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bag {
    /// Passive entities, only seen when nearby.
    Grid,
    /// World objects, players and far visible entities.
    World,
}

/// A cell only indexes membership, entities are owned by the map.
#[derive(Debug, Default)]
pub struct Cell {
    grid_objects: IndexSet<EntityId>,
    world_objects: IndexSet<EntityId>,
    /// Corpses added while their grid was not yet loaded, they are moved to the live
    /// bags by the grid loader.
    pending_corpses: IndexSet<EntityId>,
}

impl Cell {

    #[inline]
    pub fn bag(&self, bag: Bag) -> &IndexSet<EntityId> {
        match bag {
            Bag::Grid => &self.grid_objects,
            Bag::World => &self.world_objects,
        }
    }

    #[inline]
    fn bag_mut(&mut self, bag: Bag) -> &mut IndexSet<EntityId> {
        match bag {
            Bag::Grid => &mut self.grid_objects,
            Bag::World => &mut self.world_objects,
        }
    }

    /// Insert an entity in the given bag, return false if already present.
    #[inline]
    pub fn insert(&mut self, bag: Bag, id: EntityId) -> bool {
        self.bag_mut(bag).insert(id)
    }

    /// Remove an entity from whichever bag contains it.
    pub fn remove(&mut self, id: EntityId) -> bool {
        // Removing the last inserted entity restores the previous order exactly.
        self.grid_objects.swap_remove(&id)
            || self.world_objects.swap_remove(&id)
            || self.pending_corpses.swap_remove(&id)
    }

    /// Return true if the entity is indexed in this cell, pending corpses included.
    #[inline]
    pub fn contains(&self, id: EntityId) -> bool {
        self.is_live(id) || self.pending_corpses.contains(&id)
    }

    /// Return true if the entity is indexed in one of the live bags.
    #[inline]
    pub fn is_live(&self, id: EntityId) -> bool {
        self.grid_objects.contains(&id) || self.world_objects.contains(&id)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.grid_objects.is_empty() && self.world_objects.is_empty() && self.pending_corpses.is_empty()
    }

    /// Iterate over both live bags.
    pub fn iter(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.grid_objects.iter().chain(self.world_objects.iter()).copied()
    }

    #[inline]
    pub fn insert_pending_corpse(&mut self, id: EntityId) -> bool {
        self.pending_corpses.insert(id)
    }

    #[inline]
    pub fn pending_corpses(&self) -> &IndexSet<EntityId> {
        &self.pending_corpses
    }

    #[inline]
    pub fn take_pending_corpses(&mut self) -> IndexSet<EntityId> {
        std::mem::take(&mut self.pending_corpses)
    }

}


/// Load state of a grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridState {
    /// Loaded but nothing requires fast update.
    Idle,
    /// An active entity is around, relocation notifications run at full cadence.
    Active,
    /// Counting down its time to live before being unloaded.
    Removal,
}

/// A grid of cells, with its load state and unload protections.
#[derive(Debug)]
pub struct Grid {
    coord: GridCoord,
    /// Cells indexed by local `y * MAX_NUMBER_OF_CELLS + x`.
    cells: Vec<Cell>,
    state: GridState,
    /// Set once the grid loader materialized the spawns of every cell.
    object_data_loaded: bool,
    /// Explicit "do not unload" lock.
    unload_lock: bool,
    /// Number of active entities whose respawn point is in this grid.
    protection: u32,
    /// Time to live, counting down to the next state check while active and to the
    /// eviction while in removal state.
    pub(crate) ttl: TimeTracker,
    /// Throttle of relocation notifications.
    pub(crate) relocation_timer: TimeTracker,
    /// Personal phases already loaded, by phase and owner.
    personal_phases: HashSet<(u32, EntityId)>,
}

impl Grid {

    pub fn new(coord: GridCoord, unload_delay: u32) -> Self {
        Self {
            coord,
            cells: (0..MAX_NUMBER_OF_CELLS * MAX_NUMBER_OF_CELLS).map(|_| Cell::default()).collect(),
            state: GridState::Idle,
            object_data_loaded: false,
            unload_lock: false,
            protection: 0,
            ttl: TimeTracker::new(unload_delay),
            relocation_timer: TimeTracker::default(),
            personal_phases: HashSet::new(),
        }
    }

    #[inline]
    pub fn coord(&self) -> GridCoord {
        self.coord
    }

    #[inline]
    fn cell_index(&self, cell: CellCoord) -> Option<usize> {
        if cell.grid() != self.coord {
            return None;
        }
        let (x, y) = cell.local();
        Some(y * MAX_NUMBER_OF_CELLS as usize + x)
    }

    /// Get a cell of this grid, none if the cell belongs to another grid.
    #[inline]
    pub fn cell(&self, cell: CellCoord) -> Option<&Cell> {
        self.cell_index(cell).map(|index| &self.cells[index])
    }

    #[inline]
    pub fn cell_mut(&mut self, cell: CellCoord) -> Option<&mut Cell> {
        self.cell_index(cell).map(|index| &mut self.cells[index])
    }

    /// Iterate over all cells and their coordinates.
    pub fn cells(&self) -> impl Iterator<Item = (CellCoord, &Cell)> + '_ {
        self.coord.cells().iter().zip(self.cells.iter())
    }

    #[inline]
    pub fn state(&self) -> GridState {
        self.state
    }

    #[inline]
    pub fn set_state(&mut self, state: GridState) {
        self.state = state;
    }

    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.object_data_loaded
    }

    #[inline]
    pub(crate) fn set_loaded(&mut self) {
        self.object_data_loaded = true;
    }

    #[inline]
    pub fn set_unload_lock(&mut self, lock: bool) {
        self.unload_lock = lock;
    }

    #[inline]
    pub fn is_unload_locked(&self) -> bool {
        self.unload_lock
    }

    #[inline]
    pub fn protection(&self) -> u32 {
        self.protection
    }

    #[inline]
    pub(crate) fn increment_protection(&mut self) {
        self.protection += 1;
    }

    #[inline]
    pub(crate) fn decrement_protection(&mut self) {
        debug_assert!(self.protection > 0, "grid protection underflow");
        self.protection = self.protection.saturating_sub(1);
    }

    /// Return true if this grid must not be unloaded, because of an explicit lock or
    /// active entities having their respawn point here.
    #[inline]
    pub fn is_protected(&self) -> bool {
        self.unload_lock || self.protection > 0
    }

    /// Count entities of the given kind in one bag of all cells.
    pub fn count(&self, bag: Bag, kind: EntityKind) -> usize {
        self.cells.iter()
            .map(|cell| cell.bag(bag).iter().filter(|id| id.kind == kind).count())
            .sum()
    }

    /// Iterate all entities of both live bags of all cells.
    pub fn entity_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.cells.iter().flat_map(Cell::iter)
    }

    /// Return true if no entity is indexed, including pending corpses.
    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(Cell::is_empty)
    }

    /// Mark a personal phase as loaded for an owner, return false if already loaded.
    #[inline]
    pub(crate) fn mark_personal_phase(&mut self, phase_id: u32, owner: EntityId) -> bool {
        self.personal_phases.insert((phase_id, owner))
    }

}


/// The sparse map of grids of a map instance. Grids are created lazily under a write
/// lock, concurrent readers of the map are allowed during the tick fan-out.
#[derive(Debug, Default)]
pub struct GridMap {
    inner: RwLock<HashMap<GridCoord, Box<Grid>>>,
}

impl GridMap {

    pub fn new() -> Self {
        Self::default()
    }

    /// Create the grid at the given coordinate if absent, the constructor is called
    /// under the write lock so that exactly one grid is created for a coordinate.
    /// Return true if the grid has been created by this call.
    pub fn ensure<F>(&self, coord: GridCoord, make: F) -> bool
    where
        F: FnOnce() -> Grid,
    {

        if self.read().contains_key(&coord) {
            return false;
        }

        let mut grids = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if grids.contains_key(&coord) {
            return false;
        }

        grids.insert(coord, Box::new(make()));
        true

    }

    /// Lock the grid map for reading.
    #[inline]
    pub fn read(&self) -> RwLockReadGuard<'_, HashMap<GridCoord, Box<Grid>>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    #[inline]
    pub fn inner_mut(&mut self) -> &mut HashMap<GridCoord, Box<Grid>> {
        self.inner.get_mut().unwrap_or_else(|e| e.into_inner())
    }

    #[inline]
    pub fn contains(&self, coord: GridCoord) -> bool {
        self.read().contains_key(&coord)
    }

    #[inline]
    pub fn get_mut(&mut self, coord: GridCoord) -> Option<&mut Grid> {
        self.inner_mut().get_mut(&coord).map(|grid| &mut **grid)
    }

    #[inline]
    pub fn remove(&mut self, coord: GridCoord) -> Option<Box<Grid>> {
        self.inner_mut().remove(&coord)
    }

    /// Coordinates of all grids, sorted for deterministic processing.
    pub fn coords(&self) -> Vec<GridCoord> {
        let mut coords = self.read().keys().copied().collect::<Vec<_>>();
        coords.sort_unstable();
        coords
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

}
