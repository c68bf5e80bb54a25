//! Spatial grid engine of a persistent world server: lazily loaded grids of cells,
//! respawn scheduling and concurrent update of map instances.

pub mod util;
pub mod config;

pub mod coord;
pub mod entity;
pub mod spawn;
pub mod respawn;
pub mod context;
pub mod memory;

pub mod grid;
pub mod visit;
pub mod task;

// The map module and its submodules implement the whole partition index.
pub mod map;

// This module drives maps concurrently, it only relies on the updatable trait.
pub mod updater;

pub use config::MapConfig;
pub use context::{MapContext, MapKey};
pub use entity::{Entity, EntityId, EntityKind, Position};
pub use map::{Map, MapError, MapEvent, UnloadMode};
pub use updater::{MapUpdater, Updatable};
