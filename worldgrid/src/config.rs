//! Tunables of a map instance.

use crate::coord::SIZE_OF_GRID_CELL;


/// Milliseconds in a second, used for conversions between the game clock (seconds)
/// and tick deltas (milliseconds).
pub const IN_MILLISECONDS: u64 = 1000;
/// Seconds in an hour.
pub const HOUR: u64 = 60 * 60;
/// Seconds in a day.
pub const DAY: u64 = 24 * HOUR;
/// Seconds in a week.
pub const WEEK: u64 = 7 * DAY;


/// Configuration of a map, shared by all maps of a server.
#[derive(Debug, Clone)]
pub struct MapConfig {
    /// Visibility distance in world units, entities further than this are not
    /// notified of each other.
    pub visibility_distance: f32,
    /// Time to live of idle grids before they are unloaded, in milliseconds.
    pub grid_unload_delay: u32,
    /// When false, grids are never evicted and only unloaded on map teardown.
    pub grid_unload: bool,
    /// Period of the relocation notifier for each active grid, in milliseconds.
    pub relocation_notify_period: u32,
    /// Interval between two respawn scheduler runs, in milliseconds.
    pub respawn_check_interval: u32,
    /// Interval between two zone weather updates, in milliseconds.
    pub weather_update_interval: u32,
    /// Time before a dead creature's corpse decays and is despawned, in milliseconds.
    pub creature_corpse_decay: u32,
    /// Time before a resurrectable player corpse is removed, in seconds.
    pub player_corpse_expiry: u64,
    /// Time before bones are removed, in seconds.
    pub bones_expiry: u64,
    /// When set, escort NPCs may respawn while another copy is being escorted.
    pub dynamic_escort_respawn: bool,
    /// Number of intra-map workers used to fan out per-player work.
    pub task_workers: usize,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            visibility_distance: 90.0,
            grid_unload_delay: 300_000,
            grid_unload: true,
            relocation_notify_period: 1000,
            respawn_check_interval: 5000,
            weather_update_interval: 1000,
            creature_corpse_decay: 60_000,
            player_corpse_expiry: 3 * DAY,
            bones_expiry: HOUR,
            dynamic_escort_respawn: false,
            task_workers: 4,
        }
    }
}

impl MapConfig {

    /// Number of cells around an entity covered by its visibility, plus a one cell
    /// margin, used when checking if a grid is still needed.
    pub fn visibility_cells(&self) -> u32 {
        (self.visibility_distance / SIZE_OF_GRID_CELL).ceil() as u32 + 1
    }

}
