//! The server owning global time, it drives every registered map instance through the
//! cross-map updater at a fixed tick rate.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use worldgrid::context::MapContext;
use worldgrid::memory::MemoryContext;
use worldgrid::spawn::{SpawnData, SpawnKind};
use worldgrid::util::FadingAverage;
use worldgrid::{Entity, Map, MapKey, MapUpdater, Position};

use crate::config;


/// Number of ticks between two logs of the average tick duration.
const TICK_STATS_INTERVAL: u64 = 1200;


/// A map registered in the server.
struct MapState {
    key: MapKey,
    map: Arc<Mutex<Map>>,
}

/// This structure manages the map instances of a server and advances them at a fixed
/// rate, each tick schedules one update per map and waits for all of them.
pub struct Server {
    /// Registered maps.
    maps: Vec<MapState>,
    /// The cross-map update driver.
    updater: MapUpdater,
    /// Target duration of a tick.
    tick_duration: Duration,
    /// Instant of the last tick, used to compute the time delta of the next one.
    last_tick: Instant,
    /// Average duration of a tick, in milliseconds.
    tick_average: FadingAverage,
    ticks: u64,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {

    /// Create a server with its map updater started, according to the configuration.
    pub fn new() -> Self {

        let mut updater = MapUpdater::new();
        let threads = config::map_threads();
        if threads > 0 {
            updater.activate(threads);
        }

        info!("server started with {threads} map update threads");

        Self {
            maps: Vec::new(),
            updater,
            tick_duration: config::tick_duration(),
            last_tick: Instant::now(),
            tick_average: FadingAverage::default(),
            ticks: 0,
        }

    }

    /// Register a new map instance in this server, the start time is the game time in
    /// seconds. The map is returned for the caller to populate it.
    pub fn register_map(&mut self, key: MapKey, ctx: MapContext, start_time: u64) -> Arc<Mutex<Map>> {
        let map = Arc::new(Mutex::new(Map::new(key, config::map_config(), ctx, start_time)));
        info!("registered map {} instance {}", key.map_id, key.instance_id);
        self.maps.push(MapState { key, map: Arc::clone(&map) });
        map
    }

    #[inline]
    pub fn map_count(&self) -> usize {
        self.maps.len()
    }

    /// Run a single tick on the server and then wait for this tick to approximately
    /// last for the tick duration, there is no sleep if the tick was too long, in such
    /// case a warning is logged.
    pub fn tick_padded(&mut self) {

        let start = Instant::now();
        self.tick();
        let elapsed = start.elapsed();

        self.tick_average.push(elapsed.as_secs_f32() * 1000.0, 0.02);
        self.ticks += 1;
        if self.ticks % TICK_STATS_INTERVAL == 0 {
            debug!("average tick duration {:.2} ms over {} maps", self.tick_average.get(), self.maps.len());
        }

        if let Some(missing) = self.tick_duration.checked_sub(elapsed) {
            std::thread::sleep(missing);
        } else {
            warn!("tick too long {:?}, expected {:?}", elapsed, self.tick_duration);
        }

    }

    /// Run a single tick, every map is updated with the time elapsed since the last one.
    #[instrument(skip_all)]
    pub fn tick(&mut self) {

        let now = Instant::now();
        let diff_ms = now.duration_since(self.last_tick).as_millis().min(u32::MAX as u128) as u32;
        self.last_tick = now;

        for state in &self.maps {
            self.updater.schedule_update(state.map.clone(), diff_ms);
        }

        self.updater.wait();

    }

    /// Stop the map updater, then tear every map down.
    pub fn stop(&mut self) {

        self.updater.deactivate();

        for state in self.maps.drain(..) {
            let mut map = state.map.lock().unwrap_or_else(|e| e.into_inner());
            map.unload_all();
            info!("map {} instance {} stopped", state.key.map_id, state.key.instance_id);
        }

    }

}


/// Populate the in-memory collaborators with a small world, a few creatures and game
/// objects around the map origin.
pub fn seed_demo_world(ctx: &MemoryContext, map_id: u32) {

    let mut spawn_id = 0;
    for i in 0..8u32 {
        for j in 0..8u32 {
            spawn_id += 1;
            let x = i as f32 * 140.0 - 500.0;
            let y = j as f32 * 140.0 - 500.0;
            let kind = if (i + j) % 4 == 0 { SpawnKind::GameObject } else { SpawnKind::Creature };
            let mut data = SpawnData::new(kind, spawn_id, 1000 + i, map_id, Position::new(x, y, 0.0, 0.0));
            data.respawn_delay = 30;
            ctx.store.add_spawn(data);
        }
    }

}

/// Bring a demo player in the map, standing at the origin.
pub fn add_demo_player(map: &Mutex<Map>) {
    let mut map = map.lock().unwrap_or_else(|e| e.into_inner());
    if let Err(e) = map.add_player(Entity::player(1, 1, Position::new(0.0, 0.0, 0.0, 0.0))) {
        warn!("failed to add demo player: {e}");
    }
}
