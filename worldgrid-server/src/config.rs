//! The configuration for the server, given from environment variables and lazy
//! initialized when needed.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use once_cell::race::OnceBool;
use once_cell::sync::Lazy;

use tracing::warn;

use worldgrid::MapConfig;


/// Parse an environment variable, falling back to the default if absent or invalid.
fn parse_env<T: FromStr + Copy>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(value) => value.trim().parse().unwrap_or_else(|_| {
            warn!("invalid value {value:?} for {name}, using default");
            default
        }),
        Err(_) => default,
    }
}


/// Number of threads updating maps concurrently, zero updates maps on the main thread.
///
/// Set with `WORLDGRID_MAP_THREADS`, defaults to 4.
pub fn map_threads() -> usize {
    static ENV: Lazy<usize> = Lazy::new(|| parse_env("WORLDGRID_MAP_THREADS", 4));
    *ENV
}

/// Target duration of a server tick.
///
/// Set in milliseconds with `WORLDGRID_TICK_MS`, defaults to 50 ms.
pub fn tick_duration() -> Duration {
    static ENV: Lazy<Duration> = Lazy::new(|| Duration::from_millis(parse_env("WORLDGRID_TICK_MS", 50u64).max(1)));
    *ENV
}

/// Return false if idle grids should never be unloaded.
///
/// To disable grid unloading, set `WORLDGRID_GRID_UNLOAD=0`.
pub fn grid_unload() -> bool {
    static ENV: OnceBool = OnceBool::new();
    ENV.get_or_init(|| {
        env::var_os("WORLDGRID_GRID_UNLOAD")
            .map(|s| s.as_encoded_bytes() != b"0")
            .unwrap_or(true)
    })
}

/// Visibility distance, in world units.
///
/// Set with `WORLDGRID_VISIBILITY`, defaults to 90.
pub fn visibility_distance() -> f32 {
    static ENV: Lazy<f32> = Lazy::new(|| parse_env("WORLDGRID_VISIBILITY", 90.0f32));
    *ENV
}

/// Number of workers of each map's intra-map task manager.
///
/// Set with `WORLDGRID_TASK_WORKERS`, defaults to 4.
pub fn task_workers() -> usize {
    static ENV: Lazy<usize> = Lazy::new(|| parse_env("WORLDGRID_TASK_WORKERS", 4));
    *ENV
}

/// The map configuration with every environment override applied.
pub fn map_config() -> MapConfig {
    MapConfig {
        visibility_distance: visibility_distance(),
        grid_unload: grid_unload(),
        task_workers: task_workers(),
        ..MapConfig::default()
    }
}
