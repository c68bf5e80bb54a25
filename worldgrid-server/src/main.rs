//! A world server simulating map instances concurrently.

pub mod config;

// This module link the library's maps and updater to make a running server.
pub mod server;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use worldgrid::memory::MemoryContext;
use worldgrid::MapKey;


pub fn main() {

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();

    let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    }) {
        error!("failed to install the interrupt handler: {e}");
    }

    let ctx = MemoryContext::new();
    server::seed_demo_world(&ctx, 0);

    let mut server = server::Server::new();
    let map = server.register_map(MapKey::new(0, 0), ctx.context(), 0);
    server::add_demo_player(&map);

    while stop_rx.try_recv().is_err() {
        server.tick_padded();
    }

    info!("stopping server...");
    server.stop();
    info!("server stopped");

}
