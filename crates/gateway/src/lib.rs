//! Gateway: the HTTP surface of trawl.
//!
//! Lifecycle:
//! 1. Start the job service (one worker per resource type, result cache sweeper)
//! 2. Build the router: health, queued jobs, synchronous scrapes
//! 3. Serve until the shutdown token fires, then drain and join the workers
//!
//! Scraping itself lives in `trawl-browser` and `trawl-jobs`.

pub mod routes;
pub mod server;
pub mod state;

pub use {
    server::{AppState, build_gateway_app, start_gateway},
    state::GatewayState,
};
