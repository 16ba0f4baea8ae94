pub mod api;
pub mod config;
pub mod http_client;
pub mod identity;
pub mod logging;
pub mod marks;
pub mod prediction;
pub mod provider;
pub mod refresh_gate;
pub mod state;
