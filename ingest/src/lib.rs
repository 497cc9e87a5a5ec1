pub mod api;
pub mod bot;
pub mod config;
pub mod endpoints;
pub mod payload;
pub mod prometheus;
pub mod router;
pub mod server;
