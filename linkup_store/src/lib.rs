//! SQLite-backed store and terminal client for the LinkUp feed engine.

pub mod backend;
pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod database;
pub mod realtime;
pub mod seed;
pub mod telemetry;
pub mod utils;

pub use backend::LocalBackend;
pub use realtime::ChangeHub;
