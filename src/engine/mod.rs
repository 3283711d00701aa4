// Fleetward Engine - Core module structure
pub mod api;
pub mod authority;
pub mod cli;
pub mod config;
pub mod logging;
pub mod nosql;
pub mod protocol;
pub mod signer;
pub mod updater;

pub use config::{ClientConfig, ServerConfig};
pub use nosql::NoSqlEngine;
