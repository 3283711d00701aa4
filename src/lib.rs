//! Fleetward
//!
//! Signed release and patch distribution for a fleet of endpoint agents.
//! The `fleetward-update` binary runs one client pass; `fleetward-server`
//! serves `/update` and carries the operator commands.

pub mod engine;
