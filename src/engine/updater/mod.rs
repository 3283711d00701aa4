//! Fleetward Update Client
//!
//! A single-pass, signature-verified update system.
//!
//! Components:
//! - `client` - Update pass state machine and exit codes
//! - `release` - Signed release bundle installation
//! - `patch` - Per-file patch application
//! - `transport` - HTTP calls to the update server
//! - `health` - Post-update self check

pub mod client;
pub mod error;
pub mod health;
pub mod patch;
pub mod release;
pub mod transport;

pub use client::{ClientLayout, UpdateClient, UpdateOutcome, UpdatePhase};
pub use error::UpdateError;
pub use health::{CommandCheck, HealthConfig, HealthResult, SelfCheck, SignatureTreeCheck};
pub use patch::{FileOutcome, PatchApplier, PatchReport};
pub use release::{InstallReport, ReleaseInstaller};
pub use transport::{HttpTransport, UpdateServer};
