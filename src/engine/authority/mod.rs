//! Update authority
//!
//! Server-side state for the fleet: patches, issues, host suspension,
//! releases and the audit trail. Every component borrows the shared
//! `NoSqlEngine`; none of them caches records between calls.

pub mod admin;
pub mod audit;
pub mod error;
pub mod hosts;
pub mod issues;
pub mod models;
pub mod patches;
pub mod releases;
pub mod updates;

pub use admin::AdminSession;
pub use audit::AuditTrail;
pub use error::AuthorityError;
pub use hosts::{HostRegistry, HostSuspension};
pub use issues::{IssueGroups, IssueKey, IssueTracker};
pub use models::{AuditRecord, ClientRecord, Issue, PatchRecord};
pub use patches::{NewPatch, PatchAuthority};
pub use releases::{ReleaseBuilder, ReleaseBundle, ReleaseStore};
pub use updates::UpdateResponder;
