//! Authority error types

use thiserror::Error;

use crate::engine::nosql::NoSqlError;
use crate::engine::protocol::PatchFileError;
use crate::engine::signer::SignerError;

#[derive(Error, Debug)]
pub enum AuthorityError {
    #[error("Unknown host(s): {}", hosts.join(", "))]
    UnknownHost { hosts: Vec<String> },

    #[error("Patch {patch_id} already touches {path} for pending host(s): {}", hosts.join(", "))]
    PatchConflict {
        path: String,
        patch_id: String,
        hosts: Vec<String>,
    },

    #[error("At least one hostname is required")]
    MissingHostname,

    #[error("Invalid patch path: {0}")]
    InvalidPatchPath(#[from] PatchFileError),

    #[error("Patch not found: {0}")]
    PatchNotFound(String),

    #[error("A signing key is required for signed patches and releases")]
    SignerUnavailable,

    #[error("Invalid audit record: {0}")]
    InvalidAuditRecord(String),

    #[error("Release {requested} is not newer than current release {current}")]
    ReleaseNotNewer { requested: u64, current: u64 },

    #[error("Release error: {0}")]
    Release(String),

    #[error("Storage error: {0}")]
    Store(#[from] NoSqlError),

    #[error("Signing error: {0}")]
    Signer(#[from] SignerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuthorityError {
    /// Stable machine-readable kind, used in API error bodies
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownHost { .. } => "UNKNOWN_HOST",
            Self::PatchConflict { .. } => "PATCH_CONFLICT",
            Self::MissingHostname => "MISSING_HOSTNAME",
            Self::InvalidPatchPath(_) => "INVALID_PATCH_PATH",
            Self::PatchNotFound(_) => "PATCH_NOT_FOUND",
            Self::SignerUnavailable => "SIGNER_UNAVAILABLE",
            Self::InvalidAuditRecord(_) => "INVALID_AUDIT_RECORD",
            Self::ReleaseNotNewer { .. } => "RELEASE_NOT_NEWER",
            Self::Release(_) => "RELEASE_ERROR",
            Self::Store(_) => "STORAGE_ERROR",
            Self::Signer(_) => "SIGNING_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, AuthorityError>;
