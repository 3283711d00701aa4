//! Wire Protocol
//!
//! JSON bodies exchanged between `fleetward-update` and the server, plus the
//! path rules both sides enforce on patch targets.

use std::path::{Component, Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Directory holding one detached signature per protected file
pub const SIGNATURES_DIR: &str = "signatures";

/// Suffix of a detached signature file
pub const SIGNATURE_SUFFIX: &str = ".sig";

/// Mode value that turns a patch file into a delete directive
pub const DELETE_MODE: u32 = 0;

pub const STATUS_CURRENT: &str = "current";
pub const STATUS_OUT_OF_DATE: &str = "out-of-date";

/// Path of the signature that protects `path`
pub fn signature_path_for(path: &str) -> String {
    format!("{}/{}{}", SIGNATURES_DIR, path, SIGNATURE_SUFFIX)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateRequest {
    pub old_release: u64,
    pub hostname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct UpdateResponse {
    /// `current` or `out-of-date`; anything else is protocol drift
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_release: Option<u64>,

    /// Base64 release bundle (tar, optionally gzip-compressed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<String>,

    /// Base64 detached signature over the decoded bundle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_signature: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patches: Option<Vec<PatchBatch>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AcknowledgeRequest {
    pub id: String,
    pub hostname: String,
}

/// One patch as delivered to a host
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatchBatch {
    pub id: String,
    pub files: Vec<PatchFile>,
}

/// A single write or delete directive
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatchFile {
    pub path: String,
    pub mode: u32,
    #[serde(default, with = "base64_content")]
    pub content: Vec<u8>,
}

impl PatchFile {
    pub fn is_delete(&self) -> bool {
        self.mode == DELETE_MODE
    }
}

/// Why a patch file was refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatchFileError {
    #[error("refusing absolute patch path {0}")]
    UnsafeAbsolutePath(String),

    #[error("refusing patch path {0} with \"..\" in it")]
    PathTraversal(String),

    #[error("patch path is empty")]
    EmptyPath,

    #[error("patch for {0} has mode 0 but carries content")]
    MalformedDeleteWithContent(String),
}

/// Accept only non-empty relative paths without parent-directory segments
pub fn check_patch_path(path: &str) -> Result<(), PatchFileError> {
    if path.is_empty() {
        return Err(PatchFileError::EmptyPath);
    }

    let as_path = Path::new(path);
    if path.starts_with('/') || path.starts_with('\\') || as_path.has_root() || as_path.is_absolute() {
        return Err(PatchFileError::UnsafeAbsolutePath(path.to_string()));
    }

    let traverses = path.split(['/', '\\']).any(|segment| segment == "..")
        || as_path.components().any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)));
    if traverses {
        return Err(PatchFileError::PathTraversal(path.to_string()));
    }

    Ok(())
}

mod base64_content {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.as_bytes()).map_err(serde::de::Error::custom)
    }
}
