//! Document Store Error Types

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NoSqlError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store not found: {0}")]
    StoreNotFound(String),

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Collection already exists: {0}")]
    CollectionAlreadyExists(String),

    #[error("Invalid collection name: {0}")]
    InvalidCollectionName(String),

    #[error("Format version {found} not supported (min: {min}, max: {max})")]
    UnsupportedFormatVersion {
        found: u32,
        min: u32,
        max: u32,
    },

    #[error("Document {id} has record version {found}, newest supported is {max}")]
    UnsupportedRecordVersion {
        id: String,
        found: u32,
        max: u32,
    },

    #[error("Document {id} does not match its record shape: {reason}")]
    InvalidRecord {
        id: String,
        reason: String,
    },

    #[error("Invalid document ID: {0}")]
    InvalidDocumentId(String),

    #[error("Document ID already exists: {0}")]
    DuplicateId(String),
}

pub type Result<T> = std::result::Result<T, NoSqlError>;
