//! Update Client Error Types

use std::io;
use thiserror::Error;

use crate::engine::signer::SignerError;

/// Failures that end an update pass
#[derive(Error, Debug)]
pub enum UpdateError {
    /// Never install unauthenticated content
    #[error("release signature invalid: {0}")]
    SignatureInvalid(#[source] SignerError),

    #[error("cannot reach update server: {0}")]
    Connection(String),

    #[error("update server answered {status}: {message}")]
    Server { status: u16, message: String },

    #[error("unrecognized update status: {0}")]
    UnrecognizedStatus(String),

    #[error("malformed server response: {0}")]
    MalformedResponse(String),

    #[error("cannot unpack release bundle: {0}")]
    Archive(String),

    #[error("self-verification failed: {0}")]
    SelfCheckFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<reqwest::Error> for UpdateError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::MalformedResponse(e.to_string())
        } else {
            Self::Connection(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, UpdateError>;
