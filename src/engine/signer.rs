//! Detached Signatures
//!
//! Ed25519 sign/verify over raw byte payloads. The rest of the engine only
//! sees the `Signer` and `SignatureVerifier` traits.

use std::fmt;
use std::fs;
use std::path::Path;

use ed25519_dalek::{Signature, SigningKey, Verifier, VerifyingKey};
use ed25519_dalek::Signer as _;
use thiserror::Error;

/// Length of an Ed25519 detached signature in bytes
pub const SIGNATURE_LEN: usize = 64;

#[derive(Error, Debug)]
pub enum SignerError {
    #[error("key parsing error: {0}")]
    KeyParsing(String),

    #[error("invalid signature format: {0}")]
    InvalidSignature(String),

    #[error("verification failed")]
    VerificationFailed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Produces detached signatures
pub trait Signer {
    fn sign(&self, data: &[u8]) -> Vec<u8>;
}

/// Checks detached signatures
pub trait SignatureVerifier {
    fn verify(&self, data: &[u8], signature: &[u8]) -> Result<(), SignerError>;
}

/// Server-side signing key
pub struct SigningKeyPair {
    inner: SigningKey,
}

impl SigningKeyPair {
    /// Generate a new random key
    pub fn generate() -> Self {
        let mut rng = rand_core::OsRng;
        Self {
            inner: SigningKey::generate(&mut rng),
        }
    }

    /// Parse a hex-encoded 32-byte secret key
    pub fn from_hex(s: &str) -> Result<Self, SignerError> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| SignerError::KeyParsing(format!("invalid hex: {e}")))?;
        let secret: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            SignerError::KeyParsing(format!("expected 32 bytes, got {}", b.len()))
        })?;
        Ok(Self {
            inner: SigningKey::from_bytes(&secret),
        })
    }

    /// Load a secret key file written by `save`
    pub fn load(path: &Path) -> Result<Self, SignerError> {
        Self::from_hex(&fs::read_to_string(path)?)
    }

    /// Write the secret key as hex, readable only by the owner
    pub fn save(&self, path: &Path) -> Result<(), SignerError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.secret_hex())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.inner.as_bytes())
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.inner.verifying_key().as_bytes())
    }

    /// Verifier for signatures made by this key
    pub fn verifier(&self) -> PublicKeyVerifier {
        PublicKeyVerifier {
            key: self.inner.verifying_key(),
        }
    }
}

impl Signer for SigningKeyPair {
    fn sign(&self, data: &[u8]) -> Vec<u8> {
        self.inner.sign(data).to_bytes().to_vec()
    }
}

impl fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigningKeyPair([REDACTED])")
    }
}

/// Client-side verifier holding only the public key
#[derive(Debug, Clone)]
pub struct PublicKeyVerifier {
    key: VerifyingKey,
}

impl PublicKeyVerifier {
    /// Parse a hex-encoded 32-byte public key
    pub fn from_hex(s: &str) -> Result<Self, SignerError> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| SignerError::KeyParsing(format!("invalid hex: {e}")))?;
        let array: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            SignerError::KeyParsing(format!("expected 32 bytes, got {}", b.len()))
        })?;
        let key = VerifyingKey::from_bytes(&array)
            .map_err(|e| SignerError::KeyParsing(e.to_string()))?;
        Ok(Self { key })
    }
}

impl SignatureVerifier for PublicKeyVerifier {
    fn verify(&self, data: &[u8], signature: &[u8]) -> Result<(), SignerError> {
        let sig_array: [u8; SIGNATURE_LEN] = signature.try_into().map_err(|_| {
            SignerError::InvalidSignature(format!(
                "expected {SIGNATURE_LEN} bytes, got {}",
                signature.len()
            ))
        })?;
        let signature = Signature::from_bytes(&sig_array);

        self.key
            .verify(data, &signature)
            .map_err(|_| SignerError::VerificationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sign_and_verify() {
        let key = SigningKeyPair::generate();
        let sig = key.sign(b"payload");
        assert_eq!(sig.len(), SIGNATURE_LEN);
        assert!(key.verifier().verify(b"payload", &sig).is_ok());
    }

    #[test]
    fn test_tampered_payload_fails() {
        let key = SigningKeyPair::generate();
        let sig = key.sign(b"payload");
        assert!(matches!(
            key.verifier().verify(b"payl0ad", &sig),
            Err(SignerError::VerificationFailed)
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let key = SigningKeyPair::generate();
        let other = SigningKeyPair::generate();
        let sig = key.sign(b"payload");
        assert!(other.verifier().verify(b"payload", &sig).is_err());
    }

    #[test]
    fn test_truncated_signature_rejected() {
        let key = SigningKeyPair::generate();
        assert!(matches!(
            key.verifier().verify(b"payload", &[0u8; 10]),
            Err(SignerError::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_key_roundtrip_through_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keys/server.key");
        let key = SigningKeyPair::generate();
        key.save(&path).unwrap();

        let loaded = SigningKeyPair::load(&path).unwrap();
        assert_eq!(loaded.public_key_hex(), key.public_key_hex());

        let verifier = PublicKeyVerifier::from_hex(&key.public_key_hex()).unwrap();
        assert!(verifier.verify(b"x", &loaded.sign(b"x")).is_ok());
    }
}
