//! Post-Update Self Check
//!
//! Confirms the tree is sound after a release or patch was applied, either
//! with an operator-supplied command or by re-verifying every signature.

use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::engine::protocol::{SIGNATURES_DIR, SIGNATURE_SUFFIX};
use crate::engine::signer::SignatureVerifier;
use super::release::recursive_list;

/// Health check result
#[derive(Debug, Clone, PartialEq)]
pub enum HealthResult {
    Healthy,
    Unhealthy { reason: String },
    Timeout,
}

/// A verification step run after the tree changed
pub trait SelfCheck {
    fn check(&self, root_dir: &Path) -> HealthResult;
}

/// Health check configuration
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Maximum time the command may run
    pub timeout: Duration,
    /// Shell command run from the root directory
    pub command: String,
}

/// Runs an external verification command
pub struct CommandCheck {
    config: HealthConfig,
}

impl CommandCheck {
    pub fn new(config: HealthConfig) -> Self {
        Self { config }
    }
}

impl SelfCheck for CommandCheck {
    fn check(&self, root_dir: &Path) -> HealthResult {
        let start = Instant::now();

        #[cfg(unix)]
        let result = Command::new("sh")
            .arg("-c")
            .arg(&self.config.command)
            .current_dir(root_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        #[cfg(windows)]
        let result = Command::new("cmd")
            .arg("/C")
            .arg(&self.config.command)
            .current_dir(root_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        match result {
            Ok(mut child) => loop {
                match child.try_wait() {
                    Ok(Some(status)) if status.success() => return HealthResult::Healthy,
                    Ok(Some(status)) => {
                        return HealthResult::Unhealthy {
                            reason: format!("verify command failed: {:?}", status.code()),
                        };
                    }
                    Ok(None) => {
                        if start.elapsed() > self.config.timeout {
                            let _ = child.kill();
                            return HealthResult::Timeout;
                        }
                        std::thread::sleep(Duration::from_millis(100));
                    }
                    Err(e) => {
                        return HealthResult::Unhealthy {
                            reason: format!("Wait error: {}", e),
                        };
                    }
                }
            },
            Err(e) => HealthResult::Unhealthy {
                reason: format!("Failed to run verify command: {}", e),
            },
        }
    }
}

/// Verifies every `signatures/<path>.sig` against its data file
pub struct SignatureTreeCheck<'a> {
    verifier: &'a dyn SignatureVerifier,
}

impl<'a> SignatureTreeCheck<'a> {
    pub fn new(verifier: &'a dyn SignatureVerifier) -> Self {
        Self { verifier }
    }
}

impl SelfCheck for SignatureTreeCheck<'_> {
    fn check(&self, root_dir: &Path) -> HealthResult {
        let signatures_root = root_dir.join(SIGNATURES_DIR);
        let entries = match recursive_list(&signatures_root) {
            Ok(entries) => entries,
            Err(e) => return HealthResult::Unhealthy { reason: e.to_string() },
        };

        let mut failures = Vec::new();
        let mut checked = 0usize;
        for rel in entries {
            let Some(data_rel) = rel.to_str().and_then(|s| s.strip_suffix(SIGNATURE_SUFFIX)) else {
                continue;
            };
            checked += 1;
            let verdict = fs::read(signatures_root.join(&rel))
                .and_then(|sig| fs::read(root_dir.join(data_rel)).map(|data| (data, sig)))
                .map_err(|e| e.to_string())
                .and_then(|(data, sig)| self.verifier.verify(&data, &sig).map_err(|e| e.to_string()));
            if let Err(reason) = verdict {
                tracing::error!(path = data_rel, %reason, "Signature check failed");
                failures.push(data_rel.to_string());
            }
        }

        if failures.is_empty() {
            tracing::debug!(checked, "All signatures verified");
            HealthResult::Healthy
        } else {
            HealthResult::Unhealthy {
                reason: format!("{} file(s) failed verification: {}", failures.len(), failures.join(", ")),
            }
        }
    }
}
