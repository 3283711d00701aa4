//! Update Client
//!
//! One blocking pass: ask the server what to do, install the release if we
//! are behind, apply pending patches, then verify the result.

use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::error::{Result, UpdateError};
use super::health::{HealthResult, SelfCheck};
use super::patch::{PatchApplier, PatchReport};
use super::release::{InstallReport, ReleaseInstaller};
use super::transport::UpdateServer;
use crate::engine::protocol::{UpdateRequest, UpdateResponse, STATUS_CURRENT, STATUS_OUT_OF_DATE};
use crate::engine::signer::SignatureVerifier;

/// Exit status when nothing changed
pub const EXIT_NO_UPDATE: i32 = 0;
/// Exit status when a release and/or patches were applied and verified
pub const EXIT_UPDATED: i32 = 42;
/// Exit status for any failure
pub const EXIT_ERROR: i32 = 1;

/// Phases of a single pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePhase {
    Idle,
    Requested,
    Current,
    Installing,
    Patching,
    Verifying,
    Done,
}

/// Result of a successful pass
#[derive(Debug, Default)]
pub struct UpdateOutcome {
    /// Release installed during this pass
    pub installed_release: Option<u64>,
    pub install_report: Option<InstallReport>,
    pub patch_reports: Vec<PatchReport>,
    changed: bool,
}

impl UpdateOutcome {
    pub fn changed(&self) -> bool {
        self.changed
    }

    pub fn exit_code(&self) -> i32 {
        if self.changed {
            EXIT_UPDATED
        } else {
            EXIT_NO_UPDATE
        }
    }
}

/// Paths and identity for a pass
#[derive(Debug, Clone)]
pub struct ClientLayout {
    pub root_dir: PathBuf,
    pub release_file: PathBuf,
    pub scratch_dir: PathBuf,
    pub hostname: String,
}

pub struct UpdateClient<'a> {
    layout: ClientLayout,
    server: &'a dyn UpdateServer,
    verifier: &'a dyn SignatureVerifier,
    self_check: &'a dyn SelfCheck,
    phase: UpdatePhase,
}

impl<'a> UpdateClient<'a> {
    pub fn new(
        layout: ClientLayout,
        server: &'a dyn UpdateServer,
        verifier: &'a dyn SignatureVerifier,
        self_check: &'a dyn SelfCheck,
    ) -> Self {
        Self {
            layout,
            server,
            verifier,
            self_check,
            phase: UpdatePhase::Idle,
        }
    }

    pub fn phase(&self) -> UpdatePhase {
        self.phase
    }

    fn enter(&mut self, phase: UpdatePhase) {
        tracing::debug!(from = ?self.phase, to = ?phase, "Update phase");
        self.phase = phase;
    }

    pub fn run_once(&mut self) -> Result<UpdateOutcome> {
        let old_release = read_release_marker(&self.layout.release_file);
        let request = UpdateRequest {
            old_release,
            hostname: self.layout.hostname.clone(),
        };
        tracing::debug!(old_release, hostname = %request.hostname, "Requesting update");

        let response = self.server.request_update(&request)?;
        self.enter(UpdatePhase::Requested);

        let mut outcome = UpdateOutcome::default();

        match response.status.as_str() {
            STATUS_CURRENT => {
                tracing::debug!(old_release, "Release is current");
                self.enter(UpdatePhase::Current);
            }
            STATUS_OUT_OF_DATE => {
                self.enter(UpdatePhase::Installing);
                outcome.install_report = Some(self.install_release(&response)?);
                outcome.installed_release = response.current_release;
                outcome.changed = true;
            }
            other => return Err(UpdateError::UnrecognizedStatus(other.to_string())),
        }

        if let Some(patches) = response.patches.as_deref().filter(|p| !p.is_empty()) {
            self.enter(UpdatePhase::Patching);
            let applier = PatchApplier::new(&self.layout.root_dir);
            outcome.patch_reports = applier.apply_and_acknowledge(patches, self.server, &self.layout.hostname)?;
            outcome.changed = true;
        }

        if outcome.changed {
            self.enter(UpdatePhase::Verifying);
            match self.self_check.check(&self.layout.root_dir) {
                HealthResult::Healthy => tracing::info!("Successful update"),
                HealthResult::Unhealthy { reason } => return Err(UpdateError::SelfCheckFailed(reason)),
                HealthResult::Timeout => return Err(UpdateError::SelfCheckFailed("timed out".to_string())),
            }
        }

        self.enter(UpdatePhase::Done);
        Ok(outcome)
    }

    fn install_release(&self, response: &UpdateResponse) -> Result<InstallReport> {
        tracing::info!(release = ?response.current_release, "Updating release");

        let bundle = decode_field(response.update.as_deref(), "update")?;
        let signature = decode_field(response.update_signature.as_deref(), "update_signature")?;

        ReleaseInstaller::new(
            self.layout.root_dir.clone(),
            self.layout.scratch_dir.clone(),
            self.verifier,
        )
        .install(&bundle, &signature)
    }
}

fn decode_field(value: Option<&str>, name: &str) -> Result<Vec<u8>> {
    let encoded = value.ok_or_else(|| UpdateError::MalformedResponse(format!("out-of-date response has no {name}")))?;
    STANDARD
        .decode(encoded)
        .map_err(|e| UpdateError::MalformedResponse(format!("{name} is not base64: {e}")))
}

/// Locally installed release; 0 when absent or unparseable
pub fn read_release_marker(path: &Path) -> u64 {
    fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_release_marker_defaults_to_zero() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("release.txt");
        assert_eq!(read_release_marker(&path), 0);

        fs::write(&path, "garbage").unwrap();
        assert_eq!(read_release_marker(&path), 0);

        fs::write(&path, "17\n").unwrap();
        assert_eq!(read_release_marker(&path), 17);
    }

    #[test]
    fn test_exit_codes() {
        let mut outcome = UpdateOutcome::default();
        assert_eq!(outcome.exit_code(), EXIT_NO_UPDATE);
        outcome.changed = true;
        assert_eq!(outcome.exit_code(), EXIT_UPDATED);
    }

    #[test]
    fn test_missing_bundle_is_malformed() {
        assert!(matches!(decode_field(None, "update"), Err(UpdateError::MalformedResponse(_))));
        assert!(matches!(decode_field(Some("!!"), "update"), Err(UpdateError::MalformedResponse(_))));
    }
}
