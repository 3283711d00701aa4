//! Patch Applier
//!
//! Applies server-issued patch batches under the client's root directory.
//! A refused file is logged and skipped; the rest of its batch still runs
//! and the batch is always acknowledged afterwards.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::error::Result;
use super::transport::UpdateServer;
use crate::engine::protocol::{check_patch_path, AcknowledgeRequest, PatchBatch, PatchFile, PatchFileError};

/// What happened to one file of a batch
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    Written { path: PathBuf, mode: u32 },
    Removed(PathBuf),
    /// Delete directive for a file that was already gone
    AlreadyAbsent(PathBuf),
    Rejected(PatchFileError),
}

/// Per-batch result
#[derive(Debug, Clone, PartialEq)]
pub struct PatchReport {
    pub id: String,
    pub outcomes: Vec<FileOutcome>,
}

impl PatchReport {
    pub fn rejected(&self) -> impl Iterator<Item = &PatchFileError> {
        self.outcomes.iter().filter_map(|o| match o {
            FileOutcome::Rejected(e) => Some(e),
            _ => None,
        })
    }
}

pub struct PatchApplier<'a> {
    root_dir: &'a Path,
}

impl<'a> PatchApplier<'a> {
    pub fn new(root_dir: &'a Path) -> Self {
        Self { root_dir }
    }

    /// Apply every batch in order, acknowledging each one as it completes
    pub fn apply_and_acknowledge(
        &self,
        batches: &[PatchBatch],
        server: &dyn UpdateServer,
        hostname: &str,
    ) -> Result<Vec<PatchReport>> {
        let mut reports = Vec::with_capacity(batches.len());
        for batch in batches {
            let report = self.apply_batch(batch)?;
            server.acknowledge_patch(&AcknowledgeRequest {
                id: batch.id.clone(),
                hostname: hostname.to_string(),
            })?;
            tracing::info!(patch_id = %batch.id, "Acknowledged patch");
            reports.push(report);
        }
        Ok(reports)
    }

    /// Apply one batch without acknowledging it
    pub fn apply_batch(&self, batch: &PatchBatch) -> Result<PatchReport> {
        let mut outcomes = Vec::with_capacity(batch.files.len());
        for file in &batch.files {
            let outcome = match self.apply_file(&batch.id, file)? {
                Ok(outcome) => outcome,
                Err(rejection) => {
                    tracing::error!(patch_id = %batch.id, reason = %rejection, "Ignoring patch file");
                    FileOutcome::Rejected(rejection)
                }
            };
            outcomes.push(outcome);
        }
        Ok(PatchReport {
            id: batch.id.clone(),
            outcomes,
        })
    }

    /// Outer error: filesystem failure. Inner error: the file was refused.
    fn apply_file(&self, patch_id: &str, file: &PatchFile) -> Result<std::result::Result<FileOutcome, PatchFileError>> {
        if let Err(rejection) = check_patch_path(&file.path) {
            return Ok(Err(rejection));
        }
        let rel = PathBuf::from(&file.path);
        let target = self.root_dir.join(&rel);

        if file.is_delete() {
            if !file.content.is_empty() {
                return Ok(Err(PatchFileError::MalformedDeleteWithContent(file.path.clone())));
            }
            return match fs::remove_file(&target) {
                Ok(()) => {
                    tracing::info!(path = %file.path, patch_id, "Removed file due to patch");
                    Ok(Ok(FileOutcome::Removed(rel)))
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    tracing::warn!(path = %file.path, patch_id, "Patch says to remove file but it's already gone");
                    Ok(Ok(FileOutcome::AlreadyAbsent(rel)))
                }
                Err(e) => Err(e.into()),
            };
        }

        tracing::info!(path = %file.path, patch_id, mode = %format!("{:o}", file.mode), "Patching file");
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, &file.content)?;
        set_mode(&target, file.mode)?;

        Ok(Ok(FileOutcome::Written { path: rel, mode: file.mode }))
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(path: &str, mode: u32, content: &[u8]) -> PatchFile {
        PatchFile { path: path.to_string(), mode, content: content.to_vec() }
    }

    fn batch(files: Vec<PatchFile>) -> PatchBatch {
        PatchBatch { id: "p1".to_string(), files }
    }

    #[test]
    fn test_write_creates_parents_and_sets_mode() {
        let root = tempdir().unwrap();
        let applier = PatchApplier::new(root.path());

        let report = applier.apply_batch(&batch(vec![write("etc/conf/x.cfg", 0o640, b"k=v")])).unwrap();

        assert_eq!(fs::read(root.path().join("etc/conf/x.cfg")).unwrap(), b"k=v");
        assert!(matches!(report.outcomes[0], FileOutcome::Written { mode: 0o640, .. }));
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(root.path().join("etc/conf/x.cfg")).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o640);
        }
    }

    #[test]
    fn test_delete_with_content_is_rejected() {
        let root = tempdir().unwrap();
        fs::write(root.path().join("keep"), b"x").unwrap();
        let applier = PatchApplier::new(root.path());

        let report = applier.apply_batch(&batch(vec![write("keep", 0, b"oops")])).unwrap();

        assert!(root.path().join("keep").exists());
        assert_eq!(
            report.rejected().cloned().collect::<Vec<_>>(),
            vec![PatchFileError::MalformedDeleteWithContent("keep".to_string())]
        );
    }

    #[test]
    fn test_rejection_does_not_stop_the_batch() {
        let root = tempdir().unwrap();
        let applier = PatchApplier::new(root.path());

        let report = applier
            .apply_batch(&batch(vec![
                write("/abs", 0o644, b"x"),
                write("ok", 0o644, b"fine"),
                write("../up", 0o644, b"x"),
            ]))
            .unwrap();

        assert_eq!(report.rejected().count(), 2);
        assert_eq!(fs::read(root.path().join("ok")).unwrap(), b"fine");
    }
}
