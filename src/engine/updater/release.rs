//! Release Installer
//!
//! Verifies a signed release bundle and reconciles the live tree with it.
//! Every file is moved into place one at a time, so an interrupted run can
//! leave a partially applied release; the next run from the same bundle
//! skips identical files and finishes the job.

use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use tempfile::{NamedTempFile, TempDir};
use walkdir::WalkDir;

use super::error::{Result, UpdateError};
use crate::engine::protocol::{SIGNATURES_DIR, SIGNATURE_SUFFIX};
use crate::engine::signer::SignatureVerifier;

const BUNDLE_NAME: &str = "release.tar";
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// What an installation changed
#[derive(Debug, Default, Clone, PartialEq)]
pub struct InstallReport {
    pub added: Vec<PathBuf>,
    pub replaced: Vec<PathBuf>,
    pub unchanged: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
    pub already_absent: Vec<PathBuf>,
}

/// Installs full release trees under a fixed root
pub struct ReleaseInstaller<'a> {
    /// Live tree
    root_dir: PathBuf,
    /// Parent of the per-run scratch directory
    scratch_parent: PathBuf,
    verifier: &'a dyn SignatureVerifier,
}

impl<'a> ReleaseInstaller<'a> {
    pub fn new(root_dir: PathBuf, scratch_parent: PathBuf, verifier: &'a dyn SignatureVerifier) -> Self {
        Self {
            root_dir,
            scratch_parent,
            verifier,
        }
    }

    /// Verify, unpack and install a bundle
    ///
    /// The scratch directory is a `TempDir`, so it is removed on every
    /// return path including errors.
    pub fn install(&self, bundle: &[u8], signature: &[u8]) -> Result<InstallReport> {
        fs::create_dir_all(&self.scratch_parent)?;
        let scratch = tempfile::Builder::new()
            .prefix(".release-")
            .tempdir_in(&self.scratch_parent)?;

        let report = self.install_in(&scratch, bundle, signature)?;

        let scratch_path = scratch.path().to_path_buf();
        if let Err(e) = scratch.close() {
            tracing::warn!(path = %scratch_path.display(), error = %e, "Failed to remove scratch directory");
        }
        Ok(report)
    }

    fn install_in(&self, scratch: &TempDir, bundle: &[u8], signature: &[u8]) -> Result<InstallReport> {
        let bundle_path = scratch.path().join(BUNDLE_NAME);
        let signature_path = scratch.path().join(format!("{}{}", BUNDLE_NAME, SIGNATURE_SUFFIX));
        fs::write(&bundle_path, bundle)?;
        fs::write(&signature_path, signature)?;

        // Verify exactly the bytes that will be unpacked
        let staged = fs::read(&bundle_path)?;
        let staged_sig = fs::read(&signature_path)?;
        self.verifier
            .verify(&staged, &staged_sig)
            .map_err(UpdateError::SignatureInvalid)?;
        tracing::info!(
            sha256 = %hex::encode(Sha256::digest(&staged)),
            bytes = staged.len(),
            "Release bundle signature verified"
        );

        let tree = scratch.path().join("tree");
        fs::create_dir(&tree)?;
        unpack(&staged, &tree)?;
        fs::remove_file(&bundle_path)?;
        fs::remove_file(&signature_path)?;

        let old_signatures = signature_set(&self.root_dir)?;
        let new_signatures = signature_set(&tree)?;
        let obsolete = obsolete_paths(&old_signatures, &new_signatures);

        let mut report = InstallReport::default();

        for rel in recursive_list(&tree)? {
            let src = tree.join(&rel);
            let target = self.root_dir.join(&rel);

            if target.is_file() {
                if files_identical(&src, &target)? {
                    tracing::debug!(path = %rel.display(), "Identical (not replaced)");
                    report.unchanged.push(rel);
                    continue;
                }
                tracing::info!(path = %rel.display(), "Replacing file");
                report.replaced.push(rel.clone());
            } else {
                tracing::info!(path = %rel.display(), "New file");
                report.added.push(rel.clone());
            }

            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            replace_file(&src, &target)?;
        }

        for rel in obsolete {
            let target = self.root_dir.join(&rel);
            tracing::info!(path = %rel.display(), "Deleting obsolete file");
            match fs::remove_file(&target) {
                Ok(()) => report.removed.push(rel),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    tracing::warn!(path = %rel.display(), "Failed to delete obsolete file (already gone)");
                    report.already_absent.push(rel);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(report)
    }
}

fn unpack(bundle: &[u8], dest: &Path) -> Result<()> {
    let result = if bundle.starts_with(&GZIP_MAGIC) {
        tar::Archive::new(GzDecoder::new(bundle)).unpack(dest)
    } else {
        tar::Archive::new(bundle).unpack(dest)
    };
    result.map_err(|e| UpdateError::Archive(e.to_string()))
}

/// Every non-directory entry under `top`, relative to `top`
pub(crate) fn recursive_list(top: &Path) -> Result<Vec<PathBuf>> {
    if !top.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(top).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| UpdateError::Io(e.into()))?;
        if entry.file_type().is_dir() {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(top) {
            files.push(rel.to_path_buf());
        }
    }
    Ok(files)
}

/// Signature files of a tree, relative to its `signatures/` directory
fn signature_set(top: &Path) -> Result<BTreeSet<PathBuf>> {
    Ok(recursive_list(&top.join(SIGNATURES_DIR))?.into_iter().collect())
}

/// Live paths made obsolete by signatures the new release no longer carries
///
/// Each dropped signature yields the signature itself and, when it has the
/// `.sig` suffix, the data file it protected.
fn obsolete_paths(old: &BTreeSet<PathBuf>, new: &BTreeSet<PathBuf>) -> Vec<PathBuf> {
    let dropped: Vec<&PathBuf> = old.difference(new).collect();
    let mut paths: Vec<PathBuf> = dropped.iter().map(|p| Path::new(SIGNATURES_DIR).join(p)).collect();
    paths.extend(dropped.iter().filter_map(|p| {
        p.to_str()
            .and_then(|s| s.strip_suffix(SIGNATURE_SUFFIX))
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
    }));
    paths
}

/// Byte-for-byte comparison
fn files_identical(a: &Path, b: &Path) -> Result<bool> {
    if fs::metadata(a)?.len() != fs::metadata(b)?.len() {
        return Ok(false);
    }

    let mut fa = io::BufReader::new(fs::File::open(a)?);
    let mut fb = io::BufReader::new(fs::File::open(b)?);
    let mut buf_a = [0u8; 8192];
    let mut buf_b = [0u8; 8192];
    loop {
        let n = fa.read(&mut buf_a)?;
        if n == 0 {
            return Ok(true);
        }
        fb.read_exact(&mut buf_b[..n])?;
        if buf_a[..n] != buf_b[..n] {
            return Ok(false);
        }
    }
}

/// Atomically move `src` over `dst`
///
/// Falls back to copy-then-rename in the destination directory when `src`
/// lives on another filesystem.
fn replace_file(src: &Path, dst: &Path) -> Result<()> {
    if fs::rename(src, dst).is_ok() {
        return Ok(());
    }

    let dir = dst.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    io::copy(&mut fs::File::open(src)?, tmp.as_file_mut())?;
    fs::set_permissions(tmp.path(), fs::metadata(src)?.permissions())?;
    tmp.persist(dst).map_err(|e| UpdateError::Io(e.error))?;
    fs::remove_file(src)?;
    Ok(())
}
