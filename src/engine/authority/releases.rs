//! Release building and serving
//!
//! A release is built from a directory tree: every file is signed into a
//! parallel `signatures/` tree, the release marker is added, the result is
//! packed as a gzip tar and the bundle itself is signed. The store keeps
//! only the current bundle.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use super::error::{AuthorityError, Result};
use crate::engine::protocol::{signature_path_for, SIGNATURES_DIR};
use crate::engine::signer::Signer;

pub const BUNDLE_FILE: &str = "release.tar.gz";
pub const BUNDLE_SIGNATURE_FILE: &str = "release.tar.gz.sig";
const VERSION_FILE: &str = "current";
const SIGNATURE_MODE: u32 = 0o644;

/// A signed bundle ready to serve
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseBundle {
    pub version: u64,
    pub bundle: Vec<u8>,
    pub signature: Vec<u8>,
}

impl ReleaseBundle {
    pub fn sha256_hex(&self) -> String {
        hex::encode(Sha256::digest(&self.bundle))
    }
}

pub struct ReleaseBuilder<'a> {
    signer: &'a dyn Signer,
    release_file: String,
}

impl<'a> ReleaseBuilder<'a> {
    pub fn new(signer: &'a dyn Signer, release_file: &str) -> Self {
        Self {
            signer,
            release_file: release_file.to_string(),
        }
    }

    /// Pack and sign the tree under `source` as release `version`.
    ///
    /// Any `signatures/` directory or release marker already in `source` is
    /// ignored and regenerated.
    pub fn build(&self, source: &Path, version: u64) -> Result<ReleaseBundle> {
        if !source.is_dir() {
            return Err(AuthorityError::Release(format!("{} is not a directory", source.display())));
        }

        let mut tar = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        let mut count = 0usize;

        for (rel, path) in self.source_files(source)? {
            let data = fs::read(&path)?;
            append(&mut tar, &rel, file_mode(&path)?, &data)?;
            append(&mut tar, &signature_path_for(&rel), SIGNATURE_MODE, &self.signer.sign(&data))?;
            count += 1;
        }

        let marker = format!("{version}\n");
        append(&mut tar, &self.release_file, SIGNATURE_MODE, marker.as_bytes())?;
        append(
            &mut tar,
            &signature_path_for(&self.release_file),
            SIGNATURE_MODE,
            &self.signer.sign(marker.as_bytes()),
        )?;

        let bundle = tar.into_inner()?.finish()?;
        let signature = self.signer.sign(&bundle);
        let release = ReleaseBundle {
            version,
            bundle,
            signature,
        };
        tracing::info!(version, files = count, sha256 = %release.sha256_hex(), "Built release");
        Ok(release)
    }

    /// Regular files to ship, keyed by their `/`-separated relative path
    fn source_files(&self, source: &Path) -> Result<Vec<(String, PathBuf)>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(source).follow_links(false).sort_by_file_name() {
            let entry = entry.map_err(|e| AuthorityError::Io(e.into()))?;
            let Ok(rel) = entry.path().strip_prefix(source) else {
                continue;
            };
            if rel.starts_with(SIGNATURES_DIR) || rel == Path::new(&self.release_file) {
                continue;
            }
            if !entry.file_type().is_file() {
                if !entry.file_type().is_dir() {
                    tracing::warn!(path = %rel.display(), "Skipping non-regular file");
                }
                continue;
            }
            let rel = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            files.push((rel, entry.into_path()));
        }
        Ok(files)
    }
}

fn append<W: Write>(tar: &mut tar::Builder<W>, path: &str, mode: u32, data: &[u8]) -> io::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(mode);
    header.set_mtime(0);
    header.set_cksum();
    tar.append_data(&mut header, path, data)
}

#[cfg(unix)]
fn file_mode(path: &Path) -> io::Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    Ok(fs::metadata(path)?.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn file_mode(_path: &Path) -> io::Result<u32> {
    Ok(0o644)
}

/// Directory holding the current bundle, its signature and version
pub struct ReleaseStore {
    dir: PathBuf,
}

impl ReleaseStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn current_version(&self) -> Result<Option<u64>> {
        match fs::read_to_string(self.dir.join(VERSION_FILE)) {
            Ok(s) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|e| AuthorityError::Release(format!("corrupt release version: {e}"))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The bundle being served, if any release was ever published
    pub fn current(&self) -> Result<Option<ReleaseBundle>> {
        let Some(version) = self.current_version()? else {
            return Ok(None);
        };
        Ok(Some(ReleaseBundle {
            version,
            bundle: fs::read(self.dir.join(BUNDLE_FILE))?,
            signature: fs::read(self.dir.join(BUNDLE_SIGNATURE_FILE))?,
        }))
    }

    /// Make `release` the current one. Versions only move forward.
    pub fn publish(&self, release: &ReleaseBundle) -> Result<()> {
        if let Some(current) = self.current_version()? {
            if release.version <= current {
                return Err(AuthorityError::ReleaseNotNewer {
                    requested: release.version,
                    current,
                });
            }
        }

        fs::create_dir_all(&self.dir)?;
        // Version last: readers never see a version whose bundle is missing
        self.write_atomic(BUNDLE_FILE, &release.bundle)?;
        self.write_atomic(BUNDLE_SIGNATURE_FILE, &release.signature)?;
        self.write_atomic(VERSION_FILE, format!("{}\n", release.version).as_bytes())?;

        tracing::info!(version = release.version, dir = %self.dir.display(), "Published release");
        Ok(())
    }

    fn write_atomic(&self, name: &str, data: &[u8]) -> Result<()> {
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.dir.join(name)).map_err(|e| AuthorityError::Io(e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::signer::{SignatureVerifier, SigningKeyPair};
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::tempdir;

    fn entries(bundle: &[u8]) -> Vec<(String, Vec<u8>)> {
        let mut archive = tar::Archive::new(GzDecoder::new(bundle));
        archive
            .entries()
            .unwrap()
            .map(|e| {
                let mut e = e.unwrap();
                let path = e.path().unwrap().to_string_lossy().to_string();
                let mut data = Vec::new();
                e.read_to_end(&mut data).unwrap();
                (path, data)
            })
            .collect()
    }

    #[test]
    fn test_build_signs_every_file_and_the_bundle() {
        let src = tempdir().unwrap();
        fs::create_dir_all(src.path().join("bin")).unwrap();
        fs::write(src.path().join("bin/tool"), b"#!/bin/sh\n").unwrap();
        fs::create_dir_all(src.path().join("signatures")).unwrap();
        fs::write(src.path().join("signatures/stale.sig"), b"old").unwrap();
        let key = SigningKeyPair::generate();
        let verifier = key.verifier();

        let release = ReleaseBuilder::new(&key, "release.txt").build(src.path(), 7).unwrap();
        verifier.verify(&release.bundle, &release.signature).unwrap();

        let entries = entries(&release.bundle);
        let names: Vec<&str> = entries.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(
            names,
            vec!["bin/tool", "signatures/bin/tool.sig", "release.txt", "signatures/release.txt.sig"]
        );
        verifier.verify(&entries[0].1, &entries[1].1).unwrap();
        assert_eq!(entries[2].1, b"7\n");
    }

    #[test]
    fn test_store_only_moves_forward() {
        let dir = tempdir().unwrap();
        let store = ReleaseStore::new(dir.path().join("releases"));
        assert_eq!(store.current().unwrap(), None);

        let release = ReleaseBundle {
            version: 3,
            bundle: b"tar".to_vec(),
            signature: b"sig".to_vec(),
        };
        store.publish(&release).unwrap();
        assert_eq!(store.current().unwrap(), Some(release.clone()));

        assert!(matches!(
            store.publish(&release),
            Err(AuthorityError::ReleaseNotNewer { requested: 3, current: 3 })
        ));
    }

    #[test]
    fn test_build_rejects_missing_source() {
        let key = SigningKeyPair::generate();
        let dir = tempdir().unwrap();
        let result = ReleaseBuilder::new(&key, "release.txt").build(&dir.path().join("nope"), 1);
        assert!(matches!(result, Err(AuthorityError::Release(_))));
    }
}
