//! Patch Authority
//!
//! Authors patch records and tracks which hosts still owe an
//! acknowledgment. Conflict detection is check-then-insert: two identical
//! requests racing each other can both pass the check.

use std::collections::BTreeSet;

use chrono::Utc;

use super::error::{AuthorityError, Result};
use super::hosts::HostRegistry;
use super::models::PatchRecord;
use crate::engine::nosql::{NoSqlEngine, NoSqlError, Query, Stored};
use crate::engine::protocol::{check_patch_path, signature_path_for, PatchBatch, PatchFile, PatchFileError, DELETE_MODE};
use crate::engine::signer::Signer;

/// Mode of the generated signature companion
pub const SIGNATURE_MODE: u32 = 0o644;
pub const DEFAULT_PATCH_MODE: u32 = 0o755;

/// Operator request for a single-path patch
#[derive(Debug, Clone)]
pub struct NewPatch {
    pub path: String,
    pub mode: u32,
    pub content: Vec<u8>,
    pub signed: bool,
    /// `None` targets every known host
    pub hosts: Option<BTreeSet<String>>,
}

impl NewPatch {
    pub fn write(path: &str, content: Vec<u8>) -> Self {
        Self {
            path: path.to_string(),
            mode: DEFAULT_PATCH_MODE,
            content,
            signed: true,
            hosts: None,
        }
    }

    pub fn delete(path: &str) -> Self {
        Self {
            path: path.to_string(),
            mode: DELETE_MODE,
            content: Vec::new(),
            signed: true,
            hosts: None,
        }
    }

    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn unsigned(mut self) -> Self {
        self.signed = false;
        self
    }

    pub fn for_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hosts = Some(hosts.into_iter().map(Into::into).collect());
        self
    }
}

pub struct PatchAuthority<'a> {
    store: &'a NoSqlEngine,
    signer: Option<&'a dyn Signer>,
}

impl<'a> PatchAuthority<'a> {
    pub fn new(store: &'a NoSqlEngine) -> Self {
        Self { store, signer: None }
    }

    pub fn with_signer(store: &'a NoSqlEngine, signer: &'a dyn Signer) -> Self {
        Self {
            store,
            signer: Some(signer),
        }
    }

    /// Record a new patch and return its id
    pub fn create_patch(&self, request: NewPatch) -> Result<String> {
        check_patch_path(&request.path)?;
        if request.mode == DELETE_MODE && !request.content.is_empty() {
            return Err(PatchFileError::MalformedDeleteWithContent(request.path).into());
        }

        let known = HostRegistry::new(self.store).known_hosts()?;
        let hosts = match request.hosts {
            Some(requested) => {
                let unknown: Vec<String> = requested.difference(&known).cloned().collect();
                if !unknown.is_empty() {
                    return Err(AuthorityError::UnknownHost { hosts: unknown });
                }
                requested
            }
            None => known,
        };
        if hosts.is_empty() {
            return Err(AuthorityError::MissingHostname);
        }

        if let Some((patch_id, overlap)) = self.find_conflict(&request.path, &hosts)? {
            return Err(AuthorityError::PatchConflict {
                path: request.path,
                patch_id,
                hosts: overlap,
            });
        }

        let mut files = vec![PatchFile {
            path: request.path.clone(),
            mode: request.mode,
            content: request.content,
        }];
        // Only a signed write leaves a signature behind; anything else
        // removes the one a release may have installed for this path
        let (mode, content) = if request.signed && request.mode != DELETE_MODE {
            let signer = self.signer.ok_or(AuthorityError::SignerUnavailable)?;
            (SIGNATURE_MODE, signer.sign(&files[0].content))
        } else {
            (DELETE_MODE, Vec::new())
        };
        files.push(PatchFile {
            path: signature_path_for(&request.path),
            mode,
            content,
        });

        let record = PatchRecord {
            submitted_at: Utc::now(),
            pending_hosts: hosts,
            completed_hosts: BTreeSet::new(),
            files,
        };
        let id = self.store.insert_record(&record)?;
        tracing::info!(
            patch_id = %id,
            path = %request.path,
            hosts = record.pending_hosts.len(),
            signed = request.signed,
            "Created patch"
        );
        Ok(id)
    }

    /// First pending patch on `path` that shares a host with `hosts`
    fn find_conflict(&self, path: &str, hosts: &BTreeSet<String>) -> Result<Option<(String, Vec<String>)>> {
        let conflict = self
            .sorted_patches()?
            .into_iter()
            .filter(|p| p.record.touches(path))
            .find_map(|p| {
                let overlap: Vec<String> = p.record.pending_hosts.intersection(hosts).cloned().collect();
                (!overlap.is_empty()).then_some((p.id, overlap))
            });
        Ok(conflict)
    }

    /// Move `hostname` from pending to completed.
    ///
    /// Returns false when the host was not pending on this patch.
    pub fn acknowledge(&self, patch_id: &str, hostname: &str) -> Result<bool> {
        let updated = match self
            .store
            .modify_record::<PatchRecord, _>(patch_id, |record| record.complete_host(hostname))
        {
            Ok(updated) => updated,
            Err(NoSqlError::DocumentNotFound(_)) => return Err(AuthorityError::PatchNotFound(patch_id.to_string())),
            Err(e) => return Err(e.into()),
        };

        match updated {
            Some(record) => {
                tracing::info!(%patch_id, %hostname, remaining = record.pending_hosts.len(), "Patch acknowledged");
                Ok(true)
            }
            None => {
                tracing::warn!(%patch_id, %hostname, "Acknowledgment from host that is not pending");
                Ok(false)
            }
        }
    }

    /// Batches still owed by `hostname`, oldest first
    pub fn pending_for_host(&self, hostname: &str) -> Result<Vec<PatchBatch>> {
        Ok(self
            .sorted_patches()?
            .into_iter()
            .filter(|p| p.record.pending_hosts.contains(hostname))
            .map(|p| PatchBatch {
                id: p.id,
                files: p.record.files,
            })
            .collect())
    }

    pub fn list_patches(&self) -> Result<Vec<Stored<PatchRecord>>> {
        self.sorted_patches()
    }

    fn sorted_patches(&self) -> Result<Vec<Stored<PatchRecord>>> {
        let mut patches = self.store.find_records::<PatchRecord>(&Query::new())?;
        patches.sort_by(|a, b| {
            a.record
                .submitted_at
                .cmp(&b.record.submitted_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(patches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::signer::{SignatureVerifier, SigningKeyPair};
    use tempfile::{tempdir, TempDir};

    fn store_with_hosts(names: &[&str]) -> (TempDir, NoSqlEngine) {
        let dir = tempdir().unwrap();
        let store = NoSqlEngine::open_or_create(dir.path()).unwrap();
        let registry = HostRegistry::new(&store);
        for name in names {
            registry.record_checkin(name).unwrap();
        }
        (dir, store)
    }

    #[test]
    fn test_signed_patch_carries_companion_signature() {
        let (_dir, store) = store_with_hosts(&["a", "b"]);
        let key = SigningKeyPair::generate();
        let authority = PatchAuthority::with_signer(&store, &key);

        let id = authority.create_patch(NewPatch::write("etc/x.cfg", b"v=1".to_vec())).unwrap();
        let record: PatchRecord = store.get_record(&id).unwrap();

        assert_eq!(record.pending_hosts.len(), 2);
        assert!(record.completed_hosts.is_empty());
        assert_eq!(record.files.len(), 2);
        assert_eq!(record.files[0].mode, DEFAULT_PATCH_MODE);
        assert_eq!(record.files[1].path, "signatures/etc/x.cfg.sig");
        assert_eq!(record.files[1].mode, SIGNATURE_MODE);
        key.verifier().verify(b"v=1", &record.files[1].content).unwrap();
    }

    #[test]
    fn test_unknown_hosts_are_listed_sorted() {
        let (_dir, store) = store_with_hosts(&["a"]);
        let authority = PatchAuthority::new(&store);

        let err = authority
            .create_patch(NewPatch::write("x", vec![]).unsigned().for_hosts(["zeta", "a", "beta"]))
            .unwrap_err();
        match err {
            AuthorityError::UnknownHost { hosts } => assert_eq!(hosts, vec!["beta", "zeta"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_signed_without_signer_and_empty_selector() {
        let (_dir, store) = store_with_hosts(&["a"]);
        let authority = PatchAuthority::new(&store);

        assert!(matches!(
            authority.create_patch(NewPatch::write("x", vec![1])),
            Err(AuthorityError::SignerUnavailable)
        ));
        assert!(matches!(
            authority.create_patch(NewPatch::write("x", vec![1]).unsigned().for_hosts(Vec::<String>::new())),
            Err(AuthorityError::MissingHostname)
        ));
    }

    #[test]
    fn test_invalid_paths_are_refused() {
        let (_dir, store) = store_with_hosts(&["a"]);
        let authority = PatchAuthority::new(&store);

        for path in ["/etc/passwd", "../escape", "a/../../b", ""] {
            assert!(matches!(
                authority.create_patch(NewPatch::write(path, vec![]).unsigned()),
                Err(AuthorityError::InvalidPatchPath(_))
            ));
        }
        assert!(authority.create_patch(NewPatch::delete("x").unsigned()).is_ok());
    }

    #[test]
    fn test_acknowledge_moves_host_once() {
        let (_dir, store) = store_with_hosts(&["a", "b"]);
        let authority = PatchAuthority::new(&store);
        let id = authority.create_patch(NewPatch::write("x", b"1".to_vec()).unsigned()).unwrap();

        assert_eq!(authority.pending_for_host("a").unwrap().len(), 1);
        assert!(authority.acknowledge(&id, "a").unwrap());
        assert!(!authority.acknowledge(&id, "a").unwrap());
        assert!(authority.pending_for_host("a").unwrap().is_empty());
        assert_eq!(authority.pending_for_host("b").unwrap()[0].id, id);

        assert!(matches!(
            authority.acknowledge("no-such-patch", "a"),
            Err(AuthorityError::PatchNotFound(_))
        ));
    }

    #[test]
    fn test_signed_delete_removes_signature_too() {
        let (_dir, store) = store_with_hosts(&["a"]);
        let key = SigningKeyPair::generate();
        let authority = PatchAuthority::with_signer(&store, &key);

        let id = authority.create_patch(NewPatch::delete("bin/old")).unwrap();
        let record: PatchRecord = store.get_record(&id).unwrap();

        assert!(record.files.iter().all(|f| f.is_delete() && f.content.is_empty()));
        assert_eq!(record.files[1].path, "signatures/bin/old.sig");
    }

    #[test]
    fn test_unsigned_write_drops_stale_signature() {
        let (_dir, store) = store_with_hosts(&["a"]);
        let authority = PatchAuthority::new(&store);

        let id = authority.create_patch(NewPatch::write("bin/tool", b"local".to_vec()).unsigned()).unwrap();
        let record: PatchRecord = store.get_record(&id).unwrap();

        assert_eq!(record.files.len(), 2);
        assert_eq!(record.files[0].content, b"local");
        assert_eq!(record.files[1].path, "signatures/bin/tool.sig");
        assert!(record.files[1].is_delete());
    }

    #[test]
    fn test_simultaneous_acknowledgments_all_land() {
        let names: Vec<String> = (0..16).map(|n| format!("h{n}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let (_dir, store) = store_with_hosts(&refs);
        let authority = PatchAuthority::new(&store);
        let id = authority.create_patch(NewPatch::write("x", b"1".to_vec()).unsigned()).unwrap();

        std::thread::scope(|s| {
            for name in &names {
                let store = &store;
                let id = &id;
                s.spawn(move || assert!(PatchAuthority::new(store).acknowledge(id, name).unwrap()));
            }
        });

        let record: PatchRecord = store.get_record(&id).unwrap();
        assert!(record.pending_hosts.is_empty());
        assert_eq!(record.completed_hosts.len(), 16);
    }

    #[test]
    fn test_acknowledge_with_path_shaped_id() {
        let (dir, store) = store_with_hosts(&["a"]);
        let authority = PatchAuthority::new(&store);
        let outside = dir.path().join("outside");
        std::fs::write(
            outside.with_extension("json"),
            r#"{"_id":"outside","_created_at":"2026-01-01T00:00:00Z","_modified_at":"2026-01-01T00:00:00Z","submitted_at":"2026-01-01T00:00:00Z","pending_hosts":["a"],"completed_hosts":[],"files":[]}"#,
        )
        .unwrap();

        for id in [outside.to_str().unwrap(), "../outside"] {
            assert!(matches!(authority.acknowledge(id, "a"), Err(AuthorityError::PatchNotFound(_))));
        }
    }
}
