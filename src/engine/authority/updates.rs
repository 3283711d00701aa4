//! Answers to `/update` and `/acknowledge_patch`

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::error::{AuthorityError, Result};
use super::hosts::HostRegistry;
use super::patches::PatchAuthority;
use super::releases::ReleaseStore;
use crate::engine::nosql::NoSqlEngine;
use crate::engine::protocol::{AcknowledgeRequest, UpdateRequest, UpdateResponse, STATUS_CURRENT, STATUS_OUT_OF_DATE};

pub struct UpdateResponder<'a> {
    store: &'a NoSqlEngine,
    releases: &'a ReleaseStore,
}

impl<'a> UpdateResponder<'a> {
    pub fn new(store: &'a NoSqlEngine, releases: &'a ReleaseStore) -> Self {
        Self { store, releases }
    }

    /// Record the check-in, compare releases and attach pending patches
    pub fn respond(&self, request: &UpdateRequest) -> Result<UpdateResponse> {
        let hostname = request.hostname.trim();
        if hostname.is_empty() {
            return Err(AuthorityError::MissingHostname);
        }
        HostRegistry::new(self.store).record_checkin(hostname)?;

        let mut response = UpdateResponse {
            status: STATUS_CURRENT.to_string(),
            ..Default::default()
        };

        // With nothing published every host is current
        if let Some(current) = self.releases.current_version()? {
            response.current_release = Some(current);
            if request.old_release < current {
                if let Some(release) = self.releases.current()? {
                    tracing::info!(%hostname, old_release = request.old_release, release = release.version, "Sending release");
                    response.status = STATUS_OUT_OF_DATE.to_string();
                    response.current_release = Some(release.version);
                    response.update = Some(STANDARD.encode(&release.bundle));
                    response.update_signature = Some(STANDARD.encode(&release.signature));
                }
            }
        }

        let patches = PatchAuthority::new(self.store).pending_for_host(hostname)?;
        if !patches.is_empty() {
            tracing::info!(%hostname, count = patches.len(), "Sending patches");
            response.patches = Some(patches);
        }
        Ok(response)
    }

    pub fn acknowledge(&self, ack: &AcknowledgeRequest) -> Result<bool> {
        PatchAuthority::new(self.store).acknowledge(&ack.id, &ack.hostname)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::authority::patches::NewPatch;
    use crate::engine::authority::releases::ReleaseBundle;
    use tempfile::tempdir;

    #[test]
    fn test_unpublished_server_reports_current() {
        let dir = tempdir().unwrap();
        let store = NoSqlEngine::open_or_create(&dir.path().join("store")).unwrap();
        let releases = ReleaseStore::new(dir.path().join("releases"));
        let responder = UpdateResponder::new(&store, &releases);

        let response = responder
            .respond(&UpdateRequest { old_release: 0, hostname: "h".into() })
            .unwrap();
        assert_eq!(response.status, STATUS_CURRENT);
        assert_eq!(response.current_release, None);
        assert!(response.patches.is_none());
        assert!(HostRegistry::new(&store).known_hosts().unwrap().contains("h"));
    }

    #[test]
    fn test_out_of_date_host_gets_bundle_and_patches() {
        let dir = tempdir().unwrap();
        let store = NoSqlEngine::open_or_create(&dir.path().join("store")).unwrap();
        let releases = ReleaseStore::new(dir.path().join("releases"));
        releases
            .publish(&ReleaseBundle { version: 2, bundle: b"b".to_vec(), signature: b"s".to_vec() })
            .unwrap();
        let responder = UpdateResponder::new(&store, &releases);
        responder
            .respond(&UpdateRequest { old_release: 2, hostname: "h".into() })
            .unwrap();
        let id = PatchAuthority::new(&store)
            .create_patch(NewPatch::write("x", b"1".to_vec()).unsigned())
            .unwrap();

        let behind = responder
            .respond(&UpdateRequest { old_release: 1, hostname: "h".into() })
            .unwrap();
        assert_eq!(behind.status, STATUS_OUT_OF_DATE);
        assert_eq!(behind.update.as_deref(), Some("Yg=="));
        assert_eq!(behind.patches.as_ref().unwrap()[0].id, id);

        assert!(responder.acknowledge(&AcknowledgeRequest { id, hostname: "h".into() }).unwrap());
        let current = responder
            .respond(&UpdateRequest { old_release: 2, hostname: "h".into() })
            .unwrap();
        assert_eq!(current.status, STATUS_CURRENT);
        assert_eq!(current.current_release, Some(2));
        assert!(current.update.is_none());
        assert!(current.patches.is_none());
    }
}
