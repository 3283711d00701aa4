use fleetward_lib::engine::authority::{
    AdminSession, HostRegistry, NewPatch, PatchAuthority, PatchRecord, ReleaseStore, UpdateResponder,
};
use fleetward_lib::engine::nosql::NoSqlEngine;
use fleetward_lib::engine::protocol::{AcknowledgeRequest, UpdateRequest, UpdateResponse};
use fleetward_lib::engine::signer::SigningKeyPair;
use fleetward_lib::engine::updater::client::{EXIT_NO_UPDATE, EXIT_UPDATED};
use fleetward_lib::engine::updater::{
    ClientLayout, HealthResult, SelfCheck, SignatureTreeCheck, UpdateClient, UpdateError, UpdatePhase, UpdateServer,
};
use std::cell::RefCell;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Serves the real responder in-process
struct InProcessServer<'a> {
    responder: UpdateResponder<'a>,
    acks: RefCell<Vec<AcknowledgeRequest>>,
}

impl UpdateServer for InProcessServer<'_> {
    fn request_update(&self, request: &UpdateRequest) -> Result<UpdateResponse, UpdateError> {
        self.responder.respond(request).map_err(|e| UpdateError::Server {
            status: 500,
            message: e.to_string(),
        })
    }

    fn acknowledge_patch(&self, ack: &AcknowledgeRequest) -> Result<(), UpdateError> {
        self.responder.acknowledge(ack).map_err(|e| UpdateError::Server {
            status: 500,
            message: e.to_string(),
        })?;
        self.acks.borrow_mut().push(ack.clone());
        Ok(())
    }
}

/// Canned responses for protocol edge cases
struct ScriptedServer(UpdateResponse);

impl UpdateServer for ScriptedServer {
    fn request_update(&self, _request: &UpdateRequest) -> Result<UpdateResponse, UpdateError> {
        Ok(self.0.clone())
    }

    fn acknowledge_patch(&self, _ack: &AcknowledgeRequest) -> Result<(), UpdateError> {
        Ok(())
    }
}

struct AlwaysHealthy;

impl SelfCheck for AlwaysHealthy {
    fn check(&self, _root_dir: &Path) -> HealthResult {
        HealthResult::Healthy
    }
}

fn layout(work: &TempDir) -> ClientLayout {
    let root = work.path().join("root");
    fs::create_dir_all(&root).unwrap();
    ClientLayout {
        release_file: root.join("release.txt"),
        scratch_dir: work.path().join("scratch"),
        root_dir: root,
        hostname: "web-01".to_string(),
    }
}

#[test]
fn test_full_pass_installs_patches_and_acknowledges() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Server side: a published release and a patch for web-01
    let work = tempfile::tempdir()?;
    let store = NoSqlEngine::open_or_create(&work.path().join("store"))?;
    let releases = ReleaseStore::new(work.path().join("releases"));
    let key = SigningKeyPair::generate();
    let verifier = key.verifier();

    let source = work.path().join("source");
    fs::create_dir_all(source.join("bin"))?;
    fs::write(source.join("bin/agent"), b"agent v1")?;
    let admin = AdminSession::new(&store, "test").with_signer(&key);
    admin.publish_release(&releases, "release.txt", &source, 1)?;

    HostRegistry::new(&store).record_checkin("web-01")?;
    let patch_id = admin.create_patch(NewPatch::write("etc/agent.conf", b"interval=5".to_vec()))?;

    // 2. Client pass
    let server = InProcessServer {
        responder: UpdateResponder::new(&store, &releases),
        acks: RefCell::new(Vec::new()),
    };
    let tree_check = SignatureTreeCheck::new(&verifier);
    let layout = layout(&work);
    let mut client = UpdateClient::new(layout.clone(), &server, &verifier, &tree_check);
    let outcome = client.run_once()?;

    assert_eq!(outcome.exit_code(), EXIT_UPDATED);
    assert_eq!(client.phase(), UpdatePhase::Done);
    assert_eq!(outcome.installed_release, Some(1));
    assert_eq!(fs::read(layout.root_dir.join("bin/agent"))?, b"agent v1");
    assert_eq!(fs::read(layout.root_dir.join("etc/agent.conf"))?, b"interval=5");
    assert_eq!(server.acks.borrow().len(), 1);

    // 3. The server saw the acknowledgment
    let record: PatchRecord = store.get_record(&patch_id)?;
    assert!(record.pending_hosts.is_empty());
    assert!(record.completed_hosts.contains("web-01"));

    // 4. A second pass has nothing to do
    let mut client = UpdateClient::new(layout, &server, &verifier, &tree_check);
    let outcome = client.run_once()?;
    assert_eq!(outcome.exit_code(), EXIT_NO_UPDATE);
    assert_eq!(client.phase(), UpdatePhase::Done);
    assert!(PatchAuthority::new(&store).pending_for_host("web-01")?.is_empty());
    Ok(())
}

#[test]
fn test_unrecognized_status_is_fatal() {
    let work = tempfile::tempdir().unwrap();
    let key = SigningKeyPair::generate();
    let verifier = key.verifier();
    let server = ScriptedServer(UpdateResponse {
        status: "maybe".to_string(),
        ..Default::default()
    });

    let result = UpdateClient::new(layout(&work), &server, &verifier, &AlwaysHealthy).run_once();
    assert!(matches!(result, Err(UpdateError::UnrecognizedStatus(s)) if s == "maybe"));
}

#[test]
fn test_empty_patch_list_is_not_a_change() {
    let work = tempfile::tempdir().unwrap();
    let key = SigningKeyPair::generate();
    let verifier = key.verifier();
    let server = ScriptedServer(UpdateResponse {
        status: "current".to_string(),
        current_release: Some(3),
        patches: Some(Vec::new()),
        ..Default::default()
    });

    let outcome = UpdateClient::new(layout(&work), &server, &verifier, &AlwaysHealthy)
        .run_once()
        .unwrap();
    assert_eq!(outcome.exit_code(), EXIT_NO_UPDATE);
}

#[test]
fn test_failed_self_check_is_an_error() {
    struct Broken;
    impl SelfCheck for Broken {
        fn check(&self, _root_dir: &Path) -> HealthResult {
            HealthResult::Unhealthy {
                reason: "service did not start".to_string(),
            }
        }
    }

    let work = tempfile::tempdir().unwrap();
    let key = SigningKeyPair::generate();
    let verifier = key.verifier();
    let server = ScriptedServer(UpdateResponse {
        status: "current".to_string(),
        patches: Some(vec![fleetward_lib::engine::protocol::PatchBatch {
            id: "p1".to_string(),
            files: vec![fleetward_lib::engine::protocol::PatchFile {
                path: "x".to_string(),
                mode: 0o644,
                content: b"x".to_vec(),
            }],
        }]),
        ..Default::default()
    });

    let result = UpdateClient::new(layout(&work), &server, &verifier, &Broken).run_once();
    assert!(matches!(result, Err(UpdateError::SelfCheckFailed(_))));
}
