//! Operator session
//!
//! Every mutation made through the admin CLI goes through here so that it
//! lands in the audit trail tagged with the acting operator.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use super::audit::AuditTrail;
use super::error::{AuthorityError, Result};
use super::hosts::HostSuspension;
use super::issues::IssueTracker;
use super::patches::{NewPatch, PatchAuthority};
use super::releases::{ReleaseBuilder, ReleaseBundle, ReleaseStore};
use crate::engine::nosql::NoSqlEngine;
use crate::engine::signer::Signer;

pub struct AdminSession<'a> {
    store: &'a NoSqlEngine,
    signer: Option<&'a dyn Signer>,
    actor: String,
}

impl<'a> AdminSession<'a> {
    pub fn new(store: &'a NoSqlEngine, actor: &str) -> Self {
        Self {
            store,
            signer: None,
            actor: actor.to_string(),
        }
    }

    pub fn with_signer(mut self, signer: &'a dyn Signer) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn create_patch(&self, request: NewPatch) -> Result<String> {
        let summary = json!({
            "path": request.path,
            "mode": format!("{:o}", request.mode),
            "signed": request.signed,
            "hosts": request.hosts,
        });
        let authority = match self.signer {
            Some(signer) => PatchAuthority::with_signer(self.store, signer),
            None => PatchAuthority::new(self.store),
        };
        let id = authority.create_patch(request)?;

        let mut record = object(summary);
        record.insert("patch_id".to_string(), json!(id));
        self.audit("create_patch", vec![record])?;
        Ok(id)
    }

    pub fn suspend_hosts(&self, hosts: &BTreeSet<String>) -> Result<Vec<String>> {
        let changed = HostSuspension::new(self.store).suspend(hosts)?;
        self.audit("suspend_host", per_value("hostname", &changed))?;
        Ok(changed)
    }

    pub fn unsuspend_hosts(&self, hosts: &BTreeSet<String>) -> Result<Vec<String>> {
        let changed = HostSuspension::new(self.store).unsuspend(hosts)?;
        self.audit("unsuspend_host", per_value("hostname", &changed))?;
        Ok(changed)
    }

    pub fn open_issue(&self, hostname: &str, name: &str, as_of: Option<DateTime<Utc>>) -> Result<Option<String>> {
        let id = IssueTracker::new(self.store).open_issue(hostname, name, as_of)?;
        if let Some(id) = &id {
            let record = object(json!({"issue_id": id, "hostname": hostname, "name": name}));
            self.audit("open_issue", vec![record])?;
        }
        Ok(id)
    }

    pub fn close_issue(&self, hostname: Option<&str>, name: Option<&str>) -> Result<Vec<String>> {
        let ids = IssueTracker::new(self.store).close_issue(hostname, name)?;
        self.audit("close_issue", per_value("issue_id", &ids))?;
        Ok(ids)
    }

    pub fn snooze_issue(&self, hostname: Option<&str>, name: Option<&str>, until: DateTime<Utc>) -> Result<Vec<String>> {
        let ids = IssueTracker::new(self.store).snooze_issue(hostname, name, until)?;
        let records = per_value("issue_id", &ids)
            .into_iter()
            .map(|mut r| {
                r.insert("unsnooze_at".to_string(), json!(until));
                r
            })
            .collect();
        self.audit("snooze_issue", records)?;
        Ok(ids)
    }

    pub fn unsnooze_issue(&self, hostname: Option<&str>, name: Option<&str>) -> Result<Vec<String>> {
        let ids = IssueTracker::new(self.store).unsnooze_issue(hostname, name)?;
        self.audit("unsnooze_issue", per_value("issue_id", &ids))?;
        Ok(ids)
    }

    /// Build, sign and publish the tree under `source` as `version`
    pub fn publish_release(
        &self,
        releases: &ReleaseStore,
        release_file: &str,
        source: &Path,
        version: u64,
    ) -> Result<ReleaseBundle> {
        let signer = self.signer.ok_or(AuthorityError::SignerUnavailable)?;
        let release = ReleaseBuilder::new(signer, release_file).build(source, version)?;
        releases.publish(&release)?;

        let record = object(json!({
            "version": version,
            "source": source.display().to_string(),
            "sha256": release.sha256_hex(),
        }));
        self.audit("publish_release", vec![record])?;
        Ok(release)
    }

    fn audit(&self, action: &str, records: Vec<Map<String, Value>>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let tags = object(json!({"actor": self.actor, "action": action}));
        AuditTrail::new(self.store).write(tags, records)?;
        Ok(())
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn per_value(key: &str, values: &[String]) -> Vec<Map<String, Value>> {
    values
        .iter()
        .map(|v| {
            let mut record = Map::new();
            record.insert(key.to_string(), json!(v));
            record
        })
        .collect()
}
