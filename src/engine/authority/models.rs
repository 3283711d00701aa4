//! Server-side records
//!
//! One typed struct per collection. Every read goes through
//! `Document::decode`, so a malformed document surfaces as an error instead
//! of a half-filled record.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::engine::nosql::Record;
use crate::engine::protocol::PatchFile;

/// A host that has checked in at least once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRecord {
    pub hostname: String,
    #[serde(default)]
    pub suspended: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checkin: Option<DateTime<Utc>>,
}

impl Record for ClientRecord {
    const COLLECTION: &'static str = "clients";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchRecord {
    pub submitted_at: DateTime<Utc>,
    pub pending_hosts: BTreeSet<String>,
    #[serde(default)]
    pub completed_hosts: BTreeSet<String>,
    pub files: Vec<PatchFile>,
}

impl Record for PatchRecord {
    const COLLECTION: &'static str = "patches";
}

impl PatchRecord {
    pub fn touches(&self, path: &str) -> bool {
        self.files.iter().any(|f| f.path == path)
    }

    /// Move `hostname` from pending to completed. False if it was not pending.
    pub fn complete_host(&mut self, hostname: &str) -> bool {
        if !self.pending_hosts.remove(hostname) {
            return false;
        }
        self.completed_hosts.insert(hostname.to_string());
        true
    }
}

/// A named compliance problem on one host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub hostname: String,
    pub name: String,
    pub opened_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snoozed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsnooze_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsnoozed_at: Option<DateTime<Utc>>,
}

impl Record for Issue {
    const COLLECTION: &'static str = "issues";
}

impl Issue {
    pub fn open(hostname: &str, name: &str, now: DateTime<Utc>) -> Self {
        Self {
            hostname: hostname.to_string(),
            name: name.to_string(),
            opened_at: now,
            closed_at: None,
            snoozed_at: None,
            unsnooze_at: None,
            unsnoozed_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }

    pub fn is_snoozed(&self, now: DateTime<Utc>) -> bool {
        self.is_open() && self.unsnooze_at.is_some_and(|t| t > now)
    }
}

/// One audited operation. Everything except the timestamp is free-form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub audited_at: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record for AuditRecord {
    const COLLECTION: &'static str = "audit_trail";
}
