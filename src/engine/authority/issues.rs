//! Issue Tracker
//!
//! Per-host named issues with an open/close/snooze lifecycle. There is at
//! most one open issue per `(hostname, name)`.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use super::error::Result;
use super::hosts::HostRegistry;
use super::models::Issue;
use crate::engine::nosql::{Filter, NoSqlEngine, Query, Stored};

/// Grouping used by `get_open_issues`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKey {
    /// hostname -> issue name -> issue
    Host,
    /// issue name -> hostname -> issue
    Issue,
}

pub type IssueGroups = BTreeMap<String, BTreeMap<String, Stored<Issue>>>;

pub struct IssueTracker<'a> {
    store: &'a NoSqlEngine,
}

impl<'a> IssueTracker<'a> {
    pub fn new(store: &'a NoSqlEngine) -> Self {
        Self { store }
    }

    /// Open `(hostname, name)` unless it is already open.
    ///
    /// With `as_of`, an issue closed after that instant also blocks the
    /// reopen: a manual close that happened after the data was sampled wins.
    pub fn open_issue(&self, hostname: &str, name: &str, as_of: Option<DateTime<Utc>>) -> Result<Option<String>> {
        let query = Query::new()
            .filter(Filter::eq("hostname", hostname))
            .filter(Filter::eq("name", name));
        let existing = self.store.find_records::<Issue>(&query)?;

        let blocked = existing.iter().any(|s| match (s.record.closed_at, as_of) {
            (None, _) => true,
            (Some(closed_at), Some(as_of)) => closed_at > as_of,
            (Some(_), None) => false,
        });
        if blocked {
            tracing::debug!(%hostname, %name, "Issue already open or closed after sample time");
            return Ok(None);
        }

        let id = self.store.insert_record(&Issue::open(hostname, name, Utc::now()))?;
        tracing::info!(%hostname, %name, issue_id = %id, "Opened issue");
        Ok(Some(id))
    }

    /// Close every matching open issue
    pub fn close_issue(&self, hostname: Option<&str>, name: Option<&str>) -> Result<Vec<String>> {
        let now = Utc::now();
        self.modify_open(hostname, name, |issue| {
            issue.closed_at = Some(now);
            true
        })
    }

    /// Snooze matching open issues until `until`.
    ///
    /// Always overwrites, even when `until` is earlier than the current
    /// snooze deadline.
    pub fn snooze_issue(&self, hostname: Option<&str>, name: Option<&str>, until: DateTime<Utc>) -> Result<Vec<String>> {
        let now = Utc::now();
        self.modify_open(hostname, name, |issue| {
            issue.snoozed_at = Some(now);
            issue.unsnooze_at = Some(until);
            true
        })
    }

    /// End the snooze of matching open issues that are still snoozed
    pub fn unsnooze_issue(&self, hostname: Option<&str>, name: Option<&str>) -> Result<Vec<String>> {
        let now = Utc::now();
        self.modify_open(hostname, name, |issue| {
            if !issue.is_snoozed(now) {
                return false;
            }
            issue.unsnooze_at = Some(now);
            issue.unsnoozed_at = Some(now);
            true
        })
    }

    /// Open issues grouped by `key`, hiding suspended hosts unless asked
    pub fn get_open_issues(
        &self,
        key: IssueKey,
        hostname: Option<&str>,
        name: Option<&str>,
        include_suspended: bool,
    ) -> Result<IssueGroups> {
        let suspended = if include_suspended {
            BTreeSet::new()
        } else {
            HostRegistry::new(self.store).suspended_hosts()?
        };

        let mut groups = IssueGroups::new();
        for stored in self.find_open(hostname, name)? {
            if suspended.contains(&stored.record.hostname) {
                continue;
            }
            let (outer, inner) = match key {
                IssueKey::Host => (stored.record.hostname.clone(), stored.record.name.clone()),
                IssueKey::Issue => (stored.record.name.clone(), stored.record.hostname.clone()),
            };
            groups.entry(outer).or_default().insert(inner, stored);
        }
        Ok(groups)
    }

    fn find_open(&self, hostname: Option<&str>, name: Option<&str>) -> Result<Vec<Stored<Issue>>> {
        let query = Query::new()
            .filter(Filter::exists("closed_at", false))
            .filter_opt("hostname", hostname)
            .filter_opt("name", name);
        Ok(self.store.find_records::<Issue>(&query)?)
    }

    /// Apply `change` to each matching open issue; ids of changed issues
    fn modify_open<F>(&self, hostname: Option<&str>, name: Option<&str>, mut change: F) -> Result<Vec<String>>
    where
        F: FnMut(&mut Issue) -> bool,
    {
        let mut changed = Vec::new();
        for Stored { id, .. } in self.find_open(hostname, name)? {
            // Re-checked under the lock: a concurrent close may have won
            let updated = self
                .store
                .modify_record::<Issue, _>(&id, |issue| issue.is_open() && change(issue))?;
            if updated.is_some() {
                changed.push(id);
            }
        }
        changed.sort();
        Ok(changed)
    }
}
