//! Known hosts and suspension
//!
//! A host becomes known the first time it calls `/update`. Suspension only
//! hides a host's open issues from default queries; nothing is closed or
//! deleted.

use std::collections::BTreeSet;

use chrono::Utc;

use super::error::{AuthorityError, Result};
use super::models::ClientRecord;
use crate::engine::nosql::{Filter, NoSqlEngine, Query, Stored};

pub struct HostRegistry<'a> {
    store: &'a NoSqlEngine,
}

impl<'a> HostRegistry<'a> {
    pub fn new(store: &'a NoSqlEngine) -> Self {
        Self { store }
    }

    pub fn known_hosts(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .store
            .find_records::<ClientRecord>(&Query::new())?
            .into_iter()
            .map(|s| s.record.hostname)
            .collect())
    }

    pub fn suspended_hosts(&self) -> Result<BTreeSet<String>> {
        let query = Query::new().filter(Filter::eq("suspended", true));
        Ok(self
            .store
            .find_records::<ClientRecord>(&query)?
            .into_iter()
            .map(|s| s.record.hostname)
            .collect())
    }

    pub fn get(&self, hostname: &str) -> Result<Option<Stored<ClientRecord>>> {
        let query = Query::new().filter(Filter::eq("hostname", hostname)).limit(1);
        Ok(self.store.find_records::<ClientRecord>(&query)?.into_iter().next())
    }

    /// Stamp the check-in time, creating the record on first contact
    pub fn record_checkin(&self, hostname: &str) -> Result<()> {
        let now = Utc::now();
        let mut first_contact = false;
        let query = Query::new().filter(Filter::eq("hostname", hostname));
        let id = self.store.upsert_record::<ClientRecord, _>(&query, |existing| {
            let mut record = existing.unwrap_or_else(|| {
                first_contact = true;
                ClientRecord {
                    hostname: hostname.to_string(),
                    suspended: false,
                    last_checkin: None,
                }
            });
            record.last_checkin = Some(now);
            record
        })?;
        if first_contact {
            tracing::info!(%hostname, %id, "New host checked in");
        }
        Ok(())
    }
}

pub struct HostSuspension<'a> {
    store: &'a NoSqlEngine,
}

impl<'a> HostSuspension<'a> {
    pub fn new(store: &'a NoSqlEngine) -> Self {
        Self { store }
    }

    /// Suspend known hosts; returns the hosts that were not already suspended
    pub fn suspend(&self, hosts: &BTreeSet<String>) -> Result<Vec<String>> {
        self.set_suspended(hosts, true)
    }

    /// Unsuspend known hosts; returns the hosts that were suspended
    pub fn unsuspend(&self, hosts: &BTreeSet<String>) -> Result<Vec<String>> {
        self.set_suspended(hosts, false)
    }

    fn set_suspended(&self, hosts: &BTreeSet<String>, suspended: bool) -> Result<Vec<String>> {
        if hosts.is_empty() {
            return Err(AuthorityError::MissingHostname);
        }

        let query = Query::new().filter(Filter::is_in("hostname", hosts.iter().cloned()));
        let mut changed = BTreeSet::new();
        for Stored { id, record } in self.store.find_records::<ClientRecord>(&query)? {
            if record.suspended == suspended {
                continue;
            }
            let updated = self.store.modify_record::<ClientRecord, _>(&id, |current| {
                let flip = current.suspended != suspended;
                current.suspended = suspended;
                flip
            })?;
            if updated.is_some() {
                changed.insert(record.hostname);
            }
        }

        tracing::info!(suspended, changed = changed.len(), requested = hosts.len(), "Updated host suspension");
        Ok(changed.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::nosql::Record;
    use tempfile::tempdir;

    fn hosts(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_checkin_makes_host_known_once() {
        let dir = tempdir().unwrap();
        let store = NoSqlEngine::open_or_create(dir.path()).unwrap();
        let registry = HostRegistry::new(&store);

        registry.record_checkin("web-01").unwrap();
        registry.record_checkin("web-01").unwrap();
        registry.record_checkin("db-01").unwrap();

        assert_eq!(registry.known_hosts().unwrap(), hosts(&["db-01", "web-01"]));
        assert_eq!(store.count(ClientRecord::COLLECTION).unwrap(), 2);
        assert!(registry.get("web-01").unwrap().unwrap().record.last_checkin.is_some());
    }

    #[test]
    fn test_suspend_reports_only_changed_hosts() {
        let dir = tempdir().unwrap();
        let store = NoSqlEngine::open_or_create(dir.path()).unwrap();
        let registry = HostRegistry::new(&store);
        for h in ["a", "b", "c"] {
            registry.record_checkin(h).unwrap();
        }
        let suspension = HostSuspension::new(&store);

        assert_eq!(suspension.suspend(&hosts(&["b", "a"])).unwrap(), vec!["a", "b"]);
        assert_eq!(suspension.suspend(&hosts(&["a", "c", "unknown"])).unwrap(), vec!["c"]);
        assert_eq!(registry.suspended_hosts().unwrap(), hosts(&["a", "b", "c"]));

        assert_eq!(suspension.unsuspend(&hosts(&["a"])).unwrap(), vec!["a"]);
        assert!(suspension.unsuspend(&hosts(&["a"])).unwrap().is_empty());
    }

    #[test]
    fn test_empty_selector_is_rejected() {
        let dir = tempdir().unwrap();
        let store = NoSqlEngine::open_or_create(dir.path()).unwrap();
        let suspension = HostSuspension::new(&store);

        assert!(matches!(suspension.suspend(&BTreeSet::new()), Err(AuthorityError::MissingHostname)));
        assert!(matches!(suspension.unsuspend(&BTreeSet::new()), Err(AuthorityError::MissingHostname)));
    }

    #[test]
    fn test_simultaneous_first_checkins_create_one_record() {
        let dir = tempdir().unwrap();
        let store = NoSqlEngine::open_or_create(dir.path()).unwrap();

        std::thread::scope(|s| {
            for _ in 0..8 {
                let store = &store;
                s.spawn(move || HostRegistry::new(store).record_checkin("web-01").unwrap());
            }
        });

        assert_eq!(store.count(ClientRecord::COLLECTION).unwrap(), 1);
    }
}
