use chrono::{Duration, Utc};
use fleetward_lib::engine::authority::{HostRegistry, HostSuspension, Issue, IssueKey, IssueTracker};
use fleetward_lib::engine::nosql::NoSqlEngine;

#[test]
fn test_issue_lifecycle() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let store = NoSqlEngine::open_or_create(dir.path())?;
    let registry = HostRegistry::new(&store);
    registry.record_checkin("h1")?;
    registry.record_checkin("h2")?;
    let tracker = IssueTracker::new(&store);

    // 1. Opening twice yields one record
    let id = tracker.open_issue("h1", "ssh-root-login", None)?.ok_or("first open created nothing")?;
    assert!(tracker.open_issue("h1", "ssh-root-login", None)?.is_none());
    let open = tracker.get_open_issues(IssueKey::Host, Some("h1"), None, false)?;
    assert_eq!(open["h1"].len(), 1);
    assert_eq!(open["h1"]["ssh-root-login"].id, id);

    // 2. Snooze to T1, then to an earlier T0: the later call wins
    let t1 = Utc::now() + Duration::days(2);
    let t0 = Utc::now() + Duration::hours(3);
    tracker.snooze_issue(Some("h1"), None, t1)?;
    tracker.snooze_issue(Some("h1"), None, t0)?;
    let issue: Issue = store.get_record(&id)?;
    assert_eq!(issue.unsnooze_at, Some(t0));

    // 3. Suspension hides but does not close
    tracker.open_issue("h2", "ssh-root-login", None)?;
    HostSuspension::new(&store).suspend(&["h2".to_string()].into_iter().collect())?;
    let by_issue = tracker.get_open_issues(IssueKey::Issue, None, None, false)?;
    assert_eq!(by_issue["ssh-root-login"].len(), 1);
    let with_suspended = tracker.get_open_issues(IssueKey::Issue, None, None, true)?;
    assert_eq!(with_suspended["ssh-root-login"].len(), 2);

    // 4. Closing by name closes it on every host
    let closed = tracker.close_issue(None, Some("ssh-root-login"))?;
    assert_eq!(closed.len(), 2);
    assert!(tracker.get_open_issues(IssueKey::Host, None, None, true)?.is_empty());
    Ok(())
}
