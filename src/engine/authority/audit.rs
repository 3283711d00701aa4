//! Audit Trail
//!
//! Append-only record of administrative operations. Records are never
//! updated or deleted.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::error::{AuthorityError, Result};
use super::models::AuditRecord;
use crate::engine::nosql::{NoSqlEngine, Query, Stored};

pub const AUDITED_AT: &str = "audited_at";

pub struct AuditTrail<'a> {
    store: &'a NoSqlEngine,
}

impl<'a> AuditTrail<'a> {
    pub fn new(store: &'a NoSqlEngine) -> Self {
        Self { store }
    }

    /// Merge `tags` into every record and insert them as one unordered batch.
    ///
    /// Record keys win over tag keys. `audited_at` is added to the tags when
    /// missing. Every record is attempted; the first failure is returned once
    /// the batch is done.
    pub fn write(&self, mut tags: Map<String, Value>, records: Vec<Map<String, Value>>) -> Result<usize> {
        if !tags.contains_key(AUDITED_AT) {
            tags.insert(AUDITED_AT.to_string(), serde_json::to_value(Utc::now()).map_err(invalid)?);
        }

        let mut written = 0;
        let mut first_error = None;
        for record in records {
            let mut merged = tags.clone();
            merged.extend(record);
            match to_record(merged).and_then(|r| Ok(self.store.insert_record(&r)?)) {
                Ok(_) => written += 1,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to write audit record");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }

    /// Convenience for a single record with no shared tags
    pub fn write_one(&self, record: Map<String, Value>) -> Result<()> {
        self.write(Map::new(), vec![record]).map(|_| ())
    }

    /// Matching records, oldest first
    pub fn query(&self, query: &Query) -> Result<Vec<Stored<AuditRecord>>> {
        // The limit applies after sorting
        let mut unlimited = query.clone();
        unlimited.limit = None;
        let mut records = self.store.find_records::<AuditRecord>(&unlimited)?;
        records.sort_by_key(|s| s.record.audited_at);
        if let Some(limit) = query.limit {
            let skip = records.len().saturating_sub(limit);
            records.drain(..skip);
        }
        Ok(records)
    }
}

fn invalid(e: serde_json::Error) -> AuthorityError {
    AuthorityError::InvalidAuditRecord(e.to_string())
}

fn to_record(mut fields: Map<String, Value>) -> Result<AuditRecord> {
    if let Some(key) = fields.keys().find(|k| k.starts_with('_')) {
        return Err(AuthorityError::InvalidAuditRecord(format!("field {key} is reserved")));
    }
    let audited_at = fields
        .remove(AUDITED_AT)
        .ok_or_else(|| AuthorityError::InvalidAuditRecord(format!("{AUDITED_AT} is missing")))?;
    let audited_at: DateTime<Utc> = serde_json::from_value(audited_at).map_err(invalid)?;
    Ok(AuditRecord { audited_at, fields })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::nosql::Filter;
    use serde_json::json;
    use tempfile::tempdir;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_tags_merge_and_record_keys_win() {
        let dir = tempdir().unwrap();
        let store = NoSqlEngine::open_or_create(dir.path()).unwrap();
        let trail = AuditTrail::new(&store);

        let written = trail
            .write(
                map(json!({"actor": "ops", "action": "suspend"})),
                vec![map(json!({"hostname": "a"})), map(json!({"hostname": "b", "action": "override"}))],
            )
            .unwrap();
        assert_eq!(written, 2);

        let all = trail.query(&Query::new()).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|s| s.record.fields["actor"] == "ops"));
        assert!(all.iter().all(|s| s.record.audited_at == all[0].record.audited_at));

        let overridden = trail.query(&Query::new().filter(Filter::eq("action", "override"))).unwrap();
        assert_eq!(overridden.len(), 1);
        assert_eq!(overridden[0].record.fields["hostname"], "b");
    }

    #[test]
    fn test_batch_continues_past_bad_record() {
        let dir = tempdir().unwrap();
        let store = NoSqlEngine::open_or_create(dir.path()).unwrap();
        let trail = AuditTrail::new(&store);

        let result = trail.write(
            Map::new(),
            vec![
                map(json!({"n": 1})),
                map(json!({"audited_at": "not a time"})),
                map(json!({"_id": "forged"})),
                map(json!({"n": 2})),
            ],
        );

        assert!(matches!(result, Err(AuthorityError::InvalidAuditRecord(_))));
        assert_eq!(trail.query(&Query::new()).unwrap().len(), 2);
    }

    #[test]
    fn test_query_limit_keeps_newest() {
        let dir = tempdir().unwrap();
        let store = NoSqlEngine::open_or_create(dir.path()).unwrap();
        let trail = AuditTrail::new(&store);
        for n in 0..5 {
            let at = Utc::now() + chrono::Duration::seconds(n);
            trail.write_one(map(json!({"n": n, "audited_at": at}))).unwrap();
        }

        let newest = trail.query(&Query::new().limit(2)).unwrap();
        assert_eq!(newest.iter().map(|s| s.record.fields["n"].clone()).collect::<Vec<_>>(), vec![json!(3), json!(4)]);
    }
}
