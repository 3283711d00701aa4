//! Query engine for stored documents

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::document::Document;

/// Filter operators
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    /// Equality
    Eq(Value),
    /// In array of values
    In(Vec<Value>),
    /// Field exists (and is not null)
    Exists(bool),
}

/// A single filter condition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self { field: field.to_string(), op: FilterOp::Eq(value.into()) }
    }

    pub fn is_in<I, V>(field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            field: field.to_string(),
            op: FilterOp::In(values.into_iter().map(Into::into).collect()),
        }
    }

    pub fn exists(field: &str, should_exist: bool) -> Self {
        Self { field: field.to_string(), op: FilterOp::Exists(should_exist) }
    }

    /// Check if a document matches this filter
    pub fn matches(&self, doc: &Document) -> bool {
        let id_value;
        let value = match self.field.as_str() {
            "_id" => {
                id_value = Value::String(doc.id.clone());
                Some(&id_value)
            }
            _ => doc.data.get(&self.field).filter(|v| !v.is_null()),
        };

        match (&self.op, value) {
            (FilterOp::Exists(should_exist), val) => val.is_some() == *should_exist,
            (_, None) => false,
            (FilterOp::Eq(expected), Some(actual)) => actual == expected,
            (FilterOp::In(values), Some(actual)) => values.contains(actual),
        }
    }
}

/// Query with multiple filters (all must match)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Query {
    #[serde(default)]
    pub filters: Vec<Filter>,

    /// Limit results
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Add an equality filter only when a value is given
    pub fn filter_opt(self, field: &str, value: Option<&str>) -> Self {
        match value {
            Some(v) => self.filter(Filter::eq(field, v)),
            None => self,
        }
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Execute query on a list of documents
    pub fn execute(&self, docs: Vec<Document>) -> Vec<Document> {
        let results = docs.into_iter().filter(|doc| self.matches(doc));
        match self.limit {
            Some(n) => results.take(n).collect(),
            None => results.collect(),
        }
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.filters.iter().all(|f| f.matches(doc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_eq() {
        let doc = Document::new(json!({"hostname": "h1", "suspended": true}));

        assert!(Filter::eq("hostname", "h1").matches(&doc));
        assert!(!Filter::eq("hostname", "h2").matches(&doc));
        assert!(Filter::eq("suspended", true).matches(&doc));
    }

    #[test]
    fn test_exists_treats_null_as_absent() {
        let open = Document::new(json!({"name": "disk-full", "closed_at": null}));
        let closed = Document::new(json!({"name": "disk-full", "closed_at": "2026-01-01T00:00:00Z"}));

        assert!(Filter::exists("closed_at", false).matches(&open));
        assert!(!Filter::exists("closed_at", false).matches(&closed));
    }

    #[test]
    fn test_query_execution() {
        let docs = vec![
            Document::new(json!({"hostname": "a", "suspended": false})),
            Document::new(json!({"hostname": "b", "suspended": true})),
            Document::new(json!({"hostname": "c"})),
        ];

        let results = Query::new()
            .filter(Filter::eq("suspended", false))
            .execute(docs.clone());
        assert_eq!(results.len(), 1);

        let results = Query::new()
            .filter(Filter::exists("suspended", false))
            .execute(docs.clone());
        assert_eq!(results.len(), 1);

        let results = Query::new()
            .filter(Filter::is_in("hostname", ["a", "c"]))
            .limit(1)
            .execute(docs);
        assert_eq!(results.len(), 1);
    }
}
