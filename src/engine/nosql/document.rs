//! Document representation for the store

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use chrono::{DateTime, Utc};

use super::error::{NoSqlError, Result};

/// A typed entity persisted as a document.
///
/// Each record type lives in exactly one collection. `SCHEMA_VERSION` is
/// stamped on every document written and checked again on read.
pub trait Record: Serialize + DeserializeOwned {
    const COLLECTION: &'static str;
    const SCHEMA_VERSION: u32 = 1;
}

/// A stored document with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Unique document ID (UUID v4)
    #[serde(rename = "_id")]
    pub id: String,

    /// Record version this document was written with
    #[serde(rename = "_schema_version", skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,

    /// Creation timestamp
    #[serde(rename = "_created_at")]
    pub created_at: DateTime<Utc>,

    /// Last modified timestamp
    #[serde(rename = "_modified_at")]
    pub modified_at: DateTime<Utc>,

    /// The actual document data
    #[serde(flatten)]
    pub data: Value,
}

impl Document {
    /// Create a new document with generated ID
    pub fn new(data: Value) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), data)
    }

    /// Create a document with a specific ID
    pub fn with_id(id: String, data: Value) -> Self {
        let now = Utc::now();
        Self {
            id,
            schema_version: None,
            created_at: now,
            modified_at: now,
            data,
        }
    }

    /// Encode a typed record into a fresh document
    pub fn from_record<T: Record>(record: &T) -> Result<Self> {
        let mut doc = Self::new(Value::Null);
        doc.replace_record(record)?;
        Ok(doc)
    }

    /// Replace this document's data with a typed record
    pub fn replace_record<T: Record>(&mut self, record: &T) -> Result<()> {
        let data = serde_json::to_value(record)?;
        if !data.is_object() {
            return Err(NoSqlError::InvalidRecord {
                id: self.id.clone(),
                reason: "records must serialize to a JSON object".to_string(),
            });
        }
        self.schema_version = Some(T::SCHEMA_VERSION);
        self.update(data);
        Ok(())
    }

    /// Decode and validate this document as a typed record
    pub fn decode<T: Record>(&self) -> Result<T> {
        let found = self.schema_version.unwrap_or(1);
        if found > T::SCHEMA_VERSION {
            return Err(NoSqlError::UnsupportedRecordVersion {
                id: self.id.clone(),
                found,
                max: T::SCHEMA_VERSION,
            });
        }
        serde_json::from_value(self.data.clone()).map_err(|e| NoSqlError::InvalidRecord {
            id: self.id.clone(),
            reason: e.to_string(),
        })
    }

    /// Update the document data
    pub fn update(&mut self, data: Value) {
        self.data = data;
        self.modified_at = Utc::now();
    }

    /// Get a field from the document
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }
}
