//! Document Store Engine
//!
//! Main entry point for the document store. A single engine is opened at
//! process start and handed by reference to every component that needs it.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use super::collection::Collection;
use super::document::{Document, Record};
use super::error::{NoSqlError, Result};
use super::meta::Meta;
use super::query::Query;

/// A typed record together with the id of the document holding it
#[derive(Debug, Clone)]
pub struct Stored<T> {
    pub id: String,
    pub record: T,
}

/// The document store engine
pub struct NoSqlEngine {
    /// Base path for the store
    base_path: PathBuf,

    /// Serializes read-modify-write cycles, one lock per collection
    write_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl NoSqlEngine {
    /// Open an existing store
    pub fn open(path: &Path) -> Result<Self> {
        if !path.join("_meta.json").exists() {
            return Err(NoSqlError::StoreNotFound(path.display().to_string()));
        }

        Meta::load(path)?;
        Ok(Self::at(path))
    }

    /// Create a new store
    pub fn create(path: &Path) -> Result<Self> {
        fs::create_dir_all(path)?;

        Meta::new().save(path)?;
        Ok(Self::at(path))
    }

    fn at(path: &Path) -> Self {
        Self {
            base_path: path.to_path_buf(),
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Open or create a store
    pub fn open_or_create(path: &Path) -> Result<Self> {
        if path.join("_meta.json").exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }
    }

    /// Open an existing collection
    pub fn collection(&self, name: &str) -> Result<Collection> {
        Collection::open(&self.base_path, name)
    }

    /// Open a collection, creating it on first use
    pub fn ensure_collection(&self, name: &str) -> Result<Collection> {
        match Collection::create(&self.base_path, name) {
            Ok(col) => Ok(col),
            // Lost a creation race or already present
            Err(NoSqlError::CollectionAlreadyExists(_)) => self.collection(name),
            Err(e) => Err(e),
        }
    }

    /// Check if a collection exists
    pub fn collection_exists(&self, name: &str) -> bool {
        self.base_path.join(name).exists()
    }

    // ========== Untyped Convenience Methods ==========

    /// Insert a document into a collection
    pub fn insert(&self, collection: &str, doc: Document) -> Result<String> {
        self.ensure_collection(collection)?.insert(doc)
    }

    /// Get a document by ID
    pub fn get(&self, collection: &str, id: &str) -> Result<Document> {
        self.collection(collection)?.get(id)
    }

    /// Query documents; a collection that was never written is empty
    pub fn query(&self, collection: &str, query: &Query) -> Result<Vec<Document>> {
        if !self.collection_exists(collection) {
            return Ok(Vec::new());
        }
        let docs = self.collection(collection)?.all()?;
        Ok(query.execute(docs))
    }

    /// Count documents in a collection
    pub fn count(&self, collection: &str) -> Result<usize> {
        if !self.collection_exists(collection) {
            return Ok(0);
        }
        self.collection(collection)?.count()
    }

    // ========== Typed Record Methods ==========

    /// Insert a typed record, returning its new id
    pub fn insert_record<T: Record>(&self, record: &T) -> Result<String> {
        let doc = Document::from_record(record)?;
        self.insert(T::COLLECTION, doc)
    }

    /// Fetch and validate a single record
    pub fn get_record<T: Record>(&self, id: &str) -> Result<T> {
        if !self.collection_exists(T::COLLECTION) {
            return Err(NoSqlError::DocumentNotFound(id.to_string()));
        }
        self.get(T::COLLECTION, id)?.decode()
    }

    /// Find and validate all records matching a query
    pub fn find_records<T: Record>(&self, query: &Query) -> Result<Vec<Stored<T>>> {
        self.query(T::COLLECTION, query)?
            .into_iter()
            .map(|doc| {
                let record = doc.decode()?;
                Ok(Stored { id: doc.id, record })
            })
            .collect()
    }

    /// Apply `change` to one record while holding its collection's write
    /// lock. The record is written back only when `change` returns true;
    /// the updated record is returned in that case.
    pub fn modify_record<T, F>(&self, id: &str, change: F) -> Result<Option<T>>
    where
        T: Record,
        F: FnOnce(&mut T) -> bool,
    {
        let lock = self.write_lock(T::COLLECTION);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        if !self.collection_exists(T::COLLECTION) {
            return Err(NoSqlError::DocumentNotFound(id.to_string()));
        }
        let col = self.collection(T::COLLECTION)?;
        let mut doc = col.get(id)?;
        let mut record: T = doc.decode()?;
        if !change(&mut record) {
            return Ok(None);
        }
        doc.replace_record(&record)?;
        col.replace(&doc)?;
        Ok(Some(record))
    }

    /// Update the first record matching `query`, or insert one when none
    /// matches. Lookup and write happen under the collection's write lock.
    pub fn upsert_record<T, F>(&self, query: &Query, change: F) -> Result<String>
    where
        T: Record,
        F: FnOnce(Option<T>) -> T,
    {
        let lock = self.write_lock(T::COLLECTION);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        match self.find_records::<T>(query)?.into_iter().next() {
            Some(Stored { id, record }) => {
                let col = self.collection(T::COLLECTION)?;
                let mut doc = col.get(&id)?;
                doc.replace_record(&change(Some(record)))?;
                col.replace(&doc)?;
                Ok(id)
            }
            None => self.insert_record(&change(None)),
        }
    }

    fn write_lock(&self, collection: &str) -> Arc<Mutex<()>> {
        let mut locks = self.write_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(collection.to_string()).or_default().clone()
    }
}
