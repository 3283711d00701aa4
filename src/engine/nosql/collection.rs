//! Collection management for the document store

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use super::document::Document;
use super::error::{NoSqlError, Result};

/// A named set of documents, one JSON file per document
pub struct Collection {
    /// Collection name
    pub name: String,

    /// Path to collection directory
    path: PathBuf,
}

impl Collection {
    /// Open an existing collection
    pub fn open(base_path: &Path, name: &str) -> Result<Self> {
        let path = base_path.join(name);

        if !path.exists() {
            return Err(NoSqlError::CollectionNotFound(name.to_string()));
        }

        Ok(Self {
            name: name.to_string(),
            path,
        })
    }

    /// Create a new collection
    pub fn create(base_path: &Path, name: &str) -> Result<Self> {
        validate_collection_name(name)?;

        let path = base_path.join(name);

        if path.exists() {
            return Err(NoSqlError::CollectionAlreadyExists(name.to_string()));
        }

        fs::create_dir_all(&path)?;

        Ok(Self {
            name: name.to_string(),
            path,
        })
    }

    /// File holding document `id`; None for ids that could name a path
    /// outside this collection
    fn doc_path(&self, id: &str) -> Option<PathBuf> {
        is_valid_id(id).then(|| self.path.join(format!("{}.json", id)))
    }

    fn existing_doc_path(&self, id: &str) -> Result<PathBuf> {
        self.doc_path(id)
            .filter(|p| p.is_file())
            .ok_or_else(|| NoSqlError::DocumentNotFound(id.to_string()))
    }

    /// Write a document so readers see either the old or the new content
    fn write_atomic(&self, doc: &Document) -> Result<()> {
        let content = serde_json::to_vec_pretty(doc)?;
        let target = self
            .doc_path(&doc.id)
            .ok_or_else(|| NoSqlError::InvalidDocumentId(doc.id.clone()))?;
        let mut tmp = NamedTempFile::new_in(&self.path)?;
        tmp.write_all(&content)?;
        tmp.as_file().sync_all()?;
        tmp.persist(target).map_err(|e| NoSqlError::Io(e.error))?;
        Ok(())
    }

    /// Insert a document
    pub fn insert(&self, doc: Document) -> Result<String> {
        let path = self
            .doc_path(&doc.id)
            .ok_or_else(|| NoSqlError::InvalidDocumentId(doc.id.clone()))?;
        if path.exists() {
            return Err(NoSqlError::DuplicateId(doc.id));
        }

        self.write_atomic(&doc)?;
        Ok(doc.id)
    }

    /// Get a document by ID
    pub fn get(&self, id: &str) -> Result<Document> {
        let doc_path = self.existing_doc_path(id)?;
        let content = fs::read_to_string(doc_path)?;
        let doc: Document = serde_json::from_str(&content)?;

        Ok(doc)
    }

    /// Replace a stored document with an already-modified copy
    pub fn replace(&self, doc: &Document) -> Result<()> {
        self.existing_doc_path(&doc.id)?;
        self.write_atomic(doc)
    }

    /// List all document IDs
    pub fn list_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();

        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            let path = entry.path();

            if path.is_file() && path.extension().map(|e| e == "json").unwrap_or(false) {
                if let Some(stem) = path.file_stem() {
                    let name = stem.to_string_lossy();
                    // Skips system and in-flight temp files
                    if is_valid_id(&name) {
                        ids.push(name.to_string());
                    }
                }
            }
        }

        ids.sort();
        Ok(ids)
    }

    /// Count documents
    pub fn count(&self) -> Result<usize> {
        Ok(self.list_ids()?.len())
    }

    /// Get all documents
    pub fn all(&self) -> Result<Vec<Document>> {
        let ids = self.list_ids()?;
        let mut docs = Vec::with_capacity(ids.len());

        for id in ids {
            docs.push(self.get(&id)?);
        }

        Ok(docs)
    }
}

/// Document ids are single path components made of letters, digits and
/// dashes (UUIDs in practice)
fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Validate collection name
fn validate_collection_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(NoSqlError::InvalidCollectionName("name cannot be empty".to_string()));
    }

    if name.starts_with('_') {
        return Err(NoSqlError::InvalidCollectionName("name cannot start with underscore".to_string()));
    }

    if !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(NoSqlError::InvalidCollectionName("name must be alphanumeric".to_string()));
    }

    Ok(())
}
