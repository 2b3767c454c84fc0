//! Whole-document JSON storage with a single-writer lock.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use serde_json::to_writer_pretty;
use tokio::sync::Mutex;

use crate::model::Document;

/// Storage accessor for the single JSON document backing the service.
///
/// Every read loads the full file and every write rewrites it. Writers
/// hold an async mutex across load-mutate-save, so two concurrent
/// mutations cannot overwrite each other's records. The file itself is
/// replaced atomically (temp file + rename), so readers never observe a
/// partial write.
#[derive(Clone)]
pub struct Store {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl Store {
    /// Create a store backed by the document at `path`.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Path of the backing document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write an empty document at the configured path if none exists.
    pub fn init(&self) -> Result<()> {
        if self.path.exists() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        write_document(&self.path, &Document::default())
    }

    fn load_unlocked(&self) -> Result<Document> {
        let data = fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        serde_json::from_str(&data).with_context(|| format!("parsing {}", self.path.display()))
    }

    /// Read a consistent snapshot of the document.
    pub async fn load(&self) -> Result<Document> {
        let _guard = self.lock.lock().await;
        self.load_unlocked()
    }

    /// Load the document, apply `f`, and rewrite the file, all under the
    /// writer lock. If `f` fails, nothing is written.
    pub async fn update<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Document) -> Result<T, E>,
        E: From<anyhow::Error>,
    {
        let _guard = self.lock.lock().await;
        let mut doc = self.load_unlocked().map_err(E::from)?;
        let out = f(&mut doc)?;
        write_document(&self.path, &doc).map_err(E::from)?;
        Ok(out)
    }
}

/// Pretty-print the document to a temp file and rename it into place.
fn write_document(path: &Path, doc: &Document) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let tmp = tempfile::NamedTempFile::new_in(&parent)?;
    to_writer_pretty(&tmp, doc).with_context(|| format!("serializing {}", path.display()))?;
    tmp.persist(path)
        .with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}
