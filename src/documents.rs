use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::fs;

use crate::error::StorageError;
use crate::model::DocId;

/// Source of document markup, owned by the host.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn ids(&self) -> Result<Vec<DocId>, StorageError>;
    async fn load(&self, doc: DocId) -> Result<Option<String>, StorageError>;
    async fn save(&self, doc: DocId, content: &str) -> Result<(), StorageError>;
}

/// One `<id>.html` file per document.
pub struct DirDocuments {
    root: PathBuf,
}

impl DirDocuments {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn path(&self, doc: DocId) -> PathBuf {
        self.root.join(format!("{doc}.html"))
    }
}

#[async_trait]
impl DocumentStore for DirDocuments {
    async fn ids(&self) -> Result<Vec<DocId>, StorageError> {
        let mut ids = Vec::new();
        let mut rd = fs::read_dir(&self.root).await?;
        while let Some(ent) = rd.next_entry().await? {
            let path = ent.path();
            if path.extension().and_then(|s| s.to_str()) != Some("html") {
                continue;
            }
            if let Some(id) = path.file_stem().and_then(|s| s.to_str()).and_then(|s| s.parse().ok()) {
                ids.push(DocId(id));
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn load(&self, doc: DocId) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path(doc)).await {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, doc: DocId, content: &str) -> Result<(), StorageError> {
        let path = self.path(doc);
        let tmp = path.with_extension("html.tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

/// Documents held in memory, with a save counter for tests.
#[derive(Default)]
pub struct MemoryDocuments {
    docs: Mutex<BTreeMap<DocId, String>>,
    saves: Mutex<BTreeMap<DocId, usize>>,
}

impl MemoryDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, doc: DocId, content: impl Into<String>) {
        self.docs.lock().insert(doc, content.into());
    }

    pub fn get(&self, doc: DocId) -> Option<String> {
        self.docs.lock().get(&doc).cloned()
    }

    pub fn saves(&self, doc: DocId) -> usize {
        self.saves.lock().get(&doc).copied().unwrap_or(0)
    }
}

#[async_trait]
impl DocumentStore for MemoryDocuments {
    async fn ids(&self) -> Result<Vec<DocId>, StorageError> {
        Ok(self.docs.lock().keys().copied().collect())
    }

    async fn load(&self, doc: DocId) -> Result<Option<String>, StorageError> {
        Ok(self.get(doc))
    }

    async fn save(&self, doc: DocId, content: &str) -> Result<(), StorageError> {
        self.docs.lock().insert(doc, content.to_string());
        *self.saves.lock().entry(doc).or_default() += 1;
        Ok(())
    }
}
