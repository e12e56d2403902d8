use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};
use tracing::{debug, info};

use crate::error::StorageError;
use crate::model::{AssetId, AssetRecord, DocId, NewAsset};

/// Per-asset metadata attribute holding the 16-hex-digit fingerprint.
pub const FINGERPRINT_META_KEY: &str = "image_phash";
pub const ALT_META_KEY: &str = "image_alt";

const META_DIR: &str = ".meta";
const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "gif", "webp", "bmp"];

/// Locally stored images with byte access and string metadata.
#[async_trait]
pub trait AssetLibrary: Send + Sync {
    /// Every stored image, in id order.
    async fn assets(&self) -> Result<Vec<AssetRecord>, StorageError>;
    async fn get(&self, id: AssetId) -> Result<Option<AssetRecord>, StorageError>;
    async fn read(&self, id: AssetId) -> Result<Vec<u8>, StorageError>;
    async fn store(&self, asset: NewAsset) -> Result<AssetRecord, StorageError>;
    async fn set_meta(&self, id: AssetId, key: &str, value: &str) -> Result<(), StorageError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Sidecar {
    id: AssetId,
    file_name: String,
    width: Option<u32>,
    height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    doc: Option<DocId>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    meta: BTreeMap<String, String>,
}

/// Images as plain files in one directory, metadata as JSON sidecars under `.meta/`.
pub struct DirLibrary {
    root: PathBuf,
    base_url: String,
    entries: Mutex<BTreeMap<AssetId, Sidecar>>,
}

impl DirLibrary {
    /// Opens (creating if needed) the library. Image files without a sidecar are
    /// registered as assets without a fingerprint.
    pub async fn open(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(root.join(META_DIR)).await?;

        let mut entries = BTreeMap::new();
        let mut rd = fs::read_dir(root.join(META_DIR)).await?;
        while let Some(ent) = rd.next_entry().await? {
            let path = ent.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let sidecar: Sidecar = serde_json::from_slice(&fs::read(&path).await?)?;
            entries.insert(sidecar.id, sidecar);
        }

        let lib = Self {
            root,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            entries: Mutex::new(entries),
        };
        lib.adopt_orphans().await?;
        Ok(lib)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn adopt_orphans(&self) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().await;
        let known: HashSet<String> = entries.values().map(|s| s.file_name.clone()).collect();

        let mut orphans = Vec::new();
        let mut rd = fs::read_dir(&self.root).await?;
        while let Some(ent) = rd.next_entry().await? {
            if !ent.file_type().await?.is_file() {
                continue;
            }
            let name = ent.file_name().to_string_lossy().to_string();
            let is_image = Path::new(&name)
                .extension()
                .and_then(|s| s.to_str())
                .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
            if is_image && !known.contains(&name) {
                orphans.push(name);
            }
        }
        orphans.sort();

        for file_name in orphans {
            let id = next_id(&entries);
            let sidecar = Sidecar {
                id,
                file_name,
                width: None,
                height: None,
                source_url: None,
                doc: None,
                created_at: Utc::now(),
                meta: BTreeMap::new(),
            };
            self.write_sidecar(&sidecar).await?;
            debug!(asset = %id, file = %sidecar.file_name, "registered existing image");
            entries.insert(id, sidecar);
        }
        Ok(())
    }

    fn record(&self, s: &Sidecar) -> AssetRecord {
        AssetRecord {
            id: s.id,
            url: format!("{}/{}", self.base_url, s.file_name),
            file_name: s.file_name.clone(),
            width: s.width,
            height: s.height,
            fingerprint: s.meta.get(FINGERPRINT_META_KEY).and_then(|v| v.parse().ok()),
        }
    }

    async fn write_sidecar(&self, s: &Sidecar) -> Result<(), StorageError> {
        let path = self.root.join(META_DIR).join(format!("{}.json", s.id));
        write_atomic(&path, &serde_json::to_vec_pretty(s)?).await
    }

    async fn unique_name(&self, stem: &str, ext: &str, taken: &HashSet<&str>) -> String {
        let mut candidate = format!("{stem}.{ext}");
        let mut n = 1;
        while taken.contains(candidate.as_str()) || fs::try_exists(self.root.join(&candidate)).await.unwrap_or(false) {
            candidate = format!("{stem}-{n}.{ext}");
            n += 1;
        }
        candidate
    }
}

fn next_id(entries: &BTreeMap<AssetId, Sidecar>) -> AssetId {
    AssetId(entries.keys().next_back().map(|id| id.0 + 1).unwrap_or(1))
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let tmp = path.with_extension("tmp");
    {
        let mut f = fs::File::create(&tmp).await?;
        f.write_all(bytes).await?;
        let _ = f.sync_all().await;
    }
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl AssetLibrary for DirLibrary {
    async fn assets(&self) -> Result<Vec<AssetRecord>, StorageError> {
        let entries = self.entries.lock().await;
        Ok(entries.values().map(|s| self.record(s)).collect())
    }

    async fn get(&self, id: AssetId) -> Result<Option<AssetRecord>, StorageError> {
        let entries = self.entries.lock().await;
        Ok(entries.get(&id).map(|s| self.record(s)))
    }

    async fn read(&self, id: AssetId) -> Result<Vec<u8>, StorageError> {
        let file_name = {
            let entries = self.entries.lock().await;
            entries
                .get(&id)
                .map(|s| s.file_name.clone())
                .ok_or_else(|| StorageError::Missing(format!("asset {id}")))?
        };
        Ok(fs::read(self.root.join(file_name)).await?)
    }

    async fn store(&self, asset: NewAsset) -> Result<AssetRecord, StorageError> {
        let mut entries = self.entries.lock().await;
        let file_name = {
            let taken: HashSet<&str> = entries.values().map(|s| s.file_name.as_str()).collect();
            self.unique_name(&asset.stem, &asset.extension, &taken).await
        };
        write_atomic(&self.root.join(&file_name), &asset.bytes).await?;

        let mut meta = BTreeMap::new();
        if !asset.alt_text.is_empty() {
            meta.insert(ALT_META_KEY.to_string(), asset.alt_text.clone());
        }
        let sidecar = Sidecar {
            id: next_id(&entries),
            file_name,
            width: asset.width,
            height: asset.height,
            source_url: Some(asset.source_url),
            doc: asset.doc,
            created_at: Utc::now(),
            meta,
        };
        self.write_sidecar(&sidecar).await?;
        info!(asset = %sidecar.id, file = %sidecar.file_name, "stored new asset");
        let record = self.record(&sidecar);
        entries.insert(sidecar.id, sidecar);
        Ok(record)
    }

    async fn set_meta(&self, id: AssetId, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().await;
        let sidecar = entries
            .get_mut(&id)
            .ok_or_else(|| StorageError::Missing(format!("asset {id}")))?;
        sidecar.meta.insert(key.to_string(), value.to_string());
        let snapshot = sidecar.clone();
        self.write_sidecar(&snapshot).await
    }
}
