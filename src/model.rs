use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::fingerprint::Fingerprint;
use crate::locator::ImageReference;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(pub u64);

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for DocId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        s.trim()
            .parse::<u64>()
            .map(DocId)
            .map_err(|_| Error::InvalidInput(format!("document id must be numeric, got {s:?}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(pub u64);

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A locally stored image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub id: AssetId,
    pub url: String,
    pub file_name: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fingerprint: Option<Fingerprint>,
}

/// Bytes and metadata for an asset that does not exist yet.
#[derive(Debug, Clone)]
pub struct NewAsset {
    pub stem: String,
    pub extension: String,
    pub bytes: Vec<u8>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub alt_text: String,
    pub source_url: String,
    pub doc: Option<DocId>,
}

/// A located image plus what the resolver learned about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannedImage {
    #[serde(flatten)]
    pub image: ImageReference,
    pub fingerprint: Option<Fingerprint>,
    pub matched_asset: Option<AssetId>,
}

impl ScannedImage {
    pub fn unresolved(image: ImageReference) -> Self {
        Self { image, fingerprint: None, matched_asset: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentScan {
    pub doc: DocId,
    pub images: Vec<ScannedImage>,
}

/// Output of one scan pass; superseded by the next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    pub scan_id: Uuid,
    pub scanned_at: DateTime<Utc>,
    pub documents: Vec<DocumentScan>,
}

impl ScanResult {
    pub fn new(documents: Vec<DocumentScan>) -> Self {
        Self { scan_id: Uuid::new_v4(), scanned_at: Utc::now(), documents }
    }

    pub fn document(&self, doc: DocId) -> Option<&DocumentScan> {
        self.documents.iter().find(|d| d.doc == doc)
    }

    pub fn image_count(&self) -> usize {
        self.documents.iter().map(|d| d.images.len()).sum()
    }

    pub fn matched_count(&self) -> usize {
        self.documents
            .iter()
            .flat_map(|d| &d.images)
            .filter(|i| i.matched_asset.is_some())
            .count()
    }
}
