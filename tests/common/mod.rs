#![allow(dead_code)]

use std::io::Cursor;
use std::sync::Arc;

use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb, RgbImage};
use tempfile::TempDir;

use rehost::documents::{DocumentStore, MemoryDocuments};
use rehost::library::{AssetLibrary, DirLibrary};
use rehost::store::MemoryStore;
use rehost::{HostServices, ImporterCfg, Importer, MockFetcher};

pub const HOST: &str = "https://lh3.googleusercontent.com";

const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

/// Left half black, right half white. Fingerprint `f0f0f0f0f0f0f0f0`.
pub fn vertical_split() -> RgbImage {
    ImageBuffer::from_fn(8, 8, |x, _| if x < 4 { BLACK } else { WHITE })
}

/// Top half white. Fingerprint `00000000ffffffff`.
pub fn horizontal_split() -> RgbImage {
    ImageBuffer::from_fn(32, 32, |_, y| if y < 16 { WHITE } else { BLACK })
}

/// White above the diagonal.
pub fn diagonal() -> RgbImage {
    ImageBuffer::from_fn(16, 16, |x, y| if x > y { WHITE } else { BLACK })
}

pub fn encode(img: RgbImage, fmt: ImageFormat) -> Vec<u8> {
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), fmt)
        .unwrap();
    out
}

pub fn png(img: RgbImage) -> Vec<u8> {
    encode(img, ImageFormat::Png)
}

pub fn url(path: &str) -> String {
    format!("{HOST}/{path}")
}

/// Scratch site: directory library, in-memory documents and state, canned fetches.
pub struct Harness {
    pub dir: TempDir,
    pub library: Arc<DirLibrary>,
    pub documents: Arc<MemoryDocuments>,
    pub store: Arc<MemoryStore>,
    pub fetcher: Arc<MockFetcher>,
}

impl Harness {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let library = Arc::new(DirLibrary::open(dir.path().join("uploads"), "/uploads").await.unwrap());
        Self {
            dir,
            library,
            documents: Arc::new(MemoryDocuments::new()),
            store: Arc::new(MemoryStore::default()),
            fetcher: Arc::new(MockFetcher::new()),
        }
    }

    pub async fn importer(&self) -> Importer {
        self.importer_over(self.library.clone()).await
    }

    pub async fn importer_over(&self, library: Arc<dyn AssetLibrary>) -> Importer {
        self.build(library, self.documents.clone()).await
    }

    pub async fn importer_with_documents(&self, documents: Arc<dyn DocumentStore>) -> Importer {
        self.build(self.library.clone(), documents).await
    }

    async fn build(&self, library: Arc<dyn AssetLibrary>, documents: Arc<dyn DocumentStore>) -> Importer {
        let host = HostServices {
            documents,
            library,
            fetcher: self.fetcher.clone(),
            state: self.store.clone(),
            outcomes: self.store.clone(),
        };
        Importer::new(host, &ImporterCfg::default()).await.unwrap()
    }
}
