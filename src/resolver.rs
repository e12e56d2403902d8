use std::sync::Arc;

use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{debug, warn};

use crate::fetch::Fetcher;
use crate::fingerprint::measure_blocking;
use crate::index::FingerprintIndex;
use crate::locator::ImageReference;
use crate::model::{AssetId, ScannedImage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Reuse(AssetId),
    NeedsImport,
}

impl ScannedImage {
    pub fn decision(&self) -> Decision {
        match self.matched_asset {
            Some(id) => Decision::Reuse(id),
            None => Decision::NeedsImport,
        }
    }
}

/// Decides reuse or import for located images. Reads the index, never writes it.
#[derive(Clone)]
pub struct Resolver {
    fetcher: Arc<dyn Fetcher>,
    index: Arc<FingerprintIndex>,
    concurrency: usize,
}

impl Resolver {
    pub fn new(fetcher: Arc<dyn Fetcher>, index: Arc<FingerprintIndex>, concurrency: usize) -> Self {
        Self { fetcher, index, concurrency: concurrency.max(1) }
    }

    /// Fetch, fingerprint and look up one image. Fetch or decode failures leave it
    /// unresolved, which means it will be imported.
    pub async fn resolve_one(&self, image: ImageReference) -> ScannedImage {
        let bytes = match self.fetcher.fetch(&image.url).await {
            Ok(b) => b,
            Err(e) => {
                warn!(url = %image.url, error = %e, "fetch failed during resolution");
                return ScannedImage::unresolved(image);
            }
        };
        let fingerprint = match measure_blocking(bytes).await {
            Ok(m) => m.fingerprint,
            Err(e) => {
                debug!(url = %image.url, error = %e, "cannot fingerprint, treating as new");
                return ScannedImage::unresolved(image);
            }
        };
        let matched_asset = self.index.lookup(fingerprint).await;
        debug!(url = %image.url, %fingerprint, matched = ?matched_asset, "resolved image");
        ScannedImage { image, fingerprint: Some(fingerprint), matched_asset }
    }

    /// Resolves a batch with at most `concurrency` fetches in flight. Output order
    /// matches input order.
    pub async fn resolve_all(&self, images: Vec<ImageReference>) -> Vec<ScannedImage> {
        let mut out: Vec<ScannedImage> = images.iter().cloned().map(ScannedImage::unresolved).collect();
        let sem = Arc::new(Semaphore::new(self.concurrency));
        let mut joinset = JoinSet::new();

        for (i, image) in images.into_iter().enumerate() {
            let sem = sem.clone();
            let resolver = self.clone();
            joinset.spawn(async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    return (i, ScannedImage::unresolved(image));
                };
                (i, resolver.resolve_one(image).await)
            });
        }

        while let Some(res) = joinset.join_next().await {
            match res {
                Ok((i, scanned)) => out[i] = scanned,
                Err(e) => warn!(error = %e, "resolver task failed"),
            }
        }
        out
    }
}
