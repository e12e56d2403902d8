use std::sync::Arc;

use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::fetch::Fetcher;
use crate::fingerprint::measure_blocking;
use crate::index::FingerprintIndex;
use crate::library::AssetLibrary;
use crate::model::{AssetId, DocId, NewAsset, ScannedImage};
use crate::outcome::ImportOutcome;
use crate::rewrite::{replace_fragment, rewrite_fragment};

pub const FALLBACK_STEM: &str = "imported_image";
pub const ALLOWED_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];

/// Explicit name first, then alt text, then the fallback. An image extension typed
/// into the explicit name is dropped; the stored extension comes from the source.
pub fn choose_filename(custom: Option<&str>, alt_text: &str) -> String {
    let custom = custom.map(strip_image_extension).unwrap_or("");
    [custom, alt_text]
        .into_iter()
        .map(sanitize_stem)
        .find(|s| !s.is_empty())
        .unwrap_or_else(|| FALLBACK_STEM.to_string())
}

/// Slugifies around underscores so `my_logo` survives as written.
fn sanitize_stem(raw: &str) -> String {
    raw.split('_')
        .map(slug::slugify)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

fn strip_image_extension(name: &str) -> &str {
    let name = name.trim();
    match name.rsplit_once('.') {
        Some((stem, ext)) if is_image_extension(ext) => stem,
        _ => name,
    }
}

fn is_image_extension(ext: &str) -> bool {
    let ext = ext.to_ascii_lowercase();
    ALLOWED_EXTENSIONS.contains(&ext.as_str()) || ext == "bmp"
}

pub fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
    if ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        ext
    } else {
        "jpg".to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Reuse the matched asset if there is one, otherwise import.
    Import { custom_name: Option<String> },
    /// Only point the tag at the matched asset.
    Relink,
}

/// One image of a document to act on.
#[derive(Debug, Clone)]
pub struct Step {
    pub index: usize,
    pub image: ScannedImage,
    pub mode: Mode,
}

/// Carries out reuse and import decisions.
#[derive(Clone)]
pub struct Executor {
    fetcher: Arc<dyn Fetcher>,
    library: Arc<dyn AssetLibrary>,
    index: Arc<FingerprintIndex>,
    concurrency: usize,
}

impl Executor {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        library: Arc<dyn AssetLibrary>,
        index: Arc<FingerprintIndex>,
        concurrency: usize,
    ) -> Self {
        Self { fetcher, library, index, concurrency: concurrency.max(1) }
    }

    pub async fn execute(&self, doc: DocId, step: &Step) -> ImportOutcome {
        let image = &step.image;
        if image.image.url.trim().is_empty() {
            return ImportOutcome::failed("", Error::InvalidInput("image has no source URL".into()));
        }
        match (&step.mode, image.matched_asset) {
            (Mode::Relink, Some(id)) => match self.reuse(image, id).await {
                Ok(Some(outcome)) => outcome,
                Ok(None) => ImportOutcome::failed(&image.image.url, format!("asset {id} no longer exists")),
                Err(e) => ImportOutcome::failed(&image.image.url, e),
            },
            (Mode::Relink, None) => ImportOutcome::failed(&image.image.url, "no matching asset to relink to"),
            (Mode::Import { custom_name }, matched) => {
                if let Some(id) = matched {
                    match self.reuse(image, id).await {
                        Ok(Some(outcome)) => return outcome,
                        Ok(None) => warn!(asset = %id, url = %image.image.url, "matched asset is gone, importing"),
                        Err(e) => return ImportOutcome::failed(&image.image.url, e),
                    }
                }
                self.import(doc, image, custom_name.as_deref())
                    .await
                    .unwrap_or_else(|e| ImportOutcome::failed(&image.image.url, e))
            }
        }
    }

    async fn reuse(&self, image: &ScannedImage, id: AssetId) -> Result<Option<ImportOutcome>, Error> {
        let Some(asset) = self.library.get(id).await? else {
            return Ok(None);
        };
        debug!(asset = %id, url = %image.image.url, "reusing existing asset");
        Ok(Some(ImportOutcome::Reused {
            old_url: image.image.url.clone(),
            asset_id: id,
            replacement: rewrite_fragment(&image.image.fragment, &asset.url, None),
            new_url: asset.url,
            fragment: image.image.fragment.clone(),
        }))
    }

    async fn import(&self, doc: DocId, image: &ScannedImage, custom: Option<&str>) -> Result<ImportOutcome, Error> {
        let reference = &image.image;
        let bytes = self.fetcher.fetch(&reference.url).await?;
        let measured = measure_blocking(bytes.clone()).await?;
        let fp = measured.fingerprint;

        let _gate = self.index.gate(fp).await;
        if let Some(id) = self.index.lookup(fp).await {
            if let Some(outcome) = self.reuse(image, id).await? {
                return Ok(outcome);
            }
        }

        let (width, height) = reference.declared_size().unwrap_or((measured.width, measured.height));
        let mut asset = self
            .library
            .store(NewAsset {
                stem: choose_filename(custom, &reference.alt_text),
                extension: normalize_extension(&reference.extension),
                bytes,
                width: Some(width),
                height: Some(height),
                alt_text: reference.alt_text.clone(),
                source_url: reference.url.clone(),
                doc: Some(doc),
            })
            .await?;
        if let Err(e) = self.index.record(fp, asset.id).await {
            warn!(asset = %asset.id, fingerprint = %fp, error = %e, "could not persist fingerprint");
        }
        asset.fingerprint = Some(fp);
        info!(%doc, asset = %asset.id, fingerprint = %fp, file = %asset.file_name, "imported image");

        Ok(ImportOutcome::Imported {
            old_url: reference.url.clone(),
            replacement: rewrite_fragment(&reference.fragment, &asset.url, Some((width, height))),
            fragment: reference.fragment.clone(),
            asset,
        })
    }

    /// Runs every step against one document and applies the successful rewrites.
    /// Returns the new content and the outcomes in step order.
    pub async fn execute_document(
        &self,
        doc: DocId,
        content: &str,
        steps: Vec<Step>,
    ) -> (String, Vec<(usize, ImportOutcome)>) {
        let mut outcomes: Vec<Option<ImportOutcome>> = vec![None; steps.len()];
        let sem = Arc::new(Semaphore::new(self.concurrency));
        let mut joinset = JoinSet::new();

        for (slot, step) in steps.iter().enumerate() {
            if !content.contains(step.image.image.fragment.as_str()) {
                outcomes[slot] = Some(ImportOutcome::failed(
                    &step.image.image.url,
                    "image tag no longer present in document, rescan first",
                ));
                continue;
            }
            let sem = sem.clone();
            let executor = self.clone();
            let step = step.clone();
            joinset.spawn(async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    return (slot, ImportOutcome::failed(&step.image.image.url, "executor shut down"));
                };
                (slot, executor.execute(doc, &step).await)
            });
        }

        while let Some(res) = joinset.join_next().await {
            match res {
                Ok((slot, outcome)) => outcomes[slot] = Some(outcome),
                Err(e) => warn!(%doc, error = %e, "import task failed"),
            }
        }

        let mut text = content.to_string();
        let mut done = Vec::with_capacity(steps.len());
        for (step, outcome) in steps.iter().zip(outcomes) {
            let outcome = outcome.unwrap_or_else(|| ImportOutcome::failed(&step.image.image.url, "import task failed"));
            if let Some((fragment, replacement)) = outcome.rewrite() {
                let (next, hits) = replace_fragment(&text, fragment, replacement);
                if hits == 0 {
                    debug!(%doc, index = step.index, "fragment already rewritten");
                }
                text = next;
            }
            done.push((step.index, outcome));
        }
        (text, done)
    }
}
