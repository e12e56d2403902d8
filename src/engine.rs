use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::config::ImporterCfg;
use crate::documents::DocumentStore;
use crate::error::{Error, Result};
use crate::executor::{Executor, Mode, Step};
use crate::fetch::Fetcher;
use crate::index::{BackfillReport, FingerprintIndex};
use crate::library::AssetLibrary;
use crate::locator::Locator;
use crate::model::{DocId, DocumentScan, ScanResult};
use crate::outcome::{BatchReport, ImportOutcome, OutcomeKey, OutcomeKind};
use crate::resolver::Resolver;
use crate::store::{OutcomeStore, StateStore};

/// What the host provides to the importer.
pub struct HostServices {
    pub documents: Arc<dyn DocumentStore>,
    pub library: Arc<dyn AssetLibrary>,
    pub fetcher: Arc<dyn Fetcher>,
    pub state: Arc<dyn StateStore>,
    pub outcomes: Arc<dyn OutcomeStore>,
}

/// Scans documents for externally hosted images and imports or relinks them.
pub struct Importer {
    locator: Locator,
    documents: Arc<dyn DocumentStore>,
    state: Arc<dyn StateStore>,
    outcomes: Arc<dyn OutcomeStore>,
    index: Arc<FingerprintIndex>,
    resolver: Resolver,
    executor: Executor,
    backfill: Mutex<()>,
}

impl Importer {
    pub async fn new(host: HostServices, cfg: &ImporterCfg) -> Result<Self> {
        let index = Arc::new(FingerprintIndex::load(host.library.clone()).await?);
        let known = index.len().await;
        info!(fetcher = host.fetcher.name(), known, "importer ready");
        Ok(Self {
            locator: Locator::new(cfg.host_marker.clone()),
            resolver: Resolver::new(host.fetcher.clone(), index.clone(), cfg.concurrency),
            executor: Executor::new(host.fetcher, host.library, index.clone(), cfg.concurrency),
            documents: host.documents,
            state: host.state,
            outcomes: host.outcomes,
            index,
            backfill: Mutex::new(()),
        })
    }

    pub fn index(&self) -> &FingerprintIndex {
        &self.index
    }

    /// Hashes pre-existing assets the first time it is called against a state store.
    /// Returns `None` when that already happened.
    pub async fn ensure_backfill(&self) -> Result<Option<BackfillReport>> {
        let _guard = self.backfill.lock().await;
        if self.state.backfill_completed().await? {
            return Ok(None);
        }
        let report = self.index.backfill().await?;
        self.state.mark_backfill_completed().await?;
        Ok(Some(report))
    }

    /// Scans every document, keeps those with external images, and stores the
    /// result as the latest scan. Documents that cannot be loaded are logged and left out.
    #[instrument(skip(self))]
    pub async fn scan(&self) -> Result<ScanResult> {
        self.ensure_backfill().await?;
        let mut documents = Vec::new();
        for doc in self.documents.ids().await? {
            match self.scan_document(doc).await {
                Ok(scanned) if !scanned.images.is_empty() => documents.push(scanned),
                Ok(_) => {}
                Err(e) => warn!(%doc, error = %e, "skipping document"),
            }
        }
        let result = ScanResult::new(documents);
        self.state.save_scan(&result).await?;
        info!(
            documents = result.documents.len(),
            images = result.image_count(),
            matched = result.matched_count(),
            "scan finished"
        );
        Ok(result)
    }

    pub async fn scan_document(&self, doc: DocId) -> Result<DocumentScan> {
        let content = self.load_document(doc).await?;
        let images: Vec<_> = self.locator.images(&content).collect();
        debug!(%doc, found = images.len(), "located external images");
        let images = self.resolver.resolve_all(images).await;
        Ok(DocumentScan { doc, images })
    }

    pub async fn latest_scan(&self) -> Result<Option<ScanResult>> {
        Ok(self.state.load_scan().await?)
    }

    /// Imports or relinks every scanned image of `doc`. `names` maps image index to a
    /// custom file name.
    pub async fn import_document(&self, doc: DocId, names: &HashMap<usize, String>) -> Result<BatchReport> {
        self.ensure_backfill().await?;
        let scan = self.latest_scan().await?;
        let Some(scanned) = scan.as_ref().and_then(|s| s.document(doc)) else {
            debug!(%doc, "document not in latest scan");
            return Ok(BatchReport::default());
        };
        let steps = scanned
            .images
            .iter()
            .enumerate()
            .map(|(index, image)| Step {
                index,
                image: image.clone(),
                mode: Mode::Import { custom_name: names.get(&index).cloned() },
            })
            .collect();
        self.run(doc, steps, OutcomeKind::Batch).await
    }

    /// [`Importer::import_document`] for every document of the latest scan. When a
    /// document fails as a whole, each of its images is reported as failed and the
    /// remaining documents still run.
    pub async fn import_all(&self, names: &HashMap<(DocId, usize), String>) -> Result<BatchReport> {
        let Some(scan) = self.latest_scan().await? else {
            return Ok(BatchReport::default());
        };
        let mut total = BatchReport::default();
        for scanned in &scan.documents {
            let doc_names: HashMap<usize, String> = names
                .iter()
                .filter(|((d, _), _)| *d == scanned.doc)
                .map(|((_, i), n)| (*i, n.clone()))
                .collect();
            match self.import_document(scanned.doc, &doc_names).await {
                Ok(report) => total.merge(report),
                Err(e) => {
                    warn!(doc = %scanned.doc, error = %e, "document import failed");
                    for (index, image) in scanned.images.iter().enumerate() {
                        total.push(scanned.doc, index, ImportOutcome::failed(&image.image.url, &e));
                    }
                }
            }
        }
        info!(imported = total.imported, reused = total.reused, failed = total.failed, "import-all finished");
        Ok(total)
    }

    pub async fn import_image(&self, doc: DocId, index: usize, custom_name: Option<String>) -> Result<BatchReport> {
        self.ensure_backfill().await?;
        let step = self.step(doc, index, Mode::Import { custom_name }).await?;
        self.run(doc, vec![step], OutcomeKind::Single).await
    }

    /// Points one scanned image at the asset it matched.
    pub async fn relink_image(&self, doc: DocId, index: usize) -> Result<BatchReport> {
        let step = self.step(doc, index, Mode::Relink).await?;
        if step.image.matched_asset.is_none() {
            return Err(Error::InvalidInput(format!(
                "image {index} of document {doc} does not match a stored asset"
            )));
        }
        self.run(doc, vec![step], OutcomeKind::Update).await
    }

    /// Consumes a stored outcome record.
    pub async fn take_report(&self, key: OutcomeKey) -> Result<Option<BatchReport>> {
        Ok(self.outcomes.take(key).await?)
    }

    async fn step(&self, doc: DocId, index: usize, mode: Mode) -> Result<Step> {
        let scan = self.latest_scan().await?;
        let image = scan
            .as_ref()
            .and_then(|s| s.document(doc))
            .and_then(|d| d.images.get(index))
            .cloned()
            .ok_or_else(|| Error::InvalidInput(format!("no scanned image {index} in document {doc}")))?;
        Ok(Step { index, image, mode })
    }

    async fn load_document(&self, doc: DocId) -> Result<String> {
        self.documents
            .load(doc)
            .await?
            .ok_or_else(|| Error::InvalidInput(format!("document {doc} does not exist")))
    }

    #[instrument(skip(self, steps), fields(images = steps.len()))]
    async fn run(&self, doc: DocId, steps: Vec<Step>, kind: OutcomeKind) -> Result<BatchReport> {
        let content = self.load_document(doc).await?;
        let (updated, outcomes) = self.executor.execute_document(doc, &content, steps).await;

        if updated != content {
            self.documents.save(doc, &updated).await?;
            debug!(%doc, "document saved");
        }

        let mut report = BatchReport::default();
        for (index, outcome) in outcomes {
            report.push(doc, index, outcome);
        }
        self.outcomes.put(OutcomeKey::new(kind, doc), &report).await?;
        info!(
            %doc,
            imported = report.imported,
            reused = report.reused,
            failed = report.failed,
            "document processed"
        );
        Ok(report)
    }
}
