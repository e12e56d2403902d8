use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::fingerprint::{measure_blocking, Fingerprint};
use crate::library::{AssetLibrary, FINGERPRINT_META_KEY};
use crate::model::AssetId;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub hashed: usize,
    pub already_known: usize,
    pub skipped: usize,
}

/// Held while importing one fingerprint.
pub struct Gate<'a> {
    index: &'a FingerprintIndex,
    fp: Fingerprint,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for Gate<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut gates = self.index.gates.lock();
        // only the table's own reference left: nobody holds or waits on it
        if gates.get(&self.fp).is_some_and(|g| Arc::strong_count(g) == 1) {
            gates.remove(&self.fp);
        }
    }
}

/// Fingerprint to asset association, persisted as per-asset metadata in the library.
///
/// Lookups are served from memory. Importers serialize on [`FingerprintIndex::gate`]
/// so a lookup followed by a record for the same fingerprint cannot interleave with
/// another import of that fingerprint.
pub struct FingerprintIndex {
    library: Arc<dyn AssetLibrary>,
    map: RwLock<HashMap<Fingerprint, AssetId>>,
    gates: parking_lot::Mutex<HashMap<Fingerprint, Arc<Mutex<()>>>>,
}

impl FingerprintIndex {
    /// Loads associations already stored on assets. With several assets per
    /// fingerprint the lowest id wins.
    pub async fn load(library: Arc<dyn AssetLibrary>) -> Result<Self, StorageError> {
        let mut map = HashMap::new();
        for asset in library.assets().await? {
            if let Some(fp) = asset.fingerprint {
                map.entry(fp).or_insert(asset.id);
            }
        }
        debug!(entries = map.len(), "fingerprint index loaded");
        Ok(Self { library, map: RwLock::new(map), gates: Default::default() })
    }

    pub async fn lookup(&self, fp: Fingerprint) -> Option<AssetId> {
        self.map.read().await.get(&fp).copied()
    }

    /// Associates `fp` with `id` and writes it to the asset's metadata. The in-memory
    /// entry is kept even when the write fails.
    pub async fn record(&self, fp: Fingerprint, id: AssetId) -> Result<(), StorageError> {
        self.map.write().await.insert(fp, id);
        self.library.set_meta(id, FINGERPRINT_META_KEY, &fp.to_hex()).await
    }

    pub async fn len(&self) -> usize {
        self.map.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.map.read().await.is_empty()
    }

    /// Exclusive section for one fingerprint. Hold the guard across lookup, persist
    /// and record. The gate is discarded when its last holder or waiter is gone, so
    /// the table only holds fingerprints with an import in flight.
    pub async fn gate(&self, fp: Fingerprint) -> Gate<'_> {
        let gate = self.gates.lock().entry(fp).or_default().clone();
        Gate { index: self, fp, guard: Some(gate.lock_owned().await) }
    }

    #[cfg(test)]
    fn open_gates(&self) -> usize {
        self.gates.lock().len()
    }

    /// Hashes every library asset that has no fingerprint yet. Assets whose bytes
    /// are missing or undecodable are skipped.
    pub async fn backfill(&self) -> Result<BackfillReport, StorageError> {
        let mut report = BackfillReport::default();
        for asset in self.library.assets().await? {
            if asset.fingerprint.is_some() {
                report.already_known += 1;
                continue;
            }
            let bytes = match self.library.read(asset.id).await {
                Ok(b) => b,
                Err(e) => {
                    warn!(asset = %asset.id, error = %e, "backfill: cannot read asset, skipping");
                    report.skipped += 1;
                    continue;
                }
            };
            let fp = match measure_blocking(bytes).await {
                Ok(m) => m.fingerprint,
                Err(e) => {
                    warn!(asset = %asset.id, error = %e, "backfill: cannot decode asset, skipping");
                    report.skipped += 1;
                    continue;
                }
            };
            self.map.write().await.entry(fp).or_insert(asset.id);
            if let Err(e) = self.library.set_meta(asset.id, FINGERPRINT_META_KEY, &fp.to_hex()).await {
                warn!(asset = %asset.id, error = %e, "backfill: cannot store fingerprint");
            }
            report.hashed += 1;
        }
        info!(
            hashed = report.hashed,
            known = report.already_known,
            skipped = report.skipped,
            "backfill finished"
        );
        Ok(report)
    }
}
