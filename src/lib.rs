//! Finds externally hosted images in HTML documents, fingerprints them with an
//! 8x8 average hash, and imports each into a local asset library unless an asset
//! with the same fingerprint is already there.

pub mod backoff;
pub mod config;
pub mod db;
pub mod documents;
pub mod engine;
pub mod error;
pub mod executor;
pub mod fetch;
pub mod fingerprint;
pub mod index;
pub mod library;
pub mod locator;
pub mod model;
pub mod outcome;
pub mod resolver;
pub mod rewrite;
pub mod store;

pub use config::ImporterCfg;
pub use engine::{HostServices, Importer};
pub use error::{Error, Result, StorageError};
pub use fetch::{FetchError, Fetcher, HttpFetcher, MockFetcher};
pub use fingerprint::{fingerprint, Fingerprint};
pub use index::{BackfillReport, FingerprintIndex};
pub use locator::{ImageReference, Locator};
pub use model::{AssetId, AssetRecord, DocId, ScanResult};
pub use outcome::{BatchReport, ImportOutcome, OutcomeKey, OutcomeKind};
pub use resolver::Decision;
