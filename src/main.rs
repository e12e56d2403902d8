use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use rehost::config::ImporterCfg;
use rehost::db::{self, SqlStore};
use rehost::documents::DirDocuments;
use rehost::library::DirLibrary;
use rehost::outcome::truncate_url;
use rehost::{BatchReport, DocId, HostServices, HttpFetcher, ImportOutcome, Importer, OutcomeKey, OutcomeKind, ScanResult};

const URL_WIDTH: usize = 50;

#[derive(Parser)]
#[command(name = "rehost", version, about = "Import externally hosted images into the local library")]
struct Cli {
    /// Config file (YAML). Falls back to $REHOST_CONFIG, then rehost.yaml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan every document and store the result.
    Scan,
    /// Import or reuse every scanned image of one document.
    Import {
        #[arg(long)]
        doc: DocId,
        /// INDEX=NAME
        #[arg(long = "name", value_parser = parse_index_name)]
        names: Vec<(usize, String)>,
    },
    /// Import every scanned document.
    ImportAll {
        /// DOC:INDEX=NAME
        #[arg(long = "name", value_parser = parse_doc_index_name)]
        names: Vec<((DocId, usize), String)>,
    },
    /// Import one scanned image.
    ImportOne {
        #[arg(long)]
        doc: DocId,
        #[arg(long)]
        index: usize,
        #[arg(long)]
        name: Option<String>,
    },
    /// Point one scanned image at the asset it matched.
    Relink {
        #[arg(long)]
        doc: DocId,
        #[arg(long)]
        index: usize,
    },
    /// Print and discard a stored outcome record.
    Results {
        #[arg(long)]
        doc: DocId,
        #[arg(long, value_enum, default_value_t = Kind::Batch)]
        kind: Kind,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Batch,
    Single,
    Update,
}

impl From<Kind> for OutcomeKind {
    fn from(k: Kind) -> Self {
        match k {
            Kind::Batch => OutcomeKind::Batch,
            Kind::Single => OutcomeKind::Single,
            Kind::Update => OutcomeKind::Update,
        }
    }
}

fn parse_index_name(s: &str) -> Result<(usize, String), String> {
    let (index, name) = s.split_once('=').ok_or("expected INDEX=NAME")?;
    let index = index.trim().parse().map_err(|_| format!("bad image index {index:?}"))?;
    Ok((index, name.to_string()))
}

fn parse_doc_index_name(s: &str) -> Result<((DocId, usize), String), String> {
    let (doc, rest) = s.split_once(':').ok_or("expected DOC:INDEX=NAME")?;
    let doc: DocId = doc.parse().map_err(|e: rehost::Error| e.to_string())?;
    let (index, name) = parse_index_name(rest)?;
    Ok(((doc, index), name))
}

fn config_path(cli: &Cli) -> PathBuf {
    cli.config
        .clone()
        .or_else(|| std::env::var_os("REHOST_CONFIG").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("rehost.yaml"))
}

async fn build(cfg: &ImporterCfg) -> Result<Importer> {
    let site = &cfg.site;
    if let Some(path) = site.database_url.strip_prefix("sqlite://") {
        if let Some(parent) = PathBuf::from(path).parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.ok();
        }
    }
    let pool = db::connect(&site.database_url)
        .await
        .with_context(|| format!("opening database {}", site.database_url))?;
    let store = Arc::new(SqlStore::new(pool, Duration::from_secs(cfg.outcome_ttl_secs)));

    let host = HostServices {
        documents: Arc::new(DirDocuments::open(&site.documents_dir).await.context("opening documents")?),
        library: Arc::new(
            DirLibrary::open(&site.library_dir, site.library_base_url.clone())
                .await
                .context("opening library")?,
        ),
        fetcher: Arc::new(HttpFetcher::new(&cfg.fetch)?),
        state: store.clone(),
        outcomes: store,
    };
    Ok(Importer::new(host, cfg).await?)
}

fn print_scan(scan: &ScanResult) {
    println!("scan {} at {}", scan.scan_id, scan.scanned_at.format("%Y-%m-%d %H:%M:%S"));
    for doc in &scan.documents {
        println!("document {}", doc.doc);
        for (i, img) in doc.images.iter().enumerate() {
            let fp = img.fingerprint.map(|f| f.to_hex()).unwrap_or_else(|| "-".repeat(16));
            let matched = img.matched_asset.map(|a| format!("asset {a}")).unwrap_or_else(|| "new".into());
            println!(
                "  {i:>3}  {fp}  {:<width$}  {}.{}  {matched}",
                truncate_url(&img.image.url, URL_WIDTH),
                img.image.filename,
                img.image.extension,
                width = URL_WIDTH,
            );
        }
    }
    println!(
        "{} images in {} documents, {} already in the library",
        scan.image_count(),
        scan.documents.len(),
        scan.matched_count()
    );
}

fn print_report(report: &BatchReport) {
    for item in &report.items {
        let (url, detail) = match &item.outcome {
            ImportOutcome::Imported { old_url, asset, .. } => (old_url, format!("asset {} {}", asset.id, asset.url)),
            ImportOutcome::Reused { old_url, asset_id, new_url, .. } => (old_url, format!("asset {asset_id} {new_url}")),
            ImportOutcome::Failed { url, reason } => (url, reason.clone()),
        };
        println!(
            "  doc {:>5} #{:<3} {:<8} {:<width$}  {detail}",
            item.doc,
            item.index,
            item.outcome.kind(),
            truncate_url(url, URL_WIDTH),
            width = URL_WIDTH,
        );
    }
    println!("imported {}, reused {}, failed {}", report.imported, report.reused, report.failed);
}

fn spinner(msg: &'static str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg} [{elapsed}]") {
        pb.set_style(style);
    }
    pb.set_message(msg);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rehost=info")))
        .init();

    let cli = Cli::parse();
    let cfg = ImporterCfg::load(&config_path(&cli)).await?;
    let importer = build(&cfg).await?;

    match cli.command {
        Command::Scan => {
            let pb = spinner("scanning documents");
            let scan = importer.scan().await;
            pb.finish_and_clear();
            print_scan(&scan?);
        }
        Command::Import { doc, names } => {
            let names: HashMap<usize, String> = names.into_iter().collect();
            let pb = spinner("importing");
            let report = importer.import_document(doc, &names).await;
            pb.finish_and_clear();
            let report = report?;
            if report.is_empty() {
                println!("document {doc} has no scanned images, run `rehost scan` first");
            }
            print_report(&report);
        }
        Command::ImportAll { names } => {
            let names: HashMap<(DocId, usize), String> = names.into_iter().collect();
            let pb = spinner("importing all documents");
            let report = importer.import_all(&names).await;
            pb.finish_and_clear();
            print_report(&report?);
        }
        Command::ImportOne { doc, index, name } => {
            print_report(&importer.import_image(doc, index, name).await?);
        }
        Command::Relink { doc, index } => {
            print_report(&importer.relink_image(doc, index).await?);
        }
        Command::Results { doc, kind } => {
            let key = OutcomeKey::new(kind.into(), doc);
            match importer.take_report(key).await? {
                Some(report) => print_report(&report),
                None => bail!("no stored results for {key} (expired or already read)"),
            }
        }
    }
    Ok(())
}
