use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{AssetId, AssetRecord, DocId};

/// What happened to one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ImportOutcome {
    Imported {
        old_url: String,
        asset: AssetRecord,
        fragment: String,
        replacement: String,
    },
    Reused {
        old_url: String,
        asset_id: AssetId,
        new_url: String,
        fragment: String,
        replacement: String,
    },
    Failed {
        url: String,
        reason: String,
    },
}

impl ImportOutcome {
    pub fn failed(url: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Failed { url: url.into(), reason: reason.to_string() }
    }

    /// Fragment to replace and its replacement, for outcomes that rewrite the document.
    pub fn rewrite(&self) -> Option<(&str, &str)> {
        match self {
            Self::Imported { fragment, replacement, .. } | Self::Reused { fragment, replacement, .. } => {
                Some((fragment, replacement))
            }
            Self::Failed { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Imported { .. } => "imported",
            Self::Reused { .. } => "reused",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Outcomes of one batch with aggregate counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub imported: usize,
    pub reused: usize,
    pub failed: usize,
    pub items: Vec<ReportItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportItem {
    pub doc: DocId,
    pub index: usize,
    pub outcome: ImportOutcome,
}

impl BatchReport {
    pub fn push(&mut self, doc: DocId, index: usize, outcome: ImportOutcome) {
        match outcome {
            ImportOutcome::Imported { .. } => self.imported += 1,
            ImportOutcome::Reused { .. } => self.reused += 1,
            ImportOutcome::Failed { .. } => self.failed += 1,
        }
        self.items.push(ReportItem { doc, index, outcome });
    }

    pub fn merge(&mut self, other: BatchReport) {
        self.imported += other.imported;
        self.reused += other.reused;
        self.failed += other.failed;
        self.items.extend(other.items);
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.items.iter().filter_map(|item| match &item.outcome {
            ImportOutcome::Failed { url, reason } => Some((url.as_str(), reason.as_str())),
            _ => None,
        })
    }

    pub fn outcomes(&self) -> impl Iterator<Item = &ImportOutcome> {
        self.items.iter().map(|i| &i.outcome)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Batch,
    Single,
    Update,
}

/// Key of a stored outcome record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutcomeKey {
    pub kind: OutcomeKind,
    pub doc: DocId,
}

impl OutcomeKey {
    pub fn new(kind: OutcomeKind, doc: DocId) -> Self {
        Self { kind, doc }
    }
}

impl fmt::Display for OutcomeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.kind {
            OutcomeKind::Batch => "import_results",
            OutcomeKind::Single => "import_results_single",
            OutcomeKind::Update => "update_results_single",
        };
        write!(f, "{prefix}_{}", self.doc)
    }
}

/// Shortens a URL for tables: first host label, `/.../`, last path segment.
pub fn truncate_url(url: &str, max_len: usize) -> String {
    let Ok(parsed) = url::Url::parse(url) else {
        return url.to_string();
    };
    let host = parsed.host_str().unwrap_or("");
    let short_host = host.split('.').next().unwrap_or(host);
    let last = parsed
        .path()
        .trim_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("")
        .to_string();

    let short = format!("{short_host}/.../{last}");
    if short.chars().count() <= max_len {
        return short;
    }
    let keep = max_len.saturating_sub(short_host.chars().count() + 6) / 2;
    let chars: Vec<char> = last.chars().collect();
    let head: String = chars.iter().take(keep).collect();
    let tail: String = chars[chars.len().saturating_sub(keep)..].iter().collect();
    format!("{short_host}/.../{head}...{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_follow_pushes() {
        let mut report = BatchReport::default();
        report.push(DocId(1), 0, ImportOutcome::failed("u1", "boom"));
        report.push(
            DocId(1),
            1,
            ImportOutcome::Reused {
                old_url: "u2".into(),
                asset_id: AssetId(3),
                new_url: "/x.jpg".into(),
                fragment: "<img>".into(),
                replacement: "<img src>".into(),
            },
        );
        let mut other = BatchReport::default();
        other.push(DocId(2), 0, ImportOutcome::failed("u3", "bad"));
        report.merge(other);

        assert_eq!((report.imported, report.reused, report.failed), (0, 1, 2));
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures, [("u1", "boom"), ("u3", "bad")]);
    }

    #[test]
    fn serialized_outcomes_are_tagged() {
        let json = serde_json::to_value(ImportOutcome::failed("u", "nope")).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["reason"], "nope");
    }

    #[test]
    fn keys_render_per_kind() {
        assert_eq!(OutcomeKey::new(OutcomeKind::Batch, DocId(5)).to_string(), "import_results_5");
        assert_eq!(OutcomeKey::new(OutcomeKind::Update, DocId(5)).to_string(), "update_results_single_5");
    }

    #[test]
    fn truncates_long_urls() {
        assert_eq!(
            truncate_url("https://lh7-rt.googleusercontent.com/docsz/AD_4nX/short", 50),
            "lh7-rt/.../short"
        );
        let long = format!("https://lh3.googleusercontent.com/{}", "a".repeat(40) + &"b".repeat(40));
        let out = truncate_url(&long, 50);
        assert!(out.starts_with("lh3/.../aaaa"));
        assert!(out.contains("..."));
        assert!(out.ends_with("bbbb"));
        assert!(out.chars().count() <= 50);
    }
}
