use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Result, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// One published volume/number of the journal, in archive order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub archive_url: String,
    pub publication_date: Option<String>,
}

impl Issue {
    /// Four-digit publication year, if the date carries one.
    pub fn year(&self) -> Option<String> {
        let date = self.publication_date.as_deref()?;
        let pattern = Regex::new(r"\b(?:19|20)\d{2}\b").ok()?;
        pattern.find(date).map(|found| found.as_str().to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRef {
    pub issue_id: String,
    pub title: String,
    pub subtitle: Option<String>,
    pub section: Option<String>,
    pub authors: Vec<String>,
    pub page_range: Option<String>,
    pub pdf_url: String,
    #[serde(default)]
    pub article_url: Option<String>,
}

impl ArticleRef {
    pub fn key(&self) -> ArticleKey {
        ArticleKey {
            issue_id: self.issue_id.clone(),
            pdf_url: self.pdf_url.clone(),
        }
    }
}

/// Unique identity of an article: `(issue_id, pdf_url)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArticleKey {
    pub issue_id: String,
    pub pdf_url: String,
}

impl ArticleKey {
    pub fn parse(raw: &str) -> Result<Self> {
        let Some((issue_id, pdf_url)) = raw.split_once('|') else {
            bail!("article key must look like <ISSUE_ID>|<PDF_URL>, got '{raw}'");
        };
        let issue_id = issue_id.trim();
        let pdf_url = pdf_url.trim();
        if issue_id.is_empty() || pdf_url.is_empty() {
            bail!("article key has an empty component: '{raw}'");
        }

        Ok(Self {
            issue_id: issue_id.to_string(),
            pdf_url: pdf_url.to_string(),
        })
    }
}

impl fmt::Display for ArticleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.issue_id, self.pdf_url)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedIssue {
    pub issue: Issue,
    #[serde(default)]
    pub articles: Option<Vec<ArticleRef>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueIndexManifest {
    pub manifest_version: u32,
    pub generated_at: String,
    pub archive_url: String,
    pub issue_count: usize,
    pub issues: Vec<IndexedIssue>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub processed: u64,
    pub skipped: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolVersions {
    pub pdftotext: Option<String>,
    pub pdfinfo: Option<String>,
    pub pdftoppm: Option<String>,
    pub tesseract: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarvestPaths {
    pub output_dir: String,
    pub corpus_path: String,
    pub pdf_dir: String,
    pub progress_db_path: String,
    pub index_manifest_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarvestRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub failure_reason: Option<String>,
    pub command: String,
    pub tool_versions: ToolVersions,
    pub paths: HarvestPaths,
    pub issues_visited: usize,
    pub run_counts: OutcomeCounts,
    pub total_counts: OutcomeCounts,
    pub skip_reasons: BTreeMap<String, u64>,
    pub failure_reasons: BTreeMap<String, u64>,
    pub warnings: Vec<String>,
}
