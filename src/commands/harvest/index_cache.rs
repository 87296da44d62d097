use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::model::{ArticleRef, IndexedIssue, Issue, IssueIndexManifest};
use crate::util::{now_utc_string, write_json_pretty};

const INDEX_MANIFEST_VERSION: u32 = 1;

/// Discovery results kept on disk between runs.
pub struct IndexCache {
    path: PathBuf,
    manifest: IssueIndexManifest,
}

impl IndexCache {
    pub fn load(path: &Path, archive_url: &str) -> Result<Self> {
        let manifest = if path.exists() {
            let raw = fs::read(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            match serde_json::from_slice::<IssueIndexManifest>(&raw) {
                Ok(manifest) if manifest.archive_url == archive_url => {
                    info!(
                        path = %path.display(),
                        issues = manifest.issue_count,
                        generated_at = %manifest.generated_at,
                        "loaded issue index cache"
                    );
                    manifest
                }
                Ok(manifest) => {
                    warn!(
                        path = %path.display(),
                        cached_archive = %manifest.archive_url,
                        "issue index cache belongs to another archive, ignoring"
                    );
                    empty_manifest(archive_url)
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "unreadable issue index cache, ignoring");
                    empty_manifest(archive_url)
                }
            }
        } else {
            empty_manifest(archive_url)
        };

        Ok(Self {
            path: path.to_path_buf(),
            manifest,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn issues(&self) -> Option<Vec<Issue>> {
        if self.manifest.issues.is_empty() {
            return None;
        }
        Some(
            self.manifest
                .issues
                .iter()
                .map(|entry| entry.issue.clone())
                .collect(),
        )
    }

    /// Cached issue (with any date learned from its page) and its articles.
    pub fn articles_for(&self, issue_id: &str) -> Option<(Issue, Vec<ArticleRef>)> {
        self.manifest
            .issues
            .iter()
            .find(|entry| entry.issue.id == issue_id)
            .and_then(|entry| {
                entry
                    .articles
                    .clone()
                    .map(|articles| (entry.issue.clone(), articles))
            })
    }

    /// Replaces the issue list, keeping article lists already known for
    /// issues that are still present.
    pub fn store_issues(&mut self, issues: &[Issue]) -> Result<()> {
        let entries = issues
            .iter()
            .map(|issue| {
                let articles = self
                    .manifest
                    .issues
                    .iter()
                    .find(|entry| entry.issue.id == issue.id)
                    .and_then(|entry| entry.articles.clone());
                IndexedIssue {
                    issue: issue.clone(),
                    articles,
                }
            })
            .collect::<Vec<IndexedIssue>>();

        self.manifest.issues = entries;
        self.persist()
    }

    pub fn store_articles(&mut self, issue: &Issue, articles: &[ArticleRef]) -> Result<()> {
        match self
            .manifest
            .issues
            .iter_mut()
            .find(|entry| entry.issue.id == issue.id)
        {
            Some(entry) => {
                entry.issue = issue.clone();
                entry.articles = Some(articles.to_vec());
            }
            None => self.manifest.issues.push(IndexedIssue {
                issue: issue.clone(),
                articles: Some(articles.to_vec()),
            }),
        }
        self.persist()
    }

    pub fn manifest(&self) -> &IssueIndexManifest {
        &self.manifest
    }

    fn persist(&mut self) -> Result<()> {
        self.manifest.generated_at = now_utc_string();
        self.manifest.issue_count = self.manifest.issues.len();
        write_json_pretty(&self.path, &self.manifest)
    }
}

fn empty_manifest(archive_url: &str) -> IssueIndexManifest {
    IssueIndexManifest {
        manifest_version: INDEX_MANIFEST_VERSION,
        generated_at: now_utc_string(),
        archive_url: archive_url.to_string(),
        issue_count: 0,
        issues: Vec::new(),
    }
}
