use std::collections::BTreeMap;
use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{debug, error, info, warn};

use super::corpus::CorpusWriter;
use super::index_cache::IndexCache;
use super::indexer::{IssueIndexer, IssueListing};
use super::processor::{ArticleOutcome, ArticleProcessor};
use super::progress::{ArticleStatus, OutcomeRow, ProgressRecord, ProgressStore};
use crate::model::{ArticleKey, ArticleRef, Issue, OutcomeCounts};
use crate::util::sha256_file;

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub limit_issues: Option<usize>,
    /// Applied per issue.
    pub limit_articles: Option<usize>,
    pub save_interval: u32,
    pub resume_from: Option<ArticleKey>,
    pub article_delay: Duration,
    pub refresh_index: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub issues_visited: usize,
    pub run_counts: OutcomeCounts,
    pub total_counts: OutcomeCounts,
    pub skip_reasons: BTreeMap<String, u64>,
    pub failure_reasons: BTreeMap<String, u64>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum StartPoint {
    Beginning,
    /// Explicit `--resume-from`: this article is processed again.
    At(ArticleKey),
    /// Checkpoint: continue with the article after this one.
    After(ArticleKey),
}

/// Owns the progress record and the corpus for the length of a run and
/// walks issues and articles in archive order.
pub struct PipelineRunner<'a> {
    indexer: IssueIndexer<'a>,
    cache: IndexCache,
    processor: ArticleProcessor,
    store: ProgressStore,
    settings: RunSettings,
    warnings: Vec<String>,
}

impl<'a> PipelineRunner<'a> {
    pub fn new(
        indexer: IssueIndexer<'a>,
        cache: IndexCache,
        processor: ArticleProcessor,
        store: ProgressStore,
        settings: RunSettings,
    ) -> Self {
        Self {
            indexer,
            cache,
            processor,
            store,
            settings,
            warnings: Vec::new(),
        }
    }

    pub fn run(&mut self, corpus_path: &Path) -> Result<RunSummary> {
        let mut record = self.store.load()?.unwrap_or_default();
        let mut corpus = CorpusWriter::open(corpus_path, record.output_file_offset)?;
        let mut done_keys = self.store.done_keys()?;
        info!(
            processed = record.counts.processed,
            skipped = record.counts.skipped,
            failed = record.counts.failed,
            done_keys = done_keys.len(),
            "loaded progress"
        );

        let mut issues = self.discover_issues()?;
        if let Some(limit) = self.settings.limit_issues {
            issues.truncate(limit);
        }
        let (start_issue, start) = resolve_start(&issues, &record, self.settings.resume_from.as_ref())?;

        let mut summary = RunSummary::default();
        let mut pending = Vec::<OutcomeRow>::new();
        let mut done_since_checkpoint = 0u32;

        for (issue_index, issue) in issues.iter().enumerate().skip(start_issue) {
            let Some(listing) = self.discover_articles(issue) else {
                continue;
            };
            summary.issues_visited += 1;

            let visible = match self.settings.limit_articles {
                Some(limit) => &listing.articles[..limit.min(listing.articles.len())],
                None => &listing.articles[..],
            };
            // Position in the full listing; it may lie past `visible`.
            let first = if issue_index == start_issue {
                first_position(&listing.articles, &start)
            } else {
                0
            };
            info!(
                issue_id = %listing.issue.id,
                articles = visible.len(),
                starting_at = first,
                "processing issue"
            );

            for (article_index, article) in visible.iter().enumerate().skip(first) {
                let key = article.key();
                if done_keys.contains(&key) {
                    debug!(key = %key, "already in corpus, skipping");
                    continue;
                }

                let outcome = match self.processor.process(&listing.issue, article, article_index) {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        let err = anyhow::Error::new(err).context(format!("stopped at article {key}"));
                        return Err(self.abort(&mut corpus, &record, &mut pending, err));
                    }
                };
                let status = outcome.status();

                if let ArticleOutcome::Done { record: text, .. } = &outcome
                    && let Err(err) = corpus.append(text)
                {
                    let err = err.context(format!("corpus write failed at article {key}"));
                    return Err(self.abort(&mut corpus, &record, &mut pending, err));
                }

                pending.push(outcome_row(&key, &outcome));
                record = record.advance(issue_index, key.clone(), status, corpus.offset());
                tally(&mut summary, &outcome);

                if status == ArticleStatus::Done {
                    done_keys.insert(key);
                    done_since_checkpoint += 1;
                    if done_since_checkpoint >= self.settings.save_interval {
                        self.checkpoint(&mut corpus, &record, &mut pending)?;
                        done_since_checkpoint = 0;
                    }
                }

                if !self.settings.article_delay.is_zero() {
                    thread::sleep(self.settings.article_delay);
                }
            }
        }

        self.checkpoint(&mut corpus, &record, &mut pending)?;

        summary.total_counts = record.counts;
        summary.warnings = std::mem::take(&mut self.warnings);
        Ok(summary)
    }

    pub fn into_store(self) -> ProgressStore {
        self.store
    }

    fn checkpoint(
        &mut self,
        corpus: &mut CorpusWriter,
        record: &ProgressRecord,
        pending: &mut Vec<OutcomeRow>,
    ) -> Result<()> {
        corpus.sync()?;
        self.store
            .save(record, pending)
            .context("failed to save checkpoint")?;
        info!(
            outcomes = pending.len(),
            offset = record.output_file_offset,
            processed = record.counts.processed,
            skipped = record.counts.skipped,
            failed = record.counts.failed,
            "checkpoint saved"
        );
        pending.clear();
        Ok(())
    }

    /// Best-effort checkpoint before a fatal error ends the run.
    fn abort(
        &mut self,
        corpus: &mut CorpusWriter,
        record: &ProgressRecord,
        pending: &mut Vec<OutcomeRow>,
        err: anyhow::Error,
    ) -> anyhow::Error {
        error!(error = %format!("{err:#}"), "stopping run, saving checkpoint");
        if let Err(save_err) = self.checkpoint(corpus, record, pending) {
            error!(error = %save_err, "checkpoint after fatal error also failed");
        }
        err
    }

    fn discover_issues(&mut self) -> Result<Vec<Issue>> {
        if !self.settings.refresh_index
            && let Some(issues) = self.cache.issues()
        {
            info!(issues = issues.len(), "using cached issue index");
            return Ok(issues);
        }

        match self.indexer.list_issues() {
            Ok(issues) => {
                self.cache.store_issues(&issues)?;
                Ok(issues)
            }
            Err(err) => match self.cache.issues() {
                Some(issues) => {
                    warn!(error = %err, "issue discovery failed, falling back to cached index");
                    self.warnings
                        .push(format!("issue discovery failed, used cached index: {err}"));
                    Ok(issues)
                }
                None => Err(err).context("issue discovery failed and no cached index exists"),
            },
        }
    }

    /// Articles of one issue. Discovery errors with no cached fallback are
    /// logged and the issue is skipped.
    fn discover_articles(&mut self, issue: &Issue) -> Option<IssueListing> {
        if !self.settings.refresh_index
            && let Some((issue, articles)) = self.cache.articles_for(&issue.id)
        {
            debug!(issue_id = %issue.id, articles = articles.len(), "using cached article list");
            return Some(IssueListing { issue, articles });
        }

        match self.indexer.list_articles(issue) {
            Ok(listing) => {
                if let Err(err) = self.cache.store_articles(&listing.issue, &listing.articles) {
                    warn!(issue_id = %issue.id, error = %err, "failed to update index cache");
                }
                Some(listing)
            }
            Err(err) => {
                if let Some((issue, articles)) = self.cache.articles_for(&issue.id) {
                    warn!(issue_id = %issue.id, error = %err, "article discovery failed, using cached list");
                    self.warnings.push(format!(
                        "article discovery failed for issue {}, used cached list: {err}",
                        issue.id
                    ));
                    return Some(IssueListing { issue, articles });
                }
                error!(issue_id = %issue.id, error = %err, "article discovery failed, skipping issue");
                self.warnings
                    .push(format!("skipped issue {}: {err}", issue.id));
                None
            }
        }
    }
}

fn resolve_start(
    issues: &[Issue],
    record: &ProgressRecord,
    resume_from: Option<&ArticleKey>,
) -> Result<(usize, StartPoint)> {
    if let Some(key) = resume_from {
        let Some(issue_index) = issues.iter().position(|issue| issue.id == key.issue_id) else {
            bail!("--resume-from issue '{}' is not in the archive index", key.issue_id);
        };
        info!(key = %key, issue_index, "resuming at explicit article");
        return Ok((issue_index, StartPoint::At(key.clone())));
    }

    match &record.last_article_key {
        Some(key) => {
            let issue_index = issues
                .iter()
                .position(|issue| issue.id == key.issue_id)
                .unwrap_or(record.last_issue_index);
            info!(key = %key, issue_index, "resuming after checkpoint");
            Ok((issue_index, StartPoint::After(key.clone())))
        }
        None => Ok((0, StartPoint::Beginning)),
    }
}

fn first_position(articles: &[ArticleRef], start: &StartPoint) -> usize {
    let (key, offset) = match start {
        StartPoint::Beginning => return 0,
        StartPoint::At(key) => (key, 0),
        StartPoint::After(key) => (key, 1),
    };

    match articles.iter().position(|article| article.key() == *key) {
        Some(position) => position + offset,
        None => {
            warn!(key = %key, "resume article not found in its issue, starting issue from the top");
            0
        }
    }
}

fn outcome_row(key: &ArticleKey, outcome: &ArticleOutcome) -> OutcomeRow {
    let pdf_path = outcome.pdf_path();
    OutcomeRow {
        key: key.clone(),
        status: outcome.status(),
        stage: outcome.stage().as_str().to_string(),
        category: outcome.category().map(str::to_string),
        detail: outcome.detail().map(str::to_string),
        pdf_path: pdf_path.map(|path| path.display().to_string()),
        pdf_sha256: pdf_path.and_then(|path| sha256_file(path).ok()),
    }
}

fn tally(summary: &mut RunSummary, outcome: &ArticleOutcome) {
    match outcome {
        ArticleOutcome::Done { .. } => summary.run_counts.processed += 1,
        ArticleOutcome::Skipped { category, .. } => {
            summary.run_counts.skipped += 1;
            *summary.skip_reasons.entry(category.clone()).or_insert(0) += 1;
        }
        ArticleOutcome::Failed { category, .. } => {
            summary.run_counts.failed += 1;
            *summary.failure_reasons.entry(category.clone()).or_insert(0) += 1;
        }
    }
}
