use std::path::PathBuf;

use tracing::{debug, error, info, warn};

use super::cleanup::ArticleCleaner;
use super::error::{ExtractionError, StorageExhausted};
use super::extract::{ExtractedText, TextExtractor, TextSource};
use super::fetcher::{FailureKind, FetchFailure, PdfFetcher};
use super::format::{ProcessedArticle, format_record};
use super::language::{LanguageClassifier, LanguageVerdict};
use super::progress::ArticleStatus;
use super::retry::{RetryError, RetryPolicy, retry_with_backoff};
use super::script;
use crate::model::{ArticleRef, Issue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Discovered,
    Prefiltered,
    Fetched,
    Extracted,
    Classified,
    Normalized,
    Formatted,
    Done,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Prefiltered => "prefiltered",
            Self::Fetched => "fetched",
            Self::Extracted => "extracted",
            Self::Classified => "classified",
            Self::Normalized => "normalized",
            Self::Formatted => "formatted",
            Self::Done => "done",
        }
    }
}

/// Terminal state of one article. `stage` on Skipped/Failed is the stage
/// whose transition stopped it.
#[derive(Debug, Clone)]
pub enum ArticleOutcome {
    Done {
        processed: ProcessedArticle,
        record: String,
        pdf_path: PathBuf,
        source: TextSource,
    },
    Skipped {
        stage: Stage,
        category: String,
        detail: String,
        pdf_path: Option<PathBuf>,
    },
    Failed {
        stage: Stage,
        category: String,
        detail: String,
        pdf_path: Option<PathBuf>,
    },
}

impl ArticleOutcome {
    pub fn status(&self) -> ArticleStatus {
        match self {
            Self::Done { .. } => ArticleStatus::Done,
            Self::Skipped { .. } => ArticleStatus::Skipped,
            Self::Failed { .. } => ArticleStatus::Failed,
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            Self::Done { .. } => Stage::Done,
            Self::Skipped { stage, .. } | Self::Failed { stage, .. } => *stage,
        }
    }

    pub fn category(&self) -> Option<&str> {
        match self {
            Self::Done { .. } => None,
            Self::Skipped { category, .. } | Self::Failed { category, .. } => Some(category),
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Done { .. } => None,
            Self::Skipped { detail, .. } | Self::Failed { detail, .. } => Some(detail),
        }
    }

    pub fn pdf_path(&self) -> Option<&PathBuf> {
        match self {
            Self::Done { pdf_path, .. } => Some(pdf_path),
            Self::Skipped { pdf_path, .. } | Self::Failed { pdf_path, .. } => pdf_path.as_ref(),
        }
    }

    fn skipped(stage: Stage, verdict: &LanguageVerdict, pdf_path: Option<PathBuf>) -> Self {
        Self::Skipped {
            stage,
            category: verdict.reason.clone(),
            detail: format!(
                "language {} ({} confidence)",
                verdict.code,
                verdict.confidence_tier.as_str()
            ),
            pdf_path,
        }
    }

    fn failed(stage: Stage, category: &str, detail: String, pdf_path: Option<PathBuf>) -> Self {
        Self::Failed {
            stage,
            category: category.to_string(),
            detail,
            pdf_path,
        }
    }
}

enum ArticleState {
    Discovered,
    Prefiltered,
    Fetched {
        pdf_path: PathBuf,
    },
    Extracted {
        pdf_path: PathBuf,
        text: ExtractedText,
    },
    Classified {
        pdf_path: PathBuf,
        text: ExtractedText,
        verdict: LanguageVerdict,
    },
    Normalized {
        pdf_path: PathBuf,
        source: TextSource,
        verdict: LanguageVerdict,
        body: String,
    },
    Formatted {
        pdf_path: PathBuf,
        source: TextSource,
        processed: ProcessedArticle,
        record: String,
    },
    Terminal(ArticleOutcome),
    Aborted {
        stage: Stage,
        error: StorageExhausted,
    },
}

impl ArticleState {
    fn stage(&self) -> Stage {
        match self {
            Self::Discovered => Stage::Discovered,
            Self::Prefiltered => Stage::Prefiltered,
            Self::Fetched { .. } => Stage::Fetched,
            Self::Extracted { .. } => Stage::Extracted,
            Self::Classified { .. } => Stage::Classified,
            Self::Normalized { .. } => Stage::Normalized,
            Self::Formatted { .. } => Stage::Formatted,
            Self::Terminal(outcome) => outcome.stage(),
            Self::Aborted { stage, .. } => *stage,
        }
    }
}

/// Runs one article through prefilter, fetch, extraction, classification,
/// normalization and formatting. Every error ends in a terminal outcome,
/// except running out of storage, which is returned to the caller.
pub struct ArticleProcessor {
    fetcher: PdfFetcher,
    extractor: TextExtractor,
    classifier: LanguageClassifier,
    cleaner: ArticleCleaner,
    retry: RetryPolicy,
    journal_name: String,
}

impl ArticleProcessor {
    pub fn new(
        fetcher: PdfFetcher,
        extractor: TextExtractor,
        classifier: LanguageClassifier,
        cleaner: ArticleCleaner,
        retry: RetryPolicy,
        journal_name: &str,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            classifier,
            cleaner,
            retry,
            journal_name: journal_name.to_string(),
        }
    }

    pub fn process(
        &self,
        issue: &Issue,
        article: &ArticleRef,
        article_index: usize,
    ) -> Result<ArticleOutcome, StorageExhausted> {
        let mut state = ArticleState::Discovered;
        loop {
            state = match state {
                ArticleState::Terminal(outcome) => {
                    log_outcome(article, &outcome);
                    return Ok(outcome);
                }
                ArticleState::Aborted { stage, error: err } => {
                    error!(
                        issue_id = %article.issue_id,
                        title = %article.title,
                        stage = stage.as_str(),
                        error = %err,
                        "article aborted"
                    );
                    return Err(err);
                }
                other => {
                    debug!(url = %article.pdf_url, stage = other.stage().as_str(), "article stage");
                    self.step(other, issue, article, article_index)
                }
            };
        }
    }

    fn step(
        &self,
        state: ArticleState,
        issue: &Issue,
        article: &ArticleRef,
        article_index: usize,
    ) -> ArticleState {
        match state {
            ArticleState::Discovered => {
                let metadata = [
                    article.subtitle.as_deref().unwrap_or_default(),
                    article.section.as_deref().unwrap_or_default(),
                ];
                let verdict = self.classifier.prefilter(&article.title, &metadata);
                if verdict.accepted {
                    ArticleState::Prefiltered
                } else {
                    ArticleState::Terminal(ArticleOutcome::skipped(Stage::Prefiltered, &verdict, None))
                }
            }
            ArticleState::Prefiltered => {
                let label = format!("fetch {}", article.pdf_url);
                let fetched = retry_with_backoff(
                    &self.retry,
                    &label,
                    FetchFailure::is_transient,
                    |attempt| {
                        debug!(url = %article.pdf_url, attempt, "fetching PDF");
                        self.fetcher.fetch(article, article_index).into_result()
                    },
                );
                match fetched {
                    Ok(pdf_path) => ArticleState::Fetched { pdf_path },
                    Err(RetryError::Permanent { error, .. })
                        if error.kind == FailureKind::StorageExhausted =>
                    {
                        ArticleState::Aborted {
                            stage: Stage::Fetched,
                            error: StorageExhausted {
                                stage: "fetch",
                                message: error.reason,
                            },
                        }
                    }
                    Err(err) => ArticleState::Terminal(ArticleOutcome::failed(
                        Stage::Fetched,
                        fetch_category(&err),
                        err.to_string(),
                        None,
                    )),
                }
            }
            ArticleState::Fetched { pdf_path } => {
                let label = format!("extract {}", pdf_path.display());
                match retry_with_backoff(
                    &self.retry,
                    &label,
                    ExtractionError::is_transient,
                    |_| self.extractor.extract(&pdf_path),
                ) {
                    Ok(text) => {
                        for warning in &text.warnings {
                            warn!(path = %pdf_path.display(), warning = %warning, "extraction warning");
                        }
                        ArticleState::Extracted { pdf_path, text }
                    }
                    Err(RetryError::Permanent { error, .. }) if error.is_storage_exhausted() => {
                        ArticleState::Aborted {
                            stage: Stage::Extracted,
                            error: StorageExhausted {
                                stage: "extraction",
                                message: error.to_string(),
                            },
                        }
                    }
                    Err(err) => {
                        let category = extraction_category(&err);
                        ArticleState::Terminal(ArticleOutcome::failed(
                            Stage::Extracted,
                            category,
                            err.to_string(),
                            Some(pdf_path),
                        ))
                    }
                }
            }
            ArticleState::Extracted { pdf_path, text } => {
                let verdict = self.classifier.classify(&text.raw_text);
                if verdict.accepted {
                    ArticleState::Classified {
                        pdf_path,
                        text,
                        verdict,
                    }
                } else {
                    ArticleState::Terminal(ArticleOutcome::skipped(
                        Stage::Classified,
                        &verdict,
                        Some(pdf_path),
                    ))
                }
            }
            ArticleState::Classified {
                pdf_path,
                text,
                verdict,
            } => {
                let latin = script::normalize(&text.raw_text);
                let (body, stats) = self.cleaner.clean(&latin);
                debug!(
                    path = %pdf_path.display(),
                    headers = stats.header_lines_removed,
                    footers = stats.footer_lines_removed,
                    noise = stats.noise_lines_removed,
                    headings = stats.headings_removed,
                    merges = stats.dehyphenation_merges,
                    sections = stats.sections_cut,
                    citations = stats.citations_removed,
                    "cleaned article text"
                );
                if body.trim().is_empty() {
                    ArticleState::Terminal(ArticleOutcome::failed(
                        Stage::Normalized,
                        "empty_after_cleanup",
                        format!("no text left after cleanup of {}", pdf_path.display()),
                        Some(pdf_path),
                    ))
                } else {
                    ArticleState::Normalized {
                        pdf_path,
                        source: text.source,
                        verdict,
                        body,
                    }
                }
            }
            ArticleState::Normalized {
                pdf_path,
                source,
                verdict,
                body,
            } => match ProcessedArticle::new(article.clone(), body, verdict) {
                Some(processed) => {
                    let record = format_record(&self.journal_name, issue, &processed);
                    ArticleState::Formatted {
                        pdf_path,
                        source,
                        processed,
                        record,
                    }
                }
                None => ArticleState::Terminal(ArticleOutcome::failed(
                    Stage::Formatted,
                    "not_accepted",
                    "article reached formatting without an accepted verdict".to_string(),
                    Some(pdf_path),
                )),
            },
            ArticleState::Formatted {
                pdf_path,
                source,
                processed,
                record,
            } => ArticleState::Terminal(ArticleOutcome::Done {
                processed,
                record,
                pdf_path,
                source,
            }),
            terminal @ (ArticleState::Terminal(_) | ArticleState::Aborted { .. }) => terminal,
        }
    }
}

fn fetch_category(err: &RetryError<FetchFailure>) -> &'static str {
    match err {
        RetryError::Permanent { .. } => "fetch_permanent",
        RetryError::Exhausted { .. } => "fetch_retries_exhausted",
    }
}

fn extraction_category(err: &RetryError<ExtractionError>) -> &'static str {
    match err {
        RetryError::Exhausted { .. } => "extraction_retries_exhausted",
        RetryError::Permanent { error, .. } => match error {
            ExtractionError::Empty { .. } => "extraction_empty",
            ExtractionError::ToolUnavailable { .. } => "extraction_tool_unavailable",
            ExtractionError::ToolFailed { .. } => "extraction_tool_failed",
            ExtractionError::Timeout { .. } => "extraction_timeout",
            ExtractionError::Io(_) => "extraction_io",
        },
    }
}

fn log_outcome(article: &ArticleRef, outcome: &ArticleOutcome) {
    match outcome {
        ArticleOutcome::Done {
            processed, source, ..
        } => info!(
            issue_id = %article.issue_id,
            title = %article.title,
            language = %processed.verdict.code,
            confidence = processed.verdict.confidence_tier.as_str(),
            source = source.as_str(),
            "article accepted"
        ),
        ArticleOutcome::Skipped {
            stage,
            category,
            detail,
            ..
        } => info!(
            issue_id = %article.issue_id,
            title = %article.title,
            stage = stage.as_str(),
            reason = %category,
            detail = %detail,
            "article skipped"
        ),
        ArticleOutcome::Failed {
            stage,
            category,
            detail,
            ..
        } => warn!(
            issue_id = %article.issue_id,
            title = %article.title,
            stage = stage.as_str(),
            reason = %category,
            detail = %detail,
            "article failed"
        ),
    }
}
