use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::browser::{BrowserAutomation, BrowserError};
use super::error::is_storage_exhausted;
use super::html::{find_embedded_pdf_link, view_to_download_url};
use super::http::{HttpClient, PDF_ACCEPT, is_pdf_body};
use crate::model::ArticleRef;

/// Outcome of one fetch attempt. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    Success(PathBuf),
    TransientFailure(String),
    PermanentFailure(String),
    /// The PDF store is out of space; no later article can be saved either.
    StorageExhausted(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    Permanent,
    StorageExhausted,
}

#[derive(Debug, Clone, Error)]
#[error("{reason}")]
pub struct FetchFailure {
    pub kind: FailureKind,
    pub reason: String,
}

impl FetchFailure {
    pub fn is_transient(&self) -> bool {
        self.kind == FailureKind::Transient
    }
}

impl FetchResult {
    pub fn into_result(self) -> Result<PathBuf, FetchFailure> {
        let (kind, reason) = match self {
            Self::Success(path) => return Ok(path),
            Self::TransientFailure(reason) => (FailureKind::Transient, reason),
            Self::PermanentFailure(reason) => (FailureKind::Permanent, reason),
            Self::StorageExhausted(reason) => (FailureKind::StorageExhausted, reason),
        };
        Err(FetchFailure { kind, reason })
    }
}

/// Local filesystem error while saving a PDF. A full disk is reported as
/// such; anything else is worth another attempt.
pub(super) fn io_failure(context: String, err: io::Error) -> FetchResult {
    if is_storage_exhausted(&err) {
        FetchResult::StorageExhausted(format!("{context}: {err}"))
    } else {
        FetchResult::TransientFailure(format!("{context}: {err}"))
    }
}

/// One way of turning a PDF link into a local file.
pub trait FetchStrategy {
    fn name(&self) -> &'static str;
    fn fetch(&self, pdf_url: &str, destination: &Path) -> FetchResult;
}

/// Tries each strategy in order and stops at the first success.
pub struct PdfFetcher {
    pdf_root: PathBuf,
    strategies: Vec<Box<dyn FetchStrategy>>,
}

impl PdfFetcher {
    pub fn new(pdf_root: PathBuf, strategies: Vec<Box<dyn FetchStrategy>>) -> Self {
        Self {
            pdf_root,
            strategies,
        }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|strategy| strategy.name()).collect()
    }

    /// Deterministic location for an article's PDF, keyed by issue and the
    /// article's position within the issue.
    pub fn pdf_path_for(&self, issue_id: &str, article_index: usize) -> PathBuf {
        self.pdf_root
            .join(format!("issue_{}", sanitize_component(issue_id)))
            .join(format!("article_{:03}.pdf", article_index + 1))
    }

    pub fn fetch(&self, article: &ArticleRef, article_index: usize) -> FetchResult {
        let destination = self.pdf_path_for(&article.issue_id, article_index);
        if is_nonempty_file(&destination) {
            debug!(path = %destination.display(), "PDF already on disk");
            return FetchResult::Success(destination);
        }

        if let Some(parent) = destination.parent()
            && let Err(err) = fs::create_dir_all(parent)
        {
            return io_failure(format!("failed to create {}", parent.display()), err);
        }

        let mut failures = Vec::new();
        let mut any_transient = false;
        for strategy in &self.strategies {
            match strategy.fetch(&article.pdf_url, &destination) {
                FetchResult::Success(path) => {
                    info!(
                        strategy = strategy.name(),
                        url = %article.pdf_url,
                        path = %path.display(),
                        "fetched PDF"
                    );
                    return FetchResult::Success(path);
                }
                FetchResult::StorageExhausted(reason) => {
                    return FetchResult::StorageExhausted(format!("{}: {reason}", strategy.name()));
                }
                FetchResult::TransientFailure(reason) => {
                    warn!(strategy = strategy.name(), url = %article.pdf_url, reason = %reason, "fetch strategy failed");
                    any_transient = true;
                    failures.push(format!("{}: {reason}", strategy.name()));
                }
                FetchResult::PermanentFailure(reason) => {
                    warn!(strategy = strategy.name(), url = %article.pdf_url, reason = %reason, "fetch strategy failed");
                    failures.push(format!("{}: {reason}", strategy.name()));
                }
            }
        }

        if failures.is_empty() {
            FetchResult::PermanentFailure("no fetch strategy configured".to_string())
        } else if any_transient {
            FetchResult::TransientFailure(failures.join("; "))
        } else {
            FetchResult::PermanentFailure(failures.join("; "))
        }
    }
}

/// Plain HTTP download, following the journal's viewer page to the file.
pub struct DirectHttpStrategy {
    http: HttpClient,
}

impl DirectHttpStrategy {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    fn download(&self, url: &str, referer: Option<&str>, destination: &Path) -> FetchResult {
        match self.http.get(url, PDF_ACCEPT, referer) {
            Ok(response) if is_pdf_body(&response.body) => {
                match write_atomically(destination, &response.body) {
                    Ok(()) => FetchResult::Success(destination.to_path_buf()),
                    Err(err) => io_failure(format!("failed to write {}", destination.display()), err),
                }
            }
            Ok(response) => FetchResult::PermanentFailure(format!(
                "{url} did not return a PDF (content type {})",
                response.content_type.as_deref().unwrap_or("unknown")
            )),
            Err(err) if err.is_transient() => FetchResult::TransientFailure(err.to_string()),
            Err(err) => FetchResult::PermanentFailure(err.to_string()),
        }
    }
}

impl FetchStrategy for DirectHttpStrategy {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn fetch(&self, pdf_url: &str, destination: &Path) -> FetchResult {
        let response = match self.http.get(pdf_url, PDF_ACCEPT, None) {
            Ok(response) => response,
            Err(err) if err.is_transient() => {
                return FetchResult::TransientFailure(err.to_string());
            }
            Err(err) => return FetchResult::PermanentFailure(err.to_string()),
        };

        if is_pdf_body(&response.body) {
            return match write_atomically(destination, &response.body) {
                Ok(()) => FetchResult::Success(destination.to_path_buf()),
                Err(err) => io_failure(format!("failed to write {}", destination.display()), err),
            };
        }

        let page = String::from_utf8_lossy(&response.body);
        let mut candidates = Vec::new();
        if let Some(link) = find_embedded_pdf_link(&page, &response.final_url) {
            candidates.push(link);
        }
        if let Some(link) = view_to_download_url(&response.final_url) {
            candidates.push(link);
        }
        let mut seen = HashSet::new();
        candidates.retain(|candidate| candidate != pdf_url && seen.insert(candidate.clone()));

        if candidates.is_empty() {
            return FetchResult::PermanentFailure(format!(
                "{pdf_url} is neither a PDF nor a viewer page with a PDF link"
            ));
        }

        let mut last = FetchResult::PermanentFailure(format!("no candidate worked for {pdf_url}"));
        for candidate in candidates {
            debug!(url = %candidate, "following viewer link");
            last = self.download(&candidate, Some(&response.final_url), destination);
            if matches!(last, FetchResult::Success(_)) {
                return last;
            }
        }
        last
    }
}

/// Lets the browser collaborator trigger the download, then picks the new
/// file up from its download directory.
pub struct BrowserDownloadStrategy {
    browser: Box<dyn BrowserAutomation>,
    download_dir: PathBuf,
    wait: Duration,
    poll_interval: Duration,
}

impl BrowserDownloadStrategy {
    pub fn new(browser: Box<dyn BrowserAutomation>, download_dir: PathBuf, wait: Duration) -> Self {
        Self {
            browser,
            download_dir,
            wait,
            poll_interval: Duration::from_millis(500),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn wait_for_new_pdf(&self, before: &HashSet<PathBuf>) -> Option<PathBuf> {
        let deadline = Instant::now() + self.wait;
        let mut last_sizes: Vec<(PathBuf, u64)> = Vec::new();

        loop {
            let current = list_completed_pdfs(&self.download_dir)
                .into_iter()
                .filter(|(path, size)| !before.contains(path) && *size > 0)
                .collect::<Vec<(PathBuf, u64)>>();

            if let Some((path, _)) = current.iter().find(|entry| last_sizes.contains(entry)) {
                return Some(path.clone());
            }
            last_sizes = current;

            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(self.poll_interval);
        }
    }
}

impl FetchStrategy for BrowserDownloadStrategy {
    fn name(&self) -> &'static str {
        "browser"
    }

    fn fetch(&self, pdf_url: &str, destination: &Path) -> FetchResult {
        if let Err(err) = fs::create_dir_all(&self.download_dir) {
            return io_failure(format!("failed to create {}", self.download_dir.display()), err);
        }

        let before = list_completed_pdfs(&self.download_dir)
            .into_iter()
            .map(|(path, _)| path)
            .collect::<HashSet<PathBuf>>();

        match self.browser.trigger_download(pdf_url, &self.download_dir) {
            Ok(()) => {}
            Err(BrowserError::Io(err)) => {
                return io_failure("failed to save browser download".to_string(), err);
            }
            Err(err) if err.is_transient() => return FetchResult::TransientFailure(err.to_string()),
            Err(err) => return FetchResult::PermanentFailure(err.to_string()),
        }

        let Some(downloaded) = self.wait_for_new_pdf(&before) else {
            return FetchResult::TransientFailure(format!(
                "no download appeared in {} within {}s",
                self.download_dir.display(),
                self.wait.as_secs()
            ));
        };

        if let Err(err) = fs::rename(&downloaded, destination) {
            return io_failure(
                format!(
                    "failed to move {} to {}",
                    downloaded.display(),
                    destination.display()
                ),
                err,
            );
        }
        FetchResult::Success(destination.to_path_buf())
    }
}

fn list_completed_pdfs(dir: &Path) -> Vec<(PathBuf, u64)> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut files = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let path = entry.path();
            let is_pdf = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
            if !is_pdf {
                return None;
            }
            let size = entry.metadata().ok().filter(|meta| meta.is_file())?.len();
            Some((path, size))
        })
        .collect::<Vec<(PathBuf, u64)>>();
    files.sort();
    files
}

fn write_atomically(destination: &Path, body: &[u8]) -> io::Result<()> {
    let partial = destination.with_extension("pdf.part");
    fs::write(&partial, body)?;
    fs::rename(&partial, destination)
}

fn is_nonempty_file(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}

fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}
