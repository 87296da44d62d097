use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use super::browser::BrowserlessClient;
use super::cleanup::ArticleCleaner;
use super::extract::{OcrEngine, QualityThresholds, TextExtractor};
use super::fetcher::{BrowserDownloadStrategy, DirectHttpStrategy, FetchStrategy, PdfFetcher};
use super::format::JOURNAL_NAME;
use super::http::HttpClient;
use super::index_cache::IndexCache;
use super::indexer::IssueIndexer;
use super::language::{LanguageClassifier, WhatlangIdentifier};
use super::ocr_tools::{Pdftotext, TesseractOcr, collect_tool_versions};
use super::processor::ArticleProcessor;
use super::progress::{ArticleStatus, ProgressStore};
use super::retry::RetryPolicy;
use super::runner::{PipelineRunner, RunSettings, RunSummary};
use crate::cli::{HarvestArgs, OcrMode};
use crate::model::{ArticleKey, HarvestPaths, HarvestRunManifest, OutcomeCounts, ToolVersions};
use crate::util::{ensure_directory, now_utc_string, utc_compact_string, write_json_pretty};

pub const CORPUS_FILE_NAME: &str = "all_articles.txt";
pub const PROGRESS_DB_FILE_NAME: &str = "progress.sqlite";
pub const INDEX_MANIFEST_FILE_NAME: &str = "issue_index.json";

const RUN_MANIFEST_VERSION: u32 = 1;

pub fn run(args: HarvestArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("run-{}", utc_compact_string(started_ts));

    let output_dir = args.output_dir.clone();
    let manifest_dir = output_dir.join("manifests");
    let pdf_dir = output_dir.join("pdfs");
    let download_dir = output_dir.join("downloads");
    ensure_directory(&manifest_dir)?;
    ensure_directory(&pdf_dir)?;

    let corpus_path = output_dir.join(CORPUS_FILE_NAME);
    let progress_db_path = output_dir.join(PROGRESS_DB_FILE_NAME);
    let index_manifest_path = manifest_dir.join(INDEX_MANIFEST_FILE_NAME);
    let run_manifest_path = manifest_dir.join(format!(
        "harvest_run_{}.json",
        utc_compact_string(started_ts)
    ));

    info!(output_dir = %output_dir.display(), run_id = %run_id, "starting harvest");

    let resume_from = args
        .resume_from
        .as_deref()
        .map(ArticleKey::parse)
        .transpose()
        .context("invalid --resume-from")?;

    let mut store = ProgressStore::open(&progress_db_path)?;
    if args.fresh {
        warn!(corpus = %corpus_path.display(), "fresh run: discarding checkpoint, ledger and corpus");
        store.reset()?;
        truncate_corpus(&corpus_path)?;
    }

    let mut manifest = HarvestRunManifest {
        manifest_version: RUN_MANIFEST_VERSION,
        run_id: run_id.clone(),
        status: "running".to_string(),
        started_at,
        updated_at: now_utc_string(),
        failure_reason: None,
        command: render_harvest_command(&args),
        tool_versions: collect_tool_versions(),
        paths: HarvestPaths {
            output_dir: output_dir.display().to_string(),
            corpus_path: corpus_path.display().to_string(),
            pdf_dir: pdf_dir.display().to_string(),
            progress_db_path: progress_db_path.display().to_string(),
            index_manifest_path: index_manifest_path.display().to_string(),
        },
        issues_visited: 0,
        run_counts: OutcomeCounts::default(),
        total_counts: OutcomeCounts::default(),
        skip_reasons: Default::default(),
        failure_reasons: Default::default(),
        warnings: Vec::new(),
    };
    log_tool_versions(&manifest.tool_versions);
    write_json_pretty(&run_manifest_path, &manifest)?;

    let request_timeout = Duration::from_secs(args.request_timeout_secs);
    let http = HttpClient::new(request_timeout)?;
    let retry = RetryPolicy::new(
        args.max_attempts,
        Duration::from_millis(args.base_delay_ms),
        Duration::from_millis(args.max_delay_ms),
    );

    let strategies = build_fetch_strategies(&args, &http, download_dir, request_timeout)?;
    let fetcher = PdfFetcher::new(pdf_dir, strategies);
    info!(strategies = ?fetcher.strategy_names(), "PDF fetch strategies");

    let processor = ArticleProcessor::new(
        fetcher,
        build_extractor(&args),
        LanguageClassifier::new(Box::new(WhatlangIdentifier)),
        ArticleCleaner::new()?,
        retry,
        JOURNAL_NAME,
    );

    let settings = RunSettings {
        limit_issues: args.limit_issues,
        limit_articles: args.limit_articles,
        save_interval: args.save_interval,
        resume_from,
        article_delay: Duration::from_millis(args.article_delay_ms),
        refresh_index: args.refresh_index,
    };

    let indexer = IssueIndexer::new(&http, &args.archive_url, retry);
    let cache = IndexCache::load(&index_manifest_path, &args.archive_url)?;
    let mut runner = PipelineRunner::new(indexer, cache, processor, store, settings);

    let outcome = runner.run(&corpus_path);
    let store = runner.into_store();

    manifest.updated_at = now_utc_string();
    match &outcome {
        Ok(summary) => {
            manifest.status = "completed".to_string();
            apply_summary(&mut manifest, summary);
        }
        Err(err) => {
            manifest.status = "failed".to_string();
            manifest.failure_reason = Some(format!("{err:#}"));
        }
    }
    // Ledger-wide totals and reasons cover earlier runs too.
    if let Ok(total) = store.ledger_counts() {
        manifest.total_counts = total;
    }
    if let Ok(reasons) = store.reason_counts(ArticleStatus::Skipped) {
        manifest.skip_reasons = reasons;
    }
    if let Ok(reasons) = store.reason_counts(ArticleStatus::Failed) {
        manifest.failure_reasons = reasons;
    }
    write_json_pretty(&run_manifest_path, &manifest)?;
    info!(path = %run_manifest_path.display(), status = %manifest.status, "wrote harvest run manifest");

    let summary = outcome?;
    info!(
        issues = summary.issues_visited,
        processed = summary.run_counts.processed,
        skipped = summary.run_counts.skipped,
        failed = summary.run_counts.failed,
        total_processed = manifest.total_counts.processed,
        corpus = %corpus_path.display(),
        "harvest completed"
    );

    Ok(())
}

fn build_fetch_strategies(
    args: &HarvestArgs,
    http: &HttpClient,
    download_dir: PathBuf,
    request_timeout: Duration,
) -> Result<Vec<Box<dyn FetchStrategy>>> {
    let mut strategies: Vec<Box<dyn FetchStrategy>> =
        vec![Box::new(DirectHttpStrategy::new(http.clone()))];

    match (&args.browserless_url, args.no_browser_fallback) {
        (Some(url), false) => {
            ensure_directory(&download_dir)?;
            let browser = BrowserlessClient::new(
                url,
                args.browserless_token.as_deref(),
                request_timeout.saturating_mul(2),
                http.clone(),
            )?;
            strategies.push(Box::new(BrowserDownloadStrategy::new(
                Box::new(browser),
                download_dir,
                Duration::from_secs(args.download_wait_secs),
            )));
        }
        (Some(_), true) => info!("browser fallback disabled by --no-browser-fallback"),
        (None, _) => info!("no --browserless-url given, browser fallback disabled"),
    }

    Ok(strategies)
}

fn build_extractor(args: &HarvestArgs) -> TextExtractor {
    let page_timeout = Duration::from_secs(args.ocr_page_timeout_secs);
    let ocr: Option<Box<dyn OcrEngine>> = if args.ocr_mode == OcrMode::Off {
        None
    } else if TesseractOcr::available() {
        Some(Box::new(TesseractOcr::new(&args.ocr_lang, page_timeout)))
    } else {
        warn!(
            ocr_mode = args.ocr_mode.as_str(),
            "pdfinfo, pdftoppm or tesseract missing, OCR fallback unavailable"
        );
        None
    };

    TextExtractor::new(
        Box::new(Pdftotext::new(page_timeout)),
        ocr,
        args.ocr_mode,
        QualityThresholds {
            min_text_chars: args.ocr_min_text_chars,
            min_alpha_ratio: args.ocr_min_alpha_ratio,
        },
    )
}

fn truncate_corpus(path: &Path) -> Result<()> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("failed to truncate corpus {}", path.display()))?;
    Ok(())
}

fn apply_summary(manifest: &mut HarvestRunManifest, summary: &RunSummary) {
    manifest.issues_visited = summary.issues_visited;
    manifest.run_counts = summary.run_counts.clone();
    manifest.total_counts = summary.total_counts.clone();
    manifest.warnings = summary.warnings.clone();
}

fn log_tool_versions(versions: &ToolVersions) {
    for (tool, version) in [
        ("pdftotext", &versions.pdftotext),
        ("pdfinfo", &versions.pdfinfo),
        ("pdftoppm", &versions.pdftoppm),
        ("tesseract", &versions.tesseract),
    ] {
        match version {
            Some(version) => info!(tool, version = %version, "external tool"),
            None => warn!(tool, "external tool not found"),
        }
    }
}

pub(super) fn render_harvest_command(args: &HarvestArgs) -> String {
    let mut command = vec![
        "pof-harvest".to_string(),
        "harvest".to_string(),
        "--output-dir".to_string(),
        args.output_dir.display().to_string(),
        "--archive-url".to_string(),
        args.archive_url.clone(),
    ];

    if let Some(limit) = args.limit_issues {
        command.push("--limit-issues".to_string());
        command.push(limit.to_string());
    }
    if let Some(limit) = args.limit_articles {
        command.push("--limit-articles".to_string());
        command.push(limit.to_string());
    }
    command.push("--save-interval".to_string());
    command.push(args.save_interval.to_string());
    if let Some(key) = &args.resume_from {
        command.push("--resume-from".to_string());
        command.push(key.clone());
    }
    if args.fresh {
        command.push("--fresh".to_string());
    }
    if args.refresh_index {
        command.push("--refresh-index".to_string());
    }
    if let Some(url) = &args.browserless_url {
        command.push("--browserless-url".to_string());
        command.push(url.clone());
    }
    if args.browserless_token.is_some() {
        command.push("--browserless-token".to_string());
        command.push("<redacted>".to_string());
    }
    if args.no_browser_fallback {
        command.push("--no-browser-fallback".to_string());
    }
    command.push("--ocr-mode".to_string());
    command.push(args.ocr_mode.as_str().to_string());
    if args.ocr_mode != OcrMode::Off {
        command.push("--ocr-lang".to_string());
        command.push(args.ocr_lang.clone());
        command.push("--ocr-min-text-chars".to_string());
        command.push(args.ocr_min_text_chars.to_string());
    }

    command.join(" ")
}
