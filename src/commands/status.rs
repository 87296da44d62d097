use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::commands::harvest::{
    ArticleStatus, CORPUS_FILE_NAME, INDEX_MANIFEST_FILE_NAME, PROGRESS_DB_FILE_NAME,
    ProgressStore, RECORD_MARKER,
};
use crate::model::IssueIndexManifest;

pub fn run(args: StatusArgs) -> Result<()> {
    let manifest_dir = args.output_dir.join("manifests");
    let index_path = manifest_dir.join(INDEX_MANIFEST_FILE_NAME);
    let progress_db_path = args.output_dir.join(PROGRESS_DB_FILE_NAME);
    let corpus_path = args.output_dir.join(CORPUS_FILE_NAME);

    info!(output_dir = %args.output_dir.display(), "status requested");

    if index_path.exists() {
        let raw = fs::read(&index_path)
            .with_context(|| format!("failed to read {}", index_path.display()))?;
        let index: IssueIndexManifest = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse {}", index_path.display()))?;
        let indexed_issues = index
            .issues
            .iter()
            .filter(|entry| entry.articles.is_some())
            .count();
        let articles = index
            .issues
            .iter()
            .filter_map(|entry| entry.articles.as_ref())
            .map(Vec::len)
            .sum::<usize>();

        info!(
            generated_at = %index.generated_at,
            archive_url = %index.archive_url,
            issues = index.issue_count,
            indexed_issues,
            articles,
            "loaded issue index"
        );
    } else {
        warn!(path = %index_path.display(), "issue index missing");
    }

    if progress_db_path.exists() {
        let store = ProgressStore::open(&progress_db_path)?;
        match store.load()? {
            Some(record) => info!(
                last_issue_index = record.last_issue_index,
                last_article = %record
                    .last_article_key
                    .map(|key| key.to_string())
                    .unwrap_or_default(),
                processed = record.counts.processed,
                skipped = record.counts.skipped,
                failed = record.counts.failed,
                output_file_offset = record.output_file_offset,
                "checkpoint"
            ),
            None => info!("no checkpoint saved yet"),
        }

        let ledger = store.ledger_counts()?;
        info!(
            done = ledger.processed,
            skipped = ledger.skipped,
            failed = ledger.failed,
            "article ledger"
        );
        for (status, label) in [
            (ArticleStatus::Skipped, "skip reason"),
            (ArticleStatus::Failed, "failure reason"),
        ] {
            for (reason, count) in store.reason_counts(status)? {
                info!(reason = %reason, count, "{label}");
            }
        }
    } else {
        warn!(path = %progress_db_path.display(), "progress store missing");
    }

    if corpus_path.exists() {
        let raw = fs::read(&corpus_path)
            .with_context(|| format!("failed to read {}", corpus_path.display()))?;
        let text = String::from_utf8_lossy(&raw);
        let records = text.lines().filter(|line| *line == RECORD_MARKER).count();
        info!(
            path = %corpus_path.display(),
            bytes = raw.len(),
            records,
            "corpus"
        );
    } else {
        warn!(path = %corpus_path.display(), "corpus missing");
    }

    match latest_run_manifest(&manifest_dir) {
        Some(path) => {
            let raw = fs::read(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let manifest: serde_json::Value = serde_json::from_slice(&raw)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            let field = |name: &str| {
                manifest
                    .get(name)
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            };
            info!(
                path = %path.display(),
                run_id = %field("run_id"),
                status = %field("status"),
                started_at = %field("started_at"),
                updated_at = %field("updated_at"),
                failure_reason = %field("failure_reason"),
                "latest harvest run"
            );
        }
        None => warn!(path = %manifest_dir.display(), "no harvest run manifest found"),
    }

    Ok(())
}

/// Run manifests carry a compact UTC timestamp, so the name sorts by time.
fn latest_run_manifest(manifest_dir: &Path) -> Option<PathBuf> {
    fs::read_dir(manifest_dir)
        .ok()?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("harvest_run_") && name.ends_with(".json"))
        })
        .max()
}
