use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::IndexArgs;
use crate::commands::harvest::{
    HttpClient, INDEX_MANIFEST_FILE_NAME, IndexCache, IssueIndexer, RetryPolicy,
};

const INDEX_MAX_ATTEMPTS: u32 = 3;

pub fn run(args: IndexArgs) -> Result<()> {
    let manifest_path = args.manifest_path.clone().unwrap_or_else(|| {
        args.output_dir
            .join("manifests")
            .join(INDEX_MANIFEST_FILE_NAME)
    });

    info!(
        archive_url = %args.archive_url,
        manifest = %manifest_path.display(),
        dry_run = args.dry_run,
        "starting index"
    );

    let http = HttpClient::new(Duration::from_secs(args.request_timeout_secs))?;
    let retry = RetryPolicy::new(
        INDEX_MAX_ATTEMPTS,
        Duration::from_secs(2),
        Duration::from_secs(30),
    );
    let indexer = IssueIndexer::new(&http, &args.archive_url, retry);

    let issues = indexer
        .list_issues()
        .with_context(|| format!("failed to discover issues at {}", args.archive_url))?;

    let mut cache = if args.dry_run {
        None
    } else {
        let mut cache = IndexCache::load(&manifest_path, &args.archive_url)?;
        cache.store_issues(&issues)?;
        Some(cache)
    };

    let selected = match args.limit_issues {
        Some(limit) => &issues[..limit.min(issues.len())],
        None => &issues[..],
    };

    let mut article_count = 0usize;
    let mut failed_issues = 0usize;
    for issue in selected {
        match indexer.list_articles(issue) {
            Ok(listing) => {
                article_count += listing.articles.len();
                if let Some(cache) = cache.as_mut() {
                    cache.store_articles(&listing.issue, &listing.articles)?;
                }
            }
            Err(err) => {
                failed_issues += 1;
                warn!(issue_id = %issue.id, error = %err, "failed to index issue");
            }
        }
    }

    match &cache {
        Some(cache) => info!(
            path = %cache.path().display(),
            issues = cache.manifest().issue_count,
            "wrote issue index manifest"
        ),
        None => info!("dry run, issue index manifest not written"),
    }
    info!(
        issues = issues.len(),
        indexed_issues = selected.len() - failed_issues,
        failed_issues,
        articles = article_count,
        "index completed"
    );

    Ok(())
}
