mod browser;
mod cleanup;
mod corpus;
mod error;
mod extract;
mod fetcher;
mod format;
mod html;
mod http;
mod index_cache;
mod indexer;
mod language;
mod ocr_tools;
mod processor;
mod progress;
mod retry;
mod run;
mod runner;
mod script;

#[cfg(test)]
mod tests;

pub use run::run;

pub(crate) use http::HttpClient;
pub(crate) use index_cache::IndexCache;
pub(crate) use indexer::IssueIndexer;
pub(crate) use progress::{ArticleStatus, ProgressStore};
pub(crate) use retry::RetryPolicy;
pub(crate) use run::{CORPUS_FILE_NAME, INDEX_MANIFEST_FILE_NAME, PROGRESS_DB_FILE_NAME};
pub(crate) use format::RECORD_MARKER;
