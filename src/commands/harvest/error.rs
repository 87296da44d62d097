use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("could not connect to {url}: {message}")]
    Connect { url: String, message: String },

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("{url} redirected to a login page ({final_url})")]
    LoginWall { url: String, final_url: String },

    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },
}

impl HttpError {
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else if err.is_connect() {
            Self::Connect {
                url: url.to_string(),
                message: err.to_string(),
            }
        } else {
            Self::Request {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Connect { .. } | Self::Request { .. } => true,
            Self::Status { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            Self::LoginWall { .. } => false,
        }
    }
}

/// The archive or an issue page could not be read as the journal layout.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to fetch {url}")]
    Fetch {
        url: String,
        #[source]
        source: HttpError,
    },

    #[error("no issue links found in archive {url}; the archive layout may have changed")]
    NoIssues { url: String },

    #[error("no article summaries found on issue page {url}; the issue layout may have changed")]
    NoArticles { url: String },

    #[error("invalid CSS selector '{selector}'")]
    Selector { selector: String },
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("{tool} is not available on PATH")]
    ToolUnavailable { tool: &'static str },

    #[error("{tool} failed for {path}: {message}")]
    ToolFailed {
        tool: &'static str,
        path: String,
        message: String,
    },

    #[error("{tool} timed out after {seconds}s for {path}")]
    Timeout {
        tool: &'static str,
        path: String,
        seconds: u64,
    },

    #[error("no usable text in {path} from the text layer or OCR")]
    Empty { path: String },

    #[error("i/o error during extraction: {0}")]
    Io(#[from] io::Error),
}

impl ExtractionError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_storage_exhausted(&self) -> bool {
        matches!(self, Self::Io(err) if is_storage_exhausted(err))
    }
}

/// Disk full or over quota. Unlike other article failures this stops the run.
#[derive(Debug, Error)]
#[error("storage exhausted during {stage}: {message}")]
pub struct StorageExhausted {
    pub stage: &'static str,
    pub message: String,
}

pub fn is_storage_exhausted(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::StorageFull | io::ErrorKind::QuotaExceeded
    )
}
