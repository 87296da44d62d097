use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, anyhow};
use chrono::Utc;
use reqwest::blocking::Client;
use thiserror::Error;
use tracing::debug;
use url::Url;

use super::error::HttpError;
use super::html::{find_embedded_pdf_link, view_to_download_url};
use super::http::{HttpClient, PDF_ACCEPT, is_pdf_body};

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("browser service request failed: {0}")]
    Network(String),

    #[error("browser service returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("rendered page {url} has no PDF download link")]
    NoDownloadLink { url: String },

    #[error("download through rendered page failed: {0}")]
    Download(#[from] HttpError),

    #[error("{url} did not return a PDF")]
    NotPdf { url: String },

    #[error("i/o error while saving download: {0}")]
    Io(#[from] std::io::Error),
}

impl BrowserError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Io(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::Download(err) => err.is_transient(),
            Self::NoDownloadLink { .. } | Self::NotPdf { .. } => false,
        }
    }
}

/// Browser collaborator: render `page_url` and leave the downloaded PDF in
/// `download_dir`.
pub trait BrowserAutomation {
    fn trigger_download(&self, page_url: &str, download_dir: &Path) -> Result<(), BrowserError>;
}

/// Client for a Browserless `/content` endpoint. The rendered page gives
/// the real file link, which is then downloaded with the session's
/// referer.
pub struct BrowserlessClient {
    client: Client,
    content_url: Url,
    http: HttpClient,
}

impl BrowserlessClient {
    pub fn new(
        base_url: &str,
        token: Option<&str>,
        timeout: Duration,
        http: HttpClient,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build browser service client")?;

        Ok(Self {
            client,
            content_url: content_endpoint(base_url, token)?,
            http,
        })
    }

    /// Fully rendered HTML of `url`.
    pub fn content(&self, url: &str) -> Result<String, BrowserError> {
        let body = serde_json::json!({
            "url": url,
            "gotoOptions": { "waitUntil": "networkidle2" },
        });

        let response = self
            .client
            .post(self.content_url.as_str())
            .json(&body)
            .send()
            .map_err(|err| BrowserError::Network(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            return Err(BrowserError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .text()
            .map_err(|err| BrowserError::Network(err.to_string()))
    }
}

impl BrowserAutomation for BrowserlessClient {
    fn trigger_download(&self, page_url: &str, download_dir: &Path) -> Result<(), BrowserError> {
        let rendered = self.content(page_url)?;
        let link = find_embedded_pdf_link(&rendered, page_url)
            .or_else(|| view_to_download_url(page_url))
            .ok_or_else(|| BrowserError::NoDownloadLink {
                url: page_url.to_string(),
            })?;

        debug!(page = %page_url, link = %link, "downloading through rendered page");
        let response = self.http.get(&link, PDF_ACCEPT, Some(page_url))?;
        if !is_pdf_body(&response.body) {
            return Err(BrowserError::NotPdf { url: link });
        }

        let stem = format!("download_{}", Utc::now().format("%Y%m%dT%H%M%S%6f"));
        let partial = download_dir.join(format!("{stem}.crdownload"));
        fs::write(&partial, &response.body)?;
        fs::rename(&partial, download_dir.join(format!("{stem}.pdf")))?;
        Ok(())
    }
}

/// `<base>/content`, with the token as an encoded query parameter.
pub(super) fn content_endpoint(base_url: &str, token: Option<&str>) -> anyhow::Result<Url> {
    let mut endpoint = Url::parse(base_url)
        .with_context(|| format!("invalid browser service URL '{base_url}'"))?;
    endpoint
        .path_segments_mut()
        .map_err(|_| anyhow!("browser service URL '{base_url}' cannot take a path"))?
        .pop_if_empty()
        .push("content");
    if let Some(token) = token {
        endpoint.query_pairs_mut().append_pair("token", token);
    }
    Ok(endpoint)
}
