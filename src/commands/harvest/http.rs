use std::time::Duration;

use anyhow::{Context, Result};
use rand::seq::IndexedRandom;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, REFERER, USER_AGENT};

use super::error::HttpError;

pub const HTML_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
pub const PDF_ACCEPT: &str = "application/pdf,application/x-pdf,*/*;q=0.5";

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
];

/// Anything that can hand back the HTML of a page.
pub trait PageSource {
    fn fetch_html(&self, url: &str) -> Result<String, HttpError>;
}

#[derive(Debug)]
pub struct HttpResponse {
    pub final_url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }

    pub fn get(
        &self,
        url: &str,
        accept: &str,
        referer: Option<&str>,
    ) -> Result<HttpResponse, HttpError> {
        let mut request = self
            .client
            .get(url)
            .header(USER_AGENT, random_user_agent())
            .header(ACCEPT, accept)
            .header(ACCEPT_LANGUAGE, "bs,hr;q=0.9,sr;q=0.8,en;q=0.5");
        if let Some(referer) = referer {
            request = request.header(REFERER, referer);
        }

        let response = request
            .send()
            .map_err(|err| HttpError::from_reqwest(url, err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HttpError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let final_url = response.url().to_string();
        if final_url != url && is_login_url(&final_url) {
            return Err(HttpError::LoginWall {
                url: url.to_string(),
                final_url,
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .map_err(|err| HttpError::from_reqwest(url, err))?
            .to_vec();

        Ok(HttpResponse {
            final_url,
            content_type,
            body,
        })
    }
}

impl PageSource for HttpClient {
    fn fetch_html(&self, url: &str) -> Result<String, HttpError> {
        let response = self.get(url, HTML_ACCEPT, None)?;
        Ok(String::from_utf8_lossy(&response.body).into_owned())
    }
}

pub fn is_pdf_body(body: &[u8]) -> bool {
    body.starts_with(b"%PDF-")
}

fn is_login_url(url: &str) -> bool {
    let lowered = url.to_ascii_lowercase();
    lowered.contains("/login") || lowered.contains("login?") || lowered.contains("signin")
}

fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}
