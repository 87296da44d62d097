use std::collections::HashSet;

use regex::Regex;
use scraper::{ElementRef, Html};
use tracing::{debug, info, warn};

use super::error::{DiscoveryError, HttpError};
use super::html::{collapse_whitespace, element_text, first_href, first_text, selector};
use super::http::PageSource;
use super::retry::{RetryPolicy, retry_with_backoff};
use crate::model::{ArticleRef, Issue};

const MAX_ARCHIVE_PAGES: usize = 20;

/// Articles of one issue, with the issue's publication date filled from the
/// issue page when the archive listing did not carry it.
#[derive(Debug, Clone)]
pub struct IssueListing {
    pub issue: Issue,
    pub articles: Vec<ArticleRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(super) struct ArticleSummary {
    pub(super) title: String,
    pub(super) subtitle: Option<String>,
    pub(super) section: Option<String>,
    pub(super) authors: Vec<String>,
    pub(super) page_range: Option<String>,
    pub(super) pdf_url: Option<String>,
    pub(super) article_url: Option<String>,
    pub(super) published: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(super) struct ArticleDetails {
    pub(super) title: Option<String>,
    pub(super) authors: Vec<String>,
    pub(super) page_range: Option<String>,
    pub(super) pdf_url: Option<String>,
    pub(super) published: Option<String>,
}

pub struct IssueIndexer<'a> {
    source: &'a dyn PageSource,
    archive_url: String,
    retry: RetryPolicy,
}

impl<'a> IssueIndexer<'a> {
    pub fn new(source: &'a dyn PageSource, archive_url: &str, retry: RetryPolicy) -> Self {
        Self {
            source,
            archive_url: archive_url.trim_end_matches('/').to_string(),
            retry,
        }
    }

    /// Walks the paged archive in order until a page adds no new issues.
    pub fn list_issues(&self) -> Result<Vec<Issue>, DiscoveryError> {
        let mut issues = Vec::new();
        let mut seen = HashSet::new();

        for page in 1..=MAX_ARCHIVE_PAGES {
            let url = archive_page_url(&self.archive_url, page);
            let html = match self.fetch(&url) {
                Ok(html) => html,
                Err(err) if page > 1 => {
                    debug!(url = %url, error = %err, "archive pagination ended");
                    break;
                }
                Err(err) => return Err(err),
            };

            let found = parse_archive_page(&html, &url)?;
            let fresh = found
                .into_iter()
                .filter(|issue| seen.insert(issue.id.clone()))
                .collect::<Vec<Issue>>();
            if fresh.is_empty() {
                break;
            }

            info!(url = %url, issues = fresh.len(), "discovered archive issues");
            issues.extend(fresh);
        }

        if issues.is_empty() {
            return Err(DiscoveryError::NoIssues {
                url: self.archive_url.clone(),
            });
        }

        Ok(issues)
    }

    pub fn list_articles(&self, issue: &Issue) -> Result<IssueListing, DiscoveryError> {
        let html = self.fetch(&issue.archive_url)?;
        let (heading_year, summaries) = parse_issue_page(&html, &issue.archive_url)?;

        let mut issue = Issue {
            publication_date: issue.publication_date.clone().or(heading_year),
            ..issue.clone()
        };

        let mut articles = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let summary = self.enrich(summary);
            if issue.publication_date.is_none() {
                issue.publication_date = summary.published.as_deref().and_then(find_year);
            }
            let Some(pdf_url) = summary.pdf_url else {
                warn!(
                    issue_id = %issue.id,
                    title = %summary.title,
                    "article has no PDF link, dropping"
                );
                continue;
            };

            articles.push(ArticleRef {
                issue_id: issue.id.clone(),
                title: summary.title,
                subtitle: summary.subtitle,
                section: summary.section,
                authors: summary.authors,
                page_range: summary.page_range,
                pdf_url,
                article_url: summary.article_url,
            });
        }

        let mut seen = HashSet::new();
        articles.retain(|article| seen.insert(article.pdf_url.clone()));

        info!(issue_id = %issue.id, articles = articles.len(), "indexed issue");
        Ok(IssueListing { issue, articles })
    }

    /// Fills missing PDF link, authors or pages from the article landing page.
    fn enrich(&self, summary: ArticleSummary) -> ArticleSummary {
        let complete =
            summary.pdf_url.is_some() && !summary.authors.is_empty() && summary.page_range.is_some();
        let Some(article_url) = summary.article_url.clone() else {
            return summary;
        };
        if complete {
            return summary;
        }

        let details = match self
            .fetch(&article_url)
            .and_then(|html| parse_article_page(&html, &article_url))
        {
            Ok(details) => details,
            Err(err) => {
                warn!(url = %article_url, error = %err, "could not read article page");
                return summary;
            }
        };

        ArticleSummary {
            title: if summary.title.is_empty() {
                details.title.unwrap_or_default()
            } else {
                summary.title
            },
            authors: if summary.authors.is_empty() {
                details.authors
            } else {
                summary.authors
            },
            page_range: summary.page_range.or(details.page_range),
            pdf_url: summary.pdf_url.or(details.pdf_url),
            published: summary.published.or(details.published),
            ..summary
        }
    }

    fn fetch(&self, url: &str) -> Result<String, DiscoveryError> {
        retry_with_backoff(&self.retry, url, HttpError::is_transient, |_| {
            self.source.fetch_html(url)
        })
        .map_err(|err| DiscoveryError::Fetch {
            url: url.to_string(),
            source: err.into_inner(),
        })
    }
}

pub fn archive_page_url(archive_url: &str, page: usize) -> String {
    if page <= 1 {
        archive_url.to_string()
    } else {
        format!("{archive_url}/{page}")
    }
}

pub(super) fn parse_archive_page(html: &str, page_url: &str) -> Result<Vec<Issue>, DiscoveryError> {
    let document = Html::parse_document(html);
    let summary_selector = selector(".obj_issue_summary")?;
    let link_selector = selector("a.cover, a.title, h2 a, h3 a")?;
    let series_selector = selector(".series")?;
    let cover_selector = selector("a.cover")?;
    let issue_id_regex = issue_id_regex()?;

    let mut issues = Vec::new();
    for summary in document.select(&summary_selector) {
        let Some(url) = first_href(summary, &link_selector, page_url) else {
            continue;
        };
        let date_text =
            first_text(summary, &series_selector).unwrap_or_else(|| element_text(summary));
        issues.push(Issue {
            id: issue_id_for(&url, &issue_id_regex),
            archive_url: url,
            publication_date: find_year(&date_text),
        });
    }

    if issues.is_empty() {
        for link in document.select(&cover_selector) {
            let Some(url) = link
                .value()
                .attr("href")
                .and_then(|href| super::html::resolve_url(page_url, href))
            else {
                continue;
            };
            issues.push(Issue {
                id: issue_id_for(&url, &issue_id_regex),
                archive_url: url,
                publication_date: None,
            });
        }
    }

    let mut seen = HashSet::new();
    issues.retain(|issue| seen.insert(issue.id.clone()));
    Ok(issues)
}

/// Returns the year printed in the issue heading and the article summaries
/// in page order, grouped by section when the page has sections.
pub(super) fn parse_issue_page(
    html: &str,
    page_url: &str,
) -> Result<(Option<String>, Vec<ArticleSummary>), DiscoveryError> {
    let document = Html::parse_document(html);
    let heading_selector = selector("h1")?;
    let section_selector = selector(".sections .section")?;
    let section_name_selector = selector("h2")?;
    let summary_selector = selector(".obj_article_summary")?;

    let heading_year = document
        .select(&heading_selector)
        .next()
        .map(element_text)
        .and_then(|heading| find_parenthesized_year(&heading));

    let mut summaries = Vec::new();
    for section in document.select(&section_selector) {
        let section_name = first_text(section, &section_name_selector);
        for summary in section.select(&summary_selector) {
            if let Some(parsed) = parse_article_summary(summary, section_name.clone(), page_url)? {
                summaries.push(parsed);
            }
        }
    }

    if summaries.is_empty() {
        let mut found_any = false;
        for summary in document.select(&summary_selector) {
            found_any = true;
            if let Some(parsed) = parse_article_summary(summary, None, page_url)? {
                summaries.push(parsed);
            }
        }
        if !found_any {
            return Err(DiscoveryError::NoArticles {
                url: page_url.to_string(),
            });
        }
    }

    Ok((heading_year, summaries))
}

fn parse_article_summary(
    summary: ElementRef<'_>,
    section: Option<String>,
    page_url: &str,
) -> Result<Option<ArticleSummary>, DiscoveryError> {
    let title_link_selector = selector(".title a")?;
    let subtitle_selector = selector(".subtitle")?;
    let authors_selector = selector(".meta .authors")?;
    let pages_selector = selector(".meta .pages")?;
    let pdf_selector = selector("a.obj_galley_link.pdf")?;

    let title_link = summary.select(&title_link_selector).next();
    let (title, subtitle, article_url) = match title_link {
        Some(link) => {
            let full = element_text(link);
            let subtitle = first_text(link, &subtitle_selector);
            let title = match &subtitle {
                Some(subtitle) => full
                    .strip_suffix(subtitle.as_str())
                    .map(|head| head.trim().to_string())
                    .unwrap_or_else(|| full.clone()),
                None => full,
            };
            let article_url = link
                .value()
                .attr("href")
                .and_then(|href| super::html::resolve_url(page_url, href));
            (title, subtitle, article_url)
        }
        None => (String::new(), None, None),
    };

    let pdf_url = first_href(summary, &pdf_selector, page_url);
    if article_url.is_none() && pdf_url.is_none() {
        return Ok(None);
    }

    Ok(Some(ArticleSummary {
        title,
        subtitle,
        section: section.filter(|name| !name.is_empty()),
        authors: first_text(summary, &authors_selector)
            .map(|authors| split_authors(&authors))
            .unwrap_or_default(),
        page_range: first_text(summary, &pages_selector),
        pdf_url,
        article_url,
        published: None,
    }))
}

pub(super) fn parse_article_page(html: &str, page_url: &str) -> Result<ArticleDetails, DiscoveryError> {
    let document = Html::parse_document(html);
    let root = document.root_element();
    let title_selector = selector("h1.page_title")?;
    let author_name_selector = selector(".authors .name")?;
    let pages_selector = selector(".pages .value")?;
    let pdf_selector = selector("a.obj_galley_link.pdf")?;
    let published_selector = selector(".published .value")?;

    Ok(ArticleDetails {
        title: first_text(root, &title_selector),
        authors: document
            .select(&author_name_selector)
            .map(element_text)
            .filter(|name| !name.is_empty())
            .collect(),
        page_range: first_text(root, &pages_selector),
        pdf_url: first_href(root, &pdf_selector, page_url),
        published: first_text(root, &published_selector),
    })
}

fn split_authors(raw: &str) -> Vec<String> {
    raw.split([',', ';'])
        .map(collapse_whitespace)
        .filter(|name| !name.is_empty())
        .collect()
}

fn issue_id_regex() -> Result<Regex, DiscoveryError> {
    Regex::new(r"/issue/view/([^/?#]+)").map_err(|_| DiscoveryError::Selector {
        selector: "issue id pattern".to_string(),
    })
}

fn issue_id_for(url: &str, pattern: &Regex) -> String {
    pattern
        .captures(url)
        .and_then(|captures| captures.get(1))
        .map(|value| value.as_str().to_string())
        .unwrap_or_else(|| url.to_string())
}

fn find_parenthesized_year(text: &str) -> Option<String> {
    let pattern = Regex::new(r"\(((?:19|20)\d{2})\)").ok()?;
    pattern
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|value| value.as_str().to_string())
        .or_else(|| find_year(text))
}

fn find_year(text: &str) -> Option<String> {
    let pattern = Regex::new(r"\b(?:19|20)\d{2}\b").ok()?;
    pattern.find(text).map(|found| found.as_str().to_string())
}

