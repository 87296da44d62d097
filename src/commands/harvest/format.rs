use super::language::LanguageVerdict;
use super::script;
use crate::model::{ArticleRef, Issue};

pub const JOURNAL_NAME: &str = "Prilozi za orijentalnu filologiju";
pub const RECORD_MARKER: &str = "<***>";
const MISSING: &str = "N/A";

/// An accepted article, ready to be written. Only built from an accepted
/// verdict and non-empty text.
#[derive(Debug, Clone)]
pub struct ProcessedArticle {
    pub article: ArticleRef,
    pub normalized_text: String,
    pub verdict: LanguageVerdict,
}

impl ProcessedArticle {
    pub fn new(
        article: ArticleRef,
        normalized_text: String,
        verdict: LanguageVerdict,
    ) -> Option<Self> {
        if !verdict.accepted || normalized_text.trim().is_empty() {
            return None;
        }
        Some(Self {
            article,
            normalized_text,
            verdict,
        })
    }
}

/// One corpus record: the marker, fixed-order `KEY: value` lines, the body
/// and a trailing blank line.
pub fn format_record(journal: &str, issue: &Issue, processed: &ProcessedArticle) -> String {
    let article = &processed.article;
    let authors = if article.authors.is_empty() {
        MISSING.to_string()
    } else {
        article
            .authors
            .iter()
            .map(|author| field(Some(author.as_str())))
            .collect::<Vec<String>>()
            .join("; ")
    };

    let mut record = String::new();
    record.push_str(RECORD_MARKER);
    record.push('\n');
    push_line(&mut record, "NOVINA", &field(Some(journal)));
    push_line(&mut record, "DATUM", &field(issue.year().as_deref()));
    push_line(&mut record, "RUBRIKA", &field(article.section.as_deref()));
    push_line(&mut record, "NADNASLOV", MISSING);
    push_line(&mut record, "NASLOV", &field(Some(article.title.as_str())));
    push_line(&mut record, "PODNASLOV", &field(article.subtitle.as_deref()));
    push_line(&mut record, "STRANA", &field(article.page_range.as_deref()));
    push_line(&mut record, "AUTOR(I)", &authors);
    record.push_str(processed.normalized_text.replace(RECORD_MARKER, "").trim());
    record.push_str("\n\n");
    record
}

fn push_line(record: &mut String, key: &str, value: &str) {
    record.push_str(key);
    record.push_str(": ");
    record.push_str(value);
    record.push('\n');
}

/// Latin-script, single-line field value; empty becomes `N/A`.
fn field(value: Option<&str>) -> String {
    let flattened = value
        .map(|value| {
            script::normalize(value)
                .split_whitespace()
                .collect::<Vec<&str>>()
                .join(" ")
        })
        .unwrap_or_default();
    if flattened.is_empty() {
        MISSING.to_string()
    } else {
        flattened
    }
}
