use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use regex::Regex;

const TRAILING_SECTION_MIN_POSITION: f64 = 0.4;
const MAX_HEADING_CHARS: usize = 80;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupStats {
    pub header_lines_removed: usize,
    pub footer_lines_removed: usize,
    pub noise_lines_removed: usize,
    pub headings_removed: usize,
    pub dehyphenation_merges: usize,
    pub sections_cut: usize,
    pub citations_removed: usize,
}

/// Turns the raw page text of an article into reflowed body paragraphs.
pub struct ArticleCleaner {
    page_number: Regex,
    underscore_rule: Regex,
    metadata_line: Regex,
    keywords: Regex,
    numbered_heading: Regex,
    roman_heading: Regex,
    named_heading: Regex,
    trailing_section: Regex,
    leading_abstract: Regex,
    bracket_citation: Regex,
    author_year_citation: Regex,
    paragraph_break: Regex,
}

impl ArticleCleaner {
    pub fn new() -> Result<Self> {
        Ok(Self {
            page_number: compile(r"^\s*\d{1,4}\s*$")?,
            underscore_rule: compile(r"_{10,}")?,
            metadata_line: compile(r"(?:\bUDK\b|\bDOI:)")?,
            keywords: compile(r"(?i)ključne\s+rije?či\s*:.*$")?,
            numbered_heading: compile(r"^\s*\d{1,2}(?:\.\d{1,2})*\.?\s+\S")?,
            roman_heading: compile(r"^\s*[IVX]+\.\s+\S")?,
            named_heading: compile(r"(?i)^\s*(?:uvod|zaključak|zaključek)\s*:?\s*$")?,
            trailing_section: compile(
                r"(?mi)^[ \t]*(?:literatura|izvori i literatura|references|bibliography|bibliografija|summary|abstract)[ \t]*:?[ \t]*$",
            )?,
            leading_abstract: compile(r"(?mi)^[ \t]*(?:abstract|summary)[ \t]*:?[ \t]*$")?,
            bracket_citation: compile(r"\[\d+(?:\s*[,–-]\s*\d+)*\]")?,
            author_year_citation: compile(
                r"\(\p{Lu}[\p{L}'-]+(?:\s+et al\.)?(?:\s*(?:&|i|and)\s*\p{Lu}[\p{L}'-]+)?,?\s*\d{4}[a-z]?(?::\s*\d+(?:[–-]\d+)?)?\)",
            )?,
            paragraph_break: compile(r"\n[ \t]*\n")?,
        })
    }

    pub fn clean(&self, raw: &str) -> (String, CleanupStats) {
        let mut stats = CleanupStats::default();

        let pages = raw
            .split('\u{000C}')
            .map(|page| page.replace(['\u{0000}', '\u{FFFD}'], ""))
            .collect::<Vec<String>>();
        let header_candidates = detect_repeated_edge_lines(&pages, true);
        let footer_candidates = detect_repeated_edge_lines(&pages, false);

        let mut lines = Vec::<String>::new();
        for page in &pages {
            let mut page_lines = page.lines().map(str::to_string).collect::<Vec<String>>();

            if let Some(index) = first_nonempty_line_index(&page_lines)
                && header_candidates.contains(&normalize_edge_line(&page_lines[index]))
            {
                page_lines.remove(index);
                stats.header_lines_removed += 1;
            }
            if let Some(index) = last_nonempty_line_index(&page_lines)
                && footer_candidates.contains(&normalize_edge_line(&page_lines[index]))
            {
                page_lines.remove(index);
                stats.footer_lines_removed += 1;
            }

            lines.extend(
                page_lines
                    .iter()
                    .filter_map(|line| self.clean_line(line, &mut stats)),
            );
        }

        let (lines, merges) = merge_hyphenated_lines(lines);
        stats.dehyphenation_merges = merges;

        let text = lines.join("\n");
        let text = self.cut_trailing_sections(&text, &mut stats);
        let text = self.drop_leading_abstract(&text, &mut stats);
        let text = self.strip_citations(&text, &mut stats);

        (self.reflow(&text), stats)
    }

    fn clean_line(&self, line: &str, stats: &mut CleanupStats) -> Option<String> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Some(String::new());
        }

        if self.page_number.is_match(trimmed) || self.metadata_line.is_match(trimmed) {
            stats.noise_lines_removed += 1;
            return None;
        }

        let short = trimmed.chars().count() < MAX_HEADING_CHARS;
        if self.named_heading.is_match(trimmed)
            || (short
                && (self.numbered_heading.is_match(trimmed)
                    || self.roman_heading.is_match(trimmed)))
        {
            stats.headings_removed += 1;
            return None;
        }

        let without_rule = self.underscore_rule.replace_all(line, "");
        let without_keywords = self.keywords.replace(&without_rule, "");
        if without_keywords.trim().is_empty() {
            stats.noise_lines_removed += 1;
            return None;
        }

        Some(without_keywords.trim_end().to_string())
    }

    /// Cuts bibliography and foreign-language summary blocks that close the
    /// article. Headings in the first part of the text are left alone.
    fn cut_trailing_sections(&self, text: &str, stats: &mut CleanupStats) -> String {
        let threshold = (text.len() as f64 * TRAILING_SECTION_MIN_POSITION) as usize;
        match self
            .trailing_section
            .find_iter(text)
            .find(|found| found.start() >= threshold)
        {
            Some(found) => {
                stats.sections_cut += 1;
                text[..found.start()].to_string()
            }
            None => text.to_string(),
        }
    }

    fn drop_leading_abstract(&self, text: &str, stats: &mut CleanupStats) -> String {
        let threshold = (text.len() as f64 * TRAILING_SECTION_MIN_POSITION) as usize;
        let Some(heading) = self
            .leading_abstract
            .find(text)
            .filter(|found| found.start() < threshold)
        else {
            return text.to_string();
        };

        let paragraph = text[heading.end()..].trim_start_matches(['\n', ' ', '\t']);
        let paragraph_end = self
            .paragraph_break
            .find(paragraph)
            .map(|found| found.end())
            .unwrap_or(paragraph.len());

        stats.sections_cut += 1;
        format!(
            "{}{}",
            &text[..heading.start()],
            &paragraph[paragraph_end..]
        )
    }

    fn strip_citations(&self, text: &str, stats: &mut CleanupStats) -> String {
        stats.citations_removed += self.bracket_citation.find_iter(text).count();
        let text = self.bracket_citation.replace_all(text, "");
        stats.citations_removed += self.author_year_citation.find_iter(&text).count();
        self.author_year_citation.replace_all(&text, "").into_owned()
    }

    fn reflow(&self, text: &str) -> String {
        self.paragraph_break
            .split(text)
            .map(|paragraph| {
                paragraph
                    .split_whitespace()
                    .collect::<Vec<&str>>()
                    .join(" ")
            })
            .filter(|paragraph| !paragraph.is_empty())
            .collect::<Vec<String>>()
            .join("\n\n")
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).with_context(|| format!("invalid cleanup pattern {pattern}"))
}

fn detect_repeated_edge_lines(pages: &[String], header: bool) -> HashSet<String> {
    if pages.len() < 3 {
        return HashSet::new();
    }

    let mut counts = HashMap::<String, usize>::new();
    for page in pages {
        let lines = page.lines().map(str::trim).collect::<Vec<&str>>();
        let candidate = if header {
            lines.iter().copied().find(|line| !line.is_empty())
        } else {
            lines.iter().rev().copied().find(|line| !line.is_empty())
        };

        let Some(candidate) = candidate else {
            continue;
        };

        let normalized = normalize_edge_line(candidate);
        if normalized.is_empty() || normalized.chars().count() > 120 {
            continue;
        }
        *counts.entry(normalized).or_insert(0) += 1;
    }

    counts
        .into_iter()
        .filter_map(|(candidate, count)| if count >= 3 { Some(candidate) } else { None })
        .collect()
}

/// Running headers differ only by page number, so digits are dropped.
fn normalize_edge_line(input: &str) -> String {
    input
        .split_whitespace()
        .filter(|word| !word.chars().all(|character| character.is_ascii_digit()))
        .collect::<Vec<&str>>()
        .join(" ")
        .to_lowercase()
}

fn first_nonempty_line_index(lines: &[String]) -> Option<usize> {
    lines.iter().position(|line| !line.trim().is_empty())
}

fn last_nonempty_line_index(lines: &[String]) -> Option<usize> {
    lines.iter().rposition(|line| !line.trim().is_empty())
}

pub(super) fn merge_hyphenated_lines(lines: Vec<String>) -> (Vec<String>, usize) {
    let mut merged = Vec::<String>::with_capacity(lines.len());
    let mut merges = 0usize;
    let mut lines = lines.into_iter().peekable();

    while let Some(current) = lines.next() {
        let mut current = current;
        while let Some(next) = lines.peek() {
            if !should_merge_hyphenated_pair(&current, next) {
                break;
            }
            let joined = format!(
                "{}{}",
                current.trim_end().trim_end_matches('-'),
                next.trim_start()
            );
            current = joined;
            merges += 1;
            lines.next();
        }
        merged.push(current);
    }

    (merged, merges)
}

fn should_merge_hyphenated_pair(current: &str, next: &str) -> bool {
    let left = current.trim_end();
    if !left.ends_with('-') {
        return false;
    }

    let right = next.trim_start();
    let starts_with_lowercase = right
        .chars()
        .next()
        .map(|character| character.is_lowercase())
        .unwrap_or(false);
    if !starts_with_lowercase {
        return false;
    }

    left.trim_end_matches('-')
        .chars()
        .last()
        .map(|character| character.is_alphabetic())
        .unwrap_or(false)
}
