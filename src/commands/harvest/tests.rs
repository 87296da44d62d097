use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use super::browser::{BrowserAutomation, BrowserError, content_endpoint};
use super::cleanup::{ArticleCleaner, merge_hyphenated_lines};
use super::corpus::CorpusWriter;
use super::error::{ExtractionError, HttpError};
use super::extract::{OcrEngine, QualityThresholds, TextExtractor, TextLayer, TextSource};
use super::fetcher::{
    BrowserDownloadStrategy, FailureKind, FetchResult, FetchStrategy, PdfFetcher, io_failure,
};
use super::format::{JOURNAL_NAME, ProcessedArticle, RECORD_MARKER, format_record};
use super::html::{find_embedded_pdf_link, view_to_download_url};
use super::http::PageSource;
use super::indexer::{
    IssueIndexer, archive_page_url, parse_archive_page, parse_article_page, parse_issue_page,
};
use super::language::{
    ConfidenceTier, LanguageClassifier, LanguageGuess, LanguageIdentifier, LanguageVerdict,
    sample_windows,
};
use super::ocr_tools::{run_tool, split_pages};
use super::progress::{ArticleStatus, OutcomeRow, ProgressRecord, ProgressStore};
use super::retry::{RetryError, RetryPolicy, retry_with_backoff};
use super::run::render_harvest_command;
use super::script;
use crate::cli::{DEFAULT_ARCHIVE_URL, HarvestArgs, OcrMode};
use crate::model::{ArticleKey, ArticleRef, Issue, OutcomeCounts};

const SERBIAN_SENTENCE: &str = "Ovaj rad se bavi analizom osmanskih dokumenata koji su sačuvani u arhivu i predstavlja njihov značaj za historiju grada. ";
const ENGLISH_SENTENCE: &str =
    "The analysis of the sources and the documents is presented in this paper. ";

/// Says English whenever the word "the" appears, Serbian otherwise.
struct MarkerIdentifier;

impl LanguageIdentifier for MarkerIdentifier {
    fn identify(&self, text: &str) -> Option<LanguageGuess> {
        let lowered = text.to_lowercase();
        let code = if lowered.split_whitespace().any(|word| word == "the") {
            "en"
        } else {
            "sr"
        };
        Some(LanguageGuess {
            code: code.to_string(),
            confidence: 0.9,
        })
    }
}

struct FixedIdentifier(&'static str);

impl LanguageIdentifier for FixedIdentifier {
    fn identify(&self, _text: &str) -> Option<LanguageGuess> {
        Some(LanguageGuess {
            code: self.0.to_string(),
            confidence: 0.7,
        })
    }
}

fn classifier() -> LanguageClassifier {
    LanguageClassifier::new(Box::new(MarkerIdentifier))
}

fn accepted_verdict() -> LanguageVerdict {
    LanguageVerdict {
        code: "sr".to_string(),
        confidence_tier: ConfidenceTier::High,
        accepted: true,
        reason: "target_majority".to_string(),
    }
}

fn article(issue_id: &str, title: &str, pdf_url: &str) -> ArticleRef {
    ArticleRef {
        issue_id: issue_id.to_string(),
        title: title.to_string(),
        subtitle: None,
        section: Some("Članci".to_string()),
        authors: vec!["Ana Anić".to_string(), "Marko Marić".to_string()],
        page_range: Some("9-30".to_string()),
        pdf_url: pdf_url.to_string(),
        article_url: None,
    }
}

fn issue(id: &str, date: Option<&str>) -> Issue {
    Issue {
        id: id.to_string(),
        archive_url: format!("https://pof.ois.unsa.ba/index.php/pof/issue/view/{id}"),
        publication_date: date.map(str::to_string),
    }
}

#[test]
fn normalize_transliterates_serbian_cyrillic() {
    assert_eq!(script::normalize("Љубав и њега"), "Ljubav i njega");
    assert_eq!(script::normalize("Ђорђе Џаџић"), "Đorđe Džadžić");
    assert_eq!(script::normalize("Шабац 1867."), "Šabac 1867.");
}

#[test]
fn normalize_leaves_latin_text_alone_and_is_idempotent() {
    let latin = "Čaša, đak i ćup: Sarajevo 1878.";
    assert_eq!(script::normalize(latin), latin);

    let mixed = "Историја Bosne и Херцеговине";
    let once = script::normalize(mixed);
    assert_eq!(script::normalize(&once), once);
    assert!(!script::contains_cyrillic(&once));
}

#[test]
fn format_record_writes_fields_in_order_with_placeholders() {
    let mut article = article("25", "Османски дефтери", "https://pof.test/download/1");
    article.section = None;
    let processed = ProcessedArticle::new(
        article,
        "Prvi pasus teksta.\n\nDrugi pasus.".to_string(),
        accepted_verdict(),
    )
    .expect("accepted article");

    let record = format_record(JOURNAL_NAME, &issue("25", Some("2015")), &processed);

    let expected_head = "<***>\n\
NOVINA: Prilozi za orijentalnu filologiju\n\
DATUM: 2015\n\
RUBRIKA: N/A\n\
NADNASLOV: N/A\n\
NASLOV: Osmanski defteri\n\
PODNASLOV: N/A\n\
STRANA: 9-30\n\
AUTOR(I): Ana Anić; Marko Marić\n\
Prvi pasus teksta.";
    assert!(record.starts_with(expected_head), "{record}");
    assert!(record.ends_with("Drugi pasus.\n\n"));
}

#[test]
fn format_record_strips_markers_from_body_and_flattens_fields() {
    let mut article = article("25", "Naslov\npreko dva reda", "https://pof.test/download/1");
    article.authors.clear();
    let processed = ProcessedArticle::new(
        article,
        format!("Tekst {RECORD_MARKER} nastavak."),
        accepted_verdict(),
    )
    .expect("accepted article");

    let record = format_record(JOURNAL_NAME, &issue("25", None), &processed);
    assert_eq!(record.matches(RECORD_MARKER).count(), 1);
    assert!(record.contains("NASLOV: Naslov preko dva reda\n"));
    assert!(record.contains("DATUM: N/A\n"));
    assert!(record.contains("AUTOR(I): N/A\n"));
}

#[test]
fn processed_article_requires_accepted_verdict_and_text() {
    let rejected = LanguageVerdict {
        accepted: false,
        ..accepted_verdict()
    };
    let article = article("25", "Naslov", "https://pof.test/download/1");

    assert!(ProcessedArticle::new(article.clone(), "tekst".to_string(), rejected).is_none());
    assert!(ProcessedArticle::new(article, "   ".to_string(), accepted_verdict()).is_none());
}

#[test]
fn classify_accepts_serbian_majority() {
    let verdict = classifier().classify(&SERBIAN_SENTENCE.repeat(20));
    assert!(verdict.accepted);
    assert_eq!(verdict.code, "sr");
    assert_eq!(verdict.reason, "target_majority");
    assert_eq!(verdict.confidence_tier, ConfidenceTier::High);
}

#[test]
fn classify_rejects_english_text() {
    let verdict = classifier().classify(&ENGLISH_SENTENCE.repeat(30));
    assert!(!verdict.accepted);
    assert_eq!(verdict.code, "en");
    assert_eq!(verdict.reason, "language_en");
}

#[test]
fn classify_rejects_short_text() {
    let verdict = classifier().classify("Kratak tekst.");
    assert!(!verdict.accepted);
    assert_eq!(verdict.reason, "text_too_short");
}

#[test]
fn classify_rejects_target_guess_contradicted_by_english_markers() {
    let classifier = LanguageClassifier::new(Box::new(FixedIdentifier("hr")));
    let verdict = classifier.classify(&ENGLISH_SENTENCE.repeat(30));
    assert!(!verdict.accepted);
    assert_eq!(verdict.reason, "conflicting_foreign_markers");
}

#[test]
fn classify_rescues_close_slavic_guess_with_bcs_markers() {
    let classifier = LanguageClassifier::new(Box::new(FixedIdentifier("sl")));
    let verdict = classifier.classify(&SERBIAN_SENTENCE.repeat(20));
    assert!(verdict.accepted);
    assert_eq!(verdict.reason, "south_slavic_markers");
    assert_eq!(verdict.code, "hr");
    assert_eq!(verdict.confidence_tier, ConfidenceTier::Medium);
}

/// Flips between Croatian and Serbian on every call, as real identifiers do
/// on short Latin-script windows.
struct AlternatingIdentifier {
    calls: Cell<usize>,
}

impl LanguageIdentifier for AlternatingIdentifier {
    fn identify(&self, _text: &str) -> Option<LanguageGuess> {
        let call = self.calls.get();
        self.calls.set(call + 1);
        Some(LanguageGuess {
            code: if call % 2 == 0 { "hr" } else { "sr" }.to_string(),
            confidence: 0.7,
        })
    }
}

#[test]
fn classify_counts_hr_and_sr_windows_as_one_group() {
    let identifier = AlternatingIdentifier {
        calls: Cell::new(0),
    };
    let classifier = LanguageClassifier::new(Box::new(identifier));
    let sentence = "Ovaj rad se bavi analizom osmanskih dokumenata koji su pohranjeni u arhivu i predstavlja njihov doprinos za historiju grada. ";

    let verdict = classifier.classify(&sentence.repeat(60));
    assert!(verdict.accepted, "{verdict:?}");
    assert_eq!(verdict.reason, "target_majority");
    assert!(verdict.code == "hr" || verdict.code == "sr");
    assert_eq!(verdict.confidence_tier, ConfidenceTier::High);
}

#[test]
fn prefilter_rejects_only_clearly_foreign_titles() {
    let classifier = classifier();

    let english = classifier.prefilter("The Ottoman land registers of Bosnia", &[]);
    assert!(!english.accepted);
    assert_eq!(english.reason, "title_language_en");

    let bosnian = classifier.prefilter("Osmanski defteri u Bosni", &["Članci"]);
    assert!(bosnian.accepted);
    assert_eq!(bosnian.reason, "prefilter_pass");

    let turkish = classifier.prefilter("Giriş", &[]);
    assert!(!turkish.accepted);
    assert_eq!(turkish.reason, "title_foreign_keywords");

    let untitled = classifier.prefilter("  ", &[]);
    assert!(untitled.accepted);
    assert_eq!(untitled.reason, "no_title");
}

#[test]
fn prefilter_keeps_english_title_with_bcs_signal() {
    let verdict = classifier().prefilter("The review of Ćiro Truhelka", &[]);
    assert!(verdict.accepted);
}

#[test]
fn sample_windows_spreads_over_long_text() {
    let text = "a".repeat(10_000);
    let windows = sample_windows(&text, 4, 100);
    assert_eq!(windows.len(), 4);
    assert!(windows.iter().all(|window| window.chars().count() == 100));

    let short = sample_windows("abcdef", 4, 4);
    assert_eq!(short, vec!["abcd".to_string(), "ef".to_string()]);
}

#[test]
fn retry_succeeds_after_fewer_than_max_transient_failures() {
    let policy = RetryPolicy::new(3, Duration::ZERO, Duration::ZERO);
    let mut calls = 0;
    let result = retry_with_backoff(
        &policy,
        "flaky",
        |_: &String| true,
        |attempt| {
            calls += 1;
            if attempt < 3 {
                Err(format!("attempt {attempt} failed"))
            } else {
                Ok(attempt)
            }
        },
    );

    assert_eq!(result.expect("third attempt succeeds"), 3);
    assert_eq!(calls, 3);
}

#[test]
fn retry_gives_up_after_max_transient_failures() {
    let policy = RetryPolicy::new(3, Duration::ZERO, Duration::ZERO);
    let mut calls = 0;
    let result: Result<(), RetryError<String>> = retry_with_backoff(
        &policy,
        "down",
        |_: &String| true,
        |_| {
            calls += 1;
            Err("unavailable".to_string())
        },
    );

    let err = result.expect_err("budget exhausted");
    assert!(matches!(err, RetryError::Exhausted { attempts: 3, .. }));
    assert_eq!(calls, 3);
}

#[test]
fn retry_stops_on_permanent_failure() {
    let policy = RetryPolicy::new(5, Duration::ZERO, Duration::ZERO);
    let mut calls = 0;
    let result: Result<(), RetryError<String>> = retry_with_backoff(
        &policy,
        "gone",
        |_: &String| false,
        |_| {
            calls += 1;
            Err("404".to_string())
        },
    );

    assert!(matches!(
        result.expect_err("permanent"),
        RetryError::Permanent { attempts: 1, .. }
    ));
    assert_eq!(calls, 1);
}

#[test]
fn retry_delay_doubles_and_is_capped() {
    let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(500));
    let delays = (0..4)
        .map(|retry| policy.delay_before_retry(retry).as_millis())
        .collect::<Vec<u128>>();
    assert_eq!(delays, vec![100, 200, 400, 500]);
}

struct StaticTextLayer(Vec<String>);

impl TextLayer for StaticTextLayer {
    fn extract_pages(&self, _pdf_path: &Path) -> Result<Vec<String>, ExtractionError> {
        Ok(self.0.clone())
    }
}

struct FakeOcr {
    pages: usize,
    text: &'static str,
    fail: bool,
}

impl OcrEngine for FakeOcr {
    fn page_count(&self, _pdf_path: &Path) -> Result<usize, ExtractionError> {
        Ok(self.pages)
    }

    fn recognize_page(&self, pdf_path: &Path, page_number: usize) -> Result<String, ExtractionError> {
        if self.fail {
            return Err(ExtractionError::ToolFailed {
                tool: "tesseract",
                path: pdf_path.display().to_string(),
                message: format!("page {page_number} unreadable"),
            });
        }
        Ok(self.text.to_string())
    }
}

fn thresholds() -> QualityThresholds {
    QualityThresholds {
        min_text_chars: 50,
        min_alpha_ratio: 0.5,
    }
}

#[test]
fn extractor_keeps_good_text_layer() {
    let extractor = TextExtractor::new(
        Box::new(StaticTextLayer(vec![SERBIAN_SENTENCE.to_string()])),
        Some(Box::new(FakeOcr {
            pages: 1,
            text: "ocr",
            fail: false,
        })),
        OcrMode::Auto,
        thresholds(),
    );

    let text = extractor.extract(Path::new("a.pdf")).expect("text");
    assert_eq!(text.source, TextSource::Embedded);
    assert_eq!(text.page_count, 1);
}

#[test]
fn extractor_falls_back_to_ocr_for_scanned_pages() {
    let extractor = TextExtractor::new(
        Box::new(StaticTextLayer(vec![" ".to_string(), "12".to_string()])),
        Some(Box::new(FakeOcr {
            pages: 2,
            text: "Prepoznat tekst sa skenirane stranice.",
            fail: false,
        })),
        OcrMode::Auto,
        thresholds(),
    );

    let text = extractor.extract(Path::new("scan.pdf")).expect("ocr text");
    assert_eq!(text.source, TextSource::Ocr);
    assert_eq!(text.page_count, 2);
    assert_eq!(text.raw_text.split('\u{000C}').count(), 2);
}

#[test]
fn extractor_keeps_weak_text_layer_when_ocr_fails() {
    let extractor = TextExtractor::new(
        Box::new(StaticTextLayer(vec!["Kratko.".to_string()])),
        Some(Box::new(FakeOcr {
            pages: 1,
            text: "",
            fail: true,
        })),
        OcrMode::Auto,
        thresholds(),
    );

    let text = extractor.extract(Path::new("weak.pdf")).expect("text layer");
    assert_eq!(text.source, TextSource::Embedded);
    assert!(text.warnings.iter().any(|warning| warning.contains("OCR failed")));
}

#[test]
fn extractor_reports_empty_and_missing_tools() {
    let off = TextExtractor::new(
        Box::new(StaticTextLayer(vec![String::new()])),
        None,
        OcrMode::Off,
        thresholds(),
    );
    assert!(matches!(
        off.extract(Path::new("blank.pdf")),
        Err(ExtractionError::Empty { .. })
    ));

    let forced = TextExtractor::new(
        Box::new(StaticTextLayer(vec![SERBIAN_SENTENCE.to_string()])),
        None,
        OcrMode::Force,
        thresholds(),
    );
    assert!(matches!(
        forced.extract(Path::new("a.pdf")),
        Err(ExtractionError::ToolUnavailable { .. })
    ));
}

struct FullDiskTextLayer;

impl TextLayer for FullDiskTextLayer {
    fn extract_pages(&self, _pdf_path: &Path) -> Result<Vec<String>, ExtractionError> {
        Err(ExtractionError::Io(io::Error::from(io::ErrorKind::StorageFull)))
    }
}

#[test]
fn extractor_does_not_hide_a_full_disk_behind_ocr() {
    let extractor = TextExtractor::new(
        Box::new(FullDiskTextLayer),
        Some(Box::new(FakeOcr {
            pages: 1,
            text: "Prepoznat tekst sa skenirane stranice.",
            fail: false,
        })),
        OcrMode::Auto,
        thresholds(),
    );

    let err = extractor.extract(Path::new("a.pdf")).expect_err("full disk");
    assert!(err.is_storage_exhausted());
    assert!(!err.is_transient());
}

#[cfg(unix)]
fn shell(script: &str) -> std::process::Command {
    let mut command = std::process::Command::new("sh");
    command.arg("-c").arg(script);
    command
}

#[cfg(unix)]
#[test]
fn run_tool_drains_output_larger_than_a_pipe_buffer() {
    let stdout = run_tool(
        "sh",
        shell("i=0; while [ $i -lt 20000 ]; do echo 'redak izlaza alata'; i=$((i+1)); done"),
        Path::new("a.pdf"),
        Duration::from_secs(20),
    )
    .expect("large stdout");
    assert_eq!(stdout.lines().count(), 20000);

    let err = run_tool(
        "sh",
        shell("i=0; while [ $i -lt 20000 ]; do echo 'upozorenje' >&2; i=$((i+1)); done; exit 3"),
        Path::new("a.pdf"),
        Duration::from_secs(20),
    )
    .expect_err("non-zero exit");
    match err {
        ExtractionError::ToolFailed { message, .. } => {
            assert!(message.contains("upozorenje"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn split_pages_drops_trailing_form_feed() {
    assert_eq!(
        split_pages("prva\u{000C}druga\u{000C}"),
        vec!["prva".to_string(), "druga".to_string()]
    );
}

struct ScriptedStrategy {
    name: &'static str,
    result: FetchResult,
    calls: Rc<Cell<usize>>,
}

impl FetchStrategy for ScriptedStrategy {
    fn name(&self) -> &'static str {
        self.name
    }

    fn fetch(&self, _pdf_url: &str, destination: &Path) -> FetchResult {
        self.calls.set(self.calls.get() + 1);
        if let FetchResult::Success(_) = &self.result {
            fs::write(destination, b"%PDF-1.4 scripted").expect("write pdf");
            return FetchResult::Success(destination.to_path_buf());
        }
        self.result.clone()
    }
}

fn scripted(name: &'static str, result: FetchResult) -> (Box<dyn FetchStrategy>, Rc<Cell<usize>>) {
    let calls = Rc::new(Cell::new(0));
    let strategy = ScriptedStrategy {
        name,
        result,
        calls: Rc::clone(&calls),
    };
    (Box::new(strategy), calls)
}

#[test]
fn fetcher_tries_strategies_in_order_until_success() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (direct, direct_calls) = scripted("direct", FetchResult::TransientFailure("503".to_string()));
    let (browser, browser_calls) = scripted("browser", FetchResult::Success(PathBuf::new()));
    let fetcher = PdfFetcher::new(dir.path().join("pdfs"), vec![direct, browser]);

    let article = article("12", "Naslov", "https://pof.test/download/1");
    let result = fetcher.fetch(&article, 0);

    let expected = dir.path().join("pdfs").join("issue_12").join("article_001.pdf");
    assert_eq!(result, FetchResult::Success(expected));
    assert_eq!(direct_calls.get(), 1);
    assert_eq!(browser_calls.get(), 1);
}

#[test]
fn fetcher_reuses_existing_pdf() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (direct, calls) = scripted("direct", FetchResult::PermanentFailure("404".to_string()));
    let fetcher = PdfFetcher::new(dir.path().to_path_buf(), vec![direct]);

    let existing = fetcher.pdf_path_for("12", 4);
    fs::create_dir_all(existing.parent().expect("parent")).expect("mkdir");
    fs::write(&existing, b"%PDF-1.4 cached").expect("write");

    let article = article("12", "Naslov", "https://pof.test/download/5");
    assert_eq!(fetcher.fetch(&article, 4), FetchResult::Success(existing));
    assert_eq!(calls.get(), 0);
}

#[test]
fn fetcher_failure_is_transient_when_any_strategy_was() {
    let dir = tempfile::tempdir().expect("tempdir");
    let article = article("12", "Naslov", "https://pof.test/download/1");

    let (first, _) = scripted("direct", FetchResult::PermanentFailure("403".to_string()));
    let (second, _) = scripted("browser", FetchResult::TransientFailure("timeout".to_string()));
    let fetcher = PdfFetcher::new(dir.path().to_path_buf(), vec![first, second]);
    let failure = fetcher.fetch(&article, 0).into_result().expect_err("failure");
    assert!(failure.is_transient());
    assert!(failure.reason.contains("direct: 403"));

    let (only, _) = scripted("direct", FetchResult::PermanentFailure("403".to_string()));
    let fetcher = PdfFetcher::new(dir.path().to_path_buf(), vec![only]);
    assert!(!fetcher.fetch(&article, 0).into_result().expect_err("failure").is_transient());
}

#[test]
fn fetcher_stops_at_a_full_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (direct, _) = scripted(
        "direct",
        FetchResult::StorageExhausted("No space left on device".to_string()),
    );
    let (browser, browser_calls) = scripted("browser", FetchResult::Success(PathBuf::new()));
    let fetcher = PdfFetcher::new(dir.path().join("pdfs"), vec![direct, browser]);

    let article = article("12", "Naslov", "https://pof.test/download/1");
    let failure = fetcher.fetch(&article, 0).into_result().expect_err("full disk");
    assert_eq!(failure.kind, FailureKind::StorageExhausted);
    assert!(!failure.is_transient());
    assert_eq!(browser_calls.get(), 0);
}

#[test]
fn only_storage_errors_are_reported_as_exhaustion() {
    let full = io_failure(
        "failed to write a.pdf".to_string(),
        io::Error::from(io::ErrorKind::StorageFull),
    );
    assert!(matches!(full, FetchResult::StorageExhausted(_)));

    let quota = io_failure(
        "failed to write a.pdf".to_string(),
        io::Error::from(io::ErrorKind::QuotaExceeded),
    );
    assert!(matches!(quota, FetchResult::StorageExhausted(_)));

    let denied = io_failure(
        "failed to write a.pdf".to_string(),
        io::Error::from(io::ErrorKind::PermissionDenied),
    );
    assert!(matches!(denied, FetchResult::TransientFailure(_)));
}

struct DroppingBrowser {
    body: Option<&'static [u8]>,
    pages: RefCell<Vec<String>>,
}

impl BrowserAutomation for DroppingBrowser {
    fn trigger_download(&self, page_url: &str, download_dir: &Path) -> Result<(), BrowserError> {
        self.pages.borrow_mut().push(page_url.to_string());
        if let Some(body) = self.body {
            fs::write(download_dir.join("download_1.pdf"), body)?;
        }
        Ok(())
    }
}

#[test]
fn browser_strategy_moves_new_download_into_place() {
    let dir = tempfile::tempdir().expect("tempdir");
    let downloads = dir.path().join("downloads");
    let destination = dir.path().join("article_001.pdf");
    let strategy = BrowserDownloadStrategy::new(
        Box::new(DroppingBrowser {
            body: Some(b"%PDF-1.4 browser"),
            pages: RefCell::new(Vec::new()),
        }),
        downloads.clone(),
        Duration::from_secs(5),
    )
    .with_poll_interval(Duration::from_millis(10));

    let result = strategy.fetch("https://pof.test/article/view/1/2", &destination);
    assert_eq!(result, FetchResult::Success(destination.clone()));
    assert_eq!(fs::read(&destination).expect("pdf"), b"%PDF-1.4 browser");
    assert!(!downloads.join("download_1.pdf").exists());
}

#[test]
fn browser_strategy_times_out_as_transient() {
    let dir = tempfile::tempdir().expect("tempdir");
    let strategy = BrowserDownloadStrategy::new(
        Box::new(DroppingBrowser {
            body: None,
            pages: RefCell::new(Vec::new()),
        }),
        dir.path().join("downloads"),
        Duration::from_millis(50),
    )
    .with_poll_interval(Duration::from_millis(10));

    let result = strategy.fetch("https://pof.test/article/view/1/2", &dir.path().join("a.pdf"));
    assert!(matches!(result, FetchResult::TransientFailure(_)));
}

struct FullDiskBrowser;

impl BrowserAutomation for FullDiskBrowser {
    fn trigger_download(&self, _page_url: &str, _download_dir: &Path) -> Result<(), BrowserError> {
        Err(BrowserError::Io(io::Error::from(io::ErrorKind::StorageFull)))
    }
}

#[test]
fn browser_strategy_reports_full_download_dir() {
    let dir = tempfile::tempdir().expect("tempdir");
    let strategy = BrowserDownloadStrategy::new(
        Box::new(FullDiskBrowser),
        dir.path().join("downloads"),
        Duration::from_millis(50),
    );

    let result = strategy.fetch("https://pof.test/article/view/1/2", &dir.path().join("a.pdf"));
    assert!(matches!(result, FetchResult::StorageExhausted(_)));
}

#[test]
fn browser_endpoint_encodes_token() {
    let endpoint = content_endpoint("http://localhost:3000/", Some("a&b=c d")).expect("endpoint");
    assert_eq!(endpoint.as_str(), "http://localhost:3000/content?token=a%26b%3Dc+d");

    let nested = content_endpoint("https://chrome.example/browserless", None).expect("endpoint");
    assert_eq!(nested.as_str(), "https://chrome.example/browserless/content");

    assert!(content_endpoint("not a url", Some("t")).is_err());
}

const ARCHIVE_HTML: &str = r#"
<html><body>
  <div class="obj_issue_summary">
    <a class="cover" href="https://pof.ois.unsa.ba/index.php/pof/issue/view/25"><img src="c.jpg"></a>
    <h2><a class="title" href="https://pof.ois.unsa.ba/index.php/pof/issue/view/25">Broj 70</a></h2>
    <div class="series">Vol. 70 (2021)</div>
  </div>
  <div class="obj_issue_summary">
    <h2><a class="title" href="/index.php/pof/issue/view/24">Broj 69</a></h2>
    <div class="series">Vol. 69 (2020)</div>
  </div>
</body></html>
"#;

const ISSUE_HTML: &str = r#"
<html><body>
  <h1>Broj 70 (2021)</h1>
  <div class="sections">
    <div class="section">
      <h2>Članci</h2>
      <div class="obj_article_summary">
        <h3 class="title">
          <a href="https://pof.ois.unsa.ba/index.php/pof/article/view/101">Osmanski defteri <span class="subtitle">Izvori za historiju</span></a>
        </h3>
        <div class="meta">
          <div class="authors">Ana Anić, Marko Marić</div>
          <div class="pages">9-30</div>
        </div>
        <ul class="galleys_links">
          <li><a class="obj_galley_link pdf" href="https://pof.ois.unsa.ba/index.php/pof/article/view/101/95">PDF</a></li>
        </ul>
      </div>
    </div>
  </div>
</body></html>
"#;

#[test]
fn parse_archive_page_reads_issue_ids_and_years() {
    let page_url = "https://pof.ois.unsa.ba/index.php/pof/issue/archive";
    let issues = parse_archive_page(ARCHIVE_HTML, page_url).expect("issues");

    assert_eq!(issues.len(), 2);
    assert_eq!(issues[0].id, "25");
    assert_eq!(issues[0].publication_date.as_deref(), Some("2021"));
    assert_eq!(
        issues[1].archive_url,
        "https://pof.ois.unsa.ba/index.php/pof/issue/view/24"
    );
    assert_eq!(issues[1].year().as_deref(), Some("2020"));
}

#[test]
fn parse_issue_page_reads_article_metadata() {
    let page_url = "https://pof.ois.unsa.ba/index.php/pof/issue/view/25";
    let (year, summaries) = parse_issue_page(ISSUE_HTML, page_url).expect("summaries");

    assert_eq!(year.as_deref(), Some("2021"));
    assert_eq!(summaries.len(), 1);
    let summary = &summaries[0];
    assert_eq!(summary.title, "Osmanski defteri");
    assert_eq!(summary.subtitle.as_deref(), Some("Izvori za historiju"));
    assert_eq!(summary.section.as_deref(), Some("Članci"));
    assert_eq!(summary.authors, vec!["Ana Anić", "Marko Marić"]);
    assert_eq!(summary.page_range.as_deref(), Some("9-30"));
    assert_eq!(
        summary.pdf_url.as_deref(),
        Some("https://pof.ois.unsa.ba/index.php/pof/article/view/101/95")
    );
}

#[test]
fn parse_issue_page_without_summaries_is_an_error() {
    let result = parse_issue_page("<html><body><h1>Prazno</h1></body></html>", "https://pof.test/x");
    assert!(result.is_err());
}

#[test]
fn parse_article_page_resolves_relative_pdf_link() {
    let html = r#"
        <h1 class="page_title">Osmanski defteri</h1>
        <div class="authors"><span class="name">Ana Anić</span></div>
        <div class="pages"><span class="value">9-30</span></div>
        <div class="published"><span class="value">2021-06-01</span></div>
        <a class="obj_galley_link pdf" href="/index.php/pof/article/view/101/95">PDF</a>
    "#;
    let details =
        parse_article_page(html, "https://pof.ois.unsa.ba/index.php/pof/article/view/101")
            .expect("details");

    assert_eq!(details.title.as_deref(), Some("Osmanski defteri"));
    assert_eq!(details.authors, vec!["Ana Anić"]);
    assert_eq!(details.published.as_deref(), Some("2021-06-01"));
    assert_eq!(
        details.pdf_url.as_deref(),
        Some("https://pof.ois.unsa.ba/index.php/pof/article/view/101/95")
    );
}

#[test]
fn viewer_links_resolve_to_download_urls() {
    let viewer = r#"<iframe id="pdf" src="https://pof.ois.unsa.ba/plugins/generic/pdfJsViewer/pdf.js/web/viewer.html?file=https%3A%2F%2Fpof.ois.unsa.ba%2Findex.php%2Fpof%2Farticle%2Fdownload%2F101%2F95"></iframe>"#;
    assert_eq!(
        find_embedded_pdf_link(viewer, "https://pof.ois.unsa.ba/index.php/pof/article/view/101/95")
            .as_deref(),
        Some("https://pof.ois.unsa.ba/index.php/pof/article/download/101/95")
    );

    let download = r#"<a class="download" href="/index.php/pof/article/download/101/95/200">Preuzmi</a>"#;
    assert_eq!(
        find_embedded_pdf_link(download, "https://pof.ois.unsa.ba/index.php/pof/article/view/101/95")
            .as_deref(),
        Some("https://pof.ois.unsa.ba/index.php/pof/article/download/101/95/200")
    );

    assert_eq!(
        view_to_download_url("https://pof.test/index.php/pof/article/view/7/3").as_deref(),
        Some("https://pof.test/index.php/pof/article/download/7/3")
    );
    assert!(view_to_download_url("https://pof.test/files/a.pdf").is_none());
}

struct StaticSite {
    pages: HashMap<String, String>,
    requests: RefCell<Vec<String>>,
}

impl PageSource for StaticSite {
    fn fetch_html(&self, url: &str) -> Result<String, HttpError> {
        self.requests.borrow_mut().push(url.to_string());
        self.pages.get(url).cloned().ok_or_else(|| HttpError::Status {
            url: url.to_string(),
            status: 404,
        })
    }
}

#[test]
fn list_issues_stops_when_pagination_ends() {
    let archive = "https://pof.ois.unsa.ba/index.php/pof/issue/archive";
    let site = StaticSite {
        pages: HashMap::from([(archive.to_string(), ARCHIVE_HTML.to_string())]),
        requests: RefCell::new(Vec::new()),
    };
    let indexer = IssueIndexer::new(
        &site,
        archive,
        RetryPolicy::new(2, Duration::ZERO, Duration::ZERO),
    );

    let issues = indexer.list_issues().expect("issues");
    assert_eq!(issues.len(), 2);
    assert_eq!(
        *site.requests.borrow(),
        vec![archive.to_string(), archive_page_url(archive, 2)]
    );
}

#[test]
fn list_articles_fills_issue_year_and_builds_refs() {
    let issue_url = "https://pof.ois.unsa.ba/index.php/pof/issue/view/25";
    let site = StaticSite {
        pages: HashMap::from([(issue_url.to_string(), ISSUE_HTML.to_string())]),
        requests: RefCell::new(Vec::new()),
    };
    let indexer = IssueIndexer::new(
        &site,
        "https://pof.ois.unsa.ba/index.php/pof/issue/archive",
        RetryPolicy::new(1, Duration::ZERO, Duration::ZERO),
    );

    let listing = indexer.list_articles(&issue("25", None)).expect("listing");
    assert_eq!(listing.issue.publication_date.as_deref(), Some("2021"));
    assert_eq!(listing.articles.len(), 1);
    assert_eq!(listing.articles[0].issue_id, "25");
    assert_eq!(site.requests.borrow().len(), 1);
}

fn outcome(key: &ArticleKey, status: ArticleStatus, category: Option<&str>) -> OutcomeRow {
    OutcomeRow {
        key: key.clone(),
        status,
        stage: "done".to_string(),
        category: category.map(str::to_string),
        detail: None,
        pdf_path: None,
        pdf_sha256: None,
    }
}

#[test]
fn progress_store_round_trips_checkpoint_and_ledger() {
    let mut store = ProgressStore::open_in_memory().expect("store");
    assert!(store.load().expect("load").is_none());

    let first = ArticleKey::parse("25|https://pof.test/download/1").expect("key");
    let second = ArticleKey::parse("25|https://pof.test/download/2").expect("key");
    let record = ProgressRecord::default()
        .advance(0, first.clone(), ArticleStatus::Done, 120)
        .advance(0, second.clone(), ArticleStatus::Skipped, 120);

    store
        .save(
            &record,
            &[
                outcome(&first, ArticleStatus::Done, None),
                outcome(&second, ArticleStatus::Skipped, Some("language_en")),
            ],
        )
        .expect("save");

    let loaded = store.load().expect("load").expect("record");
    assert_eq!(loaded, record);
    assert_eq!(loaded.last_article_key, Some(second.clone()));
    assert_eq!(
        loaded.counts,
        OutcomeCounts {
            processed: 1,
            skipped: 1,
            failed: 0
        }
    );

    let done = store.done_keys().expect("done keys");
    assert!(done.contains(&first));
    assert!(!done.contains(&second));
    assert_eq!(
        store.reason_counts(ArticleStatus::Skipped).expect("reasons").get("language_en"),
        Some(&1)
    );
    assert_eq!(store.ledger_counts().expect("ledger"), loaded.counts);

    store.reset().expect("reset");
    assert!(store.load().expect("load").is_none());
    assert!(store.done_keys().expect("done keys").is_empty());
}

#[test]
fn progress_store_upserts_retried_articles() {
    let mut store = ProgressStore::open_in_memory().expect("store");
    let key = ArticleKey::parse("25|https://pof.test/download/1").expect("key");

    let failed = ProgressRecord::default().advance(0, key.clone(), ArticleStatus::Failed, 0);
    store
        .save(&failed, &[outcome(&key, ArticleStatus::Failed, Some("fetch_permanent"))])
        .expect("save failed");
    let done = failed.advance(0, key.clone(), ArticleStatus::Done, 50);
    store
        .save(&done, &[outcome(&key, ArticleStatus::Done, None)])
        .expect("save done");

    let ledger = store.ledger_counts().expect("ledger");
    assert_eq!(ledger.processed, 1);
    assert_eq!(ledger.failed, 0);
}

#[test]
fn article_key_parse_rejects_malformed_input() {
    assert!(ArticleKey::parse("no-separator").is_err());
    assert!(ArticleKey::parse("25|").is_err());
    let key = ArticleKey::parse(" 25 | https://pof.test/a ").expect("key");
    assert_eq!(key.to_string(), "25|https://pof.test/a");
}

#[test]
fn cleaner_removes_running_headers_headings_and_bibliography() {
    let cleaner = ArticleCleaner::new().expect("cleaner");
    let raw = [
        "POF 70 (2021) 11\nUDK 94(497.6)\nOvaj rad se bavi istraži-\nvanjem osmanskih izvora.\n1. Uvod\nDrugi red teksta nastavlja\nna sljedećoj liniji.\n\n11",
        "POF 70 (2021) 12\nKako navodi literatura (Anić, 2010), defteri su važni [3].\nKljučne riječi: defteri\nTreći pasus o izvorima.\n12",
        "POF 70 (2021) 13\nZavršni pasus teksta o defterima.\nLiteratura\nAnić, A. 2010. Defteri. Sarajevo.\n13",
    ]
    .join("\u{000C}");

    let (clean, stats) = cleaner.clean(&raw);

    assert!(clean.contains("istraživanjem osmanskih izvora"), "{clean}");
    assert!(clean.contains("Završni pasus"));
    assert!(!clean.contains("POF 70"));
    assert!(!clean.contains("UDK"));
    assert!(!clean.contains("Uvod"));
    assert!(!clean.contains("Ključne"));
    assert!(!clean.contains("Sarajevo"));
    assert!(!clean.contains("(Anić, 2010)"));
    assert!(!clean.contains("[3]"));
    assert_eq!(stats.header_lines_removed, 3);
    assert_eq!(stats.headings_removed, 1);
    assert_eq!(stats.dehyphenation_merges, 1);
    assert_eq!(stats.sections_cut, 1);
    assert_eq!(stats.citations_removed, 2);
}

#[test]
fn cleaner_drops_leading_abstract_and_keeps_paragraphs() {
    let cleaner = ArticleCleaner::new().expect("cleaner");
    let raw = "Abstract\nThis paper deals with registers.\n\nPrvi pasus\nu dva reda.\n\nDrugi pasus teksta koji je dovoljno dug da sažetak ostane na početku.";

    let (clean, _) = cleaner.clean(raw);
    assert_eq!(
        clean,
        "Prvi pasus u dva reda.\n\nDrugi pasus teksta koji je dovoljno dug da sažetak ostane na početku."
    );
}

#[test]
fn merge_hyphenated_lines_handles_non_ascii_letters() {
    let (lines, merges) = merge_hyphenated_lines(vec![
        "đač-".to_string(),
        "ki dom".to_string(),
        "Bosna i Herce-".to_string(),
        "Govina".to_string(),
    ]);
    assert_eq!(merges, 1);
    assert_eq!(lines[0], "đački dom");
    assert_eq!(lines[1], "Bosna i Herce-");
}

#[test]
fn corpus_writer_truncates_bytes_past_checkpoint() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("all_articles.txt");
    fs::write(&path, "abcdef").expect("seed");

    let mut corpus = CorpusWriter::open(&path, 3).expect("open");
    assert_eq!(corpus.append("xyz").expect("append"), 6);
    corpus.sync().expect("sync");
    drop(corpus);

    assert_eq!(fs::read_to_string(&path).expect("read"), "abcxyz");
}

#[test]
fn corpus_writer_refuses_file_shorter_than_checkpoint() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("all_articles.txt");
    fs::write(&path, "ab").expect("seed");

    assert!(CorpusWriter::open(&path, 10).is_err());
}

fn harvest_args() -> HarvestArgs {
    HarvestArgs {
        output_dir: PathBuf::from("scraped_articles"),
        archive_url: DEFAULT_ARCHIVE_URL.to_string(),
        limit_issues: Some(2),
        limit_articles: None,
        save_interval: 10,
        resume_from: None,
        fresh: false,
        refresh_index: true,
        browserless_url: Some("http://localhost:3000".to_string()),
        browserless_token: Some("secret-token".to_string()),
        no_browser_fallback: false,
        max_attempts: 5,
        base_delay_ms: 2000,
        max_delay_ms: 60_000,
        request_timeout_secs: 30,
        article_delay_ms: 3000,
        download_wait_secs: 60,
        ocr_mode: OcrMode::Auto,
        ocr_lang: "hrv+srp_latn+srp".to_string(),
        ocr_min_text_chars: 200,
        ocr_min_alpha_ratio: 0.6,
        ocr_page_timeout_secs: 120,
    }
}

#[test]
fn render_harvest_command_includes_flags_and_hides_token() {
    let command = render_harvest_command(&harvest_args());
    assert!(command.starts_with("pof-harvest harvest --output-dir scraped_articles"));
    assert!(command.contains("--limit-issues 2"));
    assert!(command.contains("--refresh-index"));
    assert!(command.contains("--ocr-mode auto --ocr-lang hrv+srp_latn+srp"));
    assert!(command.contains("--browserless-token <redacted>"));
    assert!(!command.contains("secret-token"));
}

#[test]
fn render_harvest_command_omits_ocr_settings_when_off() {
    let mut args = harvest_args();
    args.ocr_mode = OcrMode::Off;
    args.browserless_token = None;

    let command = render_harvest_command(&args);
    assert!(command.contains("--ocr-mode off"));
    assert!(!command.contains("--ocr-lang"));
    assert!(!command.contains("--browserless-token"));
}
