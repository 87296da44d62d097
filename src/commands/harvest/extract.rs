use std::path::Path;

use tracing::{info, warn};

use super::error::ExtractionError;
use crate::cli::OcrMode;

const PAGE_SEPARATOR: char = '\u{000C}';
const MAX_GARBLED_RATIO: f64 = 0.05;

/// Text-from-PDF collaborator: one string per page, in page order.
pub trait TextLayer {
    fn extract_pages(&self, pdf_path: &Path) -> Result<Vec<String>, ExtractionError>;
}

/// Text-from-image collaborator, driven page by page.
pub trait OcrEngine {
    fn page_count(&self, pdf_path: &Path) -> Result<usize, ExtractionError>;
    fn recognize_page(&self, pdf_path: &Path, page_number: usize)
    -> Result<String, ExtractionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextSource {
    Embedded,
    Ocr,
}

impl TextSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Embedded => "embedded",
            Self::Ocr => "ocr",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractedText {
    /// Pages joined with form feeds.
    pub raw_text: String,
    pub source: TextSource,
    pub page_count: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityThresholds {
    pub min_text_chars: usize,
    pub min_alpha_ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextQuality {
    pub text_chars: usize,
    pub alpha_ratio: f64,
    pub garbled_ratio: f64,
}

impl TextQuality {
    pub fn measure(text: &str) -> Self {
        let mut text_chars = 0usize;
        let mut alphabetic = 0usize;
        let mut garbled = 0usize;
        for character in text.chars().filter(|character| !character.is_whitespace()) {
            text_chars += 1;
            if character.is_alphabetic() {
                alphabetic += 1;
            }
            if is_garbled(character) {
                garbled += 1;
            }
        }

        let ratio = |count: usize| {
            if text_chars == 0 {
                0.0
            } else {
                count as f64 / text_chars as f64
            }
        };

        Self {
            text_chars,
            alpha_ratio: ratio(alphabetic),
            garbled_ratio: ratio(garbled),
        }
    }

    pub fn passes(&self, thresholds: &QualityThresholds) -> bool {
        self.text_chars >= thresholds.min_text_chars
            && self.alpha_ratio >= thresholds.min_alpha_ratio
            && self.garbled_ratio <= MAX_GARBLED_RATIO
    }
}

/// Text layer first; rasterize and OCR only when the layer is missing or
/// looks like a scan.
pub struct TextExtractor {
    text_layer: Box<dyn TextLayer>,
    ocr: Option<Box<dyn OcrEngine>>,
    mode: OcrMode,
    thresholds: QualityThresholds,
}

impl TextExtractor {
    pub fn new(
        text_layer: Box<dyn TextLayer>,
        ocr: Option<Box<dyn OcrEngine>>,
        mode: OcrMode,
        thresholds: QualityThresholds,
    ) -> Self {
        Self {
            text_layer,
            ocr,
            mode,
            thresholds,
        }
    }

    pub fn extract(&self, pdf_path: &Path) -> Result<ExtractedText, ExtractionError> {
        let mut warnings = Vec::new();
        let pages = match self.text_layer.extract_pages(pdf_path) {
            Ok(pages) => pages,
            Err(err) if err.is_storage_exhausted() => return Err(err),
            Err(err) if !matches!(self.mode, OcrMode::Off) && self.ocr.is_some() => {
                warnings.push(format!("text layer failed for {}: {err}", pdf_path.display()));
                Vec::new()
            }
            Err(err) => return Err(err),
        };
        let embedded = pages.join(&PAGE_SEPARATOR.to_string());
        let quality = TextQuality::measure(&embedded);

        let needs_ocr = match self.mode {
            OcrMode::Off => false,
            OcrMode::Force => true,
            OcrMode::Auto => !quality.passes(&self.thresholds),
        };
        if !needs_ocr {
            return embedded_or_empty(pdf_path, embedded, pages.len(), quality, warnings);
        }

        let Some(ocr) = &self.ocr else {
            if matches!(self.mode, OcrMode::Force) {
                return Err(ExtractionError::ToolUnavailable { tool: "tesseract" });
            }
            let message = format!(
                "OCR mode '{}' wanted for {} but OCR tools are unavailable",
                self.mode.as_str(),
                pdf_path.display()
            );
            warn!(path = %pdf_path.display(), "OCR unavailable, keeping text layer");
            warnings.push(message);
            return embedded_or_empty(pdf_path, embedded, pages.len(), quality, warnings);
        };

        info!(
            path = %pdf_path.display(),
            text_chars = quality.text_chars,
            alpha_ratio = quality.alpha_ratio,
            mode = self.mode.as_str(),
            "running OCR"
        );

        match run_ocr(ocr.as_ref(), pdf_path) {
            Ok(ocr_pages) => {
                let ocr_text = ocr_pages.join(&PAGE_SEPARATOR.to_string());
                if TextQuality::measure(&ocr_text).text_chars > 0 {
                    return Ok(ExtractedText {
                        raw_text: ocr_text,
                        source: TextSource::Ocr,
                        page_count: ocr_pages.len(),
                        warnings,
                    });
                }
                warnings.push(format!("OCR produced no text for {}", pdf_path.display()));
            }
            Err(err) if matches!(self.mode, OcrMode::Force) || err.is_storage_exhausted() => {
                return Err(err);
            }
            Err(err) if err.is_transient() && quality.text_chars == 0 => return Err(err),
            Err(err) => {
                warn!(path = %pdf_path.display(), error = %err, "OCR failed, keeping text layer");
                warnings.push(format!("OCR failed for {}: {err}", pdf_path.display()));
            }
        }

        embedded_or_empty(pdf_path, embedded, pages.len(), quality, warnings)
    }
}

fn run_ocr(ocr: &dyn OcrEngine, pdf_path: &Path) -> Result<Vec<String>, ExtractionError> {
    let page_count = ocr.page_count(pdf_path)?;
    (1..=page_count)
        .map(|page_number| ocr.recognize_page(pdf_path, page_number))
        .collect()
}

fn embedded_or_empty(
    pdf_path: &Path,
    embedded: String,
    page_count: usize,
    quality: TextQuality,
    warnings: Vec<String>,
) -> Result<ExtractedText, ExtractionError> {
    if quality.text_chars == 0 {
        return Err(ExtractionError::Empty {
            path: pdf_path.display().to_string(),
        });
    }

    Ok(ExtractedText {
        raw_text: embedded,
        source: TextSource::Embedded,
        page_count,
        warnings,
    })
}

fn is_garbled(character: char) -> bool {
    character == '\u{FFFD}'
        || ('\u{E000}'..='\u{F8FF}').contains(&character)
        || (character.is_control() && character != PAGE_SEPARATOR)
}
