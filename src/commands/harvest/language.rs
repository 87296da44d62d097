use std::collections::BTreeMap;

use whatlang::Lang;

use super::script::{self, is_cyrillic};

const TARGET_CODES: &[&str] = &["bs", "hr", "sr"];
const SOUTH_SLAVIC_CODES: &[&str] = &["bs", "hr", "sr", "sl", "mk"];
const CYRILLIC_CONFUSABLE_CODES: &[&str] = &["ru", "uk", "bg"];
const PREFILTER_FOREIGN_CODES: &[&str] = &["en", "tr", "de", "fr", "ar", "fa"];

const MIN_LETTERS: usize = 200;
const SAMPLE_WINDOWS: usize = 12;
const WINDOW_CHARS: usize = 600;
const MIN_WINDOW_LETTERS: usize = 50;
const MAJORITY_SHARE: f64 = 0.6;
const HIGH_SHARE: f64 = 0.8;
const HIGH_CONFIDENCE: f64 = 0.5;
const CONFLICT_DENSITY: f64 = 0.03;
const PREFILTER_CONFIDENCE: f64 = 0.5;

const BCS_TOKENS: &[&str] = &[
    "je", "i", "u", "na", "se", "da", "su", "za", "od", "koji", "koja", "koje", "kao", "što",
    "ili", "iz", "sa", "ali", "bio", "bila", "bilo", "nije", "biti", "prema", "kod", "kroz",
    "također", "takođe", "među", "gdje", "gde", "kada", "tako", "samo", "još", "već", "njegov",
    "njegova", "svoj", "svoje", "godine", "vrijeme", "vreme",
];
const ENGLISH_TOKENS: &[&str] = &[
    "the", "and", "of", "in", "is", "that", "with", "for", "this", "are", "which", "from", "by",
    "was", "were", "has", "have", "been",
];
const TURKISH_TOKENS: &[&str] = &[
    "ve", "bir", "bu", "için", "ile", "olarak", "olan", "daha", "gibi", "kadar", "sonra",
    "ancak", "veya", "değil", "çok",
];
const FOREIGN_TITLE_TOKENS: &[&str] = &[
    "introduction", "abstract", "summary", "review", "analysis", "studies", "research", "özet",
    "giriş", "sonuç", "analiz", "araştırma", "çalışma",
];
const BCS_DIACRITICS: &[char] = &['č', 'ć', 'đ', 'Č', 'Ć', 'Đ'];
const TURKISH_DIACRITICS: &[char] = &['ı', 'ğ', 'ş', 'İ', 'Ğ', 'Ş'];

#[derive(Debug, Clone, PartialEq)]
pub struct LanguageGuess {
    pub code: String,
    pub confidence: f64,
}

/// Text-to-language collaborator. Codes are ISO 639-1 where one exists.
pub trait LanguageIdentifier {
    fn identify(&self, text: &str) -> Option<LanguageGuess>;
}

pub struct WhatlangIdentifier;

impl LanguageIdentifier for WhatlangIdentifier {
    fn identify(&self, text: &str) -> Option<LanguageGuess> {
        let info = whatlang::detect(text)?;
        Some(LanguageGuess {
            code: iso_639_1(info.lang()).to_string(),
            confidence: info.confidence(),
        })
    }
}

fn iso_639_1(lang: Lang) -> &'static str {
    match lang {
        Lang::Hrv => "hr",
        Lang::Srp => "sr",
        Lang::Slv => "sl",
        Lang::Mkd => "mk",
        Lang::Bul => "bg",
        Lang::Rus => "ru",
        Lang::Ukr => "uk",
        Lang::Eng => "en",
        Lang::Tur => "tr",
        Lang::Deu => "de",
        Lang::Fra => "fr",
        Lang::Ara => "ar",
        Lang::Pes => "fa",
        other => other.code(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

impl ConfidenceTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LanguageVerdict {
    pub code: String,
    pub confidence_tier: ConfidenceTier,
    pub accepted: bool,
    pub reason: String,
}

impl LanguageVerdict {
    fn accept(code: &str, confidence_tier: ConfidenceTier, reason: &str) -> Self {
        Self {
            code: code.to_string(),
            confidence_tier,
            accepted: true,
            reason: reason.to_string(),
        }
    }

    fn reject(code: &str, confidence_tier: ConfidenceTier, reason: String) -> Self {
        Self {
            code: code.to_string(),
            confidence_tier,
            accepted: false,
            reason,
        }
    }
}

/// Marker-word and diacritic counts over Latin-script text.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct KeywordSignals {
    pub tokens: usize,
    pub bcs_hits: usize,
    pub english_hits: usize,
    pub turkish_hits: usize,
    pub bcs_diacritics: usize,
    pub turkish_diacritics: usize,
}

impl KeywordSignals {
    pub fn scan(latin_text: &str) -> Self {
        let mut signals = Self::default();
        for token in tokens(latin_text) {
            signals.tokens += 1;
            let token = token.as_str();
            if BCS_TOKENS.contains(&token) {
                signals.bcs_hits += 1;
            }
            if ENGLISH_TOKENS.contains(&token) {
                signals.english_hits += 1;
            }
            if TURKISH_TOKENS.contains(&token) {
                signals.turkish_hits += 1;
            }
        }
        for character in latin_text.chars() {
            if BCS_DIACRITICS.contains(&character) {
                signals.bcs_diacritics += 1;
            }
            if TURKISH_DIACRITICS.contains(&character) {
                signals.turkish_diacritics += 1;
            }
        }
        signals
    }

    fn density(&self, hits: usize) -> f64 {
        if self.tokens == 0 {
            0.0
        } else {
            hits as f64 / self.tokens as f64
        }
    }

    pub fn bcs_density(&self) -> f64 {
        self.density(self.bcs_hits)
    }

    pub fn foreign_density(&self) -> f64 {
        self.density(self.english_hits.max(self.turkish_hits))
    }

    /// English or Turkish marker words at least as dense as BCS ones.
    pub fn has_foreign_conflict(&self) -> bool {
        let foreign = self.foreign_density();
        foreign >= CONFLICT_DENSITY && foreign >= self.bcs_density()
    }

    pub fn bcs_dominant(&self) -> bool {
        self.bcs_hits > 0 && self.bcs_density() > self.foreign_density()
    }
}

pub struct LanguageClassifier {
    identifier: Box<dyn LanguageIdentifier>,
}

impl LanguageClassifier {
    pub fn new(identifier: Box<dyn LanguageIdentifier>) -> Self {
        Self { identifier }
    }

    /// Cheap gate on title and listing metadata. Rejects only when the
    /// title is clearly foreign and carries nothing that looks like BCS.
    pub fn prefilter(&self, title: &str, metadata: &[&str]) -> LanguageVerdict {
        if title.trim().is_empty() {
            return LanguageVerdict::accept("und", ConfidenceTier::Low, "no_title");
        }

        let mut combined = title.to_string();
        for value in metadata.iter().filter(|value| !value.trim().is_empty()) {
            combined.push(' ');
            combined.push_str(value);
        }
        let latin = script::normalize(&combined);
        let signals = KeywordSignals::scan(&latin);
        let bcs_signal = signals.bcs_hits > 0
            || signals.bcs_diacritics > 0
            || script::contains_cyrillic(&combined);

        let guess = self.identifier.identify(&latin);
        let code = guess
            .as_ref()
            .map(|guess| guess.code.clone())
            .unwrap_or_else(|| "und".to_string());
        let confidence = guess.as_ref().map(|guess| guess.confidence).unwrap_or(0.0);
        let tier = if confidence >= PREFILTER_CONFIDENCE {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        };

        if !bcs_signal
            && PREFILTER_FOREIGN_CODES.contains(&code.as_str())
            && confidence >= PREFILTER_CONFIDENCE
        {
            return LanguageVerdict::reject(&code, tier, format!("title_language_{code}"));
        }

        let title_tokens = tokens(&script::normalize(title));
        let foreign_title = title_tokens
            .iter()
            .any(|token| FOREIGN_TITLE_TOKENS.contains(&token.as_str()));
        if !bcs_signal && (foreign_title || signals.turkish_diacritics > 0) {
            return LanguageVerdict::reject(&code, tier, "title_foreign_keywords".to_string());
        }

        LanguageVerdict::accept(&code, tier, "prefilter_pass")
    }

    /// Authoritative decision on the full extracted text: letter-weighted
    /// majority over sampled windows, checked against marker keywords.
    pub fn classify(&self, full_text: &str) -> LanguageVerdict {
        let letters = full_text.chars().filter(|c| c.is_alphabetic()).count();
        if letters < MIN_LETTERS {
            return LanguageVerdict::reject("und", ConfidenceTier::Low, "text_too_short".to_string());
        }

        let mut weights = BTreeMap::<String, f64>::new();
        let mut confidence_sums = BTreeMap::<String, f64>::new();
        let mut total_weight = 0.0;
        for window in sample_windows(full_text, SAMPLE_WINDOWS, WINDOW_CHARS) {
            let window_letters = window.chars().filter(|c| c.is_alphabetic()).count();
            if window_letters < MIN_WINDOW_LETTERS {
                continue;
            }
            let weight = window_letters as f64;
            total_weight += weight;
            if let Some(guess) = self.identifier.identify(&window) {
                *weights.entry(guess.code.clone()).or_insert(0.0) += weight;
                *confidence_sums.entry(guess.code).or_insert(0.0) += guess.confidence * weight;
            }
        }

        let mut top: Option<(&str, f64)> = None;
        for (code, weight) in &weights {
            if top.is_none_or(|(_, best)| *weight > best) {
                top = Some((code.as_str(), *weight));
            }
        }
        let Some((top_code, top_weight)) = top else {
            return LanguageVerdict::reject(
                "und",
                ConfidenceTier::Low,
                "language_unidentified".to_string(),
            );
        };

        let signals = KeywordSignals::scan(&script::normalize(full_text));

        // bs, hr and sr are one class: windows split between them still add
        // up to a single majority.
        let target_weight: f64 = TARGET_CODES
            .iter()
            .filter_map(|code| weights.get(*code))
            .sum();
        let heaviest_target = TARGET_CODES
            .iter()
            .filter_map(|code| weights.get(*code).map(|weight| (*code, *weight)))
            .max_by(|left, right| left.1.total_cmp(&right.1))
            .map(|(code, _)| code);
        if let Some(target_code) = heaviest_target {
            let group_share = target_weight / total_weight;
            if group_share >= MAJORITY_SHARE {
                if signals.has_foreign_conflict() {
                    return LanguageVerdict::reject(
                        target_code,
                        ConfidenceTier::Low,
                        "conflicting_foreign_markers".to_string(),
                    );
                }
                let target_confidence: f64 = TARGET_CODES
                    .iter()
                    .filter_map(|code| confidence_sums.get(*code))
                    .sum::<f64>()
                    / target_weight;
                let tier = tier_for(group_share, target_confidence);
                return LanguageVerdict::accept(target_code, tier, "target_majority");
            }
        }

        let share = top_weight / total_weight;
        let confidence = confidence_sums.get(top_code).copied().unwrap_or(0.0) / top_weight;
        let tier = tier_for(share, confidence);

        // Close Slavic languages and Cyrillic neighbours are routinely
        // confused with BCS by the identifier.
        let mostly_cyrillic = cyrillic_letter_share(full_text) >= 0.5;
        let group_weight: f64 = weights
            .iter()
            .filter(|(code, _)| {
                SOUTH_SLAVIC_CODES.contains(&code.as_str())
                    || (mostly_cyrillic && CYRILLIC_CONFUSABLE_CODES.contains(&code.as_str()))
            })
            .map(|(_, weight)| weight)
            .sum();
        if group_weight / total_weight >= MAJORITY_SHARE
            && signals.bcs_dominant()
            && !signals.has_foreign_conflict()
            && (signals.bcs_diacritics > 0 || mostly_cyrillic)
        {
            let code = heaviest_target.unwrap_or(if mostly_cyrillic { "sr" } else { "hr" });
            return LanguageVerdict::accept(code, ConfidenceTier::Medium, "south_slavic_markers");
        }

        let reason = if TARGET_CODES.contains(&top_code) {
            "mixed_language".to_string()
        } else {
            format!("language_{top_code}")
        };
        LanguageVerdict::reject(top_code, tier, reason)
    }
}

fn tier_for(share: f64, confidence: f64) -> ConfidenceTier {
    if share >= HIGH_SHARE && confidence >= HIGH_CONFIDENCE {
        ConfidenceTier::High
    } else if share >= MAJORITY_SHARE {
        ConfidenceTier::Medium
    } else {
        ConfidenceTier::Low
    }
}

/// Up to `count` evenly spaced windows of `width` characters.
pub(super) fn sample_windows(text: &str, count: usize, width: usize) -> Vec<String> {
    let characters = text.chars().collect::<Vec<char>>();
    if characters.is_empty() || count == 0 {
        return Vec::new();
    }
    if characters.len() <= count * width {
        return characters
            .chunks(width)
            .map(|chunk| chunk.iter().collect())
            .collect();
    }

    let last_start = characters.len() - width;
    (0..count)
        .map(|index| {
            let start = if count == 1 {
                0
            } else {
                index * last_start / (count - 1)
            };
            characters[start..start + width].iter().collect()
        })
        .collect()
}

fn cyrillic_letter_share(text: &str) -> f64 {
    let mut letters = 0usize;
    let mut cyrillic = 0usize;
    for character in text.chars().filter(|c| c.is_alphabetic()) {
        letters += 1;
        if is_cyrillic(character) {
            cyrillic += 1;
        }
    }
    if letters == 0 {
        0.0
    } else {
        cyrillic as f64 / letters as f64
    }
}

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphabetic())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}
