//! Russian text normalization for TTS.
//!
//! Pipeline (order matters, each pass feeds the next):
//! 1. Percentages → "<number> <процент/процента/процентов>"
//! 2. Emoji, quotes and odd punctuation cleanup, whitespace collapse
//! 3. Numbers → words
//! 4. Latin words → Cyrillic phonetic spelling
//! 5. Drop everything outside the Cyrillic allow-list

pub mod numbers;
pub mod phoneticizer;
pub mod transcriber;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::warn;

use self::phoneticizer::Phoneticizer;
use self::transcriber::PhoneticTranscriber;

static PERCENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:[.,]\d+)?)\s*%").expect("valid regex"));
static LETTER_DIGIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([a-zA-Zа-яА-ЯёЁ])(\d)").expect("valid regex"));
static DIGIT_LETTER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d)([a-zA-Zа-яА-ЯёЁ])").expect("valid regex"));
static NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d+(?:[.,]\d+)?\b").expect("valid regex"));
static LATIN_WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[a-zA-Z]+\b").expect("valid regex"));
static DISALLOWED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^а-яА-ЯёЁ.,?! -]+").expect("valid regex"));
static SPACES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

const DELETED_CHARS: &str = "=#$“”„«»<>*\"‘’‚‹›'/";

pub struct TextNormalizer {
    phoneticizer: Phoneticizer,
}

impl TextNormalizer {
    pub fn new(transcriber: Box<dyn PhoneticTranscriber>) -> Self {
        Self {
            phoneticizer: Phoneticizer::new(transcriber),
        }
    }

    /// Make arbitrary text speakable. An empty result means nothing to say.
    pub fn normalize(&self, text: &str) -> String {
        let text = expand_percentages(text);
        let text = clean_symbols(&text);
        let text = expand_numbers(&text);
        let text = self.phoneticize_latin(&text);
        final_cleanup(&text)
    }

    fn phoneticize_latin(&self, text: &str) -> String {
        LATIN_WORD_RE
            .replace_all(text, |caps: &Captures| self.phoneticizer.phoneticize(&caps[0]))
            .into_owned()
    }
}

fn expand_percentages(text: &str) -> String {
    let expanded = PERCENT_RE.replace_all(text, |caps: &Captures| {
        let number = caps[1].replace(',', ".");
        let word = numbers::percent_word(&number);
        format!(" {number} {word} ")
    });
    expanded.replace('%', " процентов ")
}

fn is_emoji(c: char) -> bool {
    matches!(
        c,
        '\u{1F600}'..='\u{1F64F}'
            | '\u{1F300}'..='\u{1F5FF}'
            | '\u{1F680}'..='\u{1F6FF}'
            | '\u{1F1E0}'..='\u{1F1FF}'
            | '\u{2600}'..='\u{26FF}'
            | '\u{2700}'..='\u{27BF}'
            | '\u{1F900}'..='\u{1F9FF}'
            | '\u{200D}'
            | '\u{FE0F}'
    )
}

fn clean_symbols(text: &str) -> String {
    let chars: Vec<char> = text
        .chars()
        .filter(|c| !is_emoji(*c) && !DELETED_CHARS.contains(*c))
        .collect();

    let mut cleaned = String::with_capacity(text.len());
    for (i, &c) in chars.iter().enumerate() {
        match c {
            '—' | '–' | '−' => cleaned.push('-'),
            '\u{a0}' | '\n' | '\t' => cleaned.push(' '),
            '…' => cleaned.push('.'),
            // a colon is a pause unless it separates digits (time, ratios)
            ':' if !chars.get(i + 1).is_some_and(|next| next.is_numeric()) => {
                cleaned.push(',')
            }
            _ => cleaned.push(c),
        }
    }

    let cleaned = LETTER_DIGIT_RE.replace_all(&cleaned, "$1 $2");
    let cleaned = DIGIT_LETTER_RE.replace_all(&cleaned, "$1 $2");
    collapse_spaces(&cleaned)
}

fn expand_numbers(text: &str) -> String {
    NUMBER_RE
        .replace_all(text, |caps: &Captures| {
            let numeral = &caps[0];
            match numbers::numeral_to_words(numeral) {
                Ok(words) => words,
                Err(e) => {
                    warn!("Could not normalize number '{numeral}': {e}");
                    numeral.to_string()
                }
            }
        })
        .into_owned()
}

/// Keep only Cyrillic letters, `.,?!-` and single spaces.
pub fn final_cleanup(text: &str) -> String {
    collapse_spaces(&DISALLOWED_RE.replace_all(text, " "))
}

fn collapse_spaces(text: &str) -> String {
    SPACES_RE.replace_all(text, " ").trim().to_string()
}
