//! English → Russian phonetic spelling.
//!
//! Resolution order, first hit wins:
//! 1. exception dictionary, exact case (acronyms like "AI", "IT")
//! 2. exception dictionary, lower-cased
//! 3. G2P transcription mapped through the phonetic symbol table
//! 4. letter-by-letter transliteration

use std::collections::HashMap;

use once_cell::sync::Lazy;
use tracing::{debug, warn};

use super::transcriber::PhoneticTranscriber;

/// Markers a transcriber emits for words it could not transcribe.
const FAILURE_MARKERS: [char; 2] = ['*', '❓'];

static EXCEPTIONS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        // brands and names
        ("google", "гугл"),
        ("apple", "эпл"),
        ("microsoft", "майкрософт"),
        ("samsung", "самсунг"),
        ("toyota", "тойота"),
        ("volkswagen", "фольцваген"),
        ("coca", "кока"),
        ("cola", "кола"),
        ("pepsi", "пэпси"),
        ("whatsapp", "вотсап"),
        ("telegram", "телеграм"),
        ("youtube", "ютуб"),
        ("instagram", "инстаграм"),
        ("facebook", "фэйсбук"),
        ("twitter", "твиттер"),
        ("iphone", "айфон"),
        ("tesla", "тесла"),
        ("spacex", "спэйс икс"),
        ("amazon", "амазон"),
        ("python", "пайтон"),
        ("AI", "эй+ай"),
        ("api", "эйпиай"),
        ("IT", "+ай т+и"),
        // stressed "ё"
        ("work", "ворк"),
        ("world", "ворлд"),
        ("bird", "бёрд"),
        ("girl", "гёрл"),
        ("burn", "бёрн"),
        ("her", "хёр"),
        ("early", "ёрли"),
        ("service", "сёрвис"),
        // function words
        ("a", "э"),
        ("the", "зе"),
        ("of", "оф"),
        ("and", "энд"),
        ("for", "фо"),
        ("to", "ту"),
        ("in", "ин"),
        ("on", "он"),
        ("is", "из"),
        // words G2P gets wrong
        ("knowledge", "ноуледж"),
        ("new", "нью"),
        ("video", "видео"),
        ("ru", "ру"),
        ("com", "ком"),
        ("hot", "хот"),
        ("https", "аштитипиэс"),
        ("http", "аштитипи"),
    ])
});

static PHONETIC_SYMBOLS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        // stress and length marks
        ("ˈ", ""),
        ("ˌ", ""),
        ("ː", ""),
        ("ʔ", ""),
        // plain consonants
        ("p", "п"),
        ("b", "б"),
        ("t", "т"),
        ("d", "д"),
        ("k", "к"),
        ("g", "г"),
        ("ɡ", "г"),
        ("m", "м"),
        ("n", "н"),
        ("f", "ф"),
        ("v", "в"),
        ("s", "с"),
        ("z", "з"),
        ("h", "х"),
        ("l", "л"),
        ("r", "р"),
        ("ɹ", "р"),
        ("ɾ", "т"),
        ("w", "в"),
        ("j", "й"),
        // sibilants and affricates
        ("ʃ", "ш"),
        ("ʒ", "ж"),
        ("tʃ", "ч"),
        ("ʧ", "ч"),
        ("dʒ", "дж"),
        ("ʤ", "дж"),
        // nasals and dentals
        ("ŋ", "нг"),
        ("θ", "с"),
        ("ð", "з"),
        // vowels
        ("i", "и"),
        ("ɪ", "и"),
        ("ᵻ", "и"),
        ("ɛ", "э"),
        ("æ", "э"),
        ("ɑ", "а"),
        ("ɐ", "а"),
        ("ɒ", "о"),
        ("ɔ", "о"),
        ("u", "у"),
        ("ʊ", "у"),
        ("ʌ", "а"),
        ("ə", "э"),
        ("ᵊ", "э"),
        ("ɜ", "ё"),
        // r-coloured vowels
        ("ər", "эр"),
        ("əɹ", "эр"),
        ("ɚ", "эр"),
        ("ɜɹ", "ёр"),
        // diphthongs
        ("eɪ", "эй"),
        ("aɪ", "ай"),
        ("ɔɪ", "ой"),
        ("aʊ", "ау"),
        ("oʊ", "оу"),
        ("ɪə", "иэ"),
        ("eə", "еэ"),
        ("ʊə", "уэ"),
        // misaki diphthong letters
        ("A", "эй"),
        ("I", "ай"),
        ("O", "оу"),
        ("Q", "оу"),
        ("W", "ау"),
        ("Y", "ой"),
    ])
});

static MAX_SYMBOL_LEN: Lazy<usize> = Lazy::new(|| {
    PHONETIC_SYMBOLS
        .keys()
        .map(|key| key.chars().count())
        .max()
        .unwrap_or(1)
});

static LETTERS: Lazy<HashMap<char, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ('a', "э"),
        ('b', "б"),
        ('c', "к"),
        ('d', "д"),
        ('e', "е"),
        ('f', "ф"),
        ('g', "г"),
        ('h', "х"),
        ('i', "и"),
        ('j', "дж"),
        ('k', "к"),
        ('l', "л"),
        ('m', "м"),
        ('n', "н"),
        ('o', "о"),
        ('p', "п"),
        ('q', "к"),
        ('r', "р"),
        ('s', "с"),
        ('t', "т"),
        ('u', "у"),
        ('v', "в"),
        ('w', "в"),
        ('x', "кс"),
        ('y', "и"),
        ('z', "з"),
    ])
});

type Attempt = fn(&Phoneticizer, &str) -> Option<String>;

/// Converts Latin-script words into an approximate Cyrillic spelling.
pub struct Phoneticizer {
    exceptions: &'static HashMap<&'static str, &'static str>,
    symbols: &'static HashMap<&'static str, &'static str>,
    letters: &'static HashMap<char, &'static str>,
    max_symbol_len: usize,
    transcriber: Box<dyn PhoneticTranscriber>,
}

impl Phoneticizer {
    pub fn new(transcriber: Box<dyn PhoneticTranscriber>) -> Self {
        Self {
            exceptions: &EXCEPTIONS,
            symbols: &PHONETIC_SYMBOLS,
            letters: &LETTERS,
            max_symbol_len: *MAX_SYMBOL_LEN,
            transcriber,
        }
    }

    pub fn phoneticize(&self, word: &str) -> String {
        const ATTEMPTS: [Attempt; 3] = [
            Phoneticizer::exact_exception,
            Phoneticizer::lowercase_exception,
            Phoneticizer::phonetic,
        ];

        ATTEMPTS
            .iter()
            .find_map(|attempt| attempt(self, word))
            .unwrap_or_else(|| self.transliterate(word))
    }

    fn exact_exception(&self, word: &str) -> Option<String> {
        let spelled = self.exceptions.get(word)?;
        debug!("'{word}' -> '{spelled}' (exceptions, exact case)");
        Some(spelled.to_string())
    }

    fn lowercase_exception(&self, word: &str) -> Option<String> {
        let lower = word.to_lowercase();
        let spelled = self.exceptions.get(lower.as_str())?;
        debug!("'{word}' -> '{spelled}' (exceptions)");
        Some(spelled.to_string())
    }

    fn phonetic(&self, word: &str) -> Option<String> {
        let lower = word.to_lowercase();
        let transcription = match self.transcriber.transcribe(&lower) {
            Ok(t) => t.replace('/', "").trim().to_string(),
            Err(e) => {
                warn!("{e}, falling back to transliteration");
                return None;
            }
        };

        if transcription.is_empty() || transcription.contains(FAILURE_MARKERS) {
            warn!("No transcription for '{lower}', falling back to transliteration");
            return None;
        }

        let spelled = collapse_phonetic_spelling(&self.symbols_to_cyrillic(&transcription));
        if spelled.is_empty() {
            return None;
        }
        debug!("'{lower}' -> '{transcription}' -> '{spelled}' (phonetic)");
        Some(spelled)
    }

    /// Greedy longest-prefix match; unknown characters are skipped.
    fn symbols_to_cyrillic(&self, transcription: &str) -> String {
        let chars: Vec<char> = transcription.chars().collect();
        let mut out = String::new();
        let mut pos = 0;

        while pos < chars.len() {
            let longest = self.max_symbol_len.min(chars.len() - pos);
            let matched = (1..=longest).rev().find_map(|len| {
                let candidate: String = chars[pos..pos + len].iter().collect();
                self.symbols.get(candidate.as_str()).map(|spelled| (len, *spelled))
            });
            match matched {
                Some((len, spelled)) => {
                    out.push_str(spelled);
                    pos += len;
                }
                None => pos += 1,
            }
        }
        out
    }

    fn transliterate(&self, word: &str) -> String {
        let spelled: String = word
            .to_lowercase()
            .chars()
            .map(|c| match self.letters.get(&c) {
                Some(s) => (*s).to_string(),
                None => c.to_string(),
            })
            .collect();
        debug!("'{word}' -> '{spelled}' (letters)");
        spelled
    }
}

/// "йй" → "й", and no soft sign after hushing consonants.
fn collapse_phonetic_spelling(spelled: &str) -> String {
    let mut out = String::with_capacity(spelled.len());
    let mut prev: Option<char> = None;
    for c in spelled.chars() {
        if c == 'й' && prev == Some('й') {
            continue;
        }
        if c == 'ь' && matches!(prev, Some('ч' | 'ш' | 'щ' | 'ж' | 'д')) {
            continue;
        }
        out.push(c);
        prev = Some(c);
    }
    out
}
