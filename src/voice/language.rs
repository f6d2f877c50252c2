//! Script-based language hints.
//!
//! Speech synthesis needs a language for the neutral "original" clip, but
//! utterances don't carry one. Counting characters per Unicode script is
//! enough to tell the major non-Latin languages apart; Latin-script text
//! falls back to the configured source language.

/// Sentinel target language meaning "don't translate".
pub const ORIGINAL: &str = "Original";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Script {
    Hangul,
    Kana,
    Han,
    Arabic,
    Thai,
    Devanagari,
    Cyrillic,
}

impl Script {
    fn of(c: char) -> Option<Self> {
        match c as u32 {
            0xAC00..=0xD7AF | 0x1100..=0x11FF | 0x3130..=0x318F => Some(Self::Hangul),
            0x3040..=0x30FF | 0x31F0..=0x31FF => Some(Self::Kana),
            0x4E00..=0x9FFF | 0x3400..=0x4DBF => Some(Self::Han),
            0x0600..=0x06FF | 0x0750..=0x077F | 0x08A0..=0x08FF => Some(Self::Arabic),
            0x0E00..=0x0E7F => Some(Self::Thai),
            0x0900..=0x097F => Some(Self::Devanagari),
            0x0400..=0x052F => Some(Self::Cyrillic),
            _ => None,
        }
    }

    fn language(self) -> &'static str {
        match self {
            Self::Hangul => "Korean",
            Self::Kana => "Japanese",
            Self::Han => "Chinese",
            Self::Arabic => "Arabic",
            Self::Thai => "Thai",
            Self::Devanagari => "Hindi",
            Self::Cyrillic => "Russian",
        }
    }
}

/// Best-guess language name for `text`, or `fallback` when no non-Latin
/// script makes up more than a fifth of the letters.
///
/// Japanese mixes Kana with Han, so any Kana share above the threshold wins
/// over Han.
pub fn detect_language<'a>(text: &str, fallback: &'a str) -> &'a str {
    let mut counts = [0u32; 7];
    let mut letters = 0u32;

    for c in text.chars().filter(|c| !c.is_whitespace() && !c.is_ascii_punctuation()) {
        letters += 1;
        if let Some(script) = Script::of(c) {
            counts[script as usize] += 1;
        }
    }
    if letters == 0 {
        return fallback;
    }

    let threshold = letters / 5;
    let order = [
        Script::Hangul,
        Script::Kana,
        Script::Han,
        Script::Arabic,
        Script::Thai,
        Script::Devanagari,
        Script::Cyrillic,
    ];
    order
        .into_iter()
        .find(|s| counts[*s as usize] > threshold)
        .map_or(fallback, |s| s.language())
}

/// Whether `target` asks for no translation at all.
pub fn is_original(target: &str) -> bool {
    let target = target.trim();
    target.is_empty() || target.eq_ignore_ascii_case(ORIGINAL)
}
