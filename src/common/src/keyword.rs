//! Keyword extraction (C2): tokenizes a market title into disjoint token sets
//! consumed by the matcher's hard constraints and weighted similarity score.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

/// Closed stop-word list; dropped from `words` after tokenization.
const STOP_WORDS: &[&str] = &[
    "will", "the", "a", "an", "by", "to", "of", "in", "on", "at", "is", "be", "and", "or", "for",
    "with", "this", "that", "what", "who", "does", "do", "than", "as", "it", "has", "have",
];

/// High-value entity patterns matched as whole tokens or substrings.
const ENTITY_PATTERNS: &[(&str, &[&str])] = &[
    ("trump", &["trump"]),
    ("biden", &["biden"]),
    ("bitcoin", &["bitcoin", "btc"]),
    ("ethereum", &["ethereum", "eth"]),
    ("crypto", &["crypto"]),
    ("gta", &["gta"]),
];

/// The three disjoint token sets produced by [`extract`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keywords {
    pub entities: HashSet<String>,
    /// Year tokens (`year_2024`), price tokens (`price_100000`), percent tokens
    /// (`percent_50`), and remaining freeform words, all in one bag.
    pub numbers: HashSet<String>,
    pub words: HashSet<String>,
}

impl Keywords {
    pub fn years(&self) -> HashSet<&str> {
        self.numbers
            .iter()
            .filter(|t| t.starts_with("year_"))
            .map(String::as_str)
            .collect()
    }

    pub fn prices(&self) -> HashSet<&str> {
        self.numbers
            .iter()
            .filter(|t| t.starts_with("price_"))
            .map(String::as_str)
            .collect()
    }

    /// Numbers excluding year/price tokens, used at 0.20 weight in the score.
    pub fn non_year_price_numbers(&self) -> HashSet<&str> {
        self.numbers
            .iter()
            .filter(|t| !t.starts_with("year_") && !t.starts_with("price_"))
            .map(String::as_str)
            .collect()
    }

    /// `words - entities`, used by the core-word-disjointness hard constraint.
    pub fn core_words(&self) -> HashSet<String> {
        self.words.difference(&self.entities).cloned().collect()
    }
}

fn year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(20\d{2})\b").unwrap())
}

fn price_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\s?([\d,]+(?:\.\d+)?)|([\d,]+(?:\.\d+)?)\s?(?:dollars|usd|million|billion)")
            .unwrap()
    })
}

fn percent_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)\s?%|(\d+(?:\.\d+)?)\s?percent").unwrap())
}

fn punctuation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w\s]").unwrap())
}

/// Tokenize a market title. Pure, deterministic, idempotent.
///
/// Normalization order: lowercase, extract years, extract prices, extract
/// percents, match entity patterns, then strip punctuation and split the
/// remainder into `words` (stop words, length <= 2, and pure-digit tokens
/// dropped).
pub fn extract(title: &str) -> Keywords {
    let lower = title.to_lowercase();

    let mut numbers = HashSet::new();
    let mut entities = HashSet::new();

    for cap in year_re().captures_iter(&lower) {
        numbers.insert(format!("year_{}", &cap[1]));
    }

    for cap in price_re().captures_iter(&lower) {
        let raw = cap.get(1).or_else(|| cap.get(2)).map(|m| m.as_str()).unwrap_or("");
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        if !digits.is_empty() {
            numbers.insert(format!("price_{}", digits));
        }
    }

    for cap in percent_re().captures_iter(&lower) {
        let raw = cap.get(1).or_else(|| cap.get(2)).map(|m| m.as_str()).unwrap_or("");
        if !raw.is_empty() {
            numbers.insert(format!("percent_{}", raw));
        }
    }

    let mut entity_needles: HashSet<&str> = HashSet::new();
    for (entity, needles) in ENTITY_PATTERNS {
        if needles.iter().any(|n| lower.contains(n)) {
            entities.insert(entity.to_string());
            entity_needles.extend(needles.iter().copied());
        }
    }

    let stripped = punctuation_re().replace_all(&lower, " ");
    let mut words = HashSet::new();
    for tok in stripped.split_whitespace() {
        if tok.len() <= 2 {
            continue;
        }
        if tok.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        if STOP_WORDS.contains(&tok) {
            continue;
        }
        if entity_needles.contains(tok) {
            continue;
        }
        words.insert(tok.to_string());
    }

    Keywords {
        entities,
        numbers,
        words,
    }
}
