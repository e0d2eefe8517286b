//! N-gram extraction.
//!
//! [`NgramExtractor`] turns raw document text into an n-gram → count map.  The
//! vocabulary build only ever sees the map, so any tokenizer can be plugged
//! in; [`SimpleNgramExtractor`] is the default.

use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

use crate::error::AppError;
use crate::models::NgramCounts;

pub trait NgramExtractor: Send + Sync {
    fn extract(&self, text: &str) -> NgramCounts;
}

/// English stop words dropped before n-grams are formed.
const STOP_WORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "all", "and", "any", "are", "aren't",
    "because", "been", "before", "being", "below", "between", "both", "but", "can", "couldn't",
    "did", "didn't", "does", "doesn't", "doing", "don't", "down", "during", "each", "few",
    "for", "from", "further", "had", "hadn't", "has", "hasn't", "have", "haven't", "having",
    "her", "here", "hers", "herself", "him", "himself", "his", "how", "into", "isn't", "its",
    "itself", "just", "more", "most", "mustn't", "myself", "nor", "not", "now", "off", "once",
    "only", "other", "our", "ours", "ourselves", "out", "over", "own", "same", "she", "should",
    "shouldn't", "some", "such", "than", "that", "the", "their", "theirs", "them", "themselves",
    "then", "there", "these", "they", "this", "those", "through", "too", "under", "until",
    "very", "was", "wasn't", "were", "weren't", "what", "when", "where", "which", "while",
    "who", "whom", "why", "will", "with", "won't", "would", "wouldn't", "you", "your", "yours",
    "yourself", "yourselves",
];

#[derive(Debug, Clone)]
pub struct SimpleNgramExtractor {
    tags: Regex,
    links: Regex,
    max_n: usize,
    min_token_chars: usize,
}

impl SimpleNgramExtractor {
    /// Counts 1- to 3-grams over tokens of at least three characters.
    pub fn new() -> Result<Self, AppError> {
        Self::with_limits(3, 3)
    }

    pub fn with_limits(max_n: usize, min_token_chars: usize) -> Result<Self, AppError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| AppError::Config(format!("text: regex {pattern}: {e}")))
        };
        Ok(Self {
            tags: compile(r"<[^<]+?>")?,
            links: compile(r"https?://\S+")?,
            max_n: max_n.max(1),
            min_token_chars,
        })
    }

    /// Lowercased tokens with markup, links, numerics, short words and stop
    /// words removed.
    pub fn tokens(&self, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        let untagged = self.tags.replace_all(&lowered, " ");
        let unlinked = self.links.replace_all(&untagged, " ");
        unlinked
            .unicode_words()
            .filter(|w| !w.chars().any(|c| c.is_numeric()))
            .filter(|w| w.chars().count() >= self.min_token_chars)
            .filter(|w| !STOP_WORDS.contains(w))
            .map(str::to_string)
            .collect()
    }
}

impl NgramExtractor for SimpleNgramExtractor {
    fn extract(&self, text: &str) -> NgramCounts {
        let tokens = self.tokens(text);
        let mut counts = NgramCounts::new();
        for n in 1..=self.max_n {
            for window in tokens.windows(n) {
                *counts.entry(window.join(" ")).or_insert(0) += 1;
            }
        }
        counts
    }
}
