//! Recognition searches and hypothesis matching.
//!
//! A decoder holds up to two searches: a key-phrase list and a grammar.
//! Exactly one [`SearchMode`] is active at a time, and a transcript is only
//! reported when it satisfies the active search.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::grammar::Grammar;
use super::lexicon::Lexicon;
use super::DecoderError;

// ---------------------------------------------------------------------------
// SearchMode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchMode {
    /// Recognition disabled.
    None,
    /// Spot configured key phrases inside free speech.
    #[default]
    KeyPhrase,
    /// Accept only sentences of the loaded grammar.
    Grammar,
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SearchMode::None => "none",
            SearchMode::KeyPhrase => "key-phrase",
            SearchMode::Grammar => "grammar",
        })
    }
}

// ---------------------------------------------------------------------------
// Hypothesis
// ---------------------------------------------------------------------------

/// A recognition result accepted by the active search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hypothesis {
    /// The matched key phrase or grammar sentence.
    pub text: String,
    /// Share of the heard words covered by the match, in percent.
    pub confidence: i32,
}

// ---------------------------------------------------------------------------
// KeyPhrase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct KeyPhrase {
    pub phrase: String,
    /// Detection threshold from a key file (`/1e-20/`), kept for reference.
    pub threshold: Option<f64>,
}

/// Parse a key-phrase list: one phrase per line, optional `/threshold/`
/// suffix, `#` comments.
pub fn parse_key_list(text: &str) -> Result<Vec<KeyPhrase>, DecoderError> {
    let mut phrases = Vec::new();
    for (n, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }

        let (phrase, threshold) = match line.strip_suffix('/') {
            Some(body) => {
                let (phrase, value) = body.rsplit_once('/').ok_or_else(|| {
                    DecoderError::KeyPhrase(format!("line {}: unbalanced '/'", n + 1))
                })?;
                let threshold = value.trim().parse::<f64>().map_err(|_| {
                    DecoderError::KeyPhrase(format!("line {}: bad threshold '{value}'", n + 1))
                })?;
                (phrase, Some(threshold))
            }
            None => (line, None),
        };

        let phrase = normalize(phrase);
        if phrase.is_empty() {
            return Err(DecoderError::KeyPhrase(format!("line {}: empty phrase", n + 1)));
        }
        phrases.push(KeyPhrase { phrase, threshold });
    }

    if phrases.is_empty() {
        return Err(DecoderError::KeyPhrase("no key phrases found".into()));
    }
    Ok(phrases)
}

/// Lowercase, drop punctuation (apostrophes stay), collapse whitespace.
pub fn normalize(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '\'' {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Whole-word containment of `needle` in `haystack` (both normalised).
fn contains_phrase(haystack: &str, needle: &str) -> bool {
    format!(" {haystack} ").contains(&format!(" {needle} "))
}

// ---------------------------------------------------------------------------
// SearchSet
// ---------------------------------------------------------------------------

/// Loaded searches, the active mode, and the vocabulary.
#[derive(Debug, Clone, Default)]
pub struct SearchSet {
    key_phrases: Option<Vec<KeyPhrase>>,
    grammar: Option<Grammar>,
    mode: SearchMode,
    lexicon: Lexicon,
}

impl SearchSet {
    /// A set with nothing loaded and recognition disabled.
    pub fn new() -> Self {
        Self {
            mode: SearchMode::None,
            ..Self::default()
        }
    }

    /// Replace the key-phrase search with a single phrase.
    pub fn set_key_phrase(&mut self, phrase: &str) -> Result<(), DecoderError> {
        let phrase = normalize(phrase);
        if phrase.is_empty() {
            return Err(DecoderError::KeyPhrase("empty key phrase".into()));
        }
        self.key_phrases = Some(vec![KeyPhrase {
            phrase,
            threshold: None,
        }]);
        Ok(())
    }

    /// Replace the key-phrase search with the contents of a key file.
    pub fn set_key_file(&mut self, path: &Path) -> Result<(), DecoderError> {
        let text = std::fs::read_to_string(path).map_err(|e| DecoderError::io(path, e))?;
        self.key_phrases = Some(parse_key_list(&text)?);
        Ok(())
    }

    pub fn set_grammar(&mut self, jsgf: &str) -> Result<(), DecoderError> {
        self.grammar = Some(Grammar::parse(jsgf)?);
        Ok(())
    }

    pub fn set_grammar_file(&mut self, path: &Path) -> Result<(), DecoderError> {
        self.grammar = Some(Grammar::from_file(path)?);
        Ok(())
    }

    /// Switch the active search.  A search must be loaded before it can be
    /// activated; `None` is always allowed.
    pub fn activate(&mut self, mode: SearchMode) -> Result<(), DecoderError> {
        let loaded = match mode {
            SearchMode::None => true,
            SearchMode::KeyPhrase => self.key_phrases.is_some(),
            SearchMode::Grammar => self.grammar.is_some(),
        };
        if !loaded {
            return Err(DecoderError::SearchNotLoaded(mode));
        }
        self.mode = mode;
        Ok(())
    }

    pub fn mode(&self) -> SearchMode {
        self.mode
    }

    pub fn key_phrases(&self) -> &[KeyPhrase] {
        self.key_phrases.as_deref().unwrap_or_default()
    }

    pub fn grammar(&self) -> Option<&Grammar> {
        self.grammar.as_ref()
    }

    pub fn lexicon(&self) -> &Lexicon {
        &self.lexicon
    }

    pub fn lexicon_mut(&mut self) -> &mut Lexicon {
        &mut self.lexicon
    }

    /// Match a raw transcript against the active search.
    pub fn accept(&self, transcript: &str) -> Option<Hypothesis> {
        let heard = normalize(transcript);
        if heard.is_empty() {
            return None;
        }
        let coverage = |matched: &str| {
            let pct = word_count(matched) * 100 / word_count(&heard).max(1);
            i32::try_from(pct.min(100)).unwrap_or(100)
        };

        match self.mode {
            SearchMode::None => None,
            SearchMode::KeyPhrase => self
                .key_phrases()
                .iter()
                .filter(|k| contains_phrase(&heard, &k.phrase))
                .max_by_key(|k| word_count(&k.phrase))
                .map(|k| Hypothesis {
                    text: k.phrase.clone(),
                    confidence: coverage(&k.phrase),
                }),
            SearchMode::Grammar => self
                .grammar
                .as_ref()
                .filter(|g| g.accepts(&heard))
                .map(|_| Hypothesis {
                    text: heard.clone(),
                    confidence: 100,
                }),
        }
    }

    /// Every word the loaded searches and the lexicon know, for priming a
    /// decoder that takes vocabulary hints.
    pub fn vocabulary(&self) -> BTreeSet<String> {
        let mut words = BTreeSet::new();
        for k in self.key_phrases() {
            words.extend(k.phrase.split_whitespace().map(str::to_owned));
        }
        if let Some(grammar) = &self.grammar {
            for sentence in grammar.sentences() {
                words.extend(sentence.split_whitespace().map(str::to_owned));
            }
        }
        words.extend(self.lexicon.words().map(str::to_owned));
        words
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
