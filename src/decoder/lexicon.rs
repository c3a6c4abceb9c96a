//! Pronunciation lexicon.
//!
//! Word/pronunciation pairs added at runtime or loaded from JSON:
//!
//! ```json
//! [
//!   { "word": "jenkins", "pronunciation": "JH EH NG K IH N Z" },
//!   { "word": "deploy",  "pronunciation": "D IH P L OY" }
//! ]
//! ```
//!
//! Decoders that cannot use phonetic transcriptions still use the word list
//! as vocabulary hints.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::DecoderError;

// ---------------------------------------------------------------------------
// LexiconEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LexiconEntry {
    pub word: String,
    pub pronunciation: String,
}

// ---------------------------------------------------------------------------
// Lexicon
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Lexicon {
    entries: Vec<LexiconEntry>,
}

impl Lexicon {
    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    /// Load entries from a JSON file.
    ///
    /// # Errors
    ///
    /// [`DecoderError::Io`] when the file cannot be read,
    /// [`DecoderError::Lexicon`] when it is not a valid entry list.
    pub fn load_from(path: &Path) -> Result<Self, DecoderError> {
        let data = std::fs::read_to_string(path).map_err(|e| DecoderError::io(path, e))?;
        let entries: Vec<LexiconEntry> = serde_json::from_str(&data)
            .map_err(|e| DecoderError::Lexicon(format!("{}: {e}", path.display())))?;

        let mut lexicon = Self::default();
        for entry in entries {
            lexicon.add(&entry.word, &entry.pronunciation);
        }
        Ok(lexicon)
    }

    /// Write entries as pretty JSON, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), DecoderError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DecoderError::io(parent, e))?;
        }
        let data = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| DecoderError::Lexicon(e.to_string()))?;
        std::fs::write(path, data).map_err(|e| DecoderError::io(path, e))
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Add a word or replace its pronunciation.  Words are stored lowercase.
    ///
    /// Returns `true` when the word was not known before.
    pub fn add(&mut self, word: &str, pronunciation: &str) -> bool {
        let word = word.trim().to_lowercase();
        let pronunciation = pronunciation.trim().to_owned();
        if let Some(entry) = self.entries.iter_mut().find(|e| e.word == word) {
            entry.pronunciation = pronunciation;
            false
        } else {
            self.entries.push(LexiconEntry {
                word,
                pronunciation,
            });
            true
        }
    }

    /// Merge every entry of `other` into `self`.
    pub fn extend(&mut self, other: &Lexicon) {
        for entry in &other.entries {
            self.add(&entry.word, &entry.pronunciation);
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn pronunciation(&self, word: &str) -> Option<&str> {
        let word = word.to_lowercase();
        self.entries
            .iter()
            .find(|e| e.word == word)
            .map(|e| e.pronunciation.as_str())
    }

    pub fn contains(&self, word: &str) -> bool {
        self.pronunciation(word).is_some()
    }

    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.word.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn add_replaces_existing_pronunciation() {
        let mut lexicon = Lexicon::default();
        assert!(lexicon.add("Jenkins", "JH EH NG K IH N Z"));
        assert!(!lexicon.add("jenkins", "JH EH N K IH N Z"));
        assert_eq!(lexicon.len(), 1);
        assert_eq!(lexicon.pronunciation("JENKINS"), Some("JH EH N K IH N Z"));
    }

    #[test]
    fn json_round_trip() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("words").join("lexicon.json");

        let mut lexicon = Lexicon::default();
        lexicon.add("deploy", "D IH P L OY");
        lexicon.add("build", "B IH L D");
        lexicon.save_to(&path).expect("save");

        let loaded = Lexicon::load_from(&path).expect("load");
        assert_eq!(loaded, lexicon);
        assert_eq!(loaded.words().collect::<Vec<_>>(), vec!["deploy", "build"]);
    }

    #[test]
    fn load_reads_hand_written_json() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("lexicon.json");
        std::fs::write(
            &path,
            r#"[{"word": "Pipeline", "pronunciation": "P AY P L AY N"}]"#,
        )
        .unwrap();

        let lexicon = Lexicon::load_from(&path).expect("load");
        assert!(lexicon.contains("pipeline"));
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempdir().expect("temp dir");
        let err = Lexicon::load_from(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, DecoderError::Io { .. }));
    }

    #[test]
    fn load_malformed_json_is_lexicon_error() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            Lexicon::load_from(&path),
            Err(DecoderError::Lexicon(_))
        ));
    }
}
