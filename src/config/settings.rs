//! Controller settings, defaults and TOML persistence.
//!
//! Every struct is `Serialize + Deserialize + Default + Clone` and carries
//! `#[serde(default)]`, so a partial `settings.toml` fills the gaps with
//! defaults.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::decoder::SearchMode;

// ---------------------------------------------------------------------------
// PlaybackConfig
// ---------------------------------------------------------------------------

/// Settings for [`PlaybackController`](crate::control::PlaybackController).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Output node description, e.g. `"autoaudiosink"` or `"fakesink sync=true"`.
    pub sink: String,
    /// Bound for `play_file` and the end-of-playback notifier.
    pub completion_timeout_secs: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sink: "autoaudiosink".into(),
            completion_timeout_secs: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// ListeningConfig
// ---------------------------------------------------------------------------

/// Settings for [`ListeningController`](crate::control::ListeningController).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListeningConfig {
    /// Capture node description.
    pub source: String,
    /// Spoken language tag, e.g. `"en-US"`.
    pub language: String,
    /// Root of the per-language resources: `<lang_dir>/<lang>/<lang>.key`
    /// and `<lang_dir>/<lang>/<lang>.jsgf`.
    pub lang_dir: PathBuf,
    /// Search activated after initialisation.
    pub mode: SearchMode,
    /// Inline key phrase; takes precedence over the `.key` file.
    pub key_phrase: Option<String>,
    /// Inline JSGF grammar; takes precedence over the `.jsgf` file.
    pub grammar: Option<String>,
    /// GGML model for the Whisper decoder.
    pub model: Option<PathBuf>,
    /// JSON word/pronunciation list merged into the vocabulary.
    pub lexicon_file: Option<PathBuf>,
    /// Bound for the end-of-stream acknowledgement in `stop_listening`.
    pub stop_timeout_secs: u64,
    /// RMS level above which a frame counts as speech (0.0 – 1.0).
    pub vad_threshold: f64,
    /// Trailing silence that closes an utterance.
    pub silence_ms: u64,
}

impl Default for ListeningConfig {
    fn default() -> Self {
        Self {
            source: "autoaudiosrc".into(),
            language: "en-US".into(),
            lang_dir: AppPaths::new().lang_dir,
            mode: SearchMode::KeyPhrase,
            key_phrase: None,
            grammar: None,
            model: None,
            lexicon_file: None,
            stop_timeout_secs: 5,
            vad_threshold: 0.01,
            silence_ms: 800,
        }
    }
}

impl ListeningConfig {
    /// `<lang_dir>/<language>/<language>.<extension>`
    pub fn resource_file(&self, language: &str, extension: &str) -> PathBuf {
        self.lang_dir
            .join(language)
            .join(format!("{language}.{extension}"))
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level configuration, serialised as `settings.toml`.
///
/// ```rust,no_run
/// use voice_control::config::AppConfig;
///
/// // Defaults when the file is missing.
/// let config = AppConfig::load().unwrap();
/// println!("playing through {}", config.playback.sink);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub playback: PlaybackConfig,
    pub listening: ListeningConfig,
}

impl AppConfig {
    /// Load from the platform `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("config: {} missing, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Save to the platform `settings.toml`, creating parent directories.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
        log::info!("config: saved {}", path.display());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
