//! Platform directories via the `dirs` crate.
//!
//! Config dir (`settings.toml`):
//!   Windows: %APPDATA%\voice-control\
//!   macOS:   ~/Library/Application Support/voice-control/
//!   Linux:   ~/.config/voice-control/
//!
//! Data dir (language resources, models):
//!   Windows: %LOCALAPPDATA%\voice-control\
//!   macOS:   ~/Library/Application Support/voice-control/
//!   Linux:   ~/.local/share/voice-control/

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    /// Full path to `settings.toml`.
    pub settings_file: PathBuf,
    /// Root of the per-language key-phrase and grammar files.
    pub lang_dir: PathBuf,
    /// Directory for GGML model files.
    pub models_dir: PathBuf,
}

impl AppPaths {
    const APP_NAME: &'static str = "voice-control";

    /// Falls back to the current directory when the platform has no
    /// standard location.
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        Self {
            settings_file: config_dir.join("settings.toml"),
            config_dir,
            lang_dir: data_dir.join("lang"),
            models_dir: data_dir.join("models"),
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_non_empty() {
        let paths = AppPaths::new();
        assert!(paths.config_dir.to_str().is_some_and(|s| !s.is_empty()));
        assert!(paths
            .settings_file
            .file_name()
            .is_some_and(|n| n == "settings.toml"));
        assert!(paths.lang_dir.ends_with("lang"));
        assert!(paths.models_dir.ends_with("models"));
    }
}
