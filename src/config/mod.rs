//! Configuration for the playback and listening controllers.
//!
//! `AppConfig` is persisted as TOML via `AppConfig::load` / `AppConfig::save`;
//! `AppPaths` resolves the platform directories.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{AppConfig, ListeningConfig, PlaybackConfig};
