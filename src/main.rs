//! Command-line front end.
//!
//! ```text
//! voice-control play <file.wav>     play a file through the configured sink
//! voice-control listen <seconds>    listen for key phrases, print results
//! ```
//!
//! Settings come from `settings.toml` in the platform config directory.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use voice_control::config::AppConfig;
use voice_control::control::{ListeningController, PlaybackController};

const USAGE: &str = "usage: voice-control play <file.wav> | listen <seconds>";

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e:#}); using defaults");
        AppConfig::default()
    });

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["play", file] => play(&config, file),
        ["listen", seconds] => {
            let seconds: u64 = seconds
                .parse()
                .with_context(|| format!("invalid duration {seconds:?}"))?;
            listen(config, Duration::from_secs(seconds))
        }
        _ => bail!(USAGE),
    }
}

fn play(config: &AppConfig, file: &str) -> Result<()> {
    let playback = PlaybackController::new(&config.playback)?;
    playback.on_stop(|n| println!("finished {}", n.file.display()));
    playback.play_file(file)?;
    Ok(())
}

fn listen(config: AppConfig, duration: Duration) -> Result<()> {
    let listening = ListeningController::new(config.listening)?;
    listening.on_result(|r| {
        if r.success {
            println!("heard: {}", r.text);
        }
    });

    if !listening.start_listening() {
        bail!("could not start listening");
    }
    log::info!("Listening for {duration:?}");
    std::thread::sleep(duration);
    listening.stop_listening()?;
    Ok(())
}
