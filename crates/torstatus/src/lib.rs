//! torstatus -- library crate for the torstatus binary.
//!
//! Holds the config file layer and the notifier that turns client events
//! into user-facing messages, so both can be tested without a daemon.

pub mod config;
pub mod notifier;

use std::path::PathBuf;

pub const DEFAULT_CONFIG_PATH: &str = "~/.config/torstatus/config.toml";

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}
