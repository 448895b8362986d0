//! Configuration loading and management

use std::path::PathBuf;
use anyhow::Result;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket the host UI connects to
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment and defaults.
    /// `BEAN_VOICE_SOCKET` overrides the socket location.
    pub fn load() -> Result<Self> {
        let home = std::env::var("HOME")?;
        let data_dir = PathBuf::from(&home)
            .join(".local")
            .join("share")
            .join("bean-voice");

        let socket_path = match std::env::var_os("BEAN_VOICE_SOCKET") {
            Some(path) => PathBuf::from(path),
            None => data_dir.join("daemon.sock"),
        };

        Ok(Self {
            socket_path,
            data_dir,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}
