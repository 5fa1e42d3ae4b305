//! Bridge configuration with persistence.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::player::BridgeError;

/// Bridge configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
  /// Player executable path or program name (None = `playtorrio` on PATH).
  #[serde(default)]
  pub player_path: Option<String>,

  /// Additional player command-line arguments.
  #[serde(default)]
  pub player_args: Vec<String>,

  /// How long a command may wait for its response, in milliseconds.
  #[serde(default = "default_command_timeout_ms")]
  pub command_timeout_ms: u64,

  /// How long to wait for the `ready` event after spawning, in milliseconds.
  #[serde(default = "default_launch_timeout_ms")]
  pub launch_timeout_ms: u64,
}

/// Player program looked up on PATH when no path is configured.
pub const DEFAULT_PLAYER: &str = "playtorrio";

fn default_command_timeout_ms() -> u64 {
  5_000
}

fn default_launch_timeout_ms() -> u64 {
  10_000
}

impl Default for BridgeConfig {
  fn default() -> Self {
    Self {
      player_path: None,
      player_args: Vec::new(),
      command_timeout_ms: default_command_timeout_ms(),
      launch_timeout_ms: default_launch_timeout_ms(),
    }
  }
}

impl BridgeConfig {
  /// Validate configuration values.
  pub fn validate(&self) -> Result<(), String> {
    if let Some(path) = &self.player_path {
      if path.trim().is_empty() {
        return Err("Player path cannot be blank".to_string());
      }
    }
    if self.command_timeout_ms == 0 {
      return Err("Command timeout must be greater than zero".to_string());
    }
    if self.launch_timeout_ms == 0 {
      return Err("Launch timeout must be greater than zero".to_string());
    }
    Ok(())
  }

  pub fn command_timeout(&self) -> Duration {
    Duration::from_millis(self.command_timeout_ms)
  }

  pub fn launch_timeout(&self) -> Duration {
    Duration::from_millis(self.launch_timeout_ms)
  }

  /// Configured player, or the default program name.
  pub fn player(&self) -> PathBuf {
    PathBuf::from(self.player_path.as_deref().unwrap_or(DEFAULT_PLAYER))
  }

  /// `<config dir>/playerlink/config.json`, if the platform has a config dir.
  pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("playerlink").join("config.json"))
  }

  /// Load and validate a config file. A missing file yields the defaults.
  pub fn load(path: &Path) -> Result<Self, BridgeError> {
    let config: Self = match std::fs::read_to_string(path) {
      Ok(text) => serde_json::from_str(&text)
        .map_err(|e| BridgeError::Config(format!("{}: {}", path.display(), e)))?,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        log::info!("No config at {}, using defaults", path.display());
        Self::default()
      }
      Err(e) => return Err(BridgeError::Config(format!("{}: {}", path.display(), e))),
    };

    config.validate().map_err(BridgeError::Config)?;
    Ok(config)
  }

  /// Write the config as pretty JSON, creating parent directories.
  pub fn save(&self, path: &Path) -> Result<(), BridgeError> {
    let to_config_err = |e: io::Error| BridgeError::Config(format!("{}: {}", path.display(), e));

    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(to_config_err)?;
    }
    let json = serde_json::to_string_pretty(self).map_err(|e| BridgeError::Config(e.to_string()))?;
    std::fs::write(path, json).map_err(to_config_err)?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = BridgeConfig::default();
    assert_eq!(config.command_timeout(), Duration::from_secs(5));
    assert_eq!(config.launch_timeout(), Duration::from_secs(10));
    assert_eq!(config.player(), PathBuf::from(DEFAULT_PLAYER));
    assert!(config.validate().is_ok());
  }

  #[test]
  fn test_partial_json_uses_defaults() {
    let config: BridgeConfig =
      serde_json::from_str(r#"{"playerPath": "/opt/playtorrio/PlayTorrio", "commandTimeoutMs": 250}"#)
        .unwrap();
    assert_eq!(config.player(), PathBuf::from("/opt/playtorrio/PlayTorrio"));
    assert_eq!(config.command_timeout_ms, 250);
    assert_eq!(config.launch_timeout_ms, 10_000);
    assert!(config.player_args.is_empty());
  }

  #[test]
  fn test_validate_rejects_bad_values() {
    let mut config = BridgeConfig::default();
    config.command_timeout_ms = 0;
    assert!(config.validate().is_err());

    let mut config = BridgeConfig::default();
    config.player_path = Some("  ".to_string());
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_save_then_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.json");

    let mut config = BridgeConfig::default();
    config.player_args = vec!["--verbose".to_string()];
    config.save(&path).unwrap();

    assert_eq!(BridgeConfig::load(&path).unwrap(), config);
  }

  #[test]
  fn test_load_missing_and_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.json");
    assert_eq!(BridgeConfig::load(&missing).unwrap(), BridgeConfig::default());

    let invalid = dir.path().join("invalid.json");
    std::fs::write(&invalid, r#"{"launchTimeoutMs": 0}"#).unwrap();
    assert!(matches!(BridgeConfig::load(&invalid), Err(BridgeError::Config(_))));
  }
}
