//! Error types surfaced by the player bridge.

use std::time::Duration;

use thiserror::Error;

/// Failure of a bridge operation.
///
/// Every variant is delivered to the call (or calls) it affects. Malformed
/// inbound lines never show up here; they are logged by the framer and
/// dropped, see [`FrameError`].
#[derive(Error, Debug)]
pub enum BridgeError {
  #[error("player did not report ready within {0:?}")]
  LaunchTimeout(Duration),
  #[error("player not launched")]
  NotLaunched,
  #[error("player already launched")]
  AlreadyLaunched,
  #[error("command `{command}` ({id}) timed out")]
  CommandTimeout { command: String, id: String },
  #[error("player error {code}: {message}")]
  Remote { code: String, message: String },
  #[error("player process exited")]
  ProcessExited,
  #[error("player executable not found: {0}")]
  PlayerNotFound(String),
  #[error("failed to spawn player: {0}")]
  Spawn(#[from] std::io::Error),
  #[error("unexpected response payload: {0}")]
  Decode(#[from] serde_json::Error),
  #[error("invalid configuration: {0}")]
  Config(String),
}

impl BridgeError {
  /// Remote error code, if the player rejected the command.
  pub fn remote_code(&self) -> Option<&str> {
    match self {
      BridgeError::Remote { code, .. } => Some(code),
      _ => None,
    }
  }
}

/// A record on the player's stdout that could not be turned into a message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
  #[error("malformed message ({reason}): {line}")]
  MalformedMessage { line: String, reason: String },
}

impl FrameError {
  pub(crate) fn malformed(line: impl Into<String>, reason: impl ToString) -> Self {
    FrameError::MalformedMessage {
      line: line.into(),
      reason: reason.to_string(),
    }
  }
}
