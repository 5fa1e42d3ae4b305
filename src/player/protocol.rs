//! Player stdio protocol types.
//!
//! One JSON object per line in both directions:
//!
//! - controller → player: `{"type": "<command>", "id": "cmd_<n>", "data": {...}}`
//! - player → controller: `response`, `event` or `error` frames.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::FrameError;

/// Command sent to the player on stdin.
#[derive(Debug, Clone, Serialize)]
pub struct Command {
  #[serde(rename = "type")]
  pub kind: String,
  pub id: String,
  pub data: Value,
}

impl Command {
  /// Build a command. A `null` payload is sent as an empty object.
  pub fn new(kind: impl Into<String>, id: impl Into<String>, data: Value) -> Self {
    let data = match data {
      Value::Null => Value::Object(Map::new()),
      other => other,
    };
    Self {
      kind: kind.into(),
      id: id.into(),
      data,
    }
  }
}

/// Result of a command.
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
  pub id: String,
  #[serde(default)]
  pub data: Value,
}

/// Unsolicited notification from the player.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlayerEvent {
  #[serde(rename = "event")]
  pub name: String,
  #[serde(default)]
  pub data: Value,
}

/// Error frame. Without an `id` it is an out-of-band fault.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorFrame {
  #[serde(default)]
  pub id: Option<String>,
  #[serde(default)]
  pub code: String,
  #[serde(default)]
  pub message: String,
}

/// Message received on the player's stdout.
#[derive(Debug, Clone)]
pub enum PlayerMessage {
  Response(Response),
  Event(PlayerEvent),
  Error(ErrorFrame),
  /// Well-formed object with a `type` the bridge does not know.
  Unknown(String),
}

impl PlayerMessage {
  /// Parse a single protocol line.
  pub fn parse(line: &str) -> Result<Self, FrameError> {
    let value: Value = serde_json::from_str(line).map_err(|e| FrameError::malformed(line, e))?;

    let kind = match value.get("type") {
      Some(Value::String(kind)) => kind.clone(),
      Some(_) => return Err(FrameError::malformed(line, "`type` is not a string")),
      None => return Err(FrameError::malformed(line, "missing `type`")),
    };

    let message = match kind.as_str() {
      "response" => serde_json::from_value(value).map(PlayerMessage::Response),
      "event" => serde_json::from_value(value).map(PlayerMessage::Event),
      "error" => serde_json::from_value(value).map(PlayerMessage::Error),
      _ => return Ok(PlayerMessage::Unknown(kind)),
    };
    message.map_err(|e| FrameError::malformed(line, e))
  }
}

/// Reply to `add_external_subtitle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleAdded {
  #[serde(default)]
  pub success: bool,
  pub index: i64,
}

/// External subtitle track as reported by the player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalSubtitle {
  pub name: String,
  pub url: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub comment: Option<String>,
}

/// Snapshot returned by `get_state`.
///
/// Every field is optional; fields the bridge does not model are kept in
/// `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
  #[serde(default)]
  pub is_playing: Option<bool>,
  /// Playback position in milliseconds.
  #[serde(default)]
  pub position: Option<f64>,
  /// Media duration in milliseconds.
  #[serde(default)]
  pub duration: Option<f64>,
  /// Volume (0.0 - 1.0).
  #[serde(default)]
  pub volume: Option<f64>,
  #[serde(default)]
  pub url: Option<String>,
  #[serde(default)]
  pub is_fullscreen: Option<bool>,
  #[serde(default)]
  pub external_subtitles: Vec<ExternalSubtitle>,
  #[serde(default)]
  pub selected_subtitle: Option<i64>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}
