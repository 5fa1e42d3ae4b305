//! Newline-delimited JSON framing for the player's stdio.

use std::{cmp, io};

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::error::FrameError;
use super::protocol::{Command, PlayerMessage};

/// Longest accepted stdout line, in bytes.
pub const MAX_LINE_LENGTH: usize = 4 * 1024 * 1024;

/// Bytes of an oversized line kept in its error report.
const PREVIEW_LENGTH: usize = 80;

/// Splits stdout into lines and parses each non-blank one.
///
/// Decoding never fails on bad input: a record that does not parse, or runs
/// past the length limit, is yielded as `Err(FrameError)` so the reader can
/// report it and keep going.
#[derive(Debug)]
pub struct LineFramer {
  /// Bytes of the buffer already scanned for a newline.
  scanned: usize,
  max_length: usize,
  /// Dropping the rest of an oversized line.
  discarding: bool,
}

impl LineFramer {
  pub fn new() -> Self {
    Self::with_max_length(MAX_LINE_LENGTH)
  }

  pub fn with_max_length(max_length: usize) -> Self {
    Self {
      scanned: 0,
      max_length,
      discarding: false,
    }
  }
}

impl Default for LineFramer {
  fn default() -> Self {
    Self::new()
  }
}

fn parse_record(raw: &[u8]) -> Option<Result<PlayerMessage, FrameError>> {
  let text = match std::str::from_utf8(raw) {
    Ok(text) => text,
    Err(e) => {
      return Some(Err(FrameError::malformed(
        String::from_utf8_lossy(raw).trim(),
        e,
      )))
    }
  };

  let trimmed = text.trim();
  if trimmed.is_empty() {
    return None;
  }
  Some(PlayerMessage::parse(trimmed))
}

impl Decoder for LineFramer {
  type Item = Result<PlayerMessage, FrameError>;
  type Error = io::Error;

  fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, io::Error> {
    loop {
      let read_to = cmp::min(self.max_length.saturating_add(1), buf.len());
      let newline = buf[self.scanned..read_to]
        .iter()
        .position(|b| *b == b'\n')
        .map(|offset| self.scanned + offset);

      match (self.discarding, newline) {
        (true, Some(end)) => {
          buf.advance(end + 1);
          self.scanned = 0;
          self.discarding = false;
        }
        (true, None) => {
          buf.advance(read_to);
          self.scanned = 0;
          if buf.is_empty() {
            return Ok(None);
          }
        }
        (false, Some(end)) => {
          self.scanned = 0;
          let line = buf.split_to(end + 1);
          if let Some(item) = parse_record(&line[..end]) {
            return Ok(Some(item));
          }
        }
        (false, None) if buf.len() > self.max_length => {
          self.scanned = 0;
          self.discarding = true;
          let preview = String::from_utf8_lossy(&buf[..PREVIEW_LENGTH.min(buf.len())]).into_owned();
          return Ok(Some(Err(FrameError::malformed(
            preview,
            format!("line longer than {} bytes", self.max_length),
          ))));
        }
        (false, None) => {
          self.scanned = read_to;
          return Ok(None);
        }
      }
    }
  }

  fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, io::Error> {
    if let Some(item) = self.decode(buf)? {
      return Ok(Some(item));
    }

    // Unterminated last record.
    self.scanned = 0;
    if self.discarding {
      self.discarding = false;
      buf.clear();
      return Ok(None);
    }
    while !buf.is_empty() {
      let rest = buf.split_to(buf.len());
      if let Some(item) = parse_record(&rest) {
        return Ok(Some(item));
      }
    }
    Ok(None)
  }
}

impl Encoder<Command> for LineFramer {
  type Error = io::Error;

  fn encode(&mut self, cmd: Command, dst: &mut BytesMut) -> Result<(), io::Error> {
    let json = serde_json::to_vec(&cmd)?;
    dst.reserve(json.len() + 1);
    dst.extend_from_slice(&json);
    dst.extend_from_slice(b"\n");
    Ok(())
  }
}
