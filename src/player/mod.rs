//! Player bridge - spawns and controls an external media player over stdio.
//!
//! Architecture:
//! - `process.rs` - Player executable lookup, spawning and exit supervision
//! - `codec.rs` - Newline-delimited JSON framing
//! - `protocol.rs` - Command/response/event types
//! - `router.rs` - Dispatch of inbound messages
//! - `correlator.rs` - Command ids, pending calls and timeouts
//! - `events.rs` - Event subscriptions
//! - `ipc.rs` - Reader/writer tasks over the child's stdio
//! - `client.rs` - High-level bridge with command methods

mod client;
mod codec;
mod correlator;
mod error;
mod events;
mod ipc;
mod process;
mod protocol;
mod router;


pub use client::{PlayerBridge, READY_EVENT};
pub use codec::{LineFramer, MAX_LINE_LENGTH};
pub use error::{BridgeError, FrameError};
pub use events::EventHandler;
pub use process::{build_args, resolve_player, LaunchOptions, ProcessExit, IPC_FLAG};
pub use protocol::{
  Command, ErrorFrame, ExternalSubtitle, PlayerEvent, PlayerMessage, PlayerState, Response,
  SubtitleAdded,
};
