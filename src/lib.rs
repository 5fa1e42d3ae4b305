//! Drive an external media player through line-delimited JSON over its
//! stdin/stdout.
//!
//! ```ignore
//! use playerlink::{BridgeConfig, LaunchOptions, PlayerBridge};
//!
//! let player = PlayerBridge::new(BridgeConfig::default());
//! player.launch(&LaunchOptions::default().with_size(1920, 1080)).await?;
//! player.on("state_changed", |state| println!("{}", state));
//! player.load_media("https://example.com/video.mp4", 0).await?;
//! player.play().await?;
//! ```

mod config;
pub mod player;

pub use config::{BridgeConfig, DEFAULT_PLAYER};
pub use player::{
  BridgeError, EventHandler, ExternalSubtitle, LaunchOptions, PlayerBridge, PlayerEvent,
  PlayerState, ProcessExit, SubtitleAdded,
};
