use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use playerlink::{BridgeConfig, LaunchOptions, PlayerBridge};

const SAMPLE_VIDEO: &str =
  "https://commondatastorage.googleapis.com/gtv-videos-bucket/sample/BigBuckBunny.mp4";

/// Launch a media player in IPC mode and drive it from the command line.
#[derive(Debug, Parser)]
#[command(name = "playerlink", version)]
struct Cli {
  /// Player executable (overrides the config file).
  #[arg(long)]
  player: Option<PathBuf>,

  /// Config file (defaults to the platform config dir).
  #[arg(long)]
  config: Option<PathBuf>,

  /// Media URL opened on startup.
  #[arg(long)]
  url: Option<String>,

  #[arg(long)]
  width: Option<u32>,

  #[arg(long)]
  height: Option<u32>,

  #[arg(value_enum, default_value_t = Script::State)]
  script: Script,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Script {
  /// Print the player state and quit.
  State,
  /// Load media, manage subtitles, play and pause.
  Demo,
  /// Print every player event until Ctrl+C.
  Watch,
}

fn load_config(cli: &Cli) -> anyhow::Result<BridgeConfig> {
  let mut config = match cli.config.clone().or_else(BridgeConfig::default_path) {
    Some(path) => BridgeConfig::load(&path)?,
    None => BridgeConfig::default(),
  };
  if let Some(player) = &cli.player {
    config.player_path = Some(player.display().to_string());
  }
  Ok(config)
}

async fn run_demo(player: &PlayerBridge, url: &str) -> anyhow::Result<()> {
  player.load_media(url, 0).await?;
  log::info!("Media loaded");

  let english = player
    .add_external_subtitle("English", "https://example.com/subtitles/en.srt", Some("OpenSubtitles - Official"))
    .await?;
  let spanish = player
    .add_external_subtitle("Spanish", "https://example.com/subtitles/es.srt", Some("Community Contributed"))
    .await?;
  let french = player
    .add_external_subtitle("French", "https://example.com/subtitles/fr.srt", None)
    .await?;
  log::info!(
    "Subtitles added at {}, {}, {}",
    english.index,
    spanish.index,
    french.index
  );

  player.select_subtitle_track(spanish.index).await?;
  player.play().await?;
  tokio::time::sleep(Duration::from_secs(5)).await;
  player.pause().await?;
  player.select_subtitle_track(-1).await?;

  let state = player.get_state().await?;
  println!("{}", serde_json::to_string_pretty(&state)?);
  Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

  let cli = Cli::parse();
  let config = load_config(&cli)?;
  let options = LaunchOptions {
    url: cli.url.clone(),
    width: cli.width,
    height: cli.height,
  };

  let player = PlayerBridge::new(config);
  player.on("state_changed", |state| log::info!("Player state: {}", state));
  player.on("error", |data| log::warn!("Player reported: {}", data));

  player
    .launch(&options)
    .await
    .context("failed to launch player")?;

  let result = match cli.script {
    Script::State => {
      let state = player.get_state().await?;
      println!("{}", serde_json::to_string_pretty(&state)?);
      Ok(())
    }
    Script::Demo => {
      let url = cli.url.as_deref().unwrap_or(SAMPLE_VIDEO);
      run_demo(&player, url).await
    }
    Script::Watch => {
      let events = player.events();
      loop {
        tokio::select! {
          event = events.recv() => match event {
            Ok(event) => println!("{} {}", event.name, event.data),
            Err(_) => break,
          },
          exit = player.wait_for_exit() => {
            log::info!("Player exited: {:?}", exit);
            break;
          }
          _ = tokio::signal::ctrl_c() => break,
        }
      }
      Ok(())
    }
  };

  player.terminate().await;
  result
}
