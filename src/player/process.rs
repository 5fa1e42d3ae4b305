//! Player process spawning and supervision.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::error::BridgeError;

/// Flag that switches the player into stdio IPC mode.
pub const IPC_FLAG: &str = "--ipc";

/// Startup options passed to the player on its command line.
///
/// Unset dimensions are left to the player, which opens at 1280x720.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOptions {
  /// Media to open on startup.
  pub url: Option<String>,
  pub width: Option<u32>,
  pub height: Option<u32>,
}

impl LaunchOptions {
  pub fn with_url(mut self, url: impl Into<String>) -> Self {
    self.url = Some(url.into());
    self
  }

  pub fn with_size(mut self, width: u32, height: u32) -> Self {
    self.width = Some(width);
    self.height = Some(height);
    self
  }
}

/// How the player process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
  /// Exit code, `None` if killed by a signal or never observed.
  pub code: Option<i32>,
}

/// Build the player's argument list.
pub fn build_args(options: &LaunchOptions, extra_args: &[String]) -> Vec<String> {
  let mut args = vec![IPC_FLAG.to_string()];

  if let Some(url) = options.url.as_ref().filter(|u| !u.is_empty()) {
    args.push("--url".to_string());
    args.push(url.clone());
  }
  if let Some(width) = options.width {
    args.push("--width".to_string());
    args.push(width.to_string());
  }
  if let Some(height) = options.height {
    args.push("--height".to_string());
    args.push(height.to_string());
  }

  args.extend(extra_args.iter().cloned());
  args
}

/// Resolve the player executable. Bare program names are looked up on PATH.
pub fn resolve_player(path: &Path) -> Result<PathBuf, BridgeError> {
  let bare = path
    .parent()
    .map_or(true, |parent| parent.as_os_str().is_empty());
  if !bare {
    return Ok(path.to_path_buf());
  }

  which::which(path).map_err(|_| BridgeError::PlayerNotFound(path.display().to_string()))
}

/// Spawn the player with piped stdio.
pub(crate) fn spawn_player(exe: &Path, args: &[String]) -> Result<Child, BridgeError> {
  log::info!("Spawning player: {:?} {:?}", exe, args);

  let child = Command::new(exe)
    .args(args)
    .stdin(Stdio::piped())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true)
    .spawn()?;

  Ok(child)
}

/// Forward the player's stderr to the log, line by line.
pub(crate) fn pipe_stderr(stderr: ChildStderr) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut lines = BufReader::new(stderr).lines();
    loop {
      match lines.next_line().await {
        Ok(Some(line)) if line.trim().is_empty() => {}
        Ok(Some(line)) => log::warn!(target: "playerlink::stderr", "{}", line),
        Ok(None) => break,
        Err(e) => {
          log::error!("Player stderr read error: {}", e);
          break;
        }
      }
    }
  })
}

/// Wait for the child to exit, or kill it once `shutdown` is cancelled.
pub(crate) fn supervise<F>(mut child: Child, shutdown: CancellationToken, on_exit: F) -> JoinHandle<()>
where
  F: FnOnce(ProcessExit) + Send + 'static,
{
  tokio::spawn(async move {
    let pid = child.id();
    let exited = tokio::select! {
      status = child.wait() => Some(status),
      _ = shutdown.cancelled() => None,
    };

    let status = match exited {
      Some(status) => status,
      None => {
        log::info!("Killing player process (pid: {:?})", pid);
        if let Err(e) = child.start_kill() {
          log::error!("kill() failed: {}", e);
        }
        child.wait().await
      }
    };

    let exit = match status {
      Ok(status) => {
        log::info!("Player process exited with: {}", status);
        ProcessExit {
          code: status.code(),
        }
      }
      Err(e) => {
        log::error!("wait() failed: {}", e);
        ProcessExit { code: None }
      }
    };
    on_exit(exit);
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_args_always_enable_ipc() {
    assert_eq!(build_args(&LaunchOptions::default(), &[]), vec!["--ipc"]);
  }

  #[test]
  fn test_args_include_only_provided_options() {
    let options = LaunchOptions::default()
      .with_url("https://example.com/video.mp4")
      .with_size(1920, 1080);
    assert_eq!(
      build_args(&options, &["--verbose".to_string()]),
      vec![
        "--ipc",
        "--url",
        "https://example.com/video.mp4",
        "--width",
        "1920",
        "--height",
        "1080",
        "--verbose"
      ]
    );

    let options = LaunchOptions {
      height: Some(720),
      ..Default::default()
    };
    assert_eq!(build_args(&options, &[]), vec!["--ipc", "--height", "720"]);
  }

  #[test]
  fn test_empty_url_is_omitted() {
    let options = LaunchOptions::default().with_url("");
    assert_eq!(build_args(&options, &[]), vec!["--ipc"]);
  }

  #[test]
  fn test_resolve_player() {
    let explicit = Path::new("/opt/player/bin/player");
    assert_eq!(resolve_player(explicit).unwrap(), explicit);

    match resolve_player(Path::new("surely-not-an-installed-player-binary")) {
      Err(BridgeError::PlayerNotFound(name)) => {
        assert_eq!(name, "surely-not-an-installed-player-binary")
      }
      other => panic!("Expected PlayerNotFound, got {:?}", other),
    }
  }
}
