//! High-level player bridge with command methods.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::correlator::Correlator;
use super::error::BridgeError;
use super::events::{EventHandler, EventHub};
use super::ipc::Connection;
use super::process::{
  build_args, pipe_stderr, resolve_player, spawn_player, supervise, LaunchOptions, ProcessExit,
};
use super::protocol::{PlayerEvent, PlayerState, SubtitleAdded};
use crate::config::BridgeConfig;

/// Event the player emits once it accepts commands.
pub const READY_EVENT: &str = "ready";

/// The running player and the tasks serving it.
struct ActivePlayer {
  connection: Arc<Connection>,
  shutdown: CancellationToken,
  supervisor: Option<JoinHandle<()>>,
  pid: Option<u32>,
}

impl Drop for ActivePlayer {
  fn drop(&mut self) {
    // kills the child if the bridge goes away while it runs
    self.shutdown.cancel();
  }
}

/// Clears the bridge state once a player goes away.
struct ExitHook {
  active: Weak<Mutex<Option<ActivePlayer>>>,
  exit_tx: Arc<watch::Sender<Option<ProcessExit>>>,
  runs: Arc<AtomicU64>,
  run: u64,
}

impl ExitHook {
  fn fire(self, connection: &Arc<Connection>, exit: ProcessExit) {
    if let Some(active) = self.active.upgrade() {
      let mut slot = active.lock();
      if slot
        .as_ref()
        .is_some_and(|a| Arc::ptr_eq(&a.connection, connection))
      {
        let stale = slot.take();
        drop(slot);
        drop(stale);
      }
    }
    connection.shutdown();

    // Only the latest run may report; checked under the watch lock so a
    // launch resetting the value cannot interleave.
    let published = self.exit_tx.send_if_modified(|current| {
      if self.runs.load(Ordering::SeqCst) != self.run {
        return false;
      }
      *current = Some(exit);
      true
    });
    if !published {
      log::debug!("Ignoring exit of a replaced player: {:?}", exit);
    }
  }
}

/// Controls one external player process over its stdio.
#[derive(Clone)]
pub struct PlayerBridge {
  config: Arc<BridgeConfig>,
  next_id: Arc<AtomicU64>,
  runs: Arc<AtomicU64>,
  events: Arc<EventHub>,
  active: Arc<Mutex<Option<ActivePlayer>>>,
  exit_tx: Arc<watch::Sender<Option<ProcessExit>>>,
}

impl PlayerBridge {
  /// Create a bridge. Nothing is spawned until [`launch`](Self::launch).
  pub fn new(config: BridgeConfig) -> Self {
    let (exit_tx, _) = watch::channel(None);
    Self {
      config: Arc::new(config),
      next_id: Arc::new(AtomicU64::new(0)),
      runs: Arc::new(AtomicU64::new(0)),
      events: Arc::new(EventHub::new()),
      active: Arc::new(Mutex::new(None)),
      exit_tx: Arc::new(exit_tx),
    }
  }

  pub fn config(&self) -> &BridgeConfig {
    &self.config
  }

  /// Launch the configured player and wait for it to report ready.
  pub async fn launch(&self, options: &LaunchOptions) -> Result<(), BridgeError> {
    let player = self.config.player();
    self.launch_with(&player, options).await
  }

  /// Launch `executable` and wait for it to report ready.
  pub async fn launch_with(&self, executable: &Path, options: &LaunchOptions) -> Result<(), BridgeError> {
    self.config.validate().map_err(BridgeError::Config)?;
    if self.is_launched() {
      return Err(BridgeError::AlreadyLaunched);
    }
    // reap a player whose stdout closed but whose process was not yet seen exiting
    self.terminate().await;

    let exe = resolve_player(executable)?;
    let args = build_args(options, &self.config.player_args);

    // Subscribe before spawning so an early `ready` is not missed.
    let (ready_tx, ready_rx) = oneshot::channel();
    let ready_tx = Mutex::new(Some(ready_tx));
    let ready_handler = self.events.once(READY_EVENT, move |_| {
      if let Some(tx) = ready_tx.lock().take() {
        let _ = tx.send(());
      }
    });

    let mut child = match spawn_player(&exe, &args) {
      Ok(child) => child,
      Err(e) => {
        self.events.off(READY_EVENT, &ready_handler);
        return Err(e);
      }
    };

    let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
      self.events.off(READY_EVENT, &ready_handler);
      return Err(BridgeError::Spawn(std::io::Error::other("player stdio not captured")));
    };
    if let Some(stderr) = child.stderr.take() {
      pipe_stderr(stderr);
    }

    let pid = child.id();
    let connection = Arc::new(Connection::setup(
      stdout,
      stdin,
      self.new_correlator(),
      self.events.clone(),
    ));
    let shutdown = CancellationToken::new();
    let hook = self.exit_hook(self.begin_run());
    let exited_connection = connection.clone();
    let supervisor = supervise(child, shutdown.clone(), move |exit| {
      hook.fire(&exited_connection, exit)
    });

    *self.active.lock() = Some(ActivePlayer {
      connection,
      shutdown,
      supervisor: Some(supervisor),
      pid,
    });

    let mut exit_rx = self.exit_tx.subscribe();
    let launch_timeout = self.config.launch_timeout();
    let outcome = tokio::time::timeout(launch_timeout, async {
      tokio::select! {
        ready = ready_rx => ready.map_err(|_| BridgeError::ProcessExited),
        _ = exit_rx.wait_for(Option::is_some) => Err(BridgeError::ProcessExited),
      }
    })
    .await;
    self.events.off(READY_EVENT, &ready_handler);

    match outcome {
      Ok(Ok(())) => {
        log::info!("Player ready (pid: {:?})", pid);
        Ok(())
      }
      Ok(Err(e)) => {
        log::error!("Player exited before reporting ready");
        self.terminate().await;
        Err(e)
      }
      Err(_) => {
        log::error!("Player not ready after {:?}", launch_timeout);
        self.terminate().await;
        Err(BridgeError::LaunchTimeout(launch_timeout))
      }
    }
  }

  /// Drive a player over an existing stream pair instead of a child process.
  ///
  /// End of `reader` is treated like the process exiting. Does not wait for
  /// the `ready` event.
  pub fn attach<R, W>(&self, reader: R, writer: W) -> Result<(), BridgeError>
  where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
  {
    let mut active = self.active.lock();
    if active.as_ref().is_some_and(|a| !a.connection.is_closed()) {
      return Err(BridgeError::AlreadyLaunched);
    }

    let connection = Arc::new(Connection::setup(
      reader,
      writer,
      self.new_correlator(),
      self.events.clone(),
    ));
    let shutdown = CancellationToken::new();
    let hook = self.exit_hook(self.begin_run());
    let watched = connection.clone();
    let stop = shutdown.clone();
    let supervisor = tokio::spawn(async move {
      tokio::select! {
        _ = watched.closed() => {}
        _ = stop.cancelled() => {}
      }
      hook.fire(&watched, ProcessExit { code: None });
    });

    *active = Some(ActivePlayer {
      connection,
      shutdown,
      supervisor: Some(supervisor),
      pid: None,
    });
    log::info!("Player attached to streams");
    Ok(())
  }

  fn new_correlator(&self) -> Arc<Correlator> {
    Arc::new(Correlator::with_ids(
      self.config.command_timeout(),
      self.next_id.clone(),
    ))
  }

  /// Start a new run and clear the last exit. Returns the run number.
  fn begin_run(&self) -> u64 {
    let mut run = 0;
    self.exit_tx.send_modify(|current| {
      run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
      *current = None;
    });
    run
  }

  fn exit_hook(&self, run: u64) -> ExitHook {
    ExitHook {
      active: Arc::downgrade(&self.active),
      exit_tx: self.exit_tx.clone(),
      runs: self.runs.clone(),
      run,
    }
  }

  /// Stop the player. Outstanding commands fail with `ProcessExited`.
  ///
  /// No-op when nothing is running.
  pub async fn terminate(&self) {
    let active = self.active.lock().take();
    let Some(mut active) = active else {
      log::debug!("terminate(): no active player");
      return;
    };

    log::info!("Stopping player (pid: {:?})", active.pid);
    active.connection.shutdown();
    active.shutdown.cancel();

    if let Some(handle) = active.supervisor.take() {
      if let Err(e) = handle.await {
        log::error!("Player supervisor failed during shutdown: {}", e);
      }
    }
    log::info!("Player stopped");
  }

  /// Whether a player is running and its stdout is open.
  pub fn is_launched(&self) -> bool {
    self
      .active
      .lock()
      .as_ref()
      .is_some_and(|a| !a.connection.is_closed())
  }

  /// OS process id of the running player.
  pub fn pid(&self) -> Option<u32> {
    self.active.lock().as_ref().and_then(|a| a.pid)
  }

  /// Watch the most recent player exit; `None` while one is running.
  pub fn exit_notifications(&self) -> watch::Receiver<Option<ProcessExit>> {
    self.exit_tx.subscribe()
  }

  /// Wait until the current player exits.
  pub async fn wait_for_exit(&self) -> Option<ProcessExit> {
    let mut rx = self.exit_tx.subscribe();
    let exit = rx.wait_for(Option::is_some).await.ok()?;
    *exit
  }

  /// Number of commands still waiting for a response.
  pub fn pending_count(&self) -> usize {
    self
      .active
      .lock()
      .as_ref()
      .map_or(0, |a| a.connection.pending_count())
  }

  fn connection(&self) -> Result<Arc<Connection>, BridgeError> {
    let guard = self.active.lock();
    match guard.as_ref() {
      Some(active) if !active.connection.is_closed() => Ok(active.connection.clone()),
      _ => Err(BridgeError::NotLaunched),
    }
  }

  /// Send a raw command and wait for its response payload.
  pub async fn send(&self, kind: &str, data: Value) -> Result<Value, BridgeError> {
    let connection = self.connection()?;
    connection.send_command(kind, data).await
  }

  async fn send_decoded<T: DeserializeOwned>(&self, kind: &str, data: Value) -> Result<T, BridgeError> {
    let value = self.send(kind, data).await?;
    Ok(serde_json::from_value(value)?)
  }

  // ==========================================================================
  // Events
  // ==========================================================================

  /// Call `handler` for every `event`.
  pub fn on<F>(&self, event: &str, handler: F) -> EventHandler
  where
    F: Fn(&Value) + Send + Sync + 'static,
  {
    self.events.on(event, handler)
  }

  /// Call `handler` for the next `event` only.
  pub fn once<F>(&self, event: &str, handler: F) -> EventHandler
  where
    F: Fn(&Value) + Send + Sync + 'static,
  {
    self.events.once(event, handler)
  }

  /// Remove a handler returned by [`on`](Self::on) or [`once`](Self::once).
  pub fn off(&self, event: &str, handler: &EventHandler) -> bool {
    self.events.off(event, handler)
  }

  /// Number of handlers registered for `event`.
  pub fn listener_count(&self, event: &str) -> usize {
    self.events.listener_count(event)
  }

  /// Receive every player event on a channel.
  pub fn events(&self) -> async_channel::Receiver<PlayerEvent> {
    self.events.events()
  }

  // ==========================================================================
  // Player commands
  // ==========================================================================

  /// Load media for playback, starting at `start_time_ms`.
  pub async fn load_media(&self, url: &str, start_time_ms: u64) -> Result<(), BridgeError> {
    log::info!("Loading media: {}", url);
    self
      .send("load_video", json!({ "url": url, "startTime": start_time_ms }))
      .await?;
    Ok(())
  }

  pub async fn play(&self) -> Result<(), BridgeError> {
    self.send("play", Value::Null).await?;
    Ok(())
  }

  pub async fn pause(&self) -> Result<(), BridgeError> {
    self.send("pause", Value::Null).await?;
    Ok(())
  }

  /// Seek to an absolute position in milliseconds.
  pub async fn seek(&self, position_ms: u64) -> Result<(), BridgeError> {
    self.send("seek", json!({ "position": position_ms })).await?;
    Ok(())
  }

  /// Set volume (0.0 - 1.0).
  pub async fn set_volume(&self, volume: f64) -> Result<(), BridgeError> {
    self.send("set_volume", json!({ "volume": volume })).await?;
    Ok(())
  }

  /// Add an external subtitle track. An empty or missing comment is not sent.
  pub async fn add_external_subtitle(
    &self,
    name: &str,
    url: &str,
    comment: Option<&str>,
  ) -> Result<SubtitleAdded, BridgeError> {
    let mut data = Map::new();
    data.insert("name".to_string(), name.into());
    data.insert("url".to_string(), url.into());
    if let Some(comment) = comment.filter(|c| !c.is_empty()) {
      data.insert("comment".to_string(), comment.into());
    }
    self.send_decoded("add_external_subtitle", Value::Object(data)).await
  }

  /// Select a subtitle track by index; -1 disables subtitles.
  ///
  /// Bounds are checked by the player and come back as a remote error.
  pub async fn select_subtitle_track(&self, index: i64) -> Result<(), BridgeError> {
    self.send("select_subtitle", json!({ "index": index })).await?;
    Ok(())
  }

  pub async fn set_window_size(&self, width: u32, height: u32) -> Result<(), BridgeError> {
    self
      .send("set_window_size", json!({ "width": width, "height": height }))
      .await?;
    Ok(())
  }

  /// Get the current player state.
  pub async fn get_state(&self) -> Result<PlayerState, BridgeError> {
    self.send_decoded("get_state", Value::Null).await
  }

  pub async fn toggle_fullscreen(&self) -> Result<(), BridgeError> {
    self.send("toggle_fullscreen", Value::Null).await?;
    Ok(())
  }
}

impl Default for PlayerBridge {
  fn default() -> Self {
    Self::new(BridgeConfig::default())
  }
}
