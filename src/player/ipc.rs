//! Async stdio connection to the player.
//!
//! One reader task consumes stdout in order and routes each message; one
//! writer task owns stdin so command lines never interleave.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use super::codec::LineFramer;
use super::correlator::{Correlator, Settlement};
use super::error::BridgeError;
use super::events::EventHub;
use super::protocol::Command;
use super::router::route;

/// Live connection to a player's stdio.
pub struct Connection {
  correlator: Arc<Correlator>,
  write_tx: async_channel::Sender<Command>,
  closed: CancellationToken,
  reader_handle: JoinHandle<()>,
  _writer_handle: JoinHandle<()>,
}

impl Connection {
  /// Start the reader and writer tasks over `reader`/`writer`.
  pub fn setup<R, W>(
    reader: R,
    writer: W,
    correlator: Arc<Correlator>,
    events: Arc<EventHub>,
  ) -> Self
  where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
  {
    let (write_tx, write_rx) = async_channel::unbounded::<Command>();
    let closed = CancellationToken::new();

    let reader_correlator = correlator.clone();
    let reader_closed = closed.clone();
    let reader_handle = tokio::spawn(async move {
      Self::reader_loop(reader, &reader_correlator, &events).await;
      reader_closed.cancel();
      reader_correlator.fail_all();
    });

    let writer_correlator = correlator.clone();
    let writer_closed = closed.clone();
    let writer_handle = tokio::spawn(async move {
      Self::writer_loop(writer, write_rx, &writer_correlator, &writer_closed).await;
    });

    Self {
      correlator,
      write_tx,
      closed,
      reader_handle,
      _writer_handle: writer_handle,
    }
  }

  async fn reader_loop<R: AsyncRead + Unpin>(reader: R, correlator: &Correlator, events: &EventHub) {
    log::info!("Player reader loop started");
    let mut frames = FramedRead::new(reader, LineFramer::new());

    while let Some(frame) = frames.next().await {
      match frame {
        Ok(Ok(message)) => route(message, correlator, events),
        Ok(Err(e)) => log::warn!("Skipping player output: {}", e),
        Err(e) => {
          log::error!("Player stdout read error: {}", e);
          break;
        }
      }
    }
    log::info!("Player stdout closed");
  }

  async fn writer_loop<W: AsyncWrite + Unpin>(
    writer: W,
    write_rx: async_channel::Receiver<Command>,
    correlator: &Correlator,
    closed: &CancellationToken,
  ) {
    log::info!("Player writer loop started");
    let mut sink = FramedWrite::new(writer, LineFramer::new());

    while let Ok(cmd) = write_rx.recv().await {
      let id = cmd.id.clone();
      if let Err(e) = sink.send(cmd).await {
        log::error!("Player stdin write error on {}: {}", id, e);
        // a player that cannot be written to is gone
        write_rx.close();
        closed.cancel();
        correlator.settle(&id, Settlement::Exited);
        correlator.fail_all();
        break;
      }
      log::debug!("Command {} written to player", id);
    }
    log::info!("Player writer closing");
  }

  /// Commands on this connection still waiting for a response.
  pub fn pending_count(&self) -> usize {
    self.correlator.pending_count()
  }

  /// Whether stdout has ended or the connection was shut down.
  pub fn is_closed(&self) -> bool {
    self.closed.is_cancelled()
  }

  /// Resolves once stdout has ended or the connection was shut down.
  pub async fn closed(&self) {
    self.closed.cancelled().await
  }

  /// Send a command and wait for its response.
  pub async fn send_command(&self, kind: &str, data: Value) -> Result<Value, BridgeError> {
    if self.is_closed() {
      return Err(BridgeError::NotLaunched);
    }

    let (cmd, rx) = self.correlator.register(kind, data);
    let id = cmd.id.clone();
    log::debug!("Sending player command {} ({})", kind, id);

    // stdout may have closed after the check above but before registration
    if self.write_tx.send(cmd).await.is_err() || self.is_closed() {
      self.correlator.settle(&id, Settlement::Exited);
    }

    rx.await.unwrap_or(Err(BridgeError::ProcessExited))
  }

  /// Stop both tasks and fail outstanding calls.
  pub fn shutdown(&self) {
    self.write_tx.close();
    self.reader_handle.abort();
    self.closed.cancel();
    self.correlator.fail_all();
  }
}

impl Drop for Connection {
  fn drop(&mut self) {
    self.write_tx.close();
    self.reader_handle.abort();
  }
}
