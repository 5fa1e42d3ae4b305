//! Request/response correlation for outbound commands.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use super::error::BridgeError;
use super::protocol::Command;

/// How a pending call ended.
#[derive(Debug)]
pub(crate) enum Settlement {
  Resolved(Value),
  Rejected { code: String, message: String },
  TimedOut,
  Exited,
}

type ResultSink = oneshot::Sender<Result<Value, BridgeError>>;

/// Outstanding command awaiting a response.
struct PendingCall {
  command: String,
  created_at: Instant,
  sink: ResultSink,
  timer: Option<AbortHandle>,
}

/// Receiver side of a registered call.
pub(crate) type PendingResult = oneshot::Receiver<Result<Value, BridgeError>>;

/// Assigns command ids and tracks calls until they settle.
///
/// A call is settled at most once: whoever removes it from the table first
/// (response, error frame, timer or process exit) delivers the result.
pub struct Correlator {
  next_id: Arc<AtomicU64>,
  pending: Mutex<HashMap<String, PendingCall>>,
  timeout: Duration,
}

impl Correlator {
  #[cfg(test)]
  pub fn new(timeout: Duration) -> Self {
    Self::with_ids(timeout, Arc::new(AtomicU64::new(0)))
  }

  /// Draw ids from a shared counter, so successive connections of one
  /// bridge never reuse an id.
  pub fn with_ids(timeout: Duration, next_id: Arc<AtomicU64>) -> Self {
    Self {
      next_id,
      pending: Mutex::new(HashMap::new()),
      timeout,
    }
  }

  /// Number of calls still waiting for a result.
  pub fn pending_count(&self) -> usize {
    self.pending.lock().len()
  }

  fn next_id(&self) -> String {
    format!("cmd_{}", self.next_id.fetch_add(1, Ordering::SeqCst))
  }

  /// Create a command with a fresh id and start its timeout.
  ///
  /// Must be called from within a tokio runtime.
  pub(crate) fn register(self: &Arc<Self>, kind: &str, data: Value) -> (Command, PendingResult) {
    let command = Command::new(kind, self.next_id(), data);
    let (tx, rx) = oneshot::channel();

    self.pending.lock().insert(
      command.id.clone(),
      PendingCall {
        command: command.kind.clone(),
        created_at: Instant::now(),
        sink: tx,
        timer: None,
      },
    );

    let weak: Weak<Self> = Arc::downgrade(self);
    let id = command.id.clone();
    let timeout = self.timeout;
    let timer = tokio::spawn(async move {
      tokio::time::sleep(timeout).await;
      if let Some(correlator) = weak.upgrade() {
        correlator.settle(&id, Settlement::TimedOut);
      }
    });

    // The timer may already have fired if the timeout is tiny.
    if let Some(call) = self.pending.lock().get_mut(&command.id) {
      call.timer = Some(timer.abort_handle());
    }

    (command, rx)
  }

  /// Settle a pending call. Returns false if `id` is not pending.
  pub(crate) fn settle(&self, id: &str, settlement: Settlement) -> bool {
    let call = self.pending.lock().remove(id);
    match call {
      Some(call) => {
        Self::finish(id, call, settlement);
        true
      }
      None => false,
    }
  }

  /// Fail every outstanding call with `ProcessExited`.
  pub(crate) fn fail_all(&self) -> usize {
    let drained: Vec<(String, PendingCall)> = self.pending.lock().drain().collect();
    let count = drained.len();
    if count > 0 {
      log::info!("Failing {} pending command(s): player exited", count);
    }
    for (id, call) in drained {
      Self::finish(&id, call, Settlement::Exited);
    }
    count
  }

  fn finish(id: &str, call: PendingCall, settlement: Settlement) {
    if let Some(timer) = call.timer {
      if !matches!(settlement, Settlement::TimedOut) {
        timer.abort();
      }
    }

    let elapsed = call.created_at.elapsed();
    let result = match settlement {
      Settlement::Resolved(data) => {
        log::debug!("{} ({}) resolved after {:?}", call.command, id, elapsed);
        Ok(data)
      }
      Settlement::Rejected { code, message } => {
        log::warn!("{} ({}) rejected: {}: {}", call.command, id, code, message);
        Err(BridgeError::Remote { code, message })
      }
      Settlement::TimedOut => {
        log::error!("{} ({}) timed out after {:?}", call.command, id, elapsed);
        Err(BridgeError::CommandTimeout {
          command: call.command,
          id: id.to_string(),
        })
      }
      Settlement::Exited => Err(BridgeError::ProcessExited),
    };

    // The caller may have stopped waiting.
    let _ = call.sink.send(result);
  }
}

impl Drop for Correlator {
  fn drop(&mut self) {
    for (_, call) in self.pending.get_mut().drain() {
      if let Some(timer) = call.timer {
        timer.abort();
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn correlator() -> Arc<Correlator> {
    Arc::new(Correlator::new(Duration::from_secs(5)))
  }

  #[tokio::test]
  async fn test_ids_are_sequential_per_instance() {
    let a = correlator();
    let b = correlator();

    let (first, _rx1) = a.register("play", Value::Null);
    let (second, _rx2) = a.register("pause", Value::Null);
    let (other, _rx3) = b.register("play", Value::Null);

    assert_eq!(first.id, "cmd_0");
    assert_eq!(second.id, "cmd_1");
    assert_eq!(other.id, "cmd_0");
    assert_eq!(a.pending_count(), 2);
  }

  #[tokio::test]
  async fn test_shared_counter_continues_across_correlators() {
    let ids = Arc::new(AtomicU64::new(0));
    let first = Arc::new(Correlator::with_ids(Duration::from_secs(5), ids.clone()));
    let (a, _rx1) = first.register("play", Value::Null);
    drop(first);

    let second = Arc::new(Correlator::with_ids(Duration::from_secs(5), ids));
    let (b, _rx2) = second.register("play", Value::Null);
    assert_eq!(a.id, "cmd_0");
    assert_eq!(b.id, "cmd_1");
  }

  #[tokio::test]
  async fn test_out_of_order_resolution() {
    let c = correlator();
    let (a, rx_a) = c.register("get_state", Value::Null);
    let (b, rx_b) = c.register("add_external_subtitle", json!({"name": "English"}));

    assert!(c.settle(&b.id, Settlement::Resolved(json!({"index": 0}))));
    assert!(c.settle(&a.id, Settlement::Resolved(json!({"isPlaying": false}))));

    assert_eq!(rx_a.await.unwrap().unwrap(), json!({"isPlaying": false}));
    assert_eq!(rx_b.await.unwrap().unwrap(), json!({"index": 0}));
    assert_eq!(c.pending_count(), 0);
  }

  #[tokio::test]
  async fn test_settles_only_once() {
    let c = correlator();
    let (cmd, rx) = c.register("play", Value::Null);

    assert!(c.settle(
      &cmd.id,
      Settlement::Rejected {
        code: "NO_MEDIA".into(),
        message: "nothing loaded".into(),
      }
    ));
    assert!(!c.settle(&cmd.id, Settlement::Resolved(json!({}))));

    let err = rx.await.unwrap().unwrap_err();
    assert_eq!(err.remote_code(), Some("NO_MEDIA"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_timeout_removes_pending_call() {
    let c = correlator();
    let (cmd, rx) = c.register("get_state", Value::Null);

    match rx.await.unwrap() {
      Err(BridgeError::CommandTimeout { command, id }) => {
        assert_eq!(command, "get_state");
        assert_eq!(id, cmd.id);
      }
      other => panic!("Expected timeout, got {:?}", other),
    }
    assert_eq!(c.pending_count(), 0);
    // late response is dropped
    assert!(!c.settle(&cmd.id, Settlement::Resolved(json!({}))));
  }

  #[tokio::test(start_paused = true)]
  async fn test_resolution_cancels_timer() {
    let c = correlator();
    let (cmd, rx) = c.register("play", Value::Null);
    c.settle(&cmd.id, Settlement::Resolved(json!({"ok": true})));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(rx.await.unwrap().unwrap(), json!({"ok": true}));
  }

  #[tokio::test]
  async fn test_fail_all() {
    let c = correlator();
    let receivers: Vec<_> = (0..3).map(|_| c.register("play", Value::Null).1).collect();

    assert_eq!(c.fail_all(), 3);
    for rx in receivers {
      assert!(matches!(rx.await.unwrap(), Err(BridgeError::ProcessExited)));
    }
    assert_eq!(c.fail_all(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_abandoned_call_is_reaped_by_timer() {
    let c = correlator();
    let (_cmd, rx) = c.register("play", Value::Null);
    drop(rx);

    assert_eq!(c.pending_count(), 1);
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(c.pending_count(), 0);
  }
}
