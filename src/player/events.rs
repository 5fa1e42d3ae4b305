//! Event subscriptions and fan-out.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use async_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde_json::Value;

use super::protocol::PlayerEvent;

/// Callback invoked with an event's `data` payload.
///
/// Keep the returned `Arc` around to unsubscribe with [`EventHub::off`].
pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

struct Subscription {
  handler: EventHandler,
  once: bool,
}

/// Per-event subscriber lists.
#[derive(Default)]
pub struct EventHub {
  subscriptions: Mutex<HashMap<String, Vec<Subscription>>>,
  streams: Mutex<Vec<Sender<PlayerEvent>>>,
}

impl EventHub {
  pub fn new() -> Self {
    Self::default()
  }

  /// Call `handler` for every `event` until removed.
  pub fn on<F>(&self, event: &str, handler: F) -> EventHandler
  where
    F: Fn(&Value) + Send + Sync + 'static,
  {
    let handler: EventHandler = Arc::new(handler);
    self.subscribe(event, handler.clone(), false);
    handler
  }

  /// Call `handler` for the next `event` only.
  pub fn once<F>(&self, event: &str, handler: F) -> EventHandler
  where
    F: Fn(&Value) + Send + Sync + 'static,
  {
    let handler: EventHandler = Arc::new(handler);
    self.subscribe(event, handler.clone(), true);
    handler
  }

  /// Register an existing handler reference.
  pub fn subscribe(&self, event: &str, handler: EventHandler, once: bool) {
    self
      .subscriptions
      .lock()
      .entry(event.to_string())
      .or_default()
      .push(Subscription { handler, once });
  }

  /// Remove the first subscription of `handler` for `event`.
  pub fn off(&self, event: &str, handler: &EventHandler) -> bool {
    let mut subscriptions = self.subscriptions.lock();
    let Some(list) = subscriptions.get_mut(event) else {
      return false;
    };
    let Some(index) = list.iter().position(|s| Arc::ptr_eq(&s.handler, handler)) else {
      return false;
    };
    list.remove(index);
    if list.is_empty() {
      subscriptions.remove(event);
    }
    true
  }

  /// Number of handlers currently registered for `event`.
  pub fn listener_count(&self, event: &str) -> usize {
    self.subscriptions.lock().get(event).map_or(0, Vec::len)
  }

  /// Receive every dispatched event on a channel.
  ///
  /// Dropping the receiver ends the subscription.
  pub fn events(&self) -> Receiver<PlayerEvent> {
    let (tx, rx) = async_channel::unbounded();
    self.streams.lock().push(tx);
    rx
  }

  /// Invoke the subscribers of `event` in registration order.
  ///
  /// Handlers run outside the lock, so they may subscribe or unsubscribe.
  /// A panicking handler is logged and skipped.
  pub fn dispatch(&self, event: &str, data: &Value) {
    let handlers: Vec<EventHandler> = {
      let mut subscriptions = self.subscriptions.lock();
      let mut emptied = false;
      let handlers = match subscriptions.get_mut(event) {
        Some(list) => {
          let handlers: Vec<EventHandler> = list.iter().map(|s| s.handler.clone()).collect();
          list.retain(|s| !s.once);
          emptied = list.is_empty();
          handlers
        }
        None => Vec::new(),
      };
      if emptied {
        subscriptions.remove(event);
      }
      handlers
    };

    log::debug!("Dispatching event {} to {} handler(s)", event, handlers.len());
    for handler in handlers {
      if let Err(panic) = catch_unwind(AssertUnwindSafe(|| (*handler)(data))) {
        log::error!("Handler for event {} panicked: {}", event, panic_message(&*panic));
      }
    }

    let mut streams = self.streams.lock();
    if streams.is_empty() {
      return;
    }
    let message = PlayerEvent {
      name: event.to_string(),
      data: data.clone(),
    };
    streams.retain(|tx| tx.try_send(message.clone()).is_ok());
  }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
  if let Some(s) = panic.downcast_ref::<&str>() {
    *s
  } else if let Some(s) = panic.downcast_ref::<String>() {
    s.as_str()
  } else {
    "unknown panic"
  }
}
