//! Routes inbound messages to the correlator or the event hub.

use super::correlator::{Correlator, Settlement};
use super::events::EventHub;
use super::protocol::PlayerMessage;

pub(crate) fn route(message: PlayerMessage, correlator: &Correlator, events: &EventHub) {
  match message {
    PlayerMessage::Response(response) => {
      if !correlator.settle(&response.id, Settlement::Resolved(response.data)) {
        log::debug!("Dropping response for unknown command {}", response.id);
      }
    }
    PlayerMessage::Event(event) => {
      log::debug!("Player event: {}", event.name);
      events.dispatch(&event.name, &event.data);
    }
    PlayerMessage::Error(error) => match error.id {
      Some(id) => {
        let settled = correlator.settle(
          &id,
          Settlement::Rejected {
            code: error.code.clone(),
            message: error.message.clone(),
          },
        );
        if !settled {
          log::warn!(
            "Player error for unknown command {}: {}: {}",
            id,
            error.code,
            error.message
          );
        }
      }
      // Never matched to a pending call.
      None => log::warn!("Player error: {}: {}", error.code, error.message),
    },
    PlayerMessage::Unknown(kind) => {
      log::warn!("Ignoring player message of unknown type {:?}", kind);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::player::BridgeError;
  use serde_json::{json, Value};
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;
  use std::time::Duration;

  fn setup() -> (Arc<Correlator>, EventHub) {
    (Arc::new(Correlator::new(Duration::from_secs(5))), EventHub::new())
  }

  fn parse(line: &str) -> PlayerMessage {
    PlayerMessage::parse(line).unwrap()
  }

  #[tokio::test]
  async fn test_response_resolves_matching_call() {
    let (correlator, events) = setup();
    let (cmd, rx) = correlator.register("get_state", Value::Null);

    route(
      parse(&format!(r#"{{"type":"response","id":"{}","data":{{"volume":0.5}}}}"#, cmd.id)),
      &correlator,
      &events,
    );
    assert_eq!(rx.await.unwrap().unwrap(), json!({"volume": 0.5}));
  }

  #[tokio::test]
  async fn test_unknown_response_is_discarded() {
    let (correlator, events) = setup();
    let (_cmd, _rx) = correlator.register("play", Value::Null);

    route(parse(r#"{"type":"response","id":"cmd_99","data":{}}"#), &correlator, &events);
    assert_eq!(correlator.pending_count(), 1);
  }

  #[tokio::test]
  async fn test_error_with_id_rejects_call() {
    let (correlator, events) = setup();
    let (cmd, rx) = correlator.register("select_subtitle", json!({"index": 7}));

    route(
      parse(&format!(
        r#"{{"type":"error","id":"{}","code":"INVALID_INDEX","message":"Subtitle index out of range"}}"#,
        cmd.id
      )),
      &correlator,
      &events,
    );
    match rx.await.unwrap() {
      Err(BridgeError::Remote { code, message }) => {
        assert_eq!(code, "INVALID_INDEX");
        assert_eq!(message, "Subtitle index out of range");
      }
      other => panic!("Expected remote error, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_error_without_id_rejects_nothing() {
    let (correlator, events) = setup();
    let (_cmd, _rx) = correlator.register("play", Value::Null);

    route(parse(r#"{"type":"error","code":"FATAL","message":"renderer lost"}"#), &correlator, &events);
    assert_eq!(correlator.pending_count(), 1);
  }

  #[tokio::test]
  async fn test_event_goes_to_hub() {
    let (correlator, events) = setup();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    events.on("state_changed", move |data| {
      assert_eq!(data["isPlaying"], true);
      counter.fetch_add(1, Ordering::SeqCst);
    });

    route(
      parse(r#"{"type":"event","event":"state_changed","data":{"isPlaying":true}}"#),
      &correlator,
      &events,
    );
    route(parse(r#"{"type":"progress"}"#), &correlator, &events);
    assert_eq!(seen.load(Ordering::SeqCst), 1);
  }
}
