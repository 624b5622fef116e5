//! Fire-and-forget notifications to downstream services.
//!
//! Publishing never blocks the request path and never reports failure to the
//! caller: events are queued on a bounded channel and a background dispatcher
//! forwards them, in order, to an [`EventSink`]. A full queue or a failing sink
//! drops the event with a warning (at-most-once delivery).

mod nats;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::dto::PublicUser;

pub use nats::NatsSink;

pub const USER_REGISTERED: &str = "user-registered";
pub const USER_LOGGED_IN: &str = "user-logged-in";
pub const PASSWORD_RESET_REQUEST: &str = "password-reset-request";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum IdentityEvent {
    UserRegistered {
        user_id: Uuid,
    },
    UserLoggedIn {
        user_id: Uuid,
        user_details: PublicUser,
        token: String,
    },
    PasswordResetRequest {
        user_id: Uuid,
        email: String,
        reset_url: String,
    },
}

impl IdentityEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            IdentityEvent::UserRegistered { .. } => USER_REGISTERED,
            IdentityEvent::UserLoggedIn { .. } => USER_LOGGED_IN,
            IdentityEvent::PasswordResetRequest { .. } => PASSWORD_RESET_REQUEST,
        }
    }

    pub fn payload(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Best-effort publication. Implementations swallow their own failures.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: IdentityEvent);
}

/// Destination the dispatcher delivers to.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn send(&self, topic: &str, payload: Vec<u8>) -> anyhow::Result<()>;
}

/// Writes events to the structured log; used when no broker is configured.
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn send(&self, topic: &str, payload: Vec<u8>) -> anyhow::Result<()> {
        info!(topic, bytes = payload.len(), "event published to log sink");
        Ok(())
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::Sender<IdentityEvent>,
}

impl EventBus {
    /// Starts the dispatcher task. It exits once every `EventBus` clone is dropped.
    pub fn spawn(sink: Arc<dyn EventSink>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<IdentityEvent>(capacity.max(1));
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let topic = event.topic();
                let payload = match event.payload() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(error = %e, topic, "event serialization failed; dropped");
                        continue;
                    }
                };
                match sink.send(topic, payload).await {
                    Ok(()) => debug!(topic, "event delivered"),
                    Err(e) => warn!(error = %e, topic, "event delivery failed; dropped"),
                }
            }
            debug!("event dispatcher stopped");
        });
        (Self { tx }, handle)
    }
}

impl EventPublisher for EventBus {
    fn publish(&self, event: IdentityEvent) {
        if let Err(e) = self.tx.try_send(event) {
            let (reason, event) = match e {
                mpsc::error::TrySendError::Full(ev) => ("queue full", ev),
                mpsc::error::TrySendError::Closed(ev) => ("dispatcher stopped", ev),
            };
            warn!(topic = event.topic(), reason, "event dropped");
        }
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Keeps every published event for later inspection.
    #[derive(Default)]
    pub struct RecordingPublisher {
        events: Mutex<Vec<IdentityEvent>>,
    }

    impl RecordingPublisher {
        pub fn events(&self) -> Vec<IdentityEvent> {
            self.events.lock().unwrap().clone()
        }

        pub fn topics(&self) -> Vec<&'static str> {
            self.events().iter().map(IdentityEvent::topic).collect()
        }
    }

    impl EventPublisher for RecordingPublisher {
        fn publish(&self, event: IdentityEvent) {
            self.events.lock().unwrap().push(event);
        }
    }
}
