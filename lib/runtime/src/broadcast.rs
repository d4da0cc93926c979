//! Fan-out of run events to live subscribers (`GET /runs/:id/live`).
//!
//! Unlike the host's JetStream-backed `EventStore`, nothing here needs
//! durable replay — a subscriber that connects after a run finishes gets
//! nothing, which matches an SSE stream's semantics. Core NATS pub/sub
//! (no stream, no consumer) is the right-sized primitive.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use workforge_core::RunId;
use workforge_workflow::envelope::Envelope;
use workforge_workflow::Step;

/// Envelope published on `run:<id>` (and mirrored to `public-run:<id>`
/// for slug-triggered runs), matching the distilled spec's broadcast
/// shape (`{type, runId, timestamp, ...payload}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: RunId,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    StepStarted {
        run_id: RunId,
        timestamp: chrono::DateTime<chrono::Utc>,
        step: Step,
    },
    StepCompleted {
        run_id: RunId,
        timestamp: chrono::DateTime<chrono::Utc>,
        step: Step,
    },
    RunCompleted {
        run_id: RunId,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    RunFailed {
        run_id: RunId,
        timestamp: chrono::DateTime<chrono::Utc>,
        error_message: String,
    },
    RunCancelled {
        run_id: RunId,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    RunAwaitingAction {
        run_id: RunId,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl RunEvent {
    #[must_use]
    pub fn run_id(&self) -> RunId {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::StepStarted { run_id, .. }
            | Self::StepCompleted { run_id, .. }
            | Self::RunCompleted { run_id, .. }
            | Self::RunFailed { run_id, .. }
            | Self::RunCancelled { run_id, .. }
            | Self::RunAwaitingAction { run_id, .. } => *run_id,
        }
    }
}

/// Publishes run events. Implementations must not block the caller on a
/// slow or absent subscriber.
#[async_trait]
pub trait RunBroadcaster: Send + Sync {
    async fn publish(&self, event: RunEvent);

    /// Subscribes to the events for a single run. Returns `None` if the
    /// implementation has no notion of a replayable/long-lived channel
    /// for a run that's already finished.
    async fn subscribe(&self, run_id: RunId) -> Option<tokio::sync::broadcast::Receiver<RunEvent>>;
}

/// In-process broadcaster backed by one `tokio::sync::broadcast` channel
/// per active run. Channels are created lazily on first publish or
/// subscribe and pruned on terminal events.
pub struct InMemoryBroadcaster {
    channels: dashmap::DashMap<RunId, tokio::sync::broadcast::Sender<RunEvent>>,
    capacity: usize,
}

impl InMemoryBroadcaster {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: dashmap::DashMap::new(),
            capacity,
        }
    }

    fn channel_for(&self, run_id: RunId) -> tokio::sync::broadcast::Sender<RunEvent> {
        self.channels
            .entry(run_id)
            .or_insert_with(|| tokio::sync::broadcast::channel(self.capacity).0)
            .clone()
    }

    fn is_terminal(event: &RunEvent) -> bool {
        matches!(
            event,
            RunEvent::RunCompleted { .. } | RunEvent::RunFailed { .. } | RunEvent::RunCancelled { .. }
        )
    }
}

impl Default for InMemoryBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl RunBroadcaster for InMemoryBroadcaster {
    async fn publish(&self, event: RunEvent) {
        let run_id = event.run_id();
        let sender = self.channel_for(run_id);
        // No receivers is not an error: the caller may connect later, or
        // never, and the event is simply dropped.
        let _ = sender.send(event.clone());
        if Self::is_terminal(&event) {
            self.channels.remove(&run_id);
        }
    }

    async fn subscribe(&self, run_id: RunId) -> Option<tokio::sync::broadcast::Receiver<RunEvent>> {
        Some(self.channel_for(run_id).subscribe())
    }
}

/// NATS-backed broadcaster for multi-node deployments: every server
/// instance publishes to and subscribes from `workforge.run.<id>`, so a
/// client's SSE connection can land on any node regardless of which one
/// is running the workflow.
pub struct NatsBroadcaster {
    client: async_nats::Client,
}

impl NatsBroadcaster {
    #[must_use]
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }

    fn subject(run_id: RunId) -> String {
        format!("workforge.run.{run_id}")
    }
}

#[async_trait]
impl RunBroadcaster for NatsBroadcaster {
    async fn publish(&self, event: RunEvent) {
        let run_id = event.run_id();
        let Ok(payload) = Envelope::new(event).to_json_bytes() else {
            tracing::error!(%run_id, "failed to serialize run event");
            return;
        };
        if let Err(err) = self.client.publish(Self::subject(run_id), payload.into()).await {
            tracing::warn!(%run_id, %err, "failed to publish run event");
        }
    }

    async fn subscribe(&self, run_id: RunId) -> Option<tokio::sync::broadcast::Receiver<RunEvent>> {
        let mut nats_sub = self.client.subscribe(Self::subject(run_id)).await.ok()?;
        let (tx, rx) = tokio::sync::broadcast::channel(256);
        tokio::spawn(async move {
            use futures::StreamExt;
            while let Some(message) = nats_sub.next().await {
                // Other nodes on an older build could publish an older
                // envelope version; skip rather than crash the relay.
                let Ok(envelope) = Envelope::<RunEvent>::from_json_bytes(&message.payload) else {
                    continue;
                };
                if !envelope.is_current_version() {
                    tracing::warn!(version = envelope.version, "run event envelope is not the current version, skipping");
                    continue;
                }
                let event = envelope.into_payload();
                let terminal = InMemoryBroadcaster::is_terminal(&event);
                if tx.send(event).is_err() {
                    break;
                }
                if terminal {
                    break;
                }
            }
        });
        Some(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_broadcaster_delivers_to_subscriber() {
        let broadcaster = InMemoryBroadcaster::default();
        let run_id = RunId::new();
        let mut rx = broadcaster.subscribe(run_id).await.unwrap();

        broadcaster
            .publish(RunEvent::RunCompleted {
                run_id,
                timestamp: chrono::Utc::now(),
            })
            .await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.run_id(), run_id);
    }

    #[tokio::test]
    async fn terminal_event_prunes_the_channel() {
        let broadcaster = InMemoryBroadcaster::default();
        let run_id = RunId::new();
        let _rx = broadcaster.subscribe(run_id).await.unwrap();

        broadcaster
            .publish(RunEvent::RunCancelled {
                run_id,
                timestamp: chrono::Utc::now(),
            })
            .await;

        assert!(!broadcaster.channels.contains_key(&run_id));
    }

    /// `NatsBroadcaster` wraps every published event in an `Envelope`
    /// before it hits the wire; this is the decode half of that relay,
    /// exercised without a live NATS server.
    #[test]
    fn run_event_envelope_roundtrips_through_json_bytes() {
        let run_id = RunId::new();
        let event = RunEvent::RunStarted { run_id, timestamp: chrono::Utc::now() };

        let bytes = Envelope::new(event).to_json_bytes().expect("serialize");
        let envelope = Envelope::<RunEvent>::from_json_bytes(&bytes).expect("deserialize");

        assert!(envelope.is_current_version());
        assert_eq!(envelope.payload().run_id(), run_id);
    }
}
