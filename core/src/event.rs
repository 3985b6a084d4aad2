//! Structured event emission for garbage collection runs.
//!
//! The GC engines take an optional [`EventEmitter`]; subscribers receive
//! one [`GcEvent`] per root, visited blob, deleted blob and phase outcome.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::error::{BaleError, GcPhase};

/// What happened, with the root or digest it happened to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    RootResolved {
        name: String,
        digest: String,
    },
    Visited {
        root: String,
        digest: String,
        children: usize,
    },
    MarkCompleted {
        black: usize,
    },
    Deleted {
        digest: String,
    },
    Compacted,
    Completed {
        deleted: usize,
        retained: usize,
        dry_run: bool,
    },
    Failed {
        phase: Option<GcPhase>,
        subject: Option<String>,
        error: String,
    },
}

impl EventPayload {
    /// Catalog key for this payload.
    pub fn key(&self) -> &'static str {
        match self {
            Self::RootResolved { .. } => events::GC_ROOT_RESOLVED,
            Self::Visited { .. } => events::GC_MARK_VISITED,
            Self::MarkCompleted { .. } => events::GC_MARK_COMPLETED,
            Self::Deleted { .. } => events::GC_SWEEP_DELETED,
            Self::Compacted => events::GC_COMPACTED,
            Self::Completed { .. } => events::GC_COMPLETED,
            Self::Failed { .. } => events::GC_FAILED,
        }
    }

    /// Failure payload carrying the phase and subject of a GC error.
    pub fn failed(error: &BaleError) -> Self {
        Self::Failed {
            phase: error.phase(),
            subject: error.subject().map(str::to_string),
            error: error.to_string(),
        }
    }
}

/// GC event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcEvent {
    /// Event key (e.g., "gc.mark.visited")
    pub key: String,

    pub payload: EventPayload,

    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl GcEvent {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            key: payload.key().to_string(),
            payload,
            timestamp: chrono::Utc::now(),
        }
    }
}

impl From<EventPayload> for GcEvent {
    fn from(payload: EventPayload) -> Self {
        Self::new(payload)
    }
}

/// Broadcasts events to any number of subscribers.
#[derive(Clone)]
pub struct EventEmitter {
    sender: Arc<broadcast::Sender<GcEvent>>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Stamp and send a payload. Having no subscribers is not an error.
    pub fn emit(&self, payload: EventPayload) {
        let _ = self.sender.send(GcEvent::new(payload));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GcEvent> {
        self.sender.subscribe()
    }
}

/// Event keys
pub mod events {
    pub const GC_ROOT_RESOLVED: &str = "gc.root.resolved";
    pub const GC_MARK_VISITED: &str = "gc.mark.visited";
    pub const GC_MARK_COMPLETED: &str = "gc.mark.completed";
    pub const GC_SWEEP_DELETED: &str = "gc.sweep.deleted";
    pub const GC_COMPACTED: &str = "gc.compacted";
    pub const GC_COMPLETED: &str = "gc.completed";
    pub const GC_FAILED: &str = "gc.failed";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_and_receive() {
        let emitter = EventEmitter::new(16);
        let mut rx = emitter.subscribe();

        emitter.emit(EventPayload::Deleted {
            digest: "sha256:abc".to_string(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.key, events::GC_SWEEP_DELETED);
        assert_eq!(
            event.payload,
            EventPayload::Deleted {
                digest: "sha256:abc".to_string()
            }
        );
    }

    #[test]
    fn test_emit_without_subscribers() {
        let emitter = EventEmitter::new(4);
        emitter.emit(EventPayload::Compacted);
    }

    #[test]
    fn test_payload_serializes_with_kind_tag() {
        let event = GcEvent::new(EventPayload::Completed {
            deleted: 3,
            retained: 5,
            dry_run: false,
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["key"], "gc.completed");
        assert_eq!(json["payload"]["kind"], "completed");
        assert_eq!(json["payload"]["deleted"], 3);
    }

    #[test]
    fn test_failed_payload_from_phase_error() {
        let error = BaleError::NotFound("blob sha256:1".to_string())
            .in_phase(GcPhase::Mark, "root 0 (latest)");

        match EventPayload::failed(&error) {
            EventPayload::Failed { phase, subject, .. } => {
                assert_eq!(phase, Some(GcPhase::Mark));
                assert_eq!(subject.as_deref(), Some("root 0 (latest)"));
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }
}
