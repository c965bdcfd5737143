//! Lifecycle events published by the engine.
//!
//! The bus is handed in at construction; the host application subscribes and
//! forwards events wherever it wants (UI, logs, IPC). A missing or lagging
//! subscriber never blocks or fails the operation that emits.

use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EngineEvent {
    Initialized {
        backup_path: PathBuf,
    },
    BackupCreated {
        backup_id: String,
        path: PathBuf,
        duration_ms: u64,
        automatic: bool,
    },
    BackupFailed {
        source: PathBuf,
        error: String,
    },
    RestoreCompleted {
        backup_id: String,
        restored_path: PathBuf,
        duration_ms: u64,
    },
    RestoreFailed {
        backup_id: String,
        error: String,
    },
    BackupDeleted {
        backup_id: String,
    },
    SchedulerStarted {
        interval_secs: u64,
    },
    SchedulerStopped,
    CleanupCompleted {
        deleted: usize,
        skipped: usize,
    },
    Shutdown,
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: EngineEvent) {
        tracing::debug!(?event, "Event");
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_reaches_subscribers() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.emit(EngineEvent::SchedulerStopped);
        assert!(matches!(rx.recv().await, Ok(EngineEvent::SchedulerStopped)));
    }

    #[test]
    fn emit_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.emit(EngineEvent::Shutdown);
    }

    #[test]
    fn events_serialize_with_kebab_case_type() {
        let event = EngineEvent::BackupDeleted {
            backup_id: "abc123".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "backup-deleted");
        assert_eq!(value["backup_id"], "abc123");
    }
}
