//! Periodic automatic backups.
//!
//! The schedule is an explicit cancellable task: `start` spawns it and keeps
//! the handle, `stop` cancels future firings without touching an in-flight
//! backup. One failed run never halts the schedule.

use crate::error::{EngineError, Result};
use crate::events::EngineEvent;
use crate::services::orchestrator::{BackupEngine, BackupOptions};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub struct BackupScheduler {
    engine: BackupEngine,
    state: Mutex<SchedulerState>,
}

#[derive(Default)]
struct SchedulerState {
    running: Option<RunningSchedule>,
    last_source: Option<PathBuf>,
}

struct RunningSchedule {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl BackupScheduler {
    pub fn new(engine: BackupEngine) -> Self {
        Self {
            engine,
            state: Mutex::new(SchedulerState::default()),
        }
    }

    /// Begin firing automatic backups. A second start while running is a
    /// no-op. The source falls back to whatever was given last; having none
    /// at all is a configuration error. The interval falls back to the
    /// configured one.
    pub async fn start(&self, source: Option<PathBuf>, interval: Option<Duration>) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(running) = &state.running {
            if !running.task.is_finished() {
                debug!("Scheduler already running, start ignored");
                return Ok(());
            }
        }

        let source = source
            .or_else(|| state.last_source.clone())
            .ok_or_else(|| {
                EngineError::Config("scheduler started without a source database path".into())
            })?;
        state.last_source = Some(source.clone());

        let interval = interval.unwrap_or_else(|| self.engine.config().interval());
        let cancel = CancellationToken::new();
        let task = spawn_schedule(self.engine.clone(), source, interval, cancel.clone());
        state.running = Some(RunningSchedule { cancel, task });

        info!(interval_secs = interval.as_secs(), "Scheduler started");
        self.engine.events().emit(EngineEvent::SchedulerStarted {
            interval_secs: interval.as_secs(),
        });
        Ok(())
    }

    /// Cancel future firings. An in-flight backup runs to completion.
    /// Stopping an idle scheduler is a no-op.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        if let Some(running) = state.running.take() {
            running.cancel.cancel();
            info!("Scheduler stopped");
            self.engine.events().emit(EngineEvent::SchedulerStopped);
        }
    }

    pub async fn is_running(&self) -> bool {
        self.state
            .lock()
            .await
            .running
            .as_ref()
            .map(|r| !r.task.is_finished())
            .unwrap_or(false)
    }
}

fn spawn_schedule(
    engine: BackupEngine,
    source: PathBuf,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let options = BackupOptions {
                        description: Some("scheduled automatic backup".into()),
                        tags: vec!["automatic".into()],
                        ..Default::default()
                    };
                    if let Err(e) = engine.create_backup(&source, &options).await {
                        error!(source = %source.display(), error = %e, "Scheduled backup failed");
                    }
                }
            }
        }
        debug!("Schedule task exited");
    })
}
