use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{info, Instrument};
use uuid::Uuid;

use super::{RunReport, SyncOrchestrator, SyncPhase, Trigger};
use crate::errors::AppError;

/// Owns the run lease: at most one sync run at a time in this process.
#[derive(Clone)]
pub struct SyncRunner {
    orchestrator: Arc<SyncOrchestrator>,
    lease: Arc<Mutex<()>>,
    running: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    last_report: Arc<RwLock<Option<RunReport>>>,
}

/// Held for the whole run. Dropping it clears the running flag, then frees
/// the lease.
struct RunLease {
    running: Arc<AtomicBool>,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for RunLease {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunnerStatus {
    pub running: bool,
    #[serde(flatten)]
    pub phase: SyncPhase,
    /// Number of runs accepted since startup.
    pub generation: u64,
    pub last_run: Option<RunReport>,
}

impl SyncRunner {
    pub fn new(orchestrator: Arc<SyncOrchestrator>) -> Self {
        Self {
            orchestrator,
            lease: Arc::new(Mutex::new(())),
            running: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            last_report: Arc::new(RwLock::new(None)),
        }
    }

    pub fn orchestrator(&self) -> &SyncOrchestrator {
        &self.orchestrator
    }

    fn try_acquire(&self) -> Option<(RunLease, Uuid)> {
        let guard = self.lease.clone().try_lock_owned().ok()?;
        self.running.store(true, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        let lease = RunLease {
            _guard: guard,
            running: self.running.clone(),
        };
        Some((lease, Uuid::new_v4()))
    }

    /// Start a run in the background. Fails with [`AppError::RunInProgress`]
    /// if one is already running; otherwise returns the new run id at once.
    pub fn spawn(&self, trigger: Trigger) -> Result<Uuid, AppError> {
        let (guard, run_id) = self.try_acquire().ok_or(AppError::RunInProgress)?;
        let runner = self.clone();

        tokio::spawn(
            async move {
                runner.execute(guard, run_id, trigger).await;
            }
            .in_current_span(),
        );
        Ok(run_id)
    }

    /// Run in the foreground. `None` if a run already holds the lease.
    pub async fn run_exclusive(&self, trigger: Trigger) -> Option<RunReport> {
        let (guard, run_id) = self.try_acquire()?;
        Some(self.execute(guard, run_id, trigger).await)
    }

    async fn execute(&self, _lease: RunLease, run_id: Uuid, trigger: Trigger) -> RunReport {
        info!(run_id = %run_id, trigger = %trigger, "sync run accepted");
        let report = self.orchestrator.run(run_id, trigger).await;
        *self.last_report.write().await = Some(report.clone());
        report
    }

    /// Reads a flag; never touches the lease itself.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub async fn last_report(&self) -> Option<RunReport> {
        self.last_report.read().await.clone()
    }

    pub async fn status(&self) -> RunnerStatus {
        RunnerStatus {
            running: self.is_running(),
            phase: self.orchestrator.phase(),
            generation: self.generation(),
            last_run: self.last_report().await,
        }
    }
}
