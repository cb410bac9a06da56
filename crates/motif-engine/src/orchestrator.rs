//! Queue orchestration: admission control, per-queue concurrency, and
//! system health reporting.
//!
//! Queues are fixed at construction, one per transform kind. Job-level
//! counters (pending/running/completed/failed) live here; the renderer
//! worker pool is a separate semaphore handed to batch tasks so batch
//! concurrency never exceeds `max_concurrent_requests` regardless of how
//! many jobs are running.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use motif_core::{
    defaults, EngineConfig, Error, HealthLevel, HealthReport, QueueState, QueueStatus, Result,
};

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Admitted,
    Rejected { reason: String },
}

pub struct QueueOrchestrator {
    queues: RwLock<HashMap<String, QueueState>>,
    workers: Arc<Semaphore>,
    max_concurrent_tasks: usize,
    admission_load_threshold: f64,
    health_load_threshold: f64,
    pending_ceiling: usize,
    queue_failure_threshold: f64,
    poll_interval: std::time::Duration,
}

impl QueueOrchestrator {
    pub fn new(config: &EngineConfig) -> Self {
        let mut queues = HashMap::new();
        for name in [
            defaults::QUEUE_REPLACE,
            defaults::QUEUE_EXPORT,
            defaults::QUEUE_BULK,
        ] {
            queues.insert(
                name.to_string(),
                QueueState::new(name, config.queue_concurrency_limit),
            );
        }
        Self {
            queues: RwLock::new(queues),
            workers: Arc::new(Semaphore::new(config.max_concurrent_requests)),
            max_concurrent_tasks: config.max_concurrent_tasks.max(1),
            admission_load_threshold: config.admission_load_threshold,
            health_load_threshold: config.health_load_threshold,
            pending_ceiling: config.pending_ceiling,
            queue_failure_threshold: config.queue_failure_threshold,
            poll_interval: config.poll_interval,
        }
    }

    /// Admission check for a new job. Rejects when the system load is at
    /// or above the admission threshold, or the target queue is paused.
    /// On admission the job is counted as pending on its queue.
    pub async fn submit(&self, queue: &str) -> Result<Admission> {
        let mut queues = self.queues.write().await;
        let load = Self::load_of(&queues, self.max_concurrent_tasks);
        let state = queues
            .get_mut(queue)
            .ok_or_else(|| Error::InvalidInput(format!("unknown queue '{queue}'")))?;

        if state.paused {
            warn!(queue, "submission rejected: queue paused");
            return Ok(Admission::Rejected {
                reason: format!("queue '{queue}' is paused"),
            });
        }
        if load >= self.admission_load_threshold {
            warn!(queue, system_load = load, "submission rejected: overloaded");
            return Ok(Admission::Rejected {
                reason: format!(
                    "system load {load:.2} at or above threshold {:.2}",
                    self.admission_load_threshold
                ),
            });
        }

        state.pending += 1;
        state.updated_at = Utc::now();
        debug!(queue, pending = state.pending, "job admitted");
        Ok(Admission::Admitted)
    }

    /// Wait for a running slot on `queue`, honoring both the per-queue
    /// concurrency limit and the system-wide task capacity. Moves one
    /// pending job to running.
    pub async fn start(&self, queue: &str) -> Result<()> {
        loop {
            {
                let mut queues = self.queues.write().await;
                let total_running: usize = queues.values().map(|q| q.running).sum();
                let state = queues
                    .get_mut(queue)
                    .ok_or_else(|| Error::InvalidInput(format!("unknown queue '{queue}'")))?;
                if state.running < state.concurrency_limit
                    && total_running < self.max_concurrent_tasks
                {
                    state.pending = state.pending.saturating_sub(1);
                    state.running += 1;
                    state.updated_at = Utc::now();
                    return Ok(());
                }
            }
            sleep(self.poll_interval).await;
        }
    }

    /// Record a running job leaving the queue.
    pub async fn complete(&self, queue: &str, success: bool) {
        let mut queues = self.queues.write().await;
        if let Some(state) = queues.get_mut(queue) {
            state.running = state.running.saturating_sub(1);
            if success {
                state.completed += 1;
            } else {
                state.failed += 1;
            }
            state.updated_at = Utc::now();
        }
    }

    /// Withdraw a job that was admitted but never started (cancellation
    /// while pending).
    pub async fn withdraw(&self, queue: &str) {
        let mut queues = self.queues.write().await;
        if let Some(state) = queues.get_mut(queue) {
            state.pending = state.pending.saturating_sub(1);
            state.updated_at = Utc::now();
        }
    }

    pub async fn pause(&self, queue: &str) -> Result<()> {
        let mut queues = self.queues.write().await;
        let state = queues
            .get_mut(queue)
            .ok_or_else(|| Error::InvalidInput(format!("unknown queue '{queue}'")))?;
        state.paused = true;
        state.updated_at = Utc::now();
        info!(queue, "queue paused");
        Ok(())
    }

    pub async fn resume(&self, queue: &str) -> Result<()> {
        let mut queues = self.queues.write().await;
        let state = queues
            .get_mut(queue)
            .ok_or_else(|| Error::InvalidInput(format!("unknown queue '{queue}'")))?;
        state.paused = false;
        state.updated_at = Utc::now();
        info!(queue, "queue resumed");
        Ok(())
    }

    /// Acquire a slot in the renderer worker pool. Held for the duration
    /// of one batch execution attempt.
    pub async fn acquire_worker(&self) -> Result<OwnedSemaphorePermit> {
        self.workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Internal("worker pool closed".to_string()))
    }

    /// Current running-tasks-to-capacity ratio.
    pub async fn system_load(&self) -> f64 {
        let queues = self.queues.read().await;
        Self::load_of(&queues, self.max_concurrent_tasks)
    }

    fn load_of(queues: &HashMap<String, QueueState>, capacity: usize) -> f64 {
        let running: usize = queues.values().map(|q| q.running).sum();
        running as f64 / capacity as f64
    }

    /// Snapshot of all queues plus aggregate counters.
    pub async fn queue_status(&self) -> QueueStatus {
        let queues = self.queues.read().await;
        let mut states: Vec<QueueState> = queues.values().cloned().collect();
        states.sort_by(|a, b| a.name.cmp(&b.name));
        let total_pending = states.iter().map(|q| q.pending).sum();
        let total_running = states.iter().map(|q| q.running).sum();
        QueueStatus {
            queues: states,
            total_pending,
            total_running,
            system_load: Self::load_of(&queues, self.max_concurrent_tasks),
            last_updated: Utc::now(),
        }
    }

    /// Score the system: start at 1.0, subtract 0.3 when load exceeds the
    /// health threshold, 0.2 when pending work exceeds the ceiling, and
    /// 0.2 per queue whose failure ratio exceeds the queue threshold.
    pub async fn system_health(&self) -> HealthReport {
        let queues = self.queues.read().await;
        let load = Self::load_of(&queues, self.max_concurrent_tasks);
        let total_pending: usize = queues.values().map(|q| q.pending).sum();
        let total_running: usize = queues.values().map(|q| q.running).sum();

        let mut score: f64 = 1.0;
        if load > self.health_load_threshold {
            score -= 0.3;
        }
        if total_pending > self.pending_ceiling {
            score -= 0.2;
        }
        let mut unhealthy_queues: Vec<String> = queues
            .values()
            .filter(|q| q.failure_ratio() > self.queue_failure_threshold)
            .map(|q| q.name.clone())
            .collect();
        unhealthy_queues.sort();
        score -= 0.2 * unhealthy_queues.len() as f64;
        score = score.max(0.0);

        let status = if score >= 0.9 {
            HealthLevel::Healthy
        } else if score >= 0.7 {
            HealthLevel::Degraded
        } else {
            HealthLevel::Unhealthy
        };

        HealthReport {
            status,
            score,
            system_load: load,
            total_pending,
            total_running,
            unhealthy_queues,
            checked_at: Utc::now(),
        }
    }
}
