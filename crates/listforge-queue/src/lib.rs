//! Asynchronous job queue.
//!
//! Jobs are accepted immediately with an opaque request id, dispatched to a
//! worker pool in strict priority order (high before normal before low,
//! FIFO within a priority), and their results retained for polling until a
//! TTL expires. The queue knows nothing about compilation itself; the
//! embedding host supplies a [`JobExecutor`].

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Queue-level failures.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Too many jobs are already pending; the caller should retry later.
    #[error("queue over capacity: {pending} pending >= limit {limit}")]
    OverCapacity { pending: usize, limit: usize },
}

/// What a job does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobKind {
    #[serde(rename = "compile")]
    Compile,
    #[serde(rename = "batch")]
    Batch,
    #[serde(rename = "cache-warm")]
    CacheWarm,
    #[serde(rename = "health-check")]
    HealthCheck,
}

/// Strict dispatch priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    High,
    Normal,
    Low,
}

impl JobPriority {
    const ORDER: [Self; 3] = [Self::High, Self::Normal, Self::Low];

    const fn index(self) -> usize {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }
}

/// Job lifecycle. Transitions only move forward:
/// `pending → running → {completed, failed}`, or `pending → cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    /// True when the job can no longer change state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// A job as tracked by the queue.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: String,
    pub kind: JobKind,
    pub priority: JobPriority,
    pub payload: Value,
    pub enqueued_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub state: JobState,
    pub result: Option<Value>,
    pub error: Option<String>,
}

/// Poll response: current state plus the info block.
#[derive(Debug, Clone, Serialize)]
pub struct JobPoll {
    pub status: JobState,
    pub job_info: JobInfo,
}

/// The poll surface's `job_info` block.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub enqueued_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One finished job in the stats window.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub id: String,
    pub kind: JobKind,
    pub state: JobState,
    pub finished_at: i64,
    /// Time from submission to start.
    pub lag_ms: u64,
    /// Time from start to finish.
    pub duration_ms: u64,
}

/// Aggregated queue statistics over a rolling window.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Finished jobs per second over the window.
    pub processing_rate: f64,
    /// Mean submission-to-start lag over the window.
    pub queue_lag_ms: f64,
    pub history: Vec<HistoryEntry>,
}

/// Executes jobs on behalf of the queue.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, kind: JobKind, payload: Value) -> Result<Value, String>;
}

/// Queue tuning.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub worker_count: usize,
    /// How long finished jobs stay pollable.
    pub result_ttl_ms: u64,
    /// Finished jobs kept for statistics.
    pub stats_window: usize,
    /// Pending-job cap; submissions beyond it are rejected.
    pub max_pending: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            worker_count: 2,
            result_ttl_ms: 86_400_000,
            stats_window: 100,
            max_pending: 1_000,
        }
    }
}

/// The queue handle. Cheap to clone.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    config: QueueConfig,
    executor: Arc<dyn JobExecutor>,
    state: Mutex<QueueState>,
    work_available: Notify,
    shutdown_signal: Notify,
    shutdown: AtomicBool,
}

#[derive(Default)]
struct QueueState {
    queues: [VecDeque<String>; 3],
    jobs: HashMap<String, JobRecord>,
    window: VecDeque<HistoryEntry>,
    completed: u64,
    failed: u64,
    cancelled: u64,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl JobQueue {
    /// Build the queue and start its workers.
    #[must_use]
    pub fn new(executor: Arc<dyn JobExecutor>, config: QueueConfig) -> Self {
        let queue = Self {
            inner: Arc::new(QueueInner {
                config,
                executor,
                state: Mutex::new(QueueState::default()),
                work_available: Notify::new(),
                shutdown_signal: Notify::new(),
                shutdown: AtomicBool::new(false),
            }),
        };
        for worker_id in 0..queue.inner.config.worker_count.max(1) {
            let inner = queue.inner.clone();
            tokio::spawn(worker_loop(inner, worker_id));
        }
        queue
    }

    /// Accept a job. Returns its request id immediately.
    pub fn submit(
        &self,
        kind: JobKind,
        payload: Value,
        priority: JobPriority,
    ) -> Result<String, QueueError> {
        let mut state = self.lock();
        let pending: usize = state.queues.iter().map(VecDeque::len).sum();
        if pending >= self.inner.config.max_pending {
            return Err(QueueError::OverCapacity {
                pending,
                limit: self.inner.config.max_pending,
            });
        }

        let id = uuid::Uuid::new_v4().to_string();
        let record = JobRecord {
            id: id.clone(),
            kind,
            priority,
            payload,
            enqueued_at: now_ms(),
            started_at: None,
            finished_at: None,
            state: JobState::Pending,
            result: None,
            error: None,
        };
        state.jobs.insert(id.clone(), record);
        state.queues[priority.index()].push_back(id.clone());
        drop(state);

        debug!(job = id.as_str(), ?kind, ?priority, "job submitted");
        self.inner.work_available.notify_one();
        Ok(id)
    }

    /// Current state of a job, or `None` for unknown/expired ids.
    pub fn poll(&self, request_id: &str) -> Option<JobPoll> {
        let mut state = self.lock();
        prune_expired(&mut state, self.inner.config.result_ttl_ms);
        state.jobs.get(request_id).map(|record| JobPoll {
            status: record.state,
            job_info: JobInfo {
                enqueued_at: record.enqueued_at,
                started_at: record.started_at,
                finished_at: record.finished_at,
                result: record.result.clone(),
                error: record.error.clone(),
            },
        })
    }

    /// Cancel a pending job. Running jobs are not interrupted. Returns
    /// true when the job moved to `cancelled`; repeated cancels are no-ops.
    pub fn cancel(&self, request_id: &str) -> bool {
        let mut state = self.lock();
        let Some(record) = state.jobs.get_mut(request_id) else {
            return false;
        };
        if record.state != JobState::Pending {
            return false;
        }
        record.state = JobState::Cancelled;
        record.finished_at = Some(now_ms());
        state.cancelled += 1;
        true
    }

    /// Aggregated statistics.
    pub fn stats(&self) -> QueueStats {
        let state = self.lock();
        let pending = state
            .jobs
            .values()
            .filter(|j| j.state == JobState::Pending)
            .count();
        let running = state
            .jobs
            .values()
            .filter(|j| j.state == JobState::Running)
            .count();

        let (rate, lag) = if state.window.is_empty() {
            (0.0, 0.0)
        } else {
            let oldest = state
                .window
                .iter()
                .map(|e| e.finished_at)
                .min()
                .unwrap_or_else(now_ms);
            let span_ms = (now_ms() - oldest).max(1) as f64;
            let rate = state.window.len() as f64 / (span_ms / 1_000.0);
            let lag = state.window.iter().map(|e| e.lag_ms as f64).sum::<f64>()
                / state.window.len() as f64;
            (rate, lag)
        };

        QueueStats {
            pending,
            running,
            completed: state.completed,
            failed: state.failed,
            cancelled: state.cancelled,
            processing_rate: rate,
            queue_lag_ms: lag,
            history: state.window.iter().rev().cloned().collect(),
        }
    }

    /// Stop accepting work and wind the workers down.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.shutdown_signal.notify_waiters();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn prune_expired(state: &mut QueueState, ttl_ms: u64) {
    let cutoff = now_ms() - ttl_ms as i64;
    state.jobs.retain(|_, job| {
        !(job.state.is_terminal() && job.finished_at.is_some_and(|at| at < cutoff))
    });
}

async fn worker_loop(inner: Arc<QueueInner>, worker_id: usize) {
    loop {
        if inner.shutdown.load(Ordering::SeqCst) {
            break;
        }

        let next = {
            let mut state = inner
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            pop_next(&mut state)
        };

        match next {
            Some((id, kind, payload)) => {
                debug!(worker_id, job = id.as_str(), "job started");
                let outcome = inner.executor.execute(kind, payload).await;
                let mut state = inner
                    .state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                finish_job(&mut state, &id, outcome, inner.config.stats_window);
                prune_expired(&mut state, inner.config.result_ttl_ms);
            }
            None => {
                tokio::select! {
                    () = inner.work_available.notified() => {}
                    () = inner.shutdown_signal.notified() => break,
                }
            }
        }
    }
    debug!(worker_id, "queue worker stopped");
}

/// Pop the next runnable job id: high before normal before low, FIFO
/// within a priority, skipping entries cancelled while queued.
fn pop_next(state: &mut QueueState) -> Option<(String, JobKind, Value)> {
    for priority in JobPriority::ORDER {
        while let Some(id) = state.queues[priority.index()].pop_front() {
            let Some(record) = state.jobs.get_mut(&id) else {
                continue;
            };
            if record.state != JobState::Pending {
                continue;
            }
            record.state = JobState::Running;
            record.started_at = Some(now_ms());
            return Some((id, record.kind, record.payload.clone()));
        }
    }
    None
}

fn finish_job(state: &mut QueueState, id: &str, outcome: Result<Value, String>, window_cap: usize) {
    let Some(record) = state.jobs.get_mut(id) else {
        warn!(job = id, "finished job vanished from the registry");
        return;
    };
    let finished_at = now_ms();
    record.finished_at = Some(finished_at);
    match outcome {
        Ok(result) => {
            record.state = JobState::Completed;
            record.result = Some(result);
            state.completed += 1;
        }
        Err(error) => {
            record.state = JobState::Failed;
            record.error = Some(error);
            state.failed += 1;
        }
    }

    let entry = HistoryEntry {
        id: record.id.clone(),
        kind: record.kind,
        state: record.state,
        finished_at,
        lag_ms: record
            .started_at
            .map_or(0, |s| (s - record.enqueued_at).max(0) as u64),
        duration_ms: record
            .started_at
            .map_or(0, |s| (finished_at - s).max(0) as u64),
    };
    state.window.push_back(entry);
    while state.window.len() > window_cap.max(1) {
        state.window.pop_front();
    }
}
