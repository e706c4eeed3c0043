//! Bounded job queue (spec §4.6). Runners execute as spawned tasks on the
//! daemon's `tokio` multi-thread runtime; cancellation is cooperative via a
//! `tokio::sync::watch<bool>` channel checked at the runner's yield points,
//! since this workspace does not pull in `tokio_util`.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use tokio::sync::watch;

const HARD_MAX_CONCURRENT: usize = 16;

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("job queue is full (running + pending >= {0})")]
    QueueFull(usize),
    #[error("job queue has been shut down")]
    Destroyed,
    #[error("unknown job: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, JobError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct JobEvent {
    pub kind: String,
    pub data: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: String,
    pub status: JobStatus,
    pub message: String,
    pub metadata: HashMap<String, String>,
    pub events: Vec<JobEvent>,
    pub response: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    cancel_requested: bool,
}

pub type RunnerOutput = std::result::Result<String, String>;
pub type RunnerFuture = Pin<Box<dyn Future<Output = RunnerOutput> + Send>>;
pub type Runner = dyn Fn(String, Emitter, CancellationSignal) -> RunnerFuture + Send + Sync;

#[derive(Clone)]
pub struct Emitter {
    record: Arc<StdMutex<JobRecord>>,
    max_events: usize,
}

impl Emitter {
    /// Appends a timestamped event; silently dropped once the per-job cap
    /// is reached rather than growing unbounded.
    pub fn emit(&self, kind: impl Into<String>, data: impl Into<String>) {
        let mut record = self.record.lock().expect("job record mutex poisoned");
        if record.events.len() < self.max_events {
            record.events.push(JobEvent {
                kind: kind.into(),
                data: data.into(),
                at: Utc::now(),
            });
        }
    }
}

#[derive(Clone)]
pub struct CancellationSignal(watch::Receiver<bool>);

impl CancellationSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once `cancel_job` signals this job. A runner polls this at
    /// its own yield points; it is never forcibly aborted.
    pub async fn cancelled(&mut self) {
        let _ = self.0.wait_for(|v| *v).await;
    }
}

struct PendingJob {
    id: String,
    runner: Arc<Runner>,
}

struct Inner {
    jobs: HashMap<String, Arc<StdMutex<JobRecord>>>,
    pending: VecDeque<PendingJob>,
    running_count: usize,
    cancel_senders: HashMap<String, watch::Sender<bool>>,
    destroyed: bool,
}

struct Shared {
    max_concurrent: usize,
    max_queue_size: usize,
    max_events_per_job: usize,
    inner: StdMutex<Inner>,
}

/// Cheaply cloneable handle; every clone shares the same underlying queue
/// state, which is what lets a spawned runner task call back into the
/// queue to record its own completion.
#[derive(Clone)]
pub struct JobQueue(Arc<Shared>);

impl JobQueue {
    pub fn new(max_concurrent: usize, max_queue_size: usize, max_events_per_job: usize) -> Self {
        Self(Arc::new(Shared {
            max_concurrent: max_concurrent.clamp(1, HARD_MAX_CONCURRENT),
            max_queue_size,
            max_events_per_job,
            inner: StdMutex::new(Inner {
                jobs: HashMap::new(),
                pending: VecDeque::new(),
                running_count: 0,
                cancel_senders: HashMap::new(),
                destroyed: false,
            }),
        }))
    }

    pub fn job(&self, id: &str) -> Option<JobRecord> {
        let inner = self.0.inner.lock().expect("jobs mutex poisoned");
        inner.jobs.get(id).map(|r| r.lock().expect("job record mutex poisoned").clone())
    }

    pub fn len(&self) -> usize {
        self.0.inner.lock().expect("jobs mutex poisoned").jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Submits `message` to the queue. Transitions straight to running if a
    /// worker slot is free, otherwise appends to the pending FIFO.
    pub fn submit(
        &self,
        message: impl Into<String>,
        metadata: HashMap<String, String>,
        runner: Arc<Runner>,
    ) -> Result<String> {
        let message = message.into();
        let mut inner = self.0.inner.lock().expect("jobs mutex poisoned");
        if inner.destroyed {
            return Err(JobError::Destroyed);
        }
        if inner.running_count + inner.pending.len() >= self.0.max_queue_size {
            return Err(JobError::QueueFull(self.0.max_queue_size));
        }
        let id = uuid::Uuid::new_v4().to_string();
        let record = Arc::new(StdMutex::new(JobRecord {
            id: id.clone(),
            status: JobStatus::Pending,
            message,
            metadata,
            events: Vec::new(),
            response: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            cancel_requested: false,
        }));
        inner.jobs.insert(id.clone(), record);

        if inner.running_count < self.0.max_concurrent {
            inner.running_count += 1;
            drop(inner);
            self.launch(id.clone(), runner);
        } else {
            inner.pending.push_back(PendingJob { id: id.clone(), runner });
        }
        Ok(id)
    }

    fn launch(&self, id: String, runner: Arc<Runner>) {
        let (record, message) = {
            let inner = self.0.inner.lock().expect("jobs mutex poisoned");
            let record = inner.jobs.get(&id).expect("just inserted").clone();
            let message = record.lock().expect("job record mutex poisoned").message.clone();
            (record, message)
        };
        {
            let mut guard = record.lock().expect("job record mutex poisoned");
            guard.status = JobStatus::Running;
            guard.started_at = Some(Utc::now());
        }
        let (cancel_tx, cancel_rx) = watch::channel(false);
        {
            let mut inner = self.0.inner.lock().expect("jobs mutex poisoned");
            inner.cancel_senders.insert(id.clone(), cancel_tx);
        }
        let emitter = Emitter {
            record: record.clone(),
            max_events: self.0.max_events_per_job,
        };
        let signal = CancellationSignal(cancel_rx);
        let queue = self.clone();
        let job_id = id.clone();
        tokio::spawn(async move {
            let outcome = runner(message, emitter, signal).await;
            queue.finish(&job_id, outcome);
        });
    }

    fn finish(&self, id: &str, outcome: RunnerOutput) {
        let next = {
            let mut inner = self.0.inner.lock().expect("jobs mutex poisoned");
            inner.cancel_senders.remove(id);
            if let Some(record) = inner.jobs.get(id) {
                let mut guard = record.lock().expect("job record mutex poisoned");
                guard.status = if guard.cancel_requested {
                    JobStatus::Cancelled
                } else {
                    match &outcome {
                        Ok(response) => {
                            guard.response = Some(response.clone());
                            JobStatus::Completed
                        }
                        Err(error) => {
                            guard.error = Some(error.clone());
                            JobStatus::Failed
                        }
                    }
                };
                guard.completed_at = Some(Utc::now());
            }
            inner.running_count = inner.running_count.saturating_sub(1);
            if inner.running_count < self.0.max_concurrent {
                inner.pending.pop_front()
            } else {
                None
            }
        };
        if let Some(next) = next {
            self.0.inner.lock().expect("jobs mutex poisoned").running_count += 1;
            self.launch(next.id, next.runner);
        }
    }

    /// Pending jobs cancel synchronously; running jobs are signalled and
    /// resolve once the runner observes the cancellation. Returns false for
    /// unknown or already-terminal jobs.
    pub fn cancel_job(&self, id: &str) -> bool {
        let mut inner = self.0.inner.lock().expect("jobs mutex poisoned");
        let Some(record) = inner.jobs.get(id).cloned() else {
            return false;
        };
        let status = record.lock().expect("job record mutex poisoned").status;
        match status {
            JobStatus::Pending => {
                inner.pending.retain(|p| p.id != id);
                let mut guard = record.lock().expect("job record mutex poisoned");
                guard.status = JobStatus::Cancelled;
                guard.completed_at = Some(Utc::now());
                true
            }
            JobStatus::Running => {
                record.lock().expect("job record mutex poisoned").cancel_requested = true;
                if let Some(tx) = inner.cancel_senders.get(id) {
                    let _ = tx.send(true);
                }
                true
            }
            _ => false,
        }
    }

    /// Aborts (signals) all running jobs and cancels all pending jobs.
    /// Idempotent; subsequent submits fail with `Destroyed`.
    pub fn destroy(&self) {
        let mut inner = self.0.inner.lock().expect("jobs mutex poisoned");
        if inner.destroyed {
            return;
        }
        inner.destroyed = true;
        for tx in inner.cancel_senders.values() {
            let _ = tx.send(true);
        }
        for record in inner.jobs.values() {
            let mut guard = record.lock().expect("job record mutex poisoned");
            if guard.status == JobStatus::Pending {
                guard.status = JobStatus::Cancelled;
                guard.completed_at = Some(Utc::now());
            }
        }
        inner.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn instant_ok() -> Arc<Runner> {
        Arc::new(|message, emitter, _signal| {
            Box::pin(async move {
                emitter.emit("started", &message);
                Ok(format!("handled: {message}"))
            })
        })
    }

    #[tokio::test]
    async fn submit_runs_immediately_under_concurrency_cap() {
        let queue = JobQueue::new(4, 16, 10);
        let id = queue.submit("hello", HashMap::new(), instant_ok()).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let job = queue.job(&id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.response.as_deref(), Some("handled: hello"));
    }

    #[tokio::test]
    async fn excess_submissions_queue_and_promote_in_fifo_order() {
        let queue = JobQueue::new(1, 16, 10);
        let id1 = queue
            .submit(
                "first",
                HashMap::new(),
                Arc::new(|m, _e, _s| Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    Ok(m)
                })),
            )
            .unwrap();
        let id2 = queue.submit("second", HashMap::new(), instant_ok()).unwrap();
        assert_eq!(queue.job(&id2).unwrap().status, JobStatus::Pending);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(queue.job(&id1).unwrap().status, JobStatus::Completed);
        assert_eq!(queue.job(&id2).unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn queue_full_rejects_submission() {
        let queue = JobQueue::new(1, 1, 10);
        let _id = queue
            .submit(
                "first",
                HashMap::new(),
                Arc::new(|m, _e, _s| Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(m)
                })),
            )
            .unwrap();
        let err = queue.submit("second", HashMap::new(), instant_ok()).unwrap_err();
        assert!(matches!(err, JobError::QueueFull(1)));
    }

    #[tokio::test]
    async fn cancel_pending_job_marks_cancelled_without_running() {
        let queue = JobQueue::new(1, 16, 10);
        let _id1 = queue
            .submit(
                "first",
                HashMap::new(),
                Arc::new(|m, _e, _s| Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(m)
                })),
            )
            .unwrap();
        let id2 = queue.submit("second", HashMap::new(), instant_ok()).unwrap();
        assert!(queue.cancel_job(&id2));
        assert_eq!(queue.job(&id2).unwrap().status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_running_job_signals_runner_and_resolves_cancelled() {
        let queue = JobQueue::new(1, 16, 10);
        let runner: Arc<Runner> = Arc::new(|_m, _e, mut signal| {
            Box::pin(async move {
                signal.cancelled().await;
                Err("aborted".to_string())
            })
        });
        let id = queue.submit("work", HashMap::new(), runner).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(queue.cancel_job(&id));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.job(&id).unwrap().status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn destroy_is_idempotent_and_blocks_new_submissions() {
        let queue = JobQueue::new(2, 16, 10);
        queue.destroy();
        queue.destroy();
        let err = queue.submit("x", HashMap::new(), instant_ok()).unwrap_err();
        assert!(matches!(err, JobError::Destroyed));
    }

    #[tokio::test]
    async fn events_are_capped_at_max_events_per_job() {
        let queue = JobQueue::new(4, 16, 2);
        let runner: Arc<Runner> = Arc::new(|_m, emitter, _s| {
            Box::pin(async move {
                for i in 0..10 {
                    emitter.emit("tick", i.to_string());
                }
                Ok("done".to_string())
            })
        });
        let id = queue.submit("x", HashMap::new(), runner).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.job(&id).unwrap().events.len(), 2);
    }
}
