//! Background worker draining the verification job channel

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use mailroom_core::{Job, JobReceiver, JobType, QueueError, UtcDateTime};
use mailroom_queue::RetryPolicy;
use tracing::{debug, error, info};

use crate::errors::DomainError;
use crate::services::{VerificationScheduler, VerificationService};

/// Seam between the worker and the tick logic, so the dispatch loop can
/// be exercised without a full service stack.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle_job(&self, job: Job) -> Result<(), DomainError>;
}

#[async_trait]
impl JobHandler for VerificationService {
    async fn handle_job(&self, job: Job) -> Result<(), DomainError> {
        VerificationService::handle_job(self, job).await
    }
}

/// A job whose retry budget is spent, kept aside for inspection.
#[derive(Debug, Clone)]
pub struct ParkedJob {
    pub job: Job,
    pub error: String,
    pub parked_at: UtcDateTime,
}

/// Shared, inspectable store of parked jobs.
#[derive(Debug, Clone, Default)]
pub struct ParkedJobs {
    inner: Arc<Mutex<Vec<ParkedJob>>>,
}

impl ParkedJobs {
    pub fn new() -> Self {
        Self::default()
    }

    fn park(&self, job: Job, error: String) {
        lock(&self.inner).push(ParkedJob {
            job,
            error,
            parked_at: Utc::now(),
        });
    }

    pub fn snapshot(&self) -> Vec<ParkedJob> {
        lock(&self.inner).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner).is_empty()
    }
}

/// Drains the job channel and runs one handler task per tick.
///
/// Ticks for different domains run concurrently. A tick whose
/// (job type, domain) pair is still being handled is dropped: the
/// schedule delivers another one after the repeat interval, and two
/// concurrent handlers for the same domain could interleave their
/// state transitions. Handler errors are retried with backoff; when the
/// budget is spent the job's schedule is cancelled and the job is
/// parked instead of left to corrupt domain state tick after tick.
pub struct VerificationWorker {
    receiver: Box<dyn JobReceiver>,
    handler: Arc<dyn JobHandler>,
    scheduler: Arc<VerificationScheduler>,
    retry: RetryPolicy,
    in_flight: Arc<Mutex<HashSet<(JobType, i32)>>>,
    parked: ParkedJobs,
}

impl VerificationWorker {
    pub fn new(
        receiver: Box<dyn JobReceiver>,
        handler: Arc<dyn JobHandler>,
        scheduler: Arc<VerificationScheduler>,
    ) -> Self {
        Self {
            receiver,
            handler,
            scheduler,
            retry: RetryPolicy::default(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            parked: ParkedJobs::new(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Handle to the parked-job store; clone it before calling
    /// [`run`](Self::run), which consumes the worker.
    pub fn parked_jobs(&self) -> ParkedJobs {
        self.parked.clone()
    }

    pub async fn run(mut self) {
        info!("Verification worker started");
        loop {
            match self.receiver.recv().await {
                Ok(job) => self.dispatch(job),
                Err(QueueError::ChannelClosed) => {
                    info!("Job channel closed, verification worker stopping");
                    break;
                }
                Err(e) => {
                    error!("Verification worker failed to receive: {}", e);
                    break;
                }
            }
        }
    }

    fn dispatch(&self, job: Job) {
        let key = (job.job_type(), job.domain_id());
        {
            let mut in_flight = lock(&self.in_flight);
            if !in_flight.insert(key) {
                debug!("Skipping {}: previous tick still running", job);
                return;
            }
        }

        let handler = self.handler.clone();
        let scheduler = self.scheduler.clone();
        let retry = self.retry.clone();
        let in_flight = self.in_flight.clone();
        let parked = self.parked.clone();

        tokio::spawn(async move {
            let name = job.to_string();
            let result = retry.run(&name, || handler.handle_job(job.clone())).await;

            if let Err(e) = result {
                error!("Parking {} after exhausting retries: {}", name, e);
                if let Err(cancel_err) = scheduler.cancel_for(key.0, key.1).await {
                    error!("Failed to cancel schedule for parked {}: {}", name, cancel_err);
                }
                parked.park(job, e.to_string());
            }

            lock(&in_flight).remove(&key);
        });
    }
}

/// Lock and keep going even if a panicking task poisoned the mutex.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
