use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mailroom_core::async_trait::async_trait;
use mailroom_core::{Job, JobQueue, JobReceiver, JobType, QueueError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Key identifying one scheduled ticker. Two enqueues with the same key
/// refer to the same logical job, the later one wins.
type ScheduleKey = (JobType, String);

/// Job queue backed by a tokio mpsc channel, with a ticker task per
/// dedupe key for repeatable jobs.
///
/// `enqueue_repeatable` spawns a task that delivers the job immediately
/// and then once per interval until cancelled or replaced. Enqueueing a
/// second job under an existing key aborts the previous ticker, so
/// per-key there is at most one schedule alive.
pub struct ScheduledJobQueue {
    job_sender: mpsc::Sender<Job>,
    // Never held across an await point.
    tickers: Arc<Mutex<HashMap<ScheduleKey, JoinHandle<()>>>>,
}

impl ScheduledJobQueue {
    /// Create a queue and the receiving half that a worker will drain.
    pub fn create_channel(buffer_size: usize) -> (Self, ChannelJobReceiver) {
        let (job_sender, receiver) = mpsc::channel(buffer_size);
        let queue = Self {
            job_sender,
            tickers: Arc::new(Mutex::new(HashMap::new())),
        };
        (queue, ChannelJobReceiver { receiver })
    }

    /// Number of currently scheduled tickers.
    pub fn scheduled_count(&self) -> usize {
        self.tickers.lock().map(|t| t.len()).unwrap_or(0)
    }

    /// Whether a ticker exists for the given job type and dedupe key.
    pub fn is_scheduled(&self, job_type: JobType, dedupe_key: &str) -> bool {
        self.tickers
            .lock()
            .map(|t| t.contains_key(&(job_type, dedupe_key.to_string())))
            .unwrap_or(false)
    }
}

#[async_trait]
impl JobQueue for ScheduledJobQueue {
    async fn enqueue_repeatable(
        &self,
        job: Job,
        dedupe_key: &str,
        repeat_interval: Duration,
    ) -> Result<(), QueueError> {
        let key = (job.job_type(), dedupe_key.to_string());
        let sender = self.job_sender.clone();

        let handle = tokio::spawn(async move {
            loop {
                if sender.send(job.clone()).await.is_err() {
                    debug!("Job channel closed, stopping ticker for {}", job);
                    break;
                }
                tokio::time::sleep(repeat_interval).await;
            }
        });

        let mut tickers = self
            .tickers
            .lock()
            .map_err(|e| QueueError::SendError(format!("ticker registry poisoned: {}", e)))?;
        if let Some(previous) = tickers.insert(key, handle) {
            debug!("Replacing scheduled job under dedupe key {}", dedupe_key);
            previous.abort();
        }
        Ok(())
    }

    async fn cancel_repeatable(
        &self,
        job_type: JobType,
        dedupe_key: &str,
    ) -> Result<(), QueueError> {
        let mut tickers = self
            .tickers
            .lock()
            .map_err(|e| QueueError::SendError(format!("ticker registry poisoned: {}", e)))?;
        if let Some(handle) = tickers.remove(&(job_type, dedupe_key.to_string())) {
            handle.abort();
            debug!("Cancelled scheduled {} job for key {}", job_type, dedupe_key);
        }
        Ok(())
    }
}

impl Drop for ScheduledJobQueue {
    fn drop(&mut self) {
        if let Ok(mut tickers) = self.tickers.lock() {
            for (_, handle) in tickers.drain() {
                handle.abort();
            }
        }
    }
}

/// Receiving half of a [`ScheduledJobQueue`] channel.
pub struct ChannelJobReceiver {
    receiver: mpsc::Receiver<Job>,
}

#[async_trait]
impl JobReceiver for ChannelJobReceiver {
    async fn recv(&mut self) -> Result<Job, QueueError> {
        self.receiver.recv().await.ok_or(QueueError::ChannelClosed)
    }
}
