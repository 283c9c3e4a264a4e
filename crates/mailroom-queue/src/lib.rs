//! Job queue built on tokio channels.
//!
//! [`ScheduledJobQueue`] delivers jobs over an mpsc channel and keeps a
//! ticker task per dedupe key so a job can repeat at a fixed interval
//! until cancelled. [`RetryPolicy`] wraps job handlers with bounded
//! exponential backoff.

pub mod queue;
pub mod retry;

pub use queue::{ChannelJobReceiver, ScheduledJobQueue};
pub use retry::RetryPolicy;

pub use mailroom_core::{Job, JobQueue, JobReceiver, JobType, QueueError};
