//! Deferred jobs for the commission pipeline.
//!
//! Every stage of a monthly build is addressable as a [`CommissionJob`]: the root build fans out into batch jobs,
//! batch jobs into per-user jobs, and a deferred aggregation job closes the month. Stages never call each other
//! directly; they hand work to a [`JobQueue`] and carry on. The in-process implementation ([`InProcessJobQueue`])
//! delivers jobs over a tokio channel and is all a single-node deployment needs. Deployments with an external
//! deferred-call facility substitute their own [`JobQueue`].
use std::time::Duration;

use thiserror::Error;

use crate::{db_types::InvoiceId, helpers::CalendarMonth};

mod queue;
mod runner;

pub use queue::{job_channel, InProcessJobQueue};
pub use runner::JobRunner;

/// A unit of deferred work. Jobs must be safe to run twice: a redundant delivery is a wasted no-op, never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommissionJob {
    /// Registers a referral commission for a freshly fulfilled invoice.
    RegisterReferral { invoice_id: InvoiceId },
    /// Root of a monthly build: eligibility, extraction and fan-out.
    BuildMonth { influencer_id: i64, month: CalendarMonth, preview: bool },
    /// Fans one batch of users out into per-user jobs.
    ProcessUserBatch {
        influencer_id: i64,
        month: CalendarMonth,
        user_ids: Vec<i64>,
        batch_number: usize,
        total_batches: usize,
    },
    /// Computes and persists one user's usage snapshots for the month.
    BuildUserMonth { influencer_id: i64, user_id: i64, month: CalendarMonth, attempt: u32 },
    /// Rolls the month up into aggregated commissions and payout batches.
    AggregateMonth { influencer_id: i64, month: CalendarMonth, preview: bool },
    /// Stops the dispatcher once every job queued ahead of it has been handled.
    Shutdown,
}

impl CommissionJob {
    /// A short, human-phrased label for log lines.
    pub fn describe(&self) -> String {
        match self {
            CommissionJob::RegisterReferral { invoice_id } => {
                format!("register a referral for invoice {invoice_id}")
            },
            CommissionJob::BuildMonth { influencer_id, month, preview } => {
                let mode = if *preview { " (preview)" } else { "" };
                format!("build {month} commissions for influencer {influencer_id}{mode}")
            },
            CommissionJob::ProcessUserBatch { influencer_id, month, user_ids, batch_number, total_batches } => {
                format!(
                    "process user batch {batch_number}/{total_batches} ({} users) of {month} for influencer \
                     {influencer_id}",
                    user_ids.len()
                )
            },
            CommissionJob::BuildUserMonth { influencer_id, user_id, month, attempt } => {
                format!("build {month} usage of user {user_id} for influencer {influencer_id}, attempt {attempt}")
            },
            CommissionJob::AggregateMonth { influencer_id, month, preview } => {
                let mode = if *preview { " (preview)" } else { "" };
                format!("aggregate {month} for influencer {influencer_id}{mode}")
            },
            CommissionJob::Shutdown => "shut the job dispatcher down".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobQueueError {
    #[error("The job queue is closed and no longer accepts jobs")]
    Closed,
}

/// The deferred-call facility the pipeline stages use to hand work to each other.
///
/// Both methods return as soon as the job is accepted. Execution happens later, on the dispatcher, with no ordering
/// guarantee between sibling jobs.
#[allow(async_fn_in_trait)]
pub trait JobQueue: Clone {
    /// Submits a job for execution as soon as a dispatcher picks it up.
    async fn enqueue(&self, job: CommissionJob) -> Result<(), JobQueueError>;

    /// Submits a job for execution no earlier than `delay` from now.
    async fn enqueue_after(&self, job: CommissionJob, delay: Duration) -> Result<(), JobQueueError>;
}
