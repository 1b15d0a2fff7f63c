//! The in-process job dispatcher.
//!
//! One runner drains the job channel and spawns a task per job, so slow per-user computations never hold up their
//! siblings. Jobs that fan out (a monthly build, a user batch) get a producer handle back into the same channel,
//! which is also how transiently failed per-user jobs are retried. The runner stops when it receives a `Shutdown`
//! job, after waiting for in-flight work to land.
use std::sync::{atomic::AtomicI64, Arc};

use chrono::Utc;
use log::*;
use tokio::sync::mpsc;

use super::{job_channel, CommissionJob, InProcessJobQueue, JobQueue};
use crate::{
    pipeline::errors::PipelineError,
    traits::{ActivityStore, CommissionDatabase},
    BatchOrchestrator,
    CommissionAggregator,
    PipelineConfig,
    ReferralApi,
    UserMonthWorker,
};

pub struct JobRunner<B, A> {
    db: B,
    activity: A,
    queue: InProcessJobQueue,
    listener: mpsc::Receiver<CommissionJob>,
    config: PipelineConfig,
}

impl<B, A> JobRunner<B, A>
where
    B: CommissionDatabase + Send + Sync + 'static,
    A: ActivityStore + Send + Sync + 'static,
{
    pub fn new(db: B, activity: A, buffer_size: usize) -> Self {
        let (queue, listener) = job_channel(buffer_size);
        Self { db, activity, queue, listener, config: PipelineConfig::default() }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// A producer handle for submitting jobs to this runner. Clone it freely.
    pub fn queue(&self) -> InProcessJobQueue {
        self.queue.clone()
    }

    /// Drains the channel until a `Shutdown` job arrives, then waits for in-flight jobs to land before returning.
    pub async fn run(mut self) {
        debug!("📬️ Job dispatcher starting");
        let in_flight = Arc::new(AtomicI64::new(0));
        while let Some(job) = self.listener.recv().await {
            if job == CommissionJob::Shutdown {
                debug!("📬️ Shutdown job received");
                break;
            }
            let db = self.db.clone();
            let activity = self.activity.clone();
            let queue = self.queue.clone();
            let config = self.config.clone();
            let counter = Arc::clone(&in_flight);
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            tokio::spawn(async move {
                dispatch(job, db, activity, queue, config).await;
                counter.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
            });
        }
        self.listener.close();
        while in_flight.load(std::sync::atomic::Ordering::SeqCst) > 0 {
            trace!("📬️ Waiting for in-flight jobs to land");
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        }
        debug!("📬️ Job dispatcher has shut down");
    }

    /// Splits the runner into its producer handle and a spawned dispatcher task.
    pub fn start(self) -> (InProcessJobQueue, tokio::task::JoinHandle<()>) {
        let queue = self.queue();
        let handle = tokio::spawn(self.run());
        (queue, handle)
    }
}

/// Runs one job to completion, classifying failures the way the error taxonomy demands: permanent aborts are
/// business outcomes logged at info, transient failures are re-enqueued with the retry delay until the attempt
/// budget runs out, everything else is an error. Nothing here ever takes a sibling job down.
async fn dispatch<B, A>(job: CommissionJob, db: B, activity: A, queue: InProcessJobQueue, config: PipelineConfig)
where
    B: CommissionDatabase + Send + Sync + 'static,
    A: ActivityStore + Send + Sync + 'static,
{
    let label = job.describe();
    trace!("📬️ Handling a job: {label}");
    match job {
        CommissionJob::RegisterReferral { invoice_id } => {
            let api = ReferralApi::new(db);
            match api.register_from_invoice(&invoice_id).await {
                Ok(Some((record, true))) => trace!("📬️ Referral {} registered", record.id),
                Ok(Some((record, false))) => trace!("📬️ Referral {} already existed", record.id),
                Ok(None) => trace!("📬️ Invoice {invoice_id} does not qualify for a referral"),
                Err(e) => error!("📬️ Could not {label}: {e}"),
            }
        },
        CommissionJob::BuildMonth { influencer_id, month, preview } => {
            let orchestrator = BatchOrchestrator::new(db, queue).with_config(config);
            match orchestrator.build_month(influencer_id, month, preview).await {
                Ok(plan) => debug!(
                    "📬️ {month} build fanned out: {} users in {} batches",
                    plan.total_users, plan.total_batches
                ),
                Err(PipelineError::Permanent(reason)) => info!("📬️ Nothing to build: {reason}"),
                Err(e) => error!("📬️ Could not {label}: {e}"),
            }
        },
        CommissionJob::ProcessUserBatch { influencer_id, month, user_ids, batch_number, total_batches } => {
            let orchestrator = BatchOrchestrator::new(db, queue).with_config(config);
            match orchestrator.process_batch(influencer_id, month, &user_ids, batch_number, total_batches).await {
                Ok(outcome) if outcome.failed_users.is_empty() => {
                    trace!("📬️ Batch {batch_number}/{total_batches} fanned out ({} users)", outcome.scheduled)
                },
                Ok(outcome) => warn!(
                    "📬️ Batch {batch_number}/{total_batches} fanned out with {} scheduling failures",
                    outcome.failed_users.len()
                ),
                Err(PipelineError::Permanent(reason)) => info!("📬️ Skipping a batch: {reason}"),
                Err(e) => error!("📬️ Could not {label}: {e}"),
            }
        },
        CommissionJob::BuildUserMonth { influencer_id, user_id, month, attempt } => {
            let worker = UserMonthWorker::new(db, activity);
            match worker.compute_user_month(influencer_id, user_id, month).await {
                Ok(result) => {
                    trace!("📬️ User {user_id} computed: {} rows, {} written", result.snapshots.len(), result.writes())
                },
                Err(PipelineError::Permanent(reason)) => info!("📬️ Nothing to do for user {user_id}: {reason}"),
                Err(PipelineError::Transient(e)) if attempt < config.max_attempts => {
                    warn!(
                        "📬️ Transient failure computing user {user_id} on attempt {attempt}: {e}. Retrying in {}s",
                        config.retry_delay.as_secs()
                    );
                    let retry =
                        CommissionJob::BuildUserMonth { influencer_id, user_id, month, attempt: attempt + 1 };
                    if let Err(e) = queue.enqueue_after(retry, config.retry_delay).await {
                        error!("📬️ Could not queue the retry for user {user_id}: {e}");
                    }
                },
                Err(PipelineError::Transient(e)) => {
                    error!(
                        "📬️ Giving up on user {user_id} for {month} after {attempt} attempts: {e}. The next \
                         aggregation run will simply not see this user"
                    );
                },
                Err(e) => error!("📬️ Could not {label}: {e}"),
            }
        },
        CommissionJob::AggregateMonth { influencer_id, month, preview } => {
            let aggregator = CommissionAggregator::new(db);
            match aggregator.aggregate_month(influencer_id, month, preview, Utc::now()).await {
                Ok(outcome) => debug!(
                    "📬️ {month} aggregated: {} rollups, {} payout batches",
                    outcome.aggregates.len(),
                    outcome.batches.len()
                ),
                Err(PipelineError::Permanent(reason)) => info!("📬️ Nothing to aggregate: {reason}"),
                Err(e) => error!("📬️ Could not {label}: {e}"),
            }
        },
        CommissionJob::Shutdown => {},
    }
}
