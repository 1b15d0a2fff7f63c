//! Batch orchestration for monthly builds.
//!
//! The orchestrator holds no business logic. It resolves the set of users worth computing, cuts them into
//! fixed-size batches, and hands everything to the job queue: one job per batch, one job per user inside each
//! batch, and a single deferred aggregation job for the month. The aggregation delay is a heuristic estimate of
//! how long the fan-out takes, not a completion barrier; the aggregation job is idempotent, so re-running it later
//! picks up any stragglers.
use std::{fmt::Debug, time::Duration};

use log::*;

use crate::{
    helpers::CalendarMonth,
    jobs::{CommissionJob, JobQueue},
    pipeline::{
        eligibility::EligibilityApi,
        errors::{AbortReason, PipelineError},
    },
    traits::{CommissionDatabase, PlanScope},
};

/// Tunables for a monthly build. The defaults match the production deployment; tests shrink them to keep runs fast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// How many users go into one batch job.
    pub batch_size: usize,
    /// The minimum delay before the aggregation job runs.
    pub aggregation_delay_floor: Duration,
    /// How long a transiently failed per-user job waits before its next attempt.
    pub retry_delay: Duration,
    /// How many attempts a per-user job gets before it is dropped.
    pub max_attempts: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            aggregation_delay_floor: Duration::from_secs(300),
            retry_delay: Duration::from_secs(300),
            max_attempts: 5,
        }
    }
}

impl PipelineConfig {
    /// The delay before the month's aggregation job runs: the configured floor, or one second per ten users,
    /// whichever is longer.
    pub fn aggregation_delay(&self, total_users: usize) -> Duration {
        self.aggregation_delay_floor.max(Duration::from_secs(total_users as u64 / 10))
    }
}

/// What a monthly build scheduled. Returned to the caller for logging; the real output lands later, via the jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthBuildPlan {
    pub influencer_id: i64,
    pub month: CalendarMonth,
    pub total_users: usize,
    pub total_batches: usize,
    pub aggregation_delay: Duration,
}

/// The result of fanning one batch out into per-user jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub batch_number: usize,
    pub total_batches: usize,
    pub scheduled: usize,
    /// Users whose job could not be handed to the queue. They are logged and skipped; the rest of the batch
    /// proceeds.
    pub failed_users: Vec<i64>,
}

/// Cuts the user ids into batches of at most `batch_size`, preserving order. The final batch may be short.
pub fn partition_users(user_ids: &[i64], batch_size: usize) -> Vec<Vec<i64>> {
    if batch_size == 0 {
        return vec![user_ids.to_vec()];
    }
    user_ids.chunks(batch_size).map(|chunk| chunk.to_vec()).collect()
}

pub struct BatchOrchestrator<B, Q> {
    db: B,
    queue: Q,
    config: PipelineConfig,
}

impl<B: Debug, Q> Debug for BatchOrchestrator<B, Q> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BatchOrchestrator ({:?})", self.db)
    }
}

impl<B, Q> BatchOrchestrator<B, Q> {
    pub fn new(db: B, queue: Q) -> Self {
        Self { db, queue, config: PipelineConfig::default() }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

impl<B, Q> BatchOrchestrator<B, Q>
where
    B: CommissionDatabase,
    Q: JobQueue,
{
    /// Runs the root of a monthly build: eligibility, candidate resolution and fan-out.
    ///
    /// Schedules one `ProcessUserBatch` job per batch of candidate users and exactly one deferred `AggregateMonth`
    /// job. The aggregation job is scheduled even when no user has any usage, because referral-only months still
    /// need their rollup. Aborts before scheduling anything when the influencer is unknown or has no eligible
    /// cohorts.
    pub async fn build_month(
        &self,
        influencer_id: i64,
        month: CalendarMonth,
        preview: bool,
    ) -> Result<MonthBuildPlan, PipelineError> {
        self.db
            .fetch_influencer(influencer_id)
            .await?
            .ok_or(AbortReason::UnknownInfluencer(influencer_id))?;
        let eligible = EligibilityApi::new(self.db.clone()).eligible_cohorts(influencer_id).await?;
        if eligible.is_empty() {
            return Err(AbortReason::NoEligibleCohorts(influencer_id).into());
        }
        let window = month.window();
        let locked = self.db.fetch_referral_locked_user_ids(influencer_id, window).await?;
        let cohort_plans = self.db.fetch_plan_ids_for_cohorts(&eligible.ids()).await?;
        let plans = PlanScope::with_filter(None, None, cohort_plans);
        let candidates = if plans.matches_nothing() {
            Vec::new()
        } else {
            self.db.fetch_billable_user_ids(window, &locked, &plans).await?
        };

        let batches = partition_users(&candidates, self.config.batch_size);
        let total_batches = batches.len();
        for (index, user_ids) in batches.into_iter().enumerate() {
            let job = CommissionJob::ProcessUserBatch {
                influencer_id,
                month,
                user_ids,
                batch_number: index + 1,
                total_batches,
            };
            self.queue.enqueue(job).await?;
        }

        let aggregation_delay = self.config.aggregation_delay(candidates.len());
        self.queue
            .enqueue_after(CommissionJob::AggregateMonth { influencer_id, month, preview }, aggregation_delay)
            .await?;
        info!(
            "🔄️ {month} build scheduled for influencer {influencer_id}: {} users in {total_batches} batches, \
             aggregation in {}s",
            candidates.len(),
            aggregation_delay.as_secs()
        );
        Ok(MonthBuildPlan {
            influencer_id,
            month,
            total_users: candidates.len(),
            total_batches,
            aggregation_delay,
        })
    }

    /// Fans one batch out into per-user jobs. A user whose job cannot be queued is logged and skipped so that one
    /// bad hand-off never takes the rest of the batch down with it.
    pub async fn process_batch(
        &self,
        influencer_id: i64,
        month: CalendarMonth,
        user_ids: &[i64],
        batch_number: usize,
        total_batches: usize,
    ) -> Result<BatchOutcome, PipelineError> {
        if user_ids.is_empty() {
            return Err(AbortReason::EmptyBatch { batch_number, total_batches }.into());
        }
        let mut scheduled = 0;
        let mut failed_users = Vec::new();
        for user_id in user_ids {
            let job = CommissionJob::BuildUserMonth { influencer_id, user_id: *user_id, month, attempt: 1 };
            match self.queue.enqueue(job).await {
                Ok(()) => scheduled += 1,
                Err(e) => {
                    warn!(
                        "🔄️ Could not schedule the {month} computation of user {user_id} for influencer \
                         {influencer_id}: {e}. The rest of batch {batch_number}/{total_batches} proceeds"
                    );
                    failed_users.push(*user_id);
                },
            }
        }
        debug!(
            "🔄️ Batch {batch_number}/{total_batches} of {month} fanned out for influencer {influencer_id}: \
             {scheduled} users scheduled, {} failed",
            failed_users.len()
        );
        Ok(BatchOutcome { batch_number, total_batches, scheduled, failed_users })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn partitioning_preserves_order_and_shorts_the_tail() {
        let users: Vec<i64> = (1..=250).collect();
        let batches = partition_users(&users, 100);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 100);
        assert_eq!(batches[1].len(), 100);
        assert_eq!(batches[2].len(), 50);
        assert_eq!(batches[0][0], 1);
        assert_eq!(batches[2][49], 250);
        assert!(partition_users(&[], 100).is_empty());
    }

    #[test]
    fn aggregation_delay_has_a_floor() {
        let config = PipelineConfig::default();
        // 250 users estimate to 25s of work, well under the floor.
        assert_eq!(config.aggregation_delay(250), Duration::from_secs(300));
        assert_eq!(config.aggregation_delay(0), Duration::from_secs(300));
        // Past 3000 users the estimate takes over.
        assert_eq!(config.aggregation_delay(3_001), Duration::from_secs(300));
        assert_eq!(config.aggregation_delay(12_000), Duration::from_secs(1_200));
    }
}
