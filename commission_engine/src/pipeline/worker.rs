//! The per-user worker: one user's usage snapshots for one month.
//!
//! This is the unit of fan-out. It recomputes everything it needs from scratch (eligibility, invoices, engagement)
//! so that a duplicate or out-of-order delivery of the same job converges to the same stored rows. The only
//! non-deterministic input, the activity store, is the only thing that can make it fail transiently.
use std::{collections::BTreeMap, fmt::Debug};

use cce_common::Money;
use log::*;

use crate::{
    db_types::{NewUsageSnapshot, UsageInvoice},
    helpers::CalendarMonth,
    pipeline::{
        distribution::{distribute_pool, usage_pool},
        errors::{AbortReason, PipelineError},
        usage::UsageExtractor,
    },
    traits::{ActivityStore, CommissionDatabase, SnapshotUpsert},
};

/// What the user paid during the window, per currency. Invoices never mix currencies, so each one lands in exactly
/// one bucket.
pub fn paid_by_currency(invoices: &[UsageInvoice]) -> BTreeMap<String, Money> {
    let mut totals: BTreeMap<String, Money> = BTreeMap::new();
    for invoice in invoices {
        *totals.entry(invoice.currency.clone()).or_default() += invoice.amount;
    }
    totals
}

/// The outcome of one per-user computation.
#[derive(Debug, Clone)]
pub struct UserMonthResult {
    pub influencer_id: i64,
    pub user_id: i64,
    pub month: CalendarMonth,
    pub snapshots: Vec<SnapshotUpsert>,
}

impl UserMonthResult {
    /// How many snapshot rows were actually written (inserted or overwritten).
    pub fn writes(&self) -> usize {
        self.snapshots.iter().filter(|s| s.is_write()).count()
    }
}

pub struct UserMonthWorker<B, A> {
    db: B,
    extractor: UsageExtractor<B, A>,
}

impl<B: Debug, A> Debug for UserMonthWorker<B, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UserMonthWorker ({:?})", self.db)
    }
}

impl<B, A> UserMonthWorker<B, A>
where
    B: CommissionDatabase,
    A: ActivityStore,
{
    pub fn new(db: B, activity: A) -> Self {
        let extractor = UsageExtractor::new(db.clone(), activity);
        Self { db, extractor }
    }

    pub fn with_extractor(db: B, extractor: UsageExtractor<B, A>) -> Self {
        Self { db, extractor }
    }

    /// Computes and idempotently persists one user's usage snapshots for the month.
    ///
    /// Aborts permanently when the influencer is unknown, the user is settled through the referral channel this
    /// month, no cohorts are eligible, or the user has no billable invoices in the window. An activity-store
    /// failure surfaces as [`PipelineError::Transient`] so the dispatcher can retry the job after a delay.
    ///
    /// A user with invoices but no qualifying engagement earns nothing; that is a successful run with zero
    /// snapshots, not an abort.
    pub async fn compute_user_month(
        &self,
        influencer_id: i64,
        user_id: i64,
        month: CalendarMonth,
    ) -> Result<UserMonthResult, PipelineError> {
        self.db
            .fetch_influencer(influencer_id)
            .await?
            .ok_or(AbortReason::UnknownInfluencer(influencer_id))?;
        let window = month.window();
        let locked = self.db.fetch_referral_locked_user_ids(influencer_id, window).await?;
        if locked.contains(&user_id) {
            return Err(AbortReason::ReferralAttributed { user_id, month }.into());
        }
        let eligible = crate::pipeline::eligibility::EligibilityApi::new(self.db.clone())
            .eligible_cohorts(influencer_id)
            .await?;
        if eligible.is_empty() {
            return Err(AbortReason::NoEligibleCohorts(influencer_id).into());
        }
        let plans = self.extractor.plan_scope_for(&eligible, None, None).await?;
        let invoices = self.extractor.invoices_for_user(user_id, window, &plans).await?;
        if invoices.is_empty() {
            return Err(AbortReason::NoUsageInvoices { user_id, month }.into());
        }

        let usage = self
            .extractor
            .usage_for_users(&[user_id], window, &eligible)
            .await
            .map_err(|e| PipelineError::Transient(e.to_string()))?;
        let Some(user_usage) = usage.get(&user_id) else {
            debug!("🔄️ User {user_id} paid in {month} but logged no qualifying engagement. Nothing to store");
            return Ok(UserMonthResult { influencer_id, user_id, month, snapshots: Vec::new() });
        };

        let mut snapshots = Vec::new();
        for (currency, paid) in paid_by_currency(&invoices) {
            let pool = usage_pool(paid);
            for share in distribute_pool(pool, user_usage) {
                let kind_breakdown = user_usage
                    .eligible
                    .get(&share.cohort_id)
                    .map(|cohort| cohort.by_kind.clone())
                    .unwrap_or_default();
                let snapshot = NewUsageSnapshot {
                    influencer_id,
                    user_id,
                    cohort_id: share.cohort_id,
                    month,
                    currency: currency.clone(),
                    user_total_points: user_usage.total_points,
                    cohort_points: share.points,
                    paid_amount: paid,
                    commission_amount: share.amount,
                    kind_breakdown,
                };
                snapshots.push(self.db.upsert_usage_snapshot(snapshot).await?);
            }
        }
        let result = UserMonthResult { influencer_id, user_id, month, snapshots };
        debug!(
            "🔄️ {month} usage stored for user {user_id} / influencer {influencer_id}: {} rows, {} written",
            result.snapshots.len(),
            result.writes()
        );
        Ok(result)
    }
}

#[cfg(test)]
mod test {
    use chrono::Utc;

    use super::*;
    use crate::db_types::{InvoiceId, InvoiceStatus};

    fn invoice(id: &str, amount: i64, currency: &str) -> UsageInvoice {
        UsageInvoice {
            id: InvoiceId(id.to_string()),
            user_id: 1,
            plan_id: 1,
            amount: Money::from_cents(amount),
            currency: currency.to_string(),
            status: InvoiceStatus::Fulfilled,
            coupon_code: None,
            fulfilled_at: Some(Utc::now()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn payments_bucket_by_currency() {
        let invoices =
            vec![invoice("a", 10_000, "USD"), invoice("b", 5_000, "EUR"), invoice("c", 2_500, "USD")];
        let totals = paid_by_currency(&invoices);
        assert_eq!(totals.len(), 2);
        assert_eq!(totals["USD"], Money::from_cents(12_500));
        assert_eq!(totals["EUR"], Money::from_cents(5_000));
        assert!(paid_by_currency(&[]).is_empty());
    }
}
