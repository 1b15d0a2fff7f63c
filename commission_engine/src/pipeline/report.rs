//! The reporting surface: live monthly summaries and per-commission detail rows.
//!
//! Summaries are computed on the fly from source data rather than from persisted rollups, so an admin can see the
//! current state of an open month. The usage side degrades to zero when the activity store is down; a report is
//! never worth a 5xx.
use std::{collections::BTreeMap, fmt::Debug};

use cce_common::Money;
use chrono::{DateTime, Utc};
use log::*;

use crate::{
    db_types::UsageInvoice,
    jobs::{CommissionJob, JobQueue},
    pipeline::{
        distribution::{distribute_pool, usage_pool},
        errors::ReportError,
        objects::{CommissionRow, MonthlySummary, ReportParams},
        usage::UsageExtractor,
        worker::paid_by_currency,
    },
    traits::{ActivityStore, CommissionDatabase},
};

pub struct ReportApi<B, A, Q> {
    db: B,
    extractor: UsageExtractor<B, A>,
    queue: Q,
}

impl<B: Debug, A, Q> Debug for ReportApi<B, A, Q> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReportApi ({:?})", self.db)
    }
}

impl<B, A, Q> ReportApi<B, A, Q>
where
    B: CommissionDatabase,
    A: ActivityStore,
    Q: JobQueue,
{
    pub fn new(db: B, activity: A, queue: Q) -> Self {
        let extractor = UsageExtractor::new(db.clone(), activity);
        Self { db, extractor, queue }
    }

    /// The month's headline figures for one creator, as of `now`.
    ///
    /// Referral totals take the window's collectible records that have matured by `now`. Usage totals are computed
    /// live (invoices, engagement, pro-rata split) without touching persisted snapshots, degrading to zero when the
    /// activity store is unavailable. With `run_async` set, the full build is queued instead and the summary comes
    /// back flagged as scheduled. A non-preview request for a month that has not closed is rejected.
    pub async fn monthly_summary(
        &self,
        params: &ReportParams,
        now: DateTime<Utc>,
    ) -> Result<MonthlySummary, ReportError> {
        self.db
            .fetch_influencer(params.creator_id)
            .await?
            .ok_or(ReportError::UnknownCreator(params.creator_id))?;
        if !params.preview && !params.month.has_closed(now) {
            return Err(ReportError::MonthNotClosed(params.month));
        }
        let (include, exclude) = self.resolve_plan_filter(params).await?;

        if params.run_async {
            let job = CommissionJob::BuildMonth {
                influencer_id: params.creator_id,
                month: params.month,
                preview: params.preview,
            };
            self.queue.enqueue(job).await?;
            info!("📊️ {} build queued for creator {}", params.month, params.creator_id);
            return Ok(MonthlySummary::scheduled(params.creator_id, params.month));
        }

        let window = params.month.window();
        let mut matured_referral_total: BTreeMap<String, Money> = BTreeMap::new();
        let referrals = self.db.fetch_collectible_referrals(params.creator_id, window).await?;
        for referral in referrals.iter().filter(|r| r.is_matured(now)) {
            *matured_referral_total.entry(referral.currency.clone()).or_default() += referral.amount;
        }

        let usage_total = self.live_usage_totals(params.creator_id, params.month, include, exclude).await?;
        debug!(
            "📊️ {} summary for creator {}: {} referral currencies, {} usage currencies",
            params.month,
            params.creator_id,
            matured_referral_total.len(),
            usage_total.len()
        );
        Ok(MonthlySummary {
            creator_id: params.creator_id,
            month: params.month,
            matured_referral_total,
            usage_total,
            scheduled: false,
        })
    }

    /// One detail line per commission in the month: referral records first, then persisted usage snapshots.
    pub async fn commission_rows(
        &self,
        params: &ReportParams,
        now: DateTime<Utc>,
    ) -> Result<Vec<CommissionRow>, ReportError> {
        self.db
            .fetch_influencer(params.creator_id)
            .await?
            .ok_or(ReportError::UnknownCreator(params.creator_id))?;
        let window = params.month.window();
        let mut rows = Vec::new();

        let collectible: Vec<i64> =
            self.db.fetch_collectible_referrals(params.creator_id, window).await?.iter().map(|r| r.id).collect();
        for referral in self.db.fetch_referrals_created_in(params.creator_id, window).await? {
            let paid_amount = self
                .db
                .fetch_invoice(&referral.invoice_id)
                .await?
                .map(|invoice| invoice.amount)
                .unwrap_or_default();
            rows.push(CommissionRow {
                commission_type: crate::db_types::CommissionType::Referral,
                invoice_id: Some(referral.invoice_id.clone()),
                cohort_id: None,
                user_id: referral.user_id,
                currency: referral.currency.clone(),
                status: referral.status.to_string(),
                created_at: referral.created_at,
                available_at: Some(referral.available_at),
                is_effective: collectible.contains(&referral.id) && referral.is_matured(now),
                points: 0,
                paid_amount,
                commission_amount: referral.amount,
            });
        }

        let batches = self.db.fetch_payout_batches_for_month(params.creator_id, params.month).await?;
        let batch_status: BTreeMap<&str, String> =
            batches.iter().map(|b| (b.currency.as_str(), b.status.to_string())).collect();
        for snapshot in self.db.fetch_snapshots_for_month(params.creator_id, params.month).await? {
            let status =
                batch_status.get(snapshot.currency.as_str()).cloned().unwrap_or_else(|| "Pending".to_string());
            rows.push(CommissionRow {
                commission_type: crate::db_types::CommissionType::Usage,
                invoice_id: None,
                cohort_id: Some(snapshot.cohort_id),
                user_id: snapshot.user_id,
                currency: snapshot.currency.clone(),
                status,
                created_at: snapshot.created_at,
                available_at: None,
                is_effective: true,
                points: snapshot.cohort_points,
                paid_amount: snapshot.paid_amount,
                commission_amount: snapshot.commission_amount,
            });
        }
        Ok(rows)
    }

    /// Maps the request's plan slugs to ids, rejecting any slug that matches no plan. Empty lists mean "no filter".
    async fn resolve_plan_filter(
        &self,
        params: &ReportParams,
    ) -> Result<(Option<Vec<i64>>, Option<Vec<i64>>), ReportError> {
        let resolve = |slugs: &[String], plans: &[crate::db_types::Plan]| -> Result<Vec<i64>, ReportError> {
            let mut unknown = Vec::new();
            let mut ids = Vec::new();
            for slug in slugs {
                match plans.iter().find(|p| &p.slug == slug) {
                    Some(plan) => ids.push(plan.id),
                    None => unknown.push(slug.clone()),
                }
            }
            if unknown.is_empty() {
                Ok(ids)
            } else {
                Err(ReportError::UnknownPlanSlugs(unknown))
            }
        };
        let mut all_slugs = params.include_plans.clone();
        all_slugs.extend(params.exclude_plans.iter().cloned());
        if all_slugs.is_empty() {
            return Ok((None, None));
        }
        let plans = self.db.fetch_plans_by_slugs(&all_slugs).await?;
        let include =
            if params.include_plans.is_empty() { None } else { Some(resolve(&params.include_plans, &plans)?) };
        let exclude =
            if params.exclude_plans.is_empty() { None } else { Some(resolve(&params.exclude_plans, &plans)?) };
        Ok((include, exclude))
    }

    /// The live usage computation behind the summary: the same eligibility, extraction and distribution steps the
    /// async pipeline runs, summed per currency instead of persisted.
    async fn live_usage_totals(
        &self,
        creator_id: i64,
        month: crate::helpers::CalendarMonth,
        include: Option<Vec<i64>>,
        exclude: Option<Vec<i64>>,
    ) -> Result<BTreeMap<String, Money>, ReportError> {
        let eligible =
            crate::pipeline::eligibility::EligibilityApi::new(self.db.clone()).eligible_cohorts(creator_id).await?;
        if eligible.is_empty() {
            return Ok(BTreeMap::new());
        }
        let window = month.window();
        let plans = self.extractor.plan_scope_for(&eligible, include, exclude).await?;
        let locked = self.db.fetch_referral_locked_user_ids(creator_id, window).await?;
        let invoices = self.extractor.billable_invoices(window, &locked, &plans).await?;
        if invoices.is_empty() {
            return Ok(BTreeMap::new());
        }
        let mut by_user: BTreeMap<i64, Vec<UsageInvoice>> = BTreeMap::new();
        for invoice in invoices {
            by_user.entry(invoice.user_id).or_default().push(invoice);
        }
        let user_ids: Vec<i64> = by_user.keys().copied().collect();
        let usage = self.extractor.usage_or_empty(&user_ids, window, &eligible).await;

        let mut totals: BTreeMap<String, Money> = BTreeMap::new();
        for (user_id, user_invoices) in &by_user {
            let Some(user_usage) = usage.get(user_id) else { continue };
            for (currency, paid) in paid_by_currency(user_invoices) {
                let pool = usage_pool(paid);
                for share in distribute_pool(pool, user_usage) {
                    *totals.entry(currency.clone()).or_default() += share.amount;
                }
            }
        }
        Ok(totals)
    }
}
