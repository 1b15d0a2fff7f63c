//! Monthly aggregation: snapshots and referrals in, rollups and payout batches out.
//!
//! Aggregation is a full recompute from source rows on every run. Nothing is incremented; stale rollups are
//! deleted, unchanged ones left byte-identical and payout batches relinked to whatever rollups exist now. Running
//! it twice, or at the wrong time, or concurrently with late per-user jobs therefore converges on the same stored
//! state as running it once at the right time.
use std::{collections::BTreeMap, fmt::Debug};

use cce_common::Money;
use chrono::{DateTime, Utc};
use log::*;

use crate::{
    db_types::{
        AggregatedCommission,
        CommissionType,
        NewAggregatedCommission,
        NewPayoutBatch,
        PayoutBatch,
        ReferralCommissionRecord,
        UsageSnapshot,
    },
    helpers::CalendarMonth,
    pipeline::errors::{AbortReason, PipelineError},
    traits::CommissionDatabase,
};

/// Rolls usage snapshots up by `(cohort, currency)`. `num_users` counts snapshot rows: the snapshot key is unique
/// per user within a cohort and currency, so the row count is the user count.
pub fn usage_rollups(
    influencer_id: i64,
    month: CalendarMonth,
    snapshots: &[UsageSnapshot],
) -> Vec<NewAggregatedCommission> {
    let mut groups: BTreeMap<(i64, String), (Money, i64, Vec<i64>)> = BTreeMap::new();
    for snapshot in snapshots {
        let entry = groups.entry((snapshot.cohort_id, snapshot.currency.clone())).or_default();
        entry.0 += snapshot.commission_amount;
        entry.1 += 1;
        entry.2.push(snapshot.id);
    }
    groups
        .into_iter()
        .map(|((cohort_id, currency), (amount_paid, num_users, source_ids))| NewAggregatedCommission {
            influencer_id,
            cohort_id: Some(cohort_id),
            month,
            commission_type: CommissionType::Usage,
            currency,
            amount_paid,
            num_users,
            source_ids,
        })
        .collect()
}

/// Rolls matured referral records up by currency. The stored amount already reflects the referral rate, so it sums
/// as-is; `num_users` counts distinct buyers. Records still inside their hold period contribute nothing.
pub fn referral_rollups(
    influencer_id: i64,
    month: CalendarMonth,
    referrals: &[ReferralCommissionRecord],
    now: DateTime<Utc>,
) -> Vec<NewAggregatedCommission> {
    let mut groups: BTreeMap<String, (Money, Vec<i64>, Vec<i64>)> = BTreeMap::new();
    for referral in referrals.iter().filter(|r| r.is_matured(now)) {
        let entry = groups.entry(referral.currency.clone()).or_default();
        entry.0 += referral.amount;
        if !entry.1.contains(&referral.user_id) {
            entry.1.push(referral.user_id);
        }
        entry.2.push(referral.id);
    }
    groups
        .into_iter()
        .map(|(currency, (amount_paid, buyers, source_ids))| NewAggregatedCommission {
            influencer_id,
            cohort_id: None,
            month,
            commission_type: CommissionType::Referral,
            currency,
            amount_paid,
            num_users: buyers.len() as i64,
            source_ids,
        })
        .collect()
}

/// One payout batch per currency carrying at least one rollup: the exact sum of the stored `amount_paid` values,
/// linked back to every rollup that contributed.
pub fn payout_batches(aggregates: &[AggregatedCommission]) -> Vec<NewPayoutBatch> {
    let mut groups: BTreeMap<String, (Money, Vec<i64>)> = BTreeMap::new();
    for aggregate in aggregates {
        let entry = groups.entry(aggregate.currency.clone()).or_default();
        entry.0 += aggregate.amount_paid;
        entry.1.push(aggregate.id);
    }
    groups
        .into_iter()
        .map(|(currency, (total_amount, aggregate_ids))| NewPayoutBatch { currency, total_amount, aggregate_ids })
        .collect()
}

/// What an aggregation run left behind.
#[derive(Debug, Clone)]
pub struct AggregationOutcome {
    pub influencer_id: i64,
    pub month: CalendarMonth,
    pub aggregates: Vec<AggregatedCommission>,
    pub batches: Vec<PayoutBatch>,
}

pub struct CommissionAggregator<B> {
    db: B,
}

impl<B: Debug> Debug for CommissionAggregator<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CommissionAggregator ({:?})", self.db)
    }
}

impl<B> CommissionAggregator<B>
where B: CommissionDatabase
{
    pub fn new(db: B) -> Self {
        Self { db }
    }

    /// Rolls the month up into aggregated commissions and payout batches, as of `now`.
    ///
    /// Usage rollups come from whatever snapshots have landed by the time this runs; if per-user jobs are still in
    /// flight their rows are simply missing from this pass and picked up by the next one. Referral rollups take
    /// the window's collectible records that have matured by `now`. Preview runs mark the batches `Preview`;
    /// non-preview runs mark them `Pending`, except that a batch already `Paid` keeps its terminal status.
    pub async fn aggregate_month(
        &self,
        influencer_id: i64,
        month: CalendarMonth,
        preview: bool,
        now: DateTime<Utc>,
    ) -> Result<AggregationOutcome, PipelineError> {
        self.db
            .fetch_influencer(influencer_id)
            .await?
            .ok_or(AbortReason::UnknownInfluencer(influencer_id))?;
        let window = month.window();
        let snapshots = self.db.fetch_snapshots_for_month(influencer_id, month).await?;
        let referrals = self.db.fetch_collectible_referrals(influencer_id, window).await?;

        let mut rows = usage_rollups(influencer_id, month, &snapshots);
        rows.extend(referral_rollups(influencer_id, month, &referrals, now));
        let aggregates = self.db.replace_month_aggregates(influencer_id, month, rows).await?;

        let batches = self.db.upsert_payout_batches(influencer_id, month, payout_batches(&aggregates), preview).await?;
        info!(
            "🔄️ {month} aggregated for influencer {influencer_id}: {} rollups over {} snapshots and {} referrals, \
             {} payout batches",
            aggregates.len(),
            snapshots.len(),
            referrals.len(),
            batches.len()
        );
        Ok(AggregationOutcome { influencer_id, month, aggregates, batches })
    }
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;

    use super::*;
    use crate::db_types::{InvoiceId, ReferralStatus};

    fn month() -> CalendarMonth {
        "2024-03".parse().unwrap()
    }

    fn snapshot(id: i64, user_id: i64, cohort_id: i64, currency: &str, commission: i64) -> UsageSnapshot {
        UsageSnapshot {
            id,
            influencer_id: 1,
            user_id,
            cohort_id,
            month: month(),
            currency: currency.to_string(),
            user_total_points: 10,
            cohort_points: 10,
            paid_amount: Money::from_major(100),
            commission_amount: Money::from_cents(commission),
            kind_breakdown: BTreeMap::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn referral(id: i64, user_id: i64, amount: i64, available_day: u32) -> ReferralCommissionRecord {
        ReferralCommissionRecord {
            id,
            influencer_id: 1,
            user_id,
            invoice_id: InvoiceId(format!("inv-{id}")),
            coupon_code: "GEEK10".to_string(),
            amount: Money::from_cents(amount),
            currency: "USD".to_string(),
            status: ReferralStatus::Pending,
            created_at: Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap(),
            available_at: Utc.with_ymd_and_hms(2024, 4, available_day, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn usage_rolls_up_by_cohort_and_currency() {
        let snapshots = vec![
            snapshot(1, 10, 3, "USD", 3_000),
            snapshot(2, 11, 3, "USD", 1_800),
            snapshot(3, 10, 4, "USD", 4_200),
            snapshot(4, 12, 3, "EUR", 900),
        ];
        let rows = usage_rollups(1, month(), &snapshots);
        assert_eq!(rows.len(), 3);
        let usd_c3 = rows.iter().find(|r| r.cohort_id == Some(3) && r.currency == "USD").unwrap();
        assert_eq!(usd_c3.amount_paid, Money::from_cents(4_800));
        assert_eq!(usd_c3.num_users, 2);
        assert_eq!(usd_c3.source_ids, vec![1, 2]);
        let eur_c3 = rows.iter().find(|r| r.currency == "EUR").unwrap();
        assert_eq!(eur_c3.num_users, 1);
        assert!(rows.iter().all(|r| r.commission_type == CommissionType::Usage));
    }

    #[test]
    fn referrals_contribute_only_after_maturing() {
        let referrals = vec![referral(1, 20, 2_500, 5), referral(2, 21, 1_000, 20)];
        let before = Utc.with_ymd_and_hms(2024, 4, 10, 0, 0, 0).unwrap();
        let rows = referral_rollups(1, month(), &referrals, before);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].amount_paid, Money::from_cents(2_500));
        assert_eq!(rows[0].num_users, 1);
        assert_eq!(rows[0].cohort_id, None);
        assert_eq!(rows[0].commission_type, CommissionType::Referral);

        let after = Utc.with_ymd_and_hms(2024, 4, 20, 0, 0, 0).unwrap();
        let rows = referral_rollups(1, month(), &referrals, after);
        assert_eq!(rows[0].amount_paid, Money::from_cents(3_500));
        assert_eq!(rows[0].num_users, 2);
        assert_eq!(rows[0].source_ids, vec![1, 2]);
    }

    #[test]
    fn repeat_buyers_count_once() {
        let referrals = vec![referral(1, 20, 2_500, 1), referral(2, 20, 1_500, 1)];
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let rows = referral_rollups(1, month(), &referrals, now);
        assert_eq!(rows[0].amount_paid, Money::from_cents(4_000));
        assert_eq!(rows[0].num_users, 1);
    }

    #[test]
    fn batches_sum_stored_rollups_exactly() {
        let aggregates = vec![
            AggregatedCommission {
                id: 7,
                influencer_id: 1,
                cohort_id: Some(3),
                month: month(),
                commission_type: CommissionType::Usage,
                currency: "USD".to_string(),
                amount_paid: Money::from_cents(3_000),
                num_users: 1,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
            AggregatedCommission {
                id: 8,
                influencer_id: 1,
                cohort_id: None,
                month: month(),
                commission_type: CommissionType::Referral,
                currency: "USD".to_string(),
                amount_paid: Money::from_cents(2_500),
                num_users: 1,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
        ];
        let batches = payout_batches(&aggregates);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].total_amount, Money::from_cents(5_500));
        assert_eq!(batches[0].aggregate_ids, vec![7, 8]);
        assert!(payout_batches(&[]).is_empty());
    }
}
