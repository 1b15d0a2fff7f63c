use crate::{
    db_types::{AggregatedCommission, NewAggregatedCommission, NewPayoutBatch, PayoutBatch, PayoutStatus},
    helpers::CalendarMonth,
    traits::CommissionDatabaseError,
};

/// Writes and queries for monthly rollups and payout batches.
///
/// Aggregation is a full recompute: the caller hands over the complete set of rollups for a month, and the backend
/// reconciles the stored state against it. Re-running with unchanged inputs must leave every stored row, including
/// its timestamps, byte-identical.
#[allow(async_fn_in_trait)]
pub trait PayoutManagement {
    /// Replaces the month's aggregated commissions with `rows` in a single atomic transaction.
    ///
    /// * Rows whose `(cohort, type, currency)` key already exists with the same totals are left untouched.
    /// * Rows whose key exists with different totals are updated in place.
    /// * Keys present in storage but absent from `rows` are deleted.
    /// * Source links (snapshot or referral ids) are rewritten to match `rows`.
    ///
    /// Returns the full set of rollups now stored for the month.
    fn replace_month_aggregates(
        &self,
        influencer_id: i64,
        month: CalendarMonth,
        rows: Vec<NewAggregatedCommission>,
    ) -> impl std::future::Future<Output = Result<Vec<AggregatedCommission>, CommissionDatabaseError>> + Send;

    async fn fetch_aggregates_for_month(
        &self,
        influencer_id: i64,
        month: CalendarMonth,
    ) -> Result<Vec<AggregatedCommission>, CommissionDatabaseError>;

    /// The snapshot ids (usage) or referral record ids (referral) an aggregate row was computed from.
    async fn fetch_aggregate_source_ids(&self, aggregate_id: i64) -> Result<Vec<i64>, CommissionDatabaseError>;

    /// Writes one payout batch per currency for the month.
    ///
    /// Existing `Paid` batches keep their status (a recompute may still adjust their totals); all other batches take
    /// `Preview` or `Pending` depending on the `preview` flag. Unpaid batches for currencies that no longer have any
    /// aggregate rows are removed. Batch-to-aggregate links are rewritten.
    fn upsert_payout_batches(
        &self,
        influencer_id: i64,
        month: CalendarMonth,
        batches: Vec<NewPayoutBatch>,
        preview: bool,
    ) -> impl std::future::Future<Output = Result<Vec<PayoutBatch>, CommissionDatabaseError>> + Send;

    async fn fetch_payout_batches_for_month(
        &self,
        influencer_id: i64,
        month: CalendarMonth,
    ) -> Result<Vec<PayoutBatch>, CommissionDatabaseError>;

    async fn fetch_payout_batch(&self, batch_id: i64) -> Result<Option<PayoutBatch>, CommissionDatabaseError>;

    async fn fetch_batch_aggregate_ids(&self, batch_id: i64) -> Result<Vec<i64>, CommissionDatabaseError>;

    /// Applies a status change to a payout batch after validating the transition.
    async fn update_payout_status(
        &self,
        batch_id: i64,
        new_status: PayoutStatus,
    ) -> Result<PayoutBatch, CommissionDatabaseError>;
}
