//! `SqliteDatabase` is a concrete implementation of a commission engine backend.
//!
//! Unsurprisingly, it uses SQLite as the backend and implements all the traits defined in the [`crate::traits`]
//! module. Reads grab a connection from the pool; anything touching more than one row runs inside a transaction.
use std::fmt::Debug;

use chrono::{DateTime, Utc};
use log::*;
use sqlx::SqlitePool;

use super::db::{activity, aggregates, db_url, influencers, invoices, new_pool, referrals, snapshots};
use crate::{
    db_types::{
        AggregatedCommission,
        Cohort,
        CohortAssignment,
        Influencer,
        InvoiceId,
        NewAggregatedCommission,
        NewEngagementEvent,
        NewPayoutBatch,
        NewReferralCommission,
        NewUsageSnapshot,
        PayoutBatch,
        PayoutStatus,
        Plan,
        QualifyingEvent,
        ReferralCommissionRecord,
        ReferralCoupon,
        ReferralStatus,
        UsageInvoice,
        UsageSnapshot,
    },
    helpers::CalendarMonth,
    traits::{
        ActivityQuery,
        ActivityStore,
        ActivityStoreError,
        CommissionDatabase,
        CommissionDatabaseError,
        CommissionManagement,
        InfluencerManagement,
        InvoiceManagement,
        PayoutManagement,
        PlanScope,
        SnapshotUpsert,
    },
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    /// Creates a new database API object
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        SqliteDatabase::new_with_url(url.as_str(), max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        trace!("Creating new database connection pool with url {url}");
        let pool = new_pool(url, max_connections).await?;
        let url = url.to_string();
        Ok(Self { url, pool })
    }

    /// Returns a reference to the database connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl CommissionDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn close(&mut self) -> Result<(), CommissionDatabaseError> {
        self.pool.close().await;
        Ok(())
    }
}

impl InfluencerManagement for SqliteDatabase {
    async fn fetch_influencer(&self, influencer_id: i64) -> Result<Option<Influencer>, CommissionDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        influencers::influencer_by_id(influencer_id, &mut conn).await
    }

    async fn fetch_affiliate_academy_ids(&self, influencer_id: i64) -> Result<Vec<i64>, CommissionDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        influencers::affiliate_academy_ids(influencer_id, &mut conn).await
    }

    async fn has_active_affiliate_role(&self, influencer_id: i64) -> Result<bool, CommissionDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        influencers::has_active_affiliate_role(influencer_id, &mut conn).await
    }

    async fn fetch_assigned_cohorts(
        &self,
        influencer_id: i64,
        academy_ids: &[i64],
    ) -> Result<Vec<Cohort>, CommissionDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        influencers::assigned_cohorts(influencer_id, academy_ids, &mut conn).await
    }

    async fn assign_influencer_to_cohort(
        &self,
        cohort_id: i64,
        influencer_id: i64,
        assigned_at: DateTime<Utc>,
    ) -> Result<CohortAssignment, CommissionDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        let assignment = influencers::upsert_assignment(cohort_id, influencer_id, assigned_at, &mut conn).await?;
        debug!("🗃️ Influencer {influencer_id} assigned to cohort {cohort_id}");
        Ok(assignment)
    }

    async fn deactivate_cohort_assignment(
        &self,
        cohort_id: i64,
        influencer_id: i64,
    ) -> Result<bool, CommissionDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        let existed = influencers::deactivate_assignment(cohort_id, influencer_id, &mut conn).await?;
        if existed {
            debug!("🗃️ Influencer {influencer_id} removed from cohort {cohort_id}");
        }
        Ok(existed)
    }

    async fn fetch_coupon(&self, code: &str) -> Result<Option<ReferralCoupon>, CommissionDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        influencers::coupon_by_code(code, &mut conn).await
    }

    async fn fetch_plan_ids_for_cohorts(&self, cohort_ids: &[i64]) -> Result<Vec<i64>, CommissionDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        influencers::plan_ids_for_cohorts(cohort_ids, &mut conn).await
    }

    async fn fetch_plans_by_slugs(&self, slugs: &[String]) -> Result<Vec<Plan>, CommissionDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        influencers::plans_by_slugs(slugs, &mut conn).await
    }
}

impl InvoiceManagement for SqliteDatabase {
    async fn fetch_invoice(&self, invoice_id: &InvoiceId) -> Result<Option<UsageInvoice>, CommissionDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        invoices::invoice_by_id(invoice_id, &mut conn).await
    }

    async fn fetch_billable_user_ids(
        &self,
        window: (DateTime<Utc>, DateTime<Utc>),
        excluded_users: &[i64],
        plans: &PlanScope,
    ) -> Result<Vec<i64>, CommissionDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        invoices::billable_user_ids(window, excluded_users, plans, &mut conn).await
    }

    async fn fetch_billable_invoices_for_user(
        &self,
        user_id: i64,
        window: (DateTime<Utc>, DateTime<Utc>),
        plans: &PlanScope,
    ) -> Result<Vec<UsageInvoice>, CommissionDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        invoices::billable_invoices_for_user(user_id, window, plans, &mut conn).await
    }

    async fn fetch_billable_invoices(
        &self,
        window: (DateTime<Utc>, DateTime<Utc>),
        excluded_users: &[i64],
        plans: &PlanScope,
    ) -> Result<Vec<UsageInvoice>, CommissionDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        invoices::billable_invoices(window, excluded_users, plans, &mut conn).await
    }
}

impl CommissionManagement for SqliteDatabase {
    async fn upsert_usage_snapshot(
        &self,
        snapshot: NewUsageSnapshot,
    ) -> Result<SnapshotUpsert, CommissionDatabaseError> {
        let mut tx = self.pool.begin().await?;
        let result = snapshots::upsert_snapshot(snapshot, &mut tx).await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn fetch_snapshots_for_month(
        &self,
        influencer_id: i64,
        month: CalendarMonth,
    ) -> Result<Vec<UsageSnapshot>, CommissionDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        snapshots::snapshots_for_month(influencer_id, month, &mut conn).await
    }

    async fn insert_referral_commission(
        &self,
        referral: NewReferralCommission,
    ) -> Result<(ReferralCommissionRecord, bool), CommissionDatabaseError> {
        let mut tx = self.pool.begin().await?;
        let (record, inserted) = referrals::idempotent_insert(referral, &mut tx).await?;
        tx.commit().await?;
        Ok((record, inserted))
    }

    async fn fetch_referral_commission(
        &self,
        referral_id: i64,
    ) -> Result<Option<ReferralCommissionRecord>, CommissionDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        referrals::referral_by_id(referral_id, &mut conn).await
    }

    async fn fetch_referrals_created_in(
        &self,
        influencer_id: i64,
        window: (DateTime<Utc>, DateTime<Utc>),
    ) -> Result<Vec<ReferralCommissionRecord>, CommissionDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        referrals::referrals_created_in(influencer_id, window, &mut conn).await
    }

    async fn fetch_collectible_referrals(
        &self,
        influencer_id: i64,
        window: (DateTime<Utc>, DateTime<Utc>),
    ) -> Result<Vec<ReferralCommissionRecord>, CommissionDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        referrals::collectible_referrals(influencer_id, window, &mut conn).await
    }

    async fn fetch_referral_locked_user_ids(
        &self,
        influencer_id: i64,
        window: (DateTime<Utc>, DateTime<Utc>),
    ) -> Result<Vec<i64>, CommissionDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        referrals::referral_locked_user_ids(influencer_id, window, &mut conn).await
    }

    async fn update_referral_status(
        &self,
        referral_id: i64,
        new_status: ReferralStatus,
    ) -> Result<ReferralCommissionRecord, CommissionDatabaseError> {
        let mut tx = self.pool.begin().await?;
        let record = referrals::update_status(referral_id, new_status, &mut tx).await?;
        tx.commit().await?;
        Ok(record)
    }
}

impl PayoutManagement for SqliteDatabase {
    async fn replace_month_aggregates(
        &self,
        influencer_id: i64,
        month: CalendarMonth,
        rows: Vec<NewAggregatedCommission>,
    ) -> Result<Vec<AggregatedCommission>, CommissionDatabaseError> {
        let mut tx = self.pool.begin().await?;
        let stored = aggregates::replace_month_aggregates(influencer_id, month, rows, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ {} rollups now stored for influencer {influencer_id} in {month}", stored.len());
        Ok(stored)
    }

    async fn fetch_aggregates_for_month(
        &self,
        influencer_id: i64,
        month: CalendarMonth,
    ) -> Result<Vec<AggregatedCommission>, CommissionDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        aggregates::aggregates_for_month(influencer_id, month, &mut conn).await
    }

    async fn fetch_aggregate_source_ids(&self, aggregate_id: i64) -> Result<Vec<i64>, CommissionDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        aggregates::aggregate_source_ids(aggregate_id, &mut conn).await
    }

    async fn upsert_payout_batches(
        &self,
        influencer_id: i64,
        month: CalendarMonth,
        batches: Vec<NewPayoutBatch>,
        preview: bool,
    ) -> Result<Vec<PayoutBatch>, CommissionDatabaseError> {
        let mut tx = self.pool.begin().await?;
        let stored = aggregates::upsert_payout_batches(influencer_id, month, batches, preview, &mut tx).await?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn fetch_payout_batches_for_month(
        &self,
        influencer_id: i64,
        month: CalendarMonth,
    ) -> Result<Vec<PayoutBatch>, CommissionDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        aggregates::payout_batches_for_month(influencer_id, month, &mut conn).await
    }

    async fn fetch_payout_batch(&self, batch_id: i64) -> Result<Option<PayoutBatch>, CommissionDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        aggregates::payout_batch_by_id(batch_id, &mut conn).await
    }

    async fn fetch_batch_aggregate_ids(&self, batch_id: i64) -> Result<Vec<i64>, CommissionDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        aggregates::batch_aggregate_ids(batch_id, &mut conn).await
    }

    async fn update_payout_status(
        &self,
        batch_id: i64,
        new_status: PayoutStatus,
    ) -> Result<PayoutBatch, CommissionDatabaseError> {
        let mut tx = self.pool.begin().await?;
        let batch = aggregates::update_payout_status(batch_id, new_status, &mut tx).await?;
        tx.commit().await?;
        Ok(batch)
    }
}

//-------------------------------------- SqliteActivityStore ----------------------------------------------------------

/// An [`ActivityStore`] backed by the local mirror of engagement events.
///
/// Production deployments point this at the analytical replica. Tests and single-node installs share the main
/// database file.
#[derive(Clone)]
pub struct SqliteActivityStore {
    pool: SqlitePool,
}

impl Debug for SqliteActivityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteActivityStore ({:?})", self.pool)
    }
}

impl SqliteActivityStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = new_pool(url, max_connections).await?;
        Ok(Self { pool })
    }

    /// Records a raw engagement event in the mirror. Returns the event id.
    pub async fn record_event(&self, event: NewEngagementEvent) -> Result<i64, ActivityStoreError> {
        let mut conn = self.pool.acquire().await.map_err(|e| ActivityStoreError::Unavailable(e.to_string()))?;
        let id = activity::record_event(event, &mut conn)
            .await
            .map_err(|e| ActivityStoreError::QueryFailed(e.to_string()))?;
        Ok(id)
    }
}

impl ActivityStore for SqliteActivityStore {
    async fn earliest_qualifying_events(
        &self,
        query: &ActivityQuery,
    ) -> Result<Vec<QualifyingEvent>, ActivityStoreError> {
        let mut conn = self.pool.acquire().await.map_err(|e| ActivityStoreError::Unavailable(e.to_string()))?;
        let events = activity::earliest_qualifying_events(query, &mut conn)
            .await
            .map_err(|e| ActivityStoreError::QueryFailed(e.to_string()))?;
        trace!("🗃️ Activity query returned {} qualifying events", events.len());
        Ok(events)
    }
}
