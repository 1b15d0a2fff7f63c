use chrono::{DateTime, Utc};

use crate::{
    db_types::{NewReferralCommission, NewUsageSnapshot, ReferralCommissionRecord, ReferralStatus, UsageSnapshot},
    helpers::CalendarMonth,
    traits::{CommissionDatabaseError, SnapshotUpsert},
};

/// Writes and queries for usage snapshots and referral commission records.
#[allow(async_fn_in_trait)]
pub trait CommissionManagement {
    /// Stores a usage snapshot. An existing row for the same `(influencer, user, cohort, month, currency)` key is
    /// only overwritten when a monetary total moved materially; see [`SnapshotUpsert`].
    fn upsert_usage_snapshot(
        &self,
        snapshot: NewUsageSnapshot,
    ) -> impl std::future::Future<Output = Result<SnapshotUpsert, CommissionDatabaseError>> + Send;

    /// All snapshots stored for the influencer and month, in `(cohort, currency, user)` order.
    fn fetch_snapshots_for_month(
        &self,
        influencer_id: i64,
        month: CalendarMonth,
    ) -> impl std::future::Future<Output = Result<Vec<UsageSnapshot>, CommissionDatabaseError>> + Send;

    /// Registers a referral commission. This call is idempotent on the invoice id: if the invoice has already been
    /// registered, the existing record is returned along with `false`.
    fn insert_referral_commission(
        &self,
        referral: NewReferralCommission,
    ) -> impl std::future::Future<Output = Result<(ReferralCommissionRecord, bool), CommissionDatabaseError>> + Send;

    async fn fetch_referral_commission(
        &self,
        referral_id: i64,
    ) -> Result<Option<ReferralCommissionRecord>, CommissionDatabaseError>;

    /// All referral records the influencer accrued in the window, regardless of status or refunds.
    async fn fetch_referrals_created_in(
        &self,
        influencer_id: i64,
        window: (DateTime<Utc>, DateTime<Utc>),
    ) -> Result<Vec<ReferralCommissionRecord>, CommissionDatabaseError>;

    /// Referral records accrued in the window that are still collectible: not cancelled, and whose source invoice
    /// has not been refunded. Maturity against the hold period is left to the caller.
    fn fetch_collectible_referrals(
        &self,
        influencer_id: i64,
        window: (DateTime<Utc>, DateTime<Utc>),
    ) -> impl std::future::Future<Output = Result<Vec<ReferralCommissionRecord>, CommissionDatabaseError>> + Send;

    /// The users locked out of the influencer's usage computation for the window. Any non-cancelled referral
    /// registered in the window locks its user: a user is paid for once per month, through one channel.
    fn fetch_referral_locked_user_ids(
        &self,
        influencer_id: i64,
        window: (DateTime<Utc>, DateTime<Utc>),
    ) -> impl std::future::Future<Output = Result<Vec<i64>, CommissionDatabaseError>> + Send;

    /// Applies a status change to a referral record after validating the transition.
    async fn update_referral_status(
        &self,
        referral_id: i64,
        new_status: ReferralStatus,
    ) -> Result<ReferralCommissionRecord, CommissionDatabaseError>;
}
