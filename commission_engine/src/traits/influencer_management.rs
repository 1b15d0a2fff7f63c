use chrono::{DateTime, Utc};

use crate::{
    db_types::{Cohort, CohortAssignment, Influencer, Plan, ReferralCoupon},
    traits::CommissionDatabaseError,
};

/// The `InfluencerManagement` trait covers creators, their affiliate roles, cohort assignments and the plan
/// catalogue. The eligibility rules themselves live in the pipeline; this trait only answers the raw questions.
#[allow(async_fn_in_trait)]
pub trait InfluencerManagement {
    /// Fetches the influencer with the given id. If no influencer exists, `None` is returned.
    fn fetch_influencer(
        &self,
        influencer_id: i64,
    ) -> impl std::future::Future<Output = Result<Option<Influencer>, CommissionDatabaseError>> + Send;

    /// The academies in which the influencer currently holds an active affiliate role.
    fn fetch_affiliate_academy_ids(
        &self,
        influencer_id: i64,
    ) -> impl std::future::Future<Output = Result<Vec<i64>, CommissionDatabaseError>> + Send;

    /// Whether the influencer holds at least one active affiliate role anywhere.
    fn has_active_affiliate_role(
        &self,
        influencer_id: i64,
    ) -> impl std::future::Future<Output = Result<bool, CommissionDatabaseError>> + Send;

    /// The cohorts the influencer is actively assigned to, restricted to the given academies.
    fn fetch_assigned_cohorts(
        &self,
        influencer_id: i64,
        academy_ids: &[i64],
    ) -> impl std::future::Future<Output = Result<Vec<Cohort>, CommissionDatabaseError>> + Send;

    /// Assigns the influencer to a cohort, re-activating the previous assignment if one exists.
    async fn assign_influencer_to_cohort(
        &self,
        cohort_id: i64,
        influencer_id: i64,
        assigned_at: DateTime<Utc>,
    ) -> Result<CohortAssignment, CommissionDatabaseError>;

    /// Deactivates an assignment. Returns `false` if no such assignment existed.
    async fn deactivate_cohort_assignment(
        &self,
        cohort_id: i64,
        influencer_id: i64,
    ) -> Result<bool, CommissionDatabaseError>;

    /// Fetches a referral coupon by its code.
    fn fetch_coupon(
        &self,
        code: &str,
    ) -> impl std::future::Future<Output = Result<Option<ReferralCoupon>, CommissionDatabaseError>> + Send;

    /// The plans sold against any of the given cohorts, whether linked directly or through a cohort set.
    fn fetch_plan_ids_for_cohorts(
        &self,
        cohort_ids: &[i64],
    ) -> impl std::future::Future<Output = Result<Vec<i64>, CommissionDatabaseError>> + Send;

    /// Looks up plans by their slugs. Slugs with no matching plan are simply absent from the result.
    async fn fetch_plans_by_slugs(&self, slugs: &[String]) -> Result<Vec<Plan>, CommissionDatabaseError>;
}
