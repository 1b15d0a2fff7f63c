use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, SqliteConnection};

use crate::{
    db_types::{Cohort, CohortAssignment, Influencer, Plan, ReferralCoupon},
    traits::CommissionDatabaseError,
};

pub async fn influencer_by_id(
    influencer_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<Influencer>, CommissionDatabaseError> {
    let influencer = sqlx::query_as("SELECT * FROM influencers WHERE id = $1")
        .bind(influencer_id)
        .fetch_optional(conn)
        .await?;
    Ok(influencer)
}

/// The academies in which the influencer holds an active affiliate role, in ascending id order.
pub async fn affiliate_academy_ids(
    influencer_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<i64>, CommissionDatabaseError> {
    let ids: Vec<i64> = sqlx::query_scalar(
        "SELECT academy_id FROM affiliate_roles WHERE influencer_id = $1 AND is_active = TRUE ORDER BY academy_id",
    )
    .bind(influencer_id)
    .fetch_all(conn)
    .await?;
    Ok(ids)
}

pub async fn has_active_affiliate_role(
    influencer_id: i64,
    conn: &mut SqliteConnection,
) -> Result<bool, CommissionDatabaseError> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM affiliate_roles WHERE influencer_id = $1 AND is_active = TRUE")
            .bind(influencer_id)
            .fetch_one(conn)
            .await?;
    Ok(count > 0)
}

/// The cohorts the influencer is actively assigned to within the given academies.
pub async fn assigned_cohorts(
    influencer_id: i64,
    academy_ids: &[i64],
    conn: &mut SqliteConnection,
) -> Result<Vec<Cohort>, CommissionDatabaseError> {
    if academy_ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut builder = QueryBuilder::new(
        "SELECT c.id, c.academy_id, c.name, c.uses_micro_cohorts FROM cohorts c JOIN cohort_assignments a ON \
         a.cohort_id = c.id WHERE a.is_active = TRUE AND a.influencer_id = ",
    );
    builder.push_bind(influencer_id);
    builder.push(" AND c.academy_id IN (");
    let mut academies = builder.separated(", ");
    for id in academy_ids {
        academies.push_bind(*id);
    }
    builder.push(") ORDER BY c.id");
    let cohorts = builder.build_query_as::<Cohort>().fetch_all(conn).await?;
    Ok(cohorts)
}

/// Assigns the influencer to the cohort. If an assignment already exists it is re-activated with the new
/// assignment time.
pub async fn upsert_assignment(
    cohort_id: i64,
    influencer_id: i64,
    assigned_at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<CohortAssignment, CommissionDatabaseError> {
    let assignment = sqlx::query_as(
        r#"
            INSERT INTO cohort_assignments (cohort_id, influencer_id, assigned_at, is_active)
            VALUES ($1, $2, $3, TRUE)
            ON CONFLICT (cohort_id, influencer_id)
            DO UPDATE SET is_active = TRUE, assigned_at = excluded.assigned_at
            RETURNING *;
        "#,
    )
    .bind(cohort_id)
    .bind(influencer_id)
    .bind(assigned_at)
    .fetch_one(conn)
    .await?;
    Ok(assignment)
}

pub async fn deactivate_assignment(
    cohort_id: i64,
    influencer_id: i64,
    conn: &mut SqliteConnection,
) -> Result<bool, CommissionDatabaseError> {
    let result = sqlx::query("UPDATE cohort_assignments SET is_active = FALSE WHERE cohort_id = $1 AND influencer_id = $2")
        .bind(cohort_id)
        .bind(influencer_id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn coupon_by_code(
    code: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<ReferralCoupon>, CommissionDatabaseError> {
    let coupon =
        sqlx::query_as("SELECT * FROM referral_coupons WHERE code = $1").bind(code).fetch_optional(conn).await?;
    Ok(coupon)
}

/// The plans sold against any of the given cohorts, directly or through a cohort set. Ascending plan id order.
pub async fn plan_ids_for_cohorts(
    cohort_ids: &[i64],
    conn: &mut SqliteConnection,
) -> Result<Vec<i64>, CommissionDatabaseError> {
    if cohort_ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut builder = QueryBuilder::new("SELECT plan_id FROM plan_cohorts WHERE cohort_id IN (");
    let mut direct = builder.separated(", ");
    for id in cohort_ids {
        direct.push_bind(*id);
    }
    builder.push(
        ") UNION SELECT pcs.plan_id FROM plan_cohort_sets pcs JOIN cohort_set_members m ON m.cohort_set_id = \
         pcs.cohort_set_id WHERE m.cohort_id IN (",
    );
    let mut via_sets = builder.separated(", ");
    for id in cohort_ids {
        via_sets.push_bind(*id);
    }
    builder.push(") ORDER BY 1");
    let ids: Vec<i64> = builder.build_query_scalar().fetch_all(conn).await?;
    Ok(ids)
}

pub async fn plans_by_slugs(
    slugs: &[String],
    conn: &mut SqliteConnection,
) -> Result<Vec<Plan>, CommissionDatabaseError> {
    if slugs.is_empty() {
        return Ok(Vec::new());
    }
    let mut builder = QueryBuilder::new("SELECT * FROM plans WHERE slug IN (");
    let mut matches = builder.separated(", ");
    for slug in slugs {
        matches.push_bind(slug.clone());
    }
    builder.push(") ORDER BY id");
    let plans = builder.build_query_as::<Plan>().fetch_all(conn).await?;
    Ok(plans)
}
