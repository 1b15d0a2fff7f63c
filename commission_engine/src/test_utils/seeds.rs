//! Seed data for the affiliate programme.
//!
//! Tests build their world with these instead of raw SQL. Everything returns the generated id so scenarios can
//! wire rows together explicitly.
use cce_common::Money;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::{
    db_types::{InvoiceId, NewEngagementEvent, RelatedType},
    traits::InfluencerManagement,
    SqliteActivityStore,
    SqliteDatabase,
};

pub async fn seed_influencer(db: &SqliteDatabase, handle: &str) -> i64 {
    sqlx::query("INSERT INTO influencers (handle, display_name) VALUES (?, ?)")
        .bind(handle)
        .bind(handle)
        .execute(db.pool())
        .await
        .expect("Error seeding influencer")
        .last_insert_rowid()
}

pub async fn seed_academy(db: &SqliteDatabase, name: &str) -> i64 {
    sqlx::query("INSERT INTO academies (name) VALUES (?)")
        .bind(name)
        .execute(db.pool())
        .await
        .expect("Error seeding academy")
        .last_insert_rowid()
}

pub async fn seed_affiliate_role(db: &SqliteDatabase, influencer_id: i64, academy_id: i64, is_active: bool) {
    sqlx::query("INSERT INTO affiliate_roles (influencer_id, academy_id, is_active) VALUES (?, ?, ?)")
        .bind(influencer_id)
        .bind(academy_id)
        .bind(is_active)
        .execute(db.pool())
        .await
        .expect("Error seeding affiliate role");
}

pub async fn seed_cohort(db: &SqliteDatabase, academy_id: i64, name: &str) -> i64 {
    sqlx::query("INSERT INTO cohorts (academy_id, name) VALUES (?, ?)")
        .bind(academy_id)
        .bind(name)
        .execute(db.pool())
        .await
        .expect("Error seeding cohort")
        .last_insert_rowid()
}

pub async fn seed_plan(db: &SqliteDatabase, slug: &str) -> i64 {
    sqlx::query("INSERT INTO plans (slug, name) VALUES (?, ?)")
        .bind(slug)
        .bind(slug)
        .execute(db.pool())
        .await
        .expect("Error seeding plan")
        .last_insert_rowid()
}

pub async fn link_plan_to_cohort(db: &SqliteDatabase, plan_id: i64, cohort_id: i64) {
    sqlx::query("INSERT INTO plan_cohorts (plan_id, cohort_id) VALUES (?, ?)")
        .bind(plan_id)
        .bind(cohort_id)
        .execute(db.pool())
        .await
        .expect("Error linking plan to cohort");
}

pub async fn seed_coupon(db: &SqliteDatabase, code: &str, influencer_id: i64, is_active: bool) {
    sqlx::query("INSERT INTO referral_coupons (code, influencer_id, is_active) VALUES (?, ?, ?)")
        .bind(code)
        .bind(influencer_id)
        .bind(is_active)
        .execute(db.pool())
        .await
        .expect("Error seeding coupon");
}

#[allow(clippy::too_many_arguments)]
pub async fn seed_fulfilled_invoice(
    db: &SqliteDatabase,
    id: &str,
    user_id: i64,
    plan_id: i64,
    amount: Money,
    currency: &str,
    coupon_code: Option<&str>,
    fulfilled_at: DateTime<Utc>,
) -> InvoiceId {
    sqlx::query(
        "INSERT INTO invoices (id, user_id, plan_id, amount, currency, status, coupon_code, fulfilled_at) VALUES \
         (?, ?, ?, ?, ?, 'Fulfilled', ?, ?)",
    )
    .bind(id)
    .bind(user_id)
    .bind(plan_id)
    .bind(amount)
    .bind(currency)
    .bind(coupon_code)
    .bind(fulfilled_at)
    .execute(db.pool())
    .await
    .expect("Error seeding invoice");
    InvoiceId(id.to_string())
}

pub async fn seed_event(
    pool: &SqlitePool,
    user_id: i64,
    related_type: RelatedType,
    related_id: i64,
    kind: &str,
    cohort_id: i64,
    occurred_at: DateTime<Utc>,
) -> i64 {
    let store = SqliteActivityStore::new(pool.clone());
    let event =
        NewEngagementEvent { user_id, related_type, related_id, kind: kind.to_string(), cohort_id, occurred_at };
    store.record_event(event).await.expect("Error seeding engagement event")
}

/// A ready-made single-cohort programme: one influencer with an active affiliate role, one cohort they are
/// assigned to, and one plan sold into that cohort.
pub struct Programme {
    pub influencer_id: i64,
    pub academy_id: i64,
    pub cohort_id: i64,
    pub plan_id: i64,
}

pub async fn seed_programme(db: &SqliteDatabase, handle: &str, assigned_at: DateTime<Utc>) -> Programme {
    let influencer_id = seed_influencer(db, handle).await;
    let academy_id = seed_academy(db, "geek-academy").await;
    seed_affiliate_role(db, influencer_id, academy_id, true).await;
    let cohort_id = seed_cohort(db, academy_id, "rust-2024").await;
    db.assign_influencer_to_cohort(cohort_id, influencer_id, assigned_at)
        .await
        .expect("Error assigning influencer to cohort");
    let plan_id = seed_plan(db, "pro-monthly").await;
    link_plan_to_cohort(db, plan_id, cohort_id).await;
    Programme { influencer_id, academy_id, cohort_id, plan_id }
}
