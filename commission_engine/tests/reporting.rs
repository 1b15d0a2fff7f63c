//! The reporting surface: live summaries, detail rows, plan filters and the async hand-off.
use cce_common::Money;
use chrono::{DateTime, TimeZone, Utc};
use commission_engine::{
    db_types::{CommissionType, RelatedType},
    helpers::CalendarMonth,
    jobs::{job_channel, CommissionJob},
    objects::ReportParams,
    test_utils::{
        prepare_env::{prepare_test_env, random_db_path},
        seeds,
    },
    CommissionAggregator,
    ReferralApi,
    ReportApi,
    ReportError,
    SqliteActivityStore,
    SqliteDatabase,
    UserMonthWorker,
};

async fn new_db() -> (SqliteDatabase, SqliteActivityStore) {
    let url = random_db_path();
    prepare_test_env(&url).await;
    let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database");
    let activity = SqliteActivityStore::new(db.pool().clone());
    (db, activity)
}

fn march() -> CalendarMonth {
    "2024-03".parse().unwrap()
}

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, d, 12, 0, 0).unwrap()
}

fn early_may() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
}

#[tokio::test]
async fn summaries_cover_both_commission_channels() {
    let (db, activity) = new_db().await;
    let programme = seeds::seed_programme(&db, "ferris", day(1)).await;
    seeds::seed_coupon(&db, "FERRIS10", programme.influencer_id, true).await;
    // One referred buyer and one organic cohort student.
    let referred = seeds::seed_fulfilled_invoice(
        &db,
        "inv-s1",
        101,
        programme.plan_id,
        Money::from_major(50),
        "USD",
        Some("FERRIS10"),
        day(10),
    )
    .await;
    ReferralApi::new(db.clone()).register_from_invoice(&referred).await.unwrap();
    seeds::seed_fulfilled_invoice(&db, "inv-s2", 102, programme.plan_id, Money::from_major(100), "USD", None, day(12))
        .await;
    seeds::seed_event(db.pool(), 102, RelatedType::Lesson, 1, "lesson_completed", programme.cohort_id, day(14)).await;

    let (queue, _listener) = job_channel(8);
    let api = ReportApi::new(db.clone(), activity, queue);
    let params = ReportParams::new(programme.influencer_id, march());
    let summary = api.monthly_summary(&params, early_may()).await.unwrap();
    assert!(!summary.scheduled);
    assert_eq!(summary.matured_referral_total.get("USD"), Some(&Money::from_major(25)));
    assert_eq!(summary.usage_total.get("USD"), Some(&Money::from_major(30)));

    // Before the hold lapses the referral side reads zero.
    let before_maturity = Utc.with_ymd_and_hms(2024, 4, 5, 0, 0, 0).unwrap();
    let summary = api.monthly_summary(&params, before_maturity).await.unwrap();
    assert!(summary.matured_referral_total.is_empty());
}

#[tokio::test]
async fn open_months_need_the_preview_flag() {
    let (db, activity) = new_db().await;
    let programme = seeds::seed_programme(&db, "ferris", day(1)).await;
    let (queue, _listener) = job_channel(8);
    let api = ReportApi::new(db.clone(), activity, queue);

    let mid_march = Utc.with_ymd_and_hms(2024, 3, 20, 0, 0, 0).unwrap();
    let params = ReportParams::new(programme.influencer_id, march());
    let err = api.monthly_summary(&params, mid_march).await.unwrap_err();
    assert!(matches!(err, ReportError::MonthNotClosed(_)));

    let params = ReportParams::new(programme.influencer_id, march()).preview();
    assert!(api.monthly_summary(&params, mid_march).await.is_ok());
}

#[tokio::test]
async fn unknown_creators_and_plan_slugs_are_rejected() {
    let (db, activity) = new_db().await;
    let programme = seeds::seed_programme(&db, "ferris", day(1)).await;
    let (queue, _listener) = job_channel(8);
    let api = ReportApi::new(db.clone(), activity, queue);

    let params = ReportParams::new(9_999, march());
    assert!(matches!(api.monthly_summary(&params, early_may()).await.unwrap_err(), ReportError::UnknownCreator(9_999)));

    let params = ReportParams::new(programme.influencer_id, march())
        .with_included_plans(vec!["no-such-plan".to_string()]);
    let err = api.monthly_summary(&params, early_may()).await.unwrap_err();
    match err {
        ReportError::UnknownPlanSlugs(slugs) => assert_eq!(slugs, vec!["no-such-plan".to_string()]),
        other => panic!("Expected UnknownPlanSlugs, got {other}"),
    }
}

#[tokio::test]
async fn async_requests_queue_a_build_instead_of_computing() {
    let (db, activity) = new_db().await;
    let programme = seeds::seed_programme(&db, "ferris", day(1)).await;
    let (queue, mut listener) = job_channel(8);
    let api = ReportApi::new(db.clone(), activity, queue);

    let params = ReportParams::new(programme.influencer_id, march()).run_async();
    let summary = api.monthly_summary(&params, early_may()).await.unwrap();
    assert!(summary.scheduled);
    assert!(summary.usage_total.is_empty());

    let queued = listener.recv().await.unwrap();
    assert_eq!(
        queued,
        CommissionJob::BuildMonth { influencer_id: programme.influencer_id, month: march(), preview: false }
    );
}

#[tokio::test]
async fn detail_rows_cover_both_channels_with_statuses() {
    let (db, activity) = new_db().await;
    let programme = seeds::seed_programme(&db, "ferris", day(1)).await;
    seeds::seed_coupon(&db, "FERRIS10", programme.influencer_id, true).await;
    let referred = seeds::seed_fulfilled_invoice(
        &db,
        "inv-s3",
        201,
        programme.plan_id,
        Money::from_major(50),
        "USD",
        Some("FERRIS10"),
        day(10),
    )
    .await;
    ReferralApi::new(db.clone()).register_from_invoice(&referred).await.unwrap();
    seeds::seed_fulfilled_invoice(&db, "inv-s4", 202, programme.plan_id, Money::from_major(100), "USD", None, day(12))
        .await;
    seeds::seed_event(db.pool(), 202, RelatedType::Lesson, 1, "lesson_completed", programme.cohort_id, day(14)).await;

    let worker = UserMonthWorker::new(db.clone(), SqliteActivityStore::new(db.pool().clone()));
    worker.compute_user_month(programme.influencer_id, 202, march()).await.unwrap();
    CommissionAggregator::new(db.clone())
        .aggregate_month(programme.influencer_id, march(), false, early_may())
        .await
        .unwrap();

    let (queue, _listener) = job_channel(8);
    let api = ReportApi::new(db.clone(), activity, queue);
    let params = ReportParams::new(programme.influencer_id, march());
    let rows = api.commission_rows(&params, early_may()).await.unwrap();
    assert_eq!(rows.len(), 2);

    let referral = rows.iter().find(|r| r.commission_type == CommissionType::Referral).unwrap();
    assert_eq!(referral.user_id, 201);
    assert_eq!(referral.paid_amount, Money::from_major(50));
    assert_eq!(referral.commission_amount, Money::from_major(25));
    assert!(referral.is_effective);
    assert!(referral.available_at.is_some());

    let usage = rows.iter().find(|r| r.commission_type == CommissionType::Usage).unwrap();
    assert_eq!(usage.user_id, 202);
    assert_eq!(usage.cohort_id, Some(programme.cohort_id));
    assert_eq!(usage.commission_amount, Money::from_major(30));
    assert_eq!(usage.status, "Pending");
    assert!(usage.is_effective);
}
