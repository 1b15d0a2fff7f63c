//! The referral commission channel: registration from fulfilled invoices, the one-month hold, and the status
//! machine.
use cce_common::Money;
use chrono::{DateTime, TimeZone, Utc};
use commission_engine::{
    db_types::{CommissionType, ReferralStatus},
    helpers::CalendarMonth,
    test_utils::{
        prepare_env::{prepare_test_env, random_db_path},
        seeds,
    },
    CommissionAggregator,
    ReferralApi,
    ReferralApiError,
    SqliteDatabase,
};

async fn new_db() -> SqliteDatabase {
    let url = random_db_path();
    prepare_test_env(&url).await;
    SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database")
}

fn march() -> CalendarMonth {
    "2024-03".parse().unwrap()
}

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, d, 12, 0, 0).unwrap()
}

#[tokio::test]
async fn registration_takes_half_and_holds_for_a_month() {
    let db = new_db().await;
    let programme = seeds::seed_programme(&db, "ferris", day(1)).await;
    seeds::seed_coupon(&db, "FERRIS10", programme.influencer_id, true).await;
    let invoice_id = seeds::seed_fulfilled_invoice(
        &db,
        "inv-r1",
        401,
        programme.plan_id,
        Money::from_major(50),
        "USD",
        Some("FERRIS10"),
        day(10),
    )
    .await;

    let api = ReferralApi::new(db.clone());
    let (record, inserted) = api.register_from_invoice(&invoice_id).await.unwrap().unwrap();
    assert!(inserted);
    assert_eq!(record.influencer_id, programme.influencer_id);
    assert_eq!(record.amount, Money::from_major(25));
    assert_eq!(record.status, ReferralStatus::Pending);
    assert_eq!(record.created_at, day(10));
    assert_eq!(record.available_at, Utc.with_ymd_and_hms(2024, 4, 10, 12, 0, 0).unwrap());

    // The fulfilment webhook retries; the second delivery must be a no-op.
    let (again, inserted) = api.register_from_invoice(&invoice_id).await.unwrap().unwrap();
    assert!(!inserted);
    assert_eq!(again.id, record.id);
    assert_eq!(again.amount, record.amount);
}

#[tokio::test]
async fn invoices_that_do_not_qualify_register_nothing() {
    let db = new_db().await;
    let programme = seeds::seed_programme(&db, "ferris", day(1)).await;
    seeds::seed_coupon(&db, "STALE", programme.influencer_id, false).await;
    let api = ReferralApi::new(db.clone());

    let plain =
        seeds::seed_fulfilled_invoice(&db, "inv-r2", 402, programme.plan_id, Money::from_major(50), "USD", None, day(4))
            .await;
    assert!(api.register_from_invoice(&plain).await.unwrap().is_none());

    let stale = seeds::seed_fulfilled_invoice(
        &db,
        "inv-r3",
        403,
        programme.plan_id,
        Money::from_major(50),
        "USD",
        Some("STALE"),
        day(4),
    )
    .await;
    assert!(api.register_from_invoice(&stale).await.unwrap().is_none());

    let missing = "inv-does-not-exist".to_string().into();
    let err = api.register_from_invoice(&missing).await.unwrap_err();
    assert!(matches!(err, ReferralApiError::UnknownInvoice(_)));
}

#[tokio::test]
async fn referrals_collect_only_after_the_hold_lapses() {
    let db = new_db().await;
    let programme = seeds::seed_programme(&db, "ferris", day(1)).await;
    seeds::seed_coupon(&db, "FERRIS10", programme.influencer_id, true).await;
    let invoice_id = seeds::seed_fulfilled_invoice(
        &db,
        "inv-r4",
        404,
        programme.plan_id,
        Money::from_major(50),
        "USD",
        Some("FERRIS10"),
        day(10),
    )
    .await;
    ReferralApi::new(db.clone()).register_from_invoice(&invoice_id).await.unwrap();
    let aggregator = CommissionAggregator::new(db.clone());

    let too_early = Utc.with_ymd_and_hms(2024, 4, 5, 0, 0, 0).unwrap();
    let outcome = aggregator.aggregate_month(programme.influencer_id, march(), false, too_early).await.unwrap();
    assert!(outcome.aggregates.is_empty());
    assert!(outcome.batches.is_empty());

    let matured = Utc.with_ymd_and_hms(2024, 4, 15, 0, 0, 0).unwrap();
    let outcome = aggregator.aggregate_month(programme.influencer_id, march(), false, matured).await.unwrap();
    assert_eq!(outcome.aggregates.len(), 1);
    assert_eq!(outcome.aggregates[0].commission_type, CommissionType::Referral);
    assert_eq!(outcome.aggregates[0].cohort_id, None);
    assert_eq!(outcome.aggregates[0].amount_paid, Money::from_major(25));
    assert_eq!(outcome.batches.len(), 1);
    assert_eq!(outcome.batches[0].total_amount, Money::from_major(25));
}

#[tokio::test]
async fn cancelled_referrals_never_collect_but_paid_ones_still_do() {
    let db = new_db().await;
    let programme = seeds::seed_programme(&db, "ferris", day(1)).await;
    seeds::seed_coupon(&db, "FERRIS10", programme.influencer_id, true).await;
    let api = ReferralApi::new(db.clone());
    let cancelled_invoice = seeds::seed_fulfilled_invoice(
        &db,
        "inv-r5",
        405,
        programme.plan_id,
        Money::from_major(50),
        "USD",
        Some("FERRIS10"),
        day(8),
    )
    .await;
    let paid_invoice = seeds::seed_fulfilled_invoice(
        &db,
        "inv-r6",
        406,
        programme.plan_id,
        Money::from_major(80),
        "USD",
        Some("FERRIS10"),
        day(9),
    )
    .await;
    let (cancelled, _) = api.register_from_invoice(&cancelled_invoice).await.unwrap().unwrap();
    let (paid, _) = api.register_from_invoice(&paid_invoice).await.unwrap().unwrap();
    api.update_status(cancelled.id, ReferralStatus::Cancelled).await.unwrap();
    api.update_status(paid.id, ReferralStatus::Paid).await.unwrap();

    let now = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
    let outcome = CommissionAggregator::new(db.clone())
        .aggregate_month(programme.influencer_id, march(), false, now)
        .await
        .unwrap();
    assert_eq!(outcome.aggregates.len(), 1);
    assert_eq!(outcome.aggregates[0].amount_paid, Money::from_major(40));
    assert_eq!(outcome.aggregates[0].num_users, 1);
}

#[tokio::test]
async fn settled_referrals_are_frozen() {
    let db = new_db().await;
    let programme = seeds::seed_programme(&db, "ferris", day(1)).await;
    seeds::seed_coupon(&db, "FERRIS10", programme.influencer_id, true).await;
    let invoice_id = seeds::seed_fulfilled_invoice(
        &db,
        "inv-r7",
        407,
        programme.plan_id,
        Money::from_major(50),
        "USD",
        Some("FERRIS10"),
        day(10),
    )
    .await;
    let api = ReferralApi::new(db.clone());
    let (record, _) = api.register_from_invoice(&invoice_id).await.unwrap().unwrap();

    let settled = api.update_status(record.id, ReferralStatus::Paid).await.unwrap();
    assert_eq!(settled.status, ReferralStatus::Paid);
    assert!(api.update_status(record.id, ReferralStatus::Pending).await.is_err());
    assert!(api.update_status(record.id, ReferralStatus::Cancelled).await.is_err());
}
