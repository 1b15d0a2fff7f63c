//! Aggregation and payout batch behaviour: idempotent recomputes, currency splits and the batch status machine.
use std::collections::BTreeMap;

use cce_common::Money;
use chrono::{DateTime, TimeZone, Utc};
use commission_engine::{
    db_types::{NewUsageSnapshot, PayoutStatus},
    helpers::CalendarMonth,
    test_utils::{
        prepare_env::{prepare_test_env, random_db_path},
        seeds,
    },
    traits::{CommissionManagement, PayoutManagement},
    CommissionAggregator,
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

fn snapshot(
    influencer_id: i64,
    user_id: i64,
    cohort_id: i64,
    currency: &str,
    paid: Money,
    commission: Money,
) -> NewUsageSnapshot {
    NewUsageSnapshot {
        influencer_id,
        user_id,
        cohort_id,
        month: march(),
        currency: currency.to_string(),
        user_total_points: 10,
        cohort_points: 10,
        paid_amount: paid,
        commission_amount: commission,
        kind_breakdown: BTreeMap::from([("lesson_completed".to_string(), 10)]),
    }
}

#[tokio::test]
async fn recomputing_a_month_is_byte_identical() {
    let db = new_db().await;
    let programme = seeds::seed_programme(&db, "ferris", day(1)).await;
    for user_id in [11, 12] {
        let row = snapshot(
            programme.influencer_id,
            user_id,
            programme.cohort_id,
            "USD",
            Money::from_major(100),
            Money::from_major(30),
        );
        db.upsert_usage_snapshot(row).await.unwrap();
    }
    let now = Utc.with_ymd_and_hms(2024, 4, 2, 0, 0, 0).unwrap();
    let aggregator = CommissionAggregator::new(db.clone());

    aggregator.aggregate_month(programme.influencer_id, march(), false, now).await.unwrap();
    let first_rollups = db.fetch_aggregates_for_month(programme.influencer_id, march()).await.unwrap();
    let first_batches = db.fetch_payout_batches_for_month(programme.influencer_id, march()).await.unwrap();

    aggregator.aggregate_month(programme.influencer_id, march(), false, now).await.unwrap();
    let second_rollups = db.fetch_aggregates_for_month(programme.influencer_id, march()).await.unwrap();
    let second_batches = db.fetch_payout_batches_for_month(programme.influencer_id, march()).await.unwrap();

    // Same ids, same amounts, same timestamps. Nothing was rewritten.
    assert_eq!(first_rollups, second_rollups);
    assert_eq!(first_batches, second_batches);
    assert_eq!(first_rollups[0].amount_paid, Money::from_major(60));
    assert_eq!(first_rollups[0].num_users, 2);
}

#[tokio::test]
async fn currencies_never_share_a_batch() {
    let db = new_db().await;
    let programme = seeds::seed_programme(&db, "ferris", day(1)).await;
    db.upsert_usage_snapshot(snapshot(
        programme.influencer_id,
        21,
        programme.cohort_id,
        "USD",
        Money::from_major(100),
        Money::from_major(30),
    ))
    .await
    .unwrap();
    db.upsert_usage_snapshot(snapshot(
        programme.influencer_id,
        22,
        programme.cohort_id,
        "EUR",
        Money::from_major(90),
        Money::from_major(27),
    ))
    .await
    .unwrap();

    let now = Utc.with_ymd_and_hms(2024, 4, 2, 0, 0, 0).unwrap();
    let outcome = CommissionAggregator::new(db.clone())
        .aggregate_month(programme.influencer_id, march(), false, now)
        .await
        .unwrap();
    assert_eq!(outcome.batches.len(), 2);
    let eur = outcome.batches.iter().find(|b| b.currency == "EUR").unwrap();
    let usd = outcome.batches.iter().find(|b| b.currency == "USD").unwrap();
    assert_eq!(eur.total_amount, Money::from_major(27));
    assert_eq!(usd.total_amount, Money::from_major(30));
}

#[tokio::test]
async fn batches_link_every_contributing_rollup() {
    let db = new_db().await;
    let programme = seeds::seed_programme(&db, "ferris", day(1)).await;
    let second_cohort = seeds::seed_cohort(&db, programme.academy_id, "python-2024").await;
    use commission_engine::traits::InfluencerManagement;
    db.assign_influencer_to_cohort(second_cohort, programme.influencer_id, day(1)).await.unwrap();
    db.upsert_usage_snapshot(snapshot(
        programme.influencer_id,
        31,
        programme.cohort_id,
        "USD",
        Money::from_major(100),
        Money::from_major(30),
    ))
    .await
    .unwrap();
    db.upsert_usage_snapshot(snapshot(
        programme.influencer_id,
        31,
        second_cohort,
        "USD",
        Money::from_major(100),
        Money::from_major(12),
    ))
    .await
    .unwrap();

    let now = Utc.with_ymd_and_hms(2024, 4, 2, 0, 0, 0).unwrap();
    let outcome = CommissionAggregator::new(db.clone())
        .aggregate_month(programme.influencer_id, march(), false, now)
        .await
        .unwrap();
    assert_eq!(outcome.aggregates.len(), 2);
    assert_eq!(outcome.batches.len(), 1);
    assert_eq!(outcome.batches[0].total_amount, Money::from_major(42));

    let mut expected: Vec<i64> = outcome.aggregates.iter().map(|a| a.id).collect();
    expected.sort_unstable();
    let linked = db.fetch_batch_aggregate_ids(outcome.batches[0].id).await.unwrap();
    assert_eq!(linked, expected);
}

#[tokio::test]
async fn preview_batches_flip_to_pending_and_paid_is_terminal() {
    let db = new_db().await;
    let programme = seeds::seed_programme(&db, "ferris", day(1)).await;
    db.upsert_usage_snapshot(snapshot(
        programme.influencer_id,
        41,
        programme.cohort_id,
        "USD",
        Money::from_major(100),
        Money::from_major(30),
    ))
    .await
    .unwrap();
    let now = Utc.with_ymd_and_hms(2024, 4, 2, 0, 0, 0).unwrap();
    let aggregator = CommissionAggregator::new(db.clone());

    let outcome = aggregator.aggregate_month(programme.influencer_id, march(), true, now).await.unwrap();
    assert_eq!(outcome.batches[0].status, PayoutStatus::Preview);

    let outcome = aggregator.aggregate_month(programme.influencer_id, march(), false, now).await.unwrap();
    assert_eq!(outcome.batches[0].status, PayoutStatus::Pending);
    let batch_id = outcome.batches[0].id;

    let paid = db.update_payout_status(batch_id, PayoutStatus::Paid).await.unwrap();
    assert_eq!(paid.status, PayoutStatus::Paid);
    // A settled batch never reopens, not even for a preview recompute.
    let outcome = aggregator.aggregate_month(programme.influencer_id, march(), true, now).await.unwrap();
    assert_eq!(outcome.batches[0].id, batch_id);
    assert_eq!(outcome.batches[0].status, PayoutStatus::Paid);
    assert!(db.update_payout_status(batch_id, PayoutStatus::Pending).await.is_err());
}
