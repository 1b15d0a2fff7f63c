use std::collections::HashMap;

use cce_common::Money;
use log::{debug, warn};
use sqlx::{QueryBuilder, SqliteConnection};

use crate::{
    db_types::{
        AggregatedCommission,
        CommissionType,
        NewAggregatedCommission,
        NewPayoutBatch,
        PayoutBatch,
        PayoutStatus,
    },
    helpers::CalendarMonth,
    traits::CommissionDatabaseError,
};

pub async fn aggregates_for_month(
    influencer_id: i64,
    month: CalendarMonth,
    conn: &mut SqliteConnection,
) -> Result<Vec<AggregatedCommission>, CommissionDatabaseError> {
    let aggregates = sqlx::query_as(
        "SELECT * FROM aggregated_commissions WHERE influencer_id = $1 AND month = $2 ORDER BY commission_type, \
         currency, cohort_id",
    )
    .bind(influencer_id)
    .bind(month)
    .fetch_all(conn)
    .await?;
    Ok(aggregates)
}

/// Reconciles the stored rollups for the month against `rows`. Rows whose key carries the same totals are left
/// untouched, timestamps included. Changed rows are updated, new rows inserted, and keys absent from `rows` deleted.
/// Source links are rewritten for every surviving row. Callers run this inside a transaction.
pub async fn replace_month_aggregates(
    influencer_id: i64,
    month: CalendarMonth,
    rows: Vec<NewAggregatedCommission>,
    conn: &mut SqliteConnection,
) -> Result<Vec<AggregatedCommission>, CommissionDatabaseError> {
    let existing = aggregates_for_month(influencer_id, month, &mut *conn).await?;
    let mut stale: HashMap<(Option<i64>, CommissionType, String), AggregatedCommission> =
        existing.into_iter().map(|agg| ((agg.cohort_id, agg.commission_type, agg.currency.clone()), agg)).collect();
    for row in rows {
        let key = (row.cohort_id, row.commission_type, row.currency.clone());
        let stored = match stale.remove(&key) {
            Some(current) if row.matches(&current) => current,
            Some(current) => update_aggregate(current.id, &row, &mut *conn).await?,
            None => insert_aggregate(influencer_id, month, &row, &mut *conn).await?,
        };
        relink_sources(stored.id, &row.source_ids, &mut *conn).await?;
    }
    for aggregate in stale.into_values() {
        delete_aggregate(&aggregate, &mut *conn).await?;
    }
    aggregates_for_month(influencer_id, month, conn).await
}

async fn insert_aggregate(
    influencer_id: i64,
    month: CalendarMonth,
    row: &NewAggregatedCommission,
    conn: &mut SqliteConnection,
) -> Result<AggregatedCommission, CommissionDatabaseError> {
    let aggregate: AggregatedCommission = sqlx::query_as(
        r#"
            INSERT INTO aggregated_commissions (
                influencer_id,
                cohort_id,
                month,
                commission_type,
                currency,
                amount_paid,
                num_users
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *;
        "#,
    )
    .bind(influencer_id)
    .bind(row.cohort_id)
    .bind(month)
    .bind(row.commission_type.to_string())
    .bind(&row.currency)
    .bind(row.amount_paid.value())
    .bind(row.num_users)
    .fetch_one(conn)
    .await?;
    debug!(
        "🗃️ Aggregate {} stored: {} {} for {} users ({} {})",
        aggregate.id, aggregate.amount_paid, aggregate.currency, aggregate.num_users, aggregate.commission_type, month
    );
    Ok(aggregate)
}

async fn update_aggregate(
    id: i64,
    row: &NewAggregatedCommission,
    conn: &mut SqliteConnection,
) -> Result<AggregatedCommission, CommissionDatabaseError> {
    let aggregate: AggregatedCommission = sqlx::query_as(
        "UPDATE aggregated_commissions SET amount_paid = $1, num_users = $2, updated_at = CURRENT_TIMESTAMP WHERE id \
         = $3 RETURNING *",
    )
    .bind(row.amount_paid.value())
    .bind(row.num_users)
    .bind(id)
    .fetch_one(conn)
    .await?;
    debug!("🗃️ Aggregate {id} adjusted to {} {}", aggregate.amount_paid, aggregate.currency);
    Ok(aggregate)
}

async fn delete_aggregate(
    aggregate: &AggregatedCommission,
    conn: &mut SqliteConnection,
) -> Result<(), CommissionDatabaseError> {
    sqlx::query("DELETE FROM aggregate_sources WHERE aggregate_id = $1").bind(aggregate.id).execute(&mut *conn).await?;
    sqlx::query("DELETE FROM payout_batch_members WHERE aggregate_id = $1")
        .bind(aggregate.id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM aggregated_commissions WHERE id = $1").bind(aggregate.id).execute(conn).await?;
    debug!(
        "🗃️ Aggregate {} deleted. The {} {} rollup no longer has any source rows",
        aggregate.id, aggregate.commission_type, aggregate.currency
    );
    Ok(())
}

async fn relink_sources(
    aggregate_id: i64,
    source_ids: &[i64],
    conn: &mut SqliteConnection,
) -> Result<(), CommissionDatabaseError> {
    sqlx::query("DELETE FROM aggregate_sources WHERE aggregate_id = $1").bind(aggregate_id).execute(&mut *conn).await?;
    if source_ids.is_empty() {
        return Ok(());
    }
    let mut qb = QueryBuilder::new("INSERT INTO aggregate_sources (aggregate_id, source_id) ");
    qb.push_values(source_ids, |mut b, source_id| {
        b.push_bind(aggregate_id);
        b.push_bind(*source_id);
    });
    qb.build().execute(conn).await?;
    Ok(())
}

pub async fn aggregate_source_ids(
    aggregate_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<i64>, CommissionDatabaseError> {
    let ids = sqlx::query_scalar("SELECT source_id FROM aggregate_sources WHERE aggregate_id = $1 ORDER BY source_id")
        .bind(aggregate_id)
        .fetch_all(conn)
        .await?;
    Ok(ids)
}

//------------------------------------------ Payout batches -----------------------------------------------------------

/// Reconciles the month's payout batches against `batches`, one per currency. `Paid` batches keep their status no
/// matter what; everything else becomes `Preview` or `Pending` according to the flag. Unpaid batches for currencies
/// that no longer have rollups are deleted. Callers run this inside a transaction.
pub async fn upsert_payout_batches(
    influencer_id: i64,
    month: CalendarMonth,
    batches: Vec<NewPayoutBatch>,
    preview: bool,
    conn: &mut SqliteConnection,
) -> Result<Vec<PayoutBatch>, CommissionDatabaseError> {
    let desired_status = if preview { PayoutStatus::Preview } else { PayoutStatus::Pending };
    let existing = payout_batches_for_month(influencer_id, month, &mut *conn).await?;
    let mut stale: HashMap<String, PayoutBatch> =
        existing.into_iter().map(|batch| (batch.currency.clone(), batch)).collect();
    for batch in batches {
        let stored = match stale.remove(&batch.currency) {
            Some(current) => {
                let status = if current.status == PayoutStatus::Paid { PayoutStatus::Paid } else { desired_status };
                if current.total_amount == batch.total_amount && current.status == status {
                    current
                } else {
                    update_batch(current.id, batch.total_amount, status, &mut *conn).await?
                }
            },
            None => insert_batch(influencer_id, month, &batch, desired_status, &mut *conn).await?,
        };
        relink_batch_members(stored.id, &batch.aggregate_ids, &mut *conn).await?;
    }
    for batch in stale.into_values() {
        if batch.status == PayoutStatus::Paid {
            warn!(
                "🗃️ Payout batch {} ({} {}) has already been paid but no rollups back it anymore. Keeping the record",
                batch.id, batch.total_amount, batch.currency
            );
            relink_batch_members(batch.id, &[], &mut *conn).await?;
        } else {
            delete_batch(&batch, &mut *conn).await?;
        }
    }
    payout_batches_for_month(influencer_id, month, conn).await
}

async fn insert_batch(
    influencer_id: i64,
    month: CalendarMonth,
    batch: &NewPayoutBatch,
    status: PayoutStatus,
    conn: &mut SqliteConnection,
) -> Result<PayoutBatch, CommissionDatabaseError> {
    let stored: PayoutBatch = sqlx::query_as(
        "INSERT INTO payout_batches (influencer_id, month, currency, total_amount, status) VALUES ($1, $2, $3, $4, \
         $5) RETURNING *",
    )
    .bind(influencer_id)
    .bind(month)
    .bind(&batch.currency)
    .bind(batch.total_amount.value())
    .bind(status.to_string())
    .fetch_one(conn)
    .await?;
    debug!("🗃️ Payout batch {} created: {} {} for {month} ({status})", stored.id, stored.total_amount, stored.currency);
    Ok(stored)
}

async fn update_batch(
    id: i64,
    total_amount: Money,
    status: PayoutStatus,
    conn: &mut SqliteConnection,
) -> Result<PayoutBatch, CommissionDatabaseError> {
    let stored: PayoutBatch = sqlx::query_as(
        "UPDATE payout_batches SET total_amount = $1, status = $2, updated_at = CURRENT_TIMESTAMP WHERE id = $3 \
         RETURNING *",
    )
    .bind(total_amount.value())
    .bind(status.to_string())
    .bind(id)
    .fetch_one(conn)
    .await?;
    debug!("🗃️ Payout batch {id} adjusted to {} {} ({})", stored.total_amount, stored.currency, stored.status);
    Ok(stored)
}

async fn delete_batch(batch: &PayoutBatch, conn: &mut SqliteConnection) -> Result<(), CommissionDatabaseError> {
    sqlx::query("DELETE FROM payout_batch_members WHERE batch_id = $1").bind(batch.id).execute(&mut *conn).await?;
    sqlx::query("DELETE FROM payout_batches WHERE id = $1").bind(batch.id).execute(conn).await?;
    debug!("🗃️ Payout batch {} deleted. No {} rollups remain for {}", batch.id, batch.currency, batch.month);
    Ok(())
}

async fn relink_batch_members(
    batch_id: i64,
    aggregate_ids: &[i64],
    conn: &mut SqliteConnection,
) -> Result<(), CommissionDatabaseError> {
    sqlx::query("DELETE FROM payout_batch_members WHERE batch_id = $1").bind(batch_id).execute(&mut *conn).await?;
    if aggregate_ids.is_empty() {
        return Ok(());
    }
    let mut qb = QueryBuilder::new("INSERT INTO payout_batch_members (batch_id, aggregate_id) ");
    qb.push_values(aggregate_ids, |mut b, aggregate_id| {
        b.push_bind(batch_id);
        b.push_bind(*aggregate_id);
    });
    qb.build().execute(conn).await?;
    Ok(())
}

pub async fn payout_batches_for_month(
    influencer_id: i64,
    month: CalendarMonth,
    conn: &mut SqliteConnection,
) -> Result<Vec<PayoutBatch>, CommissionDatabaseError> {
    let batches =
        sqlx::query_as("SELECT * FROM payout_batches WHERE influencer_id = $1 AND month = $2 ORDER BY currency")
            .bind(influencer_id)
            .bind(month)
            .fetch_all(conn)
            .await?;
    Ok(batches)
}

pub async fn payout_batch_by_id(
    batch_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<PayoutBatch>, CommissionDatabaseError> {
    let batch = sqlx::query_as("SELECT * FROM payout_batches WHERE id = $1").bind(batch_id).fetch_optional(conn).await?;
    Ok(batch)
}

pub async fn batch_aggregate_ids(
    batch_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<i64>, CommissionDatabaseError> {
    let ids = sqlx::query_scalar("SELECT aggregate_id FROM payout_batch_members WHERE batch_id = $1 ORDER BY aggregate_id")
        .bind(batch_id)
        .fetch_all(conn)
        .await?;
    Ok(ids)
}

pub async fn update_payout_status(
    batch_id: i64,
    new_status: PayoutStatus,
    conn: &mut SqliteConnection,
) -> Result<PayoutBatch, CommissionDatabaseError> {
    let batch = payout_batch_by_id(batch_id, &mut *conn)
        .await?
        .ok_or(CommissionDatabaseError::PayoutBatchNotFound(batch_id))?;
    batch.status.validate_transition(new_status)?;
    let updated =
        sqlx::query_as("UPDATE payout_batches SET status = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2 RETURNING *")
            .bind(new_status.to_string())
            .bind(batch_id)
            .fetch_one(conn)
            .await?;
    debug!("🗃️ Payout batch {batch_id} status changed: {} -> {}", batch.status, new_status);
    Ok(updated)
}
