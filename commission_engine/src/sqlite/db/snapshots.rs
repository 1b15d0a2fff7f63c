use log::debug;
use sqlx::SqliteConnection;

use crate::{
    db_types::{NewUsageSnapshot, UsageSnapshot},
    helpers::CalendarMonth,
    traits::{CommissionDatabaseError, SnapshotUpsert},
};

pub async fn snapshot_by_key(
    new: &NewUsageSnapshot,
    conn: &mut SqliteConnection,
) -> Result<Option<UsageSnapshot>, CommissionDatabaseError> {
    let snapshot = sqlx::query_as(
        "SELECT * FROM usage_snapshots WHERE influencer_id = $1 AND user_id = $2 AND cohort_id = $3 AND month = $4 \
         AND currency = $5",
    )
    .bind(new.influencer_id)
    .bind(new.user_id)
    .bind(new.cohort_id)
    .bind(new.month)
    .bind(new.currency.as_str())
    .fetch_optional(conn)
    .await?;
    Ok(snapshot)
}

/// Stores the snapshot. If a row already exists for the key, it is only overwritten when the monetary totals
/// moved materially; otherwise the stored row is returned untouched, timestamps included.
pub async fn upsert_snapshot(
    new: NewUsageSnapshot,
    conn: &mut SqliteConnection,
) -> Result<SnapshotUpsert, CommissionDatabaseError> {
    let result = match snapshot_by_key(&new, &mut *conn).await? {
        None => {
            let snapshot = insert_snapshot(&new, conn).await?;
            debug!("🗃️ Usage snapshot stored with id {} for user {}", snapshot.id, snapshot.user_id);
            SnapshotUpsert::Inserted(snapshot)
        },
        Some(existing) if new.differs_materially(&existing) => {
            let snapshot = overwrite_snapshot(existing.id, &new, conn).await?;
            debug!("🗃️ Usage snapshot {} overwritten: {} -> {}", snapshot.id, existing.commission_amount, snapshot.commission_amount);
            SnapshotUpsert::Overwritten(snapshot)
        },
        Some(existing) => SnapshotUpsert::Unchanged(existing),
    };
    Ok(result)
}

async fn insert_snapshot(
    new: &NewUsageSnapshot,
    conn: &mut SqliteConnection,
) -> Result<UsageSnapshot, CommissionDatabaseError> {
    let snapshot = sqlx::query_as(
        r#"
            INSERT INTO usage_snapshots (
                influencer_id,
                user_id,
                cohort_id,
                month,
                currency,
                user_total_points,
                cohort_points,
                paid_amount,
                commission_amount,
                kind_breakdown
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *;
        "#,
    )
    .bind(new.influencer_id)
    .bind(new.user_id)
    .bind(new.cohort_id)
    .bind(new.month)
    .bind(new.currency.as_str())
    .bind(new.user_total_points)
    .bind(new.cohort_points)
    .bind(new.paid_amount.value())
    .bind(new.commission_amount.value())
    .bind(new.breakdown_json())
    .fetch_one(conn)
    .await?;
    Ok(snapshot)
}

async fn overwrite_snapshot(
    id: i64,
    new: &NewUsageSnapshot,
    conn: &mut SqliteConnection,
) -> Result<UsageSnapshot, CommissionDatabaseError> {
    let snapshot = sqlx::query_as(
        r#"
            UPDATE usage_snapshots
            SET user_total_points = $1,
                cohort_points = $2,
                paid_amount = $3,
                commission_amount = $4,
                kind_breakdown = $5,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $6
            RETURNING *;
        "#,
    )
    .bind(new.user_total_points)
    .bind(new.cohort_points)
    .bind(new.paid_amount.value())
    .bind(new.commission_amount.value())
    .bind(new.breakdown_json())
    .bind(id)
    .fetch_one(conn)
    .await?;
    Ok(snapshot)
}

pub async fn snapshots_for_month(
    influencer_id: i64,
    month: CalendarMonth,
    conn: &mut SqliteConnection,
) -> Result<Vec<UsageSnapshot>, CommissionDatabaseError> {
    let snapshots = sqlx::query_as(
        "SELECT * FROM usage_snapshots WHERE influencer_id = $1 AND month = $2 ORDER BY cohort_id, currency, user_id",
    )
    .bind(influencer_id)
    .bind(month)
    .fetch_all(conn)
    .await?;
    Ok(snapshots)
}
